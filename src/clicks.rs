use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use woothee::parser::Parser;

use crate::{models::ClickEvent, store::LinkStore};

/// Fire-and-forget handle for recording clicks.
///
/// Events go into a bounded queue drained by a single background worker, so
/// the redirect path never waits on the store. When the queue is full an event
/// is parked on its own task until there is room. At most `capacity` events
/// are parked at once; past that, clicks are dropped with a warning, so memory
/// stays bounded while the store is slow at the cost of undercounting.
///
/// Cloning is cheap; the worker exits once every handle is dropped and the
/// queue is drained.
#[derive(Clone, Debug)]
pub struct ClickRecorder {
    tx: mpsc::Sender<ClickEvent>,
    deferred: Arc<AtomicUsize>,
    max_deferred: usize,
}

impl ClickRecorder {
    /// Start the worker. The returned handle resolves once the worker has
    /// flushed every queued event after the last recorder was dropped.
    pub fn spawn(store: Arc<dyn LinkStore>, capacity: usize) -> (Self, JoinHandle<()>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let worker = tokio::spawn(run_worker(store, rx));
        let recorder = Self {
            tx,
            deferred: Arc::new(AtomicUsize::new(0)),
            max_deferred: capacity,
        };
        (recorder, worker)
    }

    /// Queue a click. Never blocks and never fails from the caller's side.
    pub fn record(&self, event: ClickEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                if self.deferred.fetch_add(1, Ordering::AcqRel) >= self.max_deferred {
                    self.deferred.fetch_sub(1, Ordering::AcqRel);
                    tracing::warn!(
                        "Click for '{}' dropped: queue and overflow are full",
                        event.short_code
                    );
                    return;
                }

                tracing::debug!("Click queue full, deferring '{}'", event.short_code);
                let tx = self.tx.clone();
                let deferred = self.deferred.clone();
                tokio::spawn(async move {
                    if let Err(e) = tx.send(event).await {
                        tracing::warn!("Click for '{}' dropped: queue closed", e.0.short_code);
                    }
                    deferred.fetch_sub(1, Ordering::AcqRel);
                });
            }
            Err(TrySendError::Closed(event)) => {
                tracing::warn!("Click for '{}' dropped: queue closed", event.short_code);
            }
        }
    }
}

async fn run_worker(store: Arc<dyn LinkStore>, mut rx: mpsc::Receiver<ClickEvent>) {
    let parser = Parser::new();

    while let Some(mut event) = rx.recv().await {
        let (browser, os, device_type) = parse_user_agent(&parser, event.user_agent.as_deref());
        event.browser = browser;
        event.os = os;
        event.device_type = device_type;

        match store.increment_click(&event).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    "Click logging: link '{}' unknown to the store",
                    event.short_code
                );
            }
            Err(e) => {
                tracing::warn!("Click logging failed for '{}': {}", event.short_code, e);
            }
        }
    }

    tracing::debug!("Click worker stopped");
}

/// Parse a User-Agent string using woothee and return
/// `(browser_name, os_name, device_category)`.
fn parse_user_agent(
    parser: &Parser,
    ua: Option<&str>,
) -> (Option<String>, Option<String>, Option<String>) {
    let ua = match ua {
        Some(s) if !s.is_empty() => s,
        _ => return (None, None, None),
    };

    let known = |value: &str| {
        if value.is_empty() || value == "UNKNOWN" {
            None
        } else {
            Some(value.to_owned())
        }
    };

    match parser.parse(ua) {
        Some(result) => (known(result.name), known(result.os), known(result.category)),
        None => (None, None, None),
    }
}
