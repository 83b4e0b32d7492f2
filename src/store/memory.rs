//! A fully in-memory [`LinkStore`], keeping everything in RAM with no
//! persistence. Meant for tests and throwaway deployments.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};

use super::{InsertOutcome, LinkStore};
use crate::{
    error::StoreError,
    models::{Click, ClickEvent, Link},
};

#[derive(Debug)]
struct Stored {
    seq: u64,
    link: Link,
}

/// Links keyed by short code. DashMap's entry API holds the shard lock for the
/// whole check-and-insert, which gives `insert_if_absent` its atomicity.
#[derive(Debug, Default)]
pub struct MemoryStore {
    links: DashMap<String, Stored>,
    clicks: DashMap<String, Vec<Click>>,
    next_seq: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored links.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    fn sorted_newest_first(&self, filter: impl Fn(&Link) -> bool) -> Vec<Link> {
        let mut rows: Vec<(u64, Link)> = self
            .links
            .iter()
            .filter(|entry| filter(&entry.link))
            .map(|entry| (entry.seq, entry.link.clone()))
            .collect();
        rows.sort_by(|a, b| {
            b.1.created_at
                .cmp(&a.1.created_at)
                .then_with(|| b.0.cmp(&a.0))
        });
        rows.into_iter().map(|(_, link)| link).collect()
    }
}

#[async_trait]
impl LinkStore for MemoryStore {
    #[tracing::instrument(level = "trace", skip(self), ret, err)]
    async fn insert_if_absent(&self, link: &Link) -> Result<InsertOutcome, StoreError> {
        match self.links.entry(link.short_code.clone()) {
            Entry::Occupied(_) => Ok(InsertOutcome::Conflict),
            Entry::Vacant(slot) => {
                let mut link = link.clone();
                link.click_count = 0;
                slot.insert(Stored {
                    seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                    link,
                });
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    #[tracing::instrument(level = "trace", skip(self), err)]
    async fn get_by_code(&self, short_code: &str) -> Result<Option<Link>, StoreError> {
        Ok(self.links.get(short_code).map(|entry| entry.link.clone()))
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Link>, StoreError> {
        Ok(self.sorted_newest_first(|link| link.owner_id == owner_id))
    }

    async fn all_links(&self) -> Result<Vec<Link>, StoreError> {
        Ok(self.sorted_newest_first(|_| true))
    }

    #[tracing::instrument(level = "trace", skip(self), ret, err)]
    async fn increment_click(&self, click: &ClickEvent) -> Result<bool, StoreError> {
        let link_id = match self.links.get_mut(&click.short_code) {
            Some(mut entry) => {
                entry.link.click_count += 1;
                entry.link.id.clone()
            }
            None => return Ok(false),
        };

        self.clicks.entry(link_id).or_default().push(Click {
            clicked_at: click.clicked_at,
            referer: click.referer.clone(),
            user_agent: click.user_agent.clone(),
            browser: click.browser.clone(),
            os: click.os.clone(),
            device_type: click.device_type.clone(),
        });
        Ok(true)
    }

    async fn recent_clicks(&self, link_id: &str, limit: u32) -> Result<Vec<Click>, StoreError> {
        let Some(history) = self.clicks.get(link_id) else {
            return Ok(Vec::new());
        };
        let mut recent: Vec<Click> = history.iter().rev().cloned().collect();
        // History is appended in arrival order; clicks can arrive slightly out
        // of order, so sort on the timestamp too.
        recent.sort_by(|a, b| b.clicked_at.cmp(&a.clicked_at));
        recent.truncate(limit as usize);
        Ok(recent)
    }
}
