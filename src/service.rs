use std::{sync::Arc, time::Duration};

use url::Url;

use crate::{
    cache::LinkCache,
    clicks::ClickRecorder,
    codegen::Generator,
    error::{LinkError, StoreError},
    models::{Analytics, Breakdown, ClickEvent, Link, Visit},
    store::{InsertOutcome, LinkStore},
};

/// How many recent clicks the analytics summary is computed over.
const ANALYTICS_WINDOW: u32 = 500;

/// Retry and timeout policy for link creation.
#[derive(Debug, Clone, Copy)]
pub struct CreatePolicy {
    pub max_attempts: u32,
    pub timeout: Duration,
}

impl Default for CreatePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            timeout: Duration::from_secs(2),
        }
    }
}

/// Creation and resolution of short links.
pub struct LinkService {
    store: Arc<dyn LinkStore>,
    generator: Arc<dyn Generator>,
    cache: LinkCache,
    clicks: ClickRecorder,
    policy: CreatePolicy,
}

impl LinkService {
    pub fn new(
        store: Arc<dyn LinkStore>,
        generator: Arc<dyn Generator>,
        cache: LinkCache,
        clicks: ClickRecorder,
        policy: CreatePolicy,
    ) -> Self {
        Self {
            store,
            generator,
            cache,
            clicks,
            policy,
        }
    }

    /// Shorten `original_url` on behalf of `owner_id`.
    ///
    /// Each attempt draws a fresh candidate and lets the store's atomic insert
    /// decide; a conflict only costs another attempt. The whole loop runs
    /// under the policy timeout.
    #[tracing::instrument(skip(self, original_url))]
    pub async fn create_link(
        &self,
        owner_id: &str,
        original_url: &str,
    ) -> Result<Link, LinkError> {
        let url = validate_url(original_url)?;

        let link = tokio::time::timeout(
            self.policy.timeout,
            self.insert_with_retry(owner_id, &url),
        )
        .await
        .map_err(|_| StoreError::Timeout(self.policy.timeout))??;

        self.cache.set(&link.short_code, &link.original_url);
        tracing::info!("Created link '{}' for {}", link.short_code, owner_id);
        Ok(link)
    }

    async fn insert_with_retry(&self, owner_id: &str, url: &str) -> Result<Link, LinkError> {
        for attempt in 1..=self.policy.max_attempts {
            let link = Link::new(owner_id, url, self.generator.generate());

            match self.store.insert_if_absent(&link).await? {
                InsertOutcome::Inserted => return Ok(link),
                InsertOutcome::Conflict => {
                    tracing::debug!(
                        "Short code '{}' taken (attempt {}/{})",
                        link.short_code,
                        attempt,
                        self.policy.max_attempts
                    );
                }
            }
        }

        tracing::error!(
            "No free short code after {} attempts; the code length is too small for the corpus",
            self.policy.max_attempts
        );
        Err(LinkError::CodeSpaceExhausted {
            attempts: self.policy.max_attempts,
        })
    }

    /// Map a short code to its target URL and queue a click for it.
    ///
    /// The click is handed to the recorder without waiting; a failing click
    /// path cannot affect the returned URL.
    pub async fn resolve_link(&self, short_code: &str, visit: Visit) -> Result<String, LinkError> {
        let original_url = match self.cache.get(short_code) {
            Some(url) => url,
            None => match self.store.get_by_code(short_code).await? {
                Some(link) => {
                    self.cache.set(&link.short_code, &link.original_url);
                    link.original_url
                }
                None => {
                    tracing::debug!("Short code '{}' not found", short_code);
                    return Err(LinkError::NotFound);
                }
            },
        };

        self.clicks.record(ClickEvent::new(short_code, visit));
        Ok(original_url)
    }

    /// The owner's links, newest first.
    pub async fn list_links(&self, owner_id: &str) -> Result<Vec<Link>, LinkError> {
        Ok(self.store.list_by_owner(owner_id).await?)
    }

    /// Click summary of one link. Links owned by someone else are reported as
    /// missing.
    pub async fn link_analytics(
        &self,
        owner_id: &str,
        short_code: &str,
    ) -> Result<Analytics, LinkError> {
        let link = match self.store.get_by_code(short_code).await? {
            Some(link) if link.owner_id == owner_id => link,
            _ => return Err(LinkError::NotFound),
        };

        let recent_clicks = self.store.recent_clicks(&link.id, ANALYTICS_WINDOW).await?;
        let window = recent_clicks.len() as i64;

        let top_browsers = with_pct(
            count_field(recent_clicks.iter().map(|c| c.browser.as_deref())),
            window,
        );
        let top_os = with_pct(
            count_field(recent_clicks.iter().map(|c| c.os.as_deref())),
            window,
        );
        let top_devices = with_pct(
            count_field(recent_clicks.iter().map(|c| c.device_type.as_deref())),
            window,
        );
        let top_referers = with_pct(
            count_field(recent_clicks.iter().map(|c| c.referer.as_deref())),
            window,
        );

        Ok(Analytics {
            total_clicks: link.click_count,
            link,
            top_browsers,
            top_os,
            top_devices,
            top_referers,
            recent_clicks,
        })
    }
}

/// Accept only absolute http(s) URLs with a host, and return the parser's
/// serialization of it.
///
/// `Url::parse` silently strips tabs and newlines, so control characters are
/// rejected up front. The serialized form is always a valid `Location` value.
fn validate_url(input: &str) -> Result<String, LinkError> {
    let trimmed = input.trim();
    let invalid = || LinkError::InvalidUrl(trimmed.escape_debug().to_string());

    if trimmed.chars().any(char::is_control) {
        return Err(invalid());
    }
    let parsed = Url::parse(trimmed).map_err(|_| invalid())?;

    let scheme_ok = matches!(parsed.scheme(), "http" | "https");
    let host_ok = parsed.host_str().is_some_and(|h| !h.is_empty());
    if !scheme_ok || !host_ok {
        return Err(invalid());
    }

    Ok(String::from(parsed))
}

/// Tally occurrences of each non-None value, sort descending by count, and
/// return the top 10.
fn count_field<'a>(iter: impl Iterator<Item = Option<&'a str>>) -> Vec<(String, i64)> {
    let mut counts: std::collections::HashMap<String, i64> = std::collections::HashMap::new();
    for val in iter.flatten() {
        if !val.is_empty() {
            *counts.entry(val.to_owned()).or_insert(0) += 1;
        }
    }
    let mut sorted: Vec<(String, i64)> = counts.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted.truncate(10);
    sorted
}

/// Attach a percentage-of-total column to each breakdown row.
fn with_pct(items: Vec<(String, i64)>, total: i64) -> Vec<Breakdown> {
    items
        .into_iter()
        .map(|(name, count)| {
            let pct = if total > 0 { count * 100 / total } else { 0 };
            Breakdown { name, count, pct }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::{
        collections::{HashSet, VecDeque},
        sync::Mutex,
    };

    use async_trait::async_trait;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::{
        codegen::RandomCodes,
        models::Click,
        store::{memory::MemoryStore, tests::BrokenStore},
    };

    /// Hands out a fixed sequence of codes, then falls back to `fallback`.
    struct Scripted {
        codes: Mutex<VecDeque<String>>,
        fallback: String,
    }

    impl Scripted {
        fn new(codes: &[&str], fallback: &str) -> Self {
            Self {
                codes: Mutex::new(codes.iter().map(|c| c.to_string()).collect()),
                fallback: fallback.to_owned(),
            }
        }
    }

    impl Generator for Scripted {
        fn generate(&self) -> String {
            self.codes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone())
        }
    }

    /// Accepts writes only after sitting on them for `delay`.
    struct SlowStore {
        delay: Duration,
    }

    #[async_trait]
    impl LinkStore for SlowStore {
        async fn insert_if_absent(&self, _: &Link) -> Result<InsertOutcome, StoreError> {
            tokio::time::sleep(self.delay).await;
            Ok(InsertOutcome::Inserted)
        }
        async fn get_by_code(&self, _: &str) -> Result<Option<Link>, StoreError> {
            Ok(None)
        }
        async fn list_by_owner(&self, _: &str) -> Result<Vec<Link>, StoreError> {
            Ok(Vec::new())
        }
        async fn all_links(&self) -> Result<Vec<Link>, StoreError> {
            Ok(Vec::new())
        }
        async fn increment_click(&self, _: &ClickEvent) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn recent_clicks(&self, _: &str, _: u32) -> Result<Vec<Click>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn service_with_policy(
        store: Arc<dyn LinkStore>,
        generator: impl Generator,
        policy: CreatePolicy,
    ) -> (LinkService, JoinHandle<()>) {
        let (clicks, worker) = ClickRecorder::spawn(store.clone(), 64);
        let service = LinkService::new(
            store,
            Arc::new(generator),
            LinkCache::new(),
            clicks,
            policy,
        );
        (service, worker)
    }

    fn service_with(
        store: Arc<MemoryStore>,
        generator: impl Generator,
        max_attempts: u32,
    ) -> (LinkService, JoinHandle<()>) {
        let policy = CreatePolicy {
            max_attempts,
            ..CreatePolicy::default()
        };
        service_with_policy(store, generator, policy)
    }

    #[tokio::test]
    async fn create_then_resolve_round_trips() {
        let store = Arc::new(MemoryStore::new());
        let (service, _worker) = service_with(store, RandomCodes::default(), 5);

        let url = "https://example.com/some/long/path?with=query&and=more#frag";
        let link = service.create_link("user1", url).await.unwrap();
        assert_eq!(link.original_url, url);
        assert_eq!(link.owner_id, "user1");
        assert_eq!(link.click_count, 0);

        let resolved = service
            .resolve_link(&link.short_code, Visit::default())
            .await
            .unwrap();
        assert_eq!(resolved, url);
    }

    #[tokio::test]
    async fn resolve_reads_through_to_the_store() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_if_absent(&Link::new("u", "https://stored.example", "direct"))
            .await
            .unwrap();
        let (service, _worker) = service_with(store, RandomCodes::default(), 5);

        let resolved = service.resolve_link("direct", Visit::default()).await.unwrap();
        assert_eq!(resolved, "https://stored.example");
    }

    #[tokio::test]
    async fn unknown_code_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let (service, _worker) = service_with(store, RandomCodes::default(), 5);

        let err = service
            .resolve_link("nothing", Visit::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::NotFound));
    }

    #[tokio::test]
    async fn invalid_url_persists_nothing() {
        let store = Arc::new(MemoryStore::new());
        let (service, _worker) = service_with(store.clone(), RandomCodes::default(), 5);

        for bad in [
            "not a url",
            "",
            "/relative/path",
            "ftp://example.com/file",
            "mailto:a@b.c",
            "http://",
            "https://example.com/a\nb",
            "https://example.com/a\tb",
            "https://exa\rmple.com/",
            "https://example.com/\u{7f}",
        ] {
            let err = service.create_link("user1", bad).await.unwrap_err();
            assert!(matches!(err, LinkError::InvalidUrl(_)), "{bad:?} gave {err:?}");
        }
        assert!(store.is_empty());
    }

    #[test]
    fn stored_urls_are_normalised() {
        assert_eq!(
            validate_url("  https://Example.COM  ").unwrap(),
            "https://example.com/"
        );
        assert_eq!(
            validate_url("https://example.com/caf\u{e9} page").unwrap(),
            "https://example.com/caf%C3%A9%20page"
        );
        for ok in ["https://example.com/a", "http://b\u{fc}cher.example/x?q=1"] {
            let url = validate_url(ok).unwrap();
            assert!(axum::http::HeaderValue::try_from(url.as_str()).is_ok(), "{url}");
        }
    }

    #[tokio::test]
    async fn slow_store_hits_the_create_timeout() {
        let store = Arc::new(SlowStore {
            delay: Duration::from_secs(5),
        });
        let policy = CreatePolicy {
            max_attempts: 5,
            timeout: Duration::from_millis(50),
        };
        let (service, _worker) = service_with_policy(store, RandomCodes::default(), policy);

        let started = std::time::Instant::now();
        let err = service
            .create_link("user1", "https://example.com")
            .await
            .unwrap_err();
        assert!(
            matches!(err, LinkError::StoreUnavailable(StoreError::Timeout(t)) if t == policy.timeout),
            "{err:?}"
        );
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn store_failures_surface_as_unavailable() {
        let (service, _worker) =
            service_with_policy(Arc::new(BrokenStore), RandomCodes::default(), CreatePolicy::default());

        let err = service
            .create_link("user1", "https://example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::StoreUnavailable(StoreError::Database(_))), "{err:?}");

        let err = service
            .resolve_link("abc", Visit::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::StoreUnavailable(_)), "{err:?}");

        let err = service.list_links("user1").await.unwrap_err();
        assert!(matches!(err, LinkError::StoreUnavailable(_)), "{err:?}");
    }

    #[tokio::test]
    async fn conflict_retries_with_a_new_code() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_if_absent(&Link::new("other", "https://taken.example", "taken"))
            .await
            .unwrap();
        let codes = Scripted::new(&["taken", "taken", "fresh"], "never");
        let (service, _worker) = service_with(store, codes, 5);

        let link = service
            .create_link("user1", "https://example.com")
            .await
            .unwrap();
        assert_eq!(link.short_code, "fresh");
    }

    #[tokio::test]
    async fn saturated_code_space_is_exhausted_without_writes() {
        let store = Arc::new(MemoryStore::new());
        for code in ["a", "b"] {
            store
                .insert_if_absent(&Link::new("seed", "https://seed.example", code))
                .await
                .unwrap();
        }
        let codes = RandomCodes::new("ab", 1).unwrap();
        let (service, _worker) = service_with(store.clone(), codes, 5);

        let err = service.create_link("user1", "https://example.com").await.unwrap_err();
        assert!(matches!(err, LinkError::CodeSpaceExhausted { attempts: 5 }));
        assert_eq!(store.len(), 2);
        assert!(store.list_by_owner("user1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn succeeds_against_a_large_corpus() {
        let alphabet: String = ('a'..='z')
            .chain('0'..='9')
            .filter(|c| !matches!(c, '0' | 'o' | '1' | 'l' | 'i'))
            .collect();
        let codes = RandomCodes::new(&alphabet, 6).unwrap();

        let store = Arc::new(MemoryStore::new());
        let mut seeded = 0;
        while seeded < 10_000 {
            let link = Link::new("seed", "https://seed.example", codes.generate());
            if store.insert_if_absent(&link).await.unwrap() == InsertOutcome::Inserted {
                seeded += 1;
            }
        }

        let (service, _worker) = service_with(store, codes, 5);
        let link = service
            .create_link("user1", "https://example.com/page")
            .await
            .unwrap();
        assert_eq!(link.original_url, "https://example.com/page");
        assert_eq!(link.short_code.chars().count(), 6);
        assert!(link.short_code.chars().all(|c| alphabet.contains(c)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creations_on_the_same_candidate() {
        let store = Arc::new(MemoryStore::new());
        let codes = Scripted::new(&["dup", "dup", "other"], "spare");
        let (service, _worker) = service_with(store.clone(), codes, 5);
        let service = Arc::new(service);

        let a = tokio::spawn({
            let service = service.clone();
            async move { service.create_link("alice", "https://a.example").await }
        });
        let b = tokio::spawn({
            let service = service.clone();
            async move { service.create_link("bob", "https://b.example").await }
        });

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        let codes = HashSet::from([a.short_code.clone(), b.short_code.clone()]);
        assert_eq!(codes, HashSet::from(["dup".to_owned(), "other".to_owned()]));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn codes_stay_unique_across_owners() {
        let store = Arc::new(MemoryStore::new());
        // A small space so collisions really happen.
        let codes = RandomCodes::new("abcdef", 3).unwrap();
        let (service, _worker) = service_with(store.clone(), codes, 50);
        let service = Arc::new(service);

        let mut tasks = Vec::new();
        for i in 0..40 {
            let service = service.clone();
            tasks.push(tokio::spawn(async move {
                service
                    .create_link(&format!("owner-{}", i % 4), "https://example.com")
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let mut seen = HashSet::new();
        for owner in 0..4 {
            for link in store.list_by_owner(&format!("owner-{owner}")).await.unwrap() {
                assert!(seen.insert(link.short_code), "duplicate short code");
            }
        }
        assert_eq!(seen.len(), 40);
    }

    #[tokio::test]
    async fn resolutions_are_counted() {
        let store = Arc::new(MemoryStore::new());
        let (service, worker) = service_with(store.clone(), RandomCodes::default(), 5);

        let link = service.create_link("user1", "https://example.com").await.unwrap();
        let mut last_seen = 0;
        for _ in 0..20 {
            service
                .resolve_link(&link.short_code, Visit::default())
                .await
                .unwrap();
            let now = store
                .get_by_code(&link.short_code)
                .await
                .unwrap()
                .unwrap()
                .click_count;
            assert!(now >= last_seen);
            last_seen = now;
        }

        // Dropping the service closes the click queue; the worker drains it.
        drop(service);
        worker.await.unwrap();
        let link = store.get_by_code(&link.short_code).await.unwrap().unwrap();
        assert_eq!(link.click_count, 20);
    }

    #[tokio::test]
    async fn analytics_are_owner_scoped() {
        let store = Arc::new(MemoryStore::new());
        let (service, worker) = service_with(store.clone(), RandomCodes::default(), 5);

        let link = service.create_link("alice", "https://example.com").await.unwrap();
        for referer in ["https://news.example", "https://news.example", "https://blog.example"] {
            let visit = Visit {
                referer: Some(referer.to_owned()),
                user_agent: None,
            };
            service.resolve_link(&link.short_code, visit).await.unwrap();
        }
        drop(service);
        worker.await.unwrap();

        let (clicks, _worker) = ClickRecorder::spawn(store.clone(), 8);
        let service = LinkService::new(
            store,
            Arc::new(RandomCodes::default()),
            LinkCache::new(),
            clicks,
            CreatePolicy::default(),
        );

        let summary = service.link_analytics("alice", &link.short_code).await.unwrap();
        assert_eq!(summary.total_clicks, 3);
        assert_eq!(summary.recent_clicks.len(), 3);
        assert_eq!(
            summary.top_referers[0],
            Breakdown {
                name: "https://news.example".to_owned(),
                count: 2,
                pct: 66,
            }
        );
        assert_eq!(summary.top_referers[1].name, "https://blog.example");
        assert_eq!(summary.top_referers[1].pct, 33);

        let err = service.link_analytics("mallory", &link.short_code).await.unwrap_err();
        assert!(matches!(err, LinkError::NotFound));
    }

    #[test]
    fn count_field_ranks_by_frequency() {
        let values = [Some("b"), None, Some("a"), Some("b"), Some("")];
        let counted = count_field(values.into_iter());
        assert_eq!(counted, vec![("b".to_owned(), 2), ("a".to_owned(), 1)]);
        let rows = with_pct(counted, 4);
        assert_eq!((rows[0].name.as_str(), rows[0].count, rows[0].pct), ("b", 2, 50));
    }
}
