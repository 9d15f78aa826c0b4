//
// bundle_index.rs
//
// Workspace bundle index
//
// Owns the corpus of parsed manifests plus the service name index derived
// from it, tracks bundles whose files changed since their last parse, and
// reconciles those in a debounced background loop. All state sits behind
// one RwLock so an invalidate-then-reindex of a single bundle is atomic:
// readers never observe the gap between the two steps.
//

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::anyhow;
use indexmap::IndexMap;
use serde::Serialize;
use url::Url;

use crate::async_runner::{AsyncRunner, RunOutcome, TaskFuture};
use crate::config::BundleIndexConfig;
use crate::events::EventBus;
use crate::manifest::{ManifestDocument, StringFragment};
use crate::resolver::FileResolver;
use crate::service_index::{ManifestProvider, ServiceNameIndex};

/// Summary of one indexed bundle, for listings and reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bundle {
    pub uri: String,
    pub name: String,
    /// Trailing path segments of the uri, enough to tell bundles apart
    /// in a flat list.
    pub short_path: String,
}

/// Parsed manifests keyed by bundle id, in indexing order.
#[derive(Default)]
pub struct Corpus {
    docs: IndexMap<String, ManifestDocument>,
}

impl ManifestProvider for Corpus {
    fn provide_manifest(&self, bundle_id: &str) -> Option<&ManifestDocument> {
        self.docs.get(bundle_id)
    }
}

#[derive(Default)]
struct CorpusState {
    corpus: Corpus,
    services: ServiceNameIndex,
    dirty: HashSet<String>,
    /// Bundles taken out of `dirty` whose reparse has not landed yet.
    /// They still count as dirty for readers.
    in_flight: HashSet<String>,
}

/// assert_clean gave up waiting for the forced reconciliation. The run
/// itself keeps going; a later query may well see the fresh state.
#[derive(Debug)]
pub struct AssertCleanTimeout {
    pub bundle_id: String,
    pub waited: Duration,
}

impl fmt::Display for AssertCleanTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bundle {} still dirty after {:?}",
            self.bundle_id, self.waited
        )
    }
}

impl std::error::Error for AssertCleanTimeout {}

pub struct BundleIndex {
    state: Arc<RwLock<CorpusState>>,
    resolver: Arc<dyn FileResolver>,
    events: Arc<EventBus>,
    config: BundleIndexConfig,
    runner: Mutex<Option<AsyncRunner>>,
}

impl BundleIndex {
    pub fn new(resolver: Arc<dyn FileResolver>, config: BundleIndexConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(CorpusState::default())),
            resolver,
            events: Arc::new(EventBus::new()),
            config,
            runner: Mutex::new(None),
        }
    }

    /// Discard everything and reindex the whole workspace. Manifests that
    /// fail to read or parse are logged and skipped; the rest of the
    /// rebuild goes on. Returns the number of manifest files discovered.
    pub async fn rebuild(&self) -> anyhow::Result<usize> {
        if let Ok(mut runner) = self.runner.lock() {
            if let Some(old) = runner.take() {
                old.stop();
            }
        }

        {
            let mut state = self
                .state
                .write()
                .map_err(|_| anyhow!("index state poisoned"))?;
            state.corpus.docs.clear();
            state.services.clear_all();
            state.dirty.clear();
            state.in_flight.clear();
        }
        self.events.emit_index_invalidated_all();

        let uris = self
            .resolver
            .get_all_uris(Some(&self.config.files_glob))
            .await?;
        for uri in &uris {
            if let Err(err) =
                Self::update_single(&self.state, self.resolver.as_ref(), &self.events, uri).await
            {
                log::warn!("failed to index {uri}: {err:#}");
            }
        }

        let fresh = self.make_runner();
        fresh.start();
        if let Ok(mut runner) = self.runner.lock() {
            *runner = Some(fresh);
        }

        self.events.emit_index_rebuilt(uris.len());
        log::info!("indexed {} of {} manifests", self.len(), uris.len());
        Ok(uris.len())
    }

    /// Record that a bundle's file changed on disk. The background loop
    /// picks it up; until then queries serve the last good parse.
    pub fn mark_dirty(&self, bundle_id: &str) {
        let was_empty = {
            let Ok(mut state) = self.state.write() else {
                return;
            };
            let was_empty = state.dirty.is_empty();
            state.dirty.insert(bundle_id.to_string());
            was_empty
        };
        if was_empty {
            if let Ok(runner) = self.runner.lock() {
                if let Some(runner) = runner.as_ref() {
                    runner.resume();
                }
            }
        }
    }

    /// Wait until the bundle's pending change is reconciled, bounded by
    /// the configured timeout. Resolves immediately for clean bundles;
    /// otherwise forces a reconciliation run right away instead of
    /// waiting out the background delay. On timeout the forced run keeps
    /// going in the background.
    pub async fn assert_clean(&self, bundle_id: &str) -> Result<(), AssertCleanTimeout> {
        if !self.is_dirty(bundle_id) {
            return Ok(());
        }

        let state = Arc::clone(&self.state);
        let resolver = Arc::clone(&self.resolver);
        let events = Arc::clone(&self.events);
        let forced = tokio::spawn(async move {
            Self::process_dirty(&state, resolver.as_ref(), &events).await;
        });

        let waited = Duration::from_millis(self.config.assert_clean_timeout_ms);
        let settled = async {
            // The forced run may find the dirty set already drained by a
            // run that has this bundle in flight; poll until the bundle
            // is actually clean, whichever run lands it.
            let _ = forced.await;
            while self.is_dirty(bundle_id) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        match tokio::time::timeout(waited, settled).await {
            Ok(()) => Ok(()),
            Err(_) => Err(AssertCleanTimeout {
                bundle_id: bundle_id.to_string(),
                waited,
            }),
        }
    }

    pub fn find_bundle_by_id(&self, bundle_id: &str) -> Option<ManifestDocument> {
        let Ok(state) = self.state.read() else {
            return None;
        };
        state.corpus.docs.get(bundle_id).cloned()
    }

    /// All indexed bundles, sorted by name.
    pub fn bundles(&self) -> Vec<Bundle> {
        let Ok(state) = self.state.read() else {
            return Vec::new();
        };
        let mut bundles: Vec<Bundle> = state
            .corpus
            .docs
            .iter()
            .map(|(uri, doc)| Bundle {
                uri: uri.clone(),
                name: doc.name().to_string(),
                short_path: short_path(uri),
            })
            .collect();
        bundles.sort_by(|a, b| a.name.cmp(&b.name));
        bundles
    }

    pub fn bundle_ids(&self) -> Vec<String> {
        let Ok(state) = self.state.read() else {
            return Vec::new();
        };
        state.corpus.docs.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.corpus.docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while the bundle has an unreconciled change, including the
    /// window where a reconciliation run holds it in flight.
    pub fn is_dirty(&self, bundle_id: &str) -> bool {
        self.state
            .read()
            .map(|s| s.dirty.contains(bundle_id) || s.in_flight.contains(bundle_id))
            .unwrap_or(false)
    }

    pub fn dirty_count(&self) -> usize {
        self.state
            .read()
            .map(|s| s.dirty.union(&s.in_flight).count())
            .unwrap_or(0)
    }

    pub fn find_bundle_ids_by_service_name(&self, service_name: &str) -> HashSet<String> {
        let Ok(state) = self.state.read() else {
            return HashSet::new();
        };
        state.services.find_bundle_ids_by_service_name(service_name)
    }

    pub fn find_provides_for(&self, service_name: &str) -> Vec<StringFragment> {
        let Ok(state) = self.state.read() else {
            return Vec::new();
        };
        state.services.find_provides_for(service_name, &state.corpus)
    }

    pub fn find_providing_for(&self, service_name: &str) -> Vec<StringFragment> {
        let Ok(state) = self.state.read() else {
            return Vec::new();
        };
        state
            .services
            .find_providing_for(service_name, &state.corpus)
    }

    pub fn service_names(&self) -> Vec<String> {
        let Ok(state) = self.state.read() else {
            return Vec::new();
        };
        let mut names: Vec<String> = state.services.service_names().into_iter().cloned().collect();
        names.sort();
        names
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Stop the background loop. Queries still work afterwards; dirty
    /// bundles stay dirty.
    pub fn dispose(&self) {
        if let Ok(mut runner) = self.runner.lock() {
            if let Some(runner) = runner.take() {
                runner.stop();
            }
        }
    }

    fn make_runner(&self) -> AsyncRunner {
        let state = Arc::clone(&self.state);
        let resolver = Arc::clone(&self.resolver);
        let events = Arc::clone(&self.events);
        AsyncRunner::new(
            move || {
                let state = Arc::clone(&state);
                let resolver = Arc::clone(&resolver);
                let events = Arc::clone(&events);
                Box::pin(async move {
                    Self::process_dirty(&state, resolver.as_ref(), &events).await
                }) as TaskFuture
            },
            Duration::from_millis(self.config.reconcile_delay_ms),
        )
    }

    /// Reparse one manifest and swap it into the index. The old entry and
    /// its service associations are removed in the same write-lock scope
    /// that installs the new ones; on failure the old entry is left
    /// untouched.
    async fn update_single(
        state: &RwLock<CorpusState>,
        resolver: &dyn FileResolver,
        events: &EventBus,
        bundle_id: &str,
    ) -> anyhow::Result<()> {
        let text = resolver.resolve(bundle_id).await?;
        let doc = ManifestDocument::parse(&text)?;

        {
            let mut state = state.write().map_err(|_| anyhow!("index state poisoned"))?;
            let CorpusState {
                corpus, services, ..
            } = &mut *state;
            services.clear_for_manifest(bundle_id);
            corpus.docs.insert(bundle_id.to_string(), doc);
            services.index_manifest(bundle_id, corpus);
        }

        events.emit_manifest_indexed(bundle_id);
        Ok(())
    }

    /// One reconciliation run: drain the dirty set and reindex each
    /// member. Suspends the loop when there was nothing to do.
    ///
    /// Drained bundles move to the in-flight set and stay visibly dirty
    /// until their reparse lands; a mark_dirty arriving mid-run lands in
    /// the fresh dirty set and survives into the next run.
    async fn process_dirty(
        state: &RwLock<CorpusState>,
        resolver: &dyn FileResolver,
        events: &EventBus,
    ) -> RunOutcome {
        let pending = {
            let Ok(mut state) = state.write() else {
                return RunOutcome::Suspend;
            };
            let pending = std::mem::take(&mut state.dirty);
            if pending.is_empty() {
                return RunOutcome::Suspend;
            }
            state.in_flight.extend(pending.iter().cloned());
            pending
        };

        log::info!("reconciling {} dirty bundle(s)", pending.len());
        for bundle_id in pending {
            if let Err(err) = Self::update_single(state, resolver, events, &bundle_id).await {
                log::warn!("failed to reindex {bundle_id}: {err:#}");
            }
            if let Ok(mut state) = state.write() {
                state.in_flight.remove(&bundle_id);
            }
        }
        RunOutcome::Continue
    }
}

impl Drop for BundleIndex {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn short_path(uri: &str) -> String {
    let path = match Url::parse(uri) {
        Ok(url) => url.path().to_string(),
        Err(_) => uri.to_string(),
    };
    let mut tail: Vec<&str> = path.rsplit('/').take(2).collect();
    tail.reverse();
    tail.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::StaticResolver;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Resolver whose reads take a while, to hold a reconciliation run
    /// in flight at a known point.
    struct SlowResolver {
        inner: Arc<StaticResolver>,
        delay: Duration,
    }

    #[async_trait]
    impl FileResolver for SlowResolver {
        async fn get_all_uris(&self, files_glob: Option<&str>) -> anyhow::Result<Vec<String>> {
            self.inner.get_all_uris(files_glob).await
        }

        async fn resolve(&self, uri: &str) -> anyhow::Result<String> {
            tokio::time::sleep(self.delay).await;
            self.inner.resolve(uri).await
        }
    }

    fn manifest(name: &str, provides: &[&str]) -> String {
        let list = provides
            .iter()
            .map(|p| format!("\"{p}\""))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            r#"{{"name": "{name}", "components": [{{"name": "{name}Comp", "provides": [{list}]}}]}}"#
        )
    }

    fn index_with(resolver: &Arc<StaticResolver>) -> BundleIndex {
        BundleIndex::new(
            Arc::clone(resolver) as Arc<dyn FileResolver>,
            BundleIndexConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn rebuild_indexes_all_manifests() {
        let resolver = Arc::new(StaticResolver::new());
        resolver.insert("file:///w/a/manifest.json", &manifest("a", &["svc.A"]));
        resolver.insert("file:///w/b/manifest.json", &manifest("b", &["svc.B"]));
        let index = index_with(&resolver);

        let discovered = index.rebuild().await.unwrap();

        assert_eq!(discovered, 2);
        assert_eq!(index.len(), 2);
        assert!(index.find_bundle_by_id("file:///w/a/manifest.json").is_some());
        assert_eq!(
            index.find_bundle_ids_by_service_name("svc.A").len(),
            1
        );
        assert_eq!(index.service_names(), vec!["svc.A", "svc.B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_manifest_does_not_abort_the_rebuild() {
        let resolver = Arc::new(StaticResolver::new());
        resolver.insert("file:///w/a/manifest.json", &manifest("a", &["svc.A"]));
        resolver.insert_failing("file:///w/broken/manifest.json");
        let index = index_with(&resolver);

        let discovered = index.rebuild().await.unwrap();

        assert_eq!(discovered, 2);
        assert_eq!(index.len(), 1);
        assert!(index
            .find_bundle_by_id("file:///w/broken/manifest.json")
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_manifest_is_skipped() {
        let resolver = Arc::new(StaticResolver::new());
        resolver.insert("file:///w/a/manifest.json", &manifest("a", &[]));
        resolver.insert("file:///w/bad/manifest.json", "{\"name\": ");
        let index = index_with(&resolver);

        index.rebuild().await.unwrap();

        assert_eq!(index.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn bundles_are_sorted_by_name() {
        let resolver = Arc::new(StaticResolver::new());
        resolver.insert("file:///w/x/manifest.json", &manifest("zeta", &[]));
        resolver.insert("file:///w/y/manifest.json", &manifest("alpha", &[]));
        let index = index_with(&resolver);

        index.rebuild().await.unwrap();
        let bundles = index.bundles();

        assert_eq!(bundles.len(), 2);
        assert_eq!(bundles[0].name, "alpha");
        assert_eq!(bundles[0].short_path, "y/manifest.json");
        assert_eq!(bundles[1].name, "zeta");
    }

    #[tokio::test(start_paused = true)]
    async fn dirty_bundle_is_reconciled_by_the_background_loop() {
        let resolver = Arc::new(StaticResolver::new());
        resolver.insert("file:///w/a/manifest.json", &manifest("a", &["svc.old"]));
        let index = index_with(&resolver);
        index.rebuild().await.unwrap();

        // Simulate an external edit then a watcher notification.
        resolver.set("file:///w/a/manifest.json", &manifest("a", &["svc.new"]));
        index.mark_dirty("file:///w/a/manifest.json");
        assert!(index.is_dirty("file:///w/a/manifest.json"));

        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!index.is_dirty("file:///w/a/manifest.json"));
        assert!(index.find_bundle_ids_by_service_name("svc.old").is_empty());
        assert_eq!(index.find_bundle_ids_by_service_name("svc.new").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn assert_clean_forces_immediate_reconciliation() {
        let resolver = Arc::new(StaticResolver::new());
        resolver.insert("file:///w/a/manifest.json", &manifest("a", &["svc.A"]));
        let index = index_with(&resolver);
        index.rebuild().await.unwrap();
        index.dispose();

        resolver.set("file:///w/a/manifest.json", &manifest("a", &["svc.B"]));
        index.mark_dirty("file:///w/a/manifest.json");

        index.assert_clean("file:///w/a/manifest.json").await.unwrap();

        assert!(!index.is_dirty("file:///w/a/manifest.json"));
        assert_eq!(index.find_bundle_ids_by_service_name("svc.B").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn bundle_stays_dirty_while_reconciliation_is_in_flight() {
        let inner = Arc::new(StaticResolver::new());
        inner.insert("file:///w/a/manifest.json", &manifest("a-old", &["svc.old"]));
        let index = BundleIndex::new(
            Arc::new(SlowResolver {
                inner: Arc::clone(&inner),
                delay: Duration::from_millis(500),
            }),
            BundleIndexConfig::default(),
        );
        index.rebuild().await.unwrap();

        inner.set("file:///w/a/manifest.json", &manifest("a-new", &["svc.new"]));
        index.mark_dirty("file:///w/a/manifest.json");

        // Let the background run park inside the slow resolve. The bundle
        // must read as dirty for the whole window, and reads must keep
        // serving the pre-edit document.
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(index.is_dirty("file:///w/a/manifest.json"));
        assert_eq!(index.dirty_count(), 1);
        let doc = index.find_bundle_by_id("file:///w/a/manifest.json").unwrap();
        assert_eq!(doc.name(), "a-old");

        index.assert_clean("file:///w/a/manifest.json").await.unwrap();

        assert!(!index.is_dirty("file:///w/a/manifest.json"));
        let doc = index.find_bundle_by_id("file:///w/a/manifest.json").unwrap();
        assert_eq!(doc.name(), "a-new");
        assert!(index.find_bundle_ids_by_service_name("svc.old").is_empty());
        assert_eq!(index.find_bundle_ids_by_service_name("svc.new").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn assert_clean_on_a_clean_bundle_is_immediate() {
        let resolver = Arc::new(StaticResolver::new());
        resolver.insert("file:///w/a/manifest.json", &manifest("a", &[]));
        let index = index_with(&resolver);
        index.rebuild().await.unwrap();

        index.assert_clean("file:///w/a/manifest.json").await.unwrap();
        index.assert_clean("file:///w/never-seen").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reparse_keeps_the_previous_document() {
        let resolver = Arc::new(StaticResolver::new());
        resolver.insert("file:///w/a/manifest.json", &manifest("a", &["svc.A"]));
        let index = index_with(&resolver);
        index.rebuild().await.unwrap();

        resolver.set("file:///w/a/manifest.json", "{\"name\": ");
        index.mark_dirty("file:///w/a/manifest.json");
        let _ = index.assert_clean("file:///w/a/manifest.json").await;

        // Dirty flag drained, old parse still served.
        assert!(!index.is_dirty("file:///w/a/manifest.json"));
        let doc = index.find_bundle_by_id("file:///w/a/manifest.json").unwrap();
        assert_eq!(doc.name(), "a");
        assert_eq!(index.find_bundle_ids_by_service_name("svc.A").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rebuild_emits_lifecycle_events() {
        let resolver = Arc::new(StaticResolver::new());
        resolver.insert("file:///w/a/manifest.json", &manifest("a", &[]));
        resolver.insert("file:///w/b/manifest.json", &manifest("b", &[]));
        let index = index_with(&resolver);

        let indexed = Arc::new(AtomicUsize::new(0));
        let invalidated = Arc::new(AtomicUsize::new(0));
        let rebuilt_count = Arc::new(AtomicUsize::new(0));

        let n = Arc::clone(&indexed);
        index.events().on_manifest_indexed(move |_| {
            n.fetch_add(1, Ordering::SeqCst);
        });
        let n = Arc::clone(&invalidated);
        index.events().on_index_invalidated_all(move || {
            n.fetch_add(1, Ordering::SeqCst);
        });
        let n = Arc::clone(&rebuilt_count);
        index
            .events()
            .on_index_rebuilt(move |count| n.store(count, Ordering::SeqCst));

        index.rebuild().await.unwrap();

        assert_eq!(indexed.load(Ordering::SeqCst), 2);
        assert_eq!(invalidated.load(Ordering::SeqCst), 1);
        assert_eq!(rebuilt_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn short_path_keeps_the_trailing_segments() {
        assert_eq!(
            short_path("file:///workspace/bundles/a/manifest.json"),
            "a/manifest.json"
        );
        assert_eq!(short_path("file:///manifest.json"), "/manifest.json");
    }
}
