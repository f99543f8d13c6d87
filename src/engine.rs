use crate::data::{SearchSettings, SheetFilter};
use crate::schedule::{Debouncer, TaskHandle};
use crate::store::AppStore;
use crate::{IndexError, SearchResult, SheetIndex};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info};

const RESULT_CACHE_CAPACITY: usize = 64;
const NEVER_BUILT: u64 = u64::MAX;

type CacheKey = (u64, String, SheetFilter, usize);

/// Query front end over an [`AppStore`].
///
/// The index is rebuilt lazily on the first query after the store's sheets or
/// index settings change. Every non-blank query is appended to the store's
/// search history.
pub struct SearchEngine {
    store: AppStore,
    index: RwLock<Arc<SheetIndex>>,
    built_revision: AtomicU64,
    rebuild: Mutex<()>,
    cache: Mutex<LruCache<CacheKey, Arc<Vec<SearchResult>>>>,
}

impl SearchEngine {
    pub fn new(store: AppStore) -> Self {
        let capacity = NonZeroUsize::new(RESULT_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            index: RwLock::new(Arc::new(SheetIndex::empty())),
            built_revision: AtomicU64::new(NEVER_BUILT),
            rebuild: Mutex::new(()),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn store(&self) -> &AppStore {
        &self.store
    }

    /// Runs `query` with the stored settings.
    pub fn search(&self, query: &str, filter: &SheetFilter) -> Arc<Vec<SearchResult>> {
        let settings = self.store.settings();
        self.search_with(query, filter, &settings)
    }

    /// Runs `query` with `settings` in place of the stored ones, without
    /// persisting them. Blank queries return nothing and leave no history.
    pub fn search_with(
        &self,
        query: &str,
        filter: &SheetFilter,
        settings: &SearchSettings,
    ) -> Arc<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Arc::new(Vec::new());
        }
        let started = Instant::now();
        let results = match self.lookup(query, filter, settings) {
            Ok(results) => results,
            Err(err) => {
                error!(error = %err, query, "search index unavailable");
                Arc::new(Vec::new())
            }
        };
        debug!(
            query,
            filter = %filter,
            hits = results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "executed search"
        );
        self.store.record_search(query, results.len());
        results
    }

    /// The index for the store's current revision, rebuilding it if stale.
    pub fn current_index(&self) -> Result<Arc<SheetIndex>, IndexError> {
        self.current().map(|(_, index)| index)
    }

    fn lookup(
        &self,
        query: &str,
        filter: &SheetFilter,
        settings: &SearchSettings,
    ) -> Result<Arc<Vec<SearchResult>>, IndexError> {
        if settings.index_differs(&self.store.settings()) {
            let index = self
                .store
                .read_sheets(|sheets| SheetIndex::build(sheets, settings))?;
            return Ok(Arc::new(index.search(query, filter, settings.max_results)));
        }

        let (revision, index) = self.current()?;
        let key = (revision, query.to_string(), filter.clone(), settings.max_results);
        if let Some(cached) = self.cache.lock().get(&key) {
            return Ok(Arc::clone(cached));
        }
        let results = Arc::new(index.search(query, filter, settings.max_results));
        self.cache.lock().put(key, Arc::clone(&results));
        Ok(results)
    }

    fn current(&self) -> Result<(u64, Arc<SheetIndex>), IndexError> {
        if let Some(fresh) = self.fresh(self.store.revision()) {
            return Ok(fresh);
        }
        let _rebuilding = self.rebuild.lock();
        let revision = self.store.revision();
        if let Some(fresh) = self.fresh(revision) {
            return Ok(fresh);
        }

        let started = Instant::now();
        let settings = self.store.settings();
        let index = Arc::new(
            self.store
                .read_sheets(|sheets| SheetIndex::build(sheets, &settings))?,
        );
        *self.index.write() = Arc::clone(&index);
        self.built_revision.store(revision, Ordering::Release);
        self.cache.lock().clear();
        info!(
            revision,
            records = index.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rebuilt search index"
        );
        Ok((revision, index))
    }

    fn fresh(&self, revision: u64) -> Option<(u64, Arc<SheetIndex>)> {
        (self.built_revision.load(Ordering::Acquire) == revision)
            .then(|| (revision, Arc::clone(&self.index.read())))
    }
}

/// What a live search view renders.
#[derive(Debug, Clone, Default)]
pub struct SearchState {
    pub query: String,
    pub results: Arc<Vec<SearchResult>>,
    pub is_searching: bool,
}

/// Search-as-you-type driver: debounces queries, runs the lookup off the async
/// threads and publishes the outcome to subscribers.
pub struct LiveSearch {
    engine: Arc<SearchEngine>,
    debouncer: Debouncer,
    state: Arc<watch::Sender<SearchState>>,
    generation: Arc<AtomicU64>,
}

impl LiveSearch {
    pub fn new(engine: Arc<SearchEngine>) -> Self {
        Self::with_debouncer(engine, Debouncer::default())
    }

    pub fn with_debouncer(engine: Arc<SearchEngine>, debouncer: Debouncer) -> Self {
        let (state, _) = watch::channel(SearchState::default());
        Self {
            engine,
            debouncer,
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SearchState {
        self.state.borrow().clone()
    }

    /// Schedules `query` after the debounce window, superseding any query
    /// still waiting. A blank query clears the results immediately.
    /// Must be called from within a Tokio runtime.
    pub fn perform_search(&self, query: &str, filter: SheetFilter) -> Option<TaskHandle> {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if query.trim().is_empty() {
            self.debouncer.cancel();
            self.publish_empty(query);
            return None;
        }

        let query = query.to_string();
        let engine = Arc::clone(&self.engine);
        let state = Arc::clone(&self.state);
        let generation = Arc::clone(&self.generation);
        Some(self.debouncer.schedule(async move {
            state.send_modify(|current| current.is_searching = true);
            tokio::task::yield_now().await;

            let lookup = query.clone();
            let outcome =
                tokio::task::spawn_blocking(move || engine.search(&lookup, &filter)).await;
            if generation.load(Ordering::SeqCst) != ticket {
                return;
            }
            let results = outcome.unwrap_or_else(|err| {
                error!(error = %err, query = %query, "search task failed");
                Arc::new(Vec::new())
            });
            state.send_replace(SearchState {
                query,
                results,
                is_searching: false,
            });
        }))
    }

    /// Waits until any scheduled query has run and published.
    pub async fn settle(&self) {
        self.debouncer.finish().await;
    }

    pub fn is_pending(&self) -> bool {
        self.debouncer.is_pending()
    }

    /// Drops the current results and any query still waiting to run.
    pub fn clear_results(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.debouncer.cancel();
        self.publish_empty("");
    }

    fn publish_empty(&self, query: &str) {
        self.state.send_replace(SearchState {
            query: query.to_string(),
            results: Arc::new(Vec::new()),
            is_searching: false,
        });
    }
}
