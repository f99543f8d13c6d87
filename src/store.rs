use crate::data::{SearchSettings, SettingsPatch, Sheet, SheetFilter, now_ms};
use parking_lot::{Mutex, RwLock};
use rand::{Rng, distributions::Alphanumeric, thread_rng};
use rapidfuzz::distance::levenshtein;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

const MAX_HISTORY_ENTRIES: usize = 50;
const RECENT_SEARCH_COUNT: usize = 5;
const GENERATED_ID_LEN: usize = 16;

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(err) => write!(f, "io error: {err}"),
            StoreError::Json(err) => write!(f, "invalid state file: {err}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        StoreError::Io(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        StoreError::Json(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHistoryEntry {
    pub id: String,
    pub query: String,
    pub timestamp: u64,
    pub results_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedSearch {
    pub id: String,
    pub name: String,
    pub query: String,
    #[serde(default)]
    pub filter: SheetFilter,
    pub created_at: u64,
}

/// Dashboard counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSummary {
    pub sheets: usize,
    pub total_rows: usize,
    pub total_tags: usize,
    pub history_entries: usize,
    pub saved_searches: usize,
}

/// Shared application state: the loaded sheets, search history, saved
/// searches and settings. Cloning yields another handle to the same state.
#[derive(Clone)]
pub struct AppStore {
    shared: Arc<StoreShared>,
}

impl AppStore {
    /// A store that writes a JSON snapshot to `path` after every change.
    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        Self::with_parts(StoreData::default(), Some(path.into()))
    }

    pub fn ephemeral() -> Self {
        Self::with_parts(StoreData::default(), None)
    }

    /// Loads the snapshot at `path` if it exists, otherwise starts empty.
    /// Later changes are written back to the same path.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = if path.exists() {
            let bytes = fs::read(&path)?;
            let mut data: StoreData = serde_json::from_slice(&bytes)?;
            data.search_settings = data.search_settings.sanitized();
            debug!(
                path = %path.display(),
                sheets = data.spreadsheets.len(),
                history = data.search_history.len(),
                "loaded state snapshot"
            );
            data
        } else {
            StoreData::default()
        };
        Ok(Self::with_parts(data, Some(path)))
    }

    pub fn with_sheets(sheets: Vec<Sheet>) -> Self {
        let data = StoreData {
            spreadsheets: sheets,
            ..StoreData::default()
        };
        Self::with_parts(data, None)
    }

    fn with_parts(data: StoreData, path: Option<PathBuf>) -> Self {
        Self {
            shared: Arc::new(StoreShared {
                inner: RwLock::new(data),
                persistence: StorePersistence {
                    path,
                    flushing: Mutex::new(()),
                },
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.shared.persistence.path.as_deref()
    }

    /// Writes the snapshot now, surfacing any failure. No-op for ephemeral stores.
    pub fn save(&self) -> Result<(), StoreError> {
        let Some(path) = self.path() else {
            return Ok(());
        };
        let guard = self.shared.inner.read();
        let bytes = serde_json::to_vec_pretty(&*guard)?;
        let _flushing = self.shared.persistence.flushing.lock();
        drop(guard);
        write_snapshot(path, &bytes)
    }

    /// Increments whenever the sheets or index-affecting settings change.
    pub fn revision(&self) -> u64 {
        self.shared.inner.read().revision
    }

    /// Runs `f` over the current sheets without cloning them.
    pub fn read_sheets<R>(&self, f: impl FnOnce(&[Sheet]) -> R) -> R {
        let guard = self.shared.inner.read();
        f(&guard.spreadsheets)
    }

    pub fn sheets(&self) -> Vec<Sheet> {
        self.shared.inner.read().spreadsheets.clone()
    }

    pub fn sheet(&self, id: &str) -> Option<Sheet> {
        self.shared
            .inner
            .read()
            .spreadsheets
            .iter()
            .find(|sheet| sheet.id == id)
            .cloned()
    }

    pub fn add_sheet(&self, sheet: Sheet) {
        self.add_sheets(vec![sheet]);
    }

    pub fn add_sheets(&self, sheets: Vec<Sheet>) {
        if sheets.is_empty() {
            return;
        }
        self.mutate(|data| {
            data.spreadsheets.extend(sheets);
            data.revision += 1;
        });
    }

    pub fn remove_sheet(&self, id: &str) -> bool {
        self.mutate(|data| {
            let before = data.spreadsheets.len();
            data.spreadsheets.retain(|sheet| sheet.id != id);
            let removed = data.spreadsheets.len() != before;
            if removed {
                data.revision += 1;
            }
            removed
        })
    }

    pub fn update_row_tags(&self, sheet_id: &str, row: usize, tags: Vec<String>) -> bool {
        self.edit_sheet(sheet_id, |sheet| {
            sheet.set_row_tags(row, tags);
            true
        })
    }

    pub fn update_row_metadata(&self, sheet_id: &str, row: usize, metadata: Map<String, Value>) -> bool {
        self.edit_sheet(sheet_id, |sheet| {
            sheet.set_row_metadata(row, metadata);
            true
        })
    }

    /// Deletes a data row; later rows keep their tags and metadata.
    pub fn remove_row(&self, sheet_id: &str, row: usize) -> bool {
        self.edit_sheet(sheet_id, |sheet| sheet.remove_row(row).is_some())
    }

    pub fn settings(&self) -> SearchSettings {
        self.shared.inner.read().search_settings
    }

    pub fn update_settings(&self, patch: &SettingsPatch) -> SearchSettings {
        self.mutate(|data| {
            let before = data.search_settings;
            data.search_settings.apply(patch);
            if before.index_differs(&data.search_settings) {
                data.revision += 1;
            }
            data.search_settings
        })
    }

    /// Prepends a history entry, evicting the oldest beyond the cap.
    pub fn record_search(&self, query: &str, results_count: usize) -> SearchHistoryEntry {
        let entry = SearchHistoryEntry {
            id: generate_id(),
            query: query.to_string(),
            timestamp: now_ms(),
            results_count,
        };
        self.mutate(|data| {
            data.search_history.push_front(entry.clone());
            data.search_history.truncate(MAX_HISTORY_ENTRIES);
        });
        entry
    }

    /// Search history, most recent first.
    pub fn history(&self) -> Vec<SearchHistoryEntry> {
        self.shared.inner.read().search_history.iter().cloned().collect()
    }

    pub fn recent_searches(&self) -> Vec<SearchHistoryEntry> {
        self.shared
            .inner
            .read()
            .search_history
            .iter()
            .take(RECENT_SEARCH_COUNT)
            .cloned()
            .collect()
    }

    pub fn clear_history(&self) {
        self.mutate(|data| data.search_history.clear());
    }

    pub fn saved_searches(&self) -> Vec<SavedSearch> {
        self.shared.inner.read().saved_searches.clone()
    }

    pub fn save_search(&self, name: &str, query: &str, filter: SheetFilter) -> SavedSearch {
        let saved = SavedSearch {
            id: generate_id(),
            name: name.to_string(),
            query: query.to_string(),
            filter,
            created_at: now_ms(),
        };
        self.mutate(|data| data.saved_searches.push(saved.clone()));
        saved
    }

    pub fn remove_saved_search(&self, id: &str) -> bool {
        self.mutate(|data| {
            let before = data.saved_searches.len();
            data.saved_searches.retain(|search| search.id != id);
            data.saved_searches.len() != before
        })
    }

    pub fn summary(&self) -> StoreSummary {
        let guard = self.shared.inner.read();
        StoreSummary {
            sheets: guard.spreadsheets.len(),
            total_rows: guard.spreadsheets.iter().map(Sheet::row_count).sum(),
            total_tags: guard.spreadsheets.iter().map(Sheet::tag_count).sum(),
            history_entries: guard.search_history.len(),
            saved_searches: guard.saved_searches.len(),
        }
    }

    /// Resolves a sheet by exact id, then by case-insensitive name.
    pub fn resolve_sheet_id(&self, needle: &str) -> Option<String> {
        let guard = self.shared.inner.read();
        guard
            .spreadsheets
            .iter()
            .find(|sheet| sheet.id == needle)
            .or_else(|| {
                guard
                    .spreadsheets
                    .iter()
                    .find(|sheet| sheet.name.eq_ignore_ascii_case(needle))
            })
            .map(|sheet| sheet.id.clone())
    }

    /// Closest sheet name to `needle` by edit distance, for "did you mean" hints.
    pub fn suggest_sheet_name(&self, needle: &str) -> Option<String> {
        let needle = needle.to_lowercase();
        let budget = (needle.chars().count() / 3).max(2);
        let guard = self.shared.inner.read();
        guard
            .spreadsheets
            .iter()
            .map(|sheet| {
                let name = sheet.name.to_lowercase();
                (levenshtein::distance(needle.chars(), name.chars()), sheet)
            })
            .filter(|(distance, _)| *distance <= budget)
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, sheet)| sheet.name.clone())
    }

    fn edit_sheet(&self, sheet_id: &str, f: impl FnOnce(&mut Sheet) -> bool) -> bool {
        self.mutate(|data| {
            let Some(sheet) = data.spreadsheets.iter_mut().find(|sheet| sheet.id == sheet_id) else {
                return false;
            };
            let changed = f(sheet);
            if changed {
                data.revision += 1;
            }
            changed
        })
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut StoreData) -> R) -> R {
        let mut guard = self.shared.inner.write();
        let output = f(&mut *guard);
        let snapshot = if self.shared.persistence.path.is_some() {
            match serde_json::to_vec_pretty(&*guard) {
                Ok(bytes) => Some(bytes),
                Err(err) => {
                    warn!(error = %err, "failed to serialize state snapshot");
                    None
                }
            }
        } else {
            None
        };
        if let Some(snapshot) = snapshot {
            // Taken before the data lock is released so snapshots land in
            // the order they were serialized.
            let _flushing = self.shared.persistence.flushing.lock();
            drop(guard);
            self.shared.persistence.flush(&snapshot);
        }
        output
    }
}

struct StoreShared {
    inner: RwLock<StoreData>,
    persistence: StorePersistence,
}

#[derive(Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StoreData {
    spreadsheets: Vec<Sheet>,
    search_history: VecDeque<SearchHistoryEntry>,
    saved_searches: Vec<SavedSearch>,
    search_settings: SearchSettings,
    #[serde(skip)]
    revision: u64,
}

struct StorePersistence {
    path: Option<PathBuf>,
    flushing: Mutex<()>,
}

impl StorePersistence {
    fn flush(&self, snapshot: &[u8]) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(err) = write_snapshot(path, snapshot) {
            warn!(error = %err, path = %path.display(), "failed to write state snapshot");
        }
    }
}

fn write_snapshot(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let staging = path.with_extension("tmp");
    fs::write(&staging, bytes)?;
    fs::rename(&staging, path)?;
    Ok(())
}

pub fn generate_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_ID_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CellValue, SheetSource};
    use crate::{SearchEngine, SheetIndex};
    use tempfile::tempdir;

    fn sheet(id: &str, name: &str) -> Sheet {
        Sheet::new(
            id,
            name,
            vec!["Name".into()],
            vec![vec![CellValue::from("a")], vec![CellValue::from("b")]],
            SheetSource::Upload,
        )
    }

    #[test]
    fn history_is_capped_most_recent_first() {
        let store = AppStore::ephemeral();
        for i in 0..60 {
            store.record_search(&format!("query {i}"), i);
        }
        let history = store.history();
        assert_eq!(history.len(), 50);
        assert_eq!(history[0].query, "query 59");
        assert_eq!(history[49].query, "query 10");
        assert!(history.iter().all(|entry| entry.query != "query 9"));
        assert_eq!(store.recent_searches().len(), 5);
    }

    #[test]
    fn sheet_changes_bump_revision() {
        let store = AppStore::ephemeral();
        let start = store.revision();
        store.add_sheet(sheet("s1", "First"));
        assert!(store.revision() > start);

        let after_add = store.revision();
        assert!(!store.update_row_tags("missing", 0, vec!["x".into()]));
        assert_eq!(store.revision(), after_add);
        assert!(store.update_row_tags("s1", 1, vec!["x".into()]));
        assert!(store.revision() > after_add);
        assert_eq!(store.sheet("s1").unwrap().row_tags(1), ["x".to_string()]);
    }

    #[test]
    fn only_index_settings_bump_revision() {
        let store = AppStore::ephemeral();
        let start = store.revision();
        store.update_settings(&SettingsPatch {
            max_results: Some(25),
            highlight_results: Some(false),
            ..SettingsPatch::default()
        });
        assert_eq!(store.revision(), start);
        assert_eq!(store.settings().max_results, 25);

        store.update_settings(&SettingsPatch {
            fuzzy_threshold: Some(0.2),
            ..SettingsPatch::default()
        });
        assert!(store.revision() > start);
    }

    #[test]
    fn summary_counts_rows_tags_and_history() {
        let store = AppStore::with_sheets(vec![sheet("s1", "First"), sheet("s2", "Second")]);
        store.update_row_tags("s2", 0, vec!["a".into(), "b".into()]);
        store.record_search("a", 2);
        let summary = store.summary();
        assert_eq!(summary.sheets, 2);
        assert_eq!(summary.total_rows, 4);
        assert_eq!(summary.total_tags, 2);
        assert_eq!(summary.history_entries, 1);
    }

    #[test]
    fn resolves_and_suggests_sheet_names() {
        let store = AppStore::with_sheets(vec![sheet("v1", "Studio Videos"), sheet("b2", "Budget")]);
        assert_eq!(store.resolve_sheet_id("v1").as_deref(), Some("v1"));
        assert_eq!(store.resolve_sheet_id("budget").as_deref(), Some("b2"));
        assert!(store.resolve_sheet_id("nothing").is_none());
        assert_eq!(store.suggest_sheet_name("Studio Vidoes").as_deref(), Some("Studio Videos"));
        assert!(store.suggest_sheet_name("zzzzzzzz").is_none());
    }

    #[test]
    fn saved_searches_round_trip() {
        let store = AppStore::ephemeral();
        let saved = store.save_search("Adobe", "adobe", SheetFilter::Sheet("v1".into()));
        assert_eq!(store.saved_searches(), vec![saved.clone()]);
        assert!(store.remove_saved_search(&saved.id));
        assert!(store.saved_searches().is_empty());
    }

    #[test]
    fn persistent_store_reloads_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = AppStore::persistent(&path);
        store.add_sheet(sheet("s1", "First"));
        store.record_search("first", 1);
        store.update_settings(&SettingsPatch {
            fuzzy_threshold: Some(0.3),
            ..SettingsPatch::default()
        });

        let reopened = AppStore::load(&path).unwrap();
        assert_eq!(reopened.sheets(), store.sheets());
        assert_eq!(reopened.history()[0].query, "first");
        assert_eq!(reopened.settings().fuzzy_threshold, 0.3);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn open_rejects_corrupt_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{not json").unwrap();
        assert!(matches!(AppStore::load(&path), Err(StoreError::Json(_))));
    }

    #[test]
    fn loaded_settings_are_clamped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let snapshot = serde_json::json!({
            "spreadsheets": [{
                "id": "s1",
                "name": "Tools",
                "headers": ["Name"],
                "data": [["adobe"]],
                "source": "upload",
                "lastModified": 0
            }],
            "searchSettings": {"fuzzyThreshold": 1.5, "maxResults": 0}
        });
        fs::write(&path, serde_json::to_vec(&snapshot).unwrap()).unwrap();

        let store = AppStore::load(&path).unwrap();
        let settings = store.settings();
        assert_eq!(settings.fuzzy_threshold, 1.0);
        assert_eq!(settings.max_results, 1);
        assert!(store.read_sheets(|sheets| SheetIndex::build(sheets, &settings)).is_ok());

        let engine = SearchEngine::new(store);
        let results = engine.search("adobe", &SheetFilter::All);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].spreadsheet_id, "s1");
    }

    #[test]
    fn concurrent_mutations_leave_the_latest_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = AppStore::persistent(&path);
        std::thread::scope(|scope| {
            for worker in 0..8 {
                let store = store.clone();
                scope.spawn(move || {
                    for i in 0..10 {
                        store.add_sheet(sheet(&format!("w{worker}-{i}"), "Worker"));
                        store.record_search(&format!("w{worker} q{i}"), i);
                    }
                });
            }
        });

        let reopened = AppStore::load(&path).unwrap();
        assert_eq!(reopened.sheets().len(), 80);
        assert_eq!(reopened.sheets(), store.sheets());
        assert_eq!(reopened.history(), store.history());
        assert!(!path.with_extension("tmp").exists());
    }
}
