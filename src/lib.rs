mod data;
pub mod engine;
pub mod fuzzy;
pub mod group;
pub mod highlight;
pub mod ingest;
pub mod record;
pub mod sample;
pub mod schedule;
pub mod store;

pub use data::{
    CellValue, DEFAULT_FUZZY_THRESHOLD, DEFAULT_MAX_RESULTS, SearchSettings, SettingsPatch, Sheet,
    SheetFilter, SheetSource, now_ms,
};
pub use engine::{LiveSearch, SearchEngine, SearchState};
pub use group::{ResultGroup, SheetRef, group_results};
pub use highlight::{Span, annotate, field_matches, matching_fields};
pub use ingest::{BatchReport, JsonTableDecoder, LoadError, TableDecoder, ingest_files};
pub use record::{RowData, SearchableRecord, flatten_sheet};
pub use store::{AppStore, SavedSearch, SearchHistoryEntry, StoreError, StoreSummary};

use fuzzy::{FuzzyMatcher, field_norm, ranked_distance};
use rayon::prelude::*;
use serde::Serialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum IndexError {
    InvalidThreshold(f64),
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexError::InvalidThreshold(value) => {
                write!(f, "fuzzy threshold must lie in [0, 1], got {value}")
            }
        }
    }
}

impl std::error::Error for IndexError {}

/// One ranked hit, ready for presentation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: String,
    pub spreadsheet_id: String,
    pub spreadsheet_name: String,
    pub spreadsheet_source: SheetSource,
    pub row_index: usize,
    pub data: RowData,
    pub tags: Vec<String>,
    pub metadata: Map<String, Value>,
    /// Similarity in [0, 1]; 1.0 is a perfect match.
    pub score: f64,
}

impl SearchResult {
    pub fn match_percent(&self) -> u32 {
        (self.score * 100.0).round() as u32
    }

    /// 1-based row number as shown to users.
    pub fn display_row(&self) -> usize {
        self.row_index + 1
    }
}

struct IndexedRecord {
    record: SearchableRecord,
    text: Vec<char>,
    norm: f64,
}

/// Immutable fuzzy index over every row of a sheet collection.
pub struct SheetIndex {
    records: Vec<IndexedRecord>,
    threshold: f64,
}

impl SheetIndex {
    pub(crate) fn empty() -> Self {
        Self {
            records: Vec::new(),
            threshold: DEFAULT_FUZZY_THRESHOLD,
        }
    }

    /// Flattens `sheets` in order and prepares each record for matching.
    pub fn build(sheets: &[Sheet], settings: &SearchSettings) -> Result<Self, IndexError> {
        let threshold = settings.fuzzy_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(IndexError::InvalidThreshold(threshold));
        }
        let started = Instant::now();
        let records: Vec<IndexedRecord> = sheets
            .par_iter()
            .flat_map_iter(|sheet| flatten_sheet(sheet, settings))
            .map(|record| {
                let lowered = record.searchable_text.to_lowercase();
                let norm = field_norm(&lowered);
                IndexedRecord {
                    text: lowered.chars().collect(),
                    norm,
                    record,
                }
            })
            .collect();
        debug!(
            sheets = sheets.len(),
            records = records.len(),
            threshold,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "built sheet index"
        );
        Ok(Self { records, threshold })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &SearchableRecord> {
        self.records.iter().map(|indexed| &indexed.record)
    }

    /// Ranks every record against `query`, then applies `filter` and keeps
    /// the first `max_results` hits. Blank queries return nothing.
    pub fn search(&self, query: &str, filter: &SheetFilter, max_results: usize) -> Vec<SearchResult> {
        if query.trim().is_empty() {
            return Vec::new();
        }
        let matcher = FuzzyMatcher::new(query, self.threshold);
        let mut hits: Vec<(usize, f64)> = self
            .records
            .par_iter()
            .enumerate()
            .filter_map(|(position, indexed)| {
                matcher
                    .score(&indexed.text)
                    .map(|hit| (position, ranked_distance(hit.distance, indexed.norm)))
            })
            .collect();
        hits.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        hits.into_iter()
            .filter(|(position, _)| filter.admits(&self.records[*position].record.spreadsheet_id))
            .take(max_results)
            .map(|(position, distance)| to_result(&self.records[position].record, distance))
            .collect()
    }
}

fn to_result(record: &SearchableRecord, distance: f64) -> SearchResult {
    SearchResult {
        id: record.id.clone(),
        spreadsheet_id: record.spreadsheet_id.clone(),
        spreadsheet_name: record.spreadsheet_name.clone(),
        spreadsheet_source: record.spreadsheet_source,
        row_index: record.row_index,
        data: record.data.clone(),
        tags: record.tags.clone(),
        metadata: record.metadata.clone(),
        score: 1.0 - distance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events_sheet() -> Sheet {
        Sheet::new(
            "events",
            "Events",
            vec!["Title".into(), "Year".into()],
            vec![
                vec!["Adobe Summit".into(), "2024".into()],
                vec!["Photoshop Demo".into(), "2024".into()],
            ],
            SheetSource::Upload,
        )
    }

    fn settings(threshold: f64) -> SearchSettings {
        SearchSettings {
            fuzzy_threshold: threshold,
            ..SearchSettings::default()
        }
    }

    #[test]
    fn exact_query_finds_single_row() {
        let index = SheetIndex::build(&[events_sheet()], &settings(0.4)).unwrap();
        let results = index.search("adobe", &SheetFilter::All, 100);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].data.get("Title"), Some(&CellValue::from("Adobe Summit")));
        assert!(results[0].score > 0.99);
    }

    #[test]
    fn typo_scores_below_exact() {
        let index = SheetIndex::build(&[events_sheet()], &settings(0.4)).unwrap();
        let results = index.search("adobee", &SheetFilter::All, 100);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "events-0");
        assert!(results[0].score < 1.0 && results[0].score > 0.0);

        let strict = SheetIndex::build(&[events_sheet()], &settings(0.0)).unwrap();
        assert!(strict.search("adobee", &SheetFilter::All, 100).is_empty());
    }

    #[test]
    fn blank_query_returns_nothing() {
        let index = SheetIndex::build(&[events_sheet()], &settings(1.0)).unwrap();
        assert!(index.search("   ", &SheetFilter::All, 100).is_empty());
    }

    #[test]
    fn invalid_threshold_fails_build() {
        let err = SheetIndex::build(&[events_sheet()], &settings(f64::NAN)).err();
        assert!(matches!(err, Some(IndexError::InvalidThreshold(_))));
        assert!(SheetIndex::build(&[], &settings(1.5)).is_err());
    }

    #[test]
    fn results_are_ordered_by_score() {
        let sheets = sample::sample_sheets();
        let index = SheetIndex::build(&sheets, &settings(0.6)).unwrap();
        let results = index.search("photoshop", &SheetFilter::All, 1000);
        assert!(results.len() > 1);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn filter_applies_after_ranking() {
        let mut second = events_sheet();
        second.id = "archive".into();
        second.name = "Archive".into();
        let sheets = vec![events_sheet(), second];
        let index = SheetIndex::build(&sheets, &settings(1.0)).unwrap();

        let all = index.search("demo", &SheetFilter::All, 1000);
        let filter = SheetFilter::Sheet("archive".into());
        let expected: Vec<_> = all
            .iter()
            .filter(|result| result.spreadsheet_id == "archive")
            .take(1)
            .map(|result| result.id.clone())
            .collect();
        let filtered: Vec<_> = index
            .search("demo", &filter, 1)
            .into_iter()
            .map(|result| result.id)
            .collect();
        assert_eq!(filtered, expected);
        assert_eq!(filtered, vec!["archive-1".to_string()]);
    }

    #[test]
    fn ties_keep_record_order() {
        let sheet = Sheet::new(
            "t",
            "Ties",
            vec!["Name".into()],
            vec![vec!["alpha".into()], vec!["alpha".into()], vec!["alpha".into()]],
            SheetSource::Upload,
        );
        let index = SheetIndex::build(&[sheet], &settings(0.4)).unwrap();
        let ids: Vec<_> = index
            .search("alpha", &SheetFilter::All, 10)
            .into_iter()
            .map(|result| result.id)
            .collect();
        assert_eq!(ids, vec!["t-0", "t-1", "t-2"]);
    }

    #[test]
    fn tags_are_searchable_only_when_enabled() {
        let mut sheet = events_sheet();
        sheet.tags.insert(1, vec!["keynote".into()]);
        let on = SheetIndex::build(std::slice::from_ref(&sheet), &settings(0.0)).unwrap();
        assert_eq!(on.search("keynote", &SheetFilter::All, 10).len(), 1);

        let off_settings = SearchSettings {
            search_in_tags: false,
            ..settings(0.0)
        };
        let off = SheetIndex::build(&[sheet], &off_settings).unwrap();
        assert!(off.search("keynote", &SheetFilter::All, 10).is_empty());
    }

    #[test]
    fn truncates_to_max_results() {
        let sheets = sample::sample_sheets();
        let index = SheetIndex::build(&sheets, &settings(0.4)).unwrap();
        assert_eq!(index.search("2024", &SheetFilter::All, 3).len(), 3);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn cell_strategy() -> impl Strategy<Value = String> {
            "[a-e]{1,5}( [a-e]{1,4})?"
        }

        fn sheets_strategy() -> impl Strategy<Value = Vec<Sheet>> {
            let rows = prop::collection::vec(prop::collection::vec(cell_strategy(), 1..4), 0..8);
            prop::collection::vec(rows, 1..4).prop_map(|tables| {
                tables
                    .into_iter()
                    .enumerate()
                    .map(|(position, rows)| {
                        let data = rows
                            .into_iter()
                            .map(|row| row.into_iter().map(CellValue::from).collect())
                            .collect();
                        Sheet::new(
                            format!("s{position}"),
                            format!("Sheet {position}"),
                            vec!["A".into(), "B".into()],
                            data,
                            SheetSource::Upload,
                        )
                    })
                    .collect()
            })
        }

        fn ids(results: &[SearchResult]) -> Vec<String> {
            results.iter().map(|result| result.id.clone()).collect()
        }

        proptest! {
            #[test]
            fn scores_never_increase(
                sheets in sheets_strategy(),
                query in "[a-e]{1,4}",
                threshold in 0.0f64..=1.0,
                max_results in 1usize..30,
            ) {
                let index = SheetIndex::build(&sheets, &settings(threshold)).unwrap();
                let results = index.search(&query, &SheetFilter::All, max_results);
                prop_assert!(results.len() <= max_results);
                for pair in results.windows(2) {
                    prop_assert!(pair[0].score >= pair[1].score);
                }
                for result in &results {
                    prop_assert!((0.0..=1.0).contains(&result.score));
                }
            }

            #[test]
            fn sheet_filter_matches_filtered_global_ranking(
                sheets in sheets_strategy(),
                query in "[a-e]{1,4}",
                threshold in 0.0f64..=1.0,
                max_results in 1usize..10,
                pick in 0usize..4,
            ) {
                let id = format!("s{}", pick % sheets.len());
                let index = SheetIndex::build(&sheets, &settings(threshold)).unwrap();
                let everything = index.search(&query, &SheetFilter::All, usize::MAX);
                let expected: Vec<String> = everything
                    .iter()
                    .filter(|result| result.spreadsheet_id == id)
                    .take(max_results)
                    .map(|result| result.id.clone())
                    .collect();
                let filtered = index.search(&query, &SheetFilter::Sheet(id), max_results);
                prop_assert_eq!(ids(&filtered), expected);
            }

            #[test]
            fn rebuilding_yields_identical_text(
                sheets in sheets_strategy(),
                threshold in 0.0f64..=1.0,
            ) {
                let first = SheetIndex::build(&sheets, &settings(threshold)).unwrap();
                let second = SheetIndex::build(&sheets, &settings(threshold)).unwrap();
                let texts = |index: &SheetIndex| -> Vec<(String, String)> {
                    index
                        .records()
                        .map(|record| (record.id.clone(), record.searchable_text.clone()))
                        .collect()
                };
                prop_assert_eq!(texts(&first), texts(&second));
                prop_assert_eq!(
                    first.len(),
                    sheets.iter().map(|sheet| sheet.data.len()).sum::<usize>()
                );
            }
        }
    }
}
