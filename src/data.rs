use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.4;
pub const DEFAULT_MAX_RESULTS: usize = 1000;

/// A single spreadsheet cell as delivered by a decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Bool(bool),
    #[default]
    Empty,
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(text) => text.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(text) => f.write_str(text),
            CellValue::Number(value) => write!(f, "{value}"),
            CellValue::Bool(value) => write!(f, "{value}"),
            CellValue::Empty => Ok(()),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<Value> for CellValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => CellValue::Empty,
            Value::Bool(flag) => CellValue::Bool(flag),
            Value::Number(number) => number
                .as_f64()
                .map(CellValue::Number)
                .unwrap_or_else(|| CellValue::Text(number.to_string())),
            Value::String(text) => CellValue::Text(text),
            other => CellValue::Text(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SheetSource {
    #[default]
    #[serde(rename = "upload")]
    Upload,
    #[serde(rename = "sharepoint")]
    SharePoint,
    #[serde(rename = "onedrive")]
    OneDrive,
    #[serde(rename = "google-sheets")]
    GoogleSheets,
    #[serde(rename = "sharepoint-direct")]
    SharePointDirect,
}

impl SheetSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SheetSource::Upload => "upload",
            SheetSource::SharePoint => "sharepoint",
            SheetSource::OneDrive => "onedrive",
            SheetSource::GoogleSheets => "google-sheets",
            SheetSource::SharePointDirect => "sharepoint-direct",
        }
    }

    /// Human-readable label used on result cards.
    pub fn label(&self) -> &'static str {
        match self {
            SheetSource::Upload => "Upload",
            SheetSource::SharePoint => "SharePoint",
            SheetSource::OneDrive => "OneDrive",
            SheetSource::GoogleSheets => "Google Sheets",
            SheetSource::SharePointDirect => "SharePoint (Direct)",
        }
    }
}

impl fmt::Display for SheetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SheetSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "upload" => Ok(SheetSource::Upload),
            "sharepoint" => Ok(SheetSource::SharePoint),
            "onedrive" => Ok(SheetSource::OneDrive),
            "google-sheets" => Ok(SheetSource::GoogleSheets),
            "sharepoint-direct" => Ok(SheetSource::SharePointDirect),
            other => Err(format!(
                "unknown source {other:?}; expected upload, sharepoint, onedrive, google-sheets or sharepoint-direct"
            )),
        }
    }
}

/// One logical table: a worksheet tab or a CSV file.
///
/// `tags` and per-row entries of `metadata` are keyed by the 0-based row
/// position in `data`. `metadata` may also carry sheet-wide keys such as
/// `originalUrl`; only object values stored under a decimal row key count as
/// per-row metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sheet {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub data: Vec<Vec<CellValue>>,
    #[serde(default)]
    pub last_modified: u64,
    #[serde(default)]
    pub source: SheetSource,
    #[serde(default)]
    pub tags: BTreeMap<usize, Vec<String>>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Sheet {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        headers: Vec<String>,
        data: Vec<Vec<CellValue>>,
        source: SheetSource,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            filename: None,
            headers,
            data,
            last_modified: now_ms(),
            source,
            tags: BTreeMap::new(),
            metadata: Map::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.data.len()
    }

    pub fn tag_count(&self) -> usize {
        self.tags.values().map(Vec::len).sum()
    }

    pub fn row_tags(&self, row: usize) -> &[String] {
        self.tags.get(&row).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Per-row metadata, if the entry stored under `row` is an object.
    pub fn row_metadata(&self, row: usize) -> Option<&Map<String, Value>> {
        self.metadata
            .get(&row.to_string())
            .and_then(Value::as_object)
    }

    pub fn original_url(&self) -> Option<&str> {
        self.metadata.get("originalUrl").and_then(Value::as_str)
    }

    pub fn set_row_tags(&mut self, row: usize, tags: Vec<String>) {
        self.tags.insert(row, tags);
        self.touch();
    }

    pub fn set_row_metadata(&mut self, row: usize, metadata: Map<String, Value>) {
        self.metadata.insert(row.to_string(), Value::Object(metadata));
        self.touch();
    }

    /// Removes a data row and shifts the row-keyed tags and metadata of every
    /// later row down by one, so annotations stay with the rows they describe.
    pub fn remove_row(&mut self, row: usize) -> Option<Vec<CellValue>> {
        if row >= self.data.len() {
            return None;
        }
        let removed = self.data.remove(row);

        let tags = std::mem::take(&mut self.tags);
        self.tags = tags
            .into_iter()
            .filter(|(idx, _)| *idx != row)
            .map(|(idx, tags)| if idx > row { (idx - 1, tags) } else { (idx, tags) })
            .collect();

        let metadata = std::mem::take(&mut self.metadata);
        let mut shifted = Map::new();
        for (key, value) in metadata {
            match key.parse::<usize>() {
                Ok(idx) if value.is_object() => {
                    if idx == row {
                        continue;
                    }
                    let idx = if idx > row { idx - 1 } else { idx };
                    shifted.insert(idx.to_string(), value);
                }
                _ => {
                    shifted.insert(key, value);
                }
            }
        }
        self.metadata = shifted;
        self.touch();
        Some(removed)
    }

    fn touch(&mut self) {
        self.last_modified = now_ms();
    }
}

/// Restricts a query to one sheet, or searches everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SheetFilter {
    #[default]
    All,
    Sheet(String),
}

impl SheetFilter {
    pub fn admits(&self, sheet_id: &str) -> bool {
        match self {
            SheetFilter::All => true,
            SheetFilter::Sheet(id) => id == sheet_id,
        }
    }
}

impl From<String> for SheetFilter {
    fn from(value: String) -> Self {
        if value == "all" {
            SheetFilter::All
        } else {
            SheetFilter::Sheet(value)
        }
    }
}

impl From<SheetFilter> for String {
    fn from(value: SheetFilter) -> Self {
        match value {
            SheetFilter::All => "all".to_string(),
            SheetFilter::Sheet(id) => id,
        }
    }
}

impl FromStr for SheetFilter {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(SheetFilter::from(s.to_string()))
    }
}

impl fmt::Display for SheetFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SheetFilter::All => f.write_str("all"),
            SheetFilter::Sheet(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchSettings {
    pub fuzzy_threshold: f64,
    pub search_in_tags: bool,
    pub search_in_metadata: bool,
    pub max_results: usize,
    pub highlight_results: bool,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            search_in_tags: true,
            search_in_metadata: true,
            max_results: DEFAULT_MAX_RESULTS,
            highlight_results: true,
        }
    }
}

impl SearchSettings {
    /// True when switching from `self` to `other` changes the indexed text or
    /// the match threshold.
    pub fn index_differs(&self, other: &SearchSettings) -> bool {
        self.fuzzy_threshold != other.fuzzy_threshold
            || self.search_in_tags != other.search_in_tags
            || self.search_in_metadata != other.search_in_metadata
    }

    pub fn apply(&mut self, patch: &SettingsPatch) {
        if let Some(threshold) = patch.fuzzy_threshold {
            if !threshold.is_nan() {
                self.fuzzy_threshold = threshold;
            }
        }
        if let Some(flag) = patch.search_in_tags {
            self.search_in_tags = flag;
        }
        if let Some(flag) = patch.search_in_metadata {
            self.search_in_metadata = flag;
        }
        if let Some(limit) = patch.max_results {
            self.max_results = limit;
        }
        if let Some(flag) = patch.highlight_results {
            self.highlight_results = flag;
        }
        *self = self.sanitized();
    }

    /// Clamps the threshold into [0, 1] and the result limit to at least one.
    /// A NaN threshold falls back to the default.
    pub fn sanitized(self) -> Self {
        let fuzzy_threshold = if self.fuzzy_threshold.is_nan() {
            DEFAULT_FUZZY_THRESHOLD
        } else {
            self.fuzzy_threshold.clamp(0.0, 1.0)
        };
        Self {
            fuzzy_threshold,
            max_results: self.max_results.max(1),
            ..self
        }
    }
}

/// Partial settings update; `None` fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub fuzzy_threshold: Option<f64>,
    pub search_in_tags: Option<bool>,
    pub search_in_metadata: Option<bool>,
    pub max_results: Option<usize>,
    pub highlight_results: Option<bool>,
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
