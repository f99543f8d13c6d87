use crate::data::{CellValue, SearchSettings, Sheet, SheetSource};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Header → cell mapping in column order. Inserting an existing header
/// overwrites its value but keeps its original position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowData {
    fields: Vec<(String, CellValue)>,
}

impl RowData {
    pub fn insert(&mut self, header: String, value: CellValue) {
        match self.fields.iter_mut().find(|(key, _)| *key == header) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((header, value)),
        }
    }

    pub fn get(&self, header: &str) -> Option<&CellValue> {
        self.fields
            .iter()
            .find(|(key, _)| key == header)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.fields.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn values(&self) -> impl Iterator<Item = &CellValue> {
        self.fields.iter().map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for RowData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Query-ready view of one data row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchableRecord {
    pub id: String,
    pub spreadsheet_id: String,
    pub spreadsheet_name: String,
    pub spreadsheet_source: SheetSource,
    pub row_index: usize,
    pub data: RowData,
    pub tags: Vec<String>,
    pub metadata: Map<String, Value>,
    pub searchable_text: String,
}

/// Flattens every data row of `sheet` into a record, in row order.
pub fn flatten_sheet(sheet: &Sheet, settings: &SearchSettings) -> Vec<SearchableRecord> {
    sheet
        .data
        .iter()
        .enumerate()
        .map(|(row_index, row)| flatten_row(sheet, row_index, row, settings))
        .collect()
}

fn flatten_row(
    sheet: &Sheet,
    row_index: usize,
    row: &[CellValue],
    settings: &SearchSettings,
) -> SearchableRecord {
    let mut data = RowData::default();
    let columns = sheet.headers.len().max(row.len());
    for column in 0..columns {
        let value = row.get(column).cloned().unwrap_or_default();
        data.insert(column_label(&sheet.headers, column), value);
    }

    let tags = sheet.row_tags(row_index).to_vec();
    let metadata = sheet.row_metadata(row_index).cloned().unwrap_or_default();

    let mut parts: Vec<String> = data.values().map(CellValue::to_string).collect();
    if settings.search_in_tags {
        parts.extend(tags.iter().cloned());
    }
    if settings.search_in_metadata {
        parts.extend(metadata.values().filter_map(stringify_metadata));
    }

    SearchableRecord {
        id: format!("{}-{}", sheet.id, row_index),
        spreadsheet_id: sheet.id.clone(),
        spreadsheet_name: sheet.name.clone(),
        spreadsheet_source: sheet.source,
        row_index,
        data,
        tags,
        metadata,
        searchable_text: parts.join(" "),
    }
}

/// Header for `column`, or a generated "Column N" when blank or missing.
pub fn column_label(headers: &[String], column: usize) -> String {
    match headers.get(column) {
        Some(header) if !header.trim().is_empty() => header.clone(),
        _ => format!("Column {}", column + 1),
    }
}

fn stringify_metadata(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        other => Some(other.to_string()),
    }
}
