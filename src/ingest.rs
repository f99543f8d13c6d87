//! Turning uploaded files into sheets.
//!
//! Decoding is behind [`TableDecoder`]; this module only applies the naming
//! rules and keeps per-file outcomes so one bad file never sinks a batch.

use crate::data::{CellValue, Sheet, SheetSource, now_ms};
use crate::store::generate_id;
use serde_json::{Map, Value, json};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug)]
pub enum LoadError {
    UnsupportedFormat(String),
    Empty,
    Malformed(String),
    Io(std::io::Error),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::UnsupportedFormat(ext) if ext.is_empty() => {
                f.write_str("file has no extension")
            }
            LoadError::UnsupportedFormat(ext) => write!(f, "unsupported file type .{ext}"),
            LoadError::Empty => f.write_str("file appears to be empty or contains no valid worksheets"),
            LoadError::Malformed(reason) => write!(f, "malformed table: {reason}"),
            LoadError::Io(err) => write!(f, "failed to read file: {err}"),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<std::io::Error> for LoadError {
    fn from(value: std::io::Error) -> Self {
        LoadError::Io(value)
    }
}

impl From<serde_json::Error> for LoadError {
    fn from(value: serde_json::Error) -> Self {
        LoadError::Malformed(value.to_string())
    }
}

/// One table produced by a decoder. The first row holds the headers.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTable {
    /// Worksheet name when the format has named tabs.
    pub worksheet: Option<String>,
    pub rows: Vec<Vec<CellValue>>,
}

pub trait TableDecoder {
    fn supports(&self, extension: &str) -> bool;

    fn decode(&self, bytes: &[u8], extension: &str) -> Result<Vec<DecodedTable>, LoadError>;
}

/// Reads `.json` tables: either an array of rows, or an object mapping each
/// worksheet name to its array of rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTableDecoder;

impl TableDecoder for JsonTableDecoder {
    fn supports(&self, extension: &str) -> bool {
        extension.eq_ignore_ascii_case("json")
    }

    fn decode(&self, bytes: &[u8], extension: &str) -> Result<Vec<DecodedTable>, LoadError> {
        if !self.supports(extension) {
            return Err(LoadError::UnsupportedFormat(extension.to_string()));
        }
        match serde_json::from_slice::<Value>(bytes)? {
            Value::Array(rows) => Ok(vec![DecodedTable {
                worksheet: None,
                rows: json_rows(rows)?,
            }]),
            Value::Object(worksheets) => worksheets
                .into_iter()
                .map(|(name, rows)| match rows {
                    Value::Array(rows) => Ok(DecodedTable {
                        worksheet: Some(name),
                        rows: json_rows(rows)?,
                    }),
                    _ => Err(LoadError::Malformed(format!("worksheet {name:?} is not an array of rows"))),
                })
                .collect(),
            _ => Err(LoadError::Malformed(
                "expected an array of rows or an object of worksheets".to_string(),
            )),
        }
    }
}

fn json_rows(rows: Vec<Value>) -> Result<Vec<Vec<CellValue>>, LoadError> {
    rows.into_iter()
        .enumerate()
        .map(|(index, row)| match row {
            Value::Array(cells) => Ok(cells.into_iter().map(CellValue::from).collect()),
            _ => Err(LoadError::Malformed(format!("row {index} is not an array"))),
        })
        .collect()
}

/// A file handed to [`ingest_files`].
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// File name without its final extension.
    pub fn stem(&self) -> &str {
        match self.name.rfind('.') {
            Some(dot) if dot > 0 => &self.name[..dot],
            _ => &self.name,
        }
    }

    pub fn extension(&self) -> &str {
        match self.name.rfind('.') {
            Some(dot) if dot > 0 => &self.name[dot + 1..],
            _ => "",
        }
    }
}

#[derive(Debug)]
pub struct LoadOutcome {
    pub file: String,
    /// Names of the sheets created from the file, or why it was skipped.
    pub result: Result<Vec<String>, LoadError>,
}

impl LoadOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub sheets: Vec<Sheet>,
    pub outcomes: Vec<LoadOutcome>,
}

impl BatchReport {
    pub fn failures(&self) -> impl Iterator<Item = &LoadOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.is_ok())
    }

    fn record(&mut self, file: &str, result: Result<Vec<Sheet>, LoadError>) {
        let result = match result {
            Ok(sheets) => {
                let names = sheets.iter().map(|sheet| sheet.name.clone()).collect();
                info!(file, sheets = sheets.len(), "loaded file");
                self.sheets.extend(sheets);
                Ok(names)
            }
            Err(err) => {
                warn!(file, error = %err, "skipped file");
                Err(err)
            }
        };
        self.outcomes.push(LoadOutcome {
            file: file.to_string(),
            result,
        });
    }
}

/// Decodes every file independently. Outcomes follow input order.
pub fn ingest_files<D>(decoder: &D, files: &[SourceFile], source: SheetSource) -> BatchReport
where
    D: TableDecoder + ?Sized,
{
    let mut report = BatchReport::default();
    for file in files {
        report.record(&file.name, sheets_from_file(decoder, file, source));
    }
    report
}

/// Like [`ingest_files`], reading each path from disk first. Unreadable
/// paths are reported as [`LoadError::Io`].
pub fn ingest_paths<D>(decoder: &D, paths: &[PathBuf], source: SheetSource) -> BatchReport
where
    D: TableDecoder + ?Sized,
{
    let mut report = BatchReport::default();
    for path in paths {
        let label = display_name(path);
        let result = fs::read(path)
            .map_err(LoadError::from)
            .and_then(|bytes| sheets_from_file(decoder, &SourceFile::new(label.clone(), bytes), source));
        report.record(&label, result);
    }
    report
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn sheets_from_file<D>(decoder: &D, file: &SourceFile, source: SheetSource) -> Result<Vec<Sheet>, LoadError>
where
    D: TableDecoder + ?Sized,
{
    let extension = file.extension();
    if !decoder.supports(extension) {
        return Err(LoadError::UnsupportedFormat(extension.to_string()));
    }
    let tables = decoder.decode(&file.bytes, extension)?;
    let batch = now_ms();
    let sheets: Vec<Sheet> = tables
        .into_iter()
        .enumerate()
        .filter(|(_, table)| !table.rows.is_empty())
        .map(|(index, table)| build_sheet(file, table, index, batch, source))
        .collect();
    if sheets.is_empty() {
        return Err(LoadError::Empty);
    }
    Ok(sheets)
}

fn build_sheet(
    file: &SourceFile,
    table: DecodedTable,
    index: usize,
    batch: u64,
    source: SheetSource,
) -> Sheet {
    let mut rows = table.rows.into_iter();
    let headers = rows
        .next()
        .unwrap_or_default()
        .iter()
        .map(CellValue::to_string)
        .collect();
    let data = rows.collect();
    let id = format!("sheet_{batch}_{index}_{}", generate_id());

    let (name, metadata) = match table.worksheet {
        Some(worksheet) => {
            let mut metadata = Map::new();
            metadata.insert("worksheetName".into(), json!(worksheet));
            metadata.insert("worksheetIndex".into(), json!(index));
            metadata.insert("originalFileName".into(), json!(file.name));
            (format!("{} - {worksheet}", file.stem()), metadata)
        }
        None => (file.stem().to_string(), Map::new()),
    };

    let mut sheet = Sheet::new(id, name, headers, data, source);
    sheet.filename = Some(file.name.clone());
    sheet.metadata = metadata;
    sheet
}
