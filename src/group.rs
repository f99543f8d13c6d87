use crate::SearchResult;
use crate::data::{Sheet, SheetSource};
use serde::Serialize;
use std::collections::HashMap;

pub const UNKNOWN_SHEET_NAME: &str = "Unknown Spreadsheet";

/// Display metadata for the sheet a group of results came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetRef {
    pub name: String,
    pub source: Option<SheetSource>,
    pub original_url: Option<String>,
}

impl SheetRef {
    fn resolve(sheet_id: &str, sheets: &[Sheet]) -> Self {
        match sheets.iter().find(|sheet| sheet.id == sheet_id) {
            Some(sheet) => Self {
                name: sheet.name.clone(),
                source: Some(sheet.source),
                original_url: sheet.original_url().map(str::to_string),
            },
            None => Self {
                name: UNKNOWN_SHEET_NAME.to_string(),
                source: None,
                original_url: None,
            },
        }
    }

    pub fn is_known(&self) -> bool {
        self.source.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultGroup<'a> {
    pub spreadsheet_id: &'a str,
    pub sheet: SheetRef,
    pub results: Vec<&'a SearchResult>,
}

/// Groups ranked results by sheet. Groups are ordered by their best hit and
/// keep rank order inside; sheets missing from `sheets` resolve to
/// "Unknown Spreadsheet".
pub fn group_results<'a>(results: &'a [SearchResult], sheets: &[Sheet]) -> Vec<ResultGroup<'a>> {
    let mut groups: Vec<ResultGroup<'a>> = Vec::new();
    let mut positions: HashMap<&'a str, usize> = HashMap::new();
    for result in results {
        let key = result.spreadsheet_id.as_str();
        let slot = *positions.entry(key).or_insert_with(|| {
            groups.push(ResultGroup {
                spreadsheet_id: key,
                sheet: SheetRef::resolve(key, sheets),
                results: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].results.push(result);
    }
    groups
}
