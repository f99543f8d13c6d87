//! Display-side match marking.
//!
//! Independent of the fuzzy engine: a span is highlighted only when a query
//! term occurs in it literally, ignoring case.
//! URLs are carved out first and are never highlighted internally.

use crate::data::CellValue;
use crate::record::RowData;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::Serialize;

const LINK_LABEL_MAX: usize = 50;
const LINK_LABEL_KEEP: usize = 47;

/// Number of matching fields a result card shows before summarizing.
pub const CARD_FIELD_LIMIT: usize = 4;

static URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)https?://[^\s<>"']+"#).expect("valid url pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Span {
    Text { text: String },
    Highlight { text: String },
    Link { url: String, label: String },
}

impl Span {
    fn text(text: &str) -> Self {
        Span::Text {
            text: text.to_string(),
        }
    }

    /// The characters this span contributes to the field as written.
    pub fn source_text(&self) -> &str {
        match self {
            Span::Text { text } | Span::Highlight { text } => text,
            Span::Link { url, .. } => url,
        }
    }
}

/// Splits `text` into plain, highlighted and link spans.
pub fn annotate(text: &str, query: &str, highlight: bool) -> Vec<Span> {
    let matchers = if highlight { term_matchers(query) } else { Vec::new() };
    let mut spans = Vec::new();
    let mut cursor = 0;
    for url in URL_PATTERN.find_iter(text) {
        if url.start() > cursor {
            push_highlighted(&mut spans, &text[cursor..url.start()], &matchers);
        }
        spans.push(Span::Link {
            url: url.as_str().to_string(),
            label: link_label(url.as_str()),
        });
        cursor = url.end();
    }
    if cursor < text.len() {
        push_highlighted(&mut spans, &text[cursor..], &matchers);
    }
    spans
}

/// Display label for a link; long URLs are shortened with an ellipsis.
pub fn link_label(url: &str) -> String {
    if url.chars().count() > LINK_LABEL_MAX {
        let kept: String = url.chars().take(LINK_LABEL_KEEP).collect();
        format!("{kept}...")
    } else {
        url.to_string()
    }
}

/// Coarse containment test used to decide which fields a card foregrounds.
pub fn field_matches(value: &str, query: &str) -> bool {
    let value = value.to_lowercase();
    query
        .split_whitespace()
        .any(|term| value.contains(&term.to_lowercase()))
}

/// Fields of `data` whose text contains any query term, in column order.
pub fn matching_fields<'a>(data: &'a RowData, query: &str) -> Vec<(&'a str, &'a CellValue)> {
    data.iter()
        .filter(|(_, value)| field_matches(&value.to_string(), query))
        .collect()
}

fn term_matchers(query: &str) -> Vec<Regex> {
    query
        .split_whitespace()
        .filter_map(|term| {
            RegexBuilder::new(&regex::escape(term))
                .case_insensitive(true)
                .build()
                .ok()
        })
        .collect()
}

fn push_highlighted(spans: &mut Vec<Span>, segment: &str, matchers: &[Regex]) {
    let mut ranges: Vec<(usize, usize)> = matchers
        .iter()
        .flat_map(|matcher| {
            matcher
                .find_iter(segment)
                .filter(|hit| hit.start() < hit.end())
                .map(|hit| (hit.start(), hit.end()))
        })
        .collect();
    ranges.sort_unstable();

    // Overlaps from different terms collapse into one span; touching spans stay apart.
    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        match merged.last_mut() {
            Some(last) if start < last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }

    let mut cursor = 0;
    for (start, end) in merged {
        if start > cursor {
            spans.push(Span::text(&segment[cursor..start]));
        }
        spans.push(Span::Highlight {
            text: segment[start..end].to_string(),
        });
        cursor = end;
    }
    if cursor < segment.len() {
        spans.push(Span::text(&segment[cursor..]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn concat(spans: &[Span]) -> String {
        spans.iter().map(Span::source_text).collect()
    }

    fn highlighted(spans: &[Span]) -> Vec<&str> {
        spans
            .iter()
            .filter_map(|span| match span {
                Span::Highlight { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn plain_text_without_query_is_one_span() {
        let spans = annotate("Annual creative conference", "", false);
        assert_eq!(spans, vec![Span::text("Annual creative conference")]);
    }

    #[test]
    fn disabled_highlighting_still_extracts_links() {
        let text = "docs at https://example.com/a and more";
        let spans = annotate(text, "docs", false);
        assert_eq!(spans.len(), 3);
        assert!(matches!(&spans[1], Span::Link { url, .. } if url == "https://example.com/a"));
        assert_eq!(concat(&spans), text);
    }

    #[test]
    fn terms_inside_urls_are_not_highlighted() {
        let text = "see http://a.com/foo for more";
        let spans = annotate(text, "foo", true);
        assert_eq!(
            spans,
            vec![
                Span::text("see "),
                Span::Link {
                    url: "http://a.com/foo".into(),
                    label: "http://a.com/foo".into()
                },
                Span::text(" for more"),
            ]
        );
    }

    #[test]
    fn highlights_every_occurrence_case_insensitively() {
        let spans = annotate("Adobe MAX and adobe Stock", "ADOBE", true);
        assert_eq!(highlighted(&spans), vec!["Adobe", "adobe"]);
        assert_eq!(concat(&spans), "Adobe MAX and adobe Stock");
    }

    #[test]
    fn overlapping_terms_merge() {
        let spans = annotate("Photoshop web design", "tosh photo web", true);
        assert_eq!(highlighted(&spans), vec!["Photosh", "web"]);
    }

    #[test]
    fn touching_terms_stay_separate() {
        let spans = annotate("Photoshop", "shop photo", true);
        assert_eq!(highlighted(&spans), vec!["Photo", "shop"]);
        assert_eq!(concat(&spans), "Photoshop");
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let spans = annotate("Budget $50,000 (est.)", "$50 (est.)", true);
        assert_eq!(highlighted(&spans), vec!["$50", "(est.)"]);
    }

    #[test]
    fn long_links_are_truncated_for_display_only() {
        let url = format!("https://example.com/{}", "x".repeat(60));
        let spans = annotate(&url, "", true);
        match &spans[0] {
            Span::Link { url: target, label } => {
                assert_eq!(target, &url);
                assert_eq!(label.chars().count(), 50);
                assert!(label.ends_with("..."));
            }
            other => panic!("expected link, got {other:?}"),
        }
    }

    #[test]
    fn url_stops_at_quotes() {
        let spans = annotate("link:'https://a.io/x'", "", false);
        assert!(matches!(&spans[1], Span::Link { url, .. } if url == "https://a.io/x"));
    }

    #[test]
    fn field_match_uses_any_term() {
        assert!(field_matches("Sarah Johnson", "nobody johnson"));
        assert!(!field_matches("Sarah Johnson", "mike"));
        assert!(!field_matches("anything", "   "));
    }

    #[test]
    fn matching_fields_keep_column_order() {
        let mut data = RowData::default();
        data.insert("Title".into(), "Photoshop AI".into());
        data.insert("Director".into(), "Mike Chen".into());
        data.insert("Platform".into(), "Adobe.com".into());
        let fields = matching_fields(&data, "adobe photoshop");
        let names: Vec<_> = fields.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["Title", "Platform"]);
    }
}
