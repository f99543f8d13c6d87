//! Approximate substring scoring.
//!
//! A query matches a text when some substring of the text is within
//! `threshold * query_len` edits of the query. The raw distance is the best
//! edit count divided by the query length, so 0.0 is an exact hit and 1.0 is
//! "every character had to change". Where the hit sits in the text is ignored.
//!
//! Ranking uses the raw distance raised to a field-length norm, which ranks
//! short records above long ones that match equally well.

/// Stand-in for a zero distance so exact hits still feel the field norm.
const EXACT_FLOOR: f64 = f64::EPSILON;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuzzyMatch {
    /// Fewest edits between the query and any substring of the text.
    pub errors: usize,
    /// `errors / query_len`, in [0, 1].
    pub distance: f64,
}

#[derive(Debug, Clone)]
pub struct FuzzyMatcher {
    pattern: Vec<char>,
    threshold: f64,
    max_errors: usize,
}

impl FuzzyMatcher {
    /// Builds a matcher for `query`. Matching is case-insensitive; `threshold`
    /// must already be validated to lie in [0, 1].
    pub fn new(query: &str, threshold: f64) -> Self {
        let pattern: Vec<char> = query.to_lowercase().chars().collect();
        let max_errors = (threshold * pattern.len() as f64 + 1e-9).floor() as usize;
        Self {
            pattern,
            threshold,
            max_errors,
        }
    }

    /// Scores `text`, which must already be lowercase. Returns `None` when the
    /// best alignment needs more edits than the threshold allows.
    pub fn score(&self, text: &[char]) -> Option<FuzzyMatch> {
        let m = self.pattern.len();
        if m == 0 {
            return None;
        }
        if contains(text, &self.pattern) {
            return Some(FuzzyMatch {
                errors: 0,
                distance: 0.0,
            });
        }
        if self.max_errors == 0 {
            return None;
        }

        let errors = self.best_alignment(text)?;
        let distance = errors as f64 / m as f64;
        if distance <= self.threshold {
            Some(FuzzyMatch { errors, distance })
        } else {
            None
        }
    }

    /// Semi-global edit distance: the pattern must be consumed entirely, the
    /// text may start and end anywhere.
    fn best_alignment(&self, text: &[char]) -> Option<usize> {
        let m = self.pattern.len();
        let mut column: Vec<usize> = (0..=m).collect();
        let mut best = column[m];
        for &ch in text {
            let mut diagonal = column[0];
            column[0] = 0;
            for i in 1..=m {
                let above = column[i];
                let cost = if self.pattern[i - 1] == ch { 0 } else { 1 };
                column[i] = (above + 1).min(column[i - 1] + 1).min(diagonal + cost);
                diagonal = above;
            }
            best = best.min(column[m]);
            if best == 0 {
                break;
            }
        }
        (best <= self.max_errors).then_some(best)
    }
}

/// Field-length norm: `1 / sqrt(token_count)`, rounded to three places.
pub fn field_norm(text: &str) -> f64 {
    let tokens = text.split(' ').filter(|token| !token.is_empty()).count().max(1);
    let norm = 1.0 / (tokens as f64).sqrt();
    (norm * 1000.0).round() / 1000.0
}

/// Ranking distance in [0, 1] combining the raw distance with the field norm.
pub fn ranked_distance(raw: f64, norm: f64) -> f64 {
    let base = if raw == 0.0 { EXACT_FLOOR } else { raw };
    base.powf(norm).clamp(0.0, 1.0)
}

fn contains(haystack: &[char], needle: &[char]) -> bool {
    if needle.len() > haystack.len() {
        return false;
    }
    haystack
        .windows(needle.len())
        .any(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(text: &str) -> Vec<char> {
        text.to_lowercase().chars().collect()
    }

    #[test]
    fn exact_substring_has_zero_distance() {
        let matcher = FuzzyMatcher::new("Adobe", 0.4);
        let hit = matcher.score(&chars("Adobe Summit 2024")).unwrap();
        assert_eq!(hit.errors, 0);
        assert_eq!(hit.distance, 0.0);
    }

    #[test]
    fn typo_is_tolerated_within_threshold() {
        let matcher = FuzzyMatcher::new("adobee", 0.4);
        let hit = matcher.score(&chars("Adobe Summit 2024")).unwrap();
        assert_eq!(hit.errors, 1);
        assert!(hit.distance > 0.0 && hit.distance <= 0.4);
    }

    #[test]
    fn exact_mode_rejects_typos() {
        let matcher = FuzzyMatcher::new("adobee", 0.0);
        assert!(matcher.score(&chars("Adobe Summit 2024")).is_none());
    }

    #[test]
    fn unrelated_text_is_rejected() {
        let matcher = FuzzyMatcher::new("adobe", 0.4);
        assert!(matcher.score(&chars("Photoshop Demo 2024")).is_none());
    }

    #[test]
    fn full_threshold_matches_anything() {
        let matcher = FuzzyMatcher::new("zzz", 1.0);
        let hit = matcher.score(&chars("abc")).unwrap();
        assert_eq!(hit.errors, 3);
        assert_eq!(hit.distance, 1.0);
    }

    #[test]
    fn empty_pattern_never_matches() {
        assert!(FuzzyMatcher::new("", 0.5).score(&chars("text")).is_none());
    }

    #[test]
    fn norm_prefers_short_fields() {
        assert_eq!(field_norm("one"), 1.0);
        assert_eq!(field_norm("one two three four"), 0.5);
        assert!(ranked_distance(0.0, 0.577) < 1e-6);
        let short = ranked_distance(0.2, field_norm("a b"));
        let long = ranked_distance(0.2, field_norm("a b c d e f g h"));
        assert!(short < long);
    }
}
