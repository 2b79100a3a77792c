//! Free-text score parsing.
//!
//! The analysis service answers in prose that is expected to contain
//! `Label: number` pairs, e.g. `Symmetry: 8, Jawline: 7. Total Score: 7.2`.
//! [`parse_record`] pulls every such pair out of the text; whether the
//! result is usable is decided separately by [`ParsedRecord::is_valid`].

use std::sync::LazyLock;

use regex::Regex;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Normalized name of the field that decides validity.
pub const TOTAL_SCORE: &str = "total_score";

static FIELD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z0-9_\s]+): ([0-9]+\.?[0-9]*)").expect("field pattern is a valid regex")
});

/// Numeric fields scraped from one analysis reply, in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedRecord {
    fields: Vec<(String, f64)>,
}

impl ParsedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, overwriting the value of an existing field with the
    /// same name. An overwritten field keeps its original position.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| *value)
    }

    pub fn total_score(&self) -> Option<f64> {
        self.get(TOTAL_SCORE)
    }

    /// A record is valid when it carries a strictly positive `total_score`.
    ///
    /// No upper bound is applied.
    pub fn is_valid(&self) -> bool {
        self.total_score().is_some_and(|score| score > 0.0)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), *value))
    }
}

impl Serialize for ParsedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Normalize a raw label: trim, spaces to underscores, lower-case.
///
/// `" Total Score"` → `"total_score"`
pub fn normalize_label(label: &str) -> String {
    label.trim().replace(' ', "_").to_lowercase()
}

/// Scan `text` for `Label: number` pairs and collect them into a record.
///
/// Never fails: text without any match yields an empty record.
pub fn parse_record(text: &str) -> ParsedRecord {
    let mut record = ParsedRecord::new();
    for captures in FIELD_PATTERN.captures_iter(text) {
        let label = normalize_label(&captures[1]);
        // ASCII digits with at most one dot always parse as f64.
        if let Ok(value) = captures[2].parse::<f64>() {
            record.insert(label, value);
        }
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_inline_pairs() {
        let record = parse_record("Symmetry: 8, Total Score: 7.2");

        assert_eq!(record.len(), 2);
        assert_eq!(record.get("symmetry"), Some(8.0));
        assert_eq!(record.get("total_score"), Some(7.2));
        assert!(record.is_valid());
    }

    #[test]
    fn last_occurrence_wins() {
        let record = parse_record("Jawline: 5 ... Jawline: 9");

        assert_eq!(record.len(), 1);
        assert_eq!(record.get("jawline"), Some(9.0));
    }

    #[test]
    fn overwritten_field_keeps_first_position() {
        let record = parse_record("Jawline: 5, Cheekbones: 6, Jawline: 9");
        let names: Vec<&str> = record.iter().map(|(name, _)| name).collect();

        assert_eq!(names, vec!["jawline", "cheekbones"]);
    }

    #[test]
    fn no_matches_yields_empty_record() {
        let record = parse_record("I'm sorry, I can't help with that.");

        assert!(record.is_empty());
        assert!(!record.is_valid());
    }

    #[test]
    fn normalizes_multi_word_labels() {
        let record = parse_record(
            "Facial Definition: 7, Jawline to Cheekbones: 6, Complete Facial Harmony: 7. Total Score: 6.85",
        );

        assert_eq!(record.get("facial_definition"), Some(7.0));
        assert_eq!(record.get("jawline_to_cheekbones"), Some(6.0));
        assert_eq!(record.get("complete_facial_harmony"), Some(7.0));
        assert_eq!(record.get("total_score"), Some(6.85));
    }

    #[test]
    fn parses_line_separated_reply() {
        let text = "Here is the breakdown:\nSymmetry: 9\nSkin Quality: 8\nTotal Score: 9.00\n";
        let record = parse_record(text);

        assert_eq!(record.get("symmetry"), Some(9.0));
        assert_eq!(record.get("skin_quality"), Some(8.0));
        assert_eq!(record.total_score(), Some(9.0));
    }

    #[test]
    fn zero_total_score_is_invalid() {
        assert!(!parse_record("Symmetry: 8, Total Score: 0").is_valid());
    }

    #[test]
    fn missing_total_score_is_invalid() {
        assert!(!parse_record("Symmetry: 8, Jawline: 7").is_valid());
    }

    #[test]
    fn implausibly_large_total_score_is_still_valid() {
        assert!(parse_record("Total Score: 742").is_valid());
    }

    #[test]
    fn ignores_pairs_without_space_after_colon() {
        let record = parse_record("Symmetry:8, Total Score: 7");

        assert_eq!(record.get("symmetry"), None);
        assert_eq!(record.total_score(), Some(7.0));
    }

    #[test]
    fn number_stops_at_non_ascii_digits() {
        let record = parse_record("Total Score: 7\u{0663}");

        assert_eq!(record.total_score(), Some(7.0));
    }

    #[test]
    fn label_is_ascii_word_characters_only() {
        let record = parse_record("Größe: 5");

        assert_eq!(record.get("e"), Some(5.0));
        assert_eq!(record.get("größe"), None);
    }

    #[test]
    fn normalize_label_trims_and_lowercases() {
        assert_eq!(normalize_label(" Total Score"), "total_score");
        assert_eq!(normalize_label("Lip Fullness "), "lip_fullness");
        assert_eq!(normalize_label("SYMMETRY"), "symmetry");
    }

    #[test]
    fn serializes_in_order_of_appearance() {
        let record = parse_record("Symmetry: 8, Total Score: 7.2");
        let json = serde_json::to_string(&record).unwrap();

        assert_eq!(json, r#"{"symmetry":8.0,"total_score":7.2}"#);
    }
}
