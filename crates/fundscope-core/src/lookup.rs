//! Preference-ordered key lookup.
//!
//! Upstream documents name the same logical field in many ways (`valUSD`,
//! `marketValue`, `Valeur EUR`, `market_value_local`, ...). Every place that
//! tries alternate names declares a [`FieldAliases`] and asks it, instead of
//! open-coding fallbacks.

use serde_json::Value;

/// Ordered alternative keys for one logical field; earlier keys win.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldAliases {
    pub field: &'static str,
    pub keys: &'static [&'static str],
}

impl FieldAliases {
    pub const fn new(field: &'static str, keys: &'static [&'static str]) -> Self {
        Self { field, keys }
    }

    /// First key, in preference order, for which `get` yields a value.
    pub fn first<T>(&self, mut get: impl FnMut(&str) -> Option<T>) -> Option<T> {
        self.keys.iter().find_map(|key| get(key))
    }

    /// First key present in `keys`, returned with its position in `keys`.
    pub fn first_present<'a, S: AsRef<str>>(&self, keys: &'a [S]) -> Option<(usize, &'a str)> {
        self.first(|wanted| {
            keys.iter()
                .position(|key| key.as_ref() == wanted)
                .or_else(|| keys.iter().position(|key| key.as_ref().eq_ignore_ascii_case(wanted)))
                .map(|index| (index, keys[index].as_ref()))
        })
    }

    /// First non-null, non-empty member of a JSON object.
    pub fn first_in_json<'a>(&self, object: &'a Value) -> Option<&'a Value> {
        self.first(|key| {
            object.get(key).filter(|value| match value {
                Value::Null => false,
                Value::String(text) => !text.trim().is_empty(),
                _ => true,
            })
        })
    }

    /// First JSON member rendered as trimmed text.
    pub fn first_json_text(&self, object: &Value) -> Option<String> {
        self.first_in_json(object).map(|value| match value {
            Value::String(text) => text.trim().to_owned(),
            other => other.to_string(),
        })
    }

    /// `true` when the lowercased `text` contains any key as a substring.
    pub fn matches_substring(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.keys.iter().any(|key| lowered.contains(key))
    }

    /// Number of keys found as substrings of the lowercased `text`.
    pub fn count_hits(&self, text: &str) -> usize {
        let lowered = text.to_lowercase();
        self.keys.iter().filter(|key| lowered.contains(*key)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const VALUE: FieldAliases = FieldAliases::new("value", &["valUSD", "value", "marketValue"]);

    #[test]
    fn earlier_keys_win_over_later_ones() {
        let doc = json!({"marketValue": 1.0, "valUSD": 2.0});
        assert_eq!(VALUE.first_in_json(&doc), Some(&json!(2.0)));
    }

    #[test]
    fn blank_and_null_members_are_skipped() {
        let doc = json!({"valUSD": null, "value": "  ", "marketValue": "3"});
        assert_eq!(VALUE.first_json_text(&doc).as_deref(), Some("3"));
    }

    #[test]
    fn first_present_reports_column_position() {
        let columns = ["Name", "MARKETVALUE", "value"];
        assert_eq!(VALUE.first_present(&columns), Some((2, "value")));
    }

    #[test]
    fn substring_matching_is_case_insensitive() {
        let aliases = FieldAliases::new("quantity", &["quantité", "shares"]);
        assert!(aliases.matches_substring("QUANTITÉ / Nominal"));
        assert_eq!(aliases.count_hits("Number of shares"), 1);
        assert!(!aliases.matches_substring("Valeur"));
    }
}
