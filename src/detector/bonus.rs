use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::DEFAULT_BONUS_CAPS;
use crate::error::{AppError, Result};

static NUMBER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+").expect("valid number pattern"));

/// Read-only table of bonus name → maximum attainable roll.
/// Keys are stored lower-cased; matching is a case-insensitive substring test.
#[derive(Debug, Clone, Default)]
pub struct BonusCaps {
    caps: Vec<(String, i64)>,
}

impl BonusCaps {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: AsRef<str>,
    {
        let caps = entries
            .into_iter()
            .map(|(name, cap)| (name.as_ref().to_lowercase(), cap))
            .filter(|(name, _)| !name.is_empty())
            .collect();
        Self { caps }
    }

    pub fn builtin() -> Self {
        Self::new(DEFAULT_BONUS_CAPS.iter().copied())
    }

    /// Load a JSON object of `{ "bonus label": cap }`.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let table: BTreeMap<String, i64> = serde_json::from_str(&raw)?;
        if table.is_empty() {
            return Err(AppError::Config(format!(
                "bonus cap file {} contains no entries",
                path.as_ref().display()
            )));
        }
        Ok(Self::new(table))
    }

    pub fn len(&self) -> usize {
        self.caps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }

    /// True when the bonus carries the maximum roll for any cap its text matches.
    ///
    /// Numbers are read from `value`; when `value` is empty they are read from
    /// `name`, since marketplace records often embed the roll in the label
    /// (`"Max. TP +2000"`). Text without a number is never maxed.
    pub fn is_max_bonus(&self, name: &str, value: &str) -> bool {
        let numeric_text = if value.trim().is_empty() { name } else { value };
        let rolls: Vec<i64> = NUMBER_PATTERN
            .find_iter(numeric_text)
            .filter_map(|m| m.as_str().parse::<i64>().ok())
            .collect();
        if rolls.is_empty() {
            return false;
        }

        let text = format!("{name} {value}").to_lowercase();
        self.caps
            .iter()
            .filter(|(key, _)| text.contains(key.as_str()))
            .any(|&(_, cap)| rolls.iter().any(|&roll| roll >= cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> BonusCaps {
        BonusCaps::new([
            ("Max. TP", 2000),
            ("Stark gegen Monster", 25),
            ("Stark gegen Halbmenschen", 10),
            ("Angriffswert", 50),
        ])
    }

    #[test]
    fn no_numeric_token_is_never_maxed() {
        let caps = caps();
        assert!(!caps.is_max_bonus("Stark gegen Monster", "hoch"));
        assert!(!caps.is_max_bonus("Stark gegen Monster", ""));
        assert!(!caps.is_max_bonus("Max. TP", "%"));
    }

    #[test]
    fn value_equal_to_cap_is_maxed() {
        let caps = caps();
        assert!(caps.is_max_bonus("Stark gegen Monster", "+25%"));
        assert!(caps.is_max_bonus("Max. TP", "2000"));
        assert!(!caps.is_max_bonus("Stark gegen Monster", "+24%"));
    }

    #[test]
    fn match_is_case_insensitive_substring() {
        let caps = caps();
        assert!(caps.is_max_bonus("STARK GEGEN MONSTER (Bonus)", "30"));
        assert!(caps.is_max_bonus("+25% stark gegen monster", ""));
    }

    #[test]
    fn unmatched_names_are_never_maxed() {
        assert!(!caps().is_max_bonus("Giftwiderstand", "99"));
    }

    #[test]
    fn any_satisfied_cap_wins() {
        // Both keys match; only the tighter cap is satisfied.
        let caps = BonusCaps::new([("gegen", 100), ("Stark gegen Halbmenschen", 10)]);
        assert!(caps.is_max_bonus("Stark gegen Halbmenschen", "+12%"));
        assert!(!caps.is_max_bonus("Widerstand gegen Gift", "+12%"));
    }

    #[test]
    fn any_token_may_satisfy_the_cap() {
        assert!(caps().is_max_bonus("Angriffswert", "10 / 50"));
    }

    #[test]
    fn negative_rolls_compare_signed() {
        assert!(!caps().is_max_bonus("Angriffswert", "-60"));
    }

    #[test]
    fn builtin_table_is_loaded() {
        let caps = BonusCaps::builtin();
        assert!(caps.len() > 70);
        assert!(caps.is_max_bonus("Stark gegen Halbmenschen", "+10%"));
        assert!(!caps.is_max_bonus("Stark gegen Halbmenschen", "+9%"));
    }

    #[test]
    fn json_table_round_trip() {
        let path = std::env::temp_dir().join(format!("bonus_caps_{}.json", std::process::id()));
        std::fs::write(&path, r#"{"Kraft des Feuers": 10}"#).unwrap();
        let caps = BonusCaps::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(caps.len(), 1);
        assert!(caps.is_max_bonus("Kraft des Feuers", "10%"));
    }
}
