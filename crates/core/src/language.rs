//! Supported coaching languages

use serde::{Deserialize, Serialize};

/// Languages the coaching engine is calibrated for.
///
/// The per-language thresholds and benchmarks live in the config crate;
/// this enum is only the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[serde(rename = "fr")]
    #[default]
    French,
    #[serde(rename = "en")]
    English,
}

impl Language {
    /// ISO 639-1 code.
    pub fn code(&self) -> &'static str {
        match self {
            Language::French => "fr",
            Language::English => "en",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Language::French => "Français",
            Language::English => "English",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_lowercase().as_str() {
            "fr" | "fr-fr" => Some(Language::French),
            "en" | "en-us" | "en-gb" => Some(Language::English),
            _ => None,
        }
    }

    pub fn all() -> &'static [Language] {
        &[Language::French, Language::English]
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_codes() {
        assert_eq!(Language::French.code(), "fr");
        assert_eq!(Language::English.code(), "en");
        assert_eq!(Language::from_code("EN"), Some(Language::English));
        assert_eq!(Language::from_code("de"), None);
    }

    #[test]
    fn test_language_serde() {
        assert_eq!(serde_json::to_string(&Language::French).unwrap(), "\"fr\"");
        let lang: Language = serde_json::from_str("\"en\"").unwrap();
        assert_eq!(lang, Language::English);
    }
}
