//! Engine configuration (glyphrun.toml)

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Tunables for caching, shaping and fallback
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TextConfig {
    /// Seconds per font-cache generation; unused fonts die after three
    #[serde(default = "default_font_expiration")]
    pub font_expiration_secs: u64,
    /// Seconds between shaped-word aging passes
    #[serde(default = "default_word_expiration")]
    pub word_expiration_secs: u64,
    /// Aging passes a word survives without a hit
    #[serde(default = "default_word_max_age")]
    pub word_max_age: u32,
    #[serde(default = "default_app_units")]
    pub app_units_per_dev_unit: u32,
    /// ISO 15924 codes shaped with the generic shaper; `["*"]` means all
    #[serde(default = "default_harfbuzz_scripts")]
    pub harfbuzz_scripts: Vec<String>,
    /// Language group (`"ja"`, `"x-western"`, ...) to preferred families
    #[serde(default)]
    pub pref_fonts: BTreeMap<String, Vec<String>>,
    /// Generic name (`"serif"`, `"monospace"`, ...) to families
    #[serde(default)]
    pub generic_families: BTreeMap<String, Vec<String>>,
    /// Used when none of a group's families resolve
    #[serde(default)]
    pub default_family: Option<String>,
    /// Search every installed face when the preferences fail
    #[serde(default = "default_true")]
    pub use_system_fallback: bool,
}

fn default_font_expiration() -> u64 {
    10
}

fn default_word_expiration() -> u64 {
    60
}

fn default_word_max_age() -> u32 {
    3
}

fn default_app_units() -> u32 {
    crate::APP_UNITS_PER_CSS_PIXEL
}

fn default_harfbuzz_scripts() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_true() -> bool {
    true
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            font_expiration_secs: default_font_expiration(),
            word_expiration_secs: default_word_expiration(),
            word_max_age: default_word_max_age(),
            app_units_per_dev_unit: default_app_units(),
            harfbuzz_scripts: default_harfbuzz_scripts(),
            pref_fonts: BTreeMap::new(),
            generic_families: BTreeMap::new(),
            default_family: None,
            use_system_fallback: true,
        }
    }
}

impl TextConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!("Loaded text config from {}", path.display());
        Ok(config)
    }

    /// Preferred families for a language group, in order
    pub fn pref_fonts_for(&self, lang_group: &str) -> &[String] {
        self.pref_fonts.get(lang_group).map_or(&[], |v| v.as_slice())
    }

    /// Families for a generic name, in order
    pub fn generic_families_for(&self, generic: &str) -> &[String] {
        self.generic_families
            .get(generic)
            .map_or(&[], |v| v.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TextError;

    #[test]
    fn test_defaults() {
        let config = TextConfig::default();
        assert_eq!(config.font_expiration_secs, 10);
        assert_eq!(config.word_expiration_secs, 60);
        assert_eq!(config.word_max_age, 3);
        assert_eq!(config.app_units_per_dev_unit, 60);
        assert!(config.use_system_fallback);
        assert_eq!(TextConfig::from_toml_str("").unwrap(), config);
    }

    #[test]
    fn test_parse_partial() {
        let config = TextConfig::from_toml_str(
            r#"
            font_expiration_secs = 5
            harfbuzz_scripts = ["Arab", "Deva"]
            default_family = "Noto Sans"

            [pref_fonts]
            ja = ["Noto Sans JP", "Hiragino Sans"]

            [generic_families]
            monospace = ["Fira Code"]
            "#,
        )
        .unwrap();
        assert_eq!(config.font_expiration_secs, 5);
        assert_eq!(config.word_max_age, 3);
        assert_eq!(config.pref_fonts_for("ja")[1], "Hiragino Sans");
        assert!(config.pref_fonts_for("ko").is_empty());
        assert_eq!(config.generic_families_for("monospace"), ["Fira Code"]);
        assert_eq!(config.default_family.as_deref(), Some("Noto Sans"));
    }

    #[test]
    fn test_invalid_toml() {
        let err = TextConfig::from_toml_str("word_max_age = \"old\"").unwrap_err();
        assert!(matches!(err, TextError::Config(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = TextConfig::load(Path::new("/nonexistent/glyphrun.toml")).unwrap_err();
        assert!(matches!(err, TextError::Io(_)));
    }
}
