//! Requested font style
//!
//! [`FontStyle`] is an immutable value used as part of cache keys: equality
//! and hashing cover every field, with floats compared by bit pattern.

use std::hash::{Hash, Hasher};

/// Largest font size, in device pixels, that a style may resolve to
pub const FONT_MAX_SIZE: f64 = 2000.0;

/// Default size in device pixels
pub const DEFAULT_FONT_SIZE: f64 = 16.0;

/// No OpenType language-system override
pub const NO_LANGUAGE_OVERRIDE: u32 = 0;

/// Font slant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FontSlant {
    #[default]
    Normal,
    Italic,
    Oblique,
}

/// One OpenType feature setting, e.g. `liga` = 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FontFeature {
    pub tag: u32,
    pub value: u32,
}

impl FontFeature {
    pub fn new(tag: &[u8; 4], value: u32) -> Self {
        Self {
            tag: make_tag(tag),
            value,
        }
    }

    /// The tag as four ASCII bytes
    pub fn tag_bytes(&self) -> [u8; 4] {
        self.tag.to_be_bytes()
    }
}

/// Packs a four-byte OpenType tag.
pub const fn make_tag(tag: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*tag)
}

/// Style request used to pick and size a font
#[derive(Debug, Clone)]
pub struct FontStyle {
    /// Size in device pixels
    pub size: f64,
    /// CSS font-size-adjust; 0 disables adjustment
    pub size_adjust: f64,
    pub slant: FontSlant,
    /// 100..=900
    pub weight: u16,
    /// -4 (ultra-condensed) ..= 4 (ultra-expanded)
    pub stretch: i16,
    /// Language group, e.g. "x-western" or "ja"
    pub language: String,
    /// Feature settings in declaration order
    pub features: Vec<FontFeature>,
    /// Packed OpenType language-system tag
    pub language_override: u32,
    pub system_font: bool,
    pub printer_font: bool,
}

impl Default for FontStyle {
    fn default() -> Self {
        Self {
            size: DEFAULT_FONT_SIZE,
            size_adjust: 0.0,
            slant: FontSlant::Normal,
            weight: 400,
            stretch: 0,
            language: "x-western".to_string(),
            features: Vec::new(),
            language_override: NO_LANGUAGE_OVERRIDE,
            system_font: false,
            printer_font: false,
        }
    }
}

impl FontStyle {
    pub fn new(size: f64, weight: u16, slant: FontSlant) -> Self {
        Self {
            size: size.clamp(0.0, FONT_MAX_SIZE),
            weight,
            slant,
            ..Default::default()
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_features(mut self, features: Vec<FontFeature>) -> Self {
        self.features = features;
        self
    }

    pub fn with_stretch(mut self, stretch: i16) -> Self {
        self.stretch = stretch.clamp(-4, 4);
        self
    }

    pub fn with_size_adjust(mut self, size_adjust: f64) -> Self {
        self.size_adjust = size_adjust;
        self
    }

    /// True for italic and oblique requests
    pub fn is_italic(&self) -> bool {
        self.slant != FontSlant::Normal
    }

    /// Weight rounded to a 1..=9 bucket
    pub fn compute_weight(&self) -> u8 {
        ((self.weight as u32 + 50) / 100).clamp(1, 9) as u8
    }

    /// Size after applying font-size-adjust for a face with the given
    /// x-height / em aspect ratio.
    pub fn adjusted_size(&self, aspect: f64) -> f64 {
        if self.size_adjust == 0.0 || aspect <= 0.0 {
            return self.size;
        }
        let adjusted = (self.size * (self.size_adjust / aspect)).round().max(1.0);
        adjusted.min(FONT_MAX_SIZE)
    }

    /// Parses CSS `font-feature-settings`: `"liga" 0, "kern", "ss01" on`.
    /// Malformed entries are skipped.
    pub fn parse_feature_settings(settings: &str) -> Vec<FontFeature> {
        let mut features = Vec::new();
        for item in settings.split(',') {
            let item = item.trim();
            let Some(rest) = item.strip_prefix(['"', '\'']) else {
                continue;
            };
            let Some(end) = rest.find(['"', '\'']) else {
                continue;
            };
            let tag = &rest[..end];
            if tag.len() != 4 || !tag.bytes().all(|b| (0x20..=0x7E).contains(&b)) {
                continue;
            }
            let value = match rest[end + 1..].trim() {
                "" | "on" => 1,
                "off" => 0,
                n => match n.parse::<u32>() {
                    Ok(v) => v,
                    Err(_) => continue,
                },
            };
            let bytes = tag.as_bytes();
            features.push(FontFeature::new(
                &[bytes[0], bytes[1], bytes[2], bytes[3]],
                value,
            ));
        }
        features
    }

    /// Packs a CSS `font-language-override` value into an OpenType tag,
    /// padding with spaces. Anything that is not 1-4 ASCII characters
    /// yields [`NO_LANGUAGE_OVERRIDE`].
    pub fn parse_language_override(tag: &str) -> u32 {
        if tag.is_empty() || tag.len() > 4 || !tag.is_ascii() {
            return NO_LANGUAGE_OVERRIDE;
        }
        let mut result = 0u32;
        for b in tag.bytes() {
            result = (result << 8) + b as u32;
        }
        for _ in tag.len()..4 {
            result = (result << 8) + 0x20;
        }
        result
    }
}

fn float_bits(v: f64) -> u64 {
    // +0.0 and -0.0 must compare equal
    if v == 0.0 {
        0
    } else {
        v.to_bits()
    }
}

impl PartialEq for FontStyle {
    fn eq(&self, other: &Self) -> bool {
        float_bits(self.size) == float_bits(other.size)
            && self.slant == other.slant
            && self.system_font == other.system_font
            && self.printer_font == other.printer_font
            && self.weight == other.weight
            && self.stretch == other.stretch
            && self.language == other.language
            && float_bits(self.size_adjust) == float_bits(other.size_adjust)
            && self.features == other.features
            && self.language_override == other.language_override
    }
}

impl Eq for FontStyle {}

impl Hash for FontStyle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        float_bits(self.size).hash(state);
        float_bits(self.size_adjust).hash(state);
        self.slant.hash(state);
        self.weight.hash(state);
        self.stretch.hash(state);
        self.language.hash(state);
        self.features.hash(state);
        self.language_override.hash(state);
        self.system_font.hash(state);
        self.printer_font.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHasher;

    fn hash_of(style: &FontStyle) -> u64 {
        let mut h = FxHasher::default();
        style.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_equal_styles_hash_equal() {
        let a = FontStyle::new(12.0, 700, FontSlant::Italic).with_language("ja");
        let b = FontStyle::new(12.0, 700, FontSlant::Italic).with_language("ja");
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_every_field_participates() {
        let base = FontStyle::default();
        let variants = [
            FontStyle { size: 17.0, ..base.clone() },
            FontStyle { size_adjust: 0.5, ..base.clone() },
            FontStyle { slant: FontSlant::Oblique, ..base.clone() },
            FontStyle { weight: 500, ..base.clone() },
            FontStyle { stretch: 2, ..base.clone() },
            FontStyle { language: "ko".into(), ..base.clone() },
            FontStyle { features: vec![FontFeature::new(b"liga", 0)], ..base.clone() },
            FontStyle { language_override: make_tag(b"SRB "), ..base.clone() },
            FontStyle { system_font: true, ..base.clone() },
            FontStyle { printer_font: true, ..base.clone() },
        ];
        for v in &variants {
            assert_ne!(&base, v);
        }
    }

    #[test]
    fn test_negative_zero_size_adjust() {
        let a = FontStyle::default().with_size_adjust(0.0);
        let b = FontStyle::default().with_size_adjust(-0.0);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_compute_weight() {
        assert_eq!(FontStyle::new(10.0, 400, FontSlant::Normal).compute_weight(), 4);
        assert_eq!(FontStyle::new(10.0, 650, FontSlant::Normal).compute_weight(), 7);
        assert_eq!(FontStyle::new(10.0, 0, FontSlant::Normal).compute_weight(), 1);
        assert_eq!(FontStyle::new(10.0, 1000, FontSlant::Normal).compute_weight(), 9);
    }

    #[test]
    fn test_adjusted_size() {
        let style = FontStyle::new(20.0, 400, FontSlant::Normal).with_size_adjust(0.5);
        assert_eq!(style.adjusted_size(0.5), 20.0);
        assert_eq!(style.adjusted_size(0.4), 25.0);
        assert_eq!(FontStyle::default().adjusted_size(0.3), DEFAULT_FONT_SIZE);
    }

    #[test]
    fn test_parse_feature_settings() {
        let features = FontStyle::parse_feature_settings("\"liga\" 0, 'kern', \"ss01\" on, bad, \"toolong\" 1");
        assert_eq!(
            features,
            vec![
                FontFeature::new(b"liga", 0),
                FontFeature::new(b"kern", 1),
                FontFeature::new(b"ss01", 1),
            ]
        );
    }

    #[test]
    fn test_parse_language_override() {
        assert_eq!(FontStyle::parse_language_override("SRB"), make_tag(b"SRB "));
        assert_eq!(FontStyle::parse_language_override("TRKX"), make_tag(b"TRKX"));
        assert_eq!(FontStyle::parse_language_override(""), NO_LANGUAGE_OVERRIDE);
        assert_eq!(FontStyle::parse_language_override("TOOLONG"), NO_LANGUAGE_OVERRIDE);
    }
}
