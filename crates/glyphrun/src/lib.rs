//! Text shaping and glyph caching engine
//!
//! This crate turns runs of characters plus a font selection into positioned
//! glyphs ready for drawing and measurement:
//! - Packed per-character glyph records with a detailed overflow table
//! - Shaped words cached per font instance, aged out over time
//! - A font instance cache with generation-based deferred destruction
//! - Text runs spanning multiple fonts, with measurement and line breaking
//! - Font groups resolving family lists and per-character fallback
//!
//! Everything here is single-threaded: fonts, caches and text runs live on the
//! layout thread and are shared through `Rc`.

pub mod charmap;
pub mod config;
pub mod face;
pub mod family;
pub mod font;
pub mod font_cache;
pub mod font_entry;
pub mod font_group;
pub mod font_list;
pub mod glyph;
pub mod linebreak;
pub mod metrics;
pub mod shaped_word;
pub mod shaper;
pub mod style;
pub mod text_run;
pub mod unicode;

pub use charmap::CharacterMap;
pub use config::TextConfig;
pub use face::{
    FaceCaps, FaceDescriptor, FaceSource, GlyphMapper, RawMetrics, SfntFace, VirtualFace,
    VirtualGlyph,
};
pub use family::{FontFamily, GlobalFontMatch, StyleMatch};
pub use font::{Font, GlyphExtents};
pub use font_cache::{ExpirationTracker, FontCache, FontCacheSizes, FontKey, FontRef};
pub use font_entry::{FontEntry, FontTable};
pub use font_group::{
    is_invalid_char, parse_family_list, FamilyName, FontContext, FontGroup, TextRange, UserFontSet,
};
pub use font_list::{lang_prefs, pref_lang_for_char, FontList, FontPrefLang, SystemMatch};
pub use glyph::{BreakType, CompressedGlyph, DetailedGlyph, DetailedGlyphStore, GlyphBuffer};
pub use metrics::{BoundingBoxType, FontMetrics, Rect, RunMetrics, Spacing};
pub use shaped_word::{ShapedWord, WordKey, WordText};
pub use shaper::{
    BasicShaper, HarfBuzzShaper, ScriptFilter, Shaper, ShaperKind, ShaperPrefs, ShapingFace,
};
pub use style::{FontFeature, FontSlant, FontStyle};
pub use text_run::{
    BreakOptions, BreakPriority, BreakResult, DrawMode, DrawTarget, GlyphRun, GlyphRunIter,
    HyphensOption, LigatureData, MatchType, PositionedGlyph, PropertyProvider, TextRun,
    TextRunFlags, TextRunParams,
};

use thiserror::Error;

/// Text engine errors
#[derive(Error, Debug)]
pub enum TextError {
    #[error("Failed to load font: {0}")]
    FontLoadError(String),

    #[error("Failed to parse font: {0}")]
    FontParseError(String),

    #[error("Invalid font data")]
    InvalidFontData,

    #[error("Invalid font metrics: {0}")]
    InvalidMetrics(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TextError>;

/// App units per CSS pixel; device pixels map onto a multiple of this.
pub const APP_UNITS_PER_CSS_PIXEL: u32 = 60;
