//! Shaping backends
//!
//! A shaper fills a [`ShapedWord`]'s glyph records for one font. Two are
//! available: [`HarfBuzzShaper`] (rustybuzz over sfnt data) and
//! [`BasicShaper`], a character-to-glyph mapper that works with every face
//! backend. [`select_shapers`] decides which ones to try, in order.

use crate::config::TextConfig;
use crate::face::{FaceCaps, GlyphMapper};
use crate::font::Font;
use crate::glyph::{CompressedGlyph, DetailedGlyph};
use crate::shaped_word::ShapedWord;
use crate::style::{make_tag, FontFeature};
use crate::unicode::{is_low_surrogate, script_tag};
use rustc_hash::FxHashSet;
use smallvec::{smallvec, SmallVec};
use std::fmt;
use std::rc::Rc;
use unicode_script::Script;

/// A shaping backend
pub trait Shaper {
    /// Shapes `text` (the word's characters as UTF-16) into `word`.
    /// Returns `false` if this shaper cannot handle the word.
    fn shape_word(&self, font: &Font, word: &mut ShapedWord, text: &[u16]) -> bool;
}

/// Available shaping backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaperKind {
    HarfBuzz,
    Basic,
}

impl ShaperKind {
    pub fn shaper(self) -> &'static dyn Shaper {
        match self {
            ShaperKind::HarfBuzz => &HarfBuzzShaper,
            ShaperKind::Basic => &BasicShaper,
        }
    }
}

/// Scripts routed through the generic shaper
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ScriptFilter {
    #[default]
    All,
    /// Packed ISO 15924 tags
    Only(FxHashSet<u32>),
}

impl ScriptFilter {
    pub fn contains(&self, script: Script) -> bool {
        match self {
            ScriptFilter::All => true,
            ScriptFilter::Only(tags) => tags.contains(&script_tag(script)),
        }
    }
}

/// Shaper selection preferences
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaperPrefs {
    pub harfbuzz_scripts: ScriptFilter,
}

impl ShaperPrefs {
    pub fn from_config(config: &TextConfig) -> Self {
        let harfbuzz_scripts = if config.harfbuzz_scripts.iter().any(|s| s == "*") {
            ScriptFilter::All
        } else {
            ScriptFilter::Only(
                config
                    .harfbuzz_scripts
                    .iter()
                    .filter_map(|code| {
                        let bytes = code.as_bytes();
                        (bytes.len() == 4).then(|| make_tag(&[bytes[0], bytes[1], bytes[2], bytes[3]]))
                    })
                    .collect(),
            )
        };
        Self { harfbuzz_scripts }
    }
}

/// Shapers to try for a word, in order. The basic shaper always comes last;
/// the generic shaper is tried first for sfnt faces when the script is
/// enabled for it or the style asks for explicit features.
pub fn select_shapers(
    script: Script,
    features: &[FontFeature],
    caps: FaceCaps,
    prefs: &ShaperPrefs,
) -> SmallVec<[ShaperKind; 2]> {
    if caps.sfnt && (!features.is_empty() || prefs.harfbuzz_scripts.contains(script)) {
        smallvec![ShaperKind::HarfBuzz, ShaperKind::Basic]
    } else {
        smallvec![ShaperKind::Basic]
    }
}

/// Resolves the features to apply: disabling ligatures turns off `liga` and
/// `clig`, then style settings apply in order with later settings winning.
pub fn merge_font_features(
    style_features: &[FontFeature],
    disable_ligatures: bool,
) -> Vec<FontFeature> {
    let mut merged: Vec<FontFeature> = Vec::with_capacity(style_features.len() + 2);
    let mut put = |feature: FontFeature| {
        match merged.iter_mut().find(|f| f.tag == feature.tag) {
            Some(existing) => existing.value = feature.value,
            None => merged.push(feature),
        }
    };
    if disable_ligatures {
        put(FontFeature::new(b"liga", 0));
        put(FontFeature::new(b"clig", 0));
    }
    for &feature in style_features {
        put(feature);
    }
    merged
}

/// Stores one character's glyphs in the simple form when possible.
fn store_glyphs(word: &mut ShapedWord, offset: usize, details: &[DetailedGlyph]) {
    let cluster_start = word.glyphs()[offset].is_cluster_start();
    if let [g] = details {
        if cluster_start
            && g.x_offset == 0.0
            && g.y_offset == 0.0
            && g.advance >= 0
            && CompressedGlyph::can_be_simple(g.advance as u32, g.glyph_id)
        {
            word.set_simple_glyph(offset, g.advance as u32, g.glyph_id);
            return;
        }
    }
    let mut glyph = word.glyphs()[offset];
    glyph.set_complex(cluster_start, true, details.len() as u32);
    word.set_glyphs(offset, glyph, details);
}

/// Marks characters after the first in a ligature group as continuations.
fn mark_ligature_continuations(word: &mut ShapedWord, start: usize, end: usize, text: &[u16]) {
    for offset in start..end {
        if is_low_surrogate(text[offset] as u32) {
            continue;
        }
        let mut glyph = word.glyphs()[offset];
        let cluster_start = glyph.is_cluster_start();
        glyph.set_complex(cluster_start, false, 0);
        word.set_glyphs(offset, glyph, &[]);
    }
}

/// A parsed rustybuzz face kept together with the bytes it borrows
#[ouroboros::self_referencing]
pub struct ShapingFace {
    data: Rc<[u8]>,
    #[borrows(data)]
    #[covariant]
    face: rustybuzz::Face<'this>,
}

impl ShapingFace {
    pub fn parse(data: Rc<[u8]>, index: u32) -> Option<Self> {
        ShapingFaceTryBuilder {
            data,
            face_builder: |data| rustybuzz::Face::from_slice(&data[..], index).ok_or(()),
        }
        .try_build()
        .ok()
    }

    pub fn face(&self) -> &rustybuzz::Face<'_> {
        self.borrow_face()
    }
}

impl fmt::Debug for ShapingFace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShapingFace")
            .field("len", &self.borrow_data().len())
            .finish_non_exhaustive()
    }
}

/// Generic OpenType shaper backed by rustybuzz
#[derive(Debug, Clone, Copy, Default)]
pub struct HarfBuzzShaper;

impl Shaper for HarfBuzzShaper {
    fn shape_word(&self, font: &Font, word: &mut ShapedWord, text: &[u16]) -> bool {
        let Some(source) = font.entry().source() else {
            return false;
        };
        let Some(shaping_face) = font.shaping_face() else {
            return false;
        };
        let face = shaping_face.face();

        let mut buffer = rustybuzz::UnicodeBuffer::new();
        let mut index = 0u32;
        for decoded in char::decode_utf16(text.iter().copied()) {
            let units = decoded.as_ref().map_or(1, |c| c.len_utf16() as u32);
            buffer.add(decoded.unwrap_or(char::REPLACEMENT_CHARACTER), index);
            index += units;
        }
        buffer.set_direction(if word.is_rtl() {
            rustybuzz::Direction::RightToLeft
        } else {
            rustybuzz::Direction::LeftToRight
        });
        let tag = script_tag(word.script()).to_be_bytes();
        if let Some(script) =
            rustybuzz::Script::from_iso15924_tag(rustybuzz::ttf_parser::Tag::from_bytes(&tag))
        {
            buffer.set_script(script);
        }
        let language = &font.style().language;
        if !language.starts_with("x-") {
            if let Ok(language) = language.parse::<rustybuzz::Language>() {
                buffer.set_language(language);
            }
        }

        let features: Vec<rustybuzz::Feature> =
            merge_font_features(&font.style().features, word.disable_ligatures())
                .iter()
                .map(|f| {
                    rustybuzz::Feature::new(
                        rustybuzz::ttf_parser::Tag::from_bytes(&f.tag_bytes()),
                        f.value,
                        ..,
                    )
                })
                .collect();

        let output = rustybuzz::shape(face, &features, buffer);
        let mut glyphs: Vec<(rustybuzz::GlyphInfo, rustybuzz::GlyphPosition)> = output
            .glyph_infos()
            .iter()
            .copied()
            .zip(output.glyph_positions().iter().copied())
            .collect();
        // Right-to-left output is in visual order
        if word.is_rtl() {
            glyphs.reverse();
        }

        let scale = font.adjusted_size() * word.app_units_per_dev_unit() as f64
            / source.units_per_em().max(1) as f64;
        let ave_char_width = font.metrics().ave_char_width;

        let mut gi = 0;
        while gi < glyphs.len() {
            let cluster = glyphs[gi].0.cluster as usize;
            let mut gj = gi + 1;
            while gj < glyphs.len() && glyphs[gj].0.cluster as usize == cluster {
                gj += 1;
            }
            let char_end = glyphs
                .get(gj)
                .map_or(text.len(), |(info, _)| (info.cluster as usize).max(cluster + 1))
                .min(text.len());
            if cluster >= text.len() {
                break;
            }

            let group = &glyphs[gi..gj];
            if group.len() == 1 && group[0].0.glyph_id == 0 {
                let (ch, _) = crate::unicode::char_at(text, cluster);
                word.set_missing_glyph(cluster, ch, ave_char_width);
            } else {
                let details: SmallVec<[DetailedGlyph; 4]> = group
                    .iter()
                    .map(|(info, pos)| DetailedGlyph {
                        glyph_id: info.glyph_id,
                        advance: (pos.x_advance as f64 * scale).round() as i32,
                        x_offset: (pos.x_offset as f64 * scale) as f32,
                        y_offset: -(pos.y_offset as f64 * scale) as f32,
                    })
                    .collect();
                store_glyphs(word, cluster, &details);
            }
            mark_ligature_continuations(word, cluster + 1, char_end, text);
            gi = gj;
        }
        true
    }
}

/// Per-character glyph mapping through the face's capability table, with
/// the in-memory face's ligatures and decompositions
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicShaper;

impl BasicShaper {
    fn scaled(advance: u16, scale: f64) -> i32 {
        (advance as f64 * scale).round() as i32
    }
}

impl Shaper for BasicShaper {
    fn shape_word(&self, font: &Font, word: &mut ShapedWord, text: &[u16]) -> bool {
        let Some(source) = font.entry().source() else {
            return false;
        };
        let Some(mapper) = source.mapper() else {
            return false;
        };
        let scale = font.adjusted_size() * word.app_units_per_dev_unit() as f64
            / source.units_per_em().max(1) as f64;
        let ave_char_width = font.metrics().ave_char_width;
        let virtual_face = source.as_virtual();

        // (offset, scalar value) for every character
        let mut chars: Vec<(usize, u32)> = Vec::with_capacity(text.len());
        let mut i = 0;
        while i < text.len() {
            let (ch, units) = crate::unicode::char_at(text, i);
            chars.push((i, ch));
            i += units;
        }
        let codes: Vec<u32> = chars.iter().map(|&(_, ch)| ch).collect();

        let mut ci = 0;
        while ci < chars.len() {
            let (offset, ch) = chars[ci];

            if let Some(face) = virtual_face.filter(|_| !word.disable_ligatures()) {
                if let Some((count, glyph)) = face.ligature_at(&codes[ci..]) {
                    let detail = DetailedGlyph {
                        glyph_id: glyph.id,
                        advance: Self::scaled(glyph.advance, scale),
                        ..Default::default()
                    };
                    store_glyphs(word, offset, &[detail]);
                    let end = chars.get(ci + count).map_or(text.len(), |&(o, _)| o);
                    mark_ligature_continuations(word, offset + 1, end, text);
                    ci += count;
                    continue;
                }
            }

            if let Some(parts) = virtual_face.and_then(|f| f.decomposition(ch)) {
                let details: SmallVec<[DetailedGlyph; 4]> = parts
                    .iter()
                    .map(|g| DetailedGlyph {
                        glyph_id: g.id,
                        advance: Self::scaled(g.advance, scale),
                        ..Default::default()
                    })
                    .collect();
                store_glyphs(word, offset, &details);
            } else if let Some(glyph) = mapper.glyph_index(ch) {
                let advance = mapper.glyph_advance(glyph).unwrap_or(0);
                let detail = DetailedGlyph {
                    glyph_id: glyph,
                    advance: Self::scaled(advance, scale),
                    ..Default::default()
                };
                store_glyphs(word, offset, &[detail]);
            } else {
                word.set_missing_glyph(offset, ch, ave_char_width);
            }
            ci += 1;
        }
        true
    }
}

/// Unscaled advance of `ch`, if the face maps it.
pub(crate) fn char_advance(mapper: &GlyphMapper<'_>, ch: u32) -> Option<(u32, u16)> {
    let glyph = mapper.glyph_index(ch)?;
    Some((glyph, mapper.glyph_advance(glyph).unwrap_or(0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_shapers() {
        let prefs = ShaperPrefs::default();
        let sfnt = FaceCaps {
            layout_tables: true,
            sfnt: true,
        };
        assert_eq!(
            select_shapers(Script::Latin, &[], sfnt, &prefs).as_slice(),
            &[ShaperKind::HarfBuzz, ShaperKind::Basic]
        );
        assert_eq!(
            select_shapers(Script::Latin, &[], FaceCaps::default(), &prefs).as_slice(),
            &[ShaperKind::Basic]
        );

        let arabic_only = ShaperPrefs {
            harfbuzz_scripts: ScriptFilter::Only([make_tag(b"Arab")].into_iter().collect()),
        };
        assert_eq!(
            select_shapers(Script::Latin, &[], sfnt, &arabic_only).as_slice(),
            &[ShaperKind::Basic]
        );
        assert_eq!(
            select_shapers(Script::Arabic, &[], sfnt, &arabic_only)[0],
            ShaperKind::HarfBuzz
        );
        // Explicit features need the generic shaper
        let features = [FontFeature::new(b"smcp", 1)];
        assert_eq!(
            select_shapers(Script::Latin, &features, sfnt, &arabic_only)[0],
            ShaperKind::HarfBuzz
        );
    }

    #[test]
    fn test_shaping_face_rejects_bad_data() {
        assert!(ShapingFace::parse(Rc::from(vec![0u8; 16]), 0).is_none());
        assert!(ShapingFace::parse(Rc::from(Vec::new()), 0).is_none());
    }

    #[test]
    fn test_merge_font_features() {
        let style = [FontFeature::new(b"kern", 0), FontFeature::new(b"liga", 1)];
        let merged = merge_font_features(&style, true);
        assert_eq!(
            merged,
            vec![
                FontFeature::new(b"liga", 1),
                FontFeature::new(b"clig", 0),
                FontFeature::new(b"kern", 0),
            ]
        );
        assert!(merge_font_features(&[], false).is_empty());
    }

    #[test]
    fn test_prefs_from_config() {
        let config = TextConfig {
            harfbuzz_scripts: vec!["Arab".into(), "Hebr".into(), "bad".into()],
            ..Default::default()
        };
        let prefs = ShaperPrefs::from_config(&config);
        assert!(prefs.harfbuzz_scripts.contains(Script::Hebrew));
        assert!(!prefs.harfbuzz_scripts.contains(Script::Latin));
    }
}
