//! Font face backends
//!
//! A [`FaceSource`] is the physical data behind a font entry. Two backends
//! exist:
//! - [`SfntFace`]: TrueType/OpenType data parsed with ttf-parser and shaped
//!   with rustybuzz
//! - [`VirtualFace`]: a face described entirely in memory (metrics, glyph
//!   table, ligatures), used for headless layout and as a last-resort font
//!
//! Everything the rest of the crate needs from a face goes through the
//! capability methods here: glyph lookup, advances, extents, raw tables and
//! character coverage.

use crate::charmap::CharacterMap;
use crate::metrics::Rect;
use crate::{Result, TextError};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::rc::Rc;
use ttf_parser::{GlyphId, Tag};

/// Unscaled face metrics, in font units
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawMetrics {
    pub units_per_em: u16,
    pub ascender: i16,
    /// Negative below the baseline
    pub descender: i16,
    pub line_gap: i16,
    pub x_height: Option<i16>,
    pub avg_char_width: Option<i16>,
    pub max_advance: u16,
    /// `(position, thickness)`
    pub underline: Option<(i16, i16)>,
    /// `(position, thickness)`
    pub strikeout: Option<(i16, i16)>,
    pub superscript_offset: Option<i16>,
    pub subscript_offset: Option<i16>,
}

/// What a face can do; drives shaper selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaceCaps {
    /// The face has OpenType layout tables (GSUB/GPOS) for the generic shaper
    pub layout_tables: bool,
    /// The face is sfnt data the generic shaper can parse
    pub sfnt: bool,
}

/// Face attributes read from the font data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceDescriptor {
    pub family: String,
    pub name: String,
    pub weight: u16,
    pub stretch: i16,
    pub italic: bool,
    pub fixed_pitch: bool,
}

/// sfnt font data and the attributes read from it at load time
#[derive(Debug, Clone)]
pub struct SfntFace {
    data: Rc<[u8]>,
    index: u32,
    metrics: RawMetrics,
    descriptor: FaceDescriptor,
    caps: FaceCaps,
}

impl SfntFace {
    /// Parses and validates face `index` of `data`.
    pub fn new(data: Rc<[u8]>, index: u32) -> Result<Self> {
        let face = ttf_parser::Face::parse(&data, index)
            .map_err(|e| TextError::FontParseError(e.to_string()))?;

        let units_per_em = face.units_per_em();
        if units_per_em == 0 {
            return Err(TextError::InvalidFontData);
        }

        let bbox = face.global_bounding_box();
        // OS/2 xAvgCharWidth is the int16 at offset 2
        let avg_char_width = face
            .raw_face()
            .table(Tag::from_bytes(b"OS/2"))
            .and_then(|os2| os2.get(2..4))
            .map(|b| i16::from_be_bytes([b[0], b[1]]));
        let metrics = RawMetrics {
            units_per_em,
            ascender: face.ascender(),
            descender: face.descender(),
            line_gap: face.line_gap(),
            x_height: face.x_height(),
            avg_char_width,
            max_advance: (bbox.x_max as i32 - bbox.x_min as i32).clamp(0, u16::MAX as i32) as u16,
            underline: face
                .underline_metrics()
                .map(|m| (m.position, m.thickness)),
            strikeout: face
                .strikeout_metrics()
                .map(|m| (m.position, m.thickness)),
            superscript_offset: face.superscript_metrics().map(|m| m.y_offset),
            subscript_offset: face.subscript_metrics().map(|m| m.y_offset),
        };

        let family = face
            .names()
            .into_iter()
            .filter(|n| n.name_id == ttf_parser::name_id::FAMILY)
            .find_map(|n| n.to_string())
            .unwrap_or_default();
        let name = face
            .names()
            .into_iter()
            .filter(|n| n.name_id == ttf_parser::name_id::FULL_NAME)
            .find_map(|n| n.to_string())
            .unwrap_or_else(|| family.clone());

        let descriptor = FaceDescriptor {
            family,
            name,
            weight: face.weight().to_number(),
            stretch: face.width().to_number() as i16 - 5,
            italic: face.is_italic() || face.is_oblique(),
            fixed_pitch: face.is_monospaced(),
        };

        let raw = face.raw_face();
        let caps = FaceCaps {
            layout_tables: raw.table(Tag::from_bytes(b"GSUB")).is_some()
                || raw.table(Tag::from_bytes(b"GPOS")).is_some(),
            sfnt: true,
        };

        Ok(Self {
            data,
            index,
            metrics,
            descriptor,
            caps,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Another handle to the font bytes
    pub fn shared_data(&self) -> Rc<[u8]> {
        Rc::clone(&self.data)
    }

    fn parse(&self) -> Option<ttf_parser::Face<'_>> {
        ttf_parser::Face::parse(&self.data, self.index).ok()
    }
}

/// One glyph of a [`VirtualFace`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualGlyph {
    pub id: u32,
    /// Advance in font units
    pub advance: u16,
    /// Ink extents in font units, y up: `(x_min, y_min, x_max, y_max)`
    pub bounds: Option<(i16, i16, i16, i16)>,
}

impl VirtualGlyph {
    pub fn new(id: u32, advance: u16) -> Self {
        Self {
            id,
            advance,
            bounds: None,
        }
    }

    pub fn with_bounds(mut self, x_min: i16, y_min: i16, x_max: i16, y_max: i16) -> Self {
        self.bounds = Some((x_min, y_min, x_max, y_max));
        self
    }
}

/// A face described in memory
#[derive(Debug, Clone)]
pub struct VirtualFace {
    descriptor: FaceDescriptor,
    metrics: RawMetrics,
    chars: FxHashMap<u32, VirtualGlyph>,
    glyphs: FxHashMap<u32, VirtualGlyph>,
    ligatures: Vec<(Vec<u32>, VirtualGlyph)>,
    decompositions: FxHashMap<u32, SmallVec<[VirtualGlyph; 2]>>,
    tables: FxHashMap<u32, Vec<u8>>,
}

impl VirtualFace {
    pub fn new(family: impl Into<String>, metrics: RawMetrics) -> Self {
        let family = family.into();
        Self {
            descriptor: FaceDescriptor {
                name: family.clone(),
                family,
                weight: 400,
                stretch: 0,
                italic: false,
                fixed_pitch: false,
            },
            metrics,
            chars: FxHashMap::default(),
            glyphs: FxHashMap::default(),
            ligatures: Vec::new(),
            decompositions: FxHashMap::default(),
            tables: FxHashMap::default(),
        }
    }

    /// A face with 1000 units per em where every printable ASCII character
    /// has glyph id `ch` and the given advance.
    pub fn ascii(family: impl Into<String>, advance: u16) -> Self {
        let metrics = RawMetrics {
            units_per_em: 1000,
            ascender: 800,
            descender: -200,
            line_gap: 0,
            x_height: Some(500),
            avg_char_width: Some(advance as i16),
            max_advance: advance,
            underline: Some((-100, 50)),
            strikeout: Some((250, 50)),
            superscript_offset: None,
            subscript_offset: None,
        };
        Self::new(family, metrics).with_char_range(0x20, 0x7E, advance)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.descriptor.name = name.into();
        self
    }

    pub fn with_weight(mut self, weight: u16) -> Self {
        self.descriptor.weight = weight;
        self
    }

    pub fn with_stretch(mut self, stretch: i16) -> Self {
        self.descriptor.stretch = stretch;
        self
    }

    pub fn with_italic(mut self, italic: bool) -> Self {
        self.descriptor.italic = italic;
        self
    }

    pub fn with_fixed_pitch(mut self, fixed_pitch: bool) -> Self {
        self.descriptor.fixed_pitch = fixed_pitch;
        self
    }

    /// Maps `ch` to `glyph`.
    pub fn with_glyph(mut self, ch: char, glyph: VirtualGlyph) -> Self {
        self.chars.insert(ch as u32, glyph);
        self.glyphs.insert(glyph.id, glyph);
        self
    }

    /// Maps every character in `first..=last` to glyph id = code point.
    pub fn with_char_range(mut self, first: u32, last: u32, advance: u16) -> Self {
        for ch in first..=last {
            let glyph = VirtualGlyph::new(ch, advance);
            self.chars.insert(ch, glyph);
            self.glyphs.insert(ch, glyph);
        }
        self
    }

    /// Substitutes one glyph for the character sequence `text`.
    pub fn with_ligature(mut self, text: &str, glyph: VirtualGlyph) -> Self {
        self.glyphs.insert(glyph.id, glyph);
        self.ligatures
            .push((text.chars().map(|c| c as u32).collect(), glyph));
        // Longest sequences are tried first
        self.ligatures.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        self
    }

    /// Renders `ch` with several glyphs.
    pub fn with_decomposition(mut self, ch: char, glyphs: &[VirtualGlyph]) -> Self {
        for g in glyphs {
            self.glyphs.insert(g.id, *g);
        }
        self.decompositions.insert(ch as u32, glyphs.iter().copied().collect());
        self
    }

    pub fn with_table(mut self, tag: &[u8; 4], data: Vec<u8>) -> Self {
        self.tables.insert(u32::from_be_bytes(*tag), data);
        self
    }

    /// Longest ligature starting at `chars[0]`: `(chars consumed, glyph)`.
    pub fn ligature_at(&self, chars: &[u32]) -> Option<(usize, VirtualGlyph)> {
        self.ligatures
            .iter()
            .find(|(seq, _)| seq.len() > 1 && chars.starts_with(seq))
            .map(|(seq, glyph)| (seq.len(), *glyph))
    }

    pub fn decomposition(&self, ch: u32) -> Option<&[VirtualGlyph]> {
        self.decompositions.get(&ch).map(|g| g.as_slice())
    }
}

/// Per-call glyph lookups; holds a parsed sfnt face for the duration.
pub enum GlyphMapper<'a> {
    Sfnt(ttf_parser::Face<'a>),
    Virtual(&'a VirtualFace),
}

impl GlyphMapper<'_> {
    pub fn glyph_index(&self, ch: u32) -> Option<u32> {
        match self {
            GlyphMapper::Sfnt(face) => {
                let c = char::from_u32(ch)?;
                face.glyph_index(c).map(|g| g.0 as u32)
            }
            GlyphMapper::Virtual(face) => face.chars.get(&ch).map(|g| g.id),
        }
    }

    /// Advance in font units
    pub fn glyph_advance(&self, glyph: u32) -> Option<u16> {
        match self {
            GlyphMapper::Sfnt(face) => {
                let id = u16::try_from(glyph).ok()?;
                face.glyph_hor_advance(GlyphId(id))
            }
            GlyphMapper::Virtual(face) => face.glyphs.get(&glyph).map(|g| g.advance),
        }
    }

    /// Ink extents in font units, y down (top is negative)
    pub fn glyph_bounds(&self, glyph: u32) -> Option<Rect> {
        let (x_min, y_min, x_max, y_max) = match self {
            GlyphMapper::Sfnt(face) => {
                let id = u16::try_from(glyph).ok()?;
                let r = face.glyph_bounding_box(GlyphId(id))?;
                (r.x_min, r.y_min, r.x_max, r.y_max)
            }
            GlyphMapper::Virtual(face) => face.glyphs.get(&glyph)?.bounds?,
        };
        Some(Rect::new(
            x_min as f64,
            -(y_max as f64),
            (x_max as f64 - x_min as f64).max(0.0),
            (y_max as f64 - y_min as f64).max(0.0),
        ))
    }
}

/// Physical face data for a font entry
#[derive(Debug, Clone)]
pub enum FaceSource {
    Sfnt(SfntFace),
    Virtual(VirtualFace),
}

impl FaceSource {
    /// Parses sfnt data.
    pub fn from_bytes(data: impl Into<Rc<[u8]>>, index: u32) -> Result<Self> {
        Ok(FaceSource::Sfnt(SfntFace::new(data.into(), index)?))
    }

    pub fn caps(&self) -> FaceCaps {
        match self {
            FaceSource::Sfnt(face) => face.caps,
            FaceSource::Virtual(_) => FaceCaps::default(),
        }
    }

    pub fn raw_metrics(&self) -> &RawMetrics {
        match self {
            FaceSource::Sfnt(face) => &face.metrics,
            FaceSource::Virtual(face) => &face.metrics,
        }
    }

    pub fn units_per_em(&self) -> u16 {
        self.raw_metrics().units_per_em
    }

    pub fn descriptor(&self) -> &FaceDescriptor {
        match self {
            FaceSource::Sfnt(face) => &face.descriptor,
            FaceSource::Virtual(face) => &face.descriptor,
        }
    }

    pub fn as_sfnt(&self) -> Option<&SfntFace> {
        match self {
            FaceSource::Sfnt(face) => Some(face),
            FaceSource::Virtual(_) => None,
        }
    }

    pub fn as_virtual(&self) -> Option<&VirtualFace> {
        match self {
            FaceSource::Virtual(face) => Some(face),
            FaceSource::Sfnt(_) => None,
        }
    }

    /// Glyph lookups for one shaping or measuring pass
    pub fn mapper(&self) -> Option<GlyphMapper<'_>> {
        match self {
            FaceSource::Sfnt(face) => face.parse().map(GlyphMapper::Sfnt),
            FaceSource::Virtual(face) => Some(GlyphMapper::Virtual(face)),
        }
    }

    /// Copy of the raw table `tag`, if present
    pub fn table(&self, tag: u32) -> Option<Vec<u8>> {
        match self {
            FaceSource::Sfnt(face) => {
                let parsed = face.parse()?;
                parsed
                    .raw_face()
                    .table(Tag(tag))
                    .map(|data| data.to_vec())
            }
            FaceSource::Virtual(face) => face.tables.get(&tag).cloned(),
        }
    }

    /// Adds every code point the face maps to `map`.
    pub fn fill_char_map(&self, map: &mut CharacterMap) {
        match self {
            FaceSource::Sfnt(face) => {
                let Some(parsed) = face.parse() else {
                    return;
                };
                let Some(cmap) = parsed.tables().cmap else {
                    return;
                };
                for subtable in cmap.subtables {
                    if subtable.is_unicode() {
                        subtable.codepoints(|cp| map.set(cp));
                    }
                }
            }
            FaceSource::Virtual(face) => {
                for &ch in face.chars.keys() {
                    map.set(ch);
                }
                for &ch in face.decompositions.keys() {
                    map.set(ch);
                }
            }
        }
        map.compact();
    }

    /// Heap size owned by this source. sfnt data is shared and not counted.
    pub fn size_of_excluding_this(&self) -> usize {
        match self {
            FaceSource::Sfnt(_) => 0,
            FaceSource::Virtual(face) => {
                face.chars.capacity() * std::mem::size_of::<(u32, VirtualGlyph)>()
                    + face.glyphs.capacity() * std::mem::size_of::<(u32, VirtualGlyph)>()
                    + face.tables.values().map(Vec::capacity).sum::<usize>()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_lookup() {
        let face = FaceSource::Virtual(
            VirtualFace::ascii("Test", 500)
                .with_glyph('é', VirtualGlyph::new(300, 500).with_bounds(0, 0, 400, 700)),
        );
        let mapper = face.mapper().unwrap();
        assert_eq!(mapper.glyph_index('A' as u32), Some('A' as u32));
        assert_eq!(mapper.glyph_index(0x4E00), None);
        assert_eq!(mapper.glyph_advance('A' as u32), Some(500));
        let bounds = mapper.glyph_bounds(300).unwrap();
        assert_eq!(bounds, Rect::new(0.0, -700.0, 400.0, 700.0));
    }

    #[test]
    fn test_virtual_ligature_prefers_longest() {
        let face = VirtualFace::ascii("Test", 500)
            .with_ligature("fi", VirtualGlyph::new(1000, 550))
            .with_ligature("ffi", VirtualGlyph::new(1001, 800));
        let text: Vec<u32> = "ffix".chars().map(|c| c as u32).collect();
        assert_eq!(face.ligature_at(&text).map(|(n, g)| (n, g.id)), Some((3, 1001)));
        assert_eq!(face.ligature_at(&text[1..]).map(|(n, g)| (n, g.id)), Some((2, 1000)));
        assert!(face.ligature_at(&text[3..]).is_none());
    }

    #[test]
    fn test_char_map() {
        let face = FaceSource::Virtual(VirtualFace::ascii("Test", 500));
        let mut map = CharacterMap::new();
        face.fill_char_map(&mut map);
        assert!(map.test('a' as u32));
        assert!(!map.test(0x7F));
        assert_eq!(map.count(), 0x7E - 0x20 + 1);
    }

    #[test]
    fn test_garbage_is_not_a_face() {
        let result = FaceSource::from_bytes(vec![0u8; 16], 0);
        assert!(result.is_err());
    }
}
