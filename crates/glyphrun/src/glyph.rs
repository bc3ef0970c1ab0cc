//! Packed per-character glyph records
//!
//! Every character of a shaped word or text run owns one [`CompressedGlyph`].
//! In the common case (one glyph, small advance, small id, no offsets, starts
//! a cluster and a ligature group) everything fits in the 32-bit value. All
//! other characters store a glyph count in the record and keep the actual
//! glyphs in a [`DetailedGlyphStore`] indexed by character offset.

use crate::unicode::{is_cluster_extender, is_default_ignorable, is_low_surrogate, is_mark};
use std::cell::Cell;
use unicode_segmentation::UnicodeSegmentation;

// Shared by both forms.
const FLAG_IS_SIMPLE_GLYPH: u32 = 0x8000_0000;
const FLAGS_CAN_BREAK_BEFORE: u32 = 0x6000_0000;
const FLAGS_CAN_BREAK_SHIFT: u32 = 29;
const FLAG_CHAR_IS_SPACE: u32 = 0x1000_0000;

// Simple form.
const ADVANCE_MASK: u32 = 0x0FFF_0000;
const ADVANCE_SHIFT: u32 = 16;
const GLYPH_MASK: u32 = 0x0000_FFFF;

// Complex form.
const FLAG_NOT_MISSING: u32 = 0x01;
const FLAG_NOT_CLUSTER_START: u32 = 0x02;
const FLAG_NOT_LIGATURE_GROUP_START: u32 = 0x04;
const FLAG_CHAR_IS_TAB: u32 = 0x08;
const FLAG_CHAR_IS_NEWLINE: u32 = 0x10;
const FLAG_CHAR_IS_LOW_SURROGATE: u32 = 0x20;
const CHAR_IDENTITY_FLAGS_MASK: u32 = 0x38;
const GLYPH_COUNT_MASK: u32 = 0x00FF_FF00;
const GLYPH_COUNT_SHIFT: u32 = 8;

/// Largest advance, in app units, that fits in a simple glyph record.
pub const MAX_SIMPLE_ADVANCE: u32 = ADVANCE_MASK >> ADVANCE_SHIFT;

/// Largest glyph count a complex record can describe.
pub const MAX_GLYPH_COUNT: u32 = GLYPH_COUNT_MASK >> GLYPH_COUNT_SHIFT;

/// Kind of line-break opportunity before a character
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum BreakType {
    #[default]
    None = 0,
    Normal = 1,
    Hyphen = 2,
}

impl BreakType {
    fn from_bits(bits: u32) -> Self {
        match bits {
            1 => BreakType::Normal,
            2 => BreakType::Hyphen,
            _ => BreakType::None,
        }
    }
}

/// 32-bit glyph record for one character
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct CompressedGlyph(u32);

impl std::fmt::Debug for CompressedGlyph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_simple_glyph() {
            f.debug_struct("Simple")
                .field("glyph", &self.simple_glyph())
                .field("advance", &self.simple_advance())
                .field("break", &self.can_break_before())
                .finish()
        } else {
            f.debug_struct("Complex")
                .field("glyph_count", &self.glyph_count())
                .field("missing", &self.is_missing())
                .field("cluster_start", &self.is_cluster_start())
                .field("ligature_start", &self.is_ligature_group_start())
                .field("break", &self.can_break_before())
                .finish()
        }
    }
}

impl CompressedGlyph {
    /// An empty record: complex, no glyphs, starts a cluster and a ligature group.
    pub const fn new() -> Self {
        Self(0)
    }

    /// A simple glyph record. Both values must pass the `is_simple_*` checks.
    pub fn simple(advance: u32, glyph: u32) -> Self {
        let mut g = Self::new();
        g.set_simple_glyph(advance, glyph);
        g
    }

    /// A complex record with the given cluster/ligature state and glyph count.
    pub fn complex(cluster_start: bool, ligature_start: bool, glyph_count: u32) -> Self {
        let mut g = Self::new();
        g.set_complex(cluster_start, ligature_start, glyph_count);
        g
    }

    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_simple_glyph_id(glyph: u32) -> bool {
        (glyph & GLYPH_MASK) == glyph
    }

    #[inline]
    pub const fn is_simple_advance(advance: u32) -> bool {
        (advance & MAX_SIMPLE_ADVANCE) == advance
    }

    /// True when advance and glyph both fit in the simple form.
    #[inline]
    pub const fn can_be_simple(advance: u32, glyph: u32) -> bool {
        Self::is_simple_advance(advance) && Self::is_simple_glyph_id(glyph)
    }

    #[inline]
    pub fn is_simple_glyph(self) -> bool {
        self.0 & FLAG_IS_SIMPLE_GLYPH != 0
    }

    /// Advance in app units. Only meaningful for simple glyphs.
    #[inline]
    pub fn simple_advance(self) -> u32 {
        (self.0 & ADVANCE_MASK) >> ADVANCE_SHIFT
    }

    #[inline]
    pub fn simple_glyph(self) -> u32 {
        self.0 & GLYPH_MASK
    }

    pub fn is_missing(self) -> bool {
        self.0 & (FLAG_NOT_MISSING | FLAG_IS_SIMPLE_GLYPH) == 0
    }

    pub fn is_cluster_start(self) -> bool {
        self.is_simple_glyph() || self.0 & FLAG_NOT_CLUSTER_START == 0
    }

    pub fn is_ligature_group_start(self) -> bool {
        self.is_simple_glyph() || self.0 & FLAG_NOT_LIGATURE_GROUP_START == 0
    }

    pub fn is_ligature_continuation(self) -> bool {
        !self.is_simple_glyph()
            && self.0 & (FLAG_NOT_LIGATURE_GROUP_START | FLAG_NOT_MISSING)
                == (FLAG_NOT_LIGATURE_GROUP_START | FLAG_NOT_MISSING)
    }

    pub fn can_break_before(self) -> BreakType {
        BreakType::from_bits((self.0 & FLAGS_CAN_BREAK_BEFORE) >> FLAGS_CAN_BREAK_SHIFT)
    }

    pub fn char_is_space(self) -> bool {
        self.0 & FLAG_CHAR_IS_SPACE != 0
    }

    pub fn char_is_tab(self) -> bool {
        !self.is_simple_glyph() && self.0 & FLAG_CHAR_IS_TAB != 0
    }

    pub fn char_is_newline(self) -> bool {
        !self.is_simple_glyph() && self.0 & FLAG_CHAR_IS_NEWLINE != 0
    }

    pub fn char_is_low_surrogate(self) -> bool {
        !self.is_simple_glyph() && self.0 & FLAG_CHAR_IS_LOW_SURROGATE != 0
    }

    /// Number of detailed glyphs. Zero for simple records.
    pub fn glyph_count(self) -> u32 {
        if self.is_simple_glyph() {
            0
        } else {
            (self.0 & GLYPH_COUNT_MASK) >> GLYPH_COUNT_SHIFT
        }
    }

    fn char_identity_flags(self) -> u32 {
        if self.is_simple_glyph() {
            0
        } else {
            self.0 & CHAR_IDENTITY_FLAGS_MASK
        }
    }

    /// Stores a simple glyph, keeping the break and space flags.
    pub fn set_simple_glyph(&mut self, advance: u32, glyph: u32) -> &mut Self {
        debug_assert!(Self::is_simple_advance(advance), "advance too large");
        debug_assert!(Self::is_simple_glyph_id(glyph), "glyph id too large");
        self.0 = (self.0 & (FLAGS_CAN_BREAK_BEFORE | FLAG_CHAR_IS_SPACE))
            | FLAG_IS_SIMPLE_GLYPH
            | ((advance & MAX_SIMPLE_ADVANCE) << ADVANCE_SHIFT)
            | (glyph & GLYPH_MASK);
        self
    }

    /// Switches to the complex form, keeping break, space and identity flags.
    pub fn set_complex(
        &mut self,
        cluster_start: bool,
        ligature_start: bool,
        glyph_count: u32,
    ) -> &mut Self {
        debug_assert!(glyph_count <= MAX_GLYPH_COUNT);
        self.0 = (self.0 & (FLAGS_CAN_BREAK_BEFORE | FLAG_CHAR_IS_SPACE))
            | FLAG_NOT_MISSING
            | self.char_identity_flags()
            | if cluster_start { 0 } else { FLAG_NOT_CLUSTER_START }
            | if ligature_start { 0 } else { FLAG_NOT_LIGATURE_GROUP_START }
            | ((glyph_count << GLYPH_COUNT_SHIFT) & GLYPH_COUNT_MASK);
        self
    }

    /// Marks the character as missing. A missing glyph always starts a
    /// ligature group; cluster membership is preserved.
    pub fn set_missing(&mut self, glyph_count: u32) -> &mut Self {
        let cluster = if self.is_simple_glyph() {
            0
        } else {
            self.0 & FLAG_NOT_CLUSTER_START
        };
        self.0 = (self.0 & (FLAGS_CAN_BREAK_BEFORE | FLAG_CHAR_IS_SPACE))
            | cluster
            | self.char_identity_flags()
            | ((glyph_count << GLYPH_COUNT_SHIFT) & GLYPH_COUNT_MASK);
        self
    }

    /// Sets the break opportunity and returns the bits that changed.
    pub fn set_can_break_before(&mut self, break_type: BreakType) -> u32 {
        let mask = (break_type as u32) << FLAGS_CAN_BREAK_SHIFT;
        let toggle = mask ^ (self.0 & FLAGS_CAN_BREAK_BEFORE);
        self.0 ^= toggle;
        toggle
    }

    pub fn set_is_space(&mut self) {
        self.0 |= FLAG_CHAR_IS_SPACE;
    }

    pub fn set_is_tab(&mut self) {
        debug_assert!(!self.is_simple_glyph());
        self.0 |= FLAG_CHAR_IS_TAB;
    }

    pub fn set_is_newline(&mut self) {
        debug_assert!(!self.is_simple_glyph());
        self.0 |= FLAG_CHAR_IS_NEWLINE;
    }

    pub fn set_is_low_surrogate(&mut self) {
        debug_assert!(!self.is_simple_glyph());
        self.0 |= FLAG_CHAR_IS_LOW_SURROGATE;
    }
}

/// One glyph of a character that does not fit the simple form
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DetailedGlyph {
    /// Glyph id, or the Unicode character when the record is missing
    pub glyph_id: u32,
    /// Advance in app units
    pub advance: i32,
    /// Offsets in app units
    pub x_offset: f32,
    pub y_offset: f32,
}

#[derive(Debug, Clone, Copy)]
struct DetailRecord {
    offset: u32,
    index: u32,
    count: u32,
}

/// Overflow storage for detailed glyphs, keyed by character offset
///
/// Glyphs are normally allocated in increasing offset order, so the offset
/// table is appended to; out-of-order allocations are inserted sorted.
/// Lookups remember the last record used, which makes sequential scans cheap.
#[derive(Debug, Default)]
pub struct DetailedGlyphStore {
    details: Vec<DetailedGlyph>,
    offset_to_index: Vec<DetailRecord>,
    last_used: Cell<usize>,
}

impl Clone for DetailedGlyphStore {
    fn clone(&self) -> Self {
        Self {
            details: self.details.clone(),
            offset_to_index: self.offset_to_index.clone(),
            last_used: Cell::new(0),
        }
    }
}

impl DetailedGlyphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `count` glyphs for the character at `offset` and returns them
    /// zeroed. Reallocating an offset replaces its glyphs, reusing their
    /// storage when it is large enough or at the end of the store. Returns
    /// `None` if the allocation fails.
    pub fn allocate(&mut self, offset: u32, count: u32) -> Option<&mut [DetailedGlyph]> {
        let existing = self.find(offset);
        if let Some(pos) = existing {
            let rec = self.offset_to_index[pos];
            let start = rec.index as usize;
            if count <= rec.count {
                self.offset_to_index[pos].count = count;
                let glyphs = &mut self.details[start..start + count as usize];
                glyphs.fill(DetailedGlyph::default());
                return Some(glyphs);
            }
            if start + rec.count as usize == self.details.len() {
                self.details.truncate(start);
            }
        }

        let index = self.details.len();
        self.details.try_reserve(count as usize).ok()?;
        self.details
            .resize(index + count as usize, DetailedGlyph::default());
        let record = DetailRecord {
            offset,
            index: index as u32,
            count,
        };

        if let Some(pos) = existing {
            self.offset_to_index[pos] = record;
        } else if self
            .offset_to_index
            .last()
            .map_or(true, |last| offset > last.offset)
        {
            self.offset_to_index.try_reserve(1).ok()?;
            self.offset_to_index.push(record);
        } else {
            let pos = self
                .offset_to_index
                .partition_point(|r| r.offset < offset);
            self.offset_to_index.try_reserve(1).ok()?;
            self.offset_to_index.insert(pos, record);
        }
        Some(&mut self.details[index..])
    }

    fn find(&self, offset: u32) -> Option<usize> {
        let table = &self.offset_to_index;
        if table.is_empty() {
            return None;
        }
        let last = self.last_used.get().min(table.len() - 1);
        let pos = if last + 1 < table.len() && table[last + 1].offset == offset {
            last + 1
        } else if table[0].offset == offset {
            0
        } else if table[last].offset == offset {
            last
        } else if last > 0 && table[last - 1].offset == offset {
            last - 1
        } else {
            table.binary_search_by_key(&offset, |r| r.offset).ok()?
        };
        self.last_used.set(pos);
        Some(pos)
    }

    /// Glyphs stored for the character at `offset`
    pub fn get(&self, offset: u32) -> Option<&[DetailedGlyph]> {
        let rec = self.offset_to_index[self.find(offset)?];
        let start = rec.index as usize;
        Some(&self.details[start..start + rec.count as usize])
    }

    pub fn get_mut(&mut self, offset: u32) -> Option<&mut [DetailedGlyph]> {
        let rec = self.offset_to_index[self.find(offset)?];
        let start = rec.index as usize;
        Some(&mut self.details[start..start + rec.count as usize])
    }

    pub fn is_empty(&self) -> bool {
        self.offset_to_index.is_empty()
    }

    pub fn size_of_excluding_this(&self) -> usize {
        self.details.capacity() * std::mem::size_of::<DetailedGlyph>()
            + self.offset_to_index.capacity() * std::mem::size_of::<DetailRecord>()
    }

    pub fn size_of_including_this(&self) -> usize {
        std::mem::size_of::<Self>() + self.size_of_excluding_this()
    }
}

/// Marks every character that does not start an extended grapheme cluster.
///
/// Runs once when a word or text run is created, before any glyph data is
/// stored, so shapers and line breaking can rely on cluster starts.
pub fn setup_cluster_boundaries(glyphs: &mut [CompressedGlyph], text: &[u16]) {
    debug_assert!(glyphs.len() >= text.len());
    if text.is_empty() {
        return;
    }
    let extend = CompressedGlyph::complex(false, true, 0);

    // Clusters are found on a UTF-8 copy; remember where each char came from.
    let mut utf8 = String::with_capacity(text.len());
    let mut char_starts: Vec<(usize, usize, usize)> = Vec::with_capacity(text.len());
    let mut pos16 = 0;
    for decoded in char::decode_utf16(text.iter().copied()) {
        let (ch, units) = match decoded {
            Ok(c) => (c, c.len_utf16()),
            Err(_) => (char::REPLACEMENT_CHARACTER, 1),
        };
        char_starts.push((utf8.len(), pos16, units));
        utf8.push(ch);
        pos16 += units;
    }

    let mut boundaries = utf8.grapheme_indices(true).map(|(b, _)| b).peekable();
    for &(byte, index, units) in &char_starts {
        while boundaries.peek().is_some_and(|&b| b < byte) {
            boundaries.next();
        }
        let starts_cluster = boundaries.peek() == Some(&byte);
        if !starts_cluster {
            glyphs[index] = extend;
        }
        if units == 2 {
            glyphs[index + 1] = extend;
            glyphs[index + 1].set_is_low_surrogate();
        }
    }

    // Segmentation cannot tell that the text itself begins mid-cluster.
    if is_cluster_extender(text[0] as u32) && !is_low_surrogate(text[0] as u32) {
        glyphs[0] = extend;
    }
}

/// Width in device pixels of the hex box drawn for a missing character.
/// Scaled so the box keeps its CSS-pixel size at any resolution.
pub fn missing_glyph_min_width(ch: u32, app_units_per_dev_unit: u32) -> f64 {
    // inset, border, gap, two or three digit columns, gap, border, inset
    let columns: f64 = if ch < 0x10000 { 2.0 } else { 3.0 };
    let width = 1.0 + 1.0 + 1.0 + columns * 4.0 - 1.0 + 1.0 + 1.0 + 1.0;
    width * crate::APP_UNITS_PER_CSS_PIXEL as f64 / app_units_per_dev_unit.max(1) as f64
}

/// Per-character glyph records plus their detailed overflow
///
/// Shared storage for shaped words and text runs.
#[derive(Debug, Clone, Default)]
pub struct GlyphBuffer {
    glyphs: Vec<CompressedGlyph>,
    details: Option<Box<DetailedGlyphStore>>,
}

impl GlyphBuffer {
    /// `len` empty records, or `None` if the allocation fails.
    pub fn try_new(len: usize) -> Option<Self> {
        let mut glyphs = Vec::new();
        glyphs.try_reserve_exact(len).ok()?;
        glyphs.resize(len, CompressedGlyph::new());
        Some(Self {
            glyphs,
            details: None,
        })
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    pub fn glyphs(&self) -> &[CompressedGlyph] {
        &self.glyphs
    }

    pub fn glyphs_mut(&mut self) -> &mut [CompressedGlyph] {
        &mut self.glyphs
    }

    pub fn has_detailed_glyphs(&self) -> bool {
        self.details.as_ref().is_some_and(|d| !d.is_empty())
    }

    /// Detailed glyphs of a complex record with a non-zero glyph count
    pub fn detailed_glyphs(&self, offset: usize) -> Option<&[DetailedGlyph]> {
        let g = self.glyphs.get(offset)?;
        if g.is_simple_glyph() || g.glyph_count() == 0 {
            return None;
        }
        self.details.as_ref()?.get(offset as u32)
    }

    pub fn allocate_detailed_glyphs(
        &mut self,
        offset: usize,
        count: u32,
    ) -> Option<&mut [DetailedGlyph]> {
        self.details
            .get_or_insert_with(Default::default)
            .allocate(offset as u32, count)
    }

    /// Stores a simple glyph. The break and space flags of the record survive.
    pub fn set_simple_glyph(&mut self, offset: usize, advance: u32, glyph: u32) {
        self.glyphs[offset].set_simple_glyph(advance, glyph);
    }

    /// Replaces the record at `offset`, copying `glyph.glyph_count()` entries
    /// of `details` into the overflow store.
    pub fn set_glyphs(&mut self, offset: usize, glyph: CompressedGlyph, details: &[DetailedGlyph]) {
        let count = glyph.glyph_count() as usize;
        if count > 0 {
            let Some(dst) = self.allocate_detailed_glyphs(offset, count as u32) else {
                return;
            };
            let n = count.min(details.len());
            dst[..n].copy_from_slice(&details[..n]);
        }
        self.glyphs[offset] = glyph;
    }

    /// Records `ch` as missing at `offset`: one detailed glyph carrying the
    /// character, wide enough for a hex box unless the character is
    /// default-ignorable.
    pub fn set_missing_glyph(
        &mut self,
        offset: usize,
        ch: u32,
        ave_char_width: f64,
        app_units_per_dev_unit: u32,
    ) {
        if is_mark(ch) {
            self.glyphs[offset].set_complex(false, true, 0);
        }
        let advance = if is_default_ignorable(ch) {
            0
        } else {
            let width = ave_char_width.max(missing_glyph_min_width(ch, app_units_per_dev_unit));
            (width * app_units_per_dev_unit as f64) as i32
        };
        let Some(details) = self.allocate_detailed_glyphs(offset, 1) else {
            return;
        };
        details[0] = DetailedGlyph {
            glyph_id: ch,
            advance,
            x_offset: 0.0,
            y_offset: 0.0,
        };
        self.glyphs[offset].set_missing(1);
    }

    /// Copies `len` records of `src` starting at `src_start` to `dest`.
    pub fn copy_from(&mut self, src: &GlyphBuffer, src_start: usize, len: usize, dest: usize) {
        let src_glyphs = &src.glyphs[src_start..src_start + len];
        if !src.has_detailed_glyphs() {
            self.glyphs[dest..dest + len].copy_from_slice(src_glyphs);
            return;
        }
        for (i, &g) in src_glyphs.iter().enumerate() {
            if g.is_simple_glyph() {
                self.glyphs[dest + i] = g;
            } else {
                let details = src.detailed_glyphs(src_start + i).unwrap_or(&[]);
                self.set_glyphs(dest + i, g, details);
            }
        }
    }

    /// Widens the last glyph of every cluster by `offset` app units.
    pub fn adjust_advances_for_synthetic_bold(&mut self, offset: i32) {
        for i in 0..self.glyphs.len() {
            let g = self.glyphs[i];
            if g.is_simple_glyph() {
                let advance = g.simple_advance() as i32 + offset;
                if advance >= 0 && CompressedGlyph::is_simple_advance(advance as u32) {
                    self.glyphs[i].set_simple_glyph(advance as u32, g.simple_glyph());
                } else {
                    let detail = DetailedGlyph {
                        glyph_id: g.simple_glyph(),
                        advance,
                        x_offset: 0.0,
                        y_offset: 0.0,
                    };
                    let mut complex = g;
                    complex.set_complex(true, true, 1);
                    self.set_glyphs(i, complex, &[detail]);
                }
            } else if g.glyph_count() > 0 && !g.is_missing() {
                if let Some(last) = self
                    .details
                    .as_mut()
                    .and_then(|d| d.get_mut(i as u32))
                    .and_then(|d| d.last_mut())
                {
                    last.advance += offset;
                }
            }
        }
    }

    /// Number of missing-glyph records in `start..start + len`
    pub fn count_missing_glyphs(&self, start: usize, len: usize) -> usize {
        self.glyphs[start..start + len]
            .iter()
            .filter(|g| g.is_missing() && g.glyph_count() > 0)
            .count()
    }

    pub fn size_of_excluding_this(&self) -> usize {
        self.glyphs.capacity() * std::mem::size_of::<CompressedGlyph>()
            + self
                .details
                .as_ref()
                .map_or(0, |d| d.size_of_including_this())
    }
}
