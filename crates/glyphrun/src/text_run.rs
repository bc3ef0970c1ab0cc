//! Text runs
//!
//! A [`TextRun`] holds one glyph record per code unit of a laid-out string,
//! split into [`GlyphRun`]s that each name the font used for their span.
//! Glyph data is normally copied in from the fonts' shaped-word caches.
//!
//! Measurement and drawing walk the requested range glyph run by glyph run,
//! then split off partial ligatures at either end. A ligature is divided
//! between its clusters in equal integer shares, with the rounding left over
//! given to the last part, so measuring adjacent ranges always adds up to
//! measuring their union.

use crate::font::Font;
use crate::font_cache::FontRef;
use crate::glyph::{
    setup_cluster_boundaries, BreakType, CompressedGlyph, DetailedGlyph, GlyphBuffer,
};
use crate::metrics::{BoundingBoxType, Rect, RunMetrics, Spacing};
use crate::shaped_word::{ShapedWord, WordKey, WordText};
use crate::shaper::ShaperPrefs;
use crate::unicode::hash_mix;
use bitflags::bitflags;
use smallvec::SmallVec;
use unicode_script::Script;

bitflags! {
    /// Flags describing a text run and how it was built
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextRunFlags: u32 {
        /// The caller guarantees the text outlives the run
        const PERSISTENT = 0x0001;
        /// Every character is ASCII
        const IS_ASCII = 0x0002;
        const IS_RTL = 0x0004;
        /// The property provider may return non-zero spacing
        const ENABLE_SPACING = 0x0008;
        /// Manual hyphenation points are honored
        const ENABLE_HYPHEN_BREAKS = 0x0010;
        /// Text is stored as Latin-1
        const IS_8BIT = 0x0020;
        /// Glyph extents are needed even for loose bounding boxes
        const NEED_BOUNDING_BOX = 0x0040;
        const DISABLE_OPTIONAL_LIGATURES = 0x0080;
        const OPTIMIZE_SPEED = 0x0100;
        /// Set while a memory report has already counted this run
        const RUN_SIZE_ACCOUNTED = 0x0200;
        /// Seed break opportunities from the Unicode line breaking rules
        const COMPUTE_LINE_BREAKS = 0x0001_0000;
    }
}

/// Construction parameters of a text run
#[derive(Debug, Clone, Default)]
pub struct TextRunParams {
    pub app_units_per_dev_unit: u32,
    /// Offsets with a normal break opportunity before them
    pub initial_breaks: Vec<usize>,
}

impl TextRunParams {
    pub fn new(app_units_per_dev_unit: u32) -> Self {
        Self {
            app_units_per_dev_unit,
            initial_breaks: Vec::new(),
        }
    }
}

/// How the font of a glyph run was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MatchType {
    /// One of the group's own families
    #[default]
    FontGroup,
    /// A family from the language preference lists
    PrefsFallback,
    /// The global system search
    SystemFallback,
}

/// A span of the run drawn with one font. The span ends where the next
/// glyph run starts.
#[derive(Debug, Clone)]
pub struct GlyphRun {
    pub font: FontRef,
    pub char_offset: usize,
    pub match_type: MatchType,
}

/// Hyphenation setting of the content being laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HyphensOption {
    None,
    #[default]
    Manual,
    Auto,
}

/// Priority of the break a line was ended at
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum BreakPriority {
    #[default]
    NoBreak,
    /// A break between arbitrary clusters, allowed by `word-wrap`
    WordWrap,
    Normal,
}

/// Layout data the run asks for while measuring and breaking
pub trait PropertyProvider {
    /// Fills `break_before` for `start..start + len`. Entries not at a
    /// cluster start are ignored.
    fn hyphenation_breaks(&self, start: usize, len: usize, break_before: &mut [bool]);

    fn hyphens_option(&self) -> HyphensOption;

    /// Extra width, in app units, taken by a hyphen. Constant per run.
    fn hyphen_width(&self) -> f64;

    /// Fills `spacing` for `start..start + len`. Spacing must be zero
    /// inside clusters.
    fn spacing(&self, start: usize, len: usize, spacing: &mut [Spacing]);
}

/// How glyphs are painted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrawMode {
    #[default]
    Fill,
    Stroke,
    /// Emit outlines into the current path
    Path,
}

/// A glyph placed in device pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionedGlyph {
    pub glyph: u32,
    pub x: f64,
    pub y: f64,
}

/// Rasterization backend a run draws into
pub trait DrawTarget {
    /// Binds `font` for the glyphs that follow. Returning `false` skips
    /// the font's glyphs.
    fn setup_font(&mut self, font: &Font) -> bool;

    fn draw_glyphs(&mut self, font: &Font, glyphs: &[PositionedGlyph], mode: DrawMode);

    /// Paints the placeholder box for a character no font supports.
    fn draw_missing_glyph(&mut self, ch: u32, rect: Rect);

    /// Current clip, in device pixels
    fn clip_extents(&self) -> Rect;

    fn push_clip(&mut self, rect: Rect);

    fn pop_clip(&mut self);
}

/// Where a partial ligature sits inside its ligature
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LigatureData {
    pub ligature_start: usize,
    pub ligature_end: usize,
    /// Advance from the ligature start to the part, without spacing
    pub part_advance: f64,
    /// Width of the part, with the ligature's outer spacing where the part
    /// touches the ligature edge
    pub part_width: f64,
    pub clip_before_part: bool,
    pub clip_after_part: bool,
}

/// Options for [`TextRun::break_and_measure_text`]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BreakOptions {
    /// Available width in app units
    pub width: f64,
    /// There is an actual line break before the start
    pub line_break_before: bool,
    /// Never break before the first character
    pub suppress_initial_break: bool,
    /// Trailing spaces do not count against the width
    pub trim_whitespace: bool,
    /// Any cluster boundary is a break opportunity
    pub can_word_wrap: bool,
    pub bounding_box_type: BoundingBoxType,
    /// Lowest priority the line has already settled for
    pub break_priority: BreakPriority,
}

/// Outcome of [`TextRun::break_and_measure_text`]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BreakResult {
    /// Characters that fit, trimmed whitespace included
    pub chars_fit: usize,
    /// Metrics of the fitting text without trimmed whitespace or hyphen
    pub metrics: RunMetrics,
    /// Width of the trimmed trailing whitespace
    pub trimmed_whitespace: f64,
    pub used_hyphenation: bool,
    /// When all text fit: the last break that would also have fit
    pub last_break: Option<usize>,
    pub break_priority: BreakPriority,
}

#[derive(Debug, Clone)]
enum RunText {
    Latin1(Box<[u8]>),
    Utf16(Box<[u16]>),
}

impl RunText {
    fn as_text(&self) -> WordText<'_> {
        match self {
            RunText::Latin1(t) => WordText::Latin1(t),
            RunText::Utf16(t) => WordText::Utf16(t),
        }
    }

    fn size_of_excluding_this(&self) -> usize {
        match self {
            RunText::Latin1(t) => t.len(),
            RunText::Utf16(t) => t.len() * 2,
        }
    }
}

/// Laid-out glyphs for a string, possibly spanning several fonts
#[derive(Debug)]
pub struct TextRun {
    buffer: GlyphBuffer,
    text: Option<RunText>,
    glyph_runs: SmallVec<[GlyphRun; 1]>,
    flags: TextRunFlags,
    app_units_per_dev_unit: u32,
    generation: u64,
    skip_drawing: bool,
}

impl TextRun {
    /// Allocates `len` empty glyph records. Returns `None` if the
    /// allocation fails.
    pub fn new(
        params: &TextRunParams,
        len: usize,
        flags: TextRunFlags,
        generation: u64,
    ) -> Option<Self> {
        let mut buffer = GlyphBuffer::try_new(len)?;
        for &offset in &params.initial_breaks {
            if let Some(g) = buffer.glyphs_mut().get_mut(offset) {
                g.set_can_break_before(BreakType::Normal);
            }
        }
        Some(Self {
            buffer,
            text: None,
            glyph_runs: SmallVec::new(),
            flags,
            app_units_per_dev_unit: params.app_units_per_dev_unit,
            generation,
            skip_drawing: false,
        })
    }

    /// Allocates a run for `text` and keeps a copy of it. 16-bit text gets
    /// its cluster boundaries marked up front.
    pub fn with_text(
        params: &TextRunParams,
        text: WordText<'_>,
        flags: TextRunFlags,
        generation: u64,
    ) -> Option<Self> {
        let mut flags = flags;
        let stored = match text {
            WordText::Latin1(t) => {
                flags |= TextRunFlags::IS_8BIT;
                let mut owned = Vec::new();
                owned.try_reserve_exact(t.len()).ok()?;
                owned.extend_from_slice(t);
                RunText::Latin1(owned.into_boxed_slice())
            }
            WordText::Utf16(t) => {
                let mut owned = Vec::new();
                owned.try_reserve_exact(t.len()).ok()?;
                owned.extend_from_slice(t);
                RunText::Utf16(owned.into_boxed_slice())
            }
        };
        let mut run = Self::new(params, text.len(), flags, generation)?;
        if let RunText::Utf16(t) = &stored {
            setup_cluster_boundaries(run.buffer.glyphs_mut(), t);
        }
        run.text = Some(stored);
        Some(run)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn flags(&self) -> TextRunFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: TextRunFlags) {
        self.flags |= flags;
    }

    pub fn clear_flags(&mut self, flags: TextRunFlags) {
        self.flags &= !flags;
    }

    pub fn is_rtl(&self) -> bool {
        self.flags.contains(TextRunFlags::IS_RTL)
    }

    /// `-1.0` for right-to-left runs, `1.0` otherwise
    pub fn direction(&self) -> f64 {
        if self.is_rtl() { -1.0 } else { 1.0 }
    }

    pub fn app_units_per_dev_unit(&self) -> u32 {
        self.app_units_per_dev_unit
    }

    /// Generation of the font group the run was built from
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn skip_drawing(&self) -> bool {
        self.skip_drawing
    }

    /// Suppresses painting while a user font is still loading.
    pub fn set_skip_drawing(&mut self, skip: bool) {
        self.skip_drawing = skip;
    }

    pub fn text(&self) -> Option<WordText<'_>> {
        self.text.as_ref().map(RunText::as_text)
    }

    /// Code unit at `offset`, if the run keeps its text
    pub fn char_at(&self, offset: usize) -> Option<u32> {
        let text = self.text.as_ref()?.as_text();
        (offset < text.len()).then(|| text.unit(offset))
    }

    pub fn glyphs(&self) -> &[CompressedGlyph] {
        self.buffer.glyphs()
    }

    pub fn has_detailed_glyphs(&self) -> bool {
        self.buffer.has_detailed_glyphs()
    }

    pub fn detailed_glyphs(&self, offset: usize) -> Option<&[DetailedGlyph]> {
        self.buffer.detailed_glyphs(offset)
    }

    pub fn is_cluster_start(&self, offset: usize) -> bool {
        self.buffer.glyphs()[offset].is_cluster_start()
    }

    pub fn is_ligature_group_start(&self, offset: usize) -> bool {
        self.buffer.glyphs()[offset].is_ligature_group_start()
    }

    pub fn break_type_before(&self, offset: usize) -> BreakType {
        self.buffer.glyphs()[offset].can_break_before()
    }

    /// True if a normal line break may precede `offset`
    pub fn can_break_line_before(&self, offset: usize) -> bool {
        self.break_type_before(offset) == BreakType::Normal
    }

    pub fn char_is_space(&self, offset: usize) -> bool {
        self.buffer.glyphs()[offset].char_is_space()
    }

    pub fn char_is_tab(&self, offset: usize) -> bool {
        self.buffer.glyphs()[offset].char_is_tab()
    }

    pub fn char_is_newline(&self, offset: usize) -> bool {
        self.buffer.glyphs()[offset].char_is_newline()
    }

    pub fn char_is_low_surrogate(&self, offset: usize) -> bool {
        self.buffer.glyphs()[offset].char_is_low_surrogate()
    }

    /// Characters recorded as missing
    pub fn count_missing_glyphs(&self) -> usize {
        self.buffer.count_missing_glyphs(0, self.len())
    }

    // Glyph runs

    pub fn glyph_runs(&self) -> &[GlyphRun] {
        &self.glyph_runs
    }

    pub fn reset_glyph_runs(&mut self) {
        self.glyph_runs.clear();
    }

    /// Starts a glyph run for `font` at `start`. Without `force_new`, a run
    /// continuing the previous font and match type is merged into it, and a
    /// previous run that would be left empty is replaced. Forced runs may be
    /// added out of order; call [`sort_glyph_runs`](Self::sort_glyph_runs)
    /// before querying the run afterwards.
    pub fn add_glyph_run(
        &mut self,
        font: &FontRef,
        match_type: MatchType,
        start: usize,
        force_new: bool,
    ) {
        if !force_new {
            if let Some(last) = self.glyph_runs.last() {
                debug_assert!(last.char_offset <= start, "glyph runs out of order");
                if FontRef::ptr_eq(&last.font, font) && last.match_type == match_type {
                    return;
                }
                if last.char_offset == start {
                    let n = self.glyph_runs.len();
                    if n > 1 {
                        let prev = &self.glyph_runs[n - 2];
                        if FontRef::ptr_eq(&prev.font, font) && prev.match_type == match_type {
                            self.glyph_runs.truncate(n - 1);
                            return;
                        }
                    }
                    let last = &mut self.glyph_runs[n - 1];
                    last.font = font.clone();
                    last.match_type = match_type;
                    return;
                }
            }
        }
        debug_assert!(
            force_new || !self.glyph_runs.is_empty() || start == 0,
            "first glyph run does not cover the first character"
        );
        self.glyph_runs.push(GlyphRun {
            font: font.clone(),
            char_offset: start,
            match_type,
        });
    }

    /// Orders glyph runs by offset and merges neighbors using the same font.
    pub fn sort_glyph_runs(&mut self) {
        if self.glyph_runs.len() <= 1 {
            return;
        }
        let mut runs = std::mem::take(&mut self.glyph_runs);
        runs.sort_by_key(|r| r.char_offset);
        for run in runs {
            if let Some(last) = self.glyph_runs.last() {
                if FontRef::ptr_eq(&last.font, &run.font) {
                    continue;
                }
                debug_assert_ne!(last.char_offset, run.char_offset, "two fonts for one range");
            }
            self.glyph_runs.push(run);
        }
    }

    /// Moves glyph run starts past ligature continuations and drops runs
    /// left empty, so no run begins in the middle of another font's
    /// ligature.
    pub fn sanitize_glyph_runs(&mut self) {
        let len = self.len();
        let glyphs = self.buffer.glyphs();
        let mut i = self.glyph_runs.len();
        while i > 0 {
            i -= 1;
            let run = &mut self.glyph_runs[i];
            while run.char_offset < len && glyphs[run.char_offset].is_ligature_continuation() {
                run.char_offset += 1;
            }
            let next_start = self.glyph_runs.get(i + 1).map_or(len, |r| r.char_offset);
            let run = &self.glyph_runs[i];
            let empty = if i + 1 < self.glyph_runs.len() {
                run.char_offset >= next_start
            } else {
                run.char_offset == len
            };
            if empty {
                self.glyph_runs.remove(i);
            }
        }
    }

    /// Index of the glyph run containing `offset`; the number of runs when
    /// `offset` is the run length. Runs must be sorted.
    pub fn find_first_glyph_run_containing(&self, offset: usize) -> usize {
        if offset == self.len() {
            return self.glyph_runs.len();
        }
        self.glyph_runs
            .partition_point(|r| r.char_offset <= offset)
            .saturating_sub(1)
    }

    /// Glyph runs overlapping `start..start + len`, clipped to that range.
    pub fn glyph_run_iter(&self, start: usize, len: usize) -> GlyphRunIter<'_> {
        GlyphRunIter {
            runs: &self.glyph_runs,
            next: self.find_first_glyph_run_containing(start),
            start,
            end: start + len,
            run_len: self.len(),
        }
    }

    // Glyph setup

    pub fn set_simple_glyph(&mut self, offset: usize, glyph: CompressedGlyph) {
        debug_assert!(glyph.is_simple_glyph());
        self.buffer.glyphs_mut()[offset] = glyph;
    }

    pub fn set_glyphs(&mut self, offset: usize, glyph: CompressedGlyph, details: &[DetailedGlyph]) {
        self.buffer.set_glyphs(offset, glyph, details);
    }

    /// Records `ch` as missing, sized from `font`'s average character width.
    pub fn set_missing_glyph(&mut self, offset: usize, ch: u32, font: &Font) {
        let app_units = self.app_units_per_dev_unit;
        self.buffer
            .set_missing_glyph(offset, ch, font.metrics().ave_char_width, app_units);
    }

    /// Converts a simple record to the complex form so identity flags fit.
    fn make_complex(&mut self, offset: usize) {
        let g = self.buffer.glyphs()[offset];
        if g.is_simple_glyph() {
            let detail = DetailedGlyph {
                glyph_id: g.simple_glyph(),
                advance: g.simple_advance() as i32,
                x_offset: 0.0,
                y_offset: 0.0,
            };
            let mut complex = g;
            complex.set_complex(true, true, 1);
            self.buffer.set_glyphs(offset, complex, &[detail]);
        }
    }

    pub fn set_is_tab(&mut self, offset: usize) {
        self.make_complex(offset);
        self.buffer.glyphs_mut()[offset].set_is_tab();
    }

    pub fn set_is_newline(&mut self, offset: usize) {
        self.make_complex(offset);
        self.buffer.glyphs_mut()[offset].set_is_newline();
    }

    pub fn set_is_low_surrogate(&mut self, offset: usize) {
        self.buffer
            .set_glyphs(offset, CompressedGlyph::complex(false, false, 0), &[]);
        self.buffer.glyphs_mut()[offset].set_is_low_surrogate();
    }

    /// Stores `font`'s space glyph at `offset` if it fits a simple record.
    /// A U+0020 source character is flagged as a trimmable space. Returns
    /// `false` when the caller has to shape the space instead.
    pub fn set_space_glyph_if_simple(&mut self, font: &Font, offset: usize, space_char: u32) -> bool {
        let Some((advance, glyph)) = font.simple_space(self.app_units_per_dev_unit) else {
            return false;
        };
        let mut g = CompressedGlyph::simple(advance, glyph);
        if space_char == ' ' as u32 {
            g.set_is_space();
        }
        self.buffer.glyphs_mut()[offset] = g;
        true
    }

    /// Stores a space from `font` at `offset`, shaping one through the word
    /// cache when the simple form does not fit.
    pub fn set_space_glyph(&mut self, font: &FontRef, offset: usize, prefs: &ShaperPrefs) {
        self.add_glyph_run(font, MatchType::FontGroup, offset, false);
        if self.set_space_glyph_if_simple(font, offset, ' ' as u32) {
            return;
        }
        let space = [b' '];
        let key = WordKey::with_hash(
            WordText::Latin1(&space),
            Script::Latin,
            self.app_units_per_dev_unit,
            TextRunFlags::IS_8BIT | TextRunFlags::IS_ASCII | TextRunFlags::PERSISTENT,
            hash_mix(0, ' ' as u32),
        );
        if let Some(word) = font.get_shaped_word(&key, prefs) {
            self.copy_glyph_data_from(&word, offset);
        }
    }

    /// Copies every glyph record of `word` to the run starting at `dest`.
    pub fn copy_glyph_data_from(&mut self, word: &ShapedWord, dest: usize) {
        self.buffer.copy_from(word.glyph_buffer(), 0, word.len(), dest);
    }

    /// Copies `len` records of `src` from `start` to `dest`, along with the
    /// glyph runs covering them. Break opportunities already in this run
    /// are kept at cluster starts.
    pub fn copy_glyph_data_from_run(&mut self, src: &TextRun, start: usize, len: usize, dest: usize) {
        for i in 0..len {
            let mut g = src.buffer.glyphs()[start + i];
            let break_type = if g.is_cluster_start() {
                self.buffer.glyphs()[dest + i].can_break_before()
            } else {
                BreakType::None
            };
            g.set_can_break_before(break_type);
            if !g.is_simple_glyph() && g.glyph_count() > 0 {
                match src.buffer.detailed_glyphs(start + i) {
                    Some(details) => {
                        self.buffer.set_glyphs(dest + i, g, details);
                        continue;
                    }
                    None => {
                        g.set_missing(0);
                    }
                }
            }
            self.buffer.glyphs_mut()[dest + i] = g;
        }

        for (run, run_start, _) in src.glyph_run_iter(start, len) {
            self.add_glyph_run(&run.font, run.match_type, run_start - start + dest, false);
        }
    }

    /// Sets break opportunities for `start..start + breaks.len()`. Breaks
    /// inside clusters are dropped. Returns whether anything changed.
    pub fn set_potential_line_breaks(&mut self, start: usize, breaks: &[BreakType]) -> bool {
        let glyphs = &mut self.buffer.glyphs_mut()[start..start + breaks.len()];
        let mut changed = 0;
        for (g, &b) in glyphs.iter_mut().zip(breaks) {
            let b = if b != BreakType::None && !g.is_cluster_start() {
                BreakType::None
            } else {
                b
            };
            changed |= g.set_can_break_before(b);
        }
        changed != 0
    }

    /// Seeds break opportunities from the stored text using the Unicode line
    /// breaking algorithm.
    pub fn compute_default_line_breaks(&mut self) -> bool {
        let Some(text) = self.text.as_ref() else {
            return false;
        };
        let text16 = text.as_text().to_utf16();
        let breaks = crate::linebreak::default_break_opportunities(&text16);
        self.set_potential_line_breaks(0, &breaks)
    }

    /// Records actual line breaks around `start..start + len`. Shaping does
    /// not depend on line breaks, so geometry never changes; returns
    /// `(changed, advance_width_delta)`.
    pub fn set_line_breaks(
        &mut self,
        _start: usize,
        _len: usize,
        _break_before: bool,
        _break_after: bool,
        _provider: Option<&dyn PropertyProvider>,
    ) -> (bool, f64) {
        (false, 0.0)
    }

    // Ligatures

    /// Narrows `start..end` to whole ligature groups. The end is left alone
    /// at the end of the run.
    pub fn shrink_to_ligature_boundaries(&self, start: usize, end: usize) -> (usize, usize) {
        if start >= end {
            return (start, end);
        }
        let glyphs = self.buffer.glyphs();
        let mut start = start;
        let mut end = end;
        while start < end && !glyphs[start].is_ligature_group_start() {
            start += 1;
        }
        if end < self.len() {
            while end > start && !glyphs[end].is_ligature_group_start() {
                end -= 1;
            }
        }
        (start, end)
    }

    /// Summed advance of the glyphs of `start..end`, without spacing
    pub fn advance_for_glyphs(&self, start: usize, end: usize) -> i64 {
        let mut advance = 0i64;
        for (i, g) in self.buffer.glyphs()[start..end].iter().enumerate() {
            if g.is_simple_glyph() {
                advance += g.simple_advance() as i64;
            } else if let Some(details) = self.buffer.detailed_glyphs(start + i) {
                advance += details.iter().map(|d| d.advance as i64).sum::<i64>();
            }
        }
        advance
    }

    /// Locates the ligature around `part_start..part_end` and the share of
    /// its advance that belongs to the part.
    pub fn compute_ligature_data(
        &self,
        part_start: usize,
        part_end: usize,
        provider: Option<&dyn PropertyProvider>,
    ) -> LigatureData {
        debug_assert!(part_start < part_end);
        let glyphs = self.buffer.glyphs();
        let mut lig_start = part_start;
        while lig_start > 0 && !glyphs[lig_start].is_ligature_group_start() {
            lig_start -= 1;
        }
        let mut lig_end = part_start + 1;
        while lig_end < self.len() && !glyphs[lig_end].is_ligature_group_start() {
            lig_end += 1;
        }

        let ligature_width = self.advance_for_glyphs(lig_start, lig_end);
        let mut total_clusters = 0i64;
        let mut part_index = 0i64;
        let mut part_count = 0i64;
        for (i, g) in glyphs.iter().enumerate().take(lig_end).skip(lig_start) {
            // The first character always counts as a cluster here
            if i == lig_start || g.is_cluster_start() {
                total_clusters += 1;
                if i < part_start {
                    part_index += 1;
                } else if i < part_end {
                    part_count += 1;
                }
            }
        }
        let share = ligature_width / total_clusters.max(1);
        let mut data = LigatureData {
            ligature_start: lig_start,
            ligature_end: lig_end,
            part_advance: (part_index * share) as f64,
            part_width: (part_count * share) as f64,
            ..Default::default()
        };
        // Rounding goes to the last part so all parts sum to the whole
        if part_end == lig_end {
            data.part_width += (ligature_width - total_clusters * share) as f64;
        }

        if part_count == 0 {
            data.clip_before_part = true;
            data.clip_after_part = true;
        } else {
            data.clip_before_part = part_index > 0;
            data.clip_after_part = part_index + part_count < total_clusters;
        }

        if let Some(provider) = self.spacing_provider(provider) {
            let mut spacing = [Spacing::default()];
            if part_start == lig_start {
                provider.spacing(part_start, 1, &mut spacing);
                data.part_width += spacing[0].before;
            }
            if part_end == lig_end {
                provider.spacing(part_end - 1, 1, &mut spacing);
                data.part_width += spacing[0].after;
            }
        }
        data
    }

    fn compute_partial_ligature_width(
        &self,
        start: usize,
        end: usize,
        provider: Option<&dyn PropertyProvider>,
    ) -> f64 {
        if start >= end {
            return 0.0;
        }
        self.compute_ligature_data(start, end, provider).part_width
    }

    /// Narrows `left..right` to the part of a ligature drawn from `origin`.
    fn clip_partial_ligature(&self, left: &mut f64, right: &mut f64, origin: f64, data: &LigatureData) {
        if data.clip_before_part {
            if self.is_rtl() {
                *right = right.min(origin);
            } else {
                *left = left.max(origin);
            }
        }
        if data.clip_after_part {
            let end_edge = origin + self.direction() * data.part_width;
            if self.is_rtl() {
                *left = left.max(end_edge);
            } else {
                *right = right.min(end_edge);
            }
        }
    }

    // Spacing

    fn spacing_provider<'p>(
        &self,
        provider: Option<&'p dyn PropertyProvider>,
    ) -> Option<&'p dyn PropertyProvider> {
        provider.filter(|_| self.flags.contains(TextRunFlags::ENABLE_SPACING))
    }

    /// Spacing for `start..end`, zero outside `spacing_start..spacing_end`.
    /// `None` when the run has no spacing.
    fn adjusted_spacing_array(
        &self,
        start: usize,
        end: usize,
        provider: Option<&dyn PropertyProvider>,
        spacing_start: usize,
        spacing_end: usize,
    ) -> Option<Vec<Spacing>> {
        let provider = self.spacing_provider(provider)?;
        let mut spacing = vec![Spacing::default(); end - start];
        if spacing_start < spacing_end {
            provider.spacing(
                spacing_start,
                spacing_end - spacing_start,
                &mut spacing[spacing_start - start..spacing_end - start],
            );
        }
        Some(spacing)
    }

    // Measurement

    /// Measures `start..start + len`. Empty ranges measure as all zeros.
    pub fn measure_text(
        &self,
        start: usize,
        len: usize,
        bbox_type: BoundingBoxType,
        provider: Option<&dyn PropertyProvider>,
    ) -> RunMetrics {
        let mut metrics = RunMetrics::default();
        if len == 0 {
            return metrics;
        }
        for (run, start, end) in self.glyph_run_iter(start, len) {
            let (lig_start, lig_end) = self.shrink_to_ligature_boundaries(start, end);
            self.accumulate_partial_ligature_metrics(
                &run.font, start, lig_start, bbox_type, provider, &mut metrics,
            );
            self.accumulate_metrics_for_run(
                &run.font, lig_start, lig_end, bbox_type, provider, lig_start, lig_end,
                &mut metrics,
            );
            self.accumulate_partial_ligature_metrics(
                &run.font, lig_end, end, bbox_type, provider, &mut metrics,
            );
        }
        metrics
    }

    #[allow(clippy::too_many_arguments)]
    fn accumulate_metrics_for_run(
        &self,
        font: &Font,
        start: usize,
        end: usize,
        bbox_type: BoundingBoxType,
        provider: Option<&dyn PropertyProvider>,
        spacing_start: usize,
        spacing_end: usize,
        metrics: &mut RunMetrics,
    ) {
        let spacing = self.adjusted_spacing_array(start, end, provider, spacing_start, spacing_end);
        let run_metrics = font.measure(self, start, end, bbox_type, spacing.as_deref());
        metrics.combine_with(&run_metrics, self.is_rtl());
    }

    fn accumulate_partial_ligature_metrics(
        &self,
        font: &Font,
        start: usize,
        end: usize,
        bbox_type: BoundingBoxType,
        provider: Option<&dyn PropertyProvider>,
        metrics: &mut RunMetrics,
    ) {
        if start >= end {
            return;
        }
        let data = self.compute_ligature_data(start, end, provider);
        let mut lig = RunMetrics::default();
        self.accumulate_metrics_for_run(
            font,
            data.ligature_start,
            data.ligature_end,
            bbox_type,
            provider,
            start,
            end,
            &mut lig,
        );

        // Clip the box to the part, then make it relative to the part origin
        let mut left = lig.bounding_box.x;
        let mut right = lig.bounding_box.right();
        let origin = if self.is_rtl() {
            lig.advance_width - data.part_advance
        } else {
            0.0
        };
        self.clip_partial_ligature(&mut left, &mut right, origin, &data);
        lig.bounding_box.x = left;
        lig.bounding_box.width = right - left;
        lig.bounding_box.x -= if self.is_rtl() {
            lig.advance_width - (data.part_advance + data.part_width)
        } else {
            data.part_advance
        };
        lig.advance_width = data.part_width;
        metrics.combine_with(&lig, self.is_rtl());
    }

    /// Advance width of `start..start + len` in app units, with spacing.
    pub fn get_advance_width(
        &self,
        start: usize,
        len: usize,
        provider: Option<&dyn PropertyProvider>,
    ) -> f64 {
        let end = start + len;
        let (lig_start, lig_end) = self.shrink_to_ligature_boundaries(start, end);
        let mut result = self.compute_partial_ligature_width(start, lig_start, provider)
            + self.compute_partial_ligature_width(lig_end, end, provider);

        if let Some(spacing) =
            self.adjusted_spacing_array(lig_start, lig_end, provider, lig_start, lig_end)
        {
            result += spacing.iter().map(|s| s.before + s.after).sum::<f64>();
        }
        result + self.advance_for_glyphs(lig_start, lig_end) as f64
    }

    // Drawing

    /// Draws `start..start + len` with its baseline origin at `origin`
    /// (app units; the left edge for LTR runs, the right edge for RTL).
    /// Returns the advance width drawn.
    pub fn draw(
        &self,
        start: usize,
        len: usize,
        origin: (f64, f64),
        mode: DrawMode,
        target: &mut dyn DrawTarget,
        provider: Option<&dyn PropertyProvider>,
    ) -> f64 {
        let direction = self.direction();
        if self.skip_drawing {
            // Still report the width so layout is unaffected
            let metrics = self.measure_text(start, len, BoundingBoxType::Loose, provider);
            return metrics.advance_width * direction;
        }

        let mut x = origin.0;
        let y = origin.1;
        let draw_partial = matches!(mode, DrawMode::Fill | DrawMode::Path);
        for (run, start, end) in self.glyph_run_iter(start, len) {
            let font: &Font = &run.font;
            if !target.setup_font(font) {
                continue;
            }
            let (lig_start, lig_end) = self.shrink_to_ligature_boundaries(start, end);
            if draw_partial {
                self.draw_partial_ligature(font, start, lig_start, &mut x, y, mode, target, provider);
            }
            let spacing = self.adjusted_spacing_array(lig_start, lig_end, provider, lig_start, lig_end);
            font.draw(self, lig_start, lig_end, target, mode, &mut x, y, spacing.as_deref());
            if draw_partial {
                self.draw_partial_ligature(font, lig_end, end, &mut x, y, mode, target, provider);
            }
        }
        (x - origin.0) * direction
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_partial_ligature(
        &self,
        font: &Font,
        start: usize,
        end: usize,
        x: &mut f64,
        y: f64,
        mode: DrawMode,
        target: &mut dyn DrawTarget,
        provider: Option<&dyn PropertyProvider>,
    ) {
        if start >= end {
            return;
        }
        let data = self.compute_ligature_data(start, end, provider);
        let app_units = self.app_units_per_dev_unit as f64;
        let clip = target.clip_extents();
        let mut left = clip.x * app_units;
        let mut right = clip.right() * app_units;
        self.clip_partial_ligature(&mut left, &mut right, *x, &data);

        target.push_clip(Rect::new(
            (left / app_units).round(),
            clip.y,
            ((right - left) / app_units).round(),
            clip.height,
        ));
        let mut lig_x = *x - self.direction() * data.part_advance;
        let spacing = self.adjusted_spacing_array(
            data.ligature_start,
            data.ligature_end,
            provider,
            start,
            end,
        );
        font.draw(
            self,
            data.ligature_start,
            data.ligature_end,
            target,
            mode,
            &mut lig_x,
            y,
            spacing.as_deref(),
        );
        target.pop_clip();
        *x += self.direction() * data.part_width;
    }

    // Line breaking

    /// Finds how much of `start..start + max_len` fits in `options.width`,
    /// breaking greedily at the last opportunity that still fits. When none
    /// fits, the first opportunity is used; when there is none at all, the
    /// whole range is returned.
    pub fn break_and_measure_text(
        &self,
        start: usize,
        max_len: usize,
        options: &BreakOptions,
        provider: Option<&dyn PropertyProvider>,
    ) -> BreakResult {
        let max_len = max_len.min(self.len().saturating_sub(start));
        let end = start + max_len;
        let glyphs = self.buffer.glyphs();

        let spacing = self.adjusted_spacing_array(start, end, provider, start, end);
        let hyphen_provider = provider.filter(|p| match p.hyphens_option() {
            HyphensOption::Auto => true,
            HyphensOption::Manual => self.flags.contains(TextRunFlags::ENABLE_HYPHEN_BREAKS),
            HyphensOption::None => false,
        });
        let hyphen_breaks = hyphen_provider.map(|p| {
            let mut breaks = vec![false; max_len];
            p.hyphenation_breaks(start, max_len, &mut breaks);
            breaks
        });

        let mut width = 0.0;
        let mut advance = 0.0;
        let mut trimmable_chars = 0usize;
        let mut trimmable_advance = 0.0;
        let mut last_break: Option<usize> = None;
        let mut last_break_trimmable_chars = 0usize;
        let mut last_break_trimmable_advance = 0.0;
        let mut last_break_used_hyphenation = false;
        let mut priority = options.break_priority;
        let mut aborted = false;

        let (lig_start, lig_end) = self.shrink_to_ligature_boundaries(start, end);

        for i in start..end {
            if !options.suppress_initial_break || i > start {
                let line_break = glyphs[i].can_break_before() == BreakType::Normal;
                let hyphenation = hyphen_breaks.as_ref().is_some_and(|b| b[i - start]);
                let word_wrap = options.can_word_wrap
                    && glyphs[i].is_cluster_start()
                    && priority <= BreakPriority::WordWrap;

                if line_break || hyphenation || word_wrap {
                    let uses_hyphen = !line_break && !word_wrap;
                    let mut hyphenated_advance = advance;
                    if uses_hyphen {
                        hyphenated_advance += provider.map_or(0.0, |p| p.hyphen_width());
                    }
                    if last_break.is_none()
                        || width + hyphenated_advance - trimmable_advance <= options.width
                    {
                        last_break = Some(i);
                        last_break_trimmable_chars = trimmable_chars;
                        last_break_trimmable_advance = trimmable_advance;
                        last_break_used_hyphenation = uses_hyphen;
                        priority = if hyphenation || line_break {
                            BreakPriority::Normal
                        } else {
                            BreakPriority::WordWrap
                        };
                    }

                    width += advance;
                    advance = 0.0;
                    if width - trimmable_advance > options.width {
                        aborted = true;
                        break;
                    }
                }
            }

            let char_advance = if i >= lig_start && i < lig_end {
                let mut a = self.advance_for_glyphs(i, i + 1) as f64;
                if let Some(spacing) = &spacing {
                    let s = spacing[i - start];
                    a += s.before + s.after;
                }
                a
            } else {
                self.compute_partial_ligature_width(i, i + 1, provider)
            };

            advance += char_advance;
            if options.trim_whitespace {
                if glyphs[i].char_is_space() {
                    trimmable_chars += 1;
                    trimmable_advance += char_advance;
                } else {
                    trimmable_chars = 0;
                    trimmable_advance = 0.0;
                }
            }
        }

        if !aborted {
            width += advance;
        }

        let mut used_hyphenation = false;
        let chars_fit = if width - trimmable_advance <= options.width {
            max_len
        } else if let Some(b) = last_break {
            trimmable_chars = last_break_trimmable_chars;
            trimmable_advance = last_break_trimmable_advance;
            used_hyphenation = last_break_used_hyphenation;
            b - start
        } else {
            max_len
        };

        let metrics = self.measure_text(
            start,
            chars_fit - trimmable_chars,
            options.bounding_box_type,
            provider,
        );

        BreakResult {
            chars_fit,
            metrics,
            trimmed_whitespace: if options.trim_whitespace {
                trimmable_advance
            } else {
                0.0
            },
            used_hyphenation,
            last_break: if chars_fit == max_len {
                last_break.map(|b| b - start)
            } else {
                None
            },
            break_priority: priority,
        }
    }

    // Extents

    /// Measures every glyph the run uses so later loose measurements can
    /// use cached extents. Only does work when the run needs bounding boxes
    /// or has detailed glyphs.
    pub fn fetch_glyph_extents(&self) {
        let needs_extents = self.flags.contains(TextRunFlags::NEED_BOUNDING_BOX);
        if !needs_extents && !self.buffer.has_detailed_glyphs() {
            return;
        }
        let glyphs = self.buffer.glyphs();
        for (index, run) in self.glyph_runs.iter().enumerate() {
            let start = run.char_offset;
            let end = self
                .glyph_runs
                .get(index + 1)
                .map_or(self.len(), |r| r.char_offset);
            let extents = run.font.glyph_extents(self.app_units_per_dev_unit);
            for j in start..end {
                let g = glyphs[j];
                if g.is_simple_glyph() {
                    if needs_extents && !extents.is_glyph_known(g.simple_glyph()) {
                        run.font.setup_glyph_extents(g.simple_glyph(), false, &extents);
                    }
                } else if !g.is_missing() {
                    for detail in self.buffer.detailed_glyphs(j).unwrap_or(&[]) {
                        if !extents.is_glyph_known_with_tight_extents(detail.glyph_id) {
                            run.font.setup_glyph_extents(detail.glyph_id, true, &extents);
                        }
                    }
                }
            }
        }
    }

    // Memory

    pub fn size_of_excluding_this(&self) -> usize {
        let runs = if self.glyph_runs.spilled() {
            self.glyph_runs.capacity() * std::mem::size_of::<GlyphRun>()
        } else {
            0
        };
        self.buffer.size_of_excluding_this()
            + runs
            + self.text.as_ref().map_or(0, RunText::size_of_excluding_this)
    }

    pub fn size_of_including_this(&self) -> usize {
        std::mem::size_of::<Self>() + self.size_of_excluding_this()
    }

    /// Size of the run unless a report already counted it; marks it counted.
    pub fn maybe_size_of_including_this(&mut self) -> usize {
        if self.flags.contains(TextRunFlags::RUN_SIZE_ACCOUNTED) {
            return 0;
        }
        self.flags |= TextRunFlags::RUN_SIZE_ACCOUNTED;
        self.size_of_including_this()
    }

    pub fn reset_size_of_accounting_flags(&mut self) {
        self.flags &= !TextRunFlags::RUN_SIZE_ACCOUNTED;
    }
}

/// Iterator over the glyph runs overlapping a range
///
/// Yields each run with its `(start, end)` clipped to the range.
pub struct GlyphRunIter<'a> {
    runs: &'a [GlyphRun],
    next: usize,
    start: usize,
    end: usize,
    run_len: usize,
}

impl<'a> Iterator for GlyphRunIter<'a> {
    type Item = (&'a GlyphRun, usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let run = self.runs.get(self.next)?;
        if run.char_offset >= self.end {
            return None;
        }
        let run_end = self
            .runs
            .get(self.next + 1)
            .map_or(self.run_len, |r| r.char_offset);
        self.next += 1;
        let start = self.start.max(run.char_offset);
        let end = self.end.min(run_end);
        Some((run, start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::{FaceSource, VirtualFace, VirtualGlyph};
    use crate::font_cache::FontCache;
    use crate::font_entry::FontEntry;
    use crate::style::{FontSlant, FontStyle};
    use std::rc::Rc;

    fn font_from(cache: &FontCache, face: VirtualFace) -> FontRef {
        let entry = Rc::new(FontEntry::new(FaceSource::Virtual(face)));
        let style = FontStyle::new(16.0, 400, FontSlant::Normal);
        cache.add_new(Font::new(entry, style, false).unwrap())
    }

    fn build(font: &FontRef, text: &str, flags: TextRunFlags) -> TextRun {
        let params = TextRunParams::new(60);
        let mut run = TextRun::with_text(&params, WordText::Latin1(text.as_bytes()), flags, 0).unwrap();
        run.add_glyph_run(font, MatchType::FontGroup, 0, false);
        assert!(font.split_and_init_text_run(
            &mut run,
            text.as_bytes(),
            0,
            text.len(),
            Script::Latin,
            &ShaperPrefs::default(),
        ));
        run
    }

    struct FixedSpacing {
        after: f64,
        hyphens: Vec<usize>,
        /// Offsets inside ligatures, which take no spacing
        inside_ligature: Vec<usize>,
    }

    impl PropertyProvider for FixedSpacing {
        fn hyphenation_breaks(&self, start: usize, len: usize, break_before: &mut [bool]) {
            for (i, b) in break_before.iter_mut().enumerate().take(len) {
                *b = self.hyphens.contains(&(start + i));
            }
        }

        fn hyphens_option(&self) -> HyphensOption {
            HyphensOption::Auto
        }

        fn hyphen_width(&self) -> f64 {
            200.0
        }

        fn spacing(&self, start: usize, len: usize, spacing: &mut [Spacing]) {
            for (i, s) in spacing.iter_mut().enumerate().take(len) {
                let after = if self.inside_ligature.contains(&(start + i)) {
                    0.0
                } else {
                    self.after
                };
                *s = Spacing { before: 0.0, after };
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        glyphs: Vec<PositionedGlyph>,
        missing: Vec<(u32, Rect)>,
        clips: Vec<Rect>,
    }

    impl DrawTarget for Recorder {
        fn setup_font(&mut self, _font: &Font) -> bool {
            true
        }

        fn draw_glyphs(&mut self, _font: &Font, glyphs: &[PositionedGlyph], _mode: DrawMode) {
            self.glyphs.extend_from_slice(glyphs);
        }

        fn draw_missing_glyph(&mut self, ch: u32, rect: Rect) {
            self.missing.push((ch, rect));
        }

        fn clip_extents(&self) -> Rect {
            Rect::new(0.0, -100.0, 10000.0, 200.0)
        }

        fn push_clip(&mut self, rect: Rect) {
            self.clips.push(rect);
        }

        fn pop_clip(&mut self) {}
    }

    fn ligature_face() -> VirtualFace {
        VirtualFace::ascii("Lig", 500).with_ligature("ffi", VirtualGlyph::new(900, 1001))
    }

    #[test]
    fn test_glyph_run_merging() {
        let cache = FontCache::default();
        let a = font_from(&cache, VirtualFace::ascii("A", 500));
        let b = font_from(&cache, VirtualFace::ascii("B", 500));
        let mut run = TextRun::new(&TextRunParams::new(60), 10, TextRunFlags::empty(), 0).unwrap();

        run.add_glyph_run(&a, MatchType::FontGroup, 0, false);
        run.add_glyph_run(&a, MatchType::FontGroup, 3, false);
        assert_eq!(run.glyph_runs().len(), 1);

        run.add_glyph_run(&b, MatchType::FontGroup, 3, false);
        // Replaces the empty run at 3 and then merges back into the first
        run.add_glyph_run(&b, MatchType::SystemFallback, 3, false);
        run.add_glyph_run(&a, MatchType::FontGroup, 3, false);
        assert_eq!(run.glyph_runs().len(), 1);

        run.add_glyph_run(&b, MatchType::FontGroup, 5, false);
        assert_eq!(run.glyph_runs().len(), 2);
        assert_eq!(run.find_first_glyph_run_containing(4), 0);
        assert_eq!(run.find_first_glyph_run_containing(5), 1);
        assert_eq!(run.find_first_glyph_run_containing(9), 1);
        assert_eq!(run.find_first_glyph_run_containing(10), 2);
    }

    #[test]
    fn test_sort_glyph_runs_coalesces() {
        let cache = FontCache::default();
        let a = font_from(&cache, VirtualFace::ascii("A", 500));
        let b = font_from(&cache, VirtualFace::ascii("B", 500));
        let mut run = TextRun::new(&TextRunParams::new(60), 10, TextRunFlags::empty(), 0).unwrap();
        run.add_glyph_run(&a, MatchType::FontGroup, 6, true);
        run.add_glyph_run(&b, MatchType::FontGroup, 2, true);
        run.add_glyph_run(&a, MatchType::FontGroup, 0, true);
        run.add_glyph_run(&b, MatchType::FontGroup, 4, true);
        run.sort_glyph_runs();

        let offsets: Vec<usize> = run.glyph_runs().iter().map(|r| r.char_offset).collect();
        assert_eq!(offsets, vec![0, 2, 6]);
        let ranges: Vec<(usize, usize)> = run.glyph_run_iter(1, 7).map(|(_, s, e)| (s, e)).collect();
        assert_eq!(ranges, vec![(1, 2), (2, 6), (6, 8)]);
    }

    #[test]
    fn test_char_at_round_trip() {
        let cache = FontCache::default();
        let font = font_from(&cache, VirtualFace::ascii("A", 500));
        let text = "fold the map";
        let run = build(&font, text, TextRunFlags::empty());
        for (i, b) in text.bytes().enumerate() {
            assert_eq!(run.char_at(i), Some(b as u32));
        }
        assert_eq!(run.char_at(text.len()), None);
        assert!(run.char_is_space(4));
        assert_eq!(run.glyphs()[0].simple_glyph(), 'f' as u32);
    }

    #[test]
    fn test_advances_are_additive() {
        let cache = FontCache::default();
        let font = font_from(&cache, ligature_face());
        let run = build(&font, "affix offer", TextRunFlags::ENABLE_SPACING);
        let provider = FixedSpacing {
            after: 7.0,
            hyphens: Vec::new(),
            inside_ligature: vec![1, 2],
        };
        let total = run.measure_text(0, run.len(), BoundingBoxType::Loose, Some(&provider));
        for split in 0..=run.len() {
            let left = run.measure_text(0, split, BoundingBoxType::Loose, Some(&provider));
            let right =
                run.measure_text(split, run.len() - split, BoundingBoxType::Loose, Some(&provider));
            assert_eq!(left.advance_width + right.advance_width, total.advance_width);
            assert_eq!(
                run.get_advance_width(0, split, Some(&provider))
                    + run.get_advance_width(split, run.len() - split, Some(&provider)),
                total.advance_width
            );
        }
    }

    #[test]
    fn test_partial_ligature_shares() {
        let cache = FontCache::default();
        let font = font_from(&cache, ligature_face());
        let run = build(&font, "affix", TextRunFlags::empty());
        // 1001 units at 16px and 60 app units = 961; three clusters of 320
        assert_eq!(run.advance_for_glyphs(1, 4), 961);
        assert_eq!(run.get_advance_width(0, 2, None), 800.0);
        assert_eq!(run.get_advance_width(2, 3, None), 1121.0);

        let data = run.compute_ligature_data(2, 3, None);
        assert_eq!((data.ligature_start, data.ligature_end), (1, 4));
        assert_eq!(data.part_advance, 320.0);
        assert!(data.clip_before_part);
        assert!(data.clip_after_part);
        assert_eq!(run.shrink_to_ligature_boundaries(2, 5), (4, 5));
    }

    #[test]
    fn test_zero_length_measurement() {
        let cache = FontCache::default();
        let font = font_from(&cache, ligature_face());
        let run = build(&font, "affix", TextRunFlags::empty());
        for start in 0..=run.len() {
            let m = run.measure_text(start, 0, BoundingBoxType::TightInkExtents, None);
            assert_eq!(m, RunMetrics::default());
        }
    }

    #[test]
    fn test_measure_reports_font_box() {
        let cache = FontCache::default();
        let font = font_from(&cache, VirtualFace::ascii("A", 500));
        let run = build(&font, "ab", TextRunFlags::empty());
        let m = run.measure_text(0, 2, BoundingBoxType::Loose, None);
        assert_eq!(m.advance_width, 960.0);
        assert_eq!(m.ascent, 13.0 * 60.0);
        assert_eq!(m.bounding_box.y, -m.ascent);
        assert_eq!(m.bounding_box.width, 960.0);
    }

    #[test]
    fn test_break_and_measure_greedy_fit() {
        let cache = FontCache::default();
        let font = font_from(&cache, VirtualFace::ascii("A", 500));
        let mut run = build(&font, "The quick fox", TextRunFlags::empty());
        let mut breaks = vec![BreakType::None; run.len()];
        breaks[4] = BreakType::Normal;
        breaks[10] = BreakType::Normal;
        assert!(run.set_potential_line_breaks(0, &breaks));

        // 480 app units per character
        let mut options = BreakOptions {
            width: 4560.0,
            suppress_initial_break: true,
            trim_whitespace: true,
            ..Default::default()
        };
        let result = run.break_and_measure_text(0, run.len(), &options, None);
        assert_eq!(result.chars_fit, 10);
        assert_eq!(result.trimmed_whitespace, 480.0);
        assert_eq!(result.metrics.advance_width, 9.0 * 480.0);
        assert_eq!(result.last_break, None);
        assert_eq!(result.break_priority, BreakPriority::Normal);

        options.trim_whitespace = false;
        let result = run.break_and_measure_text(0, run.len(), &options, None);
        assert_eq!(result.chars_fit, 4);

        options.width = 100_000.0;
        let result = run.break_and_measure_text(0, run.len(), &options, None);
        assert_eq!(result.chars_fit, 13);
        assert_eq!(result.last_break, Some(10));
    }

    #[test]
    fn test_break_uses_hyphen_width() {
        let cache = FontCache::default();
        let font = font_from(&cache, VirtualFace::ascii("A", 500));
        let run = build(&font, "abcdef", TextRunFlags::empty());
        let provider = FixedSpacing {
            after: 0.0,
            hyphens: vec![3],
            inside_ligature: Vec::new(),
        };
        let options = BreakOptions {
            width: 1700.0,
            suppress_initial_break: true,
            ..Default::default()
        };
        let result = run.break_and_measure_text(0, run.len(), &options, Some(&provider));
        assert_eq!(result.chars_fit, 3);
        assert!(result.used_hyphenation);

        // 3 * 480 + 200 no longer fits, but the first break is still taken
        let narrow = BreakOptions {
            width: 1600.0,
            ..options
        };
        let result = run.break_and_measure_text(0, run.len(), &narrow, Some(&provider));
        assert_eq!(result.chars_fit, 3);
    }

    #[test]
    fn test_breaks_inside_clusters_are_ignored() {
        let params = TextRunParams::new(60);
        let text: Vec<u16> = "e\u{301}x".encode_utf16().collect();
        let mut run =
            TextRun::with_text(&params, WordText::Utf16(&text), TextRunFlags::empty(), 0).unwrap();
        run.set_potential_line_breaks(0, &[BreakType::None, BreakType::Normal, BreakType::Normal]);
        assert!(!run.can_break_line_before(1));
        assert!(run.can_break_line_before(2));
    }

    #[test]
    fn test_tab_and_newline_flags_force_complex() {
        let cache = FontCache::default();
        let font = font_from(&cache, VirtualFace::ascii("A", 500));
        let mut run = build(&font, "ab", TextRunFlags::empty());
        run.set_is_tab(0);
        assert!(run.char_is_tab(0));
        assert_eq!(run.detailed_glyphs(0).unwrap()[0].advance, 480);
        assert_eq!(run.get_advance_width(0, 2, None), 960.0);
        run.set_is_low_surrogate(1);
        assert!(run.char_is_low_surrogate(1));
        assert!(!run.is_cluster_start(1));
    }

    #[test]
    fn test_copy_from_run_keeps_breaks_and_runs() {
        let cache = FontCache::default();
        let font = font_from(&cache, VirtualFace::ascii("A", 500));
        let src = build(&font, "go on", TextRunFlags::empty());
        let mut dst = TextRun::new(
            &TextRunParams {
                app_units_per_dev_unit: 60,
                initial_breaks: vec![3],
            },
            5,
            TextRunFlags::empty(),
            0,
        )
        .unwrap();
        dst.copy_glyph_data_from_run(&src, 0, 5, 0);
        assert!(dst.can_break_line_before(3));
        assert_eq!(dst.glyph_runs().len(), 1);
        assert_eq!(dst.get_advance_width(0, 5, None), 2400.0);
    }

    #[test]
    fn test_sanitize_moves_run_past_continuation() {
        let cache = FontCache::default();
        let lig = font_from(&cache, ligature_face());
        let other = font_from(&cache, VirtualFace::ascii("B", 500));
        let mut run = build(&lig, "ffix", TextRunFlags::empty());
        run.add_glyph_run(&other, MatchType::FontGroup, 1, false);
        run.sanitize_glyph_runs();
        let offsets: Vec<usize> = run.glyph_runs().iter().map(|r| r.char_offset).collect();
        assert_eq!(offsets, vec![0, 3]);
    }

    #[test]
    fn test_draw_positions_and_partial_ligature_clip() {
        let cache = FontCache::default();
        let font = font_from(&cache, ligature_face());
        let run = build(&font, "affix", TextRunFlags::empty());

        let mut target = Recorder::default();
        let advance = run.draw(0, 5, (0.0, 600.0), DrawMode::Fill, &mut target, None);
        assert_eq!(advance, 480.0 + 961.0 + 480.0);
        let xs: Vec<f64> = target.glyphs.iter().map(|g| g.x).collect();
        assert_eq!(xs, vec![0.0, 480.0 / 60.0, 1441.0 / 60.0]);
        assert!(target.clips.is_empty());

        let mut target = Recorder::default();
        let advance = run.draw(2, 3, (0.0, 0.0), DrawMode::Fill, &mut target, None);
        assert_eq!(advance, 1121.0);
        assert_eq!(target.clips.len(), 1);
        // The ligature is drawn from one share before the part
        assert_eq!(target.glyphs[0].x, -320.0 / 60.0);
    }

    #[test]
    fn test_draw_missing_glyph_box() {
        let cache = FontCache::default();
        let font = font_from(&cache, VirtualFace::ascii("A", 500));
        let mut run = TextRun::new(&TextRunParams::new(60), 1, TextRunFlags::empty(), 0).unwrap();
        run.add_glyph_run(&font, MatchType::FontGroup, 0, false);
        run.set_missing_glyph(0, 0x4E00, &font);
        assert_eq!(run.count_missing_glyphs(), 1);

        let mut target = Recorder::default();
        run.draw(0, 1, (0.0, 0.0), DrawMode::Fill, &mut target, None);
        assert_eq!(target.missing.len(), 1);
        assert_eq!(target.missing[0].0, 0x4E00);
        assert_eq!(target.missing[0].1.width, 13.0);
    }

    #[test]
    fn test_fetch_glyph_extents_fills_cache() {
        let cache = FontCache::default();
        let font = font_from(&cache, VirtualFace::ascii("A", 500));
        let run = build(&font, "ab", TextRunFlags::NEED_BOUNDING_BOX);
        run.fetch_glyph_extents();
        let extents = font.glyph_extents(60);
        assert!(extents.is_glyph_known('a' as u32));
        assert!(extents.is_glyph_known('b' as u32));
    }

    #[test]
    fn test_size_accounting_flag() {
        let mut run = TextRun::new(&TextRunParams::new(60), 8, TextRunFlags::empty(), 0).unwrap();
        assert!(run.maybe_size_of_including_this() > 0);
        assert_eq!(run.maybe_size_of_including_this(), 0);
        run.reset_size_of_accounting_flags();
        assert!(run.maybe_size_of_including_this() > 0);
    }
}
