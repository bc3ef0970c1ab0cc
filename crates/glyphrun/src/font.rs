//! Sized font instances
//!
//! A [`Font`] is one face at one style: it owns the derived metrics and a
//! cache of shaped words. Fonts are shared through the font cache and text
//! runs; the word cache is only touched from the layout thread.

use crate::face::FaceCaps;
use crate::font_cache::FontCacheSizes;
use crate::font_entry::FontEntry;
use crate::glyph::CompressedGlyph;
use crate::metrics::{BoundingBoxType, FontMetrics, Rect, RunMetrics, Spacing};
use crate::shaped_word::{ShapedWord, WordKey, WordText};
use crate::shaper::{char_advance, select_shapers, ShaperPrefs, ShapingFace};
use crate::style::FontStyle;
use crate::text_run::{DrawMode, DrawTarget, PositionedGlyph, TextRun, TextRunFlags};
use crate::unicode::{hash_mix, is_cluster_extender, is_low_surrogate, TextUnit};
use crate::{Result, TextError};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::cell::{OnceCell, Ref, RefCell};
use std::rc::Rc;
use unicode_script::Script;

/// Ratio of x-height to em when the face does not report one
const DEFAULT_ASPECT: f64 = 0.5;

/// Sentinel for glyphs whose width does not fit a contained-width entry
const INVALID_WIDTH: u32 = 0xFFFF;

/// Per-resolution cache of glyph ink extents
///
/// Glyphs whose ink lies inside the font box only need their width; all
/// others keep a tight rectangle. Values are in app units.
#[derive(Debug)]
pub struct GlyphExtents {
    app_units_per_dev_unit: u32,
    contained_widths: RefCell<FxHashMap<u32, u16>>,
    tight_rects: RefCell<FxHashMap<u32, Rect>>,
}

impl GlyphExtents {
    pub fn new(app_units_per_dev_unit: u32) -> Self {
        Self {
            app_units_per_dev_unit,
            contained_widths: RefCell::new(FxHashMap::default()),
            tight_rects: RefCell::new(FxHashMap::default()),
        }
    }

    pub fn app_units_per_dev_unit(&self) -> u32 {
        self.app_units_per_dev_unit
    }

    pub fn contained_width(&self, glyph: u32) -> Option<f64> {
        self.contained_widths
            .borrow()
            .get(&glyph)
            .map(|&w| w as f64)
    }

    pub fn set_contained_width(&self, glyph: u32, width: u16) {
        self.contained_widths.borrow_mut().insert(glyph, width);
    }

    pub fn tight_rect(&self, glyph: u32) -> Option<Rect> {
        self.tight_rects.borrow().get(&glyph).copied()
    }

    pub fn set_tight_rect(&self, glyph: u32, rect: Rect) {
        self.tight_rects.borrow_mut().insert(glyph, rect);
    }

    pub fn is_glyph_known(&self, glyph: u32) -> bool {
        self.contained_widths.borrow().contains_key(&glyph)
            || self.tight_rects.borrow().contains_key(&glyph)
    }

    pub fn is_glyph_known_with_tight_extents(&self, glyph: u32) -> bool {
        self.tight_rects.borrow().contains_key(&glyph)
    }

    pub fn size_of_including_this(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.contained_widths.borrow().capacity() * std::mem::size_of::<(u32, u16)>()
            + self.tight_rects.borrow().capacity() * std::mem::size_of::<(u32, Rect)>()
    }
}

type WordBucket = SmallVec<[Box<ShapedWord>; 1]>;

/// A face at a concrete size and style
#[derive(Debug)]
pub struct Font {
    entry: Rc<FontEntry>,
    style: FontStyle,
    adjusted_size: f64,
    metrics: FontMetrics,
    space_glyph: u32,
    synthetic_bold: bool,
    caps: FaceCaps,
    word_cache: RefCell<FxHashMap<u32, WordBucket>>,
    glyph_extents: RefCell<SmallVec<[Rc<GlyphExtents>; 1]>>,
    shaping_face: OnceCell<Option<ShapingFace>>,
}

impl Font {
    /// Builds a font and computes its metrics. Faces whose metrics cannot lay
    /// out a line are marked invalid.
    pub fn new(entry: Rc<FontEntry>, style: FontStyle, needs_bold: bool) -> Result<Self> {
        let source = entry
            .source()
            .ok_or_else(|| TextError::FontLoadError(format!("'{}' has no face data", entry.name())))?;
        let raw = source.raw_metrics();
        let aspect = match raw.x_height {
            Some(x) if x > 0 && raw.units_per_em > 0 => x as f64 / raw.units_per_em as f64,
            _ => DEFAULT_ASPECT,
        };
        let adjusted_size = style.adjusted_size(aspect);

        let mapper = source.mapper();
        let space = mapper.as_ref().and_then(|m| char_advance(m, ' ' as u32));
        let zero = mapper.as_ref().and_then(|m| char_advance(m, '0' as u32));

        let mut metrics =
            FontMetrics::from_raw(raw, adjusted_size, space.map(|s| s.1), zero.map(|z| z.1));
        metrics.calculate_derived(entry.is_fixed_pitch());
        metrics.sanitize(adjusted_size, style.system_font, entry.is_bad_underline_font());
        if let Err(reason) = metrics.validate(adjusted_size) {
            entry.mark_invalid();
            return Err(TextError::InvalidMetrics(format!("{}: {}", entry.name(), reason)));
        }

        tracing::debug!(
            "Created font '{}' at {}px (weight {}, synthetic bold: {})",
            entry.name(),
            adjusted_size,
            style.weight,
            needs_bold
        );

        Ok(Self {
            caps: source.caps(),
            space_glyph: space.map_or(0, |s| s.0),
            entry,
            style,
            adjusted_size,
            metrics,
            synthetic_bold: needs_bold,
            word_cache: RefCell::new(FxHashMap::default()),
            glyph_extents: RefCell::new(SmallVec::new()),
            shaping_face: OnceCell::new(),
        })
    }

    pub fn entry(&self) -> &Rc<FontEntry> {
        &self.entry
    }

    pub fn name(&self) -> &str {
        self.entry.name()
    }

    /// The rustybuzz face for sfnt data, parsed on first use
    pub fn shaping_face(&self) -> Option<&ShapingFace> {
        self.shaping_face
            .get_or_init(|| {
                let source = self.entry.source()?;
                let sfnt = source.as_sfnt()?;
                let face = ShapingFace::parse(sfnt.shared_data(), sfnt.index());
                if face.is_none() {
                    tracing::warn!("rustybuzz could not load face '{}'", self.name());
                }
                face
            })
            .as_ref()
    }

    pub fn style(&self) -> &FontStyle {
        &self.style
    }

    /// Size in device pixels after font-size-adjust
    pub fn adjusted_size(&self) -> f64 {
        self.adjusted_size
    }

    pub fn metrics(&self) -> &FontMetrics {
        &self.metrics
    }

    /// Glyph id of U+0020, or 0 if the face has none
    pub fn space_glyph(&self) -> u32 {
        self.space_glyph
    }

    pub fn caps(&self) -> FaceCaps {
        self.caps
    }

    pub fn is_synthetic_bold(&self) -> bool {
        self.synthetic_bold
    }

    /// Extra advance, in device pixels, added to each cluster when bold is
    /// synthesized
    pub fn synthetic_bold_offset(&self) -> f64 {
        if self.synthetic_bold {
            self.adjusted_size / 16.0
        } else {
            0.0
        }
    }

    pub fn has_character(&self, ch: u32) -> bool {
        self.entry.has_character(ch)
    }

    pub fn underline_offset(&self) -> f64 {
        self.metrics.underline_offset
    }

    /// Width in device pixels for a Unicode space character this font can
    /// stand in for, or `None` for anything else.
    pub fn synthesize_space_width(&self, ch: u32) -> Option<f64> {
        let size = self.adjusted_size;
        let width = match ch {
            0x2000 | 0x2002 => size / 2.0,
            0x2001 | 0x2003 => size,
            0x2004 => size / 3.0,
            0x2005 => size / 4.0,
            0x2006 => size / 6.0,
            0x2007 => self.metrics.zero_or_ave_char_width,
            0x2008 => self.metrics.space_width,
            0x2009 | 0x202F => size / 5.0,
            0x200A => size / 10.0,
            _ => return None,
        };
        Some(width)
    }

    /// Returns the cached word for `key`, shaping it on a miss. A hit resets
    /// the word's age. Returns `None` only if the word cannot be allocated.
    pub fn get_shaped_word(
        &self,
        key: &WordKey<'_>,
        prefs: &ShaperPrefs,
    ) -> Option<Ref<'_, ShapedWord>> {
        let hit = {
            let mut cache = self.word_cache.borrow_mut();
            match cache
                .get_mut(&key.hash)
                .and_then(|bucket| bucket.iter_mut().find(|w| w.matches(key)))
            {
                Some(word) => {
                    word.reset_age();
                    true
                }
                None => false,
            }
        };

        if hit {
            tracing::trace!("Word cache hit in '{}' ({} units)", self.name(), key.text.len());
        } else {
            let mut word = ShapedWord::create(key)?;
            let text = key.text.to_utf16();
            if !self.shape_word(&mut word, &text, prefs) {
                tracing::warn!("Failed to shape word in '{}'; text will be garbled", self.name());
            }
            tracing::trace!("Word cache miss in '{}' ({} units)", self.name(), key.text.len());
            self.word_cache
                .borrow_mut()
                .entry(key.hash)
                .or_default()
                .push(Box::new(word));
        }

        Ref::filter_map(self.word_cache.borrow(), |cache| {
            cache
                .get(&key.hash)?
                .iter()
                .find(|w| w.matches(key))
                .map(|w| &**w)
        })
        .ok()
    }

    /// Runs the selected shapers in order until one succeeds.
    fn shape_word(&self, word: &mut ShapedWord, text: &[u16], prefs: &ShaperPrefs) -> bool {
        let kinds = select_shapers(word.script(), &self.style.features, self.caps, prefs);
        let pristine = (kinds.len() > 1).then(|| word.clone());
        for kind in kinds {
            if kind.shaper().shape_word(self, word, text) {
                if self.synthetic_bold {
                    let offset = (self.synthetic_bold_offset()
                        * word.app_units_per_dev_unit() as f64)
                        .round() as i32;
                    word.glyph_buffer_mut()
                        .adjust_advances_for_synthetic_bold(offset);
                }
                return true;
            }
            tracing::warn!("{:?} shaper failed for '{}', trying next", kind, self.name());
            if let Some(pristine) = &pristine {
                *word = pristine.clone();
            }
        }
        false
    }

    /// Ages every cached word, dropping those that reach `max_age`.
    pub fn age_cached_words(&self, max_age: u32) {
        let mut cache = self.word_cache.borrow_mut();
        let before: usize = cache.values().map(|b| b.len()).sum();
        cache.retain(|_, bucket| {
            bucket.retain(|word| word.increment_age() < max_age);
            !bucket.is_empty()
        });
        let removed = before - cache.values().map(|b| b.len()).sum::<usize>();
        if removed > 0 {
            tracing::debug!("Expired {} shaped words from '{}'", removed, self.name());
        }
    }

    pub fn clear_cached_words(&self) {
        self.word_cache.borrow_mut().clear();
    }

    /// Number of cached words
    pub fn cached_word_count(&self) -> usize {
        self.word_cache.borrow().values().map(|b| b.len()).sum()
    }

    /// Splits `len` units of `text` at `start` into words at spaces and
    /// invalid characters and copies each shaped word into `run` at the same
    /// offset. The caller has already added a glyph run for this font
    /// covering the range. Returns `false` if a word could not be allocated.
    pub fn split_and_init_text_run<T: TextUnit>(
        &self,
        run: &mut TextRun,
        text: &[T],
        start: usize,
        len: usize,
        script: Script,
        prefs: &ShaperPrefs,
    ) -> bool {
        if len == 0 {
            return true;
        }
        let mut flags =
            run.flags() & (TextRunFlags::IS_RTL | TextRunFlags::DISABLE_OPTIONAL_LIGATURES);
        if T::IS_8BIT {
            flags |= TextRunFlags::IS_8BIT;
        }
        let app_units = run.app_units_per_dev_unit();
        let text = &text[start..start + len];

        let mut word_start = 0;
        let mut hash = 0u32;
        let mut word_is_8bit = true;
        let mut next_ch = text[0].to_u32();
        for i in 0..=len {
            let ch = next_ch;
            next_ch = if i + 1 < len {
                text[i + 1].to_u32()
            } else {
                '\n' as u32
            };
            let boundary = (ch == ' ' as u32 || ch == 0xA0) && !is_cluster_extender(next_ch);
            let invalid = !boundary && crate::font_group::is_invalid_char(ch);
            let length = i - word_start;

            let mut break_here = boundary || invalid;
            if !break_here {
                if T::IS_8BIT {
                    break_here = length >= crate::shaped_word::MAX_LENGTH;
                } else if length >= crate::shaped_word::MAX_LENGTH - 15 {
                    // Avoid splitting a cluster or a surrogate pair if possible
                    let low = is_low_surrogate(ch);
                    break_here = (!low && !is_cluster_extender(ch))
                        || (!low && length >= crate::shaped_word::MAX_LENGTH - 3)
                        || length >= crate::shaped_word::MAX_LENGTH;
                }
            }

            if !break_here {
                if ch >= 0x100 {
                    word_is_8bit = false;
                }
                hash = hash_mix(hash, ch);
                continue;
            }

            if length > 0 {
                let mut word_flags = flags;
                if !T::IS_8BIT && word_is_8bit {
                    word_flags |= TextRunFlags::IS_8BIT;
                }
                let key = WordKey::with_hash(
                    T::word_text(&text[word_start..i]),
                    script,
                    app_units,
                    word_flags,
                    hash,
                );
                let Some(word) = self.get_shaped_word(&key, prefs) else {
                    return false;
                };
                run.copy_glyph_data_from(&word, start + word_start);
            }

            if boundary {
                if !run.set_space_glyph_if_simple(self, start + i, ch) {
                    let space = [b' '];
                    let key = WordKey::with_hash(
                        WordText::Latin1(&space),
                        script,
                        app_units,
                        flags | TextRunFlags::IS_8BIT,
                        hash_mix(0, ' ' as u32),
                    );
                    let Some(word) = self.get_shaped_word(&key, prefs) else {
                        return false;
                    };
                    run.copy_glyph_data_from(&word, start + i);
                }
                hash = 0;
                word_start = i + 1;
                word_is_8bit = true;
                continue;
            }

            if i == len {
                break;
            }

            if invalid {
                if ch == '\t' as u32 {
                    run.set_is_tab(start + i);
                } else if ch == '\n' as u32 {
                    run.set_is_newline(start + i);
                }
                hash = 0;
                word_start = i + 1;
                word_is_8bit = true;
                continue;
            }

            // Forced break: this character starts the next word
            hash = hash_mix(0, ch);
            word_start = i;
            word_is_8bit = ch < 0x100;
        }
        true
    }

    /// Extents cache for one resolution, created on first use.
    pub fn glyph_extents(&self, app_units_per_dev_unit: u32) -> Rc<GlyphExtents> {
        let mut all = self.glyph_extents.borrow_mut();
        if let Some(extents) = all
            .iter()
            .find(|e| e.app_units_per_dev_unit() == app_units_per_dev_unit)
        {
            return Rc::clone(extents);
        }
        let extents = Rc::new(GlyphExtents::new(app_units_per_dev_unit));
        all.push(Rc::clone(&extents));
        extents
    }

    /// Measures `glyph` into `extents`. Glyphs inside the font box only get a
    /// width unless `need_tight` is set.
    pub fn setup_glyph_extents(&self, glyph: u32, need_tight: bool, extents: &GlyphExtents) {
        let app_units = extents.app_units_per_dev_unit() as f64;
        let Some(source) = self.entry.source() else {
            extents.set_contained_width(glyph, 0);
            return;
        };
        let upem = source.units_per_em().max(1) as f64;
        let to_px = |v: f64| v * self.adjusted_size / upem;
        let bounds = source
            .mapper()
            .and_then(|m| m.glyph_bounds(glyph))
            .map(|r| Rect::new(to_px(r.x), to_px(r.y), to_px(r.width), to_px(r.height)))
            .unwrap_or_default();

        if !need_tight
            && bounds.x >= 0.0
            && bounds.y >= -self.metrics.max_ascent
            && bounds.bottom() <= self.metrics.max_descent
        {
            let width = (bounds.right() * app_units).ceil() as u32;
            if width < INVALID_WIDTH {
                extents.set_contained_width(glyph, width as u16);
                return;
            }
        }
        extents.set_tight_rect(
            glyph,
            Rect::new(
                bounds.x * app_units,
                bounds.y * app_units,
                bounds.width * app_units,
                bounds.height * app_units,
            ),
        );
    }

    /// `(advance, glyph)` of a simple space record at this resolution, if
    /// the space glyph fits one.
    pub fn simple_space(&self, app_units_per_dev_unit: u32) -> Option<(u32, u32)> {
        if self.space_glyph == 0 || !CompressedGlyph::is_simple_glyph_id(self.space_glyph) {
            return None;
        }
        let advance = (self.metrics.space_width * app_units_per_dev_unit as f64).round() as u32;
        CompressedGlyph::is_simple_advance(advance).then_some((advance, self.space_glyph))
    }

    /// Measures glyphs `start..end` of `run`, all of which use this font.
    /// `spacing` covers the same range. An empty range still reports the
    /// font's ascent and descent.
    pub fn measure(
        &self,
        run: &TextRun,
        start: usize,
        end: usize,
        bbox_type: BoundingBoxType,
        spacing: Option<&[Spacing]>,
    ) -> RunMetrics {
        let app_units = run.app_units_per_dev_unit() as f64;
        let ascent = self.metrics.max_ascent * app_units;
        let descent = self.metrics.max_descent * app_units;
        let mut metrics = RunMetrics {
            ascent,
            descent,
            ..Default::default()
        };
        if start >= end {
            metrics.bounding_box = Rect::new(0.0, -ascent, 0.0, ascent + descent);
            return metrics;
        }

        let is_rtl = run.is_rtl();
        let direction = run.direction();
        let needs_extents = run.flags().contains(TextRunFlags::NEED_BOUNDING_BOX);
        let extents = (bbox_type.is_tight() || needs_extents || run.has_detailed_glyphs())
            .then(|| self.glyph_extents(run.app_units_per_dev_unit()));
        let font_box_rect = |advance: f64| Rect::new(0.0, -ascent, advance, ascent + descent);

        let mut x = 0.0;
        let mut advance_min: f64 = 0.0;
        let mut advance_max: f64 = 0.0;
        if let Some(spacing) = spacing {
            x += direction * spacing[0].before;
        }

        for i in start..end {
            let g = run.glyphs()[i];
            if g.is_simple_glyph() {
                let advance = g.simple_advance() as f64;
                if let Some(extents) = extents.as_ref().filter(|_| bbox_type.is_tight() || needs_extents) {
                    let glyph = g.simple_glyph();
                    if !bbox_type.is_tight() && !extents.is_glyph_known(glyph) {
                        self.setup_glyph_extents(glyph, false, extents);
                    }
                    match extents.contained_width(glyph).filter(|_| !bbox_type.is_tight()) {
                        Some(width) => {
                            advance_min = advance_min.min(x).min(x + direction * width);
                            advance_max = advance_max.max(x).max(x + direction * width);
                        }
                        None => {
                            let rect = self
                                .tight_glyph_rect(glyph, extents)
                                .unwrap_or_else(|| font_box_rect(advance));
                            let dx = if is_rtl { x - advance } else { x };
                            metrics.bounding_box = metrics.bounding_box.union(&rect.translate(dx, 0.0));
                        }
                    }
                }
                x += direction * advance;
            } else if g.glyph_count() > 0 {
                for detail in run.detailed_glyphs(i).unwrap_or(&[]) {
                    let advance = detail.advance as f64;
                    let rect = extents
                        .as_ref()
                        .filter(|_| !g.is_missing())
                        .and_then(|e| self.tight_glyph_rect(detail.glyph_id, e))
                        .unwrap_or_else(|| font_box_rect(advance));
                    let dx = x + detail.x_offset as f64 - if is_rtl { advance } else { 0.0 };
                    metrics.bounding_box = metrics
                        .bounding_box
                        .union(&rect.translate(dx, detail.y_offset as f64));
                    x += direction * advance;
                }
            }

            if let Some(spacing) = spacing {
                let mut space = spacing[i - start].after;
                if i + 1 < end {
                    space += spacing[i + 1 - start].before;
                }
                x += direction * space;
            }
        }

        if bbox_type == BoundingBoxType::Loose {
            advance_min = advance_min.min(x);
            advance_max = advance_max.max(x);
            let font_box = Rect::new(advance_min, -ascent, advance_max - advance_min, ascent + descent);
            metrics.bounding_box = metrics.bounding_box.union(&font_box);
        }
        if is_rtl {
            metrics.bounding_box = metrics.bounding_box.translate(-x, 0.0);
        }
        metrics.advance_width = x * direction;
        metrics
    }

    fn tight_glyph_rect(&self, glyph: u32, extents: &GlyphExtents) -> Option<Rect> {
        if !extents.is_glyph_known_with_tight_extents(glyph) {
            self.setup_glyph_extents(glyph, true, extents);
        }
        extents.tight_rect(glyph)
    }

    /// Draws glyphs `start..end` of `run` into `target`, advancing `x` (app
    /// units) along the baseline at `y`. Missing characters are drawn as
    /// boxes except when building a path.
    #[allow(clippy::too_many_arguments)]
    pub fn draw(
        &self,
        run: &TextRun,
        start: usize,
        end: usize,
        target: &mut dyn DrawTarget,
        mode: DrawMode,
        x: &mut f64,
        y: f64,
        spacing: Option<&[Spacing]>,
    ) {
        if start >= end {
            return;
        }
        let app_units = run.app_units_per_dev_unit() as f64;
        let is_rtl = run.is_rtl();
        let direction = run.direction();
        let strikes = if self.synthetic_bold {
            (self.synthetic_bold_offset().round() as usize).max(1)
        } else {
            0
        };

        let mut batch: Vec<PositionedGlyph> = Vec::with_capacity(end - start);
        let emit = |batch: &mut Vec<PositionedGlyph>, glyph: u32, gx: f64, gy: f64| {
            let px = gx / app_units;
            let py = gy / app_units;
            batch.push(PositionedGlyph { glyph, x: px, y: py });
            // Synthetic bold overstrikes one device pixel apart
            for k in 1..=strikes {
                batch.push(PositionedGlyph {
                    glyph,
                    x: px + direction * k as f64,
                    y: py,
                });
            }
        };

        if let Some(spacing) = spacing {
            *x += direction * spacing[0].before;
        }
        for i in start..end {
            let g = run.glyphs()[i];
            if g.is_simple_glyph() {
                let advance = g.simple_advance() as f64;
                let gx = if is_rtl { *x - advance } else { *x };
                emit(&mut batch, g.simple_glyph(), gx, y);
                *x += direction * advance;
            } else if g.glyph_count() > 0 {
                for detail in run.detailed_glyphs(i).unwrap_or(&[]) {
                    let advance = detail.advance as f64;
                    let left = if is_rtl { *x - advance } else { *x };
                    if g.is_missing() {
                        if advance > 0.0 && mode != DrawMode::Path {
                            if !batch.is_empty() {
                                target.draw_glyphs(self, &batch, mode);
                                batch.clear();
                            }
                            let rect = Rect::new(
                                left / app_units,
                                y / app_units - self.metrics.max_ascent,
                                advance / app_units,
                                self.metrics.max_ascent + self.metrics.max_descent,
                            );
                            target.draw_missing_glyph(detail.glyph_id, rect);
                        }
                    } else {
                        emit(
                            &mut batch,
                            detail.glyph_id,
                            left + detail.x_offset as f64,
                            y + detail.y_offset as f64,
                        );
                    }
                    *x += direction * advance;
                }
            }

            if let Some(spacing) = spacing {
                let mut space = spacing[i - start].after;
                if i + 1 < end {
                    space += spacing[i + 1 - start].before;
                }
                *x += direction * space;
            }
        }
        if !batch.is_empty() {
            target.draw_glyphs(self, &batch, mode);
        }
    }

    pub fn word_cache_size(&self) -> usize {
        let cache = self.word_cache.borrow();
        cache.capacity() * std::mem::size_of::<(u32, WordBucket)>()
            + cache
                .values()
                .flatten()
                .map(|w| w.size_of_including_this())
                .sum::<usize>()
    }

    /// Adds this font's memory to `sizes`, keeping shaped words separate.
    pub fn add_size_of(&self, sizes: &mut FontCacheSizes) {
        sizes.fonts += self.size_of_including_this();
        sizes.shaped_words += self.word_cache_size();
    }

    /// Font memory excluding the word cache
    pub fn size_of_excluding_this(&self) -> usize {
        self.style.language.capacity()
            + self.style.features.capacity() * std::mem::size_of::<crate::style::FontFeature>()
            + self
                .glyph_extents
                .borrow()
                .iter()
                .map(|e| e.size_of_including_this())
                .sum::<usize>()
    }

    pub fn size_of_including_this(&self) -> usize {
        std::mem::size_of::<Self>() + self.size_of_excluding_this()
    }
}
