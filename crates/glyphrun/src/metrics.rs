//! Font and run metrics
//!
//! Font metrics are in device pixels; run metrics (advance, ascent, descent,
//! bounding box) are in app units.

use crate::face::RawMetrics;

/// x-height estimate when the face provides none, as a fraction of ascent
const DEFAULT_XHEIGHT_FACTOR: f64 = 0.56;

/// Axis-aligned rectangle, relative to the baseline-left origin of a run
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Smallest rect containing both; empty rects are ignored.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Rect::new(
            x,
            y,
            self.right().max(other.right()) - x,
            self.bottom().max(other.bottom()) - y,
        )
    }
}

/// Which bounding box a measurement should compute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundingBoxType {
    /// Font box union glyph extents; cheap and possibly larger than the ink
    #[default]
    Loose,
    /// Exact ink extents of the glyphs
    TightInkExtents,
    /// Exact extents of the hinted outlines
    TightHintedOutlineExtents,
}

impl BoundingBoxType {
    pub fn is_tight(self) -> bool {
        self != BoundingBoxType::Loose
    }
}

/// Extra space around a character, in app units
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Spacing {
    pub before: f64,
    pub after: f64,
}

/// Measurement of a range of a text run
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunMetrics {
    /// May be negative with negative spacing; additive over adjacent ranges
    pub advance_width: f64,
    /// Zero for empty ranges, never negative
    pub ascent: f64,
    /// Zero for empty ranges, never negative
    pub descent: f64,
    /// Typically `y == -ascent`
    pub bounding_box: Rect,
}

impl RunMetrics {
    /// Appends `other` to this measurement. When `other_is_on_left`, `other`
    /// comes first visually (right-to-left accumulation).
    pub fn combine_with(&mut self, other: &RunMetrics, other_is_on_left: bool) {
        self.ascent = self.ascent.max(other.ascent);
        self.descent = self.descent.max(other.descent);
        self.bounding_box = if other_is_on_left {
            self.bounding_box
                .translate(other.advance_width, 0.0)
                .union(&other.bounding_box)
        } else {
            self.bounding_box
                .union(&other.bounding_box.translate(self.advance_width, 0.0))
        };
        self.advance_width += other.advance_width;
    }
}

/// Metrics of a sized font, in device pixels
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FontMetrics {
    pub x_height: f64,
    pub superscript_offset: f64,
    pub subscript_offset: f64,
    pub strikeout_size: f64,
    pub strikeout_offset: f64,
    pub underline_size: f64,
    pub underline_offset: f64,

    pub internal_leading: f64,
    pub external_leading: f64,

    pub em_height: f64,
    pub em_ascent: f64,
    pub em_descent: f64,
    pub max_height: f64,
    pub max_ascent: f64,
    pub max_descent: f64,
    pub max_advance: f64,

    pub ave_char_width: f64,
    pub space_width: f64,
    /// Width of '0', or `ave_char_width` when the face has no '0'
    pub zero_or_ave_char_width: f64,
}

impl FontMetrics {
    /// Scales raw face metrics to `size` device pixels.
    ///
    /// `space_advance` and `zero_advance` are glyph advances in font units.
    pub fn from_raw(
        raw: &RawMetrics,
        size: f64,
        space_advance: Option<u16>,
        zero_advance: Option<u16>,
    ) -> Self {
        let scale = size / raw.units_per_em.max(1) as f64;
        let mut m = FontMetrics {
            em_height: size,
            max_ascent: raw.ascender as f64 * scale,
            max_descent: -(raw.descender as f64) * scale,
            external_leading: (raw.line_gap as f64 * scale).max(0.0),
            max_advance: raw.max_advance as f64 * scale,
            ..Default::default()
        };
        if let Some(x_height) = raw.x_height {
            m.x_height = x_height as f64 * scale;
        }
        if let Some((position, thickness)) = raw.underline {
            m.underline_offset = position as f64 * scale;
            m.underline_size = thickness as f64 * scale;
        }
        if let Some((position, thickness)) = raw.strikeout {
            m.strikeout_offset = position as f64 * scale;
            m.strikeout_size = thickness as f64 * scale;
        }
        if let Some(offset) = raw.superscript_offset {
            m.superscript_offset = offset as f64 * scale;
        }
        if let Some(offset) = raw.subscript_offset {
            m.subscript_offset = offset as f64 * scale;
        }
        m.space_width = space_advance.map_or(size / 4.0, |a| a as f64 * scale);
        m.ave_char_width = match raw.avg_char_width {
            Some(w) if w > 0 => w as f64 * scale,
            _ => m.space_width.max(size / 2.0),
        };
        m.zero_or_ave_char_width = zero_advance.map_or(m.ave_char_width, |a| a as f64 * scale);
        m
    }

    /// Fills in values derived from the primary metrics.
    pub fn calculate_derived(&mut self, fixed_pitch: bool) {
        // Round to 1/1024 first so tiny float noise does not bump the ceiling
        self.max_ascent = ((self.max_ascent * 1024.0).round() / 1024.0).ceil();
        self.max_descent = ((self.max_descent * 1024.0).round() / 1024.0).ceil();

        if self.x_height <= 0.0 {
            self.x_height = self.max_ascent * DEFAULT_XHEIGHT_FACTOR;
        }
        self.max_height = self.max_ascent + self.max_descent;
        self.internal_leading = (self.max_height - self.em_height).max(0.0);
        if self.max_height > 0.0 {
            self.em_ascent = self.max_ascent * self.em_height / self.max_height;
        }
        self.em_descent = self.em_height - self.em_ascent;

        if fixed_pitch {
            self.max_advance = self.ave_char_width;
        }
        if self.subscript_offset == 0.0 {
            self.subscript_offset = self.x_height;
        }
        if self.superscript_offset == 0.0 {
            self.superscript_offset = self.x_height;
        }
        if self.strikeout_offset == 0.0 {
            self.strikeout_offset = self.x_height * 0.5;
        }
        if self.strikeout_size == 0.0 {
            self.strikeout_size = self.underline_size;
        }
    }

    /// Clamps decoration metrics into usable ranges. A zero-size font gets
    /// all-zero metrics.
    pub fn sanitize(&mut self, size: f64, is_system_font: bool, is_bad_underline_font: bool) {
        if size == 0.0 {
            *self = FontMetrics::default();
            return;
        }
        if self.superscript_offset <= 0.0 || self.superscript_offset >= self.max_ascent {
            self.superscript_offset = self.x_height;
        }
        if self.subscript_offset <= 0.0 || self.subscript_offset >= self.max_ascent {
            self.subscript_offset = self.x_height;
        }

        self.underline_size = self.underline_size.max(1.0);
        self.strikeout_size = self.strikeout_size.max(1.0);
        self.underline_offset = self.underline_offset.min(-1.0);

        if self.max_ascent < 1.0 {
            self.underline_size = 0.0;
            self.underline_offset = 0.0;
            self.strikeout_size = 0.0;
            self.strikeout_offset = 0.0;
            return;
        }

        if !is_system_font && is_bad_underline_font {
            self.underline_offset = self.underline_offset.min(-2.0);
            if self.internal_leading + self.external_leading > self.underline_size {
                self.underline_offset = self.underline_offset.min(-self.em_descent);
            } else {
                self.underline_offset = self
                    .underline_offset
                    .min(self.underline_size - self.em_descent);
            }
        } else if self.underline_size - self.underline_offset > self.max_descent {
            if self.underline_size > self.max_descent {
                self.underline_size = self.max_descent.max(1.0);
            }
            self.underline_offset = self.underline_size - self.max_descent;
        }

        let mut half_strikeout = (self.strikeout_size / 2.0 + 0.5).floor();
        if half_strikeout + self.strikeout_offset > self.max_ascent {
            if self.strikeout_size > self.max_ascent {
                self.strikeout_size = self.max_ascent.max(1.0);
                half_strikeout = (self.strikeout_size / 2.0 + 0.5).floor();
            }
            let ascent = (self.max_ascent + 0.5).floor();
            self.strikeout_offset = half_strikeout.max(ascent / 2.0);
        }

        if self.underline_size > self.max_ascent {
            self.underline_size = self.max_ascent;
        }
    }

    /// Rejects metrics that cannot lay out a line.
    pub fn validate(&self, size: f64) -> Result<(), String> {
        if size == 0.0 {
            return Ok(());
        }
        if !self.em_height.is_finite() || self.em_height <= 0.0 {
            return Err(format!("em height {} is not positive", self.em_height));
        }
        if !self.max_height.is_finite() || self.max_height <= 0.0 {
            return Err(format!("line height {} is not positive", self.max_height));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawMetrics {
        RawMetrics {
            units_per_em: 1000,
            ascender: 800,
            descender: -200,
            line_gap: 100,
            x_height: Some(500),
            avg_char_width: Some(500),
            max_advance: 1000,
            underline: Some((-100, 50)),
            strikeout: Some((250, 50)),
            superscript_offset: None,
            subscript_offset: None,
        }
    }

    #[test]
    fn test_scaling_and_derived() {
        let mut m = FontMetrics::from_raw(&raw(), 20.0, Some(250), None);
        m.calculate_derived(false);
        assert_eq!(m.max_ascent, 16.0);
        assert_eq!(m.max_descent, 4.0);
        assert_eq!(m.max_height, 20.0);
        assert_eq!(m.internal_leading, 0.0);
        assert_eq!(m.external_leading, 2.0);
        assert_eq!(m.x_height, 10.0);
        assert_eq!(m.space_width, 5.0);
        assert_eq!(m.zero_or_ave_char_width, m.ave_char_width);
        assert_eq!(m.superscript_offset, m.x_height);
        assert!(m.validate(20.0).is_ok());
    }

    #[test]
    fn test_sanitize_clamps_underline() {
        let mut m = FontMetrics::from_raw(&raw(), 20.0, None, None);
        m.calculate_derived(false);
        m.sanitize(20.0, false, false);
        assert!(m.underline_size >= 1.0);
        assert!(m.underline_offset <= -1.0);
        assert!(m.underline_size - m.underline_offset <= m.max_descent + f64::EPSILON);
    }

    #[test]
    fn test_degenerate_metrics_rejected() {
        let mut bad = raw();
        bad.ascender = 0;
        bad.descender = 0;
        let mut m = FontMetrics::from_raw(&bad, 20.0, None, None);
        m.calculate_derived(false);
        assert!(m.validate(20.0).is_err());
    }

    #[test]
    fn test_combine_with() {
        let mut left = RunMetrics {
            advance_width: 100.0,
            ascent: 10.0,
            descent: 2.0,
            bounding_box: Rect::new(0.0, -10.0, 100.0, 12.0),
        };
        let right = RunMetrics {
            advance_width: 50.0,
            ascent: 12.0,
            descent: 1.0,
            bounding_box: Rect::new(0.0, -12.0, 50.0, 13.0),
        };
        left.combine_with(&right, false);
        assert_eq!(left.advance_width, 150.0);
        assert_eq!(left.ascent, 12.0);
        assert_eq!(left.descent, 2.0);
        assert_eq!(left.bounding_box, Rect::new(0.0, -12.0, 150.0, 14.0));
    }

    #[test]
    fn test_union_ignores_empty() {
        let a = Rect::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(a.union(&Rect::default()), a);
        assert_eq!(Rect::default().union(&a), a);
    }
}
