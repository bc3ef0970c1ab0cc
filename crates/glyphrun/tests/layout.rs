//! End-to-end layout through a font group: run construction, measurement,
//! line breaking, drawing and cache lifetime.

use std::rc::Rc;

use glyphrun::{
    BoundingBoxType, BreakOptions, DrawMode, DrawTarget, FaceSource, Font, FontContext,
    FontEntry, FontGroup, FontList, FontSlant, FontStyle, MatchType, PositionedGlyph, Rect,
    TextConfig, TextRunFlags, TextRunParams, VirtualFace, VirtualGlyph,
};

fn entry(face: VirtualFace) -> Rc<FontEntry> {
    Rc::new(FontEntry::new(FaceSource::Virtual(face)))
}

fn context() -> FontContext {
    let list = FontList::new(Rc::new(TextConfig::default()));
    list.add_face("Latin Sans", entry(VirtualFace::ascii("Latin Sans", 500)));
    list.add_face(
        "Han Mincho",
        entry(VirtualFace::ascii("Han Mincho", 500).with_char_range(0x4E00, 0x9FFF, 1000)),
    );
    FontContext::new(list)
}

fn style(size: f64) -> FontStyle {
    FontStyle::new(size, 400, FontSlant::Normal)
}

fn params() -> TextRunParams {
    TextRunParams::new(60)
}

fn utf16(s: &str) -> Vec<u16> {
    s.encode_utf16().collect()
}

#[derive(Default)]
struct Recorder {
    fonts: Vec<String>,
    glyphs: Vec<PositionedGlyph>,
}

impl DrawTarget for Recorder {
    fn setup_font(&mut self, font: &Font) -> bool {
        self.fonts.push(font.name().to_string());
        true
    }

    fn draw_glyphs(&mut self, _font: &Font, glyphs: &[PositionedGlyph], _mode: DrawMode) {
        self.glyphs.extend_from_slice(glyphs);
    }

    fn draw_missing_glyph(&mut self, _ch: u32, _rect: Rect) {}

    fn clip_extents(&self) -> Rect {
        Rect::new(0.0, -100.0, 10000.0, 200.0)
    }

    fn push_clip(&mut self, _rect: Rect) {}

    fn pop_clip(&mut self) {}
}

#[test]
fn line_breaking_over_group_built_run() {
    let ctx = context();
    let group = FontGroup::new("Latin Sans", style(16.0), None, &ctx);
    let run = group
        .make_text_run_str("The quick fox", &params(), TextRunFlags::COMPUTE_LINE_BREAKS)
        .unwrap();
    assert!(run.flags().contains(TextRunFlags::IS_8BIT));
    assert_eq!(run.glyph_runs().len(), 1);

    let breaks: Vec<usize> = (0..run.len())
        .filter(|&i| run.can_break_line_before(i))
        .collect();
    assert_eq!(breaks, vec![4, 10]);

    let options = BreakOptions {
        width: 4560.0,
        suppress_initial_break: true,
        trim_whitespace: true,
        ..Default::default()
    };
    let result = run.break_and_measure_text(0, run.len(), &options, None);
    assert_eq!(result.chars_fit, 10);
    assert_eq!(result.trimmed_whitespace, 480.0);
}

#[test]
fn advance_is_additive_across_fonts() {
    let ctx = context();
    let group = FontGroup::new("Latin Sans", style(16.0), None, &ctx);
    let text = utf16("ab\u{4E2D}\u{6587}cd");
    let run = group
        .make_text_run_16bit(&text, &params(), TextRunFlags::empty())
        .unwrap();
    let total = run.get_advance_width(0, run.len(), None);
    assert_eq!(total, 4.0 * 480.0 + 2.0 * 960.0);
    for split in 0..=run.len() {
        let left = run.get_advance_width(0, split, None);
        let right = run.get_advance_width(split, run.len() - split, None);
        assert_eq!(left + right, total, "split at {}", split);
    }
}

#[test]
fn empty_ranges_measure_zero() {
    let ctx = context();
    let group = FontGroup::new("Latin Sans", style(16.0), None, &ctx);
    let run = group
        .make_text_run_str("a\u{4E2D}b", &params(), TextRunFlags::empty())
        .unwrap();
    for offset in 0..=run.len() {
        let metrics = run.measure_text(offset, 0, BoundingBoxType::Loose, None);
        assert_eq!(metrics.advance_width, 0.0);
    }
}

#[test]
fn stored_text_reads_back() {
    let ctx = context();
    let group = FontGroup::new("Latin Sans", style(16.0), None, &ctx);

    let narrow = group
        .make_text_run_8bit(b"caf\xE9", &params(), TextRunFlags::empty())
        .unwrap();
    assert_eq!(narrow.char_at(3), Some(0xE9));

    let text = utf16("a\u{4E2D}");
    let wide = group
        .make_text_run_16bit(&text, &params(), TextRunFlags::empty())
        .unwrap();
    assert_eq!(wide.char_at(0), Some('a' as u32));
    assert_eq!(wide.char_at(1), Some(0x4E2D));
    assert_eq!(wide.char_at(2), None);
}

#[test]
fn draw_walks_every_glyph_run() {
    let ctx = context();
    let group = FontGroup::new("Latin Sans", style(16.0), None, &ctx);
    let run = group
        .make_text_run_str("a\u{4E2D}b", &params(), TextRunFlags::empty())
        .unwrap();
    let mut target = Recorder::default();
    let advance = run.draw(0, run.len(), (0.0, 0.0), DrawMode::Fill, &mut target, None);

    assert_eq!(advance, 1920.0);
    assert_eq!(target.fonts, vec!["Latin Sans", "Han Mincho", "Latin Sans"]);
    let xs: Vec<f64> = target.glyphs.iter().map(|g| g.x).collect();
    assert_eq!(xs, vec![0.0, 8.0, 24.0]);
}

#[test]
fn repeated_text_reuses_shaped_words() {
    let ctx = context();
    let group = FontGroup::new("Latin Sans", style(16.0), None, &ctx);
    let first = group
        .make_text_run_str("hello world", &params(), TextRunFlags::empty())
        .unwrap();
    let font = group.font_at(0).unwrap();
    let words = font.cached_word_count();
    assert!(words > 0);

    let second = group
        .make_text_run_str("hello world", &params(), TextRunFlags::empty())
        .unwrap();
    assert_eq!(font.cached_word_count(), words);
    assert_eq!(
        first.get_advance_width(0, first.len(), None),
        second.get_advance_width(0, second.len(), None)
    );
}

#[test]
fn oversized_advance_uses_detailed_record() {
    let list = FontList::new(Rc::new(TextConfig::default()));
    list.add_face(
        "Wide",
        entry(VirtualFace::ascii("Wide", 500).with_glyph('W', VirtualGlyph::new(87, 900))),
    );
    let ctx = FontContext::new(list);
    let group = FontGroup::new("Wide", style(100.0), None, &ctx);
    let run = group
        .make_text_run_str("W", &params(), TextRunFlags::empty())
        .unwrap();

    // 900 units at 100px is 5400 app units, past the simple record limit
    assert!(!run.glyphs()[0].is_simple_glyph());
    assert_eq!(run.detailed_glyphs(0).unwrap()[0].glyph_id, 87);
    assert_eq!(run.get_advance_width(0, 1, None), 5400.0);
}

#[test]
fn fonts_expire_after_last_release() {
    let ctx = context();
    let group = FontGroup::new("Latin Sans", style(16.0), None, &ctx);
    let run = group
        .make_text_run_str("a\u{4E2D}", &params(), TextRunFlags::empty())
        .unwrap();
    assert_eq!(run.glyph_runs()[1].match_type, MatchType::SystemFallback);
    assert_eq!(ctx.cache.len(), 2);
    assert_eq!(ctx.cache.tracked_len(), 0);

    drop(run);
    drop(group);
    assert_eq!(ctx.cache.len(), 2);
    assert_eq!(ctx.cache.tracked_len(), 2);

    ctx.cache.age_one_generation();
    ctx.cache.age_one_generation();
    assert_eq!(ctx.cache.len(), 2);
    ctx.cache.age_one_generation();
    assert!(ctx.cache.is_empty());
}

#[test]
fn released_font_is_reused_before_expiry() {
    let ctx = context();
    let group = FontGroup::new("Latin Sans", style(16.0), None, &ctx);
    let key = group.font_at(0).unwrap().key();
    drop(group);
    assert_eq!(ctx.cache.tracked_len(), 1);

    ctx.cache.age_one_generation();
    let again = FontGroup::new("Latin Sans", style(16.0), None, &ctx);
    assert_eq!(again.font_at(0).unwrap().key(), key);
    assert_eq!(ctx.cache.tracked_len(), 0);
}
