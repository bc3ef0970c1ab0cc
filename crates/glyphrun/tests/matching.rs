//! Face selection: style matching within a family, configured preference
//! fallback, and font style identity.

use std::collections::HashSet;
use std::rc::Rc;

use glyphrun::{
    CompressedGlyph, FaceSource, FontContext, FontEntry, FontFamily, FontGroup, FontList,
    FontPrefLang, FontSlant, FontStyle, MatchType, TextConfig, TextRunFlags, TextRunParams,
    VirtualFace,
};

fn entry(face: VirtualFace) -> Rc<FontEntry> {
    Rc::new(FontEntry::new(FaceSource::Virtual(face)))
}

#[test]
fn semibold_italic_request_picks_bold_face() {
    let family = FontFamily::new("Serif Text");
    family.add_font_entry(entry(VirtualFace::ascii("Serif Text", 500)));
    family.add_font_entry(entry(
        VirtualFace::ascii("Serif Text", 520)
            .with_name("Serif Text Bold")
            .with_weight(700),
    ));

    let request = FontStyle::new(16.0, 600, FontSlant::Italic);
    let found = family.find_font_for_style(&request).unwrap();
    assert_eq!(found.entry.weight(), 700);
    assert!(!found.needs_synthetic_bold);
    assert!(found.needs_synthetic_italic);

    let regular = family
        .find_font_for_style(&FontStyle::new(16.0, 400, FontSlant::Normal))
        .unwrap();
    assert_eq!(regular.entry.weight(), 400);
    assert!(!regular.needs_synthetic_italic);
}

#[test]
fn style_identity_covers_every_field() {
    let base = FontStyle::new(16.0, 400, FontSlant::Normal);
    let mut styles = HashSet::new();
    styles.insert(base.clone());
    styles.insert(base.clone());
    styles.insert(base.clone().with_language("ja"));
    styles.insert(FontStyle::new(16.0, 700, FontSlant::Normal));
    styles.insert(FontStyle::new(16.0, 400, FontSlant::Oblique));
    styles.insert(base.clone().with_stretch(2));
    assert_eq!(styles.len(), 5);
    assert!(styles.contains(&FontStyle::new(16.0, 400, FontSlant::Normal)));
}

#[test]
fn simple_record_limits() {
    assert!(CompressedGlyph::can_be_simple(4095, 0xFFFF));
    assert!(!CompressedGlyph::can_be_simple(4096, 1));
    assert!(!CompressedGlyph::can_be_simple(10, 0x1_0000));

    let g = CompressedGlyph::simple(4095, 0xFFFF);
    assert!(g.is_simple_glyph());
    assert_eq!(g.simple_advance(), 4095);
    assert_eq!(g.simple_glyph(), 0xFFFF);
}

#[test]
fn configured_prefs_serve_fallback() {
    let config = TextConfig::from_toml_str(
        r#"
        use_system_fallback = false

        [pref_fonts]
        ja = ["Kana Gothic"]
        "#,
    )
    .unwrap();
    let list = FontList::new(Rc::new(config));
    list.add_face("Latin Sans", entry(VirtualFace::ascii("Latin Sans", 500)));
    list.add_face(
        "Kana Gothic",
        entry(VirtualFace::ascii("Kana Gothic", 500).with_char_range(0x3041, 0x30FF, 1000)),
    );
    let ctx = FontContext::new(list);
    let group = FontGroup::new(
        "Latin Sans",
        FontStyle::new(16.0, 400, FontSlant::Normal),
        None,
        &ctx,
    );

    let run = group
        .make_text_run_str("a\u{3042}", &TextRunParams::new(60), TextRunFlags::empty())
        .unwrap();
    let runs = run.glyph_runs();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[1].font.name(), "Kana Gothic");
    assert_eq!(runs[1].match_type, MatchType::PrefsFallback);
    assert_eq!(run.count_missing_glyphs(), 0);

    // Han is not covered and system fallback is off
    let han = group
        .make_text_run_str("\u{4E2D}", &TextRunParams::new(60), TextRunFlags::empty())
        .unwrap();
    assert_eq!(han.count_missing_glyphs(), 1);
}

#[test]
fn language_groups_from_tags() {
    assert_eq!(FontPrefLang::from_language("ja-JP"), FontPrefLang::Japanese);
    assert_eq!(FontPrefLang::from_language("zh-Hant"), FontPrefLang::ChineseTaiwan);
    assert_eq!(FontPrefLang::from_language("zh-HK"), FontPrefLang::ChineseHk);
    assert_eq!(FontPrefLang::from_language("zh"), FontPrefLang::ChineseCn);
    assert_eq!(FontPrefLang::from_language(""), FontPrefLang::Others);
    assert!(FontPrefLang::Korean.is_cjk());
    assert!(!FontPrefLang::Western.is_cjk());
}
