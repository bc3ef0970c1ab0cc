//! Font groups
//!
//! A [`FontGroup`] is a prioritized list of fonts resolved from a CSS-style
//! family list and a style. It turns strings into [`TextRun`]s: the text is
//! itemized by script, each script run is split into ranges by the font that
//! covers each character, and each range is shaped through its font's word
//! cache. Characters no font covers become missing glyphs.
//!
//! Per-character fallback tries, in order, the group's own fonts (and other
//! faces of their families), the language preference lists, and finally a
//! global search over every installed face.

use crate::config::TextConfig;
use crate::family::{FontFamily, GlobalFontMatch};
use crate::font::Font;
use crate::font_cache::{FontCache, FontRef};
use crate::font_entry::FontEntry;
use crate::font_list::{lang_prefs, pref_lang_for_char, FontList, FontPrefLang};
use crate::glyph::{CompressedGlyph, DetailedGlyph};
use crate::shaped_word::WordText;
use crate::shaper::ShaperPrefs;
use crate::style::FontStyle;
use crate::text_run::{MatchType, TextRun, TextRunFlags, TextRunParams};
use crate::unicode::{
    char_at, is_bidi_control, is_cluster_extender, is_default_ignorable, is_join_causer,
    is_join_control, is_private_use, is_space_separator, is_var_selector, ScriptRunIter, TextUnit,
};
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use unicode_script::Script;

/// CSS generic family names
const GENERIC_FAMILIES: [&str; 6] = [
    "serif",
    "sans-serif",
    "monospace",
    "cursive",
    "fantasy",
    "system-ui",
];

/// True for characters that are never shaped or drawn: C0/C1 controls,
/// zero-width space, line and paragraph separators, soft hyphen and bidi
/// controls. Tabs and newlines are invalid too; runs flag them separately.
pub fn is_invalid_char(ch: u32) -> bool {
    if (0x20..0x7F).contains(&ch) {
        return false;
    }
    if ch <= 0x9F {
        return true;
    }
    matches!(ch, 0xAD | 0x200B | 0x2028 | 0x2029) || is_bidi_control(ch)
}

/// Shared state a font group needs: the font cache, the installed fonts and
/// the configuration. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct FontContext {
    pub cache: FontCache,
    pub font_list: Rc<FontList>,
    pub config: Rc<TextConfig>,
}

impl FontContext {
    pub fn new(font_list: FontList) -> Self {
        let config = Rc::clone(font_list.config());
        Self {
            cache: FontCache::new(&config),
            font_list: Rc::new(font_list),
            config,
        }
    }

    /// Context over the system fonts known to fontdb
    pub fn from_system(config: TextConfig) -> Self {
        let mut db = fontdb::Database::new();
        db.load_system_fonts();
        Self::new(FontList::from_database(&db, Rc::new(config)))
    }

    pub fn shaper_prefs(&self) -> ShaperPrefs {
        ShaperPrefs::from_config(&self.config)
    }
}

/// Downloadable faces, by family name
///
/// Faces that are still loading are registered as proxies and replaced once
/// their data arrives. Every change bumps the generation, which font groups
/// compare against to rebuild their font lists.
#[derive(Debug, Default)]
pub struct UserFontSet {
    families: RefCell<FxHashMap<String, Rc<FontFamily>>>,
    generation: Cell<u64>,
}

impl UserFontSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    fn bump_generation(&self) {
        self.generation.set(self.generation.get() + 1);
    }

    /// Adds a face (or a proxy for one that is still loading).
    pub fn add_face(&self, family_name: &str, entry: Rc<FontEntry>) -> bool {
        let family = Rc::clone(
            self.families
                .borrow_mut()
                .entry(family_name.to_lowercase())
                .or_insert_with(|| FontFamily::new(family_name)),
        );
        let added = family.add_font_entry(entry);
        if added {
            self.bump_generation();
        }
        added
    }

    /// Replaces the proxy with the same weight, slant and stretch as `loaded`.
    /// Returns `false` if the family is unknown.
    pub fn mark_loaded(&self, family_name: &str, loaded: Rc<FontEntry>) -> bool {
        let key = family_name.to_lowercase();
        let Some(old) = self.families.borrow().get(&key).cloned() else {
            return false;
        };
        let family = FontFamily::new(old.name());
        for entry in old.entries() {
            let same_slot = entry.weight() == loaded.weight()
                && entry.is_italic() == loaded.is_italic()
                && entry.stretch() == loaded.stretch();
            if !(same_slot && entry.is_proxy()) {
                family.add_font_entry(entry);
            }
        }
        family.add_font_entry(Rc::clone(&loaded));
        tracing::debug!("User font '{}' loaded for '{}'", loaded.name(), family_name);
        self.families.borrow_mut().insert(key, family);
        self.bump_generation();
        true
    }

    pub fn find_family(&self, name: &str) -> Option<Rc<FontFamily>> {
        self.families.borrow().get(&name.to_lowercase()).cloned()
    }
}

/// One entry of a parsed family list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FamilyName {
    Named(String),
    Generic(String),
}

/// Splits a CSS family list such as `"Noto Sans", 'Foo Bar', serif`.
/// Quoted names are never generics; empty entries are dropped.
pub fn parse_family_list(families: &str) -> Vec<FamilyName> {
    let mut names = Vec::new();
    let mut chars = families.chars().peekable();
    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace() || *c == ',') {
            chars.next();
        }
        let Some(&first) = chars.peek() else {
            break;
        };
        if first == '"' || first == '\'' {
            chars.next();
            let name: String = chars.by_ref().take_while(|c| *c != first).collect();
            // Skip anything between the closing quote and the next comma
            for c in chars.by_ref() {
                if c == ',' {
                    break;
                }
            }
            if !name.trim().is_empty() {
                names.push(FamilyName::Named(name));
            }
        } else {
            let raw: String = chars.by_ref().take_while(|c| *c != ',').collect();
            let name = raw.split_whitespace().collect::<Vec<_>>().join(" ");
            if name.is_empty() {
                continue;
            }
            let lower = name.to_ascii_lowercase();
            if GENERIC_FAMILIES.contains(&lower.as_str()) {
                names.push(FamilyName::Generic(lower));
            } else {
                names.push(FamilyName::Named(name));
            }
        }
    }
    names
}

#[derive(Debug, Clone)]
enum FontSlot {
    Unresolved,
    Ready(FontRef),
    Failed,
}

/// A family of the group with the face matched for the group's style
#[derive(Debug)]
struct FamilyFace {
    family: Rc<FontFamily>,
    entry: Rc<FontEntry>,
    needs_bold: bool,
    font: RefCell<FontSlot>,
}

impl FamilyFace {
    fn is_loading(&self) -> bool {
        self.entry.is_proxy()
    }
}

#[derive(Debug, Clone)]
struct LastPref {
    lang: FontPrefLang,
    family: Rc<FontFamily>,
    font: FontRef,
}

/// A span of text that uses one font. `font` is `None` when nothing covers
/// the characters.
#[derive(Debug, Clone)]
pub struct TextRange {
    pub start: usize,
    pub end: usize,
    pub font: Option<FontRef>,
    pub match_type: MatchType,
}

impl TextRange {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Fonts resolved from a family list for one style
#[derive(Debug)]
pub struct FontGroup {
    family_list: Vec<FamilyName>,
    style: FontStyle,
    ctx: FontContext,
    user_font_set: Option<Rc<UserFontSet>>,
    prefs: ShaperPrefs,
    page_lang: FontPrefLang,
    /// Built on first use and after the user font set changes
    fonts: RefCell<Option<Rc<[FamilyFace]>>>,
    current_generation: Cell<u64>,
    skip_drawing: Cell<bool>,
    last_pref: RefCell<Option<LastPref>>,
    underline_offset: Cell<Option<f64>>,
}

impl FontGroup {
    pub fn new(
        families: &str,
        style: FontStyle,
        user_font_set: Option<Rc<UserFontSet>>,
        ctx: &FontContext,
    ) -> Self {
        Self::with_family_list(parse_family_list(families), style, user_font_set, ctx)
    }

    fn with_family_list(
        family_list: Vec<FamilyName>,
        style: FontStyle,
        user_font_set: Option<Rc<UserFontSet>>,
        ctx: &FontContext,
    ) -> Self {
        let generation = user_font_set.as_ref().map_or(0, |set| set.generation());
        Self {
            page_lang: FontPrefLang::from_language(&style.language),
            family_list,
            style,
            prefs: ctx.shaper_prefs(),
            ctx: ctx.clone(),
            user_font_set,
            fonts: RefCell::new(None),
            current_generation: Cell::new(generation),
            skip_drawing: Cell::new(false),
            last_pref: RefCell::new(None),
            underline_offset: Cell::new(None),
        }
    }

    /// Same families and user fonts with a different style
    pub fn copy_with_style(&self, style: &FontStyle) -> FontGroup {
        Self::with_family_list(
            self.family_list.clone(),
            style.clone(),
            self.user_font_set.clone(),
            &self.ctx,
        )
    }

    pub fn style(&self) -> &FontStyle {
        &self.style
    }

    pub fn family_list(&self) -> &[FamilyName] {
        &self.family_list
    }

    pub fn user_font_set(&self) -> Option<&Rc<UserFontSet>> {
        self.user_font_set.as_ref()
    }

    /// Changes whenever the user font set changes. Anything cached against
    /// this group must be rebuilt when the generation differs.
    pub fn generation(&self) -> u64 {
        self.user_font_set.as_ref().map_or(0, |set| set.generation())
    }

    /// True while one of the group's faces is still loading
    pub fn should_skip_drawing(&self) -> bool {
        self.font_list();
        self.skip_drawing.get()
    }

    /// Rebuilds the font list if the user font set changed since it was
    /// built. Returns whether anything was reset.
    pub fn update_font_list(&self) -> bool {
        let generation = self.generation();
        if generation == self.current_generation.get() {
            return false;
        }
        *self.fonts.borrow_mut() = None;
        *self.last_pref.borrow_mut() = None;
        self.underline_offset.set(None);
        self.skip_drawing.set(false);
        self.current_generation.set(generation);
        true
    }

    fn font_list(&self) -> Rc<[FamilyFace]> {
        if let Some(fonts) = self.fonts.borrow().as_ref() {
            return Rc::clone(fonts);
        }
        let fonts: Rc<[FamilyFace]> = self.build_font_list().into();
        *self.fonts.borrow_mut() = Some(Rc::clone(&fonts));
        fonts
    }

    fn build_font_list(&self) -> Vec<FamilyFace> {
        let font_list = &self.ctx.font_list;
        let mut faces: Vec<FamilyFace> = Vec::new();
        let add_family = |family: Rc<FontFamily>, faces: &mut Vec<FamilyFace>| {
            if faces.iter().any(|f| Rc::ptr_eq(&f.family, &family)) {
                return;
            }
            let Some(matched) = family.find_font_for_style(&self.style) else {
                return;
            };
            faces.push(FamilyFace {
                family,
                entry: matched.entry,
                needs_bold: matched.needs_synthetic_bold,
                font: RefCell::new(FontSlot::Unresolved),
            });
        };

        for name in &self.family_list {
            match name {
                FamilyName::Named(name) => {
                    let family = self
                        .user_font_set
                        .as_ref()
                        .and_then(|set| set.find_family(name))
                        .or_else(|| font_list.find_family(name));
                    match family {
                        Some(family) => add_family(family, &mut faces),
                        None => tracing::trace!("Font family '{}' not found", name),
                    }
                }
                FamilyName::Generic(generic) => {
                    for family in font_list.generic_families(generic, self.page_lang) {
                        add_family(family, &mut faces);
                    }
                }
            }
        }

        if faces.iter().all(FamilyFace::is_loading) {
            let default = self
                .ctx
                .config
                .default_family
                .as_deref()
                .and_then(|name| font_list.find_family(name));
            match default {
                Some(family) => add_family(family, &mut faces),
                None => {
                    // Any installed family is better than no font at all
                    for family in font_list.families() {
                        let before = faces.len();
                        add_family(family, &mut faces);
                        if faces.len() > before {
                            break;
                        }
                    }
                }
            }
        }

        let loading = faces.iter().any(FamilyFace::is_loading);
        self.skip_drawing.set(loading);
        tracing::debug!(
            "Built font group with {} fonts ({} loading)",
            faces.len(),
            faces.iter().filter(|f| f.is_loading()).count()
        );
        faces
    }

    pub fn font_list_len(&self) -> usize {
        self.font_list().len()
    }

    /// The font for entry `index` of the group, created on first use.
    /// `None` for faces that are still loading or could not be used.
    pub fn font_at(&self, index: usize) -> Option<FontRef> {
        let fonts = self.font_list();
        let face = fonts.get(index)?;
        let slot = face.font.borrow().clone();
        match slot {
            FontSlot::Ready(font) => Some(font),
            FontSlot::Failed => None,
            FontSlot::Unresolved => {
                if face.is_loading() {
                    return None;
                }
                match face
                    .entry
                    .find_or_make_font(&self.style, face.needs_bold, &self.ctx.cache)
                {
                    Some(font) => {
                        *face.font.borrow_mut() = FontSlot::Ready(font.clone());
                        Some(font)
                    }
                    None => {
                        *face.font.borrow_mut() = FontSlot::Failed;
                        None
                    }
                }
            }
        }
    }

    /// The first font of the group that can be used
    pub fn first_valid_font(&self) -> Option<FontRef> {
        (0..self.font_list_len()).find_map(|i| self.font_at(i))
    }

    /// True if `entry` is the matched face of one of the group's families
    pub fn has_font(&self, entry: &Rc<FontEntry>) -> bool {
        self.font_list().iter().any(|f| Rc::ptr_eq(&f.entry, entry))
    }

    /// Underline offset for text in this group: the lowest offset among its
    /// fonts, ignoring fonts known to report bad underline positions.
    pub fn underline_offset(&self) -> f64 {
        if let Some(offset) = self.underline_offset.get() {
            return offset;
        }
        let mut offset: Option<f64> = None;
        for i in 0..self.font_list_len() {
            let Some(font) = self.font_at(i) else {
                continue;
            };
            if font.entry().is_bad_underline_font() {
                continue;
            }
            let o = font.underline_offset();
            offset = Some(offset.map_or(o, |cur: f64| cur.min(o)));
        }
        let offset = offset
            .or_else(|| self.first_valid_font().map(|f| f.underline_offset()))
            .unwrap_or(0.0);
        self.underline_offset.set(Some(offset));
        offset
    }

    // Fallback

    /// Picks the font for `ch`. `prev` is the font and match type chosen for
    /// the previous character. Returns `None` when the character should be
    /// recorded as missing or synthesized.
    pub fn find_font_for_char(
        &self,
        ch: u32,
        prev_ch: u32,
        script: Script,
        prev: Option<(&FontRef, MatchType)>,
    ) -> Option<(FontRef, MatchType)> {
        if let Some((prev_font, prev_match)) = prev {
            // Keep clusters and joined sequences in one font when it can
            let stays = (is_cluster_extender(ch) || is_join_control(ch) || is_join_causer(prev_ch))
                && prev_font.has_character(ch);
            if stays || is_var_selector(ch) {
                return Some((prev_font.clone(), prev_match));
            }
        } else if is_var_selector(ch) {
            return None;
        }

        let fonts = self.font_list();
        for (i, face) in fonts.iter().enumerate() {
            if face.is_loading() {
                continue;
            }
            if face.entry.has_character(ch) {
                if let Some(font) = self.font_at(i) {
                    return Some((font, MatchType::FontGroup));
                }
                continue;
            }
            if let Some(font) = self.try_other_family_members(&face.family, ch) {
                return Some((font, MatchType::FontGroup));
            }
        }

        if is_private_use(ch) {
            return None;
        }

        if let Some(font) = self.which_pref_font_supports_char(ch) {
            return Some((font, MatchType::PrefsFallback));
        }

        if let Some((prev_font, _)) = prev {
            if prev_font.has_character(ch) {
                return Some((prev_font.clone(), MatchType::SystemFallback));
            }
        }

        // Spaces the first font can synthesize are not worth a system search
        if is_space_separator(ch)
            && self
                .first_valid_font()
                .is_some_and(|f| f.synthesize_space_width(ch).is_some())
        {
            return None;
        }

        if !self.ctx.config.use_system_fallback {
            return None;
        }
        self.which_system_font_supports_char(ch, script)
            .map(|font| (font, MatchType::SystemFallback))
    }

    /// Another face of `family` covering `ch`, ranked by closeness to the
    /// group's style.
    fn try_other_family_members(&self, family: &FontFamily, ch: u32) -> Option<FontRef> {
        if family.len() < 2 || !family.test_character_map(ch) {
            return None;
        }
        let mut data = GlobalFontMatch::new(ch, Script::Unknown, Some(&self.style));
        family.search_all_fonts_for_char(&mut data);
        let entry = data.best_match?;
        let needs_bold = self.style.compute_weight() >= 6 && !entry.is_bold();
        entry.find_or_make_font(&self.style, needs_bold, &self.ctx.cache)
    }

    /// Font from the language preference lists covering `ch`. The last hit
    /// is remembered and tried first for characters of the same language.
    pub fn which_pref_font_supports_char(&self, ch: u32) -> Option<FontRef> {
        let char_lang = pref_lang_for_char(ch);

        if let Some(last) = self.last_pref.borrow().as_ref() {
            if last.lang == char_lang && last.font.has_character(ch) {
                return Some(last.font.clone());
            }
        }

        let font_list = &self.ctx.font_list;
        for lang in lang_prefs(char_lang, self.page_lang) {
            for family in font_list.pref_families(lang).iter() {
                let Some(matched) = family.find_font_for_style(&self.style) else {
                    continue;
                };
                let font = if matched.entry.has_character(ch) {
                    matched.entry.find_or_make_font(
                        &self.style,
                        matched.needs_synthetic_bold,
                        &self.ctx.cache,
                    )
                } else {
                    self.try_other_family_members(family, ch)
                };
                if let Some(font) = font {
                    *self.last_pref.borrow_mut() = Some(LastPref {
                        lang: char_lang,
                        family: Rc::clone(family),
                        font: font.clone(),
                    });
                    return Some(font);
                }
            }
        }
        None
    }

    /// Family of the last preference-list match, if any
    pub fn last_pref_family(&self) -> Option<Rc<FontFamily>> {
        self.last_pref.borrow().as_ref().map(|l| Rc::clone(&l.family))
    }

    /// Font from the global search over every installed face
    pub fn which_system_font_supports_char(&self, ch: u32, script: Script) -> Option<FontRef> {
        let found = self
            .ctx
            .font_list
            .system_find_font_for_char(ch, script, &self.style)?;
        found
            .entry
            .find_or_make_font(&self.style, found.needs_bold, &self.ctx.cache)
    }

    /// Splits `text` into ranges of characters sharing a font. Invalid
    /// characters stay with the font before them. Offsets are relative to
    /// `text`.
    pub fn compute_ranges<T: TextUnit>(&self, text: &[T], script: Script) -> Vec<TextRange> {
        let mut ranges: Vec<TextRange> = Vec::new();
        let mut prev_ch = 0;
        let mut prev: Option<(FontRef, MatchType)> = None;
        let mut i = 0;
        while i < text.len() {
            let (ch, units) = char_at(text, i);
            let found = if is_invalid_char(ch) {
                prev.clone().or_else(|| {
                    self.first_valid_font()
                        .map(|font| (font, MatchType::FontGroup))
                })
            } else {
                self.find_font_for_char(
                    ch,
                    prev_ch,
                    script,
                    prev.as_ref().map(|(font, match_type)| (font, *match_type)),
                )
            };

            let same = match (ranges.last(), &found) {
                (Some(last), Some((font, match_type))) => last
                    .font
                    .as_ref()
                    .is_some_and(|f| FontRef::ptr_eq(f, font) && last.match_type == *match_type),
                (Some(last), None) => last.font.is_none(),
                (None, _) => false,
            };
            if same {
                if let Some(last) = ranges.last_mut() {
                    last.end = i + units;
                }
            } else {
                let (font, match_type) = match &found {
                    Some((font, match_type)) => (Some(font.clone()), *match_type),
                    None => (None, MatchType::FontGroup),
                };
                ranges.push(TextRange {
                    start: i,
                    end: i + units,
                    font,
                    match_type,
                });
            }

            prev_ch = ch;
            prev = found;
            i += units;
        }
        ranges
    }

    // Text runs

    pub fn make_text_run_8bit(
        &self,
        text: &[u8],
        params: &TextRunParams,
        flags: TextRunFlags,
    ) -> Option<TextRun> {
        if text.is_empty() {
            return self.make_empty_text_run(params, flags);
        }
        if text.len() == 1 && text[0] == b' ' {
            return self.make_space_text_run(params, flags);
        }
        let mut flags = flags | TextRunFlags::IS_8BIT;
        if text.is_ascii() {
            flags |= TextRunFlags::IS_ASCII;
        }
        if self.style.size == 0.0 {
            return self.make_blank_text_run(WordText::Latin1(text), params, flags);
        }
        let mut run = TextRun::with_text(params, WordText::Latin1(text), flags, self.generation())?;
        self.init_text_run(&mut run, text);
        self.finish_text_run(&mut run);
        Some(run)
    }

    pub fn make_text_run_16bit(
        &self,
        text: &[u16],
        params: &TextRunParams,
        flags: TextRunFlags,
    ) -> Option<TextRun> {
        if text.is_empty() {
            return self.make_empty_text_run(params, flags);
        }
        if text.len() == 1 && text[0] == 0x20 {
            return self.make_space_text_run(params, flags);
        }
        let mut flags = flags;
        if text.iter().all(|&u| u < 0x80) {
            flags |= TextRunFlags::IS_ASCII;
        }
        if self.style.size == 0.0 {
            return self.make_blank_text_run(WordText::Utf16(text), params, flags);
        }
        let mut run = TextRun::with_text(params, WordText::Utf16(text), flags, self.generation())?;
        self.init_text_run(&mut run, text);
        self.finish_text_run(&mut run);
        Some(run)
    }

    /// Builds a run for `text`, stored as Latin-1 when every character fits.
    pub fn make_text_run_str(
        &self,
        text: &str,
        params: &TextRunParams,
        flags: TextRunFlags,
    ) -> Option<TextRun> {
        if text.chars().all(|c| (c as u32) < 0x100) {
            let latin1: Vec<u8> = text.chars().map(|c| c as u8).collect();
            self.make_text_run_8bit(&latin1, params, flags)
        } else {
            let utf16: Vec<u16> = text.encode_utf16().collect();
            self.make_text_run_16bit(&utf16, params, flags)
        }
    }

    fn make_empty_text_run(&self, params: &TextRunParams, flags: TextRunFlags) -> Option<TextRun> {
        TextRun::new(params, 0, flags | TextRunFlags::IS_8BIT, self.generation())
    }

    fn make_space_text_run(&self, params: &TextRunParams, flags: TextRunFlags) -> Option<TextRun> {
        let space = [b' '];
        let flags = flags | TextRunFlags::IS_8BIT | TextRunFlags::IS_ASCII;
        let mut run = TextRun::with_text(params, WordText::Latin1(&space), flags, self.generation())?;
        let Some(font) = self.first_valid_font() else {
            return Some(run);
        };
        if self.style.size == 0.0 {
            run.add_glyph_run(&font, MatchType::FontGroup, 0, false);
        } else if font.space_glyph() != 0 {
            run.set_space_glyph(&font, 0, &self.prefs);
        } else {
            // No space glyph: let the normal path find one elsewhere
            self.init_text_run(&mut run, &space);
        }
        self.finish_text_run(&mut run);
        Some(run)
    }

    /// A run of zero-width glyphs for size-0 text; newlines are still
    /// flagged.
    fn make_blank_text_run(
        &self,
        text: WordText<'_>,
        params: &TextRunParams,
        flags: TextRunFlags,
    ) -> Option<TextRun> {
        let mut run = TextRun::with_text(params, text, flags, self.generation())?;
        if let Some(font) = self.first_valid_font() {
            run.add_glyph_run(&font, MatchType::FontGroup, 0, false);
        }
        for (i, ch) in text.units().enumerate() {
            if ch == '\n' as u32 {
                run.set_is_newline(i);
            }
        }
        run.set_skip_drawing(self.should_skip_drawing());
        Some(run)
    }

    fn finish_text_run(&self, run: &mut TextRun) {
        if run.flags().contains(TextRunFlags::COMPUTE_LINE_BREAKS) {
            run.compute_default_line_breaks();
        }
        run.fetch_glyph_extents();
        run.set_skip_drawing(self.should_skip_drawing());
    }

    /// Fills `run` with glyphs for `text`, itemized by script. Latin-1 text
    /// is shaped as a single run.
    pub fn init_text_run<T: TextUnit>(&self, run: &mut TextRun, text: &[T]) {
        if T::IS_8BIT {
            self.init_script_run(run, text, 0, text.len(), Script::Latin);
        } else {
            for (start, end, script) in ScriptRunIter::new(text) {
                self.init_script_run(run, text, start, end, script);
            }
        }
        run.sort_glyph_runs();
        run.sanitize_glyph_runs();
    }

    /// Shapes `start..end` of `text`, which all has `script`.
    pub fn init_script_run<T: TextUnit>(
        &self,
        run: &mut TextRun,
        text: &[T],
        start: usize,
        end: usize,
        script: Script,
    ) {
        let Some(main_font) = self.first_valid_font() else {
            tracing::warn!("No usable font in font group; text will not render");
            return;
        };
        for range in self.compute_ranges(&text[start..end], script) {
            let range_start = start + range.start;
            match &range.font {
                Some(font) => {
                    run.add_glyph_run(font, range.match_type, range_start, false);
                    if !font.split_and_init_text_run(
                        run,
                        text,
                        range_start,
                        range.len(),
                        script,
                        &self.prefs,
                    ) {
                        tracing::warn!(
                            "Failed to shape {} characters with '{}'",
                            range.len(),
                            font.name()
                        );
                    }
                }
                None => {
                    run.add_glyph_run(&main_font, MatchType::FontGroup, range_start, false);
                    Self::init_missing_glyphs(run, &text[..start + range.end], range_start, &main_font);
                }
            }
        }
    }

    /// Records the characters of `text[start..]` as missing, synthesizing
    /// spaces and skipping invisible characters.
    fn init_missing_glyphs<T: TextUnit>(run: &mut TextRun, text: &[T], start: usize, font: &Font) {
        let app_units = run.app_units_per_dev_unit() as f64;
        let mut i = start;
        while i < text.len() {
            let (ch, units) = char_at(text, i);
            if units == 2 {
                run.set_missing_glyph(i, ch, font);
                run.set_is_low_surrogate(i + 1);
            } else if let Some(width) = font.synthesize_space_width(ch) {
                let advance = (width * app_units).round() as u32;
                let glyph = font.space_glyph();
                if CompressedGlyph::can_be_simple(advance, glyph) {
                    run.set_simple_glyph(i, CompressedGlyph::simple(advance, glyph));
                } else {
                    let detail = DetailedGlyph {
                        glyph_id: glyph,
                        advance: advance as i32,
                        x_offset: 0.0,
                        y_offset: 0.0,
                    };
                    run.set_glyphs(i, CompressedGlyph::complex(true, true, 1), &[detail]);
                }
            } else if ch == '\t' as u32 {
                run.set_is_tab(i);
            } else if ch == '\n' as u32 {
                run.set_is_newline(i);
            } else if !is_invalid_char(ch) && !is_default_ignorable(ch) {
                run.set_missing_glyph(i, ch, font);
            }
            i += units;
        }
    }

    pub fn size_of_excluding_this(&self) -> usize {
        self.family_list
            .iter()
            .map(|name| match name {
                FamilyName::Named(n) | FamilyName::Generic(n) => n.capacity(),
            })
            .sum::<usize>()
            + self.family_list.capacity() * std::mem::size_of::<FamilyName>()
            + self
                .fonts
                .borrow()
                .as_ref()
                .map_or(0, |f| f.len() * std::mem::size_of::<FamilyFace>())
    }

    pub fn size_of_including_this(&self) -> usize {
        std::mem::size_of::<Self>() + self.size_of_excluding_this()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::{FaceSource, VirtualFace, VirtualGlyph};
    use crate::style::FontSlant;

    fn entry(face: VirtualFace) -> Rc<FontEntry> {
        Rc::new(FontEntry::new(FaceSource::Virtual(face)))
    }

    fn context(config: TextConfig) -> FontContext {
        let list = FontList::new(Rc::new(config));
        list.add_face("Latin Sans", entry(VirtualFace::ascii("Latin Sans", 500)));
        list.add_face(
            "Latin Sans",
            entry(
                VirtualFace::ascii("Latin Sans", 550)
                    .with_name("Latin Sans Bold")
                    .with_weight(700),
            ),
        );
        list.add_face(
            "Kana Gothic",
            entry(VirtualFace::ascii("Kana Gothic", 500).with_char_range(0x3041, 0x30FF, 1000)),
        );
        list.add_face(
            "Han Mincho",
            entry(
                VirtualFace::ascii("Han Mincho", 500)
                    .with_char_range(0x4E00, 0x9FFF, 1000)
                    .with_char_range(0x3041, 0x3096, 1000),
            ),
        );
        FontContext::new(list)
    }

    fn style() -> FontStyle {
        FontStyle::new(16.0, 400, FontSlant::Normal)
    }

    fn params() -> TextRunParams {
        TextRunParams::new(60)
    }

    fn utf16(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    #[test]
    fn test_parse_family_list() {
        let names = parse_family_list(" \"Noto Sans\" , 'Serif' ,Fira   Code,SERIF,, ");
        assert_eq!(
            names,
            vec![
                FamilyName::Named("Noto Sans".into()),
                FamilyName::Named("Serif".into()),
                FamilyName::Named("Fira Code".into()),
                FamilyName::Generic("serif".into()),
            ]
        );
        assert!(parse_family_list("").is_empty());
    }

    #[test]
    fn test_invalid_chars() {
        assert!(is_invalid_char('\t' as u32));
        assert!(is_invalid_char('\n' as u32));
        assert!(is_invalid_char(0x85));
        assert!(is_invalid_char(0x200B));
        assert!(is_invalid_char(0x202E));
        assert!(!is_invalid_char(' ' as u32));
        assert!(!is_invalid_char(0xE9));
        assert!(!is_invalid_char(0x4E00));
    }

    #[test]
    fn test_font_list_and_default_family() {
        let mut config = TextConfig::default();
        config.default_family = Some("Han Mincho".into());
        let ctx = context(config);

        let group = FontGroup::new("'Latin Sans', Kana Gothic", style(), None, &ctx);
        assert_eq!(group.font_list_len(), 2);
        assert_eq!(group.font_at(0).unwrap().name(), "Latin Sans");
        assert!(FontRef::ptr_eq(&group.font_at(0).unwrap(), &group.font_at(0).unwrap()));
        assert!(group.font_at(2).is_none());

        let missing = FontGroup::new("Nope", style(), None, &ctx);
        assert_eq!(missing.font_list_len(), 1);
        assert_eq!(missing.font_at(0).unwrap().name(), "Han Mincho");
    }

    #[test]
    fn test_bold_style_picks_bold_face() {
        let ctx = context(TextConfig::default());
        let bold = FontStyle::new(16.0, 700, FontSlant::Normal);
        let group = FontGroup::new("Latin Sans", bold, None, &ctx);
        let font = group.font_at(0).unwrap();
        assert_eq!(font.name(), "Latin Sans Bold");
        assert!(!font.is_synthetic_bold());

        let copy = group.copy_with_style(&style());
        assert_eq!(copy.font_at(0).unwrap().name(), "Latin Sans");
        assert_eq!(copy.family_list(), group.family_list());
    }

    #[test]
    fn test_find_font_for_char_steps() {
        let mut config = TextConfig::default();
        config.pref_fonts.insert("ja".into(), vec!["Kana Gothic".into()]);
        let ctx = context(config);
        let group = FontGroup::new("Latin Sans", style(), None, &ctx);

        let (font, match_type) = group.find_font_for_char('a' as u32, 0, Script::Latin, None).unwrap();
        assert_eq!(font.name(), "Latin Sans");
        assert_eq!(match_type, MatchType::FontGroup);

        let (font, match_type) = group.find_font_for_char(0x3042, 0, Script::Hiragana, None).unwrap();
        assert_eq!(font.name(), "Kana Gothic");
        assert_eq!(match_type, MatchType::PrefsFallback);
        assert_eq!(group.last_pref_family().unwrap().name(), "Kana Gothic");

        let (font, match_type) = group.find_font_for_char(0x4E2D, 0, Script::Han, None).unwrap();
        assert_eq!(font.name(), "Han Mincho");
        assert_eq!(match_type, MatchType::SystemFallback);

        // Private use never falls back
        assert!(group.find_font_for_char(0xE000, 0, Script::Unknown, None).is_none());
        // Synthesizable spaces are left to the missing-glyph pass
        assert!(group.find_font_for_char(0x2003, 0, Script::Common, None).is_none());
    }

    #[test]
    fn test_var_selector_stays_with_previous_font() {
        let ctx = context(TextConfig::default());
        let group = FontGroup::new("Latin Sans", style(), None, &ctx);
        let han = group.which_system_font_supports_char(0x4E00, Script::Han).unwrap();
        let (font, match_type) = group
            .find_font_for_char(0xFE00, 0x4E00, Script::Han, Some((&han, MatchType::SystemFallback)))
            .unwrap();
        assert!(FontRef::ptr_eq(&font, &han));
        assert_eq!(match_type, MatchType::SystemFallback);
        assert!(group.find_font_for_char(0xFE00, 0, Script::Han, None).is_none());
    }

    #[test]
    fn test_system_fallback_can_be_disabled() {
        let mut config = TextConfig::default();
        config.use_system_fallback = false;
        let ctx = context(config);
        let group = FontGroup::new("Latin Sans", style(), None, &ctx);
        assert!(group.find_font_for_char(0x4E2D, 0, Script::Han, None).is_none());
    }

    #[test]
    fn test_compute_ranges() {
        let ctx = context(TextConfig::default());
        let group = FontGroup::new("Latin Sans", style(), None, &ctx);
        let text = utf16("ab\u{4E2D}\u{6587}\tc");
        let ranges = group.compute_ranges(&text, Script::Han);
        assert_eq!(ranges.len(), 3);
        assert_eq!((ranges[0].start, ranges[0].end), (0, 2));
        assert_eq!(ranges[1].font.as_ref().unwrap().name(), "Han Mincho");
        // The tab stays with the font before it
        assert_eq!((ranges[1].start, ranges[1].end), (2, 5));
        assert_eq!(ranges[2].font.as_ref().unwrap().name(), "Latin Sans");
    }

    #[test]
    fn test_make_text_run_with_fallback() {
        let ctx = context(TextConfig::default());
        let group = FontGroup::new("Latin Sans", style(), None, &ctx);
        let text = utf16("a\u{4E2D}b");
        let run = group
            .make_text_run_16bit(&text, &params(), TextRunFlags::empty())
            .unwrap();
        assert_eq!(run.len(), 3);
        assert!(!run.flags().contains(TextRunFlags::IS_8BIT));
        let runs = run.glyph_runs();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[1].char_offset, 1);
        assert_eq!(runs[1].font.name(), "Han Mincho");
        assert_eq!(runs[1].match_type, MatchType::SystemFallback);
        assert_eq!(runs[2].font.name(), "Latin Sans");
        // 500 and 1000 units at 16px, 60 app units per pixel
        assert_eq!(run.get_advance_width(0, 3, None), 480.0 + 960.0 + 480.0);
        assert_eq!(run.count_missing_glyphs(), 0);
    }

    #[test]
    fn test_missing_glyphs_and_synthesized_spaces() {
        let mut config = TextConfig::default();
        config.use_system_fallback = false;
        let ctx = context(config);
        let group = FontGroup::new("Latin Sans", style(), None, &ctx);
        let text = utf16("a\u{0E01}\u{2003}\u{1F600}");
        let run = group
            .make_text_run_16bit(&text, &params(), TextRunFlags::empty())
            .unwrap();
        assert_eq!(run.len(), 5);
        assert_eq!(run.count_missing_glyphs(), 2);
        assert!(run.char_is_low_surrogate(4));
        assert_eq!(run.char_at(3), Some(0xD83D));
        // Em space: one em at 16px
        assert_eq!(run.get_advance_width(2, 1, None), 16.0 * 60.0);
    }

    #[test]
    fn test_special_runs() {
        let ctx = context(TextConfig::default());
        let group = FontGroup::new("Latin Sans", style(), None, &ctx);

        let empty = group.make_text_run_str("", &params(), TextRunFlags::empty()).unwrap();
        assert!(empty.is_empty());
        assert!(empty.glyph_runs().is_empty());

        let space = group.make_text_run_str(" ", &params(), TextRunFlags::empty()).unwrap();
        assert_eq!(space.len(), 1);
        assert!(space.char_is_space(0));
        assert_eq!(space.get_advance_width(0, 1, None), 480.0);

        let zero = FontStyle::new(0.0, 400, FontSlant::Normal);
        let blank_group = group.copy_with_style(&zero);
        let blank = blank_group
            .make_text_run_str("a\nb", &params(), TextRunFlags::empty())
            .unwrap();
        assert!(blank.char_is_newline(1));
        assert_eq!(blank.get_advance_width(0, 3, None), 0.0);
    }

    #[test]
    fn test_make_text_run_str_picks_storage() {
        let ctx = context(TextConfig::default());
        let group = FontGroup::new("Latin Sans", style(), None, &ctx);
        let latin = group
            .make_text_run_str("caf\u{E9}", &params(), TextRunFlags::empty())
            .unwrap();
        assert!(latin.flags().contains(TextRunFlags::IS_8BIT));
        assert!(!latin.flags().contains(TextRunFlags::IS_ASCII));

        let wide = group
            .make_text_run_str("a\u{3042}", &params(), TextRunFlags::COMPUTE_LINE_BREAKS)
            .unwrap();
        assert!(!wide.flags().contains(TextRunFlags::IS_8BIT));
        assert_eq!(wide.char_at(1), Some(0x3042));
    }

    #[test]
    fn test_ligature_run_through_group() {
        let list = FontList::new(Rc::new(TextConfig::default()));
        list.add_face(
            "Liga",
            entry(VirtualFace::ascii("Liga", 500).with_ligature("fi", VirtualGlyph::new(900, 800))),
        );
        let ctx = FontContext::new(list);
        let group = FontGroup::new("Liga", style(), None, &ctx);
        let run = group
            .make_text_run_str("fit", &params(), TextRunFlags::empty())
            .unwrap();
        assert!(run.is_ligature_group_start(0));
        assert!(!run.is_ligature_group_start(1));
        let whole = run.get_advance_width(0, 3, None);
        let parts = run.get_advance_width(0, 1, None)
            + run.get_advance_width(1, 1, None)
            + run.get_advance_width(2, 1, None);
        assert_eq!(whole, parts);
    }

    #[test]
    fn test_user_fonts_and_generation() {
        let ctx = context(TextConfig::default());
        let set = Rc::new(UserFontSet::new());
        set.add_face("Web Font", Rc::new(FontEntry::proxy("Web Font", 400, 0, false)));
        let generation = set.generation();

        let group = FontGroup::new("Web Font, Latin Sans", style(), Some(Rc::clone(&set)), &ctx);
        assert!(group.should_skip_drawing());
        assert!(group.font_at(0).is_none());
        assert_eq!(group.first_valid_font().unwrap().name(), "Latin Sans");
        let run = group
            .make_text_run_str("ab", &params(), TextRunFlags::empty())
            .unwrap();
        assert!(run.skip_drawing());
        assert!(!group.update_font_list());

        let loaded = entry(VirtualFace::ascii("Web Font", 600).with_name("Web Font Regular"));
        assert!(set.mark_loaded("web font", loaded));
        assert!(set.generation() > generation);
        assert_ne!(group.generation(), generation);

        assert!(group.update_font_list());
        assert!(!group.should_skip_drawing());
        assert_eq!(group.font_at(0).unwrap().name(), "Web Font Regular");
        assert!(!group.update_font_list());
    }

    #[test]
    fn test_underline_offset_uses_lowest() {
        let ctx = context(TextConfig::default());
        let group = FontGroup::new("Latin Sans, Kana Gothic", style(), None, &ctx);
        let expected = group
            .font_at(0)
            .unwrap()
            .underline_offset()
            .min(group.font_at(1).unwrap().underline_offset());
        assert_eq!(group.underline_offset(), expected);
    }
}
