//! Platform font list
//!
//! Registry of installed families, built from a fontdb database or filled
//! by hand. It also owns the language preference lists and the global
//! per-character search used as the last fallback step.

use crate::charmap::CharacterMap;
use crate::config::TextConfig;
use crate::face::FaceSource;
use crate::family::{FontFamily, GlobalFontMatch};
use crate::font_entry::FontEntry;
use crate::style::FontStyle;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;
use unicode_script::Script;

/// Generic family consulted before the global search
const COMMON_FALLBACK_GENERIC: &str = "fallback";

/// Language groups used to pick preferred fallback families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FontPrefLang {
    Western,
    Japanese,
    ChineseTaiwan,
    ChineseCn,
    ChineseHk,
    Korean,
    Cyrillic,
    Greek,
    Thai,
    Hebrew,
    Arabic,
    Devanagari,
    Others,
    /// Shared CJK characters; expands to the CJK groups in order
    CjkSet,
}

const ALL_PREF_LANGS: [FontPrefLang; 14] = [
    FontPrefLang::Western,
    FontPrefLang::Japanese,
    FontPrefLang::ChineseTaiwan,
    FontPrefLang::ChineseCn,
    FontPrefLang::ChineseHk,
    FontPrefLang::Korean,
    FontPrefLang::Cyrillic,
    FontPrefLang::Greek,
    FontPrefLang::Thai,
    FontPrefLang::Hebrew,
    FontPrefLang::Arabic,
    FontPrefLang::Devanagari,
    FontPrefLang::Others,
    FontPrefLang::CjkSet,
];

/// CJK groups tried when nothing more specific is known
const CJK_DEFAULT_ORDER: [FontPrefLang; 5] = [
    FontPrefLang::Japanese,
    FontPrefLang::Korean,
    FontPrefLang::ChineseCn,
    FontPrefLang::ChineseHk,
    FontPrefLang::ChineseTaiwan,
];

impl FontPrefLang {
    /// Key of the group in the preference config
    pub fn name(self) -> &'static str {
        match self {
            FontPrefLang::Western => "x-western",
            FontPrefLang::Japanese => "ja",
            FontPrefLang::ChineseTaiwan => "zh-TW",
            FontPrefLang::ChineseCn => "zh-CN",
            FontPrefLang::ChineseHk => "zh-HK",
            FontPrefLang::Korean => "ko",
            FontPrefLang::Cyrillic => "x-cyrillic",
            FontPrefLang::Greek => "el",
            FontPrefLang::Thai => "th",
            FontPrefLang::Hebrew => "he",
            FontPrefLang::Arabic => "ar",
            FontPrefLang::Devanagari => "x-devanagari",
            FontPrefLang::Others => "x-unicode",
            FontPrefLang::CjkSet => "x-cjk",
        }
    }

    /// Group for a BCP 47 language tag such as `"ja-JP"` or `"zh-Hant"`.
    pub fn from_language(tag: &str) -> Self {
        if let Some(group) = ALL_PREF_LANGS
            .iter()
            .find(|lang| lang.name().eq_ignore_ascii_case(tag))
        {
            return *group;
        }
        let tag = tag.to_ascii_lowercase();
        let mut parts = tag.split(['-', '_']);
        let primary = parts.next().unwrap_or("");
        match primary {
            "" => FontPrefLang::Others,
            "ja" => FontPrefLang::Japanese,
            "ko" => FontPrefLang::Korean,
            "zh" => {
                let rest: SmallVec<[&str; 2]> = parts.collect();
                if rest.iter().any(|p| *p == "tw" || *p == "hant") {
                    FontPrefLang::ChineseTaiwan
                } else if rest.iter().any(|p| *p == "hk" || *p == "mo") {
                    FontPrefLang::ChineseHk
                } else {
                    FontPrefLang::ChineseCn
                }
            }
            "ru" | "uk" | "be" | "bg" | "sr" | "mk" => FontPrefLang::Cyrillic,
            "el" => FontPrefLang::Greek,
            "th" => FontPrefLang::Thai,
            "he" | "yi" => FontPrefLang::Hebrew,
            "ar" | "fa" | "ur" => FontPrefLang::Arabic,
            "hi" | "mr" | "ne" | "sa" => FontPrefLang::Devanagari,
            "en" | "fr" | "de" | "es" | "it" | "nl" | "pt" | "sv" | "da" | "no" | "nb"
            | "fi" | "is" | "ca" | "eu" | "gl" | "af" => FontPrefLang::Western,
            _ => FontPrefLang::Others,
        }
    }

    pub fn is_cjk(self) -> bool {
        matches!(
            self,
            FontPrefLang::Japanese
                | FontPrefLang::ChineseTaiwan
                | FontPrefLang::ChineseCn
                | FontPrefLang::ChineseHk
                | FontPrefLang::Korean
                | FontPrefLang::CjkSet
        )
    }
}

/// Language group a character most likely belongs to, by Unicode block.
pub fn pref_lang_for_char(ch: u32) -> FontPrefLang {
    match ch {
        0x0000..=0x036F => FontPrefLang::Western,
        0x0370..=0x03FF => FontPrefLang::Greek,
        0x0400..=0x052F => FontPrefLang::Cyrillic,
        0x0590..=0x05FF => FontPrefLang::Hebrew,
        0x0600..=0x06FF | 0x0750..=0x077F | 0x08A0..=0x08FF => FontPrefLang::Arabic,
        0x0900..=0x097F | 0xA8E0..=0xA8FF => FontPrefLang::Devanagari,
        0x0E00..=0x0E7F => FontPrefLang::Thai,
        // Hangul Jamo
        0x1100..=0x11FF => FontPrefLang::Korean,
        0x1E00..=0x1FFF => FontPrefLang::Western,
        // CJK symbols and punctuation
        0x3000..=0x303F => FontPrefLang::CjkSet,
        // Hiragana, Katakana
        0x3040..=0x30FF => FontPrefLang::Japanese,
        // Bopomofo
        0x3100..=0x312F => FontPrefLang::ChineseTaiwan,
        // Hangul compatibility Jamo
        0x3130..=0x318F => FontPrefLang::Korean,
        0x3190..=0x319F => FontPrefLang::Japanese,
        0x31A0..=0x31BF => FontPrefLang::ChineseTaiwan,
        0x31F0..=0x31FF => FontPrefLang::Japanese,
        // Enclosed CJK through unified ideographs
        0x3200..=0x9FFF => FontPrefLang::CjkSet,
        0xA960..=0xA97F | 0xAC00..=0xD7FF => FontPrefLang::Korean,
        0xF900..=0xFAFF => FontPrefLang::CjkSet,
        0xFB1D..=0xFB4F => FontPrefLang::Hebrew,
        0xFB50..=0xFDFF | 0xFE70..=0xFEFF => FontPrefLang::Arabic,
        // Halfwidth and fullwidth forms
        0xFF00..=0xFFEF => FontPrefLang::CjkSet,
        0x20000..=0x2FFFF => FontPrefLang::CjkSet,
        _ => FontPrefLang::Others,
    }
}

/// Groups to search, in order, for a character of `char_lang` on a page in
/// `page_lang`. CJK characters try the specific group first, then the page's
/// CJK group, then the default CJK order. `Others` always comes last.
pub fn lang_prefs(char_lang: FontPrefLang, page_lang: FontPrefLang) -> SmallVec<[FontPrefLang; 8]> {
    let mut langs: SmallVec<[FontPrefLang; 8]> = SmallVec::new();
    let mut push = |lang: FontPrefLang| {
        if lang != FontPrefLang::CjkSet && !langs.contains(&lang) {
            langs.push(lang);
        }
    };
    if char_lang.is_cjk() {
        push(char_lang);
        if page_lang.is_cjk() {
            push(page_lang);
        }
        for lang in CJK_DEFAULT_ORDER {
            push(lang);
        }
    } else {
        push(char_lang);
    }
    push(FontPrefLang::Others);
    langs
}

/// Result of [`FontList::system_find_font_for_char`]
#[derive(Debug, Clone)]
pub struct SystemMatch {
    pub entry: Rc<FontEntry>,
    pub needs_bold: bool,
}

/// Installed families and the fallback caches built over them
#[derive(Debug)]
pub struct FontList {
    config: Rc<TextConfig>,
    /// Keyed by lowercased family name
    families: RefCell<FxHashMap<String, Rc<FontFamily>>>,
    pref_families: RefCell<FxHashMap<FontPrefLang, Rc<[Rc<FontFamily>]>>>,
    codepoints_with_no_fonts: RefCell<CharacterMap>,
    replacement_char_family: RefCell<Option<Rc<FontFamily>>>,
}

impl FontList {
    pub fn new(config: Rc<TextConfig>) -> Self {
        let mut no_fonts = CharacterMap::new();
        // C0 and C1 controls never get a font
        no_fonts.set_range(0x00, 0x1F);
        no_fonts.set_range(0x7F, 0x9F);
        Self {
            config,
            families: RefCell::new(FxHashMap::default()),
            pref_families: RefCell::new(FxHashMap::default()),
            codepoints_with_no_fonts: RefCell::new(no_fonts),
            replacement_char_family: RefCell::new(None),
        }
    }

    /// Builds the list from every face in `db`. Faces that fail to parse are
    /// skipped.
    pub fn from_database(db: &fontdb::Database, config: Rc<TextConfig>) -> Self {
        let list = Self::new(config);
        let mut faces = 0;
        for info in db.faces() {
            let Some((family_name, _)) = info.families.first() else {
                continue;
            };
            let source = db.with_face_data(info.id, |data, index| {
                FaceSource::from_bytes(data.to_vec(), index)
            });
            match source {
                Some(Ok(source)) => {
                    if list.add_face(family_name, Rc::new(FontEntry::new(source))) {
                        faces += 1;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!("Skipping face '{}': {}", info.post_script_name, e);
                }
                None => {
                    tracing::warn!("Face data for '{}' is unavailable", info.post_script_name);
                }
            }
        }
        tracing::debug!(
            "Built font list with {} families ({} faces)",
            list.len(),
            faces
        );
        list
    }

    pub fn config(&self) -> &Rc<TextConfig> {
        &self.config
    }

    /// Registers a family, replacing any family with the same name.
    pub fn add_family(&self, family: Rc<FontFamily>) {
        self.families
            .borrow_mut()
            .insert(family.name().to_lowercase(), family);
        self.pref_families.borrow_mut().clear();
    }

    /// Adds `entry` to the family named `family_name`, creating the family
    /// if needed. Returns whether the entry was added.
    pub fn add_face(&self, family_name: &str, entry: Rc<FontEntry>) -> bool {
        let key = family_name.to_lowercase();
        let family = {
            let mut families = self.families.borrow_mut();
            Rc::clone(
                families
                    .entry(key)
                    .or_insert_with(|| FontFamily::new(family_name)),
            )
        };
        self.pref_families.borrow_mut().clear();
        family.add_font_entry(entry)
    }

    /// Case-insensitive family lookup
    pub fn find_family(&self, name: &str) -> Option<Rc<FontFamily>> {
        self.families.borrow().get(&name.to_lowercase()).cloned()
    }

    /// All families, sorted by name
    pub fn families(&self) -> Vec<Rc<FontFamily>> {
        let mut families: Vec<_> = self.families.borrow().values().cloned().collect();
        families.sort_by(|a, b| a.name().cmp(b.name()));
        families
    }

    pub fn len(&self) -> usize {
        self.families.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.borrow().is_empty()
    }

    /// Installed families configured for a generic name. A
    /// language-specific entry (`"serif.ja"`) takes precedence.
    pub fn generic_families(&self, generic: &str, lang: FontPrefLang) -> Vec<Rc<FontFamily>> {
        let specific = format!("{}.{}", generic, lang.name());
        let names = match self.config.generic_families_for(&specific) {
            [] => self.config.generic_families_for(generic),
            names => names,
        };
        names.iter().filter_map(|n| self.find_family(n)).collect()
    }

    /// Installed families preferred for `lang`, cached until the list changes.
    pub fn pref_families(&self, lang: FontPrefLang) -> Rc<[Rc<FontFamily>]> {
        if let Some(cached) = self.pref_families.borrow().get(&lang) {
            return Rc::clone(cached);
        }
        let families: Rc<[Rc<FontFamily>]> = self
            .config
            .pref_fonts_for(lang.name())
            .iter()
            .filter_map(|n| self.find_family(n))
            .collect();
        self.pref_families
            .borrow_mut()
            .insert(lang, Rc::clone(&families));
        families
    }

    /// The last fallback step: finds any installed face covering `ch`.
    /// Characters found to have no face are remembered and skipped after.
    pub fn system_find_font_for_char(
        &self,
        ch: u32,
        script: Script,
        style: &FontStyle,
    ) -> Option<SystemMatch> {
        if self.codepoints_with_no_fonts.borrow().test(ch) {
            return None;
        }

        if ch == 0xFFFD {
            let family = self.replacement_char_family.borrow().clone();
            if let Some(found) = family.and_then(|f| Self::family_match(&f, ch, style)) {
                return Some(found);
            }
        }

        let start = Instant::now();
        let mut fallback_family = None;
        let mut cmaps_tested = 0;
        let mut found = self.common_font_fallback(ch, style, &mut fallback_family);
        let common = found.is_some();
        if found.is_none() {
            let mut data = GlobalFontMatch::new(ch, script, Some(style));
            for family in self.families() {
                family.find_font_for_char(&mut data);
            }
            cmaps_tested = data.cmaps_tested;
            found = data.best_match.map(|entry| {
                fallback_family = entry.family();
                SystemMatch {
                    needs_bold: style.weight >= 600 && !entry.is_bold(),
                    entry,
                }
            });
        }

        tracing::debug!(
            "System fallback for U+{:04X} ({:?}): {} [{}, {} cmaps tested, {:?}]",
            ch,
            script,
            found.as_ref().map_or("none", |m| m.entry.name()),
            if common { "common" } else { "global" },
            cmaps_tested,
            start.elapsed()
        );

        match &found {
            None => self.codepoints_with_no_fonts.borrow_mut().set(ch),
            Some(_) if ch == 0xFFFD => {
                *self.replacement_char_family.borrow_mut() = fallback_family;
            }
            Some(_) => {}
        }
        found
    }

    fn common_font_fallback(
        &self,
        ch: u32,
        style: &FontStyle,
        fallback_family: &mut Option<Rc<FontFamily>>,
    ) -> Option<SystemMatch> {
        let lang = pref_lang_for_char(ch);
        for family in self.generic_families(COMMON_FALLBACK_GENERIC, lang) {
            if let Some(found) = Self::family_match(&family, ch, style) {
                *fallback_family = Some(family);
                return Some(found);
            }
        }
        None
    }

    fn family_match(family: &FontFamily, ch: u32, style: &FontStyle) -> Option<SystemMatch> {
        let matched = family.find_font_for_style(style)?;
        matched.entry.test_character_map(ch).then(|| SystemMatch {
            entry: matched.entry,
            needs_bold: matched.needs_synthetic_bold,
        })
    }

    /// Forgets cached preference lists and fallback misses, e.g. after new
    /// faces were installed.
    pub fn clear_fallback_caches(&self) {
        self.pref_families.borrow_mut().clear();
        *self.replacement_char_family.borrow_mut() = None;
        let mut no_fonts = CharacterMap::new();
        no_fonts.set_range(0x00, 0x1F);
        no_fonts.set_range(0x7F, 0x9F);
        *self.codepoints_with_no_fonts.borrow_mut() = no_fonts;
    }

    pub fn size_of_excluding_this(&self) -> usize {
        let families = self.families.borrow();
        families.capacity() * std::mem::size_of::<(String, Rc<FontFamily>)>()
            + families
                .iter()
                .map(|(k, f)| k.capacity() + f.size_of_including_this())
                .sum::<usize>()
            + self.codepoints_with_no_fonts.borrow().size_of_excluding_this()
    }
}
