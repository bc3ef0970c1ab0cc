//! Font families and style matching
//!
//! A family owns its entries. Families with at most four faces that fit the
//! regular / bold / italic / bold-italic pattern are "simple": style matching
//! is then a slot lookup. Larger families use a style-distance filter followed
//! by the CSS weight-matching walk.

use crate::charmap::CharacterMap;
use crate::font_entry::FontEntry;
use crate::style::FontStyle;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use unicode_script::Script;

const BOLD_MASK: usize = 1;
const ITALIC_MASK: usize = 2;

const REGULAR_FACE: usize = 0;
const BOLD_FACE: usize = BOLD_MASK;
const ITALIC_FACE: usize = ITALIC_MASK;
const BOLD_ITALIC_FACE: usize = BOLD_MASK | ITALIC_MASK;

/// Fallback order within a simple family, indexed by the requested slot
const SIMPLE_FALLBACKS: [[usize; 3]; 4] = [
    [BOLD_FACE, ITALIC_FACE, BOLD_ITALIC_FACE],
    [REGULAR_FACE, BOLD_ITALIC_FACE, ITALIC_FACE],
    [BOLD_ITALIC_FACE, REGULAR_FACE, BOLD_FACE],
    [ITALIC_FACE, BOLD_FACE, REGULAR_FACE],
];

/// Score for covering the requested character in global fallback
const RANK_MATCHED_CMAP: i32 = 20;

/// Result of [`FontFamily::find_font_for_style`]
#[derive(Debug, Clone)]
pub struct StyleMatch {
    pub entry: Rc<FontEntry>,
    /// The request is bold but the face is not
    pub needs_synthetic_bold: bool,
    /// The request is italic/oblique but the face is not
    pub needs_synthetic_italic: bool,
}

/// State of a global search for a face covering one character
#[derive(Debug)]
pub struct GlobalFontMatch<'a> {
    pub ch: u32,
    pub script: Script,
    pub style: Option<&'a FontStyle>,
    pub match_rank: i32,
    pub best_match: Option<Rc<FontEntry>>,
    /// Faces that covered the character
    pub count: u32,
    /// Character maps consulted
    pub cmaps_tested: u32,
}

impl<'a> GlobalFontMatch<'a> {
    pub fn new(ch: u32, script: Script, style: Option<&'a FontStyle>) -> Self {
        Self {
            ch,
            script,
            style,
            match_rank: 0,
            best_match: None,
            count: 0,
            cmaps_tested: 0,
        }
    }

    fn consider(&mut self, entry: &Rc<FontEntry>, rank: i32) {
        let better = rank > self.match_rank
            || (rank == self.match_rank
                && self
                    .best_match
                    .as_ref()
                    .is_some_and(|best| entry.name() > best.name()));
        if better {
            self.best_match = Some(Rc::clone(entry));
            self.match_rank = rank;
        }
    }
}

fn calc_style_match(entry: &FontEntry, style: Option<&FontStyle>) -> i32 {
    let mut rank = 0;
    match style {
        Some(style) => {
            if entry.is_italic() == style.is_italic() {
                rank += 10;
            }
            let weight = (entry.weight() / 100) as i32;
            rank += 9 - (weight - style.compute_weight() as i32).abs();
        }
        None => {
            if !entry.is_italic() {
                rank += 3;
            }
            if !entry.is_bold() {
                rank += 2;
            }
        }
    }
    rank
}

/// Distance between a face and the requested italic/stretch, ignoring weight.
fn style_distance(entry: &FontEntry, italic: bool, stretch: i16) -> u32 {
    let mut distance: i32 = 0;
    if stretch != entry.stretch() {
        // Positive requests prefer wider faces, others prefer narrower ones
        distance = if stretch > 0 {
            (entry.stretch() - stretch) as i32 * 2
        } else {
            (stretch - entry.stretch()) as i32 * 2
        };
        // Faces in the non-preferred direction rank behind every preferred one
        if distance < 0 {
            distance = -distance + 10;
        }
    }
    if entry.is_italic() != italic {
        distance += 1;
    }
    distance as u32
}

#[derive(Debug, Default)]
struct FamilyFaces {
    entries: Vec<Rc<FontEntry>>,
    /// Present when the family is simple
    slots: Option<[Option<Rc<FontEntry>>; 4]>,
    checked: bool,
    char_map: Option<Rc<CharacterMap>>,
}

impl FamilyFaces {
    fn check_for_simple_family(&mut self) {
        if self.checked {
            return;
        }
        self.checked = true;
        self.slots = None;

        let count = self.entries.len();
        if count == 0 || count > 4 {
            return;
        }
        let first_stretch = self.entries[0].stretch();
        let mut faces: [Option<Rc<FontEntry>>; 4] = Default::default();
        for entry in &self.entries {
            if entry.stretch() != first_stretch {
                return;
            }
            let index = (if entry.is_italic() { ITALIC_MASK } else { 0 })
                | (if entry.weight() >= 600 { BOLD_MASK } else { 0 });
            if faces[index].is_some() {
                return;
            }
            faces[index] = Some(Rc::clone(entry));
        }
        self.slots = Some(faces);
    }
}

/// A named family of faces
#[derive(Debug)]
pub struct FontFamily {
    name: String,
    this: Weak<FontFamily>,
    faces: RefCell<FamilyFaces>,
}

impl FontFamily {
    pub fn new(name: impl Into<String>) -> Rc<Self> {
        let name = name.into();
        Rc::new_cyclic(|this| Self {
            name,
            this: this.clone(),
            faces: RefCell::new(FamilyFaces::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a face. A face with the same weight, slant and stretch as an
    /// existing one is dropped; returns whether the entry was added.
    pub fn add_font_entry(&self, entry: Rc<FontEntry>) -> bool {
        let mut faces = self.faces.borrow_mut();
        let duplicate = faces.entries.iter().any(|e| {
            e.weight() == entry.weight()
                && e.is_italic() == entry.is_italic()
                && e.stretch() == entry.stretch()
        });
        if duplicate {
            tracing::debug!(
                "Skipping duplicate face '{}' in family '{}'",
                entry.name(),
                self.name
            );
            return false;
        }
        entry.set_family(self.this.clone());
        faces.entries.push(entry);
        faces.checked = false;
        faces.char_map = None;
        true
    }

    pub fn entries(&self) -> Vec<Rc<FontEntry>> {
        self.faces.borrow().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.faces.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when faces fit the four fixed style slots
    pub fn is_simple_family(&self) -> bool {
        let mut faces = self.faces.borrow_mut();
        faces.check_for_simple_family();
        faces.slots.is_some()
    }

    pub fn has_italic_face(&self) -> bool {
        self.faces.borrow().entries.iter().any(|e| e.is_italic())
    }

    /// Picks the face that best matches `style`.
    pub fn find_font_for_style(&self, style: &FontStyle) -> Option<StyleMatch> {
        let mut faces = self.faces.borrow_mut();
        faces.check_for_simple_family();

        let base_weight = style.compute_weight();
        let want_bold = base_weight >= 6;
        let want_italic = style.is_italic();
        let found = |entry: &Rc<FontEntry>| StyleMatch {
            entry: Rc::clone(entry),
            needs_synthetic_bold: want_bold && !entry.is_bold(),
            needs_synthetic_italic: want_italic && !entry.is_italic(),
        };

        if faces.entries.len() == 1 {
            return Some(found(&faces.entries[0]));
        }

        if let Some(slots) = &faces.slots {
            let index = (if want_italic { ITALIC_MASK } else { 0 })
                | (if want_bold { BOLD_MASK } else { 0 });
            if let Some(entry) = &slots[index] {
                return Some(found(entry));
            }
            return SIMPLE_FALLBACKS[index]
                .iter()
                .find_map(|&slot| slots[slot].as_ref())
                .map(found);
        }

        let weights = find_weights_for_style(&faces.entries, want_italic, style.stretch)?;

        // No 400 face: try 500 before anything lighter
        let mut i = base_weight as usize;
        if base_weight == 4 && weights[4].is_none() {
            i = 5;
        }
        let mut direction: isize = if base_weight > 5 { 1 } else { -1 };
        let mut turned = false;
        loop {
            if let Some(entry) = &weights[i] {
                return Some(found(entry));
            }
            if i == 1 || i == 9 {
                if turned {
                    return None;
                }
                turned = true;
                i = base_weight as usize;
                direction = -direction;
            }
            i = (i as isize + direction) as usize;
        }
    }

    /// Coverage union over all faces
    pub fn test_character_map(&self, ch: u32) -> bool {
        let mut faces = self.faces.borrow_mut();
        if faces.char_map.is_none() {
            let mut union = CharacterMap::new();
            for entry in faces.entries.iter().filter(|e| e.is_valid()) {
                union.union_with(&entry.char_map());
            }
            union.compact();
            faces.char_map = Some(Rc::new(union));
        }
        faces.char_map.as_ref().is_some_and(|m| m.test(ch))
    }

    /// Scores this family's best face for `style` in a global fallback search.
    pub fn find_font_for_char(&self, data: &mut GlobalFontMatch<'_>) {
        if !self.test_character_map(data.ch) {
            return;
        }
        let default_style = FontStyle::default();
        let Some(matched) = self.find_font_for_style(data.style.unwrap_or(&default_style)) else {
            return;
        };
        let entry = matched.entry;
        if entry.skip_during_system_fallback() {
            return;
        }

        data.cmaps_tested += 1;
        if !entry.test_character_map(data.ch) {
            return;
        }
        data.count += 1;
        tracing::trace!(
            "Fallback candidate U+{:04X}: '{}' in '{}'",
            data.ch,
            entry.name(),
            self.name
        );

        let rank = RANK_MATCHED_CMAP + calc_style_match(&entry, data.style);
        data.consider(&entry, rank);
    }

    /// Scores every face of the family that covers the character.
    pub fn search_all_fonts_for_char(&self, data: &mut GlobalFontMatch<'_>) {
        let entries = self.entries();
        for entry in &entries {
            data.cmaps_tested += 1;
            if entry.test_character_map(data.ch) {
                data.count += 1;
                let rank = RANK_MATCHED_CMAP + calc_style_match(entry, data.style);
                data.consider(entry, rank);
            }
        }
    }

    pub fn size_of_excluding_this(&self) -> usize {
        let faces = self.faces.borrow();
        let mut size = self.name.capacity()
            + faces.entries.capacity() * std::mem::size_of::<Rc<FontEntry>>();
        size += faces
            .entries
            .iter()
            .map(|e| e.size_of_including_this())
            .sum::<usize>();
        if let Some(map) = &faces.char_map {
            size += map.size_of_including_this();
        }
        size
    }

    pub fn size_of_including_this(&self) -> usize {
        std::mem::size_of::<Self>() + self.size_of_excluding_this()
    }
}

/// Best face per weight bucket (1..=9) among the faces closest in italic and
/// stretch. Returns `None` if the family has no faces.
fn find_weights_for_style(
    entries: &[Rc<FontEntry>],
    italic: bool,
    stretch: i16,
) -> Option<[Option<Rc<FontEntry>>; 10]> {
    let best = entries
        .iter()
        .map(|e| style_distance(e, italic, stretch))
        .min()?;
    let mut weights: [Option<Rc<FontEntry>>; 10] = Default::default();
    for entry in entries {
        if style_distance(entry, italic, stretch) != best {
            continue;
        }
        let bucket = (entry.weight() / 100).clamp(1, 9) as usize;
        if weights[bucket].is_none() {
            weights[bucket] = Some(Rc::clone(entry));
        }
    }
    Some(weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::{FaceSource, VirtualFace};
    use crate::style::FontSlant;

    fn face(name: &str, weight: u16, italic: bool) -> Rc<FontEntry> {
        Rc::new(FontEntry::new(FaceSource::Virtual(
            VirtualFace::ascii("Family", 500)
                .with_name(name)
                .with_weight(weight)
                .with_italic(italic),
        )))
    }

    fn family(faces: &[(&str, u16, bool)]) -> Rc<FontFamily> {
        let family = FontFamily::new("Family");
        for &(name, weight, italic) in faces {
            family.add_font_entry(face(name, weight, italic));
        }
        family
    }

    #[test]
    fn test_semibold_italic_picks_bold() {
        let family = family(&[("Regular", 400, false), ("Bold", 700, false)]);
        assert!(family.is_simple_family());

        let style = FontStyle::new(16.0, 600, FontSlant::Italic);
        let m = family.find_font_for_style(&style).unwrap();
        assert_eq!(m.entry.name(), "Bold");
        assert!(!m.needs_synthetic_bold);
        assert!(m.needs_synthetic_italic);
    }

    #[test]
    fn test_simple_family_exact_slot() {
        let family = family(&[
            ("Regular", 400, false),
            ("Bold", 700, false),
            ("Italic", 400, true),
            ("BoldItalic", 700, true),
        ]);
        let style = FontStyle::new(16.0, 700, FontSlant::Italic);
        let m = family.find_font_for_style(&style).unwrap();
        assert_eq!(m.entry.name(), "BoldItalic");
        assert!(!m.needs_synthetic_bold && !m.needs_synthetic_italic);
    }

    #[test]
    fn test_bold_request_on_regular_only_needs_synthetic_bold() {
        let family = family(&[("Regular", 400, false), ("Italic", 400, true)]);
        let style = FontStyle::new(16.0, 700, FontSlant::Normal);
        let m = family.find_font_for_style(&style).unwrap();
        assert_eq!(m.entry.name(), "Regular");
        assert!(m.needs_synthetic_bold);
    }

    #[test]
    fn test_weight_walk_in_large_family() {
        let family = family(&[
            ("Thin", 100, false),
            ("Light", 300, false),
            ("Medium", 500, false),
            ("Bold", 700, false),
            ("Black", 900, false),
        ]);
        assert!(!family.is_simple_family());

        let pick = |weight| {
            let style = FontStyle::new(16.0, weight, FontSlant::Normal);
            family.find_font_for_style(&style).unwrap().entry.name().to_string()
        };
        assert_eq!(pick(400), "Medium");
        assert_eq!(pick(600), "Bold");
        assert_eq!(pick(200), "Thin");
        assert_eq!(pick(800), "Black");
        assert_eq!(pick(300), "Light");
    }

    #[test]
    fn test_weight_walk_turns_around() {
        let family = family(&[
            ("Light", 300, false),
            ("Medium", 500, false),
            ("SemiBold", 600, false),
            ("Bold", 700, false),
            ("Heavy", 800, false),
        ]);
        let style = FontStyle::new(16.0, 900, FontSlant::Normal);
        let m = family.find_font_for_style(&style).unwrap();
        assert_eq!(m.entry.name(), "Heavy");

        let style = FontStyle::new(16.0, 100, FontSlant::Normal);
        assert_eq!(family.find_font_for_style(&style).unwrap().entry.name(), "Light");
    }

    #[test]
    fn test_duplicates_are_dropped() {
        let family = FontFamily::new("Family");
        assert!(family.add_font_entry(face("A", 400, false)));
        assert!(!family.add_font_entry(face("B", 400, false)));
        assert_eq!(family.len(), 1);
        assert!(family.entries()[0].family().is_some());
    }

    #[test]
    fn test_global_match_ranks_style() {
        let family = family(&[("Regular", 400, false), ("Bold", 700, false)]);
        let style = FontStyle::new(16.0, 700, FontSlant::Normal);
        let mut data = GlobalFontMatch::new('a' as u32, Script::Latin, Some(&style));
        family.search_all_fonts_for_char(&mut data);
        assert_eq!(data.best_match.unwrap().name(), "Bold");
        assert_eq!(data.count, 2);
        assert_eq!(data.cmaps_tested, 2);

        let mut data = GlobalFontMatch::new(0x3042, Script::Hiragana, Some(&style));
        family.find_font_for_char(&mut data);
        assert!(data.best_match.is_none());
    }
}
