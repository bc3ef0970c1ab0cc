//! Font entries: one physical face
//!
//! An entry knows the face's attributes and coverage and hands out sized
//! [`Font`](crate::font::Font) instances through the font cache. Its
//! character map is built on first use and shared by every font made from
//! the entry. Raw sfnt tables are cached weakly: the entry keeps a blob alive
//! only while some user (a shaper, a caller) holds it, unless it has been
//! explicitly preserved.

use crate::charmap::CharacterMap;
use crate::face::FaceSource;
use crate::family::FontFamily;
use crate::font::Font;
use crate::font_cache::{FontCache, FontRef};
use crate::style::FontStyle;
use rustc_hash::FxHashMap;
use std::cell::{Cell, OnceCell, RefCell};
use std::ops::Deref;
use std::rc::{Rc, Weak};

/// Weight used when the face does not report one
pub const DEFAULT_WEIGHT: u16 = 500;

/// A raw font table blob
#[derive(Debug)]
pub struct FontTable {
    tag: u32,
    data: Box<[u8]>,
}

impl FontTable {
    pub fn tag(&self) -> u32 {
        self.tag
    }
}

impl Deref for FontTable {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

/// One physical font face
#[derive(Debug)]
pub struct FontEntry {
    name: String,
    family: RefCell<Weak<FontFamily>>,
    /// `None` while a downloadable face is still loading
    source: Option<FaceSource>,
    weight: u16,
    stretch: i16,
    italic: bool,
    fixed_pitch: bool,
    is_proxy: bool,
    is_valid: Cell<bool>,
    skip_during_system_fallback: Cell<bool>,
    is_bad_underline_font: Cell<bool>,
    char_map: OnceCell<Rc<CharacterMap>>,
    tables: RefCell<FxHashMap<u32, Weak<FontTable>>>,
    preserved_tables: RefCell<FxHashMap<u32, Rc<FontTable>>>,
}

impl FontEntry {
    /// Creates an entry from loaded face data, taking attributes from the face.
    pub fn new(source: FaceSource) -> Self {
        let desc = source.descriptor().clone();
        let weight = normalize_weight(desc.weight);
        Self {
            name: desc.name,
            family: RefCell::new(Weak::new()),
            source: Some(source),
            weight,
            stretch: desc.stretch.clamp(-4, 4),
            italic: desc.italic,
            fixed_pitch: desc.fixed_pitch,
            is_proxy: false,
            is_valid: Cell::new(true),
            skip_during_system_fallback: Cell::new(false),
            is_bad_underline_font: Cell::new(false),
            char_map: OnceCell::new(),
            tables: RefCell::new(FxHashMap::default()),
            preserved_tables: RefCell::new(FxHashMap::default()),
        }
    }

    /// A placeholder for a downloadable face that has not loaded yet.
    /// Proxies cover no characters and cannot make fonts.
    pub fn proxy(name: impl Into<String>, weight: u16, stretch: i16, italic: bool) -> Self {
        Self {
            name: name.into(),
            family: RefCell::new(Weak::new()),
            source: None,
            weight: normalize_weight(weight),
            stretch: stretch.clamp(-4, 4),
            italic,
            fixed_pitch: false,
            is_proxy: true,
            is_valid: Cell::new(true),
            skip_during_system_fallback: Cell::new(true),
            is_bad_underline_font: Cell::new(false),
            char_map: OnceCell::new(),
            tables: RefCell::new(FxHashMap::default()),
            preserved_tables: RefCell::new(FxHashMap::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The family this entry belongs to, if it is still alive
    pub fn family(&self) -> Option<Rc<FontFamily>> {
        self.family.borrow().upgrade()
    }

    pub(crate) fn set_family(&self, family: Weak<FontFamily>) {
        *self.family.borrow_mut() = family;
    }

    pub fn source(&self) -> Option<&FaceSource> {
        self.source.as_ref()
    }

    pub fn weight(&self) -> u16 {
        self.weight
    }

    pub fn stretch(&self) -> i16 {
        self.stretch
    }

    pub fn is_italic(&self) -> bool {
        self.italic
    }

    pub fn is_bold(&self) -> bool {
        self.weight >= 600
    }

    pub fn is_fixed_pitch(&self) -> bool {
        self.fixed_pitch
    }

    pub fn is_proxy(&self) -> bool {
        self.is_proxy
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid.get()
    }

    /// Excludes the entry from further matching.
    pub fn mark_invalid(&self) {
        if self.is_valid.replace(false) {
            tracing::warn!("Font entry '{}' marked invalid", self.name);
        }
    }

    pub fn skip_during_system_fallback(&self) -> bool {
        self.skip_during_system_fallback.get()
    }

    pub fn set_skip_during_system_fallback(&self, skip: bool) {
        self.skip_during_system_fallback.set(skip);
    }

    pub fn is_bad_underline_font(&self) -> bool {
        self.is_bad_underline_font.get()
    }

    pub fn set_bad_underline_font(&self, bad: bool) {
        self.is_bad_underline_font.set(bad);
    }

    /// The face's coverage, read from its cmap on first use
    pub fn char_map(&self) -> Rc<CharacterMap> {
        Rc::clone(self.char_map.get_or_init(|| Rc::new(self.read_cmap())))
    }

    /// True once the cmap has been read
    pub fn has_char_map(&self) -> bool {
        self.char_map.get().is_some()
    }

    fn read_cmap(&self) -> CharacterMap {
        let mut map = CharacterMap::new();
        if let Some(source) = &self.source {
            source.fill_char_map(&mut map);
        }
        tracing::trace!("Read cmap for '{}': {} chars", self.name, map.count());
        map
    }

    pub fn test_character_map(&self, ch: u32) -> bool {
        !self.is_proxy && self.is_valid() && self.char_map().test(ch)
    }

    pub fn has_character(&self, ch: u32) -> bool {
        self.test_character_map(ch)
    }

    /// Raw table `tag`, shared with any other current user of the same table.
    pub fn get_font_table(&self, tag: u32) -> Option<Rc<FontTable>> {
        if let Some(table) = self.tables.borrow().get(&tag).and_then(Weak::upgrade) {
            return Some(table);
        }
        let data = self.source.as_ref()?.table(tag)?;
        let table = Rc::new(FontTable {
            tag,
            data: data.into_boxed_slice(),
        });
        let mut tables = self.tables.borrow_mut();
        tables.retain(|_, weak| weak.strong_count() > 0);
        tables.insert(tag, Rc::downgrade(&table));
        Some(table)
    }

    /// Keeps `table` alive for the lifetime of the entry.
    pub fn preserve_font_table(&self, table: &Rc<FontTable>) {
        self.preserved_tables
            .borrow_mut()
            .insert(table.tag, Rc::clone(table));
    }

    pub fn release_preserved_tables(&self) {
        self.preserved_tables.borrow_mut().clear();
    }

    /// Returns the cached font for `style`, creating and registering it on a
    /// miss. Returns `None` when the face cannot produce a usable font.
    pub fn find_or_make_font(
        self: &Rc<Self>,
        style: &FontStyle,
        needs_bold: bool,
        cache: &FontCache,
    ) -> Option<FontRef> {
        if let Some(font) = cache.lookup(self, style) {
            return Some(font);
        }
        if self.is_proxy || !self.is_valid() {
            return None;
        }
        match Font::new(Rc::clone(self), style.clone(), needs_bold) {
            Ok(font) => Some(cache.add_new(font)),
            Err(e) => {
                tracing::warn!("Failed to create font for '{}': {}", self.name, e);
                None
            }
        }
    }

    /// Heap owned by the entry. Tables are counted only while cached here,
    /// and the char map only when no other owner shares it.
    pub fn size_of_excluding_this(&self) -> usize {
        let mut size = self.name.capacity();
        if let Some(map) = self.char_map.get() {
            if Rc::strong_count(map) == 1 {
                size += map.size_of_including_this();
            }
        }
        let tables = self.tables.borrow();
        size += tables.capacity() * std::mem::size_of::<(u32, Weak<FontTable>)>();
        size += tables
            .values()
            .filter_map(Weak::upgrade)
            .map(|t| t.data.len() + std::mem::size_of::<FontTable>())
            .sum::<usize>();
        if let Some(source) = &self.source {
            size += source.size_of_excluding_this();
        }
        size
    }

    pub fn size_of_including_this(&self) -> usize {
        std::mem::size_of::<Self>() + self.size_of_excluding_this()
    }
}

fn normalize_weight(weight: u16) -> u16 {
    if weight == 0 {
        DEFAULT_WEIGHT
    } else {
        weight.clamp(100, 900)
    }
}
