//! Shaped words
//!
//! A [`ShapedWord`] is the cached result of shaping one word with one font at
//! one resolution. Words are owned by the font's word cache and copied into
//! text runs; they are never mutated after shaping except for their age.

use crate::glyph::{setup_cluster_boundaries, CompressedGlyph, DetailedGlyph, GlyphBuffer};
use crate::text_run::TextRunFlags;
use crate::unicode::{hash_mix, script_tag};
use unicode_script::Script;

/// Longest word the cache will hold, in code units
pub const MAX_LENGTH: usize = 0x7fff;

/// Run flags that change how a word is shaped
pub const WORD_CACHE_FLAGS: TextRunFlags = TextRunFlags::IS_RTL
    .union(TextRunFlags::DISABLE_OPTIONAL_LIGATURES)
    .union(TextRunFlags::IS_8BIT);

/// Borrowed word text in either storage width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordText<'a> {
    Latin1(&'a [u8]),
    Utf16(&'a [u16]),
}

impl<'a> WordText<'a> {
    pub fn len(&self) -> usize {
        match self {
            WordText::Latin1(t) => t.len(),
            WordText::Utf16(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_8bit(&self) -> bool {
        matches!(self, WordText::Latin1(_))
    }

    /// Code unit at `index`
    pub fn unit(&self, index: usize) -> u32 {
        match self {
            WordText::Latin1(t) => t[index] as u32,
            WordText::Utf16(t) => t[index] as u32,
        }
    }

    pub fn units(&self) -> impl Iterator<Item = u32> + 'a {
        let (narrow, wide): (&'a [u8], &'a [u16]) = match *self {
            WordText::Latin1(t) => (t, &[]),
            WordText::Utf16(t) => (&[], t),
        };
        narrow
            .iter()
            .map(|&u| u as u32)
            .chain(wide.iter().map(|&u| u as u32))
    }

    /// The text widened to UTF-16, the form shapers consume.
    pub fn to_utf16(&self) -> Vec<u16> {
        self.units().map(|u| u as u16).collect()
    }

    /// Running string hash over the code units
    pub fn hash(&self) -> u32 {
        self.units().fold(0, hash_mix)
    }
}

impl<'a> From<&'a [u8]> for WordText<'a> {
    fn from(text: &'a [u8]) -> Self {
        WordText::Latin1(text)
    }
}

impl<'a> From<&'a [u16]> for WordText<'a> {
    fn from(text: &'a [u16]) -> Self {
        WordText::Utf16(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WordTextBuf {
    Latin1(Box<[u8]>),
    Utf16(Box<[u16]>),
}

impl WordTextBuf {
    fn as_text(&self) -> WordText<'_> {
        match self {
            WordTextBuf::Latin1(t) => WordText::Latin1(t),
            WordTextBuf::Utf16(t) => WordText::Utf16(t),
        }
    }
}

/// Word cache lookup key
#[derive(Debug, Clone, Copy)]
pub struct WordKey<'a> {
    pub text: WordText<'a>,
    pub script: Script,
    pub app_units_per_dev_unit: u32,
    pub flags: TextRunFlags,
    pub hash: u32,
}

impl<'a> WordKey<'a> {
    /// Builds a key. `flags` is reduced to the shaping-relevant subset; 8-bit
    /// text always carries `IS_8BIT`.
    pub fn new(
        text: WordText<'a>,
        script: Script,
        app_units_per_dev_unit: u32,
        flags: TextRunFlags,
    ) -> Self {
        let mut flags = flags & WORD_CACHE_FLAGS;
        if text.is_8bit() {
            flags |= TextRunFlags::IS_8BIT;
        }
        Self::with_hash(text, script, app_units_per_dev_unit, flags, text.hash())
    }

    /// Builds a key from a string hash computed by the caller while scanning.
    pub fn with_hash(
        text: WordText<'a>,
        script: Script,
        app_units_per_dev_unit: u32,
        flags: TextRunFlags,
        string_hash: u32,
    ) -> Self {
        let hash = string_hash
            .wrapping_add(script_tag(script))
            .wrapping_add(app_units_per_dev_unit.wrapping_mul(0x100))
            .wrapping_add(flags.bits().wrapping_mul(0x10000));
        Self {
            text,
            script,
            app_units_per_dev_unit,
            flags,
            hash,
        }
    }
}

/// Glyphs for one word in one font
#[derive(Debug, Clone)]
pub struct ShapedWord {
    text: WordTextBuf,
    buffer: GlyphBuffer,
    script: Script,
    app_units_per_dev_unit: u32,
    flags: TextRunFlags,
    age: u32,
}

impl ShapedWord {
    /// Creates an unshaped word over Latin-1 text. Returns `None` for words
    /// longer than [`MAX_LENGTH`] or when allocation fails.
    pub fn create_8bit(
        text: &[u8],
        script: Script,
        app_units_per_dev_unit: u32,
        flags: TextRunFlags,
    ) -> Option<Self> {
        if text.len() > MAX_LENGTH {
            return None;
        }
        let mut owned = Vec::new();
        owned.try_reserve_exact(text.len()).ok()?;
        owned.extend_from_slice(text);
        Some(Self {
            text: WordTextBuf::Latin1(owned.into_boxed_slice()),
            buffer: GlyphBuffer::try_new(text.len())?,
            script,
            app_units_per_dev_unit,
            flags: flags | TextRunFlags::IS_8BIT,
            age: 0,
        })
    }

    /// Creates an unshaped word over UTF-16 text. With `IS_8BIT` set the text
    /// is narrowed to Latin-1 first; the caller guarantees it fits.
    pub fn create_16bit(
        text: &[u16],
        script: Script,
        app_units_per_dev_unit: u32,
        flags: TextRunFlags,
    ) -> Option<Self> {
        if flags.contains(TextRunFlags::IS_8BIT) {
            debug_assert!(text.iter().all(|&u| u < 0x100));
            let mut narrow = Vec::new();
            narrow.try_reserve_exact(text.len()).ok()?;
            narrow.extend(text.iter().map(|&u| u as u8));
            return Self::create_8bit(&narrow, script, app_units_per_dev_unit, flags);
        }
        if text.len() > MAX_LENGTH {
            return None;
        }
        let mut owned = Vec::new();
        owned.try_reserve_exact(text.len()).ok()?;
        owned.extend_from_slice(text);
        let mut buffer = GlyphBuffer::try_new(text.len())?;
        setup_cluster_boundaries(buffer.glyphs_mut(), text);
        Some(Self {
            text: WordTextBuf::Utf16(owned.into_boxed_slice()),
            buffer,
            script,
            app_units_per_dev_unit,
            flags,
            age: 0,
        })
    }

    /// Creates a word for the text `key` describes.
    pub fn create(key: &WordKey<'_>) -> Option<Self> {
        match key.text {
            WordText::Latin1(t) => {
                Self::create_8bit(t, key.script, key.app_units_per_dev_unit, key.flags)
            }
            WordText::Utf16(t) => {
                Self::create_16bit(t, key.script, key.app_units_per_dev_unit, key.flags)
            }
        }
    }

    /// Full comparison against a lookup key. 16-bit key text matches 8-bit
    /// word text when every unit is equal.
    pub fn matches(&self, key: &WordKey<'_>) -> bool {
        let text = self.text.as_text();
        text.len() == key.text.len()
            && self.flags == key.flags
            && self.app_units_per_dev_unit == key.app_units_per_dev_unit
            && self.script == key.script
            && text.units().eq(key.text.units())
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn text(&self) -> WordText<'_> {
        self.text.as_text()
    }

    pub fn is_8bit(&self) -> bool {
        matches!(self.text, WordTextBuf::Latin1(_))
    }

    /// Code unit at `index`
    pub fn char_at(&self, index: usize) -> u32 {
        self.text.as_text().unit(index)
    }

    pub fn script(&self) -> Script {
        self.script
    }

    pub fn app_units_per_dev_unit(&self) -> u32 {
        self.app_units_per_dev_unit
    }

    pub fn flags(&self) -> TextRunFlags {
        self.flags
    }

    pub fn is_rtl(&self) -> bool {
        self.flags.contains(TextRunFlags::IS_RTL)
    }

    pub fn disable_ligatures(&self) -> bool {
        self.flags.contains(TextRunFlags::DISABLE_OPTIONAL_LIGATURES)
    }

    pub fn glyphs(&self) -> &[CompressedGlyph] {
        self.buffer.glyphs()
    }

    pub fn glyph_buffer(&self) -> &GlyphBuffer {
        &self.buffer
    }

    pub fn glyph_buffer_mut(&mut self) -> &mut GlyphBuffer {
        &mut self.buffer
    }

    pub fn detailed_glyphs(&self, offset: usize) -> Option<&[DetailedGlyph]> {
        self.buffer.detailed_glyphs(offset)
    }

    pub fn set_simple_glyph(&mut self, offset: usize, advance: u32, glyph: u32) {
        self.buffer.set_simple_glyph(offset, advance, glyph);
    }

    pub fn set_glyphs(&mut self, offset: usize, glyph: CompressedGlyph, details: &[DetailedGlyph]) {
        self.buffer.set_glyphs(offset, glyph, details);
    }

    pub fn set_missing_glyph(&mut self, offset: usize, ch: u32, ave_char_width: f64) {
        let app_units = self.app_units_per_dev_unit;
        self.buffer
            .set_missing_glyph(offset, ch, ave_char_width, app_units);
    }

    pub fn age(&self) -> u32 {
        self.age
    }

    pub fn reset_age(&mut self) {
        self.age = 0;
    }

    /// Ages the word and returns the new age.
    pub fn increment_age(&mut self) -> u32 {
        self.age += 1;
        self.age
    }

    pub fn size_of_including_this(&self) -> usize {
        let text = match &self.text {
            WordTextBuf::Latin1(t) => t.len(),
            WordTextBuf::Utf16(t) => t.len() * 2,
        };
        std::mem::size_of::<Self>() + text + self.buffer.size_of_excluding_this()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    #[test]
    fn test_narrowing_under_8bit_flag() {
        let text = utf16("caf\u{e9}");
        let word =
            ShapedWord::create_16bit(&text, Script::Latin, 60, TextRunFlags::IS_8BIT).unwrap();
        assert!(word.is_8bit());
        assert_eq!(word.len(), 4);
        assert_eq!(word.char_at(3), 0xE9);

        let wide = ShapedWord::create_16bit(&text, Script::Latin, 60, TextRunFlags::empty()).unwrap();
        assert!(!wide.is_8bit());
        assert_eq!(wide.char_at(3), 0xE9);
    }

    #[test]
    fn test_key_matches_across_widths() {
        let narrow = b"word".as_slice();
        let wide = utf16("word");
        let word = ShapedWord::create_8bit(narrow, Script::Latin, 60, TextRunFlags::empty()).unwrap();

        let key8 = WordKey::new(narrow.into(), Script::Latin, 60, TextRunFlags::empty());
        let key16 = WordKey::new(
            wide.as_slice().into(),
            Script::Latin,
            60,
            TextRunFlags::IS_8BIT,
        );
        assert_eq!(key8.hash, key16.hash);
        assert!(word.matches(&key8));
        assert!(word.matches(&key16));

        let other = WordKey::new(b"wore".as_slice().into(), Script::Latin, 60, TextRunFlags::empty());
        assert!(!word.matches(&other));
        let scaled = WordKey::new(narrow.into(), Script::Latin, 30, TextRunFlags::empty());
        assert!(!word.matches(&scaled));
        assert_ne!(scaled.hash, key8.hash);
    }

    #[test]
    fn test_key_drops_irrelevant_flags() {
        let text = b"a".as_slice();
        let a = WordKey::new(text.into(), Script::Latin, 60, TextRunFlags::ENABLE_SPACING);
        let b = WordKey::new(text.into(), Script::Latin, 60, TextRunFlags::empty());
        assert_eq!(a.flags, b.flags);
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn test_too_long_word_is_rejected() {
        let text = vec![b'a'; MAX_LENGTH + 1];
        assert!(ShapedWord::create_8bit(&text, Script::Latin, 60, TextRunFlags::empty()).is_none());
    }

    #[test]
    fn test_clusters_set_at_creation() {
        let text = utf16("e\u{301}");
        let word = ShapedWord::create_16bit(&text, Script::Latin, 60, TextRunFlags::empty()).unwrap();
        assert!(word.glyphs()[0].is_cluster_start());
        assert!(!word.glyphs()[1].is_cluster_start());
    }

    #[test]
    fn test_age() {
        let mut word = ShapedWord::create_8bit(b"x", Script::Latin, 60, TextRunFlags::empty()).unwrap();
        assert_eq!(word.increment_age(), 1);
        assert_eq!(word.increment_age(), 2);
        word.reset_age();
        assert_eq!(word.age(), 0);
    }
}
