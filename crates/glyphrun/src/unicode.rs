//! Character classification helpers used by shaping and fallback
//!
//! Text is handled as either 8-bit (Latin-1) or 16-bit (UTF-16) code units;
//! [`TextUnit`] lets the pipeline stay generic over both.

use crate::shaped_word::WordText;
use unicode_script::{Script, UnicodeScript};
use unicode_segmentation::UnicodeSegmentation;

/// A code unit of stored text: `u8` for Latin-1 text, `u16` for UTF-16.
pub trait TextUnit: Copy + Eq + std::fmt::Debug {
    /// True for the 8-bit representation
    const IS_8BIT: bool;

    fn to_u32(self) -> u32;

    /// Borrows a slice of units as word-cache text.
    fn word_text(text: &[Self]) -> WordText<'_>;
}

impl TextUnit for u8 {
    const IS_8BIT: bool = true;

    #[inline]
    fn to_u32(self) -> u32 {
        self as u32
    }

    fn word_text(text: &[Self]) -> WordText<'_> {
        WordText::Latin1(text)
    }
}

impl TextUnit for u16 {
    const IS_8BIT: bool = false;

    #[inline]
    fn to_u32(self) -> u32 {
        self as u32
    }

    fn word_text(text: &[Self]) -> WordText<'_> {
        WordText::Utf16(text)
    }
}

#[inline]
pub fn is_high_surrogate(u: u32) -> bool {
    (0xD800..=0xDBFF).contains(&u)
}

#[inline]
pub fn is_low_surrogate(u: u32) -> bool {
    (0xDC00..=0xDFFF).contains(&u)
}

#[inline]
pub fn surrogate_to_ucs4(high: u32, low: u32) -> u32 {
    0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00)
}

/// Mixes one character into a running string hash.
#[inline]
pub fn hash_mix(hash: u32, ch: u32) -> u32 {
    (hash >> 28) ^ (hash << 4) ^ ch
}

/// Decodes the character starting at `index`, combining surrogate pairs in
/// 16-bit text. Returns the scalar value and the number of code units used.
pub fn char_at<T: TextUnit>(text: &[T], index: usize) -> (u32, usize) {
    let ch = text[index].to_u32();
    if !T::IS_8BIT && is_high_surrogate(ch) && index + 1 < text.len() {
        let next = text[index + 1].to_u32();
        if is_low_surrogate(next) {
            return (surrogate_to_ucs4(ch, next), 2);
        }
    }
    (ch, 1)
}

/// True if `ch` never starts a grapheme cluster of its own
/// (combining marks, joiners, variation selectors, ...).
pub fn is_cluster_extender(ch: u32) -> bool {
    let Some(c) = char::from_u32(ch) else {
        return false;
    };
    if ch < 0x300 {
        return false;
    }
    let mut buf = [0u8; 8];
    buf[0] = b'a';
    let len = 1 + c.encode_utf8(&mut buf[1..]).len();
    match std::str::from_utf8(&buf[..len]) {
        Ok(s) => s.graphemes(true).count() == 1,
        Err(_) => false,
    }
}

/// Characters that render as nothing when no font supports them.
pub fn is_default_ignorable(ch: u32) -> bool {
    matches!(
        ch,
        0x00AD
            | 0x034F
            | 0x061C
            | 0x115F..=0x1160
            | 0x17B4..=0x17B5
            | 0x180B..=0x180E
            | 0x200B..=0x200F
            | 0x202A..=0x202E
            | 0x2060..=0x206F
            | 0x3164
            | 0xFE00..=0xFE0F
            | 0xFEFF
            | 0xFFA0
            | 0xFFF0..=0xFFF8
            | 0x1BCA0..=0x1BCA3
            | 0x1D173..=0x1D17A
            | 0xE0000..=0xE0FFF
    )
}

#[inline]
pub fn is_join_control(ch: u32) -> bool {
    ch == 0x200C || ch == 0x200D
}

#[inline]
pub fn is_join_causer(ch: u32) -> bool {
    ch == 0x200D
}

#[inline]
pub fn is_var_selector(ch: u32) -> bool {
    (0xFE00..=0xFE0F).contains(&ch) || (0xE0100..=0xE01EF).contains(&ch)
}

pub fn is_bidi_control(ch: u32) -> bool {
    matches!(ch, 0x061C | 0x200E | 0x200F | 0x202A..=0x202E | 0x2066..=0x2069)
}

/// General category Zs.
pub fn is_space_separator(ch: u32) -> bool {
    matches!(
        ch,
        0x0020 | 0x00A0 | 0x1680 | 0x2000..=0x200A | 0x202F | 0x205F | 0x3000
    )
}

/// General category Cc.
pub fn is_control(ch: u32) -> bool {
    char::from_u32(ch).is_some_and(char::is_control)
}

/// Private-use code points never go through pref or system fallback.
pub fn is_private_use(ch: u32) -> bool {
    (0xE000..=0xF8FF).contains(&ch) || (0xF0000..=0x10FFFD).contains(&ch)
}

/// Combining marks (general category M*). Joiners, variation selectors and
/// emoji modifiers also extend clusters but are not marks.
pub fn is_mark(ch: u32) -> bool {
    is_cluster_extender(ch)
        && !is_join_control(ch)
        && !is_var_selector(ch)
        && !(0x1F3FB..=0x1F3FF).contains(&ch)
        && !(0xE0020..=0xE007F).contains(&ch)
}

/// ISO 15924 tag of `script` packed big-endian, e.g. `Latn`.
pub fn script_tag(script: Script) -> u32 {
    let name = script.short_name().as_bytes();
    let mut tag = [b' '; 4];
    for (dst, src) in tag.iter_mut().zip(name) {
        *dst = *src;
    }
    u32::from_be_bytes(tag)
}

/// Script of a scalar value; unpaired surrogates and invalid values are Unknown.
pub fn script_of(ch: u32) -> Script {
    char::from_u32(ch).map_or(Script::Unknown, |c| c.script())
}

/// Iterates maximal runs of text sharing one script.
///
/// Common and Inherited characters join the run around them; a run made only
/// of such characters reports [`Script::Common`].
pub struct ScriptRunIter<'a, T: TextUnit> {
    text: &'a [T],
    pos: usize,
}

impl<'a, T: TextUnit> ScriptRunIter<'a, T> {
    pub fn new(text: &'a [T]) -> Self {
        Self { text, pos: 0 }
    }
}

impl<'a, T: TextUnit> Iterator for ScriptRunIter<'a, T> {
    /// `(start, end, script)` in code units
    type Item = (usize, usize, Script);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.text.len() {
            return None;
        }
        let start = self.pos;
        let mut script = Script::Common;
        let mut i = start;
        while i < self.text.len() {
            let (ch, units) = char_at(self.text, i);
            let ch_script = script_of(ch);
            match ch_script {
                Script::Common | Script::Inherited => {}
                s if script == Script::Common => script = s,
                s if s != script => break,
                _ => {}
            }
            i += units;
        }
        self.pos = i;
        Some((start, i, script))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    #[test]
    fn test_surrogates() {
        let text = utf16("a\u{1F600}");
        assert_eq!(char_at(&text, 1), (0x1F600, 2));
        assert!(is_high_surrogate(text[1] as u32));
        assert!(is_low_surrogate(text[2] as u32));
    }

    #[test]
    fn test_cluster_extenders() {
        assert!(is_cluster_extender(0x0301));
        assert!(is_cluster_extender(0x200D));
        assert!(!is_cluster_extender('a' as u32));
        assert!(!is_cluster_extender(' ' as u32));
    }

    #[test]
    fn test_marks() {
        assert!(is_mark(0x0301));
        assert!(!is_mark(0x200D));
        assert!(!is_mark(0xFE0F));
        assert!(!is_mark('e' as u32));
    }

    #[test]
    fn test_script_tag() {
        assert_eq!(script_tag(Script::Latin), u32::from_be_bytes(*b"Latn"));
        assert_ne!(script_tag(Script::Arabic), script_tag(Script::Hebrew));
    }

    #[test]
    fn test_script_runs() {
        let text = utf16("abc \u{05D0}\u{05D1} def");
        let runs: Vec<_> = ScriptRunIter::new(&text).collect();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0], (0, 4, Script::Latin));
        assert_eq!(runs[1].2, Script::Hebrew);
        assert_eq!(runs[2].2, Script::Latin);
        assert_eq!(runs[2].1, text.len());
    }

    #[test]
    fn test_common_only_run() {
        let text: Vec<u8> = b"123 !".to_vec();
        let runs: Vec<_> = ScriptRunIter::new(&text).collect();
        assert_eq!(runs, vec![(0, 5, Script::Common)]);
    }
}
