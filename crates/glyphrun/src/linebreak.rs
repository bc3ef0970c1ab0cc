//! Default line break opportunities (UAX #14)
//!
//! Text runs only record break opportunities; deciding where a line ends is
//! the caller's job. This seeds the opportunities for callers that do not
//! run their own line breaker.

use crate::glyph::BreakType;
use unicode_linebreak::{linebreaks, BreakOpportunity};

/// Break type before each code unit of `text`. Index 0 never gets a break,
/// and the opportunity at the end of the text is dropped. Mandatory breaks
/// (after a newline) are reported as normal ones.
pub fn default_break_opportunities(text: &[u16]) -> Vec<BreakType> {
    let mut breaks = vec![BreakType::None; text.len()];
    if text.is_empty() {
        return breaks;
    }

    // Lone surrogates become U+FFFD, which is also one UTF-16 unit
    let decoded = String::from_utf16_lossy(text);
    let mut unit_at_byte = Vec::with_capacity(decoded.len() + 1);
    let mut unit = 0;
    for ch in decoded.chars() {
        unit_at_byte.extend(std::iter::repeat(unit).take(ch.len_utf8()));
        unit += ch.len_utf16();
    }
    unit_at_byte.push(unit);

    for (byte, opportunity) in linebreaks(&decoded) {
        let unit = unit_at_byte[byte];
        if unit == 0 || unit >= text.len() {
            continue;
        }
        match opportunity {
            BreakOpportunity::Mandatory | BreakOpportunity::Allowed => {
                breaks[unit] = BreakType::Normal;
            }
        }
    }
    breaks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    fn break_offsets(s: &str) -> Vec<usize> {
        default_break_opportunities(&utf16(s))
            .iter()
            .enumerate()
            .filter(|(_, b)| **b == BreakType::Normal)
            .map(|(i, _)| i)
            .collect()
    }

    #[test]
    fn test_breaks_after_spaces() {
        assert_eq!(break_offsets("The quick fox"), vec![4, 10]);
        assert!(break_offsets("word").is_empty());
        assert!(default_break_opportunities(&[]).is_empty());
    }

    #[test]
    fn test_mandatory_break_after_newline() {
        assert_eq!(break_offsets("ab\ncd"), vec![3]);
    }

    #[test]
    fn test_offsets_count_utf16_units() {
        // U+1F600 takes two units
        assert_eq!(break_offsets("\u{1F600} go"), vec![3]);
    }
}
