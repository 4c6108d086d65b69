//! HFS+ name comparison.
//!
//! HFSX compares name units binarily. HFS+ is case-insensitive and folds
//! case the way Apple's FastUnicodeCompare does for the Latin ranges that
//! dominate real volumes: ASCII and Latin-1 fold arithmetically, Latin
//! Extended-A by its upper/lower pairing.

use std::cmp::Ordering;

/// Binary comparison of name units (HFSX, case-sensitive).
pub fn compare_binary(a: &[u16], b: &[u16]) -> Ordering {
    a.cmp(b)
}

/// Case-insensitive comparison of name units (HFS+).
pub fn compare_folded(a: &[u16], b: &[u16]) -> Ordering {
    let len = a.len().min(b.len());
    for i in 0..len {
        match fold(a[i]).cmp(&fold(b[i])) {
            Ordering::Equal => continue,
            ord => return ord,
        }
    }
    a.len().cmp(&b.len())
}

/// Case-fold one UTF-16 unit.
fn fold(c: u16) -> u16 {
    match c {
        // ASCII and Latin-1 uppercase letters sit 0x20 below lowercase.
        0x0041..=0x005A | 0x00C0..=0x00D6 | 0x00D8..=0x00DE => c + 0x20,
        // Latin Extended-A pairs upper/lower at even/odd code points.
        0x0100..=0x012F | 0x0132..=0x0137 | 0x014A..=0x0177 if c & 1 == 0 => c + 1,
        0x0139..=0x0148 | 0x0179..=0x017E if c & 1 == 1 => c + 1,
        0x0130 => 0x0069, // İ
        0x0178 => 0x00FF, // Ÿ
        _ => c,
    }
}

/// Decode big-endian UTF-16 bytes into host-native units.
pub fn decode_be_units(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

/// Render name units as a string, lossily for unpaired surrogates.
pub fn units_to_string(units: &[u16]) -> String {
    String::from_utf16_lossy(units)
}

/// Encode a string as name units.
pub fn string_to_units(s: &str) -> Vec<u16> {
    s.encode_utf16().collect()
}
