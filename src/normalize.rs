//! Text normalization shared by questions and vocabulary values.
//!
//! Matching is plain substring containment, so both sides must go through
//! [`normalize`] before comparison. A normalized haystack compared against a
//! raw needle silently misses accented values ("Bolívar", "Vía Pública").

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Lower-case, decompose (NFD), drop combining marks, trim.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Remove the first occurrence of `needle` from `haystack`.
///
/// Both arguments are expected to be normalized already. Returns `None` when
/// `needle` does not occur.
pub fn remove_first(haystack: &str, needle: &str) -> Option<String> {
    if needle.is_empty() {
        return None;
    }
    let start = haystack.find(needle)?;
    let mut residual = String::with_capacity(haystack.len() - needle.len() + 1);
    residual.push_str(&haystack[..start]);
    residual.push(' ');
    residual.push_str(&haystack[start + needle.len()..]);
    Some(residual)
}

/// Title-case a value the way the cleaned dataset stores categorical text
/// ("VIA PUBLICA" -> "Via Publica").
pub fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
