//! Label normalization and token-set similarity
//!
//! Form labels vary across contest editions in casing, accents and
//! punctuation ("Título del Proyecto:", "titulo del proyecto"). Everything
//! that compares labels goes through [`normalize`] first so those surface
//! differences never matter.

use std::collections::HashSet;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Canonicalize a label for comparison.
///
/// Lower-cases, strips diacritics (NFD decomposition, combining marks
/// dropped), replaces every non-alphanumeric character with a space, and
/// collapses whitespace. Total and idempotent.
pub fn normalize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.nfd().filter(|c| !is_combining_mark(*c)) {
        for low in ch.to_lowercase() {
            if low.is_alphanumeric() {
                out.push(low);
            } else {
                out.push(' ');
            }
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Token-overlap similarity between two labels, in `[0, 1]`.
///
/// Normalized-equal strings score 1.0; otherwise Jaccard over whitespace
/// token sets. Empty input never panics.
pub fn similarity(a: &str, b: &str) -> f64 {
    let na = normalize(a);
    let nb = normalize(b);
    if na == nb {
        return 1.0;
    }

    let tokens_a: HashSet<&str> = na.split_whitespace().collect();
    let tokens_b: HashSet<&str> = nb.split_whitespace().collect();

    let union = tokens_a.union(&tokens_b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = tokens_a.intersection(&tokens_b).count();
    intersection as f64 / union as f64
}
