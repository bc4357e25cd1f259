//! Name similarity on a 0–100 scale.
//!
//! The score is the normalized Levenshtein similarity of the two lowercased
//! names:
//!
//! `score = round(100 * (1 - lev(a, b) / max(|a|, |b|)))`
//!
//! with lengths measured in chars, so every inserted, deleted or replaced
//! character lowers the score.

use strsim::normalized_levenshtein;

/// Case-insensitive similarity between two names, in `0..=100`.
///
/// Two empty strings score 100; an empty string against a non-empty one
/// scores 0.
///
/// # Example
/// ```
/// use locdedup::core::similarity::score;
///
/// assert_eq!(score("Starbucks", "STARBUCKS"), 100);
/// assert!(score("Kopi Kenangan Sudirman", "Kopi Kenangan - Sudirman") >= 85);
/// assert!(score("Starbucks", "Excelso") < 50);
/// ```
pub fn score(a: &str, b: &str) -> u8 {
    let ratio = normalized_levenshtein(&a.to_lowercase(), &b.to_lowercase());
    (ratio * 100.0).round() as u8
}
