//! Cheap name-similarity pre-filter for entity resolution.
//!
//! Only pairs passing [`is_similar`] are sent to the LLM for judgment.

use std::collections::BTreeSet;

/// Whether two normalized entity names are plausibly the same entity.
///
/// Rules, in order:
/// 1. A digit in the bigram difference rejects ("ROUTE 9" vs "ROUTE 8").
/// 2. Mostly-Latin names: edit distance at most half the shorter length, or
///    every word of one abbreviates the matching word of the other
///    ("ACME CORP" vs "ACME CORPORATION").
/// 3. Other scripts: character-set overlap of at least 0.8 of the larger
///    set; for sets under 4 characters, more than one shared character.
pub fn is_similar(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    if has_digit_in_bigram_diff(a, b) {
        return false;
    }

    if is_latin(a) && is_latin(b) {
        let shorter = a.chars().count().min(b.chars().count());
        return levenshtein(a, b) <= shorter / 2 || is_abbreviation(a, b);
    }

    let set_a: BTreeSet<char> = a.chars().collect();
    let set_b: BTreeSet<char> = b.chars().collect();
    let shared = set_a.intersection(&set_b).count();
    let max_len = set_a.len().max(set_b.len());
    if max_len < 4 {
        return shared > 1;
    }
    shared as f64 / max_len as f64 >= 0.8
}

fn bigrams(s: &str) -> BTreeSet<(char, char)> {
    let chars: Vec<char> = s.chars().collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

fn has_digit_in_bigram_diff(a: &str, b: &str) -> bool {
    let set_a = bigrams(a);
    let set_b = bigrams(b);
    set_a
        .symmetric_difference(&set_b)
        .any(|(x, y)| x.is_ascii_digit() || y.is_ascii_digit())
}

/// At least 80% of characters are ASCII letters, spaces or punctuation.
fn is_latin(s: &str) -> bool {
    let total = s.chars().count();
    if total == 0 {
        return false;
    }
    let latin = s
        .chars()
        .filter(|c| c.is_ascii_alphabetic() || c.is_ascii_whitespace() || c.is_ascii_punctuation())
        .count();
    latin * 5 >= total * 4
}

/// Same word count, identical first word, and each word of the shorter
/// name is a prefix of the corresponding word in the longer one.
fn is_abbreviation(a: &str, b: &str) -> bool {
    let words_a: Vec<&str> = a.split_whitespace().collect();
    let words_b: Vec<&str> = b.split_whitespace().collect();
    if words_a.len() != words_b.len() || words_a.len() < 2 || words_a[0] != words_b[0] {
        return false;
    }
    words_a
        .iter()
        .zip(&words_b)
        .all(|(x, y)| x.starts_with(y) || y.starts_with(x))
}

/// Character-level edit distance.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let n = b_chars.len();
    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr: Vec<usize> = vec![0; n + 1];

    for (i, c) in a.chars().enumerate() {
        curr[0] = i + 1;
        for j in 1..=n {
            let cost = usize::from(c != b_chars[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[n]
}
