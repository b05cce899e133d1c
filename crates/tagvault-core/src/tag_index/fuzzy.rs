//! Fuzzy scoring for tag autocomplete.

/// Score given to an exact match.
pub const EXACT_SCORE: f64 = 2.0;
/// Score given to a prefix match.
pub const PREFIX_SCORE: f64 = 1.5;
/// Fuzzy-only matches below this similarity are dropped.
pub const MIN_FUZZY_RATIO: f64 = 0.6;

/// Ratcliff/Obershelp similarity of two strings, in `0.0..=1.0`.
///
/// Twice the number of matched characters over the combined length, where
/// matches are found by taking the longest common block and recursing on
/// both sides of it.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (start_a, start_b, len) = longest_common_block(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_chars(&a[..start_a], &b[..start_b])
        + matching_chars(&a[start_a + len..], &b[start_b + len..])
}

/// Longest common contiguous block, earliest in `a` then in `b` on ties.
fn longest_common_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    // lengths[j + 1] = length of the common suffix ending at a[i], b[j]
    let mut lengths = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        let mut next = vec![0usize; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            if ca == cb {
                let len = lengths[j] + 1;
                next[j + 1] = len;
                if len > best.2 {
                    best = (i + 1 - len, j + 1 - len, len);
                }
            }
        }
        lengths = next;
    }
    best
}

/// Score `candidate` against `query`, or `None` when it should not be
/// suggested.
///
/// A query containing `:` only matches candidates of the same category and
/// compares values. Otherwise both the full candidate and its value part are
/// considered.
pub fn score(query: &str, candidate: &str) -> Option<f64> {
    let query = query.to_lowercase();
    let candidate = candidate.to_lowercase();

    let (query_category, query_value) = match query.split_once(':') {
        Some((c, v)) => (Some(c), v),
        None => (None, query.as_str()),
    };
    let (category, value_part) = match candidate.split_once(':') {
        Some((c, v)) => (Some(c), v),
        None => (None, candidate.as_str()),
    };

    let (query_match, target, value_part) = match (query_category, category) {
        (Some(qc), Some(c)) if qc == c => (query_value, value_part, None),
        (Some(_), _) => return None,
        (None, Some(_)) => (query.as_str(), candidate.as_str(), Some(value_part)),
        (None, None) => (query.as_str(), candidate.as_str(), None),
    };

    let mut ratio = similarity_ratio(query_match, target);
    if let Some(value) = value_part {
        ratio = ratio.max(similarity_ratio(query_match, value));
    }

    let exact = target == query_match || value_part == Some(query_match);
    let prefix = target.starts_with(query_match)
        || value_part.is_some_and(|v| v.starts_with(query_match));
    let contains =
        target.contains(query_match) || value_part.is_some_and(|v| v.contains(query_match));

    if exact {
        Some(EXACT_SCORE)
    } else if prefix {
        Some(PREFIX_SCORE)
    } else if contains {
        Some(1.0 + ratio * 0.5)
    } else if ratio >= MIN_FUZZY_RATIO {
        Some(ratio)
    } else {
        None
    }
}
