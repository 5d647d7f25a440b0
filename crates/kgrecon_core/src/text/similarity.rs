//! Token-order-insensitive name similarity.
//!
//! Names are lowercased, split on anything that is not alphanumeric, sorted
//! and re-joined before comparison, so `Epstein, Jeffrey` and
//! `Jeffrey Epstein` compare equal. The comparison itself is the normalized
//! longest-common-subsequence ratio `200 * lcs / (len_a + len_b)` on chars,
//! giving a score in `0.0..=100.0`.

/// Lowercased, alphabetically sorted token form of `value`.
pub fn sorted_token_form(value: &str) -> String {
    let lowered = value.to_lowercase();
    let mut tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Similarity of two names on a 0-100 scale, ignoring token order, case and
/// punctuation. Returns 0 when either side has no tokens.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sorted_token_form(a), &sorted_token_form(b))
}

/// Normalized LCS similarity of two strings on a 0-100 scale.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let common = lcs_len(&a, &b);
    200.0 * common as f64 / (a.len() + b.len()) as f64
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut previous = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];
    for ca in a {
        current[0] = 0;
        for (j, cb) in b.iter().enumerate() {
            current[j + 1] = if ca == cb {
                previous[j] + 1
            } else {
                previous[j + 1].max(current[j])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::{ratio, sorted_token_form, token_sort_ratio};

    #[test]
    fn token_order_and_punctuation_are_ignored() {
        assert_eq!(sorted_token_form("Epstein, Jeffrey"), "epstein jeffrey");
        assert_eq!(token_sort_ratio("Epstein, Jeffrey", "JEFFREY EPSTEIN"), 100.0);
    }

    #[test]
    fn known_scores() {
        assert_eq!(token_sort_ratio("John Perry", "John Kerry"), 90.0);
        assert_eq!(token_sort_ratio("Anna Smithe", "Anna Smit"), 90.0);
        let near = token_sort_ratio("Jeff Epstein", "Jeffrey Epstein");
        assert!((near - 88.888).abs() < 0.01, "{near}");
    }

    #[test]
    fn empty_sides_score_zero() {
        assert_eq!(ratio("", "abc"), 0.0);
        assert_eq!(token_sort_ratio("---", "abc"), 0.0);
    }

    #[test]
    fn score_is_symmetric() {
        let ab = token_sort_ratio("Ghislaine Maxwel", "Ghislaine Maxwell");
        let ba = token_sort_ratio("Ghislaine Maxwell", "Ghislaine Maxwel");
        assert_eq!(ab, ba);
    }
}
