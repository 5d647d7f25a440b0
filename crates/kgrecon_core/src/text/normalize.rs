//! Name normalization.
//!
//! # Responsibility
//! - Rewrite `LAST, FIRST [MIDDLE]` into reading order.
//! - Strip parentheticals, honorific prefixes and generational/credential
//!   suffixes, and collapse stuttered tokens.
//! - Derive the first-initial + last-token short form.
//!
//! # Invariants
//! - Idempotent: `normalize(&normalize(x).full) == normalize(x)`.
//! - Output is NFC, so diacritics survive in a stable composed form.
//! - The short form is a secondary matching key, never a display name.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static PARENTHETICAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\([^)]*\)").expect("valid parenthetical regex"));

const HONORIFICS: &[&str] = &[
    "mr",
    "mrs",
    "ms",
    "miss",
    "mx",
    "dr",
    "prof",
    "professor",
    "president",
    "sir",
    "dame",
    "rev",
    "reverend",
    "hon",
    "honorable",
];

const SUFFIXES: &[&str] = &[
    "jr", "sr", "ii", "iii", "iv", "esq", "md", "m.d", "phd", "ph.d", "jd", "j.d",
];

/// Normalized name plus its derived secondary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalForm {
    /// Canonical comparison form, e.g. `JEFFREY EDWARD EPSTEIN`.
    pub full: String,
    /// First initial + last token, e.g. `J EPSTEIN`. `None` for one-token names.
    pub short: Option<String>,
}

impl NormalForm {
    pub fn is_empty(&self) -> bool {
        self.full.is_empty()
    }

    /// Number of whitespace-separated tokens in the full form.
    pub fn token_count(&self) -> usize {
        self.full.split_whitespace().count()
    }
}

/// Canonicalizes a raw name string.
///
/// Steps run in a fixed order: whitespace collapse, comma rewrite,
/// parenthetical removal, then prefix/suffix/stutter stripping repeated until
/// nothing changes.
pub fn normalize(raw: &str) -> NormalForm {
    let composed: String = raw.nfc().collect();
    let collapsed = join_tokens(composed.split_whitespace());
    let reordered = rewrite_comma_order(&collapsed);
    let without_parens = PARENTHETICAL_RE.replace_all(&reordered, " ");
    let cleaned: String = without_parens
        .chars()
        .map(|c| if matches!(c, '(' | ')' | ',') { ' ' } else { c })
        .collect();

    let mut tokens: Vec<&str> = cleaned.split_whitespace().collect();
    loop {
        let before = tokens.clone();
        while tokens.len() > 1 && is_honorific(tokens[0]) {
            tokens.remove(0);
        }
        tokens = tokens
            .iter()
            .enumerate()
            .filter(|(index, token)| *index == 0 || !is_suffix(token))
            .map(|(_, token)| *token)
            .collect();
        tokens = destutter(&tokens);
        if tokens == before {
            break;
        }
    }

    let full: String = join_tokens(tokens.iter().copied()).nfc().collect();
    let short = short_form(&full);
    NormalForm { full, short }
}

/// First initial of the first token plus the last token.
pub fn short_form(full: &str) -> Option<String> {
    let tokens: Vec<&str> = full.split_whitespace().collect();
    if tokens.len() < 2 {
        return None;
    }
    let initial = tokens[0].chars().next()?;
    let last = tokens[tokens.len() - 1];
    Some(format!("{initial} {last}"))
}

/// Drops consecutive case-insensitive repeats: `Nadia Nadia X` -> `Nadia X`.
pub fn destutter<'a>(tokens: &[&'a str]) -> Vec<&'a str> {
    let mut out: Vec<&'a str> = Vec::with_capacity(tokens.len());
    for token in tokens {
        if let Some(previous) = out.last() {
            if previous.to_lowercase() == token.to_lowercase() {
                continue;
            }
        }
        out.push(token);
    }
    out
}

fn rewrite_comma_order(value: &str) -> String {
    let Some((last, rest)) = value.split_once(',') else {
        return value.to_string();
    };
    let last = last.trim();
    let rest = rest.trim();
    let rest_has_name = rest
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .any(|token| !is_suffix(token));

    if !last.is_empty() && rest_has_name {
        format!("{rest} {last}")
    } else {
        format!("{last} {rest}")
    }
}

fn token_key(token: &str) -> String {
    token.trim_end_matches('.').to_lowercase()
}

fn is_honorific(token: &str) -> bool {
    HONORIFICS.contains(&token_key(token).as_str())
}

fn is_suffix(token: &str) -> bool {
    SUFFIXES.contains(&token_key(token).as_str())
}

fn join_tokens<'a>(tokens: impl Iterator<Item = &'a str>) -> String {
    tokens.collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::{normalize, short_form};

    #[test]
    fn comma_order_is_rewritten() {
        assert_eq!(normalize("EPSTEIN, JEFFREY EDWARD").full, "JEFFREY EDWARD EPSTEIN");
        assert_eq!(normalize("Smith, John, Jr.").full, "John Smith");
    }

    #[test]
    fn trailing_suffix_after_comma_is_not_treated_as_given_name() {
        assert_eq!(normalize("John Smith, Jr.").full, "John Smith");
    }

    #[test]
    fn honorifics_and_credentials_are_stripped() {
        assert_eq!(normalize("Mr. Cassell").full, "Cassell");
        assert_eq!(normalize("Dr. Jane Roe Ph.D.").full, "Jane Roe");
        assert_eq!(normalize("President Bill Clinton").full, "Bill Clinton");
    }

    #[test]
    fn lone_title_is_kept_rather_than_emptied() {
        assert_eq!(normalize("President").full, "President");
        assert_eq!(normalize("Jr.").full, "Jr.");
    }

    #[test]
    fn parentheticals_are_removed() {
        assert_eq!(normalize("Jean Doe (deceased)").full, "Jean Doe");
    }

    #[test]
    fn stutters_collapse() {
        assert_eq!(normalize("Nadia Nadia Marcinkova").full, "Nadia Marcinkova");
        assert_eq!(normalize("nadia NADIA Marcinkova").full, "nadia Marcinkova");
    }

    #[test]
    fn diacritics_are_composed_not_dropped() {
        let decomposed = "Jose\u{301} Marti\u{301}";
        assert_eq!(normalize(decomposed).full, "Jos\u{e9} Mart\u{ed}");
    }

    #[test]
    fn short_form_uses_first_initial_and_last_token() {
        assert_eq!(normalize("Jeffrey Edward Epstein").short.as_deref(), Some("J Epstein"));
        assert_eq!(short_form("Cassell"), None);
    }

    #[test]
    fn empty_input_stays_empty() {
        let form = normalize("   ");
        assert!(form.is_empty());
        assert_eq!(form.short, None);
    }
}
