//! Title stripping, case repair and aggressive matching keys.
//!
//! These helpers serve the merge engine: `clean_for_matching` builds the
//! cleaned-name key duplicate detection groups on, and `tidy_display_name`
//! / `tidy_non_person_name` perform the cosmetic display-name cleanup.

use super::normalize::{destutter, normalize};

/// Lowercased title prefixes, each including its trailing separator.
const TITLE_PREFIXES: &[&str] = &[
    "president ",
    "professor ",
    "prof. ",
    "senator ",
    "rep. ",
    "judge ",
    "justice ",
    "attorney ",
    "agent ",
    "dr. ",
    "mr. ",
    "mrs. ",
    "ms. ",
    "miss ",
    "sir ",
    "lord ",
    "lady ",
    "prince ",
    "princess ",
    "king ",
    "queen ",
    "sheikh ",
    "imam ",
    "general ",
    "colonel ",
    "captain ",
    "detective ",
    "governor ",
    "mayor ",
    "ambassador ",
];

const UPPERCASE_DOMINANT: f64 = 0.7;

/// Short all-caps tokens in non-person names are acronyms (`NBC`, `LLC`)
/// unless they are one of these connectors.
const ACRONYM_MAX_LEN: usize = 3;
const CONNECTORS: &[&str] = &["of", "and", "the", "for", "de", "la", "le", "du", "van", "von"];

/// Removes any number of leading title prefixes, case-insensitively.
pub fn strip_titles(name: &str) -> String {
    let mut current = name.trim().to_string();
    loop {
        let lowered = current.to_lowercase();
        let Some(prefix) = TITLE_PREFIXES
            .iter()
            .find(|prefix| lowered.starts_with(*prefix))
        else {
            return current;
        };
        let Some(rest) = current.get(prefix.len()..) else {
            return current;
        };
        current = rest.trim().to_string();
    }
}

/// Whether `name` starts with a known title.
pub fn has_title(name: &str) -> bool {
    let lowered = name.trim().to_lowercase();
    TITLE_PREFIXES
        .iter()
        .any(|prefix| lowered.starts_with(prefix))
}

/// Share of alphabetic characters that are uppercase, 0 when there are none.
pub fn uppercase_ratio(name: &str) -> f64 {
    let (alpha, upper) = name
        .chars()
        .filter(|c| c.is_alphabetic())
        .fold((0usize, 0usize), |(alpha, upper), c| {
            (alpha + 1, upper + usize::from(c.is_uppercase()))
        });
    if alpha == 0 {
        return 0.0;
    }
    upper as f64 / alpha as f64
}

/// Converts mostly-uppercase names to title case; mixed-case names are
/// returned unchanged. Short dotted abbreviations such as `J.D.` are kept.
pub fn to_title_case(name: &str) -> String {
    if uppercase_ratio(name) < UPPERCASE_DOMINANT {
        return name.to_string();
    }
    name.split_whitespace()
        .map(|part| {
            if part.contains('-') {
                part.split('-').map(capitalize).collect::<Vec<_>>().join("-")
            } else if part.contains('.') && part.chars().count() <= 3 && part.to_uppercase() == part {
                part.to_string()
            } else {
                capitalize(part)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Aggressive comparison key: titles dropped, case folded, punctuation and
/// hyphens removed, stutters and interior single-letter initials dropped.
///
/// Used only for duplicate detection, never for display.
pub fn clean_for_matching(name: &str) -> String {
    let stripped = strip_titles(name);
    let normalized = normalize(&stripped).full.to_lowercase();
    let flattened: String = normalized
        .chars()
        .filter(|c| !matches!(c, '.' | ','))
        .map(|c| if c == '-' { ' ' } else { c })
        .collect();
    let tokens: Vec<&str> = flattened.split_whitespace().collect();
    let mut tokens = destutter(&tokens);
    if tokens.len() >= 3 {
        let last = tokens.len() - 1;
        tokens = tokens
            .iter()
            .enumerate()
            .filter(|(index, token)| *index == 0 || *index == last || token.chars().count() > 1)
            .map(|(_, token)| *token)
            .collect();
    }
    tokens.join(" ")
}

/// Cosmetic display-name cleanup: titles stripped, shouting repaired,
/// stutters fixed, whitespace collapsed.
pub fn tidy_display_name(name: &str) -> String {
    let stripped = strip_titles(name);
    let base = if stripped.is_empty() { name.trim() } else { stripped.as_str() };
    let cased = to_title_case(base);
    let tokens: Vec<&str> = cased.split_whitespace().collect();
    destutter(&tokens).join(" ")
}

/// Cosmetic cleanup for organizations, locations, aircraft and property.
/// No title stripping; shouting is recased but acronyms keep their case.
pub fn tidy_non_person_name(name: &str) -> String {
    let trimmed = name.trim();
    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    let tokens = destutter(&tokens);
    if uppercase_ratio(trimmed) < UPPERCASE_DOMINANT {
        return tokens.join(" ");
    }
    tokens
        .iter()
        .enumerate()
        .map(|(position, token)| {
            let lowered = token.to_lowercase();
            let letters = token.chars().filter(|c| c.is_alphabetic()).count();
            if CONNECTORS.contains(&lowered.as_str()) {
                if position == 0 {
                    capitalize(token)
                } else {
                    lowered
                }
            } else if letters <= ACRONYM_MAX_LEN {
                (*token).to_string()
            } else {
                to_title_case(token)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Ranks a display-name candidate: untitled beats titled, mixed case beats
/// shouting, longer beats shorter.
pub fn name_quality(name: &str) -> (bool, bool, usize) {
    (
        !has_title(name),
        uppercase_ratio(name) <= UPPERCASE_DOMINANT,
        name.chars().count(),
    )
}

/// Picks the better display name of two names for one referent. Ties keep
/// `a`.
pub fn better_name<'a>(a: &'a str, b: &'a str) -> &'a str {
    if name_quality(a) >= name_quality(b) {
        a
    } else {
        b
    }
}
