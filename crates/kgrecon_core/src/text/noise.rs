//! Non-entity and noise-name heuristics.
//!
//! # Responsibility
//! - `looks_like_non_entity`: strings that are obviously not names at all
//!   (URLs, e-mail addresses, sentence fragments, ID blobs). Filtered out
//!   before resolution.
//! - `classify_noise`: strings that resolved into an entity but name no real
//!   referent (bare first names, generic role words, placeholders). Handled
//!   by the merge engine's noise pass.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::{Display, Formatter};

const MAX_NAME_CHARS: usize = 90;
const MAX_NAME_WORDS: usize = 7;

const NOISE_SUBSTRINGS: &[&str] = &[
    "unknown person",
    "unknown company",
    "unknown organization",
    "unidentified",
    "unnamed",
    "redacted",
    "sealed",
    "various ",
    "multiple ",
    "participants",
    "attendees",
    "author",
    "narrator",
    "reporter",
    "plaintiff",
    "defendant",
    "witness",
    "victim",
    "employee",
    "the government",
    "the court",
    "prosecution",
    "defense counsel",
    "security clearance",
    "technology industry",
];

const GENERIC_WORDS: &[&str] = &[
    "president",
    "attorney",
    "judge",
    "senator",
    "detective",
    "agent",
    "officer",
    "prosecutor",
    "prosecutors",
    "counsel",
    "public",
    "communication",
    "journalist",
    "journalists",
    "applicant",
    "appellant",
    "respondent",
    "government",
    "state",
    "country",
    "federal prosecutors",
    "federal agents",
    "federal government",
    "law enforcement",
    "defense counsel",
    "legal counsel",
];

const NOISE_FIRST_NAMES: &[&str] = &[
    "mary", "david", "sarah", "john", "james", "michael", "robert", "tony", "leon", "eva",
    "rebecca", "bruce", "roger", "ralph", "warren", "mark", "steve", "chris", "peter", "paul",
    "george", "jane", "tom", "joe",
];

/// Single words that look like noise but name real organizations or places.
const PROTECTED_SINGLE_WORDS: &[&str] = &[
    "hamas",
    "isis",
    "hezbollah",
    "mossad",
    "interpol",
    "libya",
    "iraq",
    "iran",
    "syria",
    "yemen",
    "qatar",
    "dubai",
    "harvard",
    "yale",
    "princeton",
    "stanford",
    "columbia",
    "mit",
    "citibank",
    "barclays",
    "jpmorgan",
    "wexner",
    "victoria",
];

static PLACEHOLDER_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^unknown(\s+(person|individual|man|woman|company|organization))?$",
        r"(?i)^(unidentified|unnamed)\b",
        r"(?i)^(various|multiple)\b",
        r"(?i)^(employee|victim|witness)\s*#?\d+\b",
        r"(?i)^(john|jane)\s+doe\s*#?\d+\b",
        r"(?i)^\(b\)\(\d+\)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid placeholder regex"))
    .collect()
});

static SHORT_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\w{1,2}$").expect("valid short token regex"));
static INITIALS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]\.([A-Z]\.)?$").expect("valid initials regex"));

/// Numbered placeholder identities that must never fuzzy-match each other.
static NUMBERED_PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:jane|john)\s+doe\s*#?\d|employee[- ]?\d|detective\s*\d|victim\s*#?\d")
        .expect("valid numbered placeholder regex")
});

/// Why a name was classified as noise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoiseReason {
    NonEntity,
    GenericWord(String),
    StandaloneFirstName(String),
    QuestionMarkPlaceholder,
    Placeholder,
    InitialsOnly,
}

impl Display for NoiseReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonEntity => write!(f, "non_entity"),
            Self::GenericWord(word) => write!(f, "generic_word:{word}"),
            Self::StandaloneFirstName(name) => write!(f, "standalone_first_name:{name}"),
            Self::QuestionMarkPlaceholder => write!(f, "question_mark_placeholder"),
            Self::Placeholder => write!(f, "placeholder"),
            Self::InitialsOnly => write!(f, "initials_only"),
        }
    }
}

/// Heuristics for strings that are obviously not names.
pub fn looks_like_non_entity(name: &str) -> bool {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.contains('\n') || trimmed.contains('\t') {
        return true;
    }
    let lowered = trimmed.to_lowercase();
    if lowered.contains("http://") || lowered.contains("https://") {
        return true;
    }
    if trimmed.contains('@') && trimmed.contains('.') {
        return true;
    }
    let char_count = trimmed.chars().count();
    if char_count > MAX_NAME_CHARS || trimmed.split_whitespace().count() > MAX_NAME_WORDS {
        return true;
    }
    let alpha = trimmed.chars().filter(|c| c.is_alphabetic()).count();
    if alpha == 0 {
        return true;
    }
    // Mostly digits and punctuation: an ID blob, not a name.
    char_count >= 25 && (alpha as f64 / char_count as f64) < 0.35
}

/// Classifies `name` as a noise entity, or `None` when it looks like a real
/// referent.
pub fn classify_noise(name: &str) -> Option<NoiseReason> {
    if looks_like_non_entity(name) {
        return Some(NoiseReason::NonEntity);
    }
    let trimmed = name.trim();
    let lowered = trimmed.to_lowercase();
    let single_word = !trimmed.contains(char::is_whitespace);

    if PROTECTED_SINGLE_WORDS.contains(&lowered.as_str()) {
        return None;
    }
    if GENERIC_WORDS.contains(&lowered.as_str()) {
        return Some(NoiseReason::GenericWord(lowered));
    }
    if single_word && NOISE_FIRST_NAMES.contains(&lowered.as_str()) {
        return Some(NoiseReason::StandaloneFirstName(lowered));
    }
    if trimmed.ends_with(" ?") || (trimmed.ends_with('?') && trimmed.chars().count() <= 15) {
        return Some(NoiseReason::QuestionMarkPlaceholder);
    }
    if NOISE_SUBSTRINGS.iter().any(|sub| lowered.contains(sub))
        || PLACEHOLDER_RES.iter().any(|re| re.is_match(&lowered))
    {
        return Some(NoiseReason::Placeholder);
    }
    if SHORT_TOKEN_RE.is_match(trimmed) || INITIALS_RE.is_match(trimmed) {
        return Some(NoiseReason::InitialsOnly);
    }
    None
}

/// Whether `name` is a numbered placeholder such as `Jane Doe #2`.
pub fn is_numbered_placeholder(name: &str) -> bool {
    NUMBERED_PLACEHOLDER_RE.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::{classify_noise, is_numbered_placeholder, looks_like_non_entity, NoiseReason};

    #[test]
    fn non_entities_are_detected() {
        assert!(looks_like_non_entity("https://example.org/person"));
        assert!(looks_like_non_entity("someone@example.org"));
        assert!(looks_like_non_entity("12-3344-556"));
        assert!(looks_like_non_entity(
            "he said that they flew to the island on a saturday"
        ));
        assert!(looks_like_non_entity("EFTA00012345-0000-0000-0000-000000000000"));
        assert!(!looks_like_non_entity("Ghislaine Maxwell"));
    }

    #[test]
    fn noise_names_are_classified() {
        assert_eq!(
            classify_noise("Mary"),
            Some(NoiseReason::StandaloneFirstName("mary".into()))
        );
        assert_eq!(
            classify_noise("President"),
            Some(NoiseReason::GenericWord("president".into()))
        );
        assert_eq!(classify_noise("Roger ?"), Some(NoiseReason::QuestionMarkPlaceholder));
        assert_eq!(classify_noise("Jane Doe #3"), Some(NoiseReason::Placeholder));
        assert_eq!(classify_noise("L.M."), Some(NoiseReason::InitialsOnly));
    }

    #[test]
    fn real_names_are_not_noise() {
        assert_eq!(classify_noise("Mary Smith"), None);
        assert_eq!(classify_noise("Harvard"), None);
        assert_eq!(classify_noise("Cassell"), None);
    }

    #[test]
    fn numbered_placeholders_are_recognized() {
        assert!(is_numbered_placeholder("Jane Doe #1"));
        assert!(is_numbered_placeholder("victim 12"));
        assert!(is_numbered_placeholder("Employee-4"));
        assert!(!is_numbered_placeholder("Jane Doeman"));
    }
}
