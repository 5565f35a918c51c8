//! Membership ID sanitization and extraction
//!
//! Registry membership numbers are exactly nine digits. Roster values are
//! free-form text, so they are stripped to digits before any search and the
//! stripping is recorded for reporting.

/// Required digit count for a registry membership number (domain policy)
pub const REQUIRED_ID_LENGTH: usize = 9;

/// Minimum digit-run length considered when scanning free text for an ID
const MIN_RUN_LENGTH: usize = 4;

/// A raw membership ID reduced to digits, with provenance flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedId {
    /// Digit-only form of the raw value
    pub digits: String,
    /// The raw value as it appeared in the roster
    pub original: String,
    /// True iff stripping non-digits changed the string
    pub was_modified: bool,
    /// True iff `digits` has exactly the required length
    pub length_valid: bool,
}

/// Strip every non-digit character from a raw roster ID.
pub fn sanitize(raw: &str) -> SanitizedId {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let was_modified = digits != raw;
    let length_valid = is_valid_length(&digits);
    SanitizedId {
        digits,
        original: raw.to_string(),
        was_modified,
        length_valid,
    }
}

/// True iff `digits` is exactly nine characters long.
pub fn is_valid_length(digits: &str) -> bool {
    digits.chars().count() == REQUIRED_ID_LENGTH
}

/// Scan free text for digit runs and return the first run of exactly nine
/// digits, if any. Runs shorter than four digits are not considered. Used
/// when recovering a member number from fallback-search row text.
pub fn extract_candidate_id(text: &str) -> Option<String> {
    digit_runs(text)
        .into_iter()
        .find(|run| run.len() == REQUIRED_ID_LENGTH)
        .map(|run| run.to_string())
}

/// Maximal ASCII digit runs of at least `MIN_RUN_LENGTH` characters.
fn digit_runs(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut runs = Vec::new();
    let mut start = None;

    for (i, b) in bytes.iter().enumerate() {
        if b.is_ascii_digit() {
            if start.is_none() {
                start = Some(i);
            }
        } else if let Some(s) = start.take() {
            if i - s >= MIN_RUN_LENGTH {
                runs.push(&text[s..i]);
            }
        }
    }
    if let Some(s) = start {
        if bytes.len() - s >= MIN_RUN_LENGTH {
            runs.push(&text[s..]);
        }
    }

    runs
}
