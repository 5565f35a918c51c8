//! Core data model: roster candidates, match outcomes, verification records
//!
//! Serde names follow the on-disk artifact formats consumed by the dashboard
//! (`usa_member_id`, `rowText`, `profileUrl`), so renames here are contract,
//! not style.

use crate::ident::SanitizedId;
use serde::{Deserialize, Serialize};

/// One roster person as fetched from the scheduling platform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateRecord {
    pub person_id: i64,
    /// Self-reported membership ID, free-form (custom field value)
    #[serde(rename = "usa_member_id", skip_serializing_if = "Option::is_none")]
    pub member_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// How a registry match was established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchMethod {
    /// Direct search on the nine-digit membership number
    #[serde(rename = "id")]
    Id,
    /// Fallback search on name parts, gated on affiliation patterns
    #[serde(rename = "name_affiliation")]
    NameAffiliation,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::Id => "id",
            MatchMethod::NameAffiliation => "name_affiliation",
        }
    }
}

impl std::fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single search attempt against the registry.
///
/// Never persisted on its own; folded into a [`VerificationRecord`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchResult {
    /// Set iff the attempt produced a hit
    pub method: Option<MatchMethod>,
    /// First configured affiliation pattern the winning row satisfied
    pub matched_affiliation: Option<String>,
    /// Membership number recovered from the winning row, when available
    pub resolved_id: Option<String>,
    /// Raw text of the result row backing the match
    pub row_text: Option<String>,
    /// Absolute profile link from the winning row
    pub profile_url: Option<String>,
}

impl MatchResult {
    /// A miss: no method, no evidence.
    pub fn not_found() -> Self {
        Self::default()
    }

    pub fn is_found(&self) -> bool {
        self.method.is_some()
    }
}

/// Durable per-person verification outcome.
///
/// Field order matters: it is the serialization order of the results
/// artifacts, kept stable so re-emitting unchanged results is byte-identical.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationRecord {
    pub person_id: i64,
    #[serde(rename = "usa_member_id")]
    pub member_id: String,
    pub sanitized_id: String,
    pub was_sanitized: bool,
    pub id_length_ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// Always serialized, null when unknown (dashboard expects the key)
    pub email: Option<String>,
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_method: Option<MatchMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_used: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub club_matched: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_club: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_member_id: Option<String>,
    #[serde(rename = "rowText", skip_serializing_if = "Option::is_none")]
    pub row_text: Option<String>,
    #[serde(rename = "profileUrl", skip_serializing_if = "Option::is_none")]
    pub profile_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerificationRecord {
    /// Build a record from a completed match attempt (hit or miss).
    pub fn from_match(
        candidate: &CandidateRecord,
        id: &SanitizedId,
        fallback_used: bool,
        result: MatchResult,
    ) -> Self {
        let resolved_member_id = match result.method {
            Some(MatchMethod::Id) => Some(id.digits.clone()),
            _ => result.resolved_id,
        };
        Self {
            person_id: candidate.person_id,
            member_id: candidate.member_id.clone().unwrap_or_default(),
            sanitized_id: id.digits.clone(),
            was_sanitized: id.was_modified,
            id_length_ok: id.length_valid,
            first_name: candidate.first_name.clone(),
            last_name: candidate.last_name.clone(),
            email: candidate.email.clone(),
            found: result.method.is_some(),
            match_method: result.method,
            fallback_used: Some(fallback_used),
            club_matched: Some(result.matched_affiliation.is_some()),
            matched_club: result.matched_affiliation,
            resolved_member_id,
            row_text: result.row_text,
            profile_url: result.profile_url,
            error: None,
        }
    }

    /// Build a record for a candidate whose verification raised an error.
    pub fn from_error(
        candidate: &CandidateRecord,
        id: &SanitizedId,
        message: impl Into<String>,
    ) -> Self {
        Self {
            person_id: candidate.person_id,
            member_id: candidate.member_id.clone().unwrap_or_default(),
            sanitized_id: id.digits.clone(),
            was_sanitized: id.was_modified,
            id_length_ok: id.length_valid,
            first_name: candidate.first_name.clone(),
            last_name: candidate.last_name.clone(),
            email: candidate.email.clone(),
            found: false,
            match_method: None,
            fallback_used: None,
            club_matched: None,
            matched_club: None,
            resolved_member_id: None,
            row_text: None,
            profile_url: None,
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::sanitize;

    fn candidate() -> CandidateRecord {
        CandidateRecord {
            person_id: 42,
            member_id: Some("12-345-6789".to_string()),
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            email: None,
        }
    }

    #[test]
    fn match_method_wire_names() {
        assert_eq!(serde_json::to_string(&MatchMethod::Id).unwrap(), "\"id\"");
        assert_eq!(
            serde_json::to_string(&MatchMethod::NameAffiliation).unwrap(),
            "\"name_affiliation\""
        );
    }

    #[test]
    fn record_serializes_wire_field_names() {
        let id = sanitize("12-345-6789");
        let result = MatchResult {
            method: Some(MatchMethod::Id),
            row_text: Some("row".to_string()),
            profile_url: Some("https://registry.example/p/1".to_string()),
            ..MatchResult::not_found()
        };
        let rec = VerificationRecord::from_match(&candidate(), &id, false, result);
        let json = serde_json::to_value(&rec).unwrap();

        assert_eq!(json["usa_member_id"], "12-345-6789");
        assert_eq!(json["sanitized_id"], "123456789");
        assert_eq!(json["was_sanitized"], true);
        assert_eq!(json["rowText"], "row");
        assert_eq!(json["profileUrl"], "https://registry.example/p/1");
        // email key present even when null
        assert!(json.as_object().unwrap().contains_key("email"));
        assert!(json["email"].is_null());
        // error key absent on clean records
        assert!(!json.as_object().unwrap().contains_key("error"));
    }

    #[test]
    fn id_match_resolves_to_sanitized_digits() {
        let id = sanitize("12-345-6789");
        let result = MatchResult {
            method: Some(MatchMethod::Id),
            ..MatchResult::not_found()
        };
        let rec = VerificationRecord::from_match(&candidate(), &id, false, result);
        assert_eq!(rec.resolved_member_id.as_deref(), Some("123456789"));
        assert_eq!(rec.club_matched, Some(false));
        assert!(rec.found);
    }

    #[test]
    fn fallback_match_keeps_recovered_id() {
        let id = sanitize("12-345-6789");
        let result = MatchResult {
            method: Some(MatchMethod::NameAffiliation),
            matched_affiliation: Some("Bay Area Fencing Club".to_string()),
            resolved_id: Some("987654321".to_string()),
            ..MatchResult::not_found()
        };
        let rec = VerificationRecord::from_match(&candidate(), &id, true, result);
        assert_eq!(rec.resolved_member_id.as_deref(), Some("987654321"));
        assert_eq!(rec.matched_club.as_deref(), Some("Bay Area Fencing Club"));
        assert_eq!(rec.club_matched, Some(true));
        assert_eq!(rec.fallback_used, Some(true));
    }

    #[test]
    fn error_record_captures_message_only() {
        let id = sanitize("999");
        let rec = VerificationRecord::from_error(&candidate(), &id, "window died");
        assert!(!rec.found);
        assert_eq!(rec.error.as_deref(), Some("window died"));
        assert_eq!(rec.fallback_used, None);
        assert_eq!(rec.club_matched, None);
        assert!(!rec.id_length_ok);
    }

    #[test]
    fn candidate_roundtrip_tolerates_missing_fields() {
        let parsed: CandidateRecord = serde_json::from_str(r#"{"person_id": 7}"#).unwrap();
        assert_eq!(parsed.person_id, 7);
        assert_eq!(parsed.member_id, None);
        let back = serde_json::to_value(&parsed).unwrap();
        assert!(!back.as_object().unwrap().contains_key("usa_member_id"));
    }
}
