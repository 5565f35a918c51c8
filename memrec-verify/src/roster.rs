//! Candidate roster loading: cached snapshot or live platform read

use memrec_common::config::Settings;
use memrec_common::types::CandidateRecord;
use memrec_common::Result;
use memrec_fetch::{parse_people_document, PeopleClient};
use std::path::Path;

/// Load the candidate roster.
///
/// Prefers the cached snapshot at `cache_path` unless `from_api` forces a
/// live read. A missing or corrupt cache falls back to the live read with a
/// warning rather than failing.
pub async fn load(
    settings: &Settings,
    cache_path: &Path,
    from_api: bool,
) -> Result<Vec<CandidateRecord>> {
    if !from_api {
        match std::fs::read_to_string(cache_path) {
            Ok(text) => match parse_people_document(&text) {
                Ok(people) => {
                    tracing::info!(
                        path = %cache_path.display(),
                        count = people.len(),
                        "Loaded roster from cache"
                    );
                    return Ok(people);
                }
                Err(e) => {
                    tracing::warn!(
                        path = %cache_path.display(),
                        error = %e,
                        "Cached roster unreadable; fetching from the platform"
                    );
                }
            },
            Err(e) => {
                tracing::warn!(
                    path = %cache_path.display(),
                    error = %e,
                    "No roster cache; fetching from the platform"
                );
            }
        }
    }

    let api_key = settings.platform_api_key()?;
    let client = PeopleClient::new(&settings.platform.base_url, &api_key)?;
    let people = client
        .fetch_candidates(&settings.platform.member_field)
        .await?;
    tracing::info!(count = people.len(), "Loaded roster from the platform API");
    Ok(people)
}

/// Keep only candidates that self-reported a membership ID.
pub fn with_member_ids(people: Vec<CandidateRecord>) -> Vec<CandidateRecord> {
    people
        .into_iter()
        .filter(|p| p.member_id.as_deref().is_some_and(|id| !id.is_empty()))
        .collect()
}
