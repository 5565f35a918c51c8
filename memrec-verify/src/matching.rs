//! Matching strategies against the registry search surface
//!
//! Two strategies, tried in policy order per candidate: an exact
//! membership-number search, then a name search gated on affiliation text.
//! Both drive the registry through [`SearchPage`], so the logic here is
//! testable against scripted pages.

use crate::search_page::SearchPage;
use memrec_common::config::{SelectorSettings, Settings};
use memrec_common::ident::{self, SanitizedId};
use memrec_common::types::{CandidateRecord, MatchMethod, MatchResult};
use memrec_common::{Error, Result};
use url::Url;

/// Exact membership-number search.
///
/// Clears any leftover name filters so only the ID constrains the search,
/// then looks for the digit string literally present in the results view.
/// Fails with [`Error::SearchInputNotFound`] when no ID input is visible
/// even after re-opening the search surface once.
pub async fn search_by_id(
    page: &dyn SearchPage,
    settings: &Settings,
    digits: &str,
) -> Result<MatchResult> {
    let sel = &settings.selectors;

    page.clear_fields(&sel.first_name).await?;
    page.clear_fields(&sel.last_name).await?;

    let mut filled = page.fill_first_visible(&sel.member_id, digits).await?;
    if !filled {
        // The tab may have wandered off the search page; one refresh attempt
        page.open_search().await?;
        filled = page.fill_first_visible(&sel.member_id, digits).await?;
    }
    if !filled {
        return Err(Error::SearchInputNotFound);
    }

    page.trigger_search(&sel.search_button).await?;
    page.wait_settled().await?;

    let Some(hit) = page.find_text_hit(digits).await? else {
        return Ok(MatchResult::not_found());
    };
    tracing::debug!(digits, "Result hit contains ID");
    let profile_url = absolute_href(page, hit.href).await?;
    Ok(MatchResult {
        method: Some(MatchMethod::Id),
        matched_affiliation: None,
        resolved_id: Some(digits.to_string()),
        row_text: non_empty(hit.text),
        profile_url,
    })
}

/// Name search gated on affiliation text.
///
/// A single pass: absence of a qualifying row is a definitive miss for this
/// strategy. Qualifying means the row text contains every provided name part
/// (case-insensitively) and, when affiliation patterns are configured, at
/// least one of them.
pub async fn search_by_name_and_affiliation(
    page: &dyn SearchPage,
    settings: &Settings,
    first_name: Option<&str>,
    last_name: Option<&str>,
) -> Result<MatchResult> {
    let first = first_name.unwrap_or_default().trim();
    let last = last_name.unwrap_or_default().trim();
    if first.is_empty() && last.is_empty() {
        return Ok(MatchResult::not_found());
    }

    let sel = &settings.selectors;
    // A leftover ID would constrain the name search down to nothing
    page.clear_fields(&sel.id_only).await?;

    let mut filled = fill_name_fields(page, sel, first, last).await?;
    if !filled {
        tracing::warn!("Name inputs not found; re-opening search page");
        page.open_search().await?;
        filled = fill_name_fields(page, sel, first, last).await?;
    }
    if !filled {
        return Ok(MatchResult::not_found());
    }

    page.trigger_search(&sel.search_button).await?;
    page.wait_settled().await?;

    let rows = page.result_rows(&sel.result_rows).await?;
    let patterns = &settings.matching.affiliation_patterns;
    for hit in rows {
        let text_lower = hit.text.to_lowercase();
        let name_ok = (first.is_empty() || text_lower.contains(&first.to_lowercase()))
            && (last.is_empty() || text_lower.contains(&last.to_lowercase()));
        if !name_ok {
            continue;
        }
        let mut matched_affiliation = None;
        if !patterns.is_empty() {
            matched_affiliation = patterns
                .iter()
                .find_map(|p| find_ascii_case_insensitive(&hit.text, p))
                .map(|m| m.to_string());
            if matched_affiliation.is_none() {
                continue;
            }
        }
        let resolved_id = ident::extract_candidate_id(&hit.text);
        let profile_url = absolute_href(page, hit.href).await?;
        return Ok(MatchResult {
            method: Some(MatchMethod::NameAffiliation),
            matched_affiliation,
            resolved_id,
            row_text: non_empty(hit.text),
            profile_url,
        });
    }
    Ok(MatchResult::not_found())
}

/// Full per-candidate strategy policy. Returns whether the fallback ran
/// alongside the final result.
///
/// An invalid-length ID skips the exact search entirely. Otherwise the ID
/// search runs first with linear-backoff retries, and the name+affiliation
/// fallback only fires once the ID search is exhausted. A missing ID input
/// is a per-record skip of the exact search, never a run failure.
pub async fn verify_candidate(
    page: &dyn SearchPage,
    settings: &Settings,
    candidate: &CandidateRecord,
    id: &SanitizedId,
    retries: u32,
) -> Result<(bool, MatchResult)> {
    let mut result = MatchResult::not_found();

    if id.length_valid {
        result = match id_search_with_retries(page, settings, &id.digits, retries).await {
            Ok(r) => r,
            Err(Error::SearchInputNotFound) => {
                tracing::warn!(
                    "Search input not found after refresh; skipping ID search for this record"
                );
                MatchResult::not_found()
            }
            Err(e) => return Err(e),
        };
    } else {
        tracing::info!(
            len = id.digits.len(),
            "ID failed length check; skipping ID search and using fallback"
        );
    }

    if result.is_found() {
        return Ok((false, result));
    }

    let fallback = search_by_name_and_affiliation(
        page,
        settings,
        candidate.first_name.as_deref(),
        candidate.last_name.as_deref(),
    )
    .await?;
    Ok((true, fallback))
}

/// Exact search with bounded retries; an empty results view can be render
/// lag rather than genuine absence, so misses back off linearly and try
/// again before the miss stands.
async fn id_search_with_retries(
    page: &dyn SearchPage,
    settings: &Settings,
    digits: &str,
    retries: u32,
) -> Result<MatchResult> {
    let mut result = search_by_id(page, settings, digits).await?;
    let mut attempt = 1;
    while !result.is_found() && attempt <= retries {
        let backoff = settings.timing.retry_backoff(attempt);
        tracing::debug!(
            attempt,
            backoff_ms = backoff.as_millis() as u64,
            "Not found by ID, retrying"
        );
        tokio::time::sleep(backoff).await;
        result = search_by_id(page, settings, digits).await?;
        attempt += 1;
    }
    Ok(result)
}

/// Fill first/last name inputs. An empty part still clears its field and the
/// field counts as filled either way; search forms that expose only one name
/// box are common.
async fn fill_name_fields(
    page: &dyn SearchPage,
    sel: &SelectorSettings,
    first: &str,
    last: &str,
) -> Result<bool> {
    let mut filled = page.fill_first_visible(&sel.first_name, first).await?;
    filled |= page.fill_first_visible(&sel.last_name, last).await?;
    Ok(filled)
}

/// Resolve a possibly-relative href against the page's current URL.
async fn absolute_href(page: &dyn SearchPage, href: Option<String>) -> Result<Option<String>> {
    let Some(href) = href else {
        return Ok(None);
    };
    if is_absolute(&href) {
        return Ok(Some(href));
    }
    let base = page.current_url().await?;
    Ok(match Url::parse(&base).and_then(|b| b.join(&href)) {
        Ok(resolved) => Some(resolved.to_string()),
        Err(_) => Some(href),
    })
}

fn is_absolute(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    lower.starts_with("http:") || lower.starts_with("https:")
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// First substring of `haystack` equal to `needle` ignoring ASCII case,
/// returned as the actual haystack slice so reports carry the row's casing.
fn find_ascii_case_insensitive<'a>(haystack: &'a str, needle: &str) -> Option<&'a str> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    for start in 0..=(h.len() - n.len()) {
        if h[start..start + n.len()].eq_ignore_ascii_case(n) {
            if let Some(m) = haystack.get(start..start + n.len()) {
                return Some(m);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search_page::RowHit;
    use async_trait::async_trait;
    use memrec_common::ident::sanitize;
    use std::sync::Mutex;

    struct ScriptedPage {
        id_hit: Option<RowHit>,
        rows: Vec<RowHit>,
        inputs_present: bool,
        searches: Mutex<u32>,
        cleared: Mutex<Vec<String>>,
    }

    impl ScriptedPage {
        fn new() -> Self {
            Self {
                id_hit: None,
                rows: Vec::new(),
                inputs_present: true,
                searches: Mutex::new(0),
                cleared: Mutex::new(Vec::new()),
            }
        }

        fn search_count(&self) -> u32 {
            *self.searches.lock().unwrap()
        }
    }

    #[async_trait]
    impl SearchPage for ScriptedPage {
        async fn open_search(&self) -> Result<()> {
            Ok(())
        }

        async fn fill_first_visible(&self, _selectors: &[String], _value: &str) -> Result<bool> {
            Ok(self.inputs_present)
        }

        async fn clear_fields(&self, selectors: &[String]) -> Result<()> {
            let first = selectors.first().cloned().unwrap_or_default();
            self.cleared.lock().unwrap().push(first);
            Ok(())
        }

        async fn trigger_search(&self, _selectors: &[String]) -> Result<()> {
            *self.searches.lock().unwrap() += 1;
            Ok(())
        }

        async fn wait_settled(&self) -> Result<()> {
            Ok(())
        }

        async fn find_text_hit(&self, _needle: &str) -> Result<Option<RowHit>> {
            Ok(self.id_hit.clone())
        }

        async fn result_rows(&self, _selectors: &[String]) -> Result<Vec<RowHit>> {
            Ok(self.rows.clone())
        }

        async fn current_url(&self) -> Result<String> {
            Ok("https://member.usafencing.org/search/members?page=1".to_string())
        }
    }

    fn fast_settings() -> Settings {
        let mut s = Settings::default();
        s.timing.retry_backoff_ms = 1;
        s.timing.settle_delay_ms = 0;
        s
    }

    fn candidate(first: &str, last: &str) -> CandidateRecord {
        CandidateRecord {
            person_id: 7,
            member_id: Some("12-345-6789".to_string()),
            first_name: Some(first.to_string()),
            last_name: Some(last.to_string()),
            email: None,
        }
    }

    #[tokio::test]
    async fn id_search_resolves_relative_profile_link() {
        let mut page = ScriptedPage::new();
        page.id_hit = Some(RowHit {
            text: "123456789 Ada Lovelace".to_string(),
            href: Some("/profile/42".to_string()),
        });
        let settings = fast_settings();

        let result = search_by_id(&page, &settings, "123456789").await.unwrap();
        assert_eq!(result.method, Some(MatchMethod::Id));
        assert_eq!(result.row_text.as_deref(), Some("123456789 Ada Lovelace"));
        assert_eq!(
            result.profile_url.as_deref(),
            Some("https://member.usafencing.org/profile/42")
        );
    }

    #[tokio::test]
    async fn id_search_clears_name_filters_first() {
        let page = ScriptedPage::new();
        let settings = fast_settings();

        search_by_id(&page, &settings, "123456789").await.unwrap();
        let cleared = page.cleared.lock().unwrap().clone();
        assert_eq!(
            cleared,
            vec![
                settings.selectors.first_name[0].clone(),
                settings.selectors.last_name[0].clone(),
            ]
        );
    }

    #[tokio::test]
    async fn fallback_needs_every_name_part_and_an_affiliation() {
        let mut page = ScriptedPage::new();
        page.rows = vec![
            RowHit {
                text: "Ada Byron - Some Other Club".to_string(),
                href: None,
            },
            RowHit {
                text: "Ada Lovelace - bay area fencing club - 987654321".to_string(),
                href: Some("https://member.usafencing.org/profile/9".to_string()),
            },
        ];
        let settings = fast_settings();

        let result =
            search_by_name_and_affiliation(&page, &settings, Some("Ada"), Some("Lovelace"))
                .await
                .unwrap();
        assert_eq!(result.method, Some(MatchMethod::NameAffiliation));
        // the pattern match reports the row's own casing
        assert_eq!(
            result.matched_affiliation.as_deref(),
            Some("bay area fencing club")
        );
        assert_eq!(result.resolved_id.as_deref(), Some("987654321"));
        assert_eq!(
            result.profile_url.as_deref(),
            Some("https://member.usafencing.org/profile/9")
        );
    }

    #[tokio::test]
    async fn fallback_without_any_name_is_a_miss_without_searching() {
        let page = ScriptedPage::new();
        let settings = fast_settings();

        let result = search_by_name_and_affiliation(&page, &settings, Some("  "), None)
            .await
            .unwrap();
        assert!(!result.is_found());
        assert_eq!(page.search_count(), 0);
    }

    #[tokio::test]
    async fn fallback_skips_rows_without_the_affiliation() {
        let mut page = ScriptedPage::new();
        page.rows = vec![RowHit {
            text: "Ada Lovelace - Rival Fencing Academy".to_string(),
            href: None,
        }];
        let settings = fast_settings();

        let result =
            search_by_name_and_affiliation(&page, &settings, Some("Ada"), Some("Lovelace"))
                .await
                .unwrap();
        assert!(!result.is_found());
    }

    #[tokio::test]
    async fn invalid_length_goes_straight_to_fallback() {
        let mut page = ScriptedPage::new();
        // An ID search would hit; the policy must never run one for 8 digits
        page.id_hit = Some(RowHit {
            text: "12345678".to_string(),
            href: None,
        });
        let settings = fast_settings();
        let id = sanitize("12345678");

        let (fallback_used, result) =
            verify_candidate(&page, &settings, &candidate("Ada", "Lovelace"), &id, 2)
                .await
                .unwrap();
        assert!(fallback_used);
        assert_ne!(result.method, Some(MatchMethod::Id));
        // only the fallback triggered a search
        assert_eq!(page.search_count(), 1);
    }

    #[tokio::test]
    async fn missing_id_input_is_search_input_not_found() {
        let mut page = ScriptedPage::new();
        page.inputs_present = false;
        let settings = fast_settings();

        let err = search_by_id(&page, &settings, "123456789")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SearchInputNotFound));
    }

    #[tokio::test]
    async fn missing_inputs_skip_id_retries_and_still_try_fallback() {
        let mut page = ScriptedPage::new();
        page.inputs_present = false;
        let settings = fast_settings();
        let id = sanitize("123456789");

        let (fallback_used, result) =
            verify_candidate(&page, &settings, &candidate("Ada", "Lovelace"), &id, 5)
                .await
                .unwrap();
        assert!(fallback_used);
        assert!(!result.is_found());
        // neither strategy got as far as triggering a search
        assert_eq!(page.search_count(), 0);
    }

    #[tokio::test]
    async fn id_retries_then_falls_back() {
        let page = ScriptedPage::new();
        let settings = fast_settings();
        let id = sanitize("123456789");

        let (fallback_used, result) =
            verify_candidate(&page, &settings, &candidate("Ada", "Lovelace"), &id, 2)
                .await
                .unwrap();
        assert!(fallback_used);
        assert!(!result.is_found());
        // initial ID attempt + 2 retries + 1 fallback pass
        assert_eq!(page.search_count(), 4);
    }

    #[tokio::test]
    async fn id_hit_skips_fallback() {
        let mut page = ScriptedPage::new();
        page.id_hit = Some(RowHit {
            text: "123456789".to_string(),
            href: None,
        });
        let settings = fast_settings();
        let id = sanitize("12-345-6789");

        let (fallback_used, result) =
            verify_candidate(&page, &settings, &candidate("Ada", "Lovelace"), &id, 2)
                .await
                .unwrap();
        assert!(!fallback_used);
        assert_eq!(result.method, Some(MatchMethod::Id));
        assert_eq!(page.search_count(), 1);
    }

    #[test]
    fn case_insensitive_find_returns_haystack_slice() {
        let row = "Ada Lovelace - BAY AREA Fencing CLUB";
        let found = find_ascii_case_insensitive(row, "Bay Area Fencing Club");
        assert_eq!(found, Some("BAY AREA Fencing CLUB"));
        assert!(find_ascii_case_insensitive(row, "Rival Club").is_none());
    }
}
