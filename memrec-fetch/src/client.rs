//! Paged people client for the scheduling platform API

use memrec_common::{CandidateRecord, Error, Result};
use serde_json::Value;
use std::time::Duration;

use crate::custom_fields::custom_field_value;

const PER_PAGE: usize = 100;
/// Hard ceiling on pages followed; hitting it means a truncated roster
const MAX_PAGES: usize = 10_000;
const USER_AGENT: &str = concat!("memrec/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Bearer-authenticated client for the platform's people endpoint
pub struct PeopleClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl PeopleClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Fetch every person, following pagination until a short or empty page.
    pub async fn fetch_people(&self) -> Result<Vec<Value>> {
        let mut all = Vec::new();
        let mut page = 1usize;

        loop {
            let url = format!(
                "{}/api/v2/desk/people?per_page={}&page={}",
                self.base_url, PER_PAGE, page
            );
            tracing::debug!(page, url = %url, "Fetching roster page");

            let response = self
                .http_client
                .get(&url)
                .bearer_auth(&self.api_key)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let body: String = body.chars().take(200).collect();
                return Err(Error::Roster(format!(
                    "people page {page} failed with {status}: {body}"
                )));
            }

            let body: Value = response.json().await?;
            let items = page_items(body);
            let count = items.len();
            all.extend(items);

            if count < PER_PAGE {
                break;
            }
            page += 1;
            if page > MAX_PAGES {
                tracing::warn!(
                    pages = MAX_PAGES,
                    "Pagination ceiling reached, roster truncated"
                );
                break;
            }
        }

        tracing::info!(count = all.len(), "Fetched roster people");
        Ok(all)
    }

    /// Fetch the roster and project each person to a candidate record.
    pub async fn fetch_candidates(&self, field_name: &str) -> Result<Vec<CandidateRecord>> {
        let people = self.fetch_people().await?;
        Ok(people
            .iter()
            .map(|p| candidate_from_person(p, field_name))
            .collect())
    }
}

/// Page payload: a bare array or `{people: [...]}`.
fn page_items(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("people") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// Project one raw person object to the candidate shape.
pub fn candidate_from_person(person: &Value, field_name: &str) -> CandidateRecord {
    CandidateRecord {
        person_id: person_id(person),
        member_id: custom_field_value(person, field_name),
        first_name: string_field(person, "first_name"),
        last_name: string_field(person, "last_name"),
        email: string_field(person, "email"),
    }
}

/// Person ID from `id` or `person_id`, numeric or numeric-string; 0 if absent.
fn person_id(person: &Value) -> i64 {
    for key in ["id", "person_id"] {
        match person.get(key) {
            Some(Value::Number(n)) => {
                if let Some(id) = n.as_i64() {
                    return id;
                }
            }
            Some(Value::String(s)) => {
                if let Ok(id) = s.trim().parse() {
                    return id;
                }
            }
            _ => {}
        }
    }
    0
}

fn string_field(person: &Value, key: &str) -> Option<String> {
    person
        .get(key)
        .and_then(Value::as_str)
        .map(|s| s.to_string())
}
