//! Verification Flow Integration Tests
//!
//! Drives the scheduler, matching strategies, and result store together
//! against a scripted registry, end to end:
//! - Exact-ID hit producing a complete verification record and CSV row
//! - Name+affiliation fallback after an ID miss
//! - Invalid-length IDs bypassing the exact search entirely
//! - Resume over prior results re-checking nothing and keeping one
//!   record per person
//!
//! Only the browser layer is scripted; results land in real files under a
//! temp directory, exactly as a live run writes them.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use memrec_common::config::Settings;
use memrec_common::types::CandidateRecord;
use memrec_common::Result;
use memrec_verify::{
    store, PageFactory, ResultStore, RowHit, RunStats, Scheduler, SchedulerConfig, SearchPage,
};

/// Scripted registry: which exact-ID searches hit, and which rows any name
/// search returns. Records every ID the engine actually searched for.
struct RegistryFixture {
    id_rows: HashMap<String, RowHit>,
    name_rows: Vec<RowHit>,
    id_queries: Mutex<Vec<String>>,
}

impl RegistryFixture {
    fn new() -> Self {
        Self {
            id_rows: HashMap::new(),
            name_rows: Vec::new(),
            id_queries: Mutex::new(Vec::new()),
        }
    }

    fn with_member(mut self, digits: &str, row_text: &str, href: &str) -> Self {
        self.id_rows.insert(
            digits.to_string(),
            RowHit {
                text: row_text.to_string(),
                href: Some(href.to_string()),
            },
        );
        self
    }

    fn with_name_row(mut self, row_text: &str, href: Option<&str>) -> Self {
        self.name_rows.push(RowHit {
            text: row_text.to_string(),
            href: href.map(str::to_string),
        });
        self
    }

    fn searched_ids(&self) -> Vec<String> {
        self.id_queries.lock().unwrap().clone()
    }
}

struct FixturePage {
    fixture: Arc<RegistryFixture>,
}

#[async_trait]
impl SearchPage for FixturePage {
    async fn open_search(&self) -> Result<()> {
        Ok(())
    }
    async fn fill_first_visible(&self, _selectors: &[String], _value: &str) -> Result<bool> {
        Ok(true)
    }
    async fn clear_fields(&self, _selectors: &[String]) -> Result<()> {
        Ok(())
    }
    async fn trigger_search(&self, _selectors: &[String]) -> Result<()> {
        Ok(())
    }
    async fn wait_settled(&self) -> Result<()> {
        Ok(())
    }
    async fn find_text_hit(&self, needle: &str) -> Result<Option<RowHit>> {
        self.fixture
            .id_queries
            .lock()
            .unwrap()
            .push(needle.to_string());
        Ok(self.fixture.id_rows.get(needle).cloned())
    }
    async fn result_rows(&self, _selectors: &[String]) -> Result<Vec<RowHit>> {
        Ok(self.fixture.name_rows.clone())
    }
    async fn current_url(&self) -> Result<String> {
        Ok("https://member.usafencing.org/search/members?page=2".to_string())
    }
}

struct FixtureFactory {
    fixture: Arc<RegistryFixture>,
}

#[async_trait]
impl PageFactory for FixtureFactory {
    async fn open_page(&self) -> Result<Box<dyn SearchPage>> {
        Ok(Box::new(FixturePage {
            fixture: Arc::clone(&self.fixture),
        }))
    }
}

/// Defaults with every delay collapsed so tests run at full speed.
fn fast_settings() -> Arc<Settings> {
    let mut s = Settings::default();
    s.timing.settle_delay_ms = 0;
    s.timing.politeness_delay_ms = 0;
    s.timing.retry_backoff_ms = 1;
    Arc::new(s)
}

fn candidate(person_id: i64, member_id: &str, first: &str, last: &str) -> CandidateRecord {
    CandidateRecord {
        person_id,
        member_id: Some(member_id.to_string()),
        first_name: Some(first.to_string()),
        last_name: Some(last.to_string()),
        email: Some(format!("{}@club.test", first.to_lowercase())),
    }
}

/// One full verification pass over `roster`, the same steps the binary
/// takes: resume from prior artifacts, compute pending, run the scheduler,
/// flush the final summary and CSV.
async fn run_verification(
    fixture: &Arc<RegistryFixture>,
    roster: &[CandidateRecord],
    out: &Path,
) -> RunStats {
    let store = Arc::new(ResultStore::new(out));
    let prior = store.load_prior();
    let pending = store::compute_pending(roster, &prior);
    store.seed(prior).await;
    store.set_planned(pending.len()).await;

    if pending.is_empty() {
        store.flush_final().await.unwrap();
        return RunStats::default();
    }

    let scheduler = Scheduler::new(
        fast_settings(),
        SchedulerConfig {
            workers: 2,
            retries: 1,
        },
    );
    let factory: Arc<dyn PageFactory> = Arc::new(FixtureFactory {
        fixture: Arc::clone(fixture),
    });
    let stats = scheduler
        .run(factory, pending, Arc::clone(&store), CancellationToken::new())
        .await
        .unwrap();
    store.flush_final().await.unwrap();
    stats
}

fn read_summary(out: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(out).unwrap()).unwrap()
}

#[tokio::test]
async fn test_id_hit_end_to_end() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out").join("usa-status.json");
    let fixture = Arc::new(RegistryFixture::new().with_member(
        "123456789",
        "123456789  Ada Lovelace  Bay Area Fencing Club  2025-2026",
        "/members/1017",
    ));

    let roster = vec![candidate(1, "12-345-6789", "Ada", "Lovelace")];
    let stats = run_verification(&fixture, &roster, &out).await;

    assert_eq!(stats.processed, 1);
    assert_eq!(stats.found, 1);
    assert_eq!(stats.errors, 0);

    let v = read_summary(&out);
    assert_eq!(v["total"], 1);
    assert_eq!(v["found"], 1);
    assert_eq!(v["notFound"], 0);

    let rec = &v["results"].as_array().unwrap()[0];
    assert_eq!(rec["person_id"], 1);
    assert_eq!(rec["usa_member_id"], "12-345-6789");
    assert_eq!(rec["sanitized_id"], "123456789");
    assert_eq!(rec["was_sanitized"], true);
    assert_eq!(rec["id_length_ok"], true);
    assert_eq!(rec["found"], true);
    assert_eq!(rec["match_method"], "id");
    assert_eq!(rec["fallback_used"], false);
    assert_eq!(rec["resolved_member_id"], "123456789");
    // relative href resolved against the page the hit came from
    assert_eq!(
        rec["profileUrl"],
        "https://member.usafencing.org/members/1017"
    );

    // CSV sibling: exact header, then the record projected in column order
    let csv = std::fs::read_to_string(out.with_extension("csv")).unwrap();
    let mut lines = csv.lines();
    assert_eq!(
        lines.next().unwrap(),
        "person_id,usa_member_id,sanitized_id,was_sanitized,id_length_ok,match_method,\
         fallback_used,club_matched,matched_club,resolved_member_id,first_name,last_name,\
         email,found,profileUrl,rowText,error"
    );
    let row = lines.next().unwrap();
    assert!(
        row.starts_with("1,12-345-6789,123456789,true,true,id,false,false,,123456789,Ada,Lovelace"),
        "unexpected CSV row: {row}"
    );

    // crash-safety snapshot was maintained record by record
    let partial: Value = serde_json::from_str(
        &std::fs::read_to_string(out.with_extension("partial.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(partial["progress"], "1/1");
}

#[tokio::test]
async fn test_fallback_matches_name_and_affiliation() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("usa-status.json");
    // "999999999" is absent from the registry, so the exact search misses
    let fixture = Arc::new(
        RegistryFixture::new()
            .with_name_row("Jane Doe  Some Other Club  #123412341", None)
            .with_name_row(
                "Grace Hopper  Bay Area Fencing Club  #987654321",
                Some("/members/2044"),
            ),
    );

    let roster = vec![candidate(2, "999999999", "Grace", "Hopper")];
    let stats = run_verification(&fixture, &roster, &out).await;

    assert_eq!(stats.processed, 1);
    assert_eq!(stats.found, 1);
    // one initial attempt plus one retry before the fallback fired
    assert_eq!(fixture.searched_ids(), vec!["999999999", "999999999"]);

    let v = read_summary(&out);
    let rec = &v["results"].as_array().unwrap()[0];
    assert_eq!(rec["found"], true);
    assert_eq!(rec["match_method"], "name_affiliation");
    assert_eq!(rec["fallback_used"], true);
    assert_eq!(rec["club_matched"], true);
    assert_eq!(rec["matched_club"], "Bay Area Fencing Club");
    // membership number recovered from the winning row's text
    assert_eq!(rec["resolved_member_id"], "987654321");
    assert_eq!(
        rec["rowText"],
        "Grace Hopper  Bay Area Fencing Club  #987654321"
    );
    assert_eq!(
        rec["profileUrl"],
        "https://member.usafencing.org/members/2044"
    );
}

#[tokio::test]
async fn test_invalid_length_id_skips_exact_search() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("usa-status.json");
    // Even though "12345" would hit, the engine must never search for it
    let fixture = Arc::new(RegistryFixture::new().with_member(
        "12345",
        "12345  Charles Babbage",
        "/members/3001",
    ));

    let roster = vec![candidate(3, "12345", "Charles", "Babbage")];
    let stats = run_verification(&fixture, &roster, &out).await;

    assert_eq!(stats.processed, 1);
    assert_eq!(stats.not_found, 1);
    assert!(fixture.searched_ids().is_empty());

    let v = read_summary(&out);
    let rec = &v["results"].as_array().unwrap()[0];
    assert_eq!(rec["sanitized_id"], "12345");
    assert_eq!(rec["id_length_ok"], false);
    assert_eq!(rec["found"], false);
    // the fallback still ran; there was just no qualifying row
    assert_eq!(rec["fallback_used"], true);
}

#[tokio::test]
async fn test_resume_reruns_nothing_and_keeps_one_record_per_person() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("usa-status.json");
    let fixture = Arc::new(RegistryFixture::new().with_member(
        "123456789",
        "123456789  Ada Lovelace  Bay Area Fencing Club",
        "/members/1017",
    ));

    let roster = vec![
        candidate(1, "12-345-6789", "Ada", "Lovelace"),
        candidate(2, "111111111", "Charles", "Babbage"),
    ];

    let first = run_verification(&fixture, &roster, &out).await;
    assert_eq!(first.processed, 2);
    assert_eq!(first.found, 1);
    let first_pass = std::fs::read_to_string(&out).unwrap();

    // Second invocation over the same roster: everyone is already checked
    let second = run_verification(&fixture, &roster, &out).await;
    assert_eq!(second.processed, 0);
    let second_pass = std::fs::read_to_string(&out).unwrap();

    // Byte-for-byte stable apart from the run timestamp
    let stable = |text: &str| {
        text.lines()
            .filter(|line| !line.contains("\"runAt\""))
            .map(str::to_string)
            .collect::<Vec<_>>()
    };
    assert_eq!(stable(&first_pass), stable(&second_pass));

    // Exactly one record per person, both runs included
    let v = read_summary(&out);
    let mut ids: Vec<i64> = v["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["person_id"].as_i64().unwrap())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2]);
}
