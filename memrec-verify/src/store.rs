//! Durable result accumulation with idempotent resume
//!
//! The store owns the three results artifacts derived from one output path:
//! the final summary (`.json`), its CSV sibling, and the crash-safety
//! partial snapshot (`.partial.json`) overwritten after every record. A
//! record present in a prior artifact counts as done and is never reworked.

use crate::report;
use memrec_common::types::{CandidateRecord, VerificationRecord};
use memrec_common::Result;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

pub struct ResultStore {
    final_path: PathBuf,
    partial_path: PathBuf,
    csv_path: PathBuf,
    inner: Mutex<StoreInner>,
}

struct StoreInner {
    results: Vec<VerificationRecord>,
    /// Records appended by this run, excluding resumed ones
    appended: usize,
    /// Records planned for this run; denominator of the progress fraction
    planned: usize,
}

impl ResultStore {
    /// Create a store writing to `final_path`, with the CSV and partial
    /// snapshot as siblings (`.csv`, `.partial.json`).
    pub fn new(final_path: &Path) -> Self {
        Self {
            partial_path: final_path.with_extension("partial.json"),
            csv_path: final_path.with_extension("csv"),
            final_path: final_path.to_path_buf(),
            inner: Mutex::new(StoreInner {
                results: Vec::new(),
                appended: 0,
                planned: 0,
            }),
        }
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    pub fn partial_path(&self) -> &Path {
        &self.partial_path
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }

    /// Load prior results for resume. The final file wins over the partial
    /// snapshot; an unreadable file starts fresh with a warning.
    pub fn load_prior(&self) -> Vec<VerificationRecord> {
        let Some(path) = [&self.final_path, &self.partial_path]
            .into_iter()
            .find(|p| p.exists())
        else {
            return Vec::new();
        };
        let parsed = std::fs::read_to_string(path)
            .ok()
            .and_then(|text| parse_results_document(&text));
        match parsed {
            Some(records) => {
                tracing::info!(
                    count = records.len(),
                    path = %path.display(),
                    "Resuming: loaded prior results"
                );
                records
            }
            None => {
                tracing::warn!(
                    path = %path.display(),
                    "Failed to parse prior results; starting fresh"
                );
                Vec::new()
            }
        }
    }

    /// Carry prior-run records into the working set without counting them
    /// against this run's progress.
    pub async fn seed(&self, prior: Vec<VerificationRecord>) {
        let mut inner = self.inner.lock().await;
        inner.results = prior;
    }

    pub async fn set_planned(&self, planned: usize) {
        self.inner.lock().await.planned = planned;
    }

    /// Append one finished record and overwrite the partial snapshot.
    ///
    /// Snapshot failures are logged, never fatal; losing a snapshot write
    /// costs at most one record of resume granularity.
    pub async fn append(&self, record: VerificationRecord) {
        let mut inner = self.inner.lock().await;
        inner.results.push(record);
        inner.appended += 1;
        match report::render_partial(inner.appended, inner.planned, &inner.results) {
            Ok(text) => {
                if let Err(e) = report::write_text(&self.partial_path, &text) {
                    tracing::warn!(
                        path = %self.partial_path.display(),
                        error = %e,
                        "Failed to write partial snapshot"
                    );
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to render partial snapshot"),
        }
    }

    /// Write the authoritative summary and CSV from the current working set.
    pub async fn flush_final(&self) -> Result<()> {
        let inner = self.inner.lock().await;
        report::write_final(&self.final_path, &self.csv_path, &inner.results)
    }

    /// (all records, found, not found) across the working set.
    pub async fn counts(&self) -> (usize, usize, usize) {
        let inner = self.inner.lock().await;
        let found = inner.results.iter().filter(|r| r.found).count();
        (inner.results.len(), found, inner.results.len() - found)
    }
}

/// Roster records with no verification record yet, in roster order.
///
/// Duplicate roster rows for one person collapse to the first occurrence,
/// keeping the one-record-per-person invariant even on a dirty roster.
pub fn compute_pending(
    roster: &[CandidateRecord],
    prior: &[VerificationRecord],
) -> Vec<CandidateRecord> {
    let mut done: HashSet<i64> = prior.iter().map(|r| r.person_id).collect();
    roster
        .iter()
        .filter(|p| done.insert(p.person_id))
        .cloned()
        .collect()
}

/// Accept a bare array or a `{results: [...]}` envelope; skip elements that
/// no longer parse rather than discarding the whole file.
fn parse_results_document(text: &str) -> Option<Vec<VerificationRecord>> {
    let value: Value = serde_json::from_str(text).ok()?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("results") {
            Some(Value::Array(items)) => items,
            _ => return None,
        },
        _ => return None,
    };
    let mut records = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<VerificationRecord>(item) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(error = %e, "Skipping unreadable prior result"),
        }
    }
    Some(records)
}
