//! Roster snapshot artifact: `{summary, people}`
//!
//! Written by the fetch binary, read back by the verifier as its default
//! roster source and by the dashboard for the "last fetched" panel.

use chrono::{DateTime, Utc};
use memrec_common::{CandidateRecord, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Header block of the snapshot artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    pub run_at: DateTime<Utc>,
    /// People fetched
    pub count: usize,
    /// People whose member-ID custom field is non-empty
    pub with_ids: usize,
    /// Custom field display name the IDs came from
    pub field_name: String,
}

/// The snapshot document as written to disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterSnapshot {
    pub summary: SnapshotSummary,
    pub people: Vec<CandidateRecord>,
}

impl RosterSnapshot {
    pub fn new(people: Vec<CandidateRecord>, field_name: &str) -> Self {
        let with_ids = people
            .iter()
            .filter(|p| p.member_id.as_deref().is_some_and(|id| !id.is_empty()))
            .count();
        Self {
            summary: SnapshotSummary {
                run_at: Utc::now(),
                count: people.len(),
                with_ids,
                field_name: field_name.to_string(),
            },
            people,
        }
    }

    /// Write the snapshot as pretty JSON, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Parse any known roster document shape into candidate records: the snapshot
/// envelope (`{summary, people}`), a bare `{people: [...]}`, or a plain array.
pub fn parse_people_document(text: &str) -> Result<Vec<CandidateRecord>> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("people") {
            Some(serde_json::Value::Array(items)) => items,
            _ => {
                return Err(Error::Roster(
                    "roster document has no people array".to_string(),
                ))
            }
        },
        _ => {
            return Err(Error::Roster(
                "unrecognized roster document shape".to_string(),
            ))
        }
    };
    items
        .into_iter()
        .map(|item| serde_json::from_value(item).map_err(Into::into))
        .collect()
}
