//! Results artifacts: JSON summary, partial snapshot, CSV projection
//!
//! Pure renderers plus the writers that put them on disk. Rendering is a
//! function of the in-memory result list alone, so re-emitting is always
//! safe.

use chrono::{DateTime, Utc};
use memrec_common::types::VerificationRecord;
use memrec_common::Result;
use serde::Serialize;
use std::path::Path;

/// Columns of the CSV projection, in artifact order.
const CSV_HEADERS: [&str; 17] = [
    "person_id",
    "usa_member_id",
    "sanitized_id",
    "was_sanitized",
    "id_length_ok",
    "match_method",
    "fallback_used",
    "club_matched",
    "matched_club",
    "resolved_member_id",
    "first_name",
    "last_name",
    "email",
    "found",
    "profileUrl",
    "rowText",
    "error",
];

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary<'a> {
    run_at: DateTime<Utc>,
    total: usize,
    found: usize,
    not_found: usize,
    results: &'a [VerificationRecord],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Partial<'a> {
    run_at: DateTime<Utc>,
    progress: String,
    results: &'a [VerificationRecord],
}

/// Render the authoritative JSON summary.
///
/// Every count derives from `results` alone (which also carries records
/// resumed from earlier runs), so re-emitting an unchanged result set
/// produces identical content apart from `runAt`.
pub fn render_summary(results: &[VerificationRecord]) -> Result<String> {
    let found = results.iter().filter(|r| r.found).count();
    Ok(serde_json::to_string_pretty(&Summary {
        run_at: Utc::now(),
        total: results.len(),
        found,
        not_found: results.len() - found,
        results,
    })?)
}

/// Render the crash-safety snapshot, overwritten after every record.
pub fn render_partial(
    done: usize,
    planned: usize,
    results: &[VerificationRecord],
) -> Result<String> {
    Ok(serde_json::to_string_pretty(&Partial {
        run_at: Utc::now(),
        progress: format!("{done}/{planned}"),
        results,
    })?)
}

/// Render the spreadsheet projection: one data row per record.
pub fn render_csv(results: &[VerificationRecord]) -> String {
    let mut lines = Vec::with_capacity(results.len() + 1);
    lines.push(CSV_HEADERS.join(","));
    for r in results {
        let row = [
            csv_cell(&r.person_id.to_string()),
            csv_cell(&r.member_id),
            csv_cell(&r.sanitized_id),
            csv_cell(bool_cell(Some(r.was_sanitized))),
            csv_cell(bool_cell(Some(r.id_length_ok))),
            csv_cell(r.match_method.map(|m| m.as_str()).unwrap_or_default()),
            csv_cell(bool_cell(r.fallback_used)),
            csv_cell(bool_cell(r.club_matched)),
            csv_cell(r.matched_club.as_deref().unwrap_or_default()),
            csv_cell(r.resolved_member_id.as_deref().unwrap_or_default()),
            csv_cell(r.first_name.as_deref().unwrap_or_default()),
            csv_cell(r.last_name.as_deref().unwrap_or_default()),
            csv_cell(r.email.as_deref().unwrap_or_default()),
            csv_cell(bool_cell(Some(r.found))),
            csv_cell(r.profile_url.as_deref().unwrap_or_default()),
            csv_cell(r.row_text.as_deref().unwrap_or_default()),
            csv_cell(r.error.as_deref().unwrap_or_default()),
        ];
        lines.push(row.join(","));
    }
    lines.join("\n")
}

/// Write the final summary and CSV side by side, creating parent dirs.
pub fn write_final(json_path: &Path, csv_path: &Path, results: &[VerificationRecord]) -> Result<()> {
    write_text(json_path, &render_summary(results)?)?;
    write_text(csv_path, &render_csv(results))?;
    Ok(())
}

pub(crate) fn write_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, text)?;
    Ok(())
}

fn bool_cell(value: Option<bool>) -> &'static str {
    match value {
        Some(true) => "true",
        _ => "false",
    }
}

/// Quote a cell when it contains a comma, a quote, or any whitespace,
/// doubling embedded quotes.
fn csv_cell(raw: &str) -> String {
    if raw.contains(',') || raw.contains('"') || raw.chars().any(char::is_whitespace) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}
