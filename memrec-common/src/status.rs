//! Run status file: phase reporting plus cooperative cross-process lock
//!
//! External pollers read this file to show run progress, and concurrent runs
//! use it to keep out of each other's way. The lock is advisory: `running`
//! plus the owner pid, checked at run start and cleared on completion. All
//! writes go through a temp file and an atomic rename so pollers never see a
//! half-written document.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Lifecycle phase recorded in the status file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Starting,
    Fetch,
    Verify,
    Done,
    Error,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Starting => "starting",
            RunPhase::Fetch => "fetch",
            RunPhase::Verify => "verify",
            RunPhase::Done => "done",
            RunPhase::Error => "error",
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The status document, serialized camelCase for the dashboard pollers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub running: bool,
    pub phase: RunPhase,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_fetch_run_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_verify_run_at: Option<DateTime<Utc>>,
    pub pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Handle on the status file. Owns the in-memory copy of the document while
/// this process holds the lock.
pub struct StatusFile {
    path: PathBuf,
    current: Option<RunStatus>,
}

impl StatusFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            current: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best-effort read. Missing or corrupt files read as `None`.
    pub fn read(&self) -> Option<RunStatus> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Claim the lock and mark a run active in `phase`.
    ///
    /// Fails with [`Error::AlreadyRunning`] when another live process holds
    /// the lock. A `running` record whose owner pid is dead is stale and is
    /// taken over with a warning. The `last*RunAt` stamps of the previous
    /// document survive into the new one.
    pub fn begin(&mut self, phase: RunPhase) -> Result<()> {
        let existing = self.read();
        if let Some(prev) = &existing {
            if prev.running {
                if owner_alive(prev.pid) {
                    return Err(Error::AlreadyRunning(prev.pid));
                }
                tracing::warn!(
                    pid = prev.pid,
                    "Stale status lock from dead process, taking over"
                );
            }
        }

        let now = Utc::now();
        let mut status = RunStatus {
            running: true,
            phase,
            started_at: now,
            finished_at: None,
            fetch_started_at: None,
            fetch_finished_at: None,
            verify_started_at: None,
            last_fetch_run_at: existing.as_ref().and_then(|s| s.last_fetch_run_at),
            last_verify_run_at: existing.as_ref().and_then(|s| s.last_verify_run_at),
            pid: std::process::id(),
            error: None,
        };
        match phase {
            RunPhase::Fetch => status.fetch_started_at = Some(now),
            RunPhase::Verify => status.verify_started_at = Some(now),
            _ => {}
        }

        self.write(&status)?;
        self.current = Some(status);
        tracing::debug!(path = %self.path.display(), phase = %phase, "Status lock acquired");
        Ok(())
    }

    /// Release the lock recording a successful run.
    pub fn complete(&mut self) -> Result<()> {
        let Some(mut status) = self.current.take() else {
            return Ok(());
        };
        let now = Utc::now();
        status.running = false;
        status.phase = RunPhase::Done;
        status.finished_at = Some(now);
        if status.fetch_started_at.is_some() {
            status.fetch_finished_at = Some(now);
            status.last_fetch_run_at = Some(now);
        }
        if status.verify_started_at.is_some() {
            status.last_verify_run_at = Some(now);
        }
        self.write(&status)
    }

    /// Release the lock recording a failed or interrupted run.
    pub fn fail(&mut self, message: &str) -> Result<()> {
        let Some(mut status) = self.current.take() else {
            return Ok(());
        };
        status.running = false;
        status.phase = RunPhase::Error;
        status.finished_at = Some(Utc::now());
        status.error = Some(message.to_string());
        self.write(&status)
    }

    fn write(&self, status: &RunStatus) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(status)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Liveness probe for the lock owner. On platforms without a cheap check we
/// assume the owner is alive and refuse to start.
fn owner_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    if cfg!(target_os = "linux") {
        Path::new(&format!("/proc/{pid}")).exists()
    } else {
        true
    }
}
