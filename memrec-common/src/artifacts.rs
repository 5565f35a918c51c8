//! Artifact mirroring: copy run outputs to a secondary destination
//!
//! The dashboard that consumes run artifacts may live behind an object store
//! rather than on this filesystem. Uploads are modelled as a sink with
//! `put(key, bytes)` semantics; the only implementation shipped here writes
//! into a local directory.

use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// Destination for copies of run artifacts (results, snapshots, status)
pub trait ArtifactSink: Send + Sync {
    /// Store `bytes` under `key`, overwriting any previous object.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// Mirrors artifacts into a local directory
pub struct DirSink {
    root: PathBuf,
}

impl DirSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ArtifactSink for DirSink {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let dest = self.root.join(key);
        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&dest, bytes)?;
        Ok(())
    }
}

/// Discards everything; used when no mirror target is configured
pub struct NullSink;

impl ArtifactSink for NullSink {
    fn put(&self, _key: &str, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Copy existing files into the sink under their file names.
///
/// Missing files are skipped and individual failures logged; mirroring never
/// fails a run. Returns how many files were mirrored.
pub fn mirror_files(sink: &dyn ArtifactSink, paths: &[&Path]) -> usize {
    let mut mirrored = 0;
    for path in paths {
        if !path.exists() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match fs::read(path) {
            Ok(bytes) => match sink.put(name, &bytes) {
                Ok(()) => mirrored += 1,
                Err(e) => tracing::warn!(key = name, error = %e, "Mirror write failed"),
            },
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Mirror read failed"),
        }
    }
    mirrored
}
