//! # Memrec Common Library
//!
//! Shared code for the memrec binaries including:
//! - Roster and verification record types
//! - Membership ID sanitization
//! - Configuration loading (TOML + environment)
//! - Run status file (cooperative cross-process lock)
//! - Artifact mirroring sinks
//! - Logging setup

pub mod artifacts;
pub mod config;
pub mod error;
pub mod ident;
pub mod logging;
pub mod status;
pub mod types;

pub use error::{Error, Result};
pub use ident::SanitizedId;
pub use types::{CandidateRecord, MatchMethod, MatchResult, VerificationRecord};
