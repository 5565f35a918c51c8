//! # Memrec Fetch Library
//!
//! Roster acquisition: pulls people from the scheduling platform API, lifts
//! the self-reported member ID out of their custom fields, and writes the
//! roster snapshot artifact the verifier (and dashboard) read.

pub mod client;
pub mod custom_fields;
pub mod snapshot;

pub use client::PeopleClient;
pub use snapshot::{parse_people_document, RosterSnapshot, SnapshotSummary};
