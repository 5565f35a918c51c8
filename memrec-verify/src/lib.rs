//! # Memrec Verify Library
//!
//! The reconciliation engine: loads the candidate roster, drives the
//! membership registry's search UI through a WebDriver session, matches every
//! candidate by ID (with a name+affiliation fallback), and persists durable,
//! resumable verification records.

pub mod matching;
pub mod report;
pub mod roster;
pub mod scheduler;
pub mod search_page;
pub mod session;
pub mod store;
pub mod webdriver;

pub use scheduler::{RunStats, Scheduler, SchedulerConfig};
pub use search_page::{PageFactory, RowHit, SearchPage};
pub use store::ResultStore;
