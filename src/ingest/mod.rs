//! Candidate ingestion: title parsing and deduplication.

mod dedup;
mod store;
mod title;

pub use dedup::{AcceptOutcome, Candidate, Deduplicator, WorkItem};
pub use store::{DedupStore, SqliteDedupStore};
pub use title::{ParsedTitle, TitleParser};
