//! Releaseforge - Episode release pipeline
//!
//! Polls release feeds, downloads each new episode once, encodes it into
//! every configured quality, publishes the artifacts, and announces them with
//! per-recipient delivery buttons. The library crate exposes the pipeline for
//! the binary and for integration testing.

pub mod config;
pub mod coordinator;
pub mod delivery;
pub mod download;
pub mod feed;
pub mod ingest;
pub mod notifications;
pub mod pipeline;
pub mod publish;
pub mod queue;
pub mod state;
pub mod store;
pub mod tools;
pub mod transcode;
