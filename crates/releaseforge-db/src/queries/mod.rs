//! Database query modules.
//!
//! This module organizes all database operations into logical groups:
//! - releases: Release records and per-quality completion
//! - deliveries: Per-recipient delivery grants
//! - ongoing: The in-flight item set and terminal failure marks

pub mod deliveries;
pub mod ongoing;
pub mod releases;
