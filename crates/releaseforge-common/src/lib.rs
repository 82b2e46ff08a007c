//! Releaseforge-Common: Shared identities, status types, and errors.
//!
//! This crate provides the vocabulary shared by the store and the pipeline:
//!
//! - **Typed IDs**: newtypes for episode identities, quality labels, recipients,
//!   and the handles returned by publishers and notification channels
//! - **Status Types**: durable quality status and transient pipeline state
//! - **Error Handling**: common error type and result alias
//!
//! # Examples
//!
//! ```
//! use releaseforge_common::{Identity, QualityLabel, QualityStatus};
//!
//! let id = Identity::from_parts("Series A", 5);
//! assert_eq!(id.as_str(), "series-a:5");
//!
//! let q = QualityLabel::new("720");
//! assert_eq!(q.to_string(), "720");
//!
//! assert!(QualityStatus::Uploaded.is_uploaded());
//! ```

pub mod error;
pub mod ids;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use types::*;
