//! Releaseforge-DB: durable release state.
//!
//! This crate stores everything that must survive a restart: per-episode
//! release records with per-quality completion, per-recipient delivery grants,
//! the ongoing (in-flight) set, and terminal failure marks. It uses SQLite
//! through rusqlite with r2d2 connection pooling.
//!
//! # Modules
//!
//! - `migrations` - Embedded schema migrations
//! - `pool` - Connection pool management
//! - `models` - Rust models matching the schema
//! - `queries` - Query operations grouped by table
//!
//! # Example
//!
//! ```
//! use releaseforge_common::{Identity, QualityLabel, RecipientId};
//! use releaseforge_db::pool::{init_memory_pool, get_conn};
//! use releaseforge_db::queries::deliveries;
//!
//! let pool = init_memory_pool().unwrap();
//! let conn = get_conn(&pool).unwrap();
//!
//! let id = Identity::from_parts("Series A", 5);
//! let q = QualityLabel::new("720");
//! let r = RecipientId::new(1);
//! assert!(deliveries::grant_delivery(&conn, &id, &q, r).unwrap());
//! assert!(!deliveries::grant_delivery(&conn, &id, &q, r).unwrap());
//! ```

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
