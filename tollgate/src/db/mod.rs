//! Database layer for data persistence and access.
//!
//! This module implements the data access layer using SQLx with PostgreSQL.
//! It follows the Repository pattern to provide clean abstractions over
//! database operations.
//!
//! # Modules
//!
//! - [`handlers`]: Repository implementations for the engine's operations
//! - [`models`]: Database record structures matching table schemas
//! - [`errors`]: Database-specific error types
//!
//! # Repository Pattern
//!
//! Each repository wraps a `&mut PgConnection` and encapsulates all access
//! for one entity type. Multi-step operations (recording a call, completing
//! a job, mutating the ledger) open their own transaction on that
//! connection, so callers that are already inside a transaction get
//! savepoint semantics for free.
//!
//! ## Example Usage
//!
//! ```ignore
//! use tollgate::db::handlers::{Jobs, Repository};
//!
//! async fn example(pool: &sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut conn = pool.acquire().await?;
//!     let mut jobs = Jobs::new(&mut conn);
//!     let job = jobs.create(&create_request).await?;
//!     Ok(())
//! }
//! ```

pub mod errors;
pub mod handlers;
pub mod models;
