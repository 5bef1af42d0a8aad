//! Convenience wrapper for reading from and writing to Postgres SQL databases.
//!
//! The crate is organized around the abstract [`db`] interface, with a
//! [PostgreSQL](db::postgres) backend and an [in-memory mock](db::mock) for tests, and the
//! [`SqlClient`] convenience layer over either. Connection credentials come from
//! [`Options`] or a [pgpass file](pgpass).

pub mod catalog;
pub mod client;
pub mod config;
pub mod db;
pub mod dump;
pub mod pgpass;
pub mod script;
pub mod validate;

pub use client::{PostgresClient, SqlClient};
pub use config::Options;
pub use db::{Clause, Relation, SchemaColumn, SelectColumn, Type, Value};

use tracing_subscriber::EnvFilter;

/// Install a global tracing subscriber honoring `RUST_LOG`.
///
/// Safe to call more than once; later calls have no effect.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}
