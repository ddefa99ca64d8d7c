//! Persistence on Turso/SQLite via libsql.
//!
//! [`TursoClient`] is the production audit sink, the database-backed agent
//! registry and the source of the read-side metrics.

pub mod turso;

pub use turso::TursoClient;
