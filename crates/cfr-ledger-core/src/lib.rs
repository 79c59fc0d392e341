//! # cfr-ledger core
//!
//! Runtime-independent logic for cfr-ledger: data models, the streaming
//! content parser, content and aggregate fingerprints, the agency rollup
//! engine, density scoring, the store abstraction and read-only views.
//!
//! This crate has no tokio, sqlx, HTTP, or filesystem dependencies. The
//! binary crate supplies the fetch client, the SQLite store and the import
//! orchestrator on top of it.

pub mod density;
pub mod fingerprint;
pub mod models;
pub mod parser;
pub mod rollup;
pub mod store;
pub mod views;
