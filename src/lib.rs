//! # cfr-ledger
//!
//! Ingests federal regulation titles and their issuing agencies from the
//! eCFR API into a change-keyed snapshot ledger.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//! │ FetchClient │──▶│ parse_content│──▶│ Forest rollup│──▶│  Store   │
//! │ retry+pace  │   │ words/sects  │   │ agency tree  │   │ SQLite   │
//! └─────────────┘   └──────────────┘   └──────────────┘   └──────────┘
//!         ▲                                                    │
//!         └───────────────────── Importer ─────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cfr init                        # create database
//! cfr import                      # import today's titles and agencies
//! cfr import --date 2024-01-01    # import as of a past date
//! cfr titles --sort density --desc
//! cfr history title 40
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`cancel`] | Shared cancellation signal |
//! | [`transport`] | HTTP transport seam |
//! | [`client`] | Retrying fetch client and typed endpoints |
//! | [`import`] | Import orchestration |
//! | [`metrics`] | Corpus-wide metrics |
//! | [`report`] | Summaries and listings |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite `Store` implementation |

pub mod cancel;
pub mod client;
pub mod config;
pub mod db;
pub mod import;
pub mod metrics;
pub mod migrate;
pub mod report;
pub mod sqlite_store;
pub mod transport;
