//! Storage abstraction for cfr-ledger.
//!
//! The [`Store`] trait is the persistence collaborator of the import
//! pipeline: current title and agency state, the dated snapshot ledger, the
//! agency–title links, and the metric time series. Backends are pluggable
//! (SQLite in the binary crate, [`memory::InMemoryStore`] here).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Snapshot gate
//!
//! Both snapshot writers follow the same rule: a row is written only when no
//! snapshot exists for `(key, date)` or the stored checksum differs, in which
//! case the row for that date is replaced. They return `true` exactly when
//! something was written. Repeated imports of unchanged content are no-ops.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::models::{
    Agency, AgencySnapshot, CorpusTotals, Metric, NewAgency, Title, TitleSnapshot,
};
use crate::rollup::Rollup;

/// Abstract storage backend for cfr-ledger.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`save_title_with_snapshot`](Store::save_title_with_snapshot) | Upsert a title and gate its dated snapshot |
/// | [`upsert_agency`](Store::upsert_agency) | Insert or update an agency by slug |
/// | [`link_agency_title`](Store::link_agency_title) | Add an agency → title link |
/// | [`update_agency_rollup`](Store::update_agency_rollup) | Overwrite an agency's current aggregate |
/// | [`insert_agency_snapshot_if_changed`](Store::insert_agency_snapshot_if_changed) | Gate an agency's dated snapshot |
/// | [`record_metric`](Store::record_metric) | Append to the metric time series |
#[async_trait]
pub trait Store: Send + Sync {
    /// Upsert the current title row, then write its snapshot for
    /// `snapshot_date` if the checksum is new for that date.
    ///
    /// Returns whether a snapshot was written. Both writes happen together
    /// or not at all.
    async fn save_title_with_snapshot(&self, title: &Title, snapshot_date: NaiveDate)
        -> Result<bool>;

    async fn get_title(&self, number: i64) -> Result<Option<Title>>;

    /// All current titles, ordered by number.
    async fn list_titles(&self) -> Result<Vec<Title>>;

    /// Snapshots of one title, newest first.
    async fn title_snapshots(&self, number: i64) -> Result<Vec<TitleSnapshot>>;

    /// Insert an agency, or update name, short name and parent of the agency
    /// with the same slug. Aggregate columns are left untouched.
    ///
    /// Returns the agency id.
    async fn upsert_agency(&self, agency: &NewAgency) -> Result<i64>;

    async fn get_agency_by_slug(&self, slug: &str) -> Result<Option<Agency>>;

    /// All agencies, ordered by id.
    async fn list_agencies(&self) -> Result<Vec<Agency>>;

    async fn count_agencies(&self) -> Result<i64>;

    /// Link an agency to a title. Duplicate links are ignored.
    async fn link_agency_title(&self, agency_id: i64, title_number: i64) -> Result<()>;

    /// Remove every agency → title link.
    async fn clear_agency_titles(&self) -> Result<()>;

    /// Every `(agency_id, title_number)` link.
    async fn agency_title_links(&self) -> Result<Vec<(i64, i64)>>;

    /// Overwrite the current aggregate columns of `rollup.agency_id`.
    async fn update_agency_rollup(&self, rollup: &Rollup) -> Result<()>;

    /// Write the agency snapshot (and its title set) if the checksum is new
    /// for `(agency_id, snapshot_date)`. Returns whether it was written.
    async fn insert_agency_snapshot_if_changed(&self, snapshot: &AgencySnapshot) -> Result<bool>;

    /// Snapshots of one agency, newest first, each with its title set.
    async fn agency_snapshots(&self, agency_id: i64) -> Result<Vec<AgencySnapshot>>;

    /// Count and sums over the current title table.
    async fn corpus_totals(&self) -> Result<CorpusTotals>;

    /// Append one metric value.
    async fn record_metric(&self, metric: &Metric) -> Result<()>;

    /// The most recent value for every `(name, scope)`, ordered by name.
    async fn latest_metrics(&self) -> Result<Vec<Metric>>;
}
