//! Import orchestration.
//!
//! The [`Importer`] sequences one run against a snapshot date:
//!
//! ```text
//! FetchList ─▶ for each title: Fetch ─▶ Parse ─▶ PersistIfChanged
//!           ─▶ FetchHierarchy ─▶ Link ─▶ Rollup ─▶ Summarize
//! ```
//!
//! # Failure policy
//!
//! - Failing to fetch the title list aborts the run with an error.
//! - Failing to fetch the agency hierarchy (or to clear the previous links)
//!   aborts the remaining stages. [`Importer::run`] keeps the title counts
//!   and reports the error in [`RunReport::fatal`].
//! - Any single title or agency failure is logged, counted, and skipped.
//! - Reserved titles are skipped and counted separately.
//! - A fired [`Cancellation`] ends the run with [`RunStatus::Cancelled`];
//!   everything persisted so far stays. Re-running converges because every
//!   write is an upsert behind the snapshot gate.
//!
//! Titles are processed one at a time in list order with
//! [`FetchClient::pace`] between consecutive requests.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use log::{error, info, warn};

use cfr_ledger_core::models::{AgencyMeta, AgencySnapshot, NewAgency, Title, TitleMeta};
use cfr_ledger_core::parser::parse_content;
use cfr_ledger_core::rollup::Forest;
use cfr_ledger_core::store::Store;

use crate::cancel::Cancellation;
use crate::client::{FetchClient, FetchError};
use crate::metrics::{self, SystemMetrics};

/// Per-title counters for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub total: usize,
    pub imported: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ImportStats {
    /// `imported / (total - skipped)`, or `None` when every title was
    /// skipped (or there were none).
    pub fn success_rate(&self) -> Option<f64> {
        let attempted = self.total.saturating_sub(self.skipped);
        if attempted == 0 {
            None
        } else {
            Some(self.imported as f64 / attempted as f64)
        }
    }
}

/// Per-agency counters for a hierarchy import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgencyStats {
    /// Agencies in the fetched hierarchy, at any depth.
    pub total: usize,
    pub imported: usize,
    /// Agencies that failed to upsert (counting their skipped subtrees) or
    /// to persist their aggregate.
    pub failed: usize,
    pub links: usize,
    pub link_failures: usize,
    pub snapshots_created: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoricalStats {
    pub titles_processed: usize,
    pub versions_processed: usize,
    pub snapshots_created: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Cancelled,
}

/// Terminal status of a stage plus the counters it reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<S> {
    pub status: RunStatus,
    pub stats: S,
}

impl<S> Outcome<S> {
    fn completed(stats: S) -> Self {
        Self {
            status: RunStatus::Completed,
            stats,
        }
    }

    fn cancelled(stats: S) -> Self {
        Self {
            status: RunStatus::Cancelled,
            stats,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == RunStatus::Cancelled
    }
}

/// Everything a full run produced. Stages after a cancellation or a fatal
/// hierarchy error are `None`.
#[derive(Debug)]
pub struct RunReport {
    pub status: RunStatus,
    pub snapshot_date: NaiveDate,
    pub titles: ImportStats,
    pub agencies: Option<AgencyStats>,
    pub metrics: Option<SystemMetrics>,
    /// Error that aborted the hierarchy stage after the titles were imported.
    pub fatal: Option<anyhow::Error>,
}

impl RunReport {
    /// True when the run completed without a single title or agency failure.
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
            && self.fatal.is_none()
            && self.titles.failed == 0
            && self.agencies.as_ref().map_or(true, |a| a.failed == 0)
    }
}

fn is_cancellation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<FetchError>()
        .is_some_and(FetchError::is_cancelled)
}

pub struct Importer {
    store: Arc<dyn Store>,
    client: FetchClient,
    cancel: Cancellation,
}

impl Importer {
    pub fn new(store: Arc<dyn Store>, client: FetchClient, cancel: Cancellation) -> Self {
        Self {
            store,
            client,
            cancel,
        }
    }

    /// Titles, then agencies, then system metrics.
    ///
    /// Only a title list failure is returned as `Err`. A fatal hierarchy
    /// error lands in [`RunReport::fatal`] so the title counts survive it.
    pub async fn run(&self, snapshot_date: NaiveDate) -> Result<RunReport> {
        let titles = self.import_titles(snapshot_date).await?;
        let mut report = RunReport {
            status: titles.status,
            snapshot_date,
            titles: titles.stats,
            agencies: None,
            metrics: None,
            fatal: None,
        };
        if report.status == RunStatus::Cancelled {
            return Ok(report);
        }

        let agencies = match self.import_agencies(snapshot_date).await {
            Ok(agencies) => agencies,
            Err(e) => {
                error!("Agency import aborted: {:#}", e);
                report.fatal = Some(e);
                return Ok(report);
            }
        };
        report.status = agencies.status;
        report.agencies = Some(agencies.stats);
        if report.status == RunStatus::Cancelled {
            return Ok(report);
        }

        info!("Calculating system metrics...");
        match metrics::compute_and_record(self.store.as_ref()).await {
            Ok(m) => report.metrics = Some(m),
            Err(e) => warn!("Failed to calculate metrics: {:#}", e),
        }
        Ok(report)
    }

    /// Fetch, parse and persist every title in the remote list.
    pub async fn import_titles(&self, snapshot_date: NaiveDate) -> Result<Outcome<ImportStats>> {
        let mut stats = ImportStats::default();

        info!("Fetching titles list...");
        let titles = match self.client.fetch_titles().await {
            Ok(titles) => titles,
            Err(e) if e.is_cancelled() => return Ok(Outcome::cancelled(stats)),
            Err(e) => return Err(anyhow::Error::new(e).context("failed to fetch titles list")),
        };
        stats.total = titles.len();
        info!("Found {} titles to process", stats.total);

        let mut fetched_before = false;
        for (idx, meta) in titles.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Ok(Outcome::cancelled(stats));
            }
            let progress = format!("[{}/{}]", idx + 1, stats.total);

            if meta.reserved {
                info!("{} Skipping Title {}: {} (reserved)", progress, meta.number, meta.name);
                stats.skipped += 1;
                continue;
            }

            if fetched_before && self.client.pace().await.is_err() {
                return Ok(Outcome::cancelled(stats));
            }
            fetched_before = true;

            info!("{} Importing Title {}: {}", progress, meta.number, meta.name);
            match self.import_title(meta, snapshot_date).await {
                Ok(changed) => record_title(&mut stats, meta.number, changed),
                Err(e) if is_cancellation(&e) => return Ok(Outcome::cancelled(stats)),
                Err(e) => {
                    error!("Failed to import Title {}: {:#}", meta.number, e);
                    stats.failed += 1;
                }
            }
        }

        Ok(Outcome::completed(stats))
    }

    /// Import one title. The list is still fetched for its metadata; an
    /// unknown number is an error. Agencies are not touched.
    pub async fn import_single(
        &self,
        number: i64,
        snapshot_date: NaiveDate,
    ) -> Result<Outcome<ImportStats>> {
        let mut stats = ImportStats {
            total: 1,
            ..ImportStats::default()
        };

        info!("Fetching title metadata...");
        let titles = match self.client.fetch_titles().await {
            Ok(titles) => titles,
            Err(e) if e.is_cancelled() => return Ok(Outcome::cancelled(stats)),
            Err(e) => return Err(anyhow::Error::new(e).context("failed to fetch titles list")),
        };
        let Some(meta) = titles.iter().find(|t| t.number == number) else {
            bail!("title {} not found in the title list", number);
        };

        if meta.reserved {
            info!("Title {} is reserved, skipping", number);
            stats.skipped = 1;
            return Ok(Outcome::completed(stats));
        }

        info!("Importing Title {}: {}", meta.number, meta.name);
        match self.import_title(meta, snapshot_date).await {
            Ok(changed) => record_title(&mut stats, number, changed),
            Err(e) if is_cancellation(&e) => return Ok(Outcome::cancelled(stats)),
            Err(e) => {
                error!("Failed to import Title {}: {:#}", number, e);
                stats.failed = 1;
            }
        }
        Ok(Outcome::completed(stats))
    }

    async fn import_title(&self, meta: &TitleMeta, snapshot_date: NaiveDate) -> Result<bool> {
        let content = self
            .client
            .fetch_title_content(snapshot_date, meta.number)
            .await
            .context("failed to fetch content")?;
        self.persist_title(meta, &content, snapshot_date).await
    }

    async fn persist_title(
        &self,
        meta: &TitleMeta,
        content: &[u8],
        snapshot_date: NaiveDate,
    ) -> Result<bool> {
        let parsed = parse_content(content);
        let title = Title {
            number: meta.number,
            name: meta.name.clone(),
            word_count: parsed.word_count,
            section_count: parsed.section_count,
            checksum: parsed.checksum,
            last_amended_on: meta.last_amended_on(),
            fetched_at: Utc::now(),
        };
        self.store
            .save_title_with_snapshot(&title, snapshot_date)
            .await
            .context("failed to save title")
    }

    /// Fetch the agency hierarchy, rebuild links, and roll up aggregates.
    pub async fn import_agencies(&self, snapshot_date: NaiveDate) -> Result<Outcome<AgencyStats>> {
        let mut stats = AgencyStats::default();
        if self.cancel.is_cancelled() {
            return Ok(Outcome::cancelled(stats));
        }

        info!("Fetching agencies...");
        let roots = match self.client.fetch_agencies().await {
            Ok(roots) => roots,
            Err(e) if e.is_cancelled() => return Ok(Outcome::cancelled(stats)),
            Err(e) => return Err(anyhow::Error::new(e).context("failed to fetch agencies")),
        };
        stats.total = roots.iter().map(AgencyMeta::subtree_len).sum();
        info!("Found {} top-level agencies ({} total)", roots.len(), stats.total);

        self.store
            .clear_agency_titles()
            .await
            .context("failed to clear agency titles")?;

        info!("Pass 1: inserting agencies...");
        let slug_to_id = self.insert_agencies(&roots, &mut stats).await;
        if self.cancel.is_cancelled() {
            return Ok(Outcome::cancelled(stats));
        }

        info!("Pass 2: linking agencies to titles...");
        self.link_agencies(&roots, &slug_to_id, &mut stats).await;
        if self.cancel.is_cancelled() {
            return Ok(Outcome::cancelled(stats));
        }

        info!("Pass 3: calculating rollups...");
        self.rollup_agencies(snapshot_date, &mut stats).await?;

        Ok(Outcome::completed(stats))
    }

    /// Depth-first upsert, parents before children. A failed upsert skips
    /// (and counts) its whole subtree since the children have no parent id.
    async fn insert_agencies(
        &self,
        roots: &[AgencyMeta],
        stats: &mut AgencyStats,
    ) -> HashMap<String, i64> {
        let mut slug_to_id = HashMap::new();
        let mut stack: Vec<(&AgencyMeta, Option<i64>)> =
            roots.iter().rev().map(|meta| (meta, None)).collect();

        while let Some((meta, parent_id)) = stack.pop() {
            let agency = NewAgency {
                name: meta.name.clone(),
                short_name: meta.short_name.clone().filter(|s| !s.is_empty()),
                slug: meta.slug.clone(),
                parent_id,
            };
            match self.store.upsert_agency(&agency).await {
                Ok(id) => {
                    slug_to_id.insert(meta.slug.clone(), id);
                    stats.imported += 1;
                    stack.extend(meta.children.iter().rev().map(|child| (child, Some(id))));
                }
                Err(e) => {
                    error!("Failed to insert agency {}: {:#}", meta.slug, e);
                    stats.failed += meta.subtree_len();
                }
            }
        }
        slug_to_id
    }

    async fn link_agencies(
        &self,
        roots: &[AgencyMeta],
        slug_to_id: &HashMap<String, i64>,
        stats: &mut AgencyStats,
    ) {
        let mut stack: Vec<&AgencyMeta> = roots.iter().collect();
        while let Some(meta) = stack.pop() {
            stack.extend(meta.children.iter());
            let Some(&agency_id) = slug_to_id.get(&meta.slug) else {
                continue;
            };
            for reference in &meta.cfr_references {
                match self.store.link_agency_title(agency_id, reference.title).await {
                    Ok(()) => stats.links += 1,
                    Err(e) => {
                        warn!(
                            "Failed to link agency {} to title {}: {:#}",
                            meta.slug, reference.title, e
                        );
                        stats.link_failures += 1;
                    }
                }
            }
        }
    }

    /// Aggregate every stored agency, persist the current aggregate, and
    /// snapshot it if it changed for `snapshot_date`.
    async fn rollup_agencies(
        &self,
        snapshot_date: NaiveDate,
        stats: &mut AgencyStats,
    ) -> Result<()> {
        let agencies = self
            .store
            .list_agencies()
            .await
            .context("failed to list agencies")?;
        let links = self
            .store
            .agency_title_links()
            .await
            .context("failed to list agency links")?;
        let word_counts: HashMap<i64, i64> = self
            .store
            .list_titles()
            .await
            .context("failed to list titles")?
            .into_iter()
            .map(|t| (t.number, t.word_count))
            .collect();

        let pairs: Vec<(i64, Option<i64>)> = agencies.iter().map(|a| (a.id, a.parent_id)).collect();
        let forest = Forest::new(&pairs, &links).context("invalid agency hierarchy")?;
        let names: HashMap<i64, &str> = agencies.iter().map(|a| (a.id, a.name.as_str())).collect();

        for rollup in forest.rollup(&word_counts) {
            let name = names.get(&rollup.agency_id).copied().unwrap_or_default();

            if let Err(e) = self.store.update_agency_rollup(&rollup).await {
                error!("Failed to update aggregate for agency {}: {:#}", name, e);
                stats.failed += 1;
                continue;
            }

            let snapshot = AgencySnapshot {
                agency_id: rollup.agency_id,
                agency_name: name.to_string(),
                total_word_count: rollup.total_word_count,
                title_count: rollup.title_count,
                checksum: rollup.checksum.clone(),
                snapshot_date,
                title_numbers: rollup.title_numbers.clone(),
            };
            match self.store.insert_agency_snapshot_if_changed(&snapshot).await {
                Ok(true) => {
                    info!(
                        "  Agency {}: {} words, {} titles (snapshot created)",
                        name, rollup.total_word_count, rollup.title_count
                    );
                    stats.snapshots_created += 1;
                }
                Ok(false) => {
                    info!(
                        "  Agency {}: {} words, {} titles (unchanged)",
                        name, rollup.total_word_count, rollup.title_count
                    );
                    stats.unchanged += 1;
                }
                Err(e) => {
                    error!("Failed to insert snapshot for agency {}: {:#}", name, e);
                    stats.failed += 1;
                }
            }
        }
        Ok(())
    }

    /// Import every available version of every title, each under its own
    /// issue date.
    pub async fn import_all_history(&self) -> Result<Outcome<HistoricalStats>> {
        let mut stats = HistoricalStats::default();

        info!("Fetching titles list...");
        let titles = match self.client.fetch_titles().await {
            Ok(titles) => titles,
            Err(e) if e.is_cancelled() => return Ok(Outcome::cancelled(stats)),
            Err(e) => return Err(anyhow::Error::new(e).context("failed to fetch titles list")),
        };
        info!("Found {} titles", titles.len());

        let mut fetched_before = false;
        for (idx, meta) in titles.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Ok(Outcome::cancelled(stats));
            }
            let progress = format!("[{}/{}]", idx + 1, titles.len());

            if meta.reserved {
                info!("{} Skipping Title {}: {} (reserved)", progress, meta.number, meta.name);
                continue;
            }

            if fetched_before && self.client.pace().await.is_err() {
                return Ok(Outcome::cancelled(stats));
            }
            fetched_before = true;

            info!("{} Fetching versions for Title {}: {}", progress, meta.number, meta.name);
            let dates = match self.client.fetch_title_versions(meta.number).await {
                Ok(versions) => {
                    stats.failed += versions.unparsed.len();
                    versions.dates
                }
                Err(e) if e.is_cancelled() => return Ok(Outcome::cancelled(stats)),
                Err(e) => {
                    error!("Failed to fetch versions for Title {}: {}", meta.number, e);
                    stats.failed += 1;
                    continue;
                }
            };
            info!("  Found {} versions for Title {}", dates.len(), meta.number);
            stats.titles_processed += 1;

            for (vidx, date) in dates.iter().enumerate() {
                if self.cancel.is_cancelled() || self.client.pace().await.is_err() {
                    return Ok(Outcome::cancelled(stats));
                }

                info!("  [{}/{}] Importing version {}", vidx + 1, dates.len(), date);
                match self.import_title(meta, *date).await {
                    Ok(changed) => {
                        stats.versions_processed += 1;
                        if changed {
                            stats.snapshots_created += 1;
                        }
                    }
                    Err(e) if is_cancellation(&e) => return Ok(Outcome::cancelled(stats)),
                    Err(e) => {
                        error!("Failed Title {} version {}: {:#}", meta.number, date, e);
                        stats.failed += 1;
                    }
                }
            }
        }

        Ok(Outcome::completed(stats))
    }
}

fn record_title(stats: &mut ImportStats, number: i64, changed: bool) {
    stats.imported += 1;
    if changed {
        info!("  Title {} changed (snapshot created)", number);
        stats.changed += 1;
    } else {
        info!("  Title {} unchanged", number);
        stats.unchanged += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate_policy() {
        let stats = ImportStats {
            total: 4,
            imported: 2,
            skipped: 2,
            ..ImportStats::default()
        };
        assert_eq!(stats.success_rate(), Some(1.0));

        let all_skipped = ImportStats {
            total: 3,
            skipped: 3,
            ..ImportStats::default()
        };
        assert_eq!(all_skipped.success_rate(), None);
        assert_eq!(ImportStats::default().success_rate(), None);
    }

    #[test]
    fn test_report_success_requires_zero_failures() {
        let mut report = RunReport {
            status: RunStatus::Completed,
            snapshot_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            titles: ImportStats::default(),
            agencies: Some(AgencyStats::default()),
            metrics: None,
            fatal: None,
        };
        assert!(report.is_success());

        report.agencies = Some(AgencyStats {
            failed: 1,
            ..AgencyStats::default()
        });
        assert!(!report.is_success());

        report.agencies = None;
        report.fatal = Some(anyhow::anyhow!("failed to fetch agencies"));
        assert!(!report.is_success());

        report.fatal = None;
        report.status = RunStatus::Cancelled;
        assert!(!report.is_success());
    }
}
