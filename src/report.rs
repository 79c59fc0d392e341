//! User-facing summaries and read-only listings.
//!
//! Everything here prints to stdout. Pipeline progress goes through `log`
//! instead, so a quiet `RUST_LOG` still leaves the summaries visible.

use anyhow::{bail, Result};

use cfr_ledger_core::models::{Metric, DATE_FORMAT};
use cfr_ledger_core::store::Store;
use cfr_ledger_core::views::{
    agency_rows, title_rows, AgencySortKey, SortDirection, TitleSortKey,
};

use crate::import::{AgencyStats, HistoricalStats, ImportStats, RunStatus};
use crate::metrics::SystemMetrics;

/// `n/a` when there is nothing to rate.
pub fn format_rate(rate: Option<f64>) -> String {
    match rate {
        Some(r) => format!("{:.1}%", r * 100.0),
        None => "n/a".to_string(),
    }
}

fn format_score(score: Option<f64>) -> String {
    match score {
        Some(s) => format!("{:.2}", s),
        None => "-".to_string(),
    }
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

pub fn print_status(status: RunStatus) {
    if status == RunStatus::Cancelled {
        println!();
        println!("Import cancelled; progress so far has been kept.");
    }
}

pub fn print_title_summary(stats: &ImportStats) {
    println!();
    println!("=== Import Summary ===");
    println!("Total titles:    {}", stats.total);
    println!("Imported:        {}", stats.imported);
    println!("Changed:         {}", stats.changed);
    println!("Unchanged:       {}", stats.unchanged);
    println!("Skipped:         {} (reserved)", stats.skipped);
    println!("Failed:          {}", stats.failed);
    println!("Success rate:    {}", format_rate(stats.success_rate()));
}

pub fn print_agency_summary(stats: &AgencyStats) {
    println!();
    println!("=== Agency Import Summary ===");
    println!("Total agencies:  {}", stats.total);
    println!("Imported:        {}", stats.imported);
    println!("Failed:          {}", stats.failed);
    println!("Title links:     {} ({} failed)", stats.links, stats.link_failures);
    println!("Snapshots:       {} created, {} unchanged", stats.snapshots_created, stats.unchanged);
}

pub fn print_history_summary(stats: &HistoricalStats) {
    println!();
    println!("=== Historical Import Summary ===");
    println!("Titles processed:   {}", stats.titles_processed);
    println!("Versions processed: {}", stats.versions_processed);
    println!("Snapshots created:  {}", stats.snapshots_created);
    println!("Failed:             {}", stats.failed);
}

pub fn print_system_metrics(metrics: &SystemMetrics) {
    println!();
    println!("=== System Metrics ===");
    println!("Total titles:     {}", metrics.total_titles);
    println!("Total words:      {}", metrics.total_words);
    println!("Total sections:   {}", metrics.total_sections);
    println!("Total agencies:   {}", metrics.total_agencies);
    println!("Average density:  {:.2} words/section", metrics.average_density);
    if let Some(t) = &metrics.largest_title {
        println!("Largest title:    {} ({} words)", t.name, t.words);
    }
    if let Some(a) = &metrics.top_agency {
        println!("Top agency:       {} ({} words)", a.name, a.words);
    }
}

pub async fn print_titles(
    store: &dyn Store,
    key: TitleSortKey,
    direction: SortDirection,
) -> Result<()> {
    let rows = title_rows(store, key, direction).await?;
    if rows.is_empty() {
        println!("No titles imported yet.");
        return Ok(());
    }

    println!(
        "{:>5}  {:<48} {:>12} {:>9} {:>8}  {}",
        "TITLE", "NAME", "WORDS", "SECTIONS", "DENSITY", "AMENDED"
    );
    println!("{}", "-".repeat(98));
    for row in &rows {
        let t = &row.title;
        let amended = t
            .last_amended_on
            .map(|d| d.format(DATE_FORMAT).to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>5}  {:<48} {:>12} {:>9} {:>8}  {}",
            t.number,
            truncate(&t.name, 48),
            t.word_count,
            t.section_count,
            format_score(row.density),
            amended
        );
    }
    Ok(())
}

pub async fn print_agencies(
    store: &dyn Store,
    key: AgencySortKey,
    direction: SortDirection,
) -> Result<()> {
    let rows = agency_rows(store, key, direction).await?;
    if rows.is_empty() {
        println!("No agencies imported yet.");
        return Ok(());
    }

    println!(
        "{:<56} {:>12} {:>7} {:>8}",
        "AGENCY", "WORDS", "TITLES", "DENSITY"
    );
    println!("{}", "-".repeat(86));
    for row in &rows {
        let indent = if key == AgencySortKey::Tree {
            "  ".repeat(row.depth)
        } else {
            String::new()
        };
        let label = format!("{}{}", indent, row.agency.name);
        println!(
            "{:<56} {:>12} {:>7} {:>8}",
            truncate(&label, 56),
            row.agency.total_word_count,
            row.agency.title_count,
            format_score(row.density)
        );
    }
    Ok(())
}

pub async fn print_title_history(store: &dyn Store, number: i64) -> Result<()> {
    let Some(title) = store.get_title(number).await? else {
        bail!("title {} has not been imported", number);
    };
    let snapshots = store.title_snapshots(number).await?;

    println!("Title {}: {}", title.number, title.name);
    println!();
    println!("{:<12} {:>12} {:>9}  {}", "DATE", "WORDS", "SECTIONS", "CHECKSUM");
    for s in &snapshots {
        println!(
            "{:<12} {:>12} {:>9}  {}",
            s.snapshot_date.format(DATE_FORMAT),
            s.word_count,
            s.section_count,
            short_checksum(&s.checksum)
        );
    }
    Ok(())
}

pub async fn print_agency_history(store: &dyn Store, slug: &str) -> Result<()> {
    let Some(agency) = store.get_agency_by_slug(slug).await? else {
        bail!("agency '{}' has not been imported", slug);
    };
    let snapshots = store.agency_snapshots(agency.id).await?;

    println!("{} ({})", agency.name, agency.slug);
    println!();
    println!("{:<12} {:>12} {:>7}  {}", "DATE", "WORDS", "TITLES", "MEMBERS");
    for s in &snapshots {
        let members: Vec<String> = s.title_numbers.iter().map(|n| n.to_string()).collect();
        println!(
            "{:<12} {:>12} {:>7}  {}",
            s.snapshot_date.format(DATE_FORMAT),
            s.total_word_count,
            s.title_count,
            members.join(",")
        );
    }
    Ok(())
}

pub async fn print_stats(store: &dyn Store) -> Result<()> {
    let metrics: Vec<Metric> = store.latest_metrics().await?;

    println!("cfr-ledger: latest metrics");
    println!("==========================");
    if metrics.is_empty() {
        println!();
        println!("  No metrics recorded yet. Run `cfr import` first.");
        return Ok(());
    }

    println!();
    for m in &metrics {
        let name = match &m.scope {
            Some(scope) => format!("{} [{}]", m.name, scope),
            None => m.name.clone(),
        };
        println!("  {:<24} {:<40} {}", name, m.value.to_string(), format_ts(m.calculated_at));
    }
    Ok(())
}

fn short_checksum(checksum: &str) -> &str {
    checksum.get(..12).unwrap_or(checksum)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
