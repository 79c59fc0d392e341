//! Corpus-wide metrics computed after a full import.
//!
//! [`compute`] reads current state through the [`Store`]; [`record`] appends
//! one value per metric to the time series with a shared timestamp. Readers
//! use [`Store::latest_metrics`].

use anyhow::{Context, Result};

use cfr_ledger_core::models::{Metric, MetricValue};
use cfr_ledger_core::store::Store;

pub const TOTAL_TITLES: &str = "total_titles";
pub const TOTAL_WORDS: &str = "total_words";
pub const TOTAL_SECTIONS: &str = "total_sections";
pub const TOTAL_AGENCIES: &str = "total_agencies";
pub const AVERAGE_DENSITY: &str = "average_density";
pub const LARGEST_TITLE: &str = "largest_title";
pub const TOP_AGENCY: &str = "top_agency";

/// A named entity and its word count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leader {
    pub name: String,
    pub words: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemMetrics {
    pub total_titles: i64,
    pub total_words: i64,
    pub total_sections: i64,
    pub total_agencies: i64,
    /// Words per section across the corpus; 0 without sections.
    pub average_density: f64,
    pub largest_title: Option<Leader>,
    /// Largest root agency by aggregate word count.
    pub top_agency: Option<Leader>,
}

pub async fn compute(store: &dyn Store) -> Result<SystemMetrics> {
    let totals = store
        .corpus_totals()
        .await
        .context("failed to calculate title totals")?;
    let total_agencies = store
        .count_agencies()
        .await
        .context("failed to count agencies")?;

    let average_density = if totals.sections > 0 {
        totals.words as f64 / totals.sections as f64
    } else {
        0.0
    };

    let largest_title = store
        .list_titles()
        .await
        .context("failed to find largest title")?
        .into_iter()
        .max_by_key(|t| (t.word_count, -t.number))
        .map(|t| Leader {
            name: t.name,
            words: t.word_count,
        });

    let top_agency = store
        .list_agencies()
        .await
        .context("failed to find top agency")?
        .into_iter()
        .filter(|a| a.parent_id.is_none())
        .max_by_key(|a| (a.total_word_count, -a.id))
        .map(|a| Leader {
            name: a.name,
            words: a.total_word_count,
        });

    Ok(SystemMetrics {
        total_titles: totals.titles,
        total_words: totals.words,
        total_sections: totals.sections,
        total_agencies,
        average_density,
        largest_title,
        top_agency,
    })
}

/// Append every metric with the same `calculated_at`. Leaders that do not
/// exist (empty corpus) are not written.
pub async fn record(store: &dyn Store, metrics: &SystemMetrics, calculated_at: i64) -> Result<()> {
    let mut values = vec![
        (TOTAL_TITLES, MetricValue::Integer(metrics.total_titles)),
        (TOTAL_WORDS, MetricValue::Integer(metrics.total_words)),
        (TOTAL_SECTIONS, MetricValue::Integer(metrics.total_sections)),
        (TOTAL_AGENCIES, MetricValue::Integer(metrics.total_agencies)),
        (AVERAGE_DENSITY, MetricValue::Float(metrics.average_density)),
    ];
    if let Some(leader) = &metrics.largest_title {
        values.push((LARGEST_TITLE, MetricValue::Text(leader.name.clone())));
    }
    if let Some(leader) = &metrics.top_agency {
        values.push((TOP_AGENCY, MetricValue::Text(leader.name.clone())));
    }

    for (name, value) in values {
        store
            .record_metric(&Metric::system(name, value, calculated_at))
            .await
            .with_context(|| format!("failed to store metric {}", name))?;
    }
    Ok(())
}

pub async fn compute_and_record(store: &dyn Store) -> Result<SystemMetrics> {
    let metrics = compute(store).await?;
    record(store, &metrics, chrono::Utc::now().timestamp()).await?;
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfr_ledger_core::models::{NewAgency, Title};
    use cfr_ledger_core::rollup::Rollup;
    use cfr_ledger_core::store::memory::InMemoryStore;
    use chrono::{NaiveDate, Utc};

    async fn seed(store: &InMemoryStore) {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        for (number, words, sections) in [(1, 400, 4), (2, 600, 1)] {
            let title = Title {
                number,
                name: format!("Title {}", number),
                word_count: words,
                section_count: sections,
                checksum: number.to_string(),
                last_amended_on: None,
                fetched_at: Utc::now(),
            };
            store.save_title_with_snapshot(&title, date).await.unwrap();
        }
        let root = store
            .upsert_agency(&NewAgency {
                name: "Root".to_string(),
                short_name: None,
                slug: "root".to_string(),
                parent_id: None,
            })
            .await
            .unwrap();
        let child = store
            .upsert_agency(&NewAgency {
                name: "Child".to_string(),
                short_name: None,
                slug: "child".to_string(),
                parent_id: Some(root),
            })
            .await
            .unwrap();
        for (id, words) in [(root, 600), (child, 900)] {
            store
                .update_agency_rollup(&Rollup {
                    agency_id: id,
                    total_word_count: words,
                    title_count: 1,
                    checksum: String::new(),
                    title_numbers: vec![],
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_compute_over_corpus() {
        let store = InMemoryStore::new();
        seed(&store).await;

        let m = compute(&store).await.unwrap();
        assert_eq!(m.total_titles, 2);
        assert_eq!(m.total_words, 1000);
        assert_eq!(m.total_sections, 5);
        assert_eq!(m.total_agencies, 2);
        assert!((m.average_density - 200.0).abs() < f64::EPSILON);
        assert_eq!(m.largest_title.unwrap().name, "Title 2");
        // Only roots compete for top agency.
        assert_eq!(m.top_agency.unwrap().name, "Root");
    }

    #[tokio::test]
    async fn test_empty_corpus_records_totals_only() {
        let store = InMemoryStore::new();
        let m = compute_and_record(&store).await.unwrap();
        assert_eq!(m.average_density, 0.0);
        assert!(m.largest_title.is_none());

        let latest = store.latest_metrics().await.unwrap();
        let names: Vec<&str> = latest.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(
            names,
            vec![AVERAGE_DENSITY, TOTAL_AGENCIES, TOTAL_SECTIONS, TOTAL_TITLES, TOTAL_WORDS]
        );
    }
}
