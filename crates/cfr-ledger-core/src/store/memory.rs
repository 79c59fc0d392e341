//! In-memory [`Store`] implementation for tests and dry runs.
//!
//! All state lives in one `State` behind a `std::sync::RwLock`, so each
//! trait call is atomic with respect to the others. Ids are assigned from a
//! counter starting at 1, matching SQLite rowids.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::models::{
    Agency, AgencySnapshot, CorpusTotals, Metric, NewAgency, Title, TitleSnapshot,
};
use crate::rollup::Rollup;

use super::Store;

#[derive(Default)]
struct State {
    titles: BTreeMap<i64, Title>,
    title_snapshots: BTreeMap<(i64, NaiveDate), TitleSnapshot>,
    agencies: BTreeMap<i64, Agency>,
    slugs: HashMap<String, i64>,
    next_agency_id: i64,
    links: BTreeSet<(i64, i64)>,
    agency_snapshots: BTreeMap<(i64, NaiveDate), AgencySnapshot>,
    metrics: Vec<Metric>,
}

/// In-memory store for testing.
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State {
                next_agency_id: 1,
                ..State::default()
            }),
        }
    }

    /// Number of stored title snapshots across all titles.
    pub fn title_snapshot_count(&self) -> usize {
        self.state.read().unwrap().title_snapshots.len()
    }

    /// Number of stored agency snapshots across all agencies.
    pub fn agency_snapshot_count(&self) -> usize {
        self.state.read().unwrap().agency_snapshots.len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl Store for InMemoryStore {
    async fn save_title_with_snapshot(
        &self,
        title: &Title,
        snapshot_date: NaiveDate,
    ) -> Result<bool> {
        let mut state = self.state.write().unwrap();
        state.titles.insert(title.number, title.clone());

        let key = (title.number, snapshot_date);
        let unchanged = state
            .title_snapshots
            .get(&key)
            .is_some_and(|s| s.checksum == title.checksum);
        if unchanged {
            return Ok(false);
        }
        state
            .title_snapshots
            .insert(key, title.snapshot(snapshot_date));
        Ok(true)
    }

    async fn get_title(&self, number: i64) -> Result<Option<Title>> {
        Ok(self.state.read().unwrap().titles.get(&number).cloned())
    }

    async fn list_titles(&self) -> Result<Vec<Title>> {
        Ok(self.state.read().unwrap().titles.values().cloned().collect())
    }

    async fn title_snapshots(&self, number: i64) -> Result<Vec<TitleSnapshot>> {
        let state = self.state.read().unwrap();
        Ok(state
            .title_snapshots
            .range((number, NaiveDate::MIN)..=(number, NaiveDate::MAX))
            .rev()
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn upsert_agency(&self, agency: &NewAgency) -> Result<i64> {
        let mut state = self.state.write().unwrap();
        let ts = now_ts();

        if let Some(&id) = state.slugs.get(&agency.slug) {
            let existing = state
                .agencies
                .get_mut(&id)
                .ok_or_else(|| anyhow!("slug index points at missing agency {}", id))?;
            existing.name = agency.name.clone();
            existing.short_name = agency.short_name.clone();
            existing.parent_id = agency.parent_id;
            existing.updated_at = ts;
            return Ok(id);
        }

        let id = state.next_agency_id;
        state.next_agency_id += 1;
        state.slugs.insert(agency.slug.clone(), id);
        state.agencies.insert(
            id,
            Agency {
                id,
                name: agency.name.clone(),
                short_name: agency.short_name.clone(),
                slug: agency.slug.clone(),
                parent_id: agency.parent_id,
                total_word_count: 0,
                title_count: 0,
                checksum: String::new(),
                updated_at: ts,
            },
        );
        Ok(id)
    }

    async fn get_agency_by_slug(&self, slug: &str) -> Result<Option<Agency>> {
        let state = self.state.read().unwrap();
        Ok(state
            .slugs
            .get(slug)
            .and_then(|id| state.agencies.get(id))
            .cloned())
    }

    async fn list_agencies(&self) -> Result<Vec<Agency>> {
        Ok(self.state.read().unwrap().agencies.values().cloned().collect())
    }

    async fn count_agencies(&self) -> Result<i64> {
        Ok(self.state.read().unwrap().agencies.len() as i64)
    }

    async fn link_agency_title(&self, agency_id: i64, title_number: i64) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if !state.agencies.contains_key(&agency_id) {
            return Err(anyhow!("unknown agency id {}", agency_id));
        }
        state.links.insert((agency_id, title_number));
        Ok(())
    }

    async fn clear_agency_titles(&self) -> Result<()> {
        self.state.write().unwrap().links.clear();
        Ok(())
    }

    async fn agency_title_links(&self) -> Result<Vec<(i64, i64)>> {
        Ok(self.state.read().unwrap().links.iter().copied().collect())
    }

    async fn update_agency_rollup(&self, rollup: &Rollup) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let agency = state
            .agencies
            .get_mut(&rollup.agency_id)
            .ok_or_else(|| anyhow!("unknown agency id {}", rollup.agency_id))?;
        agency.total_word_count = rollup.total_word_count;
        agency.title_count = rollup.title_count;
        agency.checksum = rollup.checksum.clone();
        agency.updated_at = now_ts();
        Ok(())
    }

    async fn insert_agency_snapshot_if_changed(&self, snapshot: &AgencySnapshot) -> Result<bool> {
        let mut state = self.state.write().unwrap();
        let key = (snapshot.agency_id, snapshot.snapshot_date);
        let unchanged = state
            .agency_snapshots
            .get(&key)
            .is_some_and(|s| s.checksum == snapshot.checksum);
        if unchanged {
            return Ok(false);
        }
        let mut stored = snapshot.clone();
        stored.title_numbers.sort_unstable();
        stored.title_numbers.dedup();
        state.agency_snapshots.insert(key, stored);
        Ok(true)
    }

    async fn agency_snapshots(&self, agency_id: i64) -> Result<Vec<AgencySnapshot>> {
        let state = self.state.read().unwrap();
        Ok(state
            .agency_snapshots
            .range((agency_id, NaiveDate::MIN)..=(agency_id, NaiveDate::MAX))
            .rev()
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn corpus_totals(&self) -> Result<CorpusTotals> {
        let state = self.state.read().unwrap();
        Ok(state
            .titles
            .values()
            .fold(CorpusTotals::default(), |acc, t| CorpusTotals {
                titles: acc.titles + 1,
                words: acc.words + t.word_count,
                sections: acc.sections + t.section_count,
            }))
    }

    async fn record_metric(&self, metric: &Metric) -> Result<()> {
        self.state.write().unwrap().metrics.push(metric.clone());
        Ok(())
    }

    async fn latest_metrics(&self) -> Result<Vec<Metric>> {
        let state = self.state.read().unwrap();
        let mut latest: BTreeMap<(String, Option<String>), &Metric> = BTreeMap::new();
        for metric in &state.metrics {
            let key = (metric.name.clone(), metric.scope.clone());
            match latest.get(&key) {
                Some(current) if current.calculated_at > metric.calculated_at => {}
                _ => {
                    latest.insert(key, metric);
                }
            }
        }
        Ok(latest.into_values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricValue;
    use chrono::Utc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn title(number: i64, words: i64, checksum: &str) -> Title {
        Title {
            number,
            name: format!("Title {}", number),
            word_count: words,
            section_count: 10,
            checksum: checksum.to_string(),
            last_amended_on: None,
            fetched_at: Utc::now(),
        }
    }

    fn agency(slug: &str, parent_id: Option<i64>) -> NewAgency {
        NewAgency {
            name: slug.to_uppercase(),
            short_name: None,
            slug: slug.to_string(),
            parent_id,
        }
    }

    #[tokio::test]
    async fn test_snapshot_gate_per_date() {
        let store = InMemoryStore::new();
        let jan = date(2024, 1, 1);
        let apr = date(2024, 4, 1);

        assert!(store.save_title_with_snapshot(&title(1, 200, "X"), jan).await.unwrap());
        assert!(!store.save_title_with_snapshot(&title(1, 200, "X"), jan).await.unwrap());
        assert_eq!(store.title_snapshot_count(), 1);

        // Different content on the same date replaces that date's row.
        assert!(store.save_title_with_snapshot(&title(1, 210, "Y"), jan).await.unwrap());
        let snaps = store.title_snapshots(1).await.unwrap();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].checksum, "Y");
        assert_eq!(snaps[0].word_count, 210);

        assert!(store.save_title_with_snapshot(&title(1, 210, "Y"), apr).await.unwrap());
        let snaps = store.title_snapshots(1).await.unwrap();
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0].snapshot_date, apr);
        assert_eq!(store.list_titles().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_agency_by_slug_keeps_id_and_aggregate() {
        let store = InMemoryStore::new();
        let id = store.upsert_agency(&agency("epa", None)).await.unwrap();
        store
            .update_agency_rollup(&Rollup {
                agency_id: id,
                total_word_count: 99,
                title_count: 1,
                checksum: "c".to_string(),
                title_numbers: vec![40],
            })
            .await
            .unwrap();

        let mut renamed = agency("epa", None);
        renamed.name = "Environmental Protection Agency".to_string();
        assert_eq!(store.upsert_agency(&renamed).await.unwrap(), id);

        let stored = store.get_agency_by_slug("epa").await.unwrap().unwrap();
        assert_eq!(stored.name, "Environmental Protection Agency");
        assert_eq!(stored.total_word_count, 99);
        assert_eq!(store.count_agencies().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_links_are_a_set() {
        let store = InMemoryStore::new();
        let id = store.upsert_agency(&agency("a", None)).await.unwrap();
        store.link_agency_title(id, 7).await.unwrap();
        store.link_agency_title(id, 7).await.unwrap();
        assert_eq!(store.agency_title_links().await.unwrap(), vec![(id, 7)]);
        assert!(store.link_agency_title(id + 1, 7).await.is_err());

        store.clear_agency_titles().await.unwrap();
        assert!(store.agency_title_links().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_agency_snapshot_gate() {
        let store = InMemoryStore::new();
        let id = store.upsert_agency(&agency("a", None)).await.unwrap();
        let snap = AgencySnapshot {
            agency_id: id,
            agency_name: "A".to_string(),
            total_word_count: 10,
            title_count: 2,
            checksum: "agg".to_string(),
            snapshot_date: date(2024, 1, 1),
            title_numbers: vec![3, 1],
        };
        assert!(store.insert_agency_snapshot_if_changed(&snap).await.unwrap());
        assert!(!store.insert_agency_snapshot_if_changed(&snap).await.unwrap());

        let stored = store.agency_snapshots(id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].title_numbers, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_latest_metric_per_name() {
        let store = InMemoryStore::new();
        store
            .record_metric(&Metric::system("total_words", MetricValue::Integer(1), 100))
            .await
            .unwrap();
        store
            .record_metric(&Metric::system("total_words", MetricValue::Integer(2), 200))
            .await
            .unwrap();
        store
            .record_metric(&Metric::system("avg_density", MetricValue::Float(0.5), 100))
            .await
            .unwrap();

        let latest = store.latest_metrics().await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].name, "avg_density");
        assert_eq!(latest[1].value, MetricValue::Integer(2));
    }

    #[tokio::test]
    async fn test_corpus_totals() {
        let store = InMemoryStore::new();
        let d = date(2024, 1, 1);
        store.save_title_with_snapshot(&title(1, 100, "a"), d).await.unwrap();
        store.save_title_with_snapshot(&title(2, 50, "b"), d).await.unwrap();
        let totals = store.corpus_totals().await.unwrap();
        assert_eq!(totals, CorpusTotals { titles: 2, words: 150, sections: 20 });
    }
}
