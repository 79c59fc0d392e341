//! Read-only listings for the presentation layer.
//!
//! [`title_rows`] and [`agency_rows`] join current state with density
//! scores (and tree depth for agencies) and sort by a caller-supplied key.
//! Nothing here writes to the store.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

use anyhow::Result;

use crate::density::{density_scores, DensityInput};
use crate::models::{Agency, Title};
use crate::rollup::Forest;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(format!("unknown sort direction '{}' (asc, desc)", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TitleSortKey {
    #[default]
    Number,
    Name,
    Words,
    Sections,
    Density,
}

impl FromStr for TitleSortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "number" => Ok(TitleSortKey::Number),
            "name" => Ok(TitleSortKey::Name),
            "words" => Ok(TitleSortKey::Words),
            "sections" => Ok(TitleSortKey::Sections),
            "density" => Ok(TitleSortKey::Density),
            other => Err(format!(
                "unknown title sort key '{}' (number, name, words, sections, density)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgencySortKey {
    /// Parents before children, as in the hierarchy.
    #[default]
    Tree,
    Name,
    Words,
    Titles,
    Density,
}

impl FromStr for AgencySortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tree" => Ok(AgencySortKey::Tree),
            "name" => Ok(AgencySortKey::Name),
            "words" => Ok(AgencySortKey::Words),
            "titles" => Ok(AgencySortKey::Titles),
            "density" => Ok(AgencySortKey::Density),
            other => Err(format!(
                "unknown agency sort key '{}' (tree, name, words, titles, density)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TitleRow {
    pub title: Title,
    /// Percentile rank of words per section, `None` without sections.
    pub density: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct AgencyRow {
    pub agency: Agency,
    /// 0 for roots.
    pub depth: usize,
    /// Percentile rank of words per reachable title, `None` without titles.
    pub density: Option<f64>,
}

/// Unscored rows sort after scored ones in either direction.
fn cmp_density(a: Option<f64>, b: Option<f64>, direction: SortDirection) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => directed(x.total_cmp(&y), direction),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn directed(ordering: Ordering, direction: SortDirection) -> Ordering {
    match direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}

/// Current titles with density scores.
pub async fn title_rows(
    store: &dyn Store,
    key: TitleSortKey,
    direction: SortDirection,
) -> Result<Vec<TitleRow>> {
    let titles = store.list_titles().await?;
    let inputs: Vec<DensityInput> = titles
        .iter()
        .map(|t| DensityInput::new(t.word_count, t.section_count))
        .collect();
    let scores = density_scores(&inputs);

    let mut rows: Vec<TitleRow> = titles
        .into_iter()
        .zip(scores)
        .map(|(title, density)| TitleRow { title, density })
        .collect();

    rows.sort_by(|a, b| {
        let primary = match key {
            TitleSortKey::Number => directed(a.title.number.cmp(&b.title.number), direction),
            TitleSortKey::Name => directed(a.title.name.cmp(&b.title.name), direction),
            TitleSortKey::Words => directed(a.title.word_count.cmp(&b.title.word_count), direction),
            TitleSortKey::Sections => {
                directed(a.title.section_count.cmp(&b.title.section_count), direction)
            }
            TitleSortKey::Density => cmp_density(a.density, b.density, direction),
        };
        primary.then(a.title.number.cmp(&b.title.number))
    });
    Ok(rows)
}

/// Current agencies with depth and density scores.
pub async fn agency_rows(
    store: &dyn Store,
    key: AgencySortKey,
    direction: SortDirection,
) -> Result<Vec<AgencyRow>> {
    let agencies = store.list_agencies().await?;
    let pairs: Vec<(i64, Option<i64>)> = agencies.iter().map(|a| (a.id, a.parent_id)).collect();
    let forest = Forest::new(&pairs, &[])?;
    let order = forest.preorder();
    let position: HashMap<i64, (usize, usize)> = order
        .iter()
        .enumerate()
        .map(|(pos, (id, depth))| (*id, (pos, *depth)))
        .collect();

    let inputs: Vec<DensityInput> = agencies
        .iter()
        .map(|a| DensityInput::new(a.total_word_count, a.title_count))
        .collect();
    let scores = density_scores(&inputs);

    let mut rows: Vec<(usize, AgencyRow)> = agencies
        .into_iter()
        .zip(scores)
        .map(|(agency, density)| {
            let (pos, depth) = position.get(&agency.id).copied().unwrap_or((usize::MAX, 0));
            (
                pos,
                AgencyRow {
                    agency,
                    depth,
                    density,
                },
            )
        })
        .collect();

    rows.sort_by(|(pa, a), (pb, b)| {
        let primary = match key {
            AgencySortKey::Tree => directed(pa.cmp(pb), direction),
            AgencySortKey::Name => directed(a.agency.name.cmp(&b.agency.name), direction),
            AgencySortKey::Words => directed(
                a.agency.total_word_count.cmp(&b.agency.total_word_count),
                direction,
            ),
            AgencySortKey::Titles => {
                directed(a.agency.title_count.cmp(&b.agency.title_count), direction)
            }
            AgencySortKey::Density => cmp_density(a.density, b.density, direction),
        };
        primary.then(a.agency.id.cmp(&b.agency.id))
    });
    Ok(rows.into_iter().map(|(_, row)| row).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewAgency;
    use crate::rollup::Rollup;
    use crate::store::memory::InMemoryStore;
    use chrono::{NaiveDate, Utc};

    async fn seed_titles(store: &InMemoryStore) {
        let d = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        for (number, words, sections) in [(1, 1000, 10), (2, 300, 1), (3, 50, 0)] {
            let title = Title {
                number,
                name: format!("Title {}", number),
                word_count: words,
                section_count: sections,
                checksum: format!("c{}", number),
                last_amended_on: None,
                fetched_at: Utc::now(),
            };
            store.save_title_with_snapshot(&title, d).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_title_rows_by_density() {
        let store = InMemoryStore::new();
        seed_titles(&store).await;

        let rows = title_rows(&store, TitleSortKey::Density, SortDirection::Desc)
            .await
            .unwrap();
        let order: Vec<i64> = rows.iter().map(|r| r.title.number).collect();
        // Title 2 has 300 words/section, title 1 has 100; title 3 is unscored.
        assert_eq!(order, vec![2, 1, 3]);
        assert_eq!(rows[0].density, Some(1.0));
        assert_eq!(rows[1].density, Some(0.0));
        assert_eq!(rows[2].density, None);
    }

    #[tokio::test]
    async fn test_title_rows_by_words_ascending() {
        let store = InMemoryStore::new();
        seed_titles(&store).await;
        let rows = title_rows(&store, TitleSortKey::Words, SortDirection::Asc)
            .await
            .unwrap();
        let order: Vec<i64> = rows.iter().map(|r| r.title.number).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_agency_rows_tree_order_and_depth() {
        let store = InMemoryStore::new();
        let root = store
            .upsert_agency(&NewAgency {
                name: "Department".to_string(),
                short_name: None,
                slug: "dept".to_string(),
                parent_id: None,
            })
            .await
            .unwrap();
        let child = store
            .upsert_agency(&NewAgency {
                name: "Bureau".to_string(),
                short_name: Some("B".to_string()),
                slug: "bureau".to_string(),
                parent_id: Some(root),
            })
            .await
            .unwrap();
        store
            .update_agency_rollup(&Rollup {
                agency_id: child,
                total_word_count: 500,
                title_count: 1,
                checksum: "x".to_string(),
                title_numbers: vec![1],
            })
            .await
            .unwrap();

        let rows = agency_rows(&store, AgencySortKey::Tree, SortDirection::Asc)
            .await
            .unwrap();
        assert_eq!(rows[0].agency.slug, "dept");
        assert_eq!(rows[0].depth, 0);
        assert_eq!(rows[0].density, None);
        assert_eq!(rows[1].depth, 1);
        assert_eq!(rows[1].density, Some(0.5));
    }

    #[test]
    fn test_parse_sort_keys() {
        assert_eq!("DESC".parse::<SortDirection>(), Ok(SortDirection::Desc));
        assert_eq!("density".parse::<TitleSortKey>(), Ok(TitleSortKey::Density));
        assert!("bogus".parse::<AgencySortKey>().is_err());
    }
}
