use chrono::{NaiveDate, Utc};
use tempfile::TempDir;

use cfr_ledger::config::{Config, DbConfig, LoggingConfig, SourceConfig};
use cfr_ledger::sqlite_store::SqliteStore;
use cfr_ledger::{db, migrate};
use cfr_ledger_core::models::{AgencySnapshot, Metric, MetricValue, NewAgency, Title};
use cfr_ledger_core::rollup::Rollup;
use cfr_ledger_core::store::Store;

async fn open_store() -> (TempDir, SqliteStore) {
    let tmp = TempDir::new().unwrap();
    let config = Config {
        db: DbConfig {
            path: tmp.path().join("data/cfr.sqlite"),
        },
        source: SourceConfig::default(),
        logging: LoggingConfig::default(),
    };
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    // Migrations are idempotent.
    migrate::apply(&pool).await.unwrap();
    (tmp, SqliteStore::new(pool))
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn title_a(checksum: &str) -> Title {
    Title {
        number: 1,
        name: "General Provisions".to_string(),
        word_count: 200,
        section_count: 10,
        checksum: checksum.to_string(),
        last_amended_on: Some(date(2023, 11, 30)),
        fetched_at: Utc::now(),
    }
}

fn agency(slug: &str, parent_id: Option<i64>) -> NewAgency {
    NewAgency {
        name: format!("Agency {}", slug),
        short_name: None,
        slug: slug.to_string(),
        parent_id,
    }
}

#[tokio::test]
async fn test_dated_snapshot_scenario() {
    let (_tmp, store) = open_store().await;
    let jan = date(2024, 1, 1);
    let apr = date(2024, 4, 1);

    assert!(store.save_title_with_snapshot(&title_a("X"), jan).await.unwrap());
    assert_eq!(store.list_titles().await.unwrap().len(), 1);
    assert_eq!(store.title_snapshots(1).await.unwrap().len(), 1);

    // Same content, same date: no-op.
    assert!(!store.save_title_with_snapshot(&title_a("X"), jan).await.unwrap());
    assert_eq!(store.title_snapshots(1).await.unwrap().len(), 1);

    // New content, same date: that date's row is updated in place.
    assert!(store.save_title_with_snapshot(&title_a("Y"), jan).await.unwrap());
    let snapshots = store.title_snapshots(1).await.unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].checksum, "Y");

    // Same content, new date: a second row.
    assert!(store.save_title_with_snapshot(&title_a("Y"), apr).await.unwrap());
    let snapshots = store.title_snapshots(1).await.unwrap();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].snapshot_date, apr);
    assert_eq!(snapshots[1].snapshot_date, jan);

    let current = store.get_title(1).await.unwrap().unwrap();
    assert_eq!(current.checksum, "Y");
    assert_eq!(current.word_count, 200);
    assert_eq!(current.last_amended_on, Some(date(2023, 11, 30)));
    assert_eq!(store.list_titles().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_agency_upsert_and_links() {
    let (_tmp, store) = open_store().await;

    let root = store.upsert_agency(&agency("root", None)).await.unwrap();
    let child = store.upsert_agency(&agency("child", Some(root))).await.unwrap();
    assert_ne!(root, child);

    let mut renamed = agency("child", Some(root));
    renamed.name = "Renamed".to_string();
    assert_eq!(store.upsert_agency(&renamed).await.unwrap(), child);
    let stored = store.get_agency_by_slug("child").await.unwrap().unwrap();
    assert_eq!(stored.name, "Renamed");
    assert_eq!(stored.parent_id, Some(root));
    assert_eq!(store.count_agencies().await.unwrap(), 2);

    store.link_agency_title(child, 7).await.unwrap();
    store.link_agency_title(child, 7).await.unwrap();
    store.link_agency_title(root, 3).await.unwrap();
    assert_eq!(
        store.agency_title_links().await.unwrap(),
        vec![(root, 3), (child, 7)]
    );
    store.clear_agency_titles().await.unwrap();
    assert!(store.agency_title_links().await.unwrap().is_empty());

    let rollup = Rollup {
        agency_id: root,
        total_word_count: 500,
        title_count: 2,
        checksum: "agg".to_string(),
        title_numbers: vec![3, 7],
    };
    store.update_agency_rollup(&rollup).await.unwrap();
    let stored = store.get_agency_by_slug("root").await.unwrap().unwrap();
    assert_eq!(stored.total_word_count, 500);
    assert_eq!(stored.checksum, "agg");

    let missing = Rollup {
        agency_id: 9999,
        ..rollup
    };
    assert!(store.update_agency_rollup(&missing).await.is_err());
}

#[tokio::test]
async fn test_agency_snapshot_gate_replaces_title_set() {
    let (_tmp, store) = open_store().await;
    let id = store.upsert_agency(&agency("epa", None)).await.unwrap();
    let day = date(2024, 1, 1);

    let mut snapshot = AgencySnapshot {
        agency_id: id,
        agency_name: "EPA".to_string(),
        total_word_count: 30,
        title_count: 2,
        checksum: "first".to_string(),
        snapshot_date: day,
        title_numbers: vec![40, 2],
    };
    assert!(store.insert_agency_snapshot_if_changed(&snapshot).await.unwrap());
    assert!(!store.insert_agency_snapshot_if_changed(&snapshot).await.unwrap());

    snapshot.checksum = "second".to_string();
    snapshot.title_count = 1;
    snapshot.title_numbers = vec![40];
    assert!(store.insert_agency_snapshot_if_changed(&snapshot).await.unwrap());

    let stored = store.agency_snapshots(id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].checksum, "second");
    assert_eq!(stored[0].title_numbers, vec![40]);
}

#[tokio::test]
async fn test_metrics_and_totals() {
    let (_tmp, store) = open_store().await;
    assert_eq!(store.corpus_totals().await.unwrap().titles, 0);

    store
        .save_title_with_snapshot(&title_a("X"), date(2024, 1, 1))
        .await
        .unwrap();
    let totals = store.corpus_totals().await.unwrap();
    assert_eq!(totals.titles, 1);
    assert_eq!(totals.words, 200);
    assert_eq!(totals.sections, 10);

    for (value, ts) in [(1, 100), (2, 200)] {
        store
            .record_metric(&Metric::system("total_titles", MetricValue::Integer(value), ts))
            .await
            .unwrap();
    }
    store
        .record_metric(&Metric::system("average_density", MetricValue::Float(20.5), 150))
        .await
        .unwrap();
    store
        .record_metric(&Metric::system("largest_title", MetricValue::Text("Title 1".into()), 150))
        .await
        .unwrap();

    let latest = store.latest_metrics().await.unwrap();
    assert_eq!(latest.len(), 3);
    assert_eq!(latest[0].name, "average_density");
    assert_eq!(latest[0].value, MetricValue::Float(20.5));
    assert_eq!(latest[1].value, MetricValue::Text("Title 1".to_string()));
    assert_eq!(latest[2].value, MetricValue::Integer(2));
    assert_eq!(latest[2].calculated_at, 200);
}
