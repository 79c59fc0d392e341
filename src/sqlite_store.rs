//! SQLite-backed [`Store`] implementation.
//!
//! Dates are stored as `YYYY-MM-DD` text and timestamps as unix seconds.
//! The snapshot gates run inside a transaction so the current row and its
//! dated snapshot are written together.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use cfr_ledger_core::models::{
    parse_date, Agency, AgencySnapshot, CorpusTotals, Metric, MetricValue, NewAgency, Title,
    TitleSnapshot, DATE_FORMAT,
};
use cfr_ledger_core::rollup::Rollup;
use cfr_ledger_core::store::Store;

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn date_text(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn stored_date(raw: &str) -> Result<NaiveDate> {
    parse_date(raw).ok_or_else(|| anyhow!("invalid date in database: '{}'", raw))
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

fn title_from_row(row: &SqliteRow) -> Result<Title> {
    let last_amended_on: Option<String> = row.get("last_amended_on");
    Ok(Title {
        number: row.get("number"),
        name: row.get("name"),
        word_count: row.get("word_count"),
        section_count: row.get("section_count"),
        checksum: row.get("checksum"),
        last_amended_on: last_amended_on.as_deref().and_then(parse_date),
        fetched_at: DateTime::from_timestamp(row.get("fetched_at"), 0).unwrap_or_default(),
    })
}

fn agency_from_row(row: &SqliteRow) -> Agency {
    Agency {
        id: row.get("id"),
        name: row.get("name"),
        short_name: row.get("short_name"),
        slug: row.get("slug"),
        parent_id: row.get("parent_id"),
        total_word_count: row.get("total_word_count"),
        title_count: row.get("title_count"),
        checksum: row.get("checksum"),
        updated_at: row.get("updated_at"),
    }
}

const AGENCY_COLUMNS: &str = "id, name, short_name, slug, parent_id, total_word_count, \
                              title_count, checksum, updated_at";

#[async_trait]
impl Store for SqliteStore {
    async fn save_title_with_snapshot(
        &self,
        title: &Title,
        snapshot_date: NaiveDate,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let amended = title.last_amended_on.map(date_text);
        let date = date_text(snapshot_date);

        sqlx::query(
            r#"
            INSERT INTO titles (number, name, word_count, section_count, checksum,
                                last_amended_on, fetched_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(number) DO UPDATE SET
                name = excluded.name,
                word_count = excluded.word_count,
                section_count = excluded.section_count,
                checksum = excluded.checksum,
                last_amended_on = excluded.last_amended_on,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(title.number)
        .bind(&title.name)
        .bind(title.word_count)
        .bind(title.section_count)
        .bind(&title.checksum)
        .bind(&amended)
        .bind(title.fetched_at.timestamp())
        .execute(&mut *tx)
        .await?;

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT checksum FROM title_snapshots WHERE title_number = ? AND snapshot_date = ?",
        )
        .bind(title.number)
        .bind(&date)
        .fetch_optional(&mut *tx)
        .await?;

        if existing.as_deref() == Some(title.checksum.as_str()) {
            tx.commit().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO title_snapshots (title_number, name, word_count, section_count,
                                         checksum, last_amended_on, snapshot_date)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(title_number, snapshot_date) DO UPDATE SET
                name = excluded.name,
                word_count = excluded.word_count,
                section_count = excluded.section_count,
                checksum = excluded.checksum,
                last_amended_on = excluded.last_amended_on
            "#,
        )
        .bind(title.number)
        .bind(&title.name)
        .bind(title.word_count)
        .bind(title.section_count)
        .bind(&title.checksum)
        .bind(&amended)
        .bind(&date)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn get_title(&self, number: i64) -> Result<Option<Title>> {
        let row = sqlx::query("SELECT * FROM titles WHERE number = ?")
            .bind(number)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(title_from_row).transpose()
    }

    async fn list_titles(&self) -> Result<Vec<Title>> {
        let rows = sqlx::query("SELECT * FROM titles ORDER BY number")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(title_from_row).collect()
    }

    async fn title_snapshots(&self, number: i64) -> Result<Vec<TitleSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT title_number, name, word_count, section_count, checksum,
                   last_amended_on, snapshot_date
            FROM title_snapshots
            WHERE title_number = ?
            ORDER BY snapshot_date DESC
            "#,
        )
        .bind(number)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let amended: Option<String> = row.get("last_amended_on");
                let date: String = row.get("snapshot_date");
                Ok(TitleSnapshot {
                    number: row.get("title_number"),
                    name: row.get("name"),
                    word_count: row.get("word_count"),
                    section_count: row.get("section_count"),
                    checksum: row.get("checksum"),
                    last_amended_on: amended.as_deref().and_then(parse_date),
                    snapshot_date: stored_date(&date)?,
                })
            })
            .collect()
    }

    async fn upsert_agency(&self, agency: &NewAgency) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO agencies (name, short_name, slug, parent_id, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(slug) DO UPDATE SET
                name = excluded.name,
                short_name = excluded.short_name,
                parent_id = excluded.parent_id,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(&agency.name)
        .bind(&agency.short_name)
        .bind(&agency.slug)
        .bind(agency.parent_id)
        .bind(now_ts())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn get_agency_by_slug(&self, slug: &str) -> Result<Option<Agency>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM agencies WHERE slug = ?",
            AGENCY_COLUMNS
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(agency_from_row))
    }

    async fn list_agencies(&self) -> Result<Vec<Agency>> {
        let rows = sqlx::query(&format!("SELECT {} FROM agencies ORDER BY id", AGENCY_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(agency_from_row).collect())
    }

    async fn count_agencies(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM agencies")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn link_agency_title(&self, agency_id: i64, title_number: i64) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO agency_titles (agency_id, title_number) VALUES (?, ?)")
            .bind(agency_id)
            .bind(title_number)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_agency_titles(&self) -> Result<()> {
        sqlx::query("DELETE FROM agency_titles")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn agency_title_links(&self) -> Result<Vec<(i64, i64)>> {
        let rows = sqlx::query(
            "SELECT agency_id, title_number FROM agency_titles ORDER BY agency_id, title_number",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("agency_id"), row.get("title_number")))
            .collect())
    }

    async fn update_agency_rollup(&self, rollup: &Rollup) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE agencies
            SET total_word_count = ?, title_count = ?, checksum = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(rollup.total_word_count)
        .bind(rollup.title_count)
        .bind(&rollup.checksum)
        .bind(now_ts())
        .bind(rollup.agency_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("unknown agency id {}", rollup.agency_id);
        }
        Ok(())
    }

    async fn insert_agency_snapshot_if_changed(&self, snapshot: &AgencySnapshot) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let date = date_text(snapshot.snapshot_date);

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT checksum FROM agency_snapshots WHERE agency_id = ? AND snapshot_date = ?",
        )
        .bind(snapshot.agency_id)
        .bind(&date)
        .fetch_optional(&mut *tx)
        .await?;

        if existing.as_deref() == Some(snapshot.checksum.as_str()) {
            tx.commit().await?;
            return Ok(false);
        }

        let snapshot_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO agency_snapshots (agency_id, agency_name, total_word_count,
                                          title_count, checksum, snapshot_date)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(agency_id, snapshot_date) DO UPDATE SET
                agency_name = excluded.agency_name,
                total_word_count = excluded.total_word_count,
                title_count = excluded.title_count,
                checksum = excluded.checksum
            RETURNING id
            "#,
        )
        .bind(snapshot.agency_id)
        .bind(&snapshot.agency_name)
        .bind(snapshot.total_word_count)
        .bind(snapshot.title_count)
        .bind(&snapshot.checksum)
        .bind(&date)
        .fetch_one(&mut *tx)
        .await?;

        // The title set belongs to the checksum, so replace it wholesale.
        sqlx::query("DELETE FROM agency_snapshot_titles WHERE snapshot_id = ?")
            .bind(snapshot_id)
            .execute(&mut *tx)
            .await?;

        for number in &snapshot.title_numbers {
            sqlx::query(
                "INSERT OR IGNORE INTO agency_snapshot_titles (snapshot_id, title_number) VALUES (?, ?)",
            )
            .bind(snapshot_id)
            .bind(number)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn agency_snapshots(&self, agency_id: i64) -> Result<Vec<AgencySnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT id, agency_id, agency_name, total_word_count, title_count,
                   checksum, snapshot_date
            FROM agency_snapshots
            WHERE agency_id = ?
            ORDER BY snapshot_date DESC
            "#,
        )
        .bind(agency_id)
        .fetch_all(&self.pool)
        .await?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in &rows {
            let snapshot_id: i64 = row.get("id");
            let title_numbers: Vec<i64> = sqlx::query_scalar(
                "SELECT title_number FROM agency_snapshot_titles WHERE snapshot_id = ? ORDER BY title_number",
            )
            .bind(snapshot_id)
            .fetch_all(&self.pool)
            .await?;

            let date: String = row.get("snapshot_date");
            snapshots.push(AgencySnapshot {
                agency_id: row.get("agency_id"),
                agency_name: row.get("agency_name"),
                total_word_count: row.get("total_word_count"),
                title_count: row.get("title_count"),
                checksum: row.get("checksum"),
                snapshot_date: stored_date(&date)?,
                title_numbers,
            });
        }
        Ok(snapshots)
    }

    async fn corpus_totals(&self) -> Result<CorpusTotals> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS titles,
                   COALESCE(SUM(word_count), 0) AS words,
                   COALESCE(SUM(section_count), 0) AS sections
            FROM titles
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(CorpusTotals {
            titles: row.get("titles"),
            words: row.get("words"),
            sections: row.get("sections"),
        })
    }

    async fn record_metric(&self, metric: &Metric) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO metrics (metric_name, scope, value_kind, value, calculated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&metric.name)
        .bind(&metric.scope)
        .bind(metric.value.kind())
        .bind(raw_value(&metric.value))
        .bind(metric.calculated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_metrics(&self) -> Result<Vec<Metric>> {
        let rows = sqlx::query(
            r#"
            SELECT m.metric_name, m.scope, m.value_kind, m.value, m.calculated_at
            FROM metrics m
            WHERE m.id = (
                SELECT m2.id FROM metrics m2
                WHERE m2.metric_name = m.metric_name AND m2.scope IS m.scope
                ORDER BY m2.calculated_at DESC, m2.id DESC
                LIMIT 1
            )
            ORDER BY m.metric_name, m.scope
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let kind: String = row.get("value_kind");
                let raw: String = row.get("value");
                Metric {
                    name: row.get("metric_name"),
                    scope: row.get("scope"),
                    value: MetricValue::from_parts(&kind, &raw),
                    calculated_at: row.get("calculated_at"),
                }
            })
            .collect())
    }
}

/// Text encoding of a metric value. Floats keep full precision.
fn raw_value(value: &MetricValue) -> String {
    match value {
        MetricValue::Integer(v) => v.to_string(),
        MetricValue::Float(v) => v.to_string(),
        MetricValue::Text(v) => v.clone(),
    }
}
