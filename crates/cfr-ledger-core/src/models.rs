//! Core data models used throughout cfr-ledger.
//!
//! These types represent the titles, agencies, snapshots, and metrics that
//! flow through the import pipeline, plus the wire shapes of the remote
//! title list and agency hierarchy.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Date format used by the remote API and by the snapshot ledger.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a `YYYY-MM-DD` date, returning `None` for empty or invalid input.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

/// Current state of a regulation title.
#[derive(Debug, Clone, PartialEq)]
pub struct Title {
    pub number: i64,
    pub name: String,
    pub word_count: i64,
    pub section_count: i64,
    /// SHA-256 hex digest of the raw content bytes.
    pub checksum: String,
    pub last_amended_on: Option<NaiveDate>,
    pub fetched_at: DateTime<Utc>,
}

impl Title {
    /// The dated snapshot row this title would produce.
    pub fn snapshot(&self, snapshot_date: NaiveDate) -> TitleSnapshot {
        TitleSnapshot {
            number: self.number,
            name: self.name.clone(),
            word_count: self.word_count,
            section_count: self.section_count,
            checksum: self.checksum.clone(),
            last_amended_on: self.last_amended_on,
            snapshot_date,
        }
    }
}

/// Historical record of a title's metrics as of a snapshot date.
#[derive(Debug, Clone, PartialEq)]
pub struct TitleSnapshot {
    pub number: i64,
    pub name: String,
    pub word_count: i64,
    pub section_count: i64,
    pub checksum: String,
    pub last_amended_on: Option<NaiveDate>,
    pub snapshot_date: NaiveDate,
}

/// One entry of the remote title list.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TitleMeta {
    pub number: i64,
    pub name: String,
    #[serde(default)]
    pub latest_amended_on: Option<String>,
    #[serde(default)]
    pub latest_issue_date: Option<String>,
    #[serde(default)]
    pub reserved: bool,
}

impl TitleMeta {
    pub fn last_amended_on(&self) -> Option<NaiveDate> {
        self.latest_amended_on.as_deref().and_then(parse_date)
    }
}

/// A node of the remote agency hierarchy. Recursive through `children`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AgencyMeta {
    pub name: String,
    #[serde(default)]
    pub short_name: Option<String>,
    pub slug: String,
    #[serde(default)]
    pub children: Vec<AgencyMeta>,
    #[serde(default)]
    pub cfr_references: Vec<CfrReference>,
}

impl AgencyMeta {
    /// Number of agencies in this subtree, including `self`.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(AgencyMeta::subtree_len).sum::<usize>()
    }
}

/// A reference from an agency to a title (and a chapter within it).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CfrReference {
    pub title: i64,
    #[serde(default)]
    pub chapter: Option<String>,
}

/// Current state of an agency, including its rolled-up aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct Agency {
    pub id: i64,
    pub name: String,
    pub short_name: Option<String>,
    pub slug: String,
    pub parent_id: Option<i64>,
    /// Sum of word counts over every distinct title reachable from this agency.
    pub total_word_count: i64,
    /// Number of distinct titles reachable from this agency.
    pub title_count: i64,
    pub checksum: String,
    pub updated_at: i64,
}

/// Agency fields supplied by a hierarchy import. The store assigns the id
/// and keeps the aggregate columns until the rollup overwrites them.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAgency {
    pub name: String,
    pub short_name: Option<String>,
    pub slug: String,
    pub parent_id: Option<i64>,
}

/// Historical aggregate for an agency, plus the titles that contributed to it.
#[derive(Debug, Clone, PartialEq)]
pub struct AgencySnapshot {
    pub agency_id: i64,
    pub agency_name: String,
    pub total_word_count: i64,
    pub title_count: i64,
    pub checksum: String,
    pub snapshot_date: NaiveDate,
    /// Ascending title numbers.
    pub title_numbers: Vec<i64>,
}

/// Corpus-wide sums over the current title table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorpusTotals {
    pub titles: i64,
    pub words: i64,
    pub sections: i64,
}

/// Typed value of a [`Metric`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl MetricValue {
    /// Storage tag for the value's type.
    pub fn kind(&self) -> &'static str {
        match self {
            MetricValue::Integer(_) => "integer",
            MetricValue::Float(_) => "float",
            MetricValue::Text(_) => "text",
        }
    }

    /// Rebuild a value from its storage tag and text encoding.
    ///
    /// Unknown tags and unparseable numbers fall back to `Text`.
    pub fn from_parts(kind: &str, raw: &str) -> Self {
        match kind {
            "integer" => raw
                .parse()
                .map(MetricValue::Integer)
                .unwrap_or_else(|_| MetricValue::Text(raw.to_string())),
            "float" => raw
                .parse()
                .map(MetricValue::Float)
                .unwrap_or_else(|_| MetricValue::Text(raw.to_string())),
            _ => MetricValue::Text(raw.to_string()),
        }
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricValue::Integer(v) => write!(f, "{}", v),
            MetricValue::Float(v) => write!(f, "{:.2}", v),
            MetricValue::Text(v) => f.write_str(v),
        }
    }
}

/// A named, timestamped scalar in the metric time series.
///
/// `scope` is `None` for system-wide metrics, or an entity key such as
/// `"agency:environmental-protection-agency"`.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    pub scope: Option<String>,
    pub value: MetricValue,
    pub calculated_at: i64,
}

impl Metric {
    pub fn system(name: &str, value: MetricValue, calculated_at: i64) -> Self {
        Self {
            name: name.to_string(),
            scope: None,
            value,
            calculated_at,
        }
    }
}
