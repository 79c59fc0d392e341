//! Fetch client for the remote regulation source.
//!
//! Every request goes through [`FetchClient::fetch_with_retry`]:
//!
//! - Up to `max_attempts` attempts per URL.
//! - Transport failures, HTTP 429 and any other non-2xx status are retried.
//! - Backoff starts at `initial_backoff` and doubles after each failure.
//! - Backoff waits and in-flight requests race the shared [`Cancellation`];
//!   a fired signal returns [`FetchError::Cancelled`] immediately instead of
//!   an exhaustion error.
//!
//! Sequential document fetches are additionally spaced by
//! [`FetchClient::pace`].
//!
//! JSON bodies are decoded into the wire types from
//! [`cfr_ledger_core::models`]. Decode failures are not retried.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use log::{debug, warn};
use serde::Deserialize;
use thiserror::Error;

use cfr_ledger_core::models::{parse_date, AgencyMeta, TitleMeta, DATE_FORMAT};

use crate::cancel::Cancellation;
use crate::config::SourceConfig;
use crate::transport::{RawResponse, Transport};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected status code: {0}")]
    Status(u16),

    #[error("rate limited (HTTP 429)")]
    RateLimited,

    #[error("cancelled")]
    Cancelled,

    #[error("failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<FetchError>,
    },

    #[error("failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

/// Attempt budget and timing for remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub request_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(source: &SourceConfig) -> Self {
        Self {
            max_attempts: source.max_attempts,
            initial_backoff: source.initial_backoff(),
            request_delay: source.request_delay(),
        }
    }

    /// No waiting at all. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            request_delay: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SourceConfig::default())
    }
}

/// Base URLs of the two remote APIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub base_url: String,
    pub admin_base_url: String,
}

impl Endpoints {
    pub fn from_config(source: &SourceConfig) -> Self {
        Self {
            base_url: source.base_url.trim_end_matches('/').to_string(),
            admin_base_url: source.admin_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn titles(&self) -> String {
        format!("{}/titles.json", self.base_url)
    }

    pub fn title_content(&self, date: NaiveDate, number: i64) -> String {
        format!(
            "{}/full/{}/title-{}.xml",
            self.base_url,
            date.format(DATE_FORMAT),
            number
        )
    }

    pub fn title_versions(&self, number: i64) -> String {
        format!("{}/versions/title-{}.json", self.base_url, number)
    }

    pub fn agencies(&self) -> String {
        format!("{}/agencies.json", self.admin_base_url)
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::from_config(&SourceConfig::default())
    }
}

#[derive(Deserialize)]
struct TitlesResponse {
    #[serde(default)]
    titles: Vec<TitleMeta>,
}

#[derive(Deserialize)]
struct AgenciesResponse {
    #[serde(default)]
    agencies: Vec<AgencyMeta>,
}

#[derive(Deserialize)]
struct VersionsResponse {
    #[serde(default)]
    content_versions: Vec<ContentVersion>,
}

#[derive(Deserialize)]
struct ContentVersion {
    date: String,
}

/// Version list of one title.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionDates {
    pub dates: Vec<NaiveDate>,
    pub unparsed: Vec<String>,
}

#[derive(Clone)]
pub struct FetchClient {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    endpoints: Endpoints,
    cancel: Cancellation,
}

impl FetchClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
        endpoints: Endpoints,
        cancel: Cancellation,
    ) -> Self {
        Self {
            transport,
            policy,
            endpoints,
            cancel,
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// GET `url`, retrying transient failures with exponential backoff.
    pub async fn fetch_with_retry(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut backoff = self.policy.initial_backoff;
        let mut last = None;

        for attempt in 0..attempts {
            if self.cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            if attempt > 0 {
                debug!(
                    "retrying {} in {:?} (attempt {}/{})",
                    url,
                    backoff,
                    attempt + 1,
                    attempts
                );
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = backoff.saturating_mul(2);
            }

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
                outcome = self.transport.get(url) => outcome,
            };

            let err = match outcome {
                Ok(RawResponse { status, body }) if (200..300).contains(&status) => return Ok(body),
                Ok(RawResponse { status: 429, .. }) => FetchError::RateLimited,
                Ok(RawResponse { status, .. }) => FetchError::Status(status),
                Err(e) => e,
            };
            warn!("GET {} failed (attempt {}/{}): {}", url, attempt + 1, attempts, err);
            last = Some(err);
        }

        Err(FetchError::Exhausted {
            attempts,
            last: Box::new(last.unwrap_or(FetchError::Network("no attempt made".to_string()))),
        })
    }

    /// Wait the inter-request delay, or return early on cancellation.
    pub async fn pace(&self) -> Result<(), FetchError> {
        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        if self.policy.request_delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FetchError::Cancelled),
            _ = tokio::time::sleep(self.policy.request_delay) => Ok(()),
        }
    }

    pub async fn fetch_titles(&self) -> Result<Vec<TitleMeta>, FetchError> {
        let body = self.fetch_with_retry(&self.endpoints.titles()).await?;
        let resp: TitlesResponse = serde_json::from_slice(&body)
            .map_err(|source| FetchError::Decode {
                what: "title list",
                source,
            })?;
        Ok(resp.titles)
    }

    pub async fn fetch_title_content(
        &self,
        date: NaiveDate,
        number: i64,
    ) -> Result<Vec<u8>, FetchError> {
        self.fetch_with_retry(&self.endpoints.title_content(date, number))
            .await
    }

    pub async fn fetch_agencies(&self) -> Result<Vec<AgencyMeta>, FetchError> {
        let body = self.fetch_with_retry(&self.endpoints.agencies()).await?;
        let resp: AgenciesResponse = serde_json::from_slice(&body)
            .map_err(|source| FetchError::Decode {
                what: "agency hierarchy",
                source,
            })?;
        Ok(resp.agencies)
    }

    /// Issue dates of a title, ascending and de-duplicated. Dates that do
    /// not parse are returned separately in [`VersionDates::unparsed`].
    pub async fn fetch_title_versions(&self, number: i64) -> Result<VersionDates, FetchError> {
        let body = self
            .fetch_with_retry(&self.endpoints.title_versions(number))
            .await?;
        let resp: VersionsResponse = serde_json::from_slice(&body)
            .map_err(|source| FetchError::Decode {
                what: "version list",
                source,
            })?;

        let mut versions = VersionDates::default();
        for version in resp.content_versions {
            match parse_date(&version.date) {
                Some(date) => versions.dates.push(date),
                None => {
                    warn!("Title {} lists unparseable version date '{}'", number, version.date);
                    versions.unparsed.push(version.date);
                }
            }
        }
        versions.dates.sort_unstable();
        versions.dates.dedup();
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Scripted, ScriptedTransport};
    use std::time::Instant;

    const URL: &str = "https://example.test/doc";

    fn client(
        transport: Arc<ScriptedTransport>,
        policy: RetryPolicy,
    ) -> (FetchClient, Cancellation) {
        let cancel = Cancellation::new();
        let endpoints = Endpoints {
            base_url: "https://example.test/v1".to_string(),
            admin_base_url: "https://example.test/admin".to_string(),
        };
        (
            FetchClient::new(transport, policy, endpoints, cancel.clone()),
            cancel,
        )
    }

    #[tokio::test]
    async fn test_first_success_returns_immediately() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.ok(URL, "body");
        let (client, _) = client(transport.clone(), RetryPolicy::immediate(3));

        assert_eq!(client.fetch_with_retry(URL).await.unwrap(), b"body".to_vec());
        assert_eq!(transport.call_count(URL), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .status(URL, 503)
            .push(URL, Scripted::NetworkError("reset".to_string()))
            .ok(URL, "late");
        let (client, _) = client(transport.clone(), RetryPolicy::immediate(3));

        assert_eq!(client.fetch_with_retry(URL).await.unwrap(), b"late".to_vec());
        assert_eq!(transport.call_count(URL), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_wraps_last_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.status(URL, 429);
        let (client, _) = client(transport.clone(), RetryPolicy::immediate(3));

        let err = client.fetch_with_retry(URL).await.unwrap_err();
        match err {
            FetchError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, FetchError::RateLimited));
            }
            other => panic!("expected Exhausted, got {:?}", other),
        }
        assert_eq!(transport.call_count(URL), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_retried_too() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.status(URL, 404);
        let (client, _) = client(transport.clone(), RetryPolicy::immediate(2));

        let err = client.fetch_with_retry(URL).await.unwrap_err();
        assert!(err.to_string().contains("unexpected status code: 404"));
        assert_eq!(transport.call_count(URL), 2);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_returns_promptly() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.status(URL, 500);
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(30),
            request_delay: Duration::ZERO,
        };
        let (client, cancel) = client(transport.clone(), policy);

        let started = Instant::now();
        let fetch = tokio::spawn(async move { client.fetch_with_retry(URL).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let err = fetch.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(transport.call_count(URL), 1);
    }

    #[tokio::test]
    async fn test_cancel_abandons_in_flight_request() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(URL, Scripted::Hang);
        let (client, cancel) = client(transport.clone(), RetryPolicy::immediate(3));

        let fetch = tokio::spawn(async move { client.fetch_with_retry(URL).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let err = tokio::time::timeout(Duration::from_secs(5), fetch)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_request() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.ok(URL, "body");
        let (client, cancel) = client(transport.clone(), RetryPolicy::immediate(3));
        cancel.cancel();

        assert!(client.fetch_with_retry(URL).await.unwrap_err().is_cancelled());
        assert!(client.pace().await.unwrap_err().is_cancelled());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pacing_wait() {
        let transport = Arc::new(ScriptedTransport::new());
        let policy = RetryPolicy {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            request_delay: Duration::from_secs(30),
        };
        let (client, cancel) = client(transport, policy);

        let started = Instant::now();
        let pacing = tokio::spawn(async move { client.pace().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let err = tokio::time::timeout(Duration::from_secs(5), pacing)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_decode_failure_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        let (client, _) = client(transport.clone(), RetryPolicy::immediate(3));
        let url = client.endpoints().titles();
        transport.ok(url.clone(), "not json");

        let err = client.fetch_titles().await.unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }));
        assert_eq!(transport.call_count(&url), 1);
    }

    #[tokio::test]
    async fn test_versions_are_sorted_and_deduplicated() {
        let transport = Arc::new(ScriptedTransport::new());
        let (client, _) = client(transport.clone(), RetryPolicy::immediate(1));
        transport.ok(
            client.endpoints().title_versions(7),
            r#"{"content_versions": [
                {"date": "2024-03-01", "identifier": "1"},
                {"date": "2023-01-15", "identifier": "2"},
                {"date": "2024-03-01", "identifier": "3"},
                {"date": "garbage", "identifier": "4"}
            ]}"#,
        );

        let versions = client.fetch_title_versions(7).await.unwrap();
        assert_eq!(
            versions.dates,
            vec![
                NaiveDate::from_ymd_opt(2023, 1, 15).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            ]
        );
        assert_eq!(versions.unparsed, vec!["garbage".to_string()]);
    }

    #[test]
    fn test_endpoint_urls() {
        let endpoints = Endpoints::default();
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(
            endpoints.title_content(date, 40),
            "https://www.ecfr.gov/api/versioner/v1/full/2024-01-01/title-40.xml"
        );
        assert_eq!(
            endpoints.agencies(),
            "https://www.ecfr.gov/api/admin/v1/agencies.json"
        );
    }
}
