//! HTTP transport seam for the fetch client.
//!
//! [`Transport`] performs exactly one GET and reports the status and body
//! without judging them; retry, backoff and cancellation live in
//! [`FetchClient`](crate::client::FetchClient). Two implementations:
//!
//! - [`HttpTransport`]: reqwest with a request timeout and user agent.
//! - [`ScriptedTransport`]: canned replies per URL, for tests and offline
//!   runs.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::client::FetchError;

/// Status and body of one completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue one GET. Only transport-level failures are errors, and they are
    /// always [`FetchError::Network`].
    async fn get(&self, url: &str) -> Result<RawResponse, FetchError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration, user_agent: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<RawResponse, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(RawResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// One canned reply.
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(u16, Vec<u8>),
    NetworkError(String),
    /// Never completes; only cancellation gets the caller out.
    Hang,
}

/// Replies from per-URL queues. The last reply queued for a URL repeats once
/// the queue is down to it; unknown URLs answer 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, url: impl Into<String>, reply: Scripted) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry(url.into())
            .or_default()
            .push_back(reply);
        self
    }

    /// Queue a 200 reply.
    pub fn ok(&self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> &Self {
        self.push(url, Scripted::Reply(200, body.into()))
    }

    /// Queue a reply with an arbitrary status and empty body.
    pub fn status(&self, url: impl Into<String>, status: u16) -> &Self {
        self.push(url, Scripted::Reply(status, Vec::new()))
    }

    /// Every URL requested so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == url).count()
    }

    fn next_reply(&self, url: &str) -> Scripted {
        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue
                .pop_front()
                .unwrap_or(Scripted::Reply(404, Vec::new())),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or(Scripted::Reply(404, Vec::new())),
            None => Scripted::Reply(404, Vec::new()),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &str) -> Result<RawResponse, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        match self.next_reply(url) {
            Scripted::Reply(status, body) => Ok(RawResponse { status, body }),
            Scripted::NetworkError(msg) => Err(FetchError::Network(msg)),
            Scripted::Hang => std::future::pending().await,
        }
    }
}
