// src/ingest/fetch.rs
//! Request/response seam used by source providers.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::ingest::types::TransportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<FetchResponse, TransportError>;
}

/// `reqwest`-backed fetcher. Non-2xx statuses are returned, not raised.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    timeout: Duration,
}

impl ReqwestFetcher {
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        let client = Client::builder().user_agent(user_agent).build()?;
        Ok(Self {
            client,
            timeout: Duration::from_secs(30),
        })
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<FetchResponse, TransportError> {
        let mut req = self.client.get(url).timeout(self.timeout);
        for (k, v) in headers {
            req = req.header(k.as_str(), v.as_str());
        }
        let transport = |e: reqwest::Error| TransportError {
            url: url.to_string(),
            message: e.to_string(),
        };
        let resp = req.send().await.map_err(transport)?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(transport)?;
        Ok(FetchResponse { status, body })
    }
}

/// A recorded request: (url, headers).
pub type RecordedRequest = (String, Vec<(String, String)>);

// --- Test helper ---
/// Replays scripted responses in order and records every request.
/// Once the script is exhausted every call fails with a transport error.
pub struct MockFetcher {
    script: Mutex<VecDeque<Result<FetchResponse, String>>>,
    pub requests: Mutex<Vec<RecordedRequest>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(vec![]),
        }
    }

    pub fn with_responses<I: IntoIterator<Item = FetchResponse>>(responses: I) -> Self {
        let f = Self::new();
        for r in responses {
            f.push(r);
        }
        f
    }

    pub fn push(&self, response: FetchResponse) {
        self.script.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_transport_error(&self, message: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(u, _)| u.clone())
            .collect()
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpFetcher for MockFetcher {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<FetchResponse, TransportError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), headers.to_vec()));
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(resp)) => Ok(resp),
            Some(Err(message)) => Err(TransportError {
                url: url.to_string(),
                message,
            }),
            None => Err(TransportError {
                url: url.to_string(),
                message: "mock script exhausted".to_string(),
            }),
        }
    }
}
