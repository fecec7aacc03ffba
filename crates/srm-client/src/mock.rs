// SPDX-License-Identifier: MIT OR Apache-2.0
//! A scripted transport double for worker and pipeline tests.

use crate::transport::{OutboundRequest, RegulatorTransport};
use async_trait::async_trait;
use serde_json::json;
use srm_core::RegulatorResponse;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// A request observed by [`MockTransport`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Path under the base URL.
    pub path: String,
    /// Exact body bytes.
    pub body: String,
    /// Header pairs in transmission order.
    pub headers: Vec<(String, String)>,
    /// `X-Idempotency-Key`, when one was supplied.
    pub idempotency_key: Option<String>,
    /// Whether a client-certificate identity was attached.
    pub had_identity: bool,
}

enum Fallback {
    /// Reply with a fixed response.
    Fixed(RegulatorResponse),
    /// Reply with a fresh success body (`PSI-<n>` ids) per call.
    SuccessCounter(AtomicU64),
}

/// In-memory [`RegulatorTransport`] with scripted responses.
///
/// Responses pushed with [`push`](MockTransport::push) are consumed
/// first (FIFO); once the script runs dry the fallback answers. Every
/// request is recorded, and the peak number of concurrently in-flight
/// calls is tracked so tests can assert the worker's fanout bound.
pub struct MockTransport {
    script: Mutex<VecDeque<RegulatorResponse>>,
    fallback: Fallback,
    requests: Mutex<Vec<RecordedRequest>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    delay: Option<Duration>,
}

impl MockTransport {
    /// A transport that always answers with `response` once the script
    /// is exhausted.
    #[must_use]
    pub fn replying(response: RegulatorResponse) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Fallback::Fixed(response),
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// A transport that acknowledges every submission with a unique
    /// regulator transaction id (`PSI-1`, `PSI-2`, …), answering with
    /// `retourFer` for closing calls and `retourTrans` otherwise.
    #[must_use]
    pub fn acknowledging() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Fallback::SuccessCounter(AtomicU64::new(0)),
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Hold every call for `delay` before answering; useful for
    /// concurrency-bound assertions.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a scripted response, consumed before the fallback.
    pub fn push(&self, response: RegulatorResponse) {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(response);
    }

    /// All requests observed so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// The highest number of calls that were in flight at once.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_response(&self, path: &str) -> RegulatorResponse {
        if let Some(scripted) = self
            .script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
        {
            return scripted;
        }
        match &self.fallback {
            Fallback::Fixed(response) => response.clone(),
            Fallback::SuccessCounter(counter) => {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let body = if path.contains("closing") {
                    json!({"retourFer": {"retourFerActu": {"psiNoFer": format!("PSI-{n}")}}})
                } else {
                    json!({"retourTrans": {"retourTransActu": {"psiNoTrans": format!("PSI-{n}")}}})
                };
                RegulatorResponse::from_http(200, body.to_string())
            }
        }
    }
}

#[async_trait]
impl RegulatorTransport for MockTransport {
    async fn post(&self, request: OutboundRequest<'_>) -> RegulatorResponse {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(RecordedRequest {
                path: request.path.to_string(),
                body: request.body.to_string(),
                headers: request
                    .headers
                    .iter()
                    .map(|(n, v)| (n.to_string(), v.to_string()))
                    .collect(),
                idempotency_key: request.idempotency_key.map(str::to_string),
                had_identity: request.identity.is_some(),
            });

        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let response = self.next_response(request.path);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}
