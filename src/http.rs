//! Retrying HTTP fetch layer shared by all pool adapters.
//!
//! One timeout per call, at most one retry on transport failures and on the
//! retryable status family, jittered backoff honouring `Retry-After`.
//! Non-2xx responses are returned as values, not errors: the adapter that
//! issued the call decides whether the outcome is fatal for its group.

use rand::Rng;
use reqwest::header::RETRY_AFTER;
use serde_json::Value;
use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Status codes worth a single retry: auth hiccups, throttling, geoblocks
/// that sometimes clear on a second edge, and server-side failures.
const RETRYABLE_STATUS: [u16; 4] = [401, 403, 429, 451];

/// How much response body is kept for diagnostics on failures.
const DIAG_BODY_CHARS: usize = 300;

/// A completed HTTP exchange, success or not.
#[derive(Debug, Clone)]
pub struct HttpCapture {
    pub status: u16,
    pub body: String,
    pub elapsed_ms: u64,
}

impl HttpCapture {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Leading slice of the body for log lines and `Fail` diagnostics.
    pub fn body_prefix(&self) -> String {
        self.body.chars().take(DIAG_BODY_CHARS).collect()
    }

    /// Decode the body as JSON; `None` on parse failure.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// Transport-level failure after the retry budget is spent.
#[derive(Debug, Clone)]
pub struct TransportFailure {
    pub detail: String,
    pub elapsed_ms: u64,
}

/// Thin wrapper over a [`reqwest::Client`] tuned for one pool.
#[derive(Clone)]
pub struct PoolHttp {
    client: reqwest::Client,
}

impl PoolHttp {
    /// Build a client with the given per-call timeout. The local address is
    /// bound to `0.0.0.0` so resolution prefers IPv4 paths; several pool
    /// hosts publish AAAA records that stall on constrained networks.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        Self::builder(timeout, false)
    }

    /// Like [`PoolHttp::new`] but with all proxy configuration disabled.
    /// The F2Pool endpoint rejects requests routed through the ambient
    /// proxy variables some hosts inject.
    pub fn new_no_proxy(timeout: Duration) -> anyhow::Result<Self> {
        Self::builder(timeout, true)
    }

    fn builder(timeout: Duration, no_proxy: bool) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        if no_proxy {
            builder = builder.no_proxy();
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    /// GET with optional headers.
    pub async fn get(
        &self,
        url: &str,
        headers: &[(&str, String)],
    ) -> Result<HttpCapture, TransportFailure> {
        self.execute(url, headers, None).await
    }

    /// POST with a JSON body and optional headers.
    pub async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: &Value,
    ) -> Result<HttpCapture, TransportFailure> {
        self.execute(url, headers, Some(body)).await
    }

    async fn execute(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<HttpCapture, TransportFailure> {
        let started = Instant::now();
        let mut last_transport: Option<String> = None;

        for attempt in 1..=2u32 {
            let mut req = match body {
                Some(json) => self.client.post(url).json(json),
                None => self.client.get(url),
            };
            for (name, value) in headers {
                req = req.header(*name, value.as_str());
            }

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let retry_after = parse_retry_after(&resp);
                    let text = resp.text().await.unwrap_or_default();
                    let capture = HttpCapture {
                        status,
                        body: text,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    };

                    let retryable =
                        RETRYABLE_STATUS.contains(&status) || status >= 500;
                    if capture.is_success() || !retryable || attempt == 2 {
                        return Ok(capture);
                    }

                    debug!(
                        url,
                        status,
                        body = %capture.body_prefix(),
                        "retrying after http status"
                    );
                    tokio::time::sleep(retry_after.unwrap_or_else(|| backoff(attempt))).await;
                }
                Err(e) => {
                    let detail = e.to_string();
                    if attempt == 2 {
                        return Err(TransportFailure {
                            detail,
                            elapsed_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    warn!(url, error = %detail, "transport error, retrying once");
                    last_transport = Some(detail);
                    tokio::time::sleep(backoff(attempt)).await;
                }
            }
        }

        // Both attempts fell through the transport arm.
        Err(TransportFailure {
            detail: last_transport.unwrap_or_else(|| "request not attempted".to_string()),
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}

fn backoff(attempt: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..300);
    Duration::from_millis(300 * attempt as u64 + jitter)
}

fn parse_retry_after(resp: &reqwest::Response) -> Option<Duration> {
    let secs: u64 = resp.headers().get(RETRY_AFTER)?.to_str().ok()?.parse().ok()?;
    // Cap so a hostile header cannot stall a slot.
    Some(Duration::from_secs(secs.min(10)))
}

/// Best-effort numeric extraction from the loosely-typed payloads pools
/// return: numbers arrive as JSON numbers or as decimal strings.
pub fn json_num(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
