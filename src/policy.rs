//! Policy Client: CREATE/UPDATE calls to the Policy API, with timeouts,
//! a single idempotent retry on UPDATE, and fail-open semantics.
//!
//! The HTTP plumbing builds a `reqwest::Client` with a timeout, POSTs JSON,
//! and maps transport errors into our `Error`. Backoff-with-jitter for the
//! one allowed UPDATE retry is a single fixed delay rather than a general
//! multi-attempt loop, since CREATE must never retry (duplicate-open hazard)
//! and UPDATE retries at most once.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::payload::{CreateRequest, UpdateRequest};

/// Outcome of a Policy API CREATE or UPDATE call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerdictResult {
    Passed,
    Blocked,
    Rejected,
}

impl VerdictResult {
    pub fn is_negative(&self) -> bool {
        matches!(self, VerdictResult::Blocked | VerdictResult::Rejected)
    }
}

#[derive(Debug, Clone)]
pub struct Verdict {
    pub result: VerdictResult,
    pub reason: String,
}

/// Response shape for a CREATE call: verdict plus the assigned event_id.
#[derive(Debug, Clone)]
pub struct CreateResponse {
    pub event_id: String,
    pub verdict: Verdict,
}

#[derive(Debug, Deserialize, Default)]
struct WireResponse {
    event_id: Option<String>,
    event_result: Option<String>,
    reason: Option<String>,
}

fn parse_result(s: Option<&str>) -> VerdictResult {
    match s {
        Some("blocked") => VerdictResult::Blocked,
        Some("rejected") => VerdictResult::Rejected,
        _ => VerdictResult::Passed,
    }
}

/// Operating mode for the Policy Client, layered on top of [`RunConfig`].
enum Mode {
    Normal,
    DryRun,
    Mock,
}

pub struct PolicyClient {
    http: reqwest::Client,
    api_url: String,
    timeout: Duration,
    fail_open: bool,
    mock_block_tokens: Vec<String>,
    print_payloads: bool,
    mode: Mode,
}

impl PolicyClient {
    pub fn new(cfg: &RunConfig) -> Result<Self> {
        let mode = if cfg.mock_mode {
            Mode::Mock
        } else if cfg.dry_run {
            Mode::DryRun
        } else {
            Mode::Normal
        };
        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .build()
            .map_err(Error::Http)?;
        Ok(PolicyClient {
            http,
            api_url: cfg.api_url.clone(),
            timeout: cfg.request_timeout,
            fail_open: cfg.fail_open,
            mock_block_tokens: cfg.mock_block_tokens.clone(),
            print_payloads: cfg.print_payloads,
            mode,
        })
    }

    fn fail_open_verdict(&self, reason: &str) -> Verdict {
        if self.fail_open {
            Verdict {
                result: VerdictResult::Passed,
                reason: format!("upstream-unavailable: {reason}"),
            }
        } else {
            Verdict {
                result: VerdictResult::Rejected,
                reason: reason.to_string(),
            }
        }
    }

    fn mock_verdict(&self, haystack: &str) -> Verdict {
        let hit = self
            .mock_block_tokens
            .iter()
            .find(|tok| !tok.is_empty() && haystack.contains(tok.as_str()));
        match hit {
            Some(tok) => Verdict {
                result: VerdictResult::Blocked,
                reason: format!("mock match: {tok}"),
            },
            None => Verdict {
                result: VerdictResult::Passed,
                reason: String::new(),
            },
        }
    }

    /// CREATE a new event. Never retried: a retry after a timed-out-but-
    /// actually-succeeded CREATE would open a duplicate event.
    pub async fn create(&self, req: &CreateRequest) -> Result<CreateResponse> {
        if self.print_payloads {
            eprintln!(
                "[hookguard] CREATE payload: {}",
                serde_json::to_string(req).unwrap_or_default()
            );
        }

        match self.mode {
            Mode::DryRun => {
                return Ok(CreateResponse {
                    event_id: synthetic_event_id(&req.session_id, req.event_type),
                    verdict: Verdict {
                        result: VerdictResult::Passed,
                        reason: String::new(),
                    },
                });
            }
            Mode::Mock => {
                let verdict = self.mock_verdict(&req.input);
                return Ok(CreateResponse {
                    event_id: synthetic_event_id(&req.session_id, req.event_type),
                    verdict,
                });
            }
            Mode::Normal => {}
        }

        match self.post(req).await {
            Ok(resp) => {
                let event_id = resp
                    .event_id
                    .unwrap_or_else(|| synthetic_event_id(&req.session_id, req.event_type));
                Ok(CreateResponse {
                    event_id,
                    verdict: Verdict {
                        result: parse_result(resp.event_result.as_deref()),
                        reason: resp.reason.unwrap_or_default(),
                    },
                })
            }
            Err(PolicyCallError::FailOpen(reason)) => Ok(CreateResponse {
                event_id: synthetic_event_id(&req.session_id, req.event_type),
                verdict: self.fail_open_verdict(&reason),
            }),
        }
    }

    /// UPDATE an existing event. May retry once, since `event_id` makes the
    /// call idempotent on the Policy API side.
    pub async fn update(&self, req: &UpdateRequest) -> Result<Verdict> {
        if self.print_payloads {
            eprintln!(
                "[hookguard] UPDATE payload: {}",
                serde_json::to_string(req).unwrap_or_default()
            );
        }

        match self.mode {
            Mode::DryRun => {
                return Ok(Verdict {
                    result: VerdictResult::Passed,
                    reason: String::new(),
                });
            }
            Mode::Mock => {
                return Ok(self.mock_verdict(&req.output));
            }
            Mode::Normal => {}
        }

        match self.post(req).await {
            Ok(resp) => Ok(Verdict {
                result: parse_result(resp.event_result.as_deref()),
                reason: resp.reason.unwrap_or_default(),
            }),
            Err(PolicyCallError::FailOpen(reason)) => {
                // One retry, short fixed delay with jitter.
                sleep(retry_delay()).await;
                match self.post(req).await {
                    Ok(resp) => Ok(Verdict {
                        result: parse_result(resp.event_result.as_deref()),
                        reason: resp.reason.unwrap_or_default(),
                    }),
                    Err(PolicyCallError::FailOpen(reason)) => Ok(self.fail_open_verdict(&reason)),
                }
            }
        }
    }

    async fn post<T: Serialize>(&self, body: &T) -> std::result::Result<WireResponse, PolicyCallError> {
        if self.api_url.is_empty() {
            return Err(PolicyCallError::FailOpen("no API_URL configured".into()));
        }
        let result = tokio::time::timeout(
            self.timeout,
            self.http.post(&self.api_url).json(body).send(),
        )
        .await;

        let response = match result {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => return Err(PolicyCallError::FailOpen(e.to_string())),
            Err(_) => return Err(PolicyCallError::FailOpen("request timed out".into())),
        };

        let status = response.status();
        if status.as_u16() >= 500 {
            return Err(PolicyCallError::FailOpen(format!("server error {status}")));
        }
        if status.is_client_error() {
            // 4xx: fail-open rather than treat a malformed request as a verdict.
            return Err(PolicyCallError::FailOpen(format!("client error {status}")));
        }
        response
            .json::<WireResponse>()
            .await
            .map_err(|e| PolicyCallError::FailOpen(format!("invalid response body: {e}")))
    }
}

enum PolicyCallError {
    FailOpen(String),
}

fn synthetic_event_id(session_id: &str, event_type: &str) -> String {
    format!("local-{session_id}-{event_type}-{}", rand::random::<u32>())
}

fn retry_delay() -> Duration {
    Duration::from_millis(100 + (rand::random::<u8>() as u64 * 2))
}
