//! Resilient invoker: discovery-backed endpoint selection, round-robin load
//! balancing and full exponential backoff for provider calls.

use crate::audit::{AuditChain, SYSTEM_ACTOR};
use crate::discovery::ServiceDirectory;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const INTERNAL_ADDR: &str = "internal";

/// Explicit backoff policy consumed by the invoker; replaces per-provider
/// hand-rolled sleep loops.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2,
        }
    }
}

impl BackoffPolicy {
    /// Sleep after the given failed attempt (1-indexed):
    /// `base * multiplier^(attempt-1)`. With the defaults the sequence before
    /// attempts 2 and 3 is exactly [1s, 2s].
    pub fn delay_after_failure(&self, attempt: u32) -> Duration {
        self.base_delay * self.multiplier.saturating_pow(attempt.saturating_sub(1))
    }
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Network(String),
    #[error("unexpected status {code}")]
    Status { code: u16 },
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// One outbound HTTP call. Behind a trait so tests can inject failures and
/// record targets without a live service.
#[async_trait]
pub trait ConnectorTransport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        body: &JsonValue,
        timeout: Duration,
    ) -> Result<JsonValue, TransportError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::store(format!("http client init failed: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ConnectorTransport for HttpTransport {
    async fn post_json(
        &self,
        url: &str,
        body: &JsonValue,
        timeout: Duration,
    ) -> Result<JsonValue, TransportError> {
        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                code: status.as_u16(),
            });
        }

        response
            .json::<JsonValue>()
            .await
            .map_err(|e| TransportError::Malformed(e.to_string()))
    }
}

/// Performs a provider call against one of potentially several live
/// instances, retrying with exponential backoff. Every attempt, success and
/// exhaustion is written to the audit chain.
pub struct ResilientInvoker {
    directory: Arc<dyn ServiceDirectory>,
    transport: Arc<dyn ConnectorTransport>,
    audit: Arc<AuditChain>,
    policy: BackoffPolicy,
    call_timeout: Duration,
    /// Shared monotonically increasing counter; modulo instance count gives
    /// round-robin across concurrent callers.
    cursor: AtomicU64,
}

impl ResilientInvoker {
    pub fn new(
        directory: Arc<dyn ServiceDirectory>,
        transport: Arc<dyn ConnectorTransport>,
        audit: Arc<AuditChain>,
        policy: BackoffPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            transport,
            audit,
            policy,
            call_timeout,
            cursor: AtomicU64::new(0),
        }
    }

    /// POST `body` to `path` on a live instance of `service` and deserialize
    /// the reply. A malformed reply counts as a failed attempt.
    pub async fn post<T: DeserializeOwned>(
        &self,
        service: &str,
        path: &str,
        body: &JsonValue,
    ) -> AppResult<T> {
        let mut last_error = String::new();

        for attempt in 1..=self.policy.max_attempts {
            let endpoints = self.directory.lookup(service).await?;
            if endpoints.is_empty() {
                // Zero discovered instances is an operational gap, not a
                // transient fault: alarm and fail fast without retrying.
                self.audit.log_security_alert(
                    SYSTEM_ACTOR,
                    INTERNAL_ADDR,
                    "DOWNSTREAM_UNAVAILABLE",
                    &format!("No live instance of {}", service),
                );
                return Err(AppError::DownstreamUnavailable {
                    service: service.to_string(),
                });
            }

            let index = self.cursor.fetch_add(1, Ordering::Relaxed) as usize % endpoints.len();
            let url = format!("{}{}", endpoints[index].base_url, path);

            self.audit.log_event(
                SYSTEM_ACTOR,
                INTERNAL_ADDR,
                "DOWNSTREAM_CALL_ATTEMPT",
                "PENDING",
                &format!("service={} attempt={} url={}", service, attempt, url),
            );

            match self.transport.post_json(&url, body, self.call_timeout).await {
                Ok(raw) => match serde_json::from_value::<T>(raw) {
                    Ok(parsed) => {
                        self.audit.log_event(
                            SYSTEM_ACTOR,
                            INTERNAL_ADDR,
                            "DOWNSTREAM_CALL_SUCCESS",
                            "SUCCESS",
                            &format!("service={} attempt={}", service, attempt),
                        );
                        return Ok(parsed);
                    }
                    Err(e) => {
                        last_error = format!("malformed response: {}", e);
                    }
                },
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            self.audit.log_event(
                SYSTEM_ACTOR,
                INTERNAL_ADDR,
                "DOWNSTREAM_CALL_FAILED",
                "ERROR",
                &format!(
                    "service={} attempt={} error={}",
                    service, attempt, last_error
                ),
            );
            debug!(service, attempt, error = %last_error, "provider call attempt failed");

            if attempt < self.policy.max_attempts {
                tokio::time::sleep(self.policy.delay_after_failure(attempt)).await;
            }
        }

        warn!(
            service,
            attempts = self.policy.max_attempts,
            error = %last_error,
            "provider call exhausted retry budget"
        );
        self.audit.log_event(
            SYSTEM_ACTOR,
            INTERNAL_ADDR,
            "DOWNSTREAM_CALL_EXHAUSTED",
            "ERROR",
            &format!(
                "service={} attempts={} last_error={}",
                service, self.policy.max_attempts, last_error
            ),
        );
        Err(AppError::ExhaustedRetries {
            service: service.to_string(),
            attempts: self.policy.max_attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticDirectory;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn backoff_sequence_grows_exponentially() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_after_failure(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after_failure(2), Duration::from_secs(2));

        let policy = BackoffPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            multiplier: 2,
        };
        assert_eq!(policy.delay_after_failure(3), Duration::from_millis(400));
    }

    struct ScriptedTransport {
        // URLs hit, and remaining failures before success.
        calls: Mutex<Vec<String>>,
        failures_before_success: Mutex<u32>,
    }

    impl ScriptedTransport {
        fn failing(n: u32) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                failures_before_success: Mutex::new(n),
            }
        }
    }

    #[async_trait]
    impl ConnectorTransport for ScriptedTransport {
        async fn post_json(
            &self,
            url: &str,
            _body: &JsonValue,
            _timeout: Duration,
        ) -> Result<JsonValue, TransportError> {
            self.calls.lock().unwrap().push(url.to_string());
            let mut remaining = self.failures_before_success.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TransportError::Timeout);
            }
            Ok(json!({"success": true, "externalId": "E1"}))
        }
    }

    fn invoker_with(
        directory: StaticDirectory,
        transport: Arc<ScriptedTransport>,
    ) -> ResilientInvoker {
        ResilientInvoker::new(
            Arc::new(directory),
            transport,
            Arc::new(AuditChain::new()),
            BackoffPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                multiplier: 2,
            },
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let mut directory = StaticDirectory::new();
        directory.insert("psp-card", &["http://bank:8082"]);
        let transport = Arc::new(ScriptedTransport::failing(2));
        let invoker = invoker_with(directory, transport.clone());

        let reply: JsonValue = invoker
            .post("psp-card", "/connector/init", &json!({}))
            .await
            .unwrap();
        assert_eq!(reply["externalId"], "E1");
        assert_eq!(transport.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn exhaustion_carries_last_error() {
        let mut directory = StaticDirectory::new();
        directory.insert("psp-card", &["http://bank:8082"]);
        let transport = Arc::new(ScriptedTransport::failing(10));
        let invoker = invoker_with(directory, transport);

        let result: AppResult<JsonValue> =
            invoker.post("psp-card", "/connector/init", &json!({})).await;
        match result {
            Err(AppError::ExhaustedRetries {
                attempts,
                last_error,
                ..
            }) => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("timed out"));
            }
            other => panic!("expected ExhaustedRetries, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn zero_instances_fails_fast_without_retry() {
        let directory = StaticDirectory::new();
        let transport = Arc::new(ScriptedTransport::failing(0));
        let invoker = invoker_with(directory, transport.clone());

        let result: AppResult<JsonValue> =
            invoker.post("psp-card", "/connector/init", &json!({})).await;
        assert!(matches!(
            result,
            Err(AppError::DownstreamUnavailable { .. })
        ));
        // Not a single call was issued.
        assert!(transport.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn round_robin_spreads_calls_across_instances() {
        let mut directory = StaticDirectory::new();
        directory.insert("psp-card", &["http://bank-a:8082", "http://bank-b:8082"]);
        let transport = Arc::new(ScriptedTransport::failing(0));
        let invoker = invoker_with(directory, transport.clone());

        for _ in 0..4 {
            let _: JsonValue = invoker
                .post("psp-card", "/connector/init", &json!({}))
                .await
                .unwrap();
        }

        let calls = transport.calls.lock().unwrap();
        let to_a = calls.iter().filter(|u| u.contains("bank-a")).count();
        let to_b = calls.iter().filter(|u| u.contains("bank-b")).count();
        assert_eq!((to_a, to_b), (2, 2));
    }
}
