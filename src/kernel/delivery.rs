//! Completion delivery.
//!
//! When a submitted run finishes, a [`CompletionNotice`] is handed to a
//! [`CompletionSink`]. Delivery failures are reported, never propagated into
//! the run result.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

use super::orchestrator::ExecutionResult;
use super::tracker::TaskStatus;
use crate::tasks::Payload;
use crate::types::{AgentError, DeliveryConfig, Error, ErrorCode, Result, RunId};

/// Body POSTed to the callback address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionNotice {
    pub agent_run_id: RunId,
    pub timestamp: DateTime<Utc>,
    pub status: TaskStatus,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resultado: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub herramientas_usadas: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AgentError>,
}

impl CompletionNotice {
    /// Notice for an orchestration that produced a result.
    pub fn completed(result: &ExecutionResult) -> Self {
        let (resultado, herramientas_usadas, error) = if result.success {
            (
                Some(result.payload.clone()),
                Some(result.operations_used.clone()),
                None,
            )
        } else {
            let error = result.error.clone().unwrap_or_else(|| {
                AgentError::new(ErrorCode::InternalError, "unknown error", None)
            });
            (None, None, Some(error))
        };
        Self {
            agent_run_id: result.run_id.clone(),
            timestamp: Utc::now(),
            status: TaskStatus::Completed,
            success: result.success,
            resultado,
            herramientas_usadas,
            error,
        }
    }

    /// Notice for a run that timed out or crashed.
    pub fn failed(run_id: RunId, error: AgentError) -> Self {
        Self {
            agent_run_id: run_id,
            timestamp: Utc::now(),
            status: TaskStatus::Failed,
            success: false,
            resultado: None,
            herramientas_usadas: None,
            error: Some(error),
        }
    }
}

/// Outcome of one delivery, after retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub success: bool,
    pub attempts: u32,
    pub final_status_code: Option<u16>,
    pub error: Option<String>,
}

impl DeliveryReport {
    fn rejected(reason: String) -> Self {
        Self {
            success: false,
            attempts: 0,
            final_status_code: None,
            error: Some(reason),
        }
    }
}

/// Destination for completion notices.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionSink: Send + Sync {
    async fn deliver(&self, url: &str, notice: &CompletionNotice) -> DeliveryReport;
}

// =============================================================================
// Webhook
// =============================================================================

/// Longest wait between two delivery attempts.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Upper bound on `max_retries`.
pub const MAX_DELIVERY_ATTEMPTS: u32 = 20;

/// POSTs notices as JSON with exponential backoff between attempts.
///
/// Redirects are not followed, so a public callback cannot bounce the
/// notice to an internal host.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    config: DeliveryConfig,
    base_delay: Duration,
}

impl WebhookSink {
    pub fn new(config: DeliveryConfig) -> Result<Self> {
        if config.max_retries > MAX_DELIVERY_ATTEMPTS {
            return Err(Error::config(format!(
                "delivery.max_retries must be at most {}, got {}",
                MAX_DELIVERY_ATTEMPTS, config.max_retries
            )));
        }
        if !config.backoff_factor.is_finite() || config.backoff_factor < 1.0 {
            return Err(Error::config(format!(
                "delivery.backoff_factor must be a finite number >= 1, got {}",
                config.backoff_factor
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::config(format!("webhook client: {}", e)))?;
        Ok(Self {
            client,
            config,
            base_delay: Duration::from_secs(1),
        })
    }

    /// Unit of the backoff schedule; retry `n` waits `base * factor^n`.
    pub fn with_base_delay(mut self, base: Duration) -> Self {
        self.base_delay = base;
        self
    }

    /// Wait before retry `attempt`, capped at [`MAX_RETRY_DELAY`].
    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.config.backoff_factor.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_RETRY_DELAY)
            .min(MAX_RETRY_DELAY)
    }

    async fn post_once(
        &self,
        url: &str,
        notice: &CompletionNotice,
    ) -> std::result::Result<u16, (Option<u16>, String)> {
        let response = self
            .client
            .post(url)
            .json(notice)
            .send()
            .await
            .map_err(|e| (None, e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err((Some(status.as_u16()), format!("callback returned {}", status)))
        }
    }
}

#[async_trait]
impl CompletionSink for WebhookSink {
    async fn deliver(&self, url: &str, notice: &CompletionNotice) -> DeliveryReport {
        if let Err(e) = check_callback_url(url, self.config.allow_insecure_callbacks) {
            tracing::warn!(run_id = %notice.agent_run_id, error = %e, "webhook_rejected");
            return DeliveryReport::rejected(e.to_string());
        }

        let max_attempts = self.config.max_retries.max(1);
        let mut last_status = None;
        let mut last_error = None;
        for attempt in 0..max_attempts {
            match self.post_once(url, notice).await {
                Ok(code) => {
                    tracing::info!(
                        run_id = %notice.agent_run_id,
                        attempts = attempt + 1,
                        status = code,
                        "webhook_delivered"
                    );
                    return DeliveryReport {
                        success: true,
                        attempts: attempt + 1,
                        final_status_code: Some(code),
                        error: None,
                    };
                }
                Err((status, error)) => {
                    last_status = status;
                    last_error = Some(error);
                }
            }

            if attempt + 1 < max_attempts {
                let delay = self.delay_for(attempt);
                tracing::warn!(
                    run_id = %notice.agent_run_id,
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "webhook_retry"
                );
                tokio::time::sleep(delay).await;
            }
        }

        tracing::error!(
            run_id = %notice.agent_run_id,
            attempts = max_attempts,
            error = ?last_error,
            "webhook_failed"
        );
        DeliveryReport {
            success: false,
            attempts: max_attempts,
            final_status_code: last_status,
            error: Some(format!(
                "max retries exceeded: {}",
                last_error.unwrap_or_default()
            )),
        }
    }
}

/// Reject callback addresses that would let a caller reach internal hosts.
///
/// Only `https` to a public host passes unless `allow_insecure` is set.
pub fn check_callback_url(url: &str, allow_insecure: bool) -> Result<()> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| Error::config(format!("invalid callback url '{}': {}", url, e)))?;
    if allow_insecure {
        return match parsed.scheme() {
            "http" | "https" => Ok(()),
            other => Err(Error::config(format!("unsupported callback scheme '{}'", other))),
        };
    }

    if parsed.scheme() != "https" {
        return Err(Error::config("callback url must use https"));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| Error::config("callback url has no host"))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_ascii_lowercase();

    if host == "localhost" || host.ends_with(".localhost") {
        return Err(Error::config(
            "callback to localhost is not allowed (SSRF protection)",
        ));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        let ip = unmap(ip);
        if ip.is_loopback() || ip.is_unspecified() {
            return Err(Error::config(
                "callback to a loopback address is not allowed (localhost, SSRF protection)",
            ));
        }
        if is_private(&ip) {
            return Err(Error::config(
                "callback to a private network address is not allowed (SSRF protection)",
            ));
        }
    }
    Ok(())
}

/// `::ffff:a.b.c.d` is checked as the IPv4 address it carries.
fn unmap(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(IpAddr::V6(v6), IpAddr::V4),
        v4 => v4,
    }
}

fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_link_local(),
        // fc00::/7 unique-local, fe80::/10 link-local
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}
