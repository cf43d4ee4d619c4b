//! # Guarded HTTP Client
//!
//! `reqwest` wrapped in the [`RetryPolicy`]. Webhook delivery, CRM pushes,
//! enrichment lookups and proxy-provider queries all go through here instead of
//! calling the network directly.

use crate::resilience::{AttemptError, CallOptions, IntegrationError, RetryPolicy};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::sync::Arc;

/// How a response status is treated by the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// 5xx and 429; retried and counted against the breaker
    Retryable,
    /// Everything else; handed back to the caller as a response
    Final,
}

pub fn classify_status(status: StatusCode) -> StatusClass {
    if status.is_success() {
        StatusClass::Success
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        StatusClass::Retryable
    } else {
        StatusClass::Final
    }
}

#[derive(Debug, Clone)]
pub struct GuardedHttpClient {
    client: Client,
    policy: Arc<RetryPolicy>,
}

impl GuardedHttpClient {
    pub fn new(client: Client, policy: Arc<RetryPolicy>) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &Arc<RetryPolicy> {
        &self.policy
    }

    /// Send the request produced by `build`, rebuilding it for every attempt.
    ///
    /// Non-retryable statuses (4xx other than 429) come back as `Ok(response)`
    /// so the caller can decide what they mean.
    pub async fn send<F>(
        &self,
        options: &CallOptions,
        build: F,
    ) -> Result<Response, IntegrationError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        self.policy
            .execute(options, |_attempt| {
                let request = build(&self.client);
                async move {
                    let response = request
                        .send()
                        .await
                        .map_err(|e| AttemptError::Transient(e.to_string()))?;
                    match classify_status(response.status()) {
                        StatusClass::Retryable => Err(AttemptError::Transient(format!(
                            "HTTP {}",
                            response.status()
                        ))),
                        StatusClass::Success | StatusClass::Final => Ok(response),
                    }
                }
            })
            .await
    }
}
