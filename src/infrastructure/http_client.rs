//! Resilient fetch client
//!
//! One logical request is retried across transient failures. Every attempt
//! draws a fresh identity and the next proxy, waits on the shared rate
//! limiter, and is classified into a [`FetchOutcome`]. The retry decision
//! comes from [`RetryPolicy::decide`]; this module only runs the loop.

use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, direct::NotKeyed},
};
use reqwest::header::{HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client, Method};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::HttpConfig;
use super::identity::IdentitySupplier;
use super::proxy_rotator::ProxyRotator;
use super::retry_policy::{RetryDecision, RetryPolicy};
use crate::domain::{CollectionError, FetchAttempt, FetchOutcome, ProxyEndpoint, TransientReason};

/// Reason recorded when a fetch stops because the run was interrupted
pub const CANCELLED_REASON: &str = "cancelled";

/// Executes a single attempt. Returns the status and body of any HTTP
/// response, or a network-level reason when no response arrived.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, attempt: &FetchAttempt) -> Result<(u16, String), TransientReason>;
}

/// reqwest-backed transport with one pre-built client per egress route
pub struct ReqwestTransport {
    direct: Client,
    proxied: HashMap<ProxyEndpoint, Client>,
}

impl ReqwestTransport {
    /// Builds the direct client plus one client per proxy. An endpoint that
    /// reqwest rejects fails the whole construction.
    pub fn new(http: &HttpConfig, proxies: &[ProxyEndpoint]) -> Result<Self, CollectionError> {
        let direct = build_client(http, None)?;
        let proxied = proxies
            .iter()
            .map(|proxy| Ok((proxy.clone(), build_client(http, Some(proxy))?)))
            .collect::<Result<HashMap<_, _>, CollectionError>>()?;
        Ok(Self { direct, proxied })
    }
}

fn build_client(http: &HttpConfig, proxy: Option<&ProxyEndpoint>) -> Result<Client, CollectionError> {
    let mut builder = Client::builder()
        .timeout(Duration::from_secs(http.timeout_secs))
        .cookie_store(true)
        .gzip(true)
        .brotli(true)
        .redirect(if http.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    builder = match proxy {
        Some(endpoint) => {
            let proxy = reqwest::Proxy::all(endpoint.as_str()).map_err(|e| CollectionError::InvalidProxy {
                endpoint: endpoint.masked().to_string(),
                reason: e.to_string(),
            })?;
            builder.proxy(proxy)
        }
        None => builder.no_proxy(),
    };

    builder.build().map_err(|e| match proxy {
        Some(endpoint) => CollectionError::InvalidProxy {
            endpoint: endpoint.masked().to_string(),
            reason: e.to_string(),
        },
        None => CollectionError::Setup { reason: e.to_string() },
    })
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, attempt: &FetchAttempt) -> Result<(u16, String), TransientReason> {
        let client = match &attempt.proxy {
            Some(proxy) => self
                .proxied
                .get(proxy)
                .ok_or_else(|| TransientReason::Network(format!("no client for proxy {proxy}")))?,
            None => &self.direct,
        };

        let mut request = client
            .request(attempt.method.clone(), &attempt.target_url)
            .header(USER_AGENT, attempt.identity.user_agent.as_str());
        for (name, value) in &attempt.identity.headers {
            match (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
                (Ok(name), Ok(value)) => request = request.header(name, value),
                _ => debug!("Skipping invalid header {}", name),
            }
        }

        let response = request.send().await.map_err(|e| network_reason(&e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| network_reason(&e))?;
        Ok((status, body))
    }
}

fn network_reason(error: &reqwest::Error) -> TransientReason {
    if error.is_timeout() {
        TransientReason::Network("timeout".to_string())
    } else if error.is_connect() {
        TransientReason::Network(format!("connection failed: {error}"))
    } else {
        TransientReason::Network(error.to_string())
    }
}

/// Per-call settings for [`ResilientClient::fetch`]
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub method: Method,
    pub policy: RetryPolicy,
    /// Label identifying the item in log lines, e.g. `shop/query 12`
    pub context: String,
}

impl FetchOptions {
    #[must_use]
    pub fn get(policy: RetryPolicy) -> Self {
        Self {
            method: Method::GET,
            policy,
            context: String::new(),
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

pub struct ResilientClient {
    transport: Arc<dyn Transport>,
    identities: Arc<dyn IdentitySupplier>,
    rotator: Arc<ProxyRotator>,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    cancel: CancellationToken,
}

impl ResilientClient {
    /// reqwest transport over the rotator's pool
    pub fn new(
        http: &HttpConfig,
        rotator: Arc<ProxyRotator>,
        identities: Arc<dyn IdentitySupplier>,
    ) -> Result<Self, CollectionError> {
        let transport = ReqwestTransport::new(http, rotator.endpoints())?;
        let rate = NonZeroU32::new(http.max_requests_per_second).ok_or_else(|| CollectionError::Setup {
            reason: "rate limit must be greater than 0".to_string(),
        })?;
        Ok(Self::with_transport(Arc::new(transport), identities, rotator, rate))
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        identities: Arc<dyn IdentitySupplier>,
        rotator: Arc<ProxyRotator>,
        max_requests_per_second: NonZeroU32,
    ) -> Self {
        Self {
            transport,
            identities,
            rotator,
            rate_limiter: RateLimiter::direct(Quota::per_second(max_requests_per_second)),
            cancel: CancellationToken::new(),
        }
    }

    /// Stops retries, backoff sleeps and in-flight attempts once `token` fires
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fetches `url` until success or the attempt budget is spent
    pub async fn fetch(&self, url: &str, options: &FetchOptions) -> FetchOutcome {
        let policy = &options.policy;
        let mut attempt_number = 1;

        loop {
            if self.cancel.is_cancelled() {
                return cancelled(attempt_number - 1);
            }

            let attempt = FetchAttempt {
                target_url: url.to_string(),
                method: options.method.clone(),
                identity: self.identities.next_identity(),
                proxy: self.rotator.next(),
                attempt_number,
            };
            let outcome = self.send(&attempt).await;
            log_attempt(options, &attempt, policy.max_attempts, &outcome);

            match policy.decide(attempt_number, &outcome) {
                RetryDecision::Succeed => return outcome,
                RetryDecision::Retry { backoff } => {
                    debug!(
                        "[{}] retrying {} in {:.1}s",
                        options.context,
                        url,
                        backoff.as_secs_f64()
                    );
                    tokio::select! {
                        () = tokio::time::sleep(backoff) => {}
                        () = self.cancel.cancelled() => return cancelled(attempt_number),
                    }
                    attempt_number += 1;
                }
                RetryDecision::GiveUp => {
                    return match outcome {
                        FetchOutcome::TransientFailure { reason } => {
                            self.give_up(url, options, attempt, reason.to_string()).await
                        }
                        other => other,
                    };
                }
            }
        }
    }

    /// Final step after the budget is spent: one direct request when the
    /// last attempt went through a proxy, then the give-up
    async fn give_up(
        &self,
        url: &str,
        options: &FetchOptions,
        last_attempt: FetchAttempt,
        mut last_reason: String,
    ) -> FetchOutcome {
        let mut attempts = last_attempt.attempt_number;

        if last_attempt.proxy.is_some() && !self.cancel.is_cancelled() {
            let fallback = FetchAttempt {
                identity: self.identities.next_identity(),
                proxy: None,
                attempt_number: attempts + 1,
                ..last_attempt
            };
            info!("[{}] proxy attempts exhausted, trying one direct request: {}", options.context, url);
            let outcome = self.send(&fallback).await;
            log_attempt(options, &fallback, fallback.attempt_number, &outcome);
            attempts = fallback.attempt_number;
            match outcome {
                FetchOutcome::Success { .. } => return outcome,
                FetchOutcome::TransientFailure { reason } => last_reason = reason.to_string(),
                fatal @ FetchOutcome::FatalFailure { .. } => return fatal,
            }
        }

        warn!(
            "[{}] giving up on {} after {} attempts: {}",
            options.context, url, attempts, last_reason
        );
        FetchOutcome::FatalFailure {
            reason: last_reason,
            attempts,
        }
    }

    async fn send(&self, attempt: &FetchAttempt) -> FetchOutcome {
        tokio::select! {
            () = self.rate_limiter.until_ready() => {}
            () = self.cancel.cancelled() => return cancelled(attempt.attempt_number),
        }
        tokio::select! {
            result = self.transport.execute(attempt) => match result {
                Ok((status, body)) => FetchOutcome::from_status(status, body),
                Err(reason) => FetchOutcome::TransientFailure { reason },
            },
            () = self.cancel.cancelled() => cancelled(attempt.attempt_number),
        }
    }

    /// Fetches and converts a give-up into a [`CollectionError::Fatal`]
    pub async fn fetch_body(&self, url: &str, options: &FetchOptions) -> Result<String, CollectionError> {
        match self.fetch(url, options).await {
            FetchOutcome::Success { body, .. } => Ok(body),
            FetchOutcome::FatalFailure { reason, .. } if reason == CANCELLED_REASON => Err(CollectionError::Cancelled),
            FetchOutcome::FatalFailure { reason, attempts } => Err(CollectionError::Fatal {
                url: url.to_string(),
                attempts,
                last_reason: reason,
            }),
            FetchOutcome::TransientFailure { reason } => Err(CollectionError::Fatal {
                url: url.to_string(),
                attempts: options.policy.max_attempts,
                last_reason: reason.to_string(),
            }),
        }
    }
}

fn cancelled(attempts: u32) -> FetchOutcome {
    FetchOutcome::FatalFailure {
        reason: CANCELLED_REASON.to_string(),
        attempts,
    }
}

fn log_attempt(options: &FetchOptions, attempt: &FetchAttempt, max_attempts: u32, outcome: &FetchOutcome) {
    let proxy = attempt
        .proxy
        .as_ref()
        .map_or_else(|| "direct".to_string(), ToString::to_string);
    match outcome {
        FetchOutcome::Success { status, .. } => debug!(
            "[{}] attempt {}/{} via {}: HTTP {} {}",
            options.context, attempt.attempt_number, max_attempts, proxy, status, attempt.target_url
        ),
        FetchOutcome::TransientFailure { reason } => info!(
            "[{}] attempt {}/{} via {} failed: {} ({})",
            options.context, attempt.attempt_number, max_attempts, proxy, reason, attempt.target_url
        ),
        FetchOutcome::FatalFailure { reason, .. } => debug!(
            "[{}] attempt {}/{} via {} stopped: {}",
            options.context, attempt.attempt_number, max_attempts, proxy, reason
        ),
    }
}
