//! A network session pinned to one proxy endpoint at a time.
//!
//! Lifecycle: `Uninitialized → Verifying → Active ⇄ Degraded`, with `Failed`
//! reached only when [`ProxySession::initialize`] cannot verify any endpoint.
//! Retries are rotations: a failed request moves the pool cursor, rebuilds the
//! transport on the next endpoint, and tries again. The cursor is never reset,
//! so later fetches continue from wherever the last rotation left off.

use std::time::Duration;

use async_trait::async_trait;
use rentwatch_core::AppConfig;

use crate::error::ProxyError;
use crate::fetcher::{FetchResult, Fetcher};
use crate::pool::{ProxyCredentials, ProxyPool};
use crate::probe::probe_address;
use crate::rotation::jittered_delay;
use crate::transport::{Connector, HttpResponse, ReqwestConnector, Route, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Verifying,
    Active,
    /// At least one rotation happened since the last successful response.
    Degraded,
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Verifying => "verifying",
            SessionState::Active => "active",
            SessionState::Degraded => "degraded",
            SessionState::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Attempts per `initialize` and per `fetch`; each failed attempt rotates.
    pub max_retries: u32,
    pub probe_urls: Vec<String>,
    pub request_timeout: Duration,
    pub probe_timeout: Duration,
    /// Base pause between rotations inside one `fetch`, jittered ± 25 %.
    pub rotation_delay_ms: u64,
}

impl SessionSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            probe_urls: config.probe_urls.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
            rotation_delay_ms: config.rotation_delay_ms,
        }
    }
}

pub struct ProxySession<C: Connector = ReqwestConnector> {
    connector: C,
    pool: ProxyPool,
    settings: SessionSettings,
    transport: Option<C::Transport>,
    state: SessionState,
    true_address: Option<String>,
    verified_address: Option<String>,
}

impl ProxySession<ReqwestConnector> {
    /// Builds a SOCKS5 session from application config.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Configuration`] if the proxy credentials are not
    /// configured, the host list is empty, or the retry budget is zero.
    pub fn from_app_config(config: &AppConfig) -> Result<Self, ProxyError> {
        let (Some(user), Some(pass)) = (&config.proxy_user, &config.proxy_pass) else {
            return Err(ProxyError::Configuration(
                "RENTWATCH_PROXY_USER and RENTWATCH_PROXY_PASS must be set".to_owned(),
            ));
        };
        let pool = ProxyPool::from_hosts(&config.proxy_hosts, config.proxy_port)?;
        let connector = ReqwestConnector::new(ProxyCredentials::new(user, pass), &config.user_agent);
        Self::new(connector, pool, SessionSettings::from_app_config(config))
    }
}

impl<C: Connector> ProxySession<C> {
    /// # Errors
    ///
    /// Returns [`ProxyError::Configuration`] if `max_retries` is zero or no
    /// probe URLs are given.
    pub fn new(connector: C, pool: ProxyPool, settings: SessionSettings) -> Result<Self, ProxyError> {
        if settings.max_retries == 0 {
            return Err(ProxyError::Configuration(
                "max_retries must be at least 1".to_owned(),
            ));
        }
        if settings.probe_urls.is_empty() {
            return Err(ProxyError::Configuration(
                "at least one address probe URL is required".to_owned(),
            ));
        }
        Ok(Self {
            connector,
            pool,
            settings,
            transport: None,
            state: SessionState::Uninitialized,
            true_address: None,
            verified_address: None,
        })
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn pool(&self) -> &ProxyPool {
        &self.pool
    }

    /// The caller's own address, as seen without a proxy.
    #[must_use]
    pub fn true_address(&self) -> Option<&str> {
        self.true_address.as_deref()
    }

    /// The address the verified proxy presents to the outside world.
    #[must_use]
    pub fn verified_address(&self) -> Option<&str> {
        self.verified_address.as_deref()
    }

    /// Learns the true address directly, then walks the pool until an endpoint
    /// answers the same probe with a different address.
    ///
    /// # Errors
    ///
    /// - [`ProxyError::AddressProbe`] if no probe endpoint answers directly.
    /// - [`ProxyError::ProxySetup`] if `max_retries` endpoints in a row are
    ///   unreachable or leak the true address.
    /// - [`ProxyError::Http`] if the direct client cannot be built.
    pub async fn initialize(&mut self) -> Result<(), ProxyError> {
        self.state = SessionState::Verifying;
        self.transport = None;
        self.verified_address = None;

        let direct = match self.connector.connect(Route::Direct) {
            Ok(t) => t,
            Err(e) => {
                self.state = SessionState::Failed;
                return Err(e);
            }
        };
        let Some(true_address) =
            probe_address(&direct, &self.settings.probe_urls, self.settings.probe_timeout).await
        else {
            self.state = SessionState::Failed;
            tracing::error!("could not determine the true external address; aborting");
            return Err(ProxyError::AddressProbe {
                probes: self.settings.probe_urls.len(),
            });
        };
        drop(direct);
        tracing::debug!(true_address = %true_address, "true external address resolved");
        self.true_address = Some(true_address.clone());

        let max_retries = self.settings.max_retries;
        for attempt in 1..=max_retries {
            self.rebind();
            let proxied = match &self.transport {
                Some(t) => {
                    probe_address(t, &self.settings.probe_urls, self.settings.probe_timeout).await
                }
                None => None,
            };

            match proxied {
                Some(address) if address != true_address => {
                    tracing::info!(
                        endpoint = %self.pool.current(),
                        proxy_address = %address,
                        "proxy verified"
                    );
                    self.verified_address = Some(address);
                    self.state = SessionState::Active;
                    return Ok(());
                }
                Some(_) => {
                    tracing::warn!(
                        endpoint = %self.pool.current(),
                        attempt,
                        max_retries,
                        "proxy does not mask the caller address; rotating"
                    );
                }
                None => {
                    tracing::warn!(
                        endpoint = %self.pool.current(),
                        attempt,
                        max_retries,
                        "proxy unreachable during verification; rotating"
                    );
                }
            }
            self.pool.next();
        }

        self.transport = None;
        self.state = SessionState::Failed;
        Err(ProxyError::ProxySetup {
            attempts: max_retries,
        })
    }

    /// Releases the transport. Safe to call any number of times; the session
    /// can be initialised again afterwards.
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            tracing::debug!("proxy session closed");
        }
        self.state = SessionState::Uninitialized;
        self.verified_address = None;
    }

    /// Rebuilds the transport on the pool's current endpoint. A connector
    /// failure leaves no transport bound, which the next attempt treats as a
    /// transport error.
    fn rebind(&mut self) {
        match self.connector.connect(Route::Proxy(self.pool.current())) {
            Ok(t) => self.transport = Some(t),
            Err(e) => {
                tracing::warn!(endpoint = %self.pool.current(), error = %e, "could not bind proxy client");
                self.transport = None;
            }
        }
    }

    async fn attempt(&self, url: &str) -> Result<HttpResponse, ProxyError> {
        match &self.transport {
            Some(t) => t.get(url, self.settings.request_timeout).await,
            None => Err(ProxyError::Transport {
                url: url.to_owned(),
                reason: "no proxy client bound".to_owned(),
            }),
        }
    }
}

#[async_trait]
impl<C: Connector> Fetcher for ProxySession<C> {
    async fn fetch(&mut self, url: &str) -> Result<FetchResult, ProxyError> {
        if !matches!(self.state, SessionState::Active | SessionState::Degraded) {
            return Err(ProxyError::NotActive { state: self.state });
        }

        let max_retries = self.settings.max_retries;
        for attempt in 1..=max_retries {
            match self.attempt(url).await {
                Ok(response) if response.status == 200 => {
                    self.state = SessionState::Active;
                    return Ok(FetchResult::found(response));
                }
                Ok(response) if response.status == 404 => {
                    let body = String::from_utf8_lossy(&response.body);
                    let detail = match body.trim() {
                        "" => "(no additional details provided by server)",
                        text => text,
                    };
                    tracing::warn!(
                        url = %url,
                        reason = response.reason.as_deref().unwrap_or("Not Found"),
                        detail,
                        "resource not found"
                    );
                    self.state = SessionState::Active;
                    return Ok(FetchResult::not_found(response));
                }
                Ok(response) => {
                    tracing::warn!(
                        url = %url,
                        status = response.status,
                        endpoint = %self.pool.current(),
                        attempt,
                        max_retries,
                        "request failed; rotating proxy"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        url = %url,
                        error = %e,
                        endpoint = %self.pool.current(),
                        attempt,
                        max_retries,
                        "request errored; rotating proxy"
                    );
                }
            }

            self.state = SessionState::Degraded;
            self.pool.next();
            self.rebind();
            if attempt < max_retries {
                tokio::time::sleep(jittered_delay(self.settings.rotation_delay_ms)).await;
            }
        }

        tracing::error!(url = %url, attempts = max_retries, "fetch exhausted every rotation");
        Err(ProxyError::FetchExhausted {
            url: url.to_owned(),
            attempts: max_retries,
        })
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
