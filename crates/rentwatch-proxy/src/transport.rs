//! The network seam under [`ProxySession`](crate::ProxySession).
//!
//! A [`Connector`] builds one [`Transport`] per route (direct, or through a
//! specific proxy endpoint). The session throws the transport away and asks
//! for a new one on every rotation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::ProxyError;
use crate::pool::{ProxyCredentials, ProxyEndpoint};

/// A fully-read HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Canonical reason phrase for `status`, e.g. `"Not Found"`.
    pub reason: Option<String>,
    pub body: Vec<u8>,
    /// URL after redirects.
    pub final_url: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Issues a GET and reads the whole body.
    ///
    /// Non-2xx statuses are returned as `Ok`; only failures that never produced
    /// a response are errors.
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse, ProxyError>;
}

#[derive(Debug, Clone, Copy)]
pub enum Route<'a> {
    Direct,
    Proxy(&'a ProxyEndpoint),
}

pub trait Connector: Send + Sync {
    type Transport: Transport;

    /// Builds a transport bound to `route`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError`] if the client cannot be constructed.
    fn connect(&self, route: Route<'_>) -> Result<Self::Transport, ProxyError>;
}

/// Production connector: one `reqwest::Client` per route, SOCKS5 when proxied.
pub struct ReqwestConnector {
    credentials: ProxyCredentials,
    user_agent: String,
    connect_timeout: Duration,
}

impl ReqwestConnector {
    #[must_use]
    pub fn new(credentials: ProxyCredentials, user_agent: &str) -> Self {
        Self {
            credentials,
            user_agent: user_agent.to_owned(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl Connector for ReqwestConnector {
    type Transport = ReqwestTransport;

    fn connect(&self, route: Route<'_>) -> Result<ReqwestTransport, ProxyError> {
        let builder = Client::builder()
            .user_agent(&self.user_agent)
            .connect_timeout(self.connect_timeout);

        let builder = match route {
            Route::Direct => builder.no_proxy(),
            Route::Proxy(endpoint) => {
                let proxy = reqwest::Proxy::all(endpoint.proxy_url(&self.credentials)?)?;
                builder.proxy(proxy)
            }
        };

        Ok(ReqwestTransport {
            client: builder.build()?,
        })
    }
}

pub struct ReqwestTransport {
    client: Client,
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse, ProxyError> {
        let transport_err = |e: reqwest::Error| ProxyError::Transport {
            url: url.to_owned(),
            reason: e.to_string(),
        };

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(transport_err)?;

        let status = response.status();
        let final_url = response.url().to_string();
        let body = response.bytes().await.map_err(transport_err)?;

        Ok(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().map(str::to_owned),
            body: body.to_vec(),
            final_url,
        })
    }
}
