//! Static catalog of proxy endpoints with a rotation cursor.

use reqwest::Url;

use crate::error::ProxyError;

/// Identity and secret presented to every proxy endpoint.
#[derive(Clone)]
pub struct ProxyCredentials {
    identity: String,
    secret: String,
}

impl ProxyCredentials {
    #[must_use]
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("identity", &"[redacted]")
            .field("secret", &"[redacted]")
            .finish()
    }
}

/// A SOCKS5 proxy address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
}

impl ProxyEndpoint {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Renders `socks5://<identity>:<secret>@<host>:<port>`.
    ///
    /// Credentials are percent-encoded by [`Url`], so secrets containing `@`
    /// or `:` survive the round trip.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Configuration`] if the host does not form a valid URL.
    pub fn proxy_url(&self, credentials: &ProxyCredentials) -> Result<String, ProxyError> {
        let invalid = |reason: String| {
            ProxyError::Configuration(format!("invalid proxy host \"{}\": {reason}", self.host))
        };
        let mut url = Url::parse(&format!("socks5://{}:{}", self.host, self.port))
            .map_err(|e| invalid(e.to_string()))?;
        url.set_username(&credentials.identity)
            .map_err(|()| invalid("cannot carry a username".to_owned()))?;
        url.set_password(Some(&credentials.secret))
            .map_err(|()| invalid("cannot carry a password".to_owned()))?;
        Ok(url.to_string())
    }
}

impl std::fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Ordered, non-empty list of endpoints plus the index of the current one.
#[derive(Debug, Clone)]
pub struct ProxyPool {
    endpoints: Vec<ProxyEndpoint>,
    cursor: usize,
}

impl ProxyPool {
    /// # Errors
    ///
    /// Returns [`ProxyError::Configuration`] if `endpoints` is empty.
    pub fn new(endpoints: Vec<ProxyEndpoint>) -> Result<Self, ProxyError> {
        if endpoints.is_empty() {
            return Err(ProxyError::Configuration(
                "proxy pool must contain at least one endpoint".to_owned(),
            ));
        }
        Ok(Self {
            endpoints,
            cursor: 0,
        })
    }

    /// Builds a pool where every host listens on the same `port`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Configuration`] if `hosts` is empty.
    pub fn from_hosts<S: AsRef<str>>(hosts: &[S], port: u16) -> Result<Self, ProxyError> {
        Self::new(
            hosts
                .iter()
                .map(|h| ProxyEndpoint::new(h.as_ref(), port))
                .collect(),
        )
    }

    #[must_use]
    pub fn current(&self) -> &ProxyEndpoint {
        &self.endpoints[self.cursor]
    }

    /// Advances the cursor (wrapping) and returns the new current endpoint.
    pub fn next(&mut self) -> &ProxyEndpoint {
        self.cursor = (self.cursor + 1) % self.endpoints.len();
        &self.endpoints[self.cursor]
    }

    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Always `false`; construction rejects empty pools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
