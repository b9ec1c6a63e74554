use thiserror::Error;

use crate::session::SessionState;

/// Errors raised by the proxy pool, the address probe, and the session.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The underlying `reqwest::Client` could not be built.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Missing credentials, an empty pool, or an unusable setting.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// None of the probe endpoints answered the direct (proxy-less) probe.
    #[error("could not determine the true external address: {probes} probe endpoints failed")]
    AddressProbe { probes: usize },

    /// No endpoint in the pool masked the caller's address.
    #[error("failed to establish a working proxy after {attempts} attempts")]
    ProxySetup { attempts: u32 },

    /// A single URL kept failing across every rotation.
    #[error("failed to fetch {url} after {attempts} attempts")]
    FetchExhausted { url: String, attempts: u32 },

    /// The request never produced an HTTP response.
    #[error("transport error for {url}: {reason}")]
    Transport { url: String, reason: String },

    #[error("session is not active (state: {state})")]
    NotActive { state: SessionState },
}

impl ProxyError {
    /// Returns `true` for failures scoped to one URL; a crawl loop should log
    /// these and move on to the next item. Everything else aborts the run.
    #[must_use]
    pub fn is_per_item(&self) -> bool {
        matches!(
            self,
            ProxyError::FetchExhausted { .. } | ProxyError::Transport { .. }
        )
    }
}
