use thiserror::Error;

use rentwatch_proxy::ProxyError;

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A structured-data block was absent or did not have the expected shape.
    #[error("parse error in {context}: {reason}")]
    Parse { context: String, reason: String },

    #[error("invalid storage key \"{key}\": {reason}")]
    InvalidKey { key: String, reason: String },
}

impl CrawlError {
    pub(crate) fn io(path: impl std::fmt::Display, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_string(),
            source,
        }
    }

    pub(crate) fn parse(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// `true` for failures scoped to a single page, listing, or image.
    #[must_use]
    pub fn is_per_item(&self) -> bool {
        match self {
            CrawlError::Proxy(e) => e.is_per_item(),
            CrawlError::Io { .. } | CrawlError::Parse { .. } | CrawlError::InvalidKey { .. } => {
                true
            }
        }
    }
}
