use async_trait::async_trait;

use crate::error::ProxyError;
use crate::transport::HttpResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Ok,
    /// HTTP 404: the resource is gone. Not a failure.
    NotFound,
}

/// Outcome of one `fetch` call.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub status: FetchStatus,
    /// `None` exactly when `status` is [`FetchStatus::NotFound`].
    pub payload: Option<Vec<u8>>,
    pub final_url: String,
}

impl FetchResult {
    pub(crate) fn found(response: HttpResponse) -> Self {
        Self {
            status: FetchStatus::Ok,
            payload: Some(response.body),
            final_url: response.final_url,
        }
    }

    pub(crate) fn not_found(response: HttpResponse) -> Self {
        Self {
            status: FetchStatus::NotFound,
            payload: None,
            final_url: response.final_url,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status == FetchStatus::NotFound
    }

    #[must_use]
    pub fn into_payload(self) -> Option<Vec<u8>> {
        self.payload
    }
}

/// Something that turns a URL into bytes.
///
/// The crawl pipeline only depends on this; [`ProxySession`](crate::ProxySession)
/// is the production implementation. `&mut self` because implementations may
/// rotate internal state on failure; share one across tasks only behind a lock.
#[async_trait]
pub trait Fetcher: Send {
    /// # Errors
    ///
    /// Returns [`ProxyError::FetchExhausted`] once every retry is spent, or
    /// [`ProxyError::NotActive`] if the fetcher was never initialised.
    async fn fetch(&mut self, url: &str) -> Result<FetchResult, ProxyError>;
}
