//! "What is my address" probing.

use std::time::Duration;

use crate::transport::Transport;

/// Asks each probe endpoint in turn for the caller's public address and
/// returns the first non-empty answer from an HTTP 200 response.
///
/// Returns `None` when every endpoint fails; callers decide whether that is
/// fatal.
pub async fn probe_address<T>(transport: &T, probe_urls: &[String], timeout: Duration) -> Option<String>
where
    T: Transport + ?Sized,
{
    for url in probe_urls {
        match transport.get(url, timeout).await {
            Ok(response) if response.status == 200 => {
                let address = String::from_utf8_lossy(&response.body).trim().to_owned();
                if !address.is_empty() {
                    return Some(address);
                }
                tracing::debug!(url = %url, "address probe answered with an empty body");
            }
            Ok(response) => {
                tracing::debug!(url = %url, status = response.status, "address probe rejected");
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "address probe unreachable");
            }
        }
    }
    None
}
