//! Proxied HTTP acquisition: a rotating pool of SOCKS5 endpoints and a
//! session that verifies the caller's address is masked before fetching.

pub mod error;
pub mod fetcher;
pub mod pool;
pub mod probe;
mod rotation;
pub mod session;
pub mod transport;

pub use error::ProxyError;
pub use fetcher::{FetchResult, FetchStatus, Fetcher};
pub use pool::{ProxyCredentials, ProxyEndpoint, ProxyPool};
pub use probe::probe_address;
pub use session::{ProxySession, SessionSettings, SessionState};
pub use transport::{Connector, HttpResponse, ReqwestConnector, ReqwestTransport, Route, Transport};
