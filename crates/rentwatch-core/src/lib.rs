pub mod app_config;
pub mod config;
pub mod listings;

pub use app_config::{AppConfig, SshTunnelConfig, StoreAccess};
pub use config::{load_app_config, load_app_config_from_env};
pub use listings::{file_stamp, DownloadStatus, ImageRecord, ListingSnapshot, NewImage};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}
