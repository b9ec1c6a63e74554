use std::path::PathBuf;

/// How the durable store is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreAccess {
    /// Connect straight to `db_host:db_port`.
    Direct,
    /// Forward a local port to `db_host:db_port` through an SSH jump host.
    Tunnel(SshTunnelConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTunnelConfig {
    pub host: String,
    pub user: String,
    pub key_path: Option<PathBuf>,
}

#[derive(Clone)]
pub struct AppConfig {
    pub log_level: String,

    pub proxy_user: Option<String>,
    pub proxy_pass: Option<String>,
    pub proxy_hosts: Vec<String>,
    pub proxy_port: u16,
    pub probe_urls: Vec<String>,
    pub max_retries: u32,
    pub rotation_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub user_agent: String,

    /// Full connection string; when set it wins over the discrete `db_*` parts
    /// for direct access.
    pub database_url: Option<String>,
    pub db_host: String,
    pub db_port: u16,
    pub db_user: Option<String>,
    pub db_password: Option<String>,
    pub db_name: Option<String>,
    pub store_access: StoreAccess,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub db_max_lifetime_secs: u64,

    pub pages_dir: PathBuf,
    pub listings_dir: PathBuf,
    pub images_dir: PathBuf,
    pub archive_dir: PathBuf,

    /// Search URL template; the page number is appended verbatim.
    pub search_url: String,
    pub listing_base_url: String,
    pub page_size: u32,
    pub image_object_prefix: String,
}

impl AppConfig {
    /// Whether both halves of the proxy credentials are present.
    #[must_use]
    pub fn has_proxy_credentials(&self) -> bool {
        self.proxy_user.is_some() && self.proxy_pass.is_some()
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("log_level", &self.log_level)
            .field("proxy_user", &self.proxy_user.as_ref().map(|_| "[redacted]"))
            .field("proxy_pass", &self.proxy_pass.as_ref().map(|_| "[redacted]"))
            .field("proxy_hosts", &self.proxy_hosts)
            .field("proxy_port", &self.proxy_port)
            .field("probe_urls", &self.probe_urls)
            .field("max_retries", &self.max_retries)
            .field("rotation_delay_ms", &self.rotation_delay_ms)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("probe_timeout_secs", &self.probe_timeout_secs)
            .field("user_agent", &self.user_agent)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[redacted]"),
            )
            .field("db_host", &self.db_host)
            .field("db_port", &self.db_port)
            .field("db_user", &self.db_user)
            .field(
                "db_password",
                &self.db_password.as_ref().map(|_| "[redacted]"),
            )
            .field("db_name", &self.db_name)
            .field("store_access", &self.store_access)
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("db_max_lifetime_secs", &self.db_max_lifetime_secs)
            .field("pages_dir", &self.pages_dir)
            .field("listings_dir", &self.listings_dir)
            .field("images_dir", &self.images_dir)
            .field("archive_dir", &self.archive_dir)
            .field("search_url", &self.search_url)
            .field("listing_base_url", &self.listing_base_url)
            .field("page_size", &self.page_size)
            .field("image_object_prefix", &self.image_object_prefix)
            .finish()
    }
}
