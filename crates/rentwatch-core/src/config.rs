use std::path::PathBuf;

use crate::app_config::{AppConfig, SshTunnelConfig, StoreAccess};
use crate::ConfigError;

/// Default SOCKS5 host catalog used when `RENTWATCH_PROXY_HOSTS` is unset.
pub const DEFAULT_PROXY_HOSTS: &[&str] = &[
    "amsterdam.nl.socks.nordhold.net",
    "atlanta.us.socks.nordhold.net",
    "dallas.us.socks.nordhold.net",
    "los-angeles.us.socks.nordhold.net",
    "nl.socks.nordhold.net",
    "se.socks.nordhold.net",
    "stockholm.se.socks.nordhold.net",
    "us.socks.nordhold.net",
    "new-york.us.socks.nordhold.net",
    "san-francisco.us.socks.nordhold.net",
    "chicago.us.socks.nordhold.net",
    "phoenix.us.socks.nordhold.net",
];

/// Plain-text "echo my address" services, tried in order.
pub const DEFAULT_PROBE_URLS: &[&str] = &[
    "https://checkip.amazonaws.com",
    "https://api.ipify.org",
    "https://icanhazip.com",
];

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36";

const DEFAULT_SEARCH_URL: &str = "https://www.bezrealitky.cz/vyhledat?offerType=PRONAJEM&estateType=BYT&regionOsmIds=R51684&osm_value=%C4%8Cesko&location=exact&currency=CZK&page=";
const DEFAULT_LISTING_BASE_URL: &str = "https://www.bezrealitky.cz/nemovitosti-byty-domy";

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Parsing and validation live here, decoupled from the process environment,
/// so tests can drive it with a plain `HashMap`.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(var.to_string()))
    };

    let optional = |var: &str| -> Option<String> { lookup(var).ok().filter(|v| !v.is_empty()) };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_u16 = |var: &str, default: &str| -> Result<u16, ConfigError> {
        or_default(var, default)
            .parse::<u16>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_list = |var: &str, default: &[&str]| -> Vec<String> {
        match lookup(var) {
            Ok(raw) => split_list(&raw),
            Err(_) => default.iter().map(|s| (*s).to_string()).collect(),
        }
    };

    let log_level = or_default("RENTWATCH_LOG_LEVEL", "info");

    let proxy_user = optional("RENTWATCH_PROXY_USER");
    let proxy_pass = optional("RENTWATCH_PROXY_PASS");
    let proxy_hosts = parse_list("RENTWATCH_PROXY_HOSTS", DEFAULT_PROXY_HOSTS);
    if proxy_hosts.is_empty() {
        return Err(invalid(
            "RENTWATCH_PROXY_HOSTS",
            "at least one proxy host is required".to_string(),
        ));
    }
    let proxy_port = parse_u16("RENTWATCH_PROXY_PORT", "1080")?;
    let probe_urls = parse_list("RENTWATCH_PROBE_URLS", DEFAULT_PROBE_URLS);
    if probe_urls.is_empty() {
        return Err(invalid(
            "RENTWATCH_PROBE_URLS",
            "at least one probe URL is required".to_string(),
        ));
    }
    let max_retries = parse_u32("RENTWATCH_MAX_RETRIES", "10")?;
    if max_retries == 0 {
        return Err(invalid(
            "RENTWATCH_MAX_RETRIES",
            "must be at least 1".to_string(),
        ));
    }
    let rotation_delay_ms = parse_u64("RENTWATCH_ROTATION_DELAY_MS", "500")?;
    let request_timeout_secs = parse_u64("RENTWATCH_REQUEST_TIMEOUT_SECS", "30")?;
    let probe_timeout_secs = parse_u64("RENTWATCH_PROBE_TIMEOUT_SECS", "10")?;
    let user_agent = or_default("RENTWATCH_USER_AGENT", DEFAULT_USER_AGENT);

    let database_url = optional("DATABASE_URL");
    let db_host = or_default("RENTWATCH_DB_HOST", "localhost");
    let db_port = parse_u16("RENTWATCH_DB_PORT", "5432")?;
    let db_user = optional("RENTWATCH_DB_USER");
    let db_password = optional("RENTWATCH_DB_PASS");
    let db_name = optional("RENTWATCH_DB_NAME");
    let store_access = if parse_bool(&or_default("RENTWATCH_DB_DIRECT", "true"))
        .ok_or_else(|| invalid("RENTWATCH_DB_DIRECT", "expected true or false".to_string()))?
    {
        StoreAccess::Direct
    } else {
        StoreAccess::Tunnel(SshTunnelConfig {
            host: require("RENTWATCH_SSH_HOST")?,
            user: require("RENTWATCH_SSH_USER")?,
            key_path: optional("RENTWATCH_SSH_KEY").map(PathBuf::from),
        })
    };
    let db_max_connections = parse_u32("RENTWATCH_DB_MAX_CONNECTIONS", "5")?;
    let db_min_connections = parse_u32("RENTWATCH_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_u64("RENTWATCH_DB_ACQUIRE_TIMEOUT_SECS", "10")?;
    let db_max_lifetime_secs = parse_u64("RENTWATCH_DB_MAX_LIFETIME_SECS", "1800")?;

    let pages_dir = PathBuf::from(or_default("RENTWATCH_DIR_PAGES", "./data/pages"));
    let listings_dir = PathBuf::from(or_default("RENTWATCH_DIR_LISTINGS", "./data/listings"));
    let images_dir = PathBuf::from(or_default("RENTWATCH_DIR_IMAGES", "./data/images"));
    let archive_dir = PathBuf::from(or_default("RENTWATCH_DIR_ARCHIVE", "./data/archive"));

    let search_url = or_default("RENTWATCH_SEARCH_URL", DEFAULT_SEARCH_URL);
    let listing_base_url = or_default("RENTWATCH_LISTING_BASE_URL", DEFAULT_LISTING_BASE_URL)
        .trim_end_matches('/')
        .to_string();
    let page_size = parse_u32("RENTWATCH_PAGE_SIZE", "15")?;
    if page_size == 0 {
        return Err(invalid(
            "RENTWATCH_PAGE_SIZE",
            "must be at least 1".to_string(),
        ));
    }
    let image_object_prefix = or_default("RENTWATCH_IMAGE_OBJECT_PREFIX", "images")
        .trim_end_matches('/')
        .to_string();

    Ok(AppConfig {
        log_level,
        proxy_user,
        proxy_pass,
        proxy_hosts,
        proxy_port,
        probe_urls,
        max_retries,
        rotation_delay_ms,
        request_timeout_secs,
        probe_timeout_secs,
        user_agent,
        database_url,
        db_host,
        db_port,
        db_user,
        db_password,
        db_name,
        store_access,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        db_max_lifetime_secs,
        pages_dir,
        listings_dir,
        images_dir,
        archive_dir,
        search_url,
        listing_base_url,
        page_size,
        image_object_prefix,
    })
}

/// Splits a comma-separated list, dropping blanks.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
