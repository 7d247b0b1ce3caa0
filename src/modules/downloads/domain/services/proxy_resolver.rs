//! Proxy selection for engine runs
//!
//! Resolution is pure over a key lookup so the environment can be swapped out
//! in tests. A `None` URL always means a direct connection.
use crate::modules::downloads::domain::value_objects::{ProxyConfig, ProxyMode};
use crate::shared::errors::{AppError, AppResult};
use log::{debug, warn};
use url::Url;

const PROXY_SCHEMES: [&str; 5] = ["http", "https", "socks4", "socks5", "socks"];

/// Checked in order; the first non-empty value wins
const ENV_PROXY_KEYS: [&str; 6] = [
    "HTTPS_PROXY",
    "https_proxy",
    "HTTP_PROXY",
    "http_proxy",
    "ALL_PROXY",
    "all_proxy",
];

/// One way of reaching the network, tried in order by lookups
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    pub label: &'static str,
    pub url: Option<String>,
}

impl ProxyRoute {
    fn direct() -> Self {
        Self {
            label: "no proxy",
            url: None,
        }
    }

    fn via(label: &'static str, url: String) -> Self {
        Self {
            label,
            url: Some(url),
        }
    }
}

/// Process environment lookup used outside tests
pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Trimmed proxy URL with a supported scheme and a host
pub fn validate_proxy_url(raw: &str) -> AppResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidInput("Proxy URL is empty".to_string()));
    }

    let parsed = Url::parse(trimmed)
        .map_err(|e| AppError::InvalidInput(format!("Invalid proxy URL {}: {}", trimmed, e)))?;
    if !PROXY_SCHEMES.contains(&parsed.scheme()) {
        return Err(AppError::InvalidInput(format!(
            "Unsupported proxy scheme {}",
            parsed.scheme()
        )));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(AppError::InvalidInput(format!(
            "Proxy URL {} has no host",
            trimmed
        )));
    }
    Ok(trimmed.to_string())
}

/// Proxy advertised by the environment, if any
pub fn system_proxy<F>(lookup: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    ENV_PROXY_KEYS
        .iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

fn custom_proxy(config: &ProxyConfig) -> Option<String> {
    let raw = config.custom_url.as_deref()?;
    match validate_proxy_url(raw) {
        Ok(url) => Some(url),
        Err(e) => {
            warn!("Ignoring custom proxy: {}", e);
            None
        }
    }
}

/// Proxy for a single run
pub fn resolve_proxy<F>(config: &ProxyConfig, lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let resolved = match config.mode {
        ProxyMode::None => None,
        ProxyMode::System => system_proxy(&lookup),
        ProxyMode::Custom => match custom_proxy(config) {
            Some(url) => Some(url),
            None if config.fallback => system_proxy(&lookup),
            None => None,
        },
    };
    debug!("Proxy resolved to {:?} ({:?} mode)", resolved, config.mode);
    resolved
}

/// Ordered routes for operations that may retry on another route
pub fn proxy_strategies<F>(config: &ProxyConfig, lookup: F) -> Vec<ProxyRoute>
where
    F: Fn(&str) -> Option<String>,
{
    let mut routes = Vec::new();
    match config.mode {
        ProxyMode::None => {}
        ProxyMode::System => {
            if let Some(url) = system_proxy(&lookup) {
                routes.push(ProxyRoute::via("system proxy", url));
            }
        }
        ProxyMode::Custom => {
            let custom = custom_proxy(config);
            if let Some(url) = custom.clone() {
                routes.push(ProxyRoute::via("custom proxy", url));
            }
            if !config.fallback {
                if routes.is_empty() {
                    routes.push(ProxyRoute::direct());
                }
                return routes;
            }
            if let Some(url) = system_proxy(&lookup).filter(|url| Some(url) != custom.as_ref()) {
                routes.push(ProxyRoute::via("system proxy", url));
            }
        }
    }
    routes.push(ProxyRoute::direct());
    routes
}
