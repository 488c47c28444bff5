use std::time::Duration;

use insyd_core::types::UserId;
use reqwest::Url;

use crate::reconnect::{BackoffPolicy, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP};

/// Default consecutive failed handshakes before the channel gives up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default page size of the feed's snapshot request.
pub const DEFAULT_LIST_LIMIT: u32 = 50;

const DEFAULT_API_URL: &str = "http://localhost:3001";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Client configuration, shared by the directory client and the push
/// channel of one user session.
///
/// Build one with [`ClientConfig::new`] and override fields directly, or
/// load it from the environment with [`ClientConfig::from_env`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base HTTP address, e.g. `https://api.example.com`.
    pub api_url: String,
    /// Push-channel address. Derived from `api_url` when `None`.
    pub push_url: Option<String>,
    /// Identity every request and the push channel are bound to.
    pub user_id: UserId,
    /// Consecutive failed handshakes (without reaching Open) after which the
    /// channel stops retrying and reports itself unavailable.
    pub max_reconnect_attempts: u32,
    pub backoff: BackoffPolicy,
    /// Per-request timeout of the directory client.
    pub request_timeout: Duration,
    /// Page size of the feed's snapshot request.
    pub list_limit: u32,
    /// Re-list the feed after every successful reconnect to recover events
    /// missed while disconnected.
    pub refetch_on_reconnect: bool,
}

impl ClientConfig {
    pub fn new(api_url: impl Into<String>, user_id: impl Into<UserId>) -> Self {
        Self {
            api_url: api_url.into(),
            push_url: None,
            user_id: user_id.into(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            backoff: BackoffPolicy::default(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            list_limit: DEFAULT_LIST_LIMIT,
            refetch_on_reconnect: true,
        }
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default                        |
    /// |--------------------------------|--------------------------------|
    /// | `INSYD_API_URL`                | `http://localhost:3001`        |
    /// | `INSYD_WS_URL`                 | derived from `INSYD_API_URL`   |
    /// | `INSYD_USER_ID`                | required                       |
    /// | `INSYD_MAX_RECONNECT_ATTEMPTS` | `5`                            |
    /// | `INSYD_BACKOFF_BASE_MS`        | `1000`                         |
    /// | `INSYD_BACKOFF_CAP_MS`         | `30000`                        |
    /// | `INSYD_REQUEST_TIMEOUT_SECS`   | `10`                           |
    /// | `INSYD_LIST_LIMIT`             | `50`                           |
    /// | `INSYD_REFETCH_ON_RECONNECT`   | `true`                         |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads variables through
    /// `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup("INSYD_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into());
        let user_id = lookup("INSYD_USER_ID")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("INSYD_USER_ID"))?;

        let mut config = Self::new(api_url, user_id);
        config.push_url = lookup("INSYD_WS_URL").filter(|v| !v.trim().is_empty());

        if let Some(v) = parse_var(&lookup, "INSYD_MAX_RECONNECT_ATTEMPTS")? {
            config.max_reconnect_attempts = v;
        }
        let base_ms = parse_var(&lookup, "INSYD_BACKOFF_BASE_MS")?
            .unwrap_or(DEFAULT_BACKOFF_BASE.as_millis() as u64);
        let cap_ms = parse_var(&lookup, "INSYD_BACKOFF_CAP_MS")?
            .unwrap_or(DEFAULT_BACKOFF_CAP.as_millis() as u64);
        config.backoff = BackoffPolicy::new(
            Duration::from_millis(base_ms),
            Duration::from_millis(cap_ms),
        );
        if let Some(secs) = parse_var(&lookup, "INSYD_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = parse_var(&lookup, "INSYD_LIST_LIMIT")? {
            config.list_limit = v;
        }
        if let Some(v) = lookup("INSYD_REFETCH_ON_RECONNECT") {
            config.refetch_on_reconnect =
                parse_bool(&v).ok_or_else(|| ConfigError::Invalid {
                    var: "INSYD_REFETCH_ON_RECONNECT",
                    value: v.clone(),
                })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency. Called by the loaders; call it yourself
    /// after mutating fields by hand.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.user_id.trim().is_empty() {
            return Err(ConfigError::Missing("user_id"));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(ConfigError::Inconsistent(
                "max_reconnect_attempts must be at least 1".into(),
            ));
        }
        if self.backoff.base.is_zero() {
            return Err(ConfigError::Inconsistent("backoff base must be non-zero".into()));
        }
        if self.backoff.base > self.backoff.cap {
            return Err(ConfigError::Inconsistent(format!(
                "backoff base ({:?}) exceeds cap ({:?})",
                self.backoff.base, self.backoff.cap
            )));
        }
        if self.list_limit == 0 {
            return Err(ConfigError::Inconsistent("list_limit must be at least 1".into()));
        }
        self.api_base()?;
        self.push_endpoint()?;
        Ok(())
    }

    /// Parsed base HTTP address.
    pub fn api_base(&self) -> Result<Url, ConfigError> {
        let url = parse_url(&self.api_url)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
    }

    /// Full push-channel address including the `userId` parameter.
    pub fn push_endpoint(&self) -> Result<Url, ConfigError> {
        let mut url = match &self.push_url {
            Some(push) => {
                let url = parse_url(push)?;
                match url.scheme() {
                    "ws" | "wss" => url,
                    other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
                }
            }
            None => derive_push_url(&self.api_url)?,
        };
        url.query_pairs_mut().append_pair("userId", &self.user_id);
        Ok(url)
    }
}

/// Map an HTTP address to its push-channel equivalent: `http` becomes `ws`,
/// `https` becomes `wss`. Host, port and path are kept.
pub fn derive_push_url(api_url: &str) -> Result<Url, ConfigError> {
    let mut url = parse_url(api_url)?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|()| ConfigError::UnsupportedScheme(scheme.to_string()))?;
    Ok(url)
}

fn parse_url(raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Errors produced while loading or validating [`ClientConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{var} has an invalid value: {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("Invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Inconsistent configuration: {0}")]
    Inconsistent(String),
}
