use raffle_execution::{PrizeParseError, PrizeTable};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_WIN_PROBABILITY: f64 = 0.18;
pub const DEFAULT_SECRET: &str = "raffle-dev-secret";
pub const DEFAULT_ALLOWED_HOSTS: &str = "localhost:3000";
pub const DEFAULT_PREVIEW_DOMAIN_SUFFIX: &str = ".vercel.app";
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
pub const DEFAULT_RATE_LIMIT_MAX_REQUESTS: usize = 20;
pub const DEFAULT_CODE_TTL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_HTTP_BODY_LIMIT_BYTES: usize = 16 * 1024;
pub const DEFAULT_CACHE_REDIS_PREFIX: &str = "raffle:";

/// Which identity a caller's daily outcome is tied to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FairnessMode {
    /// One outcome per network bucket per day; client ids are ignored.
    Network,
    /// Client ids join the seed and repeated requests replay the stored result.
    #[default]
    Client,
}

impl FairnessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FairnessMode::Network => "network",
            FairnessMode::Client => "client",
        }
    }
}

impl fmt::Display for FairnessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FairnessMode {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "network" => Ok(Self::Network),
            "client" => Ok(Self::Client),
            _ => Err("valid values: network, client"),
        }
    }
}

/// Shared secret mixed into every seed and code. Redacted in debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_SECRET
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("win probability must be in (0, 1), got {0}")]
    WinProbability(f64),
    #[error("secret must not be empty")]
    EmptySecret,
    #[error("rate limit window must be positive")]
    RateLimitWindow,
    #[error("rate limit ceiling must be positive")]
    RateLimitCeiling,
    #[error("code ttl must be positive")]
    CodeTtl,
    #[error("invalid prize list: {0}")]
    Prizes(#[from] PrizeParseError),
}

#[derive(Clone, Debug)]
pub struct RaffleConfig {
    pub win_probability: f64,
    pub secret: Secret,
    /// Lowercase `host[:port]` entries accepted by the origin guard.
    pub allowed_hosts: Vec<String>,
    pub allow_preview_domains: bool,
    pub preview_domain_suffix: String,
    pub rate_limit_window_secs: u64,
    pub rate_limit_max_requests: usize,
    pub fairness: FairnessMode,
    pub prizes: PrizeTable,
    /// Reject malformed JSON bodies instead of treating them as `{}`.
    pub strict_body: bool,
    pub code_ttl_secs: u64,
    pub http_rate_limit_per_second: Option<u64>,
    pub http_rate_limit_burst: Option<u32>,
    pub http_body_limit_bytes: Option<usize>,
    pub cache_redis_url: Option<String>,
    pub cache_redis_prefix: String,
    /// Token required by the metrics endpoints; open when unset.
    pub metrics_auth_token: Option<String>,
}

impl Default for RaffleConfig {
    fn default() -> Self {
        Self {
            win_probability: DEFAULT_WIN_PROBABILITY,
            secret: Secret::new(DEFAULT_SECRET),
            allowed_hosts: parse_host_list(DEFAULT_ALLOWED_HOSTS),
            allow_preview_domains: true,
            preview_domain_suffix: DEFAULT_PREVIEW_DOMAIN_SUFFIX.to_string(),
            rate_limit_window_secs: DEFAULT_RATE_LIMIT_WINDOW_SECS,
            rate_limit_max_requests: DEFAULT_RATE_LIMIT_MAX_REQUESTS,
            fairness: FairnessMode::default(),
            prizes: PrizeTable::default(),
            strict_body: false,
            code_ttl_secs: DEFAULT_CODE_TTL_SECS,
            http_rate_limit_per_second: None,
            http_rate_limit_burst: None,
            http_body_limit_bytes: Some(DEFAULT_HTTP_BODY_LIMIT_BYTES),
            cache_redis_url: None,
            cache_redis_prefix: DEFAULT_CACHE_REDIS_PREFIX.to_string(),
            metrics_auth_token: None,
        }
    }
}

impl RaffleConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = self.win_probability;
        if !p.is_finite() || p <= 0.0 || p >= 1.0 {
            return Err(ConfigError::WinProbability(p));
        }
        if self.secret.expose().is_empty() {
            return Err(ConfigError::EmptySecret);
        }
        if self.rate_limit_window_secs == 0 {
            return Err(ConfigError::RateLimitWindow);
        }
        if self.rate_limit_max_requests == 0 {
            return Err(ConfigError::RateLimitCeiling);
        }
        if self.code_ttl_secs == 0 {
            return Err(ConfigError::CodeTtl);
        }
        Ok(())
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn code_ttl(&self) -> Duration {
        Duration::from_secs(self.code_ttl_secs)
    }

    /// Preview suffix consulted by the origin guard, if previews are enabled.
    pub fn preview_suffix(&self) -> Option<&str> {
        let suffix = self.preview_domain_suffix.trim();
        (self.allow_preview_domains && !suffix.is_empty()).then_some(suffix)
    }
}

/// Split a comma-separated host list, trimming and lowercasing entries.
pub fn parse_host_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|host| host.trim().to_ascii_lowercase())
        .filter(|host| !host.is_empty())
        .collect()
}
