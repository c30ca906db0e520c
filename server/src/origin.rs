//! Origin allow-listing.
//!
//! The caller-declared origin (or referrer) is parsed as a URL and its
//! `host[:port]` must match the allow-list exactly, or end with the preview
//! suffix when previews are enabled. Allowed requests get their
//! `scheme://host[:port]` echoed back for CORS; denied requests get nothing.

use std::collections::HashSet;
use url::Url;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OriginCheck {
    pub allowed: bool,
    /// Value for `Access-Control-Allow-Origin`, present only when allowed.
    pub echo_origin: Option<String>,
}

impl OriginCheck {
    fn denied() -> Self {
        Self {
            allowed: false,
            echo_origin: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct OriginGuard {
    allowed_hosts: HashSet<String>,
    preview_suffix: Option<String>,
}

impl OriginGuard {
    pub fn new<I, S>(allowed_hosts: I, preview_suffix: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed_hosts: allowed_hosts
                .into_iter()
                .map(|host| host.as_ref().trim().to_ascii_lowercase())
                .filter(|host| !host.is_empty())
                .collect(),
            preview_suffix: preview_suffix
                .map(|suffix| suffix.trim().to_ascii_lowercase())
                .filter(|suffix| !suffix.is_empty()),
        }
    }

    pub fn check(&self, declared: Option<&str>) -> OriginCheck {
        let Some(declared) = declared.map(str::trim).filter(|value| !value.is_empty()) else {
            return OriginCheck::denied();
        };
        let Ok(url) = Url::parse(declared) else {
            return OriginCheck::denied();
        };
        if !matches!(url.scheme(), "http" | "https") {
            return OriginCheck::denied();
        }
        let Some(host) = url.host_str() else {
            return OriginCheck::denied();
        };
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let allowed = self.allowed_hosts.contains(&host)
            || self
                .preview_suffix
                .as_deref()
                .is_some_and(|suffix| host.ends_with(suffix));
        if !allowed {
            return OriginCheck::denied();
        }
        OriginCheck {
            allowed: true,
            echo_origin: Some(format!("{}://{host}", url.scheme())),
        }
    }
}
