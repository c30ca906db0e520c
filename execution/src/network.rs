//! Caller address normalization.
//!
//! Raw addresses are coarsened into bucket keys so that every host in the same
//! network block shares one outcome per day: IPv4 collapses to its /24, IPv6 to
//! its first three 16-bit groups (/48). Anything that does not parse lands in a
//! single shared unknown bucket.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Bucket shared by every caller whose address is missing or unparseable.
pub const UNKNOWN_BUCKET: &str = "0.0.0.*";

/// Address used when neither headers nor the transport yield one.
pub const FALLBACK_ADDRESS: &str = "0.0.0.0";

/// Privacy-reduced network key for a caller.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BucketKey(String);

impl BucketKey {
    /// Normalize a raw address (optionally with a port) into a bucket key.
    pub fn from_address(raw: &str) -> Self {
        match parse_address(raw.trim()) {
            Some(IpAddr::V4(v4)) => Self::from_v4(v4),
            Some(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
                Some(v4) => Self::from_v4(v4),
                None => Self::from_v6(v6),
            },
            None => Self::unknown(),
        }
    }

    pub fn unknown() -> Self {
        Self(UNKNOWN_BUCKET.to_string())
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN_BUCKET
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_v4(addr: Ipv4Addr) -> Self {
        let [a, b, c, _] = addr.octets();
        Self(format!("{a}.{b}.{c}.*"))
    }

    fn from_v6(addr: Ipv6Addr) -> Self {
        let segments = addr.segments();
        Self(format!(
            "{:x}:{:x}:{:x}::****",
            segments[0], segments[1], segments[2]
        ))
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn parse_address(raw: &str) -> Option<IpAddr> {
    if raw.is_empty() {
        return None;
    }
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}

/// Pick the caller address from proxy header values (highest precedence
/// first), falling back to the transport peer and then [`FALLBACK_ADDRESS`].
///
/// Header values may carry a forwarding chain; only the first comma-separated
/// entry is used.
pub fn client_address<'a>(
    header_values: impl IntoIterator<Item = Option<&'a str>>,
    peer: Option<IpAddr>,
) -> String {
    for value in header_values.into_iter().flatten() {
        let first = value.split(',').next().unwrap_or_default().trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    peer.map(|ip| ip.to_string())
        .unwrap_or_else(|| FALLBACK_ADDRESS.to_string())
}
