use chrono::{DateTime, Utc};
use std::fmt;

/// UTC calendar day (`YYYY-MM-DD`) a decision belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DayKey(String);

impl DayKey {
    pub fn from_datetime(now: DateTime<Utc>) -> Self {
        Self(now.format("%Y-%m-%d").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
