//! Win/lose decision.
//!
//! The seed is `bucket:day:secret`, or `bucket:day:client:secret` when a client
//! identifier takes part. For fixed inputs the decision never changes, which is
//! what gives each caller exactly one outcome per day.

use crate::day::DayKey;
use crate::network::BucketKey;
use crate::seed::seed_fraction;

/// Result of [`decide`].
#[derive(Clone, Debug, PartialEq)]
pub struct Decision {
    pub won: bool,
    /// Composite seed the decision was drawn from.
    pub seed: String,
}

/// Build the decision seed for a caller.
pub fn decision_seed(
    bucket: &BucketKey,
    day: &DayKey,
    secret: &str,
    client_id: Option<&str>,
) -> String {
    match client_id {
        Some(client_id) => format!("{bucket}:{day}:{client_id}:{secret}"),
        None => format!("{bucket}:{day}:{secret}"),
    }
}

/// Decide whether the caller wins. `win_probability` is expected in `(0, 1)`.
pub fn decide(
    bucket: &BucketKey,
    day: &DayKey,
    secret: &str,
    client_id: Option<&str>,
    win_probability: f64,
) -> Decision {
    let seed = decision_seed(bucket, day, secret, client_id);
    let won = seed_fraction(&seed) < win_probability;
    Decision { won, seed }
}
