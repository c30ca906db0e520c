//! Raffle decision logic.
//!
//! This crate turns a caller identity (network bucket, optional client id), a UTC
//! day, and a shared secret into a reproducible outcome and, for winners, a
//! weighted prize.
//!
//! ## Determinism requirements
//! - Do not read wall-clock time here; callers pass the instant they decided at.
//! - Do not use entropy; every draw is derived from the seed string.
//! - The win draw and the prize draw use different seeds.
//!
//! ## Pipeline
//! ```
//! use chrono::{TimeZone, Utc};
//! use raffle_execution::{draw, BucketKey, DayKey, DrawInput, PrizeTable};
//!
//! let bucket = BucketKey::from_address("10.0.0.42");
//! let day = DayKey::from_datetime(Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap());
//! let prizes: PrizeTable = "500 fichas:70,1000 fichas:30".parse().unwrap();
//! let outcome = draw(
//!     &DrawInput { bucket: &bucket, day: &day, secret: "s", client_id: None },
//!     0.18,
//!     &prizes,
//! );
//! assert!(outcome.won);
//! ```

pub mod code;
pub mod day;
pub mod decide;
pub mod network;
pub mod prize;
pub mod seed;

pub use code::{checksum, issue_code, CODE_LEN};
pub use day::DayKey;
pub use decide::{decide, decision_seed, Decision};
pub use network::{client_address, BucketKey, FALLBACK_ADDRESS, UNKNOWN_BUCKET};
pub use prize::{prize_seed, select, Prize, PrizeParseError, PrizeTable};
pub use seed::{seed_fraction, seed_hash};

/// Identity and day a draw is made for.
#[derive(Clone, Copy, Debug)]
pub struct DrawInput<'a> {
    pub bucket: &'a BucketKey,
    pub day: &'a DayKey,
    pub secret: &'a str,
    pub client_id: Option<&'a str>,
}

/// Outcome of a draw. Losers never carry a prize.
#[derive(Clone, Debug, PartialEq)]
pub struct Outcome {
    pub won: bool,
    pub prize: Option<Prize>,
    pub seed: String,
}

/// Decide the outcome for `input` and, on a win, select a prize from a seed
/// derived from the decision seed.
pub fn draw(input: &DrawInput<'_>, win_probability: f64, prizes: &PrizeTable) -> Outcome {
    let Decision { won, seed } = decide(
        input.bucket,
        input.day,
        input.secret,
        input.client_id,
        win_probability,
    );
    let prize = won.then(|| prizes.select(seed_fraction(&prize_seed(&seed))));
    Outcome { won, prize, seed }
}
