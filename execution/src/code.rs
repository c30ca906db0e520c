//! Short verification codes shown to callers.
//!
//! A code is a rolling 31-multiplier checksum over the issuance record and the
//! shared secret. It lets staff eyeball a screenshot against the server log; it
//! is not a signature and must not be treated as tamper-proof.

use crate::network::BucketKey;

/// Maximum number of characters in an issued code.
pub const CODE_LEN: usize = 8;

/// Checksum `text` followed by `secret`, one UTF-16 code unit at a time.
pub fn checksum(text: &str, secret: &str) -> u32 {
    text.encode_utf16()
        .chain(secret.encode_utf16())
        .fold(0u32, |acc, unit| {
            acc.wrapping_mul(31).wrapping_add(u32::from(unit))
        })
}

/// Issue the verification code for a decision made at `now_utc`.
///
/// The hex checksum is not zero-padded, so codes can be shorter than
/// [`CODE_LEN`].
pub fn issue_code(
    now_utc: &str,
    bucket: &BucketKey,
    client_id: Option<&str>,
    won: bool,
    secret: &str,
) -> String {
    let flag = if won { "W" } else { "L" };
    let raw = match client_id {
        Some(client_id) => format!("{now_utc}|{bucket}|{client_id}|{flag}"),
        None => format!("{now_utc}|{bucket}|{flag}"),
    };
    let mut code = format!("{:x}", checksum(&raw, secret));
    code.truncate(CODE_LEN);
    code.make_ascii_uppercase();
    code
}
