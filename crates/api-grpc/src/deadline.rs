//! Request deadlines.
//!
//! Clients state their deadline in the `grpc-timeout` header
//! (`<1-8 digits><unit>`, unit one of `H M S m u n`). The effective deadline is the earlier of
//! that and the server's own transfer limit.

use std::time::Duration;
use tokio::time::Instant;
use tonic::metadata::MetadataMap;

pub const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Parses a `grpc-timeout` header value. Returns `None` for malformed values.
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if !value.is_ascii() || value.len() < 2 || value.len() > 9 {
        return None;
    }

    let (digits, unit) = value.split_at(value.len() - 1);
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;

    let timeout = match unit {
        "H" => Duration::from_secs(amount * 60 * 60),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(timeout)
}

/// The instant by which a transfer started now must finish.
pub fn request_deadline(metadata: &MetadataMap, limit: Duration) -> Instant {
    let requested = metadata
        .get(GRPC_TIMEOUT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_grpc_timeout);

    let timeout = requested.map_or(limit, |t| t.min(limit));
    Instant::now() + timeout
}
