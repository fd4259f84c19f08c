use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub mod fallback;
pub mod health;
pub mod session;
pub mod sse;
pub mod validation;

fn format_timestamp_ms(timestamp_ms: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(timestamp_ms) * 1_000_000)
        .ok()
        .and_then(|time| time.format(&Rfc3339).ok())
        .unwrap_or_else(|| "invalid-timestamp".into())
}
