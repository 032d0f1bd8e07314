use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::state::clock::Millis;

pub mod health;
pub mod phase;
pub mod snapshot;
pub mod sse;
pub mod validation;
pub mod ws;

fn format_millis(millis: Millis) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .ok()
        .and_then(|time| time.format(&Rfc3339).ok())
        .unwrap_or_else(|| "invalid-timestamp".into())
}
