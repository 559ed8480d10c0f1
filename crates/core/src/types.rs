use chrono::{DurationRound, TimeDelta};

/// Entity-store document ids are opaque strings.
pub type DocId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Drop the seconds and sub-second part of a timestamp.
pub fn truncate_to_minute(ts: Timestamp) -> Timestamp {
    ts.duration_trunc(TimeDelta::minutes(1)).unwrap_or(ts)
}
