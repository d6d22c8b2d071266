use chrono::{DateTime, NaiveDateTime, Timelike, Utc};

/// Current time truncated to whole seconds, matching the persisted
/// `YYYY-MM-DD HH:MM:SS` column form.
pub fn now() -> NaiveDateTime {
    let n = Utc::now().naive_utc();
    n.with_nanosecond(0).unwrap_or(n)
}

pub fn to_utc(n: NaiveDateTime) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(n, Utc)
}

/// Incoming wire timestamps are truncated the same way before they hit a
/// column, so stored values always round-trip unchanged.
pub fn to_naive(d: DateTime<Utc>) -> NaiveDateTime {
    let n = d.naive_utc();
    n.with_nanosecond(0).unwrap_or(n)
}
