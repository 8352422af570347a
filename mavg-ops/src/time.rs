use chrono::{DateTime, Duration, Timelike, Utc};

/// A one-minute slot, identified by the instant the minute starts.
///
/// An event belongs to the minute *after* its own truncated minute:
/// `18:11:08` lands in bucket `18:12:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bucket(DateTime<Utc>);

impl Bucket {
    pub fn of(ts: DateTime<Utc>) -> Self {
        Bucket(truncate_to_minute(ts) + Duration::minutes(1))
    }

    pub fn next(self) -> Self {
        Bucket(self.0 + Duration::minutes(1))
    }

    pub fn prev(self) -> Self {
        Bucket(self.0 - Duration::minutes(1))
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.0
    }

    /// Whole minutes from `earlier` to `self`; negative when `self` is the earlier bucket.
    pub fn minutes_since(&self, earlier: Bucket) -> i64 {
        (self.0 - earlier.0).num_minutes()
    }
}

pub fn before_or_equal(a: Bucket, b: Bucket) -> bool {
    a <= b
}

fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts - Duration::seconds(ts.second() as i64) - Duration::nanoseconds(ts.nanosecond() as i64)
}
