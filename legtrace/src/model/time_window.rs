use chrono::{DateTime, Duration, Utc};

/// A half-open `[start, end]` time window used to scope sample, transit, and
/// write queries (spec §6).
#[derive(Debug, Clone, Copy)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> TimeWindow {
        TimeWindow { start, end }
    }

    pub fn expand(&self, by: Duration) -> TimeWindow {
        TimeWindow {
            start: self.start - by,
            end: self.end + by,
        }
    }

    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        time >= self.start && time <= self.end
    }
}
