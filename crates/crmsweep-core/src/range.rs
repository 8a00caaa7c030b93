//! Half-open date ranges used as extraction windows.
//!
//! A [`DateRange`] covers `[start, end)` at millisecond resolution. Windows
//! produced by [`DateRange::bisect`] never overlap and together cover their
//! parent exactly, which is what lets the splitter claim a complete partition.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawRange")]
pub struct DateRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<RawRange> for DateRange {
    type Error = CoreError;

    fn try_from(raw: RawRange) -> Result<Self, Self::Error> {
        DateRange::new(raw.start, raw.end)
    }
}

impl DateRange {
    /// Create a range, rejecting empty or inverted bounds.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, CoreError> {
        if start >= end {
            return Err(CoreError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn width(&self) -> TimeDelta {
        self.end - self.start
    }

    /// True when `ts` falls inside `[start, end)`.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }

    /// Split at the temporal midpoint.
    ///
    /// Widths are measured in whole milliseconds; for an odd width the earlier
    /// half takes the extra millisecond. Returns `None` when the range is too
    /// narrow to yield two non-empty halves.
    pub fn bisect(&self) -> Option<(DateRange, DateRange)> {
        let width_ms = self.width().num_milliseconds();
        if width_ms < 2 {
            return None;
        }
        let first_ms = width_ms - width_ms / 2;
        let mid = self.start + TimeDelta::milliseconds(first_ms);
        Some((
            DateRange {
                start: self.start,
                end: mid,
            },
            DateRange {
                start: mid,
                end: self.end,
            },
        ))
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            self.end.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
        )
    }
}
