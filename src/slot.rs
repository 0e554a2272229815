//! Quarter-hour slot clock.
//!
//! Every uptime decision is keyed to a 15-minute UTC slot. A slot is
//! identified by the ISO-8601 timestamp of its start (`:00`, `:15`, `:30`,
//! `:45`, seconds zeroed), which doubles as the lock-key suffix and the
//! value stored in the key-value side-state.

use chrono::{DateTime, Datelike, Duration, SecondsFormat, TimeZone, Timelike, Utc};

/// Slot length in minutes. The confirmation window and GRACE math in the
/// engine are expressed in terms of this.
pub const SLOT_MINUTES: i64 = 15;

/// A wall-clock instant quantised down to the nearest quarter hour, UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot(DateTime<Utc>);

impl Slot {
    /// The slot containing the current wall-clock instant.
    pub fn current() -> Self {
        Self::containing(Utc::now())
    }

    /// The slot containing an arbitrary instant.
    pub fn containing(t: DateTime<Utc>) -> Self {
        let minute = t.minute() - (t.minute() % SLOT_MINUTES as u32);
        let floored = Utc
            .with_ymd_and_hms(t.year(), t.month(), t.day(), t.hour(), minute, 0)
            .single()
            .expect("quantised timestamp is always valid");
        Slot(floored)
    }

    /// Parse a slot identifier previously produced by [`Slot::iso`].
    pub fn parse(iso: &str) -> Option<Self> {
        let t = DateTime::parse_from_rfc3339(iso).ok()?.with_timezone(&Utc);
        Some(Self::containing(t))
    }

    /// The slot's start instant.
    pub fn start(&self) -> DateTime<Utc> {
        self.0
    }

    /// Canonical identifier, e.g. `2026-08-02T10:15:00Z`.
    pub fn iso(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Whole minutes from `earlier` to `self`; negative if `earlier` is later.
    pub fn minutes_since(&self, earlier: Slot) -> i64 {
        (self.0 - earlier.0).num_minutes()
    }

    /// The next slot boundary strictly after the given instant.
    pub fn next_boundary(after: DateTime<Utc>) -> DateTime<Utc> {
        Self::containing(after).start() + Duration::minutes(SLOT_MINUTES)
    }
}
