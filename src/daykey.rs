//! Day-of-week keys computed in a fixed reference timezone.
//!
//! The host's own timezone is never consulted, so a player configured for
//! `America/Toronto` switches day content at Toronto midnight wherever it runs.

use chrono::{DateTime, Datelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::Deserialize;
use std::fmt;

/// One of the seven day tokens used to select day-specific content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayKey {
    #[serde(alias = "monday")]
    Mon,
    #[serde(alias = "tuesday")]
    Tue,
    #[serde(alias = "wednesday")]
    Wed,
    #[serde(alias = "thursday")]
    Thu,
    #[serde(alias = "friday")]
    Fri,
    #[serde(alias = "saturday")]
    Sat,
    #[serde(alias = "sunday")]
    Sun,
}

impl DayKey {
    pub const ALL: [DayKey; 7] = [
        DayKey::Mon,
        DayKey::Tue,
        DayKey::Wed,
        DayKey::Thu,
        DayKey::Fri,
        DayKey::Sat,
        DayKey::Sun,
    ];

    /// Day key for `instant` as observed in `tz`.
    pub fn at(instant: DateTime<Utc>, tz: Tz) -> Self {
        instant.with_timezone(&tz).weekday().into()
    }

    /// Day key for the current wall-clock time in `tz`.
    pub fn now(tz: Tz) -> Self {
        Self::at(Utc::now(), tz)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DayKey::Mon => "mon",
            DayKey::Tue => "tue",
            DayKey::Wed => "wed",
            DayKey::Thu => "thu",
            DayKey::Fri => "fri",
            DayKey::Sat => "sat",
            DayKey::Sun => "sun",
        }
    }
}

impl From<Weekday> for DayKey {
    fn from(day: Weekday) -> Self {
        match day {
            Weekday::Mon => DayKey::Mon,
            Weekday::Tue => DayKey::Tue,
            Weekday::Wed => DayKey::Wed,
            Weekday::Thu => DayKey::Thu,
            Weekday::Fri => DayKey::Fri,
            Weekday::Sat => DayKey::Sat,
            Weekday::Sun => DayKey::Sun,
        }
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_uses_reference_timezone_not_utc() {
        // Tuesday 03:00 UTC is still Monday evening in Toronto.
        let instant = Utc.with_ymd_and_hms(2026, 10, 20, 3, 0, 0).unwrap();
        assert_eq!(DayKey::at(instant, chrono_tz::America::Toronto), DayKey::Mon);
        assert_eq!(DayKey::at(instant, chrono_tz::UTC), DayKey::Tue);
        assert_eq!(DayKey::at(instant, chrono_tz::Asia::Tokyo), DayKey::Tue);
    }

    #[test]
    fn test_day_boundary_follows_dst() {
        let tz = chrono_tz::America::Toronto;
        // Summer (EDT, UTC-4): local midnight is 04:00 UTC.
        let before = Utc.with_ymd_and_hms(2026, 7, 6, 3, 59, 59).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 7, 6, 4, 0, 0).unwrap();
        assert_eq!(DayKey::at(before, tz), DayKey::Sun);
        assert_eq!(DayKey::at(after, tz), DayKey::Mon);

        // Winter (EST, UTC-5): local midnight is 05:00 UTC.
        let before = Utc.with_ymd_and_hms(2026, 1, 5, 4, 59, 59).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 1, 5, 5, 0, 0).unwrap();
        assert_eq!(DayKey::at(before, tz), DayKey::Sun);
        assert_eq!(DayKey::at(after, tz), DayKey::Mon);
    }

    #[test]
    fn test_tokens() {
        let tokens: Vec<_> = DayKey::ALL.iter().map(DayKey::as_str).collect();
        assert_eq!(tokens, ["mon", "tue", "wed", "thu", "fri", "sat", "sun"]);
    }
}
