//! Business-hours policy.
//!
//! Pure functions of an instant, so callers pass the clock in and tests pin
//! it. Open = weekday Mon..Fri, hour within `[open_hour, close_hour)`.

use chrono::{Datelike, NaiveDateTime, NaiveTime, Timelike, Weekday};

#[derive(Debug, Clone, Copy)]
pub struct BusinessHours {
    pub open_hour: u32,
    pub close_hour: u32,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            open_hour: 9,
            close_hour: 18,
        }
    }
}

impl BusinessHours {
    pub fn new(open_hour: u32, close_hour: u32) -> Self {
        // Out-of-range config degrades to the defaults rather than panicking.
        if open_hour >= close_hour || close_hour > 24 {
            return Self::default();
        }
        Self {
            open_hour,
            close_hour,
        }
    }

    pub fn is_open(&self, t: NaiveDateTime) -> bool {
        if matches!(t.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        (self.open_hour..self.close_hour).contains(&t.hour())
    }

    /// The next instant the office is open.
    ///
    /// Already open → `t` itself. Friday past close → following Monday;
    /// Saturday → Monday; Sunday → Monday; weekday before opening → same day;
    /// weekday past close → tomorrow. Closed results are normalized to the
    /// opening hour.
    pub fn next_business_day(&self, t: NaiveDateTime) -> NaiveDateTime {
        if self.is_open(t) {
            return t;
        }

        let days_ahead = match t.weekday() {
            Weekday::Sat => 2,
            Weekday::Sun => 1,
            _ if t.hour() < self.open_hour => 0,
            Weekday::Fri => 3,
            _ => 1,
        };

        let opening = NaiveTime::from_hms_opt(self.open_hour, 0, 0).unwrap_or_default();
        (t.date() + chrono::Duration::days(days_ahead)).and_time(opening)
    }
}
