use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;

/// Regular-session calendar for the configured market timezone.
/// Holidays are future work; weekends and out-of-session hours are enforced.
#[derive(Clone)]
pub struct MarketCalendar {
    tz: Tz,
}

impl MarketCalendar {
    pub fn new(timezone: &str) -> Self {
        let tz: Tz = timezone.parse().unwrap_or(chrono_tz::US::Eastern);
        Self { tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn is_market_open(&self) -> bool {
        self.is_open_at(Utc::now())
    }

    pub fn is_open_at(&self, instant: DateTime<Utc>) -> bool {
        let local = instant.with_timezone(&self.tz);
        let weekday = matches!(
            local.weekday(),
            Weekday::Mon | Weekday::Tue | Weekday::Wed | Weekday::Thu | Weekday::Fri
        );
        if !weekday {
            return false;
        }
        let open = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
        let close = NaiveTime::from_hms_opt(16, 0, 0).unwrap();
        let time = local.time();
        time >= open && time < close
    }
}
