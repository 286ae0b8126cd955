//! Time value arithmetic for `Date`.
//!
//! Local time is UTC: the local offset of every date is zero.

use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;

/// Milliseconds per day.
pub const MS_PER_DAY: f64 = 86_400_000.0;

/// Largest magnitude of a valid time value.
pub const MAX_TIME_IN_MS: f64 = 8.64e15;

/// `TimeClip`.
#[must_use]
pub fn time_clip(time: f64) -> f64 {
    if !time.is_finite() || time.abs() > MAX_TIME_IN_MS {
        return f64::NAN;
    }
    time.trunc() + 0.0
}

/// Days since the epoch of a proleptic Gregorian date (`month` is 1-based).
#[must_use]
pub fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Inverse of [`days_from_civil`].
#[must_use]
pub fn civil_from_days(days: i64) -> (i64, i64, i64) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

/// `MakeDay`: `month` is 0-based and may overflow into the year.
#[must_use]
pub fn make_day(year: f64, month: f64, date: f64) -> f64 {
    if !year.is_finite() || !month.is_finite() || !date.is_finite() {
        return f64::NAN;
    }
    let (year, month, date) = (year.trunc(), month.trunc(), date.trunc());
    let ym = year + (month / 12.0).floor();
    if ym.abs() > 400_000.0 {
        return f64::NAN;
    }
    let mn = month.rem_euclid(12.0);
    days_from_civil(ym as i64, mn as i64 + 1, 1) as f64 + date - 1.0
}

/// `MakeTime`.
#[must_use]
pub fn make_time(hour: f64, min: f64, sec: f64, ms: f64) -> f64 {
    if !hour.is_finite() || !min.is_finite() || !sec.is_finite() || !ms.is_finite() {
        return f64::NAN;
    }
    hour.trunc() * 3_600_000.0 + min.trunc() * 60_000.0 + sec.trunc() * 1000.0 + ms.trunc()
}

/// `MakeDate`.
#[must_use]
pub fn make_date(day: f64, time: f64) -> f64 {
    if !day.is_finite() || !time.is_finite() {
        return f64::NAN;
    }
    day * MS_PER_DAY + time
}

/// Time value of `new Date(year, month, day)`; two-digit years are 19xx.
#[must_use]
pub fn set_date_values(year: f64, month: f64, day: f64) -> f64 {
    let year = if year.is_finite() && (0.0..=99.0).contains(&year.trunc()) {
        1900.0 + year.trunc()
    } else {
        year
    };
    time_clip(make_date(make_day(year, month, day), 0.0))
}

/// Current time value.
#[must_use]
pub fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_millis() as f64)
}

fn iso_regex() -> &'static Regex {
    static ISO: OnceLock<Regex> = OnceLock::new();
    ISO.get_or_init(|| {
        Regex::new(
            r"^([+-]\d{6}|\d{4})(?:-(\d{2})(?:-(\d{2}))?)?(?:T(\d{2}):(\d{2})(?::(\d{2})(?:\.(\d{1,3}))?)?(Z|[+-]\d{2}:\d{2})?)?$",
        )
        .unwrap_or_else(|_| unreachable!("static pattern"))
    })
}

/// Parse the ISO-8601 subset `Date.parse` must accept.
#[must_use]
pub fn parse(text: &str) -> f64 {
    let Some(caps) = iso_regex().captures(text.trim()) else {
        return f64::NAN;
    };
    let num = |i: usize, default: f64| {
        caps.get(i)
            .map_or(Some(default), |m| m.as_str().parse::<f64>().ok())
    };
    let (Some(year), Some(month), Some(day), Some(hour), Some(min), Some(sec)) =
        (num(1, 0.0), num(2, 1.0), num(3, 1.0), num(4, 0.0), num(5, 0.0), num(6, 0.0))
    else {
        return f64::NAN;
    };
    let ms = caps.get(7).map_or(0.0, |m| {
        let digits = m.as_str();
        digits.parse::<f64>().unwrap_or(0.0) * 10f64.powi(3 - digits.len() as i32)
    });
    if !(1.0..=12.0).contains(&month) || !(1.0..=31.0).contains(&day) || hour > 24.0 || min > 59.0 || sec > 59.0 {
        return f64::NAN;
    }
    let offset = match caps.get(8).map(|m| m.as_str()) {
        None | Some("Z") => 0.0,
        Some(zone) => {
            let sign = if zone.starts_with('-') { -1.0 } else { 1.0 };
            let hours = zone[1..3].parse::<f64>().unwrap_or(0.0);
            let minutes = zone[4..6].parse::<f64>().unwrap_or(0.0);
            sign * (hours * 3_600_000.0 + minutes * 60_000.0)
        }
    };
    let day = make_day(year, month - 1.0, day);
    time_clip(make_date(day, make_time(hour, min, sec, ms)) - offset)
}

/// `Date.prototype.toISOString` of a valid time value, `"Invalid Date"` otherwise.
#[must_use]
pub fn to_iso_string(time: f64) -> String {
    if time.is_nan() {
        return "Invalid Date".to_owned();
    }
    let t = time as i64;
    let days = t.div_euclid(MS_PER_DAY as i64);
    let in_day = t.rem_euclid(MS_PER_DAY as i64);
    let (year, month, day) = civil_from_days(days);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{:03}Z",
        in_day / 3_600_000,
        in_day / 60_000 % 60,
        in_day / 1000 % 60,
        in_day % 1000
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_civil_round_trip() {
        for days in [-719_468, -1, 0, 1, 11_016, 19_000, 2_932_896] {
            let (y, m, d) = civil_from_days(days);
            assert_eq!(days_from_civil(y, m, d), days);
        }
        assert_eq!(days_from_civil(1970, 1, 1), 0);
        assert_eq!(days_from_civil(2000, 3, 1), 11_017);
    }

    #[test]
    fn test_time_clip() {
        assert!(time_clip(f64::INFINITY).is_nan());
        assert!(time_clip(8.64e15 + 1.0).is_nan());
        assert_eq!(time_clip(1.9), 1.0);
        assert_eq!(time_clip(-0.0).to_bits(), 0.0f64.to_bits());
    }

    #[test]
    fn test_set_date_values() {
        assert_eq!(set_date_values(70.0, 0.0, 1.0), 0.0);
        assert_eq!(set_date_values(2000.0, 0.0, 1.0), 946_684_800_000.0);
        assert_eq!(set_date_values(2000.0, 12.0, 1.0), set_date_values(2001.0, 0.0, 1.0));
        assert!(set_date_values(f64::NAN, 0.0, 1.0).is_nan());
    }

    #[test]
    fn test_parse_iso() {
        assert_eq!(parse("1970-01-01T00:00:00Z"), 0.0);
        assert_eq!(parse("2000-01-01"), 946_684_800_000.0);
        assert_eq!(parse("1970-01-01T01:00:00+01:00"), 0.0);
        assert_eq!(parse("1970-01-01T00:00:00.5Z"), 500.0);
        assert!(parse("yesterday").is_nan());
        assert!(parse("2000-13-01").is_nan());
    }

    #[test]
    fn test_iso_string() {
        assert_eq!(to_iso_string(0.0), "1970-01-01T00:00:00.000Z");
        assert_eq!(to_iso_string(946_684_800_123.0), "2000-01-01T00:00:00.123Z");
        assert_eq!(to_iso_string(f64::NAN), "Invalid Date");
    }
}
