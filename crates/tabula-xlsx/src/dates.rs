//! Serial date numbers and date number-format detection.

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use tabula_model::DateSystem;

const MS_PER_DAY: f64 = 86_400_000.0;

/// First serial past 9999-12-31.
const MAX_SERIAL: f64 = 2_958_466.0;

/// Number format applied to `DateTime` cells whose style carries none.
pub(crate) const IMPLICIT_DATE_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";

fn epoch(system: DateSystem) -> NaiveDate {
    match system {
        // Day 0 of the 1900 system is 1900-01-00; serials from 61 on are shifted by the phantom
        // 1900-02-29.
        DateSystem::Excel1900 => NaiveDate::from_ymd_opt(1899, 12, 30),
        DateSystem::Excel1904 => NaiveDate::from_ymd_opt(1904, 1, 1),
    }
    .unwrap_or_default()
}

fn leap_bug_cutoff() -> NaiveDate {
    NaiveDate::from_ymd_opt(1900, 3, 1).unwrap_or_default()
}

/// Convert a serial number to a date-time. Negative or non-finite serials have no date.
pub fn serial_to_datetime(serial: f64, system: DateSystem) -> Option<NaiveDateTime> {
    if !serial.is_finite() || !(0.0..MAX_SERIAL).contains(&serial) {
        return None;
    }
    let mut days = serial.floor() as i64;
    let mut ms = ((serial - days as f64) * MS_PER_DAY).round() as i64;
    if ms >= MS_PER_DAY as i64 {
        ms = 0;
        days += 1;
    }
    if system == DateSystem::Excel1900 && days < 61 {
        // Serial 60 is the nonexistent 1900-02-29; it collapses onto 1900-02-28.
        days = if days == 60 { 59 } else { days + 1 };
    }
    let date = epoch(system).checked_add_signed(Duration::days(days))?;
    Some(date.and_hms_opt(0, 0, 0)? + Duration::milliseconds(ms))
}

/// Convert a date-time to its serial number.
pub fn datetime_to_serial(value: NaiveDateTime, system: DateSystem) -> f64 {
    let mut days = (value.date() - epoch(system)).num_days();
    if system == DateSystem::Excel1900 && value.date() < leap_bug_cutoff() {
        days -= 1;
    }
    let ms = i64::from(value.num_seconds_from_midnight()) * 1000
        + i64::from(value.nanosecond() / 1_000_000);
    days as f64 + ms as f64 / MS_PER_DAY
}

/// Whether a number format displays dates or times.
pub fn is_date_format(num_fmt_id: u32, code: Option<&str>) -> bool {
    if matches!(num_fmt_id, 14..=22 | 45..=47) {
        return true;
    }
    code.is_some_and(is_date_code)
}

fn is_date_code(code: &str) -> bool {
    let mut chars = code.chars();
    let mut in_quotes = false;
    let mut in_brackets = false;
    while let Some(ch) = chars.next() {
        match ch {
            '"' => in_quotes = !in_quotes,
            _ if in_quotes => {}
            '[' => in_brackets = true,
            ']' => in_brackets = false,
            _ if in_brackets => {}
            '\\' | '_' | '*' => {
                chars.next();
            }
            'd' | 'D' | 'm' | 'M' | 'y' | 'Y' | 'h' | 'H' | 's' | 'S' => return true,
            _ => {}
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    #[test]
    fn known_1900_serials() {
        assert_eq!(
            serial_to_datetime(1.0, DateSystem::Excel1900),
            Some(dt(1900, 1, 1, 0, 0, 0))
        );
        assert_eq!(
            serial_to_datetime(59.0, DateSystem::Excel1900),
            Some(dt(1900, 2, 28, 0, 0, 0))
        );
        assert_eq!(
            serial_to_datetime(61.0, DateSystem::Excel1900),
            Some(dt(1900, 3, 1, 0, 0, 0))
        );
        assert_eq!(
            serial_to_datetime(45_000.5, DateSystem::Excel1900),
            Some(dt(2023, 3, 15, 12, 0, 0))
        );
    }

    #[test]
    fn known_1904_serials() {
        assert_eq!(
            serial_to_datetime(0.0, DateSystem::Excel1904),
            Some(dt(1904, 1, 1, 0, 0, 0))
        );
        assert_eq!(
            datetime_to_serial(dt(2023, 3, 15, 0, 0, 0), DateSystem::Excel1904),
            45_000.0 - 1462.0
        );
    }

    #[test]
    fn serials_round_trip_through_datetimes() {
        for system in [DateSystem::Excel1900, DateSystem::Excel1904] {
            for value in [
                dt(1900, 1, 5, 6, 30, 0),
                dt(1904, 2, 29, 23, 59, 59),
                dt(1999, 12, 31, 0, 0, 1),
                dt(2024, 7, 4, 18, 45, 12),
            ] {
                let serial = datetime_to_serial(value, system);
                if serial < 0.0 {
                    continue;
                }
                assert_eq!(serial_to_datetime(serial, system), Some(value), "{value} {system:?}");
            }
        }
    }

    #[test]
    fn negative_and_non_finite_serials_have_no_date() {
        assert_eq!(serial_to_datetime(-1.0, DateSystem::Excel1900), None);
        assert_eq!(serial_to_datetime(f64::NAN, DateSystem::Excel1900), None);
    }

    #[test]
    fn date_format_detection() {
        assert!(is_date_format(14, None));
        assert!(is_date_format(47, None));
        assert!(!is_date_format(2, Some("0.00")));
        assert!(is_date_format(164, Some("yyyy-mm-dd")));
        assert!(is_date_format(165, Some("[$-409]h:mm AM/PM")));
        assert!(!is_date_format(166, Some("[Red]0.00;\"days\"")));
        assert!(!is_date_format(167, Some("General")));
        assert!(!is_date_format(168, Some(r"0\d")));
    }
}
