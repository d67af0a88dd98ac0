//! Cron and timezone utilities.
//!
//! All next-fire arithmetic lives here so the runner never touches the
//! `cron` crate directly: given an expression and an IANA timezone, these
//! helpers validate the pair and yield the next fire instant in UTC.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

/// Normalize a 5-field cron expression to 6-field by prepending "0 " for
/// seconds.
///
/// The `cron` crate requires a seconds field; user-facing specs use the
/// standard 5-field form: `min hour day-of-month month day-of-week`.
pub fn normalize_cron(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Validate a cron expression / timezone pair.
///
/// Returns a human-readable reason on failure, suitable for an
/// `InvalidSchedule` error.
pub fn validate_schedule(cron_expr: &str, timezone: &str) -> Result<(), String> {
    if cron_expr.trim().is_empty() {
        return Err("cron expression is empty".to_string());
    }
    Schedule::from_str(&normalize_cron(cron_expr))
        .map_err(|e| format!("invalid cron expression '{}': {}", cron_expr, e))?;
    timezone
        .parse::<chrono_tz::Tz>()
        .map_err(|_| format!("invalid timezone '{}'", timezone))?;
    Ok(())
}

/// Compute the next fire instant strictly after `after`, in UTC.
///
/// The expression is evaluated in the given timezone, so schedules like
/// "03:00 local" stay correct across DST transitions. Returns `None` for
/// unparseable input or a schedule with no future firings.
pub fn next_fire(cron_expr: &str, timezone: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let schedule = Schedule::from_str(&normalize_cron(cron_expr)).ok()?;
    let tz: chrono_tz::Tz = timezone.parse().ok()?;
    schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn normalize_5_field_to_6() {
        assert_eq!(normalize_cron("*/15 * * * *"), "0 */15 * * * *");
        assert_eq!(normalize_cron("0 3 * * 1-5"), "0 0 3 * * 1-5");
    }

    #[test]
    fn normalize_6_field_passthrough() {
        assert_eq!(normalize_cron("30 */5 * * * *"), "30 */5 * * * *");
    }

    #[test]
    fn normalize_trims_whitespace() {
        assert_eq!(normalize_cron("  * * * * *  "), "0 * * * * *");
    }

    #[test]
    fn validate_accepts_standard_schedules() {
        assert!(validate_schedule("*/5 * * * *", "UTC").is_ok());
        assert!(validate_schedule("0 3 * * *", "Asia/Manila").is_ok());
        assert!(validate_schedule("0 0 3 * * *", "America/New_York").is_ok());
    }

    #[test]
    fn validate_rejects_bad_cron() {
        assert!(validate_schedule("not a cron", "UTC").is_err());
        assert!(validate_schedule("", "UTC").is_err());
    }

    #[test]
    fn validate_rejects_bad_timezone() {
        assert!(validate_schedule("* * * * *", "Mars/Olympus").is_err());
    }

    #[test]
    fn next_fire_is_strictly_after_reference() {
        let after = Utc.with_ymd_and_hms(2026, 1, 14, 10, 0, 0).unwrap();
        let next = next_fire("*/5 * * * *", "UTC", after).unwrap();
        assert!(next > after);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 14, 10, 5, 0).unwrap());
    }

    #[test]
    fn next_fire_respects_timezone() {
        // 03:00 daily in Manila (UTC+8, no DST) = 19:00 UTC the previous day.
        let after = Utc.with_ymd_and_hms(2026, 1, 14, 10, 0, 0).unwrap();
        let next = next_fire("0 3 * * *", "Asia/Manila", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 14, 19, 0, 0).unwrap());
    }

    #[test]
    fn next_fire_none_for_invalid_input() {
        let after = Utc::now();
        assert!(next_fire("bogus", "UTC", after).is_none());
        assert!(next_fire("* * * * *", "Nope/Nowhere", after).is_none());
    }
}
