//! Human-readable durations: rendering uptimes for alert text and parsing
//! duration strings from the command line and config file.

use std::time::Duration;

const SECOND_MS: u64 = 1_000;
const MINUTE_MS: u64 = 60 * SECOND_MS;
const HOUR_MS: u64 = 60 * MINUTE_MS;

/// Render milliseconds for alert messages.
///
/// Below a minute: one-decimal seconds (`"59.0s"`). Below an hour:
/// one-decimal minutes (`"1.5m"`). Otherwise two-decimal hours (`"1.00h"`).
pub fn format_duration_ms(ms: u64) -> String {
    if ms < MINUTE_MS {
        format!("{:.1}s", ms as f64 / SECOND_MS as f64)
    } else if ms < HOUR_MS {
        format!("{:.1}m", ms as f64 / MINUTE_MS as f64)
    } else {
        format!("{:.2}h", ms as f64 / HOUR_MS as f64)
    }
}

/// Parse a duration string like "500ms", "30s", "5m", "1h" or "1d".
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let (num_str, suffix) = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| (&s[..i], &s[i..]))
        .unwrap_or((s, ""));

    let num: u64 = num_str
        .parse()
        .map_err(|_| format!("invalid number in duration: {s}"))?;

    let multiplier = match suffix.trim() {
        "ms" | "millis" | "millisecond" | "milliseconds" => {
            return Ok(Duration::from_millis(num));
        }
        "" | "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "m" | "min" | "mins" | "minute" | "minutes" => 60,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3600,
        "d" | "day" | "days" => 86400,
        other => return Err(format!("unknown duration suffix: {other}")),
    };

    num.checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration out of range: {s}"))
}

/// Compact rendering that [`parse_duration`] accepts back, used by `--show-config`.
pub fn display_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms % 1000 != 0 {
        return format!("{ms}ms");
    }
    let secs = d.as_secs();
    if secs > 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs > 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_seconds_below_a_minute() {
        assert_eq!(format_duration_ms(0), "0.0s");
        assert_eq!(format_duration_ms(500), "0.5s");
        assert_eq!(format_duration_ms(5_000), "5.0s");
        assert_eq!(format_duration_ms(59_000), "59.0s");
    }

    #[test]
    fn test_format_minutes_from_one_minute() {
        assert_eq!(format_duration_ms(60_000), "1.0m");
        assert_eq!(format_duration_ms(90_000), "1.5m");
        assert_eq!(format_duration_ms(100_000), "1.7m");
        assert_eq!(format_duration_ms(59 * 60_000), "59.0m");
    }

    #[test]
    fn test_format_rounds_up_just_below_unit_switch() {
        // Still the seconds path; one-decimal rounding gives 59.999s -> "60.0s".
        assert_eq!(format_duration_ms(59_999), "60.0s");
        // Still the minutes path; 59.99998m -> "60.0m".
        assert_eq!(format_duration_ms(3_599_999), "60.0m");
    }

    #[test]
    fn test_format_hours_from_one_hour() {
        assert_eq!(format_duration_ms(3_600_000), "1.00h");
        assert_eq!(format_duration_ms(5_400_000), "1.50h");
        assert_eq!(format_duration_ms(26 * 3_600_000), "26.00h");
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration(" 2h ").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("5 fortnights").is_err());
        assert!(parse_duration("-5s").is_err());
        assert!(parse_duration("99999999999999999999d").is_err());
    }

    #[test]
    fn test_display_duration_is_reparseable() {
        for d in [
            Duration::from_millis(1500),
            Duration::from_secs(0),
            Duration::from_secs(45),
            Duration::from_secs(600),
            Duration::from_secs(7200),
        ] {
            assert_eq!(parse_duration(&display_duration(d)).unwrap(), d);
        }
        assert_eq!(display_duration(Duration::from_secs(600)), "10m");
        assert_eq!(display_duration(Duration::from_secs(5)), "5s");
    }
}
