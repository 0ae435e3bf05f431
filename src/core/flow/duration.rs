//! Duration and timestamp parsing for delay and task nodes.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Duration of `amount` units. Unknown units and negative amounts yield `None`.
pub fn unit_duration(amount: i64, unit: &str) -> Option<Duration> {
    if amount < 0 {
        return None;
    }
    let seconds_per_unit = match unit.trim().to_lowercase().as_str() {
        "s" | "sec" | "secs" | "second" | "seconds" | "segundo" | "segundos" => 1,
        "m" | "min" | "mins" | "minute" | "minutes" | "minuto" | "minutos" => 60,
        "h" | "hr" | "hrs" | "hour" | "hours" | "hora" | "horas" => 3_600,
        "d" | "day" | "days" | "dia" | "dias" | "día" | "días" => 86_400,
        "w" | "week" | "weeks" | "semana" | "semanas" => 604_800,
        _ => return None,
    };
    amount
        .checked_mul(seconds_per_unit)
        .and_then(Duration::try_seconds)
}

/// Parse an offset expression such as `"2 hours"`, `"1 day"` or `"90min"`.
pub fn parse_offset(text: &str) -> Option<Duration> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut parts = trimmed.split_whitespace();
    if let (Some(amount), Some(unit), None) = (parts.next(), parts.next(), parts.next()) {
        if let Ok(amount) = amount.parse::<i64>() {
            return unit_duration(amount, unit);
        }
    }
    humantime::parse_duration(trimmed)
        .ok()
        .and_then(|std_duration| Duration::from_std(std_duration).ok())
}

/// Parse RFC 3339, `YYYY-MM-DD HH:MM[:SS]` (UTC) or a bare date (midnight UTC).
pub fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}
