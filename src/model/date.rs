// model/date.rs - Relative date parsing for due/start dates and view filters (C7)

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::{Error, Result};

/// Parse a date expression into a UTC instant.
///
/// Accepted forms (spec §4.7):
/// - `YYYY-MM-DD`
/// - `YYYY-MM-DDTHH:MM`
/// - keywords `today`, `tomorrow`, `yesterday`
/// - offsets `[+-]N[dwm]` (days/weeks/months from today)
/// - any of the above followed by a `" HH:MM"` suffix
///
/// Anything else is rejected with a `Validation` error.
pub fn parse(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::Validation("invalid date: empty input".to_string()));
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M") {
        return Ok(Utc.from_utc_datetime(&dt));
    }
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Ok(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)));
    }

    // Keyword or offset, optionally followed by " HH:MM".
    let (base_token, time_token) = match input.split_once(' ') {
        Some((base, time)) => (base, Some(time)),
        None => (input, None),
    };

    let base_date = resolve_base_date(base_token, now)?;

    let time = match time_token {
        Some(t) => NaiveTime::parse_from_str(t, "%H:%M")
            .map_err(|_| Error::Validation(format!("invalid date: {input}")))?,
        None => NaiveTime::MIN,
    };

    Ok(Utc.from_utc_datetime(&base_date.and_time(time)))
}

fn resolve_base_date(token: &str, now: DateTime<Utc>) -> Result<NaiveDate> {
    let today = now.date_naive();
    match token {
        "today" => Ok(today),
        "tomorrow" => Ok(today + Duration::days(1)),
        "yesterday" => Ok(today - Duration::days(1)),
        _ => parse_offset(token, today),
    }
}

fn parse_offset(token: &str, today: NaiveDate) -> Result<NaiveDate> {
    let mut chars = token.chars();
    let sign = match chars.next() {
        Some('+') => 1i64,
        Some('-') => -1i64,
        _ => return Err(Error::Validation(format!("invalid date: {token}"))),
    };
    let rest = &token[1..];
    let (digits, unit) = rest.split_at(
        rest.len()
            .checked_sub(1)
            .ok_or_else(|| Error::Validation(format!("invalid date: {token}")))?,
    );
    let magnitude: i64 = digits
        .parse()
        .map_err(|_| Error::Validation(format!("invalid date: {token}")))?;
    let n = sign * magnitude;

    match unit {
        "d" => Ok(today + Duration::days(n)),
        "w" => Ok(today + Duration::days(n * 7)),
        "m" => add_months(today, n),
        _ => Err(Error::Validation(format!("invalid date: {token}"))),
    }
}

fn add_months(date: NaiveDate, months: i64) -> Result<NaiveDate> {
    let total_months = date.year() as i64 * 12 + (date.month() as i64 - 1) + months;
    let year = total_months.div_euclid(12) as i32;
    let month = (total_months.rem_euclid(12) + 1) as u32;
    // Clamp the day to the last valid day of the target month (e.g. Jan 31 + 1m -> Feb 28/29).
    let mut day = date.day();
    loop {
        if let Some(d) = NaiveDate::from_ymd_opt(year, month, day) {
            return Ok(d);
        }
        day -= 1;
        if day == 0 {
            return Err(Error::Validation("invalid date: month overflow".to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn parses_absolute_date() {
        let d = parse("2026-03-01", fixed_now()).unwrap();
        assert_eq!(d.date_naive(), NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
    }

    #[test]
    fn parses_absolute_datetime() {
        let d = parse("2026-03-01T09:30", fixed_now()).unwrap();
        assert_eq!(d.format("%H:%M").to_string(), "09:30");
    }

    #[test]
    fn parses_keywords() {
        let now = fixed_now();
        assert_eq!(parse("today", now).unwrap().date_naive(), now.date_naive());
        assert_eq!(
            parse("tomorrow", now).unwrap().date_naive(),
            now.date_naive() + Duration::days(1)
        );
        assert_eq!(
            parse("yesterday", now).unwrap().date_naive(),
            now.date_naive() - Duration::days(1)
        );
    }

    #[test]
    fn parses_offsets() {
        let now = fixed_now();
        assert_eq!(
            parse("+3d", now).unwrap().date_naive(),
            now.date_naive() + Duration::days(3)
        );
        assert_eq!(
            parse("-2w", now).unwrap().date_naive(),
            now.date_naive() - Duration::days(14)
        );
        assert_eq!(
            parse("+1m", now).unwrap().date_naive(),
            NaiveDate::from_ymd_opt(2026, 2, 15).unwrap()
        );
    }

    #[test]
    fn parses_keyword_with_time_suffix() {
        let d = parse("tomorrow 08:15", fixed_now()).unwrap();
        assert_eq!(d.format("%H:%M").to_string(), "08:15");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse("whenever", fixed_now()).is_err());
        assert!(parse("", fixed_now()).is_err());
        assert!(parse("+3x", fixed_now()).is_err());
    }
}
