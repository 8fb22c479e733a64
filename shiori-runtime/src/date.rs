//! Date string parsing for the `std` import namespace
//!
//! Sources hand over dates in three shapes: an explicit format string
//! using the historical pattern tokens (`yyyy`, `MM`, `dd`, ...), a
//! natural-language relative phrase ("3 hours ago", "3小时前", "3時間前",
//! "3시간 전"), or a machine format handled by the native ISO/RFC parsers.

use chrono::format::{Parsed, StrftimeItems};
use chrono::{Datelike, Local, NaiveDate, NaiveTime, Offset, Utc};
use regex::Regex;
use std::sync::OnceLock;

/// Seconds east of UTC for the host's local timezone.
pub fn utc_offset_seconds() -> i64 {
    Local::now().offset().fix().local_minus_utc() as i64
}

/// Current time as fractional seconds since the Unix epoch.
pub fn current_date_seconds() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Parse a date string to seconds since the Unix epoch.
///
/// The timezone strings `"UTC"` and `"current"` are special: UTC forces
/// offset zero, current means the host's local offset. `GMT±H[:MM]` is
/// accepted as a fixed offset; anything else falls back to UTC. An offset
/// carried by the string itself (`%z` tokens) wins over the parameter.
pub fn parse_date(
    value: &str,
    format: Option<&str>,
    _locale: Option<&str>,
    timezone: Option<&str>,
) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let offset = timezone_offset_seconds(timezone);

    if let Some(format) = format {
        if !format.is_empty() {
            if let Some(ts) = parse_with_format(value, format, offset) {
                return Some(ts);
            }
        }
    }
    if let Some(ts) = parse_relative(value) {
        return Some(ts);
    }
    parse_native(value, offset)
}

fn timezone_offset_seconds(timezone: Option<&str>) -> i64 {
    let Some(tz) = timezone.map(str::trim).filter(|t| !t.is_empty()) else {
        return 0;
    };
    if tz.eq_ignore_ascii_case("utc") || tz.eq_ignore_ascii_case("gmt") {
        return 0;
    }
    if tz.eq_ignore_ascii_case("current") || tz.eq_ignore_ascii_case("local") {
        return utc_offset_seconds();
    }
    let rest = tz
        .strip_prefix("GMT")
        .or_else(|| tz.strip_prefix("UTC"))
        .unwrap_or(tz);
    parse_fixed_offset(rest).unwrap_or(0)
}

/// `±H`, `±HH`, `±HH:MM`, `±HHMM`
fn parse_fixed_offset(spec: &str) -> Option<i64> {
    let (sign, digits) = match spec.as_bytes().first()? {
        b'+' => (1i64, &spec[1..]),
        b'-' => (-1i64, &spec[1..]),
        _ => return None,
    };
    let (hours, minutes) = match digits.split_once(':') {
        Some((h, m)) => (h.parse::<i64>().ok()?, m.parse::<i64>().ok()?),
        None if digits.len() > 2 => {
            let (h, m) = digits.split_at(digits.len() - 2);
            (h.parse::<i64>().ok()?, m.parse::<i64>().ok()?)
        }
        None => (digits.parse::<i64>().ok()?, 0),
    };
    Some(sign * (hours * 3600 + minutes * 60))
}

fn parse_with_format(value: &str, format: &str, default_offset: i64) -> Option<i64> {
    let translated = translate_format(format);
    let mut parsed = Parsed::new();
    chrono::format::parse(&mut parsed, value, StrftimeItems::new(&translated)).ok()?;

    let year = parsed.year.unwrap_or_else(|| Utc::now().year());
    let date = NaiveDate::from_ymd_opt(year, parsed.month.unwrap_or(1), parsed.day.unwrap_or(1))?;
    let hour = match (parsed.hour_div_12, parsed.hour_mod_12) {
        (Some(half), Some(hour)) => half * 12 + hour,
        (None, Some(hour)) => hour,
        _ => 0,
    };
    let time = NaiveTime::from_hms_nano_opt(
        hour,
        parsed.minute.unwrap_or(0),
        parsed.second.unwrap_or(0),
        parsed.nanosecond.unwrap_or(0),
    )?;
    let offset = parsed.offset.map(|o| o as i64).unwrap_or(default_offset);
    Some(date.and_time(time).and_utc().timestamp() - offset)
}

/// Translate the historical pattern tokens to strftime.
fn translate_format(format: &str) -> String {
    let mut out = String::with_capacity(format.len() + 8);
    let chars: Vec<char> = format.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        // Quoted literal, '' is an escaped quote.
        if c == '\'' {
            if chars.get(i + 1) == Some(&'\'') {
                out.push('\'');
                i += 2;
                continue;
            }
            i += 1;
            while i < chars.len() && chars[i] != '\'' {
                push_literal(&mut out, chars[i]);
                i += 1;
            }
            i += 1;
            continue;
        }
        if !c.is_ascii_alphabetic() {
            push_literal(&mut out, c);
            i += 1;
            continue;
        }
        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == c {
            run += 1;
        }
        match c {
            'y' => out.push_str(if run == 2 { "%y" } else { "%Y" }),
            'M' => out.push_str(match run {
                4.. => "%B",
                3 => "%b",
                _ => "%m",
            }),
            'd' => out.push_str("%d"),
            'E' => out.push_str(if run >= 4 { "%A" } else { "%a" }),
            'H' => out.push_str("%H"),
            'h' => out.push_str("%I"),
            'm' => out.push_str("%M"),
            's' => out.push_str("%S"),
            'S' => out.push_str(if run == 3 { "%3f" } else { "%f" }),
            'a' => out.push_str("%p"),
            'z' | 'Z' | 'X' => out.push_str(if run >= 5 { "%:z" } else { "%z" }),
            // Era, week-of-year and friends carry no information we keep.
            _ => {}
        }
        i += run;
    }
    out
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}

fn parse_relative(value: &str) -> Option<i64> {
    let now = Utc::now().timestamp();
    let lowered = value.to_lowercase();
    match lowered.as_str() {
        "just now" | "now" | "剛剛" | "刚刚" | "たった今" | "방금" | "방금 전" => {
            return Some(now)
        }
        "today" | "今天" | "今日" | "오늘" => return Some(now),
        "yesterday" | "昨天" | "昨日" | "어제" => return Some(now - 86_400),
        _ => {}
    }

    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^(\d+)\s*(\p{L}+?)\.?\s*(ago|前|전)$").expect("relative date pattern")
    });
    let captures = pattern.captures(&lowered)?;
    let amount: i64 = captures[1].parse().ok()?;
    let unit = unit_seconds(&captures[2])?;
    Some(now - amount * unit)
}

fn unit_seconds(unit: &str) -> Option<i64> {
    let seconds = if unit.starts_with("sec") || unit == "s" || unit == "秒" || unit == "초" {
        1
    } else if unit.starts_with("min") || unit == "分钟" || unit == "分鐘" || unit == "分" || unit == "분" {
        60
    } else if unit.starts_with("hour")
        || unit.starts_with("hr")
        || unit == "小时"
        || unit == "小時"
        || unit == "時間"
        || unit == "시간"
    {
        3_600
    } else if unit.starts_with("day") || unit == "天" || unit == "日" || unit == "일" {
        86_400
    } else if unit.starts_with("week") || unit == "周" || unit == "週" || unit == "週間" || unit == "주" {
        604_800
    } else if unit.starts_with("month")
        || unit == "月"
        || unit == "个月"
        || unit == "個月"
        || unit == "ヶ月"
        || unit == "か月"
        || unit == "개월"
        || unit == "달"
    {
        2_592_000
    } else if unit.starts_with("year") || unit == "年" || unit == "년" {
        31_536_000
    } else {
        return None;
    };
    Some(seconds)
}

fn parse_native(value: &str, default_offset: i64) -> Option<i64> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp());
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc2822(value) {
        return Some(dt.timestamp());
    }
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
    ];
    for format in DATETIME_FORMATS {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.and_utc().timestamp() - default_offset);
        }
    }
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp() - default_offset);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_translation() {
        assert_eq!(translate_format("yyyy-MM-dd"), "%Y-%m-%d");
        assert_eq!(
            translate_format("yyyy-MM-dd'T'HH:mm:ssZ"),
            "%Y-%m-%dT%H:%M:%S%z"
        );
        assert_eq!(translate_format("MMM d, yyyy"), "%b %d, %Y");
        assert_eq!(translate_format("hh:mm a"), "%I:%M %p");
    }

    #[test]
    fn test_parse_with_format() {
        let ts = parse_date("2024-03-01", Some("yyyy-MM-dd"), None, Some("UTC")).unwrap();
        assert_eq!(ts, 1_709_251_200);

        let ts = parse_date(
            "Mar 1, 2024 13:30",
            Some("MMM d, yyyy HH:mm"),
            Some("en_US"),
            Some("UTC"),
        )
        .unwrap();
        assert_eq!(ts, 1_709_251_200 + 13 * 3600 + 30 * 60);
    }

    #[test]
    fn test_embedded_offset_wins_over_parameter() {
        let with_offset = parse_date(
            "2024-03-01T00:00:00+0200",
            Some("yyyy-MM-dd'T'HH:mm:ssZ"),
            None,
            Some("GMT+8"),
        )
        .unwrap();
        assert_eq!(with_offset, 1_709_251_200 - 2 * 3600);
    }

    #[test]
    fn test_timezone_parameter() {
        let utc = parse_date("2024-03-01", Some("yyyy-MM-dd"), None, Some("UTC")).unwrap();
        let plus8 = parse_date("2024-03-01", Some("yyyy-MM-dd"), None, Some("GMT+8")).unwrap();
        assert_eq!(utc - plus8, 8 * 3600);
    }

    #[test]
    fn test_relative_phrases() {
        let now = Utc::now().timestamp();
        for phrase in ["3 hours ago", "3小时前", "3時間前", "3시간 전"] {
            let ts = parse_date(phrase, None, None, None).unwrap();
            assert!((now - 3 * 3600 - ts).abs() <= 2, "phrase {phrase}");
        }
        let ts = parse_date("yesterday", None, None, None).unwrap();
        assert!((now - 86_400 - ts).abs() <= 2);
        let ts = parse_date("just now", None, None, None).unwrap();
        assert!((now - ts).abs() <= 2);
    }

    #[test]
    fn test_native_fallbacks() {
        assert_eq!(
            parse_date("2024-03-01T00:00:00Z", None, None, None).unwrap(),
            1_709_251_200
        );
        assert_eq!(
            parse_date("2024-03-01", None, None, Some("UTC")).unwrap(),
            1_709_251_200
        );
        assert!(parse_date("not a date", None, None, None).is_none());
    }
}
