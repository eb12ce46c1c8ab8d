use std::path::Path;

use chrono::{Datelike, NaiveDate, NaiveDateTime};

const FULL_DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y%m%d", "%Y.%m.%d", "%Y/%m/%d"];
const DATE_TIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

/// Parse a scraped date into a calendar date.
///
/// Accepts full dates (`2023-08-15`, `20230815`, `2023.08.15`, `2023/08/15`),
/// ISO date-times, and the year-less `MM.DD` form used by the daily record
/// pages (`04.04`, `4.4`, `04-04`, `04/04`). The year-less form needs
/// `year_hint`; without one it fails.
pub fn parse_date(raw: &str, year_hint: Option<i32>) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    for fmt in FULL_DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    for fmt in DATE_TIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    // "2023-08-15T18:30:00+09:00" and friends: keep the leading date.
    if s.len() > 10
        && s.is_char_boundary(10)
        && let Ok(d) = NaiveDate::parse_from_str(&s[..10], "%Y-%m-%d")
    {
        return Some(d);
    }

    let year = year_hint?;
    let mut parts = s.split(['.', '-', '/']);
    let month = parts.next()?.trim().parse::<u32>().ok()?;
    let day = parts.next()?.trim().parse::<u32>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

/// `YYYY-MM-DD`, the only date form written back out.
pub fn iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// `YYYYMMDD`, the form embedded in game identifiers.
pub fn compact(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Year taken from a `/<YYYY>/` directory segment, e.g. `data/2023/player_stats/..`.
pub fn year_from_path(path: &Path) -> Option<i32> {
    let parent = path.parent()?;
    parent
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .filter(|seg| seg.len() == 4 && seg.chars().all(|ch| ch.is_ascii_digit()))
        .filter_map(|seg| seg.parse::<i32>().ok())
        .filter(|y| (1982..=2100).contains(y))
        .last()
}

pub fn year_bounds(year: i32) -> Option<(NaiveDate, NaiveDate)> {
    Some((
        NaiveDate::from_ymd_opt(year, 1, 1)?,
        NaiveDate::from_ymd_opt(year, 12, 31)?,
    ))
}

pub fn days_in_year(year: i32) -> i64 {
    match year_bounds(year) {
        Some((start, end)) => (end - start).num_days() + 1,
        None => 365,
    }
}

/// The day-of-month digit shift seen on suffixed double-header rows:
/// `01`/`02`/`03` were scraped where `10`/`20`/`30` was meant.
pub fn shifted_day_fix(date: NaiveDate) -> Option<NaiveDate> {
    let fixed_day = match date.day() {
        1 => 10,
        2 => 20,
        3 => 30,
        _ => return None,
    };
    date.with_day(fixed_day)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn parses_full_date_variants() {
        assert_eq!(parse_date("2023-08-15", None), Some(d(2023, 8, 15)));
        assert_eq!(parse_date(" 20230815 ", None), Some(d(2023, 8, 15)));
        assert_eq!(parse_date("2023.08.15", None), Some(d(2023, 8, 15)));
        assert_eq!(parse_date("2023-08-15T18:30:00", None), Some(d(2023, 8, 15)));
        assert_eq!(parse_date("2023-08-15T18:30:00+09:00", None), Some(d(2023, 8, 15)));
    }

    #[test]
    fn year_less_dates_need_a_hint() {
        assert_eq!(parse_date("04.04", None), None);
        assert_eq!(parse_date("04.04", Some(2022)), Some(d(2022, 4, 4)));
        assert_eq!(parse_date("4.4", Some(2022)), Some(d(2022, 4, 4)));
        assert_eq!(parse_date("10/3", Some(2021)), Some(d(2021, 10, 3)));
        assert_eq!(parse_date("02.30", Some(2021)), None);
    }

    #[test]
    fn year_from_path_reads_directory_segment() {
        let p = Path::new("data/2023/player_stats/2023_hitter_daily.csv");
        assert_eq!(year_from_path(p), Some(2023));
        assert_eq!(year_from_path(Path::new("data_etl/all_years.csv")), None);
    }

    #[test]
    fn shifted_day_fix_only_touches_first_three_days() {
        assert_eq!(shifted_day_fix(d(2024, 5, 1)), Some(d(2024, 5, 10)));
        assert_eq!(shifted_day_fix(d(2024, 5, 3)), Some(d(2024, 5, 30)));
        assert_eq!(shifted_day_fix(d(2024, 2, 3)), None);
        assert_eq!(shifted_day_fix(d(2024, 5, 4)), None);
    }

    #[test]
    fn leap_years_have_366_days() {
        assert_eq!(days_in_year(2024), 366);
        assert_eq!(days_in_year(2023), 365);
    }
}
