//! Frame start time parsing.
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// Parse a frame start time in either the day-of-year form `YYYY/DDD/HH:MM:SS` or
/// ISO-8601. ISO-8601 times without an offset are taken as UTC.
#[must_use]
pub fn parse_frame_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    parse_day_of_year(s)
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|t| t.with_timezone(&Utc)))
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
                .ok()
                .map(|t| t.and_utc())
        })
}

fn parse_day_of_year(s: &str) -> Option<DateTime<Utc>> {
    let mut parts = s.splitn(3, '/');
    let year: i32 = parts.next()?.parse().ok()?;
    let doy: u32 = parts.next()?.parse().ok()?;
    let time = NaiveTime::parse_from_str(parts.next()?, "%H:%M:%S%.f").ok()?;
    let date = NaiveDate::from_yo_opt(year, doy)?;
    Some(date.and_time(time).and_utc())
}

/// Time embedded in a Himawari segment filename such as `IMG_DK01IR3_201705190350_002`.
#[must_use]
pub fn parse_himawari_filename(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name.get(12..24)?;
    if !stamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let date = NaiveDate::parse_from_str(&stamp[..8], "%Y%m%d").ok()?;
    let hour: u32 = stamp[8..10].parse().ok()?;
    let minute: u32 = stamp[10..12].parse().ok()?;
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    Some(date.and_time(time).and_utc())
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, TimeZone};
    use test_case::test_case;

    use super::*;

    #[test_case("2017/055/05:45:18", Utc.with_ymd_and_hms(2017, 2, 24, 5, 45, 18).unwrap(); "day of year")]
    #[test_case("2017/001/00:00:00", Utc.with_ymd_and_hms(2017, 1, 1, 0, 0, 0).unwrap(); "first day")]
    #[test_case("2016/366/23:59:59", Utc.with_ymd_and_hms(2016, 12, 31, 23, 59, 59).unwrap(); "leap year")]
    #[test_case("2017-05-19T03:50:00Z", Utc.with_ymd_and_hms(2017, 5, 19, 3, 50, 0).unwrap(); "rfc3339")]
    #[test_case("2017-05-19T05:50:00+02:00", Utc.with_ymd_and_hms(2017, 5, 19, 3, 50, 0).unwrap(); "rfc3339 offset")]
    #[test_case("2017-05-19T03:50:00.5", Utc.with_ymd_and_hms(2017, 5, 19, 3, 50, 0).unwrap() + chrono::Duration::milliseconds(500); "naive")]
    fn frame_time(input: &str, expected: DateTime<Utc>) {
        assert_eq!(parse_frame_time(input), Some(expected));
    }

    #[test_case(""; "empty")]
    #[test_case("2017/400/05:45:18"; "day out of range")]
    #[test_case("2017/055/25:45:18"; "bad hour")]
    #[test_case("yesterday"; "garbage")]
    fn frame_time_invalid(input: &str) {
        assert_eq!(parse_frame_time(input), None);
    }

    #[test]
    fn himawari_filename() {
        let zult = parse_himawari_filename("IMG_DK01IR3_201705190350_002.lrit").unwrap();
        assert_eq!(zult, Utc.with_ymd_and_hms(2017, 5, 19, 3, 50, 0).unwrap());
        assert_eq!(zult.year(), 2017);

        assert!(parse_himawari_filename("IMG_DK01IR3_2017").is_none());
        assert!(parse_himawari_filename("IMG_DK01IR3_2017O5190350_002").is_none());
    }
}
