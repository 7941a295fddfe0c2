//! Time utilities: Julian dates and timezone-aware night bounds.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{SchedError, SchedResult};

/// Julian date of 1970-01-01T00:00:00Z.
pub const UNIX_EPOCH_JD: f64 = 2_440_587.5;

pub fn jd_from_utc(dt: DateTime<Utc>) -> f64 {
    dt.timestamp_millis() as f64 / 86_400_000.0 + UNIX_EPOCH_JD
}

pub fn utc_from_jd(jd: f64) -> Option<DateTime<Utc>> {
    let ms = ((jd - UNIX_EPOCH_JD) * 86_400_000.0).round() as i64;
    DateTime::from_timestamp_millis(ms)
}

fn parse_tz(tz: &str) -> SchedResult<Tz> {
    tz.parse()
        .map_err(|_| SchedError::InvalidConfig(format!("invalid timezone: {tz}")))
}

fn localize(tz: Tz, ndt: NaiveDateTime) -> SchedResult<DateTime<Utc>> {
    let local = tz.from_local_datetime(&ndt).single().ok_or_else(|| {
        SchedError::InvalidConfig(format!("ambiguous or invalid local time (DST?): {ndt} {tz}"))
    })?;
    Ok(local.with_timezone(&Utc))
}

/// JD bounds of the night starting on the evening of `date`.
///
/// `start_local`/`end_local` are "HH:MM" clock times; an end earlier than the
/// start falls on the following morning.
pub fn night_bounds(
    date: NaiveDate,
    start_local: &str,
    end_local: &str,
    tz: &str,
) -> SchedResult<(f64, f64)> {
    let tz = parse_tz(tz)?;
    let parse = |s: &str| {
        NaiveTime::parse_from_str(s, "%H:%M")
            .map_err(|e| SchedError::InvalidConfig(format!("invalid clock time '{s}': {e}")))
    };
    let start_t = parse(start_local)?;
    let end_t = parse(end_local)?;

    let end_date = if end_t <= start_t {
        date + Duration::days(1)
    } else {
        date
    };

    let start = localize(tz, date.and_time(start_t))?;
    let end = localize(tz, end_date.and_time(end_t))?;
    Ok((jd_from_utc(start), jd_from_utc(end)))
}

/// Local calendar date of the evening a JD belongs to.
pub fn night_date(jd: f64, tz: &str) -> SchedResult<NaiveDate> {
    let tz = parse_tz(tz)?;
    let utc = utc_from_jd(jd)
        .ok_or_else(|| SchedError::InvalidConfig(format!("JD out of range: {jd}")))?;
    let local = utc.with_timezone(&tz) - Duration::hours(12);
    Ok(local.date_naive())
}
