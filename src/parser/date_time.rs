//! Parse the date and time of an outing.
//!
//! Users write local times as `DD.MM.YYYY HH:MM`; day, month and hour may also
//! be given with a single digit, and hours and minutes may be separated by `.`
//! or `-` as well.

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use nom::{
    bytes::complete::take_while_m_n,
    character::complete::{char, multispace1, one_of},
    combinator::{all_consuming, map_res},
    sequence::{terminated, tuple},
    IResult,
};

use crate::error::InputError;

/// Parse a local date and time and convert it to UTC.
pub fn parse_date_time(s: &str, utc_offset: FixedOffset) -> Result<DateTime<Utc>, InputError> {
    let (_, (day, month, year, hour, minute)) =
        parse_components(s.trim()).map_err(|_| InputError::invalid_date_time(s))?;

    let naive = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, 0))
        .ok_or_else(|| InputError::invalid_date_time(s))?;

    utc_offset
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| InputError::invalid_date_time(s))
}

/// Whether the text is written like a date and a time, even an impossible one.
pub fn looks_like_date_time(s: &str) -> bool {
    parse_components(s.trim()).is_ok()
}

fn parse_components(s: &str) -> IResult<&str, (u32, u32, i32, u32, u32)> {
    all_consuming(tuple((
        terminated(number(1, 2), char('.')),
        terminated(number(1, 2), char('.')),
        terminated(parse_year, multispace1),
        terminated(number(1, 2), one_of(":.-")),
        number(2, 2),
    )))(s)
}

fn number<'a>(min: usize, max: usize) -> impl FnMut(&'a str) -> IResult<&'a str, u32> {
    map_res(
        take_while_m_n(min, max, |c: char| c.is_ascii_digit()),
        |digits: &str| digits.parse::<u32>(),
    )
}

fn parse_year(s: &str) -> IResult<&str, i32> {
    map_res(
        take_while_m_n(4, 4, |c: char| c.is_ascii_digit()),
        |digits: &str| digits.parse::<i32>(),
    )(s)
}
