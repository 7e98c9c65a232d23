//! UTC calendar day helpers.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

/// Last millisecond of any day.
const LAST_MILLI: NaiveTime = match NaiveTime::from_hms_milli_opt(23, 59, 59, 999) {
    Some(time) => time,
    None => NaiveTime::MIN,
};

/// Counter bucket holding the net delta of one calendar day.
#[must_use]
pub fn day_bucket(day: NaiveDate) -> String {
    format!("day:{}", day.format("%Y%m%d"))
}

/// First millisecond of the given day.
#[must_use]
pub fn start_of(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

/// Last millisecond of the given day.
/// Defined for every date, `NaiveDate::MAX` included.
#[must_use]
pub fn end_of(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(LAST_MILLI).and_utc()
}

/// Last millisecond of the day containing `instant`.
#[must_use]
pub fn end_of_day(instant: DateTime<Utc>) -> DateTime<Utc> {
    end_of(instant.date_naive())
}

/// Calendar days strictly after `after`, up to and including `through`.
pub fn days_after(after: NaiveDate, through: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    after.iter_days().skip(1).take_while(move |day| *day <= through)
}
