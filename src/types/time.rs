//! `time` crate integration.
//!
//! Conversions between the wire representations (PostgreSQL epoch
//! 2000-01-01) and `time::Date` / `time::Time` / `time::OffsetDateTime` /
//! `time::PrimitiveDateTime`.

use time::macros::{date, datetime};

use crate::error::{Error, Result};

use super::{FromPresent, FromValue, PgValue, Value, reject_null};

const PG_EPOCH_DATE: time::Date = date!(2000 - 01 - 01);
const PG_EPOCH_DATETIME: time::PrimitiveDateTime = datetime!(2000-01-01 00:00:00);
const PG_EPOCH_UTC: time::OffsetDateTime = datetime!(2000-01-01 00:00:00 UTC);

fn wrong_kind(value: &PgValue, target: &str) -> Error {
    Error::Decode(format!("cannot assign {} to {target}", value.kind()))
}

impl From<time::Date> for PgValue {
    fn from(value: time::Date) -> Self {
        let days = value.to_julian_day() - PG_EPOCH_DATE.to_julian_day();
        PgValue::Date(days)
    }
}

impl FromPresent for time::Date {
    fn from_present(value: PgValue) -> Result<Self> {
        match value {
            PgValue::Date(days) => {
                time::Date::from_julian_day(PG_EPOCH_DATE.to_julian_day() + days)
                    .map_err(|e| Error::Decode(format!("date out of range: {e}")))
            }
            other => Err(wrong_kind(&other, "Date")),
        }
    }
}

impl FromValue for time::Date {
    fn from_value(value: Value) -> Result<Self> {
        reject_null(value, "Date")
    }
}

impl From<time::Time> for PgValue {
    fn from(value: time::Time) -> Self {
        let micros = value.hour() as i64 * 3_600_000_000
            + value.minute() as i64 * 60_000_000
            + value.second() as i64 * 1_000_000
            + value.microsecond() as i64;
        PgValue::Time(micros)
    }
}

impl FromPresent for time::Time {
    fn from_present(value: PgValue) -> Result<Self> {
        match value {
            PgValue::Time(micros) => {
                let seconds = micros / 1_000_000;
                time::Time::from_hms_micro(
                    (seconds / 3600) as u8,
                    ((seconds / 60) % 60) as u8,
                    (seconds % 60) as u8,
                    (micros % 1_000_000) as u32,
                )
                .map_err(|e| Error::Decode(format!("time out of range: {e}")))
            }
            other => Err(wrong_kind(&other, "Time")),
        }
    }
}

impl FromValue for time::Time {
    fn from_value(value: Value) -> Result<Self> {
        reject_null(value, "Time")
    }
}

impl From<time::PrimitiveDateTime> for PgValue {
    fn from(value: time::PrimitiveDateTime) -> Self {
        let delta = value - PG_EPOCH_DATETIME;
        PgValue::Timestamp(delta.whole_microseconds() as i64)
    }
}

impl FromPresent for time::PrimitiveDateTime {
    fn from_present(value: PgValue) -> Result<Self> {
        match value {
            PgValue::Timestamp(micros) => {
                let duration = time::Duration::microseconds(micros);
                PG_EPOCH_DATETIME
                    .checked_add(duration)
                    .ok_or_else(|| Error::Decode("timestamp out of range".into()))
            }
            other => Err(wrong_kind(&other, "PrimitiveDateTime")),
        }
    }
}

impl FromValue for time::PrimitiveDateTime {
    fn from_value(value: Value) -> Result<Self> {
        reject_null(value, "PrimitiveDateTime")
    }
}

impl From<time::OffsetDateTime> for PgValue {
    fn from(value: time::OffsetDateTime) -> Self {
        let delta = value - PG_EPOCH_UTC;
        PgValue::TimestampTz(delta.whole_microseconds() as i64)
    }
}

impl FromPresent for time::OffsetDateTime {
    fn from_present(value: PgValue) -> Result<Self> {
        match value {
            PgValue::TimestampTz(micros) => {
                let duration = time::Duration::microseconds(micros);
                PG_EPOCH_UTC
                    .checked_add(duration)
                    .ok_or_else(|| Error::Decode("timestamptz out of range".into()))
            }
            other => Err(wrong_kind(&other, "OffsetDateTime")),
        }
    }
}

impl FromValue for time::OffsetDateTime {
    fn from_value(value: Value) -> Result<Self> {
        reject_null(value, "OffsetDateTime")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_round_trip() {
        let day = date!(2024 - 02 - 29);
        let value = Value::from(day);
        assert_eq!(value, Value::Present(PgValue::Date(8825)));
        assert_eq!(time::Date::from_value(value).unwrap(), day);
    }

    #[test]
    fn timestamp_round_trip() {
        let stamp = datetime!(2004-10-19 10:23:54.123456);
        let value = Value::from(stamp);
        assert_eq!(time::PrimitiveDateTime::from_value(value).unwrap(), stamp);
    }

    #[test]
    fn offset_datetime_is_utc_based() {
        let stamp = datetime!(2000-01-01 01:00:00 +01:00);
        let value = Value::from(stamp);
        // 01:00+01 is exactly the PostgreSQL epoch in UTC
        assert_eq!(value, Value::Present(PgValue::TimestampTz(0)));
    }

    #[test]
    fn null_rejected_for_scalar() {
        assert!(time::Date::from_value(Value::Null).is_err());
        assert_eq!(Option::<time::Date>::from_value(Value::Null).unwrap(), None);
    }
}
