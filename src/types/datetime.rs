//! Codecs for date, time, timestamp, timestamptz and interval.
//!
//! Binary values count from the PostgreSQL epoch 2000-01-01: days for
//! date, microseconds for the timestamp family. Text conversion uses
//! proleptic Gregorian civil-calendar math.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::codec::read_i32;
use crate::protocol::types::{FormatCode, oid};

use super::{Codec, Interval, PgValue, TypeRegistry};

/// Days between 1970-01-01 and 2000-01-01.
const UNIX_TO_PG_EPOCH_DAYS: i64 = 10_957;

const MICROS_PER_SEC: i64 = 1_000_000;
const MICROS_PER_DAY: i64 = 86_400 * MICROS_PER_SEC;

/// Days since 1970-01-01 for a civil date (proleptic Gregorian).
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (month as i64 + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Civil date for days since 1970-01-01.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    simdutf8::compat::from_utf8(bytes)
        .map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))
}

/// An 8-byte big-endian integer occupying the whole payload.
fn read_micros(bytes: &[u8], what: &str) -> Result<i64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Decode(format!("invalid {what} length: {}", bytes.len())))?;
    Ok(i64::from_be_bytes(arr))
}

fn parse_date_str(s: &str) -> Result<i32> {
    let bad = || Error::Decode(format!("invalid date: {s:?}"));
    let mut parts = s.splitn(3, '-');
    let year: i64 = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let month: u32 = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let day_part = parts.next().ok_or_else(bad)?;
    // "0001-01-01 BC" style suffixes
    let (day_str, bc) = match day_part.strip_suffix(" BC") {
        Some(day) => (day, true),
        None => (day_part, false),
    };
    let day: u32 = day_str.parse().map_err(|_| bad())?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return Err(bad());
    }
    let year = if bc { 1 - year } else { year };
    let days = days_from_civil(year, month, day) - UNIX_TO_PG_EPOCH_DAYS;
    i32::try_from(days).map_err(|_| bad())
}

fn format_date(days: i32, out: &mut String) {
    let (year, month, day) = civil_from_days(days as i64 + UNIX_TO_PG_EPOCH_DAYS);
    if year > 0 {
        out.push_str(&format!("{year:04}-{month:02}-{day:02}"));
    } else {
        out.push_str(&format!("{:04}-{month:02}-{day:02} BC", 1 - year));
    }
}

/// Parse "HH:MM:SS[.ffffff]" into microseconds since midnight.
fn parse_time_str(s: &str) -> Result<i64> {
    let bad = || Error::Decode(format!("invalid time: {s:?}"));
    let (hms, frac) = match s.split_once('.') {
        Some((hms, frac)) => (hms, Some(frac)),
        None => (s, None),
    };
    let mut parts = hms.splitn(3, ':');
    let hours: i64 = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let minutes: i64 = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let seconds: i64 = match parts.next() {
        Some(sec) => sec.parse().map_err(|_| bad())?,
        None => 0,
    };
    let micros = match frac {
        Some(frac) => {
            if frac.is_empty() || frac.len() > 6 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                return Err(bad());
            }
            let padded = format!("{frac:0<6}");
            padded.parse::<i64>().map_err(|_| bad())?
        }
        None => 0,
    };
    Ok(((hours * 60 + minutes) * 60 + seconds) * MICROS_PER_SEC + micros)
}

fn format_time(micros: i64, out: &mut String) {
    let seconds = micros / MICROS_PER_SEC;
    let frac = micros % MICROS_PER_SEC;
    out.push_str(&format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds / 60) % 60,
        seconds % 60
    ));
    if frac != 0 {
        let s = format!("{frac:06}");
        out.push('.');
        out.push_str(s.trim_end_matches('0'));
    }
}

/// Parse a timestamp without zone into microseconds since the PG epoch.
fn parse_timestamp_str(s: &str) -> Result<i64> {
    match s {
        "infinity" => return Ok(i64::MAX),
        "-infinity" => return Ok(i64::MIN),
        _ => {}
    }
    let (date_part, time_part) = s
        .split_once(' ')
        .or_else(|| s.split_once('T'))
        .ok_or_else(|| Error::Decode(format!("invalid timestamp: {s:?}")))?;
    // A trailing " BC" binds to the year, not the time of day
    let (time_part, bc) = match time_part.strip_suffix(" BC") {
        Some(t) => (t, true),
        None => (time_part, false),
    };
    let days = if bc {
        parse_date_str(&format!("{date_part} BC"))?
    } else {
        parse_date_str(date_part)?
    } as i64;
    let time = parse_time_str(time_part)?;
    Ok(days * MICROS_PER_DAY + time)
}

fn format_timestamp(micros: i64, out: &mut String) {
    match micros {
        i64::MAX => {
            out.push_str("infinity");
            return;
        }
        i64::MIN => {
            out.push_str("-infinity");
            return;
        }
        _ => {}
    }
    let days = micros.div_euclid(MICROS_PER_DAY);
    let time = micros.rem_euclid(MICROS_PER_DAY);
    let (year, month, day) = civil_from_days(days + UNIX_TO_PG_EPOCH_DAYS);
    if year > 0 {
        out.push_str(&format!("{year:04}-{month:02}-{day:02} "));
        format_time(time, out);
    } else {
        out.push_str(&format!("{:04}-{month:02}-{day:02} ", 1 - year));
        format_time(time, out);
        out.push_str(" BC");
    }
}

/// Parse a timestamptz ("... ±HH[:MM[:SS]]") into UTC microseconds.
fn parse_timestamptz_str(s: &str) -> Result<i64> {
    match s {
        "infinity" => return Ok(i64::MAX),
        "-infinity" => return Ok(i64::MIN),
        _ => {}
    }
    let offset_start = s
        .rfind(['+', '-'])
        .filter(|&i| i > 10) // skip the date's own dashes
        .ok_or_else(|| Error::Decode(format!("invalid timestamptz: {s:?}")))?;
    let (stamp, offset) = s.split_at(offset_start);
    let offset_sign: i64 = if offset.starts_with('-') { -1 } else { 1 };
    let mut fields = offset[1..].splitn(3, ':');
    let bad = || Error::Decode(format!("invalid timestamptz offset: {offset:?}"));
    let hours: i64 = fields.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let minutes: i64 = match fields.next() {
        Some(m) => m.parse().map_err(|_| bad())?,
        None => 0,
    };
    let seconds: i64 = match fields.next() {
        Some(sec) => sec.parse().map_err(|_| bad())?,
        None => 0,
    };
    let offset_micros = offset_sign * ((hours * 60 + minutes) * 60 + seconds) * MICROS_PER_SEC;
    Ok(parse_timestamp_str(stamp.trim_end())? - offset_micros)
}

// === date ===

pub struct DateCodec;

impl Codec for DateCodec {
    fn name(&self) -> &str {
        "date"
    }

    fn preferred_format(&self) -> FormatCode {
        FormatCode::Binary
    }

    fn decode_text(&self, bytes: &[u8]) -> Result<PgValue> {
        let s = utf8(bytes)?.trim();
        match s {
            "infinity" => Ok(PgValue::Date(i32::MAX)),
            "-infinity" => Ok(PgValue::Date(i32::MIN)),
            _ => Ok(PgValue::Date(parse_date_str(s)?)),
        }
    }

    fn decode_binary(&self, bytes: &[u8]) -> Result<PgValue> {
        let arr: [u8; 4] = bytes
            .try_into()
            .map_err(|_| Error::Decode(format!("invalid date length: {}", bytes.len())))?;
        Ok(PgValue::Date(i32::from_be_bytes(arr)))
    }

    fn encode_text(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        match value {
            PgValue::Date(i32::MAX) => {
                buf.extend_from_slice(b"infinity");
                Ok(())
            }
            PgValue::Date(i32::MIN) => {
                buf.extend_from_slice(b"-infinity");
                Ok(())
            }
            PgValue::Date(days) => {
                let mut s = String::new();
                format_date(*days, &mut s);
                buf.extend_from_slice(s.as_bytes());
                Ok(())
            }
            other => Err(Error::type_mismatch(other.kind(), "date")),
        }
    }

    fn encode_binary(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        match value {
            PgValue::Date(days) => {
                buf.extend_from_slice(&days.to_be_bytes());
                Ok(())
            }
            other => Err(Error::type_mismatch(other.kind(), "date")),
        }
    }
}

// === time ===

pub struct TimeCodec;

impl Codec for TimeCodec {
    fn name(&self) -> &str {
        "time"
    }

    fn preferred_format(&self) -> FormatCode {
        FormatCode::Binary
    }

    fn decode_text(&self, bytes: &[u8]) -> Result<PgValue> {
        Ok(PgValue::Time(parse_time_str(utf8(bytes)?.trim())?))
    }

    fn decode_binary(&self, bytes: &[u8]) -> Result<PgValue> {
        Ok(PgValue::Time(read_micros(bytes, "time")?))
    }

    fn encode_text(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        match value {
            PgValue::Time(micros) => {
                let mut s = String::new();
                format_time(*micros, &mut s);
                buf.extend_from_slice(s.as_bytes());
                Ok(())
            }
            other => Err(Error::type_mismatch(other.kind(), "time")),
        }
    }

    fn encode_binary(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        match value {
            PgValue::Time(micros) => {
                buf.extend_from_slice(&micros.to_be_bytes());
                Ok(())
            }
            other => Err(Error::type_mismatch(other.kind(), "time")),
        }
    }
}

// === timestamp / timestamptz ===

/// timestamp and timestamptz differ only in text form: timestamptz
/// carries a UTC offset (always rendered as +00).
pub struct TimestampCodec {
    with_zone: bool,
}

impl TimestampCodec {
    pub fn new(with_zone: bool) -> Self {
        Self { with_zone }
    }

    fn extract(&self, value: &PgValue) -> Result<i64> {
        match (self.with_zone, value) {
            (false, PgValue::Timestamp(v)) => Ok(*v),
            (true, PgValue::TimestampTz(v)) => Ok(*v),
            // Allow assigning across the zoned/unzoned boundary
            (false, PgValue::TimestampTz(v)) => Ok(*v),
            (true, PgValue::Timestamp(v)) => Ok(*v),
            (_, other) => Err(Error::type_mismatch(other.kind(), self.name())),
        }
    }

    fn wrap(&self, micros: i64) -> PgValue {
        if self.with_zone {
            PgValue::TimestampTz(micros)
        } else {
            PgValue::Timestamp(micros)
        }
    }
}

impl Codec for TimestampCodec {
    fn name(&self) -> &str {
        if self.with_zone { "timestamptz" } else { "timestamp" }
    }

    fn preferred_format(&self) -> FormatCode {
        FormatCode::Binary
    }

    fn decode_text(&self, bytes: &[u8]) -> Result<PgValue> {
        let s = utf8(bytes)?.trim();
        let micros = if self.with_zone {
            parse_timestamptz_str(s)?
        } else {
            parse_timestamp_str(s)?
        };
        Ok(self.wrap(micros))
    }

    fn decode_binary(&self, bytes: &[u8]) -> Result<PgValue> {
        Ok(self.wrap(read_micros(bytes, self.name())?))
    }

    fn encode_text(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        let micros = self.extract(value)?;
        let mut s = String::new();
        format_timestamp(micros, &mut s);
        if self.with_zone && micros != i64::MAX && micros != i64::MIN {
            s.push_str("+00");
        }
        buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn encode_binary(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(&self.extract(value)?.to_be_bytes());
        Ok(())
    }
}

// === interval ===

pub struct IntervalCodec;

impl Codec for IntervalCodec {
    fn name(&self) -> &str {
        "interval"
    }

    fn preferred_format(&self) -> FormatCode {
        FormatCode::Binary
    }

    fn decode_text(&self, bytes: &[u8]) -> Result<PgValue> {
        let s = utf8(bytes)?.trim();
        let bad = || Error::Decode(format!("invalid interval: {s:?}"));

        let mut interval = Interval::default();
        let mut words = s.split_whitespace().peekable();
        while let Some(word) = words.next() {
            if word.contains(':') {
                // "[-]HH:MM:SS[.ffffff]" time-of-day tail
                let (negative, time) = match word.strip_prefix('-') {
                    Some(rest) => (true, rest),
                    None => (false, word),
                };
                let micros = parse_time_str(time)?;
                interval.micros = if negative { -micros } else { micros };
                continue;
            }
            let quantity: i64 = word.parse().map_err(|_| bad())?;
            let unit = words.next().ok_or_else(bad)?;
            match unit.trim_end_matches('s') {
                "year" => interval.months += (quantity * 12) as i32,
                "mon" | "month" => interval.months += quantity as i32,
                "day" => interval.days += quantity as i32,
                _ => return Err(bad()),
            }
        }
        Ok(PgValue::Interval(interval))
    }

    fn decode_binary(&self, bytes: &[u8]) -> Result<PgValue> {
        if bytes.len() != 16 {
            return Err(Error::Decode(format!("invalid interval length: {}", bytes.len())));
        }
        let micros = i64::from_be_bytes(bytes[0..8].try_into().unwrap_or_default());
        let (days, rest) = read_i32(&bytes[8..])?;
        let (months, _) = read_i32(rest)?;
        Ok(PgValue::Interval(Interval {
            months,
            days,
            micros,
        }))
    }

    fn encode_text(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        let PgValue::Interval(interval) = value else {
            return Err(Error::type_mismatch(value.kind(), "interval"));
        };

        let mut parts: Vec<String> = Vec::new();
        let years = interval.months / 12;
        let months = interval.months % 12;
        if years != 0 {
            parts.push(format!("{years} year{}", if years.abs() == 1 { "" } else { "s" }));
        }
        if months != 0 {
            parts.push(format!("{months} mon{}", if months.abs() == 1 { "" } else { "s" }));
        }
        if interval.days != 0 {
            parts.push(format!(
                "{} day{}",
                interval.days,
                if interval.days.abs() == 1 { "" } else { "s" }
            ));
        }
        if interval.micros != 0 || parts.is_empty() {
            let mut time = String::new();
            if interval.micros < 0 {
                time.push('-');
            }
            format_time(interval.micros.abs(), &mut time);
            parts.push(time);
        }
        buf.extend_from_slice(parts.join(" ").as_bytes());
        Ok(())
    }

    fn encode_binary(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        let PgValue::Interval(interval) = value else {
            return Err(Error::type_mismatch(value.kind(), "interval"));
        };
        buf.extend_from_slice(&interval.micros.to_be_bytes());
        buf.extend_from_slice(&interval.days.to_be_bytes());
        buf.extend_from_slice(&interval.months.to_be_bytes());
        Ok(())
    }
}

/// Register all date/time codecs.
pub fn register(registry: &mut TypeRegistry) {
    registry.register(oid::DATE, Arc::new(DateCodec));
    registry.register(oid::TIME, Arc::new(TimeCodec));
    registry.register(oid::TIMESTAMP, Arc::new(TimestampCodec::new(false)));
    registry.register(oid::TIMESTAMPTZ, Arc::new(TimestampCodec::new(true)));
    registry.register(oid::INTERVAL, Arc::new(IntervalCodec));
}
