/*!
Plain-data model types mirroring the server's scalar types.

Temporal types are thin wrappers over the server's own representation
(microseconds relative to the 2000-01-01 epoch, days for dates), so
conversion to and from the wire is lossless. Arbitrary-precision numbers
keep the base-10000 digit form they travel in.
*/

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Microseconds between 1970-01-01 and 2000-01-01, the server epoch.
pub(crate) const POSTGRES_EPOCH_UNIX_MICROS: i64 = 946_684_800_000_000;

pub(crate) const MICROS_PER_DAY: i64 = 86_400_000_000;

/// A point in time (`std::datetime`), timezone-aware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Datetime {
    pub(crate) micros: i64,
}

/// A calendar date and time without a timezone (`cal::local_datetime`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalDatetime {
    pub(crate) micros: i64,
}

/// A calendar date (`cal::local_date`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalDate {
    pub(crate) days: i32,
}

/// A time of day (`cal::local_time`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalTime {
    pub(crate) micros: i64,
}

/// A difference between two points in time (`std::duration`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration {
    pub(crate) micros: i64,
}

/// An arbitrary-precision integer (`std::bigint`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigInt {
    pub(crate) negative: bool,
    pub(crate) weight: i16,
    pub(crate) digits: Vec<u16>,
}

/// An arbitrary-precision number (`std::decimal`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decimal {
    pub(crate) negative: bool,
    pub(crate) weight: i16,
    pub(crate) decimal_digits: u16,
    pub(crate) digits: Vec<u16>,
}

/// A JSON document (`std::json`), kept as its textual form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Json(String);

/// A member of a server-defined enumeration type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue(pub(crate) Arc<str>);

impl Datetime {
    pub fn from_unix_micros(micros: i64) -> Datetime {
        Datetime {
            micros: micros - POSTGRES_EPOCH_UNIX_MICROS,
        }
    }
    pub fn to_unix_micros(self) -> i64 {
        self.micros + POSTGRES_EPOCH_UNIX_MICROS
    }
}

impl LocalDatetime {
    pub fn from_unix_micros(micros: i64) -> LocalDatetime {
        LocalDatetime {
            micros: micros - POSTGRES_EPOCH_UNIX_MICROS,
        }
    }
    pub fn to_unix_micros(self) -> i64 {
        self.micros + POSTGRES_EPOCH_UNIX_MICROS
    }
}

impl LocalDate {
    /// Days relative to 1970-01-01.
    pub fn from_unix_days(days: i32) -> LocalDate {
        LocalDate {
            days: days - (POSTGRES_EPOCH_UNIX_MICROS / MICROS_PER_DAY) as i32,
        }
    }
    pub fn to_unix_days(self) -> i32 {
        self.days + (POSTGRES_EPOCH_UNIX_MICROS / MICROS_PER_DAY) as i32
    }
}

impl LocalTime {
    /// Microseconds since midnight. Panics when out of the day range.
    pub fn from_micros(micros: i64) -> LocalTime {
        assert!(
            (0..MICROS_PER_DAY).contains(&micros),
            "time of day out of range"
        );
        LocalTime { micros }
    }
    pub fn to_micros(self) -> i64 {
        self.micros
    }
}

impl Duration {
    pub fn from_micros(micros: i64) -> Duration {
        Duration { micros }
    }
    pub fn to_micros(self) -> i64 {
        self.micros
    }
}

impl BigInt {
    pub fn is_negative(&self) -> bool {
        self.negative
    }
}

impl From<i64> for BigInt {
    fn from(value: i64) -> BigInt {
        let negative = value < 0;
        let mut val = value.unsigned_abs();
        let mut digits = Vec::new();
        while val > 0 {
            digits.push((val % 10_000) as u16);
            val /= 10_000;
        }
        digits.reverse();
        let weight = digits.len() as i16 - 1;
        while let Some(&0) = digits.last() {
            digits.pop();
        }
        BigInt {
            negative,
            weight,
            digits,
        }
    }
}

impl Decimal {
    pub fn is_negative(&self) -> bool {
        self.negative
    }
}

impl Json {
    /// Wraps a string that is known to contain valid JSON, e.g. one the
    /// server just produced.
    pub fn new_unchecked(value: String) -> Json {
        Json(value)
    }
}

impl Deref for Json {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl From<Json> for String {
    fn from(value: Json) -> String {
        value.0
    }
}

impl fmt::Display for Json {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl EnumValue {
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl Deref for EnumValue {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EnumValue {
    fn from(name: &str) -> EnumValue {
        EnumValue(name.into())
    }
}
