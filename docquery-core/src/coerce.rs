//! Value coercion into the store's native wire representations.
//!
//! Identifier strings become native ObjectIds when they look like one, and calendar values
//! become millisecond-precision UTC timestamps. Everything else passes through as BSON.

use bson::{Bson, DateTime, oid::ObjectId};
use chrono::{DateTime as ChronoDateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::error::{QueryError, QueryResult};

/// Name of the primary key field.
pub const ID_FIELD: &str = "_id";

/// Returns `true` when `value` is exactly 24 hexadecimal characters.
pub fn is_object_id_hex(value: &str) -> bool {
    value.len() == 24 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Returns `true` when `field` addresses a primary key, either `key` itself or an embedded `._id`.
pub fn is_id_field(field: &str, key: &str) -> bool {
    field == key || field == ID_FIELD || field.ends_with("._id")
}

/// Parses identifier-hex strings into native ObjectIds; lists are coerced element-wise.
///
/// Any other value (custom string keys, integers) is returned unchanged.
pub fn coerce_id(value: Bson) -> Bson {
    match value {
        Bson::String(text) if is_object_id_hex(&text) => match ObjectId::parse_str(&text) {
            Ok(oid) => Bson::ObjectId(oid),
            Err(_) => Bson::String(text),
        },
        Bson::Array(items) => Bson::Array(items.into_iter().map(coerce_id).collect()),
        other => other,
    }
}

/// The accepted shapes of a date/time argument.
///
/// Sub-millisecond precision is truncated on conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum DateInput {
    /// `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS[.fff]` (read as UTC) or RFC 3339.
    Text(String),
    /// Milliseconds since the Unix epoch.
    EpochMillis(i64),
    /// A native BSON timestamp.
    Timestamp(DateTime),
    /// A UTC calendar value.
    Utc(ChronoDateTime<Utc>),
    /// A calendar value carrying its own offset.
    Offset(ChronoDateTime<FixedOffset>),
    /// A calendar day, read as midnight UTC.
    Day(NaiveDate),
}

impl DateInput {
    /// Converts to the native millisecond UTC timestamp.
    pub fn to_datetime(&self) -> QueryResult<DateTime> {
        Ok(match self {
            DateInput::Text(text) => DateTime::from_chrono(parse_text(text)?),
            DateInput::EpochMillis(millis) => DateTime::from_millis(*millis),
            DateInput::Timestamp(datetime) => *datetime,
            DateInput::Utc(datetime) => DateTime::from_chrono(*datetime),
            DateInput::Offset(datetime) => DateTime::from_chrono(datetime.with_timezone(&Utc)),
            DateInput::Day(day) => DateTime::from_chrono(midnight(*day)),
        })
    }

    /// The UTC calendar day this value falls on.
    pub fn to_day(&self) -> QueryResult<NaiveDate> {
        match self {
            DateInput::Day(day) => Ok(*day),
            other => other
                .to_datetime()
                .map(|datetime| datetime.to_chrono().date_naive()),
        }
    }
}

impl From<&str> for DateInput {
    fn from(value: &str) -> Self {
        DateInput::Text(value.to_string())
    }
}

impl From<String> for DateInput {
    fn from(value: String) -> Self {
        DateInput::Text(value)
    }
}

impl From<i64> for DateInput {
    fn from(value: i64) -> Self {
        DateInput::EpochMillis(value)
    }
}

impl From<DateTime> for DateInput {
    fn from(value: DateTime) -> Self {
        DateInput::Timestamp(value)
    }
}

impl From<ChronoDateTime<Utc>> for DateInput {
    fn from(value: ChronoDateTime<Utc>) -> Self {
        DateInput::Utc(value)
    }
}

impl From<ChronoDateTime<FixedOffset>> for DateInput {
    fn from(value: ChronoDateTime<FixedOffset>) -> Self {
        DateInput::Offset(value)
    }
}

impl From<NaiveDate> for DateInput {
    fn from(value: NaiveDate) -> Self {
        DateInput::Day(value)
    }
}

/// Start of the given UTC day.
pub(crate) fn midnight(day: NaiveDate) -> ChronoDateTime<Utc> {
    Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN))
}

/// Last representable millisecond of the given UTC day.
pub(crate) fn end_of_day(day: NaiveDate) -> ChronoDateTime<Utc> {
    midnight(day) + chrono::Duration::days(1) - chrono::Duration::milliseconds(1)
}

fn parse_text(text: &str) -> QueryResult<ChronoDateTime<Utc>> {
    if let Ok(datetime) = ChronoDateTime::parse_from_rfc3339(text) {
        return Ok(datetime.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map(midnight)
        .map_err(|_| QueryError::invalid(format!("\"{text}\" is not a recognized date")))
}

/// Human-readable name of a BSON value's type, used in argument error messages.
pub fn type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Null | Bson::Undefined => "null",
        Bson::String(_) | Bson::Symbol(_) => "string",
        Bson::Boolean(_) => "bool",
        Bson::Int32(_) | Bson::Int64(_) => "int",
        Bson::Double(_) | Bson::Decimal128(_) => "float",
        Bson::Array(_) => "array",
        Bson::Document(_) => "document",
        Bson::ObjectId(_) => "objectId",
        Bson::DateTime(_) | Bson::Timestamp(_) => "date",
        Bson::RegularExpression(_) => "regex",
        _ => "binary",
    }
}
