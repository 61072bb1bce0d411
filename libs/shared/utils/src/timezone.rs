//! JST/UTC normalization.
//!
//! Everything is stored in UTC. Clinic days, slot grids and anything shown to
//! people are Japan Standard Time, a fixed UTC+09:00 offset with no daylight
//! saving, so naive local times map to exactly one instant.

use std::fmt;

use chrono::{
    DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, SecondsFormat, TimeZone, Utc,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub const JST_OFFSET_SECONDS: i32 = 9 * 3600;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, Error, PartialEq)]
#[error("Unrecognized timestamp '{input}': expected RFC 3339 or a JST wall-clock time (YYYY-MM-DDTHH:MM)")]
pub struct TimeParseError {
    pub input: String,
}

pub fn jst() -> FixedOffset {
    // +09:00 is always inside the range east_opt accepts.
    FixedOffset::east_opt(JST_OFFSET_SECONDS).unwrap_or_else(|| Utc.fix())
}

pub fn to_jst(utc: DateTime<Utc>) -> DateTime<FixedOffset> {
    utc.with_timezone(&jst())
}

pub fn jst_date_of(utc: DateTime<Utc>) -> NaiveDate {
    to_jst(utc).date_naive()
}

pub fn today_jst() -> NaiveDate {
    jst_date_of(Utc::now())
}

/// Interpret a wall-clock time as JST. Fails only at the edges of the
/// representable range.
pub fn jst_local_to_utc(local: NaiveDateTime) -> Result<DateTime<Utc>, TimeParseError> {
    local
        .checked_sub_signed(Duration::seconds(JST_OFFSET_SECONDS as i64))
        .map(|utc| utc.and_utc())
        .ok_or_else(|| TimeParseError { input: local.to_string() })
}

pub fn jst_date_time_to_utc(date: NaiveDate, time: NaiveTime) -> Result<DateTime<Utc>, TimeParseError> {
    jst_local_to_utc(date.and_time(time))
}

/// Half-open UTC range covering the JST calendar day.
pub fn jst_day_bounds(date: NaiveDate) -> Result<(DateTime<Utc>, DateTime<Utc>), TimeParseError> {
    let start = jst_date_time_to_utc(date, NaiveTime::MIN)?;
    let end = start
        .checked_add_signed(Duration::days(1))
        .ok_or_else(|| TimeParseError { input: date.to_string() })?;
    Ok((start, end))
}

/// Accepts RFC 3339 with an explicit offset (converted to UTC) or a naive
/// timestamp, which is taken to be JST.
pub fn parse_client_timestamp(input: &str) -> Result<DateTime<Utc>, TimeParseError> {
    let trimmed = input.trim();

    if let Ok(with_offset) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(with_offset.with_timezone(&Utc));
    }

    let local = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .ok_or_else(|| TimeParseError { input: input.to_string() })?;
    jst_local_to_utc(local).map_err(|_| TimeParseError { input: input.to_string() })
}

pub fn parse_jst_time_of_day(input: &str) -> Result<NaiveTime, TimeParseError> {
    let trimmed = input.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map_err(|_| TimeParseError { input: input.to_string() })
}

/// UTC timestamp for PostgREST filters. Uses `Z` so the value needs no
/// escaping inside a query string. Sub-second precision is kept so cursors
/// built from stored timestamps compare exactly.
pub fn query_timestamp(utc: DateTime<Utc>) -> String {
    utc.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn format_jst(utc: DateTime<Utc>) -> String {
    to_jst(utc).format("%Y-%m-%d %H:%M").to_string()
}

/// A stored instant paired with its JST rendering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClinicTime {
    pub utc: DateTime<Utc>,
    pub jst: String,
}

impl From<DateTime<Utc>> for ClinicTime {
    fn from(utc: DateTime<Utc>) -> Self {
        Self { utc, jst: format_jst(utc) }
    }
}

/// Request-body timestamp that accepts either an offset-qualified RFC 3339
/// string or a JST wall-clock time, normalized to UTC on deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClientTimestamp(pub DateTime<Utc>);

impl ClientTimestamp {
    pub fn utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for ClientTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for ClientTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse_client_timestamp(&raw)
            .map(ClientTimestamp)
            .map_err(serde::de::Error::custom)
    }
}

impl Serialize for ClientTimestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_rfc3339())
    }
}
