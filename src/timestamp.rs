//! A UTC timestamp which may be null.
//!
//! In JSON a timestamp is either `null` or an RFC 3339 string truncated to
//! whole seconds (`"2006-01-02T15:04:05Z"`). In SQL it is stored as text in the
//! form `2006-01-02 15:04:05`, where MySQL's zero date also reads as null.

use anyhow::{Context, bail};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};

pub const SQL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const SQL_ZERO_DATE: &str = "0000-00-00 00:00:00";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(Option<DateTime<Utc>>);

impl Timestamp {
    pub fn new(time: DateTime<Utc>) -> Self {
        Timestamp(Some(time))
    }

    pub fn from_option(time: Option<DateTime<Utc>>) -> Self {
        Timestamp(time)
    }

    pub fn null() -> Self {
        Timestamp(None)
    }

    pub fn now() -> Self {
        Timestamp::new(Utc::now())
    }

    /// Parses `value` using a chrono format string.
    ///
    /// Formats without offset information are read as UTC.
    pub fn parse(format: &str, value: &str) -> anyhow::Result<Self> {
        if let Ok(time) = DateTime::parse_from_str(value, format) {
            return Ok(Timestamp::new(time.with_timezone(&Utc)));
        }

        Timestamp::parse_in_timezone(format, value, &Utc)
    }

    /// Parses `value` as a local time of the given time zone.
    pub fn parse_in_timezone<Tz: TimeZone>(format: &str, value: &str, tz: &Tz) -> anyhow::Result<Self> {
        let naive = NaiveDateTime::parse_from_str(value, format)
            .with_context(|| format!("Cannot parse '{}' using '{}'", value, format))?;

        match tz.from_local_datetime(&naive).single() {
            Some(time) => Ok(Timestamp::new(time.with_timezone(&Utc))),
            None => bail!("'{}' is ambiguous or does not exist in the given time zone", value),
        }
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.0
    }

    /// The SQL text representation or `None` for null.
    pub fn to_sql(&self) -> Option<String> {
        self.0.map(|time| time.format(SQL_FORMAT).to_string())
    }

    /// Reads the SQL text representation.
    ///
    /// `NULL` and the zero date yield a null timestamp.
    pub fn from_sql(value: Option<&str>) -> anyhow::Result<Self> {
        match value {
            None => Ok(Timestamp::null()),
            Some(SQL_ZERO_DATE) => Ok(Timestamp::null()),
            Some(text) => {
                let naive = NaiveDateTime::parse_from_str(text, SQL_FORMAT)
                    .with_context(|| format!("Invalid SQL timestamp '{}'", text))?;
                Ok(Timestamp::new(naive.and_utc()))
            }
        }
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(time: DateTime<Utc>) -> Self {
        Timestamp::new(time)
    }
}

impl From<Option<DateTime<Utc>>> for Timestamp {
    fn from(time: Option<DateTime<Utc>>) -> Self {
        Timestamp::from_option(time)
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.to_sql() {
            Some(text) => f.write_str(&text),
            None => f.write_str("<nil>"),
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Some(time) => serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Secs, true)),
            None => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value: Option<String> = Option::deserialize(deserializer)?;
        match value {
            None => Ok(Timestamp::null()),
            Some(text) => DateTime::parse_from_rfc3339(&text)
                .map(|time| Timestamp::new(time.with_timezone(&Utc)))
                .map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2006, 1, 2, 15, 4, 5).unwrap()
    }

    #[test]
    fn serializes_to_json() {
        let with_nanos = reference() + chrono::Duration::milliseconds(250);

        assert_eq!(
            serde_json::to_string(&Timestamp::new(with_nanos)).unwrap(),
            r#""2006-01-02T15:04:05Z""#
        );
        assert_eq!(serde_json::to_string(&Timestamp::null()).unwrap(), "null");
    }

    #[test]
    fn deserializes_from_json() {
        let parsed: Timestamp = serde_json::from_str(r#""2006-01-02T17:04:05+02:00""#).unwrap();
        assert_eq!(parsed, Timestamp::new(reference()));

        let null: Timestamp = serde_json::from_str("null").unwrap();
        assert!(null.is_null());

        assert!(serde_json::from_str::<Timestamp>(r#""yesterday""#).is_err());
    }

    #[test]
    fn converts_to_and_from_sql() {
        let timestamp = Timestamp::new(reference());

        assert_eq!(timestamp.to_sql().as_deref(), Some("2006-01-02 15:04:05"));
        assert_eq!(Timestamp::from_sql(Some("2006-01-02 15:04:05")).unwrap(), timestamp);
        assert!(Timestamp::from_sql(None).unwrap().is_null());
        assert!(Timestamp::from_sql(Some("0000-00-00 00:00:00")).unwrap().is_null());
        assert!(Timestamp::from_sql(Some("2006-01-02")).is_err());
        assert_eq!(Timestamp::null().to_sql(), None);
    }

    #[test]
    fn displays_sql_format_or_nil() {
        assert_eq!(Timestamp::new(reference()).to_string(), "2006-01-02 15:04:05");
        assert_eq!(Timestamp::null().to_string(), "<nil>");
    }

    #[test]
    fn parses_with_and_without_offsets() {
        assert_eq!(
            Timestamp::parse("%Y-%m-%d %H:%M:%S", "2006-01-02 15:04:05").unwrap(),
            Timestamp::new(reference())
        );
        assert_eq!(
            Timestamp::parse("%Y-%m-%d %H:%M:%S %z", "2006-01-02 08:04:05 -0700").unwrap(),
            Timestamp::new(reference())
        );
        assert!(Timestamp::parse("%Y-%m-%d", "not a date").is_err());
    }

    #[test]
    fn parses_in_timezone() {
        let berlin_winter = FixedOffset::east_opt(3600).unwrap();

        assert_eq!(
            Timestamp::parse_in_timezone("%Y-%m-%d %H:%M:%S", "2006-01-02 16:04:05", &berlin_winter)
                .unwrap(),
            Timestamp::new(reference())
        );
    }

    #[test]
    fn from_option_keeps_null() {
        assert!(Timestamp::from_option(None).is_null());
        assert_eq!(Timestamp::from(reference()).time(), Some(reference()));
        assert!(!Timestamp::now().is_null());
    }
}
