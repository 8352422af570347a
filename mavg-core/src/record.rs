use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Text format of timestamps on the wire.
///
/// Input timestamps look like `2018-12-26 18:11:08.509654` (fraction optional),
/// output dates are always rendered at minute resolution with `00` seconds.
pub mod timefmt {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub const INPUT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
    pub const OUTPUT_FORMAT: &str = "%Y-%m-%d %H:%M:00";

    /// Parse an input timestamp. Timestamps carry no zone and are read as UTC.
    pub fn parse(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        NaiveDateTime::parse_from_str(s.trim(), INPUT_FORMAT).map(|t| t.and_utc())
    }

    pub fn format(t: &DateTime<Utc>) -> String {
        t.format(OUTPUT_FORMAT).to_string()
    }

    pub fn deserialize<'de, D>(d: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(d)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub fn serialize<S>(t: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&format(t))
    }
}

/// A single timestamped duration sample fed to the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub duration: u64,
}

impl Event {
    pub fn new(timestamp: DateTime<Utc>, duration: u64) -> Self {
        Self { timestamp, duration }
    }
}

/// Wire shape of a delivered-translation record, one per JSONL line or queue message.
/// Only `timestamp` and `duration` are required.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranslationDelivered {
    #[serde(with = "timefmt")]
    pub timestamp: DateTime<Utc>,
    pub duration: u64,
    #[serde(default)]
    pub translation_id: Option<String>,
    #[serde(default)]
    pub source_language: Option<String>,
    #[serde(default)]
    pub target_language: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub event_name: Option<String>,
    #[serde(default)]
    pub nr_words: Option<u64>,
}

impl From<TranslationDelivered> for Event {
    fn from(t: TranslationDelivered) -> Self {
        Event::new(t.timestamp, t.duration)
    }
}

/// Decode one raw JSON record into the full wire record.
pub fn decode_record(bytes: &[u8]) -> serde_json::Result<TranslationDelivered> {
    serde_json::from_slice(bytes)
}

/// One emitted point of the moving-average series.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AveragedPoint {
    #[serde(with = "timefmt")]
    pub date: DateTime<Utc>,
    #[serde(rename = "average_delivery_time")]
    pub average: f64,
}

impl AveragedPoint {
    pub fn new(date: DateTime<Utc>, average: f64) -> Self {
        Self { date, average }
    }
}
