use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Number;

/// Textual timestamp format used on the wire and in the log.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// One decoded sensor reading, stamped on receipt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    #[serde(rename = "ts", with = "timestamp_format")]
    pub timestamp: DateTime<Utc>,
    pub device_id: Option<String>,
    pub temp_c: Option<Number>,
    pub humidity: Option<Number>,
}

impl TelemetryRecord {
    /// Builds a record from a device reading. Sub-second precision is dropped.
    pub fn stamped(reading: DeviceReading, received_at: DateTime<Utc>) -> Self {
        Self {
            timestamp: received_at.trunc_subsecs(0),
            device_id: reading.device_id,
            temp_c: reading.temp_c,
            humidity: reading.humidity,
        }
    }

    pub fn timestamp_text(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// The fields a device is trusted to send. Anything else in the payload,
/// including its own `ts`, is ignored. `device_id` is opaque: any scalar is
/// kept as its text.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceReading {
    #[serde(default, deserialize_with = "opaque_id::deserialize")]
    pub device_id: Option<String>,
    #[serde(default)]
    pub temp_c: Option<Number>,
    #[serde(default)]
    pub humidity: Option<Number>,
}

mod timestamp_format {
    use super::TIMESTAMP_FORMAT;
    use chrono::{DateTime, Utc};
    use serde::Serializer;

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&ts.format(TIMESTAMP_FORMAT))
    }
}

mod opaque_id {
    use serde::de::{Deserialize, Deserializer, Error};
    use serde_json::Value;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(id)) => Ok(Some(id)),
            Some(Value::Number(id)) => Ok(Some(id.to_string())),
            Some(Value::Bool(id)) => Ok(Some(id.to_string())),
            Some(_) => Err(D::Error::custom(
                "device_id must be a string, number or boolean",
            )),
        }
    }
}
