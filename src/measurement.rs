use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Measurement series holding sea-level adjusted pressure.
pub const PRESSURE_SERIES: &str = "hPa_0";

/// Identifier of a sensor device. Used verbatim in topic and table names, so
/// only ASCII alphanumerics, `-` and `_` are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn parse(s: &str) -> Result<Self, anyhow::Error> {
        if s.is_empty() {
            return Err(anyhow::anyhow!("Device id must not be empty"));
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(anyhow::anyhow!(
                "Invalid character {c:?} in device id {s:?}"
            ));
        }
        Ok(Self(s.to_owned()))
    }

    pub fn input_topic(&self) -> String {
        format!("{}/json", self.0)
    }

    pub fn output_topic(&self) -> String {
        format!("{}/rcv", self.0)
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub device: DeviceId,
    pub timestamp: DateTime<Utc>,
    pub pressure: f64,
}

#[derive(Debug, Deserialize)]
struct Payload {
    #[serde(rename = "hPa_0")]
    pressure: f64,
}

/// Extracts the current pressure from an inbound JSON payload.
pub fn decode_pressure(payload: &[u8]) -> Result<f64, anyhow::Error> {
    let payload: Payload = serde_json::from_slice(payload)?;
    if !payload.pressure.is_finite() {
        return Err(anyhow::anyhow!(
            "{PRESSURE_SERIES} is not finite: {}",
            payload.pressure
        ));
    }
    Ok(payload.pressure)
}
