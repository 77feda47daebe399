//! Sensor kinds reported by plant equipment.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of measurement carried by a reading.
///
/// The set is closed: anything else is rejected at parse time rather than
/// carried through as an opaque string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    /// Degrees Celsius.
    Temperature,
    /// PSI.
    Pressure,
    /// mm/s RMS.
    Vibration,
    /// Litres per minute.
    FlowRate,
    Rpm,
    Voltage,
    Current,
    /// Relative humidity, percent.
    Humidity,
}

impl SensorType {
    /// Every sensor type, in declaration order.
    pub const ALL: [SensorType; 8] = [
        SensorType::Temperature,
        SensorType::Pressure,
        SensorType::Vibration,
        SensorType::FlowRate,
        SensorType::Rpm,
        SensorType::Voltage,
        SensorType::Current,
        SensorType::Humidity,
    ];

    /// Wire name used in storage keys and log fields.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SensorType::Temperature => "temperature",
            SensorType::Pressure => "pressure",
            SensorType::Vibration => "vibration",
            SensorType::FlowRate => "flow_rate",
            SensorType::Rpm => "rpm",
            SensorType::Voltage => "voltage",
            SensorType::Current => "current",
            SensorType::Humidity => "humidity",
        }
    }

    /// Conventional unit for the sensor, used when a reading omits one.
    pub const fn default_unit(&self) -> &'static str {
        match self {
            SensorType::Temperature => "celsius",
            SensorType::Pressure => "psi",
            SensorType::Vibration => "mm/s",
            SensorType::FlowRate => "l/min",
            SensorType::Rpm => "rpm",
            SensorType::Voltage => "V",
            SensorType::Current => "A",
            SensorType::Humidity => "%",
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "temperature" => Ok(SensorType::Temperature),
            "pressure" => Ok(SensorType::Pressure),
            "vibration" => Ok(SensorType::Vibration),
            "flow_rate" => Ok(SensorType::FlowRate),
            "rpm" => Ok(SensorType::Rpm),
            "voltage" => Ok(SensorType::Voltage),
            "current" => Ok(SensorType::Current),
            "humidity" => Ok(SensorType::Humidity),
            _ => Err(ParseError::UnknownSensorType(s.to_string())),
        }
    }
}
