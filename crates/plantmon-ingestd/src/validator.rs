//! Reading validation
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-10: Information Input Validation - Every reading is checked before storage

use crate::directory::EquipmentDirectory;
use crate::error::{MalformedReason, ValidationError};
use crate::types::{RawReading, RawValue, Reading};
use chrono::{DateTime, NaiveDateTime, Utc};
use plantmon_types::SensorType;

/// Naive timestamps carry no offset and are read as UTC.
const NAIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Check a raw reading. Negative values are legal measurements.
pub fn validate(raw: &RawReading) -> Result<Reading, ValidationError> {
    let equipment_id = raw.equipment_id.trim();
    if equipment_id.is_empty() {
        return Err(malformed(MalformedReason::EmptyEquipmentId));
    }

    let sensor_type: SensorType = raw
        .sensor_type
        .parse()
        .map_err(|_| malformed(MalformedReason::UnknownSensorType(raw.sensor_type.clone())))?;

    let value = match &raw.value {
        None => return Err(malformed(MalformedReason::MissingValue)),
        Some(RawValue::Number(v)) => *v,
        Some(RawValue::Text(text)) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| malformed(MalformedReason::NonNumericValue(format!("'{}'", text))))?,
        Some(RawValue::Other(other)) => {
            return Err(malformed(MalformedReason::NonNumericValue(other.to_string())))
        }
    };
    if !value.is_finite() {
        return Err(malformed(MalformedReason::NonFiniteValue));
    }

    let timestamp = match raw.timestamp.as_deref().map(str::trim) {
        None | Some("") => return Err(malformed(MalformedReason::MissingTimestamp)),
        Some(ts) => parse_timestamp(ts)
            .ok_or_else(|| malformed(MalformedReason::InvalidTimestamp(ts.to_string())))?,
    };

    let unit = raw
        .unit
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(str::to_string);

    Ok(Reading {
        equipment_id: equipment_id.to_string(),
        sensor_type,
        value,
        unit,
        timestamp,
    })
}

/// Like [`validate`], then require the equipment to be registered.
///
/// Structural problems win over an unknown id.
pub fn validate_known(
    raw: &RawReading,
    directory: &dyn EquipmentDirectory,
) -> Result<Reading, ValidationError> {
    let reading = validate(raw)?;
    if !directory.equipment_exists(&reading.equipment_id) {
        return Err(ValidationError::UnknownEquipment(reading.equipment_id));
    }
    Ok(reading)
}

fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(ts, NAIVE_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

fn malformed(reason: MalformedReason) -> ValidationError {
    ValidationError::MalformedReading(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use chrono::TimeZone;

    fn raw(value: f64) -> RawReading {
        RawReading::new("PUMP-001", "temperature", value, "2024-01-15T10:30:00Z")
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        let reading = validate(&raw(72.5).with_unit("celsius")).unwrap();
        assert_eq!(reading.equipment_id, "PUMP-001");
        assert_eq!(reading.sensor_type, SensorType::Temperature);
        assert_eq!(reading.value, 72.5);
        assert_eq!(reading.unit.as_deref(), Some("celsius"));
        assert_eq!(
            reading.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_validate_accepts_negative_values() {
        let reading = validate(&raw(-40.0)).unwrap();
        assert_eq!(reading.value, -40.0);
    }

    #[test]
    fn test_validate_rejects_empty_equipment() {
        let mut r = raw(1.0);
        r.equipment_id = "   ".into();
        assert_eq!(
            validate(&r),
            Err(ValidationError::MalformedReading(
                MalformedReason::EmptyEquipmentId
            ))
        );
    }

    #[test]
    fn test_validate_rejects_unknown_sensor() {
        let mut r = raw(1.0);
        r.sensor_type = "radiation".into();
        assert!(matches!(
            validate(&r),
            Err(ValidationError::MalformedReading(
                MalformedReason::UnknownSensorType(ref s)
            )) if s == "radiation"
        ));
    }

    #[test]
    fn test_validate_rejects_non_finite() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert_eq!(
                validate(&raw(value)),
                Err(ValidationError::MalformedReading(
                    MalformedReason::NonFiniteValue
                ))
            );
        }
    }

    #[test]
    fn test_validate_rejects_missing_value() {
        let mut r = raw(1.0);
        r.value = None;
        assert_eq!(
            validate(&r),
            Err(ValidationError::MalformedReading(MalformedReason::MissingValue))
        );
    }

    #[test]
    fn test_validate_value_text() {
        let mut r = raw(1.0);
        r.value = Some(RawValue::Text(" 72.5 ".into()));
        assert_eq!(validate(&r).unwrap().value, 72.5);

        r.value = Some(RawValue::Text("abc".into()));
        assert_eq!(
            validate(&r),
            Err(ValidationError::MalformedReading(
                MalformedReason::NonNumericValue("'abc'".into())
            ))
        );

        // Parses, then fails the finite check
        r.value = Some(RawValue::Text("NaN".into()));
        assert_eq!(
            validate(&r),
            Err(ValidationError::MalformedReading(
                MalformedReason::NonFiniteValue
            ))
        );
    }

    #[test]
    fn test_validate_decoded_json_values() {
        let decode = |line: &str| serde_json::from_str::<RawReading>(line).unwrap();
        let base = r#""equipment_id":"PUMP-001","sensor_type":"temperature","timestamp":"2024-01-15T10:30:00Z""#;

        let integer = decode(&format!("{{{base},\"value\":50}}"));
        assert_eq!(validate(&integer).unwrap().value, 50.0);

        let missing = decode(&format!("{{{base}}}"));
        assert_eq!(
            validate(&missing),
            Err(ValidationError::MalformedReading(MalformedReason::MissingValue))
        );

        let null = decode(&format!("{{{base},\"value\":null}}"));
        assert_eq!(
            validate(&null),
            Err(ValidationError::MalformedReading(MalformedReason::MissingValue))
        );

        let boolean = decode(&format!("{{{base},\"value\":true}}"));
        assert_eq!(
            validate(&boolean),
            Err(ValidationError::MalformedReading(
                MalformedReason::NonNumericValue("true".into())
            ))
        );
    }

    #[test]
    fn test_validate_rejects_missing_timestamp() {
        let mut r = raw(1.0);
        r.timestamp = None;
        assert_eq!(
            validate(&r),
            Err(ValidationError::MalformedReading(
                MalformedReason::MissingTimestamp
            ))
        );
        r.timestamp = Some(String::new());
        assert!(validate(&r).is_err());
    }

    #[test]
    fn test_validate_rejects_garbage_timestamp() {
        let mut r = raw(1.0);
        r.timestamp = Some("yesterday".into());
        assert!(matches!(
            validate(&r),
            Err(ValidationError::MalformedReading(
                MalformedReason::InvalidTimestamp(_)
            ))
        ));
    }

    #[test]
    fn test_validate_naive_timestamp_is_utc() {
        let mut r = raw(1.0);
        r.timestamp = Some("2024-01-15T10:30:00.250".into());
        let reading = validate(&r).unwrap();
        assert_eq!(reading.timestamp.timestamp_millis() % 1000, 250);
    }

    #[test]
    fn test_validate_offset_timestamp_normalized() {
        let mut r = raw(1.0);
        r.timestamp = Some("2024-01-15T12:30:00+02:00".into());
        let reading = validate(&r).unwrap();
        assert_eq!(
            reading.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_validate_known_checks_directory() {
        let directory = StaticDirectory::new();
        directory.add_equipment("PUMP-001", Some("pump"));

        assert!(validate_known(&raw(1.0), &directory).is_ok());

        let mut other = raw(1.0);
        other.equipment_id = "PUMP-999".into();
        assert_eq!(
            validate_known(&other, &directory),
            Err(ValidationError::UnknownEquipment("PUMP-999".into()))
        );

        other.value = Some(RawValue::Number(f64::NAN));
        assert!(matches!(
            validate_known(&other, &directory),
            Err(ValidationError::MalformedReading(_))
        ));
    }
}
