use serde::Serialize;
use serde_json::Value;

use crate::error::DeviceError;

/// Electrical telemetry reported by power-metering plugs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PowerTelemetry {
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub power: Option<f64>,
}

impl PowerTelemetry {
    pub(crate) fn apply(&mut self, data: &Value) -> Result<(), DeviceError> {
        self.voltage = Some(coerce(data, "voltage")?);
        self.current = Some(coerce(data, "current")?);
        self.power = Some(coerce(data, "power")?);
        Ok(())
    }
}

/// Coerce a telemetry value across firmware generations: decimal strings
/// and floats pass through, integers are fixed-point hundredths, and any
/// other type reads as zero.
fn coerce(data: &Value, field: &'static str) -> Result<f64, DeviceError> {
    let value = data
        .get(field)
        .ok_or(DeviceError::UnsupportedShape(field))?;
    match value {
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| DeviceError::InvalidTelemetry(field)),
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.as_f64().unwrap_or(0.0) / 100.0),
        Value::Number(n) => Ok(n.as_f64().unwrap_or(0.0)),
        _ => Ok(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn telemetry(voltage: Value) -> Value {
        serde_json::json!({ "voltage": voltage, "current": "5.0", "power": "1100.0" })
    }

    #[test]
    fn test_string_value_parses_as_decimal() {
        let mut power = PowerTelemetry::default();
        power.apply(&telemetry(Value::from("220.0"))).unwrap();
        assert_eq!(power.voltage, Some(220.0));
        assert_eq!(power.current, Some(5.0));
        assert_eq!(power.power, Some(1100.0));
    }

    #[test]
    fn test_float_value_passes_through() {
        let mut power = PowerTelemetry::default();
        power.apply(&telemetry(Value::from(220.0))).unwrap();
        assert_eq!(power.voltage, Some(220.0));
    }

    #[test]
    fn test_integer_value_is_fixed_point_hundredths() {
        let mut power = PowerTelemetry::default();
        power.apply(&telemetry(Value::from(22000))).unwrap();
        assert_eq!(power.voltage, Some(220.0));
    }

    #[test]
    fn test_unsupported_type_reads_as_zero() {
        let mut power = PowerTelemetry::default();
        power.apply(&telemetry(Value::from(true))).unwrap();
        assert_eq!(power.voltage, Some(0.0));
    }

    #[test]
    fn test_non_numeric_string_is_an_error() {
        let mut power = PowerTelemetry::default();
        let result = power.apply(&telemetry(Value::from("mains")));
        assert_eq!(result, Err(DeviceError::InvalidTelemetry("voltage")));
    }

    #[test]
    fn test_missing_field_is_unsupported() {
        let mut power = PowerTelemetry::default();
        let result = power.apply(&serde_json::json!({ "voltage": "220.0" }));
        assert_eq!(result, Err(DeviceError::UnsupportedShape("current")));
    }
}
