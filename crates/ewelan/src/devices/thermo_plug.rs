use serde::Serialize;
use serde_json::Value;

use crate::error::DeviceError;

/// Operating mode in which a thermostat plug accepts manual switching.
const MODE_NORMAL: &str = "normal";

/// Sensor telemetry and operating mode of a thermostat plug.
///
/// The mode is "normal" for manual control; in the automatic temperature or
/// humidity modes the firmware drives the relay itself and rejects manual
/// switch commands.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ThermoState {
    pub sensor: Option<String>,
    pub mode: Option<String>,
    pub temperature: Option<f64>,
    pub humidity: Option<i64>,
}

impl ThermoState {
    /// Whether the plug currently accepts switch commands.
    pub fn accepts_commands(&self) -> bool {
        self.mode.as_deref() == Some(MODE_NORMAL)
    }

    pub(crate) fn apply(&mut self, data: &Value) -> Result<(), DeviceError> {
        let sensor = data
            .get("sensorType")
            .and_then(Value::as_str)
            .ok_or(DeviceError::UnsupportedShape("sensorType"))?;
        let mode = data
            .get("deviceType")
            .and_then(Value::as_str)
            .ok_or(DeviceError::UnsupportedShape("deviceType"))?;
        self.sensor = Some(sensor.to_string());
        self.mode = Some(mode.to_string());
        self.temperature = Some(as_float(data, "currentTemperature")?);
        self.humidity = Some(as_int(data, "currentHumidity")?);
        Ok(())
    }
}

/// Sensor values arrive as numbers or numeric strings depending on firmware.
fn as_float(data: &Value, field: &'static str) -> Result<f64, DeviceError> {
    let value = data
        .get(field)
        .ok_or(DeviceError::UnsupportedShape(field))?;
    match value {
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| DeviceError::InvalidTelemetry(field)),
        Value::Number(n) => Ok(n.as_f64().unwrap_or(0.0)),
        _ => Err(DeviceError::InvalidTelemetry(field)),
    }
}

fn as_int(data: &Value, field: &'static str) -> Result<i64, DeviceError> {
    let value = data
        .get(field)
        .ok_or(DeviceError::UnsupportedShape(field))?;
    match value {
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| DeviceError::InvalidTelemetry(field)),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or(DeviceError::InvalidTelemetry(field)),
        _ => Err(DeviceError::InvalidTelemetry(field)),
    }
}
