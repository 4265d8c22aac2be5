use std::net::Ipv4Addr;

use serde_json::Value;

use super::device::DeviceState;
use super::plug::PlugState;
use super::power_plug::PowerTelemetry;
use super::strip::StripState;
use super::thermo_plug::ThermoState;

/// A normalized discovery record: resolved network location plus the
/// decrypted, parsed JSON payload.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub id: String,
    /// The TXT `type` property, e.g. "plug" or "strip".
    pub model: String,
    pub address: Ipv4Addr,
    pub port: u16,
    pub encrypt: bool,
    pub data: Value,
}

impl DeviceRecord {
    /// Base URL for the device's command endpoints.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }
}

const MODEL_PLUG: &str = "plug";
const MODEL_STRIP: &str = "strip";
const MODEL_TH_PLUG: &str = "th_plug";

/// Pick the state model for a record. This runs once per device id, on first
/// sight; the variant never changes afterwards.
///
/// Power-metering plugs are keyed on the telemetry fields rather than the
/// TXT type: firmware reports types like "enhanced_plug" for the same
/// payload shape.
pub(crate) fn classify(record: &DeviceRecord) -> DeviceState {
    let has_power_telemetry = ["voltage", "current", "power"]
        .iter()
        .all(|field| record.data.get(field).is_some());
    if has_power_telemetry {
        return DeviceState::PowerPlug {
            plug: PlugState::default(),
            power: PowerTelemetry::default(),
        };
    }

    match record.model.as_str() {
        MODEL_PLUG => DeviceState::Plug(PlugState::default()),
        MODEL_STRIP => DeviceState::Strip(StripState::default()),
        MODEL_TH_PLUG => DeviceState::ThermoPlug {
            plug: PlugState::default(),
            thermo: ThermoState::default(),
        },
        _ => DeviceState::Basic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(model: &str, data: Value) -> DeviceRecord {
        DeviceRecord {
            id: "1234".to_string(),
            model: model.to_string(),
            address: Ipv4Addr::new(1, 2, 3, 4),
            port: 8081,
            encrypt: false,
            data,
        }
    }

    #[test]
    fn test_url() {
        let record = record("plug", serde_json::json!({}));
        assert_eq!(record.url(), "http://1.2.3.4:8081");
    }

    #[test]
    fn test_classify_plug() {
        let state = classify(&record("plug", serde_json::json!({ "switch": "on" })));
        assert!(matches!(state, DeviceState::Plug(_)));
    }

    #[test]
    fn test_classify_strip() {
        let state = classify(&record("strip", serde_json::json!({ "switches": [] })));
        assert!(matches!(state, DeviceState::Strip(_)));
    }

    #[test]
    fn test_classify_th_plug() {
        let state = classify(&record("th_plug", serde_json::json!({ "switch": "on" })));
        assert!(matches!(state, DeviceState::ThermoPlug { .. }));
    }

    #[test]
    fn test_classify_power_plug_by_telemetry() {
        let data = serde_json::json!({
            "switch": "on",
            "voltage": 220.0,
            "current": 5.0,
            "power": 1100.0,
        });
        // The telemetry fields decide, whatever the TXT type says.
        assert!(matches!(
            classify(&record("plug", data.clone())),
            DeviceState::PowerPlug { .. }
        ));
        assert!(matches!(
            classify(&record("enhanced_plug", data)),
            DeviceState::PowerPlug { .. }
        ));
    }

    #[test]
    fn test_classify_unknown_model_is_basic() {
        let state = classify(&record("rf_bridge", serde_json::json!({})));
        assert!(matches!(state, DeviceState::Basic));
    }
}
