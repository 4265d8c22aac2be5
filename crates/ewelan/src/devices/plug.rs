use serde::Serialize;
use serde_json::Value;

use crate::error::DeviceError;

/// On/off state of a single-relay device.
///
/// Most firmware reports a scalar `switch` field; some generations report a
/// single-element `switches` array instead. In the latter case the outlet
/// index is remembered so that commands go back through the multi-switch
/// endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlugState {
    pub status: Option<bool>,
    pub outlet: Option<u8>,
}

impl PlugState {
    pub(crate) fn apply(&mut self, data: &Value) -> Result<(), DeviceError> {
        if let Some(switch) = data.get("switch").and_then(Value::as_str) {
            self.status = Some(switch == "on");
            return Ok(());
        }

        let switches = data
            .get("switches")
            .and_then(Value::as_array)
            .ok_or(DeviceError::UnsupportedShape("switch"))?;
        match switches.as_slice() {
            [only] => {
                let switch = only
                    .get("switch")
                    .and_then(Value::as_str)
                    .ok_or(DeviceError::UnsupportedShape("switch"))?;
                let outlet = only
                    .get("outlet")
                    .and_then(Value::as_u64)
                    .filter(|outlet| *outlet <= u8::MAX as u64)
                    .ok_or(DeviceError::UnsupportedShape("outlet"))?;
                self.status = Some(switch == "on");
                self.outlet = Some(outlet as u8);
                Ok(())
            }
            _ => Err(DeviceError::UnsupportedShape("switch")),
        }
    }
}
