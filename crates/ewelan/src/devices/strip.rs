use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::error::DeviceError;

/// Per-outlet state of a multi-relay strip.
///
/// Outlets are discovered incrementally as switch records arrive; the set
/// only grows within a process run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StripState {
    statuses: BTreeMap<u8, bool>,
}

impl StripState {
    /// Outlets reported so far, in index order.
    pub fn outlets(&self) -> impl Iterator<Item = u8> + '_ {
        self.statuses.keys().copied()
    }

    /// The status of an outlet, or `None` if it has never been reported.
    pub fn status(&self, outlet: u8) -> Option<bool> {
        self.statuses.get(&outlet).copied()
    }

    pub(crate) fn apply(&mut self, data: &Value) -> Result<(), DeviceError> {
        let switches = data
            .get("switches")
            .and_then(Value::as_array)
            .ok_or(DeviceError::UnsupportedShape("switches"))?;
        for entry in switches {
            let outlet = entry
                .get("outlet")
                .and_then(Value::as_u64)
                .filter(|outlet| *outlet <= u8::MAX as u64)
                .ok_or(DeviceError::UnsupportedShape("outlet"))?;
            let switch = entry
                .get("switch")
                .and_then(Value::as_str)
                .ok_or(DeviceError::UnsupportedShape("switch"))?;
            self.statuses.insert(outlet as u8, switch == "on");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outlets_accumulate() {
        let mut strip = StripState::default();
        strip
            .apply(&serde_json::json!({
                "switches": [
                    { "switch": "on", "outlet": 0 },
                    { "switch": "off", "outlet": 1 },
                ]
            }))
            .unwrap();
        assert_eq!(strip.outlets().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(strip.status(0), Some(true));
        assert_eq!(strip.status(1), Some(false));

        // A later record covering only outlet 3 must not drop the others.
        strip
            .apply(&serde_json::json!({
                "switches": [{ "switch": "on", "outlet": 3 }]
            }))
            .unwrap();
        assert_eq!(strip.outlets().collect::<Vec<_>>(), vec![0, 1, 3]);
        assert_eq!(strip.status(1), Some(false));
        assert_eq!(strip.status(3), Some(true));
    }

    #[test]
    fn test_unknown_outlet_has_no_status() {
        let strip = StripState::default();
        assert_eq!(strip.status(7), None);
    }

    #[test]
    fn test_missing_switches_is_unsupported() {
        let mut strip = StripState::default();
        let result = strip.apply(&serde_json::json!({ "switch": "on" }));
        assert_eq!(result, Err(DeviceError::UnsupportedShape("switches")));
    }
}
