use std::time::Duration;
use std::time::SystemTime;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use tracing::warn;

use super::command;
use super::command::Dispatcher;
use super::factory;
use super::factory::DeviceRecord;
use super::plug::PlugState;
use super::power_plug::PowerTelemetry;
use super::strip::StripState;
use super::thermo_plug::ThermoState;
use crate::config::DeviceConfig;
use crate::error::DeviceError;

/// Identity fields shared by every device variant.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceIdentity {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub key: Option<String>,
    /// Whether the device encrypts its advertisement (not DIY mode).
    /// Reflects the most recent discovery record.
    pub encrypt: bool,
    /// Base URL for the command endpoints.
    pub url: String,
    pub last_update: SystemTime,
}

/// Variant-specific device state.
///
/// A closed set: the variant is picked once, on the first record for an id,
/// and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DeviceState {
    /// Recognized but unmodeled hardware: identity and discovery updates
    /// only, no switch model and no commands.
    Basic,
    Plug(PlugState),
    Strip(StripState),
    PowerPlug {
        plug: PlugState,
        power: PowerTelemetry,
    },
    ThermoPlug {
        plug: PlugState,
        thermo: ThermoState,
    },
}

impl DeviceState {
    /// The single-relay state, for every plug-shaped variant.
    pub fn plug(&self) -> Option<&PlugState> {
        match self {
            DeviceState::Plug(plug)
            | DeviceState::PowerPlug { plug, .. }
            | DeviceState::ThermoPlug { plug, .. } => Some(plug),
            _ => None,
        }
    }

    /// Electrical telemetry, for power-metering plugs.
    pub fn power(&self) -> Option<&PowerTelemetry> {
        match self {
            DeviceState::PowerPlug { power, .. } => Some(power),
            _ => None,
        }
    }

    /// Per-outlet state, for strips.
    pub fn strip(&self) -> Option<&StripState> {
        match self {
            DeviceState::Strip(strip) => Some(strip),
            _ => None,
        }
    }

    /// Sensor state, for thermostat plugs.
    pub fn thermo(&self) -> Option<&ThermoState> {
        match self {
            DeviceState::ThermoPlug { thermo, .. } => Some(thermo),
            _ => None,
        }
    }

    fn apply(&mut self, data: &Value) -> Result<(), DeviceError> {
        match self {
            DeviceState::Basic => Ok(()),
            DeviceState::Plug(plug) => plug.apply(data),
            DeviceState::Strip(strip) => strip.apply(data),
            DeviceState::PowerPlug { plug, power } => {
                plug.apply(data)?;
                power.apply(data)
            }
            DeviceState::ThermoPlug { plug, thermo } => {
                plug.apply(data)?;
                thermo.apply(data)
            }
        }
    }
}

/// Value-type copy of a device at a point in time, published on the event
/// feed. Later updates to the live device never alter a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSnapshot {
    pub identity: DeviceIdentity,
    pub state: DeviceState,
}

/// One physical device.
///
/// Created once per id, on the first successfully-resolved record, and owned
/// by the registry for the rest of the process lifetime.
pub struct Device {
    identity: DeviceIdentity,
    state: DeviceState,
    dispatcher: Dispatcher,
}

impl Device {
    /// Build a device from its first record. The state variant picked here
    /// is permanent.
    pub(crate) fn create(
        record: &DeviceRecord,
        config: &DeviceConfig,
        dispatcher: Dispatcher,
    ) -> Result<Self, DeviceError> {
        let mut device = Self {
            identity: DeviceIdentity {
                id: config.id().to_string(),
                name: config.name(),
                key: config.key().map(str::to_string),
                encrypt: record.encrypt,
                url: record.url(),
                last_update: SystemTime::UNIX_EPOCH,
            },
            state: factory::classify(record),
            dispatcher,
        };
        device.apply(record)?;
        Ok(device)
    }

    /// Apply a discovery record to the device.
    pub fn update(&mut self, record: &DeviceRecord) -> Result<(), DeviceError> {
        debug!("Updating {} with {}", self.identity.id, record.data);
        if self.identity.id != record.id {
            return Err(DeviceError::IdMismatch(record.id.clone()));
        }
        self.apply(record)
    }

    fn apply(&mut self, record: &DeviceRecord) -> Result<(), DeviceError> {
        self.identity.encrypt = record.encrypt;
        self.identity.url = record.url();
        self.touch();
        self.state.apply(&record.data)
    }

    fn touch(&mut self) {
        let now = SystemTime::now();
        // The system clock can tie on consecutive updates (or step
        // backwards); keep last_update strictly increasing regardless.
        self.identity.last_update = if now > self.identity.last_update {
            now
        } else {
            self.identity.last_update + Duration::from_micros(1)
        };
    }

    pub fn id(&self) -> &str {
        &self.identity.id
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn url(&self) -> &str {
        &self.identity.url
    }

    pub fn encrypt(&self) -> bool {
        self.identity.encrypt
    }

    pub fn last_update(&self) -> SystemTime {
        self.identity.last_update
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Copy the current state for publication.
    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            identity: self.identity.clone(),
            state: self.state.clone(),
        }
    }

    /// Turn the relay on.
    pub fn on(&self) -> Result<(), DeviceError> {
        self.plug_command("turn on", |_| true)
    }

    /// Turn the relay off.
    pub fn off(&self) -> Result<(), DeviceError> {
        self.plug_command("turn off", |_| false)
    }

    /// Invert the last known status.
    pub fn toggle(&self) -> Result<(), DeviceError> {
        self.plug_command("toggle", |plug| !matches!(plug.status, Some(true)))
    }

    /// Resend the last known status, to nudge a device that missed a
    /// command.
    pub fn refresh(&self) -> Result<(), DeviceError> {
        self.plug_command("refresh", |plug| matches!(plug.status, Some(true)))
    }

    /// Turn a strip outlet on.
    pub fn outlet_on(&self, outlet: u8) -> Result<(), DeviceError> {
        self.outlet_command("turn on", outlet, |_| true)
    }

    /// Turn a strip outlet off.
    pub fn outlet_off(&self, outlet: u8) -> Result<(), DeviceError> {
        self.outlet_command("turn off", outlet, |_| false)
    }

    /// Invert a strip outlet's last known status.
    pub fn outlet_toggle(&self, outlet: u8) -> Result<(), DeviceError> {
        self.outlet_command("toggle", outlet, |status| !status)
    }

    /// Resend a strip outlet's last known status.
    pub fn outlet_refresh(&self, outlet: u8) -> Result<(), DeviceError> {
        self.outlet_command("refresh", outlet, |status| status)
    }

    fn plug_command(
        &self,
        verb: &str,
        desired: impl FnOnce(&PlugState) -> bool,
    ) -> Result<(), DeviceError> {
        let plug = self.state.plug().ok_or(DeviceError::UnsupportedCommand)?;
        if let Some(thermo) = self.state.thermo() {
            if !thermo.accepts_commands() {
                warn!(
                    "Cannot {} {}: mode is {:?}",
                    verb, self.identity.id, thermo.mode
                );
                return Ok(());
            }
        }

        debug!("{} {}", verb, self.identity.id);
        let on = desired(plug);
        match plug.outlet {
            Some(outlet) => self.dispatcher.send(
                &self.identity,
                command::SWITCHES_PATH,
                command::switches_body(on, outlet),
            ),
            None => self.dispatcher.send(
                &self.identity,
                command::SWITCH_PATH,
                command::switch_body(on),
            ),
        }
        Ok(())
    }

    fn outlet_command(
        &self,
        verb: &str,
        outlet: u8,
        desired: impl FnOnce(bool) -> bool,
    ) -> Result<(), DeviceError> {
        let strip = self.state.strip().ok_or(DeviceError::UnsupportedCommand)?;
        let current = strip
            .status(outlet)
            .ok_or(DeviceError::UnknownOutlet(outlet))?;

        debug!("{} {} outlet {}", verb, self.identity.id, outlet);
        self.dispatcher.send(
            &self.identity,
            command::SWITCHES_PATH,
            command::switches_body(desired(current), outlet),
        );
        Ok(())
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("identity", &self.identity)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    use super::*;
    use crate::transport::MockTransport;

    fn plug_record(id: &str, data: Value) -> DeviceRecord {
        DeviceRecord {
            id: id.to_string(),
            model: "plug".to_string(),
            address: Ipv4Addr::new(1, 2, 3, 4),
            port: 8081,
            encrypt: false,
            data,
        }
    }

    fn plug(transport: &Arc<MockTransport>) -> Device {
        Device::create(
            &plug_record("1234", serde_json::json!({ "switch": "on" })),
            &DeviceConfig::new("1234", Some("Device 1".to_string()), None),
            Dispatcher::new(transport.clone()),
        )
        .unwrap()
    }

    fn body_of(payload: &str) -> Value {
        let envelope: Value = serde_json::from_str(payload).unwrap();
        serde_json::from_str(envelope["data"].as_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_create() {
        let transport = Arc::new(MockTransport::new());
        let device = plug(&transport);

        assert_eq!(device.id(), "1234");
        assert_eq!(device.name(), "Device 1");
        assert_eq!(device.url(), "http://1.2.3.4:8081");
        assert!(!device.encrypt());
        assert_eq!(device.state().plug().unwrap().status, Some(true));
    }

    #[tokio::test]
    async fn test_update_is_idempotent_and_advances_last_update() {
        let transport = Arc::new(MockTransport::new());
        let mut device = plug(&transport);
        let record = plug_record("1234", serde_json::json!({ "switch": "on" }));

        let first = device.last_update();
        device.update(&record).unwrap();
        let second = device.last_update();
        device.update(&record).unwrap();
        let third = device.last_update();

        assert_eq!(device.state().plug().unwrap().status, Some(true));
        assert!(second > first);
        assert!(third > second);
    }

    #[tokio::test]
    async fn test_update_rejects_mismatched_id() {
        let transport = Arc::new(MockTransport::new());
        let mut device = plug(&transport);

        let record = plug_record("9999", serde_json::json!({ "switch": "off" }));
        let result = device.update(&record);

        assert_eq!(result, Err(DeviceError::IdMismatch("9999".to_string())));
        // No mutation happened.
        assert_eq!(device.state().plug().unwrap().status, Some(true));
    }

    #[tokio::test]
    async fn test_encrypt_follows_latest_record() {
        let transport = Arc::new(MockTransport::new());
        let mut device = plug(&transport);
        assert!(!device.encrypt());

        let mut record = plug_record("1234", serde_json::json!({ "switch": "on" }));
        record.encrypt = true;
        device.update(&record).unwrap();
        assert!(device.encrypt());
    }

    #[tokio::test]
    async fn test_snapshot_is_independent_of_later_updates() {
        let transport = Arc::new(MockTransport::new());
        let mut device = plug(&transport);

        let snapshot = device.snapshot();
        device
            .update(&plug_record("1234", serde_json::json!({ "switch": "off" })))
            .unwrap();

        assert_eq!(snapshot.state.plug().unwrap().status, Some(true));
        assert_eq!(device.state().plug().unwrap().status, Some(false));
    }

    #[tokio::test]
    async fn test_toggle_inverts_known_status() {
        let transport = Arc::new(MockTransport::new());
        let device = plug(&transport);

        device.toggle().unwrap();
        device.dispatcher.drain().await;

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, "http://1.2.3.4:8081/zeroconf/switch");
        assert_eq!(body_of(&requests[0].1), serde_json::json!({ "switch": "off" }));
    }

    #[tokio::test]
    async fn test_refresh_resends_known_status() {
        let transport = Arc::new(MockTransport::new());
        let device = plug(&transport);

        device.refresh().unwrap();
        device.dispatcher.drain().await;

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(body_of(&requests[0].1), serde_json::json!({ "switch": "on" }));
    }

    #[tokio::test]
    async fn test_plug_with_outlet_uses_multi_switch_endpoint() {
        let transport = Arc::new(MockTransport::new());
        let device = Device::create(
            &plug_record(
                "1234",
                serde_json::json!({ "switches": [{ "switch": "off", "outlet": 2 }] }),
            ),
            &DeviceConfig::new("1234", None, None),
            Dispatcher::new(transport.clone()),
        )
        .unwrap();

        device.on().unwrap();
        device.dispatcher.drain().await;

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, "http://1.2.3.4:8081/zeroconf/switches");
        assert_eq!(
            body_of(&requests[0].1),
            serde_json::json!({ "switches": [{ "switch": "on", "outlet": 2 }] })
        );
    }

    #[tokio::test]
    async fn test_strip_outlet_commands() {
        let transport = Arc::new(MockTransport::new());
        let mut record = plug_record(
            "1234",
            serde_json::json!({ "switches": [
                { "switch": "on", "outlet": 0 },
                { "switch": "off", "outlet": 1 },
            ] }),
        );
        record.model = "strip".to_string();
        let device = Device::create(
            &record,
            &DeviceConfig::new("1234", None, None),
            Dispatcher::new(transport.clone()),
        )
        .unwrap();

        device.outlet_toggle(0).unwrap();
        device.dispatcher.drain().await;

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, "http://1.2.3.4:8081/zeroconf/switches");
        assert_eq!(
            body_of(&requests[0].1),
            serde_json::json!({ "switches": [{ "switch": "off", "outlet": 0 }] })
        );

        assert_eq!(
            device.outlet_on(7),
            Err(DeviceError::UnknownOutlet(7))
        );
        assert_eq!(device.on(), Err(DeviceError::UnsupportedCommand));
    }

    #[tokio::test]
    async fn test_thermo_plug_refuses_commands_outside_normal_mode() {
        let transport = Arc::new(MockTransport::new());
        let mut record = plug_record(
            "1234",
            serde_json::json!({
                "switch": "on",
                "sensorType": "AM2301",
                "deviceType": "temperature",
                "currentTemperature": 21.5,
                "currentHumidity": 40,
            }),
        );
        record.model = "th_plug".to_string();
        let device = Device::create(
            &record,
            &DeviceConfig::new("1234", None, None),
            Dispatcher::new(transport.clone()),
        )
        .unwrap();

        // Refused, but not an error: the warning is the only trace.
        device.on().unwrap();
        device.off().unwrap();
        device.toggle().unwrap();
        device.refresh().unwrap();
        device.dispatcher.drain().await;
        assert!(transport.requests().is_empty());

        let mut normal = record.clone();
        normal.data["deviceType"] = Value::from("normal");
        let mut device = device;
        device.update(&normal).unwrap();
        device.off().unwrap();
        device.dispatcher.drain().await;
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_basic_device_has_no_commands() {
        let transport = Arc::new(MockTransport::new());
        let mut record = plug_record("1234", serde_json::json!({}));
        record.model = "rf_bridge".to_string();
        let device = Device::create(
            &record,
            &DeviceConfig::new("1234", None, None),
            Dispatcher::new(transport.clone()),
        )
        .unwrap();

        assert_eq!(device.on(), Err(DeviceError::UnsupportedCommand));
        assert_eq!(device.outlet_on(0), Err(DeviceError::UnsupportedCommand));
        assert!(transport.requests().is_empty());
    }
}
