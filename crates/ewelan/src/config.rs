//! Static device configuration.
//!
//! Devices are configured ahead of time by the operator: the engine only
//! synchronizes devices it has an entry for. Configuration deserializes from
//! either a list of entries (each carrying its own id) or an id-keyed table,
//! and can be loaded from a TOML file.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::debug;

/// Configuration for a single device.
///
/// The id is the only required field. The name is used for display and falls
/// back to the bracketed id when unset. The key is needed only for encrypted
/// devices (not DIY mode).
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    id: String,
    name: Option<String>,
    key: Option<String>,
}

impl DeviceConfig {
    /// An empty key counts as no key: operators leave the field blank for
    /// DIY-mode devices.
    pub fn new(id: impl Into<String>, name: Option<String>, key: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
            key: key.filter(|k| !k.is_empty()),
        }
    }

    /// The device id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The display name, or `"[id]"` when no name was configured.
    pub fn name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("[{}]", self.id),
        }
    }

    /// The encryption key, if one was configured.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}

/// A device entry as written in configuration. The id is optional here
/// because the id-keyed table form carries it in the key instead.
#[derive(Debug, Deserialize)]
struct RawDeviceConfig {
    id: Option<String>,
    name: Option<String>,
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDevicesConfig {
    List(Vec<RawDeviceConfig>),
    Map(HashMap<String, RawDeviceConfig>),
}

/// Configuration for all known devices, looked up by id.
#[derive(Debug, Clone, Default)]
pub struct DevicesConfig {
    devices: HashMap<String, DeviceConfig>,
}

impl DevicesConfig {
    /// Build from already-validated entries.
    pub fn from_devices(devices: impl IntoIterator<Item = DeviceConfig>) -> Self {
        Self {
            devices: devices
                .into_iter()
                .map(|device| (device.id.clone(), device))
                .collect(),
        }
    }

    /// Load from a TOML file with a `[devices]` table.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        let file: FileConfig = toml::from_str(&raw)?;
        debug!(
            "Loaded {} device(s) from {}",
            file.devices.num_devices(),
            path.display()
        );
        Ok(file.devices)
    }

    /// The configuration for the device with the given id, if any. An
    /// unknown id is not an error: unconfigured devices are simply ignored.
    pub fn device(&self, device_id: &str) -> Option<&DeviceConfig> {
        self.devices.get(device_id)
    }

    /// Number of configured devices.
    pub fn num_devices(&self) -> usize {
        self.devices.len()
    }

    fn from_raw(raw: RawDevicesConfig) -> Result<Self, ConfigError> {
        let devices = match raw {
            RawDevicesConfig::List(entries) => entries
                .into_iter()
                .map(|RawDeviceConfig { id, name, key }| {
                    let id = id.ok_or_else(|| {
                        ConfigError::MissingId(name.clone().unwrap_or_default())
                    })?;
                    Ok((id.clone(), DeviceConfig::new(id, name, key)))
                })
                .collect::<Result<_, ConfigError>>()?,
            // The table key wins over any inline id field.
            RawDevicesConfig::Map(entries) => entries
                .into_iter()
                .map(|(id, entry)| (id.clone(), DeviceConfig::new(id, entry.name, entry.key)))
                .collect(),
        };
        Ok(Self { devices })
    }
}

impl<'de> Deserialize<'de> for DevicesConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawDevicesConfig::deserialize(deserializer)?;
        Self::from_raw(raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    devices: DevicesConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Missing required device id in entry \"{0}\"")]
    MissingId(String),
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_name_falls_back_to_id() {
        let config = DeviceConfig::new("1234", None, None);
        assert_eq!(config.id(), "1234");
        assert_eq!(config.name(), "[1234]");

        let config = DeviceConfig::new("1234", Some("Device 1".to_string()), None);
        assert_eq!(config.name(), "Device 1");
    }

    #[test]
    fn test_empty_key_is_no_key() {
        let config = DeviceConfig::new("1234", None, Some(String::new()));
        assert!(config.key().is_none());

        let config = DeviceConfig::new("1234", None, Some("secret".to_string()));
        assert_eq!(config.key(), Some("secret"));
    }

    #[test]
    fn test_parse_list_form() {
        let json = serde_json::json!([
            { "id": "1234", "name": "Device 1" },
            { "id": "5678", "name": "Device 2", "key": "secret" },
        ]);

        let config: DevicesConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.num_devices(), 2);
        assert_eq!(config.device("1234").unwrap().name(), "Device 1");
        assert_eq!(config.device("5678").unwrap().key(), Some("secret"));
        assert!(config.device("9999").is_none());
    }

    #[test]
    fn test_parse_map_form_key_wins_over_inline_id() {
        let toml = r#"
            [1234]
            id = "ignored"
            name = "Device 1"

            [5678]
            key = "secret"
        "#;

        let config: DevicesConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.num_devices(), 2);
        assert_eq!(config.device("1234").unwrap().name(), "Device 1");
        assert!(config.device("ignored").is_none());
        assert_eq!(config.device("5678").unwrap().name(), "[5678]");
    }

    #[test]
    fn test_list_entry_without_id_is_an_error() {
        let json = serde_json::json!([{ "name": "Device 1" }]);
        assert!(serde_json::from_value::<DevicesConfig>(json).is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
                [devices.1234]
                name = "Device 1"

                [devices.5678]
                name = "Device 2"
                key = "abcdefgh-ijkl-mnop-qrst-uvwxyz012345"
            "#
        )
        .unwrap();

        let config = DevicesConfig::from_file(file.path()).unwrap();
        assert_eq!(config.num_devices(), 2);
        assert_eq!(config.device("1234").unwrap().name(), "Device 1");
        assert_eq!(
            config.device("5678").unwrap().key(),
            Some("abcdefgh-ijkl-mnop-qrst-uvwxyz012345")
        );
    }

    #[test]
    fn test_from_file_missing() {
        let result = DevicesConfig::from_file("/nonexistent/devices.toml");
        assert!(matches!(result, Err(ConfigError::FileRead(..))));
    }
}
