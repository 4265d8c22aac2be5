//! Error taxonomy for discovery processing and device updates.

use thiserror::Error;

/// Errors raised while resolving a single discovery notification.
///
/// Every variant is caught at the pipeline boundary and logged at a severity
/// matching operator relevance; none of them reach the event feed or stop
/// the engine.
#[derive(Debug, Error)]
pub enum BrowseError {
    /// The advertised service name is not an eWeLink device.
    #[error("Invalid device \"{0}\"")]
    InvalidRecord(String),

    /// The resolver returned nothing for the service.
    #[error("Could not find info for device \"{0}\"")]
    InfoUnavailable(String),

    /// The device is not in the static configuration. Expected and frequent
    /// on shared networks.
    #[error("Device \"{id}\" ({model}) is not configured")]
    NotConfigured { id: String, model: String },

    /// The device advertises encryption but no key is configured.
    #[error("Missing device key for encrypted device \"{id}\" ({model})")]
    MissingKey { id: String, model: String },

    /// The resolved record lacks a property the protocol requires.
    #[error("Service record for \"{name}\" is missing property \"{property}\"")]
    MissingProperty { name: String, property: &'static str },

    /// The payload failed to decrypt or parse.
    #[error("Malformed payload for device \"{id}\": {source}")]
    MalformedPayload {
        id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The payload parsed but the device rejected it on update.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Errors raised by a device when applying an update or a command.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceError {
    /// The payload lacks a field the device's state model requires.
    #[error("Missing \"{0}\" in device payload")]
    UnsupportedShape(&'static str),

    /// A telemetry field held a value that does not parse as a number.
    #[error("Non-numeric \"{0}\" in device payload")]
    InvalidTelemetry(&'static str),

    /// The requested outlet has never been reported by the device.
    #[error("Device doesn't have outlet {0}")]
    UnknownOutlet(u8),

    /// The device variant has no switch model for this command.
    #[error("Device does not support switch commands")]
    UnsupportedCommand,

    /// A record keyed under one id carried a different id.
    #[error("Update carried mismatched device id \"{0}\"")]
    IdMismatch(String),
}
