pub mod config;
pub mod crypto;
pub mod devices;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod transport;

pub use config::ConfigError;
pub use config::DeviceConfig;
pub use config::DevicesConfig;
pub use devices::Device;
pub use devices::DeviceSnapshot;
pub use devices::DeviceState;
pub use discovery::ServiceChange;
pub use discovery::ServiceDiscovery;
pub use discovery::ServiceNotification;
pub use engine::Browser;
pub use engine::Event;
pub use error::BrowseError;
pub use error::DeviceError;
pub use transport::CommandTransport;
pub use transport::HttpTransport;
