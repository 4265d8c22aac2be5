mod command;
mod device;
mod factory;
mod plug;
mod power_plug;
mod strip;
mod thermo_plug;

pub use command::Dispatcher;
pub use device::Device;
pub use device::DeviceIdentity;
pub use device::DeviceSnapshot;
pub use device::DeviceState;
pub use factory::DeviceRecord;
pub use plug::PlugState;
pub use power_plug::PowerTelemetry;
pub use strip::StripState;
pub use thermo_plug::ThermoState;
