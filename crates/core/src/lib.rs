//! dualsense-bridge-core: DualSense report codec, sensor fusion, binding
//! mapper, and device session.
//!
//! This crate turns raw HID reports from a Sony DualSense into typed
//! controller state, estimates a spatial pose from the IMU, fires configured
//! actions on input transitions, and encodes light bar, player LED, adaptive
//! trigger and rumble output reports.

pub mod binding;
pub mod comm;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod mapper;
pub mod output;
pub mod profile;
pub mod report;
pub mod safety;
pub mod session;
pub mod spatial;
pub mod state;
pub mod template;
pub mod transport;

pub use binding::{Action, AxisId, Binding, InputChannel, TriggerKind};
pub use config::MappingConfig;
pub use device::{list_devices, ControllerModel, DeviceInfo};
pub use dispatch::{ActionExecutor, DispatchQueue, DispatchRequest, DrainPolicy};
pub use error::{Error, Result};
pub use output::{LightBar, OutputState, PlayerIndicator, Rumble, TriggerEffectConfig, TriggerEffectKind, TriggerSide};
pub use profile::Profile;
pub use report::TransportKind;
pub use session::{connect, SessionConfig, SessionEvent, SessionHandle, SessionState, SessionStats, Timestamped, WritePolicy};
pub use spatial::{SpatialConfig, SpatialMode, SpatialState};
pub use state::{ButtonId, ControllerState};

/// Sony USB Vendor ID.
pub const SONY_VID: u16 = 0x054C;

/// Known DualSense product IDs.
pub mod pids {
    /// DualSense (CFI-ZCT1).
    pub const DUALSENSE: u16 = 0x0CE6;
    /// DualSense Edge (CFI-ZCP1).
    pub const DUALSENSE_EDGE: u16 = 0x0DF2;
}
