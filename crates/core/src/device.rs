//! Device model: controller identification and discovery.

use crate::error::{Error, Result};
use crate::report::TransportKind;
use crate::{pids, SONY_VID};
use serde::Serialize;
use tracing::{debug, info};

/// Supported Sony controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ControllerModel {
    DualSense,
    DualSenseEdge,
}

impl ControllerModel {
    /// Look up model from USB product ID.
    pub fn from_pid(pid: u16) -> Option<Self> {
        match pid {
            pids::DUALSENSE => Some(Self::DualSense),
            pids::DUALSENSE_EDGE => Some(Self::DualSenseEdge),
            _ => None,
        }
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DualSense => "Sony DualSense",
            Self::DualSenseEdge => "Sony DualSense Edge",
        }
    }

    /// USB Product ID.
    pub fn pid(&self) -> u16 {
        match self {
            Self::DualSense => pids::DUALSENSE,
            Self::DualSenseEdge => pids::DUALSENSE_EDGE,
        }
    }
}

impl std::fmt::Display for ControllerModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Information about a discovered controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub model: ControllerModel,
    pub vid: u16,
    pub pid: u16,
    pub path: String,
    pub serial: Option<String>,
    pub transport: TransportKind,
}

/// Discover all connected DualSense controllers.
///
/// Each HID node is reported once, in enumeration order.
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    debug!("Starting HID device enumeration");
    let api = hidapi::HidApi::new().map_err(|e| Error::Hid(e.to_string()))?;

    let mut devices: Vec<DeviceInfo> = Vec::new();
    for info in api.device_list() {
        if info.vendor_id() != SONY_VID {
            continue;
        }
        let Some(model) = ControllerModel::from_pid(info.product_id()) else {
            continue;
        };

        let path = info.path().to_string_lossy().into_owned();
        if devices.iter().any(|d| d.path == path) {
            continue;
        }

        let transport = TransportKind::from_interface_number(info.interface_number());
        info!(
            model = model.name(),
            vid = format_args!("0x{:04X}", info.vendor_id()),
            pid = format_args!("0x{:04X}", info.product_id()),
            %transport,
            path = %path,
            "Found controller"
        );
        devices.push(DeviceInfo {
            model,
            vid: info.vendor_id(),
            pid: info.product_id(),
            path,
            serial: info.serial_number().map(|s| s.to_string()),
            transport,
        });
    }

    debug!(count = devices.len(), "Device enumeration complete");
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_from_known_pid() {
        assert_eq!(ControllerModel::from_pid(0x0CE6), Some(ControllerModel::DualSense));
        assert_eq!(
            ControllerModel::from_pid(0x0DF2),
            Some(ControllerModel::DualSenseEdge)
        );
    }

    #[test]
    fn model_from_unknown_pid() {
        assert_eq!(ControllerModel::from_pid(0x05C4), None);
    }

    #[test]
    fn model_pid_roundtrip() {
        for model in [ControllerModel::DualSense, ControllerModel::DualSenseEdge] {
            assert_eq!(ControllerModel::from_pid(model.pid()), Some(model));
            assert!(!model.name().is_empty());
        }
    }
}
