//! HID transport abstraction for device communication.
//!
//! Provides a trait-based transport layer so that real HID devices and
//! mock devices share the same interface.

use crate::device::{list_devices, DeviceInfo};
use crate::error::{Error, Result};
use crate::report::TransportKind;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Abstraction over raw HID read/write on one open controller.
pub trait HidTransport: Send {
    /// Read one input report into `buf`, waiting at most `timeout`.
    ///
    /// Returns the number of bytes read; `0` means no report arrived in time.
    fn read_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Write one output report.
    fn write(&self, data: &[u8]) -> Result<usize>;

    /// Framing used by this handle.
    fn kind(&self) -> TransportKind;
}

/// Opens transports; called again on every reconnect attempt.
pub trait Connector: Send {
    fn connect(&self) -> Result<Box<dyn HidTransport>>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// hidapi-backed transport.
pub struct HidApiTransport {
    device: hidapi::HidDevice,
    kind: TransportKind,
}

impl HidApiTransport {
    pub fn open(info: &DeviceInfo) -> Result<Self> {
        let api = hidapi::HidApi::new().map_err(|e| Error::Hid(e.to_string()))?;
        let path = std::ffi::CString::new(info.path.clone())
            .map_err(|e| Error::Hid(format!("invalid device path: {e}")))?;
        let device = api.open_path(&path).map_err(map_open_error)?;
        info!(
            model = info.model.name(),
            transport = %info.transport,
            path = %info.path,
            "Opened controller"
        );
        Ok(Self {
            device,
            kind: info.transport,
        })
    }
}

fn map_open_error(e: hidapi::HidError) -> Error {
    let msg = e.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("permission") || lower.contains("access denied") {
        Error::PermissionDenied(msg)
    } else {
        Error::Hid(msg)
    }
}

impl HidTransport for HidApiTransport {
    fn read_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let millis = timeout.as_millis().min(i32::MAX as u128) as i32;
        let n = self
            .device
            .read_timeout(buf, millis)
            .map_err(|e| Error::Hid(e.to_string()))?;
        if n > 0 {
            trace!(len = n, report_hex = format_args!("{:02X?}", &buf[..n]), "HID RX");
        }
        Ok(n)
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        trace!(report_hex = format_args!("{:02X?}", data), "HID TX");
        self.device.write(data).map_err(|e| Error::Hid(e.to_string()))
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }
}

/// Connects to the N-th enumerated controller, then sticks to its path.
pub struct DeviceConnector {
    index: usize,
    path: std::sync::Mutex<Option<String>>,
}

impl DeviceConnector {
    pub fn by_index(index: usize) -> Self {
        Self {
            index,
            path: std::sync::Mutex::new(None),
        }
    }

    fn select(&self, devices: &[DeviceInfo]) -> Option<DeviceInfo> {
        let mut path = self.path.lock().unwrap_or_else(|p| p.into_inner());
        let found = match path.as_deref() {
            Some(known) => devices
                .iter()
                .find(|d| d.path == known)
                .or_else(|| devices.get(self.index)),
            None => devices.get(self.index),
        }
        .cloned();
        if let Some(info) = &found {
            *path = Some(info.path.clone());
        }
        found
    }
}

impl Connector for DeviceConnector {
    fn connect(&self) -> Result<Box<dyn HidTransport>> {
        let devices = list_devices()?;
        let info = self.select(&devices).ok_or_else(|| {
            Error::DeviceNotFound(format!(
                "no controller at index {} ({} found)",
                self.index,
                devices.len()
            ))
        })?;
        debug!(path = %info.path, "Connecting");
        Ok(Box::new(HidApiTransport::open(&info)?))
    }

    fn describe(&self) -> String {
        format!("controller #{}", self.index)
    }
}


#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;

    #[test]
    fn mock_reads_queued_reports_in_order() {
        let dev = MockDevice::new(TransportKind::Usb);
        dev.push_report(vec![0x01, 0xAA]);
        dev.push_report(vec![0x01, 0xBB]);
        let t = dev.transport();

        let mut buf = [0u8; 8];
        assert_eq!(t.read_timeout(&mut buf, Duration::ZERO).unwrap(), 2);
        assert_eq!(buf[1], 0xAA);
        assert_eq!(t.read_timeout(&mut buf, Duration::ZERO).unwrap(), 2);
        assert_eq!(buf[1], 0xBB);
        assert_eq!(t.read_timeout(&mut buf, Duration::ZERO).unwrap(), 0);
    }

    #[test]
    fn mock_unplugged_fails_reads_writes_and_connects() {
        let dev = MockDevice::new(TransportKind::Bluetooth);
        let connector = MockConnector::new(&dev);
        let t = connector.connect().unwrap();
        assert_eq!(t.kind(), TransportKind::Bluetooth);

        dev.unplug();
        let mut buf = [0u8; 8];
        assert!(t.read_timeout(&mut buf, Duration::ZERO).is_err());
        assert!(t.write(&[0x31]).is_err());
        assert!(matches!(connector.connect(), Err(Error::DeviceNotFound(_))));

        dev.replug();
        assert!(connector.connect().is_ok());
    }

    #[test]
    fn mock_records_writes() {
        let dev = MockDevice::new(TransportKind::Usb);
        let t = dev.transport();
        t.write(&[0x02, 0x01]).unwrap();
        assert_eq!(dev.writes(), vec![vec![0x02, 0x01]]);
    }
}
