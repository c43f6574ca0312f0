//! DualSense input report decoding.
//!
//! The controller uses two input report framings:
//! - USB: 64 bytes (report ID 0x01), payload starts at byte 1
//! - Bluetooth: 78 bytes (report ID 0x31), payload starts at byte 2 and the
//!   frame ends with a little-endian CRC32 seeded with 0xA1
//!
//! Protocol reference: Linux hid-playstation (GPLv2, protocol knowledge only).

use crate::error::{Error, Result};
use crate::state::{Battery, Buttons, ControllerState, Stick, TouchPoint, Touchpad, Triggers, Vec3};
use crc::{Crc, CRC_32_ISO_HDLC};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// USB input report ID.
pub const USB_INPUT_REPORT_ID: u8 = 0x01;
/// USB input report length (including report ID).
pub const USB_INPUT_REPORT_LEN: usize = 64;
/// Bluetooth input report ID.
pub const BT_INPUT_REPORT_ID: u8 = 0x31;
/// Bluetooth input report length (including report ID and CRC).
pub const BT_INPUT_REPORT_LEN: usize = 78;

/// Transport tag prepended to the CRC of Bluetooth input frames.
pub const BT_INPUT_CRC_SEED: u8 = 0xA1;
/// Transport tag prepended to the CRC of Bluetooth output frames.
pub const BT_OUTPUT_CRC_SEED: u8 = 0xA2;
/// Trailing CRC length on Bluetooth frames.
pub const BT_CRC_LEN: usize = 4;

/// Payload offsets, relative to the first byte after the framing header.
mod offsets {
    pub const LEFT_STICK_X: usize = 0;
    pub const LEFT_STICK_Y: usize = 1;
    pub const RIGHT_STICK_X: usize = 2;
    pub const RIGHT_STICK_Y: usize = 3;
    pub const L2: usize = 4;
    pub const R2: usize = 5;
    pub const SEQUENCE: usize = 6;
    pub const BUTTONS_0: usize = 7;
    pub const BUTTONS_1: usize = 8;
    pub const BUTTONS_2: usize = 9;
    pub const GYRO: usize = 15;
    pub const ACCEL: usize = 21;
    pub const SENSOR_TIMESTAMP: usize = 27;
    pub const TOUCH_0: usize = 32;
    pub const TOUCH_1: usize = 36;
    pub const BATTERY: usize = 52;
}

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC32 of a Bluetooth frame body, seeded with the transport tag byte.
pub fn bt_crc32(seed: u8, body: &[u8]) -> u32 {
    let mut digest = CRC32.digest();
    digest.update(&[seed]);
    digest.update(body);
    digest.finalize()
}

/// How the controller is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Usb,
    Bluetooth,
}

impl TransportKind {
    /// hidapi reports interface -1 for Bluetooth HID nodes.
    pub fn from_interface_number(interface: i32) -> Self {
        if interface == -1 {
            Self::Bluetooth
        } else {
            Self::Usb
        }
    }

    /// Expected input report (id, length) for this transport.
    pub fn input_layout(&self) -> (u8, usize) {
        match self {
            Self::Usb => (USB_INPUT_REPORT_ID, USB_INPUT_REPORT_LEN),
            Self::Bluetooth => (BT_INPUT_REPORT_ID, BT_INPUT_REPORT_LEN),
        }
    }

    fn payload_offset(&self) -> usize {
        match self {
            Self::Usb => 1,
            Self::Bluetooth => 2,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Usb => write!(f, "USB"),
            Self::Bluetooth => write!(f, "Bluetooth"),
        }
    }
}

/// Raw-to-physical conversion factors for the inertial sensors.
///
/// Defaults follow the controller's nominal resolution; per-unit calibration
/// can be supplied through configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImuScale {
    /// Raw gyro counts per degree/second.
    pub gyro_lsb_per_deg_s: f32,
    /// Raw accelerometer counts per g.
    pub accel_lsb_per_g: f32,
}

impl Default for ImuScale {
    fn default() -> Self {
        Self {
            gyro_lsb_per_deg_s: 1024.0,
            accel_lsb_per_g: 8192.0,
        }
    }
}

impl ImuScale {
    pub fn gyro_rad_per_sec(&self, raw: i16) -> f32 {
        (raw as f32 / self.gyro_lsb_per_deg_s).to_radians()
    }

    pub fn accel_g(&self, raw: i16) -> f32 {
        raw as f32 / self.accel_lsb_per_g
    }
}

/// Result of validating the Bluetooth CRC on an input frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumStatus {
    /// USB frames carry no checksum.
    NotApplicable,
    Valid,
    /// The frame was still decoded; callers should surface a warning.
    Mismatch { expected: u32, actual: u32 },
}

/// A decoded input report plus its checksum verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedReport {
    pub state: ControllerState,
    pub checksum: ChecksumStatus,
}

impl DecodedReport {
    /// The checksum warning as an error value, if the CRC did not match.
    pub fn checksum_warning(&self) -> Option<Error> {
        match self.checksum {
            ChecksumStatus::Mismatch { expected, actual } => {
                Some(Error::ChecksumMismatch { expected, actual })
            }
            _ => None,
        }
    }
}

/// Decode a raw input report with the default IMU scale.
pub fn decode(raw: &[u8], transport: TransportKind) -> Result<DecodedReport> {
    decode_with_scale(raw, transport, &ImuScale::default())
}

/// Decode a raw input report into a [`ControllerState`].
///
/// Rejects frames whose length or report ID does not match the transport's
/// layout. On Bluetooth a CRC mismatch is reported through
/// [`DecodedReport::checksum`] but does not discard the frame.
pub fn decode_with_scale(
    raw: &[u8],
    transport: TransportKind,
    scale: &ImuScale,
) -> Result<DecodedReport> {
    let (expected_id, expected_len) = transport.input_layout();

    if raw.len() < expected_len {
        return Err(Error::MalformedReport(format!(
            "{transport} report too short: {} bytes (expected {expected_len})",
            raw.len()
        )));
    }
    if raw[0] != expected_id {
        return Err(Error::MalformedReport(format!(
            "unexpected {transport} report ID: 0x{:02X} (expected 0x{expected_id:02X})",
            raw[0]
        )));
    }

    let frame = &raw[..expected_len];
    let checksum = match transport {
        TransportKind::Usb => ChecksumStatus::NotApplicable,
        TransportKind::Bluetooth => verify_bt_crc(frame),
    };

    let d = &frame[transport.payload_offset()..];
    let state = parse_payload(d, scale);

    trace!(
        %transport,
        sequence = state.sequence,
        checksum = ?checksum,
        "input report decoded"
    );

    Ok(DecodedReport { state, checksum })
}

fn verify_bt_crc(frame: &[u8]) -> ChecksumStatus {
    let body_len = frame.len() - BT_CRC_LEN;
    let expected = bt_crc32(BT_INPUT_CRC_SEED, &frame[..body_len]);
    let actual = read_u32_le(frame, body_len);
    if expected == actual {
        ChecksumStatus::Valid
    } else {
        ChecksumStatus::Mismatch { expected, actual }
    }
}

fn parse_payload(d: &[u8], scale: &ImuScale) -> ControllerState {
    use offsets::*;

    let b0 = d[BUTTONS_0];
    let b1 = d[BUTTONS_1];
    let b2 = d[BUTTONS_2];

    // D-pad is a hat switch: 0 = north, clockwise, 8 = released
    let dpad = b0 & 0x0F;
    let buttons = Buttons {
        dpad_up: matches!(dpad, 0 | 1 | 7),
        dpad_right: matches!(dpad, 1..=3),
        dpad_down: matches!(dpad, 3..=5),
        dpad_left: matches!(dpad, 5..=7),

        square: b0 & 0x10 != 0,
        cross: b0 & 0x20 != 0,
        circle: b0 & 0x40 != 0,
        triangle: b0 & 0x80 != 0,

        l1: b1 & 0x01 != 0,
        r1: b1 & 0x02 != 0,
        l2_button: b1 & 0x04 != 0,
        r2_button: b1 & 0x08 != 0,
        create: b1 & 0x10 != 0,
        options: b1 & 0x20 != 0,
        l3: b1 & 0x40 != 0,
        r3: b1 & 0x80 != 0,

        ps: b2 & 0x01 != 0,
        touchpad: b2 & 0x02 != 0,
        mute: b2 & 0x04 != 0,
    };

    let gyro = Vec3::new(
        scale.gyro_rad_per_sec(read_i16_le(d, GYRO)),
        scale.gyro_rad_per_sec(read_i16_le(d, GYRO + 2)),
        scale.gyro_rad_per_sec(read_i16_le(d, GYRO + 4)),
    );
    let accel = Vec3::new(
        scale.accel_g(read_i16_le(d, ACCEL)),
        scale.accel_g(read_i16_le(d, ACCEL + 2)),
        scale.accel_g(read_i16_le(d, ACCEL + 4)),
    );

    let battery_byte = d[BATTERY];

    ControllerState {
        buttons,
        left_stick: Stick {
            x: d[LEFT_STICK_X],
            y: d[LEFT_STICK_Y],
        },
        right_stick: Stick {
            x: d[RIGHT_STICK_X],
            y: d[RIGHT_STICK_Y],
        },
        triggers: Triggers { l2: d[L2], r2: d[R2] },
        touchpad: Touchpad {
            points: [
                parse_touch_point(&d[TOUCH_0..TOUCH_0 + 4]),
                parse_touch_point(&d[TOUCH_1..TOUCH_1 + 4]),
            ],
        },
        gyro,
        accel,
        battery: Battery {
            level: battery_byte & 0x0F,
            charging: battery_byte & 0x10 != 0,
            full: battery_byte & 0x20 != 0,
        },
        sequence: d[SEQUENCE],
        sensor_timestamp: read_u32_le(d, SENSOR_TIMESTAMP),
    }
}

/// Byte 0: bit 7 set = no contact, bits 0-6 = track ID.
/// Bytes 1-3: 12-bit X then 12-bit Y, little-endian nibble packing.
fn parse_touch_point(data: &[u8]) -> TouchPoint {
    TouchPoint {
        active: data[0] & 0x80 == 0,
        id: data[0] & 0x7F,
        x: ((data[2] & 0x0F) as u16) << 8 | data[1] as u16,
        y: (data[3] as u16) << 4 | ((data[2] & 0xF0) >> 4) as u16,
    }
}

fn read_i16_le(data: &[u8], at: usize) -> i16 {
    i16::from_le_bytes([data[at], data[at + 1]])
}

fn read_u32_le(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}


#[cfg(test)]
mod tests {
    use super::frames::*;
    use super::*;

    #[test]
    fn decode_usb_cross_and_left_stick() {
        let raw = usb_frame(&payload_with(true, (200, 128)));
        let decoded = decode(&raw, TransportKind::Usb).unwrap();
        assert!(decoded.state.buttons.cross);
        assert!(!decoded.state.buttons.circle);
        assert_eq!(decoded.state.left_stick, Stick { x: 200, y: 128 });
        assert_eq!(decoded.checksum, ChecksumStatus::NotApplicable);
    }

    #[test]
    fn decode_is_deterministic() {
        let raw = usb_frame(&payload_with(true, (12, 240)));
        let a = decode(&raw, TransportKind::Usb).unwrap();
        let b = decode(&raw, TransportKind::Usb).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn decode_rejects_short_report() {
        let raw = [USB_INPUT_REPORT_ID, 0x80, 0x80];
        assert!(matches!(
            decode(&raw, TransportKind::Usb),
            Err(Error::MalformedReport(_))
        ));
    }

    #[test]
    fn decode_rejects_wrong_report_id() {
        let mut raw = usb_frame(&idle_payload());
        raw[0] = 0x05;
        assert!(matches!(
            decode(&raw, TransportKind::Usb),
            Err(Error::MalformedReport(_))
        ));
    }

    #[test]
    fn decode_rejects_usb_frame_on_bluetooth() {
        let raw = usb_frame(&idle_payload());
        assert!(decode(&raw, TransportKind::Bluetooth).is_err());
    }

    #[test]
    fn decode_bluetooth_valid_crc() {
        let raw = bt_frame(&payload_with(true, (200, 128)));
        let decoded = decode(&raw, TransportKind::Bluetooth).unwrap();
        assert_eq!(decoded.checksum, ChecksumStatus::Valid);
        assert!(decoded.checksum_warning().is_none());
        assert!(decoded.state.buttons.cross);
        assert_eq!(decoded.state.left_stick, Stick { x: 200, y: 128 });
    }

    #[test]
    fn decode_bluetooth_corrupted_crc_still_decodes() {
        let mut raw = bt_frame(&payload_with(true, (200, 128)));
        raw[BT_INPUT_REPORT_LEN - 1] ^= 0xFF;
        let decoded = decode(&raw, TransportKind::Bluetooth).unwrap();
        assert!(matches!(decoded.checksum, ChecksumStatus::Mismatch { .. }));
        assert!(matches!(
            decoded.checksum_warning(),
            Some(Error::ChecksumMismatch { .. })
        ));
        assert!(decoded.state.buttons.cross);
        assert_eq!(decoded.state.left_stick.x, 200);
    }

    #[test]
    fn decode_dpad_hat_diagonals() {
        let mut d = idle_payload();
        d[offsets::BUTTONS_0] = 0x01; // north-east
        let s = decode(&usb_frame(&d), TransportKind::Usb).unwrap().state;
        assert!(s.buttons.dpad_up && s.buttons.dpad_right);
        assert!(!s.buttons.dpad_down && !s.buttons.dpad_left);

        d[offsets::BUTTONS_0] = 0x08; // released
        let s = decode(&usb_frame(&d), TransportKind::Usb).unwrap().state;
        assert!(!s.buttons.dpad_up && !s.buttons.dpad_right);
        assert!(!s.buttons.dpad_down && !s.buttons.dpad_left);
    }

    #[test]
    fn decode_shoulder_and_system_bits() {
        let mut d = idle_payload();
        d[offsets::BUTTONS_1] = 0x01 | 0x20 | 0x80; // L1, options, R3
        d[offsets::BUTTONS_2] = 0x01 | 0x04; // PS, mute
        let s = decode(&usb_frame(&d), TransportKind::Usb).unwrap().state;
        assert!(s.buttons.l1 && s.buttons.options && s.buttons.r3);
        assert!(!s.buttons.r1 && !s.buttons.create);
        assert!(s.buttons.ps && s.buttons.mute && !s.buttons.touchpad);
    }

    #[test]
    fn decode_touch_points() {
        let mut d = idle_payload();
        // Finger 0: id 5, x = 0x3A7, y = 0x1F2
        d[offsets::TOUCH_0..offsets::TOUCH_0 + 4].copy_from_slice(&[0x05, 0xA7, 0x23, 0x1F]);
        let s = decode(&usb_frame(&d), TransportKind::Usb).unwrap().state;
        let p = s.touchpad.points[0];
        assert!(p.active);
        assert_eq!(p.id, 5);
        assert_eq!(p.x, 0x3A7);
        assert_eq!(p.y, 0x1F2);
        assert!(!s.touchpad.points[1].active);
    }

    #[test]
    fn decode_battery_nibble_and_flags() {
        let mut d = idle_payload();
        d[offsets::BATTERY] = 0x17;
        let s = decode(&usb_frame(&d), TransportKind::Usb).unwrap().state;
        assert_eq!(s.battery.level, 7);
        assert!(s.battery.charging);
        assert!(!s.battery.full);
    }

    #[test]
    fn decode_scales_imu() {
        let mut d = idle_payload();
        // 1024 counts = 1 deg/s
        set_gyro(&mut d, [1024, -2048, 0]);
        set_accel(&mut d, [0, -4096, 8192]);
        let s = decode(&usb_frame(&d), TransportKind::Usb).unwrap().state;
        assert!((s.gyro.x - 1f32.to_radians()).abs() < 1e-6);
        assert!((s.gyro.y + 2f32.to_radians()).abs() < 1e-6);
        assert!((s.accel.y + 0.5).abs() < 1e-6);
        assert!((s.accel.z - 1.0).abs() < 1e-6);
    }

    #[test]
    fn transport_from_interface_number() {
        assert_eq!(
            TransportKind::from_interface_number(-1),
            TransportKind::Bluetooth
        );
        assert_eq!(TransportKind::from_interface_number(3), TransportKind::Usb);
    }
}
