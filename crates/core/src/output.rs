//! Output report encoding: light bar, player indicator, adaptive triggers, rumble.
//!
//! Every write is one consolidated report carrying the full [`OutputState`],
//! so a single report is enough to restore the controller after a reconnect.

use crate::error::Result;
use crate::report::{bt_crc32, TransportKind, BT_CRC_LEN, BT_OUTPUT_CRC_SEED};
use crate::safety;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// USB output report ID.
pub const USB_OUTPUT_REPORT_ID: u8 = 0x02;
/// USB output report length (including report ID).
pub const USB_OUTPUT_REPORT_LEN: usize = 48;
/// Bluetooth output report ID.
pub const BT_OUTPUT_REPORT_ID: u8 = 0x31;
/// Bluetooth output report length (including report ID and CRC).
pub const BT_OUTPUT_REPORT_LEN: usize = 78;
/// Bluetooth output tag byte following the sequence nibble.
const BT_OUTPUT_TAG: u8 = 0x10;

/// Length of the effect block each trigger occupies.
pub const TRIGGER_EFFECT_LEN: usize = 11;

/// Offsets inside the common block shared by both transports.
mod common {
    pub const LEN: usize = 47;

    pub const VALID_FLAG0: usize = 0;
    pub const VALID_FLAG1: usize = 1;
    pub const MOTOR_RIGHT: usize = 2;
    pub const MOTOR_LEFT: usize = 3;
    pub const RIGHT_TRIGGER: usize = 10;
    pub const LEFT_TRIGGER: usize = 21;
    pub const VALID_FLAG2: usize = 38;
    pub const LIGHTBAR_SETUP: usize = 41;
    pub const PLAYER_LEDS: usize = 43;
    pub const LIGHTBAR_RGB: usize = 44;

    pub const FLAG0_RUMBLE_EMULATION: u8 = 0x01;
    pub const FLAG0_RUMBLE_NOT_HAPTICS: u8 = 0x02;
    pub const FLAG0_RIGHT_TRIGGER: u8 = 0x04;
    pub const FLAG0_LEFT_TRIGGER: u8 = 0x08;

    pub const FLAG1_LIGHTBAR: u8 = 0x04;
    pub const FLAG1_PLAYER_LEDS: u8 = 0x10;

    pub const FLAG2_LIGHTBAR_SETUP: u8 = 0x02;
    pub const LIGHTBAR_SETUP_RELEASE: u8 = 0x02;
}

/// Which adaptive trigger an effect applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSide {
    Left,
    Right,
}

impl TriggerSide {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "left" | "l2" => Some(Self::Left),
            "right" | "r2" => Some(Self::Right),
            _ => None,
        }
    }
}

/// Adaptive trigger effect kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerEffectKind {
    #[default]
    Off,
    Continuous,
    Section,
    Vibration,
    Weapon,
    Bow,
}

impl TriggerEffectKind {
    /// Mode byte written at the start of the effect block.
    pub fn mode_byte(&self) -> u8 {
        match self {
            Self::Off => 0x05,
            Self::Continuous => 0x01,
            Self::Section => 0x02,
            Self::Vibration => 0x06,
            Self::Weapon => 0x25,
            Self::Bow => 0x22,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "off" | "none" => Some(Self::Off),
            "continuous" | "feedback" => Some(Self::Continuous),
            "section" => Some(Self::Section),
            "vibration" => Some(Self::Vibration),
            "weapon" => Some(Self::Weapon),
            "bow" => Some(Self::Bow),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Continuous => "continuous",
            Self::Section => "section",
            Self::Vibration => "vibration",
            Self::Weapon => "weapon",
            Self::Bow => "bow",
        }
    }
}

/// One trigger's effect and its parameters.
///
/// Parameters a kind does not use are ignored when encoding:
///
/// | kind       | start | end | force | frequency |
/// |------------|-------|-----|-------|-----------|
/// | off        |       |     |       |           |
/// | continuous |   x   |     |   x   |           |
/// | section    |   x   |  x  |   x   |           |
/// | vibration  |   x   |     |   x   |     x     |
/// | weapon     |   x   |  x  |   x   |           |
/// | bow        |   x   |  x  |   x   | x (snap)  |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerEffectConfig {
    pub kind: TriggerEffectKind,
    pub start: u8,
    pub end: u8,
    pub force: u8,
    pub frequency: u8,
}

impl TriggerEffectConfig {
    pub fn off() -> Self {
        Self::default()
    }

    pub fn continuous(start: u8, force: u8) -> Self {
        Self {
            kind: TriggerEffectKind::Continuous,
            start,
            force,
            ..Self::default()
        }
    }

    pub fn section(start: u8, end: u8, force: u8) -> Self {
        Self {
            kind: TriggerEffectKind::Section,
            start,
            end,
            force,
            ..Self::default()
        }
    }

    pub fn vibration(start: u8, frequency: u8, force: u8) -> Self {
        Self {
            kind: TriggerEffectKind::Vibration,
            start,
            force,
            frequency,
            ..Self::default()
        }
    }

    pub fn weapon(start: u8, end: u8, force: u8) -> Self {
        Self {
            kind: TriggerEffectKind::Weapon,
            start,
            end,
            force,
            ..Self::default()
        }
    }

    pub fn bow(start: u8, end: u8, force: u8, snap: u8) -> Self {
        Self {
            kind: TriggerEffectKind::Bow,
            start,
            end,
            force,
            frequency: snap,
        }
    }

    /// Encode the 11-byte effect block: mode byte, up to four parameters, zero fill.
    pub fn encode_block(&self) -> [u8; TRIGGER_EFFECT_LEN] {
        let params: [u8; 4] = match self.kind {
            TriggerEffectKind::Off => [0, 0, 0, 0],
            TriggerEffectKind::Continuous => [self.start, self.force, 0, 0],
            TriggerEffectKind::Section => [self.start, self.end, self.force, 0],
            TriggerEffectKind::Vibration => [self.frequency, self.force, self.start, 0],
            TriggerEffectKind::Weapon => {
                let [lo, hi] = self.zone_mask().to_le_bytes();
                [lo, hi, self.force, 0]
            }
            TriggerEffectKind::Bow => {
                let [lo, hi] = self.zone_mask().to_le_bytes();
                [lo, hi, self.force, self.frequency]
            }
        };

        let mut block = [0u8; TRIGGER_EFFECT_LEN];
        block[0] = self.kind.mode_byte();
        block[1..5].copy_from_slice(&params);
        block
    }

    /// Bitmask of the start and end zones, positions scaled onto zones 0..=9.
    fn zone_mask(&self) -> u16 {
        (1u16 << position_to_zone(self.start)) | (1u16 << position_to_zone(self.end))
    }
}

fn position_to_zone(position: u8) -> u16 {
    position as u16 * 9 / 255
}

/// Player indicator LEDs: a numbered preset or a raw 5-bit mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerIndicator {
    Preset(u8),
    Mask(u8),
}

impl Default for PlayerIndicator {
    fn default() -> Self {
        Self::Preset(1)
    }
}

impl PlayerIndicator {
    /// Build a mask from five individual LED states, left to right.
    pub fn from_leds(leds: [bool; 5]) -> Self {
        let mask = leds
            .iter()
            .enumerate()
            .fold(0u8, |acc, (i, on)| if *on { acc | (1 << i) } else { acc });
        Self::Mask(mask)
    }

    /// The LED bit mask this pattern lights.
    pub fn mask(&self) -> Result<u8> {
        match *self {
            Self::Preset(n) => {
                safety::validate_player_preset(n)?;
                Ok(match n {
                    1 => 0x04,
                    2 => 0x0A,
                    3 => 0x15,
                    4 => 0x1B,
                    _ => 0x1F,
                })
            }
            Self::Mask(m) => safety::validate_player_mask(m),
        }
    }
}

/// Light bar color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightBar {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Default for LightBar {
    fn default() -> Self {
        Self { r: 0, g: 0, b: 255 }
    }
}

/// Rumble motor speeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rumble {
    /// Left (low-frequency) motor.
    pub left: u8,
    /// Right (high-frequency) motor.
    pub right: u8,
}

/// Everything the host controls on the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputState {
    pub light_bar: LightBar,
    pub player: PlayerIndicator,
    pub l2: TriggerEffectConfig,
    pub r2: TriggerEffectConfig,
    pub rumble: Rumble,
    /// Multiplier applied to rumble, 255 = unscaled.
    pub rumble_intensity: u8,
    /// Take the light bar back from firmware control.
    pub release_light_bar: bool,
}

impl Default for OutputState {
    fn default() -> Self {
        Self {
            light_bar: LightBar::default(),
            player: PlayerIndicator::default(),
            l2: TriggerEffectConfig::off(),
            r2: TriggerEffectConfig::off(),
            rumble: Rumble::default(),
            rumble_intensity: 255,
            release_light_bar: false,
        }
    }
}

impl OutputState {
    pub fn set_trigger(&mut self, side: TriggerSide, effect: TriggerEffectConfig) {
        match side {
            TriggerSide::Left => self.l2 = effect,
            TriggerSide::Right => self.r2 = effect,
        }
    }

    /// Rumble after applying the intensity multiplier.
    pub fn scaled_rumble(&self) -> Rumble {
        let scale = |v: u8| (v as u16 * self.rumble_intensity as u16 / 255) as u8;
        Rumble {
            left: scale(self.rumble.left),
            right: scale(self.rumble.right),
        }
    }
}

/// Encode an output report for the given transport.
///
/// `seq` is the Bluetooth sequence counter (low nibble used); USB ignores it.
/// Identical inputs always produce identical bytes.
pub fn encode(state: &OutputState, transport: TransportKind, seq: u8) -> Result<Vec<u8>> {
    safety::validate_trigger_effect(&state.l2)?;
    safety::validate_trigger_effect(&state.r2)?;
    let block = encode_common(state)?;

    let report = match transport {
        TransportKind::Usb => {
            let mut report = vec![0u8; USB_OUTPUT_REPORT_LEN];
            report[0] = USB_OUTPUT_REPORT_ID;
            report[1..1 + common::LEN].copy_from_slice(&block);
            report
        }
        TransportKind::Bluetooth => {
            let mut report = vec![0u8; BT_OUTPUT_REPORT_LEN];
            report[0] = BT_OUTPUT_REPORT_ID;
            report[1] = (seq & 0x0F) << 4;
            report[2] = BT_OUTPUT_TAG;
            report[3..3 + common::LEN].copy_from_slice(&block);

            let body_len = BT_OUTPUT_REPORT_LEN - BT_CRC_LEN;
            let crc = bt_crc32(BT_OUTPUT_CRC_SEED, &report[..body_len]);
            report[body_len..].copy_from_slice(&crc.to_le_bytes());
            report
        }
    };

    trace!(
        %transport,
        seq,
        report_hex = format_args!("{:02X?}", report),
        "output report encoded"
    );
    Ok(report)
}

fn encode_common(state: &OutputState) -> Result<[u8; common::LEN]> {
    use common::*;

    let mut b = [0u8; LEN];
    b[VALID_FLAG0] = FLAG0_RUMBLE_EMULATION
        | FLAG0_RUMBLE_NOT_HAPTICS
        | FLAG0_RIGHT_TRIGGER
        | FLAG0_LEFT_TRIGGER;
    b[VALID_FLAG1] = FLAG1_LIGHTBAR | FLAG1_PLAYER_LEDS;

    let rumble = state.scaled_rumble();
    b[MOTOR_RIGHT] = rumble.right;
    b[MOTOR_LEFT] = rumble.left;

    b[RIGHT_TRIGGER..RIGHT_TRIGGER + TRIGGER_EFFECT_LEN].copy_from_slice(&state.r2.encode_block());
    b[LEFT_TRIGGER..LEFT_TRIGGER + TRIGGER_EFFECT_LEN].copy_from_slice(&state.l2.encode_block());

    if state.release_light_bar {
        b[VALID_FLAG2] = FLAG2_LIGHTBAR_SETUP;
        b[LIGHTBAR_SETUP] = LIGHTBAR_SETUP_RELEASE;
    }

    b[PLAYER_LEDS] = state.player.mask()?;
    b[LIGHTBAR_RGB] = state.light_bar.r;
    b[LIGHTBAR_RGB + 1] = state.light_bar.g;
    b[LIGHTBAR_RGB + 2] = state.light_bar.b;

    Ok(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn effect_block_golden_vectors() {
        let cases: [(TriggerEffectConfig, [u8; 5]); 6] = [
            (TriggerEffectConfig::off(), [0x05, 0, 0, 0, 0]),
            (
                TriggerEffectConfig::continuous(40, 200),
                [0x01, 40, 200, 0, 0],
            ),
            (
                TriggerEffectConfig::section(70, 160, 200),
                [0x02, 70, 160, 200, 0],
            ),
            (
                TriggerEffectConfig::vibration(10, 30, 180),
                [0x06, 30, 180, 10, 0],
            ),
            // start 80 -> zone 2, end 120 -> zone 4: mask 0b0001_0100
            (
                TriggerEffectConfig::weapon(80, 120, 255),
                [0x25, 0x14, 0x00, 255, 0],
            ),
            // start 0 -> zone 0, end 255 -> zone 9: mask 0x0201
            (
                TriggerEffectConfig::bow(0, 255, 150, 90),
                [0x22, 0x01, 0x02, 150, 90],
            ),
        ];

        for (effect, expected) in cases {
            let block = effect.encode_block();
            assert_eq!(&block[..5], &expected, "{:?}", effect.kind);
            assert!(block[5..].iter().all(|b| *b == 0));
        }
    }

    #[test]
    fn player_preset_masks() {
        let expected = [(1, 0x04), (2, 0x0A), (3, 0x15), (4, 0x1B), (5, 0x1F)];
        for (preset, mask) in expected {
            assert_eq!(PlayerIndicator::Preset(preset).mask().unwrap(), mask);
        }
    }

    #[test]
    fn player_explicit_mask_passes_through() {
        assert_eq!(PlayerIndicator::Mask(0x11).mask().unwrap(), 0x11);
        assert!(matches!(
            PlayerIndicator::Mask(0x20).mask(),
            Err(Error::OutOfRange { .. })
        ));
        assert!(PlayerIndicator::Preset(0).mask().is_err());
        assert!(PlayerIndicator::Preset(6).mask().is_err());
    }

    #[test]
    fn player_from_leds() {
        let p = PlayerIndicator::from_leds([true, false, false, false, true]);
        assert_eq!(p, PlayerIndicator::Mask(0x11));
    }

    #[test]
    fn encode_usb_layout() {
        let state = OutputState {
            light_bar: LightBar { r: 10, g: 20, b: 30 },
            player: PlayerIndicator::Preset(2),
            l2: TriggerEffectConfig::section(70, 160, 200),
            r2: TriggerEffectConfig::continuous(0, 150),
            rumble: Rumble {
                left: 100,
                right: 200,
            },
            ..OutputState::default()
        };
        let report = encode(&state, TransportKind::Usb, 0).unwrap();

        assert_eq!(report.len(), USB_OUTPUT_REPORT_LEN);
        assert_eq!(report[0], 0x02);
        assert_eq!(report[1], 0x0F);
        assert_eq!(report[2], 0x14);
        assert_eq!(report[3], 200); // right motor
        assert_eq!(report[4], 100); // left motor
        assert_eq!(&report[11..14], &[0x01, 0, 150]);
        assert_eq!(&report[22..26], &[0x02, 70, 160, 200]);
        assert_eq!(report[39], 0x00); // no light bar release requested
        assert_eq!(report[44], 0x0A);
        assert_eq!(&report[45..48], &[10, 20, 30]);
    }

    /// `OutputState::default()` over USB: every valid flag, both triggers
    /// off, player 1, blue light bar.
    const USB_DEFAULT_REPORT: [u8; USB_OUTPUT_REPORT_LEN] = [
        0x02, 0x0F, 0x14, 0, 0, 0, 0, 0, 0, 0, 0, 0x05, 0, 0, 0, 0, //
        0, 0, 0, 0, 0, 0, 0x05, 0, 0, 0, 0, 0, 0, 0, 0, 0, //
        0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x04, 0, 0, 255,
    ];

    // USB report offsets; Bluetooth adds two framing bytes
    const USB_R2_BLOCK: usize = 11;
    const USB_L2_BLOCK: usize = 22;
    const USB_PLAYER_LEDS: usize = 44;

    fn usb_golden(patches: &[(usize, &[u8])]) -> Vec<u8> {
        let mut report = USB_DEFAULT_REPORT.to_vec();
        for (offset, bytes) in patches {
            report[*offset..*offset + bytes.len()].copy_from_slice(bytes);
        }
        report
    }

    fn bt_golden(seq: u8, patches: &[(usize, &[u8])], crc: u32) -> Vec<u8> {
        let mut report = vec![0u8; BT_OUTPUT_REPORT_LEN];
        report[0] = 0x31;
        report[1] = seq << 4;
        report[2] = 0x10;
        report[3..50].copy_from_slice(&usb_golden(patches)[1..]);
        report[74..].copy_from_slice(&crc.to_le_bytes());
        report
    }

    #[test]
    fn default_state_golden_reports() {
        let state = OutputState::default();
        assert_eq!(encode(&state, TransportKind::Usb, 0).unwrap(), USB_DEFAULT_REPORT.to_vec());
        assert_eq!(
            encode(&state, TransportKind::Bluetooth, 0).unwrap(),
            bt_golden(0, &[], 0xB5D0_DA96)
        );
    }

    #[test]
    fn trigger_effect_golden_reports() {
        // (effect, block, BT CRC with the effect on L2, BT CRC with it on R2), seq 5
        let cases: [(TriggerEffectConfig, [u8; 5], u32, u32); 6] = [
            (TriggerEffectConfig::off(), [0x05, 0, 0, 0, 0], 0xE26E_FADA, 0xE26E_FADA),
            (
                TriggerEffectConfig::continuous(40, 200),
                [0x01, 40, 200, 0, 0],
                0x57A8_2102,
                0xA5C8_259B,
            ),
            (
                TriggerEffectConfig::section(70, 160, 200),
                [0x02, 70, 160, 200, 0],
                0xFB58_1751,
                0x4A6D_5D98,
            ),
            (
                TriggerEffectConfig::vibration(10, 30, 180),
                [0x06, 30, 180, 10, 0],
                0xAF38_3E47,
                0x3269_0792,
            ),
            (
                TriggerEffectConfig::weapon(80, 120, 255),
                [0x25, 0x14, 0x00, 255, 0],
                0x7BEB_84C0,
                0x5ABA_3964,
            ),
            (
                TriggerEffectConfig::bow(0, 255, 150, 90),
                [0x22, 0x01, 0x02, 150, 90],
                0x31E2_3E66,
                0xCE58_3AE1,
            ),
        ];

        for (effect, block, l2_crc, r2_crc) in cases {
            for (side, offset, crc) in [
                (TriggerSide::Left, USB_L2_BLOCK, l2_crc),
                (TriggerSide::Right, USB_R2_BLOCK, r2_crc),
            ] {
                let mut state = OutputState::default();
                state.set_trigger(side, effect);
                let patch: [(usize, &[u8]); 1] = [(offset, &block)];

                assert_eq!(
                    encode(&state, TransportKind::Usb, 5).unwrap(),
                    usb_golden(&patch),
                    "{:?} on {side:?} over USB",
                    effect.kind
                );
                assert_eq!(
                    encode(&state, TransportKind::Bluetooth, 5).unwrap(),
                    bt_golden(5, &patch, crc),
                    "{:?} on {side:?} over Bluetooth",
                    effect.kind
                );
            }
        }
    }

    #[test]
    fn player_preset_golden_reports() {
        // Sequence nibble follows the preset number
        let cases = [
            (1u8, 0x04u8, 0xC9EC_2E3Fu32),
            (2, 0x0A, 0x45BA_D562),
            (3, 0x15, 0x2B7F_EBA0),
            (4, 0x1B, 0x8CAB_C418),
            (5, 0x1F, 0xF640_C4C5),
        ];
        for (preset, mask, crc) in cases {
            let state = OutputState {
                player: PlayerIndicator::Preset(preset),
                ..OutputState::default()
            };
            let patch: [(usize, &[u8]); 1] = [(USB_PLAYER_LEDS, &[mask])];

            assert_eq!(
                encode(&state, TransportKind::Usb, preset).unwrap(),
                usb_golden(&patch),
                "preset {preset} over USB"
            );
            let bt = encode(&state, TransportKind::Bluetooth, preset).unwrap();
            assert_eq!(bt[1], preset << 4);
            assert_eq!(bt, bt_golden(preset, &patch, crc), "preset {preset} over Bluetooth");
        }
    }

    #[test]
    fn bluetooth_sequence_uses_low_nibble() {
        let state = OutputState::default();
        let wrapped = encode(&state, TransportKind::Bluetooth, 0x13).unwrap();
        let plain = encode(&state, TransportKind::Bluetooth, 0x03).unwrap();
        assert_eq!(wrapped[1], 0x30);
        assert_eq!(wrapped, plain);
    }

    #[test]
    fn encode_light_bar_release() {
        let state = OutputState {
            release_light_bar: true,
            ..OutputState::default()
        };
        let report = encode(&state, TransportKind::Usb, 0).unwrap();
        assert_eq!(report[1 + 38], 0x02);
        assert_eq!(report[1 + 41], 0x02);
    }

    #[test]
    fn encode_bluetooth_framing_and_crc() {
        let state = OutputState {
            light_bar: LightBar { r: 255, g: 0, b: 0 },
            ..OutputState::default()
        };
        let report = encode(&state, TransportKind::Bluetooth, 3).unwrap();

        assert_eq!(report.len(), BT_OUTPUT_REPORT_LEN);
        assert_eq!(report[0], 0x31);
        assert_eq!(report[1], 0x30);
        assert_eq!(report[2], 0x10);
        assert_eq!(&report[3 + 44..3 + 47], &[255, 0, 0]);

        let body_len = BT_OUTPUT_REPORT_LEN - 4;
        let crc = u32::from_le_bytes([
            report[body_len],
            report[body_len + 1],
            report[body_len + 2],
            report[body_len + 3],
        ]);
        assert_eq!(crc, bt_crc32(BT_OUTPUT_CRC_SEED, &report[..body_len]));
    }

    #[test]
    fn encode_is_deterministic() {
        let state = OutputState {
            l2: TriggerEffectConfig::bow(10, 200, 120, 40),
            r2: TriggerEffectConfig::vibration(0, 40, 255),
            ..OutputState::default()
        };
        let a = encode(&state, TransportKind::Bluetooth, 7).unwrap();
        let b = encode(&state, TransportKind::Bluetooth, 7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rumble_intensity_scales_motors() {
        let state = OutputState {
            rumble: Rumble {
                left: 200,
                right: 255,
            },
            rumble_intensity: 128,
            ..OutputState::default()
        };
        let scaled = state.scaled_rumble();
        assert_eq!(scaled.left, 100);
        assert_eq!(scaled.right, 128);
    }

    #[test]
    fn encode_rejects_inverted_section() {
        let state = OutputState {
            l2: TriggerEffectConfig::section(200, 100, 50),
            ..OutputState::default()
        };
        assert!(encode(&state, TransportKind::Usb, 0).is_err());
    }

    #[test]
    fn effect_kind_names() {
        assert_eq!(
            TriggerEffectKind::from_name("Weapon"),
            Some(TriggerEffectKind::Weapon)
        );
        assert_eq!(TriggerEffectKind::from_name("laser"), None);
        assert_eq!(TriggerSide::from_name("R2"), Some(TriggerSide::Right));
    }
}
