//! Safety layer: validates parameters against known-safe ranges before they
//! reach the controller or the poll loop.
//!
//! # Bounds
//!
//! ## Poll rate
//! - **Range**: 1 – 1000 Hz
//! - **Default**: 100 Hz
//! - The controller itself reports at up to 1000 Hz over USB (250 Hz typical
//!   over Bluetooth); polling faster only returns duplicate frames.
//!
//! ## Stick deadzone
//! - **Range**: 0.0 ≤ deadzone < 1.0 (fraction of full deflection)
//!
//! ## Player indicator
//! - **Presets**: 1 – 5
//! - **Explicit masks**: 0x00 – 0x1F (five LEDs)
//!
//! ## Adaptive triggers
//! - Section, weapon and bow effects need `start <= end`.
//!
//! All validation happens before any report is encoded: no invalid data
//! ever reaches the device.

use crate::error::{Error, Result};
use crate::output::{TriggerEffectConfig, TriggerEffectKind};

pub const POLL_RATE_MIN: u32 = 1;
pub const POLL_RATE_MAX: u32 = 1000;
pub const POLL_RATE_DEFAULT: u32 = 100;

pub const PLAYER_PRESET_MIN: u8 = 1;
pub const PLAYER_PRESET_MAX: u8 = 5;
pub const PLAYER_MASK_MAX: u8 = 0x1F;

/// Validate a poll rate in Hz.
pub fn validate_poll_rate(hz: u32) -> Result<u32> {
    if !(POLL_RATE_MIN..=POLL_RATE_MAX).contains(&hz) {
        return Err(Error::OutOfRange {
            field: "poll_rate",
            value: hz,
            min: POLL_RATE_MIN,
            max: POLL_RATE_MAX,
        });
    }
    Ok(hz)
}

/// Validate a radial stick deadzone.
pub fn validate_deadzone(deadzone: f32) -> Result<f32> {
    if !deadzone.is_finite() || !(0.0..1.0).contains(&deadzone) {
        return Err(Error::Config(format!(
            "deadzone must be in 0.0..1.0, got {deadzone}"
        )));
    }
    Ok(deadzone)
}

/// Validate a player indicator preset number.
pub fn validate_player_preset(preset: u8) -> Result<u8> {
    if !(PLAYER_PRESET_MIN..=PLAYER_PRESET_MAX).contains(&preset) {
        return Err(Error::OutOfRange {
            field: "player_preset",
            value: preset as u32,
            min: PLAYER_PRESET_MIN as u32,
            max: PLAYER_PRESET_MAX as u32,
        });
    }
    Ok(preset)
}

/// Validate an explicit player indicator mask.
pub fn validate_player_mask(mask: u8) -> Result<u8> {
    if mask > PLAYER_MASK_MAX {
        return Err(Error::OutOfRange {
            field: "player_mask",
            value: mask as u32,
            min: 0,
            max: PLAYER_MASK_MAX as u32,
        });
    }
    Ok(mask)
}

/// Validate the parameters of an adaptive trigger effect.
pub fn validate_trigger_effect(effect: &TriggerEffectConfig) -> Result<()> {
    let ranged = matches!(
        effect.kind,
        TriggerEffectKind::Section | TriggerEffectKind::Weapon | TriggerEffectKind::Bow
    );
    if ranged && effect.start > effect.end {
        return Err(Error::OutOfRange {
            field: "trigger_start",
            value: effect.start as u32,
            min: 0,
            max: effect.end as u32,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_poll_rate_in_range() {
        assert_eq!(validate_poll_rate(1).unwrap(), 1);
        assert_eq!(validate_poll_rate(POLL_RATE_DEFAULT).unwrap(), 100);
        assert_eq!(validate_poll_rate(1000).unwrap(), 1000);
    }

    #[test]
    fn validate_poll_rate_rejects_out_of_range() {
        assert!(validate_poll_rate(0).is_err());
        assert!(validate_poll_rate(1001).is_err());
    }

    #[test]
    fn validate_deadzone_bounds() {
        assert!(validate_deadzone(0.0).is_ok());
        assert!(validate_deadzone(0.25).is_ok());
        assert!(validate_deadzone(1.0).is_err());
        assert!(validate_deadzone(-0.1).is_err());
        assert!(validate_deadzone(f32::NAN).is_err());
    }

    #[test]
    fn validate_player_preset_bounds() {
        for p in 1..=5 {
            assert!(validate_player_preset(p).is_ok());
        }
        assert!(validate_player_preset(0).is_err());
        assert!(validate_player_preset(6).is_err());
    }

    #[test]
    fn validate_player_mask_bounds() {
        assert!(validate_player_mask(0x00).is_ok());
        assert!(validate_player_mask(0x1F).is_ok());
        assert!(validate_player_mask(0x20).is_err());
    }

    #[test]
    fn validate_trigger_effect_ordering() {
        assert!(validate_trigger_effect(&TriggerEffectConfig::section(10, 20, 100)).is_ok());
        assert!(validate_trigger_effect(&TriggerEffectConfig::weapon(200, 20, 100)).is_err());
        // Continuous ignores `end`
        assert!(validate_trigger_effect(&TriggerEffectConfig::continuous(200, 100)).is_ok());
    }
}
