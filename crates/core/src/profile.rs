//! Controller profiles: light bar, player LEDs, adaptive triggers and rumble
//! intensity applied as one unit.
//!
//! [`Profile`] is the validated value the session consumes. [`ProfileDocument`]
//! is the JSON shape users edit; converting a document validates it.

use crate::error::{Error, Result};
use crate::output::{LightBar, OutputState, PlayerIndicator, TriggerEffectConfig, TriggerEffectKind};
use crate::safety;
use serde::{Deserialize, Serialize};

/// A validated, immutable controller profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    name: String,
    description: String,
    light_bar: LightBar,
    player: PlayerIndicator,
    l2: TriggerEffectConfig,
    r2: TriggerEffectConfig,
    rumble_intensity: u8,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            name: "Default".into(),
            description: "Default controller profile".into(),
            light_bar: LightBar { r: 226, g: 64, b: 48 },
            player: PlayerIndicator::Preset(1),
            l2: TriggerEffectConfig::off(),
            r2: TriggerEffectConfig::off(),
            rumble_intensity: 255,
        }
    }
}

impl Profile {
    /// Names accepted by [`Profile::preset`].
    pub const PRESETS: &'static [&'static str] = &["default", "gaming", "racing", "accessibility"];

    pub fn preset(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "default" => Some(Self::default()),
            "gaming" => Some(Self {
                name: "Gaming".into(),
                description: "Trigger feedback tuned for shooters".into(),
                light_bar: LightBar { r: 255, g: 0, b: 0 },
                l2: TriggerEffectConfig::section(70, 160, 200),
                r2: TriggerEffectConfig::weapon(80, 120, 255),
                ..Self::default()
            }),
            "racing" => Some(Self {
                name: "Racing".into(),
                description: "Progressive resistance for racing games".into(),
                light_bar: LightBar { r: 0, g: 255, b: 0 },
                l2: TriggerEffectConfig::continuous(0, 150),
                r2: TriggerEffectConfig::continuous(0, 150),
                ..Self::default()
            }),
            "accessibility" => Some(Self {
                name: "Accessibility".into(),
                description: "No trigger resistance, softer rumble".into(),
                light_bar: LightBar { r: 255, g: 255, b: 255 },
                rumble_intensity: 128,
                ..Self::default()
            }),
            _ => None,
        }
    }

    /// Parse and validate a JSON profile document.
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: ProfileDocument =
            serde_json::from_str(json).map_err(|e| Error::Profile(e.to_string()))?;
        Self::try_from(doc)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&ProfileDocument::from(self))
            .map_err(|e| Error::Profile(e.to_string()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn light_bar(&self) -> LightBar {
        self.light_bar
    }

    pub fn player(&self) -> PlayerIndicator {
        self.player
    }

    pub fn l2(&self) -> TriggerEffectConfig {
        self.l2
    }

    pub fn r2(&self) -> TriggerEffectConfig {
        self.r2
    }

    pub fn rumble_intensity(&self) -> u8 {
        self.rumble_intensity
    }

    /// A copy with a different light bar color.
    pub fn with_light_bar(&self, light_bar: LightBar) -> Self {
        Self {
            light_bar,
            ..self.clone()
        }
    }

    /// A copy with a different name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Output state with this profile's settings and the motors stopped.
    pub fn to_output_state(&self) -> OutputState {
        OutputState {
            light_bar: self.light_bar,
            player: self.player,
            l2: self.l2,
            r2: self.r2,
            rumble_intensity: self.rumble_intensity,
            ..OutputState::default()
        }
    }
}

/// JSON light bar color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedColorDocument {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// JSON player LEDs: a preset number or five explicit LEDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlayerLedsDocument {
    Number(u8),
    Custom {
        led1: bool,
        led2: bool,
        led3: bool,
        led4: bool,
        led5: bool,
    },
}

/// JSON trigger effect with a string effect type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerDocument {
    pub effect_type: String,
    #[serde(default)]
    pub start: u8,
    #[serde(default = "default_end")]
    pub end: u8,
    #[serde(default)]
    pub force: u8,
    #[serde(default)]
    pub frequency: u8,
}

fn default_end() -> u8 {
    255
}

impl Default for TriggerDocument {
    fn default() -> Self {
        Self {
            effect_type: "off".into(),
            start: 0,
            end: 255,
            force: 0,
            frequency: 0,
        }
    }
}

/// On-disk profile shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDocument {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub led_color: Option<LedColorDocument>,
    pub player_leds: Option<PlayerLedsDocument>,
    #[serde(default)]
    pub l2_trigger: TriggerDocument,
    #[serde(default)]
    pub r2_trigger: TriggerDocument,
    #[serde(default = "default_rumble_intensity")]
    pub rumble_intensity: u8,
}

fn default_rumble_intensity() -> u8 {
    255
}

impl TryFrom<ProfileDocument> for Profile {
    type Error = Error;

    fn try_from(doc: ProfileDocument) -> Result<Self> {
        if doc.name.trim().is_empty() {
            return Err(Error::Profile("profile name must not be empty".into()));
        }

        let player = match doc.player_leds {
            None => PlayerIndicator::default(),
            Some(PlayerLedsDocument::Number(n)) => {
                PlayerIndicator::Preset(safety::validate_player_preset(n)?)
            }
            Some(PlayerLedsDocument::Custom {
                led1,
                led2,
                led3,
                led4,
                led5,
            }) => PlayerIndicator::from_leds([led1, led2, led3, led4, led5]),
        };

        let l2 = trigger_from_document(&doc.l2_trigger)?;
        let r2 = trigger_from_document(&doc.r2_trigger)?;

        let defaults = Profile::default();
        Ok(Profile {
            name: doc.name,
            description: doc.description,
            light_bar: doc
                .led_color
                .map(|c| LightBar { r: c.r, g: c.g, b: c.b })
                .unwrap_or(defaults.light_bar),
            player,
            l2,
            r2,
            rumble_intensity: doc.rumble_intensity,
        })
    }
}

fn trigger_from_document(doc: &TriggerDocument) -> Result<TriggerEffectConfig> {
    let kind = TriggerEffectKind::from_name(&doc.effect_type).ok_or_else(|| {
        Error::Profile(format!("unknown trigger effect type '{}'", doc.effect_type))
    })?;
    let effect = TriggerEffectConfig {
        kind,
        start: doc.start,
        end: doc.end,
        force: doc.force,
        frequency: doc.frequency,
    };
    safety::validate_trigger_effect(&effect)?;
    Ok(effect)
}

impl From<&Profile> for ProfileDocument {
    fn from(p: &Profile) -> Self {
        let trigger = |t: &TriggerEffectConfig| TriggerDocument {
            effect_type: t.kind.name().into(),
            start: t.start,
            end: t.end,
            force: t.force,
            frequency: t.frequency,
        };
        let player_leds = match p.player {
            PlayerIndicator::Preset(n) => PlayerLedsDocument::Number(n),
            PlayerIndicator::Mask(m) => PlayerLedsDocument::Custom {
                led1: m & 0x01 != 0,
                led2: m & 0x02 != 0,
                led3: m & 0x04 != 0,
                led4: m & 0x08 != 0,
                led5: m & 0x10 != 0,
            },
        };
        Self {
            name: p.name.clone(),
            description: p.description.clone(),
            led_color: Some(LedColorDocument {
                r: p.light_bar.r,
                g: p.light_bar.g,
                b: p.light_bar.b,
            }),
            player_leds: Some(player_leds),
            l2_trigger: trigger(&p.l2),
            r2_trigger: trigger(&p.r2),
            rumble_intensity: p.rumble_intensity,
        }
    }
}
