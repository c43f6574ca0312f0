//! Controller state model: one decoded input report.

use serde::{Deserialize, Serialize};

/// Every digital button the controller reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonId {
    Cross,
    Circle,
    Square,
    Triangle,
    DpadUp,
    DpadDown,
    DpadLeft,
    DpadRight,
    L1,
    R1,
    L2Button,
    R2Button,
    L3,
    R3,
    Options,
    Create,
    Ps,
    Touchpad,
    Mute,
}

impl ButtonId {
    /// All buttons, in report order.
    pub const ALL: &'static [ButtonId] = &[
        ButtonId::Cross,
        ButtonId::Circle,
        ButtonId::Square,
        ButtonId::Triangle,
        ButtonId::DpadUp,
        ButtonId::DpadDown,
        ButtonId::DpadLeft,
        ButtonId::DpadRight,
        ButtonId::L1,
        ButtonId::R1,
        ButtonId::L2Button,
        ButtonId::R2Button,
        ButtonId::L3,
        ButtonId::R3,
        ButtonId::Options,
        ButtonId::Create,
        ButtonId::Ps,
        ButtonId::Touchpad,
        ButtonId::Mute,
    ];

    /// Canonical channel name used in configs and templates.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cross => "cross",
            Self::Circle => "circle",
            Self::Square => "square",
            Self::Triangle => "triangle",
            Self::DpadUp => "dpad_up",
            Self::DpadDown => "dpad_down",
            Self::DpadLeft => "dpad_left",
            Self::DpadRight => "dpad_right",
            Self::L1 => "l1",
            Self::R1 => "r1",
            Self::L2Button => "l2_button",
            Self::R2Button => "r2_button",
            Self::L3 => "l3",
            Self::R3 => "r3",
            Self::Options => "options",
            Self::Create => "create",
            Self::Ps => "ps",
            Self::Touchpad => "touchpad",
            Self::Mute => "mute",
        }
    }

    /// Parse a channel name (case-insensitive, a few common aliases).
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        let found = Self::ALL.iter().find(|b| b.name() == lower).copied();
        found.or(match lower.as_str() {
            "x" => Some(Self::Cross),
            "o" => Some(Self::Circle),
            "share" => Some(Self::Create),
            "l2btn" => Some(Self::L2Button),
            "r2btn" => Some(Self::R2Button),
            "home" | "playstation" => Some(Self::Ps),
            "touchpad_click" => Some(Self::Touchpad),
            _ => None,
        })
    }
}

impl std::fmt::Display for ButtonId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Digital button states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buttons {
    pub cross: bool,
    pub circle: bool,
    pub square: bool,
    pub triangle: bool,

    pub dpad_up: bool,
    pub dpad_down: bool,
    pub dpad_left: bool,
    pub dpad_right: bool,

    pub l1: bool,
    pub r1: bool,
    pub l2_button: bool,
    pub r2_button: bool,

    pub l3: bool,
    pub r3: bool,

    pub options: bool,
    pub create: bool,
    pub ps: bool,
    pub touchpad: bool,
    pub mute: bool,
}

impl Buttons {
    /// Read one button by id.
    pub fn get(&self, id: ButtonId) -> bool {
        match id {
            ButtonId::Cross => self.cross,
            ButtonId::Circle => self.circle,
            ButtonId::Square => self.square,
            ButtonId::Triangle => self.triangle,
            ButtonId::DpadUp => self.dpad_up,
            ButtonId::DpadDown => self.dpad_down,
            ButtonId::DpadLeft => self.dpad_left,
            ButtonId::DpadRight => self.dpad_right,
            ButtonId::L1 => self.l1,
            ButtonId::R1 => self.r1,
            ButtonId::L2Button => self.l2_button,
            ButtonId::R2Button => self.r2_button,
            ButtonId::L3 => self.l3,
            ButtonId::R3 => self.r3,
            ButtonId::Options => self.options,
            ButtonId::Create => self.create,
            ButtonId::Ps => self.ps,
            ButtonId::Touchpad => self.touchpad,
            ButtonId::Mute => self.mute,
        }
    }

    /// Set one button by id.
    pub fn set(&mut self, id: ButtonId, pressed: bool) {
        let slot = match id {
            ButtonId::Cross => &mut self.cross,
            ButtonId::Circle => &mut self.circle,
            ButtonId::Square => &mut self.square,
            ButtonId::Triangle => &mut self.triangle,
            ButtonId::DpadUp => &mut self.dpad_up,
            ButtonId::DpadDown => &mut self.dpad_down,
            ButtonId::DpadLeft => &mut self.dpad_left,
            ButtonId::DpadRight => &mut self.dpad_right,
            ButtonId::L1 => &mut self.l1,
            ButtonId::R1 => &mut self.r1,
            ButtonId::L2Button => &mut self.l2_button,
            ButtonId::R2Button => &mut self.r2_button,
            ButtonId::L3 => &mut self.l3,
            ButtonId::R3 => &mut self.r3,
            ButtonId::Options => &mut self.options,
            ButtonId::Create => &mut self.create,
            ButtonId::Ps => &mut self.ps,
            ButtonId::Touchpad => &mut self.touchpad,
            ButtonId::Mute => &mut self.mute,
        };
        *slot = pressed;
    }
}

/// Analog stick (0-255 per axis, center at 128).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stick {
    pub x: u8,
    pub y: u8,
}

impl Default for Stick {
    fn default() -> Self {
        Self { x: 128, y: 128 }
    }
}

impl Stick {
    /// Normalized axes in -1.0..=1.0 (Y grows downward, as reported).
    pub fn normalized(&self) -> (f32, f32) {
        (normalize_axis(self.x), normalize_axis(self.y))
    }

    /// Normalized axes with a radial deadzone, rescaled so the deadzone edge maps to 0.
    pub fn normalized_with_deadzone(&self, deadzone: f32) -> (f32, f32) {
        let (x, y) = self.normalized();
        let magnitude = (x * x + y * y).sqrt();
        if magnitude <= deadzone || magnitude == 0.0 {
            (0.0, 0.0)
        } else {
            let scale = ((magnitude - deadzone) / (1.0 - deadzone)).min(1.0) / magnitude;
            (x * scale, y * scale)
        }
    }
}

fn normalize_axis(raw: u8) -> f32 {
    ((raw as f32 - 128.0) / 127.0).clamp(-1.0, 1.0)
}

/// Analog trigger values (0-255).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triggers {
    pub l2: u8,
    pub r2: u8,
}

impl Triggers {
    /// Normalized values in 0.0..=1.0.
    pub fn normalized(&self) -> (f32, f32) {
        (self.l2 as f32 / 255.0, self.r2 as f32 / 255.0)
    }
}

/// One tracked touch point on the touchpad.
///
/// `id` is assigned by the controller on touch-down and stays stable while
/// `active` remains set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TouchPoint {
    pub active: bool,
    pub id: u8,
    /// 12-bit horizontal position.
    pub x: u16,
    /// 12-bit vertical position.
    pub y: u16,
}

/// Touchpad with at most two concurrent touches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Touchpad {
    pub points: [TouchPoint; 2],
}

/// A 3-vector of physical sensor units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn norm(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

impl From<Vec3> for nalgebra::Vector3<f32> {
    fn from(v: Vec3) -> Self {
        nalgebra::Vector3::new(v.x, v.y, v.z)
    }
}

/// Battery status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Battery {
    /// Charge level, 0-10.
    pub level: u8,
    pub charging: bool,
    pub full: bool,
}

impl Battery {
    pub fn percentage(&self) -> u8 {
        (self.level.min(10)) * 10
    }
}

/// Complete controller state decoded from one input report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerState {
    pub buttons: Buttons,
    pub left_stick: Stick,
    pub right_stick: Stick,
    pub triggers: Triggers,
    pub touchpad: Touchpad,
    /// Angular velocity in rad/s.
    pub gyro: Vec3,
    /// Acceleration in g.
    pub accel: Vec3,
    pub battery: Battery,
    /// Rolling frame counter reported by the device.
    pub sequence: u8,
    /// Device sensor timestamp (raw ticks).
    pub sensor_timestamp: u32,
}
