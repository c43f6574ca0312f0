//! Action template rendering against a flattened state snapshot.
//!
//! Templates are handlebars strings (`{{cross}}`, `{{left_stick_x}}`, ...)
//! rendered in strict mode without HTML escaping: a placeholder the snapshot
//! does not have fails the render instead of producing an empty string.
//! Rendering is a read-only lookup; templates can reference values but never
//! change them.

use crate::error::{Error, Result};
use crate::spatial::SpatialState;
use crate::state::{ButtonId, ControllerState};
use handlebars::{Handlebars, RenderError, RenderErrorReason, Template};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// A single snapshot value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Number(f32),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Bool(b) => s.serialize_bool(*b),
            // Whole numbers render without a fraction: `1`, not `1.0`
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => s.serialize_i64(*n as i64),
            Self::Number(n) => s.serialize_f64(widen(*n)),
            Self::Text(t) => s.serialize_str(t),
        }
    }
}

/// Widen keeping the shortest decimal form, so `0.1f32` renders as `0.1`.
fn widen(n: f32) -> f64 {
    n.to_string().parse().unwrap_or(n as f64)
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Number(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Field name → value map templates render against.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Snapshot {
    fields: BTreeMap<String, Value>,
}

impl Snapshot {
    /// Flatten a controller sample and spatial estimate into named fields.
    ///
    /// `deadzone` applies to stick axes.
    pub fn capture(state: &ControllerState, spatial: &SpatialState, deadzone: f32) -> Self {
        let mut snap = Self::default();

        for id in ButtonId::ALL {
            snap.insert(id.name(), state.buttons.get(*id).into());
        }

        let (lx, ly) = state.left_stick.normalized_with_deadzone(deadzone);
        let (rx, ry) = state.right_stick.normalized_with_deadzone(deadzone);
        let (l2, r2) = state.triggers.normalized();
        snap.insert("left_stick_x", lx.into());
        snap.insert("left_stick_y", ly.into());
        snap.insert("right_stick_x", rx.into());
        snap.insert("right_stick_y", ry.into());
        snap.insert("l2_trigger", l2.into());
        snap.insert("r2_trigger", r2.into());

        snap.insert_xyz("gyro", [state.gyro.x, state.gyro.y, state.gyro.z]);
        snap.insert_xyz("accel", [state.accel.x, state.accel.y, state.accel.z]);

        snap.insert("battery_percent", (state.battery.percentage() as f32).into());
        snap.insert("battery_charging", state.battery.charging.into());

        for (i, point) in state.touchpad.points.iter().enumerate() {
            let n = i + 1;
            snap.insert(&format!("touch{n}_active"), point.active.into());
            snap.insert(&format!("touch{n}_x"), (point.x as f32).into());
            snap.insert(&format!("touch{n}_y"), (point.y as f32).into());
        }

        snap.insert("sequence", (state.sequence as f32).into());

        snap.insert_xyz("pos", spatial.position);
        snap.insert_xyz("vel", spatial.velocity);
        snap.insert_xyz("angvel", spatial.angular_velocity);
        snap.insert_xyz("linacc", spatial.linear_accel);

        let [w, x, y, z] = spatial.orientation;
        snap.insert("quat_w", w.into());
        snap.insert("quat_x", x.into());
        snap.insert("quat_y", y.into());
        snap.insert("quat_z", z.into());

        let (roll, pitch, yaw) = spatial.euler_angles();
        snap.insert("roll", roll.into());
        snap.insert("pitch", pitch.into());
        snap.insert("yaw", yaw.into());

        snap.insert("heading", spatial.heading.into());
        snap.insert("force", spatial.force.into());
        snap.insert("mode", spatial.mode.name().to_string().into());

        let buttons_json =
            serde_json::to_string(&state.buttons).unwrap_or_else(|_| "{}".to_string());
        snap.insert("buttons_json", buttons_json.into());

        snap
    }

    pub fn insert(&mut self, name: &str, value: Value) {
        self.fields.insert(name.to_string(), value);
    }

    fn insert_xyz(&mut self, prefix: &str, v: [f32; 3]) {
        for (axis, value) in ["x", "y", "z"].iter().zip(v) {
            self.insert(&format!("{prefix}_{axis}"), value.into());
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// All field names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

/// Compiled action templates, looked up by name.
pub struct TemplateSet {
    registry: Handlebars<'static>,
}

impl Default for TemplateSet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TemplateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.registry.get_templates().keys().collect();
        names.sort();
        f.debug_struct("TemplateSet").field("templates", &names).finish()
    }
}

impl TemplateSet {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(handlebars::no_escape);
        Self { registry }
    }

    /// Compile `source` and store it under `name`, replacing any previous one.
    pub fn register(&mut self, name: &str, source: &str) -> Result<()> {
        self.registry
            .register_template_string(name, source)
            .map_err(|e| Error::Config(format!("template '{name}': {e}")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.has_template(name)
    }

    pub fn len(&self) -> usize {
        self.registry.get_templates().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render the template registered as `name`.
    pub fn render(&self, name: &str, snapshot: &Snapshot) -> Result<String> {
        self.registry
            .render(name, snapshot)
            .map_err(|e| render_error(name, e))
    }
}

/// Check that `source` parses as a template.
pub fn check(source: &str) -> Result<()> {
    Template::compile(source)
        .map(|_| ())
        .map_err(|e| Error::Config(format!("invalid template '{source}': {e}")))
}

/// Render a one-off template without registering it.
pub fn render(source: &str, snapshot: &Snapshot) -> Result<String> {
    TemplateSet::new()
        .registry
        .render_template(source, snapshot)
        .map_err(|e| render_error(source, e))
}

fn render_error(template: &str, err: RenderError) -> Error {
    let reason = match err.reason() {
        RenderErrorReason::MissingVariable(Some(name)) => format!("unknown placeholder '{name}'"),
        other => other.to_string(),
    };
    Error::TemplateRender {
        template: template.to_string(),
        reason,
    }
}
