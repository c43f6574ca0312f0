//! Binding model: which input channel fires which action, and when.

use crate::error::{Error, Result};
use crate::output::LightBar;
use crate::state::{ButtonId, ControllerState};
use crate::template::{self, Snapshot, TemplateSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Default repeat interval for hold bindings.
pub const DEFAULT_REPEAT: Duration = Duration::from_millis(250);
/// Default activation level for analog channels used with press/release/hold.
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Analog channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisId {
    LeftStickX,
    LeftStickY,
    RightStickX,
    RightStickY,
    L2,
    R2,
}

impl AxisId {
    pub const ALL: &'static [AxisId] = &[
        AxisId::LeftStickX,
        AxisId::LeftStickY,
        AxisId::RightStickX,
        AxisId::RightStickY,
        AxisId::L2,
        AxisId::R2,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::LeftStickX => "left_stick_x",
            Self::LeftStickY => "left_stick_y",
            Self::RightStickX => "right_stick_x",
            Self::RightStickY => "right_stick_y",
            Self::L2 => "l2_trigger",
            Self::R2 => "r2_trigger",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        let found = Self::ALL.iter().find(|a| a.name() == lower).copied();
        found.or(match lower.as_str() {
            "lx" => Some(Self::LeftStickX),
            "ly" => Some(Self::LeftStickY),
            "rx" => Some(Self::RightStickX),
            "ry" => Some(Self::RightStickY),
            "l2" => Some(Self::L2),
            "r2" => Some(Self::R2),
            _ => None,
        })
    }

    /// Normalized value: sticks in -1.0..=1.0 (Y grows downward, as
    /// reported), triggers in 0.0..=1.0. Sticks use a radial deadzone.
    pub fn value(&self, state: &ControllerState, deadzone: f32) -> f32 {
        match self {
            Self::LeftStickX => state.left_stick.normalized_with_deadzone(deadzone).0,
            Self::LeftStickY => state.left_stick.normalized_with_deadzone(deadzone).1,
            Self::RightStickX => state.right_stick.normalized_with_deadzone(deadzone).0,
            Self::RightStickY => state.right_stick.normalized_with_deadzone(deadzone).1,
            Self::L2 => state.triggers.normalized().0,
            Self::R2 => state.triggers.normalized().1,
        }
    }

    pub fn is_trigger(&self) -> bool {
        matches!(self, Self::L2 | Self::R2)
    }

    /// Selector name for one direction of a stick axis.
    pub fn directed_name(&self, direction: Direction) -> &'static str {
        match (self, direction) {
            (Self::LeftStickX, Direction::Positive) => "left_stick_x+",
            (Self::LeftStickX, Direction::Negative) => "left_stick_x-",
            (Self::LeftStickY, Direction::Positive) => "left_stick_y+",
            (Self::LeftStickY, Direction::Negative) => "left_stick_y-",
            (Self::RightStickX, Direction::Positive) => "right_stick_x+",
            (Self::RightStickX, Direction::Negative) => "right_stick_x-",
            (Self::RightStickY, Direction::Positive) => "right_stick_y+",
            (Self::RightStickY, Direction::Negative) => "right_stick_y-",
            (Self::L2, _) => "l2_trigger",
            (Self::R2, _) => "r2_trigger",
        }
    }
}

/// Half of a stick axis. Y grows downward, so "up" is negative Y.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Positive,
    Negative,
}

impl Direction {
    /// `value` measured along this direction, zero when pointing the other way.
    pub fn along(&self, value: f32) -> f32 {
        match self {
            Self::Positive => value.max(0.0),
            Self::Negative => (-value).max(0.0),
        }
    }
}

/// `left_stick_up`-style aliases for directed stick selectors.
fn stick_direction_alias(name: &str) -> Option<(AxisId, Direction)> {
    let (stick, dir) = name.rsplit_once('_')?;
    let (x, y) = match stick {
        "left_stick" | "l" => (AxisId::LeftStickX, AxisId::LeftStickY),
        "right_stick" | "r" => (AxisId::RightStickX, AxisId::RightStickY),
        _ => return None,
    };
    match dir {
        "left" => Some((x, Direction::Negative)),
        "right" => Some((x, Direction::Positive)),
        "up" => Some((y, Direction::Negative)),
        "down" => Some((y, Direction::Positive)),
        _ => None,
    }
}

/// The physical channel a binding watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputChannel {
    Button(ButtonId),
    /// Stick axes by magnitude, triggers by value.
    Axis(AxisId),
    /// One direction of a stick axis, e.g. `left_stick_x-` (pushed left).
    Directed(AxisId, Direction),
    /// Any button, stick, trigger or touch change.
    AnyChange,
}

impl InputChannel {
    /// Parse a channel name as used in mapping documents.
    pub fn parse(name: &str) -> Result<Self> {
        let trimmed = name.trim();
        if let Some(button) = ButtonId::from_name(trimmed) {
            return Ok(Self::Button(button));
        }
        if let Some(axis) = AxisId::from_name(trimmed) {
            return Ok(Self::Axis(axis));
        }
        let lower = trimmed.to_lowercase();
        if let Some((axis, direction)) = stick_direction_alias(&lower) {
            return Ok(Self::Directed(axis, direction));
        }
        let signed = lower
            .strip_suffix('+')
            .map(|base| (base, Direction::Positive))
            .or_else(|| lower.strip_suffix('-').map(|base| (base, Direction::Negative)));
        if let Some((base, direction)) = signed {
            return match AxisId::from_name(base) {
                Some(axis) if !axis.is_trigger() => Ok(Self::Directed(axis, direction)),
                Some(_) => Err(Error::InvalidBindingSelector {
                    selector: name.to_string(),
                    reason: "triggers have no direction".into(),
                }),
                None => Err(Error::InvalidBindingSelector {
                    selector: name.to_string(),
                    reason: "unknown input channel".into(),
                }),
            };
        }
        match lower.as_str() {
            "any" | "any_change" | "*" => Ok(Self::AnyChange),
            _ => Err(Error::InvalidBindingSelector {
                selector: name.to_string(),
                reason: "unknown input channel".into(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Button(b) => b.name(),
            Self::Axis(a) => a.name(),
            Self::Directed(a, d) => a.directed_name(*d),
            Self::AnyChange => "any_change",
        }
    }
}

impl std::fmt::Display for InputChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// When a binding fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    /// Inactive to active.
    Press,
    /// Active to inactive.
    Release,
    /// Once per repeat interval while active.
    Hold,
    /// Any value change beyond the change epsilon.
    Change,
}

impl TriggerKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "press" | "pressed" => Some(Self::Press),
            "release" | "released" => Some(Self::Release),
            "hold" | "held" => Some(Self::Hold),
            "change" | "changed" => Some(Self::Change),
            _ => None,
        }
    }
}

/// An action template. String fields may contain `{{placeholder}}` references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Action {
    Shell {
        command: String,
    },
    Http {
        method: String,
        path: String,
        body: Option<String>,
        /// Header values are templates too.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
    WebSocket {
        message: String,
        binary: bool,
    },
}

impl Action {
    pub fn shell(command: impl Into<String>) -> Self {
        Self::Shell {
            command: command.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Shell { .. } => "shell",
            Self::Http { .. } => "http",
            Self::WebSocket { .. } => "websocket",
        }
    }

    /// Template fields as `(field, source)` pairs, in a fixed order.
    fn template_fields(&self) -> Vec<(String, &str)> {
        match self {
            Self::Shell { command } => vec![("command".into(), command.as_str())],
            Self::Http {
                path, body, headers, ..
            } => {
                let mut fields = vec![("path".into(), path.as_str())];
                if let Some(body) = body {
                    fields.push(("body".into(), body.as_str()));
                }
                for (name, value) in headers {
                    fields.push((format!("header.{name}"), value.as_str()));
                }
                fields
            }
            Self::WebSocket { message, .. } => vec![("message".into(), message.as_str())],
        }
    }

    /// Fail if any template field does not parse.
    pub fn check_templates(&self) -> Result<()> {
        self.template_fields()
            .into_iter()
            .try_for_each(|(_, source)| template::check(source))
    }

    /// Compile every template field into `templates` under `prefix`.
    pub fn register_templates(&self, prefix: &str, templates: &mut TemplateSet) -> Result<()> {
        for (field, source) in self.template_fields() {
            templates.register(&format!("{prefix}.{field}"), source)?;
        }
        Ok(())
    }

    /// Render the templates registered under `prefix` against `snapshot`.
    ///
    /// Fails on the first template that does not render; nothing is
    /// partially rendered.
    pub fn render(&self, prefix: &str, templates: &TemplateSet, snapshot: &Snapshot) -> Result<Action> {
        let field = |name: &str| templates.render(&format!("{prefix}.{name}"), snapshot);
        Ok(match self {
            Self::Shell { .. } => Self::Shell {
                command: field("command")?,
            },
            Self::Http {
                method, body, headers, ..
            } => Self::Http {
                method: method.clone(),
                path: field("path")?,
                body: body.as_ref().map(|_| field("body")).transpose()?,
                headers: headers
                    .keys()
                    .map(|name| -> Result<(String, String)> {
                        Ok((name.clone(), field(&format!("header.{name}"))?))
                    })
                    .collect::<Result<_>>()?,
            },
            Self::WebSocket { binary, .. } => Self::WebSocket {
                message: field("message")?,
                binary: *binary,
            },
        })
    }
}

/// Timed rumble played when a binding fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RumbleFeedback {
    pub left: u8,
    pub right: u8,
    pub duration_ms: u64,
}

impl RumbleFeedback {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Controller output a binding drives when it fires, next to its action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rumble: Option<RumbleFeedback>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light_bar: Option<LightBar>,
}

impl Feedback {
    pub fn is_empty(&self) -> bool {
        self.rumble.is_none() && self.light_bar.is_none()
    }
}

/// One configured binding.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub channel: InputChannel,
    pub trigger: TriggerKind,
    pub action: Action,
    /// Hold repeat interval.
    pub repeat: Duration,
    /// Minimum interval between two fires.
    pub debounce: Duration,
    /// Activation level for analog channels.
    pub threshold: f32,
    /// Rumble and light bar changes applied when the binding fires.
    pub feedback: Feedback,
}

impl Binding {
    /// Create a binding, rejecting channel/trigger combinations that can
    /// never fire and templates that do not parse.
    pub fn new(channel: InputChannel, trigger: TriggerKind, action: Action) -> Result<Self> {
        if channel == InputChannel::AnyChange && trigger != TriggerKind::Change {
            return Err(Error::InvalidBindingSelector {
                selector: channel.name().to_string(),
                reason: format!("'{}' only supports the change trigger", channel.name()),
            });
        }
        action.check_templates()?;
        Ok(Self {
            channel,
            trigger,
            action,
            repeat: DEFAULT_REPEAT,
            debounce: Duration::ZERO,
            threshold: DEFAULT_THRESHOLD,
            feedback: Feedback::default(),
        })
    }

    pub fn with_repeat(mut self, repeat: Duration) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_feedback(mut self, feedback: Feedback) -> Self {
        self.feedback = feedback;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Stick;

    #[test]
    fn parse_channels() {
        assert_eq!(
            InputChannel::parse("cross").unwrap(),
            InputChannel::Button(ButtonId::Cross)
        );
        assert_eq!(
            InputChannel::parse("L2").unwrap(),
            InputChannel::Axis(AxisId::L2)
        );
        assert_eq!(
            InputChannel::parse("right_stick_y").unwrap(),
            InputChannel::Axis(AxisId::RightStickY)
        );
        assert_eq!(InputChannel::parse("any").unwrap(), InputChannel::AnyChange);
    }

    #[test]
    fn parse_directed_stick_channels() {
        assert_eq!(
            InputChannel::parse("left_stick_x-").unwrap(),
            InputChannel::Directed(AxisId::LeftStickX, Direction::Negative)
        );
        assert_eq!(
            InputChannel::parse("RX+").unwrap(),
            InputChannel::Directed(AxisId::RightStickX, Direction::Positive)
        );
        assert_eq!(
            InputChannel::parse("left_stick_up").unwrap(),
            InputChannel::Directed(AxisId::LeftStickY, Direction::Negative)
        );
        assert_eq!(
            InputChannel::parse("right_stick_down").unwrap(),
            InputChannel::Directed(AxisId::RightStickY, Direction::Positive)
        );
        assert_eq!(
            InputChannel::Directed(AxisId::LeftStickX, Direction::Negative).name(),
            "left_stick_x-"
        );
        assert!(matches!(
            InputChannel::parse("r2+"),
            Err(Error::InvalidBindingSelector { .. })
        ));
        assert!(InputChannel::parse("left_stick_z-").is_err());
    }

    #[test]
    fn direction_measures_one_half() {
        assert_eq!(Direction::Positive.along(0.7), 0.7);
        assert_eq!(Direction::Positive.along(-0.7), 0.0);
        assert_eq!(Direction::Negative.along(-0.7), 0.7);
        assert_eq!(Direction::Negative.along(0.2), 0.0);
    }

    #[test]
    fn parse_unknown_channel_fails() {
        assert!(matches!(
            InputChannel::parse("jump"),
            Err(Error::InvalidBindingSelector { .. })
        ));
    }

    #[test]
    fn any_change_requires_change_trigger() {
        assert!(Binding::new(InputChannel::AnyChange, TriggerKind::Press, Action::shell("x")).is_err());
        assert!(Binding::new(InputChannel::AnyChange, TriggerKind::Change, Action::shell("x")).is_ok());
    }

    #[test]
    fn axis_values() {
        let state = ControllerState {
            left_stick: Stick { x: 255, y: 128 },
            triggers: crate::state::Triggers { l2: 255, r2: 0 },
            ..ControllerState::default()
        };
        assert!((AxisId::LeftStickX.value(&state, 0.1) - 1.0).abs() < 1e-3);
        assert_eq!(AxisId::LeftStickY.value(&state, 0.1), 0.0);
        assert!((AxisId::L2.value(&state, 0.1) - 1.0).abs() < 1e-6);
        assert_eq!(AxisId::R2.value(&state, 0.1), 0.0);
    }

    fn registered(action: &Action) -> TemplateSet {
        let mut templates = TemplateSet::new();
        action.register_templates("0", &mut templates).unwrap();
        templates
    }

    #[test]
    fn render_http_action() {
        let mut snap = Snapshot::default();
        snap.insert("cross", true.into());
        snap.insert("l2_trigger", 0.5f32.into());
        snap.insert("mode", "heading".to_string().into());
        let action = Action::Http {
            method: "POST".into(),
            path: "/press/{{cross}}".into(),
            body: Some("{\"l2\": {{l2_trigger}}}".into()),
            headers: BTreeMap::from([
                ("Content-Type".to_string(), "application/json".to_string()),
                ("X-Mode".to_string(), "{{mode}}".to_string()),
            ]),
        };
        let templates = registered(&action);
        assert_eq!(templates.len(), 4);

        let rendered = action.render("0", &templates, &snap).unwrap();
        assert_eq!(
            rendered,
            Action::Http {
                method: "POST".into(),
                path: "/press/true".into(),
                body: Some("{\"l2\": 0.5}".into()),
                headers: BTreeMap::from([
                    ("Content-Type".to_string(), "application/json".to_string()),
                    ("X-Mode".to_string(), "heading".to_string()),
                ]),
            }
        );
    }

    #[test]
    fn render_reports_unknown_placeholder() {
        let action = Action::WebSocket {
            message: "{{nope}}".into(),
            binary: false,
        };
        let templates = registered(&action);
        assert!(matches!(
            action.render("0", &templates, &Snapshot::default()),
            Err(Error::TemplateRender { .. })
        ));
    }

    #[test]
    fn unknown_placeholder_in_header_fails_whole_render() {
        let action = Action::Http {
            method: "GET".into(),
            path: "/ok".into(),
            body: None,
            headers: BTreeMap::from([("X-Missing".to_string(), "{{nope}}".to_string())]),
        };
        let templates = registered(&action);
        assert!(action.render("0", &templates, &Snapshot::default()).is_err());
    }

    #[test]
    fn binding_rejects_unparsable_template() {
        assert!(matches!(
            Binding::new(
                InputChannel::Button(ButtonId::Cross),
                TriggerKind::Press,
                Action::shell("echo {{cross")
            ),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn http_headers_skipped_when_empty() {
        let action = Action::Http {
            method: "POST".into(),
            path: "/x".into(),
            body: None,
            headers: BTreeMap::new(),
        };
        let json = serde_json::to_string(&action).unwrap();
        assert!(!json.contains("headers"), "{json}");
    }
}
