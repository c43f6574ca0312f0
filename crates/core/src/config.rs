//! Mapping configuration documents.
//!
//! ```json
//! {
//!   "name": "desk",
//!   "poll_rate": 100,
//!   "deadzone": 0.1,
//!   "spatial_mode": "standard",
//!   "status_colors": {
//!     "connected": { "r": 0, "g": 128, "b": 255 },
//!     "error": { "r": 255, "g": 0, "b": 0 }
//!   },
//!   "bindings": {
//!     "cross": { "trigger": "press", "command": "echo hit",
//!                "rumble": { "left": 0, "right": 200, "duration_ms": 80 } },
//!     "left_stick_x-": { "trigger": "press", "threshold": 0.8, "command": "echo left" },
//!     "r2_trigger": [
//!       { "trigger": "change", "websocket": { "message": "{\"r2\": {{r2_trigger}}}" } }
//!     ],
//!     "options": { "trigger": "hold", "repeat_ms": 500,
//!                  "http": { "method": "POST", "path": "/menu", "body": "{{buttons_json}}",
//!                            "headers": { "Content-Type": "application/json" } } }
//!   }
//! }
//! ```
//!
//! Bindings are ordered by channel name, then by position within a list.

use crate::binding::{Action, Binding, Feedback, InputChannel, RumbleFeedback, TriggerKind};
use crate::error::{Error, Result};
use crate::output::LightBar;
use crate::safety;
use crate::session::{SessionConfig, StatusColors};
use crate::spatial::{SpatialConfig, SpatialMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

fn default_poll_rate() -> u32 {
    safety::POLL_RATE_DEFAULT
}

fn default_deadzone() -> f32 {
    0.1
}

fn default_method() -> String {
    "POST".into()
}

/// Top-level mapping document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingConfig {
    #[serde(default)]
    pub name: String,
    /// Poll rate in Hz.
    #[serde(default = "default_poll_rate")]
    pub poll_rate: u32,
    /// Stick deadzone for bindings and templates.
    #[serde(default = "default_deadzone")]
    pub deadzone: f32,
    #[serde(default)]
    pub spatial_mode: SpatialMode,
    /// Estimator tunables; defaults with `deadzone` when absent.
    #[serde(default)]
    pub spatial: Option<SpatialConfig>,
    /// Light bar colors for connected, idle and error states.
    #[serde(default)]
    pub status_colors: StatusColors,
    #[serde(default)]
    pub bindings: BTreeMap<String, BindingEntries>,
}

/// One binding or several for the same channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BindingEntries {
    One(BindingEntry),
    Many(Vec<BindingEntry>),
}

impl BindingEntries {
    fn entries(&self) -> &[BindingEntry] {
        match self {
            Self::One(entry) => std::slice::from_ref(entry),
            Self::Many(entries) => entries,
        }
    }
}

/// A binding as written in the document. Exactly one action key must be set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingEntry {
    pub trigger: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub websocket: Option<WebSocketEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
    /// Rumble played when the binding fires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rumble: Option<RumbleFeedback>,
    /// Light bar color set when the binding fires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub led: Option<LightBar>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpEntry {
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebSocketEntry {
    pub message: String,
    #[serde(default)]
    pub binary: bool,
}

impl MappingConfig {
    /// Parse a document and validate it, including every binding.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: MappingConfig =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        safety::validate_poll_rate(self.poll_rate)?;
        safety::validate_deadzone(self.deadzone)?;
        if let Some(spatial) = &self.spatial {
            safety::validate_deadzone(spatial.deadzone)?;
        }
        self.to_bindings().map(|_| ())
    }

    /// Build the validated binding list.
    pub fn to_bindings(&self) -> Result<Vec<Binding>> {
        let mut bindings = Vec::new();
        for (selector, entries) in &self.bindings {
            let channel = InputChannel::parse(selector)?;
            for entry in entries.entries() {
                bindings.push(entry.to_binding(selector, channel)?);
            }
        }
        Ok(bindings)
    }

    /// Session settings for this document.
    pub fn session_config(&self) -> Result<SessionConfig> {
        let spatial = self.spatial.unwrap_or(SpatialConfig {
            deadzone: self.deadzone,
            ..SpatialConfig::default()
        });
        Ok(SessionConfig {
            poll_rate: self.poll_rate,
            deadzone: self.deadzone,
            spatial,
            spatial_mode: self.spatial_mode,
            status_colors: self.status_colors,
            bindings: self.to_bindings()?,
            ..SessionConfig::default()
        })
    }
}

impl BindingEntry {
    fn to_binding(&self, selector: &str, channel: InputChannel) -> Result<Binding> {
        let trigger = TriggerKind::from_name(&self.trigger).ok_or_else(|| {
            Error::Config(format!(
                "binding '{selector}': unknown trigger '{}'",
                self.trigger
            ))
        })?;

        let mut actions = Vec::new();
        if let Some(command) = &self.command {
            actions.push(Action::Shell {
                command: command.clone(),
            });
        }
        if let Some(http) = &self.http {
            actions.push(Action::Http {
                method: http.method.to_uppercase(),
                path: http.path.clone(),
                body: http.body.clone(),
                headers: http.headers.clone(),
            });
        }
        if let Some(ws) = &self.websocket {
            actions.push(Action::WebSocket {
                message: ws.message.clone(),
                binary: ws.binary,
            });
        }
        if actions.len() != 1 {
            return Err(Error::Config(format!(
                "binding '{selector}': expected exactly one of command, http, websocket (found {})",
                actions.len()
            )));
        }
        let action = actions.remove(0);

        let mut binding = Binding::new(channel, trigger, action)?;
        if let Some(ms) = self.repeat_ms {
            if ms == 0 {
                return Err(Error::Config(format!(
                    "binding '{selector}': repeat_ms must be positive"
                )));
            }
            binding = binding.with_repeat(Duration::from_millis(ms));
        }
        if let Some(ms) = self.debounce_ms {
            binding = binding.with_debounce(Duration::from_millis(ms));
        }
        if let Some(threshold) = self.threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(Error::Config(format!(
                    "binding '{selector}': threshold must be in 0.0..=1.0, got {threshold}"
                )));
            }
            binding = binding.with_threshold(threshold);
        }
        Ok(binding.with_feedback(Feedback {
            rumble: self.rumble,
            light_bar: self.led,
        }))
    }
}
