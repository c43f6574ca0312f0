//! Binding mapper: diffs consecutive controller samples against the active
//! bindings and renders the actions that fire.

use crate::binding::{AxisId, Binding, InputChannel, TriggerKind};
use crate::dispatch::DispatchRequest;
use crate::spatial::SpatialState;
use crate::state::ControllerState;
use crate::template::{Snapshot, TemplateSet};
use std::time::Instant;
use tracing::{debug, warn};

/// Smallest axis delta that counts as a change.
pub const CHANGE_EPSILON: f32 = 0.02;

#[derive(Debug, Clone, Copy, Default)]
struct FireState {
    last_fired: Option<Instant>,
    /// Next time a hold binding may fire; `Some` only while active.
    next_hold: Option<Instant>,
}

/// Stateful edge/level detector over a list of bindings.
pub struct BindingMapper {
    bindings: Vec<Binding>,
    /// Action templates compiled under each binding's index.
    templates: TemplateSet,
    fire: Vec<FireState>,
    previous: Option<ControllerState>,
    deadzone: f32,
    render_failures: u64,
}

impl BindingMapper {
    pub fn new(bindings: Vec<Binding>, deadzone: f32) -> Self {
        let fire = vec![FireState::default(); bindings.len()];
        Self {
            templates: compile(&bindings),
            bindings,
            fire,
            previous: None,
            deadzone,
            render_failures: 0,
        }
    }

    /// Swap the active bindings. The next sample is treated as a first frame.
    pub fn set_bindings(&mut self, bindings: Vec<Binding>) {
        debug!(count = bindings.len(), "bindings replaced");
        self.fire = vec![FireState::default(); bindings.len()];
        self.templates = compile(&bindings);
        self.bindings = bindings;
        self.previous = None;
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn deadzone(&self) -> f32 {
        self.deadzone
    }

    /// Forget the previous sample, e.g. after a reconnect.
    pub fn clear_previous(&mut self) {
        self.previous = None;
        for slot in &mut self.fire {
            slot.next_hold = None;
        }
    }

    /// Templates that failed to render so far.
    pub fn render_failures(&self) -> u64 {
        self.render_failures
    }

    pub fn process(&mut self, state: &ControllerState, spatial: &SpatialState) -> Vec<DispatchRequest> {
        self.process_at(state, spatial, Instant::now())
    }

    /// Classify transitions against the previous sample and render every
    /// binding that fires. The first sample after start only primes the
    /// detector and never fires.
    pub fn process_at(
        &mut self,
        state: &ControllerState,
        spatial: &SpatialState,
        now: Instant,
    ) -> Vec<DispatchRequest> {
        let Some(previous) = self.previous.replace(*state) else {
            return Vec::new();
        };

        let mut requests = Vec::new();
        let mut snapshot: Option<Snapshot> = None;

        for (index, binding) in self.bindings.iter().enumerate() {
            let slot = &mut self.fire[index];
            if !fires(binding, slot, &previous, state, self.deadzone, now) {
                continue;
            }
            if let Some(last) = slot.last_fired {
                if now.saturating_duration_since(last) < binding.debounce {
                    continue;
                }
            }

            let snap = snapshot.get_or_insert_with(|| Snapshot::capture(state, spatial, self.deadzone));
            match binding.action.render(&index.to_string(), &self.templates, snap) {
                Ok(action) => {
                    slot.last_fired = Some(now);
                    debug!(
                        binding = index,
                        channel = %binding.channel,
                        trigger = ?binding.trigger,
                        action = action.kind(),
                        "binding fired"
                    );
                    requests.push(DispatchRequest {
                        binding: index,
                        channel: binding.channel,
                        trigger: binding.trigger,
                        action,
                        sequence: state.sequence,
                    });
                }
                Err(e) => {
                    self.render_failures += 1;
                    warn!(binding = index, channel = %binding.channel, error = %e, "action skipped");
                }
            }
        }

        requests
    }
}

/// Register every binding's templates under its index. A binding whose
/// templates fail to compile is left out and counts as a render failure
/// each time it fires.
fn compile(bindings: &[Binding]) -> TemplateSet {
    let mut templates = TemplateSet::new();
    for (index, binding) in bindings.iter().enumerate() {
        if let Err(e) = binding.action.register_templates(&index.to_string(), &mut templates) {
            warn!(binding = index, channel = %binding.channel, error = %e, "action template rejected");
        }
    }
    templates
}

/// Whether `binding` fires for the `previous` → `current` transition.
/// Updates the hold schedule in `slot`.
fn fires(
    binding: &Binding,
    slot: &mut FireState,
    previous: &ControllerState,
    current: &ControllerState,
    deadzone: f32,
    now: Instant,
) -> bool {
    let was = is_active(binding, previous, deadzone);
    let is = is_active(binding, current, deadzone);

    match binding.trigger {
        TriggerKind::Press => !was && is,
        TriggerKind::Release => was && !is,
        TriggerKind::Hold => {
            if !is {
                slot.next_hold = None;
                return false;
            }
            let due = *slot.next_hold.get_or_insert(now + binding.repeat);
            if now >= due {
                slot.next_hold = Some(now + binding.repeat);
                true
            } else {
                false
            }
        }
        TriggerKind::Change => match binding.channel {
            InputChannel::Button(id) => previous.buttons.get(id) != current.buttons.get(id),
            InputChannel::Axis(axis) => {
                (axis.value(current, deadzone) - axis.value(previous, deadzone)).abs() > CHANGE_EPSILON
            }
            InputChannel::Directed(axis, dir) => {
                let after = dir.along(axis.value(current, deadzone));
                let before = dir.along(axis.value(previous, deadzone));
                (after - before).abs() > CHANGE_EPSILON
            }
            InputChannel::AnyChange => input_changed(previous, current, deadzone),
        },
    }
}

fn is_active(binding: &Binding, state: &ControllerState, deadzone: f32) -> bool {
    match binding.channel {
        InputChannel::Button(id) => state.buttons.get(id),
        InputChannel::Axis(axis) => {
            let value = axis.value(state, deadzone);
            if axis.is_trigger() {
                value >= binding.threshold
            } else {
                value.abs() >= binding.threshold
            }
        }
        InputChannel::Directed(axis, dir) => dir.along(axis.value(state, deadzone)) >= binding.threshold,
        InputChannel::AnyChange => false,
    }
}

/// Buttons, touch, or any axis beyond the epsilon. IMU and counters are ignored.
pub(crate) fn input_changed(previous: &ControllerState, current: &ControllerState, deadzone: f32) -> bool {
    previous.buttons != current.buttons
        || previous.touchpad != current.touchpad
        || AxisId::ALL
            .iter()
            .any(|a| (a.value(current, deadzone) - a.value(previous, deadzone)).abs() > CHANGE_EPSILON)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{Action, Direction};
    use crate::state::{ButtonId, Stick, Triggers};
    use std::time::Duration;

    const FRAME: Duration = Duration::from_millis(10);

    fn binding(channel: InputChannel, trigger: TriggerKind, cmd: &str) -> Binding {
        Binding::new(channel, trigger, Action::shell(cmd)).unwrap()
    }

    fn cross(pressed: bool) -> ControllerState {
        let mut s = ControllerState::default();
        s.buttons.cross = pressed;
        s
    }

    #[test]
    fn press_fires_once_against_released_previous() {
        let mut mapper = BindingMapper::new(
            vec![binding(InputChannel::Button(ButtonId::Cross), TriggerKind::Press, "echo hit")],
            0.1,
        );
        let spatial = SpatialState::default();
        let t0 = Instant::now();

        assert!(mapper.process_at(&cross(false), &spatial, t0).is_empty());
        let out = mapper.process_at(&cross(true), &spatial, t0 + FRAME);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].action, Action::shell("echo hit"));
    }

    #[test]
    fn first_frame_never_fires() {
        let mut mapper = BindingMapper::new(
            vec![binding(InputChannel::Button(ButtonId::Cross), TriggerKind::Press, "x")],
            0.1,
        );
        assert!(mapper.process(&cross(true), &SpatialState::default()).is_empty());
    }

    #[test]
    fn press_fires_once_while_held() {
        let mut mapper = BindingMapper::new(
            vec![binding(InputChannel::Button(ButtonId::Cross), TriggerKind::Press, "x")],
            0.1,
        );
        let spatial = SpatialState::default();
        let t0 = Instant::now();
        mapper.process_at(&cross(false), &spatial, t0);

        let mut fired = 0;
        for i in 1..500 {
            fired += mapper.process_at(&cross(true), &spatial, t0 + FRAME * i).len();
        }
        assert_eq!(fired, 1);
    }

    #[test]
    fn release_fires_on_falling_edge() {
        let mut mapper = BindingMapper::new(
            vec![binding(InputChannel::Button(ButtonId::Cross), TriggerKind::Release, "x")],
            0.1,
        );
        let spatial = SpatialState::default();
        let t0 = Instant::now();
        mapper.process_at(&cross(false), &spatial, t0);
        assert!(mapper.process_at(&cross(true), &spatial, t0 + FRAME).is_empty());
        assert_eq!(mapper.process_at(&cross(false), &spatial, t0 + FRAME * 2).len(), 1);
    }

    #[test]
    fn hold_fires_once_per_repeat_interval() {
        let mut mapper = BindingMapper::new(
            vec![binding(InputChannel::Button(ButtonId::Cross), TriggerKind::Hold, "x")
                .with_repeat(Duration::from_millis(100))],
            0.1,
        );
        let spatial = SpatialState::default();
        let t0 = Instant::now();
        mapper.process_at(&cross(false), &spatial, t0);

        // Pressed at 10 ms, held until 1000 ms: fires at 110, 210, ..., 910 ms
        let mut fired = 0;
        for i in 1..=100 {
            fired += mapper.process_at(&cross(true), &spatial, t0 + FRAME * i).len();
        }
        assert_eq!(fired, 9);

        // Released: never fires
        for i in 101..200 {
            assert!(mapper.process_at(&cross(false), &spatial, t0 + FRAME * i).is_empty());
        }
    }

    #[test]
    fn axis_change_respects_epsilon() {
        let mut mapper = BindingMapper::new(
            vec![binding(InputChannel::Axis(AxisId::R2), TriggerKind::Change, "{{r2_trigger}}")],
            0.1,
        );
        let spatial = SpatialState::default();
        let t0 = Instant::now();
        let r2 = |v: u8| ControllerState {
            triggers: Triggers { l2: 0, r2: v },
            ..ControllerState::default()
        };

        mapper.process_at(&r2(0), &spatial, t0);
        // 3/255 < epsilon
        assert!(mapper.process_at(&r2(3), &spatial, t0 + FRAME).is_empty());
        let out = mapper.process_at(&r2(255), &spatial, t0 + FRAME * 2);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].action, Action::shell("1"));
    }

    /// Undirected stick selectors compare magnitude, so either side fires.
    #[test]
    fn axis_press_uses_magnitude_threshold() {
        let mut mapper = BindingMapper::new(
            vec![binding(InputChannel::Axis(AxisId::LeftStickX), TriggerKind::Press, "x")
                .with_threshold(0.8)],
            0.1,
        );
        let spatial = SpatialState::default();
        let t0 = Instant::now();
        let lx = |x: u8| ControllerState {
            left_stick: Stick { x, y: 128 },
            ..ControllerState::default()
        };
        mapper.process_at(&lx(128), &spatial, t0);
        assert!(mapper.process_at(&lx(180), &spatial, t0 + FRAME).is_empty());
        assert_eq!(mapper.process_at(&lx(0), &spatial, t0 + FRAME * 2).len(), 1);
    }

    #[test]
    fn directed_press_tells_left_from_right() {
        let mut mapper = BindingMapper::new(
            vec![
                binding(
                    InputChannel::Directed(AxisId::LeftStickX, Direction::Negative),
                    TriggerKind::Press,
                    "left",
                )
                .with_threshold(0.8),
                binding(
                    InputChannel::Directed(AxisId::LeftStickX, Direction::Positive),
                    TriggerKind::Press,
                    "right",
                )
                .with_threshold(0.8),
            ],
            0.1,
        );
        let spatial = SpatialState::default();
        let t0 = Instant::now();
        let lx = |x: u8| ControllerState {
            left_stick: Stick { x, y: 128 },
            ..ControllerState::default()
        };

        mapper.process_at(&lx(128), &spatial, t0);
        let out = mapper.process_at(&lx(0), &spatial, t0 + FRAME);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].action, Action::shell("left"));

        mapper.process_at(&lx(128), &spatial, t0 + FRAME * 2);
        let out = mapper.process_at(&lx(255), &spatial, t0 + FRAME * 3);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].action, Action::shell("right"));
    }

    #[test]
    fn directed_up_is_negative_y() {
        let mut mapper = BindingMapper::new(
            vec![binding(
                InputChannel::parse("left_stick_up").unwrap(),
                TriggerKind::Hold,
                "up",
            )
            .with_repeat(Duration::from_millis(50))],
            0.1,
        );
        let spatial = SpatialState::default();
        let t0 = Instant::now();
        let ly = |y: u8| ControllerState {
            left_stick: Stick { x: 128, y },
            ..ControllerState::default()
        };

        mapper.process_at(&ly(128), &spatial, t0);
        // Pushed down for 200 ms: never fires
        for i in 1..=20 {
            assert!(mapper.process_at(&ly(255), &spatial, t0 + FRAME * i).is_empty());
        }
        // Pushed up from 210 ms: fires at 260, 310 ms
        let mut fired = 0;
        for i in 21..=31 {
            fired += mapper.process_at(&ly(0), &spatial, t0 + FRAME * i).len();
        }
        assert_eq!(fired, 2);
    }

    #[test]
    fn debounce_suppresses_rapid_presses() {
        let mut mapper = BindingMapper::new(
            vec![binding(InputChannel::Button(ButtonId::Cross), TriggerKind::Press, "x")
                .with_debounce(Duration::from_millis(100))],
            0.1,
        );
        let spatial = SpatialState::default();
        let t0 = Instant::now();
        mapper.process_at(&cross(false), &spatial, t0);

        let mut fired = 0;
        // Tap every 20 ms for 200 ms
        for i in 1..=20 {
            fired += mapper.process_at(&cross(i % 2 == 1), &spatial, t0 + FRAME * i).len();
        }
        assert_eq!(fired, 2);
    }

    #[test]
    fn render_failure_skips_only_that_binding() {
        let mut mapper = BindingMapper::new(
            vec![
                binding(InputChannel::Button(ButtonId::Cross), TriggerKind::Press, "{{missing}}"),
                binding(InputChannel::Button(ButtonId::Cross), TriggerKind::Press, "ok {{cross}}"),
            ],
            0.1,
        );
        let spatial = SpatialState::default();
        let t0 = Instant::now();
        mapper.process_at(&cross(false), &spatial, t0);
        let out = mapper.process_at(&cross(true), &spatial, t0 + FRAME);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].binding, 1);
        assert_eq!(out[0].action, Action::shell("ok true"));
        assert_eq!(mapper.render_failures(), 1);
    }

    #[test]
    fn any_change_ignores_imu_noise() {
        let mut mapper = BindingMapper::new(
            vec![binding(InputChannel::AnyChange, TriggerKind::Change, "x")],
            0.1,
        );
        let spatial = SpatialState::default();
        let t0 = Instant::now();
        let mut state = ControllerState::default();
        mapper.process_at(&state, &spatial, t0);

        state.gyro.x = 0.3;
        state.sequence = 9;
        assert!(mapper.process_at(&state, &spatial, t0 + FRAME).is_empty());

        state.buttons.triangle = true;
        assert_eq!(mapper.process_at(&state, &spatial, t0 + FRAME * 2).len(), 1);
    }

    #[test]
    fn set_bindings_resets_previous() {
        let mut mapper = BindingMapper::new(Vec::new(), 0.1);
        let spatial = SpatialState::default();
        let t0 = Instant::now();
        mapper.process_at(&cross(false), &spatial, t0);

        mapper.set_bindings(vec![binding(
            InputChannel::Button(ButtonId::Cross),
            TriggerKind::Press,
            "x",
        )]);
        // Would be a press against the old previous sample
        assert!(mapper.process_at(&cross(true), &spatial, t0 + FRAME).is_empty());
    }
}
