//! Device session: owns one transport and runs the poll loop.
//!
//! The poll thread is the only code that touches the HID handle. Reads,
//! output writes, reconnects and timed rumble stops all happen on it, so
//! reads and writes never interleave. Callers talk to it through
//! [`SessionHandle`]:
//!
//! - output changes travel over a command channel and are applied between
//!   reads;
//! - controller and spatial snapshots are published through `watch`
//!   channels (latest value wins, the poll thread never waits on readers);
//! - connect/disconnect events fan out over unbounded channels, one per
//!   subscriber, so every subscriber sees every event;
//! - fired bindings go to a bounded [`DispatchQueue`] that drops the oldest
//!   entry when full;
//! - optional status colors take over the light bar on connect, after a
//!   stretch without input, and when the controller is lost.

use crate::binding::Binding;
use crate::comm::{self, Backoff, BackoffConfig, ErrorClass, MAX_RETRIES};
use crate::dispatch::{ActionExecutor, DispatchQueue, DispatchWorkers, DrainPolicy, Enqueued, DEFAULT_QUEUE_CAPACITY};
use crate::error::{Error, Result};
use crate::mapper::{self, BindingMapper};
use crate::output::{self, LightBar, OutputState, PlayerIndicator, Rumble, TriggerEffectConfig, TriggerSide};
use crate::profile::Profile;
use crate::report::{self, TransportKind};
use crate::safety;
use crate::spatial::{SpatialConfig, SpatialEstimator, SpatialMode, SpatialState};
use crate::state::ControllerState;
use crate::transport::{Connector, DeviceConnector, HidTransport};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

/// Reports drained per tick after the first blocking read.
const MAX_DRAIN: usize = 64;

/// Largest report either transport produces, with headroom.
const READ_BUF_LEN: usize = 128;

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Polling,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Polling => "polling",
        })
    }
}

/// Discrete session notifications.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged { from: SessionState, to: SessionState },
    Connected { transport: TransportKind },
    Disconnected { reason: String },
    ReconnectScheduled { attempt: u32, delay_ms: u64 },
    WriteDiscarded { reason: String },
    /// A recoverable fault: checksum mismatches, dropped dispatches.
    Warning { message: String },
    Stopped,
}

/// What to do with an output change issued while disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// Hold the change and apply it on reconnect, unless `max_wait` passes first.
    QueueUntilConnected { max_wait: Duration },
    /// Drop the change immediately.
    Discard,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self::QueueUntilConnected {
            max_wait: Duration::from_secs(5),
        }
    }
}

/// Light bar colors that follow the connection state. A color left unset
/// leaves the light bar as the caller last set it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusColors {
    /// Shown on every connect.
    pub connected: Option<LightBar>,
    /// Shown after `idle_after` without input changes.
    pub idle: Option<LightBar>,
    /// Written as the controller is dropped, if it still accepts writes.
    pub error: Option<LightBar>,
    #[serde(rename = "idle_after_ms", with = "comm::millis")]
    pub idle_after: Duration,
}

impl Default for StatusColors {
    fn default() -> Self {
        Self {
            connected: None,
            idle: None,
            error: None,
            idle_after: Duration::from_secs(30),
        }
    }
}

/// A published value tagged with time since session start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Timestamped<T> {
    /// Monotonic, since the session started.
    #[serde(with = "comm::millis")]
    pub timestamp: Duration,
    /// Publication counter, starting at 1.
    pub seq: u64,
    pub value: T,
}

/// Session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Poll rate in Hz.
    pub poll_rate: u32,
    /// No input for this long while polling counts as a disconnect.
    pub stall_timeout: Duration,
    pub backoff: BackoffConfig,
    pub queue_capacity: usize,
    pub write_policy: WritePolicy,
    pub deadzone: f32,
    pub spatial: SpatialConfig,
    pub spatial_mode: SpatialMode,
    pub status_colors: StatusColors,
    pub bindings: Vec<Binding>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_rate: safety::POLL_RATE_DEFAULT,
            stall_timeout: Duration::from_secs(1),
            backoff: BackoffConfig::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            write_policy: WritePolicy::default(),
            deadzone: 0.1,
            spatial: SpatialConfig::default(),
            spatial_mode: SpatialMode::default(),
            status_colors: StatusColors::default(),
            bindings: Vec::new(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        safety::validate_poll_rate(self.poll_rate)?;
        safety::validate_deadzone(self.deadzone)?;
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be positive".into()));
        }
        if self.stall_timeout.is_zero() {
            return Err(Error::Config("stall_timeout must be positive".into()));
        }
        if self.status_colors.idle.is_some() && self.status_colors.idle_after.is_zero() {
            return Err(Error::Config("status_colors.idle_after_ms must be positive".into()));
        }
        Ok(())
    }

    /// Time between poll ticks.
    pub fn poll_period(&self) -> Duration {
        Duration::from_secs(1) / self.poll_rate.max(1)
    }
}

/// Counters since the session started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub frames_decoded: u64,
    pub malformed_frames: u64,
    pub checksum_mismatches: u64,
    pub dispatch_drops: u64,
    pub render_failures: u64,
    pub reconnects: u64,
    pub writes: u64,
    pub writes_discarded: u64,
}

#[derive(Default)]
struct Counters {
    frames_decoded: AtomicU64,
    malformed_frames: AtomicU64,
    checksum_mismatches: AtomicU64,
    render_failures: AtomicU64,
    reconnects: AtomicU64,
    writes: AtomicU64,
    writes_discarded: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Subscribers for discrete events.
#[derive(Default)]
struct EventBus {
    subscribers: Mutex<Vec<Sender<SessionEvent>>>,
}

impl EventBus {
    fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(tx);
        rx
    }

    fn emit(&self, event: SessionEvent) {
        debug!(?event, "session event");
        self.subscribers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// A change to the controller's outputs.
#[derive(Debug, Clone)]
enum OutputChange {
    LightBar(LightBar),
    Player(PlayerIndicator),
    Trigger(TriggerSide, TriggerEffectConfig),
    Rumble(Rumble, Option<Duration>),
    Profile(Profile),
}

enum Command {
    Output {
        change: OutputChange,
        policy: WritePolicy,
        issued: Instant,
    },
    SetBindings(Vec<Binding>),
}

/// Handle to a running session. Dropping it stops the poll loop.
pub struct SessionHandle {
    commands: Sender<Command>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    state_rx: watch::Receiver<Option<Timestamped<ControllerState>>>,
    spatial_rx: watch::Receiver<Option<Timestamped<SpatialState>>>,
    status_rx: watch::Receiver<SessionState>,
    events: Arc<EventBus>,
    estimator: Arc<SpatialEstimator>,
    queue: DispatchQueue,
    counters: Arc<Counters>,
    output: Arc<Mutex<OutputState>>,
    write_policy: Mutex<WritePolicy>,
    workers: Mutex<Option<DispatchWorkers>>,
}

/// Open the controller at `index` in enumeration order and start polling it.
pub fn connect(index: usize, config: SessionConfig) -> Result<SessionHandle> {
    SessionHandle::start(Box::new(DeviceConnector::by_index(index)), config)
}

impl SessionHandle {
    /// Connect once and start the poll thread.
    ///
    /// Fails if the first connect fails; later disconnects are retried in
    /// the background.
    pub fn start(connector: Box<dyn Connector>, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let transport = connector.connect()?;
        info!(device = %connector.describe(), transport = %transport.kind(), "Session starting");

        let estimator = Arc::new(SpatialEstimator::new(config.spatial));
        estimator.set_mode(config.spatial_mode);

        let queue = DispatchQueue::new(config.queue_capacity);
        let (command_tx, command_rx) = unbounded();
        let (state_tx, state_rx) = watch::channel(None);
        let (spatial_tx, spatial_rx) = watch::channel(None);
        let (status_tx, status_rx) = watch::channel(SessionState::Connecting);
        let stop = Arc::new(AtomicBool::new(false));
        let events = Arc::new(EventBus::default());
        let counters = Arc::new(Counters::default());
        let output = Arc::new(Mutex::new(OutputState::default()));
        let now = Instant::now();

        let mut poll = PollLoop {
            connector,
            transport: None,
            kind: transport.kind(),
            period: config.poll_period(),
            stall_timeout: config.stall_timeout,
            imu_scale: config.spatial.imu_scale,
            mapper: BindingMapper::new(config.bindings.clone(), config.deadzone),
            estimator: Arc::clone(&estimator),
            queue: queue.clone(),
            commands: command_rx,
            stop: Arc::clone(&stop),
            state_tx,
            spatial_tx,
            status_tx,
            events: Arc::clone(&events),
            counters: Arc::clone(&counters),
            output: OutputState::default(),
            output_mirror: Arc::clone(&output),
            output_seq: 0,
            release_light_bar: false,
            dirty: false,
            colors: config.status_colors,
            status_light: None,
            resume_light: None,
            idle: false,
            last_activity: now,
            last_input: None,
            pending: VecDeque::new(),
            rumble_until: None,
            backoff: Backoff::new(config.backoff),
            next_attempt: None,
            last_frame: now,
            epoch: now,
            published: 0,
        };
        poll.on_connected(transport, now, false);

        let thread = std::thread::Builder::new()
            .name("dualsense-poll".into())
            .spawn(move || poll.run())
            .map_err(|e| Error::Hid(format!("failed to spawn poll thread: {e}")))?;

        Ok(Self {
            commands: command_tx,
            stop,
            thread: Some(thread),
            state_rx,
            spatial_rx,
            status_rx,
            events,
            estimator,
            queue,
            counters,
            output,
            write_policy: Mutex::new(config.write_policy),
            workers: Mutex::new(None),
        })
    }

    /// Latest controller state; `None` until the first frame.
    pub fn subscribe_state(&self) -> watch::Receiver<Option<Timestamped<ControllerState>>> {
        self.state_rx.clone()
    }

    /// Latest spatial state; `None` until the first frame.
    pub fn subscribe_spatial(&self) -> watch::Receiver<Option<Timestamped<SpatialState>>> {
        self.spatial_rx.clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionState> {
        self.status_rx.clone()
    }

    /// Every event from now on, in order.
    pub fn subscribe_events(&self) -> Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn latest_state(&self) -> Option<Timestamped<ControllerState>> {
        *self.state_rx.borrow()
    }

    pub fn latest_spatial(&self) -> Option<Timestamped<SpatialState>> {
        *self.spatial_rx.borrow()
    }

    pub fn state(&self) -> SessionState {
        *self.status_rx.borrow()
    }

    pub fn set_light_bar(&self, r: u8, g: u8, b: u8) -> Result<()> {
        self.send_output(OutputChange::LightBar(LightBar { r, g, b }))
    }

    pub fn set_player_indicator(&self, pattern: PlayerIndicator) -> Result<()> {
        pattern.mask()?;
        self.send_output(OutputChange::Player(pattern))
    }

    pub fn set_trigger_effect(&self, side: TriggerSide, effect: TriggerEffectConfig) -> Result<()> {
        safety::validate_trigger_effect(&effect)?;
        self.send_output(OutputChange::Trigger(side, effect))
    }

    /// Set motor strengths. With a `duration`, the motors stop on their own
    /// once it elapses.
    pub fn set_rumble(&self, left: u8, right: u8, duration: Option<Duration>) -> Result<()> {
        self.send_output(OutputChange::Rumble(Rumble { left, right }, duration))
    }

    /// Apply a profile's light bar, player LEDs, triggers and rumble
    /// intensity in one output report.
    pub fn load_profile(&self, profile: &Profile) -> Result<()> {
        info!(profile = profile.name(), "Loading profile");
        self.send_output(OutputChange::Profile(profile.clone()))
    }

    pub fn reset_spatial(&self) {
        self.estimator.reset();
    }

    pub fn set_spatial_mode(&self, mode: SpatialMode) {
        self.estimator.set_mode(mode);
    }

    pub fn spatial_mode(&self) -> SpatialMode {
        self.estimator.mode()
    }

    /// Current estimator output, including a reset not yet followed by input.
    pub fn spatial_snapshot(&self) -> SpatialState {
        self.estimator.snapshot()
    }

    /// Replace the binding list. Transition tracking restarts.
    pub fn set_bindings(&self, bindings: Vec<Binding>) -> Result<()> {
        self.send(Command::SetBindings(bindings))
    }

    /// Policy for output changes issued while disconnected.
    pub fn set_write_policy(&self, policy: WritePolicy) {
        *self.write_policy.lock().unwrap_or_else(|p| p.into_inner()) = policy;
    }

    /// Output state as last applied by the poll thread.
    pub fn output_state(&self) -> OutputState {
        *self.output.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn dispatch_queue(&self) -> &DispatchQueue {
        &self.queue
    }

    /// Start `workers` threads executing queued actions. Replaces any
    /// previously spawned pool, draining it first.
    pub fn spawn_executors(&self, executor: Arc<dyn ActionExecutor>, workers: usize) {
        let pool = DispatchWorkers::spawn(&self.queue, executor, workers);
        let previous = self
            .workers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .replace(pool);
        if let Some(previous) = previous {
            previous.stop(DrainPolicy::Drain);
        }
    }

    /// Block until the poll thread has written more than `after` reports in
    /// total, returning the new total.
    pub fn wait_for_write(&self, after: u64, timeout: Duration) -> Result<u64> {
        let deadline = Instant::now() + timeout;
        loop {
            let writes = self.counters.writes.load(Ordering::Relaxed);
            if writes > after {
                return Ok(writes);
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "no output report written within {} ms",
                    timeout.as_millis()
                )));
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    pub fn stats(&self) -> SessionStats {
        let c = &self.counters;
        SessionStats {
            frames_decoded: c.frames_decoded.load(Ordering::Relaxed),
            malformed_frames: c.malformed_frames.load(Ordering::Relaxed),
            checksum_mismatches: c.checksum_mismatches.load(Ordering::Relaxed),
            dispatch_drops: self.queue.dropped(),
            render_failures: c.render_failures.load(Ordering::Relaxed),
            reconnects: c.reconnects.load(Ordering::Relaxed),
            writes: c.writes.load(Ordering::Relaxed),
            writes_discarded: c.writes_discarded.load(Ordering::Relaxed),
        }
    }

    /// Stop polling, then drain or discard pending dispatches.
    pub fn stop(mut self, policy: DrainPolicy) {
        self.join_poll_thread();
        let workers = self
            .workers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        match workers {
            Some(pool) => pool.stop(policy),
            None => {
                if policy == DrainPolicy::Discard {
                    self.queue.clear();
                }
            }
        }
        info!(stats = ?self.stats(), "Session stopped");
    }

    fn join_poll_thread(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("poll thread panicked");
            }
        }
    }

    fn send_output(&self, change: OutputChange) -> Result<()> {
        let policy = *self.write_policy.lock().unwrap_or_else(|p| p.into_inner());
        self.send(Command::Output {
            change,
            policy,
            issued: Instant::now(),
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::SessionClosed)
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.join_poll_thread();
    }
}

/// State owned by the poll thread.
struct PollLoop {
    connector: Box<dyn Connector>,
    transport: Option<Box<dyn HidTransport>>,
    kind: TransportKind,
    period: Duration,
    stall_timeout: Duration,
    imu_scale: report::ImuScale,
    mapper: BindingMapper,
    estimator: Arc<SpatialEstimator>,
    queue: DispatchQueue,
    commands: Receiver<Command>,
    stop: Arc<AtomicBool>,
    state_tx: watch::Sender<Option<Timestamped<ControllerState>>>,
    spatial_tx: watch::Sender<Option<Timestamped<SpatialState>>>,
    status_tx: watch::Sender<SessionState>,
    events: Arc<EventBus>,
    counters: Arc<Counters>,
    output: OutputState,
    output_mirror: Arc<Mutex<OutputState>>,
    output_seq: u8,
    release_light_bar: bool,
    dirty: bool,
    colors: StatusColors,
    /// Status color shown over `output.light_bar`.
    status_light: Option<LightBar>,
    /// Status color to restore when input resumes after idling.
    resume_light: Option<LightBar>,
    idle: bool,
    last_activity: Instant,
    last_input: Option<ControllerState>,
    pending: VecDeque<(OutputChange, Instant)>,
    rumble_until: Option<Instant>,
    backoff: Backoff,
    next_attempt: Option<Instant>,
    last_frame: Instant,
    epoch: Instant,
    published: u64,
}

impl PollLoop {
    fn run(mut self) {
        debug!(period_us = self.period.as_micros() as u64, "poll loop running");
        let mut buf = [0u8; READ_BUF_LEN];

        while !self.stop.load(Ordering::Acquire) {
            let tick = Instant::now();
            self.handle_commands(tick);
            self.expire_pending(tick);

            if self.transport.is_none() {
                self.try_reconnect(tick);
                if self.transport.is_none() {
                    let wait = self
                        .next_attempt
                        .map(|t| t.saturating_duration_since(Instant::now()))
                        .unwrap_or(self.period)
                        .min(self.period);
                    std::thread::sleep(wait);
                    continue;
                }
            }

            self.poll_once(&mut buf);
            let now = Instant::now();
            self.check_rumble_timer(now);
            self.check_idle(now);
            self.flush_output();

            let elapsed = tick.elapsed();
            if elapsed < self.period {
                std::thread::sleep(self.period - elapsed);
            }
        }

        self.transport = None;
        self.set_status(SessionState::Disconnected);
        self.events.emit(SessionEvent::Stopped);
        debug!("poll loop exited");
    }

    /// One blocking read, then whatever else is already buffered.
    fn poll_once(&mut self, buf: &mut [u8]) {
        let mut frames = Vec::new();
        let mut failure = None;

        if let Some(transport) = self.transport.as_deref() {
            match transport.read_timeout(buf, self.period) {
                Ok(0) => {}
                Ok(n) => {
                    frames.push(buf[..n].to_vec());
                    for _ in 0..MAX_DRAIN {
                        match transport.read_timeout(buf, Duration::ZERO) {
                            Ok(0) => break,
                            Ok(n) => frames.push(buf[..n].to_vec()),
                            Err(e) => {
                                failure = Some(e);
                                break;
                            }
                        }
                    }
                }
                Err(e) => failure = Some(e),
            }
        }

        let now = Instant::now();
        if !frames.is_empty() {
            self.last_frame = now;
            self.process_frames(&frames, now);
        }

        if let Some(e) = failure {
            let class = ErrorClass::classify(&e);
            if class.needs_reconnect() {
                self.disconnect(e.to_string(), now);
                return;
            }
            debug!(?class, error = %e, "read error, continuing");
        }

        if now.duration_since(self.last_frame) > self.stall_timeout {
            let reason = Error::TransportDisconnected(format!(
                "no input for {} ms",
                self.stall_timeout.as_millis()
            ));
            self.disconnect(reason.to_string(), now);
        }
    }

    fn process_frames(&mut self, frames: &[Vec<u8>], now: Instant) {
        let mut decoded = Vec::with_capacity(frames.len());
        let mut mismatches = 0u32;
        let mut last_mismatch = None;
        for raw in frames {
            match report::decode_with_scale(raw, self.kind, &self.imu_scale) {
                Ok(report) => {
                    if let Some(err) = report.checksum_warning() {
                        bump(&self.counters.checksum_mismatches);
                        warn!(error = %err, "Bluetooth report checksum mismatch");
                        mismatches += 1;
                        last_mismatch = Some(err);
                    }
                    bump(&self.counters.frames_decoded);
                    decoded.push(report.state);
                }
                Err(e) => {
                    bump(&self.counters.malformed_frames);
                    debug!(error = %e, len = raw.len(), "frame dropped");
                }
            }
        }

        // One warning per tick, however many frames failed
        if let Some(err) = last_mismatch {
            let message = match mismatches {
                1 => err.to_string(),
                n => format!("{err} ({n} frames)"),
            };
            self.events.emit(SessionEvent::Warning { message });
        }

        let Some(latest) = decoded.last().copied() else {
            return;
        };
        let spatial = self.estimator.update(&latest, now);

        let mut dropped = 0u64;
        let mut feedback = Vec::new();
        let mut active = false;
        for state in &decoded {
            if let Some(previous) = &self.last_input {
                active |= mapper::input_changed(previous, state, self.mapper.deadzone());
            }
            self.last_input = Some(*state);

            for request in self.mapper.process_at(state, &spatial, now) {
                let fired = self.mapper.bindings()[request.binding].feedback;
                if !fired.is_empty() {
                    feedback.push(fired);
                }
                if self.queue.push(request) == Enqueued::DroppedOldest {
                    dropped += 1;
                }
            }
        }
        self.counters
            .render_failures
            .store(self.mapper.render_failures(), Ordering::Relaxed);

        if dropped > 0 {
            trace!(dropped = self.queue.dropped(), "dispatch queue full");
            let err = Error::ActionQueueFull {
                capacity: self.queue.capacity(),
                dropped,
            };
            self.events.emit(SessionEvent::Warning {
                message: err.to_string(),
            });
        }
        for fired in feedback {
            if let Some(rumble) = fired.rumble {
                let motors = Rumble {
                    left: rumble.left,
                    right: rumble.right,
                };
                self.apply_change(OutputChange::Rumble(motors, Some(rumble.duration())), now);
            }
            if let Some(color) = fired.light_bar {
                self.apply_change(OutputChange::LightBar(color), now);
            }
        }
        if active {
            self.note_activity(now);
        }

        self.published += 1;
        let timestamp = now.duration_since(self.epoch);
        self.state_tx.send_replace(Some(Timestamped {
            timestamp,
            seq: self.published,
            value: latest,
        }));
        self.spatial_tx.send_replace(Some(Timestamped {
            timestamp,
            seq: self.published,
            value: spatial,
        }));
    }

    fn handle_commands(&mut self, now: Instant) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::SetBindings(bindings) => self.mapper.set_bindings(bindings),
                Command::Output {
                    change,
                    policy,
                    issued,
                } => {
                    if self.transport.is_some() {
                        self.apply_change(change, now);
                        continue;
                    }
                    match policy {
                        WritePolicy::Discard => {
                            self.discard_write("controller disconnected");
                        }
                        WritePolicy::QueueUntilConnected { max_wait } => {
                            debug!(?change, "output change queued until reconnect");
                            self.pending.push_back((change, issued + max_wait));
                        }
                    }
                }
            }
        }
    }

    fn expire_pending(&mut self, now: Instant) {
        let before = self.pending.len();
        self.pending.retain(|(_, deadline)| *deadline > now);
        for _ in self.pending.len()..before {
            self.discard_write("still disconnected after max wait");
        }
    }

    fn discard_write(&self, reason: &str) {
        bump(&self.counters.writes_discarded);
        warn!(reason, "output change discarded");
        self.events.emit(SessionEvent::WriteDiscarded {
            reason: reason.into(),
        });
    }

    fn apply_change(&mut self, change: OutputChange, now: Instant) {
        match change {
            OutputChange::LightBar(light_bar) => {
                self.output.light_bar = light_bar;
                self.clear_status_light();
            }
            OutputChange::Player(player) => self.output.player = player,
            OutputChange::Trigger(side, effect) => self.output.set_trigger(side, effect),
            OutputChange::Rumble(rumble, duration) => {
                self.output.rumble = rumble;
                self.rumble_until = duration.map(|d| now + d);
            }
            OutputChange::Profile(profile) => {
                let rumble = self.output.rumble;
                self.output = profile.to_output_state();
                self.output.rumble = rumble;
                self.clear_status_light();
            }
        }
        self.mark_dirty();
    }

    /// An explicit light bar color replaces any status color.
    fn clear_status_light(&mut self) {
        self.status_light = None;
        self.resume_light = None;
    }

    /// Output as the controller shows it: caller state plus any status color.
    fn shown_output(&self) -> OutputState {
        let mut state = self.output;
        if let Some(color) = self.status_light {
            state.light_bar = color;
        }
        state
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
        *self.output_mirror.lock().unwrap_or_else(|p| p.into_inner()) = self.shown_output();
    }

    fn check_rumble_timer(&mut self, now: Instant) {
        if self.rumble_until.is_some_and(|until| now >= until) {
            self.rumble_until = None;
            self.output.rumble = Rumble::default();
            self.mark_dirty();
            debug!("timed rumble stopped");
        }
    }

    fn check_idle(&mut self, now: Instant) {
        let Some(color) = self.colors.idle else {
            return;
        };
        if self.idle || self.transport.is_none() {
            return;
        }
        if now.saturating_duration_since(self.last_activity) >= self.colors.idle_after {
            self.idle = true;
            self.resume_light = self.status_light;
            self.status_light = Some(color);
            self.mark_dirty();
            debug!(idle_ms = self.colors.idle_after.as_millis() as u64, "controller idle");
        }
    }

    fn note_activity(&mut self, now: Instant) {
        self.last_activity = now;
        if self.idle {
            self.idle = false;
            self.status_light = self.resume_light.take();
            self.mark_dirty();
            debug!("controller active");
        }
    }

    fn flush_output(&mut self) {
        if !self.dirty {
            return;
        }
        let Some(transport) = self.transport.as_deref() else {
            return;
        };

        let mut state = self.shown_output();
        state.release_light_bar = self.release_light_bar;
        let report = match output::encode(&state, self.kind, self.output_seq) {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "output state failed to encode");
                self.dirty = false;
                return;
            }
        };

        match comm::write_with_retry(transport, &report, MAX_RETRIES) {
            Ok(_) => {
                bump(&self.counters.writes);
                self.output_seq = (self.output_seq + 1) & 0x0F;
                self.release_light_bar = false;
                self.dirty = false;
            }
            Err(e) => {
                if ErrorClass::classify(&e).needs_reconnect() {
                    self.disconnect(e.to_string(), Instant::now());
                }
            }
        }
    }

    fn on_connected(&mut self, transport: Box<dyn HidTransport>, now: Instant, reconnect: bool) {
        self.kind = transport.kind();
        self.transport = Some(transport);
        self.backoff.reset();
        self.next_attempt = None;
        self.last_frame = now;
        if reconnect {
            bump(&self.counters.reconnects);
        }
        info!(transport = %self.kind, reconnect, "Controller connected");
        self.set_status(SessionState::Polling);
        self.events.emit(SessionEvent::Connected {
            transport: self.kind,
        });

        self.idle = false;
        self.last_activity = now;
        self.last_input = None;
        self.resume_light = None;
        self.status_light = self.colors.connected;

        for (change, _) in std::mem::take(&mut self.pending) {
            self.apply_change(change, now);
        }
        self.release_light_bar = true;
        self.mark_dirty();
        self.flush_output();
    }

    fn disconnect(&mut self, reason: String, now: Instant) {
        let Some(transport) = self.transport.take() else {
            return;
        };
        if let Some(color) = self.colors.error {
            self.resume_light = None;
            self.status_light = Some(color);
            self.mark_dirty();
            self.write_once(transport.as_ref());
        }
        drop(transport);
        self.mapper.clear_previous();
        warn!(reason = %reason, "Controller disconnected");
        self.set_status(SessionState::Disconnected);
        self.events.emit(SessionEvent::Disconnected { reason });
        self.schedule_reconnect(now);
    }

    /// Single best-effort write of the shown output, used while tearing the
    /// transport down. The full state is re-sent on the next connect anyway.
    fn write_once(&mut self, transport: &dyn HidTransport) {
        let report = match output::encode(&self.shown_output(), self.kind, self.output_seq) {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "output state failed to encode");
                return;
            }
        };
        match transport.write(&report) {
            Ok(_) => {
                bump(&self.counters.writes);
                self.output_seq = (self.output_seq + 1) & 0x0F;
            }
            Err(e) => debug!(error = %e, "status color not written"),
        }
    }

    fn schedule_reconnect(&mut self, now: Instant) {
        let delay = self.backoff.next_delay();
        self.next_attempt = Some(now + delay);
        self.events.emit(SessionEvent::ReconnectScheduled {
            attempt: self.backoff.attempts(),
            delay_ms: delay.as_millis() as u64,
        });
    }

    fn try_reconnect(&mut self, now: Instant) {
        if self.next_attempt.is_some_and(|at| now < at) {
            return;
        }
        self.set_status(SessionState::Connecting);
        match self.connector.connect() {
            Ok(transport) => self.on_connected(transport, now, true),
            Err(e) => {
                debug!(device = %self.connector.describe(), error = %e, "reconnect failed");
                self.set_status(SessionState::Disconnected);
                self.schedule_reconnect(now);
            }
        }
    }

    fn set_status(&self, to: SessionState) {
        let from = *self.status_tx.borrow();
        if from != to {
            self.status_tx.send_replace(to);
            self.events.emit(SessionEvent::StateChanged { from, to });
        }
    }
}
