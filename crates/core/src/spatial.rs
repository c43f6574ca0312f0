//! Spatial estimator: fuses gyro and accelerometer samples into an
//! orientation, and turns sticks/triggers or inertial data into a position.
//!
//! Axes follow the controller's frame: X right, Y forward, Z up (touchpad
//! facing up when lying flat). At rest the accelerometer reads +1g on Z.
//!
//! All methods take `&self`; an internal lock serializes [`SpatialEstimator::update`]
//! against [`SpatialEstimator::reset`] and [`SpatialEstimator::set_mode`].

use crate::report::ImuScale;
use crate::state::ControllerState;
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use tracing::debug;

/// Standard gravity in mm/s².
const G_MM_PER_S2: f32 = 9806.65;

/// Velocity components below this (mm/s) snap to zero.
const VELOCITY_EPSILON: f32 = 0.1;

/// How controller input is interpreted as motion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpatialMode {
    /// Left stick drives X/Y, trigger differential drives Z.
    #[default]
    Standard,
    /// Gyro yaw integrates a heading; triggers move along it.
    Heading,
    /// Pure inertial integration of gravity-free acceleration.
    Accelerometer,
    /// Plotter layout: right stick X/Y, left stick vertical = force, triggers Z.
    AxiDraw,
    /// Free 3D navigation relative to the current orientation.
    ThreeD,
}

impl SpatialMode {
    pub const ALL: &'static [SpatialMode] = &[
        SpatialMode::Standard,
        SpatialMode::Heading,
        SpatialMode::Accelerometer,
        SpatialMode::AxiDraw,
        SpatialMode::ThreeD,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Heading => "heading",
            Self::Accelerometer => "accelerometer",
            Self::AxiDraw => "axidraw",
            Self::ThreeD => "threed",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "standard" => Some(Self::Standard),
            "heading" => Some(Self::Heading),
            "accelerometer" | "accel" => Some(Self::Accelerometer),
            "axidraw" => Some(Self::AxiDraw),
            "threed" | "3d" => Some(Self::ThreeD),
            _ => None,
        }
    }
}

impl std::fmt::Display for SpatialMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Estimator tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    /// Raw-to-physical IMU conversion.
    pub imu_scale: ImuScale,
    /// Fraction of the gravity tilt error corrected per update.
    pub complementary_gain: f32,
    /// Tilt correction is skipped when `| |a| - 1g |` exceeds this (g).
    pub accel_trust_band: f32,
    /// Linear acceleration below this (g) counts as still.
    pub zupt_threshold: f32,
    /// Consecutive still frames before velocity damping starts.
    pub zupt_frames: u32,
    /// Velocity multiplier per still frame once damping is active.
    pub zupt_damping: f32,
    /// Angular rates below this (rad/s) are treated as zero.
    pub gyro_deadband: f32,
    /// Angular rate (rad/s) below which the controller counts as resting for bias learning.
    pub rest_gyro_threshold: f32,
    /// Blend factor for the gyro bias estimate while resting.
    pub bias_learning_rate: f32,
    /// Full-deflection speed for stick-driven modes (mm/s).
    pub max_linear_speed: f32,
    /// Stick and trigger deadzone.
    pub deadzone: f32,
    /// Low-pass factor toward the target velocity in stick-driven modes.
    pub smoothing_alpha: f32,
    /// Per-frame velocity multiplier when no input is applied.
    pub linear_damping: f32,
    /// Larger time steps (s) are clamped to this.
    pub max_dt: f32,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            imu_scale: ImuScale::default(),
            complementary_gain: 0.02,
            accel_trust_band: 0.15,
            zupt_threshold: 0.05,
            zupt_frames: 10,
            zupt_damping: 0.5,
            gyro_deadband: 0.005,
            rest_gyro_threshold: 0.05,
            bias_learning_rate: 0.01,
            max_linear_speed: 200.0,
            deadzone: 0.12,
            smoothing_alpha: 0.15,
            linear_damping: 0.92,
            max_dt: 0.1,
        }
    }
}

/// Snapshot of the estimator output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpatialState {
    pub mode: SpatialMode,
    /// mm
    pub position: [f32; 3],
    /// mm/s
    pub velocity: [f32; 3],
    /// Gravity removed, in g.
    pub linear_accel: [f32; 3],
    /// Bias-corrected, rad/s.
    pub angular_velocity: [f32; 3],
    /// Unit quaternion relative to the last reset, `[w, x, y, z]`.
    pub orientation: [f32; 4],
    /// Heading angle in radians (Heading mode).
    pub heading: f32,
    /// Scalar force channel in -1.0..=1.0 (AxiDraw mode).
    pub force: f32,
}

impl Default for SpatialState {
    fn default() -> Self {
        Self {
            mode: SpatialMode::default(),
            position: [0.0; 3],
            velocity: [0.0; 3],
            linear_accel: [0.0; 3],
            angular_velocity: [0.0; 3],
            orientation: [1.0, 0.0, 0.0, 0.0],
            heading: 0.0,
            force: 0.0,
        }
    }
}

impl SpatialState {
    pub fn quaternion(&self) -> UnitQuaternion<f32> {
        let [w, x, y, z] = self.orientation;
        UnitQuaternion::new_normalize(Quaternion::new(w, x, y, z))
    }

    /// Roll, pitch, yaw in radians.
    pub fn euler_angles(&self) -> (f32, f32, f32) {
        self.quaternion().euler_angles()
    }
}

struct Inner {
    config: SpatialConfig,
    mode: SpatialMode,
    pending_mode: Option<SpatialMode>,
    attitude: UnitQuaternion<f32>,
    reference: UnitQuaternion<f32>,
    gyro_bias: Vector3<f32>,
    position: Vector3<f32>,
    velocity: Vector3<f32>,
    linear_accel: Vector3<f32>,
    angular_velocity: Vector3<f32>,
    heading: f32,
    force: f32,
    still_frames: u32,
    last_update: Option<Instant>,
}

/// Thread-safe spatial estimator.
pub struct SpatialEstimator {
    inner: Mutex<Inner>,
}

impl Default for SpatialEstimator {
    fn default() -> Self {
        Self::new(SpatialConfig::default())
    }
}

impl SpatialEstimator {
    pub fn new(config: SpatialConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                config,
                mode: SpatialMode::default(),
                pending_mode: None,
                attitude: UnitQuaternion::identity(),
                reference: UnitQuaternion::identity(),
                gyro_bias: Vector3::zeros(),
                position: Vector3::zeros(),
                velocity: Vector3::zeros(),
                linear_accel: Vector3::zeros(),
                angular_velocity: Vector3::zeros(),
                heading: 0.0,
                force: 0.0,
                still_frames: 0,
                last_update: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Advance the estimate by one sample taken at `now`.
    ///
    /// The first call only records the timestamp and returns the zero pose.
    pub fn update(&self, state: &ControllerState, now: Instant) -> SpatialState {
        let mut inner = self.lock();
        if let Some(mode) = inner.pending_mode.take() {
            debug!(from = %inner.mode, to = %mode, "spatial mode switched");
            inner.mode = mode;
        }

        let Some(last) = inner.last_update.replace(now) else {
            return inner.snapshot();
        };
        let dt = now
            .saturating_duration_since(last)
            .as_secs_f32()
            .min(inner.config.max_dt);
        if dt > 0.0 {
            inner.step(state, dt);
        }
        inner.snapshot()
    }

    /// Zero position and velocity and make the current attitude the new
    /// reference. The learned gyro bias is kept.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.position = Vector3::zeros();
        inner.velocity = Vector3::zeros();
        inner.reference = inner.attitude;
        inner.heading = 0.0;
        inner.force = 0.0;
        inner.still_frames = 0;
        debug!("spatial state reset");
    }

    /// Switch interpretation mode; applied at the start of the next update.
    pub fn set_mode(&self, mode: SpatialMode) {
        self.lock().pending_mode = Some(mode);
    }

    /// Active mode, ignoring a switch that has not been applied yet.
    pub fn mode(&self) -> SpatialMode {
        self.lock().mode
    }

    pub fn snapshot(&self) -> SpatialState {
        self.lock().snapshot()
    }

    pub fn gyro_bias(&self) -> [f32; 3] {
        let bias = self.lock().gyro_bias;
        [bias.x, bias.y, bias.z]
    }

    pub fn config(&self) -> SpatialConfig {
        self.lock().config
    }
}

impl Inner {
    fn snapshot(&self) -> SpatialState {
        let q = self.reference.inverse() * self.attitude;
        SpatialState {
            mode: self.mode,
            position: self.position.into(),
            velocity: self.velocity.into(),
            linear_accel: self.linear_accel.into(),
            angular_velocity: self.angular_velocity.into(),
            orientation: [q.w, q.i, q.j, q.k],
            heading: self.heading,
            force: self.force,
        }
    }

    fn step(&mut self, state: &ControllerState, dt: f32) {
        let gyro: Vector3<f32> = state.gyro.into();
        let accel: Vector3<f32> = state.accel.into();
        let accel_norm = accel.norm();

        self.learn_bias(&gyro, accel_norm);

        let deadband = self.config.gyro_deadband;
        let omega = (gyro - self.gyro_bias).map(|w| if w.abs() < deadband { 0.0 } else { w });
        self.angular_velocity = omega;

        self.integrate_attitude(&omega, dt);
        self.correct_tilt(&accel, accel_norm);

        // Accelerometer reads the reaction to gravity: +1g up at rest
        self.linear_accel = self.attitude * accel - Vector3::z();
        if self.linear_accel.norm() < self.config.zupt_threshold {
            self.still_frames = self.still_frames.saturating_add(1);
        } else {
            self.still_frames = 0;
        }

        match self.mode {
            SpatialMode::Accelerometer => self.integrate_inertial(dt),
            SpatialMode::Standard => {
                let (lx, ly) = self.stick(state.left_stick);
                let z = self.trigger_differential(state);
                let target = Vector3::new(lx, ly, z) * self.config.max_linear_speed;
                self.track_velocity(target, dt);
            }
            SpatialMode::Heading => {
                let yaw_rate = (self.attitude * omega).z;
                self.heading = wrap_angle(self.heading + yaw_rate * dt);
                let speed = self.trigger_differential(state) * self.config.max_linear_speed;
                let forward = Vector3::new(-self.heading.sin(), self.heading.cos(), 0.0);
                self.track_velocity(forward * speed, dt);
            }
            SpatialMode::AxiDraw => {
                let (rx, ry) = self.stick(state.right_stick);
                let (_, force) = self.stick(state.left_stick);
                self.force = force;
                let z = self.trigger_differential(state);
                let target = Vector3::new(rx, ry, z) * self.config.max_linear_speed;
                self.track_velocity(target, dt);
            }
            SpatialMode::ThreeD => {
                let q = self.reference.inverse() * self.attitude;
                let (lx, ly) = self.stick(state.left_stick);
                let dolly = self.trigger_differential(state);
                let target = (q * Vector3::x() * lx + q * Vector3::z() * ly + q * Vector3::y() * dolly)
                    * self.config.max_linear_speed;
                self.track_velocity(target, dt);
            }
        }
    }

    fn learn_bias(&mut self, gyro: &Vector3<f32>, accel_norm: f32) {
        let resting = (accel_norm - 1.0).abs() < self.config.zupt_threshold
            && (gyro - self.gyro_bias).norm() < self.config.rest_gyro_threshold;
        if resting {
            let rate = self.config.bias_learning_rate;
            self.gyro_bias += (gyro - self.gyro_bias) * rate;
        }
    }

    /// First-order quaternion increment `q += 0.5 * q * (0, w) * dt`, then renormalize.
    fn integrate_attitude(&mut self, omega: &Vector3<f32>, dt: f32) {
        let q = self.attitude.into_inner();
        let w = Quaternion::new(0.0, omega.x, omega.y, omega.z);
        let next = q + q * w * (0.5 * dt);
        self.attitude = UnitQuaternion::new_normalize(next);
    }

    /// Nudge roll/pitch so the measured gravity direction lines up with world up.
    fn correct_tilt(&mut self, accel: &Vector3<f32>, accel_norm: f32) {
        if accel_norm <= f32::EPSILON
            || (accel_norm - 1.0).abs() > self.config.accel_trust_band
        {
            return;
        }
        let measured_up = self.attitude * (accel / accel_norm);
        if let Some(error) = UnitQuaternion::rotation_between(&measured_up, &Vector3::z()) {
            let partial = UnitQuaternion::from_scaled_axis(
                error.scaled_axis() * self.config.complementary_gain,
            );
            self.attitude = UnitQuaternion::new_normalize((partial * self.attitude).into_inner());
        }
    }

    fn integrate_inertial(&mut self, dt: f32) {
        self.velocity += self.linear_accel * G_MM_PER_S2 * dt;
        if self.still_frames >= self.config.zupt_frames {
            self.velocity *= self.config.zupt_damping;
            self.snap_small_velocity();
        }
        self.position += self.velocity * dt;
    }

    fn track_velocity(&mut self, target: Vector3<f32>, dt: f32) {
        let alpha = self.config.smoothing_alpha;
        self.velocity = self.velocity * (1.0 - alpha) + target * alpha;

        if target.iter().all(|v| v.abs() <= VELOCITY_EPSILON) {
            self.velocity *= self.config.linear_damping;
            self.snap_small_velocity();
        }
        self.position += self.velocity * dt;
    }

    fn snap_small_velocity(&mut self) {
        self.velocity
            .apply(|v| if v.abs() < VELOCITY_EPSILON { *v = 0.0 });
    }

    /// Stick axes after deadzone, Y flipped so pushing up is positive.
    fn stick(&self, stick: crate::state::Stick) -> (f32, f32) {
        let (x, y) = stick.normalized_with_deadzone(self.config.deadzone);
        (x, -y)
    }

    fn trigger_differential(&self, state: &ControllerState) -> f32 {
        let (l2, r2) = state.triggers.normalized();
        let dz = self.config.deadzone;
        let gate = |v: f32| if v < dz { 0.0 } else { v };
        gate(r2) - gate(l2)
    }
}

fn wrap_angle(angle: f32) -> f32 {
    use std::f32::consts::PI;
    let mut a = angle % (2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    } else if a < -PI {
        a += 2.0 * PI;
    }
    a
}
