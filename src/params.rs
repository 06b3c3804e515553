//! Per-tick inputs the rescue reads from the rest of the flight controller,
//! and the arming capability it actuates on touchdown or abort.
//!
//! The rescue never talks to drivers. The main loop snapshots these values
//! once per tick so the phase machine, supervisor and controllers all see
//! the same data.

pub use nalgebra::Vector3;

// Standard RC PWM range. Throttle commands and clamps use this scale.
pub const PWM_RANGE_MIN: u16 = 1000;
pub const PWM_RANGE_MAX: u16 = 2000;

/// Values read from the GPS driver. Distance and direction to home are only
/// meaningful while `fix_home` is set.
#[derive(Clone, Default)]
pub struct GpsParams {
    /// Driver is delivering data and passing its own plausibility checks.
    pub healthy: bool,
    /// A 3D fix currently exists.
    pub fix: bool,
    /// A home point was recorded (normally at arming).
    pub fix_home: bool,
    pub num_sats: u8,
    /// Minimum satellite count, from the GPS driver's configuration.
    pub min_sats: u8,
    pub distance_to_home_cm: f32,
    /// Degrees * 10, same scale the attitude estimator uses for yaw.
    pub direction_to_home_ddeg: i16,
    pub ground_speed_cm_s: u16,
}

/// Attitude and accelerometer values from the IMU / estimator.
#[derive(Clone)]
pub struct AttitudeParams {
    /// Heading in degrees * 10.
    pub yaw_ddeg: i16,
    /// Cosine of the tilt angle; 1.0 when level.
    pub cos_tilt_angle: f32,
    /// Raw accelerometer sample, ADC scale.
    pub acc_raw: Vector3<f32>,
    /// Reciprocal of the 1 g reading, to convert `acc_raw` to g.
    pub acc_1g_recip: f32,
}

impl Default for AttitudeParams {
    fn default() -> Self {
        Self {
            yaw_ddeg: 0,
            cos_tilt_angle: 1.,
            acc_raw: Vector3::zeros(),
            acc_1g_recip: 1.,
        }
    }
}

/// RC link state.
#[derive(Clone)]
pub struct RcParams {
    /// Pilot throttle command, PWM scale. Passed through while idle.
    pub throttle_command: f32,
    /// False is a hard failsafe: the receiver has no valid frames.
    pub receiving_signal: bool,
    pub yaw_reversed: bool,
    /// Bottom of the usable throttle range, for output normalisation.
    pub min_check: u16,
}

impl Default for RcParams {
    fn default() -> Self {
        Self {
            throttle_command: PWM_RANGE_MIN as f32,
            receiving_signal: true,
            yaw_reversed: false,
            min_check: 1050,
        }
    }
}

/// Flags from the arming, mode and estimator subsystems.
#[derive(Clone, Default)]
pub struct StatusParams {
    pub armed: bool,
    /// The GPS rescue flight mode is currently selected (switch or failsafe).
    pub rescue_mode_active: bool,
    /// Crash-flip recovery is running; a rescue cannot continue over it.
    pub crash_recovery_active: bool,
    /// A magnetometer is fitted and enabled.
    pub mag_available: bool,
    /// The altitude estimator has applied its ground-level offset.
    pub altitude_offset_valid: bool,
    /// The failsafe procedure is set to GPS rescue.
    pub failsafe_procedure_rescue: bool,
    /// A mode-activation condition exists for the rescue box.
    pub rescue_mode_configured: bool,
}

/// Snapshot of everything the rescue consumes in one tick.
#[derive(Clone, Default)]
pub struct Params {
    /// Monotonic clock, microseconds.
    pub time_us: u64,
    /// Estimated altitude above the arming point, in cm.
    pub altitude_cm: i32,
    pub gps: GpsParams,
    pub attitude: AttitudeParams,
    pub rc: RcParams,
    pub status: StatusParams,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DisarmReason {
    GpsRescue,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ArmingDisabledReason {
    /// Requires the pilot to cycle the arm switch before rearming.
    ArmSwitch,
}

/// Arming-side effects the rescue may trigger. Injected so tests and bench
/// rigs can observe calls without a vehicle attached.
pub trait ArmingActuator {
    fn set_arming_disabled(&mut self, reason: ArmingDisabledReason);
    fn disarm(&mut self, reason: DisarmReason);
}
