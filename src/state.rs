//! Rescue phase, failure state, and the per-phase intent the phase machine
//! hands to the controllers.

/// Phases of a rescue, in the order a normal one passes through them.
/// Repr u8 so the debug channels can record the phase numerically.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Phase {
    /// No rescue in place. Idle tasks still track the flight's max altitude.
    Idle = 0,
    /// Controller memory is being zeroed; entry checks run here.
    Initialize = 1,
    /// Climb (or descend) to the return altitude before moving.
    AttainAlt = 2,
    /// Yaw until the nose points at home.
    Rotate = 3,
    /// Cruise back with full authority on all axes.
    FlyHome = 4,
    /// Taper altitude, speed and roll while closing the final stretch.
    Descent = 5,
    /// Vertical drop over home until impact is sensed.
    Landing = 6,
    /// A sanity fault ended the rescue; disarm.
    Abort = 7,
    /// Touchdown detected; disarm.
    Complete = 8,
    /// Hold pitch/roll level at hover throttle instead of disarming.
    DoNothing = 9,
}

impl Default for Phase {
    fn default() -> Self {
        Self::Idle
    }
}

impl Phase {
    /// True from rescue start until touchdown; the window in which the
    /// rescue owns the aircraft (and may force the mag off).
    pub fn in_progress(self) -> bool {
        matches!(
            self,
            Self::Initialize
                | Self::AttainAlt
                | Self::Rotate
                | Self::FlyHome
                | Self::Descent
                | Self::Landing
        )
    }
}

/// Why a rescue is unhealthy. Stored, not thrown; the supervisor decides
/// what each value means under the configured sanity policy.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Failure {
    Healthy = 0,
    /// Distance to home is growing when it should not be.
    Flyaway = 1,
    /// GPS driver reports unhealthy.
    GpsLost = 2,
    /// Satellite count stayed under the minimum for too long.
    LowSats = 3,
    /// Crash-flip recovery took over mid-rescue.
    CrashFlipDetected = 4,
    /// No sustained progress towards home.
    Stalled = 5,
    /// Rescue requested inside the minimum activation distance.
    TooClose = 6,
    /// No home point was recorded at arming.
    NoHomePoint = 7,
}

impl Default for Failure {
    fn default() -> Self {
        Self::Healthy
    }
}

/// Setpoint limits and targets for the current phase. The phase machine
/// writes these; the controllers only read them.
#[derive(Clone, Default)]
pub struct Intent {
    /// Altitude to fly the return leg at, in cm.
    pub return_altitude_cm: f32,
    /// Slewed altitude target the throttle controller tracks, in cm.
    pub target_altitude_cm: f32,
    pub target_velocity_cm_s: f32,
    pub pitch_angle_limit_deg: f32,
    pub roll_angle_limit_deg: f32,
    /// False freezes the yaw output (not used by any current phase exit).
    pub update_yaw: bool,
    /// Radius at which the descent starts, in metres. Clamped to the
    /// distance from home at rescue start so short rescues still taper.
    pub descent_distance_m: f32,
    /// Sanity counter for the active phase, maintained at 1 Hz.
    pub seconds_failing: i8,
}
