//! User-facing rescue configuration. Persisted elsewhere (CLI / OSD / flash
//! are outside this crate); immutable for the duration of a rescue.

use num_enum::TryFromPrimitive;
use thiserror::Error;

/// Bump when the field set changes, so the persistence layer can migrate.
pub const CONFIG_VERSION: u8 = 2;

/// How strictly supervisor faults end the rescue.
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum SanityChecks {
    /// Faults never disarm; the aircraft holds position instead.
    Off = 0,
    /// Any fault aborts and disarms.
    On = 1,
    /// Faults disarm only when the RC link is actually gone.
    FailsafeOnly = 2,
}

impl Default for SanityChecks {
    fn default() -> Self {
        Self::FailsafeOnly
    }
}

/// Basis for the altitude flown during the return leg.
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum AltitudeMode {
    /// Highest altitude seen this flight, plus the buffer.
    Max = 0,
    /// `initial_altitude_m`, regardless of flight history.
    Fixed = 1,
    /// Altitude at rescue start, plus the buffer.
    Current = 2,
}

impl Default for AltitudeMode {
    fn default() -> Self {
        Self::Max
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum ConfigError {
    #[error("angle must be 1-90 degrees")]
    Angle,
    #[error("roll mix must be 0-100 percent")]
    RollMix,
    #[error("throttle range must satisfy 1000 <= min < hover < max <= 2000")]
    ThrottleRange,
    #[error("rescue groundspeed must be non-zero")]
    Groundspeed,
    #[error("ascend and descend rates must be non-zero")]
    ClimbRate,
    #[error("descent distance must be at least 10 m")]
    DescentDistance,
}

/// Rescue settings, with defaults suitable for a 5-inch quad.
#[derive(Clone, Debug)]
pub struct RescueConfig {
    /// Max pitch/roll authority the rescue may add, in degrees.
    pub angle_deg: u8,
    /// Return altitude for `AltitudeMode::Fixed`, in metres.
    pub initial_altitude_m: u8,
    /// Distance from home at which the descent begins, in metres.
    pub descent_distance_m: u8,
    /// Cruise groundspeed target for the return leg, in cm/s.
    pub rescue_groundspeed_cm_s: u16,
    pub throttle_p: u8,
    pub throttle_i: u8,
    pub throttle_d: u8,
    pub vel_p: u8,
    pub vel_i: u8,
    pub vel_d: u8,
    pub yaw_p: u8,
    /// Throttle clamp and hover feedforward point, PWM scale.
    pub throttle_min: u16,
    pub throttle_max: u16,
    pub throttle_hover: u16,
    pub sanity_checks: SanityChecks,
    /// Rescues attempted closer to home than this land instead, in metres.
    pub min_rescue_dth_m: u16,
    pub allow_arming_without_fix: bool,
    pub use_mag: bool,
    /// Altitude below which the final landing phase begins, in metres.
    pub target_landing_altitude_m: u8,
    pub altitude_mode: AltitudeMode,
    /// Target-altitude slew rate while climbing, in cm/s.
    pub ascend_rate_cm_s: u16,
    /// Target-altitude slew rate during descent and landing, in cm/s.
    pub descend_rate_cm_s: u16,
    /// Margin added above the Max/Current altitude basis, in metres.
    pub rescue_altitude_buffer_m: u8,
    /// Roll cross-feed from the yaw controller, 0-100 percent.
    pub roll_mix_pct: u8,
}

impl Default for RescueConfig {
    fn default() -> Self {
        Self {
            angle_deg: 32,
            initial_altitude_m: 30,
            descent_distance_m: 20,
            rescue_groundspeed_cm_s: 500,
            throttle_p: 20,
            throttle_i: 20,
            throttle_d: 10,
            vel_p: 6,
            vel_i: 20,
            vel_d: 70,
            yaw_p: 25,
            throttle_min: 1100,
            throttle_max: 1600,
            throttle_hover: 1275,
            sanity_checks: Default::default(),
            min_rescue_dth_m: 30,
            allow_arming_without_fix: false,
            use_mag: true,
            target_landing_altitude_m: 5,
            altitude_mode: Default::default(),
            ascend_rate_cm_s: 500,
            descend_rate_cm_s: 125,
            rescue_altitude_buffer_m: 10,
            roll_mix_pct: 100,
        }
    }
}

impl RescueConfig {
    /// Range-check the field set. Run when settings are applied, before a
    /// rescue can use them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.angle_deg == 0 || self.angle_deg > 90 {
            return Err(ConfigError::Angle);
        }
        if self.roll_mix_pct > 100 {
            return Err(ConfigError::RollMix);
        }
        if self.throttle_min < 1000
            || self.throttle_max > 2000
            || self.throttle_min >= self.throttle_hover
            || self.throttle_hover >= self.throttle_max
        {
            return Err(ConfigError::ThrottleRange);
        }
        if self.rescue_groundspeed_cm_s == 0 {
            return Err(ConfigError::Groundspeed);
        }
        if self.ascend_rate_cm_s == 0 || self.descend_rate_cm_s == 0 {
            return Err(ConfigError::ClimbRate);
        }
        if (self.descent_distance_m as f32) < crate::engine::MIN_DESCENT_DIST_M {
            return Err(ConfigError::DescentDistance);
        }
        Ok(())
    }

    /// Reduced pitch authority used while climbing and landing.
    pub fn half_angle_deg(&self) -> f32 {
        (self.angle_deg / 2) as f32
    }
}
