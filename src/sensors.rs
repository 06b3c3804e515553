//! Derived sensor view: converts raw GPS / baro / IMU inputs into the
//! normalized quantities the phase machine and controllers work in.
//!
//! Altitude and the impact accelerometer refresh every tick; everything
//! GPS-derived refreshes only when the driver flags a fresh sample, with
//! the measured sample interval folded into the step and filter values.

use num_traits::float::Float;

use crate::{
    config::RescueConfig,
    debug::DebugChannels,
    filters::pt1_gain,
    params::Params,
    pid::MAX_PITCH_RATE,
    util::{constrain, wrap_pm180},
};

// Derivative smoothing cutoff for the velocity and throttle controllers.
const DERIVATIVE_CUTOFF_HZ: f32 = 0.8;

#[derive(Clone, Default)]
pub struct SensorView {
    /// Highest altitude seen while armed and not in a rescue, in cm.
    /// Cleared on disarm.
    pub max_altitude_cm: i32,
    pub current_altitude_cm: i32,
    pub distance_to_home_cm: f32,
    pub distance_to_home_m: f32,
    pub ground_speed_cm_s: u16,
    /// Degrees * 10.
    pub direction_to_home_ddeg: i16,
    /// |acc| in g. Only computed during Landing, at tick rate.
    pub acc_magnitude_g: f32,
    pub healthy: bool,
    /// Heading error to home in degrees, wrapped to (-180, 180].
    pub error_angle_deg: f32,
    pub abs_error_angle_deg: f32,
    /// Measured GPS sample interval, clamped to [0.01, 1.0] s.
    pub gps_dt_s: f32,
    /// Closing speed on home, cm/s. Positive means approaching.
    pub velocity_to_home_cm_s: f32,
    /// Per-sample slew steps for the altitude target, in cm.
    pub ascend_step_cm: f32,
    pub descend_step_cm: f32,
    /// Per-sample cap on pitch bias change, centi-degrees.
    pub max_pitch_step: f32,
    /// pt1 gain for derivative smoothing at the measured sample rate.
    pub filter_k: f32,

    prev_gps_time_us: u64,
    prev_distance_to_home_cm: f32,
    have_prev_distance: bool,
}

impl SensorView {
    /// Refresh per-tick values, and the GPS-derived block when a fresh
    /// sample arrived. `landing` enables impact sensing.
    pub fn refresh(
        &mut self,
        params: &Params,
        config: &RescueConfig,
        landing: bool,
        new_gps_data: bool,
        debug: &mut DebugChannels,
    ) {
        self.current_altitude_cm = params.altitude_cm;
        debug.tracking[2] = self.current_altitude_cm as f32;
        debug.throttle_pid[2] = self.current_altitude_cm as f32;

        self.healthy = params.gps.healthy;

        if landing {
            // Tick rate, not GPS rate; touchdown must disarm promptly.
            self.acc_magnitude_g = params.attitude.acc_raw.norm() * params.attitude.acc_1g_recip;
        }

        if !new_gps_data {
            return;
        }

        self.distance_to_home_cm = params.gps.distance_to_home_cm;
        self.distance_to_home_m = self.distance_to_home_cm / 100.;
        self.ground_speed_cm_s = params.gps.ground_speed_cm_s;
        self.direction_to_home_ddeg = params.gps.direction_to_home_ddeg;
        self.error_angle_deg = wrap_pm180(
            (params.attitude.yaw_ddeg - self.direction_to_home_ddeg) as f32 * 0.1,
        );
        self.abs_error_angle_deg = self.error_angle_deg.abs();

        let interval_us = params.time_us.saturating_sub(self.prev_gps_time_us);
        self.gps_dt_s = constrain(interval_us as f32 * 1e-6, 0.01, 1.0);
        self.prev_gps_time_us = params.time_us;

        self.filter_k = pt1_gain(DERIVATIVE_CUTOFF_HZ, self.gps_dt_s);

        if self.have_prev_distance {
            self.velocity_to_home_cm_s =
                (self.prev_distance_to_home_cm - self.distance_to_home_cm) / self.gps_dt_s;
        } else {
            // No previous distance yet; a delta from zero is noise.
            self.velocity_to_home_cm_s = 0.;
            self.have_prev_distance = true;
        }
        self.prev_distance_to_home_cm = self.distance_to_home_cm;

        self.ascend_step_cm = self.gps_dt_s * config.ascend_rate_cm_s as f32;
        self.descend_step_cm = self.gps_dt_s * config.descend_rate_cm_s as f32;
        self.max_pitch_step = self.gps_dt_s * MAX_PITCH_RATE;

        debug.heading[2] = params.attitude.yaw_ddeg as f32;
        debug.heading[3] = self.direction_to_home_ddeg as f32;
        debug.velocity[2] = self.velocity_to_home_cm_s;
        debug.tracking[0] = self.velocity_to_home_cm_s;
    }
}
