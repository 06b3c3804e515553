//! The three cascaded rescue controllers: heading (yaw rate with roll
//! cross-feed), forward velocity via pitch bias, and altitude via throttle.
//!
//! Called every tick at the main loop rate, but the controllers only
//! recompute when a fresh GPS sample arrived; between samples the previous
//! outputs hold. Integral and derivative terms are normalised by the
//! measured sample interval so the gains behave the same from 1 Hz to
//! 25 Hz GPS.

use num_traits::float::Float;

use crate::{
    config::RescueConfig,
    debug::DebugChannels,
    filters::{moving_avg2, pt1_apply},
    params::Params,
    sensors::SensorView,
    state::{Intent, Phase},
    util::{clamp, constrain},
};

pub const MAX_YAW_RATE: f32 = 90.; // deg/s
pub const MAX_VELOCITY_ITERM: f32 = 1000.;
pub const MAX_THROTTLE_ITERM: f32 = 200.;
pub const MAX_PITCH_RATE: f32 = 3000.; // max pitch bias change per second, degrees * 100

/// Setpoint overrides published to the attitude controller and mixer.
#[derive(Clone, Default)]
pub struct RescueOutputs {
    /// Added to the angle-mode pitch setpoint, degrees * 100.
    pub pitch_bias_cdeg: f32,
    /// Added to the angle-mode roll setpoint, degrees * 100.
    pub roll_bias_cdeg: f32,
    pub yaw_rate_dps: f32,
    /// PWM scale, already clamped to the configured throttle range.
    pub throttle: f32,
}

/// Controller memory. Zeroed on Initialize so one rescue cannot leak
/// I-terms or derivative history into the next.
#[derive(Clone, Default)]
pub struct RescueCtrls {
    prev_velocity_error: f32,
    velocity_i: f32,
    prev_velocity_d: f32,
    prev_pitch_adjustment: f32,
    prev_altitude_error: f32,
    throttle_i: f32,
    prev_throttle_d: f32,     // jerk base
    prev_throttle_d_val: f32, // moving-average base
    prev_throttle_d2: f32,    // final pt1 state
}

impl RescueCtrls {
    pub fn apply(
        &mut self,
        phase: Phase,
        sensor: &SensorView,
        intent: &Intent,
        config: &RescueConfig,
        params: &Params,
        new_gps_data: bool,
        out: &mut RescueOutputs,
        debug: &mut DebugChannels,
    ) {
        match phase {
            Phase::Idle => {
                out.pitch_bias_cdeg = 0.;
                out.roll_bias_cdeg = 0.;
                out.throttle = params.rc.throttle_command;
                return;
            }
            Phase::Initialize => {
                // Sensor values can't be seeded here; idle tasks do that.
                *self = Self::default();
                return;
            }
            Phase::DoNothing => {
                out.pitch_bias_cdeg = 0.;
                out.roll_bias_cdeg = 0.;
                out.throttle = config.throttle_hover as f32;
                return;
            }
            _ => {}
        }

        if !new_gps_data {
            return;
        }

        // ~1.0 at the 10 Hz design point; scales I up and D down when
        // samples arrive slower.
        let interval_factor = sensor.gps_dt_s * 10.;

        self.heading_ctrl(sensor, intent, config, params, out, debug);
        self.velocity_ctrl(sensor, intent, config, interval_factor, out, debug);
        self.altitude_ctrl(sensor, intent, config, params, interval_factor, out, debug);
    }

    /// Yaw rate towards home, with a roll cross-feed so the turn is
    /// coordinated while the heading error is still small.
    fn heading_ctrl(
        &mut self,
        sensor: &SensorView,
        intent: &Intent,
        config: &RescueConfig,
        params: &Params,
        out: &mut RescueOutputs,
        debug: &mut DebugChannels,
    ) {
        let mut yaw_rate = constrain(
            sensor.error_angle_deg * config.yaw_p as f32 * 0.1,
            -MAX_YAW_RATE,
            MAX_YAW_RATE,
        );

        // No roll cross-feed at or above 100 deg/s of commanded yaw.
        let roll_mix_attenuator = constrain(1. - yaw_rate.abs() * 0.01, 0., 1.);
        let roll_adjustment = -yaw_rate * config.roll_mix_pct as f32 * roll_mix_attenuator;
        out.roll_bias_cdeg = constrain(
            roll_adjustment,
            -intent.roll_angle_limit_deg * 100.,
            intent.roll_angle_limit_deg * 100.,
        );

        if params.rc.yaw_reversed {
            yaw_rate = -yaw_rate;
        }
        if !intent.update_yaw {
            yaw_rate = 0.;
        }
        out.yaw_rate_dps = yaw_rate;

        debug.heading[0] = yaw_rate * 10.;
        debug.heading[1] = out.roll_bias_cdeg;
    }

    /// Pitch bias from the closing-speed error. Positive pitch is nose
    /// down, towards home.
    fn velocity_ctrl(
        &mut self,
        sensor: &SensorView,
        intent: &Intent,
        config: &RescueConfig,
        interval_factor: f32,
        out: &mut RescueOutputs,
        debug: &mut DebugChannels,
    ) {
        // Don't chase the velocity target while pointing away from home,
        // eg right after overshooting the home point.
        let target_limiter = constrain((60. - sensor.abs_error_angle_deg) / 60., 0., 1.);
        let velocity_error =
            intent.target_velocity_cm_s * target_limiter - sensor.velocity_to_home_cm_s;

        let velocity_p = velocity_error * config.vel_p as f32;

        self.velocity_i += 0.01 * config.vel_i as f32 * velocity_error * interval_factor;
        clamp(
            &mut self.velocity_i,
            (-MAX_VELOCITY_ITERM, MAX_VELOCITY_ITERM),
        );

        let mut velocity_d = (velocity_error - self.prev_velocity_error) / interval_factor;
        self.prev_velocity_error = velocity_error;
        velocity_d = pt1_apply(self.prev_velocity_d, velocity_d, sensor.filter_k);
        self.prev_velocity_d = velocity_d;
        velocity_d *= config.vel_d as f32;

        let mut pitch_adjustment = velocity_p + velocity_d + self.velocity_i;

        // Rate-of-change limit keeps pitch smooth through noisy samples.
        let delta = pitch_adjustment - self.prev_pitch_adjustment;
        if delta > sensor.max_pitch_step {
            pitch_adjustment = self.prev_pitch_adjustment + sensor.max_pitch_step;
        } else if delta < -sensor.max_pitch_step {
            pitch_adjustment = self.prev_pitch_adjustment - sensor.max_pitch_step;
        }

        let smoothed = moving_avg2(self.prev_pitch_adjustment, pitch_adjustment);
        // Store the pre-average value; averaging the stored state as well
        // would halve the slew limiter's responsiveness.
        self.prev_pitch_adjustment = pitch_adjustment;

        out.pitch_bias_cdeg = constrain(
            smoothed,
            -intent.pitch_angle_limit_deg * 100.,
            intent.pitch_angle_limit_deg * 100.,
        );

        debug.rth[0] = out.pitch_bias_cdeg;
        debug.velocity[0] = velocity_p;
        debug.velocity[1] = velocity_d;
        debug.velocity[3] = intent.target_velocity_cm_s;
        debug.tracking[1] = intent.target_velocity_cm_s;
    }

    /// Throttle from the altitude error, with a jerk boost on the D term
    /// and a tilt feedforward for thrust lost when not level.
    // TODO: run this from the baro at tick rate instead of waiting for GPS
    // data; altitude updates faster than the GPS interval.
    fn altitude_ctrl(
        &mut self,
        sensor: &SensorView,
        intent: &Intent,
        config: &RescueConfig,
        params: &Params,
        interval_factor: f32,
        out: &mut RescueOutputs,
        debug: &mut DebugChannels,
    ) {
        // Metres above target; negative means too low.
        let altitude_error = (intent.target_altitude_cm - sensor.current_altitude_cm as f32) * 0.01;

        let throttle_p = config.throttle_p as f32 * altitude_error;

        self.throttle_i += 0.01 * config.throttle_i as f32 * altitude_error * interval_factor;
        clamp(
            &mut self.throttle_i,
            (-MAX_THROTTLE_ITERM, MAX_THROTTLE_ITERM),
        );

        // Error-based D: boosts up on a climb and down on a descent.
        let mut throttle_d = (altitude_error - self.prev_altitude_error) / interval_factor;
        self.prev_altitude_error = altitude_error;

        let jerk = 2. * (throttle_d - self.prev_throttle_d);
        self.prev_throttle_d = throttle_d;
        throttle_d += jerk;

        let averaged = moving_avg2(self.prev_throttle_d_val, throttle_d);
        self.prev_throttle_d_val = throttle_d;
        throttle_d = pt1_apply(self.prev_throttle_d2, averaged, sensor.filter_k);
        self.prev_throttle_d2 = throttle_d;

        throttle_d = 10. * config.throttle_d as f32 * throttle_d;

        // 0 when flat; reaches ~0.2 while holding position on a windy day.
        let tilt_adjustment =
            (1. - params.attitude.cos_tilt_angle) * (config.throttle_hover as f32 - 1000.);

        let adjustment = throttle_p + self.throttle_i + throttle_d + tilt_adjustment;
        out.throttle = constrain(
            config.throttle_hover as f32 + adjustment,
            config.throttle_min as f32,
            config.throttle_max as f32,
        );

        debug.throttle_pid[0] = throttle_p;
        debug.throttle_pid[1] = throttle_d;
    }
}
