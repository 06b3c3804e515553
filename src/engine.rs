//! The rescue engine: owns all rescue state and drives one update per main
//! loop tick, in the order sensor refresh, phase machine, sanity checks,
//! controllers.
//!
//! The phase machine only advances on fresh GPS data (except impact
//! detection, which runs at tick rate), so the engine is cheap to call at
//! loop rate regardless of GPS rate.

use core::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info};

use crate::{
    config::{AltitudeMode, RescueConfig},
    debug::DebugChannels,
    params::{ArmingActuator, ArmingDisabledReason, DisarmReason, Params, PWM_RANGE_MAX, PWM_RANGE_MIN},
    pid::{RescueCtrls, RescueOutputs},
    safety::{AvailabilityCheck, SanityChecker},
    sensors::SensorView,
    state::{Failure, Intent, Phase},
    util::{constrain, map_linear},
};

/// Floor for the begin-descent radius, metres.
pub const MIN_DESCENT_DIST_M: f32 = 10.;

// Accelerometer magnitude that counts as touchdown during Landing.
const IMPACT_G: f32 = 2.0;

pub struct RescueEngine {
    config: RescueConfig,
    phase: Phase,
    failure: Failure,
    sensor: SensorView,
    intent: Intent,
    ctrl: RescueCtrls,
    sanity: SanityChecker,
    availability: AvailabilityCheck,
    outputs: RescueOutputs,
    pub debug: DebugChannels,

    /// Set by the GPS driver callback, consumed at the end of each update.
    /// Atomic because the callback may run from a different context.
    new_gps_data: AtomicBool,
    /// Read asynchronously by the OSD.
    is_available: AtomicBool,

    /// One-shot: a stalled fly-home disables the mag and retries before
    /// escalating. Sticks until reboot, like any in-flight sensor fault.
    mag_force_disable: bool,
    /// Latched when Initialize hands off to AttainAlt: whether the climb
    /// approaches the return altitude from below.
    started_low: bool,

    throttle_out_norm: f32,
    configured: bool,
    home_fix: bool,
}

impl Default for RescueEngine {
    fn default() -> Self {
        Self::new(RescueConfig::default())
    }
}

impl RescueEngine {
    pub fn new(config: RescueConfig) -> Self {
        Self {
            config,
            phase: Phase::Idle,
            failure: Failure::Healthy,
            sensor: Default::default(),
            intent: Default::default(),
            ctrl: Default::default(),
            sanity: Default::default(),
            availability: Default::default(),
            outputs: Default::default(),
            debug: Default::default(),
            new_gps_data: AtomicBool::new(false),
            is_available: AtomicBool::new(false),
            mag_force_disable: false,
            started_low: true,
            throttle_out_norm: 0.,
            configured: false,
            home_fix: false,
        }
    }

    /// GPS driver callback: a fresh sample is ready for the next update.
    pub fn on_new_gps_data(&self) {
        self.new_gps_data.store(true, Ordering::Release);
    }

    /// One tick of the rescue subsystem, at main loop rate.
    pub fn update(&mut self, params: &Params, actuator: &mut dyn ArmingActuator) {
        let prev_phase = self.phase;
        let new_gps_data = self.new_gps_data.load(Ordering::Acquire);

        if !params.status.rescue_mode_active {
            // Mode deactivation is the only external interruption. Idle
            // tasks still run below.
            self.stop();
        } else if self.phase == Phase::Idle {
            self.phase = Phase::Initialize;
            // Zero controller memory and seed the supervisor now; sensor
            // values were kept fresh by the idle tasks.
            self.ctrl.apply(
                Phase::Initialize,
                &self.sensor,
                &self.intent,
                &self.config,
                params,
                new_gps_data,
                &mut self.outputs,
                &mut self.debug,
            );
            self.sanity.init(&self.sensor, params);
        }

        self.sensor.refresh(
            params,
            &self.config,
            self.phase == Phase::Landing,
            new_gps_data,
            &mut self.debug,
        );

        let available = self.availability.check(params);
        self.is_available.store(available, Ordering::Release);

        match self.phase {
            Phase::Idle => self.idle_tasks(params, new_gps_data),

            Phase::Initialize => {
                if !params.gps.fix_home {
                    // No home point was recorded at arming. Raising the
                    // failure (rather than refusing the mode) lets the
                    // sanity policy decide; refusing could mean a flyaway.
                    self.failure = Failure::NoHomePoint;
                } else if self.sensor.distance_to_home_m < self.config.min_rescue_dth_m as f32 {
                    // Inside the minimum activation distance: land here.
                    self.intent.target_altitude_cm =
                        self.sensor.current_altitude_cm as f32 - self.sensor.descend_step_cm;
                    self.phase = Phase::Landing;
                } else {
                    self.phase = Phase::AttainAlt;
                    self.intent.seconds_failing = 0;
                    self.started_low =
                        self.sensor.current_altitude_cm as f32 <= self.intent.return_altitude_cm;
                    // Nose to home for the whole rescue; no roll and no
                    // forward speed until the climb is done.
                    self.intent.update_yaw = true;
                    self.intent.target_velocity_cm_s = 0.;
                    self.intent.pitch_angle_limit_deg = self.config.half_angle_deg();
                    self.intent.roll_angle_limit_deg = 0.;
                }
            }

            Phase::AttainAlt => {
                // Step the target towards the return altitude; hand over to
                // Rotate once the aircraft itself has crossed it.
                if new_gps_data {
                    if self.started_low {
                        if self.intent.target_altitude_cm < self.intent.return_altitude_cm {
                            self.intent.target_altitude_cm += self.sensor.ascend_step_cm;
                        } else if (self.sensor.current_altitude_cm as f32)
                            > self.intent.return_altitude_cm
                        {
                            self.intent.target_altitude_cm = self.intent.return_altitude_cm;
                            self.phase = Phase::Rotate;
                        }
                    } else {
                        if self.intent.target_altitude_cm > self.intent.return_altitude_cm {
                            self.intent.target_altitude_cm -= self.sensor.descend_step_cm;
                        } else if (self.sensor.current_altitude_cm as f32)
                            < self.intent.return_altitude_cm
                        {
                            self.intent.target_altitude_cm = self.intent.return_altitude_cm;
                            self.phase = Phase::Rotate;
                        }
                    }
                }
            }

            Phase::Rotate => {
                // AttainAlt may have been bypassed, so this stands alone.
                if new_gps_data && self.sensor.abs_error_angle_deg < 60. {
                    // Pointing roughly home: allow forward speed and full
                    // pitch while the last of the rotation completes.
                    self.intent.target_velocity_cm_s = self.config.rescue_groundspeed_cm_s as f32;
                    self.intent.pitch_angle_limit_deg = self.config.angle_deg as f32;
                    if self.sensor.abs_error_angle_deg < 15. {
                        self.phase = Phase::FlyHome;
                        self.intent.seconds_failing = 0;
                        self.intent.roll_angle_limit_deg = self.config.angle_deg as f32;
                    }
                }
            }

            Phase::FlyHome => {
                if new_gps_data
                    && self.sensor.distance_to_home_m <= self.intent.descent_distance_m
                {
                    self.phase = Phase::Descent;
                    self.intent.seconds_failing = 0;
                }
            }

            Phase::Descent => {
                if new_gps_data {
                    let target_landing_altitude_cm =
                        100. * self.config.target_landing_altitude_m as f32;
                    if (self.sensor.current_altitude_cm as f32) < target_landing_altitude_cm {
                        self.phase = Phase::Landing;
                        self.intent.target_altitude_cm -= self.sensor.descend_step_cm;
                        self.intent.seconds_failing = 0;
                        self.intent.target_velocity_cm_s = 0.;
                        self.intent.pitch_angle_limit_deg = self.config.half_angle_deg();
                        self.intent.roll_angle_limit_deg = 0.;
                    } else {
                        // Home counts as a 2 m circle so we don't hunt
                        // around the exact point while crossing it.
                        let distance_to_landing_area_m =
                            (self.sensor.distance_to_home_m - 2.).max(0.);
                        let proximity = constrain(
                            distance_to_landing_area_m / self.intent.descent_distance_m,
                            0.,
                            1.,
                        );
                        // Descend by no less than one step and no more than
                        // two, with speed and roll tapering to zero at home.
                        self.intent.target_altitude_cm -=
                            self.sensor.descend_step_cm * (1. + proximity);
                        self.intent.target_velocity_cm_s =
                            self.config.rescue_groundspeed_cm_s as f32 * proximity;
                        self.intent.roll_angle_limit_deg =
                            self.config.angle_deg as f32 * proximity;
                    }
                }
            }

            Phase::Landing => {
                if new_gps_data {
                    self.intent.target_altitude_cm -= self.sensor.descend_step_cm;
                }
                // Tick rate, not GPS rate: disarm must not wait for the
                // next sample.
                if self.sensor.acc_magnitude_g > IMPACT_G {
                    actuator.set_arming_disabled(ArmingDisabledReason::ArmSwitch);
                    actuator.disarm(DisarmReason::GpsRescue);
                    info!("rescue touchdown, disarmed");
                    self.phase = Phase::Complete;
                }
            }

            Phase::Complete => self.stop(),

            Phase::Abort => {
                actuator.set_arming_disabled(ArmingDisabledReason::ArmSwitch);
                actuator.disarm(DisarmReason::GpsRescue);
                info!("rescue aborted, disarmed");
                self.stop();
            }

            Phase::DoNothing => {}
        }

        self.debug.tracking[3] = self.intent.target_altitude_cm;
        self.debug.throttle_pid[3] = self.intent.target_altitude_cm;
        self.debug.rth[1] = self.phase as u8 as f32;

        self.sanity.check(
            &mut self.phase,
            &mut self.failure,
            &mut self.intent,
            &self.sensor,
            &self.config,
            params,
            &mut self.mag_force_disable,
            &mut self.debug,
        );
        self.ctrl.apply(
            self.phase,
            &self.sensor,
            &self.intent,
            &self.config,
            params,
            new_gps_data,
            &mut self.outputs,
            &mut self.debug,
        );

        self.throttle_out_norm = constrain(
            map_linear(
                self.outputs.throttle,
                (
                    params.rc.min_check.max(PWM_RANGE_MIN) as f32,
                    PWM_RANGE_MAX as f32,
                ),
                (0., 1.),
            ),
            0.,
            1.,
        );
        self.configured =
            params.status.failsafe_procedure_rescue || params.status.rescue_mode_configured;
        self.home_fix = params.gps.fix_home;

        if self.phase != prev_phase {
            debug!("rescue phase {:?} -> {:?}", prev_phase, self.phase);
        }

        self.new_gps_data.store(false, Ordering::Release);
    }

    /// Housekeeping while no rescue is in place: track the flight's max
    /// altitude and keep the return targets seeded from live data, so a
    /// rescue can start with valid values on its first tick.
    fn idle_tasks(&mut self, params: &Params, new_gps_data: bool) {
        if !params.status.armed {
            self.sensor.max_altitude_cm = 0;
            return;
        }
        // Altitude bookkeeping waits for the estimator's ground offset.
        if !params.status.altitude_offset_valid {
            return;
        }

        self.sensor.max_altitude_cm = self
            .sensor
            .max_altitude_cm
            .max(self.sensor.current_altitude_cm);

        if new_gps_data {
            // Target starts at the current altitude so the first controller
            // pass sees zero error and no D kick.
            self.intent.target_altitude_cm = self.sensor.current_altitude_cm as f32;
            self.intent.descent_distance_m = constrain(
                self.sensor.distance_to_home_m,
                MIN_DESCENT_DIST_M,
                self.config.descent_distance_m as f32,
            );
            let initial_altitude_cm = self.config.initial_altitude_m as f32 * 100.;
            let buffer_cm = self.config.rescue_altitude_buffer_m as f32 * 100.;
            self.intent.return_altitude_cm = match self.config.altitude_mode {
                AltitudeMode::Fixed => initial_altitude_cm,
                AltitudeMode::Current => self.sensor.current_altitude_cm as f32 + buffer_cm,
                AltitudeMode::Max => self.sensor.max_altitude_cm as f32 + buffer_cm,
            };
        }
    }

    fn stop(&mut self) {
        self.phase = Phase::Idle;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn failure(&self) -> Failure {
        self.failure
    }

    pub fn intent(&self) -> &Intent {
        &self.intent
    }

    pub fn sensors(&self) -> &SensorView {
        &self.sensor
    }

    pub fn config(&self) -> &RescueConfig {
        &self.config
    }

    /// Raw controller outputs, PWM-scale throttle included. The normalised
    /// accessors below are what the mixer consumes.
    pub fn outputs(&self) -> &RescueOutputs {
        &self.outputs
    }

    pub fn yaw_rate_dps(&self) -> f32 {
        self.outputs.yaw_rate_dps
    }

    /// Added to the angle-mode pitch setpoint, degrees * 100.
    pub fn pitch_bias_centi_deg(&self) -> f32 {
        self.outputs.pitch_bias_cdeg
    }

    /// Added to the angle-mode roll setpoint, degrees * 100.
    pub fn roll_bias_centi_deg(&self) -> f32 {
        self.outputs.roll_bias_cdeg
    }

    /// Commanded throttle scaled to [0, 1] for the mixer, compensated for
    /// `min_check` the same way pilot throttle is.
    pub fn throttle_out(&self) -> f32 {
        self.throttle_out_norm
    }

    /// OSD-safe readiness flag; may be read from another context.
    pub fn is_available(&self) -> bool {
        self.is_available.load(Ordering::Acquire)
    }

    /// A rescue would actually trigger on failsafe: the failsafe procedure
    /// or a mode switch is set up for it.
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// OSD warning: the rescue cannot work because there is no home point.
    pub fn is_disabled(&self) -> bool {
        !self.home_fix
    }

    /// The IMU should stop using the magnetometer: the user excluded it,
    /// or a stalled fly-home forced it off.
    pub fn disable_mag(&self) -> bool {
        (!self.config.use_mag || self.mag_force_disable) && self.phase.in_progress()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SanityChecks;

    #[derive(Default)]
    struct TestActuator {
        disarms: Vec<DisarmReason>,
        arming_disables: Vec<ArmingDisabledReason>,
    }

    impl ArmingActuator for TestActuator {
        fn set_arming_disabled(&mut self, reason: ArmingDisabledReason) {
            self.arming_disables.push(reason);
        }
        fn disarm(&mut self, reason: DisarmReason) {
            self.disarms.push(reason);
        }
    }

    fn flying_params(time_us: u64) -> Params {
        let mut params = Params::default();
        params.time_us = time_us;
        params.altitude_cm = 2000;
        params.gps.healthy = true;
        params.gps.fix = true;
        params.gps.fix_home = true;
        params.gps.num_sats = 12;
        params.gps.min_sats = 8;
        params.gps.distance_to_home_cm = 20_000.;
        params.rc.throttle_command = 1450.;
        params.status.armed = true;
        params.status.altitude_offset_valid = true;
        params
    }

    #[test]
    fn idle_outputs_are_pass_through() {
        let mut engine = RescueEngine::default();
        let mut actuator = TestActuator::default();
        let mut params = flying_params(10_000);

        engine.on_new_gps_data();
        engine.update(&params, &mut actuator);
        params.time_us += 10_000;
        engine.update(&params, &mut actuator);

        assert_eq!(engine.phase(), Phase::Idle);
        assert_eq!(engine.failure(), Failure::Healthy);
        assert_eq!(engine.pitch_bias_centi_deg(), 0.);
        assert_eq!(engine.roll_bias_centi_deg(), 0.);
        assert_eq!(engine.outputs().throttle, 1450.);
        assert!(actuator.disarms.is_empty());
    }

    #[test]
    fn max_altitude_tracks_and_resets_on_disarm() {
        let mut engine = RescueEngine::default();
        let mut actuator = TestActuator::default();

        let mut params = flying_params(10_000);
        params.altitude_cm = 3000;
        engine.update(&params, &mut actuator);
        assert_eq!(engine.sensors().max_altitude_cm, 3000);

        params.time_us += 10_000;
        params.altitude_cm = 2500;
        engine.update(&params, &mut actuator);
        assert_eq!(engine.sensors().max_altitude_cm, 3000);

        params.time_us += 10_000;
        params.status.armed = false;
        engine.update(&params, &mut actuator);
        assert_eq!(engine.sensors().max_altitude_cm, 0);
    }

    #[test]
    fn max_altitude_waits_for_altitude_offset() {
        let mut engine = RescueEngine::default();
        let mut actuator = TestActuator::default();

        let mut params = flying_params(10_000);
        params.altitude_cm = 3000;
        params.status.altitude_offset_valid = false;
        engine.update(&params, &mut actuator);
        assert_eq!(engine.sensors().max_altitude_cm, 0);
    }

    #[test]
    fn no_home_point_aborts_and_disarms_under_strict_policy() {
        let mut config = RescueConfig::default();
        config.sanity_checks = SanityChecks::On;
        let mut engine = RescueEngine::new(config);
        let mut actuator = TestActuator::default();

        let mut params = flying_params(10_000);
        params.gps.fix_home = false;
        params.status.rescue_mode_active = true;

        engine.update(&params, &mut actuator); // Initialize, NoHomePoint, Abort
        assert_eq!(engine.failure(), Failure::NoHomePoint);
        assert_eq!(engine.phase(), Phase::Abort);

        params.time_us += 10_000;
        engine.update(&params, &mut actuator); // Abort disarms, stops
        assert_eq!(actuator.disarms, vec![DisarmReason::GpsRescue]);
        assert_eq!(
            actuator.arming_disables,
            vec![ArmingDisabledReason::ArmSwitch]
        );
        assert_eq!(engine.phase(), Phase::Idle);
    }

    #[test]
    fn mode_deactivation_returns_to_idle_and_clears_failure() {
        let mut engine = RescueEngine::default();
        let mut actuator = TestActuator::default();

        let mut params = flying_params(10_000);
        params.status.rescue_mode_active = true;
        engine.on_new_gps_data();
        engine.update(&params, &mut actuator);
        assert!(engine.phase() != Phase::Idle);

        params.time_us += 10_000;
        params.status.rescue_mode_active = false;
        engine.update(&params, &mut actuator);
        assert_eq!(engine.phase(), Phase::Idle);
        assert_eq!(engine.failure(), Failure::Healthy);
    }

    #[test]
    fn throttle_out_normalises_against_min_check() {
        let mut engine = RescueEngine::default();
        let mut actuator = TestActuator::default();
        let mut params = flying_params(10_000);
        params.rc.min_check = 1050;
        params.rc.throttle_command = 1525.;

        engine.update(&params, &mut actuator);
        // (1525 - 1050) / (2000 - 1050)
        assert!((engine.throttle_out() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn disable_mag_only_while_rescue_in_progress() {
        let mut config = RescueConfig::default();
        config.use_mag = false;
        let mut engine = RescueEngine::new(config);
        let mut actuator = TestActuator::default();

        let mut params = flying_params(10_000);
        assert!(!engine.disable_mag());

        params.status.rescue_mode_active = true;
        engine.update(&params, &mut actuator);
        assert!(engine.phase().in_progress());
        assert!(engine.disable_mag());
    }

    #[test]
    fn gps_flag_consumed_by_update() {
        let mut engine = RescueEngine::default();
        let mut actuator = TestActuator::default();
        let params = flying_params(10_000);

        engine.on_new_gps_data();
        assert!(engine.new_gps_data.load(Ordering::Acquire));
        engine.update(&params, &mut actuator);
        assert!(!engine.new_gps_data.load(Ordering::Acquire));
    }
}
