//! Sanity supervision: detects fly-away conditions, stalls, satellite loss
//! and crashes mid-rescue, and decides between aborting, holding, or
//! carrying on. Also hosts the OSD-facing availability probe.
//!
//! Two cadences share one entry point: fault detection and the policy
//! reaction run every tick, while the progress counters advance once per
//! second off the microsecond clock.

use log::warn;

use crate::{
    config::{RescueConfig, SanityChecks},
    debug::DebugChannels,
    params::Params,
    sensors::SensorView,
    state::{Failure, Intent, Phase},
};

const SLOW_TICK_US: u64 = 1_000_000;

// Counter ceilings, in seconds. Hitting the ceiling trips the check.
const STALL_LIMIT_S: i8 = 20;
const CLIMB_LIMIT_S: i8 = 10;
const DO_NOTHING_LIMIT_S: i8 = 10;
const LOW_SATS_LIMIT_S: i8 = 10;

/// Supervisor memory. Re-seeded each time a rescue starts.
#[derive(Clone, Default)]
pub struct SanityChecker {
    previous_time_us: u64,
    prev_altitude_cm: i32,
    seconds_low_sats: i8,
    seconds_doing_nothing: i8,
}

impl SanityChecker {
    /// Re-seed the supervisor memory. Run once when a rescue starts.
    pub fn init(&mut self, sensor: &SensorView, params: &Params) {
        self.previous_time_us = params.time_us;
        self.prev_altitude_cm = sensor.current_altitude_cm;
        // Start the count high to be less forgiving right after launch of
        // a rescue.
        self.seconds_low_sats = 5;
        self.seconds_doing_nothing = 0;
    }

    /// Run the per-tick pass and, once per second, the counter pass.
    /// Writes failures, and moves `phase` to Abort or DoNothing per the
    /// configured policy.
    #[allow(clippy::too_many_arguments)]
    pub fn check(
        &mut self,
        phase: &mut Phase,
        failure: &mut Failure,
        intent: &mut Intent,
        sensor: &SensorView,
        config: &RescueConfig,
        params: &Params,
        mag_force_disable: &mut bool,
        debug: &mut DebugChannels,
    ) {
        if *phase == Phase::Idle {
            *failure = Failure::Healthy;
            return;
        }

        if params.status.crash_recovery_active {
            *failure = Failure::CrashFlipDetected;
        }
        if !sensor.healthy {
            *failure = Failure::GpsLost;
        }

        // Don't disarm over a fault during a stick-induced rescue unless
        // the pilot asked for strict checks.
        if *failure != Failure::Healthy {
            let hard_failsafe = !params.rc.receiving_signal;
            let next = match config.sanity_checks {
                SanityChecks::On => Phase::Abort,
                SanityChecks::FailsafeOnly if hard_failsafe => Phase::Abort,
                _ => Phase::DoNothing,
            };
            if *phase != next {
                warn!("rescue fault {:?}, moving to {:?}", failure, next);
            }
            *phase = next;
        }

        if params.time_us.saturating_sub(self.previous_time_us) < SLOW_TICK_US {
            return;
        }
        self.previous_time_us = params.time_us;

        match *phase {
            Phase::FlyHome => {
                let making_way =
                    sensor.velocity_to_home_cm_s >= 0.5 * intent.target_velocity_cm_s;
                intent.seconds_failing += if making_way { -1 } else { 1 };
                intent.seconds_failing = intent.seconds_failing.clamp(0, STALL_LIMIT_S);
                if intent.seconds_failing == STALL_LIMIT_S {
                    if params.status.mag_available && config.use_mag && !*mag_force_disable {
                        // The mag may be feeding the IMU a bad heading; try
                        // once more without it before giving up.
                        *mag_force_disable = true;
                        intent.seconds_failing = 0;
                        warn!("no progress to home; disabling mag and retrying");
                    } else {
                        *failure = Failure::Stalled;
                    }
                }
            }
            // The climb and descent checks apply even with sanity checks
            // off: stuck in a tree, or on the ground with motors running,
            // there is nothing useful left to do but stop.
            Phase::AttainAlt => {
                let climb_cm = sensor.current_altitude_cm - self.prev_altitude_cm;
                let climbing = climb_cm as f32 > 0.5 * config.ascend_rate_cm_s as f32;
                intent.seconds_failing += if climbing { -1 } else { 1 };
                intent.seconds_failing = intent.seconds_failing.clamp(0, CLIMB_LIMIT_S);
                if intent.seconds_failing == CLIMB_LIMIT_S {
                    *phase = Phase::Abort;
                }
            }
            Phase::Descent | Phase::Landing => {
                let sink_cm = self.prev_altitude_cm - sensor.current_altitude_cm;
                let sinking = sink_cm as f32 > 0.5 * config.descend_rate_cm_s as f32;
                intent.seconds_failing += if sinking { -1 } else { 1 };
                intent.seconds_failing = intent.seconds_failing.clamp(0, CLIMB_LIMIT_S);
                if intent.seconds_failing == CLIMB_LIMIT_S {
                    *phase = Phase::Abort;
                }
            }
            Phase::DoNothing => {
                // Time-limit the hold so a rescue with checks relaxed can't
                // drift away indefinitely.
                self.seconds_doing_nothing =
                    (self.seconds_doing_nothing + 1).min(DO_NOTHING_LIMIT_S);
                if self.seconds_doing_nothing == DO_NOTHING_LIMIT_S {
                    *phase = Phase::Abort;
                }
            }
            _ => {}
        }
        self.prev_altitude_cm = sensor.current_altitude_cm;

        self.seconds_low_sats += if params.gps.num_sats < params.gps.min_sats {
            1
        } else {
            -1
        };
        self.seconds_low_sats = self.seconds_low_sats.clamp(0, LOW_SATS_LIMIT_S);
        if self.seconds_low_sats == LOW_SATS_LIMIT_S {
            *failure = Failure::LowSats;
        }

        debug.rth[2] = *failure as u8 as f32;
        debug.rth[3] = (intent.seconds_failing as i16 * 100 + self.seconds_low_sats as i16) as f32;
    }
}

/// OSD-facing readiness probe, independent of the supervisor: its counters
/// never influence the controllers, they only drive the "RESCUE N/A"
/// warning. Satellite count must stay under the minimum for 2 of this
/// probe's own slow ticks before it reports unavailable.
#[derive(Clone, Default)]
pub struct AvailabilityCheck {
    previous_time_us: u64,
    seconds_low_sats: i8,
    low_sats: bool,
    no_fix: bool,
}

impl AvailabilityCheck {
    pub fn check(&mut self, params: &Params) -> bool {
        if !params.gps.healthy || !params.gps.fix_home {
            return false;
        }

        if params.time_us.saturating_sub(self.previous_time_us) < SLOW_TICK_US {
            return !(self.no_fix || self.low_sats);
        }
        self.previous_time_us = params.time_us;

        self.no_fix = !params.gps.fix;

        self.seconds_low_sats = (self.seconds_low_sats
            + if params.gps.num_sats < params.gps.min_sats {
                1
            } else {
                -1
            })
        .clamp(0, 2);
        self.low_sats = self.seconds_low_sats == 2;

        !(self.no_fix || self.low_sats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_params(time_us: u64) -> Params {
        let mut params = Params::default();
        params.time_us = time_us;
        params.gps.healthy = true;
        params.gps.fix = true;
        params.gps.fix_home = true;
        params.gps.num_sats = 12;
        params.gps.min_sats = 8;
        params
    }

    fn init_checker(checker: &mut SanityChecker, sensor: &SensorView, params: &Params) {
        checker.init(sensor, params);
    }

    #[test]
    fn idle_resets_failure() {
        let mut checker = SanityChecker::default();
        let mut phase = Phase::Idle;
        let mut failure = Failure::GpsLost;
        let mut intent = Intent::default();
        let mut mag = false;
        checker.check(
            &mut phase,
            &mut failure,
            &mut intent,
            &SensorView::default(),
            &RescueConfig::default(),
            &base_params(0),
            &mut mag,
            &mut DebugChannels::default(),
        );
        assert_eq!(failure, Failure::Healthy);
        assert_eq!(phase, Phase::Idle);
    }

    #[test]
    fn gps_loss_policy_reactions() {
        for (policy, receiving, expected) in [
            (SanityChecks::On, true, Phase::Abort),
            (SanityChecks::FailsafeOnly, true, Phase::DoNothing),
            (SanityChecks::FailsafeOnly, false, Phase::Abort),
            (SanityChecks::Off, false, Phase::DoNothing),
        ] {
            let mut config = RescueConfig::default();
            config.sanity_checks = policy;
            let mut checker = SanityChecker::default();
            let mut sensor = SensorView::default();
            sensor.healthy = false;
            let mut params = base_params(1_000_000);
            params.rc.receiving_signal = receiving;

            let mut phase = Phase::FlyHome;
            let mut failure = Failure::Healthy;
            let mut intent = Intent::default();
            let mut mag = false;
            checker.check(
                &mut phase,
                &mut failure,
                &mut intent,
                &sensor,
                &config,
                &params,
                &mut mag,
                &mut DebugChannels::default(),
            );
            assert_eq!(failure, Failure::GpsLost);
            assert_eq!(phase, expected, "policy {policy:?} receiving {receiving}");
        }
    }

    #[test]
    fn crash_flip_reported() {
        let mut checker = SanityChecker::default();
        let mut sensor = SensorView::default();
        sensor.healthy = true;
        let mut params = base_params(1_000_000);
        params.status.crash_recovery_active = true;

        let mut phase = Phase::Descent;
        let mut failure = Failure::Healthy;
        let mut intent = Intent::default();
        let mut mag = false;
        checker.check(
            &mut phase,
            &mut failure,
            &mut intent,
            &sensor,
            &RescueConfig::default(),
            &params,
            &mut mag,
            &mut DebugChannels::default(),
        );
        assert_eq!(failure, Failure::CrashFlipDetected);
    }

    #[test]
    fn stall_raises_failure_without_mag() {
        let mut checker = SanityChecker::default();
        let mut sensor = SensorView::default();
        sensor.healthy = true;
        sensor.velocity_to_home_cm_s = 200.;
        let mut config = RescueConfig::default();
        config.use_mag = false;

        init_checker(&mut checker, &sensor, &base_params(0));

        let mut phase = Phase::FlyHome;
        let mut failure = Failure::Healthy;
        let mut intent = Intent {
            target_velocity_cm_s: 500.,
            ..Default::default()
        };
        let mut mag = false;
        for second in 1..=20u64 {
            checker.check(
                &mut phase,
                &mut failure,
                &mut intent,
                &sensor,
                &config,
                &base_params(second * SLOW_TICK_US),
                &mut mag,
                &mut DebugChannels::default(),
            );
        }
        assert_eq!(failure, Failure::Stalled);
        assert!(!mag);
    }

    #[test]
    fn stall_disables_mag_once_before_failing() {
        let mut checker = SanityChecker::default();
        let mut sensor = SensorView::default();
        sensor.healthy = true;
        sensor.velocity_to_home_cm_s = 0.;
        let config = RescueConfig::default(); // use_mag = true
        let mut params = base_params(0);
        params.status.mag_available = true;

        init_checker(&mut checker, &sensor, &params);

        let mut phase = Phase::FlyHome;
        let mut failure = Failure::Healthy;
        let mut intent = Intent {
            target_velocity_cm_s: 500.,
            ..Default::default()
        };
        let mut mag = false;
        for second in 1..=20u64 {
            let mut p = params.clone();
            p.time_us = second * SLOW_TICK_US;
            checker.check(
                &mut phase,
                &mut failure,
                &mut intent,
                &sensor,
                &config,
                &p,
                &mut mag,
                &mut DebugChannels::default(),
            );
        }
        // First trip: mag turned off, counter reset, still healthy.
        assert!(mag);
        assert_eq!(failure, Failure::Healthy);
        assert_eq!(intent.seconds_failing, 0);

        for second in 21..=40u64 {
            let mut p = params.clone();
            p.time_us = second * SLOW_TICK_US;
            checker.check(
                &mut phase,
                &mut failure,
                &mut intent,
                &sensor,
                &config,
                &p,
                &mut mag,
                &mut DebugChannels::default(),
            );
        }
        // Second trip with the mag already off escalates.
        assert_eq!(failure, Failure::Stalled);
    }

    #[test]
    fn blocked_climb_aborts_after_ten_seconds() {
        let mut checker = SanityChecker::default();
        let mut sensor = SensorView::default();
        sensor.healthy = true;
        sensor.current_altitude_cm = 2000; // never climbs

        init_checker(&mut checker, &sensor, &base_params(0));

        let mut phase = Phase::AttainAlt;
        let mut failure = Failure::Healthy;
        let mut intent = Intent::default();
        let mut mag = false;
        for second in 1..=10u64 {
            checker.check(
                &mut phase,
                &mut failure,
                &mut intent,
                &sensor,
                &RescueConfig::default(),
                &base_params(second * SLOW_TICK_US),
                &mut mag,
                &mut DebugChannels::default(),
            );
        }
        assert_eq!(phase, Phase::Abort);
    }

    #[test]
    fn low_sats_trips_after_counter_saturates() {
        let mut checker = SanityChecker::default();
        let mut sensor = SensorView::default();
        sensor.healthy = true;

        init_checker(&mut checker, &sensor, &base_params(0));

        let mut phase = Phase::FlyHome;
        let mut failure = Failure::Healthy;
        let mut intent = Intent {
            // Keep the stall check quiet.
            target_velocity_cm_s: 0.,
            ..Default::default()
        };
        let mut mag = false;
        let mut tripped_at = 0;
        for second in 1..=10u64 {
            let mut params = base_params(second * SLOW_TICK_US);
            params.gps.num_sats = 5;
            checker.check(
                &mut phase,
                &mut failure,
                &mut intent,
                &sensor,
                &RescueConfig::default(),
                &params,
                &mut mag,
                &mut DebugChannels::default(),
            );
            if failure == Failure::LowSats && tripped_at == 0 {
                tripped_at = second;
            }
        }
        // Counter starts at 5 on rescue start, so the trip comes early.
        assert_eq!(tripped_at, 5);
    }

    #[test]
    fn do_nothing_times_out_to_abort() {
        let mut checker = SanityChecker::default();
        let mut sensor = SensorView::default();
        sensor.healthy = true;

        init_checker(&mut checker, &sensor, &base_params(0));

        let mut phase = Phase::DoNothing;
        let mut failure = Failure::Healthy;
        let mut intent = Intent::default();
        let mut mag = false;
        for second in 1..=10u64 {
            checker.check(
                &mut phase,
                &mut failure,
                &mut intent,
                &sensor,
                &RescueConfig::default(),
                &base_params(second * SLOW_TICK_US),
                &mut mag,
                &mut DebugChannels::default(),
            );
        }
        assert_eq!(phase, Phase::Abort);
    }

    #[test]
    fn availability_needs_home_and_health() {
        let mut probe = AvailabilityCheck::default();
        let mut params = base_params(SLOW_TICK_US);
        assert!(probe.check(&params));

        params.gps.fix_home = false;
        assert!(!probe.check(&params));

        params.gps.fix_home = true;
        params.gps.healthy = false;
        assert!(!probe.check(&params));
    }

    #[test]
    fn availability_drops_after_two_low_sat_seconds() {
        let mut probe = AvailabilityCheck::default();
        let mut results = Vec::new();
        for second in 1..=4u64 {
            let mut params = base_params(second * SLOW_TICK_US);
            params.gps.num_sats = 5;
            results.push(probe.check(&params));
        }
        assert_eq!(results, vec![true, false, false, false]);

        // Recovers as soon as the counter decays below its ceiling.
        let mut params = base_params(5 * SLOW_TICK_US);
        params.gps.num_sats = 12;
        assert!(probe.check(&params));
    }
}
