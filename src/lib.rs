//! GPS return-to-home rescue subsystem for multirotor flight controllers.
//!
//! When the rescue mode activates, typically on radio failsafe, the aircraft
//! climbs to a safe return altitude, yaws until its nose points at the home
//! point recorded on arming, flies back, and performs a controlled descent
//! and landing, all without pilot stick input. The subsystem produces
//! setpoint overrides (pitch and roll angle biases, a yaw rate, a throttle
//! value) that the angle-mode attitude controller and mixer consume; it does
//! not drive motors itself.
//!
//! Everything runs cooperatively from the main flight loop via
//! [`RescueEngine::update`]. GPS arrives much slower than the loop rate, so
//! GPS-derived terms are recomputed only when the driver flags a fresh
//! sample, and all sample-rate-dependent controller terms are normalised by
//! the measured GPS interval.
//!
//! [Betaflight GPS Rescue overview](https://github.com/betaflight/betaflight/wiki/GPS-rescue)

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod debug;
pub mod engine;
pub mod filters;
pub mod params;
pub mod pid;
pub mod safety;
pub mod sensors;
pub mod state;
pub mod util;

pub use crate::{
    config::{AltitudeMode, ConfigError, RescueConfig, SanityChecks},
    engine::RescueEngine,
    params::{ArmingActuator, ArmingDisabledReason, DisarmReason, Params},
    state::{Failure, Intent, Phase},
};
