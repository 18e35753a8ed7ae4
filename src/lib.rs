//! Online autotuner for the attitude-rate PID loops of a fixed-wing aircraft.
//!
//! The tuner rides along inside the inner rate loop while the pilot hand-flies
//! the aircraft in an ordinary attitude-stabilized mode. Each time the pilot
//! demands a solid roll or pitch rate, the tuner treats it as an identification
//! event: it estimates feed-forward from the actuator/rate ratio, then raises
//! or lowers P and D based on overshoot and slew-limiter activity, and derives
//! I from the result. RMAX and the attitude time constant are slewed toward a
//! profile selected by an aggressiveness level.
//!
//! Gains are committed to the parameter store every 10 seconds, but each commit
//! stores the gains from 10 seconds *ago*. Leaving the tuning mode restores
//! that lagged snapshot, so a pilot who dislikes how the aircraft has started
//! to feel just exits the mode and gets back gains that were flying well. No
//! extra switches are needed; entering and exiting the mode is the whole
//! interface.
//!
//! Board support (sensors, RC, OSD, telemetry, power) lives elsewhere; this
//! crate reaches the rate PID, parameter store, clock, scheduler and logger
//! through small traits so it can run on hardware or on the bench unchanged.

#![no_std]

pub mod autotune;
pub mod filters;
pub mod hal;
pub mod logging;
pub mod params;
pub mod pid;
pub mod test_utils;
pub mod util;

pub use crate::{
    autotune::{Action, AutoTune, TuneGains, TuneState},
    logging::{TuneLogger, TuneRecord},
    pid::{Axis, PidInfo, RatePid},
};
