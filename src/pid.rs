//! Types shared with the attitude-rate PID controller: the tuned axis, the
//! per-cycle telemetry the controller reports, and the trait through which
//! the tuner reads and writes the controller's gains.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::params::ParamF32;

/// Which axis this tuner instance works on. Selects the attitude-limit
/// fields read from the airframe parameter block.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Axis {
    Roll = 0,
    Pitch = 1,
}

/// Per-cycle telemetry from the rate PID: the demanded and measured rates,
/// the individual term contributions to the surface command, the slew
/// limiter's D attenuation (1 = not limiting), and the observed slew rate of
/// the controller output.
#[derive(Clone, Copy, Default, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PidInfo {
    pub target: f32,
    pub actual: f32,
    pub ff: f32,
    pub p: f32,
    pub i: f32,
    pub d: f32,
    pub dmod: f32,
    pub slew_rate: f32,
}

/// The rate PID collaborator. Each gain is exposed as a persisted parameter
/// handle; the slew limit is the configured ceiling the increase law keeps
/// headroom below, in the same units as `PidInfo::slew_rate`.
pub trait RatePid {
    type Gain: ParamF32;

    fn ff(&mut self) -> &mut Self::Gain;
    fn kp(&mut self) -> &mut Self::Gain;
    fn ki(&mut self) -> &mut Self::Gain;
    fn kd(&mut self) -> &mut Self::Gain;
    fn kimax(&mut self) -> &mut Self::Gain;
    fn slew_limit(&mut self) -> &mut Self::Gain;
}
