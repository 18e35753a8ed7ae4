//! This module contains utilities for testing: float-closeness checks and
//! in-memory stand-ins for the tuner's collaborators.

use core::cell::Cell;

use heapless::Vec;

use crate::{
    hal::{Clock, Scheduler},
    logging::{TuneLogger, TuneRecord},
    params::{Airframe, GainsSlot, ParamF32, ParamI16},
    pid::RatePid,
    util::abs,
};

/// A constant defining the tolerance within which floating-point values
/// are considered close enough to be equal.
pub const TEST_TOLERANCE: f32 = 1e-5;

/// Checks if two floating point numbers are close enough to be considered
/// equal.
pub fn value_close(target: f32, value: f32) -> bool {
    abs(target - value) < TEST_TOLERANCE
}

/// Simulated millisecond clock. Interior mutability lets a test advance time
/// while the tuner holds a shared reference.
pub struct SimClock {
    ms: Cell<u32>,
}

impl SimClock {
    pub fn new() -> Self {
        Self { ms: Cell::new(0) }
    }

    pub fn starting_at(ms: u32) -> Self {
        Self { ms: Cell::new(ms) }
    }

    pub fn set_ms(&self, ms: u32) {
        self.ms.set(ms);
    }

    pub fn advance(&self, ms: u32) {
        self.ms.set(self.ms.get().wrapping_add(ms));
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u32 {
        self.ms.get()
    }

    fn now_us(&self) -> u64 {
        u64::from(self.ms.get()) * 1_000
    }
}

/// Scheduler stub reporting a fixed loop rate.
pub struct FixedScheduler {
    pub loop_rate_hz: u16,
}

impl Scheduler for FixedScheduler {
    fn loop_rate_hz(&self) -> u16 {
        self.loop_rate_hz
    }
}

/// Airframe parameter block stub.
pub struct StubAirframe {
    pub roll_limit_cd: i16,
    pub pitch_limit_max_cd: i16,
    pub pitch_limit_min_cd: i16,
    pub autotune_level: u8,
}

impl StubAirframe {
    /// 45 degree roll and pitch limits, level 0.
    pub fn level(autotune_level: u8) -> Self {
        Self {
            roll_limit_cd: 4_500,
            pitch_limit_max_cd: 4_500,
            pitch_limit_min_cd: -4_500,
            autotune_level,
        }
    }
}

impl Airframe for StubAirframe {
    fn roll_limit_cd(&self) -> i16 {
        self.roll_limit_cd
    }

    fn pitch_limit_max_cd(&self) -> i16 {
        self.pitch_limit_max_cd
    }

    fn pitch_limit_min_cd(&self) -> i16 {
        self.pitch_limit_min_cd
    }

    fn autotune_level(&self) -> u8 {
        self.autotune_level
    }
}

/// In-memory float parameter recording every committed value.
pub struct StoredF32 {
    pub value: f32,
    pub saves: Vec<f32, 16>,
}

impl StoredF32 {
    pub fn new(value: f32) -> Self {
        Self {
            value,
            saves: Vec::new(),
        }
    }
}

impl ParamF32 for StoredF32 {
    fn get(&self) -> f32 {
        self.value
    }

    fn set(&mut self, v: f32) {
        self.value = v;
    }

    fn save(&mut self) {
        let _ = self.saves.push(self.value);
    }
}

/// In-memory integer parameter recording every committed value.
pub struct StoredI16 {
    pub value: i16,
    pub saves: Vec<i16, 16>,
}

impl StoredI16 {
    pub fn new(value: i16) -> Self {
        Self {
            value,
            saves: Vec::new(),
        }
    }
}

impl ParamI16 for StoredI16 {
    fn get(&self) -> i16 {
        self.value
    }

    fn set(&mut self, v: i16) {
        self.value = v;
    }

    fn save(&mut self) {
        let _ = self.saves.push(self.value);
    }
}

/// Rate PID stand-in: a bag of parameter handles.
pub struct MockRatePid {
    pub ff: StoredF32,
    pub p: StoredF32,
    pub i: StoredF32,
    pub d: StoredF32,
    pub imax: StoredF32,
    pub slew_limit: StoredF32,
}

impl MockRatePid {
    pub fn new(ff: f32, p: f32, i: f32, d: f32, imax: f32) -> Self {
        Self {
            ff: StoredF32::new(ff),
            p: StoredF32::new(p),
            i: StoredF32::new(i),
            d: StoredF32::new(d),
            imax: StoredF32::new(imax),
            slew_limit: StoredF32::new(150.),
        }
    }
}

impl RatePid for MockRatePid {
    type Gain = StoredF32;

    fn ff(&mut self) -> &mut StoredF32 {
        &mut self.ff
    }

    fn kp(&mut self) -> &mut StoredF32 {
        &mut self.p
    }

    fn ki(&mut self) -> &mut StoredF32 {
        &mut self.i
    }

    fn kd(&mut self) -> &mut StoredF32 {
        &mut self.d
    }

    fn kimax(&mut self) -> &mut StoredF32 {
        &mut self.imax
    }

    fn slew_limit(&mut self) -> &mut StoredF32 {
        &mut self.slew_limit
    }
}

/// Envelope parameter slot stand-in.
pub struct MockGainsSlot {
    pub tau: StoredF32,
    pub rmax_pos: StoredI16,
    pub rmax_neg: StoredI16,
}

impl MockGainsSlot {
    pub fn new(tau: f32, rmax_pos: i16, rmax_neg: i16) -> Self {
        Self {
            tau: StoredF32::new(tau),
            rmax_pos: StoredI16::new(rmax_pos),
            rmax_neg: StoredI16::new(rmax_neg),
        }
    }
}

impl GainsSlot for MockGainsSlot {
    type F = StoredF32;
    type I = StoredI16;

    fn tau(&mut self) -> &mut StoredF32 {
        &mut self.tau
    }

    fn rmax_pos(&mut self) -> &mut StoredI16 {
        &mut self.rmax_pos
    }

    fn rmax_neg(&mut self) -> &mut StoredI16 {
        &mut self.rmax_neg
    }
}

/// Logger sink that counts records and keeps the most recent one.
#[derive(Default)]
pub struct CountingLogger {
    pub count: u32,
    pub last: Option<TuneRecord>,
}

impl TuneLogger for CountingLogger {
    fn write_block(&mut self, record: &TuneRecord) {
        self.count += 1;
        self.last = Some(*record);
    }
}
