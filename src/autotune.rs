//! The autotune core: a small state machine driven by the rate PID's
//! per-cycle telemetry. It watches for pilot rate demands, estimates
//! feed-forward from the actuator/rate ratio of each completed demand event,
//! and nudges P, D and I from overshoot and slew-limiter evidence, while
//! slewing the RMAX/tau envelope toward the selected aggressiveness level.
//!
//! Everything here runs inside the inner loop: no allocation, no blocking,
//! bounded work per tick.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    filters::{LowPassFilter, MedianFilter},
    hal::{Clock, Scheduler},
    logging::{TuneLogger, TuneRecord},
    params::{save_f32_if_changed, save_i16_if_changed, Airframe, GainsSlot, ParamF32, ParamI16},
    pid::{Axis, PidInfo, RatePid},
    util::{abs, clamp, is_positive, linear_interpolate},
};

// Time between delayed gain commits. Also the window the pilot has to bail
// out and get pre-drift gains back.
const SAVE_PERIOD_MS: u32 = 10_000;

// Per-event growth and shrink caps on the gains.
const INCREASE_FF_STEP: f32 = 0.12;
const DECREASE_FF_STEP: f32 = 0.15;
const INCREASE_PD_STEP: f32 = 0.10;
const DECREASE_PD_STEP: f32 = 0.20;

const MIN_IMAX: f32 = 0.4;
const MAX_IMAX: f32 = 0.9;

// Ratio of I to P, and the time constant of the rate trim loop that bounds
// I from below via FF.
const I_RATIO: f32 = 0.75;
const TRIM_TCONST: f32 = 1.0;

// Achieved/demanded rate ratio above which an event counts as overshoot.
const OVERSHOOT: f32 = 1.1;

// Tuning records are emitted at most this often (25 Hz).
const LOG_PERIOD_MS: u32 = 40;

/// Starting envelope per aggressiveness level 1..=11: (tau, rmax). Level 1
/// is a very soft tune; it goes to 11. Level 0 keeps the current envelope.
const TUNING_TABLE: [(f32, i16); 11] = [
    (1.00, 20),
    (0.90, 30),
    (0.80, 40),
    (0.70, 50),
    (0.60, 60),
    (0.50, 75),
    (0.30, 90),
    (0.20, 120),
    (0.15, 160),
    (0.10, 210),
    (0.10, 300),
];

/// A complete set of tunable values: the envelope (tau, rate limits) plus
/// the PID gains. Plain copyable value; the persistence ring holds four of
/// these.
#[derive(Clone, Copy, Default, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TuneGains {
    /// Attitude time constant, seconds.
    pub tau: f32,
    /// Rate limits, degrees/second.
    pub rmax_pos: i16,
    pub rmax_neg: i16,
    pub ff: f32,
    pub p: f32,
    pub i: f32,
    pub d: f32,
    pub imax: f32,
}

/// Demand-event detection state.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TuneState {
    Idle = 0,
    DemandPos = 1,
    DemandNeg = 2,
}

/// What the tuner did with the last completed event. Logging only.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Action {
    None = 0,
    /// Event discarded: the aircraft never reached a usable rate.
    LowRate = 1,
    /// Event discarded: too short to measure.
    Short = 2,
    RaisePd = 3,
    LowerPd = 4,
    /// P or D reduced because the slew limiter kept firing while idle.
    IdleLowerPd = 5,
}

/// Autotuner for one roll or pitch rate loop.
///
/// Construct one per tuned axis, bound to that axis's rate PID and envelope
/// parameter slot. `start`/`stop` are called from the mode-transition path;
/// `update` once per inner-loop cycle with the PID's telemetry.
pub struct AutoTune<C, S, A, R, G, L> {
    axis: Axis,
    slot: G,
    aparm: A,
    rpid: R,
    clock: C,
    sched: S,
    logger: L,

    running: bool,
    state: TuneState,
    state_enter_ms: u32,
    last_save_ms: u32,
    last_log_ms: u32,

    // Snapshot ring for the delayed commit: `next_save` lags the live gains
    // by one save period, `restore` is what the pilot gets back on stop.
    current: TuneGains,
    restore: TuneGains,
    last_save: TuneGains,
    next_save: TuneGains,

    actuator_filter: LowPassFilter,
    rate_filter: LowPassFilter,
    target_filter: LowPassFilter,
    ff_filter: MedianFilter<2>,

    // Extrema gathered over the current event.
    min_actuator: f32,
    max_actuator: f32,
    min_rate: f32,
    max_rate: f32,
    min_target: f32,
    max_target: f32,
    max_p: f32,
    max_d: f32,
    min_dmod: f32,
    max_dmod: f32,
    max_srate: f32,

    ff_single: f32,
    action: Action,
}

impl<C, S, A, R, G, L> AutoTune<C, S, A, R, G, L>
where
    C: Clock,
    S: Scheduler,
    A: Airframe,
    R: RatePid,
    G: GainsSlot,
    L: TuneLogger,
{
    pub fn new(slot: G, axis: Axis, aparm: A, rpid: R, clock: C, sched: S, logger: L) -> Self {
        Self {
            axis,
            slot,
            aparm,
            rpid,
            clock,
            sched,
            logger,
            running: false,
            state: TuneState::Idle,
            state_enter_ms: 0,
            last_save_ms: 0,
            last_log_ms: 0,
            current: TuneGains::default(),
            restore: TuneGains::default(),
            last_save: TuneGains::default(),
            next_save: TuneGains::default(),
            actuator_filter: LowPassFilter::default(),
            rate_filter: LowPassFilter::default(),
            target_filter: LowPassFilter::default(),
            ff_filter: MedianFilter::new(),
            min_actuator: 0.,
            max_actuator: 0.,
            min_rate: 0.,
            max_rate: 0.,
            min_target: 0.,
            max_target: 0.,
            max_p: 0.,
            max_d: 0.,
            min_dmod: 1.,
            max_dmod: 0.,
            max_srate: 0.,
            ff_single: 0.,
            action: Action::None,
        }
    }

    /// Begin a tuning session. Captures the gains currently flying as the
    /// restore point. Safe to call again while running; that re-baselines
    /// the session on the current gains.
    pub fn start(&mut self) {
        self.running = true;
        self.state = TuneState::Idle;

        let now = self.clock.now_ms();
        self.last_save_ms = now;
        self.state_enter_ms = now;

        let mut gains = self.get_gains();

        // A zero FF would wedge the estimator; so would an unbounded
        // integrator.
        if gains.ff < 0.01 {
            gains.ff = 0.01;
            self.rpid.ff().set(gains.ff);
        }
        clamp(&mut gains.imax, (MIN_IMAX, MAX_IMAX));
        self.rpid.kimax().set(gains.imax);

        self.current = gains;
        self.restore = gains;
        self.last_save = gains;

        // 0.75Hz filters on the actuator and rate reduce the impact of
        // noise; the target filter is a bit broader.
        let loop_rate_hz = f32::from(self.sched.loop_rate_hz());
        self.actuator_filter.set_cutoff_frequency(loop_rate_hz, 0.75);
        self.rate_filter.set_cutoff_frequency(loop_rate_hz, 0.75);
        self.target_filter.set_cutoff_frequency(loop_rate_hz, 4.);

        self.actuator_filter.reset();
        self.rate_filter.reset();
        self.target_filter.reset();
        self.ff_filter.reset();

        self.min_actuator = 0.;
        self.max_actuator = 0.;
        self.min_rate = 0.;
        self.max_rate = 0.;
        self.min_target = 0.;
        self.max_target = 0.;
        self.max_p = 0.;
        self.max_d = 0.;
        self.min_dmod = 1.;
        self.max_dmod = 0.;
        self.max_srate = 0.;
        self.ff_single = 0.;
        self.action = Action::None;

        if !is_positive(self.rpid.slew_limit().get()) {
            // The increase law needs a slew ceiling to stay below.
            self.rpid.slew_limit().set_and_save(150.);
        }

        self.update_rmax();
        self.next_save = self.current;

        #[cfg(feature = "defmt")]
        defmt::debug!("autotune start, FF {}", self.current.ff);
    }

    /// End the tuning session, handing the PID back the snapshot from one
    /// save period ago. Idempotent.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;

        // The store already holds the snapshot being restored in the common
        // case; seed the handles with it so unchanged gains elide writes.
        self.set_gains(self.last_save);
        self.save_gains(self.restore);
        self.current = self.restore;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Gains currently applied to the PID.
    pub fn gains(&self) -> &TuneGains {
        &self.current
    }

    pub fn rate_pid(&self) -> &R {
        &self.rpid
    }

    pub fn logger(&self) -> &L {
        &self.logger
    }

    /// One update cycle. Call at the loop rate with the PID telemetry, the
    /// airspeed scaler applied to the surface commands, and the attitude
    /// error in degrees.
    pub fn update(&mut self, pinfo: &PidInfo, scaler: f32, angle_err_deg: f32) {
        if !self.running {
            return;
        }
        self.check_save();

        let mut new_state = self.state;
        let desired_rate = self.target_filter.apply(pinfo.target);

        // Filter the actuator with the I term removed so ratios aren't
        // biased by trim. The I must be included before the surface clip to
        // recover what the surface actually did.
        let clipped_actuator = (pinfo.ff + pinfo.p + pinfo.d + pinfo.i).clamp(-45., 45.) - pinfo.i;
        let actuator = self.actuator_filter.apply(clipped_actuator);
        let actual_rate = self.rate_filter.apply(pinfo.actual);

        self.max_actuator = self.max_actuator.max(actuator);
        self.min_actuator = self.min_actuator.min(actuator);
        self.max_rate = self.max_rate.max(actual_rate);
        self.min_rate = self.min_rate.min(actual_rate);
        self.max_target = self.max_target.max(desired_rate);
        self.min_target = self.min_target.min(desired_rate);
        self.max_p = self.max_p.max(abs(pinfo.p));
        self.max_d = self.max_d.max(abs(pinfo.d));
        self.min_dmod = self.min_dmod.min(pinfo.dmod);
        self.max_dmod = self.max_dmod.max(pinfo.dmod);
        self.max_srate = self.max_srate.max(pinfo.slew_rate);

        let att_limit_deg = self.att_limit_deg();

        // An event starts when the filtered demand clears threshold1 while
        // a real attitude error is driving it, and ends when the demand
        // falls back through threshold2.
        let rate_threshold1 =
            0.6 * (att_limit_deg / self.current.tau).min(f32::from(self.current.rmax_pos));
        let rate_threshold2 = 0.25 * rate_threshold1;
        let in_att_demand = abs(angle_err_deg) >= 0.3 * att_limit_deg;

        match self.state {
            TuneState::Idle => {
                if desired_rate > rate_threshold1 && in_att_demand {
                    new_state = TuneState::DemandPos;
                } else if desired_rate < -rate_threshold1 && in_att_demand {
                    new_state = TuneState::DemandNeg;
                }
            }
            TuneState::DemandPos => {
                if desired_rate < rate_threshold2 {
                    new_state = TuneState::Idle;
                }
            }
            TuneState::DemandNeg => {
                if desired_rate > -rate_threshold2 {
                    new_state = TuneState::Idle;
                }
            }
        }

        let now = self.clock.now_ms();

        if now.wrapping_sub(self.last_log_ms) >= LOG_PERIOD_MS {
            self.write_log(new_state, actuator, desired_rate, actual_rate);
            self.last_log_ms = now;
        }

        if new_state == self.state {
            if self.state == TuneState::Idle
                && now.wrapping_sub(self.state_enter_ms) > 500
                && self.max_dmod < 0.9
            {
                // The slew limiter has been engaging without any demand:
                // we're oscillating in trim. Back off the louder gain.
                let gain_mul = 1. - DECREASE_PD_STEP;
                if self.max_p < self.max_d {
                    self.current.d *= gain_mul;
                } else {
                    self.current.p *= gain_mul;
                }
                self.rpid.kp().set(self.current.p);
                self.rpid.kd().set(self.current.d);
                self.action = Action::IdleLowerPd;
                self.state_change(self.state);
            }
            return;
        }

        if new_state != TuneState::Idle {
            // Event start.
            self.min_actuator = 0.;
            self.max_actuator = 0.;
            self.min_rate = 0.;
            self.max_rate = 0.;
            self.state_enter_ms = now;
            self.state = new_state;
            return;
        }

        // Back to idle: judge the event before adjusting anything.
        if (self.state == TuneState::DemandPos
            && self.max_rate < 0.01 * f32::from(self.current.rmax_pos))
            || (self.state == TuneState::DemandNeg
                && self.min_rate > -0.01 * f32::from(self.current.rmax_neg))
        {
            self.action = Action::LowRate;
            self.state_change(TuneState::Idle);
            return;
        }

        if now.wrapping_sub(self.state_enter_ms) < 100 {
            self.action = Action::Short;
            self.state_change(TuneState::Idle);
            return;
        }

        self.ff_single = if self.state == TuneState::DemandPos {
            self.max_actuator / (self.max_rate * scaler)
        } else {
            self.min_actuator / (self.min_rate * scaler)
        };
        if !self.ff_single.is_finite() {
            // A degenerate ratio can't teach us anything.
            self.action = Action::LowRate;
            self.state_change(TuneState::Idle);
            return;
        }

        let mut ff = self.ff_filter.apply(self.ff_single);
        let old_ff = self.rpid.ff().get();
        clamp(
            &mut ff,
            (
                old_ff * (1. - DECREASE_FF_STEP),
                old_ff * (1. + INCREASE_FF_STEP),
            ),
        );

        // Did P or D carry more than 30% of the surface command?
        let abs_actuator = self.max_actuator.max(abs(self.min_actuator));
        let pd_high = 0.3 * abs_actuator;
        let pd_significant = self.max_p > pd_high || self.max_d > pd_high;

        let dem_ratio = if self.state == TuneState::DemandPos {
            (self.max_rate / self.max_target).clamp(0.1, 2.)
        } else {
            (self.min_rate / self.min_target).clamp(0.1, 2.)
        };
        let overshot = dem_ratio > OVERSHOOT;

        let mut d = self.rpid.kd().get().max(0.0005);
        let mut p = self.rpid.kp().get().max(0.01);

        if self.min_dmod < 1. || (overshot && pd_significant) {
            // Oscillating or overshooting. Shrink in proportion to how hard
            // the slew limiter worked and how far past the demand we went,
            // and take it out of whichever gain peaked higher.
            let gain_mul = 1. - DECREASE_PD_STEP;
            let dmod_mul = linear_interpolate(gain_mul, 1., self.min_dmod, 0.6, 1.0);
            let overshoot_mul =
                linear_interpolate(1., gain_mul, dem_ratio, OVERSHOOT, 1.3 * OVERSHOOT);

            if self.max_p < self.max_d {
                d *= dmod_mul * overshoot_mul;
            } else {
                p *= dmod_mul * overshoot_mul;
            }
            self.action = Action::LowerPd;
        } else {
            // Clean event: raise both gains, tapering the step to nothing as
            // the observed slew rate approaches 60% of the configured limit.
            let slew_limit = self.rpid.slew_limit().get();
            let gain_mul = 1. + INCREASE_PD_STEP;
            let pd_mul = linear_interpolate(
                gain_mul,
                1.,
                self.max_srate,
                0.2 * slew_limit,
                0.6 * slew_limit,
            );
            p *= pd_mul;
            d *= pd_mul;
            self.action = Action::RaisePd;
        }

        self.rpid.ff().set(ff);
        self.rpid.kp().set(p);
        self.rpid.kd().set(d);
        self.rpid.ki().set((p * I_RATIO).max(ff / TRIM_TCONST));

        self.current.ff = ff;
        self.current.p = p;
        self.current.i = self.rpid.ki().get();
        self.current.d = d;

        #[cfg(feature = "defmt")]
        defmt::debug!(
            "autotune FPID ({}, {}, {}, {})",
            self.current.ff,
            self.current.p,
            self.current.i,
            self.current.d,
        );

        self.update_rmax();
        self.state_change(new_state);
    }

    /// Attitude limit for this tuner's axis, degrees.
    fn att_limit_deg(&self) -> f32 {
        match self.axis {
            Axis::Roll => f32::from(self.aparm.roll_limit_cd()) * 0.01,
            Axis::Pitch => {
                let up = (i32::from(self.aparm.pitch_limit_max_cd())).abs();
                let down = (i32::from(self.aparm.pitch_limit_min_cd())).abs();
                up.min(down) as f32 * 0.01
            }
        }
    }

    fn state_change(&mut self, new_state: TuneState) {
        self.min_dmod = 1.;
        self.max_dmod = 0.;
        self.max_srate = 0.;
        self.max_p = 0.;
        self.max_d = 0.;
        self.state = new_state;
        self.state_enter_ms = self.clock.now_ms();
    }

    /// Rotate the snapshot ring once per save period: commit the gains from
    /// one period ago, keep flying the live ones, and make the committed
    /// snapshot the new restore point.
    fn check_save(&mut self) {
        if self.clock.now_ms().wrapping_sub(self.last_save_ms) < SAVE_PERIOD_MS {
            return;
        }

        let tmp = self.get_gains();

        self.save_gains(self.next_save);
        self.last_save = self.next_save;

        // Put the live gains back on the aircraft.
        self.set_gains(tmp);

        // If the pilot exits now, they get the values just committed.
        self.restore = self.next_save;
        self.next_save = tmp;
        self.last_save_ms = self.clock.now_ms();
    }

    /// Read every tuned value out of its handle.
    fn get_gains(&mut self) -> TuneGains {
        TuneGains {
            tau: self.slot.tau().get(),
            rmax_pos: self.slot.rmax_pos().get(),
            rmax_neg: self.slot.rmax_neg().get(),
            ff: self.rpid.ff().get(),
            p: self.rpid.kp().get(),
            i: self.rpid.ki().get(),
            d: self.rpid.kd().get(),
            imax: self.rpid.kimax().get(),
        }
    }

    /// Apply a snapshot to the handles without committing anything.
    fn set_gains(&mut self, v: TuneGains) {
        self.current = v;
        self.slot.tau().set(v.tau);
        self.slot.rmax_pos().set(v.rmax_pos);
        self.slot.rmax_neg().set(v.rmax_neg);
        self.rpid.ff().set(v.ff);
        self.rpid.kp().set(v.p);
        self.rpid.ki().set(v.i);
        self.rpid.kd().set(v.d);
        self.rpid.kimax().set(v.imax);
    }

    /// Commit a snapshot, eliding store writes for values the handles
    /// already hold.
    fn save_gains(&mut self, v: TuneGains) {
        // Seed the envelope handles with their last-committed values so the
        // change test runs against what the store holds.
        self.slot.tau().set(self.last_save.tau);
        self.slot.rmax_pos().set(self.last_save.rmax_pos);
        self.slot.rmax_neg().set(self.last_save.rmax_neg);

        save_f32_if_changed(self.slot.tau(), v.tau);
        save_i16_if_changed(self.slot.rmax_pos(), v.rmax_pos);
        save_i16_if_changed(self.slot.rmax_neg(), v.rmax_neg);
        save_f32_if_changed(self.rpid.ff(), v.ff);
        save_f32_if_changed(self.rpid.kp(), v.p);
        save_f32_if_changed(self.rpid.ki(), v.i);
        save_f32_if_changed(self.rpid.kd(), v.d);
        save_f32_if_changed(self.rpid.kimax(), v.imax);

        self.last_save = self.get_gains();
    }

    /// Move RMAX and tau stepwise toward the envelope for the selected
    /// aggressiveness level, so a pilot can go straight to a hot level from
    /// a soft tune without an instant jump.
    fn update_rmax(&mut self) {
        let level = usize::from(self.aparm.autotune_level()).min(TUNING_TABLE.len());

        let (mut target_tau, target_rmax) = if level == 0 {
            // Keep flying the current envelope, sanity-bounded.
            (
                self.current.tau.clamp(0.1, 2.),
                self.current.rmax_pos.clamp(75, 720),
            )
        } else {
            TUNING_TABLE[level - 1]
        };

        if level > 0 && is_positive(self.current.ff) {
            // A large I/FF ratio means the loop is effectively slower than
            // the table assumes; don't demand a tau it can't deliver.
            let invtau = 1. / target_tau + self.current.i / self.current.ff;
            if is_positive(invtau) {
                target_tau = target_tau.max(1. / invtau);
            }
        }

        if self.current.rmax_pos == 0 {
            // Conservative initial value.
            self.current.rmax_pos = 75;
        }
        // At most 20 deg/s of RMAX movement per step.
        self.current.rmax_pos =
            target_rmax.clamp(self.current.rmax_pos - 20, self.current.rmax_pos + 20);

        if level != 0 || self.current.rmax_neg == 0 {
            self.current.rmax_neg = self.current.rmax_pos;
        }

        // At most 15% of tau movement per step.
        self.current.tau =
            target_tau.clamp(self.current.tau * 0.85, self.current.tau * 1.15);

        self.slot.tau().set(self.current.tau);
        self.slot.rmax_pos().set(self.current.rmax_pos);
        self.slot.rmax_neg().set(self.current.rmax_neg);
    }

    fn write_log(&mut self, state: TuneState, actuator: f32, desired_rate: f32, actual_rate: f32) {
        let record = TuneRecord {
            time_us: self.clock.now_us(),
            axis: self.axis.into(),
            state: state.into(),
            actuator,
            desired_rate,
            actual_rate,
            ff_single: self.ff_single,
            ff: self.current.ff,
            p: self.current.p,
            i: self.current.i,
            d: self.current.d,
            action: self.action.into(),
            rmax: f32::from(self.current.rmax_pos),
            tau: self.current.tau,
        };
        self.logger.write_block(&record);
    }
}
