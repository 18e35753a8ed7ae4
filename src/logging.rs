//! Structured tuning telemetry. The tuner produces one record at up to 25 Hz;
//! the sink decides framing and storage (dataflash, MAVLink, a test buffer).

/// One tuning log record. Enum-typed fields travel as `u8` so the record can
/// be framed without further translation.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TuneRecord {
    pub time_us: u64,
    pub axis: u8,
    pub state: u8,
    pub actuator: f32,
    pub desired_rate: f32,
    pub actual_rate: f32,
    pub ff_single: f32,
    pub ff: f32,
    pub p: f32,
    pub i: f32,
    pub d: f32,
    pub action: u8,
    pub rmax: f32,
    pub tau: f32,
}

/// Sink for tuning records.
pub trait TuneLogger {
    fn write_block(&mut self, record: &TuneRecord);
}
