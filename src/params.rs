//! Persisted-parameter access. Gains live behind small handles whose `save`
//! lazily commits to the parameter store, keeping persistence out of the hot
//! path and letting tests substitute in-memory stubs.

/// Handle to a persisted `f32` parameter.
pub trait ParamF32 {
    fn get(&self) -> f32;
    fn set(&mut self, v: f32);
    /// Commit the current value to backing storage.
    fn save(&mut self);

    fn set_and_save(&mut self, v: f32) {
        self.set(v);
        self.save();
    }
}

/// Handle to a persisted `i16` parameter.
pub trait ParamI16 {
    fn get(&self) -> i16;
    fn set(&mut self, v: i16);
    fn save(&mut self);
}

/// The tuner's own persisted envelope parameters: attitude time constant and
/// the rate limits, per tuned axis.
pub trait GainsSlot {
    type F: ParamF32;
    type I: ParamI16;

    fn tau(&mut self) -> &mut Self::F;
    fn rmax_pos(&mut self) -> &mut Self::I;
    fn rmax_neg(&mut self) -> &mut Self::I;
}

/// Read-only view of the airframe parameter block. Limits are in
/// centidegrees, matching how they are stored.
pub trait Airframe {
    fn roll_limit_cd(&self) -> i16;
    fn pitch_limit_max_cd(&self) -> i16;
    fn pitch_limit_min_cd(&self) -> i16;
    /// Tuning aggressiveness, 0 (keep current envelope) to 11.
    fn autotune_level(&self) -> u8;
}

impl<T: Airframe> Airframe for &T {
    fn roll_limit_cd(&self) -> i16 {
        (*self).roll_limit_cd()
    }

    fn pitch_limit_max_cd(&self) -> i16 {
        (*self).pitch_limit_max_cd()
    }

    fn pitch_limit_min_cd(&self) -> i16 {
        (*self).pitch_limit_min_cd()
    }

    fn autotune_level(&self) -> u8 {
        (*self).autotune_level()
    }
}

/// Set a float parameter, committing it only when it moved by more than 0.1%
/// relative to what the handle held. Non-positive values are always
/// committed; the relative test is meaningless around zero. Reduces
/// insignificant flash writes.
pub fn save_f32_if_changed(p: &mut impl ParamF32, value: f32) {
    let old_value = p.get();
    p.set(value);
    if value <= 0. || ((value - old_value) / value).abs() > 0.001 {
        p.save();
    }
}

/// Set an integer parameter and commit it only if it changed. Reads back
/// after the set so a store-side clamp still counts as unchanged.
pub fn save_i16_if_changed(p: &mut impl ParamI16, value: i16) {
    let old_value = p.get();
    p.set(value);
    if old_value != p.get() {
        p.save();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{StoredF32, StoredI16};

    #[test]
    fn test_f32_save_elided_for_tiny_change() {
        let mut p = StoredF32::new(1.0);
        save_f32_if_changed(&mut p, 1.0005);
        assert_eq!(p.saves.len(), 0);
        // Value still took effect.
        assert_eq!(p.get(), 1.0005);
    }

    #[test]
    fn test_f32_save_fires_above_tolerance() {
        let mut p = StoredF32::new(1.0);
        save_f32_if_changed(&mut p, 1.01);
        assert_eq!(p.saves.len(), 1);
    }

    #[test]
    fn test_f32_nonpositive_always_saves() {
        let mut p = StoredF32::new(0.);
        save_f32_if_changed(&mut p, 0.);
        assert_eq!(p.saves.len(), 1);

        let mut p = StoredF32::new(-1.);
        save_f32_if_changed(&mut p, -1.);
        assert_eq!(p.saves.len(), 1);
    }

    #[test]
    fn test_i16_save_only_on_change() {
        let mut p = StoredI16::new(75);
        save_i16_if_changed(&mut p, 75);
        assert_eq!(p.saves.len(), 0);

        save_i16_if_changed(&mut p, 95);
        assert_eq!(p.saves.len(), 1);
        assert_eq!(p.get(), 95);
    }
}
