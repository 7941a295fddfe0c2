//! Completeness model: set grading, plate completion and marginal SN2 gain.
//!
//! A set is complete when it is consistent, covers every required dither
//! position with a valid exposure, and its aggregate SN2 reaches the plate
//! thresholds scaled by `SN2thresholds.setFactor`. Plate completion counts
//! complete sets only.

use std::collections::BTreeSet;

use crate::config::SchedulerConfig;
use crate::error::{Notice, SchedError, SchedResult};
use crate::exposure::{Exposure, Sn2};
use crate::plate::{Plate, PlateStatus};
use crate::set::{ExposureSet, SetOverride, SetQuality};

#[derive(Debug, Clone, Copy)]
pub struct CompletenessModel<'a> {
    cfg: &'a SchedulerConfig,
}

impl<'a> CompletenessModel<'a> {
    pub fn new(cfg: &'a SchedulerConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &'a SchedulerConfig {
        self.cfg
    }

    pub fn is_valid(&self, exposure: &Exposure) -> bool {
        exposure.is_valid(self.cfg)
    }

    /// Aggregate SN2 a set must reach.
    pub fn set_threshold(&self) -> Sn2 {
        let t = &self.cfg.sn2_thresholds;
        Sn2::new(t.plate_blue * t.set_factor, t.plate_red * t.set_factor)
    }

    /// Fraction of the plate thresholds covered by `sn2`, limited by the weaker arm.
    pub fn ratio(&self, sn2: Sn2) -> f64 {
        let t = &self.cfg.sn2_thresholds;
        (sn2.blue / t.plate_blue).min(sn2.red / t.plate_red)
    }

    /// Grades a group of exposures as if they formed one set.
    pub fn grade(&self, exposures: &[&Exposure], status_override: Option<SetOverride>) -> SetQuality {
        match status_override {
            Some(SetOverride::Good) => return SetQuality::OverrideGood,
            Some(SetOverride::Bad) => return SetQuality::OverrideBad,
            None => {}
        }

        let valid: Vec<&Exposure> = exposures.iter().copied().filter(|e| self.is_valid(e)).collect();
        if valid.is_empty() {
            return SetQuality::Incomplete;
        }

        let mut dithers = BTreeSet::new();
        if !valid.iter().all(|e| dithers.insert(e.dither)) {
            return SetQuality::Bad;
        }
        if !self.is_consistent(&valid) {
            return SetQuality::Bad;
        }

        let set_cfg = &self.cfg.set;
        if !set_cfg.dither_positions.iter().all(|d| dithers.contains(d)) {
            return SetQuality::Incomplete;
        }

        let sn2: Sn2 = valid.iter().map(|e| e.sn2).sum();
        let need = self.set_threshold();
        if sn2.red < need.red || sn2.blue < need.blue {
            return SetQuality::Incomplete;
        }

        let mean_seeing = valid.iter().map(|e| e.seeing).sum::<f64>() / valid.len() as f64;
        if mean_seeing <= set_cfg.excellent_seeing {
            SetQuality::Excellent
        } else if mean_seeing <= set_cfg.good_seeing {
            SetQuality::Good
        } else {
            SetQuality::Poor
        }
    }

    /// Hour angle, seeing and SN2 uniformity across the valid exposures of a set.
    fn is_consistent(&self, valid: &[&Exposure]) -> bool {
        if valid.len() < 2 {
            return true;
        }
        let set_cfg = &self.cfg.set;
        let span = |f: fn(&Exposure) -> f64| {
            let (lo, hi) = valid
                .iter()
                .map(|e| f(e))
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
            (lo, hi)
        };

        let (ha_lo, ha_hi) = span(|e| e.hour_angle);
        if ha_hi - ha_lo > set_cfg.max_ha_range {
            return false;
        }
        let (see_lo, see_hi) = span(|e| e.seeing);
        if see_hi - see_lo > set_cfg.max_seeing_range {
            return false;
        }
        for (lo, hi) in [span(|e| e.sn2.red), span(|e| e.sn2.blue)] {
            if lo > 0.0 && hi / lo > set_cfg.max_sn2_factor {
                return false;
            }
        }
        true
    }

    pub fn set_quality(&self, set: &ExposureSet) -> SetQuality {
        let refs: Vec<&Exposure> = set.exposures.iter().collect();
        self.grade(&refs, set.status_override)
    }

    pub fn is_set_complete(&self, set: &ExposureSet) -> bool {
        self.set_quality(set).is_complete()
    }

    /// Summed SN2 of the valid exposures in a set.
    pub fn set_sn2(&self, set: &ExposureSet) -> Sn2 {
        set.exposures
            .iter()
            .filter(|e| self.is_valid(e))
            .map(|e| e.sn2)
            .sum()
    }

    /// SN2 a candidate would add to `set`; zero when it would not be accepted.
    pub fn marginal_sn2_gain(&self, set: &ExposureSet, candidate: &Exposure) -> Sn2 {
        if set.status_override.is_some() || !self.is_valid(candidate) {
            return Sn2::ZERO;
        }
        let mut mock: Vec<&Exposure> = set.exposures.iter().collect();
        mock.push(candidate);
        if self.grade(&mock, None) == SetQuality::Bad {
            return Sn2::ZERO;
        }
        let after: Sn2 = mock.iter().filter(|e| self.is_valid(e)).map(|e| e.sn2).sum();
        after - self.set_sn2(set)
    }

    /// Unclamped completion over complete sets; values above 1 are possible.
    pub fn plate_completion_ratio(&self, plate: &Plate) -> f64 {
        let sn2: Sn2 = plate
            .sets
            .iter()
            .filter(|s| self.is_set_complete(s))
            .map(|s| self.set_sn2(s))
            .sum();
        self.ratio(sn2)
    }

    pub fn plate_completion_fraction(&self, plate: &Plate) -> f64 {
        self.plate_completion_ratio(plate).clamp(0.0, 1.0)
    }

    /// Completion counting incomplete sets too ("completion+").
    pub fn completion_with_incomplete(&self, plate: &Plate) -> f64 {
        let sn2: Sn2 = plate
            .sets
            .iter()
            .filter(|s| self.set_quality(s) != SetQuality::OverrideBad)
            .map(|s| self.set_sn2(s))
            .sum();
        self.ratio(sn2)
    }

    /// Summed SN2 of every valid exposure on the plate.
    pub fn total_sn2(&self, plate: &Plate) -> Sn2 {
        plate
            .exposures()
            .filter(|e| self.is_valid(e))
            .map(|e| e.sn2)
            .sum()
    }

    pub fn complete_set_count(&self, plate: &Plate) -> usize {
        plate.sets.iter().filter(|s| self.is_set_complete(s)).count()
    }

    /// Sets holding at least one valid exposure.
    pub fn started_set_count(&self, plate: &Plate) -> usize {
        plate
            .sets
            .iter()
            .filter(|s| s.exposures.iter().any(|e| self.is_valid(e)))
            .count()
    }

    pub fn exposures_in_complete_sets(&self, plate: &Plate) -> usize {
        plate
            .sets
            .iter()
            .filter(|s| self.is_set_complete(s))
            .map(|s| s.exposures.iter().filter(|e| self.is_valid(e)).count())
            .sum()
    }

    /// Whether some set has valid exposures but is not complete.
    pub fn has_incomplete_set(&self, plate: &Plate) -> bool {
        plate.sets.iter().any(|s| {
            let q = self.set_quality(s);
            !q.is_complete() && q != SetQuality::OverrideBad && s.exposures.iter().any(|e| self.is_valid(e))
        })
    }

    /// Derived status; a plate recorded complete without the SN2 to back it is an error.
    pub fn plate_status(&self, plate: &Plate) -> SchedResult<PlateStatus> {
        if plate.special_complete {
            return Ok(PlateStatus::SpecialComplete);
        }
        let ratio = self.plate_completion_ratio(plate);
        if ratio >= 1.0 {
            return Ok(PlateStatus::Complete);
        }
        if plate.marked_complete {
            return Err(SchedError::InconsistentPlateState {
                plate_id: plate.plate_id,
                reason: format!("marked complete with completion {ratio:.3}"),
            });
        }
        if plate.exposures().any(|e| self.is_valid(e)) {
            Ok(PlateStatus::Incomplete)
        } else {
            Ok(PlateStatus::NotStarted)
        }
    }

    /// One notice per invalid exposure on the plate.
    pub fn invalid_exposures(&self, plate: &Plate) -> Vec<Notice> {
        plate
            .exposures()
            .filter_map(|e| {
                e.check(self.cfg).err().map(|reason| Notice::InvalidExposure {
                    plate_id: plate.plate_id,
                    exposure_id: e.id,
                    reason,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exposure::Dither;

    fn exp(id: u64, d: Dither, blue: f64, red: f64) -> Exposure {
        Exposure::new(id, d, Sn2::new(blue, red))
    }

    fn full_set(id: u32, first: u64) -> ExposureSet {
        ExposureSet::new(id).with_exposures(vec![
            exp(first, Dither::N, 2.5, 4.5),
            exp(first + 1, Dither::S, 2.5, 4.5),
            exp(first + 2, Dither::E, 2.5, 4.5),
        ])
    }

    #[test]
    fn test_full_set_is_complete_and_graded_by_seeing() {
        let cfg = SchedulerConfig::default();
        let model = CompletenessModel::new(&cfg);
        let set = full_set(1, 1);
        assert_eq!(model.set_quality(&set), SetQuality::Excellent);

        let mut soft = set.clone();
        for e in &mut soft.exposures {
            e.seeing = 1.8;
        }
        assert_eq!(model.set_quality(&soft), SetQuality::Good);
    }

    #[test]
    fn test_missing_dither_is_incomplete() {
        let cfg = SchedulerConfig::default();
        let model = CompletenessModel::new(&cfg);
        let mut set = full_set(1, 1);
        set.exposures.pop();
        assert_eq!(model.set_quality(&set), SetQuality::Incomplete);
        assert!(!model.is_set_complete(&set));
    }

    #[test]
    fn test_duplicate_dither_and_inconsistency_are_bad() {
        let cfg = SchedulerConfig::default();
        let model = CompletenessModel::new(&cfg);

        let dup = ExposureSet::new(1).with_exposures(vec![
            exp(1, Dither::N, 2.5, 4.5),
            exp(2, Dither::N, 2.5, 4.5),
        ]);
        assert_eq!(model.set_quality(&dup), SetQuality::Bad);

        let mut far = full_set(2, 10);
        far.exposures[2].hour_angle = 40.0;
        assert_eq!(model.set_quality(&far), SetQuality::Bad);

        let mut uneven = full_set(3, 20);
        uneven.exposures[0].sn2 = Sn2::new(2.5, 12.0);
        assert_eq!(model.set_quality(&uneven), SetQuality::Bad);
    }

    #[test]
    fn test_invalid_duplicate_does_not_spoil_set() {
        let cfg = SchedulerConfig::default();
        let model = CompletenessModel::new(&cfg);
        let mut set = full_set(1, 1);
        set.exposures.push(exp(9, Dither::N, 2.5, 4.5).with_valid(false));
        assert!(model.is_set_complete(&set));
        assert_eq!(model.set_sn2(&set), Sn2::new(7.5, 13.5));
    }

    #[test]
    fn test_set_completes_once_combined_red_reaches_plate_threshold() {
        let mut cfg = SchedulerConfig::default();
        cfg.sn2_thresholds.plate_red = 36.0;
        cfg.sn2_thresholds.exposure_red = 0.5 * 36.0;
        cfg.sn2_thresholds.plate_blue = 2.0;
        cfg.sn2_thresholds.exposure_blue = 0.0;
        cfg.sn2_thresholds.set_factor = 1.0;
        cfg.set.dither_positions = vec![Dither::N, Dither::S];
        cfg.set.max_sn2_factor = 3.0;
        let model = CompletenessModel::new(&cfg);

        let mut set = ExposureSet::new(1).with_exposures(vec![exp(1, Dither::N, 1.0, 18.0)]);
        assert!(!model.is_set_complete(&set));

        set.exposures.push(exp(2, Dither::S, 1.0, 19.0));
        assert!(model.is_set_complete(&set));
        assert!(model.set_sn2(&set).red >= 36.0);

        // both exposures pass the per-exposure cut yet the sum falls short
        cfg.sn2_thresholds.exposure_red = 9.0;
        let model = CompletenessModel::new(&cfg);
        let short = ExposureSet::new(2).with_exposures(vec![
            exp(3, Dither::N, 1.0, 18.0),
            exp(4, Dither::S, 1.0, 17.0),
        ]);
        assert!(!model.is_set_complete(&short));
    }

    #[test]
    fn test_is_set_complete_is_idempotent() {
        let cfg = SchedulerConfig::default();
        let model = CompletenessModel::new(&cfg);
        let set = full_set(1, 1);
        let first = model.is_set_complete(&set);
        for _ in 0..5 {
            assert_eq!(model.is_set_complete(&set), first);
        }
    }

    #[test]
    fn test_plate_completion_counts_complete_sets_only() {
        let cfg = SchedulerConfig::default();
        let model = CompletenessModel::new(&cfg);
        let mut partial = full_set(2, 10);
        partial.exposures.truncate(2);
        let plate = Plate::new(1, 0.0, 0.0).with_sets(vec![full_set(1, 1), partial]);

        // 7.5 / 20 blue, 13.5 / 36 red
        let expected = (7.5_f64 / 20.0).min(13.5 / 36.0);
        approx::assert_abs_diff_eq!(model.plate_completion_fraction(&plate), expected, epsilon = 1e-12);
        assert!(model.completion_with_incomplete(&plate) > model.plate_completion_fraction(&plate));
        assert_eq!(model.complete_set_count(&plate), 1);
        assert_eq!(model.started_set_count(&plate), 2);
        assert_eq!(model.exposures_in_complete_sets(&plate), 3);
        assert!(model.has_incomplete_set(&plate));
    }

    #[test]
    fn test_marginal_gain() {
        let cfg = SchedulerConfig::default();
        let model = CompletenessModel::new(&cfg);
        let mut set = full_set(1, 1);
        set.exposures.truncate(2);

        let gain = model.marginal_sn2_gain(&set, &exp(5, Dither::E, 2.0, 4.0));
        assert_eq!(gain, Sn2::new(2.0, 4.0));

        // dither already taken
        assert_eq!(model.marginal_sn2_gain(&set, &exp(6, Dither::N, 2.0, 4.0)), Sn2::ZERO);
        // invalid candidate
        let bad = exp(7, Dither::E, 2.0, 4.0).with_valid(false);
        assert_eq!(model.marginal_sn2_gain(&set, &bad), Sn2::ZERO);
    }

    #[test]
    fn test_plate_status() {
        let cfg = SchedulerConfig::default();
        let model = CompletenessModel::new(&cfg);

        let empty = Plate::new(1, 0.0, 0.0);
        assert_eq!(model.plate_status(&empty).unwrap(), PlateStatus::NotStarted);

        let started = Plate::new(2, 0.0, 0.0).with_sets(vec![full_set(1, 1)]);
        assert_eq!(model.plate_status(&started).unwrap(), PlateStatus::Incomplete);

        let done = Plate::new(3, 0.0, 0.0)
            .with_sets(vec![full_set(1, 1), full_set(2, 4), full_set(3, 7)]);
        assert_eq!(model.plate_status(&done).unwrap(), PlateStatus::Complete);

        let mut special = started.clone();
        special.marked_complete = true;
        special.special_complete = true;
        assert_eq!(model.plate_status(&special).unwrap(), PlateStatus::SpecialComplete);

        let mut broken = started.clone();
        broken.marked_complete = true;
        assert!(matches!(
            model.plate_status(&broken),
            Err(SchedError::InconsistentPlateState { plate_id: 2, .. })
        ));
    }

    #[test]
    fn test_invalid_exposures_reported() {
        let cfg = SchedulerConfig::default();
        let model = CompletenessModel::new(&cfg);
        let mut set = full_set(1, 1);
        set.exposures[1].valid = false;
        let plate = Plate::new(4, 0.0, 0.0).with_sets(vec![set]);
        let notices = model.invalid_exposures(&plate);
        assert_eq!(notices.len(), 1);
        assert!(matches!(notices[0], Notice::InvalidExposure { exposure_id: 2, .. }));
    }
}
