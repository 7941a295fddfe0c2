//! Simulated exposures: the SN2 model and the dry run used to score plates.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::arrangement::SetRearranger;
use crate::completeness::CompletenessModel;
use crate::config::{ModeSection, SchedulerConfig};
use crate::error::Notice;
use crate::exposure::{Dither, Exposure, ExposureId, Sn2};
use crate::plate::Plate;
use crate::set::SetId;
use crate::sky::VisibilityProvider;
use crate::window::JdRange;

/// Hours a trailing incomplete set must waste before its exposures are dropped.
const ORPHAN_MIN_HOURS: f64 = 1.0;

/// Synthesises the SN2 an exposure would reach.
pub trait Sn2Model: Send + Sync {
    fn simulate(&self, airmass: f64, seeing: f64, exposure_time: f64) -> Sn2;
}

/// Reference SN2 at unit airmass and seeing, scaled by power laws in both.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerLawSn2 {
    pub blue_sn2: f64,
    pub red_sn2: f64,
    pub alpha_blue: f64,
    pub beta_blue: f64,
    pub alpha_red: f64,
    pub beta_red: f64,
    /// Exposure time the reference SN2 is quoted for, seconds.
    pub reference_time: f64,
    pub factor: f64,
}

impl PowerLawSn2 {
    pub fn from_config(cfg: &SchedulerConfig, mode: &ModeSection) -> Self {
        let s = &cfg.simulation;
        Self {
            blue_sn2: s.blue_sn2,
            red_sn2: s.red_sn2,
            alpha_blue: s.alpha_blue,
            beta_blue: s.beta_blue,
            alpha_red: s.alpha_red,
            beta_red: s.beta_red,
            reference_time: cfg.exposure.exposure_time,
            factor: mode.simulation_factor,
        }
    }
}

impl Sn2Model for PowerLawSn2 {
    fn simulate(&self, airmass: f64, seeing: f64, exposure_time: f64) -> Sn2 {
        let airmass = airmass.max(1.0);
        let seeing = seeing.max(0.1);
        let t = exposure_time / self.reference_time;
        Sn2::new(
            self.blue_sn2 * t / airmass.powf(self.alpha_blue) / seeing.powf(self.beta_blue) * self.factor,
            self.red_sn2 * t / airmass.powf(self.alpha_red) / seeing.powf(self.beta_red) * self.factor,
        )
    }
}

/// Result of simulating one plate through a window.
#[derive(Debug, Clone, PartialEq)]
pub struct DryRun {
    pub plate: Plate,
    pub new_exposures: Vec<ExposureId>,
    /// Part of the window the kept exposures occupy.
    pub used: JdRange,
    pub new_complete_sets: usize,
    /// Sets started before the run that it completed.
    pub finished_started: usize,
    /// Plate still inside its LST window when the range ends.
    pub visible_after: bool,
    pub notices: Vec<Notice>,
}

impl DryRun {
    pub fn exposure_count(&self) -> usize {
        self.new_exposures.len()
    }
}

pub struct PlateSimulator<'a> {
    cfg: &'a SchedulerConfig,
    mode: &'a ModeSection,
    visibility: &'a dyn VisibilityProvider,
    sn2: &'a dyn Sn2Model,
}

impl<'a> PlateSimulator<'a> {
    pub fn new(
        cfg: &'a SchedulerConfig,
        mode: &'a ModeSection,
        visibility: &'a dyn VisibilityProvider,
        sn2: &'a dyn Sn2Model,
    ) -> Self {
        Self {
            cfg,
            mode,
            visibility,
            sn2,
        }
    }

    /// Wall-clock length of one exposure slot, days.
    pub fn step_days(&self) -> f64 {
        self.cfg.exposure.exposure_time / self.mode.efficiency / 86_400.0
    }

    /// First dither missing from the newest open set.
    fn next_dither(&self, model: &CompletenessModel<'_>, plate: &Plate) -> Dither {
        let positions = &self.cfg.set.dither_positions;
        let fallback = positions.first().copied().unwrap_or(Dither::N);
        let Some(open) = plate
            .sets
            .iter()
            .rev()
            .find(|s| s.status_override.is_none() && !model.is_set_complete(s))
        else {
            return fallback;
        };
        positions
            .iter()
            .copied()
            .find(|d| {
                !open
                    .exposures
                    .iter()
                    .any(|e| e.dither == *d && model.is_valid(e))
            })
            .unwrap_or(fallback)
    }

    /// Takes simulated exposures on a copy of `plate` across `range`.
    pub fn simulate(&self, plate: &Plate, range: JdRange, seeing: f64) -> DryRun {
        let model = CompletenessModel::new(self.cfg);
        let rearranger = SetRearranger::new(self.cfg);
        let mut plate = plate.clone();

        let complete_before = model.complete_set_count(&plate);
        let started_before: Vec<SetId> = plate
            .sets
            .iter()
            .filter(|s| !model.is_set_complete(s) && s.exposures.iter().any(|e| model.is_valid(e)))
            .map(|s| s.id)
            .collect();

        let step = self.step_days();
        let buffer = self.cfg.exposure.exposure_buffer / 86_400.0;
        let exposure_time = self.cfg.exposure.exposure_time;
        let lst_window = self.visibility.lst_window(&plate);

        let mut notices = Vec::new();
        let mut new_exposures: Vec<(ExposureId, f64)> = Vec::new();
        let mut t = range.start;
        while t + step <= range.end + buffer {
            if model.plate_completion_ratio(&plate) >= 1.0 {
                break;
            }
            let mid = t + step / 2.0;
            let visible = lst_window.contains(self.visibility.lst(mid))
                && self.visibility.altitude(&plate, mid) <= self.mode.max_altitude;
            if visible {
                let airmass = self.visibility.airmass(&plate, mid);
                let ha = self.visibility.hour_angle(&plate, mid);
                let id = plate.next_exposure_id();
                let exposure = Exposure::new(
                    id,
                    self.next_dither(&model, &plate),
                    self.sn2.simulate(airmass, seeing, exposure_time),
                )
                .with_seeing(seeing)
                .with_exposure_time(exposure_time)
                .with_pointing(ha, airmass)
                .with_start_jd(t)
                .simulated();
                let outcome = rearranger.update_plate(&mut plate, vec![exposure]);
                notices.extend(outcome.notices);
                new_exposures.push((id, t));
            }
            t += step;
        }

        // new exposures stranded in sets the run could not finish
        let orphans: Vec<ExposureId> = plate
            .sets
            .iter()
            .filter(|s| !model.is_set_complete(s))
            .flat_map(|s| s.exposures.iter())
            .filter(|e| new_exposures.iter().any(|(id, _)| *id == e.id))
            .map(|e| e.id)
            .collect();
        if orphans.len() as f64 * step * 24.0 > ORPHAN_MIN_HOURS {
            warn!(plate_id = plate.plate_id, count = orphans.len(), "orphaned exposures");
            plate.remove_exposures(&orphans);
            new_exposures.retain(|(id, _)| !orphans.contains(id));
            notices.push(Notice::OrphanedExposures {
                plate_id: plate.plate_id,
                exposures: orphans,
            });
        }

        let used_end = new_exposures
            .iter()
            .map(|(_, start)| start + step)
            .fold(range.start, f64::max)
            .min(range.end);
        let complete_after = model.complete_set_count(&plate);
        let finished_started = plate
            .sets
            .iter()
            .filter(|s| started_before.contains(&s.id) && model.is_set_complete(s))
            .count();

        debug!(
            plate_id = plate.plate_id,
            exposures = new_exposures.len(),
            complete_after,
            "dry run"
        );
        DryRun {
            visible_after: lst_window.contains(self.visibility.lst(range.end)),
            plate,
            new_exposures: new_exposures.into_iter().map(|(id, _)| id).collect(),
            used: JdRange::new(range.start, used_end),
            new_complete_sets: complete_after.saturating_sub(complete_before),
            finished_started,
            notices,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::plate::PlateStatus;
    use crate::sky::{LstRange, Site};
    use approx::assert_abs_diff_eq;

    /// Everything is always up at 45 deg, airmass 1.2, on the meridian.
    pub(crate) struct AlwaysUp;

    impl VisibilityProvider for AlwaysUp {
        fn site(&self) -> Site {
            Site {
                longitude: 0.0,
                latitude: 0.0,
                altitude: 0.0,
            }
        }

        fn lst_window(&self, _plate: &Plate) -> LstRange {
            LstRange::new(0.0, 24.0)
        }

        fn hour_angle(&self, _plate: &Plate, _jd: f64) -> f64 {
            0.0
        }

        fn altitude(&self, _plate: &Plate, _jd: f64) -> f64 {
            45.0
        }

        fn airmass(&self, _plate: &Plate, _jd: f64) -> f64 {
            1.2
        }
    }

    #[test]
    fn test_power_law_reference_point() {
        let cfg = SchedulerConfig::default();
        let model = PowerLawSn2::from_config(&cfg, &cfg.planner.mode);
        let sn2 = model.simulate(1.0, 1.0, 900.0);
        assert_abs_diff_eq!(sn2.red, 8.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sn2.blue, 4.5, epsilon = 1e-12);

        let worse = model.simulate(1.5, 2.0, 900.0);
        assert!(worse.red < sn2.red && worse.blue < sn2.blue);
        let half = model.simulate(1.0, 1.0, 450.0);
        assert_abs_diff_eq!(half.red, 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_dry_run_completes_fresh_plate() {
        let cfg = SchedulerConfig::default();
        let mode = &cfg.plugger.mode;
        let sn2 = PowerLawSn2::from_config(&cfg, mode);
        let sim = PlateSimulator::new(&cfg, mode, &AlwaysUp, &sn2);
        let plate = Plate::new(1, 0.0, 30.0);

        let run = sim.simulate(&plate, JdRange::new(0.0, 8.0 / 24.0), 1.0);
        // two sets of three reach the plate thresholds
        assert_eq!(run.exposure_count(), 6);
        assert_eq!(run.new_complete_sets, 2);
        let model = CompletenessModel::new(&cfg);
        assert_eq!(model.plate_status(&run.plate).unwrap(), PlateStatus::Complete);
        assert!(run.plate.exposures().all(Exposure::is_simulated));
        assert!(run.used.end < 8.0 / 24.0);
        // the input plate is untouched
        assert_eq!(plate.exposure_count(), 0);
    }

    #[test]
    fn test_dry_run_short_window_keeps_partial_set() {
        let cfg = SchedulerConfig::default();
        let mode = &cfg.plugger.mode;
        let sn2 = PowerLawSn2::from_config(&cfg, mode);
        let sim = PlateSimulator::new(&cfg, mode, &AlwaysUp, &sn2);
        let step = sim.step_days();

        let run = sim.simulate(&Plate::new(1, 0.0, 30.0), JdRange::new(0.0, 2.0 * step), 1.0);
        assert_eq!(run.exposure_count(), 2);
        assert_eq!(run.new_complete_sets, 0);
        assert!(run.notices.is_empty());
    }

    #[test]
    fn test_dry_run_drops_orphans_over_an_hour() {
        let cfg = SchedulerConfig::default();
        let mode = &cfg.plugger.mode;
        let sn2 = PowerLawSn2::from_config(&cfg, mode);
        let sim = PlateSimulator::new(&cfg, mode, &AlwaysUp, &sn2);
        let step = sim.step_days();

        // seeing above exposure.maxSeeing: nothing ever counts
        let run = sim.simulate(&Plate::new(1, 0.0, 30.0), JdRange::new(0.0, 4.0 * step), 3.0);
        assert_eq!(run.exposure_count(), 0);
        assert_eq!(run.plate.exposure_count(), 0);
        assert!(run.notices.iter().any(|n| matches!(
            n,
            Notice::OrphanedExposures { exposures, .. } if exposures.len() == 4
        )));
    }
}
