//! Season planner: Monte Carlo over nights, weather and seeing.
//!
//! Each simulated night runs the same plugging logic as a real one, with
//! simulated exposures, so a forecast accumulates completion exactly as the
//! survey would.

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::cart::Cart;
use crate::completeness::CompletenessModel;
use crate::config::{ModeSection, RunMode, SchedulerConfig};
use crate::error::{Notice, SchedResult};
use crate::plate::{Plate, PlateId, PlateStatus};
use crate::plugger::{PlugDecision, Plugger};
use crate::simulation::Sn2Model;
use crate::sky::VisibilityProvider;
use crate::time::{night_bounds, night_date};
use crate::window::{ObservingWindow, Survey, Weather};

/// Lower bound on sampled seeing, arcsec.
const MIN_SEEING: f64 = 0.3;

/// Fraction of `numberPlatesAllowedAtAPO` that triggers a warning.
const APO_WARN_FRACTION: f64 = 0.9;

/// Source of the nights to simulate.
pub trait ObservingPlan: Send + Sync {
    /// Observing windows for the nights starting on `start..=end`, in order.
    fn nights(&self, start: NaiveDate, end: NaiveDate) -> SchedResult<Vec<ObservingWindow>>;
}

/// Every night observes between two local clock times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedHoursPlan {
    pub start_local: String,
    pub end_local: String,
    pub timezone: String,
    pub survey: Survey,
}

impl FixedHoursPlan {
    pub fn from_config(cfg: &SchedulerConfig) -> Self {
        Self {
            start_local: cfg.planner.night_start_local.clone(),
            end_local: cfg.planner.night_end_local.clone(),
            timezone: cfg.observatory.timezone.clone(),
            survey: Survey::Manga,
        }
    }
}

impl ObservingPlan for FixedHoursPlan {
    fn nights(&self, start: NaiveDate, end: NaiveDate) -> SchedResult<Vec<ObservingWindow>> {
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .map(|date| {
                let (s, e) = night_bounds(date, &self.start_local, &self.end_local, &self.timezone)?;
                Ok(ObservingWindow::new(s, e).with_survey(self.survey))
            })
            .collect()
    }
}

/// Explicit observing blocks, e.g. from a survey schedule file.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockPlan {
    blocks: Vec<ObservingWindow>,
    timezone: String,
}

impl BlockPlan {
    pub fn new(mut blocks: Vec<ObservingWindow>, timezone: impl Into<String>) -> Self {
        blocks.sort_by(|a, b| a.range.start.total_cmp(&b.range.start));
        Self {
            blocks,
            timezone: timezone.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl ObservingPlan for BlockPlan {
    fn nights(&self, start: NaiveDate, end: NaiveDate) -> SchedResult<Vec<ObservingWindow>> {
        let mut out = Vec::new();
        for block in &self.blocks {
            block.validate()?;
            let date = night_date(block.range.start, &self.timezone)?;
            if date >= start && date <= end {
                out.push(block.clone());
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NightSummary {
    pub date: NaiveDate,
    pub weather: Weather,
    pub seeing: f64,
    pub decisions: Vec<PlugDecision>,
    pub notices: Vec<Notice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub date: NaiveDate,
    pub complete_plates: usize,
    /// Mean completion+ over all plates, each capped at 1.
    pub mean_completion: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleForecast {
    pub seed: u64,
    /// Night each plate completed on; plates done before the run are absent.
    pub completion_nights: BTreeMap<PlateId, NaiveDate>,
    pub curve: Vec<CurvePoint>,
    pub nights: Vec<NightSummary>,
    pub nights_simulated: usize,
    pub cancelled: bool,
}

impl ScheduleForecast {
    pub fn completed_plates(&self) -> usize {
        self.completion_nights.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloForecast {
    pub trials: usize,
    /// Share of trials in which each plate completed.
    pub completion_probability: BTreeMap<PlateId, f64>,
    pub mean_completed_plates: f64,
    pub forecasts: Vec<ScheduleForecast>,
}

/// Indices of the good-weather nights: exactly ⌊n × fraction⌋ of them.
pub fn good_weather_nights(n: usize, fraction: f64, rng: &mut impl Rng) -> Vec<bool> {
    let count = ((n as f64) * fraction.clamp(0.0, 1.0)).floor() as usize;
    let mut good = vec![false; n];
    for i in sample(rng, n, count.min(n)).iter() {
        good[i] = true;
    }
    good
}

/// Normal draw around the mode's seeing, scaled by its simulation factor.
pub fn sample_seeing(rng: &mut impl Rng, mode: &ModeSection, sigma: f64) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    ((mode.seeing + sigma * z) * mode.simulation_factor).max(MIN_SEEING)
}

/// Plates occupying space at the observatory: plugged, or started and unfinished.
pub fn number_plates_at_apo(cfg: &SchedulerConfig, plates: &[Plate]) -> SchedResult<usize> {
    let model = CompletenessModel::new(cfg);
    let mut count = 0;
    for plate in plates {
        if plate.cart.is_some() || model.plate_status(plate)? == PlateStatus::Incomplete {
            count += 1;
        }
    }
    let allowed = cfg.number_plates_allowed_at_apo;
    if count as f64 >= APO_WARN_FRACTION * allowed as f64 {
        warn!(count, allowed, "plates at APO close to the limit");
    }
    Ok(count)
}

pub struct Planner<'a, V: VisibilityProvider, M: Sn2Model> {
    plugger: Plugger<'a, V, M>,
}

impl<'a, V: VisibilityProvider, M: Sn2Model> Planner<'a, V, M> {
    pub fn new(cfg: &'a SchedulerConfig, visibility: V, sn2: M) -> Self {
        Self {
            plugger: Plugger::new(cfg, visibility, sn2).with_run_mode(RunMode::Planner),
        }
    }

    pub fn config(&self) -> &'a SchedulerConfig {
        self.plugger.config()
    }

    /// Simulates `start..=end` with the configured seed.
    pub fn simulate_season(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        plan: &dyn ObservingPlan,
        plates: &[Plate],
        carts: &[Cart],
    ) -> SchedResult<ScheduleForecast> {
        let seed = self.plugger.mode().seed;
        self.simulate_with_seed(start, end, plan, plates, carts, seed, None)
    }

    /// Simulates one trial. `cancel` is checked at every night boundary; a
    /// cancelled run keeps every night finished so far.
    #[allow(clippy::too_many_arguments)]
    pub fn simulate_with_seed(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        plan: &dyn ObservingPlan,
        plates: &[Plate],
        carts: &[Cart],
        seed: u64,
        cancel: Option<&AtomicBool>,
    ) -> SchedResult<ScheduleForecast> {
        let cfg = self.config();
        let mode = self.plugger.mode();
        let model = CompletenessModel::new(cfg);
        let nights = plan.nights(start, end)?;

        let mut rng = StdRng::seed_from_u64(seed);
        let good = good_weather_nights(nights.len(), mode.good_weather_fraction, &mut rng);

        let mut plates = plates.to_vec();
        let mut carts = carts.to_vec();
        let mut forecast = ScheduleForecast {
            seed,
            completion_nights: BTreeMap::new(),
            curve: Vec::new(),
            nights: Vec::new(),
            nights_simulated: 0,
            cancelled: false,
        };
        number_plates_at_apo(cfg, &plates)?;

        for (i, night) in nights.iter().enumerate() {
            if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                info!(night = i, "simulation cancelled");
                forecast.cancelled = true;
                break;
            }
            if all_done(&model, &plates)? {
                debug!(night = i, "all plates done");
                break;
            }

            let seeing = sample_seeing(&mut rng, mode, cfg.simulation.seeing_sigma);
            let weather = if good[i] { Weather::Good } else { Weather::Bad };
            let date = night_date(night.range.start, &cfg.observatory.timezone)?;

            let mut summary = NightSummary {
                date,
                weather,
                seeing,
                decisions: Vec::new(),
                notices: Vec::new(),
            };
            if weather == Weather::Good {
                // work on copies so a failed night leaves the season untouched
                let mut next_plates = plates.clone();
                let mut next_carts = carts.clone();
                let window = night.clone().with_weather(weather).with_seeing(seeing);
                let night_plan = self.plugger.plan_night(&window, &mut next_plates, &mut next_carts)?;
                plates = next_plates;
                carts = next_carts;
                summary.decisions = night_plan.decisions;
                summary.notices = night_plan.notices;
            }

            for plate in &plates {
                if !forecast.completion_nights.contains_key(&plate.plate_id)
                    && model.plate_status(plate)? == PlateStatus::Complete
                    && plate.has_simulated()
                {
                    forecast.completion_nights.insert(plate.plate_id, date);
                }
            }
            forecast.curve.push(curve_point(&model, &plates, date)?);
            forecast.nights.push(summary);
            forecast.nights_simulated += 1;
        }

        info!(
            seed,
            nights = forecast.nights_simulated,
            completed = forecast.completed_plates(),
            "season simulated"
        );
        Ok(forecast)
    }

    /// Independent trials in parallel, seeds `seed..seed + trials`.
    pub fn simulate_trials(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        plan: &dyn ObservingPlan,
        plates: &[Plate],
        carts: &[Cart],
        trials: usize,
    ) -> SchedResult<MonteCarloForecast> {
        let base = self.plugger.mode().seed;
        let forecasts: Vec<ScheduleForecast> = (0..trials)
            .into_par_iter()
            .map(|i| self.simulate_with_seed(start, end, plan, plates, carts, base + i as u64, None))
            .collect::<SchedResult<Vec<_>>>()?;

        let mut completion_probability = BTreeMap::new();
        for plate in plates {
            let done = forecasts
                .iter()
                .filter(|f| f.completion_nights.contains_key(&plate.plate_id))
                .count();
            let p = if trials == 0 { 0.0 } else { done as f64 / trials as f64 };
            completion_probability.insert(plate.plate_id, p);
        }
        let mean_completed_plates = if trials == 0 {
            0.0
        } else {
            forecasts.iter().map(|f| f.completed_plates() as f64).sum::<f64>() / trials as f64
        };

        Ok(MonteCarloForecast {
            trials,
            completion_probability,
            mean_completed_plates,
            forecasts,
        })
    }
}

fn all_done(model: &CompletenessModel<'_>, plates: &[Plate]) -> SchedResult<bool> {
    for plate in plates {
        if !model.plate_status(plate)?.is_done() {
            return Ok(false);
        }
    }
    Ok(true)
}

fn curve_point(
    model: &CompletenessModel<'_>,
    plates: &[Plate],
    date: NaiveDate,
) -> SchedResult<CurvePoint> {
    let mut complete_plates = 0;
    let mut total = 0.0;
    for plate in plates {
        if model.plate_status(plate)?.is_done() {
            complete_plates += 1;
        }
        total += model.completion_with_incomplete(plate).min(1.0);
    }
    let mean_completion = if plates.is_empty() {
        0.0
    } else {
        total / plates.len() as f64
    };
    Ok(CurvePoint {
        date,
        complete_plates,
        mean_completion,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::carts_from_config;
    use crate::simulation::PowerLawSn2;
    use crate::simulation::tests::AlwaysUp;

    fn cfg() -> SchedulerConfig {
        let mut cfg = SchedulerConfig::default();
        cfg.planner.mode.seeing = 1.0;
        cfg.planner.mode.good_weather_fraction = 1.0;
        cfg.simulation.seeing_sigma = 0.0;
        cfg
    }

    fn planner(cfg: &SchedulerConfig) -> Planner<'_, AlwaysUp, PowerLawSn2> {
        Planner::new(cfg, AlwaysUp, PowerLawSn2::from_config(cfg, &cfg.planner.mode))
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_good_weather_count_is_exact() {
        let mut rng = StdRng::seed_from_u64(7);
        let good = good_weather_nights(10, 0.55, &mut rng);
        assert_eq!(good.iter().filter(|g| **g).count(), 5);

        let again = good_weather_nights(10, 0.55, &mut StdRng::seed_from_u64(7));
        assert_eq!(good, again);
        assert!(good_weather_nights(4, 0.0, &mut rng).iter().all(|g| !g));
    }

    #[test]
    fn test_sample_seeing_clamped() {
        let mut mode = SchedulerConfig::default().planner.mode;
        mode.seeing = 0.1;
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            assert!(sample_seeing(&mut rng, &mode, 0.5) >= MIN_SEEING);
        }
        mode.seeing = 1.2;
        assert_eq!(sample_seeing(&mut rng, &mode, 0.0), 1.2);
    }

    #[test]
    fn test_fixed_hours_plan() {
        let cfg = SchedulerConfig::default();
        let plan = FixedHoursPlan::from_config(&cfg);
        let nights = plan.nights(date(2026, 3, 1), date(2026, 3, 3)).unwrap();
        assert_eq!(nights.len(), 3);
        for n in &nights {
            assert!((n.range.hours() - 9.5).abs() < 1e-6);
            assert_eq!(n.night, n.range);
        }
        assert!(nights[1].range.start > nights[0].range.end);
    }

    #[test]
    fn test_block_plan_filters_by_night_date() {
        let cfg = SchedulerConfig::default();
        let tz = &cfg.observatory.timezone;
        let (s1, e1) = night_bounds(date(2026, 3, 1), "20:00", "23:00", tz).unwrap();
        let (s2, e2) = night_bounds(date(2026, 3, 5), "20:00", "23:00", tz).unwrap();
        let plan = BlockPlan::new(
            vec![ObservingWindow::new(s2, e2), ObservingWindow::new(s1, e1)],
            tz.clone(),
        );
        assert_eq!(plan.len(), 2);
        let nights = plan.nights(date(2026, 3, 1), date(2026, 3, 2)).unwrap();
        assert_eq!(nights.len(), 1);
        assert_eq!(nights[0].range.start, s1);
    }

    #[test]
    fn test_season_completes_and_stops_early() {
        let cfg = cfg();
        let plates: Vec<Plate> = (1..=3).map(|id| Plate::new(id, 0.0, 30.0)).collect();
        let carts = carts_from_config(&cfg);
        let plan = FixedHoursPlan::from_config(&cfg);

        let forecast = planner(&cfg)
            .simulate_season(date(2026, 3, 1), date(2026, 3, 10), &plan, &plates, &carts)
            .unwrap();
        assert_eq!(forecast.completed_plates(), 3);
        assert!(forecast.nights_simulated < 10);
        assert_eq!(forecast.curve.len(), forecast.nights_simulated);
        assert_eq!(forecast.curve.last().unwrap().complete_plates, 3);
        assert!(!forecast.cancelled);
        // input plates are a snapshot
        assert!(plates.iter().all(|p| p.exposure_count() == 0));
    }

    #[test]
    fn test_season_is_reproducible() {
        let mut cfg = cfg();
        cfg.planner.mode.good_weather_fraction = 0.5;
        cfg.simulation.seeing_sigma = 0.2;
        let plates: Vec<Plate> = (1..=4).map(|id| Plate::new(id, 0.0, 30.0)).collect();
        let carts = carts_from_config(&cfg);
        let plan = FixedHoursPlan::from_config(&cfg);
        let p = planner(&cfg);

        let a = p
            .simulate_with_seed(date(2026, 3, 1), date(2026, 3, 8), &plan, &plates, &carts, 11, None)
            .unwrap();
        let b = p
            .simulate_with_seed(date(2026, 3, 1), date(2026, 3, 8), &plan, &plates, &carts, 11, None)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_bad_weather_season_observes_nothing() {
        let mut cfg = cfg();
        cfg.planner.mode.good_weather_fraction = 0.0;
        let plates = vec![Plate::new(1, 0.0, 30.0)];
        let carts = carts_from_config(&cfg);
        let plan = FixedHoursPlan::from_config(&cfg);
        let forecast = planner(&cfg)
            .simulate_season(date(2026, 3, 1), date(2026, 3, 4), &plan, &plates, &carts)
            .unwrap();
        assert_eq!(forecast.nights_simulated, 4);
        assert_eq!(forecast.completed_plates(), 0);
        assert!(forecast.nights.iter().all(|n| n.weather == Weather::Bad && n.decisions.is_empty()));
    }

    #[test]
    fn test_cancel_at_night_boundary() {
        let cfg = cfg();
        let plates = vec![Plate::new(1, 0.0, 30.0)];
        let carts = carts_from_config(&cfg);
        let plan = FixedHoursPlan::from_config(&cfg);
        let cancel = AtomicBool::new(true);
        let forecast = planner(&cfg)
            .simulate_with_seed(
                date(2026, 3, 1),
                date(2026, 3, 4),
                &plan,
                &plates,
                &carts,
                1,
                Some(&cancel),
            )
            .unwrap();
        assert!(forecast.cancelled);
        assert_eq!(forecast.nights_simulated, 0);
    }

    #[test]
    fn test_trials_in_parallel() {
        let cfg = cfg();
        let plates: Vec<Plate> = (1..=2).map(|id| Plate::new(id, 0.0, 30.0)).collect();
        let carts = carts_from_config(&cfg);
        let plan = FixedHoursPlan::from_config(&cfg);
        let mc = planner(&cfg)
            .simulate_trials(date(2026, 3, 1), date(2026, 3, 3), &plan, &plates, &carts, 4)
            .unwrap();
        assert_eq!(mc.trials, 4);
        assert_eq!(mc.forecasts.len(), 4);
        assert_eq!(mc.completion_probability[&1], 1.0);
        assert_eq!(mc.mean_completed_plates, 2.0);
        let seeds: Vec<u64> = mc.forecasts.iter().map(|f| f.seed).collect();
        assert_eq!(seeds, vec![42, 43, 44, 45]);
    }

    #[test]
    fn test_number_plates_at_apo() {
        let cfg = SchedulerConfig::default();
        let started = Plate::new(2, 0.0, 0.0).with_sets(vec![crate::set::ExposureSet::new(1)
            .with_exposures(vec![crate::exposure::Exposure::new(
                1,
                crate::exposure::Dither::N,
                crate::exposure::Sn2::new(3.0, 5.0),
            )])]);
        let plates = vec![Plate::new(1, 0.0, 0.0).with_cart(1), started, Plate::new(3, 0.0, 0.0)];
        assert_eq!(number_plates_at_apo(&cfg, &plates).unwrap(), 2);
    }
}
