//! Plugger: picks the plate and cart for one observing window.
//!
//! One invocation walks `SelectCandidates → FilterVisible → RankByPriority →
//! ResolveCartAssignment → Commit`. Failing to plug is a normal outcome and
//! comes back as `PlugOutcome { decision: None, .. }` with a notice.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::arrangement::{RearrangeScope, SetRearranger};
use crate::cart::{Cart, CartId, cart_order};
use crate::completeness::CompletenessModel;
use crate::config::{ModeSection, RunMode, SchedulerConfig};
use crate::error::{Notice, SchedError, SchedResult};
use crate::exposure::ExposureId;
use crate::plate::{Plate, PlateId, PlateStatus};
use crate::ranking::{DryRunCounts, PlateStanding, PriorityClass, sort_by_priority_then_completion};
use crate::simulation::{DryRun, PlateSimulator, Sn2Model};
use crate::sky::VisibilityProvider;
use crate::window::{JdRange, ObservingWindow};

/// Sampling step used to locate the visible part of a window, days.
const VISIBILITY_SAMPLE_DAYS: f64 = 5.0 / 1440.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlugStage {
    SelectCandidates,
    FilterVisible,
    RankByPriority,
    ResolveCartAssignment,
    Commit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlugDecision {
    pub plate_id: PlateId,
    pub cart_id: CartId,
    /// Time the decision occupies, empty for a plug without exposures.
    pub used: JdRange,
    pub exposures: Vec<ExposureId>,
    pub new_complete_sets: usize,
    /// The mounted plate was kept over a higher-ranked alternative.
    pub kept_mounted: bool,
    pub standing: PlateStanding,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlugOutcome {
    pub decision: Option<PlugDecision>,
    /// Last stage entered.
    pub stage: PlugStage,
    pub notices: Vec<Notice>,
}

impl PlugOutcome {
    fn none(stage: PlugStage, notices: Vec<Notice>) -> Self {
        Self {
            decision: None,
            stage,
            notices,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NightPlan {
    pub night: JdRange,
    pub decisions: Vec<PlugDecision>,
    pub notices: Vec<Notice>,
}

impl NightPlan {
    pub fn plugged(&self) -> usize {
        self.decisions.len()
    }
}

/// Carts and plates already taken earlier in the same night.
#[derive(Debug, Clone, Default)]
struct NightLedger {
    carts: Vec<CartId>,
    plates: Vec<PlateId>,
}

pub struct Plugger<'a, V: VisibilityProvider, M: Sn2Model> {
    cfg: &'a SchedulerConfig,
    run_mode: RunMode,
    visibility: V,
    sn2: M,
}

impl<'a, V: VisibilityProvider, M: Sn2Model> Plugger<'a, V, M> {
    pub fn new(cfg: &'a SchedulerConfig, visibility: V, sn2: M) -> Self {
        Self {
            cfg,
            run_mode: RunMode::Plugger,
            visibility,
            sn2,
        }
    }

    /// Use the planner's mode settings instead of the plugger's.
    pub fn with_run_mode(mut self, run_mode: RunMode) -> Self {
        self.run_mode = run_mode;
        self
    }

    pub fn config(&self) -> &'a SchedulerConfig {
        self.cfg
    }

    pub fn mode(&self) -> &'a ModeSection {
        self.cfg.mode(self.run_mode)
    }

    pub fn visibility(&self) -> &V {
        &self.visibility
    }

    fn simulator(&self) -> PlateSimulator<'_> {
        PlateSimulator::new(self.cfg, self.mode(), &self.visibility, &self.sn2)
    }

    /// Decides one window. The chosen plate is updated with the exposures it
    /// would take and mounted on the chosen cart.
    pub fn plug(
        &self,
        window: &ObservingWindow,
        plates: &mut [Plate],
        carts: &mut [Cart],
    ) -> SchedResult<PlugOutcome> {
        self.plug_within(window, plates, carts, &NightLedger::default())
    }

    fn plug_within(
        &self,
        window: &ObservingWindow,
        plates: &mut [Plate],
        carts: &mut [Cart],
        ledger: &NightLedger,
    ) -> SchedResult<PlugOutcome> {
        window.validate()?;
        let model = CompletenessModel::new(self.cfg);
        let mode = self.mode();

        // SelectCandidates
        let range = window.effective_range(&self.cfg.plugger);
        let mut open: Vec<usize> = Vec::new();
        for (i, plate) in plates.iter().enumerate() {
            if ledger.plates.contains(&plate.plate_id) {
                continue;
            }
            if !model.plate_status(plate)?.is_done() {
                open.push(i);
            }
        }
        let selected: Vec<usize> = open
            .iter()
            .copied()
            .filter(|&i| !range.is_empty() && self.visibility.visible_hours(&plates[i], &range) > 0.0)
            .collect();
        let selected_count = selected.len();
        debug!(open = open.len(), selected = selected_count, "selected candidates");

        // FilterVisible
        let candidates: Vec<usize> = selected
            .into_iter()
            .filter_map(|index| {
                let plate = &plates[index];
                if self.visibility.visible_hours(plate, &range) < self.cfg.plugger.min_scheduling_time_hours {
                    return None;
                }
                let visible = self.visible_span(plate, &range)?;
                let mid = (visible.start + visible.end) / 2.0;
                let near_zenith = [visible.start, mid, visible.end]
                    .iter()
                    .all(|&jd| self.visibility.altitude(plate, jd) > mode.max_altitude);
                (!near_zenith).then_some(index)
            })
            .collect();

        // RankByPriority
        let seeing = window.seeing.unwrap_or(mode.seeing);
        let simulator = self.simulator();
        let runs: Vec<(usize, DryRun)> = candidates
            .par_iter()
            .map(|&i| (i, simulator.simulate(&plates[i], range, seeing)))
            .collect();
        let mut notices: Vec<Notice> = Vec::new();
        let mut standings: Vec<PlateStanding> = Vec::new();
        let mut by_plate: HashMap<PlateId, DryRun> = HashMap::new();
        for (index, run) in runs {
            if run.exposure_count() == 0 {
                continue;
            }
            let plate = &plates[index];
            let standing = PlateStanding::measure(&model, plate, mode).with_dry_run(
                &model,
                &run.plate,
                DryRunCounts {
                    new_exposures: run.exposure_count(),
                    new_complete_sets: run.new_complete_sets,
                    finished_started: run.finished_started,
                    visible_after: run.visible_after,
                },
            );
            standings.push(standing);
            by_plate.insert(plate.plate_id, run);
        }
        sort_by_priority_then_completion(&mut standings);

        if standings.is_empty() {
            if self.cfg.plugger.only_visible_plates || open.is_empty() {
                info!("no eligible plate");
                notices.push(Notice::NoEligiblePlate);
                let stage = if selected_count == 0 {
                    PlugStage::SelectCandidates
                } else if candidates.is_empty() {
                    PlugStage::FilterVisible
                } else {
                    PlugStage::RankByPriority
                };
                return Ok(PlugOutcome::none(stage, notices));
            }
            // nothing gains time here; park the best open plate on a cart anyway
            let mut idle: Vec<PlateStanding> = open
                .iter()
                .map(|&i| PlateStanding::measure(&model, &plates[i], mode))
                .collect();
            sort_by_priority_then_completion(&mut idle);
            return self.resolve_and_commit(idle, HashMap::new(), window, plates, carts, ledger, notices);
        }

        // sunk cost: keep a mounted plate of the same class when the leader
        // finishes no set here
        let mut kept: Option<PlateId> = None;
        if let Some(leader) = standings.first() {
            if leader.new_complete_sets == 0 && !leader.mounted {
                let class = leader.class;
                if let Some(pos) = standings
                    .iter()
                    .position(|s| s.mounted && s.new_exposures > 0 && s.class >= class)
                {
                    let mounted = standings.remove(pos);
                    debug!(plate_id = mounted.plate_id, "keeping mounted plate");
                    kept = Some(mounted.plate_id);
                    standings.insert(0, mounted);
                }
            }
        }

        let mut outcome =
            self.resolve_and_commit(standings, by_plate, window, plates, carts, ledger, notices)?;
        if let Some(decision) = outcome.decision.as_mut() {
            decision.kept_mounted = kept == Some(decision.plate_id);
        }
        Ok(outcome)
    }

    /// ResolveCartAssignment and Commit over the ranked plates.
    #[allow(clippy::too_many_arguments)]
    fn resolve_and_commit(
        &self,
        ranked: Vec<PlateStanding>,
        mut runs: HashMap<PlateId, DryRun>,
        window: &ObservingWindow,
        plates: &mut [Plate],
        carts: &mut [Cart],
        ledger: &NightLedger,
        mut notices: Vec<Notice>,
    ) -> SchedResult<PlugOutcome> {
        let model = CompletenessModel::new(self.cfg);
        if ranked.is_empty() {
            notices.push(Notice::NoEligiblePlate);
            return Ok(PlugOutcome::none(PlugStage::RankByPriority, notices));
        }

        // ResolveCartAssignment
        let mut status: HashMap<PlateId, PlateStatus> = HashMap::new();
        for plate in plates.iter() {
            status.insert(plate.plate_id, model.plate_status(plate)?);
        }
        let holds_incomplete = |pid: PlateId| {
            plates
                .iter()
                .find(|p| p.plate_id == pid)
                .is_some_and(|p| model.has_incomplete_set(p))
        };
        let ordered = cart_order(carts, window.survey, holds_incomplete);
        // completion times priority of the plate a cart holds
        let cart_priority = |pid: PlateId| {
            plates
                .iter()
                .find(|p| p.plate_id == pid)
                .map_or(0.0, |p| f64::from(p.priority) * model.plate_completion_fraction(p))
        };

        let mut chosen: Option<(PlateStanding, CartId)> = None;
        for standing in ranked {
            let own_cart = plates
                .iter()
                .find(|p| p.plate_id == standing.plate_id)
                .and_then(|p| p.cart);
            let own = own_cart.filter(|id| {
                !ledger.carts.contains(id) && carts.iter().any(|c| c.id == *id && c.available)
            });
            let cart = own.or_else(|| {
                ordered
                    .iter()
                    .find(|c| {
                        c.available
                            && c.takes_manga()
                            && !ledger.carts.contains(&c.id)
                            && c.plate.is_none_or(|p| {
                                matches!(
                                    status.get(&p),
                                    None | Some(PlateStatus::NotStarted)
                                        | Some(PlateStatus::Complete)
                                        | Some(PlateStatus::SpecialComplete)
                                )
                            })
                    })
                    .map(|c| c.id)
            });
            // no free cart: replace the mounted plate with the lowest cart priority
            let cart = cart.or_else(|| {
                let (cart_id, displaced) = carts
                    .iter()
                    .filter(|c| c.available && c.takes_manga() && !ledger.carts.contains(&c.id))
                    .filter_map(|c| c.plate.filter(|p| *p != standing.plate_id).map(|p| (c.id, p)))
                    .min_by(|a, b| {
                        cart_priority(a.1)
                            .total_cmp(&cart_priority(b.1))
                            .then_with(|| a.0.cmp(&b.0))
                    })?;
                info!(cart_id, plate_id = standing.plate_id, displaced, "replacing started plate");
                notices.push(Notice::PlateDisplaced {
                    cart_id,
                    plate_id: standing.plate_id,
                    displaced,
                });
                Some(cart_id)
            });
            match cart {
                Some(cart_id) => {
                    chosen = Some((standing, cart_id));
                    break;
                }
                None => {
                    warn!(plate_id = standing.plate_id, "no eligible cart");
                    notices.push(Notice::NoEligibleCart {
                        plate_id: standing.plate_id,
                    });
                }
            }
        }
        let Some((standing, cart_id)) = chosen else {
            return Ok(PlugOutcome::none(PlugStage::ResolveCartAssignment, notices));
        };

        // Commit
        let run = runs.remove(&standing.plate_id);
        let Some(index) = plates.iter().position(|p| p.plate_id == standing.plate_id) else {
            return Err(SchedError::UnknownPlate(standing.plate_id));
        };
        let (exposures, used, new_complete_sets) = match run {
            Some(run) => {
                notices.extend(run.notices);
                plates[index] = run.plate;
                (
                    run.new_exposures,
                    JdRange::new(window.range.start, run.used.end),
                    run.new_complete_sets,
                )
            }
            None => (Vec::new(), JdRange::new(window.range.start, window.range.start), 0),
        };

        let rearranger = SetRearranger::new(self.cfg);
        let plate = &mut plates[index];
        if rearranger.should_rearrange(plate, plate.has_simulated()) {
            let outcome = rearranger.rearrange(plate, RearrangeScope::Plate);
            notices.extend(outcome.notices);
        } else {
            debug!(plate_id = plate.plate_id, "real exposures left as grouped");
        }

        let previous = plate.cart.replace(cart_id);
        let plate_id = plate.plate_id;
        for cart in carts.iter_mut() {
            if Some(cart.id) == previous && cart.id != cart_id {
                cart.plate = None;
            }
        }
        let displaced = carts
            .iter_mut()
            .find(|c| c.id == cart_id)
            .and_then(|c| c.plate.replace(plate_id))
            .filter(|p| *p != plate_id);
        if let Some(other) = displaced {
            if let Some(p) = plates.iter_mut().find(|p| p.plate_id == other) {
                p.cart = None;
            }
        }

        info!(
            plate_id,
            cart_id,
            exposures = exposures.len(),
            new_complete_sets,
            "plugged"
        );
        Ok(PlugOutcome {
            decision: Some(PlugDecision {
                plate_id,
                cart_id,
                used,
                exposures,
                new_complete_sets,
                kept_mounted: false,
                standing,
            }),
            stage: PlugStage::Commit,
            notices,
        })
    }

    /// First to last sampled instant of `range` inside the plate's LST window.
    fn visible_span(&self, plate: &Plate, range: &JdRange) -> Option<JdRange> {
        let window = self.visibility.lst_window(plate);
        let steps = (range.hours() * 60.0 / 5.0).ceil().max(1.0) as usize;
        let mut first: Option<f64> = None;
        let mut last = range.start;
        for k in 0..=steps {
            let jd = (range.start + k as f64 * VISIBILITY_SAMPLE_DAYS).min(range.end);
            if window.contains(self.visibility.lst(jd)) {
                first.get_or_insert(jd);
                last = jd;
            }
        }
        first.map(|start| JdRange::new(start, last.max(start)))
    }

    /// Plugs a whole night, one window at a time, until time or carts run out.
    pub fn plan_night(
        &self,
        night: &ObservingWindow,
        plates: &mut [Plate],
        carts: &mut [Cart],
    ) -> SchedResult<NightPlan> {
        night.validate()?;
        let min_hours = self.cfg.plugger.min_scheduling_time_hours;
        let mut ledger = NightLedger::default();
        let mut remaining = vec![night.range];
        let mut decisions = Vec::new();
        let mut notices = Vec::new();

        // force-priority plates beyond the free MaNGA carts cannot all be plugged
        let model = CompletenessModel::new(self.cfg);
        let mut forced = 0;
        for plate in plates.iter() {
            if PriorityClass::of(plate.priority, self.mode()) == PriorityClass::Force
                && !model.plate_status(plate)?.is_done()
            {
                forced += 1;
            }
        }
        let manga_carts = carts.iter().filter(|c| c.available && c.takes_manga()).count();
        if forced > manga_carts {
            warn!(forced, carts = manga_carts, "more force-priority plates than carts");
            notices.push(Notice::ForcedPlatesExceedCarts {
                forced,
                carts: manga_carts,
            });
        }

        while !remaining.is_empty() {
            let range = remaining.remove(0);
            if range.hours() < min_hours {
                continue;
            }
            let outcome = self.plug_within(&night.sub_window(range), plates, carts, &ledger)?;
            notices.extend(outcome.notices);
            let Some(decision) = outcome.decision else {
                continue;
            };
            ledger.carts.push(decision.cart_id);
            ledger.plates.push(decision.plate_id);
            let mut rest = if decision.used.is_empty() {
                vec![range]
            } else {
                range.subtract(&decision.used)
            };
            rest.append(&mut remaining);
            remaining = rest;
            decisions.push(decision);
        }

        let carts_for_science = self.cfg.science_cart_count();
        if decisions.len() > carts_for_science {
            warn!(
                plugged = decisions.len(),
                carts = carts_for_science,
                "more plates plugged than science carts"
            );
            notices.push(Notice::CartShortfall {
                plugged: decisions.len(),
                carts: carts_for_science,
            });
        }

        Ok(NightPlan {
            night: night.night,
            decisions,
            notices,
        })
    }
}
