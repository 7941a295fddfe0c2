//! Plate ranking shared by the plugger and the planner.
//!
//! Every historical tie-break rule is its own comparator so it can be tested
//! on its own. `Ordering::Less` means the first plate ranks higher.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::completeness::CompletenessModel;
use crate::config::ModeSection;
use crate::plate::{Plate, PlateId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PriorityClass {
    NoPlug,
    Normal,
    Force,
}

impl PriorityClass {
    pub fn of(priority: u8, mode: &ModeSection) -> Self {
        if priority >= mode.force_plug_priority {
            PriorityClass::Force
        } else if priority <= mode.no_plug_priority {
            PriorityClass::NoPlug
        } else {
            PriorityClass::Normal
        }
    }
}

/// Snapshot of a plate's ranking inputs at a decision point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateStanding {
    pub plate_id: PlateId,
    pub priority: u8,
    pub class: PriorityClass,
    /// Clamped completion fraction.
    pub completion: f64,
    /// Completion counting incomplete sets too.
    pub completion_plus: f64,
    /// Blue + red SN2 of every valid exposure.
    pub total_sn2: f64,
    /// Sets holding valid exposures before any dry run.
    pub started_sets: usize,
    /// Whether the plate carried valid SN2 before any dry run.
    pub has_signal: bool,
    pub score: f64,
    pub new_exposures: usize,
    pub new_complete_sets: usize,
    /// Plate was mounted on a cart coming into the window.
    pub mounted: bool,
}

impl PlateStanding {
    /// Standing of a plate as it is, without any dry run.
    pub fn measure(model: &CompletenessModel<'_>, plate: &Plate, mode: &ModeSection) -> Self {
        let total = model.total_sn2(plate);
        let completion = model.plate_completion_fraction(plate);
        let mut standing = Self {
            plate_id: plate.plate_id,
            priority: plate.priority,
            class: PriorityClass::of(plate.priority, mode),
            completion,
            completion_plus: model.completion_with_incomplete(plate),
            total_sn2: total.total(),
            started_sets: model.started_set_count(plate),
            has_signal: !total.is_zero(),
            score: 0.0,
            new_exposures: 0,
            new_complete_sets: 0,
            mounted: plate.cart.is_some(),
        };
        standing.score = weighted_score(model, &standing, 0, false);
        standing
    }

    /// Folds the outcome of a dry run into the standing.
    ///
    /// `finished_started` counts sets that held exposures before the run and
    /// are complete after it; `visible_after` is whether the plate is still
    /// observable once the window ends.
    pub fn with_dry_run(
        mut self,
        model: &CompletenessModel<'_>,
        after: &Plate,
        outcome: DryRunCounts,
    ) -> Self {
        self.completion = model.plate_completion_fraction(after);
        self.completion_plus = model.completion_with_incomplete(after);
        self.total_sn2 = model.total_sn2(after).total();
        self.new_exposures = outcome.new_exposures;
        self.new_complete_sets = outcome.new_complete_sets;
        self.score = weighted_score(model, &self, outcome.finished_started, outcome.visible_after);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DryRunCounts {
    pub new_exposures: usize,
    pub new_complete_sets: usize,
    pub finished_started: usize,
    pub visible_after: bool,
}

/// Completion weighted by priority, patched sets and next-night visibility.
pub fn weighted_score(
    model: &CompletenessModel<'_>,
    standing: &PlateStanding,
    finished_started: usize,
    visible_after: bool,
) -> f64 {
    let cfg = model.config();
    let s = &cfg.scheduling;
    let priority_delta = f64::from(standing.priority) - f64::from(cfg.default_priority);
    let mut score = standing.completion
        * (1.0 + s.plate_priority_factor * priority_delta).max(0.0)
        * (1.0 + s.patch_set_factor * finished_started as f64);
    if visible_after {
        score *= s.next_night_factor;
    }
    score
}

pub fn compare_priority_class(a: &PlateStanding, b: &PlateStanding) -> Ordering {
    b.class.cmp(&a.class)
}

/// Plates already carrying signal rank above untouched ones.
pub fn compare_signal_presence(a: &PlateStanding, b: &PlateStanding) -> Ordering {
    b.has_signal.cmp(&a.has_signal)
}

pub fn compare_score(a: &PlateStanding, b: &PlateStanding) -> Ordering {
    b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal)
}

/// Higher total SN2 first.
pub fn compare_sn2_tiebreak(a: &PlateStanding, b: &PlateStanding) -> Ordering {
    b.total_sn2.partial_cmp(&a.total_sn2).unwrap_or(Ordering::Equal)
}

/// More started sets first. This used to be inverted, which pushed started
/// plates behind fresh ones.
pub fn compare_started_sets(a: &PlateStanding, b: &PlateStanding) -> Ordering {
    b.started_sets.cmp(&a.started_sets)
}

/// Completion fraction, then total SN2, then started sets.
pub fn compare_completion(a: &PlateStanding, b: &PlateStanding) -> Ordering {
    b.completion
        .partial_cmp(&a.completion)
        .unwrap_or(Ordering::Equal)
        .then_with(|| compare_sn2_tiebreak(a, b))
        .then_with(|| compare_started_sets(a, b))
}

pub fn compare_new_exposures(a: &PlateStanding, b: &PlateStanding) -> Ordering {
    a.new_exposures.cmp(&b.new_exposures)
}

/// Full ranking chain.
pub fn compare_standings(a: &PlateStanding, b: &PlateStanding) -> Ordering {
    compare_priority_class(a, b)
        .then_with(|| compare_signal_presence(a, b))
        .then_with(|| compare_score(a, b))
        .then_with(|| compare_completion(a, b))
        .then_with(|| compare_new_exposures(a, b))
        .then_with(|| a.plate_id.cmp(&b.plate_id))
}

pub fn sort_by_priority_then_completion(standings: &mut [PlateStanding]) {
    standings.sort_by(compare_standings);
}
