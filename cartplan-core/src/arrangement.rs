//! Set rearranger.
//!
//! Reassigns the valid exposures of a plate to sets so that as many sets as
//! possible are complete. Small problems are solved exhaustively over
//! dither-aligned permutations; anything above the permutation budget gets a
//! greedy assignment. The result never has fewer complete sets than the input.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use crate::completeness::CompletenessModel;
use crate::config::SchedulerConfig;
use crate::error::Notice;
use crate::exposure::{Dither, Exposure, ExposureId, Sn2};
use crate::plate::Plate;
use crate::set::{ExposureSet, SetId, SetQuality};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RearrangeScope {
    /// Every set except overridden ones.
    Plate,
    /// Only sets that are not complete.
    Incomplete,
}

/// Proposed grouping of the movable exposures of a plate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arrangement {
    pub groups: Vec<Vec<ExposureId>>,
    /// The same groups as positions among the movable valid exposures, in
    /// plate order.
    pub slots: Vec<Vec<usize>>,
    /// Complete sets among `groups`.
    pub complete_sets: usize,
    /// Plate completion ratio including the untouched sets.
    pub completion: f64,
    /// Exposures left in incomplete groups.
    pub orphans: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub scope: RearrangeScope,
    pub arrangement: Arrangement,
    /// Whether `arrangement` differs from the current grouping.
    pub changed: bool,
    pub permutations: u128,
    pub used_greedy: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RearrangeOutcome {
    pub attempted: bool,
    pub changed: bool,
    pub used_greedy: bool,
    pub permutations: u128,
    pub complete_sets_before: usize,
    pub complete_sets_after: usize,
    pub notices: Vec<Notice>,
}

/// Scored grouping of pool indices.
#[derive(Debug, Clone)]
struct Candidate {
    groups: Vec<Vec<usize>>,
    complete: usize,
    completion: f64,
    orphans: usize,
    reused: usize,
}

impl Candidate {
    /// Ordering used to pick among near-best arrangements; `Greater` is preferred.
    fn preference(&self, other: &Candidate) -> Ordering {
        self.complete
            .cmp(&other.complete)
            .then_with(|| other.orphans.cmp(&self.orphans))
            .then_with(|| self.reused.cmp(&other.reused))
            .then_with(|| other.groups.len().cmp(&self.groups.len()))
    }
}

/// Movable exposures and the set each one came from.
struct Pool<'p> {
    exposures: Vec<&'p Exposure>,
    origin: Vec<SetId>,
}

struct Evaluator<'m, 'p> {
    model: CompletenessModel<'m>,
    pool: &'p Pool<'p>,
    fixed_sn2: Sn2,
    cache: HashMap<Vec<usize>, (SetQuality, Sn2)>,
}

impl<'m, 'p> Evaluator<'m, 'p> {
    fn grade(&mut self, group: &[usize]) -> (SetQuality, Sn2) {
        let mut key = group.to_vec();
        key.sort_unstable();
        if let Some(hit) = self.cache.get(&key) {
            return *hit;
        }
        let members: Vec<&Exposure> = key.iter().map(|&i| self.pool.exposures[i]).collect();
        let quality = self.model.grade(&members, None);
        let sn2: Sn2 = members.iter().map(|e| e.sn2).sum();
        self.cache.insert(key, (quality, sn2));
        (quality, sn2)
    }

    fn score(&mut self, groups: Vec<Vec<usize>>) -> Candidate {
        let mut complete = 0;
        let mut orphans = 0;
        let mut sn2 = self.fixed_sn2;
        let mut reused = 0;
        for g in &groups {
            let (q, s) = self.grade(g);
            if q.is_complete() {
                complete += 1;
                sn2 += s;
            } else {
                orphans += g.len();
            }
            let mut per_origin: BTreeMap<SetId, usize> = BTreeMap::new();
            for &i in g {
                *per_origin.entry(self.pool.origin[i]).or_default() += 1;
            }
            reused += per_origin.values().copied().max().unwrap_or(0);
        }
        Candidate {
            groups,
            complete,
            completion: self.model.ratio(sn2),
            orphans,
            reused,
        }
    }

    /// Best group to receive exposure `i`, if any accepts it.
    fn best_target(&mut self, groups: &[Vec<usize>], i: usize) -> Option<usize> {
        let dither = self.pool.exposures[i].dither;
        let mut best: Option<(usize, bool, f64, usize)> = None;
        for (gi, g) in groups.iter().enumerate() {
            if g.iter().any(|&j| self.pool.exposures[j].dither == dither) {
                continue;
            }
            if self.grade(g).0.is_complete() {
                continue;
            }
            let mut mock = g.clone();
            mock.push(i);
            let (q, s) = self.grade(&mock);
            if q == SetQuality::Bad {
                continue;
            }
            let key = (gi, q.is_complete(), self.model.ratio(s), g.len());
            let better = match best {
                None => true,
                Some((_, c, r, n)) => (key.1, key.2, key.3) > (c, r, n),
            };
            if better {
                best = Some(key);
            }
        }
        best.map(|(gi, ..)| gi)
    }

    fn place(&mut self, groups: &mut Vec<Vec<usize>>, i: usize) {
        match self.best_target(groups, i) {
            Some(gi) => groups[gi].push(i),
            None => groups.push(vec![i]),
        }
    }

    /// Splits bad groups, re-placing their exposures one at a time.
    fn fix_bad_sets(&mut self, groups: Vec<Vec<usize>>) -> Vec<Vec<usize>> {
        let (bad, mut good): (Vec<_>, Vec<_>) = groups
            .into_iter()
            .partition(|g| self.grade(g).0 == SetQuality::Bad);
        let mut loose: Vec<usize> = bad.into_iter().flatten().collect();
        // strongest first
        loose.sort_by(|&a, &b| {
            let (sa, sb) = (self.pool.exposures[a].sn2, self.pool.exposures[b].sn2);
            sb.total().partial_cmp(&sa.total()).unwrap_or(Ordering::Equal)
        });
        for i in loose {
            self.place(&mut good, i);
        }
        good
    }

    /// Chronological greedy assignment.
    fn greedy(&mut self) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..self.pool.exposures.len()).collect();
        order.sort_by(|&a, &b| {
            let (ea, eb) = (self.pool.exposures[a], self.pool.exposures[b]);
            ea.start_jd
                .partial_cmp(&eb.start_jd)
                .unwrap_or(Ordering::Equal)
                .then_with(|| ea.id.cmp(&eb.id))
        });
        let mut groups = Vec::new();
        for i in order {
            self.place(&mut groups, i);
        }
        groups
    }
}

/// Pool indices bucketed by dither, largest bucket first, padded with `None`.
fn dither_columns(pool: &Pool<'_>) -> Vec<Vec<Option<usize>>> {
    let mut by_dither: BTreeMap<Dither, Vec<usize>> = BTreeMap::new();
    for (i, e) in pool.exposures.iter().enumerate() {
        by_dither.entry(e.dither).or_default().push(i);
    }
    let mut buckets: Vec<Vec<usize>> = by_dither.into_values().collect();
    // size desc, stable
    buckets.sort_by(|a, b| b.len().cmp(&a.len()));
    let width = buckets.first().map_or(0, Vec::len);
    buckets
        .into_iter()
        .map(|b| {
            let mut col: Vec<Option<usize>> = b.into_iter().map(Some).collect();
            col.resize(width, None);
            col.sort();
            col
        })
        .collect()
}

fn factorial(n: usize) -> u128 {
    (1..=n as u128).fold(1u128, |acc, k| acc.saturating_mul(k))
}

/// Distinct arrangements generated by permuting every bucket but the first.
fn permutation_count(columns: &[Vec<Option<usize>>]) -> u128 {
    columns
        .iter()
        .skip(1)
        .map(|c| {
            let empties = c.iter().filter(|x| x.is_none()).count();
            factorial(c.len()) / factorial(empties)
        })
        .fold(1u128, |acc, n| acc.saturating_mul(n))
}

/// Lexicographic next permutation; resets to sorted order and returns false after the last.
fn next_permutation<T: Ord>(v: &mut [T]) -> bool {
    if v.len() < 2 {
        return false;
    }
    let mut i = v.len() - 1;
    while i > 0 && v[i - 1] >= v[i] {
        i -= 1;
    }
    if i == 0 {
        v.reverse();
        return false;
    }
    let mut j = v.len() - 1;
    while v[j] <= v[i - 1] {
        j -= 1;
    }
    v.swap(i - 1, j);
    v[i..].reverse();
    true
}

/// Calls `visit` with the groups of every distinct arrangement.
fn for_each_arrangement(columns: &[Vec<Option<usize>>], mut visit: impl FnMut(Vec<Vec<usize>>)) {
    let Some((fixed, rest)) = columns.split_first() else {
        return;
    };
    let mut perms: Vec<Vec<Option<usize>>> = rest.to_vec();
    loop {
        let groups: Vec<Vec<usize>> = (0..fixed.len())
            .map(|row| {
                std::iter::once(fixed[row])
                    .chain(perms.iter().map(|p| p[row]))
                    .flatten()
                    .collect()
            })
            .collect();
        visit(groups);

        // odometer over the permuted buckets
        let mut k = perms.len();
        loop {
            if k == 0 {
                return;
            }
            k -= 1;
            if next_permutation(&mut perms[k]) {
                break;
            }
        }
    }
}

pub struct SetRearranger<'a> {
    model: CompletenessModel<'a>,
}

impl<'a> SetRearranger<'a> {
    pub fn new(cfg: &'a SchedulerConfig) -> Self {
        Self {
            model: CompletenessModel::new(cfg),
        }
    }

    fn cfg(&self) -> &'a SchedulerConfig {
        self.model.config()
    }

    fn is_fixed(&self, set: &ExposureSet, scope: RearrangeScope) -> bool {
        let q = self.model.set_quality(set);
        q.is_overridden() || (scope == RearrangeScope::Incomplete && q.is_complete())
    }

    /// Whether the rearrangement step may run on this plate.
    ///
    /// Simulated exposures always qualify; real ones stop being rearranged once
    /// enough exposures sit in complete sets.
    pub fn should_rearrange(&self, plate: &Plate, simulated: bool) -> bool {
        simulated
            || self.model.exposures_in_complete_sets(plate)
                < self.cfg().set_arrangement.real_rearrangement_max_complete_exposures
    }

    /// Searches for a better grouping without touching the plate.
    pub fn propose(&self, plate: &Plate, scope: RearrangeScope) -> Proposal {
        let sa = &self.cfg().set_arrangement;

        let mut pool = Pool {
            exposures: Vec::new(),
            origin: Vec::new(),
        };
        let mut fixed_sn2 = Sn2::ZERO;
        let mut current_groups: Vec<Vec<usize>> = Vec::new();
        for set in &plate.sets {
            if self.is_fixed(set, scope) {
                if self.model.is_set_complete(set) {
                    fixed_sn2 += self.model.set_sn2(set);
                }
                continue;
            }
            let mut group = Vec::new();
            for e in set.exposures.iter().filter(|e| self.model.is_valid(e)) {
                group.push(pool.exposures.len());
                pool.exposures.push(e);
                pool.origin.push(set.id);
            }
            if !group.is_empty() {
                current_groups.push(group);
            }
        }

        let mut eval = Evaluator {
            model: self.model,
            pool: &pool,
            fixed_sn2,
            cache: HashMap::new(),
        };
        let current = eval.score(current_groups.clone());

        let columns = dither_columns(&pool);
        let permutations = permutation_count(&columns);
        let limit = match scope {
            RearrangeScope::Plate => sa.permutation_limit_plate,
            RearrangeScope::Incomplete => sa.permutation_limit_incomplete,
        };
        let used_greedy = permutations > limit as u128;
        let factor = sa.factor;

        let best = if pool.exposures.is_empty() {
            None
        } else if used_greedy {
            debug!(
                plate_id = plate.plate_id,
                permutations, limit, "permutation budget exceeded, assigning greedily"
            );
            let groups = eval.greedy();
            let groups = eval.fix_bad_sets(groups);
            Some(eval.score(groups))
        } else {
            // first pass: best reachable completion
            let mut top = f64::NEG_INFINITY;
            for_each_arrangement(&columns, |groups| {
                let c = eval.score(groups);
                top = top.max(c.completion);
            });

            // second pass: preferred arrangement among the near-best
            let mut chosen: Option<Candidate> = None;
            for_each_arrangement(&columns, |groups| {
                let c = eval.score(groups);
                if c.completion < factor * top {
                    return;
                }
                let fixed = eval.fix_bad_sets(c.groups);
                let c = eval.score(fixed);
                if chosen
                    .as_ref()
                    .is_none_or(|b| c.preference(b) == Ordering::Greater)
                {
                    chosen = Some(c);
                }
            });
            debug!(plate_id = plate.plate_id, permutations, top, "permutation search done");
            chosen
        };

        let accepted = best.filter(|c| {
            c.complete > current.complete
                || (c.complete == current.complete && c.completion > current.completion / factor)
        });
        let winner = accepted.unwrap_or(current);
        let changed = !same_grouping(&winner.groups, &current_groups);

        let to_ids = |g: &Vec<usize>| g.iter().map(|&i| pool.exposures[i].id).collect::<Vec<_>>();
        Proposal {
            scope,
            arrangement: Arrangement {
                groups: winner.groups.iter().map(to_ids).collect(),
                slots: winner.groups.clone(),
                complete_sets: winner.complete,
                completion: winner.completion,
                orphans: winner.orphans,
            },
            changed,
            permutations,
            used_greedy,
        }
    }

    /// Rearranges the plate in place.
    pub fn rearrange(&self, plate: &mut Plate, scope: RearrangeScope) -> RearrangeOutcome {
        let before = self.model.complete_set_count(plate);
        let proposal = self.propose(plate, scope);

        let mut notices = Vec::new();
        if proposal.used_greedy {
            let sa = &self.cfg().set_arrangement;
            let limit = match scope {
                RearrangeScope::Plate => sa.permutation_limit_plate,
                RearrangeScope::Incomplete => sa.permutation_limit_incomplete,
            };
            notices.push(Notice::RearrangementBudgetExceeded {
                plate_id: plate.plate_id,
                permutations: proposal.permutations,
                limit,
            });
        }

        if proposal.changed {
            self.apply(plate, scope, &proposal.arrangement);
        }
        let after = self.model.complete_set_count(plate);
        if proposal.changed {
            info!(
                plate_id = plate.plate_id,
                before, after, greedy = proposal.used_greedy, "rearranged sets"
            );
        }

        RearrangeOutcome {
            attempted: true,
            changed: proposal.changed,
            used_greedy: proposal.used_greedy,
            permutations: proposal.permutations,
            complete_sets_before: before,
            complete_sets_after: after,
            notices,
        }
    }

    /// Rebuilds the movable sets from `arrangement`, keeping set ids where the
    /// new groups overlap old sets and parking invalid exposures in their old set.
    ///
    /// Exposures move by position, so repeated exposure ids are carried intact.
    pub fn apply(&self, plate: &mut Plate, scope: RearrangeScope, arrangement: &Arrangement) {
        let (movable, mut sets): (Vec<ExposureSet>, Vec<ExposureSet>) = std::mem::take(&mut plate.sets)
            .into_iter()
            .partition(|s| !self.is_fixed(s, scope));

        let mut next_id = sets
            .iter()
            .chain(movable.iter())
            .map(|s| s.id)
            .max()
            .unwrap_or(0)
            + 1;

        // same order as the pool `propose` searched
        let mut pool: Vec<Option<Exposure>> = Vec::new();
        let mut origin: Vec<SetId> = Vec::new();
        let mut parked: Vec<(SetId, Exposure)> = Vec::new();
        for set in movable {
            for e in set.exposures {
                if self.model.is_valid(&e) {
                    pool.push(Some(e));
                    origin.push(set.id);
                } else {
                    parked.push((set.id, e));
                }
            }
        }

        // (overlap, group, old set), largest overlap claims the id first
        let mut claims: Vec<(usize, usize, SetId)> = Vec::new();
        for (gi, g) in arrangement.slots.iter().enumerate() {
            let mut counts: BTreeMap<SetId, usize> = BTreeMap::new();
            for &slot in g {
                if let Some(&sid) = origin.get(slot) {
                    *counts.entry(sid).or_default() += 1;
                }
            }
            claims.extend(counts.into_iter().map(|(sid, n)| (n, gi, sid)));
        }
        claims.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)).then_with(|| a.2.cmp(&b.2)));

        let mut group_ids: Vec<Option<SetId>> = vec![None; arrangement.slots.len()];
        let mut taken: Vec<SetId> = Vec::new();
        for (_, gi, sid) in claims {
            if group_ids[gi].is_none() && !taken.contains(&sid) {
                group_ids[gi] = Some(sid);
                taken.push(sid);
            }
        }

        for (gi, g) in arrangement.slots.iter().enumerate() {
            let id = group_ids[gi].unwrap_or_else(|| {
                let id = next_id;
                next_id += 1;
                id
            });
            let exposures: Vec<Exposure> = g
                .iter()
                .filter_map(|&slot| pool.get_mut(slot).and_then(Option::take))
                .collect();
            if !exposures.is_empty() {
                sets.push(ExposureSet::new(id).with_exposures(exposures));
            }
        }

        // anything the arrangement did not place goes back to its old set
        let leftovers = pool
            .into_iter()
            .zip(origin)
            .filter_map(|(e, sid)| e.map(|e| (sid, e)))
            .chain(parked);
        for (sid, e) in leftovers {
            match sets.iter_mut().find(|s| s.id == sid) {
                Some(set) => set.exposures.push(e),
                None => sets.push(ExposureSet::new(sid).with_exposures(vec![e])),
            }
        }

        sets.sort_by_key(|s| s.id);
        plate.sets = sets;
    }

    /// Places one exposure into its optimal set and returns the set id.
    ///
    /// Among open sets lacking the exposure's dither, a set the exposure
    /// completes wins; otherwise the one with the largest resulting SN2.
    /// Invalid exposures go to the newest set for auditing.
    pub fn add_exposure(&self, plate: &mut Plate, exposure: Exposure) -> SetId {
        if !self.model.is_valid(&exposure) {
            let target = plate
                .sets
                .iter()
                .rev()
                .find(|s| s.status_override.is_none())
                .map(|s| s.id);
            let id = target.unwrap_or_else(|| plate.open_set());
            if let Some(set) = plate.set_mut(id) {
                set.exposures.push(exposure);
            }
            return id;
        }

        let mut best: Option<(SetId, bool, f64)> = None;
        for set in &plate.sets {
            if set.status_override.is_some() || self.model.is_set_complete(set) {
                continue;
            }
            let gain = self.model.marginal_sn2_gain(set, &exposure);
            if gain.is_zero() {
                continue;
            }
            let mut mock: Vec<&Exposure> = set.exposures.iter().collect();
            mock.push(&exposure);
            let completes = self.model.grade(&mock, None).is_complete();
            let sn2 = self.model.set_sn2(set) + gain;
            let ratio = self.model.ratio(sn2);
            let better = match best {
                None => true,
                Some((_, c, r)) => (completes, ratio) > (c, r),
            };
            if better {
                best = Some((set.id, completes, ratio));
            }
        }

        let id = match best {
            Some((id, ..)) => id,
            None => plate.open_set(),
        };
        if let Some(set) = plate.set_mut(id) {
            set.exposures.push(exposure);
        }
        id
    }

    /// Records new exposures on a plate and rearranges as allowed.
    ///
    /// At least `forceRearrangementMinExposures` new exposures trigger a
    /// whole-plate search; fewer only revisit incomplete sets.
    pub fn update_plate(&self, plate: &mut Plate, exposures: Vec<Exposure>) -> RearrangeOutcome {
        let sa = &self.cfg().set_arrangement;
        let simulated = !exposures.is_empty() && exposures.iter().all(Exposure::is_simulated);
        let allowed = self.should_rearrange(plate, simulated);
        let scope = if exposures.len() >= sa.force_rearrangement_min_exposures {
            RearrangeScope::Plate
        } else {
            RearrangeScope::Incomplete
        };

        let mut notices = Vec::new();
        for e in exposures {
            if let Err(reason) = e.check(self.cfg()) {
                warn!(plate_id = plate.plate_id, exposure_id = e.id, ?reason, "invalid exposure");
                notices.push(Notice::InvalidExposure {
                    plate_id: plate.plate_id,
                    exposure_id: e.id,
                    reason,
                });
            }
            self.add_exposure(plate, e);
        }

        if !allowed {
            debug!(plate_id = plate.plate_id, "rearrangement skipped for real exposures");
            let complete = self.model.complete_set_count(plate);
            return RearrangeOutcome {
                complete_sets_before: complete,
                complete_sets_after: complete,
                notices,
                ..RearrangeOutcome::default()
            };
        }

        let mut outcome = self.rearrange(plate, scope);
        notices.append(&mut outcome.notices);
        outcome.notices = notices;
        outcome
    }
}

fn same_grouping(a: &[Vec<usize>], b: &[Vec<usize>]) -> bool {
    let canon = |gs: &[Vec<usize>]| {
        let mut out: Vec<Vec<usize>> = gs
            .iter()
            .map(|g| {
                let mut g = g.clone();
                g.sort_unstable();
                g
            })
            .collect();
        out.sort();
        out
    };
    canon(a) == canon(b)
}

/// Rearranges many plates in parallel, honouring the real-exposure gate.
pub fn rearrange_plates(
    cfg: &SchedulerConfig,
    plates: &mut [Plate],
    scope: RearrangeScope,
) -> Vec<RearrangeOutcome> {
    plates
        .par_iter_mut()
        .map(|plate| {
            let rearranger = SetRearranger::new(cfg);
            if rearranger.should_rearrange(plate, plate.has_simulated()) {
                rearranger.rearrange(plate, scope)
            } else {
                RearrangeOutcome::default()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::set::SetOverride;

    fn exp(id: ExposureId, d: Dither, blue: f64, red: f64) -> Exposure {
        Exposure::new(id, d, Sn2::new(blue, red)).with_start_jd(id as f64)
    }

    fn triple(first: ExposureId) -> Vec<Exposure> {
        vec![
            exp(first, Dither::N, 2.5, 4.5),
            exp(first + 1, Dither::S, 2.5, 4.5),
            exp(first + 2, Dither::E, 2.5, 4.5),
        ]
    }

    #[test]
    fn test_next_permutation_distinct() {
        let mut v = vec![None, Some(1), Some(2)];
        let mut seen = vec![v.clone()];
        while next_permutation(&mut v) {
            seen.push(v.clone());
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(v, vec![None, Some(1), Some(2)]);

        let mut padded = vec![None, None, Some(0)];
        let mut n = 1;
        while next_permutation(&mut padded) {
            n += 1;
        }
        assert_eq!(n, 3);
    }

    #[test]
    fn test_permutation_count_matches_enumeration() {
        let plate_exposures: Vec<Exposure> = vec![
            exp(1, Dither::N, 2.5, 4.5),
            exp(2, Dither::N, 2.5, 4.5),
            exp(3, Dither::N, 2.5, 4.5),
            exp(4, Dither::S, 2.5, 4.5),
            exp(5, Dither::S, 2.5, 4.5),
            exp(6, Dither::E, 2.5, 4.5),
        ];
        let pool = Pool {
            exposures: plate_exposures.iter().collect(),
            origin: vec![1; 6],
        };
        let columns = dither_columns(&pool);
        // S: 3!/1! = 6, E: 3!/2! = 3
        assert_eq!(permutation_count(&columns), 18);
        let mut n = 0;
        for_each_arrangement(&columns, |groups| {
            assert_eq!(groups.len(), 3);
            assert_eq!(groups.iter().map(Vec::len).sum::<usize>(), 6);
            n += 1;
        });
        assert_eq!(n, 18);
    }

    #[test]
    fn test_rearrange_completes_scattered_sets() {
        let cfg = SchedulerConfig::default();
        let rearranger = SetRearranger::new(&cfg);
        let model = CompletenessModel::new(&cfg);

        // N+S in set 1, N+E in set 2, S+E in set 3: none complete
        let e = |id, d| exp(id, d, 2.5, 4.5);
        let mut plate = Plate::new(1, 0.0, 0.0).with_sets(vec![
            ExposureSet::new(1).with_exposures(vec![e(1, Dither::N), e(2, Dither::S)]),
            ExposureSet::new(2).with_exposures(vec![e(3, Dither::N), e(4, Dither::E)]),
            ExposureSet::new(3).with_exposures(vec![e(5, Dither::S), e(6, Dither::E)]),
        ]);
        assert_eq!(model.complete_set_count(&plate), 0);

        let outcome = rearranger.rearrange(&mut plate, RearrangeScope::Plate);
        assert!(outcome.changed);
        assert_eq!(outcome.complete_sets_after, 2);
        assert_eq!(model.complete_set_count(&plate), 2);
        assert_eq!(plate.exposure_count(), 6);
        // ids reused, no new set created
        assert!(plate.sets.iter().all(|s| s.id <= 3));
    }

    #[test]
    fn test_rearrange_keeps_good_arrangement() {
        let cfg = SchedulerConfig::default();
        let rearranger = SetRearranger::new(&cfg);
        let mut plate = Plate::new(1, 0.0, 0.0).with_sets(vec![
            ExposureSet::new(1).with_exposures(triple(1)),
            ExposureSet::new(2).with_exposures(triple(4)),
        ]);
        let before = plate.clone();
        let outcome = rearranger.rearrange(&mut plate, RearrangeScope::Plate);
        assert!(!outcome.changed);
        assert_eq!(plate, before);
    }

    #[test]
    fn test_rearrange_never_loses_complete_sets() {
        let cfg = SchedulerConfig::default();
        let rearranger = SetRearranger::new(&cfg);
        let model = CompletenessModel::new(&cfg);

        let mut sets = vec![ExposureSet::new(1).with_exposures(triple(1))];
        // a lopsided incomplete set that cannot pair with the complete one
        sets.push(ExposureSet::new(2).with_exposures(vec![
            exp(10, Dither::N, 1.0, 1.6),
            exp(11, Dither::S, 2.5, 4.5),
        ]));
        let mut plate = Plate::new(1, 0.0, 0.0).with_sets(sets);
        let before = model.complete_set_count(&plate);

        for scope in [RearrangeScope::Plate, RearrangeScope::Incomplete] {
            let outcome = rearranger.rearrange(&mut plate, scope);
            assert!(outcome.complete_sets_after >= before);
            assert!(model.complete_set_count(&plate) >= before);
        }
    }

    #[test]
    fn test_invalid_exposures_stay_with_plate() {
        let cfg = SchedulerConfig::default();
        let rearranger = SetRearranger::new(&cfg);
        let e = |id, d| exp(id, d, 2.5, 4.5);
        let mut plate = Plate::new(1, 0.0, 0.0).with_sets(vec![
            ExposureSet::new(1).with_exposures(vec![
                e(1, Dither::N),
                e(2, Dither::S),
                e(7, Dither::E).with_valid(false),
            ]),
            ExposureSet::new(2).with_exposures(vec![e(3, Dither::E)]),
        ]);
        rearranger.rearrange(&mut plate, RearrangeScope::Plate);
        assert_eq!(plate.exposure_count(), 4);
        let ids: Vec<ExposureId> = {
            let mut v: Vec<_> = plate.exposures().map(|e| e.id).collect();
            v.sort();
            v
        };
        assert_eq!(ids, vec![1, 2, 3, 7]);
    }

    #[test]
    fn test_repeated_exposure_ids_survive_rearrangement() {
        let cfg = SchedulerConfig::default();
        let rearranger = SetRearranger::new(&cfg);
        let model = CompletenessModel::new(&cfg);
        let mut plate = Plate::new(1, 0.0, 0.0).with_sets(vec![
            ExposureSet::new(1).with_exposures(vec![
                exp(1, Dither::N, 2.5, 4.5),
                exp(2, Dither::S, 2.5, 4.5),
            ]),
            ExposureSet::new(2).with_exposures(vec![exp(2, Dither::E, 2.5, 4.5)]),
        ]);

        let outcome = rearranger.rearrange(&mut plate, RearrangeScope::Plate);
        assert!(outcome.changed);
        assert_eq!(plate.exposure_count(), 3);
        assert_eq!(model.complete_set_count(&plate), 1);
        let mut dithers: Vec<Dither> = plate.exposures().map(|e| e.dither).collect();
        dithers.sort();
        let mut expected = vec![Dither::N, Dither::S, Dither::E];
        expected.sort();
        assert_eq!(dithers, expected);
    }

    #[test]
    fn test_overridden_sets_untouched() {
        let cfg = SchedulerConfig::default();
        let rearranger = SetRearranger::new(&cfg);
        let bad = ExposureSet::new(1)
            .with_exposures(vec![exp(1, Dither::N, 2.5, 4.5)])
            .with_override(SetOverride::Bad);
        let mut plate = Plate::new(1, 0.0, 0.0).with_sets(vec![
            bad.clone(),
            ExposureSet::new(2).with_exposures(vec![exp(2, Dither::S, 2.5, 4.5)]),
            ExposureSet::new(3).with_exposures(vec![exp(3, Dither::E, 2.5, 4.5)]),
        ]);
        rearranger.rearrange(&mut plate, RearrangeScope::Plate);
        assert_eq!(plate.set(1), Some(&bad));
    }

    #[test]
    fn test_add_exposure_prefers_completing_set() {
        let cfg = SchedulerConfig::default();
        let rearranger = SetRearranger::new(&cfg);
        let mut two = triple(1);
        two.pop();
        let mut plate = Plate::new(1, 0.0, 0.0).with_sets(vec![
            ExposureSet::new(1).with_exposures(vec![exp(10, Dither::N, 2.5, 4.5)]),
            ExposureSet::new(2).with_exposures(two),
        ]);
        let id = rearranger.add_exposure(&mut plate, exp(20, Dither::E, 2.5, 4.5));
        assert_eq!(id, 2);

        // no set lacks an N, so a new set opens
        let id = rearranger.add_exposure(&mut plate, exp(21, Dither::N, 2.5, 4.5));
        assert_eq!(id, 3);
    }

    #[test]
    fn test_greedy_fallback_over_budget() {
        let mut cfg = SchedulerConfig::default();
        cfg.set_arrangement.permutation_limit_incomplete = 14_400;
        let rearranger = SetRearranger::new(&cfg);

        // 20 exposures: N=7, S=7, E=6 in single-exposure sets
        let dithers = [Dither::N, Dither::S, Dither::E];
        let sets: Vec<ExposureSet> = (0..20u64)
            .map(|i| {
                ExposureSet::new(i as SetId + 1)
                    .with_exposures(vec![exp(i + 1, dithers[(i % 3) as usize], 2.5, 4.5)])
            })
            .collect();
        let mut plate = Plate::new(1, 0.0, 0.0).with_sets(sets);

        let outcome = rearranger.rearrange(&mut plate, RearrangeScope::Incomplete);
        assert!(outcome.used_greedy);
        assert!(outcome.permutations > 14_400);
        assert!(matches!(
            outcome.notices[0],
            Notice::RearrangementBudgetExceeded { limit: 14_400, .. }
        ));
        assert_eq!(outcome.complete_sets_after, 6);
        assert_eq!(plate.exposure_count(), 20);
    }

    #[test]
    fn test_update_plate_gating_on_real_exposures() {
        let cfg = SchedulerConfig::default();
        let rearranger = SetRearranger::new(&cfg);

        // 3 exposures in complete sets: still rearranged
        let mut plate = Plate::new(1, 0.0, 0.0)
            .with_sets(vec![ExposureSet::new(1).with_exposures(triple(1))]);
        let outcome = rearranger.update_plate(&mut plate, vec![exp(10, Dither::N, 2.5, 4.5)]);
        assert!(outcome.attempted);

        // 5 exposures in complete sets: a sixth real exposure is only appended
        let good = ExposureSet::new(2)
            .with_exposures(vec![exp(20, Dither::N, 2.5, 4.5), exp(21, Dither::S, 2.5, 4.5)])
            .with_override(SetOverride::Good);
        let mut plate = Plate::new(2, 0.0, 0.0)
            .with_sets(vec![ExposureSet::new(1).with_exposures(triple(1)), good]);
        let model = CompletenessModel::new(&cfg);
        assert_eq!(model.exposures_in_complete_sets(&plate), 5);
        let outcome = rearranger.update_plate(&mut plate, vec![exp(30, Dither::E, 2.5, 4.5)]);
        assert!(!outcome.attempted);
        assert_eq!(plate.exposure_count(), 6);

        // simulated exposures are always rearranged
        let outcome = rearranger.update_plate(
            &mut plate,
            vec![exp(31, Dither::N, 2.5, 4.5).simulated()],
        );
        assert!(outcome.attempted);
    }

    #[test]
    fn test_rearrange_plates_parallel() {
        let cfg = SchedulerConfig::default();
        let e = |id, d| exp(id, d, 2.5, 4.5);
        let scattered = || {
            vec![
                ExposureSet::new(1).with_exposures(vec![e(1, Dither::N), e(2, Dither::S)]),
                ExposureSet::new(2).with_exposures(vec![e(3, Dither::E)]),
            ]
        };
        let mut plates: Vec<Plate> = (1..=4)
            .map(|id| Plate::new(id, 0.0, 0.0).with_sets(scattered()))
            .collect();
        let outcomes = rearrange_plates(&cfg, &mut plates, RearrangeScope::Plate);
        assert_eq!(outcomes.len(), 4);
        assert!(outcomes.iter().all(|o| o.complete_sets_after == 1));
    }
}
