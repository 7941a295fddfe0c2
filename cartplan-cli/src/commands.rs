//! Command bodies: load a snapshot, drive the engine, print or write records.

use anyhow::{Context, Result, bail};
use cartplan_core::time::night_bounds;
use cartplan_core::{
    Cart, CompletenessModel, FixedHoursPlan, ObservingPlan, ObservingWindow, Plate, Planner,
    Plugger, PowerLawSn2, RearrangeScope, SchedulerConfig, SiteEphemeris, Survey, carts_from_config,
    number_plates_at_apo, rearrange_plates,
};
use cartplan_ingest::{
    load_block_plan, load_cart_states, load_snapshot, mount_plates, read_plate_list,
    render_forecast, render_plugging, render_probabilities, write_forecast, write_forecast_json,
    write_plugging,
};
use chrono::NaiveDate;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::SnapshotArgs;
use crate::state;

pub struct Snapshot {
    pub plates: Vec<Plate>,
    pub carts: Vec<Cart>,
}

pub fn load(cfg: &SchedulerConfig, args: &SnapshotArgs) -> Result<Snapshot> {
    let mut plates = load_snapshot(cfg, &args.plates, &args.exposures)?;

    if let Some(path) = &args.ignore {
        let ignore = read_plate_list(path)?;
        let before = plates.len();
        plates.retain(|p| !ignore.contains(&p.plate_id));
        info!(ignored = before - plates.len(), "ignore list applied");
    }

    let carts = match &args.carts {
        Some(path) => load_cart_states(cfg, path)?,
        None => {
            let mut carts = carts_from_config(cfg);
            mount_plates(&mut carts, &plates)?;
            carts
        }
    };

    let model = CompletenessModel::new(cfg);
    for plate in &plates {
        for notice in model.invalid_exposures(plate) {
            info!("{}", notice.summary());
        }
    }
    info!(plates = plates.len(), carts = carts.len(), "snapshot loaded");
    Ok(Snapshot { plates, carts })
}

#[derive(Debug, Serialize)]
struct PlateReport {
    plate_id: u32,
    priority: u8,
    status: String,
    completion: f64,
    completion_plus: f64,
    complete_sets: usize,
    sets: usize,
    exposures: usize,
    cart: Option<u8>,
}

pub fn status(cfg: &SchedulerConfig, snap: &Snapshot, json: bool) -> Result<()> {
    let model = CompletenessModel::new(cfg);
    let reports: Vec<PlateReport> = snap
        .plates
        .iter()
        .map(|p| PlateReport {
            plate_id: p.plate_id,
            priority: p.priority,
            status: match model.plate_status(p) {
                Ok(s) => format!("{s:?}"),
                Err(e) => {
                    warn!("{e}");
                    "Inconsistent".to_string()
                }
            },
            completion: model.plate_completion_fraction(p),
            completion_plus: model.completion_with_incomplete(p),
            complete_sets: model.complete_set_count(p),
            sets: p.sets.len(),
            exposures: p.exposure_count(),
            cart: p.cart,
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        println!(
            "{:>6} {:>4} {:<16} {:>6} {:>6} {:>9} {:>5}",
            "plate", "prio", "status", "compl", "compl+", "sets", "cart"
        );
        for r in &reports {
            println!(
                "{:>6} {:>4} {:<16} {:>6.3} {:>6.3} {:>4}/{:<4} {:>5}",
                r.plate_id,
                r.priority,
                r.status,
                r.completion,
                r.completion_plus,
                r.complete_sets,
                r.sets,
                r.cart.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string())
            );
        }
    }

    // plates already marked inconsistent were reported above
    if snap.plates.iter().all(|p| model.plate_status(p).is_ok()) {
        let at_apo = number_plates_at_apo(cfg, &snap.plates)?;
        println!("\n{at_apo} of {} plates allowed at APO", cfg.number_plates_allowed_at_apo);
    }
    Ok(())
}

pub fn rearrange(cfg: &SchedulerConfig, snap: &mut Snapshot, all: bool) -> Result<()> {
    let scope = if all { RearrangeScope::Plate } else { RearrangeScope::Incomplete };
    let outcomes = rearrange_plates(cfg, &mut snap.plates, scope);

    let mut changed = 0;
    for (plate, outcome) in snap.plates.iter().zip(&outcomes) {
        for notice in &outcome.notices {
            warn!("{}", notice.summary());
        }
        if !outcome.attempted {
            println!("{:>6}  skipped", plate.plate_id);
            continue;
        }
        if outcome.changed {
            changed += 1;
        }
        println!(
            "{:>6}  complete sets {} -> {}{}{}",
            plate.plate_id,
            outcome.complete_sets_before,
            outcome.complete_sets_after,
            if outcome.changed { "" } else { " (unchanged)" },
            if outcome.used_greedy { " greedy" } else { "" },
        );
    }
    println!("\n{changed} of {} plates regrouped", snap.plates.len());
    Ok(())
}

/// The night to plug: a local evening date or an explicit JD range.
pub fn night_window(
    cfg: &SchedulerConfig,
    date: Option<NaiveDate>,
    jd: Option<(f64, f64)>,
    apogee: bool,
) -> Result<ObservingWindow> {
    let (start, end) = match (date, jd) {
        (Some(date), _) => night_bounds(
            date,
            &cfg.planner.night_start_local,
            &cfg.planner.night_end_local,
            &cfg.observatory.timezone,
        )?,
        (None, Some(range)) => range,
        (None, None) => bail!("pass --date or --start-jd/--end-jd"),
    };
    let survey = if apogee { Survey::Apogee } else { Survey::Manga };
    let window = ObservingWindow::new(start, end).with_survey(survey);
    window.validate()?;
    Ok(window)
}

pub fn plug(cfg: &SchedulerConfig, snap: &mut Snapshot, window: &ObservingWindow, out: Option<&Path>) -> Result<()> {
    let plugger = Plugger::new(
        cfg,
        SiteEphemeris::from_config(cfg),
        PowerLawSn2::from_config(cfg, &cfg.plugger.mode),
    );
    let plan = plugger
        .plan_night(window, &mut snap.plates, &mut snap.carts)
        .context("planning night")?;

    for notice in &plan.notices {
        warn!("{}", notice.summary());
    }
    match out {
        Some(path) => {
            write_plugging(path, &plan)?;
            println!("Wrote {} ({} plates)", path.display(), plan.plugged());
        }
        None => print!("{}", render_plugging(&plan)),
    }
    Ok(())
}

pub struct PlanRequest {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub blocks: Option<PathBuf>,
    pub trials: usize,
    pub seed: Option<u64>,
    pub out: Option<PathBuf>,
}

pub fn plan(cfg: &SchedulerConfig, snap: &Snapshot, req: &PlanRequest) -> Result<()> {
    if req.end < req.start {
        bail!("--end {} is before --start {}", req.end, req.start);
    }
    if req.trials == 0 {
        bail!("--trials must be at least 1");
    }

    let mut cfg = cfg.clone();
    if let Some(seed) = req.seed {
        cfg.planner.mode.seed = seed;
    }
    let cfg = &cfg;

    let source: Box<dyn ObservingPlan> = match &req.blocks {
        Some(path) => Box::new(load_block_plan(path, &cfg.observatory.timezone)?),
        None => Box::new(FixedHoursPlan::from_config(cfg)),
    };
    let planner = Planner::new(
        cfg,
        SiteEphemeris::from_config(cfg),
        PowerLawSn2::from_config(cfg, &cfg.planner.mode),
    );
    let out_dir = match &req.out {
        Some(dir) => dir.clone(),
        None => state::output_dir()?,
    };

    if req.trials == 1 {
        let forecast = planner
            .simulate_season(req.start, req.end, source.as_ref(), &snap.plates, &snap.carts)
            .context("simulating season")?;
        write_forecast(out_dir.join("forecast.txt"), &forecast)?;
        write_forecast_json(out_dir.join("forecast.json"), &forecast)?;
        print!("{}", render_forecast(&forecast));
    } else {
        let mc = planner
            .simulate_trials(req.start, req.end, source.as_ref(), &snap.plates, &snap.carts, req.trials)
            .context("simulating trials")?;
        write_forecast_json(out_dir.join("forecast.json"), &mc)?;
        print!("{}", render_probabilities(&mc));
    }
    info!(dir = %out_dir.display(), "forecast written");
    Ok(())
}
