//! Flat-file record sink for plugging decisions and forecasts.

use anyhow::{Context, Result};
use cartplan_core::{MonteCarloForecast, NightPlan, PlateId, ScheduleForecast};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;

fn write_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))
}

/// `cart plate exposures` per decision, under a `#` header.
pub fn render_plugging(plan: &NightPlan) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# plugging for JD {:.5} - {:.5}", plan.night.start, plan.night.end);
    for notice in &plan.notices {
        let _ = writeln!(out, "# {}", notice.summary());
    }
    let _ = writeln!(out, "# cart plate exposures");
    for d in &plan.decisions {
        let _ = writeln!(out, "{} {} {}", d.cart_id, d.plate_id, d.exposures.len());
    }
    out
}

pub fn write_plugging(path: impl AsRef<Path>, plan: &NightPlan) -> Result<()> {
    write_text(path.as_ref(), &render_plugging(plan))
}

/// `plate night` per completed plate, in completion order.
pub fn render_forecast(forecast: &ScheduleForecast) -> String {
    let mut rows: Vec<_> = forecast.completion_nights.iter().collect();
    rows.sort_by_key(|(id, date)| (**date, **id));

    let mut out = String::new();
    let _ = writeln!(
        out,
        "# seed {} nights {} completed {}",
        forecast.seed,
        forecast.nights_simulated,
        rows.len()
    );
    let _ = writeln!(out, "# plate completion_night");
    for (id, date) in rows {
        let _ = writeln!(out, "{id} {}", date.format("%Y-%m-%d"));
    }
    out
}

pub fn write_forecast(path: impl AsRef<Path>, forecast: &ScheduleForecast) -> Result<()> {
    write_text(path.as_ref(), &render_forecast(forecast))
}

/// Any forecast shape as pretty JSON.
pub fn write_forecast_json<T: Serialize>(path: impl AsRef<Path>, forecast: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(forecast).context("serialising forecast")?;
    write_text(path.as_ref(), &json)
}

/// `plate probability` per plate for a Monte Carlo run.
pub fn render_probabilities(forecast: &MonteCarloForecast) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "# trials {} mean_completed {:.2}",
        forecast.trials, forecast.mean_completed_plates
    );
    let _ = writeln!(out, "# plate completion_probability");
    for (id, p) in &forecast.completion_probability {
        let _ = writeln!(out, "{id} {p:.3}");
    }
    out
}

/// One plate id per line; readable back with `read_plate_list`.
pub fn write_plate_list(path: impl AsRef<Path>, header: &str, plates: &[PlateId]) -> Result<()> {
    let mut out = String::new();
    for line in header.lines() {
        let _ = writeln!(out, "# {line}");
    }
    for id in plates {
        let _ = writeln!(out, "{id}");
    }
    write_text(path.as_ref(), &out)
}
