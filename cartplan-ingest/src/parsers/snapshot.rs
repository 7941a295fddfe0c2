//! Plate, exposure and cart snapshots from CSV tables.
//!
//! Expected headers:
//!   plates.csv     plate_id,ra,dec,priority,cart,marked_complete,special_complete
//!   exposures.csv  plate_id,set_id,exposure_id,dither,sn2_blue,sn2_red,seeing,
//!                  exposure_time,airmass,hour_angle,start_jd,transparency,
//!                  sun_altitude,valid,set_status
//!   carts.csv      cart_id,plate_id,available

use anyhow::{Context, Result, bail};
use cartplan_core::{
    Cart, Dither, Exposure, ExposureId, ExposureSet, Plate, PlateId, SchedulerConfig, SetId, SetOverride, Sn2,
    carts_from_config,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, warn};

use super::read_rows;
use crate::types::{CartRow, ExposureRow, PlateRow};

pub fn load_plates(path: impl AsRef<Path>) -> Result<Vec<PlateRow>> {
    read_rows(path.as_ref())
}

pub fn load_exposures(path: impl AsRef<Path>) -> Result<Vec<ExposureRow>> {
    read_rows(path.as_ref())
}

fn parse_set_status(raw: Option<&str>) -> Result<Option<SetOverride>> {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") => Ok(None),
        Some("good") => Ok(Some(SetOverride::Good)),
        Some("bad") => Ok(Some(SetOverride::Bad)),
        Some(other) => bail!("unknown set status {other:?}"),
    }
}

fn exposure_from_row(row: &ExposureRow) -> Result<Exposure> {
    let dither: Dither = row
        .dither
        .parse()
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("exposure {}", row.exposure_id))?;
    let mut exposure = Exposure::new(row.exposure_id, dither, Sn2::new(row.sn2_blue, row.sn2_red))
        .with_seeing(row.seeing)
        .with_exposure_time(row.exposure_time)
        .with_pointing(row.hour_angle, row.airmass)
        .with_start_jd(row.start_jd)
        .with_valid(row.valid);
    exposure.transparency = row.transparency;
    exposure.sun_altitude = row.sun_altitude;
    Ok(exposure)
}

/// Builds plates from the two tables. Sets keep their recorded ids and are
/// ordered by id; exposures within a set by start time.
pub fn assemble(cfg: &SchedulerConfig, plates: Vec<PlateRow>, exposures: Vec<ExposureRow>) -> Result<Vec<Plate>> {
    let mut by_plate: BTreeMap<PlateId, Plate> = BTreeMap::new();
    for row in plates {
        let mut plate = Plate::new(row.plate_id, row.ra, row.dec)
            .with_priority(row.priority.unwrap_or(cfg.default_priority));
        plate.cart = row.cart;
        plate.marked_complete = row.marked_complete;
        plate.special_complete = row.special_complete;
        if by_plate.insert(row.plate_id, plate).is_some() {
            bail!("plate {} listed twice", row.plate_id);
        }
    }

    let mut sets: BTreeMap<(PlateId, SetId), ExposureSet> = BTreeMap::new();
    let mut seen: BTreeSet<(PlateId, ExposureId)> = BTreeSet::new();
    for row in &exposures {
        if !by_plate.contains_key(&row.plate_id) {
            bail!("exposure {} belongs to unknown plate {}", row.exposure_id, row.plate_id);
        }
        if !seen.insert((row.plate_id, row.exposure_id)) {
            bail!("exposure {} listed twice for plate {}", row.exposure_id, row.plate_id);
        }
        let status = parse_set_status(row.set_status.as_deref())
            .with_context(|| format!("exposure {}", row.exposure_id))?;
        let set = sets
            .entry((row.plate_id, row.set_id))
            .or_insert_with(|| ExposureSet::new(row.set_id));
        match (set.status_override, status) {
            (None, Some(s)) if set.exposures.is_empty() => set.status_override = Some(s),
            (Some(a), Some(b)) if a != b => {
                bail!("set {} of plate {} has conflicting status", row.set_id, row.plate_id)
            }
            (Some(_), None) | (None, Some(_)) => {
                bail!("set {} of plate {} has status on only some exposures", row.set_id, row.plate_id)
            }
            _ => {}
        }
        set.exposures.push(exposure_from_row(row)?);
    }

    for ((plate_id, _), mut set) in sets {
        set.exposures.sort_by(|a, b| a.start_jd.total_cmp(&b.start_jd));
        if let Some(plate) = by_plate.get_mut(&plate_id) {
            plate.sets.push(set);
        }
    }

    let plates: Vec<Plate> = by_plate.into_values().collect();
    debug!(plates = plates.len(), exposures = exposures.len(), "snapshot assembled");
    Ok(plates)
}

pub fn load_snapshot(
    cfg: &SchedulerConfig,
    plates_path: impl AsRef<Path>,
    exposures_path: impl AsRef<Path>,
) -> Result<Vec<Plate>> {
    let plates = load_plates(plates_path)?;
    let exposures = load_exposures(exposures_path)?;
    assemble(cfg, plates, exposures)
}

/// Cart pool from the configuration, overlaid with the recorded cart states.
pub fn load_cart_states(cfg: &SchedulerConfig, path: impl AsRef<Path>) -> Result<Vec<Cart>> {
    let rows: Vec<CartRow> = read_rows(path.as_ref())?;
    let mut carts = carts_from_config(cfg);
    for row in rows {
        let Some(cart) = carts.iter_mut().find(|c| c.id == row.cart_id) else {
            bail!("cart {} is not in any configured pool", row.cart_id);
        };
        cart.plate = row.plate_id;
        cart.available = row.available;
    }
    Ok(carts)
}

/// Fills cart contents from the plates' recorded carts, for snapshots without
/// a cart table.
pub fn mount_plates(carts: &mut [Cart], plates: &[Plate]) -> Result<()> {
    for plate in plates {
        let Some(cart_id) = plate.cart else { continue };
        let Some(cart) = carts.iter_mut().find(|c| c.id == cart_id) else {
            warn!(plate_id = plate.plate_id, cart_id, "plate mounted on unknown cart");
            continue;
        };
        if let Some(other) = cart.plate.filter(|p| *p != plate.plate_id) {
            bail!("cart {cart_id} holds both plate {other} and plate {}", plate.plate_id);
        }
        cart.plate = Some(plate.plate_id);
    }
    Ok(())
}
