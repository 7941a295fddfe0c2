use cartplan_core::{CartId, ExposureId, PlateId, SetId};
use serde::{Deserialize, Serialize};

/// One row of the plate table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateRow {
    pub plate_id: PlateId,
    pub ra: f64,
    pub dec: f64,
    /// Empty means the configured default priority.
    pub priority: Option<u8>,
    pub cart: Option<CartId>,
    pub marked_complete: bool,
    pub special_complete: bool,
}

/// One row of the exposure table, already reduced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureRow {
    pub plate_id: PlateId,
    pub set_id: SetId,
    pub exposure_id: ExposureId,
    pub dither: String,
    pub sn2_blue: f64,
    pub sn2_red: f64,
    pub seeing: f64,
    pub exposure_time: f64,
    pub airmass: f64,
    pub hour_angle: f64,
    pub start_jd: f64,
    pub transparency: f64,
    pub sun_altitude: Option<f64>,
    pub valid: bool,
    /// Observer override for the whole set: `good`, `bad` or empty.
    pub set_status: Option<String>,
}

/// Current cart state; pool membership comes from the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartRow {
    pub cart_id: CartId,
    pub plate_id: Option<PlateId>,
    pub available: bool,
}

/// One observing block of a survey schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRow {
    pub start_jd: f64,
    pub end_jd: f64,
    pub survey: String,
}
