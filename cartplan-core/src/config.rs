//! Immutable scheduler configuration.
//!
//! Loaded once by the caller (TOML in the CLI) and passed by reference into
//! every component. Keys keep the survey's camelCase names.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::cart::CartId;
use crate::error::{SchedError, SchedResult};
use crate::exposure::Dither;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedulerConfig {
    pub observatory: ObservatorySection,
    pub scheduling: SchedulingSection,
    pub planner: PlannerSection,
    pub plugger: PluggerSection,
    #[serde(rename = "SN2thresholds")]
    pub sn2_thresholds: Sn2Thresholds,
    pub exposure: ExposureSection,
    pub set: SetSection,
    pub set_arrangement: SetArrangementSection,
    pub simulation: SimulationSection,
    pub manga_carts: Vec<CartId>,
    pub apogee_carts: Vec<CartId>,
    pub offline_carts: Vec<CartId>,
    pub default_priority: u8,
    pub plate_visibility_max_half_window_hours: f64,
    #[serde(rename = "numberPlatesAllowedAtAPO")]
    pub number_plates_allowed_at_apo: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ObservatorySection {
    /// Degrees, east positive.
    pub longitude: f64,
    pub latitude: f64,
    /// Metres.
    pub altitude: f64,
    /// IANA timezone of the site.
    pub timezone: String,
}

/// Ranking weights applied on top of the comparator chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedulingSection {
    pub patch_set_factor: f64,
    pub plate_priority_factor: f64,
    pub next_night_factor: f64,
}

/// Parameters shared by the plugger and planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModeSection {
    pub efficiency: f64,
    pub max_altitude: f64,
    pub no_plug_priority: u8,
    pub force_plug_priority: u8,
    pub good_weather_fraction: f64,
    pub seed: u64,
    pub simulation_factor: f64,
    /// Mean seeing (arcsec) assumed for dry runs.
    pub seeing: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "PlannerTable")]
pub struct PlannerSection {
    #[serde(flatten)]
    pub mode: ModeSection,
    /// Local clock time ("HH:MM") a generated night starts.
    pub night_start_local: String,
    pub night_end_local: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "PluggerTable")]
pub struct PluggerSection {
    #[serde(flatten)]
    pub mode: ModeSection,
    pub min_scheduling_time_hours: f64,
    pub only_visible_plates: bool,
    pub initial_buffer_min: f64,
    pub use_initial_buffer: bool,
}

/// Mode keys present in a section table. Absent keys keep that section's
/// own defaults, which differ between planner and plugger.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ModeOverrides {
    efficiency: Option<f64>,
    max_altitude: Option<f64>,
    no_plug_priority: Option<u8>,
    force_plug_priority: Option<u8>,
    good_weather_fraction: Option<f64>,
    seed: Option<u64>,
    simulation_factor: Option<f64>,
    seeing: Option<f64>,
}

impl ModeOverrides {
    fn over(self, base: ModeSection) -> ModeSection {
        ModeSection {
            efficiency: self.efficiency.unwrap_or(base.efficiency),
            max_altitude: self.max_altitude.unwrap_or(base.max_altitude),
            no_plug_priority: self.no_plug_priority.unwrap_or(base.no_plug_priority),
            force_plug_priority: self.force_plug_priority.unwrap_or(base.force_plug_priority),
            good_weather_fraction: self.good_weather_fraction.unwrap_or(base.good_weather_fraction),
            seed: self.seed.unwrap_or(base.seed),
            simulation_factor: self.simulation_factor.unwrap_or(base.simulation_factor),
            seeing: self.seeing.unwrap_or(base.seeing),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PlannerTable {
    #[serde(flatten)]
    mode: ModeOverrides,
    night_start_local: Option<String>,
    night_end_local: Option<String>,
}

impl From<PlannerTable> for PlannerSection {
    fn from(table: PlannerTable) -> Self {
        let base = PlannerSection::default();
        Self {
            mode: table.mode.over(base.mode),
            night_start_local: table.night_start_local.unwrap_or(base.night_start_local),
            night_end_local: table.night_end_local.unwrap_or(base.night_end_local),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PluggerTable {
    #[serde(flatten)]
    mode: ModeOverrides,
    min_scheduling_time_hours: Option<f64>,
    only_visible_plates: Option<bool>,
    initial_buffer_min: Option<f64>,
    use_initial_buffer: Option<bool>,
}

impl From<PluggerTable> for PluggerSection {
    fn from(table: PluggerTable) -> Self {
        let base = PluggerSection::default();
        Self {
            mode: table.mode.over(base.mode),
            min_scheduling_time_hours: table
                .min_scheduling_time_hours
                .unwrap_or(base.min_scheduling_time_hours),
            only_visible_plates: table.only_visible_plates.unwrap_or(base.only_visible_plates),
            initial_buffer_min: table.initial_buffer_min.unwrap_or(base.initial_buffer_min),
            use_initial_buffer: table.use_initial_buffer.unwrap_or(base.use_initial_buffer),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Sn2Thresholds {
    pub plate_red: f64,
    pub plate_blue: f64,
    pub exposure_red: f64,
    pub exposure_blue: f64,
    /// Fraction of the plate thresholds a single set must reach.
    pub set_factor: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExposureSection {
    /// Seconds.
    pub exposure_time: f64,
    pub min_exp_time: f64,
    pub max_seeing: f64,
    pub transparency: f64,
    pub check_twilight: bool,
    pub max_sun_altitude: f64,
    /// Seconds an exposure may run past the end of a window.
    pub exposure_buffer: f64,
    pub valid_dither_positions: Vec<Dither>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SetSection {
    pub excellent_seeing: f64,
    pub good_seeing: f64,
    /// Degrees of hour angle.
    #[serde(rename = "maxHARange")]
    pub max_ha_range: f64,
    pub max_seeing_range: f64,
    #[serde(rename = "maxSN2Factor")]
    pub max_sn2_factor: f64,
    pub dither_positions: Vec<Dither>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SetArrangementSection {
    pub permutation_limit_plate: u64,
    pub permutation_limit_incomplete: u64,
    pub force_rearrangement_min_exposures: usize,
    pub factor: f64,
    /// Real exposures are no longer rearranged once this many sit in complete sets.
    pub real_rearrangement_max_complete_exposures: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSection {
    #[serde(rename = "blueSN2")]
    pub blue_sn2: f64,
    #[serde(rename = "redSN2")]
    pub red_sn2: f64,
    #[serde(rename = "alphaBlue")]
    pub alpha_blue: f64,
    #[serde(rename = "betaBlue")]
    pub beta_blue: f64,
    #[serde(rename = "alphaRed")]
    pub alpha_red: f64,
    #[serde(rename = "betaRed")]
    pub beta_red: f64,
    #[serde(rename = "seeingSigma")]
    pub seeing_sigma: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    Plugger,
    Planner,
}

impl Default for ObservatorySection {
    fn default() -> Self {
        // Apache Point Observatory
        Self {
            longitude: -105.820417,
            latitude: 32.780361,
            altitude: 2788.0,
            timezone: "America/Denver".to_string(),
        }
    }
}

impl Default for SchedulingSection {
    fn default() -> Self {
        Self {
            patch_set_factor: 0.1,
            plate_priority_factor: 0.1,
            next_night_factor: 0.95,
        }
    }
}

impl Default for ModeSection {
    fn default() -> Self {
        Self {
            efficiency: 0.755,
            max_altitude: 84.0,
            no_plug_priority: 1,
            force_plug_priority: 10,
            good_weather_fraction: 0.5,
            seed: 42,
            simulation_factor: 1.0,
            seeing: 1.5,
        }
    }
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            mode: ModeSection::default(),
            night_start_local: "20:00".to_string(),
            night_end_local: "05:30".to_string(),
        }
    }
}

impl Default for PluggerSection {
    fn default() -> Self {
        Self {
            mode: ModeSection {
                good_weather_fraction: 1.0,
                ..ModeSection::default()
            },
            min_scheduling_time_hours: 0.5,
            only_visible_plates: false,
            initial_buffer_min: 20.0,
            use_initial_buffer: true,
        }
    }
}

impl Default for Sn2Thresholds {
    fn default() -> Self {
        Self {
            plate_red: 36.0,
            plate_blue: 20.0,
            exposure_red: 1.5,
            exposure_blue: 0.75,
            set_factor: 1.0 / 3.0,
        }
    }
}

impl Default for ExposureSection {
    fn default() -> Self {
        Self {
            exposure_time: 900.0,
            min_exp_time: 450.0,
            max_seeing: 2.5,
            transparency: 0.0,
            check_twilight: true,
            max_sun_altitude: -12.0,
            exposure_buffer: 60.0,
            valid_dither_positions: Dither::ALL.to_vec(),
        }
    }
}

impl Default for SetSection {
    fn default() -> Self {
        Self {
            excellent_seeing: 1.5,
            good_seeing: 2.0,
            max_ha_range: 15.0,
            max_seeing_range: 0.8,
            max_sn2_factor: 2.0,
            dither_positions: Dither::ALL.to_vec(),
        }
    }
}

impl Default for SetArrangementSection {
    fn default() -> Self {
        Self {
            permutation_limit_plate: 600_000,
            permutation_limit_incomplete: 14_400,
            force_rearrangement_min_exposures: 3,
            factor: 0.9,
            real_rearrangement_max_complete_exposures: 5,
        }
    }
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            blue_sn2: 4.5,
            red_sn2: 8.0,
            alpha_blue: 1.5,
            beta_blue: 1.0,
            alpha_red: 1.0,
            beta_red: 0.8,
            seeing_sigma: 0.3,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            observatory: ObservatorySection::default(),
            scheduling: SchedulingSection::default(),
            planner: PlannerSection::default(),
            plugger: PluggerSection::default(),
            sn2_thresholds: Sn2Thresholds::default(),
            exposure: ExposureSection::default(),
            set: SetSection::default(),
            set_arrangement: SetArrangementSection::default(),
            simulation: SimulationSection::default(),
            manga_carts: (1..=8).collect(),
            apogee_carts: (9..=11).collect(),
            offline_carts: vec![7, 8],
            default_priority: 5,
            plate_visibility_max_half_window_hours: 3.0,
            number_plates_allowed_at_apo: 150,
        }
    }
}

impl SchedulerConfig {
    pub fn mode(&self, mode: RunMode) -> &ModeSection {
        match mode {
            RunMode::Plugger => &self.plugger.mode,
            RunMode::Planner => &self.planner.mode,
        }
    }

    /// Carts a night may hold science plates in, MaNGA carts minus offline ones.
    pub fn science_cart_count(&self) -> usize {
        self.manga_carts
            .iter()
            .filter(|c| !self.offline_carts.contains(c))
            .count()
    }

    pub fn validate(&self) -> SchedResult<()> {
        let bad = |msg: String| Err(SchedError::InvalidConfig(msg));

        for (name, mode) in [("planner", &self.planner.mode), ("plugger", &self.plugger.mode)] {
            if !(mode.efficiency > 0.0 && mode.efficiency <= 1.0) {
                return bad(format!("{name}.efficiency must be in (0, 1]"));
            }
            if !(0.0..=1.0).contains(&mode.good_weather_fraction) {
                return bad(format!("{name}.goodWeatherFraction must be in [0, 1]"));
            }
            if mode.simulation_factor <= 0.0 {
                return bad(format!("{name}.simulationFactor must be positive"));
            }
            if mode.force_plug_priority <= mode.no_plug_priority {
                return bad(format!(
                    "{name}.forcePlugPriority must exceed noPlugPriority"
                ));
            }
        }

        let t = &self.sn2_thresholds;
        if t.plate_red <= 0.0 || t.plate_blue <= 0.0 {
            return bad("SN2thresholds plate thresholds must be positive".to_string());
        }
        if !(t.set_factor > 0.0 && t.set_factor <= 1.0) {
            return bad("SN2thresholds.setFactor must be in (0, 1]".to_string());
        }
        if self.exposure.exposure_time <= 0.0 {
            return bad("exposure.exposureTime must be positive".to_string());
        }
        if self.set.dither_positions.is_empty() {
            return bad("set.ditherPositions is empty".to_string());
        }
        if let Some(d) = self
            .set
            .dither_positions
            .iter()
            .find(|d| !self.exposure.valid_dither_positions.contains(d))
        {
            return bad(format!("set.ditherPositions contains {d}, not a valid dither position"));
        }
        if !(self.set_arrangement.factor > 0.0 && self.set_arrangement.factor <= 1.0) {
            return bad("setArrangement.factor must be in (0, 1]".to_string());
        }

        // offline carts are a subset of the MaNGA pool; APOGEE carts are disjoint from it
        let manga: BTreeSet<_> = self.manga_carts.iter().collect();
        if let Some(c) = self.apogee_carts.iter().find(|c| manga.contains(c)) {
            return bad(format!("cart {c} is listed as both MaNGA and APOGEE"));
        }
        if manga.len() != self.manga_carts.len() {
            return bad("mangaCarts contains duplicates".to_string());
        }
        if let Some(c) = self.offline_carts.iter().find(|c| !manga.contains(c)) {
            return bad(format!("offline cart {c} is not a MaNGA cart"));
        }

        Ok(())
    }
}
