//! cartplan-core: cartridge and plate scheduling engine
//!
//! Pure decision logic over in-memory snapshots. Loading and exporting
//! records lives in `cartplan-ingest`.

pub mod arrangement;
pub mod cart;
pub mod completeness;
pub mod config;
pub mod error;
pub mod exposure;
pub mod planner;
pub mod plate;
pub mod plugger;
pub mod ranking;
pub mod set;
pub mod simulation;
pub mod sky;
pub mod time;
pub mod window;

pub use arrangement::{
    Arrangement, Proposal, RearrangeOutcome, RearrangeScope, SetRearranger, rearrange_plates,
};
pub use cart::{Cart, CartCategory, CartId, cart_order, carts_from_config};
pub use completeness::CompletenessModel;
pub use config::{RunMode, SchedulerConfig};
pub use error::{InvalidReason, Notice, SchedError, SchedResult};
pub use exposure::{Dither, Exposure, ExposureId, ExposureOrigin, Sn2};
pub use planner::{
    BlockPlan, CurvePoint, FixedHoursPlan, MonteCarloForecast, NightSummary, ObservingPlan,
    Planner, ScheduleForecast, number_plates_at_apo,
};
pub use plate::{Plate, PlateId, PlateStatus};
pub use plugger::{NightPlan, PlugDecision, PlugOutcome, PlugStage, Plugger};
pub use ranking::{
    PlateStanding, PriorityClass, compare_completion, compare_standings,
    sort_by_priority_then_completion,
};
pub use set::{ExposureSet, SetId, SetOverride, SetQuality};
pub use simulation::{DryRun, PlateSimulator, PowerLawSn2, Sn2Model};
pub use sky::{LstRange, Site, SiteEphemeris, VisibilityProvider};
pub use window::{JdRange, ObservingWindow, Survey, Weather};
