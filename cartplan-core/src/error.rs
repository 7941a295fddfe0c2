//! Error and notice types for the scheduling engine.
//!
//! `SchedError` is fatal to the operation that raised it and is propagated to
//! the caller. `Notice` covers the expected, locally handled outcomes that are
//! logged and attached to results for auditing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cart::CartId;
use crate::exposure::ExposureId;
use crate::plate::PlateId;

#[derive(Debug, Error)]
pub enum SchedError {
    /// A plate's recorded state contradicts its measured SN2.
    #[error("inconsistent state for plate {plate_id}: {reason}")]
    InconsistentPlateState { plate_id: PlateId, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid observing window: start {start_jd} is not before end {end_jd}")]
    InvalidWindow { start_jd: f64, end_jd: f64 },

    #[error("plate not found: {0}")]
    UnknownPlate(PlateId),
}

pub type SchedResult<T> = Result<T, SchedError>;

/// Why an exposure is excluded from SN2 sums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidReason {
    Flagged,
    Seeing,
    ExposureTime,
    Transparency,
    LowSn2,
    Twilight,
}

/// Non-fatal conditions reported alongside decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notice {
    InvalidExposure {
        plate_id: PlateId,
        exposure_id: ExposureId,
        reason: InvalidReason,
    },
    NoEligiblePlate,
    NoEligibleCart {
        plate_id: PlateId,
    },
    RearrangementBudgetExceeded {
        plate_id: PlateId,
        permutations: u128,
        limit: u64,
    },
    OrphanedExposures {
        plate_id: PlateId,
        exposures: Vec<ExposureId>,
    },
    CartShortfall {
        plugged: usize,
        carts: usize,
    },
    /// A started plate lost its cart to a higher-ranked plate.
    PlateDisplaced {
        cart_id: CartId,
        plate_id: PlateId,
        displaced: PlateId,
    },
    ForcedPlatesExceedCarts {
        forced: usize,
        carts: usize,
    },
}

impl Notice {
    pub fn summary(&self) -> String {
        match self {
            Notice::InvalidExposure {
                plate_id,
                exposure_id,
                reason,
            } => format!("plate {plate_id}: exposure {exposure_id} invalid ({reason:?})"),
            Notice::NoEligiblePlate => "no eligible plate".to_string(),
            Notice::NoEligibleCart { plate_id } => {
                format!("plate {plate_id}: no free cart")
            }
            Notice::RearrangementBudgetExceeded {
                plate_id,
                permutations,
                limit,
            } => format!(
                "plate {plate_id}: {permutations} permutations over limit {limit}, used greedy assignment"
            ),
            Notice::OrphanedExposures { plate_id, exposures } => {
                format!("plate {plate_id}: dropped {} orphaned exposure(s)", exposures.len())
            }
            Notice::CartShortfall { plugged, carts } => {
                format!("{plugged} plates scheduled for {carts} carts")
            }
            Notice::PlateDisplaced {
                cart_id,
                plate_id,
                displaced,
            } => format!("cart {cart_id}: plate {plate_id} replaces started plate {displaced}"),
            Notice::ForcedPlatesExceedCarts { forced, carts } => {
                format!("{forced} force-priority plates but only {carts} carts")
            }
        }
    }
}
