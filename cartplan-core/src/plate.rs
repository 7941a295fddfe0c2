//! Plate model.
//!
//! A plate owns its sets in creation order. It changes only by appending
//! exposures or by rearranging them between sets.

use serde::{Deserialize, Serialize};

use crate::cart::CartId;
use crate::exposure::{Exposure, ExposureId};
use crate::set::{ExposureSet, SetId};

pub type PlateId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlateStatus {
    NotStarted,
    Incomplete,
    Complete,
    /// Declared complete by observers without reaching the SN2 thresholds.
    SpecialComplete,
}

impl PlateStatus {
    pub fn is_done(self) -> bool {
        matches!(self, PlateStatus::Complete | PlateStatus::SpecialComplete)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plate {
    pub plate_id: PlateId,
    /// Degrees.
    pub ra: f64,
    pub dec: f64,
    pub priority: u8,
    pub sets: Vec<ExposureSet>,
    /// Cart the plate is currently plugged in.
    pub cart: Option<CartId>,
    /// Recorded as complete by the survey database.
    pub marked_complete: bool,
    pub special_complete: bool,
}

impl Plate {
    pub fn new(plate_id: PlateId, ra: f64, dec: f64) -> Self {
        Self {
            plate_id,
            ra,
            dec,
            priority: 5,
            sets: Vec::new(),
            cart: None,
            marked_complete: false,
            special_complete: false,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_sets(mut self, sets: Vec<ExposureSet>) -> Self {
        self.sets = sets;
        self
    }

    pub fn with_cart(mut self, cart: CartId) -> Self {
        self.cart = Some(cart);
        self
    }

    pub fn exposures(&self) -> impl Iterator<Item = &Exposure> {
        self.sets.iter().flat_map(|s| s.exposures.iter())
    }

    pub fn exposure_count(&self) -> usize {
        self.sets.iter().map(ExposureSet::len).sum()
    }

    pub fn set(&self, id: SetId) -> Option<&ExposureSet> {
        self.sets.iter().find(|s| s.id == id)
    }

    pub fn set_mut(&mut self, id: SetId) -> Option<&mut ExposureSet> {
        self.sets.iter_mut().find(|s| s.id == id)
    }

    pub fn next_set_id(&self) -> SetId {
        self.sets.iter().map(|s| s.id).max().map_or(1, |id| id + 1)
    }

    pub fn next_exposure_id(&self) -> ExposureId {
        self.exposures().map(|e| e.id).max().map_or(1, |id| id + 1)
    }

    pub fn has_simulated(&self) -> bool {
        self.exposures().any(Exposure::is_simulated)
    }

    /// Appends a new empty set and returns its id.
    pub fn open_set(&mut self) -> SetId {
        let id = self.next_set_id();
        self.sets.push(ExposureSet::new(id));
        id
    }

    /// Removes the given exposures, dropping sets left empty.
    pub fn remove_exposures(&mut self, ids: &[ExposureId]) -> Vec<Exposure> {
        let mut removed = Vec::new();
        for set in &mut self.sets {
            let (gone, kept): (Vec<_>, Vec<_>) = set
                .exposures
                .drain(..)
                .partition(|e| ids.contains(&e.id));
            set.exposures = kept;
            removed.extend(gone);
        }
        self.sets.retain(|s| !s.is_empty() || s.status_override.is_some());
        removed
    }
}
