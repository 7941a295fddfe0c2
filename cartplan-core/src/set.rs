//! Exposure sets: the unit of completeness.

use serde::{Deserialize, Serialize};

use crate::exposure::Exposure;

pub type SetId = u32;

/// Manual quality override recorded by observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetOverride {
    Good,
    Bad,
}

/// Graded state of a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetQuality {
    Excellent,
    Good,
    Poor,
    Incomplete,
    Bad,
    OverrideGood,
    OverrideBad,
}

impl SetQuality {
    pub fn is_complete(self) -> bool {
        matches!(
            self,
            SetQuality::Excellent | SetQuality::Good | SetQuality::Poor | SetQuality::OverrideGood
        )
    }

    pub fn is_overridden(self) -> bool {
        matches!(self, SetQuality::OverrideGood | SetQuality::OverrideBad)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureSet {
    pub id: SetId,
    pub exposures: Vec<Exposure>,
    pub status_override: Option<SetOverride>,
}

impl ExposureSet {
    pub fn new(id: SetId) -> Self {
        Self {
            id,
            exposures: Vec::new(),
            status_override: None,
        }
    }

    pub fn with_exposures(mut self, exposures: Vec<Exposure>) -> Self {
        self.exposures = exposures;
        self
    }

    pub fn with_override(mut self, status: SetOverride) -> Self {
        self.status_override = Some(status);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.exposures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.exposures.len()
    }
}
