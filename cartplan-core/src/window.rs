//! Observing windows and JD ranges.

use serde::{Deserialize, Serialize};

use crate::config::PluggerSection;
use crate::error::{SchedError, SchedResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Survey {
    Manga,
    Apogee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Weather {
    Good,
    Bad,
}

/// Half-open interval of Julian dates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JdRange {
    pub start: f64,
    pub end: f64,
}

impl JdRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn hours(&self) -> f64 {
        ((self.end - self.start) * 24.0).max(0.0)
    }

    pub fn contains(&self, jd: f64) -> bool {
        jd >= self.start && jd < self.end
    }

    pub fn intersect(&self, other: &JdRange) -> Option<JdRange> {
        let r = JdRange::new(self.start.max(other.start), self.end.min(other.end));
        (!r.is_empty()).then_some(r)
    }

    /// Parts of `self` not covered by `other`.
    pub fn subtract(&self, other: &JdRange) -> Vec<JdRange> {
        if self.intersect(other).is_none() {
            return vec![*self];
        }
        [
            JdRange::new(self.start, other.start.min(self.end)),
            JdRange::new(other.end.max(self.start), self.end),
        ]
        .into_iter()
        .filter(|r| !r.is_empty())
        .collect()
    }
}

/// A night or part-night block available for observing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservingWindow {
    pub range: JdRange,
    /// The whole night this window belongs to.
    pub night: JdRange,
    pub survey: Survey,
    pub weather: Weather,
    /// Seeing (arcsec) to assume for dry runs; the mode default otherwise.
    pub seeing: Option<f64>,
}

impl ObservingWindow {
    pub fn new(start_jd: f64, end_jd: f64) -> Self {
        let range = JdRange::new(start_jd, end_jd);
        Self {
            range,
            night: range,
            survey: Survey::Manga,
            weather: Weather::Good,
            seeing: None,
        }
    }

    pub fn with_night(mut self, night: JdRange) -> Self {
        self.night = night;
        self
    }

    pub fn with_survey(mut self, survey: Survey) -> Self {
        self.survey = survey;
        self
    }

    pub fn with_weather(mut self, weather: Weather) -> Self {
        self.weather = weather;
        self
    }

    pub fn with_seeing(mut self, seeing: f64) -> Self {
        self.seeing = Some(seeing);
        self
    }

    /// Same night, narrower range.
    pub fn sub_window(&self, range: JdRange) -> Self {
        Self {
            range,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> SchedResult<()> {
        if self.range.is_empty() || !self.range.start.is_finite() || !self.range.end.is_finite() {
            return Err(SchedError::InvalidWindow {
                start_jd: self.range.start,
                end_jd: self.range.end,
            });
        }
        Ok(())
    }

    pub fn in_second_half(&self) -> bool {
        self.range.start > (self.night.start + self.night.end) / 2.0
    }

    /// Range left after the cart-change buffer applied to second-half windows.
    pub fn effective_range(&self, plugger: &PluggerSection) -> JdRange {
        if plugger.use_initial_buffer && self.in_second_half() {
            let start = self.range.start + plugger.initial_buffer_min / 1440.0;
            JdRange::new(start.min(self.range.end), self.range.end)
        } else {
            self.range
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtract() {
        let night = JdRange::new(0.0, 1.0);
        let parts = night.subtract(&JdRange::new(0.25, 0.5));
        assert_eq!(parts, vec![JdRange::new(0.0, 0.25), JdRange::new(0.5, 1.0)]);

        assert!(night.subtract(&JdRange::new(0.0, 1.0)).is_empty());
        assert_eq!(night.subtract(&JdRange::new(2.0, 3.0)), vec![night]);
        assert_eq!(
            night.subtract(&JdRange::new(-1.0, 0.5)),
            vec![JdRange::new(0.5, 1.0)]
        );
    }

    #[test]
    fn test_initial_buffer_only_in_second_half() {
        let plugger = PluggerSection::default();
        let night = JdRange::new(100.0, 100.4);

        let early = ObservingWindow::new(100.0, 100.1).with_night(night);
        assert_eq!(early.effective_range(&plugger), early.range);

        let late = ObservingWindow::new(100.3, 100.4).with_night(night);
        let eff = late.effective_range(&plugger);
        assert!((eff.start - (100.3 + 20.0 / 1440.0)).abs() < 1e-9);

        let no_buffer = PluggerSection {
            use_initial_buffer: false,
            ..PluggerSection::default()
        };
        assert_eq!(late.effective_range(&no_buffer), late.range);
    }

    #[test]
    fn test_validate_rejects_inverted_window() {
        assert!(ObservingWindow::new(2.0, 1.0).validate().is_err());
        assert!(ObservingWindow::new(1.0, 2.0).validate().is_ok());
    }
}
