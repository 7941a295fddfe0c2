//! Exposure model: a single observation with its reduced quality metrics.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;

use crate::config::SchedulerConfig;
use crate::error::InvalidReason;

pub type ExposureId = u64;

/// Sub-pixel offset position of an exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Dither {
    N,
    S,
    E,
}

impl Dither {
    pub const ALL: [Dither; 3] = [Dither::N, Dither::S, Dither::E];
}

impl fmt::Display for Dither {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Dither::N => "N",
            Dither::S => "S",
            Dither::E => "E",
        };
        f.write_str(s)
    }
}

impl FromStr for Dither {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "N" => Ok(Dither::N),
            "S" => Ok(Dither::S),
            "E" => Ok(Dither::E),
            other => Err(format!("unknown dither position: {other}")),
        }
    }
}

/// Signal-to-noise squared, already averaged over the cameras of each arm.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Sn2 {
    pub blue: f64,
    pub red: f64,
}

impl Sn2 {
    pub const ZERO: Sn2 = Sn2 { blue: 0.0, red: 0.0 };

    pub fn new(blue: f64, red: f64) -> Self {
        Self { blue, red }
    }

    pub fn total(&self) -> f64 {
        self.blue + self.red
    }

    pub fn is_zero(&self) -> bool {
        self.blue <= 0.0 && self.red <= 0.0
    }
}

impl Add for Sn2 {
    type Output = Sn2;

    fn add(self, rhs: Sn2) -> Sn2 {
        Sn2::new(self.blue + rhs.blue, self.red + rhs.red)
    }
}

impl AddAssign for Sn2 {
    fn add_assign(&mut self, rhs: Sn2) {
        self.blue += rhs.blue;
        self.red += rhs.red;
    }
}

impl Sub for Sn2 {
    type Output = Sn2;

    fn sub(self, rhs: Sn2) -> Sn2 {
        Sn2::new(self.blue - rhs.blue, self.red - rhs.red)
    }
}

impl std::iter::Sum for Sn2 {
    fn sum<I: Iterator<Item = Sn2>>(iter: I) -> Sn2 {
        iter.fold(Sn2::ZERO, |acc, s| acc + s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExposureOrigin {
    Real,
    Simulated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exposure {
    pub id: ExposureId,
    pub dither: Dither,
    pub sn2: Sn2,
    /// Arcsec.
    pub seeing: f64,
    /// Seconds.
    pub exposure_time: f64,
    pub airmass: f64,
    /// Hour angle at mid-exposure, degrees.
    pub hour_angle: f64,
    pub start_jd: f64,
    pub transparency: f64,
    pub sun_altitude: Option<f64>,
    /// Quality flag set by the reduction.
    pub valid: bool,
    pub origin: ExposureOrigin,
}

impl Exposure {
    pub fn new(id: ExposureId, dither: Dither, sn2: Sn2) -> Self {
        Self {
            id,
            dither,
            sn2,
            seeing: 1.0,
            exposure_time: 900.0,
            airmass: 1.0,
            hour_angle: 0.0,
            start_jd: 0.0,
            transparency: 1.0,
            sun_altitude: None,
            valid: true,
            origin: ExposureOrigin::Real,
        }
    }

    pub fn with_seeing(mut self, seeing: f64) -> Self {
        self.seeing = seeing;
        self
    }

    pub fn with_exposure_time(mut self, seconds: f64) -> Self {
        self.exposure_time = seconds;
        self
    }

    pub fn with_pointing(mut self, hour_angle: f64, airmass: f64) -> Self {
        self.hour_angle = hour_angle;
        self.airmass = airmass;
        self
    }

    pub fn with_start_jd(mut self, jd: f64) -> Self {
        self.start_jd = jd;
        self
    }

    pub fn with_valid(mut self, valid: bool) -> Self {
        self.valid = valid;
        self
    }

    pub fn simulated(mut self) -> Self {
        self.origin = ExposureOrigin::Simulated;
        self
    }

    pub fn is_simulated(&self) -> bool {
        self.origin == ExposureOrigin::Simulated
    }

    pub fn end_jd(&self) -> f64 {
        self.start_jd + self.exposure_time / 86_400.0
    }

    /// Checks the exposure against the configured quality cuts.
    pub fn check(&self, cfg: &SchedulerConfig) -> Result<(), InvalidReason> {
        let ec = &cfg.exposure;
        let t = &cfg.sn2_thresholds;

        if !self.valid {
            return Err(InvalidReason::Flagged);
        }
        if self.seeing > ec.max_seeing {
            return Err(InvalidReason::Seeing);
        }
        if self.exposure_time < ec.min_exp_time {
            return Err(InvalidReason::ExposureTime);
        }
        if self.transparency < ec.transparency {
            return Err(InvalidReason::Transparency);
        }
        if self.sn2.red < t.exposure_red || self.sn2.blue < t.exposure_blue {
            return Err(InvalidReason::LowSn2);
        }
        if ec.check_twilight {
            if let Some(sun) = self.sun_altitude {
                if sun > ec.max_sun_altitude {
                    return Err(InvalidReason::Twilight);
                }
            }
        }
        if !ec.valid_dither_positions.contains(&self.dither) {
            return Err(InvalidReason::Flagged);
        }
        Ok(())
    }

    pub fn is_valid(&self, cfg: &SchedulerConfig) -> bool {
        self.check(cfg).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dither_parse_and_display() {
        assert_eq!("n".parse::<Dither>().unwrap(), Dither::N);
        assert_eq!(" E ".parse::<Dither>().unwrap(), Dither::E);
        assert!("W".parse::<Dither>().is_err());
        assert_eq!(Dither::S.to_string(), "S");
    }

    #[test]
    fn test_sn2_arithmetic() {
        let total: Sn2 = [Sn2::new(1.0, 2.0), Sn2::new(0.5, 1.5)].into_iter().sum();
        assert_eq!(total, Sn2::new(1.5, 3.5));
        assert_eq!(total.total(), 5.0);
        assert!(Sn2::ZERO.is_zero());
    }

    #[test]
    fn test_check_reasons() {
        let cfg = SchedulerConfig::default();
        let good = Exposure::new(1, Dither::N, Sn2::new(3.0, 5.0));
        assert!(good.is_valid(&cfg));

        let flagged = good.clone().with_valid(false);
        assert_eq!(flagged.check(&cfg), Err(InvalidReason::Flagged));

        let blurry = good.clone().with_seeing(3.0);
        assert_eq!(blurry.check(&cfg), Err(InvalidReason::Seeing));

        let short = good.clone().with_exposure_time(100.0);
        assert_eq!(short.check(&cfg), Err(InvalidReason::ExposureTime));

        let faint = Exposure::new(2, Dither::S, Sn2::new(0.1, 5.0));
        assert_eq!(faint.check(&cfg), Err(InvalidReason::LowSn2));

        let mut twilight = good.clone();
        twilight.sun_altitude = Some(-5.0);
        assert_eq!(twilight.check(&cfg), Err(InvalidReason::Twilight));
    }

    #[test]
    fn test_end_jd() {
        let e = Exposure::new(1, Dither::N, Sn2::ZERO).with_start_jd(2_460_000.5);
        assert!((e.end_jd() - (2_460_000.5 + 900.0 / 86_400.0)).abs() < 1e-9);
    }
}
