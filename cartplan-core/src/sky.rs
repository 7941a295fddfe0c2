//! Sky geometry: sidereal time, hour angles, airmass and plate visibility.

use serde::{Deserialize, Serialize};

use crate::config::{ObservatorySection, SchedulerConfig};
use crate::plate::Plate;
use crate::window::JdRange;

/// Sidereal hours per solar hour.
const SIDEREAL_RATE: f64 = 1.002_737_909_35;

/// HA beyond which airmass is pinned to `HIGH_AIRMASS`, degrees.
const AIRMASS_HA_CUTOFF: f64 = 75.0;
const HIGH_AIRMASS: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub longitude: f64,
    pub latitude: f64,
    pub altitude: f64,
}

impl From<&ObservatorySection> for Site {
    fn from(o: &ObservatorySection) -> Self {
        Self {
            longitude: o.longitude,
            latitude: o.latitude,
            altitude: o.altitude,
        }
    }
}

pub fn normalize_hours(h: f64) -> f64 {
    h.rem_euclid(24.0)
}

/// Greenwich mean sidereal time in hours.
pub fn gmst_hours(jd: f64) -> f64 {
    let d = jd - 2_451_545.0;
    normalize_hours(18.697_374_558 + 24.065_709_824_419_08 * d)
}

/// Local mean sidereal time in hours; `longitude` in degrees east.
pub fn lst_hours(jd: f64, longitude: f64) -> f64 {
    normalize_hours(gmst_hours(jd) + longitude / 15.0)
}

/// Hour angle in degrees, in (-180, 180].
pub fn hour_angle_deg(lst: f64, ra: f64) -> f64 {
    let ha = (lst * 15.0 - ra).rem_euclid(360.0);
    if ha > 180.0 { ha - 360.0 } else { ha }
}

pub fn altitude_deg(dec: f64, ha: f64, latitude: f64) -> f64 {
    let (lat, dec, ha) = (latitude.to_radians(), dec.to_radians(), ha.to_radians());
    let sin_alt = lat.sin() * dec.sin() + lat.cos() * dec.cos() * ha.cos();
    sin_alt.clamp(-1.0, 1.0).asin().to_degrees()
}

/// Plane-parallel airmass, pinned to 10 for |HA| > 75 deg or targets below the horizon.
pub fn airmass(dec: f64, ha: f64, latitude: f64) -> f64 {
    if ha.abs() > AIRMASS_HA_CUTOFF {
        return HIGH_AIRMASS;
    }
    let (lat, dec_r, ha_r) = (latitude.to_radians(), dec.to_radians(), ha.to_radians());
    let cos_z = lat.sin() * dec_r.sin() + lat.cos() * dec_r.cos() * ha_r.cos();
    if cos_z <= 1.0 / HIGH_AIRMASS {
        HIGH_AIRMASS
    } else {
        1.0 / cos_z
    }
}

/// Maximum HA (hours) a plate at `dec` can be observed at with acceptable
/// differential refraction. Zero outside -10..80 deg.
pub fn ha_limit_hours(dec: f64) -> f64 {
    if !(-10.0..=80.0).contains(&dec) {
        return 0.0;
    }
    const COEFFS: [f64; 6] = [
        1.593_49,
        0.109_658,
        -0.006_078_71,
        0.000_185_393,
        -2.546_46e-6,
        1.166_86e-8,
    ];
    // Horner, highest power first
    COEFFS.iter().rev().fold(0.0, |acc, c| acc * dec + c).abs()
}

/// LST interval in hours, possibly wrapping through 0h.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LstRange {
    pub start: f64,
    pub length: f64,
}

impl LstRange {
    pub fn new(start: f64, length: f64) -> Self {
        Self {
            start: normalize_hours(start),
            length: length.clamp(0.0, 24.0),
        }
    }

    pub fn centered(center: f64, half_width: f64) -> Self {
        Self::new(center - half_width, 2.0 * half_width)
    }

    pub fn end(&self) -> f64 {
        normalize_hours(self.start + self.length)
    }

    pub fn contains(&self, lst: f64) -> bool {
        self.length >= 24.0 || (lst - self.start).rem_euclid(24.0) <= self.length
    }

    fn segments(&self) -> Vec<(f64, f64)> {
        if self.length >= 24.0 {
            return vec![(0.0, 24.0)];
        }
        let end = self.start + self.length;
        if end <= 24.0 {
            vec![(self.start, end)]
        } else {
            vec![(self.start, 24.0), (0.0, end - 24.0)]
        }
    }

    pub fn overlap_hours(&self, other: &LstRange) -> f64 {
        let mut total = 0.0;
        for (s1, e1) in self.segments() {
            for (s2, e2) in other.segments() {
                total += (e1.min(e2) - s1.max(s2)).max(0.0);
            }
        }
        total
    }
}

/// Supplies plate visibility for a site.
pub trait VisibilityProvider: Send + Sync {
    fn site(&self) -> Site;

    /// LST window in which the plate may be observed.
    fn lst_window(&self, plate: &Plate) -> LstRange;

    fn lst(&self, jd: f64) -> f64 {
        lst_hours(jd, self.site().longitude)
    }

    fn lst_range(&self, range: &JdRange) -> LstRange {
        LstRange::new(self.lst(range.start), range.hours() * SIDEREAL_RATE)
    }

    fn hour_angle(&self, plate: &Plate, jd: f64) -> f64 {
        hour_angle_deg(self.lst(jd), plate.ra)
    }

    fn altitude(&self, plate: &Plate, jd: f64) -> f64 {
        altitude_deg(plate.dec, self.hour_angle(plate, jd), self.site().latitude)
    }

    fn airmass(&self, plate: &Plate, jd: f64) -> f64 {
        airmass(plate.dec, self.hour_angle(plate, jd), self.site().latitude)
    }

    /// Hours of `range` during which the plate is inside its LST window.
    fn visible_hours(&self, plate: &Plate, range: &JdRange) -> f64 {
        self.lst_window(plate).overlap_hours(&self.lst_range(range)) / SIDEREAL_RATE
    }
}

/// Default provider: HA limit from declination, capped by the configured half window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SiteEphemeris {
    pub site: Site,
    pub max_half_window_hours: f64,
}

impl SiteEphemeris {
    pub fn from_config(cfg: &SchedulerConfig) -> Self {
        Self {
            site: Site::from(&cfg.observatory),
            max_half_window_hours: cfg.plate_visibility_max_half_window_hours,
        }
    }
}

impl VisibilityProvider for SiteEphemeris {
    fn site(&self) -> Site {
        self.site
    }

    fn lst_window(&self, plate: &Plate) -> LstRange {
        let half = ha_limit_hours(plate.dec).min(self.max_half_window_hours);
        LstRange::centered(plate.ra / 15.0, half)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_gmst_at_j2000() {
        assert_abs_diff_eq!(gmst_hours(2_451_545.0), 18.697_374_558, epsilon = 1e-9);
    }

    #[test]
    fn test_hour_angle_wraps() {
        assert_abs_diff_eq!(hour_angle_deg(1.0, 345.0), 30.0, epsilon = 1e-9);
        assert_abs_diff_eq!(hour_angle_deg(23.0, 15.0), -30.0, epsilon = 1e-9);
    }

    #[test]
    fn test_airmass_at_transit_and_cutoff() {
        let lat = 32.78;
        assert_abs_diff_eq!(airmass(lat, 0.0, lat), 1.0, epsilon = 1e-9);
        assert_eq!(airmass(lat, 80.0, lat), 10.0);
        assert!(airmass(0.0, 30.0, lat) > airmass(0.0, 0.0, lat));
        assert_abs_diff_eq!(altitude_deg(lat, 0.0, lat), 90.0, epsilon = 1e-5);
    }

    #[test]
    fn test_ha_limit() {
        assert_eq!(ha_limit_hours(-20.0), 0.0);
        assert_eq!(ha_limit_hours(85.0), 0.0);
        assert_abs_diff_eq!(ha_limit_hours(0.0), 1.593_49, epsilon = 1e-9);
        assert!(ha_limit_hours(40.0) > ha_limit_hours(0.0));
        assert!(ha_limit_hours(40.0) < 3.0);
    }

    #[test]
    fn test_lst_range_wrapping_overlap() {
        let a = LstRange::new(23.0, 2.0); // 23h..1h
        assert!(a.contains(0.5));
        assert!(!a.contains(2.0));
        assert_abs_diff_eq!(a.end(), 1.0, epsilon = 1e-9);

        let b = LstRange::new(0.0, 3.0);
        assert_abs_diff_eq!(a.overlap_hours(&b), 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(b.overlap_hours(&a), 1.0, epsilon = 1e-9);
        assert_eq!(LstRange::new(5.0, 0.0).overlap_hours(&b), 0.0);
    }

    #[test]
    fn test_plate_window_capped() {
        let cfg = SchedulerConfig {
            plate_visibility_max_half_window_hours: 2.0,
            ..SchedulerConfig::default()
        };
        let eph = SiteEphemeris::from_config(&cfg);
        let plate = Plate::new(1, 180.0, 40.0);
        let w = eph.lst_window(&plate);
        assert_abs_diff_eq!(w.length, 4.0, epsilon = 1e-9);
        assert!(w.contains(12.0));
        assert!(!w.contains(16.0));
    }
}
