//! Spherical astronomy helpers.
//!
//! Equatorial/horizontal conversion uses Greenwich mean sidereal time and
//! ignores precession, nutation, aberration and refraction. The resulting
//! error is well under a degree, which is below the granularity of horizon
//! limits and sub-array beams.

use chrono::{DateTime, Utc};
use tracet_core::proposal::telescope::{AltAz, Telescope};

/// MWA site: lat -26:42:11.95, lon 116:40:14.93, height 377.8 m.
pub fn mwa_site() -> Telescope {
    Telescope {
        name: "MWA".into(),
        lon: 116.670_813_889,
        lat: -26.703_319_444,
        height: 377.8,
    }
}

pub fn julian_date(t: DateTime<Utc>) -> f64 {
    let secs = t.timestamp() as f64 + f64::from(t.timestamp_subsec_nanos()) * 1e-9;
    secs / 86_400.0 + 2_440_587.5
}

/// Greenwich mean sidereal time in degrees (IAU 1982).
pub fn gmst_deg(t: DateTime<Utc>) -> f64 {
    let d = julian_date(t) - 2_451_545.0;
    let c = d / 36_525.0;
    let gmst = 280.460_618_37 + 360.985_647_366_29 * d + 0.000_387_933 * c * c
        - c * c * c / 38_710_000.0;
    gmst.rem_euclid(360.0)
}

pub fn local_sidereal_deg(t: DateTime<Utc>, lon: f64) -> f64 {
    (gmst_deg(t) + lon).rem_euclid(360.0)
}

/// Horizontal coordinates of (ra, dec) seen from `site` at `t`.
/// Azimuth is measured from north through east.
pub fn radec_to_altaz(ra: f64, dec: f64, site: &Telescope, t: DateTime<Utc>) -> AltAz {
    let ha = (local_sidereal_deg(t, site.lon) - ra).to_radians();
    let dec = dec.to_radians();
    let lat = site.lat.to_radians();

    let sin_alt = dec.sin() * lat.sin() + dec.cos() * lat.cos() * ha.cos();
    let alt = sin_alt.clamp(-1.0, 1.0).asin();
    let az = (-ha.sin() * dec.cos()).atan2(lat.cos() * dec.sin() - lat.sin() * dec.cos() * ha.cos());

    AltAz {
        alt: alt.to_degrees(),
        az: az.to_degrees().rem_euclid(360.0),
    }
}

/// Equatorial coordinates (ra, dec) of an alt/az pointing from `site` at `t`.
pub fn altaz_to_radec(alt: f64, az: f64, site: &Telescope, t: DateTime<Utc>) -> (f64, f64) {
    let alt = alt.to_radians();
    let az = az.to_radians();
    let lat = site.lat.to_radians();

    let sin_dec = alt.sin() * lat.sin() + alt.cos() * lat.cos() * az.cos();
    let dec = sin_dec.clamp(-1.0, 1.0).asin();
    let ha = (-az.sin() * alt.cos()).atan2(lat.cos() * alt.sin() - lat.sin() * alt.cos() * az.cos());

    let ra = (local_sidereal_deg(t, site.lon) - ha.to_degrees()).rem_euclid(360.0);
    (ra, dec.to_degrees())
}

/// Great-circle separation in degrees (Vincenty formula).
pub fn angular_separation(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    let (ra1, dec1, ra2, dec2) = (
        ra1.to_radians(),
        dec1.to_radians(),
        ra2.to_radians(),
        dec2.to_radians(),
    );
    let dra = ra2 - ra1;
    let num1 = dec2.cos() * dra.sin();
    let num2 = dec1.cos() * dec2.sin() - dec1.sin() * dec2.cos() * dra.cos();
    let den = dec1.sin() * dec2.sin() + dec1.cos() * dec2.cos() * dra.cos();
    num1.hypot(num2).atan2(den).to_degrees()
}

/// True when the two positions are strictly closer than `deg`.
pub fn is_close_position(ra1: f64, dec1: f64, ra2: f64, dec2: f64, deg: f64) -> bool {
    angular_separation(ra1, dec1, ra2, dec2) < deg
}

/// Right ascension as `HH:MM:SS.SS`.
pub fn format_ra_hms(ra: f64) -> String {
    let hours = ra.rem_euclid(360.0) / 15.0;
    let (h, m, s) = split_sexagesimal(hours, 2);
    format!("{h:02}:{m:02}:{s:05.2}")
}

/// Declination as `+DD:MM:SS.S`.
pub fn format_dec_dms(dec: f64) -> String {
    let sign = if dec < 0.0 { '-' } else { '+' };
    let (d, m, s) = split_sexagesimal(dec.abs(), 1);
    format!("{sign}{d:02}:{m:02}:{s:04.1}")
}

/// Split a value into whole units, minutes and seconds, carrying rounding
/// of the seconds to `decimals` places into the higher fields.
fn split_sexagesimal(value: f64, decimals: i32) -> (u32, u32, f64) {
    let scale = 10f64.powi(decimals);
    let total = (value * 3600.0 * scale).round() / scale;
    let whole = (total / 3600.0).floor();
    let rem = total - whole * 3600.0;
    let minutes = (rem / 60.0).floor();
    let seconds = rem - minutes * 60.0;
    (whole as u32, minutes as u32, seconds)
}
