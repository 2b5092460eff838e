use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tracing::info;

use tracet_core::errors::SkymapError;
use tracet_core::observation::SubArrays;
use tracet_core::proposal::telescope::MwaSettings;

use super::coords::{altaz_to_radec, is_close_position, mwa_site};
use super::healpix::MultiOrderMap;

/// Minimum separation between chosen sub-array pointings, and the default
/// repointing threshold, in degrees.
pub const POINTING_SEPARATION_DEG: f64 = 10.0;

const MAX_POINTINGS: usize = 4;

/// One fixed ground pointing of the MWA beamformer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Spot {
    pub n: u32,
    pub az: f64,
    pub el: f64,
}

/// Built-in ground pointing catalog for when no spots file is configured:
/// zenith plus eight rings stepping 7.5° in elevation down to 30°, with six
/// more azimuths per ring.
pub fn ground_spots() -> Vec<Spot> {
    let mut spots = vec![Spot {
        n: 1,
        az: 0.0,
        el: 90.0,
    }];
    for ring in 1..=8u32 {
        let el = 90.0 - 7.5 * f64::from(ring);
        let count = 6 * ring;
        let offset = if ring % 2 == 0 { 0.5 } else { 0.0 };
        for j in 0..count {
            let az = 360.0 * (f64::from(j) + offset) / f64::from(count);
            spots.push(Spot {
                n: spots.len() as u32 + 1,
                az,
                el,
            });
        }
    }
    spots
}

/// Parse a `n | az | el` table of ground spots. Blank lines, `---` rules
/// and the `N` header row are skipped.
pub fn parse_spots(text: &str) -> Result<Vec<Spot>, SkymapError> {
    let mut spots = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with("---") || line.starts_with('N') {
            continue;
        }
        let invalid = |reason: String| SkymapError::InvalidSpots { line: i + 1, reason };
        let fields: Vec<&str> = line.split('|').map(str::trim).collect();
        let &[n, az, el] = fields.as_slice() else {
            return Err(invalid(format!("expected 3 columns, found {}", fields.len())));
        };
        spots.push(Spot {
            n: n.parse().map_err(|e| invalid(format!("n {n:?}: {e}")))?,
            az: az.parse().map_err(|e| invalid(format!("az {az:?}: {e}")))?,
            el: el.parse().map_err(|e| invalid(format!("el {el:?}: {e}")))?,
        });
    }
    if spots.is_empty() {
        return Err(SkymapError::InvalidSpots {
            line: 0,
            reason: "no spots".into(),
        });
    }
    Ok(spots)
}

/// Spots from `path` when given, else the built-in [`ground_spots`] grid.
pub fn spots_catalog(path: Option<&Path>) -> Result<Vec<Spot>, SkymapError> {
    let Some(path) = path else {
        return Ok(ground_spots());
    };
    let text = std::fs::read_to_string(path).map_err(|e| SkymapError::Fetch {
        reference: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let spots = parse_spots(&text)?;
    info!(path = %path.display(), spots = spots.len(), "loaded MWA spots catalog");
    Ok(spots)
}

/// Time the ground catalog is projected onto the sky.
pub fn reference_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// A ground pointing with its sky position and skymap probability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Pointing {
    pub n: u32,
    pub az: f64,
    pub alt: f64,
    pub ra: f64,
    pub dec: f64,
    /// Probability per square degree.
    pub prob: f64,
}

/// Rank every ground spot by skymap probability and greedily keep up to
/// four that are mutually at least [`POINTING_SEPARATION_DEG`] apart.
///
/// Algorithm:
/// 1. Project each spot from alt/az to ra/dec at [`reference_time`]
/// 2. Look up the density there and convert sr⁻¹ to deg⁻²
/// 3. Sort by probability, highest first
/// 4. Walk the list, keeping a pointing unless one already kept is close
pub fn derive_pointings(
    map: &MultiOrderMap,
    spots: &[Spot],
) -> Result<Vec<Pointing>, SkymapError> {
    let site = mwa_site();
    let time = reference_time();
    let deg2 = (std::f64::consts::PI / 180.0).powi(2);

    let mut ranked = Vec::new();
    for spot in spots {
        let (ra, dec) = altaz_to_radec(spot.el, spot.az, &site, time);
        let density = map
            .density_at(ra, dec)
            .ok_or(SkymapError::NoPixel { ra, dec })?;
        ranked.push(Pointing {
            n: spot.n,
            az: spot.az,
            alt: spot.el,
            ra,
            dec,
            prob: density * deg2,
        });
    }
    ranked.sort_by(|a, b| b.prob.total_cmp(&a.prob));

    let mut chosen: Vec<Pointing> = Vec::new();
    for candidate in ranked {
        if chosen.len() >= MAX_POINTINGS {
            break;
        }
        let crowded = chosen.iter().any(|p| {
            is_close_position(candidate.ra, candidate.dec, p.ra, p.dec, POINTING_SEPARATION_DEG)
        });
        if !crowded {
            chosen.push(candidate);
        }
    }
    Ok(chosen)
}

/// Repoint unless every current pointing has a new candidate within
/// `threshold` degrees.
pub fn should_repoint(current: &SubArrays, candidates: &[Pointing], threshold: f64) -> bool {
    !current.pointings().all(|(ra, dec)| {
        candidates
            .iter()
            .any(|c| is_close_position(ra, dec, c.ra, c.dec, threshold))
    })
}

/// Sub-array layout from the four best pointings.
pub fn sub_arrays_from(pointings: &[Pointing]) -> Result<SubArrays, SkymapError> {
    if pointings.len() < MAX_POINTINGS {
        return Err(SkymapError::TooFewPointings(pointings.len()));
    }
    let best = &pointings[..MAX_POINTINGS];
    Ok(SubArrays {
        ra: best.iter().map(|p| p.ra).collect(),
        dec: best.iter().map(|p| p.dec).collect(),
    })
}

/// The proposal's default NE/NW/SE/SW alt/az converted to ra/dec at `now`.
pub fn default_sub_arrays(settings: &MwaSettings, now: DateTime<Utc>) -> SubArrays {
    let site = mwa_site();
    let (ra, dec) = settings
        .sub_arrays
        .ordered()
        .iter()
        .map(|p| altaz_to_radec(p.alt, p.az, &site, now))
        .unzip();
    SubArrays { ra, dec }
}

/// Round to the nearest multiple of 8; a remainder of exactly 4 rounds up.
pub fn round_to_nearest_modulo_8(value: f64) -> f64 {
    let remainder = value.rem_euclid(8.0);
    if remainder >= 4.0 {
        value + (8.0 - remainder)
    } else {
        value - remainder
    }
}
