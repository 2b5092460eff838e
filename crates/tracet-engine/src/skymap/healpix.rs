//! HEALPix nested-scheme indexing and multi-order (UNIQ) maps.

use std::f64::consts::FRAC_PI_2;

use tracet_core::errors::SkymapError;

/// Deepest order representable with 64-bit nested indices.
pub const MAX_ORDER: u32 = 29;

/// Nested pixel index containing (ra, dec) at the given order.
pub fn ang2pix_nest(order: u32, ra: f64, dec: f64) -> u64 {
    let nside: i64 = 1 << order;
    let z = dec.to_radians().sin();
    let za = z.abs();
    let tt = (ra.to_radians() / FRAC_PI_2).rem_euclid(4.0);
    let ns = nside as f64;

    let (face, ix, iy) = if za <= 2.0 / 3.0 {
        let temp1 = ns * (0.5 + tt);
        let temp2 = ns * (z * 0.75);
        let jp = (temp1 - temp2) as i64;
        let jm = (temp1 + temp2) as i64;
        let ifp = jp >> order;
        let ifm = jm >> order;
        let face = if ifp == ifm {
            ifp | 4
        } else if ifp < ifm {
            ifp
        } else {
            ifm + 8
        };
        let ix = jm & (nside - 1);
        let iy = nside - (jp & (nside - 1)) - 1;
        (face, ix, iy)
    } else {
        let ntt = (tt as i64).min(3);
        let tp = tt - ntt as f64;
        let tmp = ns * (3.0 * (1.0 - za)).sqrt();
        let jp = ((tp * tmp) as i64).min(nside - 1);
        let jm = (((1.0 - tp) * tmp) as i64).min(nside - 1);
        if z >= 0.0 {
            (ntt, nside - jm - 1, nside - jp - 1)
        } else {
            (ntt + 8, jp, jm)
        }
    };

    ((face as u64) << (2 * order)) + spread_bits(ix as u64) + (spread_bits(iy as u64) << 1)
}

/// Interleave the low 32 bits of `v` with zeros.
fn spread_bits(v: u64) -> u64 {
    let mut out = 0u64;
    for i in 0..32 {
        out |= ((v >> i) & 1) << (2 * i);
    }
    out
}

/// Split a UNIQ index into (order, nested ipix).
pub fn uniq_to_order_ipix(uniq: u64) -> Result<(u32, u64), SkymapError> {
    if uniq < 4 {
        return Err(SkymapError::InvalidFits(format!("invalid UNIQ value {uniq}")));
    }
    let order = (63 - uniq.leading_zeros()) / 2 - 1;
    if order > MAX_ORDER {
        return Err(SkymapError::InvalidFits(format!("UNIQ order {order} too deep")));
    }
    let ipix = uniq - (4u64 << (2 * order));
    Ok((order, ipix))
}

/// Probability density map with mixed-resolution pixels.
#[derive(Debug, Clone)]
pub struct MultiOrderMap {
    pixels: Vec<(u32, u64)>,
    density: Vec<f64>,
    max_order: u32,
}

impl MultiOrderMap {
    /// Build from parallel UNIQ / PROBDENSITY columns (density per steradian).
    pub fn from_columns(uniq: &[i64], density: &[f64]) -> Result<Self, SkymapError> {
        if uniq.len() != density.len() {
            return Err(SkymapError::InvalidFits(format!(
                "UNIQ has {} rows but PROBDENSITY has {}",
                uniq.len(),
                density.len()
            )));
        }
        let mut pixels = Vec::with_capacity(uniq.len());
        let mut max_order = 0;
        for &u in uniq {
            let u = u64::try_from(u)
                .map_err(|_| SkymapError::InvalidFits(format!("negative UNIQ value {u}")))?;
            let (order, ipix) = uniq_to_order_ipix(u)?;
            max_order = max_order.max(order);
            pixels.push((order, ipix));
        }
        Ok(Self {
            pixels,
            density: density.to_vec(),
            max_order,
        })
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Density per steradian of the pixel covering (ra, dec).
    pub fn density_at(&self, ra: f64, dec: f64) -> Option<f64> {
        let deepest = ang2pix_nest(self.max_order, ra, dec);
        self.pixels
            .iter()
            .position(|&(order, ipix)| deepest >> (2 * (self.max_order - order)) == ipix)
            .map(|i| self.density[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_faces_at_order_zero() {
        assert_eq!(ang2pix_nest(0, 0.0, 90.0), 0);
        assert_eq!(ang2pix_nest(0, 0.0, 0.0), 4);
        assert_eq!(ang2pix_nest(0, 90.0, 0.0), 5);
        assert_eq!(ang2pix_nest(0, 0.0, -90.0), 8);
    }

    #[test]
    fn nested_parent_is_shifted_child() {
        for (ra, dec) in [(12.3, 45.6), (200.0, -70.0), (359.9, 0.1), (90.0, 41.8)] {
            let parent = ang2pix_nest(3, ra, dec);
            let child = ang2pix_nest(6, ra, dec);
            assert_eq!(child >> 6, parent, "ra={ra} dec={dec}");
        }
    }

    #[test]
    fn pixel_index_in_range() {
        let order = 4;
        let npix = 12u64 << (2 * order);
        for ra in (0..360).step_by(7) {
            for dec in (-89..90).step_by(11) {
                assert!(ang2pix_nest(order, ra as f64, dec as f64) < npix);
            }
        }
    }

    #[test]
    fn uniq_decoding() {
        assert_eq!(uniq_to_order_ipix(4).unwrap(), (0, 0));
        assert_eq!(uniq_to_order_ipix(15).unwrap(), (0, 11));
        assert_eq!(uniq_to_order_ipix(16).unwrap(), (1, 0));
        assert_eq!(uniq_to_order_ipix(16 + 47).unwrap(), (1, 47));
        assert!(uniq_to_order_ipix(3).is_err());
    }

    #[test]
    fn mixed_order_lookup() {
        // Face 0 refined to order 1, all other base faces at order 0.
        let mut uniq = Vec::new();
        let mut density = Vec::new();
        for child in 0..4i64 {
            uniq.push(16 + child);
            density.push(10.0 + child as f64);
        }
        for face in 1..12i64 {
            uniq.push(4 + face);
            density.push(face as f64);
        }
        let map = MultiOrderMap::from_columns(&uniq, &density).unwrap();
        assert_eq!(map.len(), 15);

        let north = map.density_at(45.0, 80.0).unwrap();
        assert!(north >= 10.0, "north polar cap lies in refined face 0");
        assert_eq!(map.density_at(0.0, 0.0), Some(4.0));
        assert_eq!(map.density_at(0.0, -90.0), Some(8.0));
    }

    #[test]
    fn lookup_misses_uncovered_sky() {
        let map = MultiOrderMap::from_columns(&[4], &[1.0]).unwrap();
        assert!(map.density_at(0.0, -90.0).is_none());
    }
}
