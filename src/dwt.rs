/*! Single-level 2-D Haar wavelet transform.

The forward pass splits a plane into the four usual sub-bands. Orthonormal
Haar filters ((a+b)/√2, (a−b)/√2) keep reconstruction exact up to float
rounding, which the QIM carrier depends on.

Odd input dimensions are handled by edge replication on the forward pass;
the inverse therefore produces an even-sized plane and crops back to the
dimensions recorded at decomposition time, so callers always get the shape
they put in.
*/
use std::f64::consts::FRAC_1_SQRT_2;

use crate::Float;
use crate::raster::Plane;

/// The four sub-bands of one decomposition level, plus the original shape
/// for exact reconstruction.
#[derive(Debug, Clone)]
pub struct Subbands {
    /// Low-pass both directions; the carrier's write target.
    pub ll: Plane,
    /// Low-pass horizontal, high-pass vertical.
    pub lh: Plane,
    /// High-pass horizontal, low-pass vertical.
    pub hl: Plane,
    /// High-pass both directions.
    pub hh: Plane,
    width: usize,
    height: usize,
}

impl Subbands {
    /// Dimensions of the plane this decomposition came from.
    #[must_use]
    pub fn original_dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }
}

/// One level of 2-D Haar decomposition.
#[must_use]
pub fn forward(p: &Plane) -> Subbands {
    let (w, h) = (p.width(), p.height());
    let hw = w.div_ceil(2);
    let hh = h.div_ceil(2);

    // Row pass.
    let mut lo = Plane::new(hw, h);
    let mut hi = Plane::new(hw, h);
    for y in 0..h {
        for i in 0..hw {
            let a = p.at(2 * i, y);
            let b = if 2 * i + 1 < w { p.at(2 * i + 1, y) } else { a };
            *lo.at_mut(i, y) = (a + b) * FRAC_1_SQRT_2;
            *hi.at_mut(i, y) = (a - b) * FRAC_1_SQRT_2;
        }
    }

    // Column pass.
    let mut ll = Plane::new(hw, hh);
    let mut lh = Plane::new(hw, hh);
    let mut hl = Plane::new(hw, hh);
    let mut hh_band = Plane::new(hw, hh);
    for i in 0..hh {
        for x in 0..hw {
            let (la, lb) = col_pair(&lo, x, i, h);
            *ll.at_mut(x, i) = (la + lb) * FRAC_1_SQRT_2;
            *lh.at_mut(x, i) = (la - lb) * FRAC_1_SQRT_2;
            let (ha, hb) = col_pair(&hi, x, i, h);
            *hl.at_mut(x, i) = (ha + hb) * FRAC_1_SQRT_2;
            *hh_band.at_mut(x, i) = (ha - hb) * FRAC_1_SQRT_2;
        }
    }

    Subbands {
        ll,
        lh,
        hl,
        hh: hh_band,
        width: w,
        height: h,
    }
}

fn col_pair(p: &Plane, x: usize, i: usize, h: usize) -> (Float, Float) {
    let a = p.at(x, 2 * i);
    let b = if 2 * i + 1 < h { p.at(x, 2 * i + 1) } else { a };
    (a, b)
}

/// Reconstruct the plane from its sub-bands, cropped to the original
/// dimensions.
#[must_use]
pub fn inverse(sb: &Subbands) -> Plane {
    let hw = sb.ll.width();
    let hh = sb.ll.height();
    let (w, h) = sb.original_dims();

    // Column inverse.
    let mut lo = Plane::new(hw, 2 * hh);
    let mut hi = Plane::new(hw, 2 * hh);
    for i in 0..hh {
        for x in 0..hw {
            let l = sb.ll.at(x, i);
            let d = sb.lh.at(x, i);
            *lo.at_mut(x, 2 * i) = (l + d) * FRAC_1_SQRT_2;
            *lo.at_mut(x, 2 * i + 1) = (l - d) * FRAC_1_SQRT_2;
            let l = sb.hl.at(x, i);
            let d = sb.hh.at(x, i);
            *hi.at_mut(x, 2 * i) = (l + d) * FRAC_1_SQRT_2;
            *hi.at_mut(x, 2 * i + 1) = (l - d) * FRAC_1_SQRT_2;
        }
    }

    // Row inverse, cropping as we go.
    let mut out = Plane::new(w, h);
    for y in 0..h {
        for i in 0..hw {
            let l = lo.at(i, y);
            let d = hi.at(i, y);
            let a = (l + d) * FRAC_1_SQRT_2;
            let b = (l - d) * FRAC_1_SQRT_2;
            *out.at_mut(2 * i, y) = a;
            if 2 * i + 1 < w {
                *out.at_mut(2 * i + 1, y) = b;
            }
        }
    }
    out
}
