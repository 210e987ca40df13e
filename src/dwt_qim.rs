/*! Quantization-index-modulation carrier on the Haar LL sub-band.

Each bit rides on the parity of a quantized LL coefficient: with step Δ,
the coefficient is snapped to the nearest even or odd multiple of Δ
depending on the bit. Extraction is just the parity of round(c/Δ).

The write positions are the first packet's worth of LL samples in
row-major order, which concentrates the payload in the top rows of the
image and buys some resistance to crops from the bottom or right.

Δ must match between embed and extract; both sides take it from the same
[`Config`](crate::watermark::Config).
*/
use log::debug;

use crate::carrier::Carrier;
use crate::raster::Plane;
use crate::{Error, Float, Result, dwt};

/// The QIM carrier. Holds nothing but the quantization step.
#[derive(Debug, Clone)]
pub struct DwtQim {
    delta: Float,
}

impl DwtQim {
    /// Create a carrier with quantization step `delta`.
    #[must_use]
    pub fn new(delta: Float) -> Self {
        debug_assert!(delta > 0.0);
        Self { delta }
    }
}

impl Carrier for DwtQim {
    fn name(&self) -> &'static str {
        "dwt-qim"
    }

    fn capacity_bits(&self, width: usize, height: usize) -> usize {
        width.div_ceil(2) * height.div_ceil(2)
    }

    fn embed(&self, y: &mut Plane, bits: &[u8]) -> Result<usize> {
        let mut sb = dwt::forward(y);
        let (llw, llh) = (sb.ll.width(), sb.ll.height());
        let ll = sb.ll.as_mut_slice();
        if bits.len() > ll.len() {
            return Err(Error::ImageTooSmall(format!(
                "LL sub-band holds {} coefficients, need {}",
                ll.len(),
                bits.len()
            )));
        }
        debug!(
            "QIM: writing {} bits into {llw}x{llh} LL, delta {}",
            bits.len(),
            self.delta
        );
        for (c, &bit) in ll.iter_mut().zip(bits) {
            let mut q = (*c / self.delta).round() as i64;
            if bit == 0 && q % 2 != 0 {
                q -= 1;
            } else if bit == 1 && q % 2 == 0 {
                q += 1;
            }
            *c = q as Float * self.delta;
        }
        *y = dwt::inverse(&sb);
        Ok(bits.len())
    }

    fn extract(&self, y: &Plane, nbits: usize) -> Result<Vec<u8>> {
        let sb = dwt::forward(y);
        let ll = sb.ll.as_slice();
        let n = nbits.min(ll.len());
        let bits = ll[..n]
            .iter()
            .map(|&c| {
                let q = (c / self.delta).round() as i64;
                (q.rem_euclid(2)) as u8
            })
            .collect();
        debug!("QIM: read {n} of {nbits} requested bits");
        Ok(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_plane(w: usize, h: usize) -> Plane {
        let data = (0..w * h)
            .map(|i| ((i * 131 + 29) % 256) as Float)
            .collect();
        Plane::from_vec(w, h, data)
    }

    #[test]
    fn parity_lands_where_the_bit_says() {
        let carrier = DwtQim::new(10.0);
        let mut y = test_plane(64, 64);
        let bits: Vec<u8> = (0..512).map(|i| ((i * 7 + 1) % 2) as u8).collect();
        carrier.embed(&mut y, &bits).unwrap();
        // Directly on the recomputed LL: round(c/delta) mod 2 == bit.
        let sb = dwt::forward(&y);
        for (i, &b) in bits.iter().enumerate() {
            let q = (sb.ll.as_slice()[i] / 10.0).round() as i64;
            assert_eq!(q.rem_euclid(2) as u8, b, "bit {i}");
        }
    }

    #[test]
    fn roundtrip_through_the_plane() {
        let carrier = DwtQim::new(10.0);
        let mut y = test_plane(128, 96);
        let bits: Vec<u8> = (0..2040).map(|i| ((i * i + i / 3) % 2) as u8).collect();
        carrier.embed(&mut y, &bits).unwrap();
        let got = carrier.extract(&y, 2040).unwrap();
        assert_eq!(got, bits);
    }

    #[test]
    fn image_too_small_is_rejected() {
        let carrier = DwtQim::new(10.0);
        // 32x32 -> 256 LL coefficients, far below a full packet.
        let mut y = test_plane(32, 32);
        let bits = vec![1u8; 2040];
        assert!(matches!(
            carrier.embed(&mut y, &bits),
            Err(Error::ImageTooSmall(_))
        ));
    }

    #[test]
    fn extract_reports_short_capacity() {
        let carrier = DwtQim::new(10.0);
        let y = test_plane(32, 32);
        let got = carrier.extract(&y, 2040).unwrap();
        assert_eq!(got.len(), 256);
    }

    #[test]
    fn capacity_matches_ll_dims() {
        let carrier = DwtQim::new(10.0);
        assert_eq!(carrier.capacity_bits(128, 128), 64 * 64);
        assert_eq!(carrier.capacity_bits(129, 127), 65 * 64);
    }
}
