/*! Coefficient-pair carrier in the 8x8 DCT domain.

One bit per tile: the ordering of two mid-frequency coefficients, (3,1)
and (1,3), carries the bit. Embedding enforces a gap between them —
bit 1 means c1 wins by at least the gap, bit 0 the reverse — splitting any
deficit equally so the tile's energy barely moves. The gap is modulated by
the perceptual mask, so textured tiles take a stronger push.

Unlike the QIM carrier this one degrades gracefully on small images: when
the tile count falls short of a full packet, the leading bits are embedded
and the payload layer reconstructs from the truncated stream.

The gap shift happens before 8-bit conversion, so a tile full of
saturated pixels can clip hard enough to undo its ordering; scattered
losses of that kind are the parity bytes' job.
*/
use itertools::iproduct;
use log::{debug, warn};
use rayon::prelude::*;

use crate::carrier::Carrier;
use crate::dct::{BLOCK, Block, Dct8};
use crate::raster::Plane;
use crate::{Float, Result, hvs};

/// Gap floor before perceptual modulation.
pub const BASE_STRENGTH: Float = 2.0;

const C1: (usize, usize) = (3, 1);
const C2: (usize, usize) = (1, 3);

/// The DCT-pair carrier with its embedding strength.
#[derive(Debug, Clone)]
pub struct DctPair {
    alpha: Float,
    dct: Dct8,
}

impl DctPair {
    /// Create a carrier with global strength `alpha`.
    #[must_use]
    pub fn new(alpha: Float) -> Self {
        Self {
            alpha,
            dct: Dct8::new(),
        }
    }

    fn load(plane_rows: &[Float], width: usize, bx: usize) -> Block {
        let mut block = [[0.0; BLOCK]; BLOCK];
        for (r, row) in block.iter_mut().enumerate() {
            let start = r * width + bx * BLOCK;
            row.copy_from_slice(&plane_rows[start..start + BLOCK]);
        }
        block
    }

    fn store(plane_rows: &mut [Float], width: usize, bx: usize, block: &Block) {
        for (r, row) in block.iter().enumerate() {
            let start = r * width + bx * BLOCK;
            plane_rows[start..start + BLOCK].copy_from_slice(row);
        }
    }
}

impl Carrier for DctPair {
    fn name(&self) -> &'static str {
        "dct-pair"
    }

    fn capacity_bits(&self, width: usize, height: usize) -> usize {
        (width / BLOCK) * (height / BLOCK)
    }

    fn embed(&self, y: &mut Plane, bits: &[u8]) -> Result<usize> {
        let (w, h) = (y.width(), y.height());
        let per_row = w / BLOCK;
        let capacity = self.capacity_bits(w, h);
        let writing = bits.len().min(capacity);
        if writing < bits.len() {
            warn!(
                "DCT-pair capacity is {capacity} bits, truncating the \
                 {}-bit packet",
                bits.len()
            );
        }
        let mask = hvs::perceptual_mask(y, self.alpha);
        debug!("DCT-pair: writing {writing} bits into {per_row}x{} tiles", h / BLOCK);

        y.as_mut_slice()
            .par_chunks_exact_mut(BLOCK * w)
            .enumerate()
            .for_each(|(brow, rows)| {
                for bx in 0..per_row {
                    let bit_idx = brow * per_row + bx;
                    if bit_idx >= writing {
                        return;
                    }
                    let mut coef = self.dct.forward(&Self::load(rows, w, bx));
                    let local = mask.at(bx * BLOCK + BLOCK / 2, brow * BLOCK + BLOCK / 2);
                    let gap = BASE_STRENGTH * self.alpha + local * 5.0 * self.alpha;
                    let c1 = coef[C1.0][C1.1];
                    let c2 = coef[C2.0][C2.1];
                    if bits[bit_idx] == 1 {
                        if c1 <= c2 + gap {
                            let diff = (c2 + gap - c1) / 2.0;
                            coef[C1.0][C1.1] += diff;
                            coef[C2.0][C2.1] -= diff;
                        }
                    } else if c2 <= c1 + gap {
                        let diff = (c1 + gap - c2) / 2.0;
                        coef[C2.0][C2.1] += diff;
                        coef[C1.0][C1.1] -= diff;
                    }
                    Self::store(rows, w, bx, &self.dct.inverse(&coef));
                }
            });
        Ok(writing)
    }

    fn extract(&self, y: &Plane, nbits: usize) -> Result<Vec<u8>> {
        let (w, h) = (y.width(), y.height());
        let per_row = w / BLOCK;
        let n = nbits.min(self.capacity_bits(w, h));
        let bits: Vec<u8> = iproduct!(0..h / BLOCK, 0..per_row)
            .take(n)
            .map(|(brow, bx)| {
                let rows = &y.as_slice()[brow * BLOCK * w..(brow + 1) * BLOCK * w];
                let coef = self.dct.forward(&Self::load(rows, w, bx));
                u8::from(coef[C1.0][C1.1] > coef[C2.0][C2.1])
            })
            .collect();
        debug!("DCT-pair: read {} of {nbits} requested bits", bits.len());
        Ok(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_plane(w: usize, h: usize) -> Plane {
        let data = (0..w * h)
            .map(|i| ((i * 211 + 31) % 256) as Float)
            .collect();
        Plane::from_vec(w, h, data)
    }

    #[test]
    fn capacity_counts_whole_tiles_only() {
        let carrier = DctPair::new(1.0);
        assert_eq!(carrier.capacity_bits(256, 256), 1024);
        assert_eq!(carrier.capacity_bits(263, 257), 32 * 32);
    }

    #[test]
    fn roundtrip_in_the_float_domain() {
        let carrier = DctPair::new(1.0);
        let mut y = test_plane(256, 80);
        let bits: Vec<u8> = (0..320).map(|i| ((i / 5 + i) % 2) as u8).collect();
        let written = carrier.embed(&mut y, &bits).unwrap();
        assert_eq!(written, 320);
        let got = carrier.extract(&y, 320).unwrap();
        assert_eq!(got, bits);
    }

    #[test]
    fn survives_u8_quantization() {
        let carrier = DctPair::new(1.0);
        // Mid-range samples: saturated pixels clip after the gap shift
        // and can undo the ordering.
        let mut y = Plane::from_vec(
            256,
            256,
            (0..256 * 256)
                .map(|i| 64.0 + ((i * 211 + 31) % 128) as Float)
                .collect(),
        );
        let bits: Vec<u8> = (0..1024).map(|i| ((i * 31 + 7) % 2) as u8).collect();
        carrier.embed(&mut y, &bits).unwrap();
        // Round to 8 bits the way the image reassembly will.
        let quantized = Plane::from_vec(
            256,
            256,
            y.as_slice()
                .iter()
                .map(|&v| v.round().clamp(0.0, 255.0))
                .collect(),
        );
        let got = carrier.extract(&quantized, 1024).unwrap();
        let flips = got.iter().zip(&bits).filter(|(a, b)| a != b).count();
        assert_eq!(flips, 0, "{flips} bit flips after quantization");
    }

    #[test]
    fn oversized_packet_is_truncated_to_capacity() {
        let carrier = DctPair::new(1.0);
        let mut y = test_plane(64, 64); // 64 tiles
        let bits = vec![1u8; 2040];
        let written = carrier.embed(&mut y, &bits).unwrap();
        assert_eq!(written, 64);
        let got = carrier.extract(&y, 2040).unwrap();
        assert_eq!(got.len(), 64);
        assert!(got.iter().all(|&b| b == 1));
    }
}
