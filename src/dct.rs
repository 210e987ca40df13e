/*! Orthonormal 8x8 DCT-II.

The block carrier works on 8x8 tiles, so the transform is a fixed-size
matrix product: C = M·X·Mᵀ for the forward direction and X = Mᵀ·C·M for
the inverse, with M the orthonormal DCT-II basis. The basis is precomputed
once at construction and shared by every tile.

<https://en.wikipedia.org/wiki/Discrete_cosine_transform#DCT-II>
*/
use crate::Float;

/// Tile edge length.
pub const BLOCK: usize = 8;

/// An 8x8 tile of samples or coefficients.
pub type Block = [[Float; BLOCK]; BLOCK];

/// Precomputed orthonormal DCT-II basis for 8x8 tiles.
#[derive(Debug, Clone)]
pub struct Dct8 {
    basis: Block,
}

impl Dct8 {
    /// Build the basis: M\[k\]\[n\] = c_k · cos(π(2n+1)k / 16).
    #[must_use]
    pub fn new() -> Self {
        let mut basis = [[0.0; BLOCK]; BLOCK];
        let n = BLOCK as Float;
        for (k, row) in basis.iter_mut().enumerate() {
            let ck = if k == 0 {
                (1.0 / n).sqrt()
            } else {
                (2.0 / n).sqrt()
            };
            for (i, v) in row.iter_mut().enumerate() {
                *v = ck
                    * (std::f64::consts::PI * (2.0 * i as Float + 1.0) * k as Float / (2.0 * n))
                        .cos();
            }
        }
        Self { basis }
    }

    /// Forward 2-D DCT-II of one tile.
    #[must_use]
    pub fn forward(&self, x: &Block) -> Block {
        let m = &self.basis;
        let mut tmp = [[0.0; BLOCK]; BLOCK];
        for k in 0..BLOCK {
            for j in 0..BLOCK {
                let mut acc = 0.0;
                for n in 0..BLOCK {
                    acc += m[k][n] * x[n][j];
                }
                tmp[k][j] = acc;
            }
        }
        let mut out = [[0.0; BLOCK]; BLOCK];
        for k in 0..BLOCK {
            for l in 0..BLOCK {
                let mut acc = 0.0;
                for j in 0..BLOCK {
                    acc += tmp[k][j] * m[l][j];
                }
                out[k][l] = acc;
            }
        }
        out
    }

    /// Inverse 2-D DCT (DCT-III with orthonormal scaling).
    #[must_use]
    pub fn inverse(&self, c: &Block) -> Block {
        let m = &self.basis;
        let mut tmp = [[0.0; BLOCK]; BLOCK];
        for n in 0..BLOCK {
            for j in 0..BLOCK {
                let mut acc = 0.0;
                for k in 0..BLOCK {
                    acc += m[k][n] * c[k][j];
                }
                tmp[n][j] = acc;
            }
        }
        let mut out = [[0.0; BLOCK]; BLOCK];
        for n in 0..BLOCK {
            for p in 0..BLOCK {
                let mut acc = 0.0;
                for j in 0..BLOCK {
                    acc += tmp[n][j] * m[j][p];
                }
                out[n][p] = acc;
            }
        }
        out
    }
}

impl Default for Dct8 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basis_is_orthonormal() {
        let d = Dct8::new();
        for a in 0..BLOCK {
            for b in 0..BLOCK {
                let dot: Float = (0..BLOCK).map(|i| d.basis[a][i] * d.basis[b][i]).sum();
                let want = if a == b { 1.0 } else { 0.0 };
                assert!((dot - want).abs() < 1e-12, "rows {a},{b}: {dot}");
            }
        }
    }

    #[test]
    fn dc_of_constant_tile() {
        let d = Dct8::new();
        let x = [[3.0; BLOCK]; BLOCK];
        let c = d.forward(&x);
        // Orthonormal DC gain for a constant tile is N.
        assert!((c[0][0] - 24.0).abs() < 1e-12);
        for (k, row) in c.iter().enumerate() {
            for (l, &v) in row.iter().enumerate() {
                if (k, l) != (0, 0) {
                    assert!(v.abs() < 1e-12);
                }
            }
        }
    }

    #[test]
    fn roundtrip_is_exact() {
        let d = Dct8::new();
        let mut x = [[0.0; BLOCK]; BLOCK];
        for (i, row) in x.iter_mut().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = ((i * 31 + j * 17 + 3) % 256) as Float;
            }
        }
        let back = d.inverse(&d.forward(&x));
        for i in 0..BLOCK {
            for j in 0..BLOCK {
                assert!((x[i][j] - back[i][j]).abs() < 1e-9);
            }
        }
    }
}
