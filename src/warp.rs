/*! Geometric transforms.

Small fixed-size linear algebra for the two warps the codec needs: the
affine rotation/scale correction driven by the sync template, and the
projective warp driven by the feature aligner.

Both warps map destination pixels back through the inverse transform and
sample the source bilinearly, with zero fill outside the source — the
semantics hosts built on OpenCV's `warpAffine`/`warpPerspective` expect.

Coordinates put y down. [`Affine::rotation_about`] follows the
`getRotationMatrix2D` convention: a positive angle rotates content
counter-clockwise on screen.
*/
use crate::Float;
use crate::raster::{ImageBgr, Plane, clip_u8};

/// A 2x3 affine transform, mapping source points to destination points.
#[derive(Debug, Clone, Copy)]
pub struct Affine {
    /// Row-major coefficients: x' = m[0]·(x, y, 1), y' = m[1]·(x, y, 1).
    pub m: [[Float; 3]; 2],
}

impl Affine {
    /// Rotation by `angle_deg` (counter-clockwise on screen, y down) and
    /// uniform `scale` about a center point.
    #[must_use]
    pub fn rotation_about(cx: Float, cy: Float, angle_deg: Float, scale: Float) -> Self {
        let a = angle_deg.to_radians();
        let alpha = scale * a.cos();
        let beta = scale * a.sin();
        Self {
            m: [
                [alpha, beta, (1.0 - alpha) * cx - beta * cy],
                [-beta, alpha, beta * cx + (1.0 - alpha) * cy],
            ],
        }
    }

    /// Apply to a point.
    #[must_use]
    pub fn apply(&self, x: Float, y: Float) -> (Float, Float) {
        (
            self.m[0][0] * x + self.m[0][1] * y + self.m[0][2],
            self.m[1][0] * x + self.m[1][1] * y + self.m[1][2],
        )
    }

    /// Inverse transform, or None when the linear part is singular.
    #[must_use]
    pub fn invert(&self) -> Option<Self> {
        let [[a, b, tx], [c, d, ty]] = self.m;
        let det = a * d - b * c;
        if det.abs() < 1e-12 {
            return None;
        }
        let (ia, ib, ic, id) = (d / det, -b / det, -c / det, a / det);
        Some(Self {
            m: [
                [ia, ib, -(ia * tx + ib * ty)],
                [ic, id, -(ic * tx + id * ty)],
            ],
        })
    }
}

/// A 3x3 projective transform, mapping source points to destination
/// points.
#[derive(Debug, Clone, Copy)]
pub struct Homography(pub [[Float; 3]; 3]);

impl Homography {
    /// The identity transform.
    #[must_use]
    pub fn identity() -> Self {
        Self([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
    }

    /// Apply to a point. Returns None when the point maps to infinity.
    #[must_use]
    pub fn apply(&self, x: Float, y: Float) -> Option<(Float, Float)> {
        let m = &self.0;
        let w = m[2][0] * x + m[2][1] * y + m[2][2];
        if w.abs() < 1e-12 {
            return None;
        }
        Some((
            (m[0][0] * x + m[0][1] * y + m[0][2]) / w,
            (m[1][0] * x + m[1][1] * y + m[1][2]) / w,
        ))
    }

    /// Inverse via the adjugate, or None when singular.
    #[must_use]
    pub fn invert(&self) -> Option<Self> {
        let m = &self.0;
        let mut adj = [[0.0; 3]; 3];
        for r in 0..3 {
            for c in 0..3 {
                let (r1, r2) = ((r + 1) % 3, (r + 2) % 3);
                let (c1, c2) = ((c + 1) % 3, (c + 2) % 3);
                // Transposed cofactor.
                adj[c][r] = m[r1][c1] * m[r2][c2] - m[r1][c2] * m[r2][c1];
            }
        }
        let det = m[0][0] * adj[0][0] + m[0][1] * adj[1][0] + m[0][2] * adj[2][0];
        if det.abs() < 1e-12 {
            return None;
        }
        for row in &mut adj {
            for v in row {
                *v /= det;
            }
        }
        Some(Self(adj))
    }
}

#[inline]
fn bilinear(img: &ImageBgr, x: Float, y: Float, ch: usize) -> Float {
    let (w, h) = (img.width() as i64, img.height() as i64);
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);
    let mut acc = 0.0;
    for (dy, wy) in [(0, 1.0 - fy), (1, fy)] {
        for (dx, wx) in [(0, 1.0 - fx), (1, fx)] {
            let wgt = wx * wy;
            if wgt == 0.0 {
                continue;
            }
            let (sx, sy) = (x0 + dx, y0 + dy);
            if sx >= 0 && sx < w && sy >= 0 && sy < h {
                acc += wgt * img.pixel(sx as usize, sy as usize)[ch] as Float;
            }
        }
    }
    acc
}

#[inline]
fn bilinear_plane(p: &Plane, x: Float, y: Float) -> Float {
    let (w, h) = (p.width() as i64, p.height() as i64);
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);
    let mut acc = 0.0;
    for (dy, wy) in [(0, 1.0 - fy), (1, fy)] {
        for (dx, wx) in [(0, 1.0 - fx), (1, fx)] {
            let wgt = wx * wy;
            if wgt == 0.0 {
                continue;
            }
            let (sx, sy) = (x0 + dx, y0 + dy);
            if sx >= 0 && sx < w && sy >= 0 && sy < h {
                acc += wgt * p.at(sx as usize, sy as usize);
            }
        }
    }
    acc
}

/// Warp an image through an affine transform into a `width`x`height`
/// destination. Pixels mapping outside the source become black.
#[must_use]
pub fn warp_affine(src: &ImageBgr, m: &Affine, width: usize, height: usize) -> ImageBgr {
    let inv = match m.invert() {
        Some(inv) => inv,
        None => return ImageBgr::new(width, height),
    };
    let mut out = ImageBgr::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let (sx, sy) = inv.apply(x as Float, y as Float);
            let px = [
                clip_u8(bilinear(src, sx, sy, 0)),
                clip_u8(bilinear(src, sx, sy, 1)),
                clip_u8(bilinear(src, sx, sy, 2)),
            ];
            out.set_pixel(x, y, px);
        }
    }
    out
}

/// Warp an image through a projective transform into a `width`x`height`
/// destination.
#[must_use]
pub fn warp_perspective(src: &ImageBgr, hm: &Homography, width: usize, height: usize) -> ImageBgr {
    let inv = match hm.invert() {
        Some(inv) => inv,
        None => return ImageBgr::new(width, height),
    };
    let mut out = ImageBgr::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let Some((sx, sy)) = inv.apply(x as Float, y as Float) else {
                continue;
            };
            let px = [
                clip_u8(bilinear(src, sx, sy, 0)),
                clip_u8(bilinear(src, sx, sy, 1)),
                clip_u8(bilinear(src, sx, sy, 2)),
            ];
            out.set_pixel(x, y, px);
        }
    }
    out
}

/// Bilinear resize of a float plane, pixel-center sampling.
#[must_use]
pub fn resize_plane(src: &Plane, width: usize, height: usize) -> Plane {
    let mut out = Plane::new(width, height);
    let sx = src.width() as Float / width as Float;
    let sy = src.height() as Float / height as Float;
    for y in 0..height {
        for x in 0..width {
            let u = (x as Float + 0.5) * sx - 0.5;
            let v = (y as Float + 0.5) * sy - 0.5;
            *out.at_mut(x, y) = bilinear_plane(src, u, v);
        }
    }
    out
}

/// Bilinear resize of a BGR image, pixel-center sampling.
#[must_use]
pub fn resize(src: &ImageBgr, width: usize, height: usize) -> ImageBgr {
    let mut out = ImageBgr::new(width, height);
    let sx = src.width() as Float / width as Float;
    let sy = src.height() as Float / height as Float;
    for y in 0..height {
        for x in 0..width {
            let u = (x as Float + 0.5) * sx - 0.5;
            let v = (y as Float + 0.5) * sy - 0.5;
            let px = [
                clip_u8(bilinear(src, u, v, 0)),
                clip_u8(bilinear(src, u, v, 1)),
                clip_u8(bilinear(src, u, v, 2)),
            ];
            out.set_pixel(x, y, px);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_image(w: usize, h: usize) -> ImageBgr {
        let mut img = ImageBgr::new(w, h);
        for y in 0..h {
            for x in 0..w {
                img.set_pixel(x, y, [(x * 7 % 256) as u8, (y * 5 % 256) as u8, 128]);
            }
        }
        img
    }

    #[test]
    fn identity_affine_copies_exactly() {
        let img = gradient_image(20, 14);
        let m = Affine::rotation_about(10.0, 7.0, 0.0, 1.0);
        let out = warp_affine(&img, &m, 20, 14);
        assert_eq!(img, out);
    }

    #[test]
    fn identity_homography_copies_exactly() {
        let img = gradient_image(17, 9);
        let out = warp_perspective(&img, &Homography::identity(), 17, 9);
        assert_eq!(img, out);
    }

    #[test]
    fn affine_inverse_composes_to_identity() {
        let m = Affine::rotation_about(32.0, 20.0, 33.0, 0.7);
        let inv = m.invert().unwrap();
        for &(x, y) in &[(0.0, 0.0), (10.0, 5.0), (63.0, 41.0)] {
            let (u, v) = m.apply(x, y);
            let (bx, by) = inv.apply(u, v);
            assert!((bx - x).abs() < 1e-9 && (by - y).abs() < 1e-9);
        }
    }

    #[test]
    fn rotation_sign_is_counter_clockwise_on_screen() {
        // With y down, rotating (1, 0) about the origin by +90 degrees must
        // land on (0, -1): up on screen.
        let m = Affine::rotation_about(0.0, 0.0, 90.0, 1.0);
        let (x, y) = m.apply(1.0, 0.0);
        assert!(x.abs() < 1e-12 && (y + 1.0).abs() < 1e-12);
    }

    #[test]
    fn homography_inverse_composes_to_identity() {
        let hm = Homography([[1.1, 0.02, 3.0], [-0.01, 0.95, -2.0], [1e-4, -2e-4, 1.0]]);
        let inv = hm.invert().unwrap();
        for &(x, y) in &[(0.0, 0.0), (100.0, 50.0), (13.0, 77.0)] {
            let (u, v) = hm.apply(x, y).unwrap();
            let (bx, by) = inv.apply(u, v).unwrap();
            assert!((bx - x).abs() < 1e-6 && (by - y).abs() < 1e-6);
        }
    }

    #[test]
    fn resize_preserves_constant_planes() {
        let p = Plane::from_vec(10, 10, vec![50.0; 100]);
        let r = resize_plane(&p, 7, 13);
        for &v in r.as_slice() {
            assert!((v - 50.0).abs() < 1e-9);
        }
    }
}
