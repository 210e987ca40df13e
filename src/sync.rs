/*! DFT synchronization template.

Blind extraction has no reference image to align against, so the embedder
plants four symmetric peaks in the magnitude spectrum of the luminance
channel. Rotation turns the spectrum with the image and scaling moves the
peaks radially, so finding the strongest off-center peak later recovers
both parameters, the same move as whole-packet clock recovery: transform,
pick the best bin, read the geometry off its position.

The template has 90 degree symmetry, so rotation estimates live in
[-45, +45] degrees.

Sign convention (y down): a suspect rotated clockwise on screen carries
its spectral peak to a larger atan2(dy, dx) angle, producing a positive
rotation estimate; [`correct`] applies the estimate through
[`Affine::rotation_about`], whose positive direction is counter-clockwise
on screen, which maps the suspect back.
*/
use itertools::iproduct;
use log::debug;
use rustfft::FftPlanner;

use crate::raster::{ImageBgr, Plane};
use crate::warp::{Affine, warp_affine};
use crate::{Complex, Float};

/// Low frequencies this close to DC never count as template peaks.
const DC_GUARD_RADIUS: Float = 10.0;

/// Sync template configuration. Must match between embed and detect.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct SyncTemplate {
    /// Peak radius as a fraction of the spectrum, in (0, 0.5).
    pub frequency: Float,
    /// Base angle of the first peak, degrees.
    pub angle: Float,
    /// Multiplicative amplification of the peak patches, at least 1.
    pub strength: Float,
    /// Patch radius: each peak covers a (2r+1)² patch of bins.
    pub peak_radius: usize,
}

impl Default for SyncTemplate {
    fn default() -> Self {
        Self {
            frequency: 0.1,
            angle: 45.0,
            strength: 5.0,
            peak_radius: 1,
        }
    }
}

/// What detection saw.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct GeometryEstimate {
    /// Estimated rotation, degrees, in [-45, +45].
    pub rotation: Float,
    /// Estimated scale factor applied to the suspect.
    pub scale: Float,
    /// False only when the guarded magnitude spectrum held no energy at
    /// all; rotation and scale are then the best-effort identity (0, 1).
    /// Any nonzero maximum is reported as-is, template or not.
    pub peak_found: bool,
}

impl GeometryEstimate {
    fn absent() -> Self {
        Self {
            rotation: 0.0,
            scale: 1.0,
            peak_found: false,
        }
    }
}

impl SyncTemplate {
    /// The four peak angles.
    fn angles(&self) -> [Float; 4] {
        [
            self.angle,
            self.angle + 90.0,
            self.angle + 180.0,
            self.angle + 270.0,
        ]
    }

    /// Plant the template into a luminance plane. Returns the marked
    /// plane, clipped to the 8-bit range.
    #[must_use]
    pub fn embed(&self, y: &Plane) -> Plane {
        let (w, h) = (y.width(), y.height());
        let (cx, cy) = ((w / 2) as i64, (h / 2) as i64);
        let mut spec: Vec<Complex> = y.as_slice().iter().map(|&v| Complex::new(v, 0.0)).collect();
        fft2(&mut spec, w, h, false);
        let mut spec = shift2(&spec, w, h, true);

        let r = self.peak_radius as i64;
        for ang in self.angles() {
            let rad = ang.to_radians();
            let du = (self.frequency * w as Float * rad.cos()).round() as i64;
            let dv = (self.frequency * h as Float * rad.sin()).round() as i64;
            let (px, py) = (cx + du, cy + dv);
            for (dy, dx) in iproduct!(-r..=r, -r..=r) {
                let (x, yy) = (px + dx, py + dy);
                if x >= 0 && (x as usize) < w && yy >= 0 && (yy as usize) < h {
                    // Amplify magnitude, preserve phase.
                    spec[yy as usize * w + x as usize] *= self.strength;
                }
            }
        }

        let mut spec = shift2(&spec, w, h, false);
        fft2(&mut spec, w, h, true);
        let norm = 1.0 / (w * h) as Float;
        let data = spec
            .iter()
            .map(|c| (c.norm() * norm).clamp(0.0, 255.0))
            .collect();
        Plane::from_vec(w, h, data)
    }

    /// Estimate rotation and scale from the displaced template peak.
    #[must_use]
    pub fn detect(&self, gray: &Plane) -> GeometryEstimate {
        let (w, h) = (gray.width(), gray.height());
        let (cx, cy) = ((w / 2) as Float, (h / 2) as Float);
        let mut spec: Vec<Complex> = gray
            .as_slice()
            .iter()
            .map(|&v| Complex::new(v, 0.0))
            .collect();
        fft2(&mut spec, w, h, false);
        let spec = shift2(&spec, w, h, true);

        let mut best = 0.0;
        let mut best_pos = (0usize, 0usize);
        for yy in 0..h {
            for x in 0..w {
                let dx = x as Float - cx;
                let dy = yy as Float - cy;
                if (dx * dx + dy * dy).sqrt() < DC_GUARD_RADIUS {
                    continue;
                }
                let mag = spec[yy * w + x].norm();
                if mag > best {
                    best = mag;
                    best_pos = (x, yy);
                }
            }
        }
        // Only an identically zero maximum counts as a missing peak.
        if best <= 0.0 {
            return GeometryEstimate::absent();
        }

        let dx = best_pos.0 as Float - cx;
        let dy = best_pos.1 as Float - cy;
        let fd = ((dx / w as Float).powi(2) + (dy / h as Float).powi(2)).sqrt();
        if fd <= 0.0 {
            return GeometryEstimate::absent();
        }
        let detected_angle = dy.atan2(dx).to_degrees();
        let scale = self.frequency / fd;
        let mut rotation = detected_angle - self.angle;
        // The template repeats every 90 degrees.
        while rotation > 45.0 {
            rotation -= 90.0;
        }
        while rotation < -45.0 {
            rotation += 90.0;
        }
        debug!(
            "sync peak at ({}, {}): rotation {rotation:.2} deg, scale {scale:.3}",
            best_pos.0, best_pos.1
        );
        GeometryEstimate {
            rotation,
            scale,
            peak_found: true,
        }
    }
}

/// Undo a detected rotation and scale: affine about the image center,
/// bilinear, same output dimensions.
#[must_use]
pub fn correct(image: &ImageBgr, rotation: Float, scale: Float) -> ImageBgr {
    let (w, h) = (image.width(), image.height());
    let recover_scale = if scale > 0.0 { 1.0 / scale } else { 1.0 };
    let m = Affine::rotation_about(
        (w / 2) as Float,
        (h / 2) as Float,
        rotation,
        recover_scale,
    );
    warp_affine(image, &m, w, h)
}

/// In-place 2-D FFT via row and column passes. rustfft leaves the inverse
/// unnormalized; callers scale by 1/(w·h) after a roundtrip.
fn fft2(buf: &mut Vec<Complex>, w: usize, h: usize, inverse: bool) {
    let mut planner = FftPlanner::new();
    let row_fft = if inverse {
        planner.plan_fft_inverse(w)
    } else {
        planner.plan_fft_forward(w)
    };
    for row in buf.chunks_exact_mut(w) {
        row_fft.process(row);
    }
    let mut t = transpose(buf, w, h);
    let col_fft = if inverse {
        planner.plan_fft_inverse(h)
    } else {
        planner.plan_fft_forward(h)
    };
    for col in t.chunks_exact_mut(h) {
        col_fft.process(col);
    }
    *buf = transpose(&t, h, w);
}

fn transpose(buf: &[Complex], w: usize, h: usize) -> Vec<Complex> {
    let mut out = vec![Complex::default(); buf.len()];
    for y in 0..h {
        for x in 0..w {
            out[x * h + y] = buf[y * w + x];
        }
    }
    out
}

/// Center-shift (forward) or undo the shift (backward). Matches the usual
/// fftshift/ifftshift pair for both even and odd dimensions.
fn shift2(buf: &[Complex], w: usize, h: usize, forward: bool) -> Vec<Complex> {
    let mut out = vec![Complex::default(); buf.len()];
    for y in 0..h {
        for x in 0..w {
            let (tx, ty) = ((x + w / 2) % w, (y + h / 2) % h);
            if forward {
                out[ty * w + tx] = buf[y * w + x];
            } else {
                out[y * w + x] = buf[ty * w + tx];
            }
        }
    }
    out
}
