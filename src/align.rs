/*! ORB-style feature alignment.

When the caller holds the original image, geometric distortion of a
suspect is undone by matching keypoints between the two and fitting a
homography: FAST-9 corners ranked by Harris response over a scale pyramid,
oriented by intensity centroid, described by 256 steered binary intensity
comparisons, matched brute-force under Hamming distance with cross-check,
and fed to a RANSAC homography fit.

The binary test pattern is generated from a fixed-seed xorshift instead of
carrying a learned pair table; what matters for matching is that every
process derives the identical pattern from code alone.

Alignment is best-effort by contract: [`align`] returns `None` rather than
an error, and the caller decides whether to fall back to the raw suspect.
*/
use log::{debug, warn};
use rayon::prelude::*;

use crate::raster::{ImageBgr, Plane};
use crate::warp::{Homography, resize_plane, warp_perspective};
use crate::{Float, hvs};

/// Feature extractor capacity knobs.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OrbConfig {
    /// Keep at most this many keypoints per image, best Harris response
    /// first.
    pub nfeatures: usize,
    /// Pyramid decimation ratio between levels.
    pub scale_factor: Float,
    /// Pyramid depth.
    pub nlevels: usize,
    /// FAST-9 intensity threshold.
    pub fast_threshold: Float,
    /// Descriptor patch edge; also sets the detection border margin.
    pub patch_size: usize,
}

impl Default for OrbConfig {
    fn default() -> Self {
        Self {
            nfeatures: 5000,
            scale_factor: 1.2,
            nlevels: 8,
            fast_threshold: 20.0,
            patch_size: 31,
        }
    }
}

/// A detected corner, in level-0 coordinates.
#[derive(Debug, Clone, Copy)]
pub struct Keypoint {
    /// Column, level-0 pixels.
    pub x: Float,
    /// Row, level-0 pixels.
    pub y: Float,
    /// Harris corner response used for ranking.
    pub response: Float,
    /// Orientation from the intensity centroid, radians.
    pub angle: Float,
    /// Pyramid level the corner was found on.
    pub level: usize,
}

/// A 256-bit binary descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor(pub [u64; 4]);

impl Descriptor {
    /// Hamming distance.
    #[must_use]
    pub fn distance(&self, other: &Self) -> u32 {
        self.0
            .iter()
            .zip(&other.0)
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// One accepted correspondence: query (original) index, train (suspect)
/// index, Hamming distance.
#[derive(Debug, Clone, Copy)]
pub struct DMatch {
    /// Index into the query keypoint set.
    pub query: usize,
    /// Index into the train keypoint set.
    pub train: usize,
    /// Hamming distance between the descriptors.
    pub distance: u32,
}

/// Bresenham circle of radius 3: the FAST test ring.
const FAST_RING: [(i64, i64); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

const FAST_ARC: usize = 9;
const ORIENTATION_RADIUS: i64 = 15;
const HARRIS_K: Float = 0.04;

/// The detector: configuration plus the derived binary test pattern.
#[derive(Debug, Clone)]
pub struct OrbDetector {
    cfg: OrbConfig,
    pattern: Vec<(i64, i64, i64, i64)>,
}

impl OrbDetector {
    /// Build a detector; the test pattern is derived deterministically.
    #[must_use]
    pub fn new(cfg: OrbConfig) -> Self {
        Self {
            cfg,
            pattern: brief_pattern(),
        }
    }

    fn margin(&self) -> usize {
        self.cfg.patch_size / 2 + 4
    }

    /// Detect keypoints and compute their descriptors.
    #[must_use]
    pub fn detect_and_describe(&self, gray: &Plane) -> (Vec<Keypoint>, Vec<Descriptor>) {
        let margin = self.margin();
        let mut levels = Vec::with_capacity(self.cfg.nlevels);
        let mut scales = Vec::with_capacity(self.cfg.nlevels);
        for l in 0..self.cfg.nlevels {
            let scale = self.cfg.scale_factor.powi(l as i32);
            let lw = (gray.width() as Float / scale).round() as usize;
            let lh = (gray.height() as Float / scale).round() as usize;
            if lw <= 2 * margin + 1 || lh <= 2 * margin + 1 {
                break;
            }
            let img = if l == 0 {
                gray.clone()
            } else {
                resize_plane(gray, lw, lh)
            };
            levels.push(img);
            scales.push(scale);
        }

        // Candidates: FAST corners scored by Harris, non-max suppressed.
        let mut candidates: Vec<(usize, usize, usize, Float)> = Vec::new();
        for (l, img) in levels.iter().enumerate() {
            let (w, h) = (img.width(), img.height());
            let mut response = vec![Float::NEG_INFINITY; w * h];
            for y in margin..h - margin {
                for x in margin..w - margin {
                    if fast_corner(img, x, y, self.cfg.fast_threshold) {
                        response[y * w + x] = harris(img, x, y);
                    }
                }
            }
            let before = candidates.len();
            for y in margin..h - margin {
                for x in margin..w - margin {
                    let r = response[y * w + x];
                    if r == Float::NEG_INFINITY {
                        continue;
                    }
                    let mut is_max = true;
                    'nms: for dy in -1i64..=1 {
                        for dx in -1i64..=1 {
                            if (dx, dy) == (0, 0) {
                                continue;
                            }
                            let ni = (y as i64 + dy) as usize * w + (x as i64 + dx) as usize;
                            if response[ni] > r {
                                is_max = false;
                                break 'nms;
                            }
                        }
                    }
                    if is_max {
                        candidates.push((l, x, y, r));
                    }
                }
            }
            debug!("level {l}: {} corners", candidates.len() - before);
        }

        candidates
            .sort_by(|a, b| b.3.partial_cmp(&a.3).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(self.cfg.nfeatures);

        // Descriptors come from a smoothed level image.
        let smooth: Vec<Plane> = levels.iter().map(hvs::gaussian3).collect();

        let mut keypoints = Vec::with_capacity(candidates.len());
        let mut descriptors = Vec::with_capacity(candidates.len());
        for &(l, x, y, response) in &candidates {
            let angle = orientation(&levels[l], x, y);
            keypoints.push(Keypoint {
                x: x as Float * scales[l],
                y: y as Float * scales[l],
                response,
                angle,
                level: l,
            });
            descriptors.push(self.describe(&smooth[l], x, y, angle));
        }
        debug!("kept {} keypoints", keypoints.len());
        (keypoints, descriptors)
    }

    fn describe(&self, smooth: &Plane, x: usize, y: usize, angle: Float) -> Descriptor {
        let (sin, cos) = angle.sin_cos();
        let mut words = [0u64; 4];
        let sample = |dx: i64, dy: i64| {
            let rx = (dx as Float * cos - dy as Float * sin).round() as i64;
            let ry = (dx as Float * sin + dy as Float * cos).round() as i64;
            smooth.at((x as i64 + rx) as usize, (y as i64 + ry) as usize)
        };
        for (i, &(x1, y1, x2, y2)) in self.pattern.iter().enumerate() {
            if sample(x1, y1) < sample(x2, y2) {
                words[i / 64] |= 1u64 << (i % 64);
            }
        }
        Descriptor(words)
    }
}

/// FAST-9 segment test with the compass-point pretest.
fn fast_corner(img: &Plane, x: usize, y: usize, t: Float) -> bool {
    let p = img.at(x, y);
    let hi = p + t;
    let lo = p - t;
    let ring = |i: usize| {
        let (dx, dy) = FAST_RING[i];
        img.at((x as i64 + dx) as usize, (y as i64 + dy) as usize)
    };

    // A 9-long arc must cover at least two of the four compass points.
    let mut bright = 0;
    let mut dark = 0;
    for i in [0, 4, 8, 12] {
        let v = ring(i);
        if v > hi {
            bright += 1;
        } else if v < lo {
            dark += 1;
        }
    }
    if bright < 2 && dark < 2 {
        return false;
    }

    let mut states = [0i8; 16];
    for (i, s) in states.iter_mut().enumerate() {
        let v = ring(i);
        *s = if v > hi {
            1
        } else if v < lo {
            -1
        } else {
            0
        };
    }
    let mut run = 0;
    let mut prev = 0i8;
    for i in 0..2 * FAST_RING.len() {
        let s = states[i % FAST_RING.len()];
        if s != 0 && s == prev {
            run += 1;
        } else {
            run = i32::from(s != 0);
            prev = s;
        }
        if run >= FAST_ARC as i32 {
            return true;
        }
    }
    false
}

/// Harris corner response over a 7x7 window of central-difference
/// gradients.
fn harris(img: &Plane, x: usize, y: usize) -> Float {
    let (mut a, mut b, mut c) = (0.0, 0.0, 0.0);
    for dy in -3i64..=3 {
        for dx in -3i64..=3 {
            let (px, py) = (x as i64 + dx, y as i64 + dy);
            let ix = (img.at((px + 1) as usize, py as usize)
                - img.at((px - 1) as usize, py as usize))
                * 0.5;
            let iy = (img.at(px as usize, (py + 1) as usize)
                - img.at(px as usize, (py - 1) as usize))
                * 0.5;
            a += ix * ix;
            b += iy * iy;
            c += ix * iy;
        }
    }
    (a * b - c * c) - HARRIS_K * (a + b) * (a + b)
}

/// Intensity-centroid orientation over a radius-15 disc.
fn orientation(img: &Plane, x: usize, y: usize) -> Float {
    let (mut m10, mut m01) = (0.0, 0.0);
    for dy in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
        let span = ((ORIENTATION_RADIUS * ORIENTATION_RADIUS - dy * dy) as Float)
            .sqrt()
            .floor() as i64;
        for dx in -span..=span {
            let v = img.at((x as i64 + dx) as usize, (y as i64 + dy) as usize);
            m10 += dx as Float * v;
            m01 += dy as Float * v;
        }
    }
    m01.atan2(m10)
}

/// The 256 binary test offsets, fixed for the lifetime of the format.
fn brief_pattern() -> Vec<(i64, i64, i64, i64)> {
    let mut s: u64 = 0x9e37_79b9_7f4a_7c15;
    let mut next = || {
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        s
    };
    (0..256)
        .map(|_| {
            let v = next();
            let coord = |byte: u64| (byte % 21) as i64 - 10;
            (
                coord(v & 0xffff),
                coord((v >> 16) & 0xffff),
                coord((v >> 32) & 0xffff),
                coord((v >> 48) & 0xffff),
            )
        })
        .collect()
}

/// Brute-force Hamming matching with cross-check: a pair survives only
/// when each descriptor is the other's nearest neighbor.
#[must_use]
pub fn match_descriptors(query: &[Descriptor], train: &[Descriptor]) -> Vec<DMatch> {
    fn best(d: &Descriptor, set: &[Descriptor]) -> Option<(usize, u32)> {
        set.iter()
            .enumerate()
            .map(|(i, t)| (i, d.distance(t)))
            .min_by_key(|&(_, dist)| dist)
    }
    let q2t: Vec<Option<(usize, u32)>> =
        query.par_iter().map(|d| best(d, train)).collect();
    let t2q: Vec<Option<(usize, u32)>> =
        train.par_iter().map(|d| best(d, query)).collect();
    q2t.iter()
        .enumerate()
        .filter_map(|(qi, m)| {
            let (ti, distance) = (*m)?;
            let (back, _) = t2q[ti]?;
            (back == qi).then_some(DMatch {
                query: qi,
                train: ti,
                distance,
            })
        })
        .collect()
}

/// Estimate a homography mapping `src` points onto `dst` points by RANSAC
/// over normalized DLT fits, refit on the final inlier set.
#[must_use]
pub fn find_homography(
    src: &[(Float, Float)],
    dst: &[(Float, Float)],
    thresh: Float,
) -> Option<Homography> {
    let n = src.len();
    if n < 4 || dst.len() != n {
        return None;
    }
    let thresh2 = thresh * thresh;
    let mut seed: u64 = 0x243f_6a88_85a3_08d3;
    let mut next = move || {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        seed
    };

    let mut best_inliers: Vec<usize> = Vec::new();
    for _ in 0..2000 {
        let mut idx = [0usize; 4];
        let mut picked = 0;
        while picked < idx.len() {
            let cand = (next() % n as u64) as usize;
            if !idx[..picked].contains(&cand) {
                idx[picked] = cand;
                picked += 1;
            }
        }
        let pairs: Vec<_> = idx.iter().map(|&i| (src[i], dst[i])).collect();
        let Some(h) = dlt(&pairs) else { continue };
        let inliers: Vec<usize> = (0..n)
            .filter(|&i| {
                h.apply(src[i].0, src[i].1).is_some_and(|(u, v)| {
                    let (du, dv) = (u - dst[i].0, v - dst[i].1);
                    du * du + dv * dv < thresh2
                })
            })
            .collect();
        if inliers.len() > best_inliers.len() {
            best_inliers = inliers;
            if best_inliers.len() == n {
                break;
            }
        }
    }
    if best_inliers.len() < 4 {
        return None;
    }
    debug!("homography: {} of {n} inliers", best_inliers.len());
    let pairs: Vec<_> = best_inliers.iter().map(|&i| (src[i], dst[i])).collect();
    dlt(&pairs)
}

/// Direct linear transform with Hartley normalization; least squares for
/// more than four pairs.
fn dlt(pairs: &[((Float, Float), (Float, Float))]) -> Option<Homography> {
    let (ts, src_n) = normalize(pairs.iter().map(|p| p.0));
    let (td, dst_n) = normalize(pairs.iter().map(|p| p.1));

    // Normal equations for the 8 unknowns with h33 fixed to 1.
    let mut ata = [[0.0; 8]; 8];
    let mut atb = [0.0; 8];
    for (&(x, y), &(u, v)) in src_n.iter().zip(&dst_n) {
        let rows: [([Float; 8], Float); 2] = [
            ([x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y], u),
            ([0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y], v),
        ];
        for (row, rhs) in rows {
            for i in 0..8 {
                for j in 0..8 {
                    ata[i][j] += row[i] * row[j];
                }
                atb[i] += row[i] * rhs;
            }
        }
    }
    let hvec = solve8(&mut ata, &mut atb)?;
    let hn = Homography([
        [hvec[0], hvec[1], hvec[2]],
        [hvec[3], hvec[4], hvec[5]],
        [hvec[6], hvec[7], 1.0],
    ]);
    // Denormalize: H = Td⁻¹ · Hn · Ts.
    Some(Homography(matmul3(
        &matmul3(&td.invert()?.0, &hn.0),
        &ts.0,
    )))
}

fn normalize(points: impl Iterator<Item = (Float, Float)>) -> (Homography, Vec<(Float, Float)>) {
    let pts: Vec<_> = points.collect();
    let n = pts.len() as Float;
    let cx = pts.iter().map(|p| p.0).sum::<Float>() / n;
    let cy = pts.iter().map(|p| p.1).sum::<Float>() / n;
    let mean_dist = pts
        .iter()
        .map(|p| ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt())
        .sum::<Float>()
        / n;
    let s = if mean_dist > 1e-9 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    let t = Homography([[s, 0.0, -s * cx], [0.0, s, -s * cy], [0.0, 0.0, 1.0]]);
    let mapped = pts
        .iter()
        .map(|p| (s * (p.0 - cx), s * (p.1 - cy)))
        .collect();
    (t, mapped)
}

fn matmul3(a: &[[Float; 3]; 3], b: &[[Float; 3]; 3]) -> [[Float; 3]; 3] {
    let mut out = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

/// Gaussian elimination with partial pivoting on an 8x8 system.
fn solve8(a: &mut [[Float; 8]; 8], b: &mut [Float; 8]) -> Option<[Float; 8]> {
    for col in 0..8 {
        let pivot = (col..8).max_by(|&i, &j| {
            a[i][col]
                .abs()
                .partial_cmp(&a[j][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..8 {
            let f = a[row][col] / a[col][col];
            if f == 0.0 {
                continue;
            }
            for k in col..8 {
                a[row][k] -= f * a[col][k];
            }
            b[row] -= f * b[col];
        }
    }
    let mut x = [0.0; 8];
    for row in (0..8).rev() {
        let mut acc = b[row];
        for k in row + 1..8 {
            acc -= a[row][k] * x[k];
        }
        x[row] = acc / a[row][row];
    }
    Some(x)
}

/// Warp `suspect` onto `original`'s geometry, or `None` when there aren't
/// enough trustworthy correspondences.
#[must_use]
pub fn align(original: &ImageBgr, suspect: &ImageBgr, cfg: &OrbConfig) -> Option<ImageBgr> {
    let orb = OrbDetector::new(cfg.clone());
    let (kp1, des1) = orb.detect_and_describe(&original.luminance());
    let (kp2, des2) = orb.detect_and_describe(&suspect.luminance());
    if des1.is_empty() || des2.is_empty() {
        warn!("no descriptors on one side, cannot align");
        return None;
    }
    let mut matches = match_descriptors(&des1, &des2);
    matches.sort_by_key(|m| m.distance);
    let keep = matches
        .len()
        .min(10usize.max((0.15 * matches.len() as Float).ceil() as usize));
    matches.truncate(keep);
    if matches.len() < 4 {
        warn!("only {} matches survive, cannot align", matches.len());
        return None;
    }
    debug!("aligning on {} matches", matches.len());
    let src: Vec<_> = matches.iter().map(|m| (kp2[m.train].x, kp2[m.train].y)).collect();
    let dst: Vec<_> = matches.iter().map(|m| (kp1[m.query].x, kp1[m.query].y)).collect();
    let h = find_homography(&src, &dst, 5.0)?;
    // A sub-pixel residual costs more in interpolation than it fixes;
    // skip the no-op warp.
    if suspect.width() == original.width()
        && suspect.height() == original.height()
        && max_corner_displacement(&h, original.width(), original.height()) < 0.5
    {
        debug!("homography is within half a pixel of identity, skipping the warp");
        return Some(suspect.clone());
    }
    Some(warp_perspective(
        suspect,
        &h,
        original.width(),
        original.height(),
    ))
}

/// Largest displacement the homography applies to a frame corner.
fn max_corner_displacement(h: &Homography, width: usize, height: usize) -> Float {
    let (w, hh) = (width as Float, height as Float);
    [(0.0, 0.0), (w, 0.0), (0.0, hh), (w, hh)]
        .into_iter()
        .map(|(x, y)| match h.apply(x, y) {
            Some((u, v)) => ((u - x).powi(2) + (v - y).powi(2)).sqrt(),
            None => Float::INFINITY,
        })
        .fold(0.0, Float::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_distance_counts_bits() {
        let a = Descriptor([0, 0, 0, 0]);
        let b = Descriptor([1, 2, 4, u64::MAX]);
        assert_eq!(a.distance(&b), 1 + 1 + 1 + 64);
        assert_eq!(b.distance(&b), 0);
    }

    #[test]
    fn pattern_is_stable_and_in_range() {
        let p1 = brief_pattern();
        let p2 = brief_pattern();
        assert_eq!(p1, p2);
        assert_eq!(p1.len(), 256);
        for &(a, b, c, d) in &p1 {
            for v in [a, b, c, d] {
                assert!((-10..=10).contains(&v));
            }
        }
    }

    #[test]
    fn fast_fires_on_a_bright_spot() {
        // A disc on flat background: its rim is a corner everywhere.
        let mut img = Plane::new(48, 48);
        for y in 0..48 {
            for x in 0..48 {
                let d2 = (x as i64 - 24).pow(2) + (y as i64 - 24).pow(2);
                *img.at_mut(x, y) = if d2 <= 4 { 200.0 } else { 50.0 };
            }
        }
        assert!(fast_corner(&img, 24, 24, 20.0));
        // Flat area: no corner.
        assert!(!fast_corner(&img, 8, 8, 20.0));
    }

    #[test]
    fn homography_from_exact_correspondences() {
        let truth = Homography([[1.05, 0.01, 4.0], [-0.02, 0.98, -3.0], [1e-5, 2e-5, 1.0]]);
        let src: Vec<(Float, Float)> = (0..40)
            .map(|i| (((i * 13) % 97) as Float, ((i * 29) % 83) as Float))
            .collect();
        let dst: Vec<_> = src.iter().map(|&(x, y)| truth.apply(x, y).unwrap()).collect();
        let h = find_homography(&src, &dst, 3.0).unwrap();
        for &(x, y) in &src {
            let (u, v) = h.apply(x, y).unwrap();
            let (tu, tv) = truth.apply(x, y).unwrap();
            assert!((u - tu).abs() < 1e-3 && (v - tv).abs() < 1e-3);
        }
    }

    #[test]
    fn homography_survives_outliers() {
        let truth = Homography([[1.0, 0.0, 10.0], [0.0, 1.0, -5.0], [0.0, 0.0, 1.0]]);
        let mut src: Vec<(Float, Float)> = (0..30)
            .map(|i| (((i * 17) % 101) as Float, ((i * 41) % 89) as Float))
            .collect();
        let mut dst: Vec<_> = src.iter().map(|&(x, y)| truth.apply(x, y).unwrap()).collect();
        // Poison a quarter of the set.
        for i in 0..7 {
            src.push((i as Float * 3.0, 50.0));
            dst.push((90.0 - i as Float, i as Float * 11.0));
        }
        let h = find_homography(&src, &dst, 2.0).unwrap();
        let (u, v) = h.apply(20.0, 30.0).unwrap();
        assert!((u - 30.0).abs() < 0.5 && (v - 25.0).abs() < 0.5);
    }

    #[test]
    fn cross_check_rejects_asymmetric_matches() {
        let q = vec![Descriptor([0b1111, 0, 0, 0]), Descriptor([0, 0, 0, 0])];
        let t = vec![Descriptor([0b1111, 0, 0, 0])];
        let m = match_descriptors(&q, &t);
        // Both queries prefer train 0, but train 0 prefers query 0 only.
        assert_eq!(m.len(), 1);
        assert_eq!((m[0].query, m[0].train, m[0].distance), (0, 0, 0));
    }
}
