/*! Quality metrics.

Both metrics run on luminance so the numbers are comparable: PSNR in dB
capped at 100 for identical planes, and SSIM per Wang et al. 2004 with the
standard 11x11 Gaussian window, sigma 1.5, K1 = 0.01, K2 = 0.03.
*/
use crate::Float;
use crate::raster::Plane;

const L: Float = 255.0;
const SSIM_WINDOW: usize = 11;
const SSIM_SIGMA: Float = 1.5;

/// Peak signal-to-noise ratio in dB over luminance, capped at 100.
///
/// Panics if the planes disagree on dimensions.
#[must_use]
pub fn psnr(a: &Plane, b: &Plane) -> Float {
    assert_eq!((a.width(), a.height()), (b.width(), b.height()));
    let mse = a
        .as_slice()
        .iter()
        .zip(b.as_slice())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<Float>()
        / a.len() as Float;
    if mse == 0.0 {
        return 100.0;
    }
    (20.0 * (L / mse.sqrt()).log10()).min(100.0)
}

fn gaussian_kernel(n: usize, sigma: Float) -> Vec<Float> {
    let half = (n / 2) as i64;
    let mut k: Vec<Float> = (-half..=half)
        .map(|i| (-((i * i) as Float) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: Float = k.iter().sum();
    for v in &mut k {
        *v /= sum;
    }
    k
}

/// Separable Gaussian filter with reflect-101 borders.
fn gaussian_filter(p: &Plane, kernel: &[Float]) -> Plane {
    let (w, h) = (p.width(), p.height());
    let half = (kernel.len() / 2) as i64;
    let mut tmp = Plane::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (i, &k) in kernel.iter().enumerate() {
                acc += k * p.at_reflect(x as i64 + i as i64 - half, y as i64);
            }
            *tmp.at_mut(x, y) = acc;
        }
    }
    let mut out = Plane::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (i, &k) in kernel.iter().enumerate() {
                acc += k * tmp.at_reflect(x as i64, y as i64 + i as i64 - half);
            }
            *out.at_mut(x, y) = acc;
        }
    }
    out
}

/// Mean structural similarity over luminance.
///
/// The map is averaged over the window-valid interior; planes smaller than
/// the window fall back to the border-reflected whole map.
///
/// Panics if the planes disagree on dimensions.
#[must_use]
pub fn ssim(a: &Plane, b: &Plane) -> Float {
    assert_eq!((a.width(), a.height()), (b.width(), b.height()));
    let (w, h) = (a.width(), a.height());
    let c1 = (0.01 * L) * (0.01 * L);
    let c2 = (0.03 * L) * (0.03 * L);

    let kernel = gaussian_kernel(SSIM_WINDOW, SSIM_SIGMA);
    let mul = |x: &Plane, y: &Plane| {
        let data = x
            .as_slice()
            .iter()
            .zip(y.as_slice())
            .map(|(p, q)| p * q)
            .collect();
        Plane::from_vec(w, h, data)
    };

    let mu_a = gaussian_filter(a, &kernel);
    let mu_b = gaussian_filter(b, &kernel);
    let aa = gaussian_filter(&mul(a, a), &kernel);
    let bb = gaussian_filter(&mul(b, b), &kernel);
    let ab = gaussian_filter(&mul(a, b), &kernel);

    let half = SSIM_WINDOW / 2;
    let (x0, x1, y0, y1) = if w >= SSIM_WINDOW && h >= SSIM_WINDOW {
        (half, w - half, half, h - half)
    } else {
        (0, w, 0, h)
    };

    let mut sum = 0.0;
    let mut count = 0usize;
    for y in y0..y1 {
        for x in x0..x1 {
            let ma = mu_a.at(x, y);
            let mb = mu_b.at(x, y);
            let va = aa.at(x, y) - ma * ma;
            let vb = bb.at(x, y) - mb * mb;
            let cov = ab.at(x, y) - ma * mb;
            let s = ((2.0 * ma * mb + c1) * (2.0 * cov + c2))
                / ((ma * ma + mb * mb + c1) * (va + vb + c2));
            sum += s;
            count += 1;
        }
    }
    sum / count as Float
}
