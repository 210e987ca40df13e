/*! Difference heatmap.

The watermark signal sits a couple of counts above the original pixels, so
a straight diff renders black. The heatmap stretches the absolute
difference to full range, runs it through the classic JET colormap and
blends the result over the original at 30%, which makes the embedding
pattern visible for inspection.
*/
use crate::Float;
use crate::raster::{ImageBgr, Plane, clip_u8};

/// Build the signal-map overlay. With `alpha_map` given (values in 0..1)
/// the map drives the colors directly; otherwise the strength is inferred
/// from the amplified difference of the two images.
///
/// Panics if the dimensions disagree.
#[must_use]
pub fn signal_heatmap(
    original: &ImageBgr,
    watermarked: &ImageBgr,
    alpha_map: Option<&Plane>,
) -> ImageBgr {
    let (w, h) = (original.width(), original.height());
    let strength: Vec<u8> = match alpha_map {
        Some(m) => {
            assert_eq!((m.width(), m.height()), (w, h));
            m.as_slice().iter().map(|&v| clip_u8(v * 255.0)).collect()
        }
        None => {
            let gray = ImageBgr::absdiff(original, watermarked).luminance();
            let min = gray
                .as_slice()
                .iter()
                .copied()
                .fold(Float::INFINITY, Float::min);
            let max = gray
                .as_slice()
                .iter()
                .copied()
                .fold(Float::NEG_INFINITY, Float::max);
            let range = max - min;
            gray.as_slice()
                .iter()
                .map(|&v| {
                    if range > 0.0 {
                        clip_u8((v - min) / range * 255.0)
                    } else {
                        0
                    }
                })
                .collect()
        }
    };

    let mut out = ImageBgr::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let heat = jet(strength[y * w + x] as Float / 255.0);
            let base = original.pixel(x, y);
            let mut px = [0u8; 3];
            for c in 0..3 {
                px[c] = clip_u8(0.3 * heat[c] as Float + 0.7 * base[c] as Float);
            }
            out.set_pixel(x, y, px);
        }
    }
    out
}

/// JET colormap: blue through green to red, returned as [B, G, R].
#[must_use]
pub fn jet(v: Float) -> [u8; 3] {
    let v = v.clamp(0.0, 1.0);
    let seg = |center: Float| ((1.5 - (4.0 * v - center).abs()).clamp(0.0, 1.0) * 255.0) as u8;
    [seg(1.0), seg(2.0), seg(3.0)]
}
