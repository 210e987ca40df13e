#![warn(missing_docs)]
/*! Invisible image watermarking.

This crate embeds a short text payload invisibly into a still image and
recovers it later from a possibly-degraded copy. It is a blind/semi-blind
watermarking codec: a frequency-domain carrier moves the bits,
Reed-Solomon coding absorbs damage, and a spectral synchronization
template plus a feature aligner undo geometry.

The host owns image container decoding; the core works on decoded 8-bit
BGR pixel matrices in and out.

# Architecture overview

Embedding:

```text
      [ text payload ]
             ↓
 [ frame + Reed-Solomon parity ]
             ↓
     [ 2040-bit stream ]
             ↓
 [ carrier writes luminance:   ]
 [ DWT-QIM (primary) or        ]
 [ DCT coefficient pair (HVS)  ]
             ↓
 [ optional DFT sync template ]
             ↓
 [ PSNR / SSIM / signal heatmap ]
```

Extraction runs the mirror image, preceded by ORB-style alignment when
the original is available, or by sync-template rotation/scale recovery
when it is not.

# Example

```
use invismark::raster::ImageBgr;
use invismark::watermark::{Config, Watermarker};

let wm = Watermarker::new(Config::default())?;
// A flat gray test card; any decoded BGR image works.
let image = ImageBgr::from_vec(256, 256, vec![128; 256 * 256 * 3]);
let out = wm.embed(&image, "who owns this picture", 1.0)?;
let got = wm.extract(&image, &out.image)?;
assert_eq!(got.text, "who owns this picture");
# Ok::<(), invismark::Error>(())
```
*/

pub mod align;
pub mod carrier;
pub mod dct;
pub mod dct_pair;
pub mod dwt;
pub mod dwt_qim;
pub mod heatmap;
pub mod hvs;
pub mod metrics;
pub mod payload;
pub mod raster;
pub mod rs;
pub mod sync;
pub mod warp;
pub mod watermark;

/// Float type used. f64 throughout: the spectral template and QIM margins
/// are not worth risking on single precision.
pub type Float = f64;

/// Complex spectrum sample.
pub type Complex = num_complex::Complex<Float>;

/// Everything that can go wrong in the codec, by kind. The orchestrator
/// matches on these tags to drive fallbacks; never on message text.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The message does not fit the packet: at most `255 - K - 4` bytes.
    #[error("payload too long: {len} bytes, maximum {max}")]
    PayloadTooLong {
        /// UTF-8 byte length of the offered message.
        len: usize,
        /// Largest admissible length under the current parity count.
        max: usize,
    },

    /// The image cannot hold a packet (or enough of one to parse).
    #[error("image too small: {0}")]
    ImageTooSmall(String),

    /// A decoded packet did not start with the "INV" tag.
    #[error("bad magic tag {0:?}")]
    BadMagic([u8; 3]),

    /// A decoded packet declared an impossible message length.
    #[error("bad length byte {len}, maximum {max}")]
    BadLength {
        /// The declared length.
        len: usize,
        /// Largest length the layout admits.
        max: usize,
    },

    /// Reed-Solomon ran out of correction capacity.
    #[error("Reed-Solomon correction capacity exhausted")]
    FecExhausted,

    /// Rejected configuration; encode and decode would disagree.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Host-side I/O failed.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

/// Crate-wide result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
pub mod tests {
    //! Test helper functions.
    use super::*;

    /// For testing, assert that two float slices are almost equal.
    pub fn assert_almost_equal(left: &[Float], right: &[Float]) {
        assert_eq!(
            left.len(),
            right.len(),
            "\nleft: {left:?}\nright: {right:?}"
        );
        for i in 0..left.len() {
            if (left[i] - right[i]).abs() > 0.001 {
                assert_eq!(
                    left[i], right[i],
                    "\nElement {i}:\nleft: {left:?}\nright: {right:?}"
                );
            }
        }
    }

    #[test]
    fn error_messages_carry_their_kind() {
        let e = Error::PayloadTooLong { len: 300, max: 221 };
        assert!(e.to_string().contains("300"));
        let e = Error::BadMagic(*b"XYZ");
        assert!(e.to_string().contains("magic"));
    }
}
