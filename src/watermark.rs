/*! The orchestrator.

[`Watermarker`] owns the three pipelines:

```text
embed:    text ──> packet ──> bits ──> carrier on Y ──> BGR ──> (sync)
                                                   └──> PSNR/SSIM/heatmap
extract:  (original, suspect) ──> align ──> DWT-QIM ──┬──> text
                                       (tag failure) ──> DCT-pair ──> text
verify:   suspect ──> sync detect ──> correct ──> DWT-QIM ──> verdict
```

All algorithm constants — quantization step, parity symbol count, sync
template, feature extractor capacity — live in one immutable [`Config`]
validated at construction, so the embedding and extracting side can never
drift apart within a process. Carrier fallback decisions are made on error
tags, never on message text.

The blind path is deliberately single-carrier: the DCT-pair fallback only
exists on the reference-aligned extract path, where alignment has already
restored the tile grid it needs.
*/
use log::{debug, info, warn};
use serde::Serialize;

use crate::carrier::{Carrier, CarrierKind};
use crate::dct_pair::DctPair;
use crate::dwt_qim::DwtQim;
use crate::payload::{self, PayloadCodec};
use crate::raster::ImageBgr;
use crate::sync::SyncTemplate;
use crate::{Error, Float, Result, align, heatmap, metrics, sync};

/// Default QIM quantization step.
pub const DEFAULT_DELTA: Float = 10.0;

/// Default Reed-Solomon parity symbol count.
pub const DEFAULT_ECC_SYMBOLS: usize = 30;

// The packet layout needs header room after parity, and parity must stay
// within one GF(2^8) block.
const _: () = assert!(DEFAULT_ECC_SYMBOLS > 0 && DEFAULT_ECC_SYMBOLS <= 251);

/// Everything the codec needs to agree on between embed and extract.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// QIM quantization step Δ.
    pub delta: Float,
    /// Reed-Solomon parity symbols K; the maximum message length is
    /// `255 - K - 4`.
    pub ecc_symbols: usize,
    /// Which carrier the embed pipeline writes with.
    pub carrier: CarrierKind,
    /// Plant the DFT sync template after carrier embedding. Off by
    /// default: amplifying spectral peaks costs QIM margin on the LL
    /// band, so it's a trade of carrier headroom for blind geometric
    /// robustness.
    pub embed_sync: bool,
    /// Sync template geometry.
    pub sync: SyncTemplate,
    /// Feature extractor capacity for reference alignment.
    pub orb: align::OrbConfig,
    /// Produce the difference heatmap on embed.
    pub signal_map: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            delta: DEFAULT_DELTA,
            ecc_symbols: DEFAULT_ECC_SYMBOLS,
            carrier: CarrierKind::DwtQim,
            embed_sync: false,
            sync: SyncTemplate::default(),
            orb: align::OrbConfig::default(),
            signal_map: true,
        }
    }
}

impl Config {
    /// The start-up consistency check: refuse parameter sets the two
    /// directions could disagree on or that break the packet layout.
    pub fn validate(&self) -> Result<()> {
        if !self.delta.is_finite() || self.delta <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "quantization step {} must be positive",
                self.delta
            )));
        }
        if self.ecc_symbols == 0 || self.ecc_symbols > 251 {
            return Err(Error::InvalidConfig(format!(
                "ecc symbol count {} must be in 1..=251",
                self.ecc_symbols
            )));
        }
        if !(0.0..0.5).contains(&self.sync.frequency) || self.sync.frequency == 0.0 {
            return Err(Error::InvalidConfig(format!(
                "sync frequency {} must be in (0, 0.5)",
                self.sync.frequency
            )));
        }
        if self.sync.strength < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "sync strength {} must be at least 1",
                self.sync.strength
            )));
        }
        if self.orb.nlevels == 0 || self.orb.scale_factor <= 1.0 {
            return Err(Error::InvalidConfig(
                "feature pyramid needs at least one level and a scale factor above 1".into(),
            ));
        }
        Ok(())
    }
}

/// Result of an embed run.
#[derive(Debug, Clone, Serialize)]
pub struct EmbedOutcome {
    /// The watermarked image.
    #[serde(skip)]
    pub image: ImageBgr,
    /// Inspection heatmap, when configured.
    #[serde(skip)]
    pub signal_map: Option<ImageBgr>,
    /// Luminance PSNR against the input, dB.
    pub psnr: Float,
    /// Luminance SSIM against the input.
    pub ssim: Float,
}

/// How the reference extraction got its bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractStatus {
    /// Suspect was warped onto the original before extraction.
    Aligned,
    /// Alignment failed; extraction ran on the raw suspect.
    AlignmentFailed,
    /// The primary carrier failed and the DCT-pair carrier recovered the
    /// message.
    DctFallback,
}

/// Result of a reference extraction.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractOutcome {
    /// Recovered message.
    pub text: String,
    /// How the bits were obtained.
    pub status: ExtractStatus,
    /// The message needed lossy UTF-8 decoding.
    pub lossy: bool,
    /// Reed-Solomon was bypassed (sub-capacity carrier).
    pub fec_bypassed: bool,
    /// Symbols corrected by Reed-Solomon.
    pub corrected_symbols: usize,
}

/// Geometry findings attached to a blind verification.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyMetadata {
    /// Rotation estimate from the sync template, degrees.
    pub rotation_detected: Float,
    /// Scale estimate from the sync template.
    pub scale_detected: Float,
    /// Whether a correcting warp was applied before extraction.
    pub geometry_corrected: bool,
    /// Extraction method used by the blind path.
    pub method: &'static str,
}

/// Result of a blind verification.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyOutcome {
    /// True when a packet decoded with a valid header and non-empty text.
    pub verified: bool,
    /// Recovered message, empty when nothing decoded.
    pub text: String,
    /// 1.0 for a clean decode, 0.5 for a degraded parse, 0.0 otherwise.
    pub confidence: Float,
    /// Geometry findings.
    pub metadata: VerifyMetadata,
}

/// The watermark codec with its configuration frozen in.
#[derive(Debug, Clone)]
pub struct Watermarker {
    cfg: Config,
    payload: PayloadCodec,
}

impl Watermarker {
    /// Validate the configuration and build the codec.
    pub fn new(cfg: Config) -> Result<Self> {
        cfg.validate()?;
        let payload = PayloadCodec::new(cfg.ecc_symbols)?;
        Ok(Self { cfg, payload })
    }

    /// The frozen configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Longest admissible message in UTF-8 bytes.
    #[must_use]
    pub fn max_text_len(&self) -> usize {
        self.payload.max_text_len()
    }

    fn carrier(&self, kind: CarrierKind, alpha: Float) -> Box<dyn Carrier> {
        match kind {
            CarrierKind::DwtQim => Box::new(DwtQim::new(self.cfg.delta)),
            CarrierKind::DctPair => Box::new(DctPair::new(alpha)),
        }
    }

    /// Embed `text` into `image` with strength `alpha`.
    pub fn embed(&self, image: &ImageBgr, text: &str, alpha: Float) -> Result<EmbedOutcome> {
        let packet = self.payload.encode(text)?;
        let bits = payload::bytes_to_bits(&packet);
        let carrier = self.carrier(self.cfg.carrier, alpha);

        let (w, h) = (image.width(), image.height());
        // Even a degraded decode needs the header and length up front.
        if carrier.capacity_bits(w, h) < 32 {
            return Err(Error::ImageTooSmall(format!(
                "{}x{} holds {} {} bits, need at least 32",
                w,
                h,
                carrier.capacity_bits(w, h),
                carrier.name()
            )));
        }

        let (mut y, u, v) = image.to_yuv();
        let written = carrier.embed(&mut y, &bits)?;
        if written < bits.len() {
            warn!(
                "{}: image holds {written} of {} packet bits; the message \
                 survives only within the erasure budget",
                carrier.name(),
                bits.len()
            );
        }
        let mut marked = ImageBgr::from_yuv(&y, &u, &v);

        if self.cfg.embed_sync {
            let (my, mu, mv) = marked.to_yuv();
            let sy = self.cfg.sync.embed(&my);
            marked = ImageBgr::from_yuv(&sy, &mu, &mv);
        }

        let la = image.luminance();
        let lb = marked.luminance();
        let psnr = metrics::psnr(&la, &lb);
        let ssim = metrics::ssim(&la, &lb);
        let signal_map = self
            .cfg
            .signal_map
            .then(|| heatmap::signal_heatmap(image, &marked, None));
        info!(
            "embedded {written} bits via {} (psnr {psnr:.2} dB, ssim {ssim:.4})",
            carrier.name()
        );
        Ok(EmbedOutcome {
            image: marked,
            signal_map,
            psnr,
            ssim,
        })
    }

    fn decode_with(&self, carrier: &dyn Carrier, image: &ImageBgr) -> Result<payload::Decoded> {
        let (y, _, _) = image.to_yuv();
        let mut bits = carrier.extract(&y, payload::PACKET_BITS)?;
        let available = bits.len();
        bits.resize(payload::PACKET_BITS, 0);
        self.payload.decode_bits(&bits, available)
    }

    /// Recover the message from `suspect` using `original` as the
    /// alignment reference.
    pub fn extract(&self, original: &ImageBgr, suspect: &ImageBgr) -> Result<ExtractOutcome> {
        let (aligned, status) = match align::align(original, suspect, &self.cfg.orb) {
            Some(img) => (img, ExtractStatus::Aligned),
            None => {
                warn!("alignment failed, extracting from the raw suspect");
                (suspect.clone(), ExtractStatus::AlignmentFailed)
            }
        };

        let qim = DwtQim::new(self.cfg.delta);
        match self.decode_with(&qim, &aligned) {
            Ok(d) => Ok(outcome(d, status)),
            Err(e @ (Error::BadMagic(_) | Error::BadLength { .. } | Error::FecExhausted)) => {
                debug!("primary carrier failed ({e}), trying the DCT pair");
                let dct = DctPair::new(1.0);
                let d = self.decode_with(&dct, &aligned)?;
                Ok(outcome(d, ExtractStatus::DctFallback))
            }
            Err(e) => Err(e),
        }
    }

    /// Blind verification: no reference image, geometry recovered from the
    /// sync template when present.
    pub fn verify(&self, suspect: &ImageBgr) -> Result<VerifyOutcome> {
        let est = self.cfg.sync.detect(&suspect.luminance());
        let nontrivial =
            est.peak_found && (est.rotation.abs() > 0.1 || (est.scale - 1.0).abs() > 0.01);
        let corrected = if nontrivial {
            info!(
                "correcting geometry: rotation {:.2} deg, scale {:.3}",
                est.rotation, est.scale
            );
            sync::correct(suspect, est.rotation, est.scale)
        } else {
            suspect.clone()
        };

        let metadata = VerifyMetadata {
            rotation_detected: est.rotation,
            scale_detected: est.scale,
            geometry_corrected: nontrivial,
            method: "dwt-qim",
        };
        let qim = DwtQim::new(self.cfg.delta);
        match self.decode_with(&qim, &corrected) {
            Ok(d) => {
                let verified = !d.text.is_empty();
                let confidence = if !verified {
                    0.0
                } else if d.fec_bypassed || d.lossy {
                    0.5
                } else {
                    1.0
                };
                Ok(VerifyOutcome {
                    verified,
                    text: d.text,
                    confidence,
                    metadata,
                })
            }
            Err(Error::BadMagic(_) | Error::BadLength { .. } | Error::FecExhausted) => {
                Ok(VerifyOutcome {
                    verified: false,
                    text: String::new(),
                    confidence: 0.0,
                    metadata,
                })
            }
            Err(e) => Err(e),
        }
    }
}

fn outcome(d: payload::Decoded, status: ExtractStatus) -> ExtractOutcome {
    ExtractOutcome {
        text: d.text,
        status,
        lossy: d.lossy,
        fec_bypassed: d.fec_bypassed,
        corrected_symbols: d.corrected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
        assert!(Watermarker::new(Config::default()).is_ok());
    }

    #[test]
    fn inconsistent_configs_are_refused() {
        for cfg in [
            Config {
                delta: 0.0,
                ..Config::default()
            },
            Config {
                delta: Float::NAN,
                ..Config::default()
            },
            Config {
                ecc_symbols: 0,
                ..Config::default()
            },
            Config {
                ecc_symbols: 252,
                ..Config::default()
            },
            Config {
                sync: SyncTemplate {
                    frequency: 0.6,
                    ..SyncTemplate::default()
                },
                ..Config::default()
            },
            Config {
                sync: SyncTemplate {
                    strength: 0.5,
                    ..SyncTemplate::default()
                },
                ..Config::default()
            },
        ] {
            assert!(
                matches!(Watermarker::new(cfg.clone()), Err(Error::InvalidConfig(_))),
                "{cfg:?}"
            );
        }
    }

    #[test]
    fn max_text_len_follows_ecc() {
        let wm = Watermarker::new(Config {
            ecc_symbols: 10,
            ..Config::default()
        })
        .unwrap();
        assert_eq!(wm.max_text_len(), 241);
    }

    #[test]
    fn tiny_image_is_rejected_up_front() {
        let wm = Watermarker::new(Config::default()).unwrap();
        let img = ImageBgr::new(8, 8);
        assert!(matches!(
            wm.embed(&img, "x", 1.0),
            Err(Error::ImageTooSmall(_))
        ));
    }
}
