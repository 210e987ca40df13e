/*! The carrier seam.

Both carriers hide one bit per coefficient in the luminance plane; they
differ only in which transform domain holds the coefficient. The
orchestrator owns the fallback ordering, so a carrier only has to say how
many bits it can hold, write them, and read them back.
*/
use crate::Result;
use crate::raster::Plane;

/// A transform-domain bit carrier.
///
/// Implementations are pure functions of their inputs plus configuration
/// captured at construction, and are freely shareable across threads.
pub trait Carrier: Send + Sync {
    /// Short name for logs and reports.
    fn name(&self) -> &'static str;

    /// Number of bits a `width`x`height` plane can hold.
    fn capacity_bits(&self, width: usize, height: usize) -> usize;

    /// Write `bits` (values 0/1) into the plane. Returns the number of
    /// bits actually written, which may be less than `bits.len()` for a
    /// carrier that tolerates partial packets.
    fn embed(&self, y: &mut Plane, bits: &[u8]) -> Result<usize>;

    /// Read back up to `nbits` bits. The returned vector may be shorter
    /// when the plane's capacity falls short; the payload layer treats the
    /// missing tail as erasures.
    fn extract(&self, y: &Plane, nbits: usize) -> Result<Vec<u8>>;
}

/// Which carrier the embed pipeline writes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CarrierKind {
    /// QIM on the Haar LL sub-band. The primary carrier.
    DwtQim,
    /// Coefficient-pair ordering in 8x8 DCT tiles. The fallback carrier.
    DctPair,
}
