/*! Payload framing.

A message travels as one fixed 255-byte packet:

```text
+-----------+--------+------------------+----------+----------------+
| "INV" (3) | len(1) | UTF-8 text (len) | zero pad | RS parity (K)  |
+-----------+--------+------------------+----------+----------------+
```

The whole packet is turned into a bit stream, MSB first within each byte,
byte-major, and every bit lands in exactly one carrier coefficient. The
maximum text length is `255 - K - 4` bytes.

Decoding reverses the path. Carriers whose capacity falls short of a full
packet hand back fewer bits; the missing tail bytes are treated as
erasures. Within the erasure budget Reed-Solomon recovers them exactly;
beyond it the systematic prefix is parsed best-effort and the result is
flagged as degraded rather than rejected, since the header, length and
message all sit at the front of the packet.
*/
use log::{debug, warn};

use crate::rs::ReedSolomon;
use crate::{Error, Result};

/// Magic tag identifying a watermark packet.
pub const MAGIC: [u8; 3] = *b"INV";

/// Fixed packet size: the largest RS block over GF(2^8).
pub const PACKET_LEN: usize = 255;

/// Bits in a full packet.
pub const PACKET_BITS: usize = PACKET_LEN * 8;

/// Outcome of a successful packet decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// The recovered message.
    pub text: String,
    /// The message needed lossy UTF-8 decoding (a warning, not a failure).
    pub lossy: bool,
    /// Symbols corrected by Reed-Solomon.
    pub corrected: usize,
    /// Reed-Solomon was bypassed because the carrier held fewer bits than
    /// the erasure budget can make up for.
    pub fec_bypassed: bool,
}

/// Frames text into packets and back. The parity count must match between
/// the encoding and decoding side; both take it from the same
/// [`Config`](crate::watermark::Config).
#[derive(Debug, Clone)]
pub struct PayloadCodec {
    rs: ReedSolomon,
}

impl PayloadCodec {
    /// Create a codec with `ecc_symbols` parity bytes per packet.
    pub fn new(ecc_symbols: usize) -> Result<Self> {
        if ecc_symbols == 0 || ecc_symbols > PACKET_LEN - 4 {
            return Err(Error::InvalidConfig(format!(
                "ecc symbol count {ecc_symbols} leaves no room for the header"
            )));
        }
        Ok(Self {
            rs: ReedSolomon::new(ecc_symbols),
        })
    }

    /// Parity byte count.
    #[must_use]
    pub fn ecc_symbols(&self) -> usize {
        self.rs.parity_len()
    }

    /// Longest admissible message in UTF-8 bytes.
    #[must_use]
    pub fn max_text_len(&self) -> usize {
        PACKET_LEN - self.ecc_symbols() - 4
    }

    /// Frame `text` into a 255-byte packet.
    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        let msg = text.as_bytes();
        if msg.len() > self.max_text_len() {
            return Err(Error::PayloadTooLong {
                len: msg.len(),
                max: self.max_text_len(),
            });
        }
        let data_len = PACKET_LEN - self.ecc_symbols();
        let mut data = Vec::with_capacity(data_len);
        data.extend_from_slice(&MAGIC);
        data.push(msg.len() as u8);
        data.extend_from_slice(msg);
        data.resize(data_len, 0);
        let packet = self.rs.encode(&data);
        debug_assert_eq!(packet.len(), PACKET_LEN);
        debug!("framed {} message bytes into {PACKET_LEN}-byte packet", msg.len());
        Ok(packet)
    }

    /// Decode a packet-sized bit stream. `bits` must hold [`PACKET_BITS`]
    /// entries; `available` says how many of them were genuinely recovered
    /// from the carrier (the rest being zero fill).
    pub fn decode_bits(&self, bits: &[u8], available: usize) -> Result<Decoded> {
        assert_eq!(bits.len(), PACKET_BITS);
        let mut packet = bits_to_bytes(bits);
        let avail_bytes = (available / 8).min(PACKET_LEN);
        let missing = PACKET_LEN - avail_bytes;

        if missing == 0 {
            let corrected = self.rs.decode(&mut packet, &[])?;
            debug!("RS decode ok, corrected {corrected} symbols");
            return self.parse(&packet, corrected, false);
        }

        if missing <= self.ecc_symbols() {
            let erasures: Vec<usize> = (avail_bytes..PACKET_LEN).collect();
            let corrected = self.rs.decode(&mut packet, &erasures)?;
            debug!("RS decode ok with {missing} erasures, corrected {corrected} symbols");
            return self.parse(&packet, corrected, false);
        }

        warn!(
            "carrier held {avail_bytes} of {PACKET_LEN} bytes, beyond the \
             {}-byte erasure budget; parsing the systematic prefix uncorrected",
            self.ecc_symbols()
        );
        self.parse(&packet, 0, true)
    }

    fn parse(&self, packet: &[u8], corrected: usize, fec_bypassed: bool) -> Result<Decoded> {
        let data = &packet[..PACKET_LEN - self.ecc_symbols()];
        if data[..3] != MAGIC {
            return Err(Error::BadMagic([data[0], data[1], data[2]]));
        }
        let len = data[3] as usize;
        if len > self.max_text_len() {
            return Err(Error::BadLength {
                len,
                max: self.max_text_len(),
            });
        }
        let msg = &data[4..4 + len];
        // Truncated carriers can leave zero fill inside the message span.
        match std::str::from_utf8(msg) {
            Ok(s) => Ok(Decoded {
                text: s.trim_end_matches('\0').to_string(),
                lossy: false,
                corrected,
                fec_bypassed,
            }),
            Err(e) => {
                warn!("message is not valid UTF-8 ({e}), decoding lossily");
                Ok(Decoded {
                    text: String::from_utf8_lossy(msg)
                        .trim_end_matches('\0')
                        .to_string(),
                    lossy: true,
                    corrected,
                    fec_bypassed,
                })
            }
        }
    }
}

/// Unpack bytes into bits, MSB first.
#[must_use]
pub fn bytes_to_bits(bytes: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(bytes.len() * 8);
    for &byte in bytes {
        for i in (0..8).rev() {
            bits.push((byte >> i) & 1);
        }
    }
    bits
}

/// Pack bits (MSB first) back into bytes. The length must be a multiple
/// of 8.
#[must_use]
pub fn bits_to_bytes(bits: &[u8]) -> Vec<u8> {
    assert!(bits.len().is_multiple_of(8));
    let mut bytes = Vec::with_capacity(bits.len() / 8);
    for chunk in bits.chunks(8) {
        let mut byte = 0u8;
        for (i, bit) in chunk.iter().enumerate() {
            byte |= bit << (7 - i);
        }
        bytes.push(byte);
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> PayloadCodec {
        PayloadCodec::new(30).unwrap()
    }

    #[test]
    fn bit_packing_roundtrip() {
        let bytes = vec![0x49, 0x4e, 0x56, 0x00, 0xff, 0x80, 0x01];
        let bits = bytes_to_bits(&bytes);
        assert_eq!(bits.len(), bytes.len() * 8);
        assert_eq!(&bits[..8], &[0, 1, 0, 0, 1, 0, 0, 1]); // 'I', MSB first
        assert_eq!(bits_to_bytes(&bits), bytes);
    }

    #[test]
    fn encode_produces_fixed_packet() {
        let c = codec();
        for text in ["", "TEST", "hello world"] {
            let packet = c.encode(text).unwrap();
            assert_eq!(packet.len(), PACKET_LEN);
            assert_eq!(&packet[..3], &MAGIC);
            assert_eq!(packet[3] as usize, text.len());
        }
    }

    #[test]
    fn roundtrip_all_lengths_at_the_edges() {
        let c = codec();
        let max = c.max_text_len();
        assert_eq!(max, 221);
        for len in [0, 1, 7, max] {
            let text: String = "x".repeat(len);
            let bits = bytes_to_bits(&c.encode(&text).unwrap());
            let d = c.decode_bits(&bits, PACKET_BITS).unwrap();
            assert_eq!(d.text, text);
            assert!(!d.lossy);
            assert!(!d.fec_bypassed);
            assert_eq!(d.corrected, 0);
        }
        let too_long = "x".repeat(max + 1);
        assert!(matches!(
            c.encode(&too_long),
            Err(Error::PayloadTooLong { len, max: m }) if len == max + 1 && m == max
        ));
    }

    #[test]
    fn survives_byte_errors_up_to_half_parity() {
        let c = codec();
        let mut packet = c.encode("hold the line").unwrap();
        for k in 0..15 {
            packet[k * 16 + 2] ^= 0xa5;
        }
        let d = c.decode_bits(&bytes_to_bits(&packet), PACKET_BITS).unwrap();
        assert_eq!(d.text, "hold the line");
        assert_eq!(d.corrected, 15);
    }

    #[test]
    fn too_many_errors_exhaust_fec() {
        let c = codec();
        let mut packet = c.encode("hold the line").unwrap();
        for k in 0..16 {
            packet[k * 15 + 2] ^= 0xa5;
        }
        assert!(matches!(
            c.decode_bits(&bytes_to_bits(&packet), PACKET_BITS),
            Err(Error::FecExhausted)
        ));
    }

    #[test]
    fn wrong_magic_is_rejected_after_correction() {
        let c = codec();
        // A structurally valid packet with a bogus header: RS passes, the
        // magic check must catch it.
        let rs = ReedSolomon::new(30);
        let mut data = vec![0u8; PACKET_LEN - 30];
        data[..3].copy_from_slice(b"XYZ");
        data[3] = 4;
        let packet = rs.encode(&data);
        assert!(matches!(
            c.decode_bits(&bytes_to_bits(&packet), PACKET_BITS),
            Err(Error::BadMagic(m)) if &m == b"XYZ"
        ));
    }

    #[test]
    fn oversized_length_byte_is_rejected() {
        let c = codec();
        let rs = ReedSolomon::new(30);
        let mut data = vec![0u8; PACKET_LEN - 30];
        data[..3].copy_from_slice(&MAGIC);
        data[3] = 255;
        let packet = rs.encode(&data);
        assert!(matches!(
            c.decode_bits(&bytes_to_bits(&packet), PACKET_BITS),
            Err(Error::BadLength { len: 255, .. })
        ));
    }

    #[test]
    fn truncated_tail_within_erasure_budget_recovers_exactly() {
        let c = codec();
        let packet = c.encode("clipped but fine").unwrap();
        let mut bits = bytes_to_bits(&packet);
        // Lose the last 25 bytes: within the 30-symbol erasure budget.
        let available = (PACKET_LEN - 25) * 8;
        for b in bits[available..].iter_mut() {
            *b = 0;
        }
        let d = c.decode_bits(&bits, available).unwrap();
        assert_eq!(d.text, "clipped but fine");
        assert!(!d.fec_bypassed);
    }

    #[test]
    fn deep_truncation_parses_prefix_degraded() {
        let c = codec();
        let packet = c.encode("TEST").unwrap();
        let mut bits = bytes_to_bits(&packet);
        // Keep only 1024 bits, the capacity of a 256x256 block carrier.
        let available = 1024;
        for b in bits[available..].iter_mut() {
            *b = 0;
        }
        let d = c.decode_bits(&bits, available).unwrap();
        assert_eq!(d.text, "TEST");
        assert!(d.fec_bypassed);
    }

    #[test]
    fn lossy_utf8_is_flagged_not_fatal() {
        let c = codec();
        let rs = ReedSolomon::new(30);
        let mut data = vec![0u8; PACKET_LEN - 30];
        data[..3].copy_from_slice(&MAGIC);
        data[3] = 2;
        data[4] = 0xc3; // dangling continuation start
        data[5] = 0x28;
        let packet = rs.encode(&data);
        let d = c.decode_bits(&bytes_to_bits(&packet), PACKET_BITS).unwrap();
        assert!(d.lossy);
        assert!(!d.text.is_empty());
    }
}
