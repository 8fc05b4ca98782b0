/// Adapter over the RaptorQ fountain codec.
///
/// The project's conventions live here so neither engine touches the codec
/// directly: blocks are exactly 234 bytes; a 32-bit block id addresses the
/// unlimited encoded stream (ids below the source count are the original
/// symbols, everything above is repair); and the compressed payload is
/// padded by one zero block before encoding so the codec always sees at
/// least two blocks, with the receiver trimming the same block after
/// recovery.

use raptorq::{Decoder, Encoder, EncodingPacket, ObjectTransmissionInformation, PayloadId};
use thiserror::Error;

/// Fixed encoded-block size. One data packet carries one block plus its
/// truncated id byte, filling the 235-byte radio frame exactly.
pub const BLOCK_BYTES: usize = 234;

/// Block ids ride a 24-bit symbol id space inside the codec.
const MAX_BLOCK_ID: u32 = (1 << 24) - 1;

/// The codec caps symbols per source block (RFC 6330 K'_max).
const MAX_BLOCKS: usize = 56_403;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("payload must span at least two blocks: {0} bytes")]
    PayloadTooSmall(usize),

    #[error("payload exceeds the codec block limit: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("block id {0} exceeds the codec id space")]
    BlockIdOverflow(u32),

    #[error("encoded block must be {expected} bytes, got {got}")]
    WrongBlockSize { got: usize, expected: usize },
}

/// Extend a compressed payload by one block of zeros before encoding.
pub fn pad_compressed(mut compressed: Vec<u8>) -> Vec<u8> {
    let padded_len = compressed.len() + BLOCK_BYTES;
    compressed.resize(padded_len, 0);
    compressed
}

/// Drop the trailing pad block from a recovered payload.
pub fn trim_pad(recovered: &mut Vec<u8>) {
    let len = recovered.len().saturating_sub(BLOCK_BYTES);
    recovered.truncate(len);
}

/// Reconstruct a full 32-bit block id from its low 8 bits, choosing the
/// value nearest to `last` in the wrapping counter domain. The exact ±128
/// tie resolves upward.
pub fn expand_block_id(last: u32, low8: u8) -> u32 {
    let diff = low8.wrapping_sub(last as u8);
    if diff <= 128 {
        last.wrapping_add(diff as u32)
    } else {
        last.wrapping_sub(256 - diff as u32)
    }
}

/// Rateless encoder for one padded payload.
pub struct BlockEncoder {
    encoder: Encoder,
    source: Vec<Vec<u8>>,
    source_count: u32,
}

impl BlockEncoder {
    pub fn new(payload: &[u8]) -> Result<Self, CodecError> {
        check_payload_len(payload.len())?;
        let config = transmission_config(payload.len());
        let encoder = Encoder::new(payload, config);
        let source: Vec<Vec<u8>> = encoder.get_block_encoders()[0]
            .source_packets()
            .into_iter()
            .map(|packet| packet.data().to_vec())
            .collect();
        let source_count = source.len() as u32;
        Ok(Self {
            encoder,
            source,
            source_count,
        })
    }

    /// Produce the encoded block for `block_id`; always exactly
    /// `BLOCK_BYTES` long.
    pub fn encode(&self, block_id: u32) -> Result<Vec<u8>, CodecError> {
        if block_id > MAX_BLOCK_ID {
            return Err(CodecError::BlockIdOverflow(block_id));
        }
        if block_id < self.source_count {
            return Ok(self.source[block_id as usize].clone());
        }
        let repair = self.encoder.get_block_encoders()[0]
            .repair_packets(block_id - self.source_count, 1);
        let packet = &repair[0];
        debug_assert_eq!(packet.payload_id().encoding_symbol_id(), block_id);
        Ok(packet.data().to_vec())
    }
}

/// Accumulating decoder for one padded payload length.
pub struct BlockDecoder {
    decoder: Decoder,
}

impl BlockDecoder {
    pub fn new(total_len: usize) -> Result<Self, CodecError> {
        check_payload_len(total_len)?;
        let config = transmission_config(total_len);
        Ok(Self {
            decoder: Decoder::new(config),
        })
    }

    /// Submit one block under its full 32-bit id. `Ok(None)` means more
    /// blocks are needed; `Ok(Some(_))` is the recovered padded payload.
    pub fn submit(&mut self, block_id: u32, block: &[u8]) -> Result<Option<Vec<u8>>, CodecError> {
        if block_id > MAX_BLOCK_ID {
            return Err(CodecError::BlockIdOverflow(block_id));
        }
        if block.len() != BLOCK_BYTES {
            return Err(CodecError::WrongBlockSize {
                got: block.len(),
                expected: BLOCK_BYTES,
            });
        }
        let packet = EncodingPacket::new(PayloadId::new(0, block_id), block.to_vec());
        Ok(self.decoder.decode(packet))
    }
}

fn check_payload_len(len: usize) -> Result<(), CodecError> {
    if len <= BLOCK_BYTES {
        return Err(CodecError::PayloadTooSmall(len));
    }
    if len > MAX_BLOCKS * BLOCK_BYTES {
        return Err(CodecError::PayloadTooLarge(len));
    }
    Ok(())
}

fn transmission_config(total_len: usize) -> ObjectTransmissionInformation {
    ObjectTransmissionInformation::new(total_len as u64, BLOCK_BYTES as u16, 1, 1, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_nearest_wraps_downward() {
        assert_eq!(expand_block_id(0x0000_0123, 0x01), 0x0000_0101);
    }

    #[test]
    fn expand_nearest_wraps_upward() {
        assert_eq!(expand_block_id(0x0000_01FE, 0x01), 0x0000_0201);
    }

    #[test]
    fn expand_identity_and_low_bits() {
        assert_eq!(expand_block_id(0x0000_4242, 0x42), 0x0000_4242);
        for last in [0u32, 0xFF, 0x1234, 0xFFFF_FF80] {
            for low8 in [0u8, 1, 0x7F, 0x80, 0xFF] {
                assert_eq!(expand_block_id(last, low8) as u8, low8);
            }
        }
    }

    #[test]
    fn expand_tie_resolves_upward() {
        assert_eq!(expand_block_id(0x0000_0100, 0x80), 0x0000_0180);
    }

    #[test]
    fn pad_and_trim_are_inverse() {
        let compressed = vec![7u8; 100];
        let mut padded = pad_compressed(compressed.clone());
        assert_eq!(padded.len(), 100 + BLOCK_BYTES);
        assert!(padded[100..].iter().all(|&b| b == 0));
        trim_pad(&mut padded);
        assert_eq!(padded, compressed);
    }

    #[test]
    fn encoder_rejects_single_block_payload() {
        assert!(matches!(
            BlockEncoder::new(&[0u8; BLOCK_BYTES]),
            Err(CodecError::PayloadTooSmall(_))
        ));
    }

    #[test]
    fn blocks_are_fixed_size_and_recoverable_out_of_order() {
        let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let padded = pad_compressed(payload.clone());
        let encoder = BlockEncoder::new(&padded).unwrap();

        // Skip the first two source blocks; lean on repair blocks instead.
        let ids: Vec<u32> = (2..30).collect();
        let mut decoder = BlockDecoder::new(padded.len()).unwrap();
        let mut recovered = None;
        for id in ids {
            let block = encoder.encode(id).unwrap();
            assert_eq!(block.len(), BLOCK_BYTES);
            if let Some(out) = decoder.submit(id, &block).unwrap() {
                recovered = Some(out);
                break;
            }
        }

        let mut recovered = recovered.expect("enough blocks to recover");
        assert_eq!(recovered.len(), padded.len());
        trim_pad(&mut recovered);
        assert_eq!(recovered, payload);
    }

    #[test]
    fn decoder_rejects_wrong_block_size() {
        let mut decoder = BlockDecoder::new(3 * BLOCK_BYTES).unwrap();
        assert!(matches!(
            decoder.submit(0, &[0u8; 10]),
            Err(CodecError::WrongBlockSize { got: 10, .. })
        ));
    }
}
