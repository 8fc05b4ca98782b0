/// Transfer packet formats, riding inside the radio's host frames.
///
/// Info packet (16 bytes, all u32 little-endian):
/// ```text
/// [0..4]    compressed_len   (padded compressed payload length)
/// [4..8]    integrity_hash   (CRC-32C of the inner payload)
/// [8..12]   current_block_id (sender's upcoming block id)
/// [12..16]  decompressed_len (inner payload length)
/// ```
///
/// Data packet (235 bytes):
/// ```text
/// [0]       low 8 bits of the 32-bit block id
/// [1..235]  encoded block (234 bytes)
/// ```
///
/// Inner payload, hashed before compression:
/// ```text
/// [0]       name length N
/// [1..1+N]  file name
/// [1+N]     NUL
/// [2+N..]   file bytes
/// ```
///
/// Dispatch is by payload length alone; anything that is neither 16 nor
/// 235 bytes is a bogon and is dropped.

use crate::codec::BLOCK_BYTES;
use crate::TransferError;

/// Info packet wire size.
pub const INFO_BYTES: usize = 16;

/// Data packet wire size: truncated id byte plus one encoded block.
pub const DATA_BYTES: usize = 1 + BLOCK_BYTES;

/// Periodic transfer metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoPacket {
    pub compressed_len: u32,
    pub integrity_hash: u32,
    pub current_block_id: u32,
    pub decompressed_len: u32,
}

impl InfoPacket {
    pub fn to_bytes(&self) -> [u8; INFO_BYTES] {
        let mut buf = [0u8; INFO_BYTES];
        buf[0..4].copy_from_slice(&self.compressed_len.to_le_bytes());
        buf[4..8].copy_from_slice(&self.integrity_hash.to_le_bytes());
        buf[8..12].copy_from_slice(&self.current_block_id.to_le_bytes());
        buf[12..16].copy_from_slice(&self.decompressed_len.to_le_bytes());
        buf
    }

    /// Parse from a payload. Returns None if the length is wrong.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() != INFO_BYTES {
            return None;
        }
        Some(Self {
            compressed_len: u32::from_le_bytes(payload[0..4].try_into().ok()?),
            integrity_hash: u32::from_le_bytes(payload[4..8].try_into().ok()?),
            current_block_id: u32::from_le_bytes(payload[8..12].try_into().ok()?),
            decompressed_len: u32::from_le_bytes(payload[12..16].try_into().ok()?),
        })
    }
}

/// A received payload, discriminated on length.
#[derive(Debug)]
pub enum Packet<'a> {
    Info(InfoPacket),
    Data { truncated_id: u8, block: &'a [u8] },
}

/// Classify a payload; None is a bogon.
pub fn classify(payload: &[u8]) -> Option<Packet<'_>> {
    match payload.len() {
        INFO_BYTES => InfoPacket::parse(payload).map(Packet::Info),
        DATA_BYTES => Some(Packet::Data {
            truncated_id: payload[0],
            block: &payload[1..],
        }),
        _ => None,
    }
}

/// Frame a file name and its contents into the inner payload.
pub fn build_inner(name: &str, file: &[u8]) -> Result<Vec<u8>, TransferError> {
    let name_bytes = name.as_bytes();
    if name_bytes.len() > u8::MAX as usize {
        return Err(TransferError::NameTooLong(name_bytes.len()));
    }
    let mut inner = Vec::with_capacity(2 + name_bytes.len() + file.len());
    inner.push(name_bytes.len() as u8);
    inner.extend_from_slice(name_bytes);
    inner.push(0);
    inner.extend_from_slice(file);
    Ok(inner)
}

/// Split an inner payload back into (name, file bytes). None if the header
/// is malformed.
pub fn parse_inner(inner: &[u8]) -> Option<(String, &[u8])> {
    let name_len = *inner.first()? as usize;
    if inner.len() < 2 + name_len || inner[1 + name_len] != 0 {
        return None;
    }
    let name = String::from_utf8_lossy(&inner[1..1 + name_len]).into_owned();
    Some((name, &inner[2 + name_len..]))
}

/// The 32-bit integrity hash carried by the info packet, computed over the
/// inner payload.
pub fn integrity_hash(inner: &[u8]) -> u32 {
    crc32c::crc32c(inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_packet_layout() {
        let info = InfoPacket {
            compressed_len: 0x0102_0304,
            integrity_hash: 0xA1B2_C3D4,
            current_block_id: 7,
            decompressed_len: 9,
        };
        let bytes = info.to_bytes();
        assert_eq!(&bytes[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[4..8], &[0xD4, 0xC3, 0xB2, 0xA1]);
        assert_eq!(InfoPacket::parse(&bytes), Some(info));
    }

    #[test]
    fn classify_by_length() {
        let info = InfoPacket {
            compressed_len: 468,
            integrity_hash: 1,
            current_block_id: 0,
            decompressed_len: 9,
        };
        assert!(matches!(classify(&info.to_bytes()), Some(Packet::Info(i)) if i == info));

        let mut data = vec![0u8; DATA_BYTES];
        data[0] = 0x42;
        match classify(&data) {
            Some(Packet::Data { truncated_id, block }) => {
                assert_eq!(truncated_id, 0x42);
                assert_eq!(block.len(), BLOCK_BYTES);
            }
            other => panic!("expected data packet, got {other:?}"),
        }

        assert!(classify(&[0u8; 2]).is_none());
        assert!(classify(&[0u8; 100]).is_none());
    }

    #[test]
    fn inner_payload_roundtrip() {
        let inner = build_inner("hello", b"HI").unwrap();
        assert_eq!(inner, [5, b'h', b'e', b'l', b'l', b'o', 0, 0x48, 0x49]);
        let (name, file) = parse_inner(&inner).unwrap();
        assert_eq!(name, "hello");
        assert_eq!(file, b"HI");
    }

    #[test]
    fn inner_payload_rejects_malformed_header() {
        // Claims an 8-byte name but the buffer is shorter.
        assert!(parse_inner(&[8, b'a', b'b']).is_none());
        // Missing NUL terminator.
        assert!(parse_inner(&[2, b'a', b'b', 1, 9]).is_none());
        assert!(parse_inner(&[]).is_none());
    }

    #[test]
    fn overlong_name_is_rejected() {
        let name = "n".repeat(300);
        assert!(matches!(
            build_inner(&name, b""),
            Err(TransferError::NameTooLong(300))
        ));
    }
}
