/// Skylift transfer layer: fountain-coded one-way file broadcast.
///
/// The sender compresses the framed file, feeds it to a rateless block
/// encoder, and blindly paces encoded blocks onto the radio forever,
/// interleaving a small metadata packet every 32 blocks. Receivers need no
/// back-channel: any sufficiently large subset of distinct blocks recovers
/// the file, which is then validated end-to-end before delivery.

pub mod codec;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod stats;

pub use codec::{expand_block_id, BlockDecoder, BlockEncoder, CodecError, BLOCK_BYTES};
pub use packet::{classify, InfoPacket, Packet, DATA_BYTES, INFO_BYTES};
pub use receiver::{FileReceiver, ReceiverState, TransferEvent};
pub use sender::{FileSender, SenderState, PACING_INTERVAL};
pub use stats::TransferStats;

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("radio failure: {0}")]
    Radio(#[from] skylift_radio::RadioError),

    #[error("codec failure: {0}")]
    Codec(#[from] CodecError),

    #[error("compression failed: {0}")]
    Compression(#[source] io::Error),

    #[error("file name too long for the wire format: {0} bytes")]
    NameTooLong(usize),

    #[error("file too large to transfer: {0} bytes")]
    FileTooLarge(usize),

    #[error("failed to spawn transfer thread: {0}")]
    Spawn(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, TransferError>;
