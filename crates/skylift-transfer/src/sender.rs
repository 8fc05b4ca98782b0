/// Sender: frame, compress, encode, and blindly pace packets forever.
///
/// Flow:
///   1. Keep the last path component as the transfer name
///   2. Build the inner payload (name header + file bytes), hash it
///   3. Compress, pad by one block, create the encoder
///   4. Broadcast loop: info packet every 32 blocks, one data packet per
///      pacing tick, until terminated or the radio fails
///
/// There is no back-channel: the loop never knows whether anyone is
/// listening and simply keeps emitting fresh blocks.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use skylift_radio::Radio;
use tracing::{debug, error, info};

use crate::codec::{pad_compressed, BlockEncoder, CodecError, BLOCK_BYTES};
use crate::packet::{build_inner, integrity_hash, InfoPacket, DATA_BYTES};
use crate::stats::TransferStats;
use crate::{Result, TransferError};

/// Fixed delay between packet emissions.
pub const PACING_INTERVAL: Duration = Duration::from_millis(100);

/// One info packet rides ahead of every 32nd data packet.
const INFO_INTERVAL: u32 = 32;

const COMPRESS_LEVEL: i32 = 1;

/// Pure emission state: owns the encoder and decides which payload goes out
/// next. The loop around it only paces and talks to the radio.
pub struct SenderState {
    encoder: BlockEncoder,
    info: InfoPacket,
    block_id: u32,
    info_sent: bool,
}

impl SenderState {
    /// Prepare a transfer from a path-like name and the raw file bytes.
    pub fn prepare(file_path: &str, file_bytes: &[u8]) -> Result<SenderState> {
        let name = Path::new(file_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(file_path);

        let inner = build_inner(name, file_bytes)?;
        if inner.len() > u32::MAX as usize - BLOCK_BYTES {
            return Err(TransferError::FileTooLarge(file_bytes.len()));
        }
        let hash = integrity_hash(&inner);
        let decompressed_len = inner.len() as u32;

        let compressed = zstd::bulk::compress(&inner, COMPRESS_LEVEL)
            .map_err(TransferError::Compression)?;
        let padded = pad_compressed(compressed);
        let encoder = BlockEncoder::new(&padded)?;

        info!(
            "prepared '{}': {} bytes framed, {} compressed+padded, {} blocks",
            name,
            inner.len(),
            padded.len(),
            padded.len().div_ceil(BLOCK_BYTES)
        );

        Ok(SenderState {
            encoder,
            info: InfoPacket {
                compressed_len: padded.len() as u32,
                integrity_hash: hash,
                current_block_id: 0,
                decompressed_len,
            },
            block_id: 0,
            info_sent: false,
        })
    }

    /// Total blocks a receiver needs, for progress accounting.
    pub fn total_blocks(&self) -> u64 {
        (self.info.compressed_len as u64).div_ceil(BLOCK_BYTES as u64)
    }

    /// The next payload to put on the air: the info packet at every
    /// 32-block boundary, otherwise the next encoded block.
    pub fn next_packet(&mut self) -> std::result::Result<Vec<u8>, CodecError> {
        if self.block_id % INFO_INTERVAL == 0 && !self.info_sent {
            self.info_sent = true;
            let mut info = self.info;
            info.current_block_id = self.block_id;
            return Ok(info.to_bytes().to_vec());
        }

        let block = self.encoder.encode(self.block_id)?;
        let mut payload = Vec::with_capacity(DATA_BYTES);
        payload.push(self.block_id as u8);
        payload.extend_from_slice(&block);
        self.block_id = self.block_id.wrapping_add(1);
        self.info_sent = false;
        Ok(payload)
    }
}

/// Handle to the background sender. Owns the thread; the thread owns the
/// radio.
pub struct FileSender {
    terminated: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    stats: Arc<TransferStats>,
}

impl FileSender {
    /// Prepare the transfer and start the broadcast thread. Preparation
    /// failures (unreadable name, compression, encoder create) are fatal
    /// and reported here, before anything is emitted.
    pub fn start(
        radio: Radio,
        file_path: &str,
        file_bytes: &[u8],
        terminated: Arc<AtomicBool>,
    ) -> Result<FileSender> {
        let state = SenderState::prepare(file_path, file_bytes)?;
        let stats = Arc::new(TransferStats::new());
        stats.set_total(state.total_blocks());

        let flag = Arc::clone(&terminated);
        let thread_stats = Arc::clone(&stats);
        let thread = thread::Builder::new()
            .name("skylift-send".into())
            .spawn(move || {
                if let Err(e) = run_sender(radio, state, &flag, &thread_stats) {
                    error!("sender loop failed: {e}");
                }
                flag.store(true, Ordering::Release);
            })
            .map_err(TransferError::Spawn)?;

        Ok(FileSender {
            terminated,
            thread: Some(thread),
            stats,
        })
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> Arc<TransferStats> {
        Arc::clone(&self.stats)
    }

    /// Stop the loop and join the thread; the thread releases the radio on
    /// its way out. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.terminated.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for FileSender {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_sender(
    mut radio: Radio,
    mut state: SenderState,
    terminated: &AtomicBool,
    stats: &TransferStats,
) -> Result<()> {
    debug!("sender loop started");

    while !terminated.load(Ordering::Acquire) {
        let payload = state.next_packet()?;
        let is_data = payload.len() == DATA_BYTES;
        radio.send(&payload)?;
        if is_data {
            stats.on_block_emitted();
        }

        let backlog = radio.send_queue_bytes()?;
        if backlog > 0 {
            debug!(backlog, "uart send queue backed up");
        }
        thread::sleep(PACING_INTERVAL);
    }

    debug!("sender loop stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{classify, Packet};

    #[test]
    fn info_rides_ahead_of_every_32nd_block() {
        let mut state = SenderState::prepare("demo.bin", &[0xAB; 600]).unwrap();

        let mut data_seen = 0u32;
        for step in 0..100 {
            let payload = state.next_packet().unwrap();
            match classify(&payload) {
                Some(Packet::Info(info)) => {
                    assert_eq!(step % 33, 0, "info packet off cadence at step {step}");
                    assert_eq!(info.current_block_id, data_seen);
                }
                Some(Packet::Data { truncated_id, .. }) => {
                    assert_eq!(truncated_id, data_seen as u8);
                    data_seen += 1;
                }
                None => panic!("sender emitted a bogon at step {step}"),
            }
        }
    }

    #[test]
    fn name_keeps_last_path_component() {
        let state = SenderState::prepare("/tmp/nested/dir/report.txt", b"contents").unwrap();
        // The name is embedded in the inner payload; verify via the info
        // header by rebuilding the expected hash.
        let inner = build_inner("report.txt", b"contents").unwrap();
        assert_eq!(state.info.integrity_hash, integrity_hash(&inner));
        assert_eq!(state.info.decompressed_len, inner.len() as u32);
    }
}
