/// Receiver: listen, buffer, decode, validate, deliver.
///
/// Flow:
///   1. Poll the radio; every CRC-valid payload is classified by length
///   2. Info packets (re)initialize the decoder and pin the block counter
///   3. Data packets arriving before any metadata are buffered verbatim and
///      replayed once the first info packet lands
///   4. When the decoder reports recovery: trim the pad block, decompress,
///      check length and integrity hash, parse the name header, deliver
///   5. 20 s of radio silence mid-transfer resets everything so a restarted
///      sender starts clean
///
/// All state lives on the receiver thread; observers get progress through
/// the event callback (fired on this thread, so do not block it) and the
/// atomic stats.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use skylift_radio::Radio;
use tracing::{debug, error, info, warn};

use crate::codec::{expand_block_id, trim_pad, BlockDecoder, BLOCK_BYTES};
use crate::packet::{classify, integrity_hash, parse_inner, InfoPacket, Packet};
use crate::stats::TransferStats;
use crate::{Result, TransferError};

/// Reset a half-finished transfer after this much radio silence.
const IDLE_RESET: Duration = Duration::from_secs(20);

/// Re-probe ambient noise this often while no transfer is in flight.
const AMBIENT_RESCAN: Duration = Duration::from_secs(30);

/// Sleep between radio polls.
const POLL_INTERVAL: Duration = Duration::from_millis(4);

/// Data packets buffered before the first info packet. A sender paces one
/// block per 100 ms and repeats metadata every 32 blocks, so a healthy link
/// never gets near this.
const EARLY_BLOCK_CAP: usize = 64;

/// Progress reports from the receiver thread.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// A fresh block was accepted; `progress` is received/total.
    Progress { received: u32, total: u32, progress: f32 },
    /// The file arrived intact. Terminal for this transfer.
    Complete { name: String, data: Vec<u8> },
}

pub type EventCallback = Box<dyn FnMut(TransferEvent) + Send>;

struct EarlyBlock {
    truncated_id: u8,
    block: Vec<u8>,
}

/// Packet-level receive state, independent of the radio so it can be driven
/// directly in tests.
pub struct ReceiverState {
    compressed_len: u32,
    decompressed_len: u32,
    integrity: u32,
    next_block_id: u32,
    total_blocks: u32,
    received_blocks: u32,
    early_blocks: Vec<EarlyBlock>,
    decoder: Option<BlockDecoder>,
    complete: bool,
    last_receive: Instant,
    stats: Arc<TransferStats>,
    on_event: EventCallback,
}

impl ReceiverState {
    pub fn new(stats: Arc<TransferStats>, on_event: EventCallback, now: Instant) -> Self {
        Self {
            compressed_len: 0,
            decompressed_len: 0,
            integrity: 0,
            next_block_id: 0,
            total_blocks: 0,
            received_blocks: 0,
            early_blocks: Vec::new(),
            decoder: None,
            complete: false,
            last_receive: now,
            stats,
            on_event,
        }
    }

    /// True when no transfer is in flight (safe to leave the channel for an
    /// ambient scan).
    pub fn idle(&self) -> bool {
        self.compressed_len == 0
    }

    /// Dispatch one CRC-valid payload.
    pub fn handle_payload(&mut self, payload: &[u8], now: Instant) {
        match classify(payload) {
            Some(Packet::Info(header)) => self.on_info(header, now),
            Some(Packet::Data { truncated_id, block }) => self.on_data(truncated_id, block, now),
            None => warn!(len = payload.len(), "ignoring bogon packet"),
        }
    }

    /// Reset transfer state after prolonged silence so a restarted sender
    /// finds a clean slate.
    pub fn check_idle(&mut self, now: Instant) {
        if self.compressed_len != 0 && now.duration_since(self.last_receive) > IDLE_RESET {
            info!("no packets for {IDLE_RESET:?}; resetting transfer state");
            self.compressed_len = 0;
            self.integrity = 0;
            self.next_block_id = 0;
            self.early_blocks.clear();
            self.decoder = None;
            self.complete = false;
        }
    }

    fn on_info(&mut self, header: InfoPacket, now: Instant) {
        self.last_receive = now;

        if header.compressed_len == 0 || header.decompressed_len < 2 {
            warn!(?header, "ignoring malformed info packet");
            return;
        }

        // The sender's counter is authoritative whenever we hear it.
        self.next_block_id = header.current_block_id;

        let same_transfer = header.compressed_len == self.compressed_len
            && header.integrity_hash == self.integrity
            && header.decompressed_len == self.decompressed_len;
        if same_transfer {
            return;
        }

        self.complete = false;
        self.decoder = match BlockDecoder::new(header.compressed_len as usize) {
            Ok(decoder) => Some(decoder),
            Err(e) => {
                warn!("decoder init failed: {e}");
                self.reset_transfer();
                return;
            }
        };
        self.compressed_len = header.compressed_len;
        self.integrity = header.integrity_hash;
        self.decompressed_len = header.decompressed_len;
        self.total_blocks = header.compressed_len.div_ceil(BLOCK_BYTES as u32);
        self.received_blocks = 0;
        self.stats.set_total(self.total_blocks as u64);

        info!(
            compressed = self.compressed_len,
            decompressed = self.decompressed_len,
            blocks = self.total_blocks,
            "new transfer announced"
        );
        self.emit(TransferEvent::Progress {
            received: 0,
            total: self.total_blocks,
            progress: 0.0,
        });

        // Replay anything that raced ahead of the metadata, in arrival
        // order and with each block's captured length.
        let early = std::mem::take(&mut self.early_blocks);
        if !early.is_empty() {
            debug!(count = early.len(), "replaying early blocks");
        }
        for block in early {
            self.on_data(block.truncated_id, &block.block, now);
        }
    }

    fn on_data(&mut self, truncated_id: u8, block: &[u8], now: Instant) {
        self.last_receive = now;

        if self.complete {
            return;
        }

        // No metadata yet: keep the block for replay.
        if self.compressed_len == 0 || self.decoder.is_none() {
            if self.early_blocks.len() >= EARLY_BLOCK_CAP {
                warn!("early block buffer full; dropping block");
                return;
            }
            self.early_blocks.push(EarlyBlock {
                truncated_id,
                block: block.to_vec(),
            });
            return;
        }

        self.next_block_id = expand_block_id(self.next_block_id, truncated_id);

        let submitted = match self.decoder.as_mut() {
            Some(decoder) => decoder.submit(self.next_block_id, block),
            None => return,
        };
        match submitted {
            Err(e) => {
                warn!(block_id = self.next_block_id, "decoder rejected block: {e}");
                self.reset_transfer();
            }
            Ok(None) => {
                self.received_blocks += 1;
                self.stats.on_block_received(self.received_blocks as u64);
                let progress = self.received_blocks as f32 / self.total_blocks.max(1) as f32;
                self.emit(TransferEvent::Progress {
                    received: self.received_blocks,
                    total: self.total_blocks,
                    progress,
                });
            }
            Ok(Some(recovered)) => self.finish(recovered),
        }
    }

    /// Recovery reported; run the validation chain and deliver.
    fn finish(&mut self, mut recovered: Vec<u8>) {
        trim_pad(&mut recovered);

        let inner = match zstd::bulk::decompress(&recovered, self.decompressed_len as usize) {
            Ok(inner) => inner,
            Err(e) => {
                warn!("decompression failed: {e}");
                self.reset_transfer();
                return;
            }
        };
        if inner.len() != self.decompressed_len as usize {
            warn!(
                got = inner.len(),
                expected = self.decompressed_len,
                "decompressed length mismatch"
            );
            self.reset_transfer();
            return;
        }
        if integrity_hash(&inner) != self.integrity {
            warn!("integrity hash mismatch; discarding transfer");
            self.reset_transfer();
            return;
        }
        let (name, file) = match parse_inner(&inner) {
            Some(parsed) => parsed,
            None => {
                warn!("malformed inner payload header");
                self.reset_transfer();
                return;
            }
        };

        info!(name = %name, bytes = file.len(), "file transfer complete");
        self.complete = true;
        self.received_blocks = self.total_blocks;
        self.stats.on_block_received(self.total_blocks as u64);
        let event = TransferEvent::Complete {
            name,
            data: file.to_vec(),
        };
        self.emit(event);
    }

    /// Forget the transfer in flight; the sender's periodic info packet
    /// will restart it.
    fn reset_transfer(&mut self) {
        self.compressed_len = 0;
        self.decoder = None;
    }

    fn emit(&mut self, event: TransferEvent) {
        (self.on_event)(event);
    }
}

/// Handle to the background receiver. Owns the thread; the thread owns the
/// radio.
pub struct FileReceiver {
    terminated: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    stats: Arc<TransferStats>,
}

impl FileReceiver {
    pub fn start(
        radio: Radio,
        terminated: Arc<AtomicBool>,
        on_event: EventCallback,
    ) -> Result<FileReceiver> {
        let stats = Arc::new(TransferStats::new());
        let state = ReceiverState::new(Arc::clone(&stats), on_event, Instant::now());

        let flag = Arc::clone(&terminated);
        let thread = thread::Builder::new()
            .name("skylift-recv".into())
            .spawn(move || {
                if let Err(e) = run_receiver(radio, state, &flag) {
                    error!("receiver loop failed: {e}");
                }
                flag.store(true, Ordering::Release);
            })
            .map_err(TransferError::Spawn)?;

        Ok(FileReceiver {
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

impl Drop for FileReceiver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_receiver(
    mut radio: Radio,
    mut state: ReceiverState,
    terminated: &AtomicBool,
) -> Result<()> {
    debug!("receiver loop started");
    let mut last_scan = Instant::now();

    while !terminated.load(Ordering::Acquire) {
        radio.receive(|payload| state.handle_payload(payload, Instant::now()))?;

        state.check_idle(Instant::now());

        if state.idle() && last_scan.elapsed() > AMBIENT_RESCAN {
            radio.scan_ambient_rssi(10)?;
            radio.drain()?;
            last_scan = Instant::now();
        }

        thread::sleep(POLL_INTERVAL);
    }

    debug!("receiver loop stopped");
    Ok(())
}
