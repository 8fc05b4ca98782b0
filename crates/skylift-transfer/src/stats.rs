/// Transfer counters shared between the engine thread and observers.
/// All fields are atomic for lock-free reads from the main thread.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct TransferStats {
    /// Blocks needed for the transfer in flight.
    pub total_blocks: AtomicU64,
    /// Distinct blocks accepted by the decoder so far.
    pub received_blocks: AtomicU64,
    /// Data blocks emitted by the sender so far.
    pub emitted_blocks: AtomicU64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_total(&self, blocks: u64) {
        self.total_blocks.store(blocks, Ordering::Relaxed);
        self.received_blocks.store(0, Ordering::Relaxed);
    }

    pub fn on_block_received(&self, received: u64) {
        self.received_blocks.store(received, Ordering::Relaxed);
    }

    pub fn on_block_emitted(&self) {
        self.emitted_blocks.fetch_add(1, Ordering::Relaxed);
    }

    /// Receive progress as a fraction 0.0 - 1.0.
    pub fn progress(&self) -> f64 {
        let total = self.total_blocks.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let received = self.received_blocks.load(Ordering::Relaxed);
        (received as f64 / total as f64).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_fraction() {
        let stats = TransferStats::new();
        assert_eq!(stats.progress(), 0.0);

        stats.set_total(10);
        stats.on_block_received(4);
        assert!((stats.progress() - 0.4).abs() < f64::EPSILON);

        stats.on_block_received(25);
        assert_eq!(stats.progress(), 1.0);
    }
}
