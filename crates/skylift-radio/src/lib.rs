/// Skylift radio layer: Waveshare SX1262 LoRa HAT driver.
///
/// The HAT talks to the host over a 9600-baud UART plus two mode-select GPIO
/// lines (M0/M1). This crate owns that boundary: a raw serial wrapper, the
/// config/transmit mode machine, the length+CRC host framing, and the
/// self-resynchronizing inbound parser.

pub mod driver;
pub mod framing;
pub mod serial;

pub use driver::{Radio, RadioConfig, CHANNEL_COUNT, MONITOR_ADDRESS, PROBE_CHANNELS};
pub use framing::{encode_frame, FrameParser, FRAME_OVERHEAD, MAX_PAYLOAD};
pub use serial::SerialLink;

use thiserror::Error;

/// Errors surfaced by the radio layer.
///
/// CRC mismatches and desynchronized lengths are not errors; the inbound
/// parser resyncs over them silently and the driver drains the UART.
#[derive(Debug, Error)]
pub enum RadioError {
    #[error("gpio setup failed: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("serial i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("config register echo mismatch at offset {offset}")]
    ConfigMismatch { offset: u8 },

    #[error("ambient rssi query returned {0} bytes")]
    RssiResponse(usize),

    #[error("payload too large for one frame: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("short write: {written} of {expected} bytes accepted")]
    ShortWrite { written: usize, expected: usize },
}

pub type Result<T> = std::result::Result<T, RadioError>;
