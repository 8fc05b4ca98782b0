/// Raw byte pipe to a UART device.
///
/// The HAT is half duplex and loses bytes mid-frame, so nothing here may
/// block for long: reads poll `bytes_available` first and pull exactly that
/// many. Recovery from transient faults is the caller's job (drain, not
/// close).

use std::io::{Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::{RadioError, Result};

/// Receive timeout for the rare blocking read path.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    /// Open `device` at `baud`, 8-N-1, no flow control.
    pub fn open(device: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(device, baud)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()?;
        Ok(Self { port })
    }

    /// Discard anything queued in both directions.
    pub fn flush_queues(&mut self) -> Result<()> {
        self.port.clear(ClearBuffer::All)?;
        Ok(())
    }

    /// Write the whole buffer; anything short of full acceptance is an error.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let written = self.port.write(data)?;
        if written != data.len() {
            return Err(RadioError::ShortWrite {
                written,
                expected: data.len(),
            });
        }
        self.port.flush()?;
        Ok(())
    }

    /// Bytes waiting in the OS receive queue.
    pub fn bytes_available(&mut self) -> Result<usize> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    /// Bytes still queued for transmission.
    pub fn output_queue_bytes(&mut self) -> Result<usize> {
        Ok(self.port.bytes_to_write()? as usize)
    }

    /// Read up to `buf.len()` bytes, returning how many arrived (may be 0).
    pub fn read_up_to(&mut self, buf: &mut [u8]) -> Result<usize> {
        let available = self.bytes_available()?;
        if available == 0 {
            return Ok(0);
        }
        let want = available.min(buf.len());
        let got = self.port.read(&mut buf[..want])?;
        Ok(got)
    }
}
