/// Waveshare SX1262 LoRa HAT driver.
///
/// The HAT has two persistent modes selected by the M1 GPIO line: config
/// (M1 high, registers readable/writable over the UART) and transmit
/// (M1 low, the UART carries air traffic). M0 stays low. Register writes use
/// a `C2 offset len <bytes>` command that the module echoes back with a `C1`
/// header; the echo must match byte-for-byte.
///
/// Address 0xFFFF is the monitor address: it receives all traffic on the
/// channel but the module silently drops transmissions. The driver keeps the
/// programmed address lazily in sync: send flips to the transmit address,
/// receive flips to monitor, only when needed.

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use rppal::gpio::{Gpio, OutputPin};
use tracing::{debug, info, warn};

use crate::framing::{encode_frame, FrameParser, MAX_PAYLOAD};
use crate::serial::SerialLink;
use crate::{RadioError, Result};

/// Channels the module can tune (850.125 + ch MHz).
pub const CHANNEL_COUNT: usize = 84;

/// Channels probed by the ambient noise scan.
pub const PROBE_CHANNELS: [u8; 4] = [16, 32, 48, 64];

/// Receive-only broadcast address.
pub const MONITOR_ADDRESS: u16 = 0xFFFF;

// Mode-select GPIO lines (BCM numbering).
const M0_PIN: u8 = 22;
const M1_PIN: u8 = 27;

const UART_BAUD: u32 = 9600;

/// Module boot time after the first mode select.
const BOOT_SETTLE: Duration = Duration::from_millis(1000);

/// Settle time after toggling M1.
const MODE_SETTLE: Duration = Duration::from_millis(100);

/// How long to wait for a config echo before giving up on polling.
const ECHO_TIMEOUT: Duration = Duration::from_secs(5);
const ECHO_POLL: Duration = Duration::from_millis(10);

/// Register image defaults (offsets 2..=8 after the 16-bit address).
const NET_ID: u8 = 0x00;
const UART_AIR: u8 = 0x62; // 9600 baud, 8N1, 62.5 kbps air rate
const BUFFER_POWER: u8 = 0x00; // 240-byte sub-packets, 22 dBm
const AMBIENT_BIT: u8 = 0x20; // noise-RSSI readout enable in the buffer/power byte
const OPTION_BITS: u8 = 0x03; // RSSI byte appended to received packets
const OPTION_LBT: u8 = 0x10;
const KEY_HI: u8 = 0x00;
const KEY_LO: u8 = 0x00;

const READ_RSSI_CMD: [u8; 6] = [0xC0, 0xC1, 0xC2, 0xC3, 0x00, 0x01];

const DEFAULT_RSSI_RETRIES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Config,
    Transmit,
}

/// Initial radio settings.
#[derive(Debug, Clone)]
pub struct RadioConfig {
    pub device: String,
    pub channel: u8,
    pub transmit_address: u16,
    pub lbt: bool,
}

pub struct Radio {
    serial: Option<SerialLink>,
    _m0: OutputPin,
    m1: OutputPin,
    device: String,
    mode: Mode,
    channel: u8,
    transmit_address: u16,
    current_address: u16,
    parser: FrameParser,
    /// Ambient noise per channel, raw module units (dBm * 2). Only the
    /// probe channels are populated.
    pub channel_rssi_raw: [u8; CHANNEL_COUNT],
    /// Ambient noise per channel in dBm (positive magnitude).
    pub channel_rssi_dbm: [f32; CHANNEL_COUNT],
}

impl Radio {
    /// Bring the module up: configure the register image, scan ambient
    /// noise, and leave the module in transmit mode on the operating
    /// channel. Any failure here is fatal.
    pub fn initialize(config: RadioConfig) -> Result<Radio> {
        info!(device = %config.device, channel = config.channel, "entering config mode");

        let gpio = Gpio::new()?;
        let m0 = gpio.get(M0_PIN)?.into_output_low();
        let m1 = gpio.get(M1_PIN)?.into_output_high();
        thread::sleep(BOOT_SETTLE);

        let mut serial = SerialLink::open(&config.device, UART_BAUD)?;
        serial.flush_queues()?;

        let mut radio = Radio {
            serial: Some(serial),
            _m0: m0,
            m1,
            device: config.device,
            mode: Mode::Config,
            channel: config.channel,
            transmit_address: config.transmit_address,
            current_address: config.transmit_address,
            parser: FrameParser::new(),
            channel_rssi_raw: [0; CHANNEL_COUNT],
            channel_rssi_dbm: [0.0; CHANNEL_COUNT],
        };

        let addr = config.transmit_address;
        let image = [
            (addr >> 8) as u8,
            addr as u8,
            NET_ID,
            UART_AIR,
            BUFFER_POWER,
            config.channel,
            OPTION_BITS | if config.lbt { OPTION_LBT } else { 0 },
            KEY_HI,
            KEY_LO,
        ];
        radio.write_config(0, &image)?;

        radio.scan_ambient_rssi(DEFAULT_RSSI_RETRIES)?;

        radio.transition(Mode::Transmit)?;
        radio.drain()?;

        info!("LoRa radio ready");
        Ok(radio)
    }

    /// Send one payload (1..=235 bytes) as a single framed packet.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        if payload.is_empty() || payload.len() > MAX_PAYLOAD {
            return Err(RadioError::PayloadTooLarge(payload.len()));
        }
        let addr = self.transmit_address;
        self.set_address(addr)?;
        self.transition(Mode::Transmit)?;

        let frame = encode_frame(payload);
        self.link()?.write(&frame)
    }

    /// Pull everything the UART has and deliver each CRC-valid frame to
    /// `on_packet`, in wire order. Returns once the UART runs dry.
    pub fn receive<F: FnMut(&[u8])>(&mut self, mut on_packet: F) -> Result<()> {
        self.set_address(MONITOR_ADDRESS)?;
        self.transition(Mode::Transmit)?;

        let mut chunk = [0u8; 256];
        loop {
            let got = self.link()?.read_up_to(&mut chunk)?;
            if got == 0 {
                break;
            }
            let mut offset = 0;
            while offset < got {
                offset += self.parser.push(&chunk[offset..got]);
                self.parser.parse(&mut on_packet);
            }
        }
        Ok(())
    }

    /// Retune the operating channel.
    pub fn set_channel(&mut self, channel: u8) -> Result<()> {
        self.write_channel(channel, false)?;
        self.channel = channel;
        Ok(())
    }

    /// Probe the ambient noise floor on each channel in `PROBE_CHANNELS`,
    /// keeping the per-channel maximum over up to 10 readings, then restore
    /// the operating channel.
    pub fn scan_ambient_rssi(&mut self, retries: usize) -> Result<()> {
        info!("ambient noise scan started");
        for &ch in PROBE_CHANNELS.iter() {
            self.write_channel(ch, true)?;

            let mut max_raw = 0u8;
            for _ in 0..retries.clamp(1, DEFAULT_RSSI_RETRIES) {
                max_raw = max_raw.max(self.read_ambient_rssi()?);
            }
            self.channel_rssi_raw[ch as usize] = max_raw;
            self.channel_rssi_dbm[ch as usize] = max_raw as f32 * 0.5;
        }

        let operating = self.channel;
        self.write_channel(operating, false)?;

        let readings: Vec<String> = PROBE_CHANNELS
            .iter()
            .map(|&ch| format!("ch{}={}", ch, self.channel_rssi_dbm[ch as usize]))
            .collect();
        info!("ambient noise scan completed: {} (dBm noise)", readings.join(" "));
        Ok(())
    }

    /// Read and discard input until the UART goes quiet, then reset the
    /// frame parser. Called after mode changes and by the engine on resets.
    pub fn drain(&mut self) -> Result<()> {
        let mut sink = [0u8; 256];
        loop {
            let got = self.link()?.read_up_to(&mut sink)?;
            if got == 0 {
                break;
            }
        }
        self.parser.clear();
        Ok(())
    }

    /// Bytes still queued toward the module.
    pub fn send_queue_bytes(&mut self) -> Result<usize> {
        self.link()?.output_queue_bytes()
    }

    fn link(&mut self) -> Result<&mut SerialLink> {
        self.serial.as_mut().ok_or_else(|| {
            RadioError::Io(io::Error::new(io::ErrorKind::NotConnected, "serial port closed"))
        })
    }

    /// Switch modes if not already there: close the port, toggle M1, wait
    /// for the module to settle, reopen.
    fn transition(&mut self, mode: Mode) -> Result<()> {
        if self.mode == mode {
            return Ok(());
        }
        self.serial = None;
        match mode {
            Mode::Config => self.m1.set_high(),
            Mode::Transmit => self.m1.set_low(),
        }
        thread::sleep(MODE_SETTLE);

        let mut link = SerialLink::open(&self.device, UART_BAUD)?;
        link.flush_queues()?;
        self.serial = Some(link);
        self.parser.clear();
        self.mode = mode;
        debug!(?mode, "radio mode switched");
        Ok(())
    }

    fn set_address(&mut self, addr: u16) -> Result<()> {
        if self.current_address == addr {
            return Ok(());
        }
        self.write_config(0, &[(addr >> 8) as u8, addr as u8])?;
        self.current_address = addr;
        Ok(())
    }

    fn write_channel(&mut self, channel: u8, ambient: bool) -> Result<()> {
        let buffer_byte = if ambient { BUFFER_POWER | AMBIENT_BIT } else { BUFFER_POWER };
        self.write_config(4, &[buffer_byte, channel])
    }

    /// Write `data` at register `offset` and verify the module's echo.
    fn write_config(&mut self, offset: u8, data: &[u8]) -> Result<()> {
        self.transition(Mode::Config)?;

        let mut cmd = Vec::with_capacity(3 + data.len());
        cmd.push(0xC2);
        cmd.push(offset);
        cmd.push(data.len() as u8);
        cmd.extend_from_slice(data);
        self.link()?.write(&cmd)?;

        let needed = cmd.len();
        self.wait_for_bytes(needed, offset)?;

        let mut echo = [0u8; 64];
        let got = self.link()?.read_up_to(&mut echo[..needed])?;
        if got != needed || echo[0] != 0xC1 || echo[1..needed] != cmd[1..needed] {
            return Err(RadioError::ConfigMismatch { offset });
        }
        Ok(())
    }

    /// One register read the module supports in transmit mode: the ambient
    /// noise RSSI, returned as the fourth byte of the response.
    fn read_ambient_rssi(&mut self) -> Result<u8> {
        self.transition(Mode::Transmit)?;
        self.link()?.write(&READ_RSSI_CMD)?;
        self.wait_for_bytes(4, 0)?;

        let mut resp = [0u8; 4];
        let got = self.link()?.read_up_to(&mut resp)?;
        if got < 4 {
            return Err(RadioError::RssiResponse(got));
        }
        Ok(resp[3])
    }

    /// Poll until at least `needed` bytes are queued. Expiry is only a
    /// warning; the module often answers late and the read still succeeds.
    fn wait_for_bytes(&mut self, needed: usize, offset: u8) -> Result<()> {
        let start = Instant::now();
        while self.link()?.bytes_available()? < needed {
            if start.elapsed() > ECHO_TIMEOUT {
                warn!(offset, needed, "module response timed out; reading anyway");
                break;
            }
            thread::sleep(ECHO_POLL);
        }
        Ok(())
    }
}
