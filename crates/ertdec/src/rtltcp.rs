//! rtl_tcp client
//!
//! Wraps the TCP protocol spoken by the `rtl_tcp` spectrum server.
//! On connect the server sends a 12-byte dongle info record; after
//! that it streams interleaved u8 IQ samples continuously while
//! accepting 5-byte tuner commands in the other direction.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use log::info;

const DONGLE_MAGIC: &[u8; 4] = b"RTL0";

// How long a sample read may stall before the transport is considered
// dead.
const READ_DEADLINE: Duration = Duration::from_secs(5);

// Command opcodes defined in rtl_tcp.c.
const CENTER_FREQ: u8 = 1;
const SAMPLE_RATE: u8 = 2;
const TUNER_GAIN_MODE: u8 = 3;
const TUNER_GAIN: u8 = 4;
const FREQ_CORRECTION: u8 = 5;
const TUNER_IF_GAIN: u8 = 6;
const TEST_MODE: u8 = 7;
const AGC_MODE: u8 = 8;
const DIRECT_SAMPLING: u8 = 9;
const OFFSET_TUNING: u8 = 10;
const RTL_XTAL_FREQ: u8 = 11;
const TUNER_XTAL_FREQ: u8 = 12;
const GAIN_BY_INDEX: u8 = 13;

/// Tuner chip reported by the dongle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tuner {
    E4000,
    Fc0012,
    Fc0013,
    Fc2580,
    R820T,
    R828D,
    Unknown,
}

impl From<u32> for Tuner {
    fn from(id: u32) -> Self {
        match id {
            1 => Tuner::E4000,
            2 => Tuner::Fc0012,
            3 => Tuner::Fc0013,
            4 => Tuner::Fc2580,
            5 => Tuner::R820T,
            6 => Tuner::R828D,
            _ => Tuner::Unknown,
        }
    }
}

impl std::fmt::Display for Tuner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Tuner::E4000 => "E4000",
            Tuner::Fc0012 => "FC0012",
            Tuner::Fc0013 => "FC0013",
            Tuner::Fc2580 => "FC2580",
            Tuner::R820T => "R820T",
            Tuner::R828D => "R828D",
            Tuner::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Dongle information sent by the server on connect
#[derive(Clone, Copy, Debug)]
pub struct DongleInfo {
    pub tuner: Tuner,
    /// Number of valid gain indices for gain-by-index selection
    pub gain_count: u32,
}

impl DongleInfo {
    /// Parse the 12-byte on-wire record, checking the magic number
    pub fn parse(raw: &[u8; 12]) -> io::Result<Self> {
        if &raw[0..4] != DONGLE_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "invalid magic number: expected {:?} received {:?}",
                    DONGLE_MAGIC,
                    &raw[0..4]
                ),
            ));
        }
        Ok(Self {
            tuner: Tuner::from(BigEndian::read_u32(&raw[4..8])),
            gain_count: BigEndian::read_u32(&raw[8..12]),
        })
    }
}

// A command frame: opcode plus big-endian parameter.
fn command(op: u8, param: u32) -> [u8; 5] {
    let mut frame = [0u8; 5];
    frame[0] = op;
    BigEndian::write_u32(&mut frame[1..], param);
    frame
}

/// Connection to an rtl_tcp server
///
/// Commands are short writes issued before the sample read loop
/// starts, so the one stream serves both directions without races.
pub struct Sdr {
    stream: TcpStream,
    info: DongleInfo,
}

impl Sdr {
    /// Connect and read the dongle info record
    pub fn connect(addr: &str) -> io::Result<Self> {
        let mut stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(READ_DEADLINE))?;

        let mut raw = [0u8; 12];
        stream.read_exact(&mut raw)?;
        let info = DongleInfo::parse(&raw)?;

        info!("Tuner: {}", info.tuner);
        Ok(Self { stream, info })
    }

    pub fn info(&self) -> &DongleInfo {
        &self.info
    }

    /// Read exactly one sample block
    ///
    /// Blocks until `buf` is full. A read that stalls past the
    /// deadline or hits end-of-stream is an error; the caller treats
    /// either as fatal.
    pub fn read_block(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.stream.read_exact(buf)
    }

    fn execute(&mut self, op: u8, param: u32) -> io::Result<()> {
        self.stream.write_all(&command(op, param))
    }

    /// Set the center frequency in Hz
    pub fn set_center_freq(&mut self, freq: u32) -> io::Result<()> {
        self.execute(CENTER_FREQ, freq)
    }

    /// Set the sample rate in Hz
    pub fn set_sample_rate(&mut self, rate: u32) -> io::Result<()> {
        self.execute(SAMPLE_RATE, rate)
    }

    /// Set the tuner gain mode: true for manual, false for automatic
    pub fn set_tuner_gain_mode(&mut self, manual: bool) -> io::Result<()> {
        self.execute(TUNER_GAIN_MODE, manual as u32)
    }

    /// Set the tuner gain in tenths of dB (197 is 19.7 dB)
    pub fn set_tuner_gain(&mut self, gain: u32) -> io::Result<()> {
        self.execute(TUNER_GAIN, gain)
    }

    /// Set the frequency correction in ppm
    pub fn set_freq_correction(&mut self, ppm: u32) -> io::Result<()> {
        self.execute(FREQ_CORRECTION, ppm)
    }

    /// Set a tuner intermediate frequency stage gain
    #[allow(dead_code)]
    pub fn set_tuner_if_gain(&mut self, stage: u16, gain: u16) -> io::Result<()> {
        self.execute(TUNER_IF_GAIN, (stage as u32) << 16 | gain as u32)
    }

    /// Enable or disable test mode
    pub fn set_test_mode(&mut self, on: bool) -> io::Result<()> {
        self.execute(TEST_MODE, on as u32)
    }

    /// Enable or disable the RTL AGC
    pub fn set_agc_mode(&mut self, on: bool) -> io::Result<()> {
        self.execute(AGC_MODE, on as u32)
    }

    /// Enable or disable direct sampling
    pub fn set_direct_sampling(&mut self, on: bool) -> io::Result<()> {
        self.execute(DIRECT_SAMPLING, on as u32)
    }

    /// Enable or disable offset tuning
    pub fn set_offset_tuning(&mut self, on: bool) -> io::Result<()> {
        self.execute(OFFSET_TUNING, on as u32)
    }

    /// Set the RTL crystal frequency
    pub fn set_rtl_xtal_freq(&mut self, freq: u32) -> io::Result<()> {
        self.execute(RTL_XTAL_FREQ, freq)
    }

    /// Set the tuner crystal frequency
    pub fn set_tuner_xtal_freq(&mut self, freq: u32) -> io::Result<()> {
        self.execute(TUNER_XTAL_FREQ, freq)
    }

    /// Select a tuner gain by index
    pub fn set_gain_by_index(&mut self, idx: u32) -> io::Result<()> {
        if idx >= self.info.gain_count {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid gain index: {}", idx),
            ));
        }
        self.execute(GAIN_BY_INDEX, idx)
    }

    /// Shut down the sample stream
    pub fn close(&mut self) -> io::Result<()> {
        self.stream.shutdown(std::net::Shutdown::Both)
    }
}
