//! # ertrx: ERT utility meter telemetry receiver
//!
//! This crate provides a demodulator and decoder for the burst telemetry
//! packets broadcast by utility meters in the 900 MHz ISM band. It consumes
//! raw interleaved unsigned 8-bit IQ sample blocks, such as those produced
//! by an `rtl_tcp` server, and recovers framed packets for one or more
//! on-air protocols:
//!
//! * **SCM**: Standard Consumption Message
//! * **SCM+**: Standard Consumption Message Plus
//! * **IDM**: Interval Data Message
//! * **NetIDM**: Net Meter Interval Data Message
//! * **R900**: Neptune R900 water meter message
//! * **R900BCD**: R900 with binary-coded-decimal consumption
//!
//! ## Example
//!
//! Create a [`Decoder`], register one parser per protocol of interest, and
//! feed it sample blocks:
//!
//! ```
//! use ertrx::{Decoder, new_parser};
//!
//! let mut decoder = Decoder::new();
//! decoder.register(new_parser("scm", 72).unwrap());
//! decoder.allocate();
//!
//! // `block` holds decoder.cfg().block_size complex samples as
//! // interleaved u8 I/Q pairs, read from an SDR front-end.
//! let block = vec![127u8; decoder.cfg().block_size * 2];
//! for msg in decoder.decode(&block) {
//!     println!("{}", msg);
//! }
//! ```
//!
//! Each call to [`Decoder::decode`] processes exactly one block. A sliding
//! buffer retains one packet's worth of history so that any packet whose
//! preamble begins within the newest block can be extracted without waiting
//! for more samples. Messages are only emitted for frames whose checksum
//! (BCH, CCITT CRC, or Reed-Solomon syndrome, depending on the protocol)
//! verifies, so noise does not produce output.
//!
//! The same packet is typically discovered in two adjacent blocks. Use
//! [`DigestWindow`] to suppress the duplicate, and a [`FilterChain`] to
//! select messages by meter id or type.

mod checksum;
mod decode;
mod filter;
mod gf;
mod message;
mod protocol;

#[cfg(test)]
pub(crate) mod testsig;

pub use checksum::Crc;
pub use decode::{Decoder, DecoderConfig, Frame, PacketConfig};
pub use filter::{
    DigestWindow, FilterChain, MessageFilter, MeterIdFilter, MeterTypeFilter, UniqueFilter,
};
pub use gf::Field;
pub use message::{Digest, LogMessage, Message};
pub use protocol::{new_parser, Parser, ProtocolError};
pub use protocol::{idm::Idm, netidm::NetIdm, r900::R900, scm::Scm, scmplus::ScmPlus};
