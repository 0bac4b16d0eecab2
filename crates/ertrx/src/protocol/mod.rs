//! Protocol parsers
//!
//! A [`Parser`] advertises its radio configuration and turns candidate
//! frames into typed [`Message`]s. Parsers are constructed explicitly
//! by name with [`new_parser`] and registered on the decoder; several
//! protocols may share a preamble (IDM and NetIDM, R900 and R900BCD),
//! in which case each registered parser sees every candidate frame for
//! that preamble.
//!
//! Parsers never fail: a frame that does not verify simply produces no
//! message.

pub mod idm;
pub mod netidm;
pub mod r900;
pub mod scm;
pub mod scmplus;

use thiserror::Error;

use crate::decode::{DecoderConfig, Frame, PacketConfig};
use crate::message::Message;

/// A protocol parser
pub trait Parser {
    /// The protocol's radio configuration
    fn cfg(&self) -> &PacketConfig;

    /// Receive the merged decoder configuration
    ///
    /// Called once by [`Decoder::allocate`](crate::Decoder::allocate);
    /// parsers that keep per-sample scratch buffers size them here.
    fn configure(&mut self, _cfg: &DecoderConfig) {}

    /// Translate candidate frames into messages
    ///
    /// `signal` is the decoder's magnitude buffer: one packet of
    /// history followed by the newest block, aligned such that the
    /// bit decision at index `i` was made from the window starting at
    /// `signal[i - symbol_length]`.
    fn parse(&mut self, frames: &[Frame], signal: &[f64], cfg: &DecoderConfig) -> Vec<Message>;
}

/// Protocol construction errors
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The message type given to [`new_parser`] is not recognized
    #[error("invalid message type: {0:?}")]
    UnknownProtocol(String),
}

/// Construct a parser by protocol name
///
/// Recognized names are `scm`, `scm+`, `idm`, `netidm`, `r900`, and
/// `r900bcd`. `chip_length` is the number of samples per Manchester
/// chip, common to every registered protocol.
pub fn new_parser(name: &str, chip_length: usize) -> Result<Box<dyn Parser>, ProtocolError> {
    match name {
        "scm" => Ok(Box::new(scm::ScmParser::new(chip_length))),
        "scm+" => Ok(Box::new(scmplus::ScmPlusParser::new(chip_length))),
        "idm" => Ok(Box::new(idm::IdmParser::new(chip_length))),
        "netidm" => Ok(Box::new(netidm::NetIdmParser::new(chip_length))),
        "r900" => Ok(Box::new(r900::R900Parser::new(chip_length))),
        "r900bcd" => Ok(Box::new(r900::R900Parser::new_bcd(chip_length))),
        _ => Err(ProtocolError::UnknownProtocol(name.to_string())),
    }
}

// Extract `len` bits (MSB-first) starting at bit `start` of `bytes`.
pub(crate) fn bit_field(bytes: &[u8], start: usize, len: usize) -> u64 {
    debug_assert!(len <= 64);
    let mut out = 0u64;
    for bit in start..start + len {
        out = out << 1 | (bytes[bit >> 3] >> (7 - (bit & 7)) & 1) as u64;
    }
    out
}
