//! Decoded messages
//!
//! [`Message`] is the tagged union of every protocol's record type.
//! Common fields are exposed through capability accessors so the
//! filters and output encoders never need to match on the variant.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::protocol::idm::Idm;
use crate::protocol::netidm::NetIdm;
use crate::protocol::r900::R900;
use crate::protocol::scm::Scm;
use crate::protocol::scmplus::ScmPlus;

/// Timestamp format for plain and XML output
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// A decoded meter message
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    Scm(Scm),
    ScmPlus(ScmPlus),
    Idm(Idm),
    NetIdm(NetIdm),
    R900(R900),
    R900Bcd(R900),
}

impl Message {
    /// Short display name of the message type
    pub fn msg_type(&self) -> &'static str {
        match self {
            Message::Scm(_) => "SCM",
            Message::ScmPlus(_) => "SCM+",
            Message::Idm(_) => "IDM",
            Message::NetIdm(_) => "NetIDM",
            Message::R900(_) => "R900",
            Message::R900Bcd(_) => "R900BCD",
        }
    }

    /// The sending meter's identifier
    pub fn meter_id(&self) -> u32 {
        match self {
            Message::Scm(m) => m.id,
            Message::ScmPlus(m) => m.endpoint_id,
            Message::Idm(m) => m.ert_serial_number,
            Message::NetIdm(m) => m.ert_serial_number,
            Message::R900(m) | Message::R900Bcd(m) => m.id,
        }
    }

    /// The sending meter's commodity type
    pub fn meter_type(&self) -> u8 {
        match self {
            Message::Scm(m) => m.typ,
            Message::ScmPlus(m) => m.endpoint_type,
            Message::Idm(m) => m.ert_type,
            Message::NetIdm(m) => m.ert_type,
            Message::R900(m) | Message::R900Bcd(m) => m.meter_type,
        }
    }

    /// The transmitted checksum bytes
    ///
    /// Together with the meter id this uniquely identifies one
    /// transmission for duplicate suppression.
    pub fn checksum(&self) -> Vec<u8> {
        match self {
            Message::Scm(m) => m.checksum.to_be_bytes().to_vec(),
            Message::ScmPlus(m) => m.packet_crc.to_be_bytes().to_vec(),
            Message::Idm(m) => m.packet_crc.to_be_bytes().to_vec(),
            Message::NetIdm(m) => m.packet_crc.to_be_bytes().to_vec(),
            Message::R900(m) | Message::R900Bcd(m) => m.checksum.to_vec(),
        }
    }

    /// Ordered record fields for the CSV and XML encoders
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        match self {
            Message::Scm(m) => m.fields(),
            Message::ScmPlus(m) => m.fields(),
            Message::Idm(m) => m.fields(),
            Message::NetIdm(m) => m.fields(),
            Message::R900(m) | Message::R900Bcd(m) => m.fields(),
        }
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use std::fmt::Display;
        match self {
            Message::Scm(m) => Display::fmt(m, f),
            Message::ScmPlus(m) => Display::fmt(m, f),
            Message::Idm(m) => Display::fmt(m, f),
            Message::NetIdm(m) => Display::fmt(m, f),
            Message::R900(m) | Message::R900Bcd(m) => Display::fmt(m, f),
        }
    }
}

/// Uniquely identifies a message spanning two sample blocks
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Digest {
    pub msg_type: &'static str,
    pub meter_type: u8,
    pub meter_id: u32,
    pub checksum: Vec<u8>,
}

impl From<&Message> for Digest {
    fn from(msg: &Message) -> Self {
        Self {
            msg_type: msg.msg_type(),
            meter_type: msg.meter_type(),
            meter_id: msg.meter_id(),
            checksum: msg.checksum(),
        }
    }
}

/// A message bound to a point in time and a position in the sample dump
#[derive(Clone, Debug, Serialize)]
pub struct LogMessage {
    #[serde(rename = "Time")]
    pub time: DateTime<Utc>,
    #[serde(rename = "Offset")]
    pub offset: u64,
    #[serde(rename = "Length")]
    pub length: usize,
    #[serde(rename = "Type")]
    pub msg_type: &'static str,
    #[serde(rename = "Message")]
    pub message: Message,
}

impl LogMessage {
    pub fn new(offset: u64, length: usize, message: Message) -> Self {
        Self {
            time: Utc::now(),
            offset,
            length,
            msg_type: message.msg_type(),
            message,
        }
    }

    /// Plain text rendering
    ///
    /// The offset and length fields only mean anything when samples
    /// are being dumped to a file, and are omitted otherwise.
    pub fn plain(&self, with_offset: bool) -> String {
        if with_offset {
            format!(
                "{{Time:{} Offset:{} Length:{} {}:{}}}",
                self.time.format(TIME_FORMAT),
                self.offset,
                self.length,
                self.message.msg_type(),
                self.message
            )
        } else {
            format!(
                "{{Time:{} {}:{}}}",
                self.time.format(TIME_FORMAT),
                self.message.msg_type(),
                self.message
            )
        }
    }
}

impl std::fmt::Display for LogMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.plain(true))
    }
}
