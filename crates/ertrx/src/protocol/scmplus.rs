//! Standard Consumption Message Plus
//!
//! A 16-byte frame carrying a full 32-bit endpoint id. The fields form
//! a packed big-endian struct; a CCITT CRC over bytes 2..16 protects
//! the frame. Only protocol id `0x1E` is valid.

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;

use crate::checksum::Crc;
use crate::decode::{DecoderConfig, Frame, PacketConfig};
use crate::message::Message;
use crate::protocol::Parser;

/// Standard Consumption Message Plus
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScmPlus {
    #[serde(rename = "FrameSync")]
    pub frame_sync: u16,
    #[serde(rename = "ProtocolID")]
    pub protocol_id: u8,
    #[serde(rename = "EndpointType")]
    pub endpoint_type: u8,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: u32,
    #[serde(rename = "Consumption")]
    pub consumption: u32,
    #[serde(rename = "Tamper")]
    pub tamper: u16,
    #[serde(rename = "PacketCRC")]
    pub packet_crc: u16,
}

impl ScmPlus {
    pub(crate) fn from_frame(bytes: &[u8]) -> Self {
        Self {
            frame_sync: BigEndian::read_u16(&bytes[0..2]),
            protocol_id: bytes[2],
            endpoint_type: bytes[3],
            endpoint_id: BigEndian::read_u32(&bytes[4..8]),
            consumption: BigEndian::read_u32(&bytes[8..12]),
            tamper: BigEndian::read_u16(&bytes[12..14]),
            packet_crc: BigEndian::read_u16(&bytes[14..16]),
        }
    }

    /// Ordered record fields, shared by the CSV and XML encoders
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("FrameSync", format!("0x{:X}", self.frame_sync)),
            ("ProtocolID", format!("0x{:X}", self.protocol_id)),
            ("EndpointType", format!("0x{:X}", self.endpoint_type)),
            ("EndpointID", self.endpoint_id.to_string()),
            ("Consumption", self.consumption.to_string()),
            ("Tamper", format!("0x{:X}", self.tamper)),
            ("PacketCRC", format!("0x{:X}", self.packet_crc)),
        ]
    }
}

impl std::fmt::Display for ScmPlus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{ProtocolID:0x{:02X} EndpointType:0x{:02X} EndpointID:{:10} Consumption:{:10} Tamper:0x{:04X} PacketCRC:0x{:04X}}}",
            self.protocol_id,
            self.endpoint_type,
            self.endpoint_id,
            self.consumption,
            self.tamper,
            self.packet_crc
        )
    }
}

/// Parser for SCM+ frames
pub struct ScmPlusParser {
    crc: Crc,
    cfg: PacketConfig,
}

impl ScmPlusParser {
    pub fn new(chip_length: usize) -> Self {
        Self {
            crc: Crc::ccitt(),
            cfg: PacketConfig {
                protocol: "scm+",
                center_freq: 912_600_155,
                data_rate: 32768,
                chip_length,
                preamble_symbols: 16,
                packet_symbols: 16 * 8,
                preamble: "0001011010100011",
            },
        }
    }
}

impl Parser for ScmPlusParser {
    fn cfg(&self) -> &PacketConfig {
        &self.cfg
    }

    fn parse(&mut self, frames: &[Frame], _signal: &[f64], _cfg: &DecoderConfig) -> Vec<Message> {
        let mut msgs = Vec::new();

        for frame in frames {
            // If the checksum fails, bail.
            if !self.crc.verify(&frame.bytes[2..16]) {
                continue;
            }

            let scm = ScmPlus::from_frame(&frame.bytes);

            // If the EndpointID is 0 or ProtocolID is invalid, bail.
            if scm.endpoint_id == 0 || scm.protocol_id != 0x1E {
                continue;
            }

            msgs.push(Message::ScmPlus(scm));
        }

        msgs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn frame(protocol_id: u8, endpoint_id: u32) -> Vec<u8> {
        let mut bytes = vec![0u8; 16];
        BigEndian::write_u16(&mut bytes[0..2], 0x16A3);
        bytes[2] = protocol_id;
        bytes[3] = 0xAB;
        BigEndian::write_u32(&mut bytes[4..8], endpoint_id);
        BigEndian::write_u32(&mut bytes[8..12], 42_000);
        BigEndian::write_u16(&mut bytes[12..14], 0x0101);
        let crc = !Crc::ccitt().checksum(&bytes[2..14]);
        BigEndian::write_u16(&mut bytes[14..16], crc);
        bytes
    }

    #[test]
    fn test_parse_valid_frame() {
        let mut p = ScmPlusParser::new(72);
        let frames = [Frame {
            idx: 0,
            bytes: frame(0x1E, 0xDEAD_BEEF),
        }];

        let msgs = p.parse(&frames, &[], &DecoderConfig::default());
        assert_eq!(msgs.len(), 1);
        match &msgs[0] {
            Message::ScmPlus(scm) => {
                assert_eq!(scm.protocol_id, 0x1E);
                assert_eq!(scm.endpoint_id, 0xDEAD_BEEF);
                assert_eq!(scm.endpoint_type, 0xAB);
                assert_eq!(scm.consumption, 42_000);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_invalid_protocol_id_rejected() {
        let mut p = ScmPlusParser::new(72);
        let frames = [Frame {
            idx: 0,
            bytes: frame(0x00, 0xDEAD_BEEF),
        }];
        assert!(p.parse(&frames, &[], &DecoderConfig::default()).is_empty());
    }

    #[test]
    fn test_zero_endpoint_rejected() {
        let mut p = ScmPlusParser::new(72);
        let frames = [Frame {
            idx: 0,
            bytes: frame(0x1E, 0),
        }];
        assert!(p.parse(&frames, &[], &DecoderConfig::default()).is_empty());
    }

    #[test]
    fn test_corrupt_crc_rejected() {
        let mut p = ScmPlusParser::new(72);
        let mut bytes = frame(0x1E, 0xDEAD_BEEF);
        bytes[9] ^= 0x40;
        let frames = [Frame { idx: 0, bytes }];
        assert!(p.parse(&frames, &[], &DecoderConfig::default()).is_empty());
    }

    #[test]
    fn test_e2e_scmplus() {
        use crate::decode::Decoder;
        use crate::protocol::new_parser;
        use crate::testsig::SignalGen;

        let mut d = Decoder::new();
        d.register(new_parser("scm+", 8).unwrap());
        d.allocate();

        // The 16-bit frame sync doubles as the preamble, so the frame
        // bytes transmit as-is.
        let bytes = frame(0x1E, 0xDEAD_BEEF);
        let bits: Vec<u8> = bytes
            .iter()
            .flat_map(|&b| (0..8).rev().map(move |i| b >> i & 1))
            .collect();

        let mut gen = SignalGen::new(8, 55);
        let mut stream = gen.idle(d.cfg().block_size / 2);
        stream.extend(gen.modulate(&SignalGen::manchester(&bits)));
        stream.extend(gen.idle(d.cfg().buffer_length + 2 * d.cfg().block_size));

        let mut window = crate::filter::DigestWindow::new();
        let mut msgs = Vec::new();
        let block_bytes = d.cfg().block_size * 2;
        for block in stream.chunks_exact(block_bytes) {
            for msg in d.decode(block) {
                if window.check(&msg) {
                    msgs.push(msg);
                }
            }
            window.advance();
        }

        assert_eq!(msgs.len(), 1);
        match &msgs[0] {
            Message::ScmPlus(scm) => {
                assert_eq!(scm.endpoint_id, 0xDEAD_BEEF);
                assert_eq!(scm.protocol_id, 0x1E);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}


