//! Net Meter Interval Data Message
//!
//! Shares its framing with IDM but carries net-metering totals
//! (generation as well as consumption) and 27 wider differential
//! intervals. In addition to the packet CRC, the serial number is
//! independently protected: the CCITT checksum over bytes 9..13
//! concatenated with bytes 88..90 must also verify.

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;

use crate::checksum::Crc;
use crate::decode::{DecoderConfig, Frame, PacketConfig};
use crate::message::Message;
use crate::protocol::{bit_field, Parser};

/// Net Meter Interval Data Message
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NetIdm {
    #[serde(rename = "Preamble")]
    pub preamble: u32,
    #[serde(rename = "ProtocolID")]
    pub protocol_id: u8,
    #[serde(rename = "PacketLength")]
    pub packet_length: u8,
    #[serde(rename = "HammingCode")]
    pub hamming_code: u8,
    #[serde(rename = "ApplicationVersion")]
    pub application_version: u8,
    #[serde(rename = "ERTType")]
    pub ert_type: u8,
    #[serde(rename = "ERTSerialNumber")]
    pub ert_serial_number: u32,
    #[serde(rename = "ConsumptionIntervalCount")]
    pub consumption_interval_count: u8,
    #[serde(rename = "ProgrammingState")]
    pub programming_state: u8,
    #[serde(rename = "LastGeneration")]
    pub last_generation: u32,
    #[serde(rename = "LastConsumption")]
    pub last_consumption: u32,
    #[serde(rename = "LastConsumptionNet")]
    pub last_consumption_net: u32,
    #[serde(rename = "DifferentialConsumptionIntervals")]
    pub differential_consumption_intervals: Vec<u16>,
    #[serde(rename = "TransmitTimeOffset")]
    pub transmit_time_offset: u16,
    #[serde(rename = "SerialNumberCRC")]
    pub serial_number_crc: u16,
    #[serde(rename = "PacketCRC")]
    pub packet_crc: u16,
}

impl NetIdm {
    pub(crate) fn from_frame(bytes: &[u8]) -> Self {
        // 27 intervals of 14 bits each, packed from bit 304.
        let mut intervals = Vec::with_capacity(27);
        let mut offset = 38 << 3;
        for _ in 0..27 {
            intervals.push(bit_field(bytes, offset, 14) as u16);
            offset += 14;
        }

        Self {
            preamble: BigEndian::read_u32(&bytes[0..4]),
            protocol_id: bytes[4],
            packet_length: bytes[5],
            hamming_code: bytes[6],
            application_version: bytes[7],
            ert_type: bytes[8] & 0x0F,
            ert_serial_number: BigEndian::read_u32(&bytes[9..13]),
            consumption_interval_count: bytes[13],
            programming_state: bytes[14],
            last_consumption: (bytes[25] as u32) << 16 | (bytes[26] as u32) << 8 | bytes[27] as u32,
            last_generation: (bytes[28] as u32) << 16 | (bytes[29] as u32) << 8 | bytes[30] as u32,
            last_consumption_net: BigEndian::read_u32(&bytes[34..38]),
            differential_consumption_intervals: intervals,
            transmit_time_offset: BigEndian::read_u16(&bytes[86..88]),
            serial_number_crc: BigEndian::read_u16(&bytes[88..90]),
            packet_crc: BigEndian::read_u16(&bytes[90..92]),
        }
    }

    /// Ordered record fields, shared by the CSV and XML encoders
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Preamble", format!("0x{:08X}", self.preamble)),
            ("ProtocolID", format!("0x{:02X}", self.protocol_id)),
            ("PacketLength", format!("0x{:02X}", self.packet_length)),
            ("HammingCode", format!("0x{:02X}", self.hamming_code)),
            (
                "ApplicationVersion",
                format!("0x{:02X}", self.application_version),
            ),
            ("ERTType", format!("0x{:02X}", self.ert_type)),
            ("ERTSerialNumber", self.ert_serial_number.to_string()),
            (
                "ConsumptionIntervalCount",
                self.consumption_interval_count.to_string(),
            ),
            (
                "ProgrammingState",
                format!("0x{:02X}", self.programming_state),
            ),
            ("LastGeneration", self.last_generation.to_string()),
            ("LastConsumption", self.last_consumption.to_string()),
            ("LastConsumptionNet", self.last_consumption_net.to_string()),
            (
                "DifferentialConsumptionIntervals",
                self.differential_consumption_intervals
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            ("TransmitTimeOffset", self.transmit_time_offset.to_string()),
            (
                "SerialNumberCRC",
                format!("0x{:04X}", self.serial_number_crc),
            ),
            ("PacketCRC", format!("0x{:04X}", self.packet_crc)),
        ]
    }
}

impl std::fmt::Display for NetIdm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{Preamble:0x{:08X} ProtocolID:0x{:02X} PacketLength:0x{:02X} HammingCode:0x{:02X} \
             ApplicationVersion:0x{:02X} ERTType:0x{:02X} ERTSerialNumber:{:10} \
             ConsumptionIntervalCount:{} ProgrammingState:0x{:02X} LastGeneration:{} \
             LastConsumption:{} LastConsumptionNet:{} DifferentialConsumptionIntervals:{:?} \
             TransmitTimeOffset:{} SerialNumberCRC:0x{:04X} PacketCRC:0x{:04X}}}",
            self.preamble,
            self.protocol_id,
            self.packet_length,
            self.hamming_code,
            self.application_version,
            self.ert_type,
            self.ert_serial_number,
            self.consumption_interval_count,
            self.programming_state,
            self.last_generation,
            self.last_consumption,
            self.last_consumption_net,
            self.differential_consumption_intervals,
            self.transmit_time_offset,
            self.serial_number_crc,
            self.packet_crc
        )
    }
}

/// Parser for NetIDM frames
pub struct NetIdmParser {
    crc: Crc,
    cfg: PacketConfig,
    // scratch for the serial-number integrity span
    serial: [u8; 6],
}

impl NetIdmParser {
    pub fn new(chip_length: usize) -> Self {
        Self {
            crc: Crc::ccitt(),
            cfg: PacketConfig {
                protocol: "netidm",
                center_freq: 912_600_155,
                data_rate: 32768,
                chip_length,
                preamble_symbols: 32,
                packet_symbols: 92 * 8,
                preamble: "01010101010101010001011010100011",
            },
            serial: [0u8; 6],
        }
    }
}

impl Parser for NetIdmParser {
    fn cfg(&self) -> &PacketConfig {
        &self.cfg
    }

    fn parse(&mut self, frames: &[Frame], _signal: &[f64], _cfg: &DecoderConfig) -> Vec<Message> {
        let mut msgs = Vec::new();

        for frame in frames {
            // If the checksum fails, bail.
            if !self.crc.verify(&frame.bytes[4..92]) {
                continue;
            }

            // If the serial checksum fails, bail.
            self.serial[..4].copy_from_slice(&frame.bytes[9..13]);
            self.serial[4..].copy_from_slice(&frame.bytes[88..90]);
            if !self.crc.verify(&self.serial) {
                continue;
            }

            let netidm = NetIdm::from_frame(&frame.bytes);

            // If the meter id is 0, bail.
            if netidm.ert_serial_number == 0 {
                continue;
            }

            msgs.push(Message::NetIdm(netidm));
        }

        msgs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(serial: u32) -> Vec<u8> {
        let mut bytes = vec![0u8; 92];
        BigEndian::write_u32(&mut bytes[0..4], 0x5555_16A3);
        bytes[4] = 0x1C;
        bytes[8] = 0x0B;
        BigEndian::write_u32(&mut bytes[9..13], serial);
        bytes[13] = 27;
        bytes[25] = 0x01;
        bytes[26] = 0xE2;
        bytes[27] = 0x40;
        bytes[28] = 0x00;
        bytes[29] = 0x10;
        bytes[30] = 0x00;
        BigEndian::write_u32(&mut bytes[34..38], 98_765);

        // serial integrity span: bytes[9..13] || bytes[88..90]
        let serial_crc = !Crc::ccitt().checksum(&bytes[9..13]);
        BigEndian::write_u16(&mut bytes[88..90], serial_crc);

        let crc = !Crc::ccitt().checksum(&bytes[4..90]);
        BigEndian::write_u16(&mut bytes[90..92], crc);
        bytes
    }

    #[test]
    fn test_parse_valid_frame() {
        let mut p = NetIdmParser::new(72);
        let frames = [Frame {
            idx: 0,
            bytes: frame(1_234_567),
        }];

        let msgs = p.parse(&frames, &[], &DecoderConfig::default());
        assert_eq!(msgs.len(), 1);
        match &msgs[0] {
            Message::NetIdm(m) => {
                assert_eq!(m.ert_serial_number, 1_234_567);
                assert_eq!(m.ert_type, 0x0B);
                assert_eq!(m.last_consumption, 123_456);
                assert_eq!(m.last_generation, 4_096);
                assert_eq!(m.last_consumption_net, 98_765);
                assert_eq!(m.differential_consumption_intervals.len(), 27);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_bad_serial_crc_rejected() {
        let mut p = NetIdmParser::new(72);
        let mut bytes = frame(1_234_567);
        // corrupt the serial CRC and repair the packet CRC so only the
        // secondary check fails
        bytes[88] ^= 0xFF;
        let crc = !Crc::ccitt().checksum(&bytes[4..90]);
        BigEndian::write_u16(&mut bytes[90..92], crc);

        let frames = [Frame { idx: 0, bytes }];
        assert!(p.parse(&frames, &[], &DecoderConfig::default()).is_empty());
    }

    #[test]
    fn test_zero_serial_rejected() {
        let mut p = NetIdmParser::new(72);
        let frames = [Frame {
            idx: 0,
            bytes: frame(0),
        }];
        assert!(p.parse(&frames, &[], &DecoderConfig::default()).is_empty());
    }
}


