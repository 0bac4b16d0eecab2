//! Interval Data Message
//!
//! A 92-byte frame carrying 47 differential consumption intervals in
//! addition to the running total. A CCITT CRC over bytes 4..92
//! protects everything after the training sequence.

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;

use crate::checksum::Crc;
use crate::decode::{DecoderConfig, Frame, PacketConfig};
use crate::message::Message;
use crate::protocol::{bit_field, Parser};

/// Interval Data Message
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Idm {
    #[serde(rename = "Preamble")]
    pub preamble: u32,
    #[serde(rename = "PacketTypeID")]
    pub packet_type_id: u8,
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
    #[serde(rename = "ModuleProgrammingState")]
    pub module_programming_state: u8,
    #[serde(rename = "TamperCounters")]
    pub tamper_counters: Vec<u8>,
    #[serde(rename = "AsynchronousCounters")]
    pub asynchronous_counters: u16,
    #[serde(rename = "PowerOutageFlags")]
    pub power_outage_flags: Vec<u8>,
    #[serde(rename = "LastConsumptionCount")]
    pub last_consumption_count: u32,
    #[serde(rename = "DifferentialConsumptionIntervals")]
    pub differential_consumption_intervals: Vec<u16>,
    #[serde(rename = "TransmitTimeOffset")]
    pub transmit_time_offset: u16,
    #[serde(rename = "SerialNumberCRC")]
    pub serial_number_crc: u16,
    #[serde(rename = "PacketCRC")]
    pub packet_crc: u16,
}

impl Idm {
    pub(crate) fn from_frame(bytes: &[u8]) -> Self {
        // 47 intervals of 9 bits each, packed from bit 264.
        let mut intervals = Vec::with_capacity(47);
        let mut offset = 264;
        for _ in 0..47 {
            intervals.push(bit_field(bytes, offset, 9) as u16);
            offset += 9;
        }

        Self {
            preamble: BigEndian::read_u32(&bytes[0..4]),
            packet_type_id: bytes[4],
            packet_length: bytes[5],
            hamming_code: bytes[6],
            application_version: bytes[7],
            ert_type: bytes[8] & 0x0F,
            ert_serial_number: BigEndian::read_u32(&bytes[9..13]),
            consumption_interval_count: bytes[13],
            module_programming_state: bytes[14],
            tamper_counters: bytes[15..21].to_vec(),
            asynchronous_counters: BigEndian::read_u16(&bytes[21..23]),
            power_outage_flags: bytes[23..29].to_vec(),
            last_consumption_count: BigEndian::read_u32(&bytes[29..33]),
            differential_consumption_intervals: intervals,
            transmit_time_offset: BigEndian::read_u16(&bytes[86..88]),
            serial_number_crc: BigEndian::read_u16(&bytes[88..90]),
            packet_crc: BigEndian::read_u16(&bytes[90..92]),
        }
    }

    /// Ordered record fields, shared by the CSV and XML encoders
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("Preamble", format!("0x{:08X}", self.preamble)),
            ("PacketTypeID", format!("0x{:02X}", self.packet_type_id)),
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
                "ModuleProgrammingState",
                format!("0x{:02X}", self.module_programming_state),
            ),
            ("TamperCounters", hex_string(&self.tamper_counters)),
            (
                "AsynchronousCounters",
                format!("0x{:02X}", self.asynchronous_counters),
            ),
            ("PowerOutageFlags", hex_string(&self.power_outage_flags)),
            (
                "LastConsumptionCount",
                self.last_consumption_count.to_string(),
            ),
        ];
        fields.push((
            "DifferentialConsumptionIntervals",
            self.differential_consumption_intervals
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(" "),
        ));
        fields.push(("TransmitTimeOffset", self.transmit_time_offset.to_string()));
        fields.push((
            "SerialNumberCRC",
            format!("0x{:04X}", self.serial_number_crc),
        ));
        fields.push(("PacketCRC", format!("0x{:04X}", self.packet_crc)));
        fields
    }
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

impl std::fmt::Display for Idm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{Preamble:0x{:08X} PacketTypeID:0x{:02X} PacketLength:0x{:02X} HammingCode:0x{:02X} \
             ApplicationVersion:0x{:02X} ERTType:0x{:02X} ERTSerialNumber:{:10} \
             ConsumptionIntervalCount:{} ModuleProgrammingState:0x{:02X} TamperCounters:{} \
             AsynchronousCounters:0x{:02X} PowerOutageFlags:{} LastConsumptionCount:{} \
             DifferentialConsumptionIntervals:{:?} TransmitTimeOffset:{} \
             SerialNumberCRC:0x{:04X} PacketCRC:0x{:04X}}}",
            self.preamble,
            self.packet_type_id,
            self.packet_length,
            self.hamming_code,
            self.application_version,
            self.ert_type,
            self.ert_serial_number,
            self.consumption_interval_count,
            self.module_programming_state,
            hex_string(&self.tamper_counters),
            self.asynchronous_counters,
            hex_string(&self.power_outage_flags),
            self.last_consumption_count,
            self.differential_consumption_intervals,
            self.transmit_time_offset,
            self.serial_number_crc,
            self.packet_crc
        )
    }
}

/// Parser for IDM frames
pub struct IdmParser {
    crc: Crc,
    cfg: PacketConfig,
}

impl IdmParser {
    pub fn new(chip_length: usize) -> Self {
        Self {
            crc: Crc::ccitt(),
            cfg: PacketConfig {
                protocol: "idm",
                center_freq: 912_600_155,
                data_rate: 32768,
                chip_length,
                preamble_symbols: 32,
                packet_symbols: 92 * 8,
                preamble: "01010101010101010001011010100011",
            },
        }
    }
}

impl Parser for IdmParser {
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

            let idm = Idm::from_frame(&frame.bytes);

            // If the meter id is 0, bail.
            if idm.ert_serial_number == 0 {
                continue;
            }

            msgs.push(Message::Idm(idm));
        }

        msgs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn frame(serial: u32) -> Vec<u8> {
        let mut bytes = vec![0u8; 92];
        BigEndian::write_u32(&mut bytes[0..4], 0x5555_16A3);
        bytes[4] = 0x1C;
        bytes[5] = 0x5C;
        bytes[6] = 0xC6;
        bytes[7] = 0x04;
        bytes[8] = 0x07;
        BigEndian::write_u32(&mut bytes[9..13], serial);
        bytes[13] = 42;
        BigEndian::write_u32(&mut bytes[29..33], 123_456);
        // ninth interval, bits 264 + 8*9 .. +9
        let start = 264 + 72;
        for (i, bit) in [1u8, 0, 1, 1, 0, 0, 1, 0, 1].iter().enumerate() {
            let pos = start + i;
            bytes[pos >> 3] |= bit << (7 - (pos & 7));
        }
        BigEndian::write_u16(&mut bytes[86..88], 777);
        let crc = !Crc::ccitt().checksum(&bytes[4..90]);
        BigEndian::write_u16(&mut bytes[90..92], crc);
        bytes
    }

    #[test]
    fn test_parse_valid_frame() {
        let mut p = IdmParser::new(72);
        let frames = [Frame {
            idx: 0,
            bytes: frame(0x0012_D687),
        }];

        let msgs = p.parse(&frames, &[], &DecoderConfig::default());
        assert_eq!(msgs.len(), 1);
        match &msgs[0] {
            Message::Idm(idm) => {
                assert_eq!(idm.ert_serial_number, 0x0012_D687);
                assert_eq!(idm.ert_type, 0x07);
                assert_eq!(idm.consumption_interval_count, 42);
                assert_eq!(idm.last_consumption_count, 123_456);
                assert_eq!(idm.differential_consumption_intervals.len(), 47);
                assert_eq!(idm.differential_consumption_intervals[8], 0b1_0110_0101);
                assert_eq!(idm.transmit_time_offset, 777);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_zero_serial_rejected() {
        let mut p = IdmParser::new(72);
        let frames = [Frame {
            idx: 0,
            bytes: frame(0),
        }];
        assert!(p.parse(&frames, &[], &DecoderConfig::default()).is_empty());
    }

    #[test]
    fn test_corrupt_crc_rejected() {
        let mut p = IdmParser::new(72);
        let mut bytes = frame(0x0012_D687);
        bytes[50] ^= 0x01;
        let frames = [Frame { idx: 0, bytes }];
        assert!(p.parse(&frames, &[], &DecoderConfig::default()).is_empty());
    }
}


