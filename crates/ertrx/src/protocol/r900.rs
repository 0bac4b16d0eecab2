//! Neptune R900 water meter messages
//!
//! R900 does not use plain Manchester symbols: each payload position
//! carries one of six four-chip patterns, the three base patterns
//! `1100`, `1010`, `1001` and their inverses. The parser therefore
//! re-filters the decoder's magnitude buffer with all three kernels
//! and picks the strongest by absolute value; the sign selects the
//! inverse. Pairs of the resulting base-6 digits form GF(32) symbols,
//! and a Reed-Solomon syndrome over five parity symbols gates the
//! frame.
//!
//! The R900BCD variant is identical on the air but reports its
//! consumption register in binary-coded decimal.

use std::collections::HashSet;

use serde::Serialize;

use crate::decode::{DecoderConfig, Frame, PacketConfig};
use crate::gf::Field;
use crate::message::Message;
use crate::protocol::Parser;

// On-air payload positions per packet, one four-chip pattern each;
// digit pairs yield 21 GF(32) symbols (16 info + 5 checksum).
const PAYLOAD_SYMBOLS: usize = 42;

/// R900 consumption message
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct R900 {
    #[serde(rename = "ID")]
    pub id: u32,
    #[serde(rename = "Unkn1")]
    pub unkn1: u8,
    #[serde(rename = "AmrType")]
    pub meter_type: u8,
    #[serde(rename = "Unkn2")]
    pub unkn2: u8,
    /// Day bins of no use
    #[serde(rename = "NoUse")]
    pub no_use: u8,
    /// Backflow in the past 35 days, high/low
    #[serde(rename = "BackFlow")]
    pub back_flow: u8,
    #[serde(rename = "Consumption")]
    pub consumption: u32,
    /// Day bins of leak
    #[serde(rename = "Leak")]
    pub leak: u8,
    /// Leak in the past 24 hours, high/low
    #[serde(rename = "LeakNow")]
    pub leak_now: u8,
    #[serde(skip)]
    pub(crate) checksum: [u8; 5],
}

impl R900 {
    /// Ordered record fields, shared by the CSV and XML encoders
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("ID", self.id.to_string()),
            ("Unkn1", self.unkn1.to_string()),
            ("AmrType", self.meter_type.to_string()),
            ("Unkn2", self.unkn2.to_string()),
            ("NoUse", self.no_use.to_string()),
            ("BackFlow", self.back_flow.to_string()),
            ("Consumption", self.consumption.to_string()),
            ("Leak", self.leak.to_string()),
            ("LeakNow", self.leak_now.to_string()),
        ]
    }
}

impl std::fmt::Display for R900 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{ID:{:10} Unkn1:0x{:02X} MeterType:{:02} Unkn2:0x{:02X} NoUse:{:2} BackFlow:{:1} \
             Consumption:{:8} Leak:{:2} LeakNow:{:1}}}",
            self.id,
            self.unkn1,
            self.meter_type,
            self.unkn2,
            self.no_use,
            self.back_flow,
            self.consumption,
            self.leak,
            self.leak_now
        )
    }
}

/// Parser for R900 and R900BCD frames
pub struct R900Parser {
    cfg: PacketConfig,
    field: Field,
    bcd: bool,

    // scratch, sized at configure()
    csum: Vec<f64>,
    filtered: Vec<[f64; 3]>,
    quantized: Vec<u8>,
    rs: [u8; 31],
}

impl R900Parser {
    pub fn new(chip_length: usize) -> Self {
        Self::with_bcd(chip_length, false)
    }

    /// The BCD variant reports consumption in binary-coded decimal
    pub fn new_bcd(chip_length: usize) -> Self {
        Self::with_bcd(chip_length, true)
    }

    fn with_bcd(chip_length: usize, bcd: bool) -> Self {
        Self {
            cfg: PacketConfig {
                protocol: if bcd { "r900bcd" } else { "r900" },
                center_freq: 912_380_000,
                data_rate: 32768,
                chip_length,
                preamble_symbols: 32,
                packet_symbols: 116,
                preamble: "00000000000000001110010101100100",
            },
            // GF of order 32, polynomial 37, generator 2.
            field: Field::new(32, 37, 2),
            bcd,
            csum: Vec::new(),
            filtered: Vec::new(),
            quantized: Vec::new(),
            rs: [0u8; 31],
        }
    }

    // Convolve the three base chip patterns with the signal. The
    // cumulative sum reduces each chip sum to a subtraction; the
    // kernel expressions below are the algebraically collapsed
    // differences for 1100, 1010 and 1001.
    fn filter(&mut self, signal: &[f64], cfg: &DecoderConfig) {
        let chip = cfg.chip_length;

        let mut sum = 0f64;
        self.csum[0] = 0f64;
        for (idx, &v) in signal.iter().enumerate() {
            sum += v;
            self.csum[idx + 1] = sum;
        }

        for idx in 0..cfg.buffer_length - chip * 4 {
            let c0 = self.csum[idx];
            let c1 = self.csum[idx + chip] * 2.0;
            let c2 = self.csum[idx + chip * 2] * 2.0;
            let c3 = self.csum[idx + chip * 3] * 2.0;
            let c4 = self.csum[idx + chip * 4];

            self.filtered[idx] = [
                c2 - c4 - c0,           // 1100
                c1 - c2 + c3 - c4 - c0, // 1010
                c1 - c3 + c4 - c0,      // 1001
            ];
        }
    }

    // Pick the symbol present at each sample: the kernel with the
    // largest absolute response, plus three when the sign selects the
    // non-inverted pattern.
    //
    //   0: 0011   3: 1100
    //   1: 0101   4: 1010
    //   2: 0110   5: 1001
    fn quantize(&mut self, cfg: &DecoderConfig) {
        let chip = cfg.chip_length;
        for (idx, vec) in self.filtered[..cfg.buffer_length - chip * 4].iter().enumerate() {
            let mut argmax = 0u8;
            let mut max = vec[0].abs();

            if vec[1].abs() > max {
                max = vec[1].abs();
                argmax = 1;
            }
            if vec[2].abs() > max {
                argmax = 2;
            }

            self.quantized[idx] = argmax;
            if vec[argmax as usize] > 0.0 {
                self.quantized[idx] += 3;
            }
        }
    }
}

impl Parser for R900Parser {
    fn cfg(&self) -> &PacketConfig {
        &self.cfg
    }

    fn configure(&mut self, cfg: &DecoderConfig) {
        self.csum = vec![0f64; cfg.buffer_length + 1];
        self.filtered = vec![[0f64; 3]; cfg.buffer_length];
        self.quantized = vec![0u8; cfg.buffer_length];
    }

    fn parse(&mut self, frames: &[Frame], signal: &[f64], cfg: &DecoderConfig) -> Vec<Message> {
        self.filter(signal, cfg);
        self.quantize(cfg);

        let chip = cfg.chip_length;
        let preamble_length = self.cfg.preamble_symbols * cfg.symbol_length;

        let mut msgs = Vec::new();
        let mut seen: HashSet<[u8; 21]> = HashSet::new();

        for frame in frames {
            if frame.idx > cfg.block_size {
                break;
            }

            // The payload follows the preamble; candidate indices are
            // one symbol ahead of the magnitude buffer.
            let payload_idx = frame.idx + preamble_length - cfg.symbol_length;

            // One base-6 digit per four-chip position.
            let mut digits = [0u8; PAYLOAD_SYMBOLS];
            for (n, digit) in digits.iter_mut().enumerate() {
                *digit = self.quantized[payload_idx + n * chip * 4];
            }

            // Digit pairs form GF(32) symbols; a pair above 31 cannot
            // be part of a valid codeword.
            let mut symbols = [0u8; 21];
            let mut bad_symbol = false;
            for (n, symbol) in symbols.iter_mut().enumerate() {
                let value = digits[n << 1] * 6 + digits[n << 1 | 1];
                if value > 31 {
                    bad_symbol = true;
                    break;
                }
                *symbol = value;
            }

            if bad_symbol || !seen.insert(symbols) {
                continue;
            }

            // 16 info symbols and 5 checksum symbols of a 31-symbol
            // Reed-Solomon block.
            self.rs.fill(0);
            self.rs[..16].copy_from_slice(&symbols[..16]);
            self.rs[26..].copy_from_slice(&symbols[16..]);
            if self.field.syndrome(&self.rs, 5, 29).iter().any(|&s| s != 0) {
                continue;
            }

            // Unpack the 5-bit symbols into a bit string.
            let mut bits = [0u8; 105];
            for (n, &symbol) in symbols.iter().enumerate() {
                for b in 0..5 {
                    bits[n * 5 + b] = symbol >> (4 - b) & 1;
                }
            }
            let field = |start: usize, len: usize| -> u32 {
                bits[start..start + len]
                    .iter()
                    .fold(0u32, |acc, &b| acc << 1 | b as u32)
            };

            let mut consumption = field(72, 3) << 24 | field(48, 24);
            if self.bcd {
                // Reinterpret the hexadecimal digits as decimal.
                consumption =
                    u32::from_str_radix(&format!("{:x}", consumption), 10).unwrap_or(0);
            }

            let mut msg = R900 {
                id: field(0, 32),
                unkn1: field(32, 4) as u8,
                meter_type: field(36, 4) as u8,
                unkn2: field(40, 3) as u8,
                no_use: field(43, 3) as u8,
                back_flow: field(46, 2) as u8,
                consumption,
                leak: field(75, 3) as u8,
                leak_now: field(78, 2) as u8,
                checksum: [0u8; 5],
            };
            msg.checksum.copy_from_slice(&symbols[16..]);

            msgs.push(if self.bcd {
                Message::R900Bcd(msg)
            } else {
                Message::R900(msg)
            });
        }

        msgs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::Decoder;
    use crate::protocol::new_parser;
    use crate::testsig::SignalGen;

    // Solve for the five parity symbols that complete `info` into a
    // valid codeword: 5 linear equations over GF(32), one per
    // syndrome, eliminated directly.
    pub(crate) fn rs_encode(field: &Field, info: &[u8; 16]) -> [u8; 21] {
        let mut mat = [[0u8; 6]; 5]; // augmented [A | b]

        for (j, row) in mat.iter_mut().enumerate() {
            let x = field.exp((29 + j) as i32);
            let mut powers = [0u8; 31];
            powers[0] = 1;
            for t in 1..31 {
                powers[t] = field.mul(powers[t - 1], x);
            }

            // parity symbols sit at block positions 26..31, so they
            // multiply x^4 .. x^0
            for m in 0..5 {
                row[m] = powers[4 - m];
            }
            let mut rhs = 0u8;
            for (k, &v) in info.iter().enumerate() {
                rhs ^= field.mul(v, powers[30 - k]);
            }
            row[5] = rhs;
        }

        // Gaussian elimination
        for col in 0..5 {
            let pivot = (col..5)
                .find(|&r| mat[r][col] != 0)
                .expect("singular parity system");
            mat.swap(col, pivot);
            let inv = field.inv(mat[col][col]);
            for c in col..6 {
                mat[col][c] = field.mul(mat[col][c], inv);
            }
            for r in 0..5 {
                if r != col && mat[r][col] != 0 {
                    let factor = mat[r][col];
                    for c in col..6 {
                        mat[r][c] ^= field.mul(factor, mat[col][c]);
                    }
                }
            }
        }

        let mut symbols = [0u8; 21];
        symbols[..16].copy_from_slice(info);
        for m in 0..5 {
            symbols[16 + m] = mat[m][5];
        }
        symbols
    }

    // Pack message fields into the 16 info symbols.
    pub(crate) fn info_symbols(
        id: u32,
        meter_type: u8,
        consumption: u32,
    ) -> [u8; 16] {
        let mut bits = [0u8; 80];
        let mut set = |start: usize, len: usize, value: u64| {
            for i in 0..len {
                bits[start + i] = (value >> (len - 1 - i) & 1) as u8;
            }
        };
        set(0, 32, id as u64);
        set(36, 4, meter_type as u64);
        set(48, 24, (consumption & 0xFF_FFFF) as u64);
        set(72, 3, (consumption >> 24) as u64);

        let mut info = [0u8; 16];
        for (n, symbol) in info.iter_mut().enumerate() {
            *symbol = bits[n * 5..n * 5 + 5]
                .iter()
                .fold(0u8, |acc, &b| acc << 1 | b);
        }
        info
    }

    // Chip patterns for one base-6 digit.
    fn digit_chips(digit: u8) -> [u8; 4] {
        match digit {
            0 => [0, 0, 1, 1],
            1 => [0, 1, 0, 1],
            2 => [0, 1, 1, 0],
            3 => [1, 1, 0, 0],
            4 => [1, 0, 1, 0],
            _ => [1, 0, 0, 1],
        }
    }

    pub(crate) fn r900_chips(symbols: &[u8; 21]) -> Vec<u8> {
        let preamble: Vec<u8> = "00000000000000001110010101100100"
            .bytes()
            .map(|b| (b == b'1') as u8)
            .collect();
        let mut chips = SignalGen::manchester(&preamble);
        for &symbol in symbols {
            chips.extend(digit_chips(symbol / 6));
            chips.extend(digit_chips(symbol % 6));
        }
        chips
    }

    #[test]
    fn test_rs_encode_round_trip() {
        let field = Field::new(32, 37, 2);
        let info = info_symbols(1_550_129_171, 7, 0x1234);
        let symbols = rs_encode(&field, &info);

        let mut rs = [0u8; 31];
        rs[..16].copy_from_slice(&symbols[..16]);
        rs[26..].copy_from_slice(&symbols[16..]);
        assert_eq!(field.syndrome(&rs, 5, 29), vec![0u8; 5]);
    }

    #[test]
    fn test_e2e_r900_and_bcd() {
        let mut d = Decoder::new();
        d.register(new_parser("r900", 8).unwrap());
        d.register(new_parser("r900bcd", 8).unwrap());
        d.allocate();

        let field = Field::new(32, 37, 2);
        let symbols = rs_encode(&field, &info_symbols(1_550_129_171, 7, 0x1234));

        let mut gen = SignalGen::new(8, 77);
        let mut stream = gen.idle(d.cfg().block_size / 4);
        stream.extend(gen.modulate(&r900_chips(&symbols)));
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

        assert_eq!(msgs.len(), 2, "got {:?}", msgs);
        match (&msgs[0], &msgs[1]) {
            (Message::R900(plain), Message::R900Bcd(bcd)) => {
                assert_eq!(plain.id, 1_550_129_171);
                assert_eq!(plain.meter_type, 7);
                assert_eq!(plain.consumption, 0x1234);
                assert_eq!(bcd.id, 1_550_129_171);
                assert_eq!(bcd.consumption, 1234);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_corrupt_codeword_rejected() {
        let mut d = Decoder::new();
        d.register(new_parser("r900", 8).unwrap());
        d.allocate();

        let field = Field::new(32, 37, 2);
        let mut symbols = rs_encode(&field, &info_symbols(99_999, 3, 500));
        symbols[4] ^= 0x11; // damage one info symbol

        let mut gen = SignalGen::new(8, 78);
        let mut stream = gen.idle(d.cfg().block_size / 4);
        stream.extend(gen.modulate(&r900_chips(&symbols)));
        stream.extend(gen.idle(d.cfg().buffer_length + 2 * d.cfg().block_size));

        let block_bytes = d.cfg().block_size * 2;
        let mut count = 0;
        for block in stream.chunks_exact(block_bytes) {
            count += d.decode(block).len();
        }
        assert_eq!(count, 0);
    }
}


