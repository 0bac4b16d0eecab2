//! Demodulation and framing pipeline
//!
//! The [`Decoder`] turns blocks of raw interleaved u8 IQ samples into
//! candidate frames and hands them to the registered protocol parsers.
//! Every sample passes through the same stages exactly once:
//!
//! 1. complex magnitude approximation via a 256-entry lookup table
//! 2. a matched filter for Manchester-coded chips, fused with the hard
//!    bit decision
//! 3. a multi-offset preamble search over the bit-decision buffer
//! 4. frame extraction: one bit per symbol from each preamble offset
//!
//! A sliding buffer retains one packet's worth of magnitude and
//! bit-decision history, so a preamble that begins anywhere in the
//! newest block is always followed by a complete packet.

#[cfg(not(test))]
use log::info;

#[cfg(test)]
use std::println as info;

use crate::message::Message;
use crate::protocol::Parser;

/// Per-protocol radio configuration
///
/// Registered with the decoder by each parser. All lengths are in
/// samples unless suffixed `_symbols`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketConfig {
    /// Short protocol identifier, e.g. `"scm"`
    pub protocol: &'static str,

    /// Preferred tuning frequency (Hz)
    pub center_freq: u32,

    /// Nominal symbol rate (Hz)
    pub data_rate: u32,

    /// Samples per Manchester chip (half a symbol)
    pub chip_length: usize,

    /// Symbols occupied by the preamble
    pub preamble_symbols: usize,

    /// Total payload symbols, preamble included
    pub packet_symbols: usize,

    /// Post-Manchester preamble as ASCII `'0'`/`'1'`, one bit per symbol
    pub preamble: &'static str,
}

/// Merged radio configuration with derived lengths
///
/// Built by [`Decoder::allocate`] from every registered parser: rates
/// and symbol counts take the maximum across protocols, so the shared
/// buffers are always large enough for the longest packet.
#[derive(Clone, Debug, Default)]
pub struct DecoderConfig {
    /// Tuning frequency (Hz), from the last registered protocol
    pub center_freq: u32,
    /// Symbol rate (Hz)
    pub data_rate: u32,
    /// Samples per chip
    pub chip_length: usize,
    /// Samples per symbol, `2 * chip_length`
    pub symbol_length: usize,
    /// `data_rate * chip_length`
    pub sample_rate: u32,

    /// Symbols in the longest registered preamble
    pub preamble_symbols: usize,
    /// Symbols in the longest registered packet
    pub packet_symbols: usize,
    /// `preamble_symbols * symbol_length`
    pub preamble_length: usize,
    /// `packet_symbols * symbol_length`
    pub packet_length: usize,

    /// Samples consumed per call to [`Decoder::decode`]; the next power
    /// of two at or above `preamble_length`
    pub block_size: usize,
    /// `packet_length + block_size`
    pub buffer_length: usize,
}

/// A candidate byte-aligned frame
///
/// `idx` is the sample offset of the preamble within the bit-decision
/// buffer; parsers that resample the magnitude buffer (R900) use it to
/// locate the payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Sample index the preamble was found at
    pub idx: usize,
    /// Packet bits packed MSB-first, `ceil(packet_symbols / 8)` bytes
    pub bytes: Vec<u8>,
}

// One registered preamble pattern and the parsers that share it.
struct PreambleGroup {
    // preamble as numeric 0/1 bytes, one per symbol
    bits: Vec<u8>,
    // indices into Decoder::parsers, in registration order
    parsers: Vec<usize>,
}

/// Magnitude lookup table demodulator
///
/// Maps each u8 sample value to its normalized squared deviation from
/// the converter's DC offset; the magnitude of a complex sample is
/// the sum over its I and Q components. The square root is omitted:
/// downstream stages only compare sums of magnitudes, so a monotonic
/// map preserves every decision.
#[derive(Clone)]
pub(crate) struct MagLut {
    lut: [f64; 256],
}

impl MagLut {
    pub fn new() -> Self {
        let mut lut = [0f64; 256];
        for (idx, entry) in lut.iter_mut().enumerate() {
            let v = (127.5 - idx as f64) / 127.5;
            *entry = v * v;
        }
        Self { lut }
    }

    /// Demodulate interleaved u8 IQ pairs into magnitudes
    ///
    /// `input` must hold exactly `2 * output.len()` bytes.
    pub fn execute(&self, input: &[u8], output: &mut [f64]) {
        for (idx, out) in output.iter_mut().enumerate() {
            *out = self.lut[input[idx << 1] as usize] + self.lut[input[idx << 1 | 1] as usize];
        }
    }
}

/// The demodulation and framing pipeline
///
/// Create with [`new`](Decoder::new), [`register`](Decoder::register)
/// one parser per protocol, then call [`allocate`](Decoder::allocate)
/// once before the first [`decode`](Decoder::decode). All buffers are
/// allocated up front and reused for every block.
pub struct Decoder {
    cfg: DecoderConfig,

    // magnitude history: packet_length past samples + the newest block
    signal: Vec<f64>,
    // hard bit decisions, shifted in lockstep with `signal`
    quantized: Vec<u8>,
    // cumulative sum scratch for the matched filter
    csum: Vec<f64>,
    // magnitude demodulator
    demod: MagLut,

    // bit decisions packed 8:1 for preamble pruning
    packed: Vec<u8>,
    // ping-pong work sets for the preamble search
    index_a: Vec<usize>,
    index_b: Vec<usize>,
    // frame byte packer
    frame: Vec<u8>,

    parsers: Vec<Box<dyn Parser>>,
    preambles: Vec<PreambleGroup>,
}

impl Decoder {
    /// New decoder with no protocols registered
    pub fn new() -> Self {
        Self {
            cfg: DecoderConfig::default(),
            signal: Vec::new(),
            quantized: Vec::new(),
            csum: Vec::new(),
            demod: MagLut::new(),
            packed: Vec::new(),
            index_a: Vec::new(),
            index_b: Vec::new(),
            frame: Vec::new(),
            parsers: Vec::new(),
            preambles: Vec::new(),
        }
    }

    /// Register a protocol parser
    ///
    /// Must be called before [`allocate`](Decoder::allocate). Multiple
    /// parsers may share a preamble; each will see every candidate
    /// frame for it.
    pub fn register(&mut self, parser: Box<dyn Parser>) {
        let cfg = parser.cfg();

        // Take the largest value for each protocol; the center
        // frequency is simply overridden.
        self.cfg.center_freq = cfg.center_freq;
        self.cfg.data_rate = self.cfg.data_rate.max(cfg.data_rate);
        self.cfg.chip_length = self.cfg.chip_length.max(cfg.chip_length);
        self.cfg.preamble_symbols = self.cfg.preamble_symbols.max(cfg.preamble_symbols);
        self.cfg.packet_symbols = self.cfg.packet_symbols.max(cfg.packet_symbols);

        // Preamble as numeric bits, one byte per symbol.
        let bits: Vec<u8> = cfg.preamble.bytes().map(|b| (b == b'1') as u8).collect();

        let parser_idx = self.parsers.len();
        match self.preambles.iter_mut().find(|g| g.bits == bits) {
            Some(group) => group.parsers.push(parser_idx),
            None => self.preambles.push(PreambleGroup {
                bits,
                parsers: vec![parser_idx],
            }),
        }

        self.parsers.push(parser);
    }

    /// Derive lengths and allocate the internal buffers
    ///
    /// Call once, after every protocol is registered.
    pub fn allocate(&mut self) {
        self.cfg.symbol_length = self.cfg.chip_length << 1;
        self.cfg.sample_rate = self.cfg.data_rate * self.cfg.chip_length as u32;

        self.cfg.preamble_length = self.cfg.preamble_symbols * self.cfg.symbol_length;
        self.cfg.packet_length = self.cfg.packet_symbols * self.cfg.symbol_length;

        self.cfg.block_size = self.cfg.preamble_length.next_power_of_two();
        self.cfg.buffer_length = self.cfg.packet_length + self.cfg.block_size;

        self.signal = vec![0f64; self.cfg.buffer_length];
        self.quantized = vec![0u8; self.cfg.buffer_length];
        self.csum = vec![0f64; self.cfg.block_size + self.cfg.symbol_length + 1];

        self.packed = vec![0u8; (self.cfg.block_size + self.cfg.preamble_length + 7) >> 3];
        self.index_a = Vec::with_capacity(self.cfg.block_size);
        self.index_b = Vec::with_capacity(self.cfg.block_size);
        self.frame = vec![0u8; (self.cfg.packet_symbols + 7) >> 3];

        let cfg = self.cfg.clone();
        for parser in &mut self.parsers {
            parser.configure(&cfg);
        }
    }

    /// The merged configuration
    ///
    /// Lengths are only valid after [`allocate`](Decoder::allocate).
    pub fn cfg(&self) -> &DecoderConfig {
        &self.cfg
    }

    /// Log the merged configuration
    pub fn log(&self) {
        info!("CenterFreq: {}", self.cfg.center_freq);
        info!("SampleRate: {}", self.cfg.sample_rate);
        info!("DataRate: {}", self.cfg.data_rate);
        info!("ChipLength: {}", self.cfg.chip_length);
        info!("PreambleSymbols: {}", self.cfg.preamble_symbols);
        info!("PreambleLength: {}", self.cfg.preamble_length);
        info!("PacketSymbols: {}", self.cfg.packet_symbols);
        info!("PacketLength: {}", self.cfg.packet_length);
        info!("BlockSize: {}", self.cfg.block_size);

        let protocols: Vec<&str> = self.parsers.iter().map(|p| p.cfg().protocol).collect();
        info!("Protocols: {}", protocols.join(","));
    }

    /// Decode one sample block
    ///
    /// `input` must hold exactly `block_size` complex samples as
    /// interleaved u8 I/Q pairs. Returns every message whose frame was
    /// found in this block and passed its protocol's checksum, in
    /// registration order of the parsers and ascending sample order
    /// within each parser.
    pub fn decode(&mut self, input: &[u8]) -> Vec<Message> {
        debug_assert_eq!(input.len(), self.cfg.block_size << 1);

        // Shift buffers left to append the new block.
        self.signal.copy_within(self.cfg.block_size.., 0);
        self.quantized.copy_within(self.cfg.block_size.., 0);

        // Magnitude of the new block.
        let tail = self.cfg.packet_length;
        self.demod.execute(input, &mut self.signal[tail..]);

        // Matched filter and bit decision over the new block. The
        // first symbol_length magnitudes are carried over from the
        // previous block.
        self.filter();

        // Candidate frames per preamble group, computed once each.
        let mut frames: Vec<Vec<Frame>> = Vec::with_capacity(self.preambles.len());
        for group_idx in 0..self.preambles.len() {
            let bits = std::mem::take(&mut self.preambles[group_idx].bits);
            let mut indices = std::mem::take(&mut self.index_a);
            let mut scratch = std::mem::take(&mut self.index_b);

            self.search(&bits, &mut indices, &mut scratch);
            frames.push(self.slice(&indices));

            self.preambles[group_idx].bits = bits;
            self.index_a = indices;
            self.index_b = scratch;
        }

        // Run the parsers in registration order.
        let mut msgs = Vec::new();
        for (parser_idx, parser) in self.parsers.iter_mut().enumerate() {
            let group_idx = self
                .preambles
                .iter()
                .position(|g| g.parsers.contains(&parser_idx))
                .expect("parser registered without preamble");
            if frames[group_idx].is_empty() {
                continue;
            }
            msgs.extend(parser.parse(&frames[group_idx], &self.signal, &self.cfg));
        }

        msgs
    }

    // Matched filter for Manchester coded signals, fused with the bit
    // decision. Manchester symbols have odd symmetry, so the filter is
    // the difference of the lower and upper chip sums and the sign of
    // each filtered sample is the bit value.
    fn filter(&mut self) {
        let chip = self.cfg.chip_length;
        let start = self.cfg.packet_length - self.cfg.symbol_length;

        // The cumulative sum reduces each chip sum to one subtraction.
        let mut sum = 0f64;
        self.csum[0] = 0f64;
        for (idx, &v) in self.signal[start..].iter().enumerate() {
            sum += v;
            self.csum[idx + 1] = sum;
        }

        for idx in 0..self.cfg.block_size {
            let lower = self.csum[idx + chip];
            let upper = self.csum[idx + 2 * chip];
            let f = (lower - self.csum[idx]) - (upper - lower);
            self.quantized[self.cfg.packet_length + idx] = 1 - (f.to_bits() >> 63) as u8;
        }
    }

    // Return every sample index in [0, block_size) at which `preamble`
    // matches the bit-decision buffer, one bit per symbol_length, in
    // ascending order.
    //
    // 1. Pack the bit decisions into bytes.
    // 2. Build an index list of bytes containing at least one sample
    //    matching the first preamble bit.
    // 3. Keep eliminating byte indices at which the preamble cannot
    //    exist, one preamble bit at a time.
    // 4. Expand the survivors from byte indices to sample indices.
    // 5. Verify each index exactly against the bit decisions.
    //
    // The byte-packed stages require symbol_length to be a multiple of
    // eight; otherwise every sample offset goes straight to the exact
    // verification pass.
    fn search(&mut self, preamble: &[u8], indices: &mut Vec<usize>, scratch: &mut Vec<usize>) {
        let symbol_len = self.cfg.symbol_length;
        indices.clear();

        if symbol_len % 8 == 0 {
            let sym_len_bytes = symbol_len >> 3;

            // Pack the bit-wise quantized signal into bytes.
            for (b_idx, out) in self.packed.iter_mut().enumerate() {
                let mut b = 0u8;
                for &bit in &self.quantized[b_idx << 3..(b_idx + 1) << 3] {
                    b = b << 1 | bit;
                }
                *out = b;
            }

            for (p_idx, &p_bit) in preamble.iter().enumerate() {
                // For 0 the mask is 0xFF, for 1 it is 0x00: a byte
                // equal to the mask holds no sample matching this bit.
                let mask = (p_bit ^ 1) * 0xFF;
                let offset = p_idx * sym_len_bytes;

                if p_idx == 0 {
                    for (q_idx, &b) in self.packed[..self.cfg.block_size >> 3].iter().enumerate() {
                        if b != mask {
                            indices.push(q_idx);
                        }
                    }
                } else {
                    scratch.clear();
                    for &q_idx in indices.iter() {
                        if self.packed[offset + q_idx] != mask {
                            scratch.push(q_idx);
                        }
                    }
                    std::mem::swap(indices, scratch);

                    if indices.is_empty() {
                        return;
                    }
                }
            }

            // Expand byte indices to their eight sample indices.
            scratch.clear();
            for &q_idx in indices.iter() {
                for bit in 0..8 {
                    scratch.push(q_idx << 3 | bit);
                }
            }
            std::mem::swap(indices, scratch);
        } else {
            indices.extend(0..self.cfg.block_size);
        }

        // Exact verification at each remaining index.
        for (p_idx, &p_bit) in preamble.iter().enumerate() {
            let offset = p_idx * symbol_len;

            scratch.clear();
            for &q_idx in indices.iter() {
                if self.quantized[offset + q_idx] == p_bit {
                    scratch.push(q_idx);
                }
            }
            std::mem::swap(indices, scratch);

            if indices.is_empty() {
                return;
            }
        }
    }

    // Sample one bit per symbol from each preamble index and pack into
    // bytes. Duplicate frames within the block are dropped.
    fn slice(&mut self, indices: &[usize]) -> Vec<Frame> {
        let mut frames: Vec<Frame> = Vec::new();

        for &q_idx in indices {
            // Beyond the first block the packet may extend past the
            // buffer; the same preamble is re-found at a smaller
            // offset on the next block.
            if q_idx > self.cfg.block_size {
                continue;
            }

            self.frame.fill(0);
            for p_idx in 0..self.cfg.packet_symbols {
                self.frame[p_idx >> 3] <<= 1;
                self.frame[p_idx >> 3] |= self.quantized[q_idx + p_idx * self.cfg.symbol_length];
            }

            if frames.iter().any(|f| f.bytes == self.frame) {
                continue;
            }
            frames.push(Frame {
                idx: q_idx,
                bytes: self.frame.clone(),
            });
        }

        frames
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
