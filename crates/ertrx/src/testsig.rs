//! Synthetic signal generation for tests
//!
//! Builds u8 IQ streams the way a meter and an SDR front-end would:
//! frame bits are Manchester encoded, upsampled by the chip length,
//! keyed onto a low-offset carrier, and disturbed with Gaussian noise
//! around the converter's DC offset.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

pub(crate) struct SignalGen {
    pub chip_length: usize,
    pub noise: f64,
    rng: StdRng,
}

impl SignalGen {
    pub fn new(chip_length: usize, seed: u64) -> Self {
        Self {
            chip_length,
            noise: 1.5,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Chips at chip rate: Manchester bit 1 -> [1, 0], bit 0 -> [0, 1]
    pub fn manchester(bits: &[u8]) -> Vec<u8> {
        bits.iter().flat_map(|&b| [b, 1 - b]).collect()
    }

    /// Key chips onto a low-offset carrier and emit u8 IQ pairs
    ///
    /// A chip value of 1 keys the carrier on; 0 leaves only the DC
    /// offset plus noise.
    pub fn modulate(&mut self, chips: &[u8]) -> Vec<u8> {
        let noise = Normal::new(0.0, self.noise).unwrap();
        let freq = 0.013; // carrier offset, cycles per sample
        let mut iq = Vec::with_capacity(chips.len() * self.chip_length * 2);
        let mut t = 0usize;
        for &chip in chips {
            for _ in 0..self.chip_length {
                let phase = 2.0 * std::f64::consts::PI * freq * t as f64;
                let amp = if chip == 1 { 110.0 } else { 0.0 };
                let i = 127.5 + amp * phase.cos() + noise.sample(&mut self.rng);
                let q = 127.5 + amp * phase.sin() + noise.sample(&mut self.rng);
                iq.push(i.clamp(0.0, 255.0) as u8);
                iq.push(q.clamp(0.0, 255.0) as u8);
                t += 1;
            }
        }
        iq
    }

    /// Idle channel samples: noise around the DC offset
    pub fn idle(&mut self, samples: usize) -> Vec<u8> {
        let noise = Normal::new(0.0, self.noise).unwrap();
        (0..samples * 2)
            .map(|_| (127.5 + noise.sample(&mut self.rng)).clamp(0.0, 255.0) as u8)
            .collect()
    }
}

/// A valid 96-bit SCM frame as bits, BCH checksum included
pub(crate) fn scm_frame_bits(id: u32, typ: u8, consumption: u32) -> Vec<u8> {
    let mut bits = vec![0u8; 96];
    let set = |bits: &mut [u8], start: usize, len: usize, value: u64| {
        for i in 0..len {
            bits[start + i] = (value >> (len - 1 - i) & 1) as u8;
        }
    };

    for (i, b) in "111110010101001100000".bytes().enumerate() {
        bits[i] = (b == b'1') as u8;
    }
    set(&mut bits, 21, 2, (id >> 24) as u64);
    set(&mut bits, 26, 4, typ as u64);
    set(&mut bits, 32, 24, consumption as u64);
    set(&mut bits, 56, 24, (id & 0xFF_FFFF) as u64);

    // bytes 2..10 are the data span; the appended checksum leaves
    // residue zero over bytes 2..12
    let mut bytes = [0u8; 12];
    for (i, &bit) in bits.iter().enumerate() {
        bytes[i >> 3] = bytes[i >> 3] << 1 | bit;
    }
    let crc = crate::checksum::Crc::bch().checksum(&bytes[2..10]);
    set(&mut bits, 80, 16, crc as u64);

    bits
}
