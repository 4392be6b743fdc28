//! Turning raw captures back into time and voltage
//!
//! Each raw word is a snapshot of GPIO pins 0..=31. The two ADCs' six data lines are
//! scattered over those pins (see [`CHANNEL_A_PINS`] and [`CHANNEL_B_PINS`]), so every
//! code is gathered bit by bit, least significant pin first.

use std::{fmt, slice::ChunksExact};

use crate::{
    gpio::{CHANNEL_A_PINS, CHANNEL_B_PINS},
    Error, Result, CAPTURE_BYTES, FULL_SCALE_VOLTS, MAX_CODE, SAMPLE_COUNT, WORD_SIZE,
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DecodedSample {
    /// Offset from the first sample in ns
    pub time_ns: f64,
    /// Channel A in volts
    pub channel_a: f64,
    /// Channel B in volts
    pub channel_b: f64,
}

impl fmt::Display for DecodedSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t{}", self.time_ns, self.channel_a, self.channel_b)
    }
}

fn gather(word: u32, pins: &[u32; 6]) -> u8 {
    pins.iter()
        .enumerate()
        .fold(0, |code, (bit, &pin)| code | ((((word >> pin) & 1) as u8) << bit))
}

/// The 6-bit code of ADC A: bits 7..=11 low, bit 25 on top
pub fn channel_a_code(word: u32) -> u8 {
    gather(word, &CHANNEL_A_PINS)
}

/// The 6-bit code of ADC B: bits 17..=18, then 22..=24, then 27 on top
pub fn channel_b_code(word: u32) -> u8 {
    gather(word, &CHANNEL_B_PINS)
}

pub fn code_to_volts(code: u8) -> f64 {
    code as f64 * (FULL_SCALE_VOLTS / MAX_CODE as f64)
}

/// Iterator over the decoded samples of one capture.
/// Cloning it gives a fresh pass from wherever it currently is.
#[derive(Clone, Debug)]
pub struct Decoded<'a> {
    words: ChunksExact<'a, u8>,
    index: usize,
    period_ns: f64,
}

impl Decoded<'_> {
    /// Total capture time as recorded on the wire
    pub fn elapsed_ns(&self) -> f64 {
        self.period_ns * SAMPLE_COUNT as f64
    }
}

impl Iterator for Decoded<'_> {
    type Item = DecodedSample;

    fn next(&mut self) -> Option<Self::Item> {
        let bytes = self.words.next()?;
        let word = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let sample = DecodedSample {
            time_ns: self.index as f64 * self.period_ns,
            channel_a: code_to_volts(channel_a_code(word)),
            channel_b: code_to_volts(channel_b_code(word)),
        };
        self.index += 1;
        Some(sample)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.words.size_hint()
    }
}

impl ExactSizeIterator for Decoded<'_> {}

/// Decode a capture in wire format: [`SAMPLE_COUNT`] native-endian sample words followed
/// by the native-endian elapsed time in ns.
pub fn decode(raw: &[u8]) -> Result<Decoded<'_>> {
    if raw.len() != CAPTURE_BYTES {
        return Err(Error::WireLength {
            expected: CAPTURE_BYTES,
            actual: raw.len(),
        });
    }
    let (samples, elapsed) = raw.split_at(SAMPLE_COUNT * WORD_SIZE);
    let elapsed = u32::from_ne_bytes([elapsed[0], elapsed[1], elapsed[2], elapsed[3]]);
    Ok(Decoded {
        words: samples.chunks_exact(WORD_SIZE),
        index: 0,
        period_ns: elapsed as f64 / SAMPLE_COUNT as f64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Capture;
    use rand::prelude::*;

    fn scatter(code: u8, pins: &[u32; 6]) -> u32 {
        pins.iter()
            .enumerate()
            .fold(0, |word, (bit, &pin)| word | ((((code >> bit) & 1) as u32) << pin))
    }

    fn wire(samples: [u32; SAMPLE_COUNT], elapsed: u64) -> Vec<u8> {
        Capture::new(Box::new(samples), elapsed).to_wire()
    }

    #[test]
    fn test_channel_a_bits() {
        let word = (0b10101 << 7) | (1 << 25);
        assert_eq!(channel_a_code(word), 0b110101);
        assert_eq!(channel_a_code(word), 53);
        assert!((code_to_volts(53) - 4.206).abs() < 1e-3);
        // None of those bits belong to channel B
        assert_eq!(channel_b_code(word), 0);
    }

    #[test]
    fn test_channel_b_bits() {
        let word = (0b10 << 17) | (0b011 << 22) | (1 << 27);
        assert_eq!(channel_b_code(word), 0b10 | (0b011 << 2) | (1 << 5));
        assert_eq!(channel_a_code(word), 0);
    }

    #[test]
    fn test_unused_pins_ignored() {
        let used = scatter(63, &CHANNEL_A_PINS) | scatter(63, &CHANNEL_B_PINS);
        let word = !used;
        assert_eq!(channel_a_code(word), 0);
        assert_eq!(channel_b_code(word), 0);
        assert_eq!(channel_a_code(u32::MAX), MAX_CODE);
        assert_eq!(channel_b_code(u32::MAX), MAX_CODE);
        assert!((code_to_volts(MAX_CODE) - FULL_SCALE_VOLTS).abs() < 1e-12);
    }

    #[test]
    fn test_all_zero_capture() {
        let raw = wire([0; SAMPLE_COUNT], 10_000);
        let decoded: Vec<_> = decode(&raw).unwrap().collect();
        assert_eq!(decoded.len(), SAMPLE_COUNT);
        for (i, s) in decoded.iter().enumerate() {
            assert_eq!(s.time_ns, i as f64);
            assert_eq!(s.channel_a, 0.0);
            assert_eq!(s.channel_b, 0.0);
        }
    }

    #[test]
    fn test_random_codes_round_trip() {
        let mut rng = rand::thread_rng();
        let mut samples = [0u32; SAMPLE_COUNT];
        let mut codes = Vec::with_capacity(SAMPLE_COUNT);
        for s in samples.iter_mut() {
            let (a, b) = (rng.gen_range(0..=MAX_CODE), rng.gen_range(0..=MAX_CODE));
            *s = scatter(a, &CHANNEL_A_PINS) | scatter(b, &CHANNEL_B_PINS);
            codes.push((a, b));
        }
        let raw = wire(samples, 5_000_000);
        let decoded = decode(&raw).unwrap();
        assert_eq!(decoded.len(), SAMPLE_COUNT);
        for (i, (s, (a, b))) in decoded.zip(codes).enumerate() {
            assert_eq!(s.channel_a, code_to_volts(a));
            assert_eq!(s.channel_b, code_to_volts(b));
            assert_eq!(s.time_ns, i as f64 * 500.0);
        }
    }

    #[test]
    fn test_decode_is_repeatable() {
        let mut rng = rand::thread_rng();
        let mut samples = [0u32; SAMPLE_COUNT];
        rng.fill(&mut samples[..]);
        let raw = wire(samples, 987_654);
        let decoded = decode(&raw).unwrap();
        let first: Vec<_> = decoded.clone().collect();
        let second: Vec<_> = decoded.collect();
        let third: Vec<_> = decode(&raw).unwrap().collect();
        assert_eq!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn test_wrong_length() {
        let raw = vec![0u8; CAPTURE_BYTES - 1];
        assert!(matches!(
            decode(&raw),
            Err(Error::WireLength { expected: CAPTURE_BYTES, actual }) if actual == CAPTURE_BYTES - 1
        ));
    }

    #[test]
    fn test_display_line() {
        let s = DecodedSample {
            time_ns: 2.5,
            channel_a: 0.0,
            channel_b: 5.0,
        };
        assert_eq!(s.to_string(), "2.5\t0\t5");
    }
}
