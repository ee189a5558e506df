//! CWF's per-packet differential compression: four candidate encodings of a
//! 64-sample, 10-bit waveform packet, chosen by byte size with a fixed
//! tie-break order.
//!
//! Every candidate is tried and its packed bit length computed; the
//! cheapest wins, with [`PacketType::Raw`] preferred over
//! [`PacketType::FirstDiff`] preferred over [`PacketType::SecondDiff`] at
//! equal size, and [`PacketType::ShallowCentral`] (channels 2–7 only, diffed
//! against channel 1 of the same packet) winning only if it is strictly
//! smaller than whichever of the first three won.

use crate::bitio::{bit_width, BitReader, BitWriter};

/// Samples per waveform packet.
pub const PACKET_SAMPLES: usize = 64;

/// Bits occupied by one raw sample.
pub const SAMPLE_BITS: u32 = 10;

/// Width of the 2-bit type tag that precedes every packet.
pub const TYPE_BITS: u32 = 2;

/// Width of the bits-per-delta field.
const DELTA_WIDTH_BITS: u32 = 4;

/// Width of the first-difference start-sample field.
const START_BITS: u32 = SAMPLE_BITS;

/// Width of the biased offset field for a first- or second-difference stream.
const OFFSET_BITS: u32 = 11;

/// One packet's worth of raw samples (`0..=1023` each).
pub type Packet = [u16; PACKET_SAMPLES];

/// Which of the four candidate encodings a packet was stored under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketType {
    /// 64 raw 10-bit samples.
    Raw = 0,
    /// Start sample plus 63 biased first differences.
    FirstDiff = 1,
    /// Start/offset of the first-difference stream plus 62 biased second differences.
    SecondDiff = 2,
    /// 64 signed offsets from the same packet's channel-1 samples.
    ShallowCentral = 3,
}

impl PacketType {
    fn from_tag(tag: u32) -> PacketType {
        match tag {
            0 => PacketType::Raw,
            1 => PacketType::FirstDiff,
            2 => PacketType::SecondDiff,
            _ => PacketType::ShallowCentral,
        }
    }
}

/// Biases a signed delta into the unsigned, zero-based range the codec
/// stores, returning `(biased_value, bits_needed)` for an array of deltas.
fn bias_and_width(deltas: &[i32]) -> (u32, u32) {
    let min = deltas.iter().copied().min().unwrap_or(0);
    let offset = (-min).max(0) as u32;
    let or_of_all = deltas
        .iter()
        .fold(0u32, |acc, &d| acc | (d + offset as i32) as u32);
    (offset, bit_width(or_of_all).max(1))
}

fn first_diffs(samples: &Packet) -> Vec<i32> {
    samples
        .windows(2)
        .map(|w| i32::from(w[1]) - i32::from(w[0]))
        .collect()
}

fn bits_for_raw() -> u64 {
    u64::from(SAMPLE_BITS) * PACKET_SAMPLES as u64
}

fn bits_for_first_diff(d1: &[i32]) -> (u32, u32, u64) {
    let (offset, width) = bias_and_width(d1);
    let total = u64::from(START_BITS) + u64::from(OFFSET_BITS) + u64::from(DELTA_WIDTH_BITS)
        + u64::from(width) * d1.len() as u64;
    (offset, width, total)
}

/// A first difference is itself in `[-1023, 1023]`; biasing by this fixed
/// constant (rather than a computed per-packet bias) is enough to store the
/// single seed value `d1[0]` in [`OFFSET_BITS`] bits.
const FIRST_DIFF_BIAS: i32 = 1023;

fn bits_for_second_diff(d1: &[i32]) -> (u32, u32, u64) {
    let d2: Vec<i32> = d1.windows(2).map(|w| w[1] - w[0]).collect();
    let (d2_offset, width2) = bias_and_width(&d2);
    let total = u64::from(START_BITS)
        + u64::from(OFFSET_BITS)
        + u64::from(OFFSET_BITS)
        + u64::from(DELTA_WIDTH_BITS)
        + u64::from(width2) * d2.len() as u64;
    (d2_offset, width2, total)
}

fn bits_for_shallow_central(deltas: &[i32]) -> (u32, u32, u64) {
    let (offset, width) = bias_and_width(deltas);
    let total = u64::from(OFFSET_BITS) + u64::from(DELTA_WIDTH_BITS) + u64::from(width) * deltas.len() as u64;
    (offset, width, total)
}

/// Encodes one packet, choosing the cheapest of the eligible candidates and
/// appending `2 + payload` bits to `out`. `channel1` is `Some` only when
/// encoding channels 2–7 (1-indexed), and must already have been decoded/
/// encoded for the same packet index.
pub fn encode_packet(out: &mut BitWriter, samples: &Packet, channel1: Option<&Packet>) {
    let d1 = first_diffs(samples);
    let raw_bits = bits_for_raw();
    let (fd_offset, fd_width, fd_bits) = bits_for_first_diff(&d1);
    let (sd_d2_offset, sd_width, sd_bits) = bits_for_second_diff(&d1);

    // Candidates are chosen by byte size, not raw bit count (spec.md §4.3,
    // P4): two encodings that differ by under a byte tie, and the earlier
    // type in Raw > FirstDiff > SecondDiff wins the tie.
    let mut best = PacketType::Raw;
    let mut best_bytes = raw_bits.div_ceil(8);
    let fd_bytes = fd_bits.div_ceil(8);
    let sd_bytes = sd_bits.div_ceil(8);
    if fd_bytes < best_bytes {
        best = PacketType::FirstDiff;
        best_bytes = fd_bytes;
    }
    if sd_bytes < best_bytes {
        best = PacketType::SecondDiff;
        best_bytes = sd_bytes;
    }

    let central = channel1.map(|ch1| {
        let deltas: Vec<i32> = samples
            .iter()
            .zip(ch1.iter())
            .map(|(&s, &c)| i32::from(s) - i32::from(c))
            .collect();
        let (offset, width, bits) = bits_for_shallow_central(&deltas);
        (deltas, offset, width, bits)
    });
    if let Some((_, _, _, bits)) = &central {
        if bits.div_ceil(8) < best_bytes {
            best = PacketType::ShallowCentral;
        }
    }

    out.write(best as u32, TYPE_BITS);
    match best {
        PacketType::Raw => {
            for &s in samples {
                out.write(u32::from(s), SAMPLE_BITS);
            }
        }
        PacketType::FirstDiff => {
            out.write(u32::from(samples[0]), START_BITS);
            out.write(fd_offset, OFFSET_BITS);
            out.write(fd_width, DELTA_WIDTH_BITS);
            for &d in &d1 {
                out.write((d + fd_offset as i32) as u32, fd_width);
            }
        }
        PacketType::SecondDiff => {
            let d2: Vec<i32> = d1.windows(2).map(|w| w[1] - w[0]).collect();
            out.write(u32::from(samples[0]), START_BITS);
            out.write((d1[0] + FIRST_DIFF_BIAS) as u32, OFFSET_BITS);
            out.write(sd_d2_offset, OFFSET_BITS);
            out.write(sd_width, DELTA_WIDTH_BITS);
            for &d in &d2 {
                out.write((d + sd_d2_offset as i32) as u32, sd_width);
            }
        }
        PacketType::ShallowCentral => {
            let (deltas, offset, width, _) = central.expect("shallow central chosen implies eligible");
            out.write(offset, OFFSET_BITS);
            out.write(width, DELTA_WIDTH_BITS);
            for &d in &deltas {
                out.write((d + offset as i32) as u32, width);
            }
        }
    }
}

/// Encodes `samples` unconditionally as [`PacketType::FirstDiff`], skipping
/// the size comparison against the other three candidates. Used for the T0
/// waveform packet, which spec.md always stores as a first difference
/// regardless of whether a smaller encoding exists.
pub fn encode_first_diff_forced(out: &mut BitWriter, samples: &Packet) {
    let d1 = first_diffs(samples);
    let (offset, width, _) = bits_for_first_diff(&d1);
    out.write(TYPE_BITS_FIRST_DIFF, TYPE_BITS);
    out.write(u32::from(samples[0]), START_BITS);
    out.write(offset, OFFSET_BITS);
    out.write(width, DELTA_WIDTH_BITS);
    for &d in &d1 {
        out.write((d + offset as i32) as u32, width);
    }
}

const TYPE_BITS_FIRST_DIFF: u32 = PacketType::FirstDiff as u32;

/// Decodes one packet previously written by [`encode_packet`]. `channel1`
/// must be supplied (and already decoded) when the stored tag is
/// [`PacketType::ShallowCentral`].
pub fn decode_packet(input: &mut BitReader<'_>, channel1: Option<&Packet>) -> Packet {
    let tag = input.read(TYPE_BITS);
    let packet_type = PacketType::from_tag(tag);
    let mut samples = [0u16; PACKET_SAMPLES];
    match packet_type {
        PacketType::Raw => {
            for s in &mut samples {
                *s = input.read(SAMPLE_BITS) as u16;
            }
        }
        PacketType::FirstDiff => {
            let start = input.read(START_BITS);
            let offset = input.read(OFFSET_BITS);
            let width = input.read(DELTA_WIDTH_BITS);
            let mut prev = start;
            samples[0] = start as u16;
            for s in samples.iter_mut().skip(1) {
                let biased = input.read(width);
                let delta = biased as i32 - offset as i32;
                prev = (prev as i32 + delta) as u32;
                *s = prev as u16;
            }
        }
        PacketType::SecondDiff => {
            let start = input.read(START_BITS);
            let d1_first_biased = input.read(OFFSET_BITS);
            let d2_offset = input.read(OFFSET_BITS);
            let width = input.read(DELTA_WIDTH_BITS);
            samples[0] = start as u16;
            let mut prev_sample = start as i32;
            let mut d1_value = d1_first_biased as i32 - FIRST_DIFF_BIAS;
            prev_sample += d1_value;
            samples[1] = prev_sample as u16;
            for s in samples.iter_mut().skip(2) {
                let biased = input.read(width);
                let d2 = biased as i32 - d2_offset as i32;
                d1_value += d2;
                prev_sample += d1_value;
                *s = prev_sample as u16;
            }
        }
        PacketType::ShallowCentral => {
            let offset = input.read(OFFSET_BITS);
            let width = input.read(DELTA_WIDTH_BITS);
            let ch1 = channel1.expect("shallow central packet requires channel 1 decoded first");
            for (i, s) in samples.iter_mut().enumerate() {
                let biased = input.read(width);
                let delta = biased as i32 - offset as i32;
                *s = (i32::from(ch1[i]) + delta) as u16;
            }
        }
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> Packet {
        let mut p = [0u16; PACKET_SAMPLES];
        for (i, s) in p.iter_mut().enumerate() {
            *s = i as u16;
        }
        p
    }

    fn constant(value: u16) -> Packet {
        [value; PACKET_SAMPLES]
    }

    #[test]
    fn ramp_chooses_first_difference_and_roundtrips() {
        let samples = ramp();
        let mut writer = BitWriter::new();
        encode_packet(&mut writer, &samples, None);
        let bytes = writer.into_bytes();
        assert!((bytes.len() as u64) < (PACKET_SAMPLES as u64 * u64::from(SAMPLE_BITS)) / 8);

        let mut reader = BitReader::new(&bytes);
        let tag_preview = crate::bitio::unpack(&bytes, 0, TYPE_BITS);
        assert_eq!(PacketType::FirstDiff as u32, tag_preview);
        let decoded = decode_packet(&mut reader, None);
        assert_eq!(samples, decoded);
    }

    #[test]
    fn constant_packet_roundtrips() {
        let samples = constant(512);
        let mut writer = BitWriter::new();
        encode_packet(&mut writer, &samples, None);
        let bytes = writer.into_bytes();
        let mut reader = BitReader::new(&bytes);
        let decoded = decode_packet(&mut reader, None);
        assert_eq!(samples, decoded);
    }

    #[test]
    fn random_like_packet_falls_back_to_raw_and_roundtrips() {
        let mut samples = [0u16; PACKET_SAMPLES];
        for (i, s) in samples.iter_mut().enumerate() {
            *s = ((i * 173 + 511) % 1024) as u16;
        }
        let mut writer = BitWriter::new();
        encode_packet(&mut writer, &samples, None);
        let bytes = writer.into_bytes();
        let mut reader = BitReader::new(&bytes);
        let decoded = decode_packet(&mut reader, None);
        assert_eq!(samples, decoded);
    }

    #[test]
    fn shallow_central_roundtrips_against_channel_one() {
        let channel1 = ramp();
        let mut channel_n = ramp();
        for s in &mut channel_n {
            *s = s.saturating_add(3);
        }
        let mut writer = BitWriter::new();
        encode_packet(&mut writer, &channel_n, Some(&channel1));
        let bytes = writer.into_bytes();
        let mut reader = BitReader::new(&bytes);
        let decoded = decode_packet(&mut reader, Some(&channel1));
        assert_eq!(channel_n, decoded);
    }

    #[test]
    fn second_difference_quadratic_roundtrips() {
        let mut samples = [0u16; PACKET_SAMPLES];
        for (i, s) in samples.iter_mut().enumerate() {
            *s = ((i * i) % 1024) as u16;
        }
        let mut writer = BitWriter::new();
        encode_packet(&mut writer, &samples, None);
        let bytes = writer.into_bytes();
        let mut reader = BitReader::new(&bytes);
        let decoded = decode_packet(&mut reader, None);
        assert_eq!(samples, decoded);
    }
}
