//! The CWF (waveform) record codec: 9 channels of variable packet count,
//! each packet a differentially-compressed 64-sample waveform fragment,
//! plus a T0 reference packet, shot id, timestamp, scan angle, and (v ≥ 2)
//! per-channel validity codes.

use crate::bitio::{BitReader, BitWriter};
use crate::compression::{self, Packet, PACKET_SAMPLES};
use crate::error::{Error, Result};
use crate::header::Header;
use crate::record::{ValidityCode, CWF_TIME_REGRESSION_BUMP_MICROS, LENGTH_PREFIX_BITS};

/// Number of channels in every CZMIL shot.
pub const CHANNEL_COUNT: usize = 9;

/// Sentinel MCWP range value meaning "invalid", surfaced to callers as `-1.0`.
pub const RANGE_INVALID: f64 = -1.0;

/// Channels eligible for [`compression::PacketType::ShallowCentral`]
/// (spec's "channels 2–7", 1-indexed): channel indices 1..=6.
fn central_diff_eligible(channel_index: usize) -> bool {
    (1..=6).contains(&channel_index)
}

/// One channel's packets within a CWF record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Channel {
    /// Per-packet channel index tags (acquisition hardware's own numbering,
    /// not necessarily `0..packets.len()`).
    pub packet_indices: Vec<u32>,
    /// Per-packet MCWP range, in the field's physical unit; [`RANGE_INVALID`]
    /// marks "no range for this packet".
    pub mcwp_ranges: Vec<f64>,
    /// The raw (pre-compression) samples for each packet.
    pub packets: Vec<Packet>,
}

/// One full CWF record: one laser shot's worth of waveforms.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    /// Acquisition shot identifier.
    pub shot_id: u32,
    /// Absolute timestamp, Unix epoch microseconds.
    pub timestamp: u64,
    /// Scan angle, degrees.
    pub scan_angle: f64,
    /// The 9 channels, in fixed acquisition order.
    pub channels: [Channel; CHANNEL_COUNT],
    /// The outgoing-pulse reference waveform.
    pub t0: Packet,
    /// Per-channel validity codes (meaningful at v ≥ 2; zeroed otherwise).
    pub validity: [ValidityCode; CHANNEL_COUNT],
}

impl Default for Record {
    fn default() -> Record {
        Record {
            shot_id: 0,
            timestamp: 0,
            scan_angle: 0.0,
            channels: Default::default(),
            t0: [0u16; PACKET_SAMPLES],
            validity: [ValidityCode::VALID; CHANNEL_COUNT],
        }
    }
}

fn range_to_stored(header: &Header, value: f64) -> u32 {
    let bits = header.bits("MCWP_RANGE");
    let scale = header.scale("MCWP_RANGE");
    if value == RANGE_INVALID {
        crate::bitio::max_value(bits) as u32
    } else {
        (value * scale).round() as u32
    }
}

fn range_from_stored(header: &Header, stored: u32) -> f64 {
    let bits = header.bits("MCWP_RANGE");
    let scale = header.scale("MCWP_RANGE");
    if u64::from(stored) == crate::bitio::max_value(bits) {
        RANGE_INVALID
    } else {
        f64::from(stored) / scale
    }
}

/// Encodes `record` against `header`, applying the CWF time-regression
/// compensation (spec I4/§4.3/§9) if `prev_timestamp` is `Some` and not
/// strictly less than `record.timestamp`: the stored timestamp becomes
/// `prev + 100us` and every channel's validity is flagged
/// [`ValidityCode::TIMESTAMP_INVALID`]. This is a compensating action, not
/// an error.
pub fn encode(
    header: &Header,
    flight_start: u64,
    prev_timestamp: Option<u64>,
    record: &Record,
) -> Result<Vec<u8>> {
    for channel in &record.channels {
        let max_packets = header.max_packets();
        if channel.packets.len() as u32 > max_packets {
            return Err(Error::ValueOutOfRange {
                field: "CZMIL MAX PACKETS",
                value: channel.packets.len() as i64,
                max: u64::from(max_packets),
                bits: 32,
            });
        }
    }

    let mut effective_timestamp = record.timestamp;
    let mut validity = record.validity;
    if let Some(prev) = prev_timestamp {
        if effective_timestamp <= prev {
            effective_timestamp = prev + CWF_TIME_REGRESSION_BUMP_MICROS;
            for v in &mut validity {
                *v = v.with(ValidityCode::TIMESTAMP_INVALID);
            }
        }
    }

    let mut w = BitWriter::new();
    w.write(0, LENGTH_PREFIX_BITS); // patched below

    let packet_count_bits = header.bits("PACKET_COUNT");
    let channel_index_bits = header.bits("CHANNEL_INDEX");

    for (channel_index, channel) in record.channels.iter().enumerate() {
        w.write(channel.packets.len() as u32, packet_count_bits);
        for &idx in &channel.packet_indices {
            w.write(idx, channel_index_bits);
        }
        for &range in &channel.mcwp_ranges {
            w.write(range_to_stored(header, range), header.bits("MCWP_RANGE"));
        }
        let channel0_packets = &record.channels[0].packets;
        for (packet_index, packet) in channel.packets.iter().enumerate() {
            let channel1 = if central_diff_eligible(channel_index) {
                channel0_packets.get(packet_index)
            } else {
                None
            };
            compression::encode_packet(&mut w, packet, channel1);
        }
    }

    compression::encode_first_diff_forced(&mut w, &record.t0);

    w.write(record.shot_id, 32);
    let time_offset = effective_timestamp.saturating_sub(flight_start);
    w.write(time_offset as u32, header.bits("TIME"));
    let scan_bits = header.bits("SCAN_ANGLE");
    let scan_scale = header.scale("SCAN_ANGLE");
    let scan_bias = crate::bitio::max_value(scan_bits) as i64 / 2;
    let scan_stored = (record.scan_angle * scan_scale).round() as i64 + scan_bias;
    w.write(scan_stored as u32, scan_bits);

    if header.has_field("VALIDITY") {
        let validity_bits = header.bits("VALIDITY");
        for v in &validity {
            w.write(u32::from(v.0), validity_bits);
        }
    }

    let byte_len = w.byte_len() as u32;
    w.patch(0, byte_len, LENGTH_PREFIX_BITS);
    Ok(w.into_bytes())
}

/// Decodes one CWF record from `buf`, the exact byte range the CIF declared
/// for this ordinal.
pub fn decode(header: &Header, flight_start: u64, buf: &[u8]) -> Record {
    let mut r = BitReader::new(buf);
    let declared_len = r.read(LENGTH_PREFIX_BITS);
    debug_assert_eq!(declared_len as usize, buf.len());

    let packet_count_bits = header.bits("PACKET_COUNT");
    let channel_index_bits = header.bits("CHANNEL_INDEX");
    let mcwp_bits = header.bits("MCWP_RANGE");

    let mut channels: [Channel; CHANNEL_COUNT] = Default::default();
    let mut decoded_packets: Vec<Vec<Packet>> = Vec::with_capacity(CHANNEL_COUNT);

    for channel_index in 0..CHANNEL_COUNT {
        let count = r.read(packet_count_bits) as usize;
        let mut packet_indices = Vec::with_capacity(count);
        for _ in 0..count {
            packet_indices.push(r.read(channel_index_bits));
        }
        let mut mcwp_ranges = Vec::with_capacity(count);
        for _ in 0..count {
            mcwp_ranges.push(range_from_stored(header, r.read(mcwp_bits)));
        }
        let mut packets = Vec::with_capacity(count);
        for packet_index in 0..count {
            let channel1 = if central_diff_eligible(channel_index) {
                decoded_packets[0].get(packet_index)
            } else {
                None
            };
            packets.push(compression::decode_packet(&mut r, channel1));
        }
        decoded_packets.push(packets.clone());
        channels[channel_index] = Channel {
            packet_indices,
            mcwp_ranges,
            packets,
        };
    }

    let t0 = compression::decode_packet(&mut r, None);

    let shot_id = r.read(32);
    let time_bits = header.bits("TIME");
    let timestamp = flight_start + u64::from(r.read(time_bits));
    let scan_bits = header.bits("SCAN_ANGLE");
    let scan_scale = header.scale("SCAN_ANGLE");
    let scan_bias = crate::bitio::max_value(scan_bits) as i64 / 2;
    let scan_stored = r.read(scan_bits) as i64 - scan_bias;
    let scan_angle = scan_stored as f64 / scan_scale;

    let mut validity = [ValidityCode::VALID; CHANNEL_COUNT];
    if header.has_field("VALIDITY") {
        let validity_bits = header.bits("VALIDITY");
        for v in &mut validity {
            *v = ValidityCode(r.read(validity_bits) as u8);
        }
    }

    Record {
        shot_id,
        timestamp,
        scan_angle,
        channels,
        t0,
        validity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{Builder, FileType};

    fn ramp_packet(start: u16) -> Packet {
        let mut p = [0u16; PACKET_SAMPLES];
        for (i, s) in p.iter_mut().enumerate() {
            *s = start.wrapping_add(i as u16) % 1024;
        }
        p
    }

    #[test]
    fn single_channel_single_packet_roundtrips() {
        let header = Builder::new(FileType::Cwf, (2, 0)).into_header().unwrap();
        let mut record = Record {
            shot_id: 42,
            timestamp: 1_000_100,
            scan_angle: 12.5,
            ..Default::default()
        };
        record.channels[0] = Channel {
            packet_indices: vec![0],
            mcwp_ranges: vec![RANGE_INVALID],
            packets: vec![ramp_packet(0)],
        };

        let bytes = encode(&header, 1_000_000, None, &record).unwrap();
        let decoded = decode(&header, 1_000_000, &bytes);
        assert_eq!(record.shot_id, decoded.shot_id);
        assert_eq!(record.timestamp, decoded.timestamp);
        assert_eq!(record.channels[0].packets, decoded.channels[0].packets);
        assert_eq!(RANGE_INVALID, decoded.channels[0].mcwp_ranges[0]);
    }

    #[test]
    fn time_regression_is_compensated_not_errored() {
        let header = Builder::new(FileType::Cwf, (2, 0)).into_header().unwrap();
        let record = Record {
            shot_id: 1,
            timestamp: 5_000_000,
            ..Default::default()
        };
        let bytes = encode(&header, 0, Some(5_000_000), &record).unwrap();
        let decoded = decode(&header, 0, &bytes);
        assert_eq!(5_000_100, decoded.timestamp);
        assert!(decoded.validity[0].has(ValidityCode::TIMESTAMP_INVALID));
        assert!(decoded.validity[8].has(ValidityCode::TIMESTAMP_INVALID));
    }

    #[test]
    fn shallow_central_channel_decodes_against_channel_zero() {
        let header = Builder::new(FileType::Cwf, (2, 0)).into_header().unwrap();
        let mut record = Record {
            shot_id: 7,
            timestamp: 2_000_000,
            ..Default::default()
        };
        let base = ramp_packet(100);
        record.channels[0] = Channel {
            packet_indices: vec![3],
            mcwp_ranges: vec![12.3],
            packets: vec![base],
        };
        let mut shifted = base;
        for s in &mut shifted {
            *s = s.wrapping_add(2) % 1024;
        }
        record.channels[2] = Channel {
            packet_indices: vec![3],
            mcwp_ranges: vec![RANGE_INVALID],
            packets: vec![shifted],
        };

        let bytes = encode(&header, 2_000_000, None, &record).unwrap();
        let decoded = decode(&header, 2_000_000, &bytes);
        assert_eq!(shifted, decoded.channels[2].packets[0]);
    }

    #[test]
    fn exceeding_max_packets_is_value_out_of_range() {
        let header = Builder::new(FileType::Cwf, (2, 0)).into_header().unwrap();
        let mut record = Record::default();
        record.channels[0].packets = vec![ramp_packet(0); 16];
        record.channels[0].packet_indices = vec![0; 16];
        record.channels[0].mcwp_ranges = vec![RANGE_INVALID; 16];
        let err = encode(&header, 0, None, &record).unwrap_err();
        assert!(matches!(err, Error::ValueOutOfRange { .. }));
    }
}
