//! The CSF (sensor/navigation) record codec: fixed-width, one record per
//! shot, addressed by `header_size + ordinal * buffer_size` (no CIF needed).
//!
//! v1 carries timestamp, scan angle, platform position/attitude, and 9
//! ranges. v2 adds 9 in-water ranges, 9 intensities, and 9 in-water
//! intensities.

use crate::bitio::{BitReader, BitWriter};
use crate::header::Header;

/// Number of channels, matching [`crate::record::cwf::CHANNEL_COUNT`].
pub const CHANNEL_COUNT: usize = 9;

/// One CSF record: platform navigation and per-channel ranges for one shot.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    /// Absolute timestamp, Unix epoch microseconds.
    pub timestamp: u64,
    /// Scan angle, degrees (signed).
    pub scan_angle: f64,
    /// Platform latitude, degrees, stored as a signed offset from the header's base latitude (I6).
    pub latitude: f64,
    /// Platform longitude, degrees, stored as a signed offset from the header's base longitude.
    pub longitude: f64,
    /// Platform altitude, meters above the reference ellipsoid.
    pub altitude: f64,
    /// Roll, degrees (signed).
    pub roll: f64,
    /// Pitch, degrees (signed).
    pub pitch: f64,
    /// Heading, degrees (0..360).
    pub heading: f64,
    /// Per-channel slant range.
    pub ranges: [f64; CHANNEL_COUNT],
    /// Per-channel in-water range (v ≥ 2 only; 0.0 when absent).
    pub in_water_ranges: [f64; CHANNEL_COUNT],
    /// Per-channel return intensity (v ≥ 2 only).
    pub intensities: [u8; CHANNEL_COUNT],
    /// Per-channel in-water return intensity (v ≥ 2 only).
    pub in_water_intensities: [u8; CHANNEL_COUNT],
}

/// Alias kept for callers that prefer a file-type-qualified name at the use site.
pub type CsfRecord = Record;

fn pack_signed(w: &mut BitWriter, value: f64, bits: u32, scale: f64) {
    let bias = crate::bitio::max_value(bits) as i64 / 2;
    let raw = (value * scale).round() as i64 + bias;
    let raw = raw.clamp(0, crate::bitio::max_value(bits) as i64);
    w.write(raw as u32, bits);
}

fn unpack_signed(r: &mut BitReader<'_>, bits: u32, scale: f64) -> f64 {
    let bias = crate::bitio::max_value(bits) as i64 / 2;
    let raw = r.read(bits) as i64 - bias;
    raw as f64 / scale
}

fn pack_unsigned(w: &mut BitWriter, value: f64, bits: u32, scale: f64) {
    let raw = (value * scale).round().clamp(0.0, crate::bitio::max_value(bits) as f64);
    w.write(raw as u32, bits);
}

fn unpack_unsigned(r: &mut BitReader<'_>, bits: u32, scale: f64) -> f64 {
    f64::from(r.read(bits)) / scale
}

/// The fixed byte length of one CSF record under `header`, rounded up to a whole byte (§4.5).
pub fn record_len(header: &Header) -> usize {
    let mut bits = u64::from(header.bits("TIME"))
        + u64::from(header.bits("SCAN_ANGLE"))
        + u64::from(header.bits("LAT"))
        + u64::from(header.bits("LON"))
        + u64::from(header.bits("ALTITUDE"))
        + u64::from(header.bits("ROLL"))
        + u64::from(header.bits("PITCH"))
        + u64::from(header.bits("HEADING"))
        + u64::from(header.bits("RANGE")) * CHANNEL_COUNT as u64;
    if header.version().major >= 2 {
        bits += (u64::from(header.bits("IN_WATER_RANGE"))
            + u64::from(header.bits("INTENSITY"))
            + u64::from(header.bits("IN_WATER_INTENSITY")))
            * CHANNEL_COUNT as u64;
    }
    bits.div_ceil(8) as usize
}

/// Encodes `record` against `header`, returning exactly [`record_len`] bytes.
///
/// `timestamp` is stored as an offset from `flight_start` (matching
/// [`crate::record::cwf`] and [`crate::record::cpf`]), not the raw epoch
/// value, so it fits the declared 32-bit field for a flight of ordinary
/// duration.
pub fn encode(header: &Header, flight_start: u64, record: &Record) -> Vec<u8> {
    let mut w = BitWriter::new();
    let time_offset = record.timestamp.saturating_sub(flight_start);
    w.write(time_offset as u32, header.bits("TIME"));
    pack_signed(&mut w, record.scan_angle, header.bits("SCAN_ANGLE"), header.scale("SCAN_ANGLE"));
    pack_signed(&mut w, record.latitude - header.base_latitude(), header.bits("LAT"), header.scale("LAT"));
    pack_signed(&mut w, record.longitude - header.base_longitude(), header.bits("LON"), header.scale("LON"));
    pack_unsigned(&mut w, record.altitude, header.bits("ALTITUDE"), header.scale("ALTITUDE"));
    pack_signed(&mut w, record.roll, header.bits("ROLL"), header.scale("ROLL"));
    pack_signed(&mut w, record.pitch, header.bits("PITCH"), header.scale("PITCH"));
    pack_unsigned(&mut w, record.heading, header.bits("HEADING"), header.scale("HEADING"));
    for &range in &record.ranges {
        pack_unsigned(&mut w, range, header.bits("RANGE"), header.scale("RANGE"));
    }
    if header.version().major >= 2 {
        for &r in &record.in_water_ranges {
            pack_unsigned(&mut w, r, header.bits("IN_WATER_RANGE"), header.scale("IN_WATER_RANGE"));
        }
        for &i in &record.intensities {
            w.write(u32::from(i), header.bits("INTENSITY"));
        }
        for &i in &record.in_water_intensities {
            w.write(u32::from(i), header.bits("IN_WATER_INTENSITY"));
        }
    }
    let mut bytes = w.into_bytes();
    bytes.resize(record_len(header), 0);
    bytes
}

/// Decodes one CSF record from `buf`, the inverse of [`encode`].
pub fn decode(header: &Header, flight_start: u64, buf: &[u8]) -> Record {
    let mut r = BitReader::new(buf);
    let timestamp = flight_start + u64::from(r.read(header.bits("TIME")));
    let scan_angle = unpack_signed(&mut r, header.bits("SCAN_ANGLE"), header.scale("SCAN_ANGLE"));
    let latitude = unpack_signed(&mut r, header.bits("LAT"), header.scale("LAT")) + header.base_latitude();
    let longitude = unpack_signed(&mut r, header.bits("LON"), header.scale("LON")) + header.base_longitude();
    let altitude = unpack_unsigned(&mut r, header.bits("ALTITUDE"), header.scale("ALTITUDE"));
    let roll = unpack_signed(&mut r, header.bits("ROLL"), header.scale("ROLL"));
    let pitch = unpack_signed(&mut r, header.bits("PITCH"), header.scale("PITCH"));
    let heading = unpack_unsigned(&mut r, header.bits("HEADING"), header.scale("HEADING"));
    let mut ranges = [0.0; CHANNEL_COUNT];
    for range in &mut ranges {
        *range = unpack_unsigned(&mut r, header.bits("RANGE"), header.scale("RANGE"));
    }
    let mut in_water_ranges = [0.0; CHANNEL_COUNT];
    let mut intensities = [0u8; CHANNEL_COUNT];
    let mut in_water_intensities = [0u8; CHANNEL_COUNT];
    if header.version().major >= 2 {
        for r_ in &mut in_water_ranges {
            *r_ = unpack_unsigned(&mut r, header.bits("IN_WATER_RANGE"), header.scale("IN_WATER_RANGE"));
        }
        for i in &mut intensities {
            *i = r.read(header.bits("INTENSITY")) as u8;
        }
        for i in &mut in_water_intensities {
            *i = r.read(header.bits("IN_WATER_INTENSITY")) as u8;
        }
    }
    Record {
        timestamp,
        scan_angle,
        latitude,
        longitude,
        altitude,
        roll,
        pitch,
        heading,
        ranges,
        in_water_ranges,
        intensities,
        in_water_intensities,
    }
}
