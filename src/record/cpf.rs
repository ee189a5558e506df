//! The CPF (point) record codec: a variable-length record whose size depends
//! on each of the 9 channels' return counts. Three version profiles share a
//! common prefix (spec §4.4); this module implements the full write (append
//! or in-place overwrite), the narrow "modifiable-only" update, and the
//! narrower "status-only" update, all sharing one encode/decode core.

use crate::bitio::{self, BitReader, BitWriter};
use crate::error::{Error, Result};
use crate::header::{FileType, Header};
use crate::record::{CLASSIFICATION_WATER_SURFACE, LENGTH_PREFIX_BITS};

/// Number of channels in every CZMIL shot.
pub const CHANNEL_COUNT: usize = 9;

/// Number of bare-earth triples carried by the shallow channels.
pub const BARE_EARTH_COUNT: usize = 7;

/// One channel's single return.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Return {
    /// Absolute latitude, degrees. Meaningless (forced to the shot reference) when `elevation` is `None`.
    pub latitude: f64,
    /// Absolute longitude, degrees.
    pub longitude: f64,
    /// Elevation, meters; `None` encodes the header's null-Z sentinel (I6, §4.4, §9).
    pub elevation: Option<f64>,
    /// Return reflectance.
    pub reflectance: f64,
    /// Horizontal position uncertainty.
    pub horizontal_uncertainty: f64,
    /// Vertical position uncertainty.
    pub vertical_uncertainty: f64,
    /// Status flags bitmask.
    pub status: u8,
    /// Point classification code. Read-back may coerce `0` to
    /// [`CLASSIFICATION_WATER_SURFACE`] when `ip_rank` is also `0` (§4.4, §9: lossy, documented).
    pub classification: u8,
    /// Sub-sample interest-point offset within the waveform.
    pub interest_point_offset: f64,
    /// Interest-point rank.
    pub ip_rank: u8,
    /// Probability of detection (v ≥ 2; defaults to 0.0 on a v1 file).
    pub probability: f64,
    /// Filter reason code (v ≥ 2; defaults to 0 on a v1 file).
    pub filter_reason: u8,
    /// D-index (v ≥ 3; defaults to 0 otherwise).
    pub d_index: u8,
}

impl Default for Return {
    fn default() -> Return {
        Return {
            latitude: 0.0,
            longitude: 0.0,
            elevation: Some(0.0),
            reflectance: 0.0,
            horizontal_uncertainty: 0.0,
            vertical_uncertainty: 0.0,
            status: 0,
            classification: 0,
            interest_point_offset: 0.0,
            ip_rank: 0,
            probability: 0.0,
            filter_reason: 0,
            d_index: 0,
        }
    }
}

/// One channel: its returns plus the per-channel optech classification (v ≥ 2).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Channel {
    /// This channel's returns, in return-number order.
    pub returns: Vec<Return>,
    /// Optech classification (v ≥ 2). On a v1 file this is reconstructed on
    /// read from the last non-null return's legacy classification, biased by
    /// 30 for water modes 2..=8 (§4.4).
    pub optech_classification: u8,
}

/// A bare-earth triple for one of the 7 shallow channels.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BareEarth {
    /// Latitude, degrees.
    pub latitude: f64,
    /// Longitude, degrees.
    pub longitude: f64,
    /// Elevation, meters.
    pub elevation: f64,
}

/// One full CPF record: one shot's geolocated returns.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    /// Absolute timestamp, Unix epoch microseconds.
    pub timestamp: u64,
    /// Off-nadir scan angle, degrees (signed).
    pub off_nadir_angle: f64,
    /// Shot reference latitude, degrees; origin for every return's lat/lon diff (I6).
    pub reference_latitude: f64,
    /// Shot reference longitude, degrees.
    pub reference_longitude: f64,
    /// Water level, meters; `None` encodes the header's null sentinel.
    pub water_level: Option<f64>,
    /// Local vertical datum offset, meters.
    pub vertical_datum_offset: f64,
    /// Opaque per-shot user data.
    pub user_data: u16,
    /// The 9 channels, in fixed acquisition order.
    pub channels: [Channel; CHANNEL_COUNT],
    /// The 7 bare-earth triples.
    pub bare_earth: [BareEarth; BARE_EARTH_COUNT],
    /// Diffuse attenuation coefficient.
    pub kd: f64,
    /// Laser pulse energy.
    pub laser_energy: f64,
    /// T0 waveform interest point.
    pub t0_interest_point: f64,
    /// D-index-cube (v ≥ 3; defaults to 0 otherwise).
    pub d_index_cube: u8,
}

impl Default for Record {
    fn default() -> Record {
        Record {
            timestamp: 0,
            off_nadir_angle: 0.0,
            reference_latitude: 0.0,
            reference_longitude: 0.0,
            water_level: None,
            vertical_datum_offset: 0.0,
            user_data: 0,
            channels: Default::default(),
            bare_earth: [BareEarth::default(); BARE_EARTH_COUNT],
            kd: 0.0,
            laser_energy: 0.0,
            t0_interest_point: 0.0,
            d_index_cube: 0,
        }
    }
}

fn pack_signed(w: &mut BitWriter, value: f64, bits: u32, scale: f64) {
    let bias = bitio::max_value(bits) as i64 / 2;
    let raw = (value * scale).round() as i64 + bias;
    w.write(raw.clamp(0, bitio::max_value(bits) as i64) as u32, bits);
}

fn unpack_signed(r: &mut BitReader<'_>, bits: u32, scale: f64) -> f64 {
    let bias = bitio::max_value(bits) as i64 / 2;
    (r.read(bits) as i64 - bias) as f64 / scale
}

fn pack_signed_or_null(w: &mut BitWriter, value: Option<f64>, bits: u32, scale: f64) {
    match value {
        None => w.write(bitio::max_value(bits) as u32, bits),
        Some(v) => {
            let bias = bitio::max_value(bits) as i64 / 2;
            let max_non_null = bitio::max_value(bits) as i64 - 1;
            let raw = ((v * scale).round() as i64 + bias).clamp(0, max_non_null);
            w.write(raw as u32, bits);
        }
    }
}

fn unpack_signed_or_null(r: &mut BitReader<'_>, bits: u32, scale: f64) -> Option<f64> {
    let raw = r.read(bits);
    if u64::from(raw) == bitio::max_value(bits) {
        None
    } else {
        let bias = bitio::max_value(bits) as i64 / 2;
        Some((raw as i64 - bias) as f64 / scale)
    }
}

fn pack_unsigned(w: &mut BitWriter, value: f64, bits: u32, scale: f64) {
    let raw = (value * scale).round().clamp(0.0, bitio::max_value(bits) as f64);
    w.write(raw as u32, bits);
}

fn unpack_unsigned(r: &mut BitReader<'_>, bits: u32, scale: f64) -> f64 {
    f64::from(r.read(bits)) / scale
}

/// The integer latitude band (degrees, biased `+90` into `0..180`) a packed
/// reference-latitude value falls in, used to scale longitude by
/// `cos(lat_band)` (§4.4 item 4-5, §9 "recomputed-base cosine band"). Always
/// derived from the just-packed/just-read integer, never the pre-packed
/// float, so encode and decode agree at the integer boundary.
fn lat_band_from_stored(raw: u32, bits: u32, scale: f64, base_latitude: f64) -> i32 {
    let bias = bitio::max_value(bits) as i64 / 2;
    let lat_degrees = (raw as i64 - bias) as f64 / scale + base_latitude;
    (lat_degrees.floor() as i32 + 90).clamp(0, 179)
}

fn cos_for_band(band: i32) -> f64 {
    f64::from(band - 90).to_radians().cos()
}

/// Encodes `record`, applying the monotonic-timestamp hard error (I4/P7:
/// unlike CWF's silent compensation, CPF append fails outright on a
/// non-increasing timestamp).
pub fn encode(
    header: &Header,
    flight_start: u64,
    prev_timestamp: Option<u64>,
    record: &Record,
) -> Result<Vec<u8>> {
    if let Some(prev) = prev_timestamp {
        if record.timestamp <= prev {
            return Err(Error::TimeRegression {
                file_type: FileType::Cpf,
                timestamp: record.timestamp,
                previous: prev,
            });
        }
    }
    for channel in &record.channels {
        let max_returns = header.max_returns();
        if channel.returns.len() as u32 > max_returns {
            return Err(Error::ValueOutOfRange {
                field: "CZMIL MAX RETURNS",
                value: channel.returns.len() as i64,
                max: u64::from(max_returns),
                bits: 32,
            });
        }
    }
    Ok(encode_body(header, flight_start, record))
}

/// Encodes `record`'s body without the monotonic-timestamp check, shared by
/// [`encode`] and the narrow update paths (which never change the
/// timestamp, so the check is neither needed nor meaningful there).
fn encode_body(header: &Header, flight_start: u64, record: &Record) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write(0, LENGTH_PREFIX_BITS);

    let return_count_bits = header.bits("RETURN_COUNT");
    for channel in &record.channels {
        w.write(channel.returns.len() as u32, return_count_bits);
    }

    let time_offset = record.timestamp.saturating_sub(flight_start);
    w.write(time_offset as u32, header.bits("TIME"));
    pack_signed(
        &mut w,
        record.off_nadir_angle,
        header.bits("OFF_NADIR_ANGLE"),
        header.scale("OFF_NADIR_ANGLE"),
    );

    let lat_bits = header.bits("REF_LAT");
    let lat_scale = header.scale("REF_LAT");
    let lat_bias = bitio::max_value(lat_bits) as i64 / 2;
    let lat_raw = (((record.reference_latitude - header.base_latitude()) * lat_scale).round()
        as i64
        + lat_bias)
        .clamp(0, bitio::max_value(lat_bits) as i64) as u32;
    w.write(lat_raw, lat_bits);

    let band = lat_band_from_stored(lat_raw, lat_bits, lat_scale, header.base_latitude());
    let lon_bits = header.bits("REF_LON");
    let lon_scale = header.scale("REF_LON") * cos_for_band(band);
    let lon_bias = bitio::max_value(lon_bits) as i64 / 2;
    let lon_raw = (((record.reference_longitude - header.base_longitude()) * lon_scale).round()
        as i64
        + lon_bias)
        .clamp(0, bitio::max_value(lon_bits) as i64) as u32;
    w.write(lon_raw, lon_bits);

    pack_signed_or_null(
        &mut w,
        record.water_level,
        header.bits("WATER_LEVEL"),
        header.scale("WATER_LEVEL"),
    );
    pack_signed(
        &mut w,
        record.vertical_datum_offset,
        header.bits("VERTICAL_DATUM_OFFSET"),
        header.scale("VERTICAL_DATUM_OFFSET"),
    );
    w.write(u32::from(record.user_data), header.bits("USER_DATA"));

    // Section 9: core per-return fields, all channels.
    for channel in &record.channels {
        for ret in &channel.returns {
            if ret.elevation.is_none() {
                // Forced equal to the shot reference so the diff field never
                // carries an otherwise-undefined position (§4.4 item 9).
                pack_signed(&mut w, 0.0, header.bits("LAT_DIFF"), header.scale("LAT_DIFF"));
                pack_signed(&mut w, 0.0, header.bits("LON_DIFF"), header.scale("LON_DIFF"));
            } else {
                pack_signed(
                    &mut w,
                    ret.latitude - record.reference_latitude,
                    header.bits("LAT_DIFF"),
                    header.scale("LAT_DIFF"),
                );
                pack_signed(
                    &mut w,
                    ret.longitude - record.reference_longitude,
                    header.bits("LON_DIFF"),
                    header.scale("LON_DIFF"),
                );
            }
            pack_signed_or_null(&mut w, ret.elevation, header.bits("ELEV"), header.scale("ELEV"));
            pack_unsigned(&mut w, ret.reflectance, header.bits("REFLECTANCE"), header.scale("REFLECTANCE"));
            pack_unsigned(
                &mut w,
                ret.horizontal_uncertainty,
                header.bits("UNCERTAINTY"),
                header.scale("UNCERTAINTY"),
            );
            pack_unsigned(
                &mut w,
                ret.vertical_uncertainty,
                header.bits("UNCERTAINTY"),
                header.scale("UNCERTAINTY"),
            );
            w.write(u32::from(ret.status), header.bits("STATUS"));
            w.write(u32::from(ret.classification), header.bits("CLASSIFICATION"));
            pack_signed(
                &mut w,
                ret.interest_point_offset,
                header.bits("IP_OFFSET"),
                header.scale("IP_OFFSET"),
            );
            w.write(u32::from(ret.ip_rank), header.bits("IP_RANK"));
        }
    }

    // Section 10: bare-earth triples.
    for be in &record.bare_earth {
        pack_signed(
            &mut w,
            be.latitude - record.reference_latitude,
            header.bits("LAT_DIFF"),
            header.scale("LAT_DIFF"),
        );
        pack_signed(
            &mut w,
            be.longitude - record.reference_longitude,
            header.bits("LON_DIFF"),
            header.scale("LON_DIFF"),
        );
        pack_signed(&mut w, be.elevation, header.bits("BARE_EARTH_ELEV"), header.scale("BARE_EARTH_ELEV"));
    }

    // Sections 11-13.
    pack_unsigned(&mut w, record.kd, header.bits("KD"), header.scale("KD"));
    pack_unsigned(&mut w, record.laser_energy, header.bits("LASER_ENERGY"), header.scale("LASER_ENERGY"));
    pack_signed(
        &mut w,
        record.t0_interest_point,
        header.bits("T0_INTEREST_POINT"),
        header.scale("T0_INTEREST_POINT"),
    );

    // Section 14 (v >= 2).
    if header.version().major >= 2 {
        for channel in &record.channels {
            w.write(u32::from(channel.optech_classification), header.bits("OPTECH_CLASSIFICATION"));
        }
        for channel in &record.channels {
            for ret in &channel.returns {
                pack_unsigned(&mut w, ret.probability, header.bits("PROBABILITY"), header.scale("PROBABILITY"));
                w.write(u32::from(ret.filter_reason), header.bits("FILTER_REASON"));
            }
        }
    }

    // Sections 15-16 (v >= 3).
    if header.version().major >= 3 {
        w.write(u32::from(record.d_index_cube), header.bits("D_INDEX_CUBE"));
        for channel in &record.channels {
            for ret in &channel.returns {
                w.write(u32::from(ret.d_index), header.bits("D_INDEX"));
            }
        }
    }

    let byte_len = w.byte_len() as u32;
    w.patch(0, byte_len, LENGTH_PREFIX_BITS);
    w.into_bytes()
}

/// Decodes one CPF record from `buf`, applying version-compatibility
/// defaults and the classification read-back fixup (§4.4).
pub fn decode(header: &Header, flight_start: u64, buf: &[u8]) -> Record {
    let mut r = BitReader::new(buf);
    let _declared_len = r.read(LENGTH_PREFIX_BITS);

    let return_count_bits = header.bits("RETURN_COUNT");
    let mut counts = [0usize; CHANNEL_COUNT];
    for count in &mut counts {
        *count = r.read(return_count_bits) as usize;
    }

    let time_offset = r.read(header.bits("TIME"));
    let timestamp = flight_start + u64::from(time_offset);
    let off_nadir_angle = unpack_signed(&mut r, header.bits("OFF_NADIR_ANGLE"), header.scale("OFF_NADIR_ANGLE"));

    let lat_bits = header.bits("REF_LAT");
    let lat_scale = header.scale("REF_LAT");
    let lat_raw = r.read(lat_bits);
    let band = lat_band_from_stored(lat_raw, lat_bits, lat_scale, header.base_latitude());
    let lat_bias = bitio::max_value(lat_bits) as i64 / 2;
    let reference_latitude =
        (lat_raw as i64 - lat_bias) as f64 / lat_scale + header.base_latitude();

    let lon_bits = header.bits("REF_LON");
    let lon_scale = header.scale("REF_LON") * cos_for_band(band);
    let lon_bias = bitio::max_value(lon_bits) as i64 / 2;
    let lon_raw = r.read(lon_bits);
    let reference_longitude = (lon_raw as i64 - lon_bias) as f64 / lon_scale + header.base_longitude();

    let water_level = unpack_signed_or_null(&mut r, header.bits("WATER_LEVEL"), header.scale("WATER_LEVEL"));
    let vertical_datum_offset = unpack_signed(
        &mut r,
        header.bits("VERTICAL_DATUM_OFFSET"),
        header.scale("VERTICAL_DATUM_OFFSET"),
    );
    let user_data = r.read(header.bits("USER_DATA")) as u16;

    let mut channels: [Channel; CHANNEL_COUNT] = Default::default();
    for (channel_index, channel) in channels.iter_mut().enumerate() {
        let mut returns = Vec::with_capacity(counts[channel_index]);
        for _ in 0..counts[channel_index] {
            let lat_diff = unpack_signed(&mut r, header.bits("LAT_DIFF"), header.scale("LAT_DIFF"));
            let lon_diff = unpack_signed(&mut r, header.bits("LON_DIFF"), header.scale("LON_DIFF"));
            let elevation = unpack_signed_or_null(&mut r, header.bits("ELEV"), header.scale("ELEV"));
            let reflectance = unpack_unsigned(&mut r, header.bits("REFLECTANCE"), header.scale("REFLECTANCE"));
            let horizontal_uncertainty =
                unpack_unsigned(&mut r, header.bits("UNCERTAINTY"), header.scale("UNCERTAINTY"));
            let vertical_uncertainty =
                unpack_unsigned(&mut r, header.bits("UNCERTAINTY"), header.scale("UNCERTAINTY"));
            let status = r.read(header.bits("STATUS")) as u8;
            let mut classification = r.read(header.bits("CLASSIFICATION")) as u8;
            let interest_point_offset =
                unpack_signed(&mut r, header.bits("IP_OFFSET"), header.scale("IP_OFFSET"));
            let ip_rank = r.read(header.bits("IP_RANK")) as u8;
            if classification == 0 && ip_rank == 0 {
                classification = CLASSIFICATION_WATER_SURFACE;
            }
            returns.push(Return {
                latitude: reference_latitude + lat_diff,
                longitude: reference_longitude + lon_diff,
                elevation,
                reflectance,
                horizontal_uncertainty,
                vertical_uncertainty,
                status,
                classification,
                interest_point_offset,
                ip_rank,
                probability: 0.0,
                filter_reason: 0,
                d_index: 0,
            });
        }
        channel.returns = returns;
    }

    let mut bare_earth = [BareEarth::default(); BARE_EARTH_COUNT];
    for be in &mut bare_earth {
        let lat_diff = unpack_signed(&mut r, header.bits("LAT_DIFF"), header.scale("LAT_DIFF"));
        let lon_diff = unpack_signed(&mut r, header.bits("LON_DIFF"), header.scale("LON_DIFF"));
        let elevation = unpack_signed(&mut r, header.bits("BARE_EARTH_ELEV"), header.scale("BARE_EARTH_ELEV"));
        *be = BareEarth {
            latitude: reference_latitude + lat_diff,
            longitude: reference_longitude + lon_diff,
            elevation,
        };
    }

    let kd = unpack_unsigned(&mut r, header.bits("KD"), header.scale("KD"));
    let laser_energy = unpack_unsigned(&mut r, header.bits("LASER_ENERGY"), header.scale("LASER_ENERGY"));
    let t0_interest_point =
        unpack_signed(&mut r, header.bits("T0_INTEREST_POINT"), header.scale("T0_INTEREST_POINT"));

    let mut d_index_cube = 0u8;
    if header.version().major >= 2 {
        for channel in &mut channels {
            channel.optech_classification = r.read(header.bits("OPTECH_CLASSIFICATION")) as u8;
        }
        for channel in &mut channels {
            for ret in &mut channel.returns {
                ret.probability = unpack_unsigned(&mut r, header.bits("PROBABILITY"), header.scale("PROBABILITY"));
                ret.filter_reason = r.read(header.bits("FILTER_REASON")) as u8;
            }
        }
    } else {
        for channel in &mut channels {
            let legacy = channel
                .returns
                .iter()
                .rev()
                .find(|ret| ret.elevation.is_some())
                .map(|ret| ret.classification)
                .unwrap_or(0);
            channel.optech_classification = if (2..=8).contains(&legacy) {
                legacy + 30
            } else {
                legacy
            };
        }
    }

    if header.version().major >= 3 {
        d_index_cube = r.read(header.bits("D_INDEX_CUBE")) as u8;
        for channel in &mut channels {
            for ret in &mut channel.returns {
                ret.d_index = r.read(header.bits("D_INDEX")) as u8;
            }
        }
    }

    Record {
        timestamp,
        off_nadir_angle,
        reference_latitude,
        reference_longitude,
        water_level,
        vertical_datum_offset,
        user_data,
        channels,
        bare_earth,
        kd,
        laser_energy,
        t0_interest_point,
        d_index_cube,
    }
}

fn overwrite_signed(buf: &mut [u8], bit_off: u64, value: f64, bits: u32, scale: f64) {
    let bias = bitio::max_value(bits) as i64 / 2;
    let raw = (value * scale).round() as i64 + bias;
    bitio::pack(buf, bit_off, bits, raw.clamp(0, bitio::max_value(bits) as i64) as u32);
}

fn overwrite_unsigned(buf: &mut [u8], bit_off: u64, value: f64, bits: u32, scale: f64) {
    let raw = (value * scale).round().clamp(0.0, bitio::max_value(bits) as f64);
    bitio::pack(buf, bit_off, bits, raw as u32);
}

fn overwrite_raw(buf: &mut [u8], bit_off: u64, value: u32, bits: u32) {
    bitio::pack(buf, bit_off, bits, value);
}

/// Which fields a narrow update is allowed to touch (§4.4).
#[derive(Clone, Copy, PartialEq, Eq)]
enum UpdateLevel {
    /// Vertical datum offset, user data, kd, laser energy, t0 interest
    /// point, bare earth, optech classification, probability, and the
    /// per-return reflectance/uncertainty/status/classification/filter-reason.
    Modifiable,
    /// Per-return status, classification, filter reason, and user data only.
    Status,
}

/// Shared walk for both narrow update paths: advances a bit cursor over
/// `existing` in lock-step with `encode_body`'s field order, overwriting in
/// place only the fields `level` allows and leaving every other bit
/// untouched -- the "skip over, bit position advanced, bytes unread"
/// behaviour spec.md §4.4/§9 calls out, which prevents scale-induced
/// "creep" in fields a `decode`→`encode_body` round trip would otherwise
/// perturb, and is what makes the non-modifiable bits bytewise stable
/// (P9).
fn apply_narrow_update(header: &Header, existing: &[u8], new: &Record, level: UpdateLevel) -> Vec<u8> {
    let mut out = existing.to_vec();
    let mut r = BitReader::new(existing);
    r.skip(LENGTH_PREFIX_BITS);

    let return_count_bits = header.bits("RETURN_COUNT");
    let mut counts = [0usize; CHANNEL_COUNT];
    for count in &mut counts {
        *count = r.read(return_count_bits) as usize;
    }

    r.skip(header.bits("TIME"));
    r.skip(header.bits("OFF_NADIR_ANGLE"));

    let lat_bits = header.bits("REF_LAT");
    let lat_scale = header.scale("REF_LAT");
    let lat_raw = r.read(lat_bits);
    let band = lat_band_from_stored(lat_raw, lat_bits, lat_scale, header.base_latitude());
    let lat_bias = bitio::max_value(lat_bits) as i64 / 2;
    let reference_latitude = (lat_raw as i64 - lat_bias) as f64 / lat_scale + header.base_latitude();

    let lon_bits = header.bits("REF_LON");
    let lon_scale = header.scale("REF_LON") * cos_for_band(band);
    let lon_bias = bitio::max_value(lon_bits) as i64 / 2;
    let lon_raw = r.read(lon_bits);
    let reference_longitude = (lon_raw as i64 - lon_bias) as f64 / lon_scale + header.base_longitude();

    r.skip(header.bits("WATER_LEVEL"));

    let vdo_bits = header.bits("VERTICAL_DATUM_OFFSET");
    if level == UpdateLevel::Modifiable {
        overwrite_signed(&mut out, r.bit_pos(), new.vertical_datum_offset, vdo_bits, header.scale("VERTICAL_DATUM_OFFSET"));
    }
    r.skip(vdo_bits);

    let user_data_bits = header.bits("USER_DATA");
    overwrite_raw(&mut out, r.bit_pos(), u32::from(new.user_data), user_data_bits);
    r.skip(user_data_bits);

    let lat_diff_bits = header.bits("LAT_DIFF");
    let lon_diff_bits = header.bits("LON_DIFF");
    let elev_bits = header.bits("ELEV");
    let reflectance_bits = header.bits("REFLECTANCE");
    let reflectance_scale = header.scale("REFLECTANCE");
    let uncertainty_bits = header.bits("UNCERTAINTY");
    let uncertainty_scale = header.scale("UNCERTAINTY");
    let status_bits = header.bits("STATUS");
    let classification_bits = header.bits("CLASSIFICATION");
    let ip_offset_bits = header.bits("IP_OFFSET");
    let ip_rank_bits = header.bits("IP_RANK");

    for (channel_idx, &count) in counts.iter().enumerate() {
        let new_channel = new.channels.get(channel_idx);
        for ret_idx in 0..count {
            let new_return = new_channel.and_then(|c| c.returns.get(ret_idx));

            r.skip(lat_diff_bits);
            r.skip(lon_diff_bits);
            r.skip(elev_bits);

            if let (UpdateLevel::Modifiable, Some(ret)) = (level, new_return) {
                overwrite_unsigned(&mut out, r.bit_pos(), ret.reflectance, reflectance_bits, reflectance_scale);
            }
            r.skip(reflectance_bits);

            if let (UpdateLevel::Modifiable, Some(ret)) = (level, new_return) {
                overwrite_unsigned(&mut out, r.bit_pos(), ret.horizontal_uncertainty, uncertainty_bits, uncertainty_scale);
            }
            r.skip(uncertainty_bits);

            if let (UpdateLevel::Modifiable, Some(ret)) = (level, new_return) {
                overwrite_unsigned(&mut out, r.bit_pos(), ret.vertical_uncertainty, uncertainty_bits, uncertainty_scale);
            }
            r.skip(uncertainty_bits);

            if let Some(ret) = new_return {
                overwrite_raw(&mut out, r.bit_pos(), u32::from(ret.status), status_bits);
            }
            r.skip(status_bits);

            if let Some(ret) = new_return {
                overwrite_raw(&mut out, r.bit_pos(), u32::from(ret.classification), classification_bits);
            }
            r.skip(classification_bits);

            r.skip(ip_offset_bits);
            r.skip(ip_rank_bits);
        }
    }

    let bare_earth_elev_bits = header.bits("BARE_EARTH_ELEV");
    let bare_earth_elev_scale = header.scale("BARE_EARTH_ELEV");
    for be_idx in 0..BARE_EARTH_COUNT {
        if level == UpdateLevel::Modifiable {
            let be = &new.bare_earth[be_idx];
            overwrite_signed(&mut out, r.bit_pos(), be.latitude - reference_latitude, lat_diff_bits, header.scale("LAT_DIFF"));
        }
        r.skip(lat_diff_bits);
        if level == UpdateLevel::Modifiable {
            let be = &new.bare_earth[be_idx];
            overwrite_signed(&mut out, r.bit_pos(), be.longitude - reference_longitude, lon_diff_bits, header.scale("LON_DIFF"));
        }
        r.skip(lon_diff_bits);
        if level == UpdateLevel::Modifiable {
            let be = &new.bare_earth[be_idx];
            overwrite_signed(&mut out, r.bit_pos(), be.elevation, bare_earth_elev_bits, bare_earth_elev_scale);
        }
        r.skip(bare_earth_elev_bits);
    }

    let kd_bits = header.bits("KD");
    if level == UpdateLevel::Modifiable {
        overwrite_unsigned(&mut out, r.bit_pos(), new.kd, kd_bits, header.scale("KD"));
    }
    r.skip(kd_bits);

    let laser_energy_bits = header.bits("LASER_ENERGY");
    if level == UpdateLevel::Modifiable {
        overwrite_unsigned(&mut out, r.bit_pos(), new.laser_energy, laser_energy_bits, header.scale("LASER_ENERGY"));
    }
    r.skip(laser_energy_bits);

    let t0_bits = header.bits("T0_INTEREST_POINT");
    if level == UpdateLevel::Modifiable {
        overwrite_signed(&mut out, r.bit_pos(), new.t0_interest_point, t0_bits, header.scale("T0_INTEREST_POINT"));
    }
    r.skip(t0_bits);

    if header.version().major >= 2 {
        let optech_bits = header.bits("OPTECH_CLASSIFICATION");
        for (channel_idx, _count) in counts.iter().enumerate() {
            if level == UpdateLevel::Modifiable {
                if let Some(new_channel) = new.channels.get(channel_idx) {
                    overwrite_raw(&mut out, r.bit_pos(), u32::from(new_channel.optech_classification), optech_bits);
                }
            }
            r.skip(optech_bits);
        }

        let probability_bits = header.bits("PROBABILITY");
        let probability_scale = header.scale("PROBABILITY");
        let filter_reason_bits = header.bits("FILTER_REASON");
        for (channel_idx, &count) in counts.iter().enumerate() {
            let new_channel = new.channels.get(channel_idx);
            for ret_idx in 0..count {
                let new_return = new_channel.and_then(|c| c.returns.get(ret_idx));
                if let (UpdateLevel::Modifiable, Some(ret)) = (level, new_return) {
                    overwrite_unsigned(&mut out, r.bit_pos(), ret.probability, probability_bits, probability_scale);
                }
                r.skip(probability_bits);
                if let Some(ret) = new_return {
                    overwrite_raw(&mut out, r.bit_pos(), u32::from(ret.filter_reason), filter_reason_bits);
                }
                r.skip(filter_reason_bits);
            }
        }
    }

    out
}

/// Applies a "modifiable-only" update (§4.4): overwrites in place the
/// fields the format designates modifiable, skipping over (never touching)
/// every other bit in `existing`, so the non-modifiable fields cannot creep
/// under repeated quantisation (P9).
pub fn update_modifiable(header: &Header, _flight_start: u64, existing: &[u8], new: &Record) -> Vec<u8> {
    apply_narrow_update(header, existing, new, UpdateLevel::Modifiable)
}

/// Applies a "status-only" update (§4.4): the narrowest update path, only
/// per-return status, classification, filter reason, and per-shot user
/// data, leaving every other bit untouched.
pub fn update_status(header: &Header, _flight_start: u64, existing: &[u8], new: &Record) -> Vec<u8> {
    apply_narrow_update(header, existing, new, UpdateLevel::Status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{Builder, FileType};

    fn sample_record() -> Record {
        let mut record = Record {
            timestamp: 1_000_500,
            off_nadir_angle: 3.25,
            reference_latitude: 28.5,
            reference_longitude: -83.1,
            water_level: Some(0.42),
            vertical_datum_offset: -0.05,
            user_data: 7,
            kd: 0.21,
            laser_energy: 12.5,
            t0_interest_point: 1.5,
            ..Default::default()
        };
        record.channels[0].returns.push(Return {
            latitude: 28.5001,
            longitude: -83.0999,
            elevation: Some(-12.34),
            reflectance: 0.8,
            horizontal_uncertainty: 0.1,
            vertical_uncertainty: 0.05,
            status: 3,
            classification: 2,
            interest_point_offset: 0.5,
            ip_rank: 1,
            ..Default::default()
        });
        record
    }

    #[test]
    fn roundtrips_v3_record() {
        let header = Builder::new(FileType::Cpf, (3, 0)).into_header().unwrap();
        let record = sample_record();
        let bytes = encode(&header, 1_000_000, None, &record).unwrap();
        let decoded = decode(&header, 1_000_000, &bytes);
        assert_eq!(record.timestamp, decoded.timestamp);
        assert!((record.reference_latitude - decoded.reference_latitude).abs() < 1e-5);
        assert!((record.reference_longitude - decoded.reference_longitude).abs() < 1e-5);
        let ret = &decoded.channels[0].returns[0];
        assert!((ret.latitude - record.channels[0].returns[0].latitude).abs() < 1e-4);
        assert_eq!(2, ret.classification);
    }

    #[test]
    fn null_elevation_forces_position_to_reference() {
        let header = Builder::new(FileType::Cpf, (2, 0)).into_header().unwrap();
        let mut record = sample_record();
        record.channels[0].returns[0] = Return {
            elevation: None,
            latitude: 0.0,
            longitude: 0.0,
            ..Default::default()
        };
        let bytes = encode(&header, 1_000_000, None, &record).unwrap();
        let decoded = decode(&header, 1_000_000, &bytes);
        let ret = &decoded.channels[0].returns[0];
        assert_eq!(None, ret.elevation);
        assert!((ret.latitude - decoded.reference_latitude).abs() < 1e-9);
        assert!((ret.longitude - decoded.reference_longitude).abs() < 1e-9);
    }

    #[test]
    fn classification_zero_with_zero_ip_rank_becomes_water_surface() {
        let header = Builder::new(FileType::Cpf, (2, 0)).into_header().unwrap();
        let mut record = sample_record();
        record.channels[0].returns[0].classification = 0;
        record.channels[0].returns[0].ip_rank = 0;
        let bytes = encode(&header, 1_000_000, None, &record).unwrap();
        let decoded = decode(&header, 1_000_000, &bytes);
        assert_eq!(CLASSIFICATION_WATER_SURFACE, decoded.channels[0].returns[0].classification);
    }

    #[test]
    fn time_regression_is_a_hard_error() {
        let header = Builder::new(FileType::Cpf, (2, 0)).into_header().unwrap();
        let record = sample_record();
        let err = encode(&header, 1_000_000, Some(record.timestamp), &record).unwrap_err();
        assert!(matches!(err, Error::TimeRegression { .. }));
    }

    #[test]
    fn v1_read_reconstructs_optech_classification_with_water_bias() {
        let header = Builder::new(FileType::Cpf, (1, 0)).into_header().unwrap();
        let mut record = sample_record();
        record.channels[0].returns[0].classification = 4; // water mode
        let bytes = encode(&header, 1_000_000, None, &record).unwrap();
        let decoded = decode(&header, 1_000_000, &bytes);
        assert_eq!(34, decoded.channels[0].optech_classification);
        assert_eq!(0.0, decoded.channels[0].returns[0].probability);
    }

    #[test]
    fn modifiable_update_changes_only_modifiable_fields() {
        let header = Builder::new(FileType::Cpf, (2, 0)).into_header().unwrap();
        let record = sample_record();
        let original = encode(&header, 1_000_000, None, &record).unwrap();

        let mut patch = record.clone();
        patch.channels[0].returns[0].reflectance = 0.99;
        patch.kd = 9.99;
        let updated = update_modifiable(&header, 1_000_000, &original, &patch);

        assert_eq!(original.len(), updated.len());
        let decoded = decode(&header, 1_000_000, &updated);
        assert!((decoded.channels[0].returns[0].reflectance - 0.99).abs() < 0.01);
        assert!((decoded.kd - 9.99).abs() < 0.02);
        // Non-modifiable fields (reference position, timestamp) are unchanged.
        assert_eq!(record.timestamp, decoded.timestamp);
        assert!((record.reference_latitude - decoded.reference_latitude).abs() < 1e-5);
    }

    #[test]
    fn status_update_is_idempotent() {
        let header = Builder::new(FileType::Cpf, (2, 0)).into_header().unwrap();
        let record = sample_record();
        let original = encode(&header, 1_000_000, None, &record).unwrap();

        let mut patch = record.clone();
        patch.channels[0].returns[0].status = 9;
        patch.channels[0].returns[0].classification = 5;

        let once = update_status(&header, 1_000_000, &original, &patch);
        let twice = update_status(&header, 1_000_000, &once, &patch);
        assert_eq!(once, twice);
    }
}
