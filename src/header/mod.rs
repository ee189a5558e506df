//! The ASCII header that precedes every CZMIL file, and the typed view
//! built on top of it.
//!
//! A [`Header`] is both a human-readable manifest and the format descriptor:
//! it enumerates the bit widths, scale factors, and integer offsets used to
//! decode every record in the file it precedes. [`header::raw`] implements
//! the line-oriented text format; this module builds a typed, named-field
//! view over it and owns the "aggregate" state (record count, bounding box,
//! flight time span) that gets rewritten on every close.
//!
//! # Examples
//!
//! ```
//! use czmil::header::{Builder, FileType};
//! let header = Builder::new(FileType::Cpf, (3, 0)).into_header().unwrap();
//! assert_eq!(10, header.bits("LAT"));
//! ```

pub mod raw;

mod builder;

pub use builder::Builder;
pub use raw::RawHeader;

use std::collections::HashMap;
use std::io::{Read, Write};

use crate::bitio;
use crate::error::{Error, Result};

/// Which of the five co-located files a header describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileType {
    /// Waveform file (`.cwf`).
    Cwf,
    /// Point file (`.cpf`).
    Cpf,
    /// Sensor/navigation file (`.csf`).
    Csf,
    /// Audit file (`.caf`).
    Caf,
    /// Index file (`.cif`).
    Cif,
}

impl FileType {
    /// The canonical file extension, without a leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            FileType::Cwf => "cwf",
            FileType::Cpf => "cpf",
            FileType::Csf => "csf",
            FileType::Caf => "caf",
            FileType::Cif => "cif",
        }
    }

    /// The `[FILE TYPE]` tag value written into the header.
    pub fn tag_value(self) -> &'static str {
        match self {
            FileType::Cwf => "CZMIL WAVEFORM",
            FileType::Cpf => "CZMIL POINT",
            FileType::Csf => "CZMIL SENSOR",
            FileType::Caf => "CZMIL AUDIT",
            FileType::Cif => "CZMIL INDEX",
        }
    }

    /// Default header region size. 65536 for every type except CAF, which is smaller.
    pub fn default_header_size(self) -> u32 {
        match self {
            FileType::Caf => 4096,
            _ => 65_536,
        }
    }
}

/// A format version, `major.minor`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    /// The major version. CZMIL declares three: 1, 2, and 3.
    pub major: u8,
    /// The minor version.
    pub minor: u8,
}

impl Version {
    /// Creates a new version.
    pub fn new(major: u8, minor: u8) -> Version {
        Version { major, minor }
    }
}

impl From<(u8, u8)> for Version {
    fn from((major, minor): (u8, u8)) -> Version {
        Version::new(major, minor)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// The declared width, scale, and offset of one bit-packed field.
///
/// `max` (`2^bits - 1`) and `bias` (`max / 2`, used for fields stored as a
/// signed range around a center value) are derived, not stored, so that a
/// field override can never leave them stale.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldSpec {
    /// Bit width of the stored integer.
    pub bits: u32,
    /// Multiplier applied to convert the stored integer to a physical unit.
    pub scale: f64,
}

impl FieldSpec {
    /// `2^bits - 1`, the largest value the field can hold.
    pub fn max(self) -> u64 {
        bitio::max_value(self.bits)
    }

    /// `max / 2`, the bias added for fields whose stored integer represents
    /// a signed offset around a center value.
    pub fn bias(self) -> u64 {
        self.max() / 2
    }
}

/// Minimum and maximum observed latitude/longitude, exact at close time (I5).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoundingBox {
    /// Smallest observed latitude, degrees.
    pub min_lat: f64,
    /// Largest observed latitude, degrees.
    pub max_lat: f64,
    /// Smallest observed longitude, degrees.
    pub min_lon: f64,
    /// Largest observed longitude, degrees.
    pub max_lon: f64,
}

impl BoundingBox {
    /// Starts an "empty" bounding box that any real position will grow.
    pub fn empty() -> BoundingBox {
        BoundingBox {
            min_lat: f64::INFINITY,
            max_lat: f64::NEG_INFINITY,
            min_lon: f64::INFINITY,
            max_lon: f64::NEG_INFINITY,
        }
    }

    /// Grows the box to include `(lat, lon)`.
    pub fn grow(&mut self, lat: f64, lon: f64) {
        self.min_lat = self.min_lat.min(lat);
        self.max_lat = self.max_lat.max(lat);
        self.min_lon = self.min_lon.min(lon);
        self.max_lon = self.max_lon.max(lon);
    }
}

/// The typed descriptor for one open file: everything a record codec or file
/// engine needs to decode/encode records and maintain the header's aggregate
/// state.
#[derive(Clone, Debug, PartialEq)]
pub struct Header {
    file_type: FileType,
    version: Version,
    header_size: u32,
    fields: HashMap<String, FieldSpec>,
    creation_timestamp: u64,
    modification_timestamp: u64,
    number_of_records: u32,
    file_size: u64,
    flight_start_timestamp: u64,
    flight_end_timestamp: u64,
    bounds: BoundingBox,
    base_latitude: f64,
    base_longitude: f64,
    max_packets: u32,
    max_returns: u32,
    application_timestamp: u64,
    raw: RawHeader,
}

/// Known (non-application) tag names, so application-tag CRUD can reject collisions.
const RESERVED_TAGS: &[&str] = &[
    "VERSION",
    "FILE TYPE",
    "CREATION TIMESTAMP",
    "MODIFICATION TIMESTAMP",
    "NUMBER OF RECORDS",
    "HEADER SIZE",
    "FILE SIZE",
    "BUFFER SIZE BYTES",
    "TYPE BITS",
    "RANGE BITS",
    "RANGE SCALE",
    "CZMIL MAX PACKETS",
    "CZMIL MAX RETURNS",
    "BASE LATITUDE",
    "BASE LONGITUDE",
    "MIN LATITUDE",
    "MAX LATITUDE",
    "MIN LONGITUDE",
    "MAX LONGITUDE",
    "FLIGHT START TIMESTAMP",
    "FLIGHT END TIMESTAMP",
    "APPLICATION TIMESTAMP",
];

impl Header {
    /// The version-appropriate default field table for `file_type`/`version`.
    ///
    /// Field names are the canonical tag prefixes used in `[<NAME> BITS]` /
    /// `[<NAME> SCALE]` pairs, e.g. `"LAT"`, `"ELEV"`, `"RANGE"`.
    pub fn default_fields_for(file_type: FileType, version: Version) -> HashMap<String, FieldSpec> {
        let mut f = HashMap::new();
        let mut set = |name: &str, bits: u32, scale: f64| {
            f.insert(name.to_string(), FieldSpec { bits, scale });
        };
        match file_type {
            FileType::Cwf => {
                set("SAMPLE", 10, 1.0);
                set("PACKET_COUNT", 4, 1.0);
                set("CHANNEL_INDEX", 4, 1.0);
                set("MCWP_RANGE", 14, 100.0);
                set("TYPE", 2, 1.0);
                set("SHOT_ID", 32, 1.0);
                set("TIME", 32, 1.0);
                set("SCAN_ANGLE", 16, 100.0);
                set("VALIDITY", 8, 1.0);
                set("FIRST_DIFF_START", 10, 1.0);
                set("FIRST_DIFF_OFFSET", 11, 1.0);
                set("DELTA_BITS", 4, 1.0);
            }
            FileType::Cpf => {
                set("RETURN_COUNT", 4, 1.0);
                set("TIME", 32, 1.0);
                set("OFF_NADIR_ANGLE", 14, 100.0);
                set("REF_LAT", 32, 10_000_000.0);
                set("REF_LON", 32, 10_000_000.0);
                set("WATER_LEVEL", 16, 1000.0);
                set("VERTICAL_DATUM_OFFSET", 16, 1000.0);
                set("USER_DATA", 16, 1.0);
                set("LAT_DIFF", 24, 10_000_000.0);
                set("LON_DIFF", 24, 10_000_000.0);
                set("ELEV", 22, 1000.0);
                set("REFLECTANCE", 8, 1.0);
                set("UNCERTAINTY", 12, 1000.0);
                set("STATUS", 8, 1.0);
                set("CLASSIFICATION", 8, 1.0);
                set("IP_OFFSET", 10, 100.0);
                // Matches RETURN_COUNT's width (spec §4.4: "ip_rank_bits
                // defaults to equal return_bits" when a v3 file's tag is absent).
                set("IP_RANK", 4, 1.0);
                set("BARE_EARTH_ELEV", 22, 1000.0);
                set("KD", 8, 100.0);
                set("LASER_ENERGY", 12, 100.0);
                set("T0_INTEREST_POINT", 10, 100.0);
                if version.major >= 2 {
                    set("OPTECH_CLASSIFICATION", 8, 1.0);
                    set("PROBABILITY", 8, 100.0);
                    set("FILTER_REASON", 8, 1.0);
                }
                if version.major >= 3 {
                    set("D_INDEX", 8, 1.0);
                    set("D_INDEX_CUBE", 8, 1.0);
                }
            }
            FileType::Csf => {
                set("TIME", 32, 1.0);
                set("SCAN_ANGLE", 16, 100.0);
                set("LAT", 32, 10_000_000.0);
                set("LON", 32, 10_000_000.0);
                set("ALTITUDE", 24, 100.0);
                set("ROLL", 16, 100.0);
                set("PITCH", 16, 100.0);
                set("HEADING", 16, 100.0);
                set("RANGE", 16, 100.0);
                if version.major >= 2 {
                    set("IN_WATER_RANGE", 16, 100.0);
                    set("INTENSITY", 8, 1.0);
                    set("IN_WATER_INTENSITY", 8, 1.0);
                }
            }
            FileType::Caf => {
                set("SHOT_ID", 32, 1.0);
                set("CHANNEL_NUMBER", 4, 1.0);
                set("OPTECH_CLASSIFICATION", 8, 1.0);
                set("INTEREST_POINT", 10, 100.0);
                set("RETURN_NUMBER", 4, 1.0);
                set("NUMBER_OF_RETURNS", 4, 1.0);
            }
            FileType::Cif => {
                set("CWF_OFFSET", 64, 1.0);
                set("CPF_OFFSET", 64, 1.0);
                set("CWF_SIZE", 16, 1.0);
                set("CPF_SIZE", 16, 1.0);
            }
        }
        f
    }

    pub(crate) fn from_parts(
        file_type: FileType,
        version: Version,
        header_size: u32,
        fields: HashMap<String, FieldSpec>,
        base_latitude: f64,
        base_longitude: f64,
        max_packets: u32,
        max_returns: u32,
    ) -> Header {
        let mut raw = RawHeader::default();
        raw.set("MAGIC", raw::MAGIC);
        raw.set("VERSION", format!("V{version}"));
        raw.set("FILE TYPE", file_type.tag_value());
        Header {
            file_type,
            version,
            header_size,
            fields,
            creation_timestamp: 0,
            modification_timestamp: 0,
            number_of_records: 0,
            file_size: 0,
            flight_start_timestamp: u64::MAX,
            flight_end_timestamp: 0,
            bounds: BoundingBox::empty(),
            base_latitude,
            base_longitude,
            max_packets,
            max_returns,
            application_timestamp: 0,
            raw,
        }
    }

    /// Builds a default header of the given type at the newest version (3.0).
    pub fn default_for(file_type: FileType) -> Header {
        Builder::new(file_type, (3, 0)).into_header().unwrap()
    }

    /// This header's file type.
    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    /// This header's declared version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// The declared size, in bytes, of the ASCII header region.
    pub fn header_size(&self) -> u32 {
        self.header_size
    }

    /// The declared bit width of field `name`.
    pub fn bits(&self, name: &str) -> u32 {
        self.field(name).bits
    }

    /// The declared scale factor of field `name`.
    pub fn scale(&self, name: &str) -> f64 {
        self.field(name).scale
    }

    /// The full [`FieldSpec`] of `name`; fields absent in older versions
    /// default to a spec whose stored value reads back as 0 (per §4.2's
    /// "absent fields ... default to 0 on read").
    pub fn field(&self, name: &str) -> FieldSpec {
        self.fields
            .get(name)
            .copied()
            .unwrap_or(FieldSpec { bits: 1, scale: 1.0 })
    }

    /// True if `name` has an entry (i.e. this version declares the field at all).
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// The base latitude (CPF/CSF), origin of the low-resolution reference position.
    pub fn base_latitude(&self) -> f64 {
        self.base_latitude
    }

    /// The base longitude (CPF/CSF).
    pub fn base_longitude(&self) -> f64 {
        self.base_longitude
    }

    /// `CZMIL_MAX_PACKETS`.
    pub fn max_packets(&self) -> u32 {
        self.max_packets
    }

    /// `CZMIL_MAX_RETURNS`.
    pub fn max_returns(&self) -> u32 {
        self.max_returns
    }

    /// Current record count (`[NUMBER OF RECORDS]`).
    pub fn number_of_records(&self) -> u32 {
        self.number_of_records
    }

    /// The flight time span observed so far.
    pub fn flight_time_span(&self) -> (u64, u64) {
        (self.flight_start_timestamp, self.flight_end_timestamp)
    }

    /// The bounding box observed so far.
    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    /// Grows the header's aggregate state (record count, time span, bounds)
    /// as one more record is appended. Call this once per append.
    pub fn observe_record(&mut self, timestamp: u64, position: Option<(f64, f64)>) {
        self.number_of_records += 1;
        self.flight_start_timestamp = self.flight_start_timestamp.min(timestamp);
        self.flight_end_timestamp = self.flight_end_timestamp.max(timestamp);
        if let Some((lat, lon)) = position {
            self.bounds.grow(lat, lon);
        }
    }

    /// Stamps `[APPLICATION TIMESTAMP]`; used by CAF when an edit is applied.
    pub fn stamp_application_timestamp(&mut self, timestamp: u64) {
        self.application_timestamp = timestamp;
    }

    /// Adds a new application-defined tag, erroring on a name collision with
    /// a known tag or an existing application tag (I7).
    pub fn add_field(&mut self, name: &str, value: &str) -> Result<()> {
        if RESERVED_TAGS.contains(&name) {
            return Err(Error::ReservedTagName(name.to_string()));
        }
        self.raw.add_application_tag(name, value)
    }

    /// Reads back a previously added/updated application tag.
    pub fn get_field(&self, name: &str) -> Option<&str> {
        self.raw.get(name)
    }

    /// Updates an existing application tag.
    pub fn update_field(&mut self, name: &str, value: &str) -> Result<()> {
        self.raw.update_application_tag(name, value)
    }

    /// Deletes an application tag, shifting the header tail up.
    pub fn delete_field(&mut self, name: &str) -> Result<()> {
        self.raw.delete_application_tag(name)
    }

    /// Serialises this header (known tags plus preserved application tags)
    /// and writes it, space-padded to `header_size`.
    pub fn write_to<W: Write>(&self, mut write: W) -> Result<()> {
        let mut raw = self.raw.clone();
        raw.set("CREATION TIMESTAMP", self.creation_timestamp.to_string());
        raw.set(
            "MODIFICATION TIMESTAMP",
            self.modification_timestamp.to_string(),
        );
        raw.set("NUMBER OF RECORDS", self.number_of_records.to_string());
        raw.set("HEADER SIZE", self.header_size.to_string());
        raw.set("FILE SIZE", self.file_size.to_string());
        raw.set("CZMIL MAX PACKETS", self.max_packets.to_string());
        raw.set("CZMIL MAX RETURNS", self.max_returns.to_string());
        raw.set("BASE LATITUDE", self.base_latitude.to_string());
        raw.set("BASE LONGITUDE", self.base_longitude.to_string());
        if self.number_of_records > 0 {
            raw.set("MIN LATITUDE", self.bounds.min_lat.to_string());
            raw.set("MAX LATITUDE", self.bounds.max_lat.to_string());
            raw.set("MIN LONGITUDE", self.bounds.min_lon.to_string());
            raw.set("MAX LONGITUDE", self.bounds.max_lon.to_string());
            raw.set(
                "FLIGHT START TIMESTAMP",
                self.flight_start_timestamp.to_string(),
            );
            raw.set(
                "FLIGHT END TIMESTAMP",
                self.flight_end_timestamp.to_string(),
            );
        }
        if self.file_type == FileType::Caf {
            raw.set("APPLICATION TIMESTAMP", self.application_timestamp.to_string());
        }
        for (name, spec) in &self.fields {
            raw.set(format!("{name} BITS"), spec.bits.to_string());
            raw.set(format!("{name} SCALE"), spec.scale.to_string());
        }
        log::debug!(
            "writing {:?} header: {} records, {} application tags preserved",
            self.file_type,
            self.number_of_records,
            raw.lines
                .iter()
                .filter(|l| matches!(l, raw::RawLine::Tag { name, .. } if !name.ends_with(" BITS") && !name.ends_with(" SCALE") && !RESERVED_TAGS.contains(&name.as_str())))
                .count(),
        );
        raw.write_to(&mut write, self.header_size)
    }

    /// Reads and parses a header of the given, expected file type from `read`.
    pub fn read_from<R: Read>(
        read: R,
        expected_type: FileType,
        path_for_errors: &std::path::Path,
    ) -> Result<Header> {
        let raw = RawHeader::read_from(read, path_for_errors)?;
        let version_str = raw.get("VERSION").unwrap_or("V1.0");
        let version = parse_version(version_str);
        let header_size = raw
            .get("HEADER SIZE")
            .and_then(|v| v.parse().ok())
            .unwrap_or(expected_type.default_header_size());
        let max_packets = raw
            .get("CZMIL MAX PACKETS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(15);
        let max_returns = raw
            .get("CZMIL MAX RETURNS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(15);
        let base_latitude = raw
            .get("BASE LATITUDE")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0);
        let base_longitude = raw
            .get("BASE LONGITUDE")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0);

        let mut fields = Header::default_fields_for(expected_type, version);
        for name in fields.clone().keys() {
            if let Some(bits) = raw
                .get(&format!("{name} BITS"))
                .and_then(|v| v.parse().ok())
            {
                let scale = raw
                    .get(&format!("{name} SCALE"))
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1.0);
                fields.insert(name.clone(), FieldSpec { bits, scale });
            }
        }

        let mut header = Header::from_parts(
            expected_type,
            version,
            header_size,
            fields,
            base_latitude,
            base_longitude,
            max_packets,
            max_returns,
        );
        header.raw = raw;
        header.creation_timestamp = header
            .raw
            .get("CREATION TIMESTAMP")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        header.modification_timestamp = header
            .raw
            .get("MODIFICATION TIMESTAMP")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        header.number_of_records = header
            .raw
            .get("NUMBER OF RECORDS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        header.file_size = header
            .raw
            .get("FILE SIZE")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        header.flight_start_timestamp = header
            .raw
            .get("FLIGHT START TIMESTAMP")
            .and_then(|v| v.parse().ok())
            .unwrap_or(u64::MAX);
        header.flight_end_timestamp = header
            .raw
            .get("FLIGHT END TIMESTAMP")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        header.bounds = BoundingBox {
            min_lat: header
                .raw
                .get("MIN LATITUDE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(f64::INFINITY),
            max_lat: header
                .raw
                .get("MAX LATITUDE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(f64::NEG_INFINITY),
            min_lon: header
                .raw
                .get("MIN LONGITUDE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(f64::INFINITY),
            max_lon: header
                .raw
                .get("MAX LONGITUDE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(f64::NEG_INFINITY),
        };
        header.application_timestamp = header
            .raw
            .get("APPLICATION TIMESTAMP")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let library_major = 3u8;
        if version.major > library_major {
            log::warn!(
                "{}: file version {} is newer than this library ({}); proceeding",
                path_for_errors.display(),
                version,
                library_major
            );
        }
        Ok(header)
    }

    /// Updates the timestamps written on close; called by the file engine
    /// right before it rewrites the header.
    pub fn touch(&mut self, now_micros: u64) {
        if self.creation_timestamp == 0 {
            self.creation_timestamp = now_micros;
        }
        self.modification_timestamp = now_micros;
    }

    /// Sets the final `[FILE SIZE]` value; called by the file engine on close.
    pub fn set_file_size(&mut self, size: u64) {
        self.file_size = size;
    }
}

fn parse_version(s: &str) -> Version {
    let s = s.trim_start_matches('V');
    let mut parts = s.splitn(2, '.');
    let major = parts.next().and_then(|p| p.parse().ok()).unwrap_or(1);
    let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    Version::new(major, minor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn roundtrip_preserves_application_tags() {
        let mut header = Header::default_for(FileType::Cpf);
        header.add_field("SURVEY NAME", "block 12").unwrap();

        let mut buf = Vec::new();
        header.write_to(Cursor::new(&mut buf)).unwrap();

        let reopened = Header::read_from(
            Cursor::new(&buf),
            FileType::Cpf,
            std::path::Path::new("x.cpf"),
        )
        .unwrap();
        assert_eq!(Some("block 12"), reopened.get_field("SURVEY NAME"));
        assert_eq!(header.version(), reopened.version());
        assert_eq!(header.bits("ELEV"), reopened.bits("ELEV"));
    }

    #[test]
    fn version_forward_compatibility_defaults_absent_fields_to_zero_width() {
        let header = Builder::new(FileType::Cpf, (1, 0)).into_header().unwrap();
        assert!(!header.has_field("D_INDEX"));
        assert_eq!(1, header.bits("D_INDEX"));
    }

    #[test]
    fn observe_record_tracks_extrema() {
        let mut header = Header::default_for(FileType::Csf);
        header.observe_record(100, Some((10.0, 20.0)));
        header.observe_record(200, Some((5.0, 25.0)));
        assert_eq!((100, 200), header.flight_time_span());
        let bounds = header.bounds();
        assert_eq!(5.0, bounds.min_lat);
        assert_eq!(25.0, bounds.max_lon);
    }
}
