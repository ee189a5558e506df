//! Construct a [`Header`] with non-default settings before creating a file.
//!
//! Mirrors the teacher crate's `header::Builder`: a plain, publicly-fielded
//! struct that gets turned into the real [`Header`] by [`Builder::into_header`],
//! validating cross-field constraints along the way.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::header::{FieldSpec, FileType, Header, Version};

/// Builds a [`Header`] for a new file.
///
/// # Examples
///
/// ```
/// use czmil::header::{Builder, FileType};
/// let header = Builder::new(FileType::Cpf, (3, 0)).into_header().unwrap();
/// assert_eq!(3, header.version().major);
/// ```
#[derive(Clone, Debug)]
pub struct Builder {
    /// Which of the five file types this header describes.
    pub file_type: FileType,
    /// The format version this header will declare.
    pub version: Version,
    /// Overrides to the default field bit-width/scale/offset table.
    ///
    /// Most callers leave this empty and get the version-appropriate
    /// defaults; set entries here to widen or rescale specific fields.
    pub field_overrides: HashMap<String, FieldSpec>,
    /// The base latitude (degrees) returns are encoded as offsets from.
    pub base_latitude: f64,
    /// The base longitude (degrees) returns are encoded as offsets from.
    pub base_longitude: f64,
    /// `CZMIL_MAX_PACKETS`: the largest number of waveform packets per channel.
    pub max_packets: u32,
    /// `CZMIL_MAX_RETURNS`: the largest number of returns per channel.
    pub max_returns: u32,
    /// Declared header region size in bytes.
    pub header_size: u32,
}

impl Builder {
    /// Starts a builder with the version-appropriate defaults for `file_type`.
    pub fn new(file_type: FileType, version: impl Into<Version>) -> Builder {
        let version = version.into();
        Builder {
            file_type,
            version,
            field_overrides: HashMap::new(),
            base_latitude: 0.0,
            base_longitude: 0.0,
            max_packets: 15,
            max_returns: 15,
            header_size: file_type.default_header_size(),
        }
    }

    /// Builds the [`Header`], applying any field overrides on top of the
    /// version-appropriate defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValueOutOfRange`]-shaped validation failures if
    /// `max_packets`/`max_returns` are zero or absurdly large (> 31, since
    /// channel/packet-count fields are nibble- to 5-bit-wide in every
    /// profile this crate ships defaults for).
    pub fn into_header(self) -> Result<Header> {
        if self.max_packets == 0 || self.max_packets > 31 {
            return Err(Error::ValueOutOfRange {
                field: "CZMIL MAX PACKETS",
                value: self.max_packets as i64,
                max: 31,
                bits: 5,
            });
        }
        if self.max_returns == 0 || self.max_returns > 31 {
            return Err(Error::ValueOutOfRange {
                field: "CZMIL MAX RETURNS",
                value: self.max_returns as i64,
                max: 31,
                bits: 5,
            });
        }
        let mut fields = Header::default_fields_for(self.file_type, self.version);
        for (name, spec) in self.field_overrides {
            fields.insert(name, spec);
        }
        Ok(Header::from_parts(
            self.file_type,
            self.version,
            self.header_size,
            fields,
            self.base_latitude,
            self.base_longitude,
            self.max_packets,
            self.max_returns,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_max_returns() {
        let mut builder = Builder::new(FileType::Cpf, (3, 0));
        builder.max_returns = 0;
        assert!(builder.into_header().is_err());
    }

    #[test]
    fn default_builder_succeeds() {
        let header = Builder::new(FileType::Cwf, (2, 0)).into_header().unwrap();
        assert_eq!(FileType::Cwf, header.file_type());
    }
}
