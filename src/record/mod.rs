//! Per-file-type record codecs.
//!
//! Each submodule encodes/decodes one CZMIL record type to/from a bit-packed
//! byte buffer, using the field widths and scales declared in that file's
//! [`crate::header::Header`]. [`cwf`] and [`cpf`] are variable-length and
//! self-delimited by a length prefix (see [`LENGTH_PREFIX_BITS`]); [`csf`]
//! and [`caf`] are fixed-width; [`cif`] is the trivial fixed-width index row
//! that cross-links the two variable-length files.

pub mod caf;
pub mod cif;
pub mod cpf;
pub mod csf;
pub mod cwf;

/// Bit width of the length prefix that precedes every CWF and CPF record.
pub const LENGTH_PREFIX_BITS: u32 = 32;

/// Per-channel validity flags stored with a CWF record (v ≥ 2).
///
/// Stored as a plain bitmask byte per channel; [`ValidityCode::TimestampInvalid`]
/// is the one flag the codec itself ever sets (spec's time-regression
/// compensation), the rest are reserved for upstream producers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ValidityCode(pub u8);

impl ValidityCode {
    /// No flags set.
    pub const VALID: ValidityCode = ValidityCode(0);

    /// Set when the engine silently compensated a non-increasing timestamp
    /// by adding 100 microseconds.
    pub const TIMESTAMP_INVALID: ValidityCode = ValidityCode(0x01);

    /// True if `flag` is set.
    pub fn has(self, flag: ValidityCode) -> bool {
        self.0 & flag.0 != 0
    }

    /// Returns this code with `flag` set.
    pub fn with(self, flag: ValidityCode) -> ValidityCode {
        ValidityCode(self.0 | flag.0)
    }
}

/// Water-surface classification code substituted by CPF's lossy read-time
/// fixup (spec §4.4, §9): `classification == 0 && ip_rank == 0` is coerced
/// to this value on read. A writer cannot round-trip a true classification
/// of 0 with an ip_rank of 0; this is documented, not worked around.
pub const CLASSIFICATION_WATER_SURFACE: u8 = 41;

/// Microseconds silently added to a CWF timestamp that did not strictly
/// increase over the previous record (spec I4, §4.3, §9).
pub const CWF_TIME_REGRESSION_BUMP_MICROS: u64 = 100;
