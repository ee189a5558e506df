//! The CAF (audit) record codec: fixed-width, append-only list of edits
//! applied to a CPF. The `application_timestamp` that accompanies an audit
//! batch lives on the header (stamped once per `apply`, see
//! [`crate::header::Header::stamp_application_timestamp`]), not on each row.

use crate::bitio::{BitReader, BitWriter};
use crate::header::Header;

/// One CAF record: one edit applied to one CPF return.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Record {
    /// The shot this edit applies to.
    pub shot_id: u32,
    /// Which of the 9 channels.
    pub channel_number: u8,
    /// The optech classification assigned by the edit.
    pub optech_classification: u8,
    /// Interest point offset, in the field's physical unit (hundredths, per default scale).
    pub interest_point: f64,
    /// Which return within the channel (1-based).
    pub return_number: u8,
    /// Total number of returns in the channel at the time of the edit.
    pub number_of_returns: u8,
}

/// The fixed byte length of one CAF record under `header`.
pub fn record_len(header: &Header) -> usize {
    let bits = u64::from(header.bits("SHOT_ID"))
        + u64::from(header.bits("CHANNEL_NUMBER"))
        + u64::from(header.bits("OPTECH_CLASSIFICATION"))
        + u64::from(header.bits("INTEREST_POINT"))
        + u64::from(header.bits("RETURN_NUMBER"))
        + u64::from(header.bits("NUMBER_OF_RETURNS"));
    bits.div_ceil(8) as usize
}

/// Encodes `record`, returning exactly [`record_len`] bytes.
pub fn encode(header: &Header, record: &Record) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write(record.shot_id, header.bits("SHOT_ID"));
    w.write(u32::from(record.channel_number), header.bits("CHANNEL_NUMBER"));
    w.write(u32::from(record.optech_classification), header.bits("OPTECH_CLASSIFICATION"));
    let ip_scale = header.scale("INTEREST_POINT");
    w.write((record.interest_point * ip_scale).round() as u32, header.bits("INTEREST_POINT"));
    w.write(u32::from(record.return_number), header.bits("RETURN_NUMBER"));
    w.write(u32::from(record.number_of_returns), header.bits("NUMBER_OF_RETURNS"));
    let mut bytes = w.into_bytes();
    bytes.resize(record_len(header), 0);
    bytes
}

/// Decodes one CAF record from `buf`.
pub fn decode(header: &Header, buf: &[u8]) -> Record {
    let mut r = BitReader::new(buf);
    let shot_id = r.read(header.bits("SHOT_ID"));
    let channel_number = r.read(header.bits("CHANNEL_NUMBER")) as u8;
    let optech_classification = r.read(header.bits("OPTECH_CLASSIFICATION")) as u8;
    let ip_raw = r.read(header.bits("INTEREST_POINT"));
    let interest_point = f64::from(ip_raw) / header.scale("INTEREST_POINT");
    let return_number = r.read(header.bits("RETURN_NUMBER")) as u8;
    let number_of_returns = r.read(header.bits("NUMBER_OF_RETURNS")) as u8;
    Record {
        shot_id,
        channel_number,
        optech_classification,
        interest_point,
        return_number,
        number_of_returns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{Builder, FileType};

    #[test]
    fn roundtrips() {
        let header = Builder::new(FileType::Caf, (1, 0)).into_header().unwrap();
        let record = Record {
            shot_id: 99,
            channel_number: 3,
            optech_classification: 41,
            interest_point: 12.34,
            return_number: 1,
            number_of_returns: 2,
        };
        let bytes = encode(&header, &record);
        assert_eq!(record_len(&header), bytes.len());
        let decoded = decode(&header, &bytes);
        assert_eq!(record.shot_id, decoded.shot_id);
        assert_eq!(record.channel_number, decoded.channel_number);
        assert!((record.interest_point - decoded.interest_point).abs() < 0.02);
        assert_eq!(record.number_of_returns, decoded.number_of_returns);
    }
}
