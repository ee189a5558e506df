//! A CWF/CPF pair sharing one CIF, written then read back through the file
//! engine end to end (not just the record codecs in isolation).

use std::io::Cursor;
use std::sync::Arc;

use czmil::file::cpf::{CpfReader, CpfWriter};
use czmil::file::cwf::{CwfReader, CwfWriter};
use czmil::header::{Builder, FileType};
use czmil::index::Cif;
use czmil::record::cpf::Record as CpfRecord;
use czmil::record::cwf::Record as CwfRecord;

#[test]
fn paired_shots_share_ordinals_through_one_cif() {
    let cwf_header = Builder::new(FileType::Cwf, (2, 0)).into_header().unwrap();
    let cpf_header = Builder::new(FileType::Cpf, (3, 0)).into_header().unwrap();

    let mut cwf_writer = CwfWriter::new(Cursor::new(Vec::new()), cwf_header).unwrap();
    let cif = cwf_writer.cif();
    let mut cpf_writer = CpfWriter::new(Cursor::new(Vec::new()), cpf_header)
        .unwrap()
        .with_cif(Arc::clone(&cif));

    for shot in 0..3u32 {
        let mut cwf_record = CwfRecord {
            shot_id: shot,
            timestamp: 1_000_000 + u64::from(shot) * 1_000,
            ..Default::default()
        };
        cwf_record.channels[0].packets = vec![[shot as u16; czmil::compression::PACKET_SAMPLES]];
        cwf_record.channels[0].packet_indices = vec![0];
        cwf_record.channels[0].mcwp_ranges = vec![czmil::record::cwf::RANGE_INVALID];

        let ordinal = cwf_writer.append(&cwf_record).unwrap();
        assert_eq!(shot, ordinal);

        let cpf_record = CpfRecord {
            timestamp: cwf_record.timestamp,
            reference_latitude: 28.0 + f64::from(shot) * 0.001,
            reference_longitude: -83.0,
            ..Default::default()
        };
        cpf_writer.append(ordinal, &cpf_record).unwrap();
    }

    cwf_writer.close().unwrap();
    cpf_writer.close().unwrap();
    let cwf_stream = cwf_writer.into_inner().unwrap();
    let cpf_stream = cpf_writer.into_inner().unwrap();

    let mut cwf_reader = CwfReader::new(cwf_stream, Arc::clone(&cif)).unwrap();
    let mut cpf_reader = CpfReader::new(cpf_stream, Arc::clone(&cif)).unwrap();

    for shot in 0..3u32 {
        let cwf_record = cwf_reader.read(shot).unwrap();
        let cpf_record = cpf_reader.read(shot).unwrap();
        assert_eq!(shot, cwf_record.shot_id);
        assert_eq!(cwf_record.timestamp, cpf_record.timestamp);
    }

    assert_eq!(3, cif.lock().unwrap().len());
}

#[test]
fn cwf_time_regression_is_compensated_through_the_writer() {
    let header = Builder::new(FileType::Cwf, (2, 0)).into_header().unwrap();
    let mut writer = CwfWriter::new(Cursor::new(Vec::new()), header).unwrap();
    let first = CwfRecord {
        shot_id: 0,
        timestamp: 5_000_000,
        ..Default::default()
    };
    let second = CwfRecord {
        shot_id: 1,
        timestamp: 5_000_000,
        ..Default::default()
    };
    writer.append(&first).unwrap();
    writer.append(&second).unwrap();
    let cif = writer.cif();
    writer.close().unwrap();
    let stream = writer.into_inner().unwrap();

    let mut reader = CwfReader::new(stream, cif).unwrap();
    let decoded = reader.read(1).unwrap();
    assert_eq!(5_000_100, decoded.timestamp);
    assert!(decoded.validity[0].has(czmil::record::ValidityCode::TIMESTAMP_INVALID));
}

#[test]
fn standalone_cpf_rejects_a_non_increasing_timestamp() {
    let header = Builder::new(FileType::Cpf, (3, 0)).into_header().unwrap();
    let mut writer = CpfWriter::new(Cursor::new(Vec::new()), header).unwrap();
    let a = CpfRecord {
        timestamp: 10,
        ..Default::default()
    };
    let b = CpfRecord {
        timestamp: 10,
        ..Default::default()
    };
    writer.append_new(&a).unwrap();
    let err = writer.append_new(&b).unwrap_err();
    assert!(matches!(err, czmil::Error::TimeRegression { .. }));
}

#[test]
fn unused_cif_constructor_is_reachable() {
    // Exercises the plain constructor paths outside the writer/reader flow.
    let cif = Cif::new();
    assert!(cif.is_empty());
}
