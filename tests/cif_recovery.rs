//! Rebuilding a CIF by rescanning real CWF/CPF byte streams, as a reader
//! would when the `.cif` sibling is missing or doesn't match (§4.6, §7).

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use czmil::file::cpf::{CpfReader, CpfWriter};
use czmil::file::cwf::{CwfReader, CwfWriter};
use czmil::header::{Builder, FileType};
use czmil::index::{self, Cif};
use czmil::record::cpf::Record as CpfRecord;
use czmil::record::cwf::Record as CwfRecord;

fn shot(shot_id: u32, timestamp: u64) -> CwfRecord {
    let mut record = CwfRecord {
        shot_id,
        timestamp,
        ..Default::default()
    };
    record.channels[0].packets = vec![[shot_id as u16; czmil::compression::PACKET_SAMPLES]];
    record.channels[0].packet_indices = vec![0];
    record.channels[0].mcwp_ranges = vec![czmil::record::cwf::RANGE_INVALID];
    record
}

#[test]
fn rescan_reconstructs_the_same_rows_a_live_cif_would_have() {
    let cwf_header = Builder::new(FileType::Cwf, (2, 0)).into_header().unwrap();
    let cpf_header = Builder::new(FileType::Cpf, (3, 0)).into_header().unwrap();

    let mut cwf_writer = CwfWriter::new(Cursor::new(Vec::new()), cwf_header).unwrap();
    let live_cif = cwf_writer.cif();
    let mut cpf_writer = CpfWriter::new(Cursor::new(Vec::new()), cpf_header)
        .unwrap()
        .with_cif(Arc::clone(&live_cif));

    for n in 0..4u32 {
        let cwf_record = shot(n, 1_000_000 + u64::from(n) * 500);
        let ordinal = cwf_writer.append(&cwf_record).unwrap();
        let cpf_record = CpfRecord {
            timestamp: cwf_record.timestamp,
            ..Default::default()
        };
        cpf_writer.append(ordinal, &cpf_record).unwrap();
    }

    cwf_writer.close().unwrap();
    cpf_writer.close().unwrap();
    let mut cwf_stream = cwf_writer.into_inner().unwrap();
    let mut cpf_stream = cpf_writer.into_inner().unwrap();

    let rescanned = index::rescan(&mut cwf_stream, Some(&mut cpf_stream)).unwrap();
    assert_eq!(4, rescanned.len());

    let expected = live_cif.lock().unwrap().clone();
    let mut rescanned = rescanned;
    for n in 0..4u32 {
        assert_eq!(expected.clone().row(n), rescanned.row(n));
    }

    cwf_stream.set_position(0);
    cpf_stream.set_position(0);
    let shared = Arc::new(Mutex::new(rescanned));
    let mut cwf_reader = CwfReader::new(cwf_stream, Arc::clone(&shared)).unwrap();
    let mut cpf_reader = CpfReader::new(cpf_stream, shared).unwrap();
    for n in 0..4u32 {
        assert_eq!(n, cwf_reader.read(n).unwrap().shot_id);
        assert_eq!(cwf_reader.read(n).unwrap().timestamp, cpf_reader.read(n).unwrap().timestamp);
    }
}

#[test]
fn rescan_with_no_paired_cpf_recovers_cwf_offsets_only() {
    let header = Builder::new(FileType::Cwf, (2, 0)).into_header().unwrap();
    let mut writer = CwfWriter::new(Cursor::new(Vec::new()), header).unwrap();
    writer.append(&shot(0, 10)).unwrap();
    writer.append(&shot(1, 20)).unwrap();
    writer.close().unwrap();
    let mut stream = writer.into_inner().unwrap();

    let rescanned = index::rescan(&mut stream, None).unwrap();
    assert_eq!(2, rescanned.len());

    stream.set_position(0);
    let mut reader = CwfReader::new(stream, Arc::new(Mutex::new(rescanned))).unwrap();
    assert_eq!(1, reader.read(1).unwrap().shot_id);
}

#[test]
fn empty_cif_reports_empty() {
    assert!(Cif::new().is_empty());
}
