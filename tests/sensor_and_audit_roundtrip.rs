//! CSF (sensor/navigation) and CAF (audit) handles round-tripped end to end,
//! independent of the CWF/CPF/CIF pairing machinery.

use std::io::Cursor;

use czmil::file::caf::CafHandle;
use czmil::file::csf::CsfHandle;
use czmil::header::{Builder, FileType};
use czmil::record::caf::Record as CafRecord;
use czmil::record::csf::Record as CsfRecord;

#[test]
fn csf_v2_round_trip_through_the_file_handle() {
    let header = Builder::new(FileType::Csf, (2, 0)).into_header().unwrap();
    let mut handle = CsfHandle::create(Cursor::new(Vec::new()), header).unwrap();

    for n in 0..3u32 {
        let record = CsfRecord {
            timestamp: 1_000 + u64::from(n),
            heading: 90.0 + f64::from(n),
            ranges: [1.0; czmil::record::csf::CHANNEL_COUNT],
            ..Default::default()
        };
        let ordinal = handle.append(&record).unwrap();
        assert_eq!(n, ordinal);
    }

    handle.close().unwrap();
    let stream = handle.into_inner().unwrap();

    let mut reopened = CsfHandle::open(stream).unwrap();
    for n in 0..3u32 {
        let decoded = reopened.read(n).unwrap();
        assert_eq!(1_000 + u64::from(n), decoded.timestamp);
    }
}

#[test]
fn csf_time_regression_is_a_hard_error_through_the_handle() {
    let header = Builder::new(FileType::Csf, (2, 0)).into_header().unwrap();
    let mut handle = CsfHandle::create(Cursor::new(Vec::new()), header).unwrap();
    handle
        .append(&CsfRecord {
            timestamp: 100,
            ..Default::default()
        })
        .unwrap();
    let err = handle
        .append(&CsfRecord {
            timestamp: 50,
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, czmil::Error::TimeRegression { .. }));
}

#[test]
fn caf_apply_batch_then_reopen_for_random_access() {
    let header = Builder::new(FileType::Caf, (1, 0)).into_header().unwrap();
    let mut handle = CafHandle::create(Cursor::new(Vec::new()), header).unwrap();

    let batch = vec![
        CafRecord {
            shot_id: 9,
            channel_number: 0,
            ..Default::default()
        },
        CafRecord {
            shot_id: 9,
            channel_number: 1,
            ..Default::default()
        },
    ];
    handle.apply(555_000, &batch).unwrap();
    handle.close().unwrap();
    let stream = handle.into_inner().unwrap();

    let mut reopened = CafHandle::open(stream).unwrap();
    assert_eq!(9, reopened.read(0).unwrap().shot_id);
    assert_eq!(1, reopened.read(1).unwrap().channel_number);
    assert!(reopened.read(2).is_err());
}
