//! Sensor/navigation file (`.csf`) handle: fixed-width records addressed
//! directly by `header_size + ordinal * record_len`, no CIF needed.

use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::file::{Engine, CSF_ACCUMULATOR_BYTES};
use crate::header::{FileType, Header};
use crate::record::csf::{record_len, Record};

/// A single read-and-append handle over a CSF stream.
#[derive(Debug)]
pub struct CsfHandle<S> {
    engine: Engine<S>,
    header: Header,
    record_len: usize,
    flight_start: Option<u64>,
    prev_timestamp: Option<u64>,
}

impl<S: Read + Write + Seek> CsfHandle<S> {
    /// Writes a placeholder header to `stream` and starts appending records.
    pub fn create(mut stream: S, header: Header) -> Result<CsfHandle<S>> {
        header.write_to(&mut stream)?;
        let pos = u64::from(header.header_size());
        let record_len = record_len(&header);
        Ok(CsfHandle {
            engine: Engine::new(stream, pos, CSF_ACCUMULATOR_BYTES),
            header,
            record_len,
            flight_start: None,
            prev_timestamp: None,
        })
    }

    /// Opens an already-written CSF stream for random-access reads.
    pub fn open(mut stream: S) -> Result<CsfHandle<S>> {
        let header = Header::read_from(&mut stream, FileType::Csf, Path::new("<stream>"))?;
        stream
            .seek(std::io::SeekFrom::Start(u64::from(header.header_size())))
            .map_err(|e| Error::io("<stream>", e))?;
        let record_len = record_len(&header);
        let pos = u64::from(header.header_size());
        let flight_start = Some(header.flight_time_span().0);
        Ok(CsfHandle {
            engine: Engine::new(stream, pos, 0),
            header,
            record_len,
            flight_start,
            prev_timestamp: None,
        })
    }

    /// This file's header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Appends `record`. Errors with [`Error::TimeRegression`] if its
    /// timestamp does not strictly increase over the previous append.
    pub fn append(&mut self, record: &Record) -> Result<u32> {
        if let Some(prev) = self.prev_timestamp {
            if record.timestamp <= prev {
                return Err(Error::TimeRegression {
                    file_type: FileType::Csf,
                    timestamp: record.timestamp,
                    previous: prev,
                });
            }
        }
        self.prev_timestamp = Some(record.timestamp);
        let flight_start = *self.flight_start.get_or_insert(record.timestamp);
        let bytes = crate::record::csf::encode(&self.header, flight_start, record);
        self.engine.append(&bytes)?;
        let ordinal = self.header.number_of_records();
        self.header.observe_record(record.timestamp, Some((record.latitude, record.longitude)));
        Ok(ordinal)
    }

    /// Reads the record at `ordinal`.
    pub fn read(&mut self, ordinal: u32) -> Result<Record> {
        let count = self.header.number_of_records();
        if ordinal >= count {
            return Err(Error::InvalidRecordNumber { ordinal, count });
        }
        let offset = u64::from(self.header.header_size()) + u64::from(ordinal) * self.record_len as u64;
        let bytes = self.engine.read_at(offset, self.record_len)?;
        let flight_start = self.flight_start.unwrap_or(0);
        Ok(crate::record::csf::decode(&self.header, flight_start, &bytes))
    }

    /// Overwrites the record at `ordinal` in place, for the v ≥ 2
    /// reprocessing update spec §3 names for CSF ("Optional in-place update
    /// (v≥2 reprocessing)"). CSF records are fixed-width, so there is no
    /// record-size hazard the way there is for CPF's variable-length update.
    pub fn update(&mut self, ordinal: u32, record: &Record) -> Result<()> {
        let count = self.header.number_of_records();
        if ordinal >= count {
            return Err(Error::InvalidRecordNumber { ordinal, count });
        }
        let offset = u64::from(self.header.header_size()) + u64::from(ordinal) * self.record_len as u64;
        let flight_start = self.flight_start.unwrap_or(0);
        let bytes = crate::record::csf::encode(&self.header, flight_start, record);
        self.engine.write_at(offset, &bytes)
    }

    /// Flushes pending writes and rewrites the header with final aggregate state.
    pub fn close(&mut self) -> Result<()> {
        let file_size = self.engine.stream_len()?;
        self.header.set_file_size(file_size);
        self.header.touch(crate::file::now_micros());
        self.engine.rewrite_header(&self.header)?;
        self.engine.flush()
    }

    /// Hands back the wrapped stream, flushing first.
    pub fn into_inner(self) -> Result<S> {
        self.engine.into_inner()
    }
}

impl CsfHandle<File> {
    /// Creates a new `.csf` file at `path`.
    pub fn create_path(path: impl AsRef<Path>, header: Header) -> Result<CsfHandle<File>> {
        let path = path.as_ref();
        if path.extension().and_then(|e| e.to_str()) != Some(FileType::Csf.extension()) {
            return Err(Error::UnknownExtension {
                file_type: FileType::Csf,
                path: path.to_path_buf(),
            });
        }
        if path.exists() {
            return Err(Error::AlreadyExists {
                path: path.to_path_buf(),
            });
        }
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        CsfHandle::create(file, header)
    }

    /// Opens `path` for random-access reads.
    pub fn open_path(path: impl AsRef<Path>) -> Result<CsfHandle<File>> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        CsfHandle::open(file)
    }
}
