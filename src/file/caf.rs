//! Audit file (`.caf`) handle: fixed-width, append-only edit log. One
//! `apply` call stamps the header's `[APPLICATION TIMESTAMP]` and appends
//! every record in the batch under it.

use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::file::{Engine, CSF_ACCUMULATOR_BYTES};
use crate::header::{FileType, Header};
use crate::record::caf::{record_len, Record};

/// A single read-and-append handle over a CAF stream.
#[derive(Debug)]
pub struct CafHandle<S> {
    engine: Engine<S>,
    header: Header,
    record_len: usize,
}

impl<S: Read + Write + Seek> CafHandle<S> {
    /// Writes a placeholder header to `stream` and starts appending records.
    pub fn create(mut stream: S, header: Header) -> Result<CafHandle<S>> {
        header.write_to(&mut stream)?;
        let pos = u64::from(header.header_size());
        let record_len = record_len(&header);
        Ok(CafHandle {
            engine: Engine::new(stream, pos, CSF_ACCUMULATOR_BYTES),
            header,
            record_len,
        })
    }

    /// Opens an already-written CAF stream for random-access reads.
    pub fn open(mut stream: S) -> Result<CafHandle<S>> {
        let header = Header::read_from(&mut stream, FileType::Caf, Path::new("<stream>"))?;
        stream
            .seek(std::io::SeekFrom::Start(u64::from(header.header_size())))
            .map_err(|e| Error::io("<stream>", e))?;
        let record_len = record_len(&header);
        let pos = u64::from(header.header_size());
        Ok(CafHandle {
            engine: Engine::new(stream, pos, 0),
            header,
            record_len,
        })
    }

    /// This file's header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Stamps `[APPLICATION TIMESTAMP]` with `timestamp` and appends every
    /// record in `batch` under it (one audit pass, possibly many edits).
    pub fn apply(&mut self, timestamp: u64, batch: &[Record]) -> Result<()> {
        self.header.stamp_application_timestamp(timestamp);
        for record in batch {
            let bytes = crate::record::caf::encode(&self.header, record);
            self.engine.append(&bytes)?;
            self.header.observe_record(timestamp, None);
        }
        Ok(())
    }

    /// Reads the record at `ordinal`.
    pub fn read(&mut self, ordinal: u32) -> Result<Record> {
        let count = self.header.number_of_records();
        if ordinal >= count {
            return Err(Error::InvalidRecordNumber { ordinal, count });
        }
        let offset = u64::from(self.header.header_size()) + u64::from(ordinal) * self.record_len as u64;
        let bytes = self.engine.read_at(offset, self.record_len)?;
        Ok(crate::record::caf::decode(&self.header, &bytes))
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

impl CafHandle<File> {
    /// Creates a new `.caf` file at `path`.
    pub fn create_path(path: impl AsRef<Path>, header: Header) -> Result<CafHandle<File>> {
        let path = path.as_ref();
        if path.extension().and_then(|e| e.to_str()) != Some(FileType::Caf.extension()) {
            return Err(Error::UnknownExtension {
                file_type: FileType::Caf,
                path: path.to_path_buf(),
            });
        }
        if path.exists() {
            return Err(Error::AlreadyExists {
                path: path.to_path_buf(),
            });
        }
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        CafHandle::create(file, header)
    }

    /// Opens `path` for random-access reads.
    pub fn open_path(path: impl AsRef<Path>) -> Result<CafHandle<File>> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        CafHandle::open(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Builder;
    use std::io::Cursor;

    #[test]
    fn apply_stamps_timestamp_and_appends_batch() {
        let header = Builder::new(FileType::Caf, (1, 0)).into_header().unwrap();
        let mut handle = CafHandle::create(Cursor::new(Vec::new()), header).unwrap();
        let batch = vec![
            Record {
                shot_id: 1,
                channel_number: 0,
                ..Default::default()
            },
            Record {
                shot_id: 1,
                channel_number: 1,
                ..Default::default()
            },
        ];
        handle.apply(123_456, &batch).unwrap();
        assert_eq!(1, handle.read(1).unwrap().channel_number);
        handle.close().unwrap();
    }
}
