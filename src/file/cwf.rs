//! Waveform file (`.cwf`) handles: append-only writer, random-access reader.

use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::file::{Engine, EngineOptions, CWF_ACCUMULATOR_BYTES};
use crate::header::{FileType, Header};
use crate::index::{self, Cif};
use crate::record::cwf::Record;

/// Appends CWF records to a stream, maintaining the header's aggregate state
/// and a CIF row per shot.
#[derive(Debug)]
pub struct CwfWriter<W> {
    engine: Engine<W>,
    header: Header,
    cif: Arc<Mutex<Cif>>,
    flight_start: Option<u64>,
    prev_timestamp: Option<u64>,
    disk_path: Option<PathBuf>,
    closed: bool,
}

impl<W: Read + Write + Seek> CwfWriter<W> {
    /// Writes a placeholder header to `stream` and starts appending records
    /// after it. `stream` need not support random access beyond what [`Seek`]
    /// already requires (a `Cursor<Vec<u8>>` works for tests).
    pub fn new(stream: W, header: Header) -> Result<CwfWriter<W>> {
        CwfWriter::with_options(stream, header, EngineOptions::create(CWF_ACCUMULATOR_BYTES))
    }

    /// Like [`CwfWriter::new`], but with an explicit [`EngineOptions`]
    /// (typically only to pick a non-default accumulator size).
    pub fn with_options(mut stream: W, header: Header, options: EngineOptions) -> Result<CwfWriter<W>> {
        header.write_to(&mut stream)?;
        let pos = u64::from(header.header_size());
        Ok(CwfWriter {
            engine: Engine::new(stream, pos, options.accumulator_cap()),
            header,
            cif: Arc::new(Mutex::new(Cif::new())),
            flight_start: None,
            prev_timestamp: None,
            disk_path: None,
            closed: false,
        })
    }

    /// The CIF table being built up by this writer, shared with a paired
    /// [`crate::file::cpf::CpfWriter`] via `Arc<Mutex<_>>`.
    pub fn cif(&self) -> Arc<Mutex<Cif>> {
        Arc::clone(&self.cif)
    }

    /// This file's header, including the aggregate state observed so far.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Appends `record`, applying CWF's time-regression compensation rather
    /// than erroring on a non-increasing timestamp (I4). Returns the shot
    /// ordinal assigned to this record.
    pub fn append(&mut self, record: &Record) -> Result<u32> {
        if self.closed {
            return Err(Error::Closed);
        }
        let flight_start = *self.flight_start.get_or_insert(record.timestamp);
        let bytes = crate::record::cwf::encode(&self.header, flight_start, self.prev_timestamp, record)?;

        let mut effective_timestamp = record.timestamp;
        if let Some(prev) = self.prev_timestamp {
            if effective_timestamp <= prev {
                effective_timestamp = prev + crate::record::CWF_TIME_REGRESSION_BUMP_MICROS;
            }
        }
        self.prev_timestamp = Some(effective_timestamp);

        let offset = self.engine.append(&bytes)?;
        let ordinal = self.cif.lock().unwrap().push_cwf(offset, bytes.len() as u16);
        self.header.observe_record(effective_timestamp, None);
        Ok(ordinal)
    }

    /// Flushes pending writes, rewrites the header with final aggregate
    /// state, and (for a path-backed writer) finalises the `.cwi` sibling.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let file_size = self.engine.stream_len()?;
        self.header.set_file_size(file_size);
        self.header.touch(crate::file::now_micros());
        self.engine.rewrite_header(&self.header)?;
        self.engine.flush()?;
        if let Some(path) = &self.disk_path {
            let cif = self.cif.lock().unwrap();
            index::finalize_cwf(path, &cif)?;
            log::debug!(
                "closed cwf {}: {} records",
                path.display(),
                self.header.number_of_records()
            );
        }
        self.closed = true;
        Ok(())
    }

    /// Hands back the wrapped stream, flushing first. Intended for tests
    /// that build a [`CwfReader`] over the same in-memory buffer.
    pub fn into_inner(self) -> Result<W> {
        self.engine.into_inner()
    }
}

impl CwfWriter<File> {
    /// Creates a new `.cwf` file at `path`. Errors if `path` doesn't have the
    /// `cwf` extension or already exists.
    pub fn create(path: impl AsRef<Path>, header: Header) -> Result<CwfWriter<File>> {
        let path = path.as_ref();
        if path.extension().and_then(|e| e.to_str()) != Some(FileType::Cwf.extension()) {
            return Err(Error::UnknownExtension {
                file_type: FileType::Cwf,
                path: path.to_path_buf(),
            });
        }
        if path.exists() {
            return Err(Error::AlreadyExists {
                path: path.to_path_buf(),
            });
        }
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        let mut writer = CwfWriter::new(file, header)?;
        writer.disk_path = Some(path.to_path_buf());
        Ok(writer)
    }
}

/// Random-access CWF reader, addressing records by shot ordinal through a CIF.
#[derive(Debug)]
pub struct CwfReader<R> {
    engine: Engine<R>,
    header: Header,
    flight_start: u64,
    cif: Arc<Mutex<Cif>>,
}

impl<R: Read + Write + Seek> CwfReader<R> {
    /// Opens an already-written CWF stream for random-access reads, using
    /// `cif` (typically shared with a paired [`crate::file::cpf::CpfReader`])
    /// to resolve ordinals to byte ranges.
    pub fn new(mut stream: R, cif: Arc<Mutex<Cif>>) -> Result<CwfReader<R>> {
        let header = Header::read_from(&mut stream, FileType::Cwf, Path::new("<stream>"))?;
        stream
            .seek(std::io::SeekFrom::Start(u64::from(header.header_size())))
            .map_err(|e| Error::io("<stream>", e))?;
        let flight_start = header.flight_time_span().0;
        let pos = u64::from(header.header_size());
        Ok(CwfReader {
            engine: Engine::new(stream, pos, 0),
            header,
            flight_start,
            cif,
        })
    }

    /// This file's header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Reads the record at `ordinal`.
    pub fn read(&mut self, ordinal: u32) -> Result<Record> {
        let row = self
            .cif
            .lock()
            .unwrap()
            .row(ordinal)
            .ok_or(Error::InvalidRecordNumber {
                ordinal,
                count: self.header.number_of_records(),
            })?;
        let bytes = self.engine.read_at(row.cwf_offset, row.cwf_size as usize)?;
        Ok(crate::record::cwf::decode(&self.header, self.flight_start, &bytes))
    }

    /// Hands back the wrapped stream, flushing first.
    pub fn into_inner(self) -> Result<R> {
        self.engine.into_inner()
    }
}

impl CwfReader<File> {
    /// Opens `path` for random-access reads, loading its `.cif` sibling (or
    /// rebuilding one by rescan if it's missing or stale).
    pub fn open(path: impl AsRef<Path>) -> Result<CwfReader<File>> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let cif = match index::load(path) {
            Ok(cif) => cif,
            Err(_) => {
                log::warn!("{}: no usable .cif, rebuilding by rescan", path.display());
                let mut rescan_file = File::open(path).map_err(|e| Error::io(path, e))?;
                index::rescan(&mut rescan_file, None)?
            }
        };
        CwfReader::new(file, Arc::new(Mutex::new(cif)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Builder;
    use std::io::Cursor;

    fn sample_record(shot_id: u32, timestamp: u64) -> Record {
        let mut record = Record {
            shot_id,
            timestamp,
            ..Default::default()
        };
        record.channels[0].packets = vec![[0u16; crate::compression::PACKET_SAMPLES]];
        record.channels[0].packet_indices = vec![0];
        record.channels[0].mcwp_ranges = vec![crate::record::cwf::RANGE_INVALID];
        record
    }

    #[test]
    fn append_then_read_back() {
        let header = Builder::new(FileType::Cwf, (2, 0)).into_header().unwrap();
        let mut writer = CwfWriter::new(Cursor::new(Vec::new()), header).unwrap();
        let ordinal = writer.append(&sample_record(7, 1_000_000)).unwrap();
        assert_eq!(0, ordinal);
        let cif = writer.cif();
        writer.close().unwrap();
        let stream = writer.into_inner().unwrap();

        let mut reader = CwfReader::new(stream, cif).unwrap();
        let decoded = reader.read(0).unwrap();
        assert_eq!(7, decoded.shot_id);
        assert_eq!(1_000_000, decoded.timestamp);
    }

    #[test]
    fn reader_resolves_ordinal_through_shared_cif() {
        let header = Builder::new(FileType::Cwf, (2, 0)).into_header().unwrap();
        let mut writer = CwfWriter::new(Cursor::new(Vec::new()), header).unwrap();
        writer.append(&sample_record(1, 100)).unwrap();
        writer.append(&sample_record(2, 200)).unwrap();
        let cif = writer.cif();
        writer.close().unwrap();
        let stream = writer.into_inner().unwrap();

        let mut reader = CwfReader::new(stream, cif).unwrap();
        assert_eq!(2, reader.read(1).unwrap().shot_id);
        assert_eq!(1, reader.read(0).unwrap().shot_id);
    }
}
