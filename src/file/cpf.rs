//! Point file (`.cpf`) handles: append-only writer paired with a CWF's CIF,
//! random-access reader, and in-place record updates (full, modifiable-only,
//! status-only).

use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::file::{Engine, EngineOptions, CPF_ACCUMULATOR_BYTES};
use crate::header::{FileType, Header};
use crate::index::{self, Cif};
use crate::record::cpf::Record;

/// Appends CPF records, pairing each shot with the CIF row a
/// [`crate::file::cwf::CwfWriter`] already created for it.
#[derive(Debug)]
pub struct CpfWriter<W> {
    engine: Engine<W>,
    header: Header,
    cif: Arc<Mutex<Cif>>,
    flight_start: Option<u64>,
    prev_timestamp: Option<u64>,
    disk_path: Option<PathBuf>,
    closed: bool,
}

impl<W: Read + Write + Seek> CpfWriter<W> {
    /// Writes a placeholder header and starts appending records, sharing
    /// `cif` with the CWF side of this shot sequence (pass a fresh,
    /// default-constructed `Arc<Mutex<Cif>>` for a standalone CPF).
    pub fn new(stream: W, header: Header) -> Result<CpfWriter<W>> {
        CpfWriter::with_options(stream, header, EngineOptions::create(CPF_ACCUMULATOR_BYTES))
    }

    /// Like [`CpfWriter::new`], but with an explicit [`EngineOptions`]
    /// (typically only to pick a non-default accumulator size).
    pub fn with_options(mut stream: W, header: Header, options: EngineOptions) -> Result<CpfWriter<W>> {
        header.write_to(&mut stream)?;
        let pos = u64::from(header.header_size());
        Ok(CpfWriter {
            engine: Engine::new(stream, pos, options.accumulator_cap()),
            header,
            cif: Arc::new(Mutex::new(Cif::new())),
            flight_start: None,
            prev_timestamp: None,
            disk_path: None,
            closed: false,
        })
    }

    /// Wires this writer to an existing CIF table (typically the one a
    /// paired CWF writer is building, via [`crate::file::cwf::CwfWriter::cif`]).
    pub fn with_cif(mut self, cif: Arc<Mutex<Cif>>) -> CpfWriter<W> {
        self.cif = cif;
        self
    }

    /// The shared CIF table.
    pub fn cif(&self) -> Arc<Mutex<Cif>> {
        Arc::clone(&self.cif)
    }

    /// This file's header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Appends `record` as the CPF side of shot `ordinal` (the ordinal a
    /// paired [`crate::file::cwf::CwfWriter::append`] returned). A standalone
    /// CPF (no paired CWF) should pass the ordinal this same writer's CIF
    /// table will assign, i.e. its current `len()`.
    ///
    /// Errors with [`Error::TimeRegression`] if `record.timestamp` does not
    /// strictly increase over the previous append (unlike CWF, this is a
    /// hard error, not silently compensated — I4's two policies are
    /// deliberately not unified).
    pub fn append(&mut self, ordinal: u32, record: &Record) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        let flight_start = *self.flight_start.get_or_insert(record.timestamp);
        let bytes = crate::record::cpf::encode(&self.header, flight_start, self.prev_timestamp, record)?;
        self.prev_timestamp = Some(record.timestamp);

        let offset = self.engine.append(&bytes)?;
        self.cif.lock().unwrap().set_cpf(ordinal, offset, bytes.len() as u16);
        self.header.observe_record(
            record.timestamp,
            Some((record.reference_latitude, record.reference_longitude)),
        );
        Ok(())
    }

    /// Appends `record` as a brand-new shot (standalone CPF with no paired
    /// CWF), returning the ordinal assigned.
    pub fn append_new(&mut self, record: &Record) -> Result<u32> {
        let ordinal = self.cif.lock().unwrap().push_cwf(0, 0);
        self.append(ordinal, record)?;
        Ok(ordinal)
    }

    /// Flushes pending writes, rewrites the header, and (for a path-backed
    /// writer) finalises `.cif`, removing the now-stale `.cwi`.
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
            index::finalize_cpf(path, &cif)?;
            log::debug!(
                "closed cpf {}: {} records",
                path.display(),
                self.header.number_of_records()
            );
        }
        self.closed = true;
        Ok(())
    }

    /// Aborts a half-written CPF creation pass, removing `.cif.tmp` so the
    /// original `.cwi` can be retried against (§4.6 recovery). The caller is
    /// responsible for discarding the half-written CPF stream itself.
    pub fn abort(self) -> Result<()> {
        if let Some(path) = &self.disk_path {
            index::abort_cpf(path)?;
        }
        Ok(())
    }

    /// Hands back the wrapped stream, flushing first.
    pub fn into_inner(self) -> Result<W> {
        self.engine.into_inner()
    }
}

impl CpfWriter<File> {
    /// Creates a new `.cpf` file at `path`, adopting the CIF rows already
    /// staged by the matching `.cwf`'s close (`.cwi`), or rescanning both
    /// files if no `.cwi` is present.
    pub fn create(path: impl AsRef<Path>, header: Header) -> Result<CpfWriter<File>> {
        let path = path.as_ref();
        if path.extension().and_then(|e| e.to_str()) != Some(FileType::Cpf.extension()) {
            return Err(Error::UnknownExtension {
                file_type: FileType::Cpf,
                path: path.to_path_buf(),
            });
        }
        if path.exists() {
            return Err(Error::AlreadyExists {
                path: path.to_path_buf(),
            });
        }
        let cwf_path = path.with_extension(FileType::Cwf.extension());
        let cif = index::adopt_for_cpf_creation(&cwf_path)?;
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        let mut writer = CpfWriter::new(file, header)?;
        writer.cif = Arc::new(Mutex::new(cif));
        writer.disk_path = Some(path.to_path_buf());
        Ok(writer)
    }
}

/// Random-access CPF reader, addressing records by shot ordinal through a CIF.
#[derive(Debug)]
pub struct CpfReader<R> {
    engine: Engine<R>,
    header: Header,
    flight_start: u64,
    cif: Arc<Mutex<Cif>>,
}

impl<R: Read + Write + Seek> CpfReader<R> {
    /// Opens an already-written CPF stream for random-access reads.
    pub fn new(mut stream: R, cif: Arc<Mutex<Cif>>) -> Result<CpfReader<R>> {
        let header = Header::read_from(&mut stream, FileType::Cpf, Path::new("<stream>"))?;
        stream
            .seek(std::io::SeekFrom::Start(u64::from(header.header_size())))
            .map_err(|e| Error::io("<stream>", e))?;
        let flight_start = header.flight_time_span().0;
        let pos = u64::from(header.header_size());
        Ok(CpfReader {
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
        let bytes = self.engine.read_at(row.cpf_offset, row.cpf_size as usize)?;
        Ok(crate::record::cpf::decode(&self.header, self.flight_start, &bytes))
    }

    /// Overwrites every field of the record at `ordinal` with `record`, so
    /// long as the re-encoded size matches the size the CIF already declared
    /// (P9's "non-modifiable fields stay bytewise stable" only makes sense if
    /// the record doesn't move; a size change is rejected rather than
    /// silently relocating the record).
    pub fn update_full(&mut self, ordinal: u32, record: &Record) -> Result<()> {
        let row = self
            .cif
            .lock()
            .unwrap()
            .row(ordinal)
            .ok_or(Error::InvalidRecordNumber {
                ordinal,
                count: self.header.number_of_records(),
            })?;
        let bytes = crate::record::cpf::encode(&self.header, self.flight_start, None, record)?;
        if bytes.len() != row.cpf_size as usize {
            return Err(Error::RecordSizeChanged {
                ordinal,
                old: u32::from(row.cpf_size),
                new: bytes.len() as u32,
            });
        }
        self.engine.write_at(row.cpf_offset, &bytes)
    }

    /// Updates only the fields the format designates modifiable (vertical
    /// datum offset, user data, kd, laser energy, t0 interest point, bare
    /// earth, and the per-return classification/status/uncertainty fields),
    /// leaving everything else bit-identical (P9).
    pub fn update_modifiable(&mut self, ordinal: u32, new: &Record) -> Result<()> {
        let row = self
            .cif
            .lock()
            .unwrap()
            .row(ordinal)
            .ok_or(Error::InvalidRecordNumber {
                ordinal,
                count: self.header.number_of_records(),
            })?;
        let existing = self.engine.read_at(row.cpf_offset, row.cpf_size as usize)?;
        let bytes =
            crate::record::cpf::update_modifiable(&self.header, self.flight_start, &existing, new);
        if bytes.len() != row.cpf_size as usize {
            return Err(Error::RecordSizeChanged {
                ordinal,
                old: u32::from(row.cpf_size),
                new: bytes.len() as u32,
            });
        }
        self.engine.write_at(row.cpf_offset, &bytes)
    }

    /// Updates only per-return status/classification/filter-reason and user
    /// data. Applying the same update twice leaves the record unchanged
    /// (P8).
    pub fn update_status(&mut self, ordinal: u32, new: &Record) -> Result<()> {
        let row = self
            .cif
            .lock()
            .unwrap()
            .row(ordinal)
            .ok_or(Error::InvalidRecordNumber {
                ordinal,
                count: self.header.number_of_records(),
            })?;
        let existing = self.engine.read_at(row.cpf_offset, row.cpf_size as usize)?;
        let bytes = crate::record::cpf::update_status(&self.header, self.flight_start, &existing, new);
        if bytes.len() != row.cpf_size as usize {
            return Err(Error::RecordSizeChanged {
                ordinal,
                old: u32::from(row.cpf_size),
                new: bytes.len() as u32,
            });
        }
        self.engine.write_at(row.cpf_offset, &bytes)
    }

    /// Hands back the wrapped stream, flushing first.
    pub fn into_inner(self) -> Result<R> {
        self.engine.into_inner()
    }
}

impl CpfReader<File> {
    /// Opens `path` for random-access reads/updates, loading its `.cif`
    /// sibling (or rebuilding one by rescan against the paired `.cwf`).
    pub fn open(path: impl AsRef<Path>) -> Result<CpfReader<File>> {
        let path = path.as_ref();
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::io(path, e))?;
        let cif = match index::load(path) {
            Ok(cif) => cif,
            Err(_) => {
                log::warn!("{}: no usable .cif, rebuilding by rescan", path.display());
                let cwf_path = path.with_extension(FileType::Cwf.extension());
                let mut cwf_file = File::open(&cwf_path).map_err(|e| Error::io(&cwf_path, e))?;
                let mut cpf_file = File::open(path).map_err(|e| Error::io(path, e))?;
                index::rescan(&mut cwf_file, Some(&mut cpf_file))?
            }
        };
        CpfReader::new(file, Arc::new(Mutex::new(cif)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Builder;
    use std::io::Cursor;

    fn sample(timestamp: u64) -> Record {
        Record {
            timestamp,
            reference_latitude: 10.0,
            reference_longitude: -20.0,
            ..Default::default()
        }
    }

    #[test]
    fn append_then_read_back() {
        let header = Builder::new(FileType::Cpf, (3, 0)).into_header().unwrap();
        let mut writer = CpfWriter::new(Cursor::new(Vec::new()), header).unwrap();
        let ordinal = writer.append_new(&sample(1_000)).unwrap();
        assert_eq!(0, ordinal);
        let cif = writer.cif();
        writer.close().unwrap();
        let stream = writer.into_inner().unwrap();

        let mut reader = CpfReader::new(stream, cif).unwrap();
        let decoded = reader.read(0).unwrap();
        assert_eq!(1_000, decoded.timestamp);
    }

    #[test]
    fn time_regression_on_append_is_a_hard_error() {
        let header = Builder::new(FileType::Cpf, (3, 0)).into_header().unwrap();
        let mut writer = CpfWriter::new(Cursor::new(Vec::new()), header).unwrap();
        writer.append_new(&sample(1_000)).unwrap();
        let err = writer.append_new(&sample(1_000)).unwrap_err();
        assert!(matches!(err, Error::TimeRegression { .. }));
    }

    #[test]
    fn status_update_round_trips_and_is_idempotent() {
        let header = Builder::new(FileType::Cpf, (3, 0)).into_header().unwrap();
        let mut writer = CpfWriter::new(Cursor::new(Vec::new()), header).unwrap();
        writer.append_new(&sample(1_000)).unwrap();
        let cif = writer.cif();
        writer.close().unwrap();
        let stream = writer.into_inner().unwrap();

        let mut reader = CpfReader::new(stream, cif).unwrap();
        let mut update = reader.read(0).unwrap();
        update.user_data = 42;
        reader.update_status(0, &update).unwrap();
        reader.update_status(0, &update).unwrap();
        assert_eq!(42, reader.read(0).unwrap().user_data);
    }
}
