//! The index manager: owns the in-memory CIF row table shared between a
//! CWF/CPF pair, plus the on-disk `.cwi`/`.cif.tmp`/`.cif` lifecycle for the
//! path-based convenience constructors (§4.6, §9 "cyclic paired-file state").
//!
//! The in-memory [`Cif`] itself knows nothing about files on disk — a
//! generic-stream engine (e.g. one backed by `Cursor<Vec<u8>>` in tests)
//! shares it as `Arc<Mutex<Cif>>` and never touches the free functions in
//! this module. Those free functions are the disk choreography used only by
//! `file::cwf::CwfWriter::create(path)` / `file::cpf::CpfWriter::create(path)`
//! and friends.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::{Error, Result};
use crate::record::cif::{CifRow, ROW_LEN};
use crate::record::LENGTH_PREFIX_BITS;

/// The in-memory CIF row table: one [`CifRow`] per shot ordinal.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Cif {
    rows: Vec<CifRow>,
    /// Short-circuits a repeat lookup of the same ordinal (§4.5: "consumers
    /// typically ask for a CWF record's CIF row followed by the paired CPF
    /// record's row").
    last_read: Option<(u32, CifRow)>,
}

impl Cif {
    /// An empty table, the starting point for CWF creation.
    pub fn new() -> Cif {
        Cif::default()
    }

    /// Builds a table directly from already-decoded rows (used when adopting
    /// or rescanning).
    pub fn from_rows(rows: Vec<CifRow>) -> Cif {
        Cif {
            rows,
            last_read: None,
        }
    }

    /// Number of rows (should equal the CPF record count once finalised, I3).
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if no rows have been recorded.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Appends a fresh row for a newly-written CWF record; the CPF side is
    /// filled in later by [`Cif::set_cpf`].
    pub fn push_cwf(&mut self, cwf_offset: u64, cwf_size: u16) -> u32 {
        self.rows.push(CifRow {
            cwf_offset,
            cwf_size,
            cpf_offset: 0,
            cpf_size: 0,
        });
        self.last_read = None;
        (self.rows.len() - 1) as u32
    }

    /// Fills in the CPF side of an existing row (set when the paired CPF
    /// record is appended, §3 "CIF row ... mutated by: overwritten when the
    /// CPF side of a shot is appended").
    pub fn set_cpf(&mut self, ordinal: u32, cpf_offset: u64, cpf_size: u16) {
        if let Some(row) = self.rows.get_mut(ordinal as usize) {
            row.cpf_offset = cpf_offset;
            row.cpf_size = cpf_size;
            self.last_read = None;
        }
    }

    /// Looks up a row, short-circuiting on a repeat request for the same ordinal.
    pub fn row(&mut self, ordinal: u32) -> Option<CifRow> {
        if let Some((last_ordinal, row)) = self.last_read {
            if last_ordinal == ordinal {
                return Some(row);
            }
        }
        let row = self.rows.get(ordinal as usize).copied()?;
        self.last_read = Some((ordinal, row));
        Some(row)
    }

    /// Serialises the whole table, one fixed-width row after another.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.rows.len() * ROW_LEN);
        for row in &self.rows {
            buf.extend_from_slice(&row.encode());
        }
        buf
    }

    /// Parses a whole table back from its serialised form.
    pub fn from_bytes(buf: &[u8]) -> Cif {
        let rows = buf.chunks_exact(ROW_LEN).map(CifRow::decode).collect();
        Cif::from_rows(rows)
    }
}

fn sibling(path: &Path, extension: &str) -> std::path::PathBuf {
    path.with_extension(extension)
}

fn write_rows(path: &Path, cif: &Cif) -> Result<()> {
    let mut file = fs::File::create(path).map_err(|e| Error::io(path, e))?;
    file.write_all(&cif.to_bytes())
        .map_err(|e| Error::io(path, e))
}

fn read_rows(path: &Path) -> Result<Cif> {
    let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
    Ok(Cif::from_bytes(&bytes))
}

/// Writes `cif`'s rows to `cwf_path`'s sibling `.cwi.tmp`, then renames it to
/// `.cwi` (§4.6 step 1: "on CWF close the CWI is renamed to `.cwi`").
pub fn finalize_cwf(cwf_path: &Path, cif: &Cif) -> Result<()> {
    let tmp = sibling(cwf_path, "cwi.tmp");
    let target = sibling(cwf_path, "cwi");
    write_rows(&tmp, cif)?;
    fs::rename(&tmp, &target).map_err(|e| Error::io(target, e))
}

/// Adopts a pre-existing `.cwi` for CPF creation (§4.6 step 2): reads its
/// rows and copies them into a fresh `.cif.tmp`, leaving the original `.cwi`
/// untouched so [`abort_cpf`] can hand it back unharmed. Returns an empty
/// table (not an error) if no `.cwi` exists yet, so the caller falls back to
/// [`rescan`].
pub fn adopt_for_cpf_creation(cwf_path: &Path) -> Result<Cif> {
    let cwi_path = sibling(cwf_path, "cwi");
    let cif = match fs::read(&cwi_path) {
        Ok(bytes) => Cif::from_bytes(&bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Cif::new(),
        Err(e) => return Err(Error::io(cwi_path, e)),
    };
    if !cif.is_empty() {
        let tmp = sibling(cwf_path, "cif.tmp");
        write_rows(&tmp, &cif)?;
    }
    Ok(cif)
}

/// Finalises a CPF creation pass (§4.6 step 3): writes `cif`'s current rows
/// to `.cif.tmp`, renames it to `.cif`, and best-effort removes the now-stale
/// `.cwi`.
pub fn finalize_cpf(cwf_path: &Path, cif: &Cif) -> Result<()> {
    let tmp = sibling(cwf_path, "cif.tmp");
    let target = sibling(cwf_path, "cif");
    write_rows(&tmp, cif)?;
    fs::rename(&tmp, &target).map_err(|e| Error::io(target, e))?;
    let _ = fs::remove_file(sibling(cwf_path, "cwi"));
    Ok(())
}

/// Aborts a half-written CPF creation (§4.6 step 4): removes `.cif.tmp`,
/// leaving `.cwi` intact for a retry. The caller is responsible for deleting
/// the half-written CPF file itself.
pub fn abort_cpf(cwf_path: &Path) -> Result<()> {
    let tmp = sibling(cwf_path, "cif.tmp");
    match fs::remove_file(&tmp) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(tmp, e)),
    }
}

/// Loads a finalised `.cif` from disk, failing if it is missing or empty.
pub fn load(cwf_path: &Path) -> Result<Cif> {
    let cif_path = sibling(cwf_path, "cif");
    read_rows(&cif_path)
}

/// Rebuilds a CIF by rescanning the CWF and (if present) CPF byte streams in
/// parallel, reading each record's own length prefix to find the next
/// offset (§4.6 "CIF regeneration", §7 recovery).
pub fn rescan<R: Read + Seek>(cwf: &mut R, mut cpf: Option<&mut R>) -> Result<Cif> {
    let cwf_len = cwf.seek(SeekFrom::End(0)).map_err(|e| Error::io("<cwf>", e))?;
    cwf.seek(SeekFrom::Start(0)).map_err(|e| Error::io("<cwf>", e))?;
    let cpf_len = match cpf.as_deref_mut() {
        Some(r) => {
            let len = r.seek(SeekFrom::End(0)).map_err(|e| Error::io("<cpf>", e))?;
            r.seek(SeekFrom::Start(0)).map_err(|e| Error::io("<cpf>", e))?;
            Some(len)
        }
        None => None,
    };

    let mut rows = Vec::new();
    let mut cwf_pos = 0u64;
    let mut cpf_pos = 0u64;
    loop {
        if cwf_pos >= cwf_len {
            break;
        }
        let cwf_size = read_length_prefix(cwf)?;
        let row_cwf_offset = cwf_pos;
        cwf_pos += u64::from(cwf_size);

        let (cpf_offset, cpf_size) = if let Some(r) = cpf.as_deref_mut() {
            if cpf_pos < cpf_len.unwrap_or(0) {
                let size = read_length_prefix(r)?;
                let offset = cpf_pos;
                cpf_pos += u64::from(size);
                (offset, size as u16)
            } else {
                (0, 0)
            }
        } else {
            (0, 0)
        };

        rows.push(CifRow {
            cwf_offset: row_cwf_offset,
            cwf_size: cwf_size as u16,
            cpf_offset,
            cpf_size,
        });
    }
    Ok(Cif::from_rows(rows))
}

fn read_length_prefix<R: Read + Seek>(r: &mut R) -> Result<u32> {
    let len = r.read_u32::<BigEndian>().map_err(|e| Error::io("<scan>", e))?;
    r.seek(SeekFrom::Current(i64::from(len) - i64::from(LENGTH_PREFIX_BITS / 8)))
        .map_err(|e| Error::io("<scan>", e))?;
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_set_roundtrip() {
        let mut cif = Cif::new();
        let ordinal = cif.push_cwf(1000, 80);
        cif.set_cpf(ordinal, 500, 40);
        let row = cif.row(ordinal).unwrap();
        assert_eq!(1000, row.cwf_offset);
        assert_eq!(500, row.cpf_offset);
    }

    #[test]
    fn same_position_read_short_circuits() {
        let mut cif = Cif::new();
        cif.push_cwf(0, 10);
        cif.push_cwf(10, 20);
        assert!(cif.row(0).is_some());
        assert!(cif.row(0).is_some());
        assert!(cif.row(1).is_some());
    }

    #[test]
    fn byte_roundtrip_preserves_rows() {
        let mut cif = Cif::new();
        cif.push_cwf(10, 20);
        cif.set_cpf(0, 30, 40);
        let bytes = cif.to_bytes();
        let reloaded = Cif::from_bytes(&bytes);
        assert_eq!(cif.rows, reloaded.rows);
    }

    #[test]
    fn rescan_recovers_offsets_from_length_prefixes() {
        use std::io::Cursor;
        let mut cwf = Vec::new();
        cwf.extend_from_slice(&20u32.to_be_bytes());
        cwf.extend_from_slice(&[0u8; 16]);
        cwf.extend_from_slice(&12u32.to_be_bytes());
        cwf.extend_from_slice(&[0u8; 8]);
        let mut cwf = Cursor::new(cwf);

        let cif = rescan(&mut cwf, None).unwrap();
        assert_eq!(2, cif.rows.len());
        assert_eq!(0, cif.rows[0].cwf_offset);
        assert_eq!(20, cif.rows[0].cwf_size);
        assert_eq!(20, cif.rows[1].cwf_offset);
        assert_eq!(12, cif.rows[1].cwf_size);
    }
}
