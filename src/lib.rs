//! Reads and writes the CZMIL family of airborne LiDAR files: a waveform
//! file (CWF), a point file (CPF), a sensor/navigation file (CSF), an audit
//! file (CAF), and the derived index file (CIF) that cross-links CWF and
//! CPF records by shot ordinal.
//!
//! The five files share one ASCII header format (see [`header`]) and a
//! common bit-packed record shape: nearly every scalar occupies a
//! non-byte-aligned field whose width, scale, and offset are declared in
//! that header rather than fixed by a type. [`bitio`] is the primitive this
//! is built on; [`record`] and [`compression`] implement the five record
//! codecs; [`file`] and [`index`] bind them into open/append/read/update
//! operations over a file set; [`context`] hosts the process-wide state
//! (an open-descriptor table, a UTC-timezone latch, a progress-reporter
//! slot) plus a flat, handle-and-error-code API for callers that prefer it
//! over the idiomatic `Result`-returning surface, which is this crate's
//! primary API.
//!
//! # Creating a point file
//!
//! ```
//! use std::io::Cursor;
//! use czmil::file::cpf::CpfWriter;
//! use czmil::header::{Builder, FileType};
//!
//! let header = Builder::new(FileType::Cpf, (3, 0)).into_header().unwrap();
//! let mut writer = CpfWriter::new(Cursor::new(Vec::new()), header).unwrap();
//! writer.close().unwrap();
//! ```
//!
//! # Reading records back
//!
//! ```
//! use std::io::Cursor;
//! use czmil::file::csf::CsfHandle;
//! use czmil::header::{Builder, FileType};
//! use czmil::record::csf::CsfRecord;
//!
//! let header = Builder::new(FileType::Csf, (2, 0)).into_header().unwrap();
//! let mut handle = CsfHandle::create(Cursor::new(Vec::new()), header).unwrap();
//! handle.append(&CsfRecord::default()).unwrap();
//! let record = handle.read(0).unwrap();
//! assert_eq!(0, record.timestamp);
//! ```

#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_import_braces
)]

pub mod bitio;
pub mod compression;
pub mod context;
pub mod error;
pub mod file;
pub mod header;
pub mod index;
pub mod record;

pub use error::{Error, Result};
pub use header::{Builder, Header};
