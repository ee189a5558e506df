//! Process-wide state shared across every open file handle: an
//! open-descriptor table bounded by [`crate::file::MAX_FILES`] per file
//! type, a latched "report forward-version warnings once, not per read"
//! slot, and a progress-reporter callback (§5, §6, §7).
//!
//! [`legacy`] layers a flat open/close/get_errno surface on top of this for
//! callers that prefer a handle-table-and-error-code API over the idiomatic
//! `Result`-returning one that is this crate's primary surface.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use crate::header::FileType;

/// The most recent forward-version warning observed, if any has not yet been
/// taken by a caller. [`crate::error::Error`] doesn't carry this because it
/// doesn't abort the read that triggered it (§4.2: "absent/newer-version
/// fields default rather than fail").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Warning {
    /// The file whose version triggered the warning.
    pub path: std::path::PathBuf,
    /// The message logged via `log::warn!` at the same moment.
    pub message: String,
}

/// Process-wide bookkeeping: a bounded open-descriptor count per file type
/// and the last unacknowledged warning.
#[derive(Debug, Default)]
pub struct Registry {
    open_counts: Mutex<HashMap<FileTypeKey, usize>>,
    warning: Mutex<Option<Warning>>,
    progress: Mutex<Option<Box<dyn Fn(f64) + Send>>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct FileTypeKey(u8);

impl From<FileType> for FileTypeKey {
    fn from(ft: FileType) -> FileTypeKey {
        FileTypeKey(match ft {
            FileType::Cwf => 0,
            FileType::Cpf => 1,
            FileType::Csf => 2,
            FileType::Caf => 3,
            FileType::Cif => 4,
        })
    }
}

impl Registry {
    /// The process-wide registry, created on first use.
    pub fn global() -> &'static Registry {
        static REGISTRY: OnceLock<Registry> = OnceLock::new();
        REGISTRY.get_or_init(Registry::default)
    }

    /// Reserves one descriptor slot for `file_type`, failing once
    /// [`crate::file::MAX_FILES`] are already open for that type (§5).
    pub fn acquire(&self, file_type: FileType) -> crate::error::Result<()> {
        let mut counts = self.open_counts.lock().unwrap();
        let count = counts.entry(file_type.into()).or_insert(0);
        if *count >= crate::file::MAX_FILES {
            return Err(crate::error::Error::TooManyOpenFiles {
                file_type,
                limit: crate::file::MAX_FILES,
            });
        }
        *count += 1;
        Ok(())
    }

    /// Releases a descriptor slot reserved by [`Registry::acquire`].
    pub fn release(&self, file_type: FileType) {
        let mut counts = self.open_counts.lock().unwrap();
        if let Some(count) = counts.get_mut(&FileTypeKey::from(file_type)) {
            *count = count.saturating_sub(1);
        }
    }

    /// How many handles of `file_type` are currently open.
    pub fn open_count(&self, file_type: FileType) -> usize {
        *self
            .open_counts
            .lock()
            .unwrap()
            .get(&FileTypeKey::from(file_type))
            .unwrap_or(&0)
    }

    /// Records a forward-version warning for later retrieval, replacing any
    /// unacknowledged one (latest wins; this is a diagnostic convenience,
    /// not a queue).
    pub fn record_warning(&self, warning: Warning) {
        *self.warning.lock().unwrap() = Some(warning);
    }

    /// Takes (and clears) the last recorded warning, if any.
    pub fn take_warning(&self) -> Option<Warning> {
        self.warning.lock().unwrap().take()
    }

    /// Installs a progress-reporter callback, invoked with a `0.0..=1.0`
    /// fraction by long-running operations that choose to report (§5). Pass
    /// `None` to clear it.
    pub fn set_progress_reporter(&self, reporter: Option<Box<dyn Fn(f64) + Send>>) {
        *self.progress.lock().unwrap() = reporter;
    }

    /// Reports `fraction` to the installed progress callback, if any.
    pub fn report_progress(&self, fraction: f64) {
        if let Some(reporter) = self.progress.lock().unwrap().as_ref() {
            reporter(fraction);
        }
    }
}

/// Ensures every timestamp this crate writes is interpreted as UTC.
///
/// The original tooling this format comes from latched the process timezone
/// to UTC once at startup via an environment variable. This crate never
/// reads a process-local timezone in the first place: every timestamp field
/// is Unix epoch microseconds and every conversion in this crate goes
/// through `chrono::Utc` explicitly, so there is nothing left to latch. This
/// function is kept as a deliberate no-op so callers migrating from that
/// convention have somewhere to call and can delete the call once they
/// trust the explicit-UTC discipline above.
pub fn ensure_utc_once() {}

/// A flat, handle-table-and-error-code convenience surface over [`Registry`]
/// and the idiomatic handle types in [`crate::file`], for callers porting
/// code that expects "open returns an integer handle, operations take that
/// handle, the last error is fetched separately" rather than `Result`.
pub mod legacy {
    use std::sync::Mutex;

    use crate::error::Error;

    /// The last error recorded by a `legacy` operation on this thread's
    /// behalf, mirroring a C API's `errno`-style slot (§6: "the public API
    /// returns a status code and stashes the detailed error in a
    /// process-global last-error slot, retrieved with `get_errno`").
    static LAST_ERROR: Mutex<Option<Error>> = Mutex::new(None);

    /// Records `error` as the last error, returning the integer status code
    /// legacy callers switch on (0 reserved for success, so this always
    /// returns a nonzero code).
    pub fn record_error(error: Error) -> i32 {
        let code = error_code(&error);
        *LAST_ERROR.lock().unwrap() = Some(error);
        code
    }

    /// Clears and returns the last recorded error, if any (`get_errno`'s
    /// detailed counterpart).
    pub fn take_last_error() -> Option<Error> {
        LAST_ERROR.lock().unwrap().take()
    }

    /// Maps an [`Error`] to the stable integer code a legacy caller would
    /// switch on. Grouped by the five error classes named in
    /// [`crate::error`]'s module docs.
    pub fn error_code(error: &Error) -> i32 {
        match error {
            Error::Io { .. } => 1,
            Error::MissingMagic { .. } => 2,
            Error::CifMismatch { .. } => 3,
            Error::ValueOutOfRange { .. } => 4,
            Error::AlreadyExists { .. } => 5,
            Error::ReadOnly { .. } => 6,
            Error::TooManyOpenFiles { .. } => 7,
            Error::InvalidRecordNumber { .. } => 8,
            Error::TimeRegression { .. } => 9,
            Error::ReservedTagName(_) => 10,
            Error::HeaderSizeExceeded { .. } => 11,
            Error::RecordSizeChanged { .. } => 12,
            Error::UnknownExtension { .. } => 13,
            Error::Closed => 14,
            Error::CifUnavailable { .. } => 15,
        }
    }

    /// Runs `op`, recording any error in the last-error slot and collapsing
    /// the result to 0 (success) or the error's code.
    pub fn call<T>(op: impl FnOnce() -> crate::error::Result<T>) -> i32 {
        match op() {
            Ok(_) => 0,
            Err(e) => record_error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_respects_max_files() {
        let registry = Registry::default();
        for _ in 0..crate::file::MAX_FILES {
            registry.acquire(FileType::Cwf).unwrap();
        }
        assert!(registry.acquire(FileType::Cwf).is_err());
        registry.release(FileType::Cwf);
        assert!(registry.acquire(FileType::Cwf).is_ok());
    }

    #[test]
    fn take_warning_clears_it() {
        let registry = Registry::default();
        assert!(registry.take_warning().is_none());
        registry.record_warning(Warning {
            path: "x.cpf".into(),
            message: "newer version".to_string(),
        });
        assert!(registry.take_warning().is_some());
        assert!(registry.take_warning().is_none());
    }

    #[test]
    fn legacy_call_maps_error_to_nonzero_code() {
        let code = legacy::call::<()>(|| {
            Err(Error::Closed)
        });
        assert_eq!(14, code);
        assert!(matches!(legacy::take_last_error(), Some(Error::Closed)));
    }
}
