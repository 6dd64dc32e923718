use std::{fmt, io, result, str::Utf8Error};

/// Result type used pervasively across this crate.
pub type Result<T> = result::Result<T, Error>;

/// Error kinds surfaced by the table database and its storage adapters.
///
/// Every public, mutating operation returns `Result<T>`; lookups that can
/// legitimately find nothing return `Option<T>` instead and leave the
/// caller to consult [`crate::Tdb::ecode`] to distinguish "not found" from
/// a genuine failure, matching the `ecode()` convention of the original
/// C library this crate's API is modeled on.
#[derive(Debug)]
pub enum Error {
    /// A caller-supplied argument violates an invariant (e.g. the
    /// reserved empty column name, a non-existent index column).
    InvalidArgument(String),
    /// The requested record, index entry, or column does not exist.
    NoRecord(String),
    /// `set_index(.., KEEP)` found an index already present.
    KeepViolation(String),
    /// The handle is not in a state that permits the requested operation
    /// (e.g. `set_index` while a transaction is open, `tranbegin` twice).
    InvalidState(String),
    /// Wraps an I/O failure not otherwise classified.
    Io(io::Error),
    /// A lock could not be acquired, or was poisoned by a panicking holder.
    Threading(String),
    /// `std::fs::remove_file` failed for an index or hash-store file.
    Unlink(String, io::Error),
    /// `std::fs::rename` failed, typically during `optimize` or `copy`.
    Rename(String, io::Error),
    /// Propagated verbatim from the LMDB-backed hash/b+-tree adapters.
    Store(lmdb::Error),
    /// A column value expected to be valid UTF-8 (token scanning,
    /// decimal parsing) was not.
    Encoding(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Error::NoRecord(msg) => write!(f, "no record: {}", msg),
            Error::KeepViolation(msg) => write!(f, "keep violation: {}", msg),
            Error::InvalidState(msg) => write!(f, "invalid state: {}", msg),
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Threading(msg) => write!(f, "threading error: {}", msg),
            Error::Unlink(path, err) => write!(f, "unlink {:?} failed: {}", path, err),
            Error::Rename(path, err) => write!(f, "rename {:?} failed: {}", path, err),
            Error::Store(err) => write!(f, "store error: {}", err),
            Error::Encoding(msg) => write!(f, "encoding error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Unlink(_, err) | Error::Rename(_, err) => Some(err),
            Error::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<lmdb::Error> for Error {
    fn from(err: lmdb::Error) -> Error {
        Error::Store(err)
    }
}

impl From<Utf8Error> for Error {
    fn from(err: Utf8Error) -> Error {
        Error::Encoding(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Error {
        Error::Threading(err.to_string())
    }
}
