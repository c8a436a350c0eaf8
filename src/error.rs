//! Error types and handling for imgtrace.

use std::fmt;

/// Custom error type for extraction operations
#[derive(Debug)]
pub enum Error {
    /// I/O related errors
    Io(std::io::Error),
    /// JSON serialization errors
    Json(serde_json::Error),
    /// CSV writing errors
    Csv(csv::Error),
    /// SQLite errors from browser stores
    Sqlite(rusqlite::Error),
    /// The disk image could not be opened (missing segments, zero size, bad container)
    ImageOpen(String),
    /// No NTFS partition exists on the image
    NoFilesystemFound,
    /// The filesystem at the chosen offset could not be mounted
    Mount(String),
    /// A path does not exist inside the mounted volume
    NotFound(String),
    /// A file exists but its content could not be read
    Read(String),
    /// A binary structure failed to decode
    Parse(String),
    /// Invalid input or configuration
    InvalidInput(String),
    /// Generic error with message
    Generic(String),
}

impl Error {
    /// Whether this error must abort the whole extraction run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ImageOpen(_) | Error::NoFilesystemFound | Error::Mount(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Json(err) => write!(f, "JSON error: {}", err),
            Error::Csv(err) => write!(f, "CSV error: {}", err),
            Error::Sqlite(err) => write!(f, "SQLite error: {}", err),
            Error::ImageOpen(msg) => write!(f, "Cannot open image: {}", msg),
            Error::NoFilesystemFound => write!(f, "No NTFS partition found on image"),
            Error::Mount(msg) => write!(f, "Cannot mount filesystem: {}", msg),
            Error::NotFound(path) => write!(f, "Not found: {}", path),
            Error::Read(msg) => write!(f, "Read error: {}", msg),
            Error::Parse(msg) => write!(f, "Parse error: {}", msg),
            Error::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            Error::Generic(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::Csv(err) => Some(err),
            Error::Sqlite(err) => Some(err),
            _ => None,
        }
    }
}

// Convenient conversion traits
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Csv(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Sqlite(err)
    }
}

/// Convenient Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::NoFilesystemFound.is_fatal());
        assert!(Error::ImageOpen("x".into()).is_fatal());
        assert!(!Error::NotFound("/Windows".into()).is_fatal());
        assert!(!Error::Parse("bad cell".into()).is_fatal());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short");
        let err: Error = io.into();
        assert!(err.to_string().starts_with("I/O error"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
