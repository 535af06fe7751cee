use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top level error returned by every session and capture operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("unable to capture a valid trace after {attempts} attempts")]
    CaptureExhausted { attempts: usize },

    #[error("export error: {0}")]
    Export(#[from] ExportError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("device is not connected, call connect() first")]
    NotConnected,

    #[error("device is already connected")]
    AlreadyConnected,

    #[error("connection is invalid, reconnect the device")]
    LinkLost,

    #[error("device error: {0}")]
    Device(#[from] DeviceError),
}

/// Errors reported by a device driver implementation.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("no capture device found")]
    NotFound,

    #[error("device did not respond within {0:?}")]
    Timeout(std::time::Duration),

    #[error("device communication failed: {0}")]
    Comm(String),

    #[error("invalid device settings: {0}")]
    InvalidSettings(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} length must be {expected} bytes, got {actual}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{field} length must be in 8-bit units, got {bits} bits")]
    BitLength { field: &'static str, bits: usize },

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: i64,
        max: i64,
        value: i64,
    },

    #[error("unsupported {field} '{value}' (available: {available})")]
    UnknownVariant {
        field: &'static str,
        value: String,
        available: &'static str,
    },

    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("file does not exist: {0}")]
    MissingFile(PathBuf),

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("invalid point of interest {start}..{end} for {samples} samples")]
    InvalidPoi {
        start: usize,
        end: usize,
        samples: usize,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("\"{0}\" is not a directory")]
    NotADirectory(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("hdf5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    #[error("invalid string for export: {0}")]
    Encoding(String),
}

impl From<DeviceError> for Error {
    fn from(value: DeviceError) -> Self {
        Error::Connection(ConnectionError::Device(value))
    }
}
