//! Status codes, allocator errors, and the fatal protocol-exception type.
//!
//! Draws a hard line between three kinds of failure: recoverable,
//! per-operation status codes (`StatusError`); allocator programmer errors
//! (`AllocError`), which propagate unchanged; and a fatal wire/state-machine
//! violation (`ProtocolError`), which must never be swallowed into a status
//! code.

use thiserror::Error;

/// Per-operation status, carried on the wire in every response header.
///
/// `S_OK` is represented by `Ok(())`/`Ok(value)` at the Rust API boundary;
/// everything else is a variant here.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusError {
    /// Generic failure caught from an unexpected condition.
    #[error("generic failure")]
    Fail,
    /// Invalid argument that passed local checks too late (e.g. bad pool id).
    #[error("invalid argument")]
    Inval,
    /// Caller-provided parameter rejected before any I/O was issued.
    #[error("bad parameter")]
    BadParam,
    /// Value or combined message exceeds a transport/buffer limit.
    #[error("value too large")]
    TooLarge,
    /// Record-level: key absent.
    #[error("key not found")]
    KeyNotFound,
    /// Record-level: key present without replace semantics.
    #[error("key exists")]
    KeyExists,
    /// Sentinel for a failed create/open at the pool level.
    #[error("pool error")]
    PoolError,
}

/// Wire encoding of [`StatusError`] plus success (`0`).
///
/// Field order and code values must be stable across a deployment, even
/// though they are otherwise an implementation detail.
pub const STATUS_OK: i32 = 0;

impl StatusError {
    pub fn to_wire(self) -> i32 {
        match self {
            StatusError::Fail => -1,
            StatusError::Inval => -2,
            StatusError::BadParam => -3,
            StatusError::TooLarge => -4,
            StatusError::KeyNotFound => -5,
            StatusError::KeyExists => -6,
            StatusError::PoolError => -7,
        }
    }

    pub fn from_wire(code: i32) -> Result<(), StatusError> {
        match code {
            STATUS_OK => Ok(()),
            -1 => Err(StatusError::Fail),
            -2 => Err(StatusError::Inval),
            -3 => Err(StatusError::BadParam),
            -4 => Err(StatusError::TooLarge),
            -5 => Err(StatusError::KeyNotFound),
            -6 => Err(StatusError::KeyExists),
            -7 => Err(StatusError::PoolError),
            _ => Err(StatusError::Fail),
        }
    }
}

/// Fatal: wire framing or connection-state-machine invariant violated.
///
/// A connection that raises this must be considered unusable. Never
/// converted to [`StatusError`] — kept as a distinct type so it cannot be
/// accidentally mapped away by a `catch-all -> Fail` conversion.
#[derive(Error, Debug)]
#[error("protocol exception: {0}")]
pub struct ProtocolError(pub String);

impl ProtocolError {
    pub fn unexpected_type(expected: &str, got: u8) -> Self {
        ProtocolError(format!("expected {expected} message, got type_id=0x{got:x}"))
    }
}

/// Allocator errors. Propagate unchanged: they indicate a programming error,
/// not a runtime failure.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("requested size out of range for available buckets")]
    OutOfRange,
    #[error("allocation failed")]
    BadAlloc,
}

/// Pool-manager errors: a closed enum rather than a process-global
/// `std::error_category`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    #[error("default pool failure")]
    PoolFail,
    #[error("pool unsupported flags")]
    PoolUnsupportedMode,
    #[error("region-backed pool failure")]
    RegionFail,
    #[error("region-backed pool failure (general exception)")]
    RegionFailGeneral,
    #[error("region-backed pool failure (api exception)")]
    RegionFailApi,
    #[error("pool not found")]
    NotFound,
    #[error("pool already exists")]
    AlreadyExists,
}

impl From<PoolError> for StatusError {
    fn from(_: PoolError) -> Self {
        StatusError::PoolError
    }
}
