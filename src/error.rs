use crate::hash::ObjectId;
use std::fmt::{self, Display, Formatter};

pub type GpResult<T> = Result<T, GpGenericError>;
pub type GpGenericError = anyhow::Error;

// usually we can just use anyhow for errors, but sometimes its nice to have a "rust"
// representation we can test or match against without going through the message string.
#[derive(Debug)]
#[cfg_attr(test, derive(PartialEq))]
pub enum GpError {
    ObjectNotFound(ObjectId),
    OffsetNotFound(u64),
    /// object `{0}` not found in pack index, but could be inserted at `{1}`
    ObjectNotFoundInIndex(ObjectId, u64),
    MalformedIdx(String),
    MalformedRev(String),
    MalformedPack(String),
    MalformedIndexFile(String),
    UnsupportedVersion(u32),
    UnsupportedHash(u8),
    UnknownMandatoryExtension([u8; 4]),
    InvalidChecksum,
    InvalidTimestamp,
    DeltaResolveFailed(String),
}

pub trait GpErrorExt {
    fn try_into_gp_error(self) -> GpResult<GpError>;
    fn try_into_not_found_err(self) -> GpResult<ObjectId>;
    fn try_into_not_found_in_index_err(self) -> GpResult<(ObjectId, u64)>;
}

impl GpErrorExt for GpGenericError {
    /// tries to convert the generic error into the specific error, returning the
    /// original error unchanged on failure
    fn try_into_gp_error(self) -> GpResult<GpError> {
        match self.downcast::<GpError>() {
            Ok(err) => Ok(err),
            Err(cast_failed_err) => Err(cast_failed_err),
        }
    }

    fn try_into_not_found_err(self) -> GpResult<ObjectId> {
        match self.try_into_gp_error()? {
            GpError::ObjectNotFound(oid) => Ok(oid),
            err => Err(anyhow!(err)),
        }
    }

    fn try_into_not_found_in_index_err(self) -> GpResult<(ObjectId, u64)> {
        match self.try_into_gp_error()? {
            GpError::ObjectNotFoundInIndex(oid, pos) => Ok((oid, pos)),
            err => Err(anyhow!(err)),
        }
    }
}

pub trait GpResultExt {
    fn is_not_found_err(&self) -> bool;
    fn is_fatal(&self) -> bool;
}

macro_rules! error_ext_is_method {
    ($method:ident) => {
        fn $method(&self) -> bool {
            match self {
                Ok(..) => false,
                Err(err) => err.$method(),
            }
        }
    };
}

impl<T> GpResultExt for GpResult<T> {
    error_ext_is_method!(is_not_found_err);

    error_ext_is_method!(is_fatal);
}

impl GpResultExt for GpGenericError {
    fn is_not_found_err(&self) -> bool {
        match self.downcast_ref::<GpError>() {
            Some(err) => matches!(
                err,
                GpError::ObjectNotFound(..)
                    | GpError::OffsetNotFound(..)
                    | GpError::ObjectNotFoundInIndex(..)
            ),
            None => false,
        }
    }

    fn is_fatal(&self) -> bool {
        match self.downcast_ref::<GpError>() {
            Some(..) => !self.is_not_found_err(),
            None => true,
        }
    }
}

impl Display for GpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            GpError::ObjectNotFound(oid) => write!(f, "object with hash `{}` not found", oid),
            GpError::OffsetNotFound(offset) => write!(f, "no object at pack offset `{}`", offset),
            GpError::ObjectNotFoundInIndex(..) => bug!("not a user facing error"),
            GpError::MalformedIdx(msg) => write!(f, "malformed pack index: {}", msg),
            GpError::MalformedRev(msg) => write!(f, "malformed reverse index: {}", msg),
            GpError::MalformedPack(msg) => write!(f, "malformed pack: {}", msg),
            GpError::MalformedIndexFile(msg) => write!(f, "malformed index file: {}", msg),
            GpError::UnsupportedVersion(v) => write!(f, "unsupported format version `{}`", v),
            GpError::UnsupportedHash(b) => write!(f, "unsupported hash function byte `{}`", b),
            GpError::UnknownMandatoryExtension(tag) => write!(
                f,
                "unknown mandatory index extension `{}`",
                String::from_utf8_lossy(tag)
            ),
            GpError::InvalidChecksum => write!(f, "trailing checksum mismatch"),
            GpError::InvalidTimestamp => write!(f, "timestamp cannot be represented on disk"),
            GpError::DeltaResolveFailed(msg) => write!(f, "failed to resolve delta: {}", msg),
        }
    }
}

impl std::error::Error for GpError {
}
