//! Error types for datatype conversion.

use crate::datatype::{CharacterSet, DatatypeByteOrder, Pad, TypeClass};
use crate::except::ConvException;

/// Errors raised while initializing or running a conversion path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConvError {
    /// The converter does not handle this pair of datatypes.
    #[error("conversion not supported: {0}")]
    Unsupported(String),
    /// Array datatypes differ in rank.
    #[error("array datatypes do not have the same number of dimensions ({src} vs {dst})")]
    ArrayRankMismatch {
        /// Source rank.
        src: usize,
        /// Destination rank.
        dst: usize,
    },
    /// Array datatypes differ in the extent of one dimension.
    #[error("array datatypes do not have the same sizes of dimensions (dimension {dim}: {src} vs {dst})")]
    ArrayDimMismatch {
        /// Index of the first differing dimension.
        dim: usize,
        /// Source extent.
        src: u32,
        /// Destination extent.
        dst: u32,
    },
    /// A source enumeration member name has no counterpart in the destination.
    #[error("source enum type is not a subset of destination enum type: missing `{name}`")]
    EnumNotSubset {
        /// The unmatched member names, comma separated.
        name: String,
    },
    /// Strings of different character sets.
    #[error("cannot convert strings between {src:?} and {dst:?}")]
    CharsetMismatch {
        /// Source character set.
        src: CharacterSet,
        /// Destination character set.
        dst: CharacterSet,
    },
    /// Reference conversion requires the opaque destination encoding.
    #[error("destination reference type is not the opaque encoding")]
    NotOpaqueReference,
    /// Only little- and big-endian data can be converted.
    #[error("unsupported byte order: {0:?}")]
    UnsupportedByteOrder(DatatypeByteOrder),
    /// Padding other than zero or one was requested.
    #[error("unsupported {which} padding: {pad:?}")]
    UnsupportedPad {
        /// `"LSB"` or `"MSB"`.
        which: &'static str,
        /// The offending padding.
        pad: Pad,
    },
    /// An encoded property code was out of range.
    #[error("invalid {what} code: {code}")]
    InvalidCode {
        /// Property being decoded.
        what: &'static str,
        /// Raw code.
        code: u8,
    },
    /// The exception handler asked to abort.
    #[error("conversion aborted by exception handler ({0:?})")]
    Aborted(ConvException),
    /// Neither a hard nor a soft function accepted the pair.
    #[error("no conversion path from {src} to {dst}")]
    NoConversionPath {
        /// Source class.
        src: TypeClass,
        /// Destination class.
        dst: TypeClass,
    },
    /// The caller's buffer cannot hold the requested elements.
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes required.
        needed: usize,
        /// Bytes supplied.
        available: usize,
    },
    /// A reference class operation failed.
    #[error("reference conversion failed: {0}")]
    Reference(String),
    /// The datatype has the wrong class for this operation.
    #[error("expected {expected} datatype, got {actual}")]
    BadType {
        /// Class the operation needs.
        expected: &'static str,
        /// Class supplied.
        actual: TypeClass,
    },
    /// The path was released from the registry and cannot run.
    #[error("conversion path `{0}` has been released")]
    PathReleased(String),
    /// The path is already executing further up the call stack.
    #[error("conversion path `{0}` is already in use")]
    PathBusy(String),
    /// A datatype is too wide for its bit positions to fit a `u16`.
    #[error("datatype of {0} bytes is too wide for a bit layout")]
    LayoutTooWide(u32),
}

impl ConvError {
    /// Whether this error only means "this converter does not apply".
    ///
    /// Path search skips soft functions whose initialization fails with
    /// such an error and tries the next candidate.
    pub fn is_capability_mismatch(&self) -> bool {
        matches!(
            self,
            ConvError::Unsupported(_)
                | ConvError::ArrayRankMismatch { .. }
                | ConvError::ArrayDimMismatch { .. }
                | ConvError::EnumNotSubset { .. }
                | ConvError::CharsetMismatch { .. }
                | ConvError::NotOpaqueReference
                | ConvError::UnsupportedByteOrder(_)
                | ConvError::UnsupportedPad { .. }
                | ConvError::BadType { .. }
        )
    }
}

/// Result type for conversion operations.
pub type Result<T> = std::result::Result<T, ConvError>;

/// Fail with [`ConvError::BufferTooSmall`] unless `data` holds `needed` bytes.
pub(crate) fn ensure_len(data: &[u8], needed: usize) -> Result<()> {
    if needed > data.len() {
        Err(ConvError::BufferTooSmall {
            needed,
            available: data.len(),
        })
    } else {
        Ok(())
    }
}
