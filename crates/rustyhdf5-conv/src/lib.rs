//! Bit-exact HDF5 datatype conversion.
//!
//! This crate converts buffers of HDF5 data elements between datatype
//! descriptions in place: byte order, integer and bitfield precision,
//! string padding, enumerations, arrays and references.
//!
//! A [`Registry`] holds the conversion functions and caches one
//! [`ConversionPath`](path::ConversionPath) per (source, destination) pair.
//!
//! ```
//! use rustyhdf5_conv::{Datatype, Registry, TransferProps};
//!
//! let registry = Registry::new();
//! let mut buf = 0x0102_0304_i32.to_be_bytes();
//! registry
//!     .convert(
//!         &Datatype::std_i32_be(),
//!         &Datatype::std_i32_le(),
//!         1,
//!         &mut buf,
//!         None,
//!         &TransferProps::new(),
//!     )
//!     .unwrap();
//! assert_eq!(i32::from_le_bytes(buf), 0x0102_0304);
//! ```

pub mod bits;
pub mod conv;
pub mod datatype;
pub mod error;
pub mod except;
pub mod path;
pub mod props;
pub mod refclass;
pub mod registry;
pub mod traverse;

pub use datatype::{
    AtomicLayout, CharacterSet, Datatype, DatatypeByteOrder, EnumMember, FloatFields,
    MantissaNorm, Pad, RefLocation, ReferenceType, StringPadding, TypeClass,
};
pub use error::{ConvError, Result};
pub use except::{ConvException, ExceptionAction, ExceptionEvent, ExceptionHandler};
pub use path::{BackgroundNeed, ConvArgs, ConvCtx, ConversionPath, Converter, InitCtx, PathRef};
pub use props::TransferProps;
pub use refclass::RefClass;
pub use registry::{Persistence, Registry};
