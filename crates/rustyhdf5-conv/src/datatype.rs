//! Datatype descriptors consumed by the conversion engine.
//!
//! A [`Datatype`] describes the storage of one element: its size, its class
//! and the class-specific layout. Composite classes (array, enumeration,
//! variable-length) own their base type. Two descriptors compare equal when
//! they describe the same storage, which is what the path table keys on.

use std::fmt;

use crate::bits;
use crate::error::{ConvError, Result};

/// Byte order of atomic data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatatypeByteOrder {
    LittleEndian,
    BigEndian,
    Vax,
    /// No byte order (single-byte or non-numeric storage).
    None,
}

impl DatatypeByteOrder {
    /// The byte order of the machine running this code.
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            DatatypeByteOrder::BigEndian
        } else {
            DatatypeByteOrder::LittleEndian
        }
    }

    /// The other of little/big endian; `Vax` and `None` map to themselves.
    pub fn swapped(self) -> Self {
        match self {
            DatatypeByteOrder::LittleEndian => DatatypeByteOrder::BigEndian,
            DatatypeByteOrder::BigEndian => DatatypeByteOrder::LittleEndian,
            other => other,
        }
    }

    pub(crate) fn is_le_or_be(self) -> bool {
        matches!(
            self,
            DatatypeByteOrder::LittleEndian | DatatypeByteOrder::BigEndian
        )
    }
}

/// Content of bits outside an atomic value's significant range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pad {
    /// Always set to 0.
    Zero,
    /// Always set to 1.
    One,
    /// Taken from the background buffer.
    Background,
    /// Invalid padding marker.
    Error,
}

impl Pad {
    /// Decode the on-disk padding code.
    pub fn from_code(code: u8) -> Result<Pad> {
        match code {
            0 => Ok(Pad::Zero),
            1 => Ok(Pad::One),
            2 => Ok(Pad::Background),
            _ => Err(ConvError::InvalidCode {
                what: "padding",
                code,
            }),
        }
    }
}

/// String padding type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringPadding {
    NullTerminate,
    NullPad,
    SpacePad,
}

impl StringPadding {
    /// Decode the on-disk string padding code.
    pub fn from_code(code: u8) -> Result<StringPadding> {
        match code {
            0 => Ok(StringPadding::NullTerminate),
            1 => Ok(StringPadding::NullPad),
            2 => Ok(StringPadding::SpacePad),
            _ => Err(ConvError::InvalidCode {
                what: "string padding",
                code,
            }),
        }
    }
}

/// Character set encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacterSet {
    Ascii,
    Utf8,
}

impl CharacterSet {
    /// Decode the on-disk character set code.
    pub fn from_code(code: u8) -> Result<CharacterSet> {
        match code {
            0 => Ok(CharacterSet::Ascii),
            1 => Ok(CharacterSet::Utf8),
            _ => Err(ConvError::InvalidCode {
                what: "character set",
                code,
            }),
        }
    }
}

/// Reference kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceType {
    /// Legacy object reference (a bare object address).
    Object,
    /// Legacy dataset region reference.
    DatasetRegion,
    /// Canonical opaque encoding able to hold any kind of reference.
    Opaque,
}

/// Where reference data lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefLocation {
    Memory,
    Disk,
}

/// Mantissa normalization of a floating-point type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MantissaNorm {
    None,
    MsbSet,
    /// Most significant mantissa bit is implied (IEEE 754).
    Implied,
}

/// Layout shared by every atomic class: where the significant bits sit
/// and what fills the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtomicLayout {
    pub byte_order: DatatypeByteOrder,
    /// Bit offset of the least significant significant bit.
    pub bit_offset: u16,
    /// Number of significant bits.
    pub bit_precision: u16,
    /// Padding below `bit_offset`.
    pub lsb_pad: Pad,
    /// Padding above `bit_offset + bit_precision`.
    pub msb_pad: Pad,
}

impl AtomicLayout {
    /// Full-width layout: every bit of `size` bytes is significant.
    ///
    /// Fails with [`ConvError::LayoutTooWide`] when `size * 8` does not fit
    /// the 16-bit precision field.
    pub fn full(size: u32, byte_order: DatatypeByteOrder) -> Result<Self> {
        let bits = size
            .checked_mul(8)
            .and_then(|b| u16::try_from(b).ok())
            .ok_or(ConvError::LayoutTooWide(size))?;
        Ok(Self::with_precision(bits, byte_order))
    }

    /// Full-width layout of at most 255 bytes, which always fits.
    pub(crate) fn of_bytes(size: u8, byte_order: DatatypeByteOrder) -> Self {
        Self::with_precision(u16::from(size) * 8, byte_order)
    }

    fn with_precision(bit_precision: u16, byte_order: DatatypeByteOrder) -> Self {
        Self {
            byte_order,
            bit_offset: 0,
            bit_precision,
            lsb_pad: Pad::Zero,
            msb_pad: Pad::Zero,
        }
    }

    pub(crate) fn offset(&self) -> usize {
        self.bit_offset as usize
    }

    pub(crate) fn precision(&self) -> usize {
        self.bit_precision as usize
    }
}

/// Floating-point field positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FloatFields {
    pub sign_location: u8,
    pub exponent_location: u8,
    pub exponent_size: u8,
    pub mantissa_location: u8,
    pub mantissa_size: u8,
    pub exponent_bias: u32,
    pub mantissa_norm: MantissaNorm,
    /// Padding of unused bits between the fields.
    pub inner_pad: Pad,
}

/// A member of a compound datatype.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompoundMember {
    /// Member name.
    pub name: String,
    /// Byte offset within the compound.
    pub byte_offset: u64,
    /// Member datatype.
    pub datatype: Datatype,
}

/// A member of an enumeration datatype.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumMember {
    /// Member name.
    pub name: String,
    /// Raw value bytes (length = base type size).
    pub value: Vec<u8>,
}

/// Datatype class, used to key soft conversion functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeClass {
    Integer,
    Float,
    String,
    Bitfield,
    Opaque,
    Compound,
    Reference,
    Enum,
    VariableLength,
    Array,
}

impl fmt::Display for TypeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeClass::Integer => "integer",
            TypeClass::Float => "float",
            TypeClass::String => "string",
            TypeClass::Bitfield => "bitfield",
            TypeClass::Opaque => "opaque",
            TypeClass::Compound => "compound",
            TypeClass::Reference => "reference",
            TypeClass::Enum => "enum",
            TypeClass::VariableLength => "variable-length",
            TypeClass::Array => "array",
        };
        f.write_str(name)
    }
}

/// Size of the in-memory opaque reference buffer.
pub const OPAQUE_REF_MEMORY_SIZE: u32 = 64;

/// Datatype descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Datatype {
    /// Fixed-point (integer) types.
    FixedPoint {
        size: u32,
        signed: bool,
        layout: AtomicLayout,
    },
    /// Floating-point types.
    FloatingPoint {
        size: u32,
        layout: AtomicLayout,
        fields: FloatFields,
    },
    /// Fixed-length string.
    String {
        size: u32,
        padding: StringPadding,
        charset: CharacterSet,
    },
    /// Bit field.
    BitField { size: u32, layout: AtomicLayout },
    /// Opaque data.
    Opaque { size: u32, tag: Vec<u8> },
    /// Compound type.
    Compound {
        size: u32,
        members: Vec<CompoundMember>,
    },
    /// Reference type.
    Reference {
        size: u32,
        ref_type: ReferenceType,
        location: RefLocation,
    },
    /// Enumeration type. Size is the base type's size.
    Enumeration {
        base_type: Box<Datatype>,
        members: Vec<EnumMember>,
    },
    /// Variable-length sequence or string.
    VariableLength {
        is_string: bool,
        base_type: Box<Datatype>,
    },
    /// Fixed-size array of a base type.
    Array {
        base_type: Box<Datatype>,
        dimensions: Vec<u32>,
    },
}

impl Datatype {
    /// Signed or unsigned integer of `size` bytes, all bits significant.
    pub fn integer(size: u8, signed: bool, byte_order: DatatypeByteOrder) -> Self {
        Datatype::FixedPoint {
            size: u32::from(size),
            signed,
            layout: AtomicLayout::of_bytes(size, byte_order),
        }
    }

    /// Like [`Datatype::integer`] for sizes past 255 bytes.
    pub fn wide_integer(size: u32, signed: bool, byte_order: DatatypeByteOrder) -> Result<Self> {
        Ok(Datatype::FixedPoint {
            size,
            signed,
            layout: AtomicLayout::full(size, byte_order)?,
        })
    }

    pub fn native_i8() -> Self {
        Self::integer(1, true, DatatypeByteOrder::native())
    }
    pub fn native_u8() -> Self {
        Self::integer(1, false, DatatypeByteOrder::native())
    }
    pub fn native_i16() -> Self {
        Self::integer(2, true, DatatypeByteOrder::native())
    }
    pub fn native_u16() -> Self {
        Self::integer(2, false, DatatypeByteOrder::native())
    }
    pub fn native_i32() -> Self {
        Self::integer(4, true, DatatypeByteOrder::native())
    }
    pub fn native_u32() -> Self {
        Self::integer(4, false, DatatypeByteOrder::native())
    }
    pub fn native_i64() -> Self {
        Self::integer(8, true, DatatypeByteOrder::native())
    }
    pub fn native_u64() -> Self {
        Self::integer(8, false, DatatypeByteOrder::native())
    }

    /// Big-endian signed 32-bit integer.
    pub fn std_i32_be() -> Self {
        Self::integer(4, true, DatatypeByteOrder::BigEndian)
    }

    /// Little-endian signed 32-bit integer.
    pub fn std_i32_le() -> Self {
        Self::integer(4, true, DatatypeByteOrder::LittleEndian)
    }

    /// IEEE 754 binary32.
    pub fn float32(byte_order: DatatypeByteOrder) -> Self {
        Datatype::FloatingPoint {
            size: 4,
            layout: AtomicLayout::of_bytes(4, byte_order),
            fields: FloatFields {
                sign_location: 31,
                exponent_location: 23,
                exponent_size: 8,
                mantissa_location: 0,
                mantissa_size: 23,
                exponent_bias: 127,
                mantissa_norm: MantissaNorm::Implied,
                inner_pad: Pad::Zero,
            },
        }
    }

    /// IEEE 754 binary64.
    pub fn float64(byte_order: DatatypeByteOrder) -> Self {
        Datatype::FloatingPoint {
            size: 8,
            layout: AtomicLayout::of_bytes(8, byte_order),
            fields: FloatFields {
                sign_location: 63,
                exponent_location: 52,
                exponent_size: 11,
                mantissa_location: 0,
                mantissa_size: 52,
                exponent_bias: 1023,
                mantissa_norm: MantissaNorm::Implied,
                inner_pad: Pad::Zero,
            },
        }
    }

    pub fn native_f32() -> Self {
        Self::float32(DatatypeByteOrder::native())
    }
    pub fn native_f64() -> Self {
        Self::float64(DatatypeByteOrder::native())
    }

    /// Bit field of `size` bytes, all bits significant.
    pub fn bitfield(size: u8, byte_order: DatatypeByteOrder) -> Self {
        Datatype::BitField {
            size: u32::from(size),
            layout: AtomicLayout::of_bytes(size, byte_order),
        }
    }

    /// Like [`Datatype::bitfield`] for sizes past 255 bytes.
    pub fn wide_bitfield(size: u32, byte_order: DatatypeByteOrder) -> Result<Self> {
        Ok(Datatype::BitField {
            size,
            layout: AtomicLayout::full(size, byte_order)?,
        })
    }

    /// Fixed-length string.
    pub fn string(size: u32, padding: StringPadding, charset: CharacterSet) -> Self {
        Datatype::String {
            size,
            padding,
            charset,
        }
    }

    /// Enumeration over an integer base type.
    ///
    /// Member values are encoded with the base type's byte order, offset
    /// and precision.
    pub fn enumeration(base: Datatype, members: &[(&str, i64)]) -> Result<Self> {
        let mut encoded = Vec::with_capacity(members.len());
        for (name, value) in members {
            encoded.push(EnumMember {
                name: (*name).to_string(),
                value: base.encode_int(*value)?,
            });
        }
        Ok(Datatype::Enumeration {
            base_type: Box::new(base),
            members: encoded,
        })
    }

    /// Array of `base` with the given dimensions.
    pub fn array(base: Datatype, dimensions: &[u32]) -> Self {
        Datatype::Array {
            base_type: Box::new(base),
            dimensions: dimensions.to_vec(),
        }
    }

    /// Legacy object reference (8-byte address).
    pub fn object_ref() -> Self {
        Datatype::Reference {
            size: 8,
            ref_type: ReferenceType::Object,
            location: RefLocation::Memory,
        }
    }

    /// Legacy dataset region reference (8-byte heap address and 4-byte index).
    pub fn region_ref() -> Self {
        Datatype::Reference {
            size: 12,
            ref_type: ReferenceType::DatasetRegion,
            location: RefLocation::Memory,
        }
    }

    /// In-memory opaque reference buffer.
    pub fn opaque_ref() -> Self {
        Datatype::Reference {
            size: OPAQUE_REF_MEMORY_SIZE,
            ref_type: ReferenceType::Opaque,
            location: RefLocation::Memory,
        }
    }

    /// On-disk opaque reference stored inline in `size` bytes.
    pub fn opaque_ref_disk(size: u32) -> Self {
        Datatype::Reference {
            size,
            ref_type: ReferenceType::Opaque,
            location: RefLocation::Disk,
        }
    }

    /// Same reference type, relocated.
    pub fn with_location(mut self, loc: RefLocation) -> Self {
        if let Datatype::Reference { location, .. } = &mut self {
            *location = loc;
        }
        self
    }

    /// Same atomic type with a different byte order.
    pub fn with_order(mut self, order: DatatypeByteOrder) -> Self {
        if let Some(layout) = self.atomic_mut() {
            layout.byte_order = order;
        }
        self
    }

    /// Same atomic type with a different precision.
    pub fn with_precision(mut self, precision: u16) -> Self {
        if let Some(layout) = self.atomic_mut() {
            layout.bit_precision = precision;
        }
        self
    }

    /// Same atomic type with a different bit offset.
    pub fn with_offset(mut self, offset: u16) -> Self {
        if let Some(layout) = self.atomic_mut() {
            layout.bit_offset = offset;
        }
        self
    }

    /// Same atomic type with different padding.
    pub fn with_pad(mut self, lsb: Pad, msb: Pad) -> Self {
        if let Some(layout) = self.atomic_mut() {
            layout.lsb_pad = lsb;
            layout.msb_pad = msb;
        }
        self
    }

    /// Size in bytes of one element.
    pub fn size(&self) -> usize {
        match self {
            Datatype::FixedPoint { size, .. }
            | Datatype::FloatingPoint { size, .. }
            | Datatype::String { size, .. }
            | Datatype::BitField { size, .. }
            | Datatype::Opaque { size, .. }
            | Datatype::Compound { size, .. }
            | Datatype::Reference { size, .. } => *size as usize,
            Datatype::Enumeration { base_type, .. } => base_type.size(),
            // length + global heap id
            Datatype::VariableLength { .. } => 16,
            Datatype::Array {
                base_type,
                dimensions,
            } => base_type.size() * dimensions.iter().map(|&d| d as usize).product::<usize>(),
        }
    }

    pub fn class(&self) -> TypeClass {
        match self {
            Datatype::FixedPoint { .. } => TypeClass::Integer,
            Datatype::FloatingPoint { .. } => TypeClass::Float,
            Datatype::String { .. } => TypeClass::String,
            Datatype::BitField { .. } => TypeClass::Bitfield,
            Datatype::Opaque { .. } => TypeClass::Opaque,
            Datatype::Compound { .. } => TypeClass::Compound,
            Datatype::Reference { .. } => TypeClass::Reference,
            Datatype::Enumeration { .. } => TypeClass::Enum,
            Datatype::VariableLength { .. } => TypeClass::VariableLength,
            Datatype::Array { .. } => TypeClass::Array,
        }
    }

    /// Atomic layout of integer, float and bitfield types.
    pub fn atomic(&self) -> Option<&AtomicLayout> {
        match self {
            Datatype::FixedPoint { layout, .. }
            | Datatype::FloatingPoint { layout, .. }
            | Datatype::BitField { layout, .. } => Some(layout),
            _ => None,
        }
    }

    fn atomic_mut(&mut self) -> Option<&mut AtomicLayout> {
        match self {
            Datatype::FixedPoint { layout, .. }
            | Datatype::FloatingPoint { layout, .. }
            | Datatype::BitField { layout, .. } => Some(layout),
            _ => None,
        }
    }

    /// Base type of enumeration, array and variable-length types.
    pub fn base(&self) -> Option<&Datatype> {
        match self {
            Datatype::Enumeration { base_type, .. }
            | Datatype::Array { base_type, .. }
            | Datatype::VariableLength { base_type, .. } => Some(base_type),
            _ => None,
        }
    }

    /// Whether conversion must run even between equal types.
    ///
    /// Opaque references and variable-length data carry pointers or
    /// file-relative addresses, so equal descriptors do not imply equal bits.
    pub fn force_conversion(&self) -> bool {
        match self {
            Datatype::Reference { ref_type, .. } => *ref_type == ReferenceType::Opaque,
            Datatype::VariableLength { .. } => true,
            Datatype::Array { base_type, .. } => base_type.force_conversion(),
            Datatype::Compound { members, .. } => {
                members.iter().any(|m| m.datatype.force_conversion())
            }
            _ => false,
        }
    }

    /// Decode one integer element honouring byte order, offset, precision
    /// and sign. Returns `None` for non-integer types, precision above 64
    /// bits, or short input.
    pub fn decode_int(&self, bytes: &[u8]) -> Option<i64> {
        let Datatype::FixedPoint {
            size,
            signed,
            layout,
        } = self
        else {
            return None;
        };
        let size = *size as usize;
        let prec = layout.precision();
        if prec == 0 || prec > 64 || bytes.len() < size || layout.offset() + prec > size * 8 {
            return None;
        }
        let mut le = bytes[..size].to_vec();
        if layout.byte_order == DatatypeByteOrder::BigEndian {
            le.reverse();
        }
        let raw = bits::bit_get_u64(&le, layout.offset(), prec);
        let value = if *signed && prec < 64 && (raw >> (prec - 1)) & 1 == 1 {
            raw | (u64::MAX << prec)
        } else {
            raw
        };
        Some(value as i64)
    }

    /// Encode `value` as one integer element, the inverse of
    /// [`Datatype::decode_int`]. Bits above the precision are discarded and
    /// padding is filled from the layout.
    pub fn encode_int(&self, value: i64) -> Result<Vec<u8>> {
        let Datatype::FixedPoint { size, layout, .. } = self else {
            return Err(ConvError::BadType {
                expected: "integer",
                actual: self.class(),
            });
        };
        let size = *size as usize;
        let prec = layout.precision();
        if prec == 0 || prec > 64 || layout.offset() + prec > size * 8 {
            return Err(ConvError::Unsupported(format!(
                "integer precision {prec} at offset {} in {size} bytes",
                layout.offset()
            )));
        }
        let mut buf = vec![0u8; size];
        bits::bit_set_u64(&mut buf, layout.offset(), prec, value as u64);
        bits::bit_set(&mut buf, 0, layout.offset(), layout.lsb_pad == Pad::One);
        let msb_start = layout.offset() + prec;
        bits::bit_set(&mut buf, msb_start, size * 8 - msb_start, layout.msb_pad == Pad::One);
        if layout.byte_order == DatatypeByteOrder::BigEndian {
            buf.reverse();
        }
        Ok(buf)
    }
}
