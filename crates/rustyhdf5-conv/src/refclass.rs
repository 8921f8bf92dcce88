//! Per-encoding reference operations.
//!
//! Every reference encoding supplies a [`RefClass`]: how to recognise and
//! write the nil reference, how many canonical payload bytes an element
//! carries, and how to read and write that payload. The canonical payload
//! is a kind byte followed by the kind's body, so any encoding can be
//! re-expressed in the opaque one.

use byteorder::{ByteOrder, LittleEndian};

use crate::datatype::{RefLocation, ReferenceType};
use crate::error::{ConvError, Result};

/// Payload kind byte for object references.
pub const KIND_OBJECT: u8 = 1;
/// Payload kind byte for dataset region references.
pub const KIND_REGION: u8 = 2;

/// Undefined object address; marks a nil object reference.
pub const UNDEF_ADDR: u64 = u64::MAX;

/// Result of [`RefClass::get_size`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefSize {
    /// Bytes to move through the scratch buffer.
    pub len: usize,
    /// The encoded bytes can be copied verbatim when both sides are on disk.
    pub raw_copy: bool,
}

/// Operations a reference encoding provides to the converter.
pub trait RefClass {
    fn is_null(&self, src: &[u8]) -> Result<bool>;
    fn set_null(&self, dst: &mut [u8], bkg: Option<&[u8]>) -> Result<()>;
    fn get_size(&self, src: &[u8], dst_location: RefLocation) -> Result<RefSize>;
    /// Decode `src` into `payload` (exactly `get_size` bytes).
    fn read(&self, src: &[u8], payload: &mut [u8]) -> Result<()>;
    /// Encode `payload` into `dst`.
    fn write(
        &self,
        payload: &[u8],
        src_type: ReferenceType,
        dst: &mut [u8],
        bkg: Option<&[u8]>,
    ) -> Result<()>;
    /// Release whatever a previous `write` attached to `dst`.
    fn destroy(&self, _dst: &mut [u8]) -> Result<()> {
        Ok(())
    }
}

fn short(what: &str, needed: usize, have: usize) -> ConvError {
    ConvError::Reference(format!("{what}: need {needed} bytes, have {have}"))
}

/// Legacy object reference: a little-endian object address.
#[derive(Debug, Default)]
pub struct ObjectRefClass;

impl RefClass for ObjectRefClass {
    fn is_null(&self, src: &[u8]) -> Result<bool> {
        let addr = src.get(..8).ok_or_else(|| short("object reference", 8, src.len()))?;
        Ok(LittleEndian::read_u64(addr) == UNDEF_ADDR)
    }

    fn set_null(&self, dst: &mut [u8], _bkg: Option<&[u8]>) -> Result<()> {
        let have = dst.len();
        let addr = dst.get_mut(..8).ok_or_else(|| short("object reference", 8, have))?;
        LittleEndian::write_u64(addr, UNDEF_ADDR);
        Ok(())
    }

    fn get_size(&self, _src: &[u8], _dst_location: RefLocation) -> Result<RefSize> {
        Ok(RefSize {
            len: 9,
            raw_copy: false,
        })
    }

    fn read(&self, src: &[u8], payload: &mut [u8]) -> Result<()> {
        let addr = src.get(..8).ok_or_else(|| short("object reference", 8, src.len()))?;
        payload[0] = KIND_OBJECT;
        payload[1..9].copy_from_slice(addr);
        Ok(())
    }

    fn write(
        &self,
        payload: &[u8],
        _src_type: ReferenceType,
        dst: &mut [u8],
        _bkg: Option<&[u8]>,
    ) -> Result<()> {
        match payload {
            [KIND_OBJECT, addr @ ..] if addr.len() == 8 => {
                let have = dst.len();
                dst.get_mut(..8)
                    .ok_or_else(|| short("object reference", 8, have))?
                    .copy_from_slice(addr);
                Ok(())
            }
            _ => Err(ConvError::Reference(
                "payload is not an object reference".into(),
            )),
        }
    }
}

/// Legacy dataset region reference: heap address and object index.
#[derive(Debug, Default)]
pub struct RegionRefClass;

impl RefClass for RegionRefClass {
    fn is_null(&self, src: &[u8]) -> Result<bool> {
        let addr = src.get(..8).ok_or_else(|| short("region reference", 12, src.len()))?;
        Ok(LittleEndian::read_u64(addr) == 0)
    }

    fn set_null(&self, dst: &mut [u8], _bkg: Option<&[u8]>) -> Result<()> {
        let have = dst.len();
        dst.get_mut(..12)
            .ok_or_else(|| short("region reference", 12, have))?
            .fill(0);
        Ok(())
    }

    fn get_size(&self, _src: &[u8], _dst_location: RefLocation) -> Result<RefSize> {
        Ok(RefSize {
            len: 13,
            raw_copy: false,
        })
    }

    fn read(&self, src: &[u8], payload: &mut [u8]) -> Result<()> {
        let body = src.get(..12).ok_or_else(|| short("region reference", 12, src.len()))?;
        payload[0] = KIND_REGION;
        payload[1..13].copy_from_slice(body);
        Ok(())
    }

    fn write(
        &self,
        payload: &[u8],
        _src_type: ReferenceType,
        dst: &mut [u8],
        _bkg: Option<&[u8]>,
    ) -> Result<()> {
        match payload {
            [KIND_REGION, body @ ..] if body.len() == 12 => {
                let have = dst.len();
                dst.get_mut(..12)
                    .ok_or_else(|| short("region reference", 12, have))?
                    .copy_from_slice(body);
                Ok(())
            }
            _ => Err(ConvError::Reference(
                "payload is not a region reference".into(),
            )),
        }
    }
}

/// In-memory opaque reference: a length byte followed by the payload.
/// An all-zero buffer is the nil reference.
#[derive(Debug, Default)]
pub struct OpaqueMemRefClass;

impl RefClass for OpaqueMemRefClass {
    fn is_null(&self, src: &[u8]) -> Result<bool> {
        src.first()
            .map(|&len| len == 0)
            .ok_or_else(|| short("opaque reference", 1, 0))
    }

    fn set_null(&self, dst: &mut [u8], _bkg: Option<&[u8]>) -> Result<()> {
        dst.fill(0);
        Ok(())
    }

    fn get_size(&self, src: &[u8], _dst_location: RefLocation) -> Result<RefSize> {
        let len = src.first().copied().unwrap_or(0) as usize;
        if 1 + len > src.len() {
            return Err(short("opaque reference", 1 + len, src.len()));
        }
        Ok(RefSize {
            len,
            raw_copy: false,
        })
    }

    fn read(&self, src: &[u8], payload: &mut [u8]) -> Result<()> {
        let n = payload.len();
        let body = src.get(1..1 + n).ok_or_else(|| short("opaque reference", 1 + n, src.len()))?;
        payload.copy_from_slice(body);
        Ok(())
    }

    fn write(
        &self,
        payload: &[u8],
        _src_type: ReferenceType,
        dst: &mut [u8],
        _bkg: Option<&[u8]>,
    ) -> Result<()> {
        let n = payload.len();
        if n == 0 || n > u8::MAX as usize || 1 + n > dst.len() {
            return Err(short("opaque reference", 1 + n, dst.len()));
        }
        dst.fill(0);
        dst[0] = n as u8;
        dst[1..1 + n].copy_from_slice(payload);
        Ok(())
    }

    fn destroy(&self, dst: &mut [u8]) -> Result<()> {
        dst.fill(0);
        Ok(())
    }
}

/// On-disk opaque reference: a little-endian u16 length followed by the
/// payload. Zero length is the nil reference.
#[derive(Debug, Default)]
pub struct OpaqueDiskRefClass;

impl OpaqueDiskRefClass {
    fn stored_len(src: &[u8]) -> Result<usize> {
        let head = src.get(..2).ok_or_else(|| short("opaque disk reference", 2, src.len()))?;
        let len = LittleEndian::read_u16(head) as usize;
        if 2 + len > src.len() {
            return Err(short("opaque disk reference", 2 + len, src.len()));
        }
        Ok(len)
    }
}

impl RefClass for OpaqueDiskRefClass {
    fn is_null(&self, src: &[u8]) -> Result<bool> {
        Ok(Self::stored_len(src)? == 0)
    }

    fn set_null(&self, dst: &mut [u8], _bkg: Option<&[u8]>) -> Result<()> {
        dst.fill(0);
        Ok(())
    }

    fn get_size(&self, src: &[u8], dst_location: RefLocation) -> Result<RefSize> {
        let len = Self::stored_len(src)?;
        Ok(match dst_location {
            RefLocation::Disk => RefSize {
                len: 2 + len,
                raw_copy: true,
            },
            RefLocation::Memory => RefSize {
                len,
                raw_copy: false,
            },
        })
    }

    fn read(&self, src: &[u8], payload: &mut [u8]) -> Result<()> {
        let n = payload.len();
        let body = src.get(2..2 + n).ok_or_else(|| short("opaque disk reference", 2 + n, src.len()))?;
        payload.copy_from_slice(body);
        Ok(())
    }

    fn write(
        &self,
        payload: &[u8],
        _src_type: ReferenceType,
        dst: &mut [u8],
        _bkg: Option<&[u8]>,
    ) -> Result<()> {
        let n = payload.len();
        if n == 0 || n > u16::MAX as usize || 2 + n > dst.len() {
            return Err(short("opaque disk reference", 2 + n, dst.len()));
        }
        dst.fill(0);
        LittleEndian::write_u16(&mut dst[..2], n as u16);
        dst[2..2 + n].copy_from_slice(payload);
        Ok(())
    }

    fn destroy(&self, dst: &mut [u8]) -> Result<()> {
        dst.fill(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_nil_is_undefined_address() {
        let c = ObjectRefClass;
        let mut buf = [0u8; 8];
        assert!(!c.is_null(&buf).unwrap());
        c.set_null(&mut buf, None).unwrap();
        assert_eq!(buf, [0xff; 8]);
        assert!(c.is_null(&buf).unwrap());
    }

    #[test]
    fn object_payload_round_trip() {
        let c = ObjectRefClass;
        let src = 0x1234u64.to_le_bytes();
        let size = c.get_size(&src, RefLocation::Memory).unwrap();
        let mut payload = vec![0u8; size.len];
        c.read(&src, &mut payload).unwrap();
        assert_eq!(payload[0], KIND_OBJECT);
        let mut dst = [0u8; 8];
        c.write(&payload, ReferenceType::Object, &mut dst, None).unwrap();
        assert_eq!(dst, src);
        assert!(c.write(&[KIND_REGION; 13], ReferenceType::DatasetRegion, &mut dst, None).is_err());
    }

    #[test]
    fn region_nil_is_zero_heap_address() {
        let c = RegionRefClass;
        let mut buf = [7u8; 12];
        assert!(!c.is_null(&buf).unwrap());
        c.set_null(&mut buf, None).unwrap();
        assert!(c.is_null(&buf).unwrap());
    }

    #[test]
    fn opaque_memory_layout() {
        let c = OpaqueMemRefClass;
        let mut buf = [0xaau8; 16];
        c.write(&[KIND_OBJECT, 1, 2], ReferenceType::Object, &mut buf, None).unwrap();
        assert_eq!(&buf[..5], &[3, KIND_OBJECT, 1, 2, 0]);
        assert!(!c.is_null(&buf).unwrap());
        let size = c.get_size(&buf, RefLocation::Memory).unwrap();
        assert_eq!(size, RefSize { len: 3, raw_copy: false });
        c.destroy(&mut buf).unwrap();
        assert!(c.is_null(&buf).unwrap());
        assert!(c.write(&[1u8; 16], ReferenceType::Object, &mut buf, None).is_err());
    }

    #[test]
    fn opaque_disk_raw_copy_only_to_disk() {
        let c = OpaqueDiskRefClass;
        let mut buf = [0u8; 16];
        c.write(&[KIND_OBJECT, 9], ReferenceType::Object, &mut buf, None).unwrap();
        assert_eq!(&buf[..4], &[2, 0, KIND_OBJECT, 9]);
        assert_eq!(
            c.get_size(&buf, RefLocation::Disk).unwrap(),
            RefSize { len: 4, raw_copy: true }
        );
        assert_eq!(
            c.get_size(&buf, RefLocation::Memory).unwrap(),
            RefSize { len: 2, raw_copy: false }
        );
        assert!(c.get_size(&[0xff, 0xff, 0], RefLocation::Disk).is_err());
    }
}
