//! Reference to opaque reference conversion.
//!
//! Payloads move through the [`RefClass`] operations registered for the
//! source and destination encodings. Nil references stay nil.

use log::warn;

use crate::datatype::{Datatype, RefLocation, ReferenceType};
use crate::error::{ensure_len, ConvError, Result};
use crate::path::{BackgroundNeed, ConvArgs, ConvCtx, Converter, InitCtx};
use crate::refclass::RefClass;
use crate::traverse::{safe_segments, span};

fn ref_parts(dt: &Datatype) -> Result<(ReferenceType, RefLocation)> {
    match dt {
        Datatype::Reference {
            ref_type, location, ..
        } => Ok((*ref_type, *location)),
        other => Err(ConvError::BadType {
            expected: "reference",
            actual: other.class(),
        }),
    }
}

/// Converts any reference into the opaque encoding.
///
/// If an element fails, the elements already written by the call are
/// destroyed before the error is returned.
#[derive(Debug, Default)]
pub struct ReferenceConv;

struct Endpoints<'a> {
    src: &'a dyn RefClass,
    dst: &'a dyn RefClass,
    src_type: ReferenceType,
    src_loc: RefLocation,
    dst_loc: RefLocation,
}

impl ReferenceConv {
    fn convert_one(
        ends: &Endpoints<'_>,
        s: &[u8],
        d: &mut [u8],
        bkg: Option<&[u8]>,
        payload: &mut Vec<u8>,
    ) -> Result<()> {
        if ends.src.is_null(s)? {
            return ends.dst.set_null(d, bkg);
        }
        let size = ends.src.get_size(s, ends.dst_loc)?;
        if size.len == 0 {
            return Err(ConvError::Reference("reference has an empty payload".into()));
        }
        if payload.len() < size.len {
            payload.resize(size.len, 0);
        }
        let payload = &mut payload[..size.len];

        if size.raw_copy && ends.src_loc == RefLocation::Disk {
            let raw = s.get(..size.len).ok_or_else(|| {
                ConvError::Reference(format!("raw reference of {} bytes exceeds source", size.len))
            })?;
            payload.copy_from_slice(raw);
        } else {
            ends.src.read(s, payload)?;
        }

        if size.raw_copy && ends.dst_loc == RefLocation::Disk {
            if size.len > d.len() {
                return Err(ConvError::Reference(format!(
                    "raw reference of {} bytes exceeds destination of {}",
                    size.len,
                    d.len()
                )));
            }
            d.fill(0);
            d[..size.len].copy_from_slice(payload);
            Ok(())
        } else {
            ends.dst.write(payload, ends.src_type, d, bkg)
        }
    }
}

impl Converter for ReferenceConv {
    fn init(&mut self, src: &Datatype, dst: &Datatype, ctx: &InitCtx<'_>) -> Result<BackgroundNeed> {
        ref_parts(src)?;
        let (dst_type, _) = ref_parts(dst)?;
        if dst_type != ReferenceType::Opaque {
            return Err(ConvError::NotOpaqueReference);
        }
        ctx.registry.ref_class(src)?;
        ctx.registry.ref_class(dst)?;
        Ok(BackgroundNeed::No)
    }

    fn convert(
        &mut self,
        src: &Datatype,
        dst: &Datatype,
        ctx: &ConvCtx<'_>,
        args: ConvArgs<'_>,
    ) -> Result<()> {
        let (src_type, src_loc) = ref_parts(src)?;
        let (_, dst_loc) = ref_parts(dst)?;
        let src_class = ctx.registry.ref_class(src)?;
        let dst_class = ctx.registry.ref_class(dst)?;
        let ends = Endpoints {
            src: src_class.as_ref(),
            dst: dst_class.as_ref(),
            src_type,
            src_loc,
            dst_loc,
        };

        let (ssize, dsize) = (src.size(), dst.size());
        let (s_stride, d_stride) = if args.buf_stride != 0 {
            (args.buf_stride, args.buf_stride)
        } else {
            (ssize, dsize)
        };
        let b_stride = if args.bkg_stride != 0 { args.bkg_stride } else { dsize };
        ensure_len(
            args.buf,
            span(args.nelmts, s_stride, ssize).max(span(args.nelmts, d_stride, dsize)),
        )?;

        let buf = args.buf;
        let bkg = args.bkg.as_deref();
        let mut s = vec![0u8; ssize];
        let mut payload = Vec::new();
        let mut written = Vec::new();
        for segment in safe_segments(s_stride, d_stride, args.nelmts) {
            for i in segment.indices() {
                s.copy_from_slice(&buf[i * s_stride..i * s_stride + ssize]);
                let d = &mut buf[i * d_stride..i * d_stride + dsize];
                let b = bkg.and_then(|b| {
                    let at = i.checked_mul(b_stride)?;
                    b.get(at..at.checked_add(dsize)?)
                });
                if let Err(e) = Self::convert_one(&ends, &s, d, b, &mut payload) {
                    for &j in &written {
                        let d = &mut buf[j * d_stride..j * d_stride + dsize];
                        if let Err(de) = ends.dst.destroy(d) {
                            warn!("failed to destroy converted reference {j}: {de}");
                        }
                    }
                    return Err(e);
                }
                written.push(i);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conv::testutil::run;
    use crate::props::TransferProps;
    use crate::refclass::KIND_OBJECT;
    use crate::registry::Registry;

    fn opaque_mem(payload: &[u8]) -> Vec<u8> {
        let mut v = vec![0u8; 64];
        v[0] = payload.len() as u8;
        v[1..1 + payload.len()].copy_from_slice(payload);
        v
    }

    #[test]
    fn object_to_opaque_keeps_nil() {
        let mut buf = vec![0u8; 128];
        buf[..8].copy_from_slice(&0x1234u64.to_le_bytes());
        buf[8..16].fill(0xff);
        Registry::new()
            .convert(
                &Datatype::object_ref(),
                &Datatype::opaque_ref(),
                2,
                &mut buf,
                None,
                &TransferProps::new(),
            )
            .unwrap();
        assert_eq!(&buf[..11], &[9, KIND_OBJECT, 0x34, 0x12, 0, 0, 0, 0, 0, 0, 0]);
        assert!(buf[11..64].iter().all(|&b| b == 0));
        assert!(buf[64..].iter().all(|&b| b == 0));
    }

    #[test]
    fn disk_to_disk_copies_raw_bytes() {
        let src = Datatype::opaque_ref_disk(16);
        let dst = Datatype::opaque_ref_disk(32);
        let mut buf = vec![0u8; 96];
        for i in 0..3u8 {
            let at = i as usize * 16;
            buf[at..at + 5].copy_from_slice(&[3, 0, i, i + 1, i + 2]);
            buf[at + 5..at + 16].fill(0xee);
        }
        run(&mut ReferenceConv, &src, &dst, 3, 0, &mut buf, None).unwrap();
        for i in 0..3u8 {
            let at = i as usize * 32;
            assert_eq!(&buf[at..at + 5], &[3, 0, i, i + 1, i + 2]);
            assert!(buf[at + 5..at + 32].iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn memory_to_disk_rewrites_length_prefix() {
        let src = Datatype::opaque_ref();
        let dst = Datatype::opaque_ref_disk(8);
        let mut buf = opaque_mem(&[KIND_OBJECT, 7, 8]);
        run(&mut ReferenceConv, &src, &dst, 1, 0, &mut buf, None).unwrap();
        assert_eq!(&buf[..8], &[3, 0, KIND_OBJECT, 7, 8, 0, 0, 0]);
    }

    #[test]
    fn failure_destroys_converted_elements() {
        let src = Datatype::opaque_ref();
        let dst = Datatype::opaque_ref_disk(6);
        let mut buf = Vec::new();
        buf.extend(opaque_mem(&[1, 2, 3]));
        buf.extend(opaque_mem(&[4, 5, 6]));
        buf.extend(opaque_mem(&[9; 10]));
        let err = run(&mut ReferenceConv, &src, &dst, 3, 0, &mut buf, None).unwrap_err();
        assert!(matches!(err, ConvError::Reference(_)));
        assert!(buf[..12].iter().all(|&b| b == 0));
        // the failing element's source is untouched
        assert_eq!(buf[128], 10);
    }

    #[test]
    fn strided_elements_convert_in_place() {
        let mut buf = vec![0u8; 128];
        buf[..8].copy_from_slice(&5u64.to_le_bytes());
        buf[64..72].copy_from_slice(&6u64.to_le_bytes());
        let args = ConvArgs {
            nelmts: 2,
            buf_stride: 64,
            bkg_stride: 0,
            buf: &mut buf,
            bkg: None,
        };
        Registry::new()
            .convert_strided(&Datatype::object_ref(), &Datatype::opaque_ref(), args, &TransferProps::new())
            .unwrap();
        assert_eq!(&buf[..3], &[9, KIND_OBJECT, 5]);
        assert_eq!(&buf[64..67], &[9, KIND_OBJECT, 6]);
    }

    #[test]
    fn opaque_to_opaque_is_not_skipped() {
        let r = Registry::new();
        let mut buf = opaque_mem(&[KIND_OBJECT, 1]);
        let before = buf.clone();
        r.convert(&Datatype::opaque_ref(), &Datatype::opaque_ref(), 1, &mut buf, None, &TransferProps::new())
            .unwrap();
        assert_eq!(buf, before);
        let path = r.find(&Datatype::opaque_ref(), &Datatype::opaque_ref()).unwrap();
        assert_eq!(path.borrow().stats().calls, 1);
    }

    #[test]
    fn destination_must_be_opaque() {
        let mut buf = [0u8; 12];
        let err = run(
            &mut ReferenceConv,
            &Datatype::object_ref(),
            &Datatype::region_ref(),
            1,
            0,
            &mut buf,
            None,
        )
        .unwrap_err();
        assert_eq!(err, ConvError::NotOpaqueReference);

        let err = Registry::new()
            .find(&Datatype::object_ref(), &Datatype::region_ref())
            .unwrap_err();
        assert!(matches!(err, ConvError::NoConversionPath { .. }));
    }

    #[test]
    fn empty_buffer_is_fine() {
        let mut buf: [u8; 0] = [];
        run(&mut ReferenceConv, &Datatype::object_ref(), &Datatype::opaque_ref(), 0, 0, &mut buf, None)
            .unwrap();
    }
}
