//! Byte-order conversion between otherwise identical atomic types.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::bits;
use crate::datatype::{AtomicLayout, Datatype, DatatypeByteOrder, ReferenceType};
use crate::error::{ensure_len, ConvError, Result};
use crate::path::{BackgroundNeed, ConvArgs, ConvCtx, Converter, InitCtx};
use crate::traverse::span;

fn unsupported(why: &str) -> ConvError {
    ConvError::Unsupported(why.to_string())
}

fn check_layouts(a: &AtomicLayout, b: &AtomicLayout) -> Result<()> {
    match (a.byte_order, b.byte_order) {
        (DatatypeByteOrder::LittleEndian, DatatypeByteOrder::BigEndian)
        | (DatatypeByteOrder::BigEndian, DatatypeByteOrder::LittleEndian) => {}
        (DatatypeByteOrder::Vax, _) | (DatatypeByteOrder::None, _) => {
            return Err(ConvError::UnsupportedByteOrder(a.byte_order))
        }
        (_, DatatypeByteOrder::Vax) | (_, DatatypeByteOrder::None) => {
            return Err(ConvError::UnsupportedByteOrder(b.byte_order))
        }
        _ => return Err(unsupported("byte orders are not opposite")),
    }
    if a.bit_offset != 0 || b.bit_offset != 0 {
        return Err(unsupported("bit offset must be zero"));
    }
    if a.bit_precision != b.bit_precision || a.lsb_pad != b.lsb_pad || a.msb_pad != b.msb_pad {
        return Err(unsupported("precision or padding differs"));
    }
    Ok(())
}

/// Accept pairs that differ only in byte order.
fn check_pair(src: &Datatype, dst: &Datatype) -> Result<()> {
    if src.size() != dst.size() {
        return Err(unsupported("sizes differ"));
    }
    match (src, dst) {
        (
            Datatype::FixedPoint {
                signed: s1,
                layout: a,
                ..
            },
            Datatype::FixedPoint {
                signed: s2,
                layout: b,
                ..
            },
        ) => {
            if s1 != s2 {
                return Err(unsupported("signedness differs"));
            }
            check_layouts(a, b)
        }
        (Datatype::BitField { layout: a, .. }, Datatype::BitField { layout: b, .. }) => {
            check_layouts(a, b)
        }
        (
            Datatype::FloatingPoint {
                layout: a,
                fields: fa,
                ..
            },
            Datatype::FloatingPoint {
                layout: b,
                fields: fb,
                ..
            },
        ) => {
            if fa != fb {
                return Err(unsupported("floating-point fields differ"));
            }
            check_layouts(a, b)
        }
        _ => Err(ConvError::BadType {
            expected: "integer, bitfield or float",
            actual: src.class(),
        }),
    }
}

fn stride_of(args: &ConvArgs<'_>, size: usize) -> usize {
    if args.buf_stride != 0 {
        args.buf_stride
    } else {
        size
    }
}

/// Reverses the bytes of every element, any element size.
#[derive(Debug, Default)]
pub struct OrderConv;

impl Converter for OrderConv {
    fn init(&mut self, src: &Datatype, dst: &Datatype, _ctx: &InitCtx<'_>) -> Result<BackgroundNeed> {
        check_pair(src, dst)?;
        Ok(BackgroundNeed::No)
    }

    fn convert(
        &mut self,
        src: &Datatype,
        _dst: &Datatype,
        _ctx: &ConvCtx<'_>,
        args: ConvArgs<'_>,
    ) -> Result<()> {
        let size = src.size();
        let stride = stride_of(&args, size);
        ensure_len(args.buf, span(args.nelmts, stride, size))?;
        for i in 0..args.nelmts {
            let off = i * stride;
            bits::swap_bytes(&mut args.buf[off..off + size]);
        }
        Ok(())
    }
}

/// Elements per unrolled batch for 2-byte swaps.
const BATCH_2: usize = 20;
/// Elements per unrolled batch for wider swaps.
const BATCH_WIDE: usize = 10;

fn swap2(e: &mut [u8]) {
    let v = LittleEndian::read_u16(e);
    BigEndian::write_u16(e, v);
}

fn swap4(e: &mut [u8]) {
    let v = LittleEndian::read_u32(e);
    BigEndian::write_u32(e, v);
}

fn swap8(e: &mut [u8]) {
    let v = LittleEndian::read_u64(e);
    BigEndian::write_u64(e, v);
}

fn swap16(e: &mut [u8]) {
    let v = LittleEndian::read_u128(e);
    BigEndian::write_u128(e, v);
}

fn swap_all(buf: &mut [u8], size: usize, stride: usize, nelmts: usize, batch: usize, swap: fn(&mut [u8])) {
    if stride == size {
        let data = &mut buf[..nelmts * size];
        let mut runs = data.chunks_exact_mut(size * batch);
        for run in &mut runs {
            for e in run.chunks_exact_mut(size) {
                swap(e);
            }
        }
        for e in runs.into_remainder().chunks_exact_mut(size) {
            swap(e);
        }
    } else {
        for i in 0..nelmts {
            let off = i * stride;
            swap(&mut buf[off..off + size]);
        }
    }
}

/// Byte-order conversion specialised for 1, 2, 4, 8 and 16 byte elements.
///
/// Also accepts pairs of identical legacy reference types, whose encoded
/// form is little-endian: nothing to do on a little-endian host.
#[derive(Debug, Default)]
pub struct OrderOptConv;

impl Converter for OrderOptConv {
    fn init(&mut self, src: &Datatype, dst: &Datatype, _ctx: &InitCtx<'_>) -> Result<BackgroundNeed> {
        match (src, dst) {
            (
                Datatype::Reference {
                    size: a,
                    ref_type: ta,
                    ..
                },
                Datatype::Reference {
                    size: b,
                    ref_type: tb,
                    ..
                },
            ) => {
                if *ta == ReferenceType::Opaque || *tb == ReferenceType::Opaque {
                    return Err(unsupported("opaque references are re-encoded, not swapped"));
                }
                if ta != tb || a != b {
                    return Err(unsupported("reference types differ"));
                }
            }
            (Datatype::Reference { .. }, _) | (_, Datatype::Reference { .. }) => {
                return Err(unsupported("references pair only with references"));
            }
            _ => check_pair(src, dst)?,
        }
        if !matches!(src.size(), 1 | 2 | 4 | 8 | 16) {
            return Err(unsupported("element size has no specialised swap"));
        }
        Ok(BackgroundNeed::No)
    }

    fn convert(
        &mut self,
        src: &Datatype,
        _dst: &Datatype,
        _ctx: &ConvCtx<'_>,
        args: ConvArgs<'_>,
    ) -> Result<()> {
        if matches!(src, Datatype::Reference { .. })
            && DatatypeByteOrder::native() == DatatypeByteOrder::LittleEndian
        {
            return Ok(());
        }
        let size = src.size();
        let stride = stride_of(&args, size);
        let n = args.nelmts;
        ensure_len(args.buf, span(n, stride, size))?;
        match size {
            1 => {}
            2 => swap_all(args.buf, 2, stride, n, BATCH_2, swap2),
            4 => swap_all(args.buf, 4, stride, n, BATCH_WIDE, swap4),
            8 => swap_all(args.buf, 8, stride, n, BATCH_WIDE, swap8),
            16 => swap_all(args.buf, 16, stride, n, BATCH_WIDE, swap16),
            _ => return Err(unsupported("element size has no specialised swap")),
        }
        Ok(())
    }
}
