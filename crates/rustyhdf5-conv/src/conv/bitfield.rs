//! Bitfield to bitfield conversion.

use crate::bits;
use crate::conv::{check_layout, check_pads, fill_pads, load_le, overflow};
use crate::datatype::{AtomicLayout, Datatype, DatatypeByteOrder};
use crate::error::{ensure_len, ConvError, Result};
use crate::except::ConvException;
use crate::path::{BackgroundNeed, ConvArgs, ConvCtx, Converter, InitCtx};
use crate::traverse::Traversal;

fn layout_of(dt: &Datatype) -> Result<&AtomicLayout> {
    match dt {
        Datatype::BitField { layout, .. } => Ok(layout),
        other => Err(ConvError::BadType {
            expected: "bitfield",
            actual: other.class(),
        }),
    }
}

/// Copies the significant bits, truncating or zero-extending to the
/// destination precision, and rewrites the padding.
///
/// Truncation raises [`ConvException::RangeHi`]; unhandled, the low
/// destination-precision bits are kept.
#[derive(Debug, Default)]
pub struct BitfieldConv;

impl Converter for BitfieldConv {
    fn init(&mut self, src: &Datatype, dst: &Datatype, _ctx: &InitCtx<'_>) -> Result<BackgroundNeed> {
        for dt in [src, dst] {
            let layout = layout_of(dt)?;
            if !layout.byte_order.is_le_or_be() {
                return Err(ConvError::UnsupportedByteOrder(layout.byte_order));
            }
        }
        Ok(BackgroundNeed::No)
    }

    fn convert(
        &mut self,
        src: &Datatype,
        dst: &Datatype,
        ctx: &ConvCtx<'_>,
        args: ConvArgs<'_>,
    ) -> Result<()> {
        let (sl, dl) = (layout_of(src)?, layout_of(dst)?);
        let (ssize, dsize) = (src.size(), dst.size());
        check_layout(sl, ssize)?;
        check_layout(dl, dsize)?;
        check_pads(dl)?;

        let plan = Traversal::plan(ssize, dsize, args.buf_stride, args.nelmts);
        ensure_len(args.buf, plan.required_len(ssize, dsize))?;
        let (sprec, dprec) = (sl.precision(), dl.precision());
        let mut s = vec![0u8; ssize];
        let mut d = vec![0u8; dsize];

        for step in plan.steps() {
            load_le(&mut s, &args.buf[step.src..step.src + ssize], sl.byte_order);
            d.fill(0);

            let mut reverse = true;
            if sprec > dprec {
                reverse = overflow(
                    ctx,
                    ConvException::RangeHi,
                    src,
                    dst,
                    &s,
                    sl.byte_order,
                    &mut d,
                    |d| bits::bit_copy(d, dl.offset(), &s, sl.offset(), dprec),
                )?;
            } else {
                bits::bit_copy(&mut d, dl.offset(), &s, sl.offset(), sprec);
                bits::bit_set(&mut d, dl.offset() + sprec, dprec - sprec, false);
            }

            fill_pads(&mut d, dl);
            if reverse && dl.byte_order == DatatypeByteOrder::BigEndian {
                d.reverse();
            }
            args.buf[step.dst..step.dst + dsize].copy_from_slice(&d);
        }
        Ok(())
    }
}
