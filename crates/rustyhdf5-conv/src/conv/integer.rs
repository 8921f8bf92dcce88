//! Integer to integer conversion of arbitrary precision.
//!
//! Values are handled bit-wise on little-endian normalized copies, so any
//! size, offset and precision combination works. Out-of-range values
//! saturate unless the exception handler intervenes.

use crate::bits::{self, BitDirection};
use crate::conv::{check_layout, check_pads, fill_pads, load_le, overflow};
use crate::datatype::{AtomicLayout, Datatype, DatatypeByteOrder};
use crate::error::{ensure_len, ConvError, Result};
use crate::except::ConvException;
use crate::path::{BackgroundNeed, ConvArgs, ConvCtx, Converter, InitCtx};
use crate::traverse::Traversal;

pub(crate) fn int_parts(dt: &Datatype) -> Result<(bool, &AtomicLayout)> {
    match dt {
        Datatype::FixedPoint { signed, layout, .. } => Ok((*signed, layout)),
        other => Err(ConvError::BadType {
            expected: "integer",
            actual: other.class(),
        }),
    }
}

/// Largest positive value: all ones below the sign bit.
pub(crate) fn set_max_positive(d: &mut [u8], offset: usize, prec: usize) {
    bits::bit_set(d, offset, prec - 1, true);
    bits::bit_set(d, offset + prec - 1, 1, false);
}

/// Most negative value: only the sign bit set.
pub(crate) fn set_min_negative(d: &mut [u8], offset: usize, prec: usize) {
    bits::bit_set(d, offset, prec - 1, false);
    bits::bit_set(d, offset + prec - 1, 1, true);
}

/// Converts between any two integer types, saturating on overflow.
#[derive(Debug, Default)]
pub struct IntegerConv;

impl Converter for IntegerConv {
    fn init(&mut self, src: &Datatype, dst: &Datatype, _ctx: &InitCtx<'_>) -> Result<BackgroundNeed> {
        for dt in [src, dst] {
            let (_, layout) = int_parts(dt)?;
            check_layout(layout, dt.size())?;
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
        let (ssigned, sl) = int_parts(src)?;
        let (dsigned, dl) = int_parts(dst)?;
        let (ssize, dsize) = (src.size(), dst.size());
        check_pads(dl)?;

        let plan = Traversal::plan(ssize, dsize, args.buf_stride, args.nelmts);
        ensure_len(args.buf, plan.required_len(ssize, dsize))?;
        let (soff, sprec) = (sl.offset(), sl.precision());
        let (doff, dprec) = (dl.offset(), dl.precision());
        let mut s = vec![0u8; ssize];
        let mut d = vec![0u8; dsize];

        for step in plan.steps() {
            load_le(&mut s, &args.buf[step.src..step.src + ssize], sl.byte_order);
            d.fill(0);

            let copy_all = |d: &mut [u8]| {
                if sprec <= dprec {
                    bits::bit_copy(d, doff, &s, soff, sprec);
                } else {
                    bits::bit_copy(d, doff, &s, soff, dprec);
                }
            };
            let raise = |kind, d: &mut Vec<u8>, default: &dyn Fn(&mut [u8])| {
                overflow(ctx, kind, src, dst, &s, sl.byte_order, d, default)
            };

            let mut reverse = true;
            match bits::bit_find(&s, soff, sprec, BitDirection::Msb, true) {
                None => bits::bit_set(&mut d, doff, dprec, false),
                Some(first) => match (ssigned, dsigned) {
                    (false, false) => {
                        if sprec <= dprec {
                            copy_all(&mut d);
                            bits::bit_set(&mut d, doff + sprec, dprec - sprec, false);
                        } else if first >= dprec {
                            reverse = raise(ConvException::RangeHi, &mut d, &|d| {
                                bits::bit_set(d, doff, dprec, true)
                            })?;
                        } else {
                            copy_all(&mut d);
                        }
                    }
                    (true, false) => {
                        if first + 1 == sprec {
                            reverse = raise(ConvException::RangeLow, &mut d, &|d| {
                                bits::bit_set(d, doff, dprec, false)
                            })?;
                        } else if sprec < dprec {
                            bits::bit_copy(&mut d, doff, &s, soff, sprec - 1);
                            bits::bit_set(&mut d, doff + sprec - 1, dprec - sprec + 1, false);
                        } else if first >= dprec {
                            reverse = raise(ConvException::RangeHi, &mut d, &|d| {
                                bits::bit_set(d, doff, dprec, true)
                            })?;
                        } else {
                            copy_all(&mut d);
                        }
                    }
                    (false, true) => {
                        if first + 1 >= dprec {
                            reverse = raise(ConvException::RangeHi, &mut d, &|d| {
                                set_max_positive(d, doff, dprec)
                            })?;
                        } else if sprec < dprec {
                            copy_all(&mut d);
                            bits::bit_set(&mut d, doff + sprec, dprec - sprec, false);
                        } else {
                            copy_all(&mut d);
                        }
                    }
                    (true, true) => {
                        if first + 1 == sprec {
                            // negative: find the highest clear bit below the sign
                            let fz = bits::bit_find(&s, soff, sprec - 1, BitDirection::Msb, false);
                            match fz {
                                Some(fz) if fz + 1 >= dprec => {
                                    reverse = raise(ConvException::RangeLow, &mut d, &|d| {
                                        set_min_negative(d, doff, dprec)
                                    })?;
                                }
                                _ if sprec < dprec => {
                                    copy_all(&mut d);
                                    bits::bit_set(&mut d, doff + sprec, dprec - sprec, true);
                                }
                                _ => copy_all(&mut d),
                            }
                        } else if first + 1 >= dprec {
                            reverse = raise(ConvException::RangeHi, &mut d, &|d| {
                                set_max_positive(d, doff, dprec)
                            })?;
                        } else if sprec < dprec {
                            copy_all(&mut d);
                            bits::bit_set(&mut d, doff + sprec, dprec - sprec, false);
                        } else {
                            copy_all(&mut d);
                        }
                    }
                },
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
