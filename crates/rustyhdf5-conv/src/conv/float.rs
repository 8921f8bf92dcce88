//! Floating-point conversions: integer to float, float to float and
//! float to integer.
//!
//! Elements are normalized to little-endian and taken apart field by
//! field, so any sign/exponent/mantissa placement works as long as the
//! fields fit in 64 bits.

use crate::bits;
use crate::conv::integer::{int_parts, set_max_positive, set_min_negative};
use crate::conv::{check_layout, check_pads, fill_pads, load_le, overflow};
use crate::datatype::{AtomicLayout, Datatype, DatatypeByteOrder, FloatFields, MantissaNorm};
use crate::error::{ensure_len, ConvError, Result};
use crate::except::ConvException;
use crate::path::{BackgroundNeed, ConvArgs, ConvCtx, Converter, InitCtx};
use crate::traverse::Traversal;

fn write_fields(d: &mut [u8], f: &FloatFields, negative: bool, expo: u64, mant: u64) {
    bits::bit_set(d, f.sign_location as usize, 1, negative);
    bits::bit_set_u64(d, f.exponent_location as usize, f.exponent_size as usize, expo);
    bits::bit_set_u64(d, f.mantissa_location as usize, f.mantissa_size as usize, mant);
}

/// Shift `v` right by `shift` bits, rounding to nearest with ties to even.
pub(crate) fn round_half_even(v: u64, shift: usize) -> u64 {
    match shift {
        0 => v,
        1..=63 => {
            let kept = v >> shift;
            let dropped = v & ((1u64 << shift) - 1);
            let half = 1u64 << (shift - 1);
            if dropped > half || (dropped == half && kept & 1 == 1) {
                kept + 1
            } else {
                kept
            }
        }
        64 => u64::from(v > 1 << 63),
        _ => 0,
    }
}

/// Converts integers of up to 64 bits into floats with an implied
/// mantissa bit. A value with more significant bits than the mantissa
/// raises [`ConvException::Precision`] and rounds to nearest, ties to
/// even. Exponents past the format's range raise a range exception and
/// default to infinity.
#[derive(Debug, Default)]
pub struct IntFloatConv;

struct Element<'a> {
    src: &'a Datatype,
    dst: &'a Datatype,
    s: &'a [u8],
    src_order: DatatypeByteOrder,
}

impl IntFloatConv {
    /// Encode a non-zero magnitude. Returns whether the destination still
    /// needs byte-order fix-up.
    fn encode(
        ctx: &ConvCtx<'_>,
        el: &Element<'_>,
        f: &FloatFields,
        negative: bool,
        magnitude: u64,
        d: &mut [u8],
    ) -> Result<bool> {
        let msize = f.mantissa_size as usize;
        let msb = 63 - magnitude.leading_zeros() as usize;
        let rest = magnitude & !(1u64 << msb);
        let mut expo = msb as u64 + f.exponent_bias as u64;
        let mant = if msb <= msize {
            rest << (msize - msb)
        } else {
            // more significant bits than the mantissa holds
            let handled = !overflow(ctx, ConvException::Precision, el.src, el.dst, el.s, el.src_order, d, |_| {})?;
            if handled {
                return Ok(false);
            }
            let shift = msb - msize;
            let mut mant = round_half_even(rest, shift);
            if mant >> msize != 0 {
                mant = 0;
                expo += 1;
            }
            mant
        };

        let max_expo = (1u64 << f.exponent_size) - 1;
        if expo >= max_expo {
            let kind = if negative {
                ConvException::RangeLow
            } else {
                ConvException::RangeHi
            };
            return overflow(ctx, kind, el.src, el.dst, el.s, el.src_order, d, |d| {
                write_fields(d, f, negative, max_expo, 0)
            });
        }
        write_fields(d, f, negative, expo, mant);
        Ok(true)
    }
}

impl Converter for IntFloatConv {
    fn init(&mut self, src: &Datatype, dst: &Datatype, _ctx: &InitCtx<'_>) -> Result<BackgroundNeed> {
        let Datatype::FixedPoint { layout: sl, .. } = src else {
            return Err(ConvError::BadType {
                expected: "integer",
                actual: src.class(),
            });
        };
        let Datatype::FloatingPoint {
            layout: dl,
            fields,
            ..
        } = dst
        else {
            return Err(ConvError::BadType {
                expected: "float",
                actual: dst.class(),
            });
        };
        check_layout(sl, src.size())?;
        check_layout(dl, dst.size())?;
        if sl.precision() > 64 {
            return Err(ConvError::Unsupported("integers wider than 64 bits".into()));
        }
        if fields.mantissa_norm != MantissaNorm::Implied
            || fields.mantissa_size == 0
            || fields.mantissa_size > 63
            || fields.exponent_size == 0
            || fields.exponent_size > 32
        {
            return Err(ConvError::Unsupported(
                "float layout without implied mantissa bit".into(),
            ));
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
        let (Datatype::FixedPoint { signed, layout: sl, .. }, Datatype::FloatingPoint { layout: dl, fields, .. }) =
            (src, dst)
        else {
            return Err(ConvError::Unsupported("integer to float pair expected".into()));
        };
        check_pads(dl)?;
        let (ssize, dsize) = (src.size(), dst.size());
        let plan = Traversal::plan(ssize, dsize, args.buf_stride, args.nelmts);
        ensure_len(args.buf, plan.required_len(ssize, dsize))?;
        let sprec = sl.precision();
        let mut s = vec![0u8; ssize];
        let mut d = vec![0u8; dsize];

        for step in plan.steps() {
            load_le(&mut s, &args.buf[step.src..step.src + ssize], sl.byte_order);
            d.fill(0);
            let raw = bits::bit_get_u64(&s, sl.offset(), sprec);
            let negative = *signed && (raw >> (sprec - 1)) & 1 == 1;
            let magnitude = if negative {
                let extended = if sprec < 64 { raw | (u64::MAX << sprec) } else { raw };
                (extended as i64).unsigned_abs()
            } else {
                raw
            };

            let reverse = if magnitude == 0 {
                true
            } else {
                let el = Element {
                    src,
                    dst,
                    s: &s,
                    src_order: sl.byte_order,
                };
                Self::encode(ctx, &el, fields, negative, magnitude, &mut d)?
            };

            fill_pads(&mut d, dl);
            if reverse && dl.byte_order == DatatypeByteOrder::BigEndian {
                d.reverse();
            }
            args.buf[step.dst..step.dst + dsize].copy_from_slice(&d);
        }
        Ok(())
    }
}

fn low_mask(n: usize) -> u64 {
    if n >= 64 {
        u64::MAX
    } else {
        (1u64 << n) - 1
    }
}

/// [`round_half_even`] over 128 bits.
fn round_half_even_wide(v: u128, shift: u32) -> u128 {
    match shift {
        0 => v,
        1..=127 => {
            let kept = v >> shift;
            let dropped = v & ((1u128 << shift) - 1);
            let half = 1u128 << (shift - 1);
            if dropped > half || (dropped == half && kept & 1 == 1) {
                kept + 1
            } else {
                kept
            }
        }
        128 => u128::from(v > 1 << 127),
        _ => 0,
    }
}

fn float_parts(dt: &Datatype) -> Result<(&AtomicLayout, &FloatFields)> {
    match dt {
        Datatype::FloatingPoint { layout, fields, .. } => Ok((layout, fields)),
        other => Err(ConvError::BadType {
            expected: "float",
            actual: other.class(),
        }),
    }
}

/// Accept formats with an implied or explicit leading mantissa bit whose
/// fields lie inside the significant bits.
fn check_fields(f: &FloatFields, layout: &AtomicLayout) -> Result<()> {
    let explicit = match f.mantissa_norm {
        MantissaNorm::Implied => false,
        MantissaNorm::None => true,
        MantissaNorm::MsbSet => {
            return Err(ConvError::Unsupported(
                "mantissa normalization `MsbSet`".into(),
            ))
        }
    };
    if f.mantissa_size == 0
        || f.mantissa_size > 64
        || (explicit && f.mantissa_size < 2)
        || f.exponent_size == 0
        || f.exponent_size > 32
    {
        return Err(ConvError::Unsupported(format!(
            "float with {}-bit exponent and {}-bit mantissa",
            f.exponent_size, f.mantissa_size
        )));
    }
    let top = layout.offset() + layout.precision();
    let fits = |at: u8, len: u8| at as usize + len as usize <= top;
    if !fits(f.sign_location, 1)
        || !fits(f.exponent_location, f.exponent_size)
        || !fits(f.mantissa_location, f.mantissa_size)
    {
        return Err(ConvError::Unsupported(
            "float fields outside the significant bits".into(),
        ));
    }
    Ok(())
}

/// A float element taken apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FloatValue {
    Zero,
    Infinite,
    NaN,
    /// `sig * 2^exp` with a non-zero `sig`.
    Finite { sig: u128, exp: i64 },
}

fn decode_float(s: &[u8], f: &FloatFields) -> (bool, FloatValue) {
    let negative = bits::bit_get_u64(s, f.sign_location as usize, 1) == 1;
    let (esize, msize) = (f.exponent_size as usize, f.mantissa_size as usize);
    let expo = bits::bit_get_u64(s, f.exponent_location as usize, esize);
    let mant = bits::bit_get_u64(s, f.mantissa_location as usize, msize);
    let explicit = f.mantissa_norm == MantissaNorm::None;
    let frac_bits = if explicit { msize - 1 } else { msize };

    let value = if expo == low_mask(esize) {
        // an explicit leading bit alone still means infinity
        if mant & low_mask(frac_bits) == 0 {
            FloatValue::Infinite
        } else {
            FloatValue::NaN
        }
    } else if mant == 0 && (explicit || expo == 0) {
        FloatValue::Zero
    } else {
        let bias = i64::from(f.exponent_bias);
        let (sig, unbiased) = if explicit {
            (u128::from(mant), expo.max(1) as i64 - bias)
        } else if expo == 0 {
            (u128::from(mant), 1 - bias)
        } else {
            (u128::from(mant) | 1u128 << msize, expo as i64 - bias)
        };
        FloatValue::Finite {
            sig,
            exp: unbiased - frac_bits as i64,
        }
    };
    (negative, value)
}

/// Round `sig * 2^exp` to format `f`, ties to even, gradually underflowing
/// through denormals. Returns the biased exponent and the stored mantissa,
/// or `None` past the largest finite value.
fn encode_finite(sig: u128, exp: i64, f: &FloatFields) -> Option<(u64, u64)> {
    let explicit = f.mantissa_norm == MantissaNorm::None;
    let frac_bits = u32::from(f.mantissa_size) - u32::from(explicit);
    let bias = i64::from(f.exponent_bias);
    let lead = exp + 127 - i64::from(sig.leading_zeros());
    let mut lsb = lead.max(1 - bias) - i64::from(frac_bits);
    let shift = lsb - exp;
    let mut q = if shift > 0 {
        round_half_even_wide(sig, u32::try_from(shift).unwrap_or(u32::MAX))
    } else {
        sig.checked_shl((-shift) as u32).unwrap_or(0)
    };
    if q >> (frac_bits + 1) != 0 {
        q >>= 1;
        lsb += 1;
    }
    if q == 0 {
        return Some((0, 0));
    }
    let biased = if q >> frac_bits != 0 {
        lsb + i64::from(frac_bits) + bias
    } else {
        0
    };
    if biased >= low_mask(f.exponent_size as usize) as i64 {
        return None;
    }
    let mant = if explicit {
        q
    } else {
        q & ((1u128 << frac_bits) - 1)
    };
    Some((biased as u64, mant as u64))
}

fn write_infinity(d: &mut [u8], f: &FloatFields, negative: bool) {
    write_fields(d, f, negative, low_mask(f.exponent_size as usize), 0);
    if f.mantissa_norm == MantissaNorm::None {
        let top = f.mantissa_location as usize + f.mantissa_size as usize - 1;
        bits::bit_set(d, top, 1, true);
    }
}

/// Converts between float formats. Values round to nearest, ties to even;
/// magnitudes below the smallest denormal become signed zero. Infinities
/// and NaNs raise their exceptions and are carried over by default, and
/// finite values past the destination's range default to infinity.
#[derive(Debug, Default)]
pub struct FloatFloatConv;

impl Converter for FloatFloatConv {
    fn init(&mut self, src: &Datatype, dst: &Datatype, _ctx: &InitCtx<'_>) -> Result<BackgroundNeed> {
        for dt in [src, dst] {
            let (layout, fields) = float_parts(dt)?;
            check_layout(layout, dt.size())?;
            check_fields(fields, layout)?;
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
        let (sl, sf) = float_parts(src)?;
        let (dl, df) = float_parts(dst)?;
        check_pads(dl)?;
        let (ssize, dsize) = (src.size(), dst.size());
        let plan = Traversal::plan(ssize, dsize, args.buf_stride, args.nelmts);
        ensure_len(args.buf, plan.required_len(ssize, dsize))?;
        let mut s = vec![0u8; ssize];
        let mut d = vec![0u8; dsize];

        for step in plan.steps() {
            load_le(&mut s, &args.buf[step.src..step.src + ssize], sl.byte_order);
            d.fill(0);
            let (negative, value) = decode_float(&s, sf);
            let raise = |kind, d: &mut Vec<u8>, default: &dyn Fn(&mut [u8])| {
                overflow(ctx, kind, src, dst, &s, sl.byte_order, d, default)
            };

            let reverse = match value {
                FloatValue::Zero => {
                    write_fields(&mut d, df, negative, 0, 0);
                    true
                }
                FloatValue::Infinite => {
                    let kind = if negative {
                        ConvException::NInf
                    } else {
                        ConvException::PInf
                    };
                    raise(kind, &mut d, &|d| write_infinity(d, df, negative))?
                }
                FloatValue::NaN => raise(ConvException::NaN, &mut d, &|d| {
                    let msize = df.mantissa_size as usize;
                    write_fields(d, df, negative, low_mask(df.exponent_size as usize), low_mask(msize))
                })?,
                FloatValue::Finite { sig, exp } => match encode_finite(sig, exp, df) {
                    Some((expo, mant)) => {
                        write_fields(&mut d, df, negative, expo, mant);
                        true
                    }
                    None => {
                        let kind = if negative {
                            ConvException::RangeLow
                        } else {
                            ConvException::RangeHi
                        };
                        raise(kind, &mut d, &|d| write_infinity(d, df, negative))?
                    }
                },
            };

            fill_pads(&mut d, dl);
            if reverse && dl.byte_order == DatatypeByteOrder::BigEndian {
                d.reverse();
            }
            args.buf[step.dst..step.dst + dsize].copy_from_slice(&d);
        }
        Ok(())
    }
}

/// Integer part of `sig * 2^exp` and whether a fraction was dropped.
/// `None` when the integer needs more than 128 bits.
fn integer_part(sig: u128, exp: i64) -> (Option<u128>, bool) {
    if exp >= 0 {
        let width = 128 - i64::from(sig.leading_zeros());
        if width + exp > 128 {
            (None, false)
        } else {
            (Some(sig << exp as u32), false)
        }
    } else if exp <= -128 {
        (Some(0), true)
    } else {
        let shift = (-exp) as u32;
        (Some(sig >> shift), sig & ((1u128 << shift) - 1) != 0)
    }
}

/// Converts floats into integers of up to 64 bits, truncating toward
/// zero. A dropped fraction raises [`ConvException::Truncate`]; values
/// outside the destination's range saturate after a range exception.
/// Infinities saturate and NaN becomes zero unless the handler decides
/// otherwise. Magnitudes below one become zero without an exception.
#[derive(Debug, Default)]
pub struct FloatIntConv;

impl Converter for FloatIntConv {
    fn init(&mut self, src: &Datatype, dst: &Datatype, _ctx: &InitCtx<'_>) -> Result<BackgroundNeed> {
        let (sl, sf) = float_parts(src)?;
        check_layout(sl, src.size())?;
        check_fields(sf, sl)?;
        let (_, dl) = int_parts(dst)?;
        check_layout(dl, dst.size())?;
        if dl.precision() > 64 {
            return Err(ConvError::Unsupported("integers wider than 64 bits".into()));
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
        let (sl, sf) = float_parts(src)?;
        let (signed, dl) = int_parts(dst)?;
        check_pads(dl)?;
        let (ssize, dsize) = (src.size(), dst.size());
        let (doff, dprec) = (dl.offset(), dl.precision());
        let plan = Traversal::plan(ssize, dsize, args.buf_stride, args.nelmts);
        ensure_len(args.buf, plan.required_len(ssize, dsize))?;

        let (max_pos, max_neg) = if signed {
            ((1u128 << (dprec - 1)) - 1, 1u128 << (dprec - 1))
        } else {
            ((1u128 << dprec) - 1, 0)
        };
        let set_max = |d: &mut [u8]| {
            if signed {
                set_max_positive(d, doff, dprec)
            } else {
                bits::bit_set(d, doff, dprec, true)
            }
        };
        let set_min = |d: &mut [u8]| {
            if signed {
                set_min_negative(d, doff, dprec)
            }
        };
        let mut s = vec![0u8; ssize];
        let mut d = vec![0u8; dsize];

        for step in plan.steps() {
            load_le(&mut s, &args.buf[step.src..step.src + ssize], sl.byte_order);
            d.fill(0);
            let (negative, value) = decode_float(&s, sf);
            let raise = |kind, d: &mut Vec<u8>, default: &dyn Fn(&mut [u8])| {
                overflow(ctx, kind, src, dst, &s, sl.byte_order, d, default)
            };

            let reverse = match value {
                FloatValue::Zero => true,
                FloatValue::NaN => raise(ConvException::NaN, &mut d, &|_| {})?,
                FloatValue::Infinite if negative => raise(ConvException::NInf, &mut d, &set_min)?,
                FloatValue::Infinite => raise(ConvException::PInf, &mut d, &set_max)?,
                FloatValue::Finite { sig, exp } => {
                    let (int, fraction) = integer_part(sig, exp);
                    let limit = if negative { max_neg } else { max_pos };
                    match int {
                        Some(0) => true,
                        Some(v) if v <= limit => {
                            let value = if negative {
                                (v as u64).wrapping_neg()
                            } else {
                                v as u64
                            };
                            let write = |d: &mut [u8]| bits::bit_set_u64(d, doff, dprec, value);
                            if fraction {
                                raise(ConvException::Truncate, &mut d, &write)?
                            } else {
                                write(&mut d[..]);
                                true
                            }
                        }
                        _ if negative => raise(ConvException::RangeLow, &mut d, &set_min)?,
                        _ => raise(ConvException::RangeHi, &mut d, &set_max)?,
                    }
                }
            };

            fill_pads(&mut d, dl);
            if reverse && dl.byte_order == DatatypeByteOrder::BigEndian {
                d.reverse();
            }
            args.buf[step.dst..step.dst + dsize].copy_from_slice(&d);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conv::testutil::run;
    use crate::datatype::{AtomicLayout, Pad};
    use crate::datatype::DatatypeByteOrder::{BigEndian as BE, LittleEndian as LE};

    fn to_f32(src: &Datatype, value: i64) -> f32 {
        let mut buf = src.encode_int(value).unwrap();
        buf.resize(src.size().max(4), 0);
        run(&mut IntFloatConv, src, &Datatype::float32(LE), 1, 0, &mut buf, None).unwrap();
        f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
    }

    fn to_f64(src: &Datatype, value: i64) -> f64 {
        let mut buf = src.encode_int(value).unwrap();
        buf.resize(8, 0);
        run(&mut IntFloatConv, src, &Datatype::float64(LE), 1, 0, &mut buf, None).unwrap();
        f64::from_le_bytes(buf[..8].try_into().unwrap())
    }

    fn half() -> Datatype {
        Datatype::FloatingPoint {
            size: 2,
            layout: AtomicLayout::of_bytes(2, LE),
            fields: FloatFields {
                sign_location: 15,
                exponent_location: 10,
                exponent_size: 5,
                mantissa_location: 0,
                mantissa_size: 10,
                exponent_bias: 15,
                mantissa_norm: MantissaNorm::Implied,
                inner_pad: Pad::Zero,
            },
        }
    }

    #[test]
    fn exact_values() {
        let i32le = Datatype::integer(4, true, LE);
        assert_eq!(to_f32(&i32le, 0), 0.0);
        assert_eq!(to_f32(&i32le, 1), 1.0);
        assert_eq!(to_f32(&i32le, -2), -2.0);
        assert_eq!(to_f32(&i32le, 12345), 12345.0);
        assert_eq!(to_f64(&Datatype::native_u8(), 255), 255.0);
        assert_eq!(to_f64(&Datatype::integer(8, true, LE), i64::MIN), i64::MIN as f64);
    }

    #[test]
    fn dropped_bits_round_to_even() {
        let i32le = Datatype::integer(4, true, LE);
        for v in [16_777_217i32, 16_777_219, 16_777_221, 16_777_223, -16_777_219, 33_554_435] {
            assert_eq!(to_f32(&i32le, v.into()), v as f32, "{v}");
        }
        assert_eq!(to_f32(&i32le, 16_777_217), 16_777_216.0);
        let u64le = Datatype::integer(8, false, LE);
        assert_eq!(to_f32(&u64le, -1), u64::MAX as f32);
        let i64le = Datatype::integer(8, true, LE);
        for v in [(1i64 << 53) + 1, (1i64 << 53) + 3, i64::MAX, -(1i64 << 60) - 1] {
            assert_eq!(to_f64(&i64le, v), v as f64, "{v}");
        }
    }

    #[test]
    fn half_even_helper() {
        assert_eq!(round_half_even(0b101, 1), 0b10);
        assert_eq!(round_half_even(0b111, 1), 0b100);
        assert_eq!(round_half_even(0b1011, 2), 0b11);
        assert_eq!(round_half_even(0b1001, 2), 0b10);
        assert_eq!(round_half_even(u64::MAX, 64), 1);
        assert_eq!(round_half_even(1 << 63, 64), 0);
        assert_eq!(round_half_even(u64::MAX, 70), 0);
    }

    #[test]
    fn precision_raised_whenever_bits_are_dropped() {
        use crate::except::{ExceptionAction, ExceptionEvent, ExceptionHandler};
        use std::cell::Cell;

        let seen = Cell::new(0);
        let handler: &dyn ExceptionHandler = &|ev: &ExceptionEvent<'_>, _: &mut [u8]| {
            assert_eq!(ev.kind, ConvException::Precision);
            seen.set(seen.get() + 1);
            ExceptionAction::Unhandled
        };
        let src = Datatype::integer(4, true, LE);
        // exactly representable, but wider than the 23-bit mantissa
        let mut buf = src.encode_int(1 << 25).unwrap();
        run(&mut IntFloatConv, &src, &Datatype::float32(LE), 1, 0, &mut buf, Some(handler)).unwrap();
        assert_eq!(f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]), 33_554_432.0);
        assert_eq!(seen.get(), 1);

        let mut buf = src.encode_int(1 << 23).unwrap();
        run(&mut IntFloatConv, &src, &Datatype::float32(LE), 1, 0, &mut buf, Some(handler)).unwrap();
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn overflow_defaults_to_infinity() {
        let src = Datatype::integer(4, true, LE);
        let mut buf = src.encode_int(70_000).unwrap();
        run(&mut IntFloatConv, &src, &half(), 1, 0, &mut buf, None).unwrap();
        assert_eq!(&buf[..2], &[0x00, 0x7c]);
        let mut buf = src.encode_int(-70_000).unwrap();
        run(&mut IntFloatConv, &src, &half(), 1, 0, &mut buf, None).unwrap();
        assert_eq!(&buf[..2], &[0x00, 0xfc]);
    }

    #[test]
    fn big_endian_both_sides() {
        let src = Datatype::integer(2, true, BE);
        let mut buf = vec![0x00, 0x05, 0, 0];
        run(&mut IntFloatConv, &src, &Datatype::float32(BE), 1, 0, &mut buf, None).unwrap();
        assert_eq!(buf, 5.0f32.to_be_bytes());
    }

    #[test]
    fn growing_many_elements() {
        let src = Datatype::integer(2, true, LE);
        let mut buf: Vec<u8> = [-1i16, 2, 300].iter().flat_map(|v| v.to_le_bytes()).collect();
        buf.resize(24, 0);
        run(&mut IntFloatConv, &src, &Datatype::float64(LE), 3, 0, &mut buf, None).unwrap();
        let got: Vec<f64> = buf
            .chunks(8)
            .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(got, vec![-1.0, 2.0, 300.0]);
    }

    #[test]
    fn rejects_non_ieee_destination() {
        let src = Datatype::native_i32();
        let dst = match Datatype::float32(LE) {
            Datatype::FloatingPoint { size, layout, mut fields } => {
                fields.mantissa_norm = MantissaNorm::MsbSet;
                Datatype::FloatingPoint { size, layout, fields }
            }
            other => other,
        };
        let mut buf = [0u8; 4];
        assert!(run(&mut IntFloatConv, &src, &dst, 1, 0, &mut buf, None).is_err());
    }

    // ---- float to float ----

    fn extended() -> Datatype {
        Datatype::FloatingPoint {
            size: 10,
            layout: AtomicLayout::of_bytes(10, LE),
            fields: FloatFields {
                sign_location: 79,
                exponent_location: 64,
                exponent_size: 15,
                mantissa_location: 0,
                mantissa_size: 64,
                exponent_bias: 16383,
                mantissa_norm: MantissaNorm::None,
                inner_pad: Pad::Zero,
            },
        }
    }

    fn narrow(v: f64) -> f32 {
        let mut buf = v.to_le_bytes();
        run(&mut FloatFloatConv, &Datatype::float64(LE), &Datatype::float32(LE), 1, 0, &mut buf, None).unwrap();
        f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
    }

    #[test]
    fn narrowing_matches_native_casts() {
        let values = [
            0.0,
            -0.0,
            1.0,
            -2.5,
            0.1,
            1.0 / 3.0,
            16_777_217.0,
            f32::MAX as f64,
            f32::MAX as f64 * (1.0 + f64::EPSILON),
            f32::MIN_POSITIVE as f64,
            1e-40,
            -3e-42,
            1e-46,
            5e-324,
            1e39,
            -1e300,
            f64::INFINITY,
            f64::NEG_INFINITY,
        ];
        for v in values {
            assert_eq!(narrow(v).to_bits(), (v as f32).to_bits(), "{v:e}");
        }
        assert!(narrow(f64::NAN).is_nan());
    }

    #[test]
    fn widening_is_exact() {
        let values = [1.0f32, -0.75, 1e-45, 1.17e-38, f32::MAX, f32::MIN, 3.0e-39];
        let mut buf: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        buf.resize(values.len() * 8, 0);
        run(
            &mut FloatFloatConv,
            &Datatype::float32(LE),
            &Datatype::float64(LE),
            values.len(),
            0,
            &mut buf,
            None,
        )
        .unwrap();
        for (i, v) in values.iter().enumerate() {
            let got = f64::from_le_bytes(buf[i * 8..i * 8 + 8].try_into().unwrap());
            assert_eq!(got, *v as f64);
        }
    }

    #[test]
    fn half_precision_limits() {
        let to_half = |v: f32| {
            let mut buf = v.to_le_bytes();
            run(&mut FloatFloatConv, &Datatype::float32(LE), &half(), 1, 0, &mut buf, None).unwrap();
            u16::from_le_bytes([buf[0], buf[1]])
        };
        assert_eq!(to_half(1.0), 0x3c00);
        assert_eq!(to_half(65504.0), 0x7bff);
        // halfway to the next binade rounds to even, which overflows
        assert_eq!(to_half(65520.0), 0x7c00);
        assert_eq!(to_half(-65519.0), 0xfbff);
        assert_eq!(to_half(5.960_464_5e-8), 0x0001);
        assert_eq!(to_half(2.0e-8), 0x0000);
        assert_eq!(to_half(f32::NAN) & 0x7c00, 0x7c00);
        assert_ne!(to_half(f32::NAN) & 0x03ff, 0);
    }

    #[test]
    fn explicit_leading_bit_round_trip() {
        let mut buf = vec![0u8; 10];
        buf[..8].copy_from_slice(&1.5f64.to_le_bytes());
        run(&mut FloatFloatConv, &Datatype::float64(LE), &extended(), 1, 0, &mut buf, None).unwrap();
        assert_eq!(&buf[..8], &0xc000_0000_0000_0000u64.to_le_bytes());
        assert_eq!(&buf[8..], &[0xff, 0x3f]);
        run(&mut FloatFloatConv, &extended(), &Datatype::float64(LE), 1, 0, &mut buf, None).unwrap();
        assert_eq!(&buf[..8], &1.5f64.to_le_bytes());

        let mut buf = vec![0u8; 10];
        buf[..8].copy_from_slice(&f64::NEG_INFINITY.to_le_bytes());
        run(&mut FloatFloatConv, &Datatype::float64(LE), &extended(), 1, 0, &mut buf, None).unwrap();
        assert_eq!(&buf[..8], &(1u64 << 63).to_le_bytes());
        assert_eq!(&buf[8..], &[0xff, 0xff]);
    }

    #[test]
    fn infinity_goes_to_handler() {
        use crate::except::{ExceptionAction, ExceptionEvent};

        fn mark(ev: &ExceptionEvent<'_>, d: &mut [u8]) -> ExceptionAction {
            match ev.kind {
                ConvException::PInf => {
                    assert_eq!(ev.src, &f64::INFINITY.to_be_bytes());
                    d.copy_from_slice(&7.0f32.to_le_bytes());
                    ExceptionAction::Handled
                }
                _ => ExceptionAction::Unhandled,
            }
        }
        let mut buf: Vec<u8> = [f64::INFINITY, f64::NEG_INFINITY]
            .iter()
            .flat_map(|v| v.to_be_bytes())
            .collect();
        run(&mut FloatFloatConv, &Datatype::float64(BE), &Datatype::float32(LE), 2, 0, &mut buf, Some(&mark)).unwrap();
        assert_eq!(&buf[..4], &7.0f32.to_le_bytes());
        assert_eq!(&buf[4..8], &f32::NEG_INFINITY.to_le_bytes());
    }

    #[test]
    fn rejects_msb_set_normalization() {
        let odd = match Datatype::float32(LE) {
            Datatype::FloatingPoint { size, layout, mut fields } => {
                fields.mantissa_norm = MantissaNorm::MsbSet;
                Datatype::FloatingPoint { size, layout, fields }
            }
            other => other,
        };
        let mut buf = [0u8; 8];
        let err = run(&mut FloatFloatConv, &odd, &Datatype::float64(LE), 1, 0, &mut buf, None).unwrap_err();
        assert!(err.is_capability_mismatch());
    }

    // ---- float to integer ----

    #[test]
    fn float_to_i32_truncates_and_saturates() {
        use crate::except::{ExceptionAction, ExceptionEvent, ExceptionHandler};
        use std::cell::RefCell;

        let values = [3.7, -3.7, 0.5, -0.5, 1e10, -1e10, -2_147_483_648.0, f64::NAN, f64::INFINITY, f64::NEG_INFINITY];
        let mut buf: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let kinds = RefCell::new(Vec::new());
        let handler: &dyn ExceptionHandler = &|ev: &ExceptionEvent<'_>, _: &mut [u8]| {
            kinds.borrow_mut().push(ev.kind);
            ExceptionAction::Unhandled
        };
        run(
            &mut FloatIntConv,
            &Datatype::float64(LE),
            &Datatype::integer(4, true, LE),
            values.len(),
            0,
            &mut buf,
            Some(handler),
        )
        .unwrap();
        let got: Vec<i32> = buf[..values.len() * 4]
            .chunks(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(got, vec![3, -3, 0, 0, i32::MAX, i32::MIN, i32::MIN, 0, i32::MAX, i32::MIN]);
        assert_eq!(
            *kinds.borrow(),
            vec![
                ConvException::Truncate,
                ConvException::Truncate,
                ConvException::RangeHi,
                ConvException::RangeLow,
                ConvException::NaN,
                ConvException::PInf,
                ConvException::NInf,
            ]
        );
    }

    #[test]
    fn float_to_unsigned() {
        let to_u8 = |v: f32| {
            let mut buf = v.to_le_bytes();
            run(&mut FloatIntConv, &Datatype::float32(LE), &Datatype::native_u8(), 1, 0, &mut buf, None).unwrap();
            buf[0]
        };
        assert_eq!(to_u8(255.0), 255);
        assert_eq!(to_u8(256.0), 255);
        assert_eq!(to_u8(-1.0), 0);
        assert_eq!(to_u8(f32::INFINITY), 255);
        assert_eq!(to_u8(f32::NEG_INFINITY), 0);

        let to_u64 = |v: f64| {
            let mut buf = v.to_le_bytes();
            run(&mut FloatIntConv, &Datatype::float64(LE), &Datatype::integer(8, false, LE), 1, 0, &mut buf, None)
                .unwrap();
            u64::from_le_bytes(buf)
        };
        assert_eq!(to_u64(9_223_372_036_854_775_808.0), 1 << 63);
        assert_eq!(to_u64(18_446_744_073_709_551_616.0), u64::MAX);
        assert_eq!(to_u64(1e300), u64::MAX);
    }

    #[test]
    fn float_to_int_byte_orders() {
        let mut buf = (-300.25f32).to_be_bytes();
        run(&mut FloatIntConv, &Datatype::float32(BE), &Datatype::integer(2, true, LE), 1, 0, &mut buf, None).unwrap();
        assert_eq!(&buf[..2], &(-300i16).to_le_bytes());

        let mut buf = 1_000_000.0f64.to_le_bytes();
        run(&mut FloatIntConv, &Datatype::float64(LE), &Datatype::integer(8, true, BE), 1, 0, &mut buf, None).unwrap();
        assert_eq!(buf, 1_000_000i64.to_be_bytes());
    }

    #[test]
    fn nan_handler_writes_destination() {
        use crate::except::{ExceptionAction, ExceptionEvent};

        fn seven(ev: &ExceptionEvent<'_>, d: &mut [u8]) -> ExceptionAction {
            assert_eq!(ev.kind, ConvException::NaN);
            d.copy_from_slice(&7i32.to_be_bytes());
            ExceptionAction::Handled
        }
        let mut buf = f32::NAN.to_le_bytes();
        run(&mut FloatIntConv, &Datatype::float32(LE), &Datatype::integer(4, true, BE), 1, 0, &mut buf, Some(&seven)).unwrap();
        assert_eq!(buf, 7i32.to_be_bytes());
    }
}
