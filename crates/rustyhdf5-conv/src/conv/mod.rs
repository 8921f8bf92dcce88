//! Built-in conversion functions.
//!
//! Each submodule provides one or more [`Converter`](crate::path::Converter)
//! implementations that the registry offers as soft functions.

pub mod array;
pub mod bitfield;
pub mod enums;
pub mod float;
pub mod integer;
pub mod noop;
pub mod order;
pub mod reference;
pub mod string;

use crate::bits;
use crate::datatype::{AtomicLayout, Datatype, DatatypeByteOrder, Pad};
use crate::error::{ConvError, Result};
use crate::except::{ConvException, ExceptionAction};
use crate::path::ConvCtx;

/// Reject atomic layouts that cannot be converted bit-wise.
pub(crate) fn check_layout(layout: &AtomicLayout, size: usize) -> Result<()> {
    if !layout.byte_order.is_le_or_be() {
        return Err(ConvError::UnsupportedByteOrder(layout.byte_order));
    }
    if layout.precision() == 0 || layout.offset() + layout.precision() > size * 8 {
        return Err(ConvError::Unsupported(format!(
            "precision {} at offset {} does not fit {size} bytes",
            layout.precision(),
            layout.offset()
        )));
    }
    Ok(())
}

/// Padding must be all zeros or all ones.
pub(crate) fn check_pads(layout: &AtomicLayout) -> Result<()> {
    for (which, pad) in [("LSB", layout.lsb_pad), ("MSB", layout.msb_pad)] {
        if !matches!(pad, Pad::Zero | Pad::One) {
            return Err(ConvError::UnsupportedPad { which, pad });
        }
    }
    Ok(())
}

/// Fill the bits below and above the significant range.
pub(crate) fn fill_pads(d: &mut [u8], layout: &AtomicLayout) {
    let (offset, prec) = (layout.offset(), layout.precision());
    bits::bit_set(d, 0, offset, layout.lsb_pad == Pad::One);
    let top = offset + prec;
    bits::bit_set(d, top, d.len() * 8 - top, layout.msb_pad == Pad::One);
}

/// Copy one element into `scratch`, reversed if it is big-endian.
pub(crate) fn load_le(scratch: &mut [u8], elem: &[u8], order: DatatypeByteOrder) {
    scratch.copy_from_slice(elem);
    if order == DatatypeByteOrder::BigEndian {
        scratch.reverse();
    }
}

/// Raise `kind` for an element that does not fit.
///
/// `s` is the little-endian normalized source; the handler sees it in its
/// original order. When unhandled, `default` writes the destination.
/// Returns whether the destination still needs reversing to its byte
/// order (a handled element is taken as written).
#[allow(clippy::too_many_arguments)]
pub(crate) fn overflow<F>(
    ctx: &ConvCtx<'_>,
    kind: ConvException,
    src_type: &Datatype,
    dst_type: &Datatype,
    s: &[u8],
    src_order: DatatypeByteOrder,
    d: &mut [u8],
    default: F,
) -> Result<bool>
where
    F: FnOnce(&mut [u8]),
{
    let action = if ctx.handler.is_some() {
        let mut original = vec![0u8; s.len()];
        bits::reverse_order(&mut original, s, src_order);
        ctx.raise(kind, src_type, dst_type, &original, d)?
    } else {
        ExceptionAction::Unhandled
    };
    match action {
        ExceptionAction::Handled => Ok(false),
        _ => {
            default(d);
            Ok(true)
        }
    }
}
