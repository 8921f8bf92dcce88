//! Conversion exceptions and the application handler hook.
//!
//! When a value cannot be represented in the destination type, the
//! converter raises a [`ConvException`]. An optional [`ExceptionHandler`]
//! decides what happens: it may write the destination itself, let the
//! converter apply its default, or abort the whole conversion.

use crate::datatype::Datatype;

/// Kinds of conversion exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConvException {
    /// Source value is above the destination's range.
    RangeHi,
    /// Source value is below the destination's range.
    RangeLow,
    /// Source value loses precision.
    Precision,
    /// Source value is truncated.
    Truncate,
    /// Source is positive infinity.
    PInf,
    /// Source is negative infinity.
    NInf,
    /// Source is not a number.
    NaN,
}

/// Handler verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionAction {
    /// Stop converting and fail.
    Abort,
    /// Let the converter apply its default.
    Unhandled,
    /// The handler has written the destination element.
    Handled,
}

/// What the handler gets to see.
#[derive(Debug)]
pub struct ExceptionEvent<'a> {
    pub kind: ConvException,
    pub src_type: &'a Datatype,
    pub dst_type: &'a Datatype,
    /// The offending source element in its original byte order.
    pub src: &'a [u8],
}

/// Application callback consulted on conversion exceptions.
pub trait ExceptionHandler {
    /// Decide the fate of one element. `dst` is the destination element
    /// scratch; on [`ExceptionAction::Handled`] its contents are kept.
    fn handle(&self, event: &ExceptionEvent<'_>, dst: &mut [u8]) -> ExceptionAction;
}

impl<F> ExceptionHandler for F
where
    F: Fn(&ExceptionEvent<'_>, &mut [u8]) -> ExceptionAction,
{
    fn handle(&self, event: &ExceptionEvent<'_>, dst: &mut [u8]) -> ExceptionAction {
        self(event, dst)
    }
}
