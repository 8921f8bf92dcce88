//! Bit-level primitives over byte buffers.
//!
//! Bit `n` of a buffer is bit `n % 8` of byte `n / 8`, so offsets follow
//! little-endian significance. Converters normalize big-endian elements to
//! little-endian before using these helpers.

use crate::datatype::DatatypeByteOrder;

/// Search direction for [`bit_find`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitDirection {
    /// From the least significant bit upward.
    Lsb,
    /// From the most significant bit downward.
    Msb,
}

#[inline]
fn get(buf: &[u8], bit: usize) -> bool {
    (buf[bit / 8] >> (bit % 8)) & 1 == 1
}

#[inline]
fn put(buf: &mut [u8], bit: usize, value: bool) {
    let mask = 1u8 << (bit % 8);
    if value {
        buf[bit / 8] |= mask;
    } else {
        buf[bit / 8] &= !mask;
    }
}

/// Copy `size` bits from `src` at `src_offset` into `dst` at `dst_offset`.
pub fn bit_copy(dst: &mut [u8], dst_offset: usize, src: &[u8], src_offset: usize, size: usize) {
    if size == 0 {
        return;
    }
    if src_offset % 8 == 0 && dst_offset % 8 == 0 && size % 8 == 0 {
        let (s, d, n) = (src_offset / 8, dst_offset / 8, size / 8);
        dst[d..d + n].copy_from_slice(&src[s..s + n]);
        return;
    }
    for i in 0..size {
        put(dst, dst_offset + i, get(src, src_offset + i));
    }
}

/// Set `size` bits starting at `offset` to `value`.
pub fn bit_set(buf: &mut [u8], offset: usize, size: usize, value: bool) {
    let mut bit = offset;
    let end = offset + size;
    while bit < end && bit % 8 != 0 {
        put(buf, bit, value);
        bit += 1;
    }
    let fill = if value { 0xff } else { 0x00 };
    while bit + 8 <= end {
        buf[bit / 8] = fill;
        bit += 8;
    }
    while bit < end {
        put(buf, bit, value);
        bit += 1;
    }
}

/// Find the first bit equal to `value` within `[offset, offset + size)`.
///
/// Returns the position relative to `offset`, scanning in `direction`.
pub fn bit_find(
    buf: &[u8],
    offset: usize,
    size: usize,
    direction: BitDirection,
    value: bool,
) -> Option<usize> {
    match direction {
        BitDirection::Lsb => (0..size).find(|&i| get(buf, offset + i) == value),
        BitDirection::Msb => (0..size).rev().find(|&i| get(buf, offset + i) == value),
    }
}

/// Read up to 64 bits starting at `offset` as an unsigned value.
pub fn bit_get_u64(buf: &[u8], offset: usize, size: usize) -> u64 {
    debug_assert!(size <= 64);
    (0..size).fold(0u64, |acc, i| {
        if get(buf, offset + i) {
            acc | (1u64 << i)
        } else {
            acc
        }
    })
}

/// Write the low `size` bits of `value` starting at `offset`.
pub fn bit_set_u64(buf: &mut [u8], offset: usize, size: usize, value: u64) {
    debug_assert!(size <= 64);
    for i in 0..size {
        put(buf, offset + i, (value >> i) & 1 == 1);
    }
}

/// Copy a little-endian normalized element back into `order`.
///
/// `dst` receives `src` reversed for big-endian and verbatim otherwise.
pub fn reverse_order(dst: &mut [u8], src: &[u8], order: DatatypeByteOrder) {
    dst.copy_from_slice(src);
    if order == DatatypeByteOrder::BigEndian {
        dst.reverse();
    }
}

/// Reverse the bytes of one element in place.
#[inline]
pub fn swap_bytes(elem: &mut [u8]) {
    elem.reverse();
}
