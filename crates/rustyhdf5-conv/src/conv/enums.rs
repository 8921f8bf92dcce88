//! Enumeration conversions.
//!
//! [`EnumConv`] maps each source member to the destination member of the
//! same name and copies that member's value. [`EnumNumericConv`] converts
//! an enumeration to a number through its base type.

use std::cmp::Ordering;

use log::trace;

use crate::bits;
use crate::datatype::{Datatype, DatatypeByteOrder, EnumMember};
use crate::error::{ensure_len, ConvError, Result};
use crate::except::{ConvException, ExceptionAction};
use crate::path::{BackgroundNeed, ConvArgs, ConvCtx, Converter, InitCtx};
use crate::traverse::Traversal;

fn enum_parts(dt: &Datatype) -> Result<(&Datatype, &[EnumMember])> {
    match dt {
        Datatype::Enumeration { base_type, members } => Ok((base_type, members)),
        other => Err(ConvError::BadType {
            expected: "enum",
            actual: other.class(),
        }),
    }
}

/// Dense tables are used when the value range is at most this many times
/// the member count.
const DENSE_RATIO: f64 = 1.2;

/// How a source value finds its destination member.
#[derive(Debug, Clone, PartialEq)]
enum Lookup {
    /// Source enumeration has no members.
    Empty,
    /// `map[value - base]` is the destination member index.
    Dense { base: i64, map: Vec<Option<usize>> },
    /// Significant source bytes sorted bytewise, paired with destination
    /// indices.
    Sorted(Vec<(Vec<u8>, usize)>),
}

/// Member mapping built for one (source, destination) pair.
#[derive(Debug, Clone)]
struct EnumMapping {
    src_copy: Datatype,
    dst_copy: Datatype,
    lookup: Lookup,
}

impl EnumMapping {
    fn build(src: &Datatype, dst: &Datatype, allow_dense: bool) -> Result<Self> {
        let (sbase, smembers) = enum_parts(src)?;
        let (_, dmembers) = enum_parts(dst)?;

        let lookup = if smembers.is_empty() {
            Lookup::Empty
        } else {
            let src_to_dst = match_names(smembers, dmembers)?;
            let dense = if allow_dense {
                dense_table(sbase, smembers, &src_to_dst)
            } else {
                None
            };
            dense.unwrap_or_else(|| {
                let mut sorted: Vec<(Vec<u8>, usize)> = smembers
                    .iter()
                    .zip(&src_to_dst)
                    .map(|(m, &di)| {
                        let mut key = Vec::new();
                        significant_bytes(sbase, &m.value, &mut key);
                        (key, di)
                    })
                    .collect();
                // stable, so the first member wins among equal values
                sorted.sort_by(|a, b| a.0.cmp(&b.0));
                sorted.dedup_by(|later, first| later.0 == first.0);
                Lookup::Sorted(sorted)
            })
        };
        Ok(Self {
            src_copy: src.clone(),
            dst_copy: dst.clone(),
            lookup,
        })
    }

    /// Destination member for a source value. Pad bits never take part in
    /// the match. `key` is scratch space for the sorted lookup.
    fn find(&self, value: &[u8], key: &mut Vec<u8>) -> Option<usize> {
        let (sbase, _) = enum_parts(&self.src_copy).ok()?;
        match &self.lookup {
            Lookup::Empty => None,
            Lookup::Dense { base, map } => {
                let v = sbase.decode_int(value)?;
                let idx = usize::try_from(v.checked_sub(*base)?).ok()?;
                map.get(idx).copied().flatten()
            }
            Lookup::Sorted(sorted) => {
                significant_bytes(sbase, value, key);
                sorted
                    .binary_search_by(|(v, _)| v.as_slice().cmp(key.as_slice()))
                    .ok()
                    .map(|k| sorted[k].1)
            }
        }
    }

    fn is_dense(&self) -> bool {
        matches!(self.lookup, Lookup::Dense { .. })
    }
}

/// Copy `value` into `key` least significant byte first, with the bits
/// outside the base type's precision cleared.
fn significant_bytes(sbase: &Datatype, value: &[u8], key: &mut Vec<u8>) {
    key.clear();
    key.extend_from_slice(value);
    let Datatype::FixedPoint { layout, .. } = sbase else {
        return;
    };
    if layout.byte_order == DatatypeByteOrder::BigEndian {
        key.reverse();
    }
    let (offset, prec) = (layout.offset(), layout.precision());
    let total = key.len() * 8;
    if offset + prec <= total {
        bits::bit_set(key, 0, offset, false);
        bits::bit_set(key, offset + prec, total - offset - prec, false);
    }
}

/// Pair every source member with the destination member of the same name.
fn match_names(smembers: &[EnumMember], dmembers: &[EnumMember]) -> Result<Vec<usize>> {
    let mut s_order: Vec<usize> = (0..smembers.len()).collect();
    s_order.sort_by(|&a, &b| smembers[a].name.cmp(&smembers[b].name));
    let mut d_order: Vec<usize> = (0..dmembers.len()).collect();
    d_order.sort_by(|&a, &b| dmembers[a].name.cmp(&dmembers[b].name));

    let mut src_to_dst = vec![0usize; smembers.len()];
    let mut missing = Vec::new();
    let mut j = 0;
    for &si in &s_order {
        let name = &smembers[si].name;
        while j < d_order.len() && dmembers[d_order[j]].name.cmp(name) == Ordering::Less {
            j += 1;
        }
        if j < d_order.len() && dmembers[d_order[j]].name == *name {
            src_to_dst[si] = d_order[j];
            j += 1;
        } else {
            missing.push(name.as_str());
        }
    }
    if missing.is_empty() {
        Ok(src_to_dst)
    } else {
        Err(ConvError::EnumNotSubset {
            name: missing.join(", "),
        })
    }
}

/// O(1) table for small integer bases whose values are nearly contiguous.
fn dense_table(sbase: &Datatype, smembers: &[EnumMember], src_to_dst: &[usize]) -> Option<Lookup> {
    if !matches!(sbase.size(), 1 | 2 | 4) {
        return None;
    }
    let values: Vec<i64> = smembers
        .iter()
        .map(|m| sbase.decode_int(&m.value))
        .collect::<Option<_>>()?;
    let min = *values.iter().min()?;
    let max = *values.iter().max()?;
    let length = usize::try_from(max.checked_sub(min)?).ok()?.checked_add(1)?;
    if smembers.len() >= 2 && length as f64 / smembers.len() as f64 >= DENSE_RATIO {
        return None;
    }
    let mut map = vec![None; length];
    for (v, &di) in values.iter().zip(src_to_dst) {
        let slot = &mut map[(v - min) as usize];
        if slot.is_none() {
            *slot = Some(di);
        }
    }
    Some(Lookup::Dense { base: min, map })
}

/// Converts between enumerations by member name.
///
/// Source values that match no member raise [`ConvException::RangeHi`];
/// unhandled, the destination element is filled with `0xff`.
#[derive(Debug, Default)]
pub struct EnumConv {
    mapping: Option<EnumMapping>,
}

impl EnumConv {
    /// Rebuild the mapping unless it is current. Nested calls trust the
    /// cached mapping.
    fn refresh(&mut self, src: &Datatype, dst: &Datatype, recursive: bool) -> Result<&EnumMapping> {
        let stale = match &self.mapping {
            None => true,
            Some(m) => !recursive && (m.src_copy != *src || m.dst_copy != *dst),
        };
        if stale {
            self.mapping = None;
            let mapping = EnumMapping::build(src, dst, true)?;
            trace!("built enum mapping (dense: {})", mapping.is_dense());
            self.mapping = Some(mapping);
        }
        self.mapping
            .as_ref()
            .ok_or_else(|| ConvError::Unsupported("enum mapping unavailable".into()))
    }

    /// Whether the current mapping uses the dense table.
    pub fn uses_dense_lookup(&self) -> bool {
        self.mapping.as_ref().is_some_and(EnumMapping::is_dense)
    }
}

impl Converter for EnumConv {
    fn init(&mut self, src: &Datatype, dst: &Datatype, _ctx: &InitCtx<'_>) -> Result<BackgroundNeed> {
        self.mapping = None;
        self.refresh(src, dst, false)?;
        Ok(BackgroundNeed::No)
    }

    fn convert(
        &mut self,
        src: &Datatype,
        dst: &Datatype,
        ctx: &ConvCtx<'_>,
        args: ConvArgs<'_>,
    ) -> Result<()> {
        let mapping = self.refresh(src, dst, ctx.recursive)?;
        let (_, dmembers) = enum_parts(&mapping.dst_copy)?;
        let (ssize, dsize) = (src.size(), dst.size());
        let plan = Traversal::plan_direction(ssize, dsize, args.buf_stride, args.nelmts);
        ensure_len(args.buf, plan.required_len(ssize, dsize))?;

        let mut s = vec![0u8; ssize];
        let mut d = vec![0u8; dsize];
        let mut key = Vec::with_capacity(ssize);
        for step in plan.steps() {
            s.copy_from_slice(&args.buf[step.src..step.src + ssize]);
            match mapping.find(&s, &mut key) {
                Some(di) => d.copy_from_slice(&dmembers[di].value),
                None => {
                    d.copy_from_slice(&args.buf[step.dst..step.dst + dsize]);
                    let action = ctx.raise(ConvException::RangeHi, src, dst, &s, &mut d)?;
                    if action == ExceptionAction::Unhandled {
                        d.fill(0xff);
                    }
                }
            }
            args.buf[step.dst..step.dst + dsize].copy_from_slice(&d);
        }
        Ok(())
    }

    fn free(&mut self) -> Result<()> {
        self.mapping = None;
        Ok(())
    }
}

/// Converts an enumeration to an integer or float by converting its raw
/// values as the base type.
#[derive(Debug, Default)]
pub struct EnumNumericConv;

impl Converter for EnumNumericConv {
    fn init(&mut self, src: &Datatype, dst: &Datatype, _ctx: &InitCtx<'_>) -> Result<BackgroundNeed> {
        enum_parts(src)?;
        if !matches!(dst, Datatype::FixedPoint { .. } | Datatype::FloatingPoint { .. }) {
            return Err(ConvError::BadType {
                expected: "integer or float",
                actual: dst.class(),
            });
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
        let (base, _) = enum_parts(src)?;
        let tpath = ctx.registry.find_with_handler(base, dst, ctx.handler)?;
        let noop = tpath.borrow().is_noop();
        if noop {
            return Ok(());
        }
        ctx.registry.convert_with_ctx(&tpath, base, dst, &ctx.nested(), args)
    }
}
