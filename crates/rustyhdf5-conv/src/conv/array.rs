//! Array to array conversion.
//!
//! Arrays of the same shape convert element by element through the path
//! between their base types.

use crate::datatype::Datatype;
use crate::error::{ensure_len, ConvError, Result};
use crate::path::{BackgroundNeed, ConvArgs, ConvCtx, Converter, InitCtx};
use crate::traverse::Traversal;

fn array_parts(dt: &Datatype) -> Result<(&Datatype, &[u32])> {
    match dt {
        Datatype::Array {
            base_type,
            dimensions,
        } => Ok((base_type, dimensions)),
        other => Err(ConvError::BadType {
            expected: "array",
            actual: other.class(),
        }),
    }
}

fn check_shape(src: &Datatype, dst: &Datatype) -> Result<()> {
    let (_, sdims) = array_parts(src)?;
    let (_, ddims) = array_parts(dst)?;
    if sdims.len() != ddims.len() {
        return Err(ConvError::ArrayRankMismatch {
            src: sdims.len(),
            dst: ddims.len(),
        });
    }
    for (dim, (&s, &d)) in sdims.iter().zip(ddims).enumerate() {
        if s != d {
            return Err(ConvError::ArrayDimMismatch { dim, src: s, dst: d });
        }
    }
    Ok(())
}

#[derive(Debug)]
struct ArrayState {
    src_copy: Datatype,
    dst_copy: Datatype,
    /// Background need of the base path, reported unchanged.
    need_bkg: BackgroundNeed,
}

/// Converts arrays with identical dimensions by converting the base
/// elements of each array in place.
#[derive(Debug, Default)]
pub struct ArrayConv {
    state: Option<ArrayState>,
}

impl Converter for ArrayConv {
    fn init(&mut self, src: &Datatype, dst: &Datatype, ctx: &InitCtx<'_>) -> Result<BackgroundNeed> {
        check_shape(src, dst)?;
        let (sbase, _) = array_parts(src)?;
        let (dbase, _) = array_parts(dst)?;
        let tpath = ctx.registry.find_with_handler(sbase, dbase, ctx.handler)?;
        let need_bkg = tpath.borrow().need_background();
        self.state = Some(ArrayState {
            src_copy: src.clone(),
            dst_copy: dst.clone(),
            need_bkg,
        });
        Ok(need_bkg)
    }

    fn convert(
        &mut self,
        src: &Datatype,
        dst: &Datatype,
        ctx: &ConvCtx<'_>,
        args: ConvArgs<'_>,
    ) -> Result<()> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| ConvError::Unsupported("array conversion used before init".into()))?;
        if !ctx.recursive && (state.src_copy != *src || state.dst_copy != *dst) {
            check_shape(src, dst)?;
            state.src_copy = src.clone();
            state.dst_copy = dst.clone();
        }
        let (sbase, dims) = array_parts(src)?;
        let (dbase, _) = array_parts(dst)?;

        // the base path may have been replaced since init
        let tpath = ctx.registry.find_with_handler(sbase, dbase, ctx.handler)?;
        let noop = tpath.borrow().is_noop();
        let need_bkg = state.need_bkg != BackgroundNeed::No
            || tpath.borrow().need_background() != BackgroundNeed::No;

        let nelem: usize = dims.iter().map(|&d| d as usize).product();
        let (ssize, dsize) = (src.size(), dst.size());
        let span = ssize.max(dsize);
        let plan = Traversal::plan_direction(ssize, dsize, args.buf_stride, args.nelmts);
        ensure_len(args.buf, plan.required_len(ssize, dsize))?;

        let mut bkg = if need_bkg && !noop {
            Some(vec![0u8; nelem * sbase.size().max(dbase.size())])
        } else {
            None
        };
        let nested = ctx.nested();
        let available = args.buf.len();
        for step in plan.steps() {
            args.buf.copy_within(step.src..step.src + ssize, step.dst);
            if noop {
                continue;
            }
            let elem = args
                .buf
                .get_mut(step.dst..step.dst + span)
                .ok_or(ConvError::BufferTooSmall {
                    needed: step.dst + span,
                    available,
                })?;
            let sub = ConvArgs {
                nelmts: nelem,
                buf_stride: 0,
                bkg_stride: 0,
                buf: elem,
                bkg: bkg.as_deref_mut(),
            };
            ctx.registry.convert_with_ctx(&tpath, sbase, dbase, &nested, sub)?;
        }
        Ok(())
    }

    fn free(&mut self) -> Result<()> {
        self.state = None;
        Ok(())
    }
}
