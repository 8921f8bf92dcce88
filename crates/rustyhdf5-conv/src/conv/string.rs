//! Fixed-length string to fixed-length string conversion.

use crate::datatype::{CharacterSet, Datatype, StringPadding};
use crate::error::{ensure_len, ConvError, Result};
use crate::path::{BackgroundNeed, ConvArgs, ConvCtx, Converter, InitCtx};
use crate::traverse::Traversal;

fn string_parts(dt: &Datatype) -> Result<(StringPadding, CharacterSet)> {
    match dt {
        Datatype::String {
            padding, charset, ..
        } => Ok((*padding, *charset)),
        other => Err(ConvError::BadType {
            expected: "string",
            actual: other.class(),
        }),
    }
}

/// Number of meaningful characters in `s` under `padding`, capped at `max`.
fn meaningful(s: &[u8], padding: StringPadding, max: usize) -> usize {
    match padding {
        StringPadding::NullTerminate | StringPadding::NullPad => s
            .iter()
            .take(max)
            .position(|&c| c == 0)
            .unwrap_or(s.len().min(max)),
        StringPadding::SpacePad => {
            let end = s.iter().rposition(|&c| c != b' ').map_or(0, |p| p + 1);
            end.min(max)
        }
    }
}

/// Re-pads strings between the null-terminated, null-padded and
/// space-padded conventions, truncating to the destination size.
///
/// A null-terminated destination always ends in a NUL, so a source that
/// fills the destination loses its last character.
#[derive(Debug, Default)]
pub struct StringConv;

impl Converter for StringConv {
    fn init(&mut self, src: &Datatype, dst: &Datatype, _ctx: &InitCtx<'_>) -> Result<BackgroundNeed> {
        let (_, src_cset) = string_parts(src)?;
        let (_, dst_cset) = string_parts(dst)?;
        if src_cset != dst_cset {
            return Err(ConvError::CharsetMismatch {
                src: src_cset,
                dst: dst_cset,
            });
        }
        if src.size() == 0 || dst.size() == 0 {
            return Err(ConvError::Unsupported("zero-length string type".into()));
        }
        Ok(BackgroundNeed::No)
    }

    fn convert(
        &mut self,
        src: &Datatype,
        dst: &Datatype,
        _ctx: &ConvCtx<'_>,
        args: ConvArgs<'_>,
    ) -> Result<()> {
        let (src_pad, _) = string_parts(src)?;
        let (dst_pad, _) = string_parts(dst)?;
        let (ssize, dsize) = (src.size(), dst.size());
        let plan = Traversal::plan(ssize, dsize, args.buf_stride, args.nelmts);
        ensure_len(args.buf, plan.required_len(ssize, dsize))?;

        let mut d = vec![0u8; dsize];
        for step in plan.steps() {
            let s = &args.buf[step.src..step.src + ssize];
            let nchars = meaningful(s, src_pad, dsize);
            d[..nchars].copy_from_slice(&s[..nchars]);
            let fill = match dst_pad {
                StringPadding::NullTerminate | StringPadding::NullPad => 0,
                StringPadding::SpacePad => b' ',
            };
            d[nchars..].fill(fill);
            if dst_pad == StringPadding::NullTerminate {
                d[dsize - 1] = 0;
            }
            args.buf[step.dst..step.dst + dsize].copy_from_slice(&d);
        }
        Ok(())
    }
}
