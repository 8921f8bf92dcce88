//! The no-op conversion.

use crate::datatype::Datatype;
use crate::error::Result;
use crate::path::{BackgroundNeed, ConvArgs, ConvCtx, Converter, InitCtx};

/// Leaves the buffer untouched. Backs the shared path between equal types
/// and the legacy reference relocations.
#[derive(Debug, Default)]
pub struct NoopConv;

impl Converter for NoopConv {
    fn init(&mut self, _src: &Datatype, _dst: &Datatype, _ctx: &InitCtx<'_>) -> Result<BackgroundNeed> {
        Ok(BackgroundNeed::No)
    }

    fn convert(
        &mut self,
        _src: &Datatype,
        _dst: &Datatype,
        _ctx: &ConvCtx<'_>,
        _args: ConvArgs<'_>,
    ) -> Result<()> {
        Ok(())
    }
}
