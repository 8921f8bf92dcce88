//! Conversion paths and the converter interface.
//!
//! A [`ConversionPath`] binds one converter instance to a (source,
//! destination) datatype pair. The converter sees three phases: `init`
//! decides whether it handles the pair and builds private state, `convert`
//! runs on buffers, and `free` releases the state when the path is dropped
//! from the registry.

use std::cell::RefCell;
use std::rc::Rc;

use log::debug;

use crate::datatype::Datatype;
use crate::error::{ConvError, Result};
use crate::except::{ConvException, ExceptionAction, ExceptionEvent, ExceptionHandler};
use crate::registry::Registry;

/// Whether a converter needs a background buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundNeed {
    /// No background buffer.
    No,
    /// Scratch space only; contents are not read.
    Temp,
    /// Background must hold the prior destination values.
    Yes,
}

/// Context handed to `Converter::init`.
#[derive(Clone, Copy)]
pub struct InitCtx<'a> {
    pub registry: &'a Registry,
    /// Initialization-time exception handler.
    pub handler: Option<&'a dyn ExceptionHandler>,
}

/// Context handed to `Converter::convert`.
#[derive(Clone, Copy)]
pub struct ConvCtx<'a> {
    pub registry: &'a Registry,
    /// Conversion-time exception handler.
    pub handler: Option<&'a dyn ExceptionHandler>,
    /// Set when the call comes from another converter.
    pub recursive: bool,
}

impl<'a> ConvCtx<'a> {
    /// Context for a nested conversion issued by a converter.
    pub fn nested(&self) -> ConvCtx<'a> {
        ConvCtx {
            recursive: true,
            ..*self
        }
    }

    /// Consult the exception handler.
    ///
    /// Returns `Unhandled` when no handler is installed and turns `Abort`
    /// into [`ConvError::Aborted`].
    pub fn raise(
        &self,
        kind: ConvException,
        src_type: &Datatype,
        dst_type: &Datatype,
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<ExceptionAction> {
        let Some(handler) = self.handler else {
            return Ok(ExceptionAction::Unhandled);
        };
        let event = ExceptionEvent {
            kind,
            src_type,
            dst_type,
            src,
        };
        match handler.handle(&event, dst) {
            ExceptionAction::Abort => Err(ConvError::Aborted(kind)),
            other => Ok(other),
        }
    }
}

/// The buffers and element counts of one conversion call.
#[derive(Debug)]
pub struct ConvArgs<'b> {
    pub nelmts: usize,
    /// Distance between elements; 0 means packed at the type sizes.
    pub buf_stride: usize,
    /// Distance between background elements; 0 means the destination size.
    pub bkg_stride: usize,
    pub buf: &'b mut [u8],
    pub bkg: Option<&'b mut [u8]>,
}

impl<'b> ConvArgs<'b> {
    /// Packed elements without background.
    pub fn packed(nelmts: usize, buf: &'b mut [u8]) -> Self {
        Self {
            nelmts,
            buf_stride: 0,
            bkg_stride: 0,
            buf,
            bkg: None,
        }
    }
}

/// A conversion function bound to one datatype pair.
pub trait Converter {
    /// Accept or reject the pair and build private state.
    ///
    /// For soft functions any error makes path search try the next
    /// candidate; [`ConvError::is_capability_mismatch`] marks the ones that
    /// only mean the pair is not handled.
    fn init(&mut self, src: &Datatype, dst: &Datatype, ctx: &InitCtx<'_>) -> Result<BackgroundNeed>;

    /// Convert `args.nelmts` elements of `src` into `dst` in place.
    fn convert(
        &mut self,
        src: &Datatype,
        dst: &Datatype,
        ctx: &ConvCtx<'_>,
        args: ConvArgs<'_>,
    ) -> Result<()>;

    /// Release private state.
    fn free(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Produces a fresh converter for each new path.
pub type ConverterFactory = Rc<dyn Fn() -> Box<dyn Converter>>;

/// Shared handle to a path in the registry table.
pub type PathRef = Rc<RefCell<ConversionPath>>;

/// Per-path counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathStats {
    pub calls: u64,
    pub elements: u64,
}

/// A converter bound to a datatype pair.
pub struct ConversionPath {
    name: String,
    src: Option<Datatype>,
    dst: Option<Datatype>,
    converter: Box<dyn Converter>,
    need_bkg: BackgroundNeed,
    is_hard: bool,
    is_noop: bool,
    is_app: bool,
    freed: bool,
    stats: PathStats,
}

impl ConversionPath {
    pub(crate) fn new(
        name: &str,
        src: Option<Datatype>,
        dst: Option<Datatype>,
        converter: Box<dyn Converter>,
        need_bkg: BackgroundNeed,
    ) -> Self {
        Self {
            name: name.to_string(),
            src,
            dst,
            converter,
            need_bkg,
            is_hard: false,
            is_noop: false,
            is_app: false,
            freed: false,
            stats: PathStats::default(),
        }
    }

    pub(crate) fn hard(mut self, is_hard: bool) -> Self {
        self.is_hard = is_hard;
        self
    }

    pub(crate) fn noop(mut self) -> Self {
        self.is_noop = true;
        self
    }

    pub(crate) fn app(mut self, is_app: bool) -> Self {
        self.is_app = is_app;
        self
    }

    /// Name of the conversion function.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source type, `None` for the shared no-op path.
    pub fn src(&self) -> Option<&Datatype> {
        self.src.as_ref()
    }

    /// Destination type, `None` for the shared no-op path.
    pub fn dst(&self) -> Option<&Datatype> {
        self.dst.as_ref()
    }

    pub fn need_background(&self) -> BackgroundNeed {
        self.need_bkg
    }

    pub fn is_hard(&self) -> bool {
        self.is_hard
    }

    pub fn is_app(&self) -> bool {
        self.is_app
    }

    /// Whether converting along this path leaves data untouched.
    pub fn is_noop(&self) -> bool {
        self.is_noop || (self.is_hard && self.src.is_some() && self.src == self.dst)
    }

    pub fn stats(&self) -> PathStats {
        self.stats
    }

    pub(crate) fn run(
        &mut self,
        src: &Datatype,
        dst: &Datatype,
        ctx: &ConvCtx<'_>,
        args: ConvArgs<'_>,
    ) -> Result<()> {
        if self.freed {
            return Err(ConvError::PathReleased(self.name.clone()));
        }
        let n = args.nelmts as u64;
        self.converter.convert(src, dst, ctx, args)?;
        self.stats.calls += 1;
        self.stats.elements = self.stats.elements.saturating_add(n);
        Ok(())
    }

    pub(crate) fn free(&mut self) -> Result<()> {
        if self.freed {
            return Ok(());
        }
        self.freed = true;
        debug!(
            "freeing conversion path `{}`: {} calls, {} elements",
            self.name, self.stats.calls, self.stats.elements
        );
        self.converter.free()
    }
}

impl std::fmt::Debug for ConversionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionPath")
            .field("name", &self.name)
            .field("src", &self.src)
            .field("dst", &self.dst)
            .field("need_bkg", &self.need_bkg)
            .field("is_hard", &self.is_hard)
            .field("is_noop", &self.is_noop)
            .field("is_app", &self.is_app)
            .field("stats", &self.stats)
            .finish()
    }
}
