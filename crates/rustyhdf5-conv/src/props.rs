//! Transfer properties supplied by the caller of a conversion.
//!
//! Property lists group per-call configuration into a reusable bundle.

use std::fmt;
use std::rc::Rc;

use crate::except::{ExceptionAction, ExceptionEvent, ExceptionHandler};

/// Data transfer properties.
///
/// Carries the optional exception handler consulted by converters when a
/// value does not fit the destination type.
#[derive(Clone, Default)]
pub struct TransferProps {
    /// Exception handler; `None` means converters apply their defaults.
    pub exception_handler: Option<Rc<dyn ExceptionHandler>>,
    /// Build soft paths even where a hard function exists.
    pub force_soft: bool,
}

impl fmt::Debug for TransferProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferProps")
            .field("exception_handler", &self.exception_handler.is_some())
            .field("force_soft", &self.force_soft)
            .finish()
    }
}

impl TransferProps {
    /// Create default transfer properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the exception handler.
    pub fn handler(mut self, handler: Rc<dyn ExceptionHandler>) -> Self {
        self.exception_handler = Some(handler);
        self
    }

    /// Set the exception handler from a closure.
    pub fn on_exception<F>(self, f: F) -> Self
    where
        F: Fn(&ExceptionEvent<'_>, &mut [u8]) -> ExceptionAction + 'static,
    {
        self.handler(Rc::new(f))
    }

    /// Skip hard conversion functions when looking up paths.
    pub fn force_soft(mut self, yes: bool) -> Self {
        self.force_soft = yes;
        self
    }

    pub(crate) fn exception_handler(&self) -> Option<&dyn ExceptionHandler> {
        self.exception_handler.as_deref()
    }
}
