//! The per-invocation handler context.

use std::sync::Arc;

use courier_core::{HandlerCategory, NormalizedEvent};

use crate::resources::Resources;

/// Everything a handler invocation can draw its parameters from.
///
/// One context is built for each matched handler. The event itself is shared
/// by every handler that fires for it during the same dispatch cycle.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    event: Arc<NormalizedEvent>,
    resources: Arc<Resources>,
    category: HandlerCategory,
    handler: Arc<str>,
}

impl HandlerContext {
    pub fn new(
        event: Arc<NormalizedEvent>,
        resources: Arc<Resources>,
        category: HandlerCategory,
        handler: Arc<str>,
    ) -> Self {
        Self {
            event,
            resources,
            category,
            handler,
        }
    }

    pub fn event(&self) -> &Arc<NormalizedEvent> {
        &self.event
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    /// The category under which the handler was matched.
    pub fn category(&self) -> HandlerCategory {
        self.category
    }

    /// The registered name of the handler being invoked.
    pub fn handler_name(&self) -> &str {
        &self.handler
    }
}
