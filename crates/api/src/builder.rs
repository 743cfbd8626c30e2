//! Builder-related types.

use crate::*;
use std::sync::Arc;

/// The general vault2 builder.
///
/// This carries the module configuration and the routing-layer surfaces the
/// embedder supplies, allowing construction of a runtime vault instance.
pub struct Builder {
    /// The module configuration to be used when building modules.
    /// This can be loaded from disk or modified before freezing the builder.
    pub config: config::Config,

    /// The outbound routing sender supplied by the embedder.
    pub sender: DynRoutingSender,
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder").field("config", &self.config).finish()
    }
}

impl Builder {
    /// Freeze this builder instance.
    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }
}
