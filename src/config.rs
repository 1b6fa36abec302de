//! Router configuration

/// What happens when a node emits an event before any routing authority has reached it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnattachedEmit {
    /// The event is dropped and a `debug` record is logged
    #[default]
    Ignore,

    /// The emit fails with [`RoutingError::Unattached`](crate::RoutingError::Unattached)
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterConfig {
    pub unattached_emit: UnattachedEmit,

    /// How deep callbacks may nest emits inside emits on one thread
    pub max_dispatch_depth: usize,
}

impl RouterConfig {
    pub const DEFAULT_MAX_DISPATCH_DEPTH: usize = 64;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn unattached_emit(mut self, policy: UnattachedEmit) -> Self {
        self.unattached_emit = policy;
        self
    }

    pub fn max_dispatch_depth(mut self, depth: usize) -> Self {
        self.max_dispatch_depth = depth;
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            unattached_emit: UnattachedEmit::Ignore,
            max_dispatch_depth: Self::DEFAULT_MAX_DISPATCH_DEPTH,
        }
    }
}
