//! Immutable, ordered hook chains

use std::fmt;
use std::sync::Arc;

use super::{HookError, JsonBodyAdapter, JsonHook, ProxiedResponse, ResponseHook};

/// Ordered list of response hooks
///
/// Registering a hook returns a new chain and leaves the receiver untouched,
/// so one chain can serve as the template for several routes.
#[derive(Clone)]
pub struct HookChain {
    hooks: Arc<[Arc<dyn ResponseHook>]>,
}

impl HookChain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self {
            hooks: Arc::from(Vec::new()),
        }
    }

    /// New chain with `hook` appended after the receiver's hooks
    pub fn register(&self, hook: Arc<dyn ResponseHook>) -> Self {
        let mut hooks = Vec::with_capacity(self.hooks.len() + 1);
        hooks.extend(self.hooks.iter().cloned());
        hooks.push(hook);
        Self {
            hooks: hooks.into(),
        }
    }

    /// New chain with a JSON hook appended, wrapped in a [`JsonBodyAdapter`]
    pub fn register_json(&self, hook: Arc<dyn JsonHook>) -> Self {
        self.register(Arc::new(JsonBodyAdapter::new(hook)))
    }

    /// Run every hook in registration order, stopping at the first error
    pub async fn dispatch(&self, response: &mut ProxiedResponse) -> Result<(), HookError> {
        for hook in self.hooks.iter() {
            tracing::debug!(hook = hook.name(), "Running response hook");
            if let Err(e) = hook.apply(response).await {
                tracing::error!(
                    hook = hook.name(),
                    error = %e,
                    "Response hook failed, aborting chain"
                );
                return Err(e);
            }
        }
        Ok(())
    }

    /// Get all registered hooks
    pub fn hooks(&self) -> &[Arc<dyn ResponseHook>] {
        &self.hooks
    }

    pub fn hook_names(&self) -> Vec<&str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl Default for HookChain {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HookChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookChain")
            .field("hooks", &self.hook_names())
            .finish()
    }
}
