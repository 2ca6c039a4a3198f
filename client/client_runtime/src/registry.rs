use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

/// Components currently mounted on the client, keyed by component id.
///
/// Shared through an `Arc` between the runtime loop, which mounts and
/// unmounts, and the command queue, which validates targets.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    components: RwLock<HashMap<String, String>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `cid` as an instance of `module`, replacing any previous
    /// registration under the same id.
    pub fn register(&self, cid: impl Into<String>, module: impl Into<String>) {
        let cid = cid.into();
        let module = module.into();
        debug!(%cid, %module, "component registered");
        self.components.write().insert(cid, module);
    }

    pub fn unregister(&self, cid: &str) -> Option<String> {
        let removed = self.components.write().remove(cid);
        if removed.is_some() {
            debug!(%cid, "component unregistered");
        }
        removed
    }

    pub fn contains(&self, cid: &str) -> bool {
        self.components.read().contains_key(cid)
    }

    pub fn module_of(&self, cid: &str) -> Option<String> {
        self.components.read().get(cid).cloned()
    }

    pub fn len(&self) -> usize {
        self.components.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.read().is_empty()
    }

    pub fn reset(&self) {
        self.components.write().clear();
    }
}
