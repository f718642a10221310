//! Loader seam for raw method CFGs
//!
//! The block graph never parses bytecode itself. It asks a [`CfgLoader`]
//! for the raw CFG of a method the first time that method is registered.

use std::collections::HashMap;

use crate::cfg::{MethodCfg, MethodId};

/// Source of raw method CFGs
///
/// # Design
///
/// - Takes `&self` so one loader can serve several graphs
/// - Returns `Ok(None)` for methods the loader does not know about and
///   `Err(..)` for real failures (I/O, malformed bytecode)
pub trait CfgLoader {
    /// Get the raw CFG of a method
    fn load(&self, method: MethodId) -> anyhow::Result<Option<MethodCfg>>;
}

/// Loader backed by CFGs registered up front
#[derive(Debug, Default, Clone)]
pub struct InMemoryLoader {
    methods: HashMap<MethodId, MethodCfg>,
}

impl InMemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cfg: MethodCfg) {
        self.methods.insert(cfg.method, cfg);
    }

    pub fn with_method(mut self, cfg: MethodCfg) -> Self {
        self.insert(cfg);
        self
    }
}

impl CfgLoader for InMemoryLoader {
    fn load(&self, method: MethodId) -> anyhow::Result<Option<MethodCfg>> {
        Ok(self.methods.get(&method).cloned())
    }
}

impl<F> CfgLoader for F
where
    F: Fn(MethodId) -> anyhow::Result<Option<MethodCfg>>,
{
    fn load(&self, method: MethodId) -> anyhow::Result<Option<MethodCfg>> {
        self(method)
    }
}
