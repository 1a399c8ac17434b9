//! Function catalog
//!
//! Workers cannot receive closures, so every function a job can run is
//! registered under a name. The caller's executor and every worker build the
//! same catalog; a payload carries only the name.

mod builtins;

pub use builtins::register_builtins;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

/// Outcome of one function invocation; `Err` is a user-level exception
pub type FunctionResult = std::result::Result<Value, String>;

/// A function that can run on a worker
pub trait RemoteFunction: Send + Sync {
    /// Run on one partition's data with the job's extra arguments
    fn call(&self, data: Value, args: &Value) -> FunctionResult;
}

impl<F> RemoteFunction for F
where
    F: Fn(Value, &Value) -> FunctionResult + Send + Sync,
{
    fn call(&self, data: Value, args: &Value) -> FunctionResult {
        self(data, args)
    }
}

// ─────────────────────────────────────────────────────────────────
// Catalog
// ─────────────────────────────────────────────────────────────────

/// Named functions available to jobs
#[derive(Default)]
pub struct FunctionCatalog {
    functions: RwLock<BTreeMap<String, Arc<dyn RemoteFunction>>>,
}

impl FunctionCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog preloaded with the builtin functions
    pub fn with_builtins() -> Self {
        let catalog = Self::new();
        register_builtins(&catalog);
        catalog
    }

    /// Register (or replace) a function
    pub fn register<F>(&self, name: impl Into<String>, function: F)
    where
        F: RemoteFunction + 'static,
    {
        let name = name.into();
        tracing::debug!(function = %name, "Registered function");
        self.functions.write().insert(name, Arc::new(function));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RemoteFunction>> {
        self.functions.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.read().contains_key(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.functions.read().keys().cloned().collect()
    }
}

impl std::fmt::Debug for FunctionCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionCatalog")
            .field("functions", &self.names())
            .finish()
    }
}
