//! Runtime limits applied when a context is created.

use serde::Deserialize;

use crate::error::QjsResult;

/// Limits applied to the runtime backing a [`QjsContext`](crate::QjsContext).
///
/// Every field is optional; `None` keeps the engine default (1 MiB stack,
/// no memory limit, engine-chosen GC threshold).
///
/// # Example
///
/// ```
/// use qjs_core::{ContextConfig, QjsContext};
///
/// let config = ContextConfig::new()
///     .max_stack_size(512 * 1024)
///     .memory_limit(32 * 1024 * 1024);
/// let ctx = QjsContext::with_config(&config).unwrap();
/// assert_eq!(ctx.eval("1 + 1").unwrap().to_i32().unwrap(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContextConfig {
    /// Maximum native stack the interpreter may use, in bytes.
    /// Exceeding it raises `RangeError: Maximum call stack size exceeded`.
    pub max_stack_size: Option<usize>,

    /// Heap limit in bytes. Allocation past it raises `InternalError: out of memory`.
    pub memory_limit: Option<usize>,

    /// Allocation volume that triggers an automatic GC cycle.
    pub gc_threshold: Option<usize>,
}

impl ContextConfig {
    /// Create a config with engine defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum stack size in bytes.
    pub fn max_stack_size(mut self, bytes: usize) -> Self {
        self.max_stack_size = Some(bytes);
        self
    }

    /// Set the heap limit in bytes.
    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Set the GC threshold in bytes.
    pub fn gc_threshold(mut self, bytes: usize) -> Self {
        self.gc_threshold = Some(bytes);
        self
    }

    /// Parse a config from JSON, e.g. a section of a host config file.
    ///
    /// Keys are camelCase (`maxStackSize`, `memoryLimit`, `gcThreshold`);
    /// missing keys keep their defaults.
    pub fn from_json(json: &str) -> QjsResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
