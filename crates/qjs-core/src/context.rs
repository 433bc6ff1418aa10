//! QuickJS runtime and context ownership plus the evaluation/accessor façade

use rquickjs_sys::*;
use std::cell::RefCell;
use std::ffi::{c_char, c_int, c_void};
use std::marker::PhantomData;
use std::ops::Deref;
use std::path::Path;
use std::ptr;
use tracing::debug;

use crate::config::ContextConfig;
use crate::error::{QjsError, QjsResult};
use crate::exception::{drain, take_exception, throw_internal};
use crate::function::{self, FunctionId, trampoline};
use crate::memory::{MemoryStats, runtime_memory_stats};
use crate::string::to_cstring;
use crate::value::{QjsValue, QjsValueRef};

/// Default origin label for evaluated source
const DEFAULT_ORIGIN: &str = "<eval>";

/// Per-context bookkeeping reachable through the context opaque pointer
#[derive(Default)]
struct ContextState {
    /// Native functions created through this context, released on drop
    functions: RefCell<Vec<FunctionId>>,
}

/// A borrowed QuickJS execution context
///
/// Carries every evaluation, factory and accessor operation. Owned contexts
/// deref to it, and native functions receive one for the calling context.
/// Values it produces borrow it, so they cannot outlive the context.
///
/// # Thread Safety
///
/// This type is `!Send` and `!Sync` because QuickJS contexts are not
/// thread-safe.
pub struct QjsCtx {
    raw: *mut JSContext,
    /// Marker to make this type !Send + !Sync
    _not_send: PhantomData<*mut ()>,
}

impl QjsCtx {
    /// # Safety
    /// `raw` must be a live context for as long as the view is used
    pub(crate) unsafe fn from_raw(raw: *mut JSContext) -> Self {
        Self {
            raw,
            _not_send: PhantomData,
        }
    }

    /// Get the raw context pointer
    pub fn raw(&self) -> *mut JSContext {
        self.raw
    }

    fn runtime(&self) -> *mut JSRuntime {
        // SAFETY: self.raw is a live context
        unsafe { JS_GetRuntime(self.raw) }
    }

    fn state(&self) -> Option<&ContextState> {
        // SAFETY: the opaque pointer is either null or the ContextState boxed
        // by the owning QjsContext, which outlives every view of it
        unsafe {
            let state = JS_GetContextOpaque(self.raw) as *const ContextState;
            state.as_ref()
        }
    }

    /// Wrap a freshly produced engine value
    ///
    /// # Safety
    /// `raw` must belong to this context and carry one reference
    unsafe fn adopt(&self, raw: JSValue) -> QjsValue<'_> {
        // SAFETY: forwarded caller contract
        unsafe { QjsValue::from_raw(self.raw, raw) }
    }

    /// Wrap a constructor result, translating `JS_EXCEPTION`
    ///
    /// # Safety
    /// Same as [`adopt`](Self::adopt)
    unsafe fn adopt_checked(&self, raw: JSValue) -> QjsResult<QjsValue<'_>> {
        // SAFETY: forwarded caller contract
        unsafe {
            if JS_IsException(raw) {
                return Err(take_exception(self.raw).into_script_error());
            }
            Ok(self.adopt(raw))
        }
    }

    /// Evaluate a JavaScript script and return the result
    pub fn eval(&self, source: &str) -> QjsResult<QjsValue<'_>> {
        self.eval_with_source(source, DEFAULT_ORIGIN)
    }

    /// Evaluate a script with an origin label (shown in stack traces)
    ///
    /// On failure the pending exception is rendered and cleared, leaving the
    /// context ready for the next evaluation.
    pub fn eval_with_source(&self, source: &str, origin: &str) -> QjsResult<QjsValue<'_>> {
        let source_c = to_cstring(source, "script")?;
        let origin_c = to_cstring(origin, "source origin")?;

        // SAFETY: both strings are NUL-terminated, as JS_Eval requires
        unsafe {
            let raw = JS_Eval(
                self.raw,
                source_c.as_ptr(),
                source.len() as _,
                origin_c.as_ptr(),
                JS_EVAL_TYPE_GLOBAL as c_int,
            );
            if JS_IsException(raw) {
                let err = take_exception(self.raw).into_script_error();
                debug!(origin, error_type = err.error_type(), "Script evaluation failed");
                return Err(err);
            }
            Ok(self.adopt(raw))
        }
    }

    /// Read a file and evaluate it with its path as origin label
    pub fn eval_file(&self, path: impl AsRef<Path>) -> QjsResult<QjsValue<'_>> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| QjsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.eval_with_source(&source, &path.to_string_lossy())
    }

    /// Create an undefined value
    pub fn new_undefined(&self) -> QjsValue<'_> {
        // SAFETY: immediate values carry no reference count
        unsafe { self.adopt(JS_UNDEFINED) }
    }

    /// Create a null value
    pub fn new_null(&self) -> QjsValue<'_> {
        // SAFETY: immediate values carry no reference count
        unsafe { self.adopt(JS_NULL) }
    }

    /// Create a boolean value
    pub fn new_bool(&self, b: bool) -> QjsValue<'_> {
        let raw = if b { JS_TRUE } else { JS_FALSE };
        // SAFETY: immediate values carry no reference count
        unsafe { self.adopt(raw) }
    }

    /// Create a number value
    pub fn new_number(&self, n: f64) -> QjsValue<'_> {
        // SAFETY: immediate values carry no reference count
        unsafe { self.adopt(JS_NewFloat64(n)) }
    }

    /// Create an int32 value
    pub fn new_i32(&self, n: i32) -> QjsValue<'_> {
        // SAFETY: immediate values carry no reference count
        unsafe { self.adopt(JS_MKVAL(JS_TAG_INT, n)) }
    }

    /// Create a string value
    pub fn new_string(&self, s: &str) -> QjsResult<QjsValue<'_>> {
        // SAFETY: JS_NewStringLen copies len bytes of UTF-8
        unsafe {
            let raw = JS_NewStringLen(self.raw, s.as_ptr() as *const c_char, s.len() as _);
            self.adopt_checked(raw)
        }
    }

    /// Create an empty object
    pub fn new_object(&self) -> QjsResult<QjsValue<'_>> {
        // SAFETY: self.raw is a live context
        unsafe { self.adopt_checked(JS_NewObject(self.raw)) }
    }

    /// Create an empty array
    pub fn new_array(&self) -> QjsResult<QjsValue<'_>> {
        // SAFETY: self.raw is a live context
        unsafe { self.adopt_checked(JS_NewArray(self.raw)) }
    }

    /// Create an array holding `elements` at indices `0..n`
    pub fn new_array_from<'js>(
        &'js self,
        elements: &[&QjsValueRef<'js>],
    ) -> QjsResult<QjsValue<'js>> {
        let array = self.new_array()?;
        for (i, element) in elements.iter().enumerate() {
            let index = u32::try_from(i)
                .map_err(|_| QjsError::Internal(format!("array index {} out of range", i)))?;
            array.set_element(index, element)?;
        }
        Ok(array)
    }

    /// Parse JSON text with the engine's `JSON.parse`
    pub fn parse_json(&self, json: &str) -> QjsResult<QjsValue<'_>> {
        let json_c = to_cstring(json, "JSON")?;
        // SAFETY: json_c is NUL-terminated, as JS_ParseJSON requires
        unsafe {
            let raw = JS_ParseJSON(self.raw, json_c.as_ptr(), json.len() as _, c"<json>".as_ptr());
            self.adopt_checked(raw)
        }
    }

    /// Convert a serializable Rust value into a script value
    pub fn from_serializable<T: serde::Serialize>(&self, value: &T) -> QjsResult<QjsValue<'_>> {
        let json = serde_json::to_string(value)?;
        self.parse_json(&json)
    }

    /// Get the global object
    pub fn global(&self) -> QjsValue<'_> {
        // SAFETY: JS_GetGlobalObject returns a new reference
        unsafe { self.adopt(JS_GetGlobalObject(self.raw)) }
    }

    /// Get a property from the global object
    pub fn get_global(&self, name: &str) -> QjsResult<QjsValue<'_>> {
        self.global().get_property(name)
    }

    /// Set a property on the global object
    pub fn set_global<'js>(&'js self, name: &str, value: &QjsValueRef<'js>) -> QjsResult<()> {
        self.global().set_property(name, value)
    }

    /// Create a script function backed by a host closure
    ///
    /// The closure stays registered until this context is dropped.
    pub fn new_function<F>(&self, name: &str, function: F) -> QjsResult<QjsValue<'_>>
    where
        F: for<'js> Fn(&'js QjsCtx, &[QjsValueRef<'js>]) -> QjsResult<QjsValue<'js>>
            + Send
            + Sync
            + 'static,
    {
        let id = function::register(function)?;
        match self.create_callable(name, id) {
            Ok(callable) => {
                if let Some(state) = self.state() {
                    state.functions.borrow_mut().push(id);
                }
                Ok(callable)
            }
            Err(err) => {
                function::unregister(id);
                Err(err)
            }
        }
    }

    /// Create a host-backed function and install it as a global
    pub fn set_global_function<F>(&self, name: &str, function: F) -> QjsResult<()>
    where
        F: for<'js> Fn(&'js QjsCtx, &[QjsValueRef<'js>]) -> QjsResult<QjsValue<'js>>
            + Send
            + Sync
            + 'static,
    {
        let callable = self.new_function(name, function)?;
        self.set_global(name, &callable)
    }

    /// Create a script callable tagged with an already registered id
    ///
    /// The id is not tied to this context; the caller decides when to
    /// [`unregister`](crate::function::unregister) it.
    pub fn create_callable(&self, name: &str, id: FunctionId) -> QjsResult<QjsValue<'_>> {
        let name_value = self.new_string(name)?;

        // SAFETY: trampoline matches JSCFunctionData; no data slots are used
        let callable = unsafe {
            let raw = JS_NewCFunctionData(
                self.raw,
                Some(trampoline),
                0,
                id.get(),
                0,
                ptr::null_mut(),
            );
            self.adopt_checked(raw)?
        };

        // SAFETY: JS_DefinePropertyValueStr consumes the name reference
        unsafe {
            if JS_DefinePropertyValueStr(
                self.raw,
                callable.raw(),
                c"name".as_ptr(),
                name_value.into_raw(),
                JS_PROP_CONFIGURABLE as c_int,
            ) < 0
            {
                return Err(QjsError::Property {
                    name: "name".to_string(),
                    message: take_exception(self.raw).render(),
                });
            }
        }
        Ok(callable)
    }

    /// Whether an exception is pending
    pub fn has_exception(&self) -> bool {
        // SAFETY: self.raw is a live context
        unsafe { JS_HasException(self.raw) }
    }

    /// Take the pending exception, clearing it
    pub fn take_exception(&self) -> Option<QjsValue<'_>> {
        // SAFETY: JS_GetException transfers ownership of the exception
        unsafe {
            let raw = JS_GetException(self.raw);
            if JS_IsUninitialized(raw) {
                return None;
            }
            Some(self.adopt(raw))
        }
    }

    /// Render and clear the pending exception
    ///
    /// Returns `"No exception"` when nothing is pending.
    pub fn exception_string(&self) -> String {
        if !self.has_exception() {
            return "No exception".to_string();
        }
        // SAFETY: self.raw is a live context
        unsafe { take_exception(self.raw).render() }
    }

    /// Make an `InternalError` with `message` pending
    ///
    /// Meant for native functions: `return Err(ctx.throw_exception("..."))`
    /// reports this exact exception to the calling script.
    pub fn throw_exception(&self, message: &str) -> QjsError {
        // SAFETY: self.raw is a live context
        unsafe { throw_internal(self.raw, message) };
        QjsError::Exception
    }

    /// Discard the pending exception, if any
    pub fn clear_exception(&self) {
        // SAFETY: self.raw is a live context
        unsafe { drain(self.raw) }
    }

    /// Run a full garbage collection cycle
    pub fn run_gc(&self) {
        // SAFETY: the runtime outlives the context view
        unsafe { JS_RunGC(self.runtime()) }
    }

    /// Bytes currently in use by the runtime
    pub fn memory_usage(&self) -> usize {
        usize::try_from(self.memory_stats().memory_used_size).unwrap_or(usize::MAX)
    }

    /// Detailed allocator and object counters
    pub fn memory_stats(&self) -> MemoryStats {
        runtime_memory_stats(self.runtime())
    }
}

/// An owned QuickJS runtime with its single execution context
///
/// Dereferences to [`QjsCtx`] for evaluation and value construction.
///
/// # Thread Safety
///
/// This type is `!Send` and `!Sync` because QuickJS runtimes are not
/// thread-safe.
pub struct QjsContext {
    scope: QjsCtx,
    runtime: *mut JSRuntime,
    state: Box<ContextState>,
}

impl QjsContext {
    /// Create a context with engine defaults
    pub fn new() -> QjsResult<Self> {
        Self::with_config(&ContextConfig::default())
    }

    /// Create a context with the given runtime limits
    pub fn with_config(config: &ContextConfig) -> QjsResult<Self> {
        // SAFETY: every pointer is checked before use and released on the
        // failure path
        unsafe {
            let runtime = JS_NewRuntime();
            if runtime.is_null() {
                return Err(QjsError::RuntimeInit);
            }

            if let Some(bytes) = config.max_stack_size {
                JS_SetMaxStackSize(runtime, bytes as _);
            }
            if let Some(bytes) = config.memory_limit {
                JS_SetMemoryLimit(runtime, bytes as _);
            }
            if let Some(bytes) = config.gc_threshold {
                JS_SetGCThreshold(runtime, bytes as _);
            }

            let raw = JS_NewContext(runtime);
            if raw.is_null() {
                JS_FreeRuntime(runtime);
                return Err(QjsError::ContextInit);
            }

            let state = Box::new(ContextState::default());
            JS_SetContextOpaque(raw, &*state as *const ContextState as *mut c_void);

            debug!(
                max_stack_size = ?config.max_stack_size,
                memory_limit = ?config.memory_limit,
                gc_threshold = ?config.gc_threshold,
                "Created QuickJS context"
            );

            Ok(Self {
                scope: QjsCtx::from_raw(raw),
                runtime,
                state,
            })
        }
    }

    /// Get the raw runtime pointer
    pub fn raw_runtime(&self) -> *mut JSRuntime {
        self.runtime
    }

    /// Set the maximum interpreter stack size in bytes
    pub fn set_max_stack_size(&self, bytes: usize) {
        // SAFETY: self.runtime is live
        unsafe { JS_SetMaxStackSize(self.runtime, bytes as _) }
    }

    /// Set the heap limit in bytes
    pub fn set_memory_limit(&self, bytes: usize) {
        // SAFETY: self.runtime is live
        unsafe { JS_SetMemoryLimit(self.runtime, bytes as _) }
    }

    /// Set the automatic GC threshold in bytes
    pub fn set_gc_threshold(&self, bytes: usize) {
        // SAFETY: self.runtime is live
        unsafe { JS_SetGCThreshold(self.runtime, bytes as _) }
    }

    /// Ids of the native functions created through this context
    pub fn function_ids(&self) -> Vec<FunctionId> {
        self.state.functions.borrow().clone()
    }
}

impl Deref for QjsContext {
    type Target = QjsCtx;

    fn deref(&self) -> &QjsCtx {
        &self.scope
    }
}

impl Drop for QjsContext {
    fn drop(&mut self) {
        let functions = self.state.functions.take();
        // SAFETY: every value borrowing this context has been dropped;
        // the context goes before its runtime
        unsafe {
            if !self.scope.raw.is_null() {
                JS_FreeContext(self.scope.raw);
            }
            if !self.runtime.is_null() {
                JS_FreeRuntime(self.runtime);
            }
        }
        // The engine no longer holds callables tagged with these ids.
        let released = function::unregister_all(&functions);
        debug!(functions = released, "Released QuickJS context");
    }
}
