//! Native function bridge
//!
//! QuickJS native callables carry only a small integer (`magic`) across the
//! C call boundary, so host closures live in a process-wide registry keyed
//! by [`FunctionId`]. The engine hands the id back to [`trampoline`] on every
//! call, which looks the closure up, runs it and marshals the outcome.
//!
//! Closures registered through [`QjsCtx::new_function`] are removed when
//! their context is dropped. Ids obtained from [`register`] directly are
//! owned by the caller and stay registered until [`unregister`] is called.

use parking_lot::Mutex;
use rquickjs_sys::*;
use std::any::Any;
use std::collections::HashMap;
use std::ffi::c_int;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, LazyLock};
use tracing::{debug, trace, warn};

use crate::context::QjsCtx;
use crate::error::{QjsError, QjsResult};
use crate::exception::throw_internal;
use crate::value::{QjsValue, QjsValueRef};

/// A host closure callable from script.
///
/// Receives the calling context and borrowed arguments. Returning `Err`
/// raises an `InternalError` carrying the error's message in script, unless
/// the closure already made an exception pending (see
/// [`QjsCtx::throw_exception`]).
pub type NativeFunction = dyn for<'js> Fn(&'js QjsCtx, &[QjsValueRef<'js>]) -> QjsResult<QjsValue<'js>>
    + Send
    + Sync
    + 'static;

/// Identifier of a registered native function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(i32);

impl FunctionId {
    /// The tag passed to the engine
    pub fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static REGISTRY: LazyLock<Mutex<HashMap<FunctionId, Arc<NativeFunction>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Ids start at 1 and are never reused within a process
static NEXT_FUNCTION_ID: AtomicI32 = AtomicI32::new(1);

/// Store a closure in the registry and return its id
pub fn register<F>(function: F) -> QjsResult<FunctionId>
where
    F: for<'js> Fn(&'js QjsCtx, &[QjsValueRef<'js>]) -> QjsResult<QjsValue<'js>>
        + Send
        + Sync
        + 'static,
{
    let id = NEXT_FUNCTION_ID
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_add(1))
        .map(FunctionId)
        .map_err(|_| QjsError::Internal("native function ids exhausted".to_string()))?;

    let entry: Arc<NativeFunction> = Arc::new(function);
    REGISTRY.lock().insert(id, entry);
    trace!(id = id.get(), "Registered native function");
    Ok(id)
}

/// Remove a closure; returns whether it was registered
///
/// Script callables still tagged with `id` raise
/// `InternalError: native function not found` afterwards.
pub fn unregister(id: FunctionId) -> bool {
    // Dropped after the guard so captured state may call back into the registry
    let removed = REGISTRY.lock().remove(&id);
    let found = removed.is_some();
    if found {
        trace!(id = id.get(), "Unregistered native function");
    }
    drop(removed);
    found
}

/// Remove several closures under one lock; returns how many were registered
pub(crate) fn unregister_all(ids: &[FunctionId]) -> usize {
    let removed: Vec<Arc<NativeFunction>> = {
        let mut registry = REGISTRY.lock();
        ids.iter().filter_map(|id| registry.remove(id)).collect()
    };
    removed.len()
}

/// Whether `id` currently maps to a closure
pub fn is_registered(id: FunctionId) -> bool {
    REGISTRY.lock().contains_key(&id)
}

/// Number of closures currently registered across all contexts
pub fn registered_count() -> usize {
    REGISTRY.lock().len()
}

fn lookup(id: FunctionId) -> Option<Arc<NativeFunction>> {
    REGISTRY.lock().get(&id).cloned()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Entry point the engine calls for every native callable.
///
/// Nothing unwinds out of this function: closure errors and panics are
/// turned into pending `InternalError`s. An exception left pending by the
/// closure always wins over its return value.
pub(crate) unsafe extern "C" fn trampoline(
    ctx: *mut JSContext,
    _this: JSValue,
    argc: c_int,
    argv: *mut JSValue,
    magic: c_int,
    _data: *mut JSValue,
) -> JSValue {
    let id = FunctionId(magic);
    // The registry lock is released before the closure runs so it can
    // register further functions.
    let Some(function) = lookup(id) else {
        warn!(id = magic, "Native function not found");
        // SAFETY: ctx is the calling context
        return unsafe { throw_internal(ctx, &format!("native function not found: {}", id)) };
    };

    // SAFETY: the engine keeps ctx alive for the duration of the call
    let scope = unsafe { QjsCtx::from_raw(ctx) };
    let count = usize::try_from(argc).unwrap_or(0);
    let args: Vec<QjsValueRef<'_>> = if argv.is_null() {
        Vec::new()
    } else {
        (0..count)
            // SAFETY: argv holds argc values owned by the engine for the call
            .map(|i| unsafe { QjsValueRef::borrowed(ctx, *argv.add(i)) })
            .collect()
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| function(&scope, &args)));

    match outcome {
        Ok(Ok(value)) => {
            // SAFETY: ctx is the calling context
            if unsafe { JS_HasException(ctx) } {
                debug!(id = magic, "Native function returned a value with an exception pending");
                drop(value);
                JS_EXCEPTION
            } else {
                value.into_raw()
            }
        }
        Ok(Err(QjsError::Exception)) => {
            // SAFETY: ctx is the calling context
            unsafe {
                if JS_HasException(ctx) {
                    JS_EXCEPTION
                } else {
                    throw_internal(ctx, "native function reported an exception without throwing one")
                }
            }
        }
        Ok(Err(err)) => {
            // SAFETY: ctx is the calling context
            unsafe {
                if JS_HasException(ctx) {
                    JS_EXCEPTION
                } else {
                    debug!(id = magic, error = %err, "Native function returned an error");
                    throw_internal(ctx, &err.to_string())
                }
            }
        }
        Err(payload) => {
            let message = panic_message(&*payload);
            warn!(id = magic, panic = %message, "Native function panicked");
            // SAFETY: ctx is the calling context
            unsafe { throw_internal(ctx, &format!("native function panicked: {}", message)) }
        }
    }
}
