//! RAII wrapper for engine-owned C strings

use rquickjs_sys::*;
use std::ffi::{CString, c_char};
use std::marker::PhantomData;
use std::slice;

use crate::error::{QjsError, QjsResult};

/// UTF-8 bytes produced by `JS_ToCStringLen`, released with `JS_FreeCString`
pub(crate) struct EngineString {
    ctx: *mut JSContext,
    ptr: *const c_char,
    len: usize,
    /// Marker to make this type !Send + !Sync
    _not_send: PhantomData<*mut ()>,
}

impl EngineString {
    /// Coerce `value` to a string.
    ///
    /// Returns `None` when the coercion raised; the exception is left
    /// pending for the caller to translate.
    ///
    /// # Safety
    /// `ctx` must be a live context and `value` must belong to it
    pub(crate) unsafe fn from_value(ctx: *mut JSContext, value: JSValue) -> Option<Self> {
        let mut len: usize = 0;
        // SAFETY: ctx and value are valid per caller contract
        let ptr = unsafe { JS_ToCStringLen(ctx, &mut len, value) };
        if ptr.is_null() {
            return None;
        }
        Some(Self {
            ctx,
            ptr,
            len,
            _not_send: PhantomData,
        })
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        // SAFETY: ptr points at len initialized bytes owned by the engine
        // until JS_FreeCString runs in Drop
        unsafe { slice::from_raw_parts(self.ptr as *const u8, self.len) }
    }

    /// Copy into a Rust string; lone surrogates become U+FFFD
    pub(crate) fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }
}

impl Drop for EngineString {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            // SAFETY: ptr came from JS_ToCStringLen on this ctx
            unsafe { JS_FreeCString(self.ctx, self.ptr) };
        }
    }
}

/// NUL-terminated copy of `s` for the C API; `what` names the input in errors
pub(crate) fn to_cstring(s: &str, what: &str) -> QjsResult<CString> {
    CString::new(s).map_err(|e| QjsError::Internal(format!("Invalid {}: {}", what, e)))
}

/// NUL-terminated copy of an error message, replacing interior NULs
pub(crate) fn message_cstring(message: &str) -> CString {
    let cleaned = message.replace('\0', "\u{FFFD}");
    CString::new(cleaned).unwrap_or_default()
}
