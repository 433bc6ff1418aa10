//! Translation between engine exceptions and [`QjsError`]
//!
//! Engine to host: the pending exception is taken (which clears the
//! engine's slot), rendered and freed. Host to engine: a message becomes a
//! pending `InternalError`.

use rquickjs_sys::*;

use crate::error::QjsError;
use crate::string::{EngineString, message_cstring};

/// Message used when the exception itself cannot be rendered
const FALLBACK_MESSAGE: &str = "Unknown exception";

/// Rendered form of an engine exception
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExceptionInfo {
    pub error_type: String,
    pub message: String,
    pub stack: Option<String>,
}

impl ExceptionInfo {
    /// `"TypeError: message"`, the same text `String(error)` yields in script
    pub fn render(&self) -> String {
        if self.message.is_empty() {
            self.error_type.clone()
        } else {
            format!("{}: {}", self.error_type, self.message)
        }
    }

    pub fn into_script_error(self) -> QjsError {
        QjsError::Script {
            error_type: self.error_type,
            message: self.message,
            stack: self.stack,
        }
    }
}

/// Take, render and clear the pending exception.
///
/// When nothing is pending the fallback message is returned, so callers can
/// use this on every engine failure path.
///
/// # Safety
/// `ctx` must be a live context
pub(crate) unsafe fn take_exception(ctx: *mut JSContext) -> ExceptionInfo {
    // SAFETY: ctx is valid per caller contract; the taken value is owned
    // here and freed below
    unsafe {
        let exception = JS_GetException(ctx);
        if JS_IsUninitialized(exception) {
            return ExceptionInfo {
                error_type: "Error".to_string(),
                message: FALLBACK_MESSAGE.to_string(),
                stack: None,
            };
        }
        let info = describe(ctx, exception);
        JS_FreeValue(ctx, exception);
        info
    }
}

/// Render an exception value without consuming it.
///
/// Anything raised while reading it is drained, so the context's exception
/// slot is empty when this returns.
///
/// # Safety
/// `ctx` must be a live context and `exception` must belong to it
pub(crate) unsafe fn describe(ctx: *mut JSContext, exception: JSValue) -> ExceptionInfo {
    // SAFETY: ctx and exception are valid per caller contract
    unsafe {
        if JS_IsError(ctx, exception) {
            let error_type = string_property(ctx, exception, c"name")
                .unwrap_or_else(|| "Error".to_string());
            let message = string_property(ctx, exception, c"message").unwrap_or_default();
            let stack = string_property(ctx, exception, c"stack").filter(|s| !s.is_empty());
            ExceptionInfo {
                error_type,
                message,
                stack,
            }
        } else {
            // Primitive exception (throw "string" or throw 42)
            let message = coerce_to_string(ctx, exception)
                .unwrap_or_else(|| FALLBACK_MESSAGE.to_string());
            ExceptionInfo {
                error_type: "Error".to_string(),
                message,
                stack: None,
            }
        }
    }
}

/// Make an `InternalError` carrying `message` pending and return `JS_EXCEPTION`
///
/// # Safety
/// `ctx` must be a live context
pub(crate) unsafe fn throw_internal(ctx: *mut JSContext, message: &str) -> JSValue {
    let message = message_cstring(message);
    // SAFETY: ctx is valid; the "%s" format consumes exactly one C string
    unsafe { JS_ThrowInternalError(ctx, c"%s".as_ptr(), message.as_ptr()) }
}

/// Discard whatever exception is pending
///
/// # Safety
/// `ctx` must be a live context
pub(crate) unsafe fn drain(ctx: *mut JSContext) {
    // SAFETY: ctx is valid; JS_GetException hands over ownership, freeing
    // the uninitialized sentinel is a no-op
    unsafe {
        let exception = JS_GetException(ctx);
        JS_FreeValue(ctx, exception);
    }
}

/// Coerce to string, draining any exception raised by `toString`
unsafe fn coerce_to_string(ctx: *mut JSContext, value: JSValue) -> Option<String> {
    // SAFETY: ctx and value are valid per caller contract
    unsafe {
        match EngineString::from_value(ctx, value) {
            Some(s) => Some(s.to_string_lossy()),
            None => {
                drain(ctx);
                None
            }
        }
    }
}

/// Read a property as a string; `None` if missing, undefined or throwing
unsafe fn string_property(
    ctx: *mut JSContext,
    object: JSValue,
    name: &std::ffi::CStr,
) -> Option<String> {
    // SAFETY: ctx and object are valid per caller contract; the property
    // value is owned here and freed before returning
    unsafe {
        let value = JS_GetPropertyStr(ctx, object, name.as_ptr());
        if JS_IsException(value) {
            drain(ctx);
            return None;
        }
        let result = if JS_IsUndefined(value) {
            None
        } else {
            coerce_to_string(ctx, value)
        };
        JS_FreeValue(ctx, value);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QjsContext;

    #[test]
    fn test_take_error_object() {
        let ctx = QjsContext::new().unwrap();
        let value = unsafe {
            let src = c"throw new TypeError('bad thing')";
            JS_Eval(
                ctx.raw(),
                src.as_ptr(),
                src.to_bytes().len() as _,
                c"<test>".as_ptr(),
                JS_EVAL_TYPE_GLOBAL as i32,
            )
        };
        assert!(unsafe { JS_IsException(value) });

        let info = unsafe { take_exception(ctx.raw()) };
        assert_eq!(info.error_type, "TypeError");
        assert_eq!(info.message, "bad thing");
        assert_eq!(info.render(), "TypeError: bad thing");
        assert!(!ctx.has_exception());
    }

    #[test]
    fn test_take_primitive_exception() {
        let ctx = QjsContext::new().unwrap();
        let err = ctx.eval("throw 42").unwrap_err();
        assert_eq!(err.to_string(), "Error: 42");
    }

    #[test]
    fn test_take_without_pending_exception() {
        let ctx = QjsContext::new().unwrap();
        let info = unsafe { take_exception(ctx.raw()) };
        assert_eq!(info.message, FALLBACK_MESSAGE);
    }

    #[test]
    fn test_unrenderable_exception_uses_fallback() {
        let ctx = QjsContext::new().unwrap();
        let err = ctx
            .eval("throw { toString() { throw new Error('nested'); } }")
            .unwrap_err();
        match err {
            QjsError::Script { message, .. } => assert_eq!(message, FALLBACK_MESSAGE),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!ctx.has_exception());
    }

    #[test]
    fn test_throw_internal() {
        let ctx = QjsContext::new().unwrap();
        let ret = unsafe { throw_internal(ctx.raw(), "host failure") };
        assert!(unsafe { JS_IsException(ret) });
        assert!(ctx.has_exception());

        let info = unsafe { take_exception(ctx.raw()) };
        assert_eq!(info.error_type, "InternalError");
        assert_eq!(info.message, "host failure");
        assert!(!ctx.has_exception());
    }

    #[test]
    fn test_error_with_empty_message_renders_type() {
        let info = ExceptionInfo {
            error_type: "Error".into(),
            message: String::new(),
            stack: None,
        };
        assert_eq!(info.render(), "Error");
    }
}
