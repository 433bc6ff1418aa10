//! Owned and borrowed handles to QuickJS values
//!
//! QuickJS values are manually reference counted. [`QjsValue`] owns exactly
//! one reference and releases it on drop; [`QjsValueRef`] is a borrowed view
//! that never releases. An owned handle derefs to its borrowed view, the same
//! way `String` derefs to `str`, so every query and call is available on both.

use rquickjs_sys::*;
use std::ffi::c_int;
use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::Deref;

use crate::context::QjsCtx;
use crate::error::{QjsError, QjsResult};
use crate::exception::{drain, take_exception};
use crate::string::{EngineString, to_cstring};

/// A borrowed view of a JavaScript value
///
/// Only ever handed out behind a reference: native function arguments, or
/// the target of a [`QjsValue`] deref. It never touches the reference count.
///
/// # Thread Safety
///
/// This type is `!Send` and `!Sync` because QuickJS values are tied to
/// their runtime's thread.
pub struct QjsValueRef<'js> {
    ctx: *mut JSContext,
    value: JSValue,
    _scope: PhantomData<&'js QjsCtx>,
    /// Marker to make this type !Send + !Sync
    _not_send: PhantomData<*mut ()>,
}

/// An owned JavaScript value
///
/// Holds one counted reference, released exactly once on drop. `Clone`
/// duplicates the reference; moving transfers it.
///
/// # Thread Safety
///
/// This type is `!Send` and `!Sync` because QuickJS values are tied to
/// their runtime's thread.
pub struct QjsValue<'js> {
    inner: QjsValueRef<'js>,
}

impl<'js> QjsValueRef<'js> {
    /// Borrow a raw value without taking a reference
    ///
    /// # Safety
    /// `value` must stay alive for `'js` and belong to `ctx`
    pub unsafe fn borrowed(ctx: *mut JSContext, value: JSValue) -> Self {
        Self {
            ctx,
            value,
            _scope: PhantomData,
            _not_send: PhantomData,
        }
    }

    /// Get the raw value
    pub fn raw(&self) -> JSValue {
        self.value
    }

    /// Get the raw context the value belongs to
    pub fn context(&self) -> *mut JSContext {
        self.ctx
    }

    /// Duplicate into an independent owned handle
    pub fn to_owned_value(&self) -> QjsValue<'js> {
        // SAFETY: self.value is live; the duplicate is owned by the new handle
        unsafe { QjsValue::dup_from(self.ctx, self.value) }
    }

    /// Check if the value is undefined
    pub fn is_undefined(&self) -> bool {
        // SAFETY: tag inspection only
        unsafe { JS_IsUndefined(self.value) }
    }

    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        // SAFETY: tag inspection only
        unsafe { JS_IsNull(self.value) }
    }

    /// Check if the value is a boolean
    pub fn is_bool(&self) -> bool {
        // SAFETY: tag inspection only
        unsafe { JS_IsBool(self.value) }
    }

    /// Check if the value is a number (int or float)
    pub fn is_number(&self) -> bool {
        // SAFETY: tag inspection only
        unsafe { JS_IsNumber(self.value) }
    }

    /// Check if the value is a string
    pub fn is_string(&self) -> bool {
        // SAFETY: tag inspection only
        unsafe { JS_IsString(self.value) }
    }

    /// Check if the value is an object (functions and arrays included)
    pub fn is_object(&self) -> bool {
        // SAFETY: tag inspection only
        unsafe { JS_IsObject(self.value) }
    }

    /// Check if the value is callable
    pub fn is_function(&self) -> bool {
        // SAFETY: self.ctx and self.value are valid
        unsafe { JS_IsFunction(self.ctx, self.value) }
    }

    /// Check if the value is an array
    pub fn is_array(&self) -> bool {
        // SAFETY: self.ctx and self.value are valid
        unsafe {
            match JS_IsArray(self.ctx, self.value) {
                r if r < 0 => {
                    // revoked proxy
                    drain(self.ctx);
                    false
                }
                r => r != 0,
            }
        }
    }

    /// Check if the value is an `Error` instance
    pub fn is_error(&self) -> bool {
        // SAFETY: self.ctx and self.value are valid
        unsafe { JS_IsError(self.ctx, self.value) }
    }

    /// Convert to boolean (ToBoolean)
    pub fn to_bool(&self) -> QjsResult<bool> {
        // SAFETY: self.ctx and self.value are valid
        let r = unsafe { JS_ToBool(self.ctx, self.value) };
        if r < 0 {
            return Err(self.conversion_error("bool"));
        }
        Ok(r != 0)
    }

    /// Convert to a 32-bit integer (ToInt32)
    pub fn to_i32(&self) -> QjsResult<i32> {
        let mut out = 0i32;
        // SAFETY: self.ctx and self.value are valid, out is a valid slot
        let r = unsafe { JS_ToInt32(self.ctx, &mut out, self.value) };
        if r < 0 {
            return Err(self.conversion_error("int32"));
        }
        Ok(out)
    }

    /// Convert to number (ToNumber)
    pub fn to_number(&self) -> QjsResult<f64> {
        let mut out = 0f64;
        // SAFETY: self.ctx and self.value are valid, out is a valid slot
        let r = unsafe { JS_ToFloat64(self.ctx, &mut out, self.value) };
        if r < 0 {
            return Err(self.conversion_error("number"));
        }
        Ok(out)
    }

    /// Convert to string (ToString)
    pub fn to_string(&self) -> QjsResult<String> {
        // SAFETY: self.ctx and self.value are valid
        match unsafe { EngineString::from_value(self.ctx, self.value) } {
            Some(s) => Ok(s.to_string_lossy()),
            None => Err(self.conversion_error("string")),
        }
    }

    /// Convert to JSON string (`JSON.stringify`)
    pub fn to_json(&self) -> QjsResult<String> {
        // SAFETY: self.ctx and self.value are valid; the result is owned
        // by the temporary handle
        let json = unsafe {
            let raw = JS_JSONStringify(self.ctx, self.value, JS_UNDEFINED, JS_UNDEFINED);
            if JS_IsException(raw) {
                return Err(self.conversion_error("JSON"));
            }
            QjsValue::from_raw(self.ctx, raw)
        };
        if json.is_undefined() {
            return Err(QjsError::Conversion {
                target: "JSON",
                message: "value has no JSON representation".to_string(),
            });
        }
        json.to_string()
    }

    /// Deserialize from JSON to Rust type
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> QjsResult<T> {
        let json = self.to_json()?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Get a named property
    pub fn get_property(&self, name: &str) -> QjsResult<QjsValue<'js>> {
        let name_c = to_cstring(name, "property name")?;
        // SAFETY: self.ctx and self.value are valid, name_c is NUL-terminated
        unsafe {
            let raw = JS_GetPropertyStr(self.ctx, self.value, name_c.as_ptr());
            if JS_IsException(raw) {
                return Err(QjsError::Property {
                    name: name.to_string(),
                    message: take_exception(self.ctx).render(),
                });
            }
            Ok(QjsValue::from_raw(self.ctx, raw))
        }
    }

    /// Set a named property
    pub fn set_property(&self, name: &str, value: &QjsValueRef<'js>) -> QjsResult<()> {
        self.check_same_context(value)?;
        let name_c = to_cstring(name, "property name")?;
        // SAFETY: the engine consumes one reference, so hand it a duplicate
        unsafe {
            let dup = JS_DupValue(self.ctx, value.value);
            if JS_SetPropertyStr(self.ctx, self.value, name_c.as_ptr(), dup) < 0 {
                return Err(QjsError::Property {
                    name: name.to_string(),
                    message: take_exception(self.ctx).render(),
                });
            }
        }
        Ok(())
    }

    /// Get an indexed element
    pub fn get_element(&self, index: u32) -> QjsResult<QjsValue<'js>> {
        // SAFETY: self.ctx and self.value are valid
        unsafe {
            let raw = JS_GetPropertyUint32(self.ctx, self.value, index);
            if JS_IsException(raw) {
                return Err(QjsError::Index {
                    index,
                    message: take_exception(self.ctx).render(),
                });
            }
            Ok(QjsValue::from_raw(self.ctx, raw))
        }
    }

    /// Set an indexed element
    pub fn set_element(&self, index: u32, value: &QjsValueRef<'js>) -> QjsResult<()> {
        self.check_same_context(value)?;
        // SAFETY: the engine consumes one reference, so hand it a duplicate
        unsafe {
            let dup = JS_DupValue(self.ctx, value.value);
            if JS_SetPropertyUint32(self.ctx, self.value, index, dup) < 0 {
                return Err(QjsError::Index {
                    index,
                    message: take_exception(self.ctx).render(),
                });
            }
        }
        Ok(())
    }

    /// Read `length` as a non-negative integer
    pub fn array_length(&self) -> QjsResult<usize> {
        let length = self.get_property("length")?.to_number()?;
        if !(length >= 0.0 && length.fract() == 0.0 && length <= u32::MAX as f64) {
            return Err(QjsError::Conversion {
                target: "array length",
                message: format!("length is {}", length),
            });
        }
        Ok(length as usize)
    }

    /// Call the value as a function with `this` undefined
    pub fn call(&self, args: &[&QjsValueRef<'js>]) -> QjsResult<QjsValue<'js>> {
        // SAFETY: undefined is not reference counted
        let this = unsafe { QjsValueRef::borrowed(self.ctx, JS_UNDEFINED) };
        self.call_with_this(&this, args)
    }

    /// Call the value as a function with an explicit receiver
    ///
    /// Arguments are lent to the callee for the duration of the call.
    pub fn call_with_this(
        &self,
        this: &QjsValueRef<'js>,
        args: &[&QjsValueRef<'js>],
    ) -> QjsResult<QjsValue<'js>> {
        if !self.is_function() {
            return Err(QjsError::Call("value is not a function".to_string()));
        }
        self.check_same_context(this)?;
        let mut raw_args = Vec::with_capacity(args.len());
        for arg in args {
            self.check_same_context(arg)?;
            raw_args.push(arg.value);
        }
        let argc = c_int::try_from(raw_args.len())
            .map_err(|_| QjsError::Call(format!("too many arguments: {}", raw_args.len())))?;

        // SAFETY: every raw arg is kept alive by its handle for the whole
        // call; JS_Call does not take ownership of argv
        unsafe {
            let raw = JS_Call(
                self.ctx,
                self.value,
                this.value,
                argc,
                raw_args.as_mut_ptr(),
            );
            if JS_IsException(raw) {
                return Err(QjsError::Call(take_exception(self.ctx).render()));
            }
            Ok(QjsValue::from_raw(self.ctx, raw))
        }
    }

    /// Resolve `name` on this value and call it with this value as receiver
    pub fn call_method(&self, name: &str, args: &[&QjsValueRef<'js>]) -> QjsResult<QjsValue<'js>> {
        let method = self
            .get_property(name)
            .map_err(|e| QjsError::Call(format!("cannot resolve method '{}': {}", name, e)))?;
        if !method.is_function() {
            return Err(QjsError::Call(format!("'{}' is not a function", name)));
        }
        method.call_with_this(self, args)
    }

    fn check_same_context(&self, other: &QjsValueRef<'_>) -> QjsResult<()> {
        if other.ctx != self.ctx {
            return Err(QjsError::Internal(
                "value belongs to a different context".to_string(),
            ));
        }
        Ok(())
    }

    fn conversion_error(&self, target: &'static str) -> QjsError {
        // SAFETY: self.ctx is valid; a failed coercion left an exception
        let info = unsafe { take_exception(self.ctx) };
        QjsError::Conversion {
            target,
            message: info.render(),
        }
    }
}

impl fmt::Debug for QjsValueRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_function() {
            write!(f, "QjsValue(<function>)")
        } else if self.is_object() {
            write!(f, "QjsValue(<object>)")
        } else {
            match self.to_string() {
                Ok(s) => write!(f, "QjsValue({})", s),
                Err(_) => write!(f, "QjsValue(<opaque>)"),
            }
        }
    }
}

impl<'js> QjsValue<'js> {
    /// Adopt a reference the caller already owns
    ///
    /// # Safety
    /// `value` must belong to `ctx`, carry one reference that is transferred
    /// to the handle, and `ctx` must outlive `'js`
    pub unsafe fn from_raw(ctx: *mut JSContext, value: JSValue) -> Self {
        Self {
            // SAFETY: forwarded caller contract
            inner: unsafe { QjsValueRef::borrowed(ctx, value) },
        }
    }

    /// Duplicate a borrowed raw value and own the new reference
    ///
    /// # Safety
    /// `value` must be live, belong to `ctx`, and `ctx` must outlive `'js`
    pub unsafe fn dup_from(ctx: *mut JSContext, value: JSValue) -> Self {
        // SAFETY: forwarded caller contract
        unsafe { Self::from_raw(ctx, JS_DupValue(ctx, value)) }
    }

    /// Give up ownership and return the raw value without releasing it
    pub fn into_raw(self) -> JSValue {
        let this = ManuallyDrop::new(self);
        this.inner.value
    }
}

impl<'js> Deref for QjsValue<'js> {
    type Target = QjsValueRef<'js>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl Clone for QjsValue<'_> {
    fn clone(&self) -> Self {
        self.inner.to_owned_value()
    }
}

impl Drop for QjsValue<'_> {
    fn drop(&mut self) {
        if !self.inner.ctx.is_null() {
            // SAFETY: the handle owns exactly one reference
            unsafe { JS_FreeValue(self.inner.ctx, self.inner.value) };
        }
    }
}

impl fmt::Debug for QjsValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}
