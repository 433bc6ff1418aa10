// Allow raw pointer dereference in public functions - this is an FFI wrapper
// where raw context pointers come from values this crate created.
#![allow(clippy::not_unsafe_ptr_arg_deref)]

//! Safe handles and a native function bridge for QuickJS.
//!
//! This crate wraps the raw QuickJS FFI from `rquickjs-sys` in RAII types:
//! [`QjsContext`] owns a runtime and its context, [`QjsValue`] owns one
//! reference to a script value, and [`QjsValueRef`] borrows one. Host
//! closures become script functions through a process-wide registry and a
//! trampoline that never lets a panic cross into the engine.
//!
//! # Example
//!
//! ```
//! use qjs_core::{QjsContext, QjsError};
//!
//! let ctx = QjsContext::new().unwrap();
//! ctx.set_global_function("multiply", |ctx, args| {
//!     if args.len() != 2 {
//!         return Err(QjsError::native("multiply expects 2 arguments"));
//!     }
//!     let product = args[0].to_number()? * args[1].to_number()?;
//!     Ok(ctx.new_number(product))
//! })
//! .unwrap();
//!
//! let result = ctx.eval("multiply(6, 7)").unwrap();
//! assert_eq!(result.to_number().unwrap(), 42.0);
//!
//! let err = ctx.eval("multiply(1)").unwrap_err();
//! assert!(err.to_string().contains("multiply expects 2 arguments"));
//! ```
//!
//! # Errors
//!
//! Engine exceptions are drained at the first API boundary they cross and
//! come back as [`QjsError`]. After any `Err`, the context has no pending
//! exception and stays usable.
//!
//! # Thread Safety
//!
//! All handle and context types are `!Send` and `!Sync` because a QuickJS
//! runtime must only be used from one thread. The native function registry
//! is shared by every context in the process and guarded by a mutex, so
//! contexts living on different threads may register functions concurrently.
//!
//! ## Example: Wrong (won't compile)
//!
//! ```compile_fail
//! use qjs_core::QjsContext;
//! use std::thread;
//!
//! let ctx = QjsContext::new().unwrap();
//! thread::spawn(move || {
//!     ctx.eval("1 + 1"); // Error: QjsContext is !Send
//! });
//! ```
//!
//! ```compile_fail
//! use qjs_core::QjsContext;
//!
//! let value = {
//!     let ctx = QjsContext::new().unwrap();
//!     ctx.eval("1 + 1").unwrap() // Error: value outlives its context
//! };
//! ```
//!
//! ## Example: Correct
//!
//! ```
//! use qjs_core::QjsContext;
//! use std::thread;
//!
//! let handle = thread::spawn(|| {
//!     let ctx = QjsContext::new().unwrap(); // created on the thread that uses it
//!     ctx.eval("1 + 1").unwrap().to_i32().unwrap()
//! });
//! assert_eq!(handle.join().unwrap(), 2);
//! ```

mod config;
mod context;
mod error;
mod exception;
pub mod function;
mod memory;
mod string;
mod value;

pub use config::ContextConfig;
pub use context::{QjsContext, QjsCtx};
pub use error::{QjsError, QjsResult};
pub use function::{FunctionId, NativeFunction};
pub use memory::MemoryStats;
pub use value::{QjsValue, QjsValueRef};

// Re-export rquickjs-sys for direct FFI access when needed
pub use rquickjs_sys;
