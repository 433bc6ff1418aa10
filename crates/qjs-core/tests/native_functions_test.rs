//! Integration tests for host closures exposed to script
//!
//! Every test is serial because some observe the process-wide registry size.

use qjs_core::function::{self, FunctionId};
use qjs_core::{QjsContext, QjsError};
use serial_test::serial;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn install_multiply(ctx: &QjsContext) {
    ctx.set_global_function("multiply", |ctx, args| {
        if args.len() != 2 {
            return Err(QjsError::native(format!(
                "multiply expects 2 arguments, got {}",
                args.len()
            )));
        }
        Ok(ctx.new_number(args[0].to_number()? * args[1].to_number()?))
    })
    .unwrap();
}

#[test]
#[serial]
fn test_multiply() {
    let ctx = QjsContext::new().unwrap();
    install_multiply(&ctx);
    let result = ctx.eval("multiply(6, 7)").unwrap();
    assert_eq!(result.to_number().unwrap(), 42.0);
}

#[test]
#[serial]
fn test_argument_count_enforcement() {
    let ctx = QjsContext::new().unwrap();
    install_multiply(&ctx);

    let err = ctx.eval("multiply(1)").unwrap_err();
    match &err {
        QjsError::Script {
            error_type,
            message,
            ..
        } => {
            assert_eq!(error_type, "InternalError");
            assert_eq!(message, "multiply expects 2 arguments, got 1");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!ctx.has_exception());
    assert_eq!(ctx.eval("multiply(2, 3)").unwrap().to_i32().unwrap(), 6);
}

#[test]
#[serial]
fn test_host_error_catchable_in_script() {
    let ctx = QjsContext::new().unwrap();
    install_multiply(&ctx);
    let result = ctx
        .eval("try { multiply(); 'no error' } catch (e) { e.name + ': ' + e.message }")
        .unwrap();
    assert_eq!(
        result.to_string().unwrap(),
        "InternalError: multiply expects 2 arguments, got 0"
    );
}

#[test]
#[serial]
fn test_conversion_error_inside_closure_propagates() {
    let ctx = QjsContext::new().unwrap();
    install_multiply(&ctx);
    let err = ctx
        .eval("multiply({ valueOf() { throw new Error('bad operand'); } }, 2)")
        .unwrap_err();
    assert!(err.to_string().contains("bad operand"), "{err}");
}

#[test]
#[serial]
fn test_throw_exception_from_closure() {
    let ctx = QjsContext::new().unwrap();
    ctx.set_global_function("fail", |ctx, args| {
        let reason = match args.first() {
            Some(arg) => arg.to_string()?,
            None => "no reason".to_string(),
        };
        Err(ctx.throw_exception(&reason))
    })
    .unwrap();

    let err = ctx.eval("fail('disk full')").unwrap_err();
    assert_eq!(err.to_string(), "InternalError: disk full");
    assert!(!ctx.has_exception());
}

#[test]
#[serial]
fn test_panicking_closure_is_contained() {
    let ctx = QjsContext::new().unwrap();
    ctx.set_global_function("explode", |_ctx, _args| panic!("kaboom"))
        .unwrap();

    let err = ctx.eval("explode()").unwrap_err();
    assert_eq!(err.error_type(), "InternalError");
    assert!(err.to_string().contains("kaboom"), "{err}");
    assert_eq!(ctx.eval("1+1").unwrap().to_i32().unwrap(), 2);
}

#[test]
#[serial]
fn test_arguments_are_borrowed() {
    let ctx = QjsContext::new().unwrap();
    ctx.set_global_function("first", |_ctx, args| match args.first() {
        Some(arg) => Ok(arg.to_owned_value()),
        None => Err(QjsError::native("first expects an argument")),
    })
    .unwrap();

    let result = ctx
        .eval("var obj = { tag: 'kept' }; first(obj) === obj && first(obj).tag")
        .unwrap();
    assert_eq!(result.to_string().unwrap(), "kept");
    ctx.run_gc();
    assert_eq!(
        ctx.eval("obj.tag").unwrap().to_string().unwrap(),
        "kept"
    );
}

#[test]
#[serial]
fn test_closure_calls_back_into_script() {
    let ctx = QjsContext::new().unwrap();
    ctx.set_global_function("applyTwice", |_ctx, args| {
        if args.len() != 2 || !args[0].is_function() {
            return Err(QjsError::native("applyTwice(fn, value)"));
        }
        let once = args[0].call(&[&args[1]])?;
        args[0].call(&[&once])
    })
    .unwrap();

    let result = ctx.eval("applyTwice(x => x * 3, 5)").unwrap();
    assert_eq!(result.to_i32().unwrap(), 45);

    let err = ctx
        .eval("applyTwice(() => { throw new TypeError('inner'); }, 1)")
        .unwrap_err();
    assert!(err.to_string().contains("TypeError: inner"), "{err}");
}

#[test]
#[serial]
fn test_closure_builds_values() {
    let ctx = QjsContext::new().unwrap();
    ctx.set_global_function("range", |ctx, args| {
        let n = args.first().map(|a| a.to_i32()).transpose()?.unwrap_or(0);
        let array = ctx.new_array()?;
        for i in 0..n.max(0) {
            array.set_element(i as u32, &ctx.new_i32(i))?;
        }
        Ok(array)
    })
    .unwrap();

    let result = ctx.eval("range(4).join(',')").unwrap();
    assert_eq!(result.to_string().unwrap(), "0,1,2,3");
}

#[test]
#[serial]
fn test_closure_state_is_shared() {
    let ctx = QjsContext::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    ctx.set_global_function("tick", move |ctx, _args| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ctx.new_i32(n as i32))
    })
    .unwrap();

    ctx.eval("for (let i = 0; i < 9; i++) tick();").unwrap();
    assert_eq!(ctx.eval("tick()").unwrap().to_i32().unwrap(), 10);
    assert_eq!(calls.load(Ordering::SeqCst), 10);
}

#[test]
#[serial]
fn test_function_value_without_global() {
    let ctx = QjsContext::new().unwrap();
    let negate = ctx
        .new_function("negate", |ctx, args| match args.first() {
            Some(arg) => Ok(ctx.new_number(-arg.to_number()?)),
            None => Ok(ctx.new_undefined()),
        })
        .unwrap();
    assert!(ctx.get_global("negate").unwrap().is_undefined());

    let result = negate.call(&[&ctx.new_number(2.5)]).unwrap();
    assert_eq!(result.to_number().unwrap(), -2.5);

    let nan = negate.call(&[&ctx.new_string("x").unwrap()]).unwrap();
    assert!(nan.to_number().unwrap().is_nan());
}

#[test]
#[serial]
fn test_explicit_registration_outlives_context() {
    let id: FunctionId = function::register(|ctx, _args| ctx.new_string("shared")).unwrap();

    {
        let ctx = QjsContext::new().unwrap();
        let callable = ctx.create_callable("shared", id).unwrap();
        assert_eq!(callable.call(&[]).unwrap().to_string().unwrap(), "shared");
    }
    assert!(function::is_registered(id));

    let ctx = QjsContext::new().unwrap();
    let callable = ctx.create_callable("shared", id).unwrap();
    ctx.set_global("shared", &callable).unwrap();
    assert_eq!(ctx.eval("shared()").unwrap().to_string().unwrap(), "shared");

    assert!(function::unregister(id));
    let err = ctx.eval("shared()").unwrap_err();
    assert_eq!(err.error_type(), "InternalError");
    assert!(err.to_string().contains("native function not found"), "{err}");
}

#[test]
#[serial]
fn test_registry_returns_to_baseline() {
    let baseline = function::registered_count();
    {
        let ctx = QjsContext::new().unwrap();
        install_multiply(&ctx);
        ctx.set_global_function("noop", |ctx, _args| Ok(ctx.new_undefined()))
            .unwrap();
        assert_eq!(function::registered_count(), baseline + 2);
    }
    assert_eq!(function::registered_count(), baseline);
}

#[test]
#[serial]
fn test_exception_pending_alongside_ok_value_reaches_caller() {
    let ctx = QjsContext::new().unwrap();
    ctx.set_global_function("sneaky", |ctx, _args| {
        ctx.throw_exception("left behind");
        Ok(ctx.new_i32(1))
    })
    .unwrap();

    let err = ctx.eval("sneaky()").unwrap_err();
    assert_eq!(err.error_type(), "InternalError");
    assert!(err.to_string().contains("left behind"), "{err}");
    assert!(!ctx.has_exception());

    let caught = ctx
        .eval("try { sneaky(); 'missed' } catch (e) { e.message }")
        .unwrap();
    assert_eq!(caught.to_string().unwrap(), "left behind");
    assert_eq!(ctx.eval("2 + 2").unwrap().to_i32().unwrap(), 4);
    assert!(!ctx.has_exception());
}

#[test]
#[serial]
fn test_exception_error_without_pending_exception() {
    let ctx = QjsContext::new().unwrap();
    ctx.set_global_function("marker", |_ctx, _args| Err(QjsError::Exception))
        .unwrap();

    let err = ctx.eval("marker()").unwrap_err();
    assert_eq!(err.error_type(), "InternalError");
    assert!(
        err.to_string()
            .contains("native function reported an exception without throwing one"),
        "{err}"
    );
    assert!(!ctx.has_exception());
}

/// Queries the registry when the owning closure is released
struct CountOnDrop(Arc<AtomicUsize>);

impl Drop for CountOnDrop {
    fn drop(&mut self) {
        self.0.store(function::registered_count() + 1, Ordering::SeqCst);
    }
}

#[test]
#[serial]
fn test_closure_state_may_use_registry_when_dropped_with_context() {
    let seen = Arc::new(AtomicUsize::new(0));
    {
        let ctx = QjsContext::new().unwrap();
        let guard = CountOnDrop(Arc::clone(&seen));
        ctx.set_global_function("holder", move |ctx, _args| {
            let _ = &guard;
            Ok(ctx.new_undefined())
        })
        .unwrap();
        ctx.eval("holder()").unwrap();
    }
    assert!(seen.load(Ordering::SeqCst) > 0);
}

#[test]
#[serial]
fn test_closure_state_may_use_registry_when_unregistered() {
    let seen = Arc::new(AtomicUsize::new(0));
    let guard = CountOnDrop(Arc::clone(&seen));
    let id = function::register(move |ctx, _args| {
        let _ = &guard;
        Ok(ctx.new_undefined())
    })
    .unwrap();

    assert!(function::unregister(id));
    assert!(seen.load(Ordering::SeqCst) > 0);
    assert!(!function::is_registered(id));
}
