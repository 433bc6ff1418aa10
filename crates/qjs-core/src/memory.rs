//! Memory usage helpers for QuickJS.

use rquickjs_sys::{JSMemoryUsage, JSRuntime, JS_ComputeMemoryUsage};
use serde::Serialize;
use std::mem::MaybeUninit;

/// Snapshot of the runtime's allocator and object counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    /// Bytes currently allocated through the runtime's allocator
    pub malloc_size: u64,
    /// Configured limit, or 0 when unlimited
    pub malloc_limit: u64,
    /// Bytes in use as accounted by the engine
    pub memory_used_size: u64,
    pub malloc_count: u64,
    pub atom_count: u64,
    pub str_count: u64,
    pub obj_count: u64,
    pub array_count: u64,
    pub js_func_count: u64,
    pub c_func_count: u64,
}

fn clamp(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

pub(crate) fn runtime_memory_stats(rt: *mut JSRuntime) -> MemoryStats {
    let mut usage = MaybeUninit::<JSMemoryUsage>::zeroed();
    // SAFETY: rt is the live runtime owned by the calling context; the
    // struct is plain data and fully written by the engine
    let usage = unsafe {
        JS_ComputeMemoryUsage(rt, usage.as_mut_ptr());
        usage.assume_init()
    };

    MemoryStats {
        malloc_size: clamp(usage.malloc_size),
        malloc_limit: clamp(usage.malloc_limit),
        memory_used_size: clamp(usage.memory_used_size),
        malloc_count: clamp(usage.malloc_count),
        atom_count: clamp(usage.atom_count),
        str_count: clamp(usage.str_count),
        obj_count: clamp(usage.obj_count),
        array_count: clamp(usage.array_count),
        js_func_count: clamp(usage.js_func_count),
        c_func_count: clamp(usage.c_func_count),
    }
}
