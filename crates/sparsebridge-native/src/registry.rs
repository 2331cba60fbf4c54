//! Live-object registry for native handles.
//!
//! Every object handed out through an opaque pointer is recorded here with a
//! kind tag. Lookups and frees check the tag before the pointer is ever
//! dereferenced, so a stale, foreign or already-freed handle is reported as an
//! invalid free instead of corrupting memory. Per-thread counters make the
//! registry usable as an allocation-tracking harness in tests.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::ffi::c_void;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Mutex, MutexGuard};

static LIVE: Mutex<BTreeMap<usize, &'static str>> = Mutex::new(BTreeMap::new());

/// Allocation counters for the calling thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationStats {
    /// Objects handed out.
    pub allocated: usize,
    /// Objects freed through the matching routine.
    pub freed: usize,
    /// Free attempts on pointers that were not live (double or foreign frees).
    pub invalid_frees: usize,
    /// Entry points invoked.
    pub calls: usize,
}

impl AllocationStats {
    const ZERO: Self = Self {
        allocated: 0,
        freed: 0,
        invalid_frees: 0,
        calls: 0,
    };

    /// Objects allocated and not yet freed.
    pub fn live(&self) -> usize {
        self.allocated.saturating_sub(self.freed)
    }
}

thread_local! {
    static STATS: Cell<AllocationStats> = const { Cell::new(AllocationStats::ZERO) };
}

/// Counters for the calling thread.
pub fn thread_stats() -> AllocationStats {
    STATS.with(|s| s.get())
}

/// Reset the calling thread's counters.
pub fn reset_thread_stats() {
    STATS.with(|s| s.set(AllocationStats::ZERO));
}

/// Number of live objects across all threads.
pub fn live_objects() -> usize {
    live().len()
}

fn live() -> MutexGuard<'static, BTreeMap<usize, &'static str>> {
    LIVE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn update(f: impl FnOnce(&mut AllocationStats)) {
    STATS.with(|s| {
        let mut stats = s.get();
        f(&mut stats);
        s.set(stats);
    });
}

/// Box `value` and record it as a live object of `kind`.
pub(crate) fn register<T>(kind: &'static str, value: T) -> *mut c_void {
    let ptr = Box::into_raw(Box::new(value)).cast::<c_void>();
    live().insert(ptr as usize, kind);
    update(|s| s.allocated += 1);
    ptr
}

fn is_live(ptr: *mut c_void, kind: &'static str) -> bool {
    !ptr.is_null() && live().get(&(ptr as usize)) == Some(&kind)
}

/// Kind tag of a live object, if any.
pub(crate) fn kind_of(ptr: *mut c_void) -> Option<&'static str> {
    if ptr.is_null() {
        return None;
    }
    live().get(&(ptr as usize)).copied()
}

/// Count a free attempt on a pointer that is not a live object.
pub(crate) fn reject_free(ptr: *mut c_void) {
    log::warn!("invalid free at {:p}", ptr);
    update(|s| s.invalid_frees += 1);
}

/// Borrow a live object of `kind`.
///
/// # Safety
///
/// `T` must be the type registered under `kind`, and the caller must not
/// free the object while the reference is alive.
pub(crate) unsafe fn get<'a, T>(ptr: *mut c_void, kind: &'static str) -> Option<&'a mut T> {
    if is_live(ptr, kind) {
        // SAFETY: registered pointers come from Box::into_raw of a T.
        Some(unsafe { &mut *ptr.cast::<T>() })
    } else {
        None
    }
}

/// Free a live object of `kind`. Null is a no-op.
///
/// Returns `false` (and counts an invalid free) if the pointer is not a live
/// object of that kind.
///
/// # Safety
///
/// `T` must be the type registered under `kind`.
pub(crate) unsafe fn free<T>(ptr: *mut c_void, kind: &'static str) -> bool {
    if ptr.is_null() {
        return true;
    }
    let removed = {
        let mut map = live();
        match map.get(&(ptr as usize)) {
            Some(&k) if k == kind => map.remove(&(ptr as usize)).is_some(),
            _ => false,
        }
    };
    if removed {
        // SAFETY: the registry entry proves the pointer is a live Box<T>.
        drop(unsafe { Box::from_raw(ptr.cast::<T>()) });
        update(|s| s.freed += 1);
        true
    } else {
        log::warn!("invalid free of {} at {:p}", kind, ptr);
        update(|s| s.invalid_frees += 1);
        false
    }
}

/// Run an entry point body, converting a panic into `error`.
///
/// No panic may unwind across the C boundary.
pub(crate) fn guard<R: Copy>(error: R, body: impl FnOnce() -> R) -> R {
    update(|s| s.calls += 1);
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(status) => status,
        Err(_) => {
            log::warn!("native entry point panicked");
            error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_free() {
        reset_thread_stats();
        let ptr = register("test_object", vec![1u32, 2, 3]);
        let value = unsafe { get::<Vec<u32>>(ptr, "test_object") };
        assert_eq!(value.map(|v| v.len()), Some(3));
        assert!(unsafe { free::<Vec<u32>>(ptr, "test_object") });
        let stats = thread_stats();
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.freed, 1);
        assert_eq!(stats.live(), 0);
    }

    #[test]
    fn test_double_free_is_detected() {
        reset_thread_stats();
        let ptr = register("test_object", 7u64);
        assert!(unsafe { free::<u64>(ptr, "test_object") });
        assert!(!unsafe { free::<u64>(ptr, "test_object") });
        assert_eq!(thread_stats().invalid_frees, 1);
        assert!(unsafe { get::<u64>(ptr, "test_object") }.is_none());
    }

    #[test]
    fn test_wrong_kind_is_rejected() {
        reset_thread_stats();
        let ptr = register("kind_a", 1u8);
        assert!(unsafe { get::<u8>(ptr, "kind_b") }.is_none());
        assert!(!unsafe { free::<u8>(ptr, "kind_b") });
        assert!(unsafe { free::<u8>(ptr, "kind_a") });
        assert_eq!(thread_stats().invalid_frees, 1);
    }

    #[test]
    fn test_guard_converts_panics() {
        reset_thread_stats();
        let status = guard(-911, || -> i32 { panic!("inside native") });
        assert_eq!(status, -911);
        assert_eq!(guard(-911, || 0), 0);
        assert_eq!(thread_stats().calls, 2);
    }
}
