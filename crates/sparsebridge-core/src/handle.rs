//! Owned native handles.
//!
//! A [`NativeHandle`] owns one object allocated by a native library
//! (a symbolic analysis, a numeric factorization, a result block) together
//! with the library routine that frees it. The null pointer is the
//! "already released" sentinel: the free routine runs at most once, whether
//! the handle is released explicitly, replaced, or dropped.

use std::ffi::c_void;

/// Library free routine: receives the address of the handle slot (which it
/// nulls, as the C libraries do) and an optional companion object such as
/// CHOLMOD's `Common`.
pub type ReleaseFn<P> = unsafe fn(*mut *mut P, *mut c_void);

pub struct NativeHandle<P = c_void> {
    ptr: *mut P,
    release: ReleaseFn<P>,
    companion: *mut c_void,
    label: &'static str,
}

// Native objects are owned by exactly one context and never shared.
unsafe impl<P> Send for NativeHandle<P> {}

impl<P> NativeHandle<P> {
    /// An empty handle that will be freed with `release` once filled.
    pub fn empty(label: &'static str, release: ReleaseFn<P>) -> Self {
        Self {
            ptr: std::ptr::null_mut(),
            release,
            companion: std::ptr::null_mut(),
            label,
        }
    }

    /// Pass `companion` to the free routine.
    ///
    /// The companion must outlive the handle.
    pub fn with_companion(mut self, companion: *mut c_void) -> Self {
        self.companion = companion;
        self
    }

    pub fn as_ptr(&self) -> *mut P {
        self.ptr
    }

    pub fn is_live(&self) -> bool {
        !self.ptr.is_null()
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Out-parameter slot for a native routine that allocates the object.
    ///
    /// Any object currently held is released first, so a handle can be
    /// refilled without leaking.
    pub fn slot(&mut self) -> *mut *mut P {
        self.release();
        &mut self.ptr
    }

    /// Take ownership of a pointer returned directly by a native routine.
    pub fn reset(&mut self, ptr: *mut P) {
        self.release();
        self.ptr = ptr;
    }

    /// Free the native object. Returns `false` if nothing was held.
    pub fn release(&mut self) -> bool {
        if self.ptr.is_null() {
            return false;
        }
        log::debug!("releasing native {} at {:p}", self.label, self.ptr);
        // SAFETY: the pointer was produced by the library that owns `release`
        // and has not been freed yet (non-null sentinel).
        unsafe { (self.release)(&mut self.ptr, self.companion) };
        if !self.ptr.is_null() {
            log::warn!("native free routine for {} did not clear the handle", self.label);
            self.ptr = std::ptr::null_mut();
        }
        true
    }
}

impl<P> Drop for NativeHandle<P> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<P> std::fmt::Debug for NativeHandle<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeHandle")
            .field("label", &self.label)
            .field("ptr", &self.ptr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    thread_local! {
        static FREES: Cell<usize> = const { Cell::new(0) };
    }

    unsafe fn free_box(slot: *mut *mut c_void, _: *mut c_void) {
        unsafe {
            if !(*slot).is_null() {
                drop(Box::from_raw((*slot).cast::<u64>()));
                *slot = std::ptr::null_mut();
                FREES.with(|f| f.set(f.get() + 1));
            }
        }
    }

    fn allocate() -> *mut c_void {
        Box::into_raw(Box::new(42u64)).cast()
    }

    #[test]
    fn test_release_exactly_once() {
        FREES.with(|f| f.set(0));
        let mut handle = NativeHandle::empty("test", free_box);
        assert!(!handle.is_live());
        unsafe { *handle.slot() = allocate() };
        assert!(handle.is_live());
        assert!(handle.release());
        assert!(!handle.release());
        drop(handle);
        assert_eq!(FREES.with(|f| f.get()), 1);
    }

    #[test]
    fn test_slot_releases_previous_object() {
        FREES.with(|f| f.set(0));
        let mut handle = NativeHandle::empty("test", free_box);
        unsafe { *handle.slot() = allocate() };
        unsafe { *handle.slot() = allocate() };
        assert_eq!(FREES.with(|f| f.get()), 1);
        drop(handle);
        assert_eq!(FREES.with(|f| f.get()), 2);
    }

    #[test]
    fn test_reset_takes_ownership() {
        FREES.with(|f| f.set(0));
        let mut handle = NativeHandle::empty("test", free_box);
        handle.reset(allocate());
        handle.reset(std::ptr::null_mut());
        assert!(!handle.is_live());
        assert_eq!(FREES.with(|f| f.get()), 1);
    }
}
