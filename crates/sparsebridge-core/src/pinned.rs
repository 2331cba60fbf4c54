//! Scoped pinning of slices handed to native code.
//!
//! A pin borrows the slice for the lifetime of the [`PinnedBuffers`] set, so
//! the backing allocation cannot move, grow or be freed while native code
//! may still hold its address. Every pin is recorded in a shared
//! [`PinLedger`]; releasing the set (explicitly or on drop, including during
//! unwinding) balances the ledger exactly once per pin.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Acquire/release counters shared by every pin set of one owner.
#[derive(Debug, Default)]
pub struct PinLedger {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl PinLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Total number of pins ever acquired.
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::Acquire)
    }

    /// Total number of pins ever released.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::Acquire)
    }

    /// Pins acquired but not yet released.
    pub fn outstanding(&self) -> usize {
        self.acquired().saturating_sub(self.released())
    }

    fn acquire(&self) {
        self.acquired.fetch_add(1, Ordering::AcqRel);
    }

    fn release(&self, count: usize) {
        self.released.fetch_add(count, Ordering::AcqRel);
    }
}

#[derive(Debug, Clone, Copy)]
struct PinRecord {
    address: usize,
    bytes: usize,
}

/// A set of pinned slices, all released together.
#[derive(Debug)]
pub struct PinnedBuffers<'a> {
    records: Vec<PinRecord>,
    ledger: Arc<PinLedger>,
    released: bool,
    _borrow: PhantomData<&'a mut ()>,
}

impl<'a> PinnedBuffers<'a> {
    pub fn new(ledger: Arc<PinLedger>) -> Self {
        Self {
            records: Vec::new(),
            ledger,
            released: false,
            _borrow: PhantomData,
        }
    }

    /// Pin a read-only slice and return its stable address.
    ///
    /// # Panics
    ///
    /// Panics if the set has already been released.
    pub fn pin<T>(&mut self, buffer: &'a [T]) -> *const T {
        self.record(buffer.as_ptr() as usize, std::mem::size_of_val(buffer));
        buffer.as_ptr()
    }

    /// Pin a writable slice and return its stable address.
    ///
    /// # Panics
    ///
    /// Panics if the set has already been released.
    pub fn pin_mut<T>(&mut self, buffer: &'a mut [T]) -> *mut T {
        self.record(buffer.as_ptr() as usize, std::mem::size_of_val(buffer));
        buffer.as_mut_ptr()
    }

    fn record(&mut self, address: usize, bytes: usize) {
        assert!(!self.released, "pin acquired on a released buffer set");
        self.ledger.acquire();
        self.records.push(PinRecord { address, bytes });
    }

    /// Number of live pins in this set.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total bytes currently pinned by this set.
    pub fn pinned_bytes(&self) -> usize {
        self.records.iter().map(|r| r.bytes).sum()
    }

    /// Whether `address` lies inside one of the pinned slices.
    pub fn contains(&self, address: usize) -> bool {
        self.records
            .iter()
            .any(|r| address >= r.address && address < r.address + r.bytes.max(1))
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Release every pin. Idempotent.
    pub fn release_all(&mut self) {
        if self.released {
            return;
        }
        self.ledger.release(self.records.len());
        log::trace!("released {} pins", self.records.len());
        self.records.clear();
        self.released = true;
    }
}

impl Drop for PinnedBuffers<'_> {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// Run `f` with a fresh pin set that is released on every exit path.
pub fn with_pinned<'a, R>(
    ledger: &Arc<PinLedger>,
    f: impl FnOnce(&mut PinnedBuffers<'a>) -> R,
) -> R {
    let mut pins = PinnedBuffers::new(Arc::clone(ledger));
    let result = f(&mut pins);
    pins.release_all();
    result
}
