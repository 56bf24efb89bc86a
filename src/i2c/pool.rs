// Licensed under the Apache-2.0 license

//! Fixed-size arena of transaction descriptors.
//!
//! Descriptors live in the pool for the lifetime of the driver and are named
//! by `TxnHandle`s (slot index + generation) instead of pointers. Releasing a
//! slot bumps its generation, so handles kept past `release` are rejected
//! rather than silently aliasing the next occupant.
//!
//! Each slot sits behind its own `critical_section::Mutex`, so the submitting
//! context and the servicer can work on different descriptors through a
//! shared `&TransactionPool`. Holders of `&mut TransactionPool` skip the
//! critical section entirely.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::i2c::common::I2cError;
use crate::i2c::transaction::{Transaction, TxnHandle, TxnState};

struct Slot {
    txn: Transaction,
    generation: u32,
    allocated: bool,
}

impl Slot {
    const fn new() -> Self {
        Self {
            txn: Transaction::new(),
            generation: 0,
            allocated: false,
        }
    }

    fn matches(&self, handle: TxnHandle) -> bool {
        self.allocated && self.generation == handle.generation()
    }
}

pub struct TransactionPool<const P: usize> {
    slots: [Mutex<RefCell<Slot>>; P],
}

impl<const P: usize> Default for TransactionPool<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const P: usize> TransactionPool<P> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [const { Mutex::new(RefCell::new(Slot::new())) }; P],
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        P
    }

    /// Claim a free slot. The descriptor starts out fresh and `Created`.
    ///
    /// # Errors
    /// Returns `PoolExhausted` if every slot is allocated.
    pub fn allocate(&self) -> Result<TxnHandle, I2cError> {
        for (index, slot) in self.slots.iter().enumerate() {
            let claimed = critical_section::with(|cs| {
                let mut slot = slot.borrow_ref_mut(cs);
                if slot.allocated {
                    return None;
                }
                slot.allocated = true;
                slot.txn = Transaction::new();
                Some(slot.generation)
            });
            if let Some(generation) = claimed {
                return Ok(TxnHandle::new(index, generation));
            }
        }
        Err(I2cError::PoolExhausted)
    }

    /// Return a slot to the pool.
    ///
    /// # Errors
    /// `InvalidHandle` for stale or unknown handles, `InvalidState` while the
    /// descriptor is queued or being processed.
    pub fn release(&self, handle: TxnHandle) -> Result<(), I2cError> {
        let slot = self.slot(handle)?;
        critical_section::with(|cs| {
            let mut slot = slot.borrow_ref_mut(cs);
            if !slot.matches(handle) {
                return Err(I2cError::InvalidHandle);
            }
            if slot.txn.is_owned_by_driver() {
                return Err(I2cError::InvalidState);
            }
            slot.allocated = false;
            slot.generation = slot.generation.wrapping_add(1);
            Ok(())
        })
    }

    /// Run `f` on the descriptor inside a critical section.
    ///
    /// # Errors
    /// `InvalidHandle` for stale or unknown handles.
    pub fn with<R>(
        &self,
        handle: TxnHandle,
        f: impl FnOnce(&Transaction) -> R,
    ) -> Result<R, I2cError> {
        self.with_mut(handle, |txn| f(txn))
    }

    /// Run `f` on the descriptor inside a critical section, with write access.
    ///
    /// `f` must not reach back into the same slot.
    ///
    /// # Errors
    /// `InvalidHandle` for stale or unknown handles.
    pub fn with_mut<R>(
        &self,
        handle: TxnHandle,
        f: impl FnOnce(&mut Transaction) -> R,
    ) -> Result<R, I2cError> {
        let slot = self.slot(handle)?;
        critical_section::with(|cs| {
            let mut slot = slot.borrow_ref_mut(cs);
            if !slot.matches(handle) {
                return Err(I2cError::InvalidHandle);
            }
            Ok(f(&mut slot.txn))
        })
    }

    /// # Errors
    /// `InvalidHandle` for stale or unknown handles.
    pub fn get(&mut self, handle: TxnHandle) -> Result<&Transaction, I2cError> {
        self.get_mut(handle).map(|txn| &*txn)
    }

    /// # Errors
    /// `InvalidHandle` for stale or unknown handles.
    pub fn get_mut(&mut self, handle: TxnHandle) -> Result<&mut Transaction, I2cError> {
        self.slots
            .get_mut(handle.index())
            .map(|slot| slot.get_mut().get_mut())
            .filter(|slot| slot.matches(handle))
            .map(|slot| &mut slot.txn)
            .ok_or(I2cError::InvalidHandle)
    }

    #[must_use]
    pub fn allocated(&self) -> usize {
        self.count_where(|slot| slot.allocated)
    }

    /// Descriptors currently in the given state.
    #[must_use]
    pub fn count_in_state(&self, state: TxnState) -> usize {
        self.count_where(|slot| slot.allocated && slot.txn.state() == state)
    }

    fn count_where(&self, predicate: impl Fn(&Slot) -> bool) -> usize {
        self.slots
            .iter()
            .filter(|slot| critical_section::with(|cs| predicate(&*slot.borrow_ref(cs))))
            .count()
    }

    fn slot(&self, handle: TxnHandle) -> Result<&Mutex<RefCell<Slot>>, I2cError> {
        self.slots.get(handle.index()).ok_or(I2cError::InvalidHandle)
    }
}
