// Licensed under the Apache-2.0 license

//! Pending-transaction FIFO.
//!
//! A fixed-capacity `heapless::Deque` of descriptor handles shared between
//! the submitting context and the servicer, which may run from the bus
//! interrupt. Both sides take `&self`; the deque is only touched inside a
//! `critical_section::with` block, and each block does one push or pop.

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Deque;

use crate::i2c::common::I2cError;
use crate::i2c::transaction::TxnHandle;

/// Default number of transactions that may wait for the servicer.
pub const I2C_TRANSACTION_QUEUE_SIZE: usize = 10;

pub struct TransactionQueue<const N: usize> {
    handles: Mutex<RefCell<Deque<TxnHandle, N>>>,
}

impl<const N: usize> Default for TransactionQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> TransactionQueue<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            handles: Mutex::new(RefCell::new(Deque::new())),
        }
    }

    /// Append a handle at the tail of the FIFO.
    ///
    /// # Errors
    /// `QueueFull` if all `N` slots are occupied; the queue is left unchanged.
    pub fn enqueue(&self, handle: TxnHandle) -> Result<(), I2cError> {
        critical_section::with(|cs| {
            self.handles
                .borrow_ref_mut(cs)
                .push_back(handle)
                .map_err(|_| I2cError::QueueFull)
        })
    }

    /// Remove the oldest handle, if any.
    pub fn try_dequeue(&self) -> Option<TxnHandle> {
        critical_section::with(|cs| self.handles.borrow_ref_mut(cs).pop_front())
    }

    /// Oldest handle without removing it.
    pub fn peek(&self) -> Option<TxnHandle> {
        critical_section::with(|cs| self.handles.borrow_ref(cs).front().copied())
    }

    pub fn is_empty(&self) -> bool {
        critical_section::with(|cs| self.handles.borrow_ref(cs).is_empty())
    }

    pub fn is_full(&self) -> bool {
        critical_section::with(|cs| self.handles.borrow_ref(cs).is_full())
    }

    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.handles.borrow_ref(cs).len())
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Drop every pending handle.
    pub fn clear(&self) {
        critical_section::with(|cs| self.handles.borrow_ref_mut(cs).clear());
    }
}
