// Licensed under the Apache-2.0 license

//! Queued I2C transaction driver.
//!
//! The application describes each bus operation as a descriptor, submits it
//! without blocking, and lets `I2cDriver::service` advance the bus from a
//! poll loop or the controller interrupt. The peripheral itself is reached
//! only through the traits in [`traits`], so the same driver runs on real
//! hardware and against the simulated bus used by the tests.
//!
//! - [`transaction`]: descriptors, operations, states and results
//! - [`queue`]: critical-section protected FIFO of pending handles
//! - [`pool`]: fixed arena owning the descriptors
//! - [`driver`]: the owned driver context (`init`, `submit`, `service`) and
//!   its `Submitter` / `Servicer` halves
//! - [`i2c_controller`]: blocking embedded-hal `I2c` front end

pub mod common;
pub mod driver;
pub mod i2c_controller;
pub mod pool;
pub mod queue;
mod sequencer;
pub mod traits;
pub mod transaction;

#[cfg(test)]
pub(crate) mod mock;

pub use common::{
    BusFault, Direction, I2cAddress, I2cConfig, I2cConfigBuilder, I2cError, I2cSpeed,
    ServiceMode, TimingConfig,
};
pub use driver::{CompletionCallback, I2cDriver, I2cStats, ServiceStatus, Servicer, Submitter};
pub use i2c_controller::I2cController;
pub use queue::TransactionQueue;
pub use traits::{I2cBusPrimitives, I2cHardwareCore};
pub use transaction::{
    Operation, Transaction, TxnHandle, TxnResult, TxnState, RX_MESSAGE_MAX_LENGTH,
    TX_MESSAGE_MAX_LENGTH,
};
