// Licensed under the Apache-2.0 license

//! # I2C Hardware Abstraction Traits
//!
//! The transaction driver never touches registers. It consumes the
//! peripheral through two small traits:
//!
//! ```text
//! I2cHardwareCore (bring-up, timing, interrupts, recovery)
//!     └── I2cBusPrimitives (start / address / byte / stop, non-blocking)
//! ```
//!
//! Every bus primitive returns `nb::Result`. `WouldBlock` means the
//! peripheral has not finished the previous bus action yet (or a target is
//! stretching the clock); the caller polls again later. The driver bounds
//! the number of consecutive `WouldBlock` results, so a primitive never has
//! to implement its own timeout.

use crate::i2c::common::{Direction, I2cAddress, I2cConfig, I2cSpeed, TimingConfig};

/// Core I2C hardware interface providing bring-up and housekeeping operations
///
/// # Examples
///
/// ```rust,ignore
/// use i2c_txn_ddk::i2c::{I2cConfig, I2cHardwareCore, I2cSpeed, TimingConfig};
///
/// fn setup_i2c<T: I2cHardwareCore>(controller: &mut T) -> Result<u32, T::Error> {
///     let mut config = I2cConfig::default();
///     controller.init(&mut config)?;
///     controller.configure_timing(I2cSpeed::Standard, &TimingConfig::default())
/// }
/// ```
pub trait I2cHardwareCore {
    /// Hardware-specific error type that implements embedded-hal error traits
    type Error: embedded_hal::i2c::Error + core::fmt::Debug;

    /// Initialize the I2C hardware with the given configuration
    ///
    /// Pins and clocks are expected to be configured before this call.
    /// Implementations may adjust `config` to reflect what the hardware
    /// actually supports.
    ///
    /// # Errors
    ///
    /// Returns an error if the peripheral does not come up.
    fn init(&mut self, config: &mut I2cConfig) -> Result<(), Self::Error>;

    /// Configure timing parameters and return the resulting bus clock in Hz
    ///
    /// # Errors
    ///
    /// Returns an error if the requested timing cannot be achieved with the
    /// available hardware clock sources.
    fn configure_timing(
        &mut self,
        speed: I2cSpeed,
        timing: &TimingConfig,
    ) -> Result<u32, Self::Error>;

    /// Enable hardware interrupts with the specified mask
    /// (`I2C_INTR_EVENT`, `I2C_INTR_ERROR`)
    fn enable_interrupts(&mut self, mask: u32);

    /// Clear/disable hardware interrupts with the specified mask
    fn clear_interrupts(&mut self, mask: u32);

    /// Attempt to recover the I2C bus from stuck conditions
    ///
    /// # Errors
    ///
    /// Returns an error if bus recovery fails or is not supported by the hardware.
    fn recover_bus(&mut self) -> Result<(), Self::Error>;

    /// Disable the peripheral
    fn disable(&mut self);
}

/// Non-blocking I2C controller primitives
///
/// Each call either completes one bus action, reports `WouldBlock`, or
/// fails with a hardware error whose `kind()` classifies the failure
/// (NACK, arbitration loss, bus error).
pub trait I2cBusPrimitives: I2cHardwareCore {
    /// Generate a start condition, or a repeated start if the bus is
    /// already owned by this controller.
    ///
    /// # Errors
    ///
    /// `ArbitrationLoss` if another controller won the bus.
    fn start(&mut self) -> nb::Result<(), Self::Error>;

    /// Send the target address with the R/W bit.
    ///
    /// # Errors
    ///
    /// `NoAcknowledge(Address)` if no target acknowledged.
    fn send_address(
        &mut self,
        address: I2cAddress,
        direction: Direction,
    ) -> nb::Result<(), Self::Error>;

    /// Transmit one data byte.
    ///
    /// # Errors
    ///
    /// `NoAcknowledge(Data)` if the target did not acknowledge the byte.
    fn write_byte(&mut self, byte: u8) -> nb::Result<(), Self::Error>;

    /// Clock in one data byte, answering with ACK when `ack` is true and
    /// NACK otherwise.
    ///
    /// # Errors
    ///
    /// Bus-level failures such as arbitration loss or overrun.
    fn read_byte(&mut self, ack: bool) -> nb::Result<u8, Self::Error>;

    /// Generate a stop condition and release the bus.
    ///
    /// # Errors
    ///
    /// Bus-level failures while generating the stop.
    fn stop(&mut self) -> nb::Result<(), Self::Error>;

    /// Abandon the current transfer and return the bus to idle, whatever
    /// state the peripheral is in. Must not block.
    fn abort(&mut self);
}
