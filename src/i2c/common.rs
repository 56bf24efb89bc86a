// Licensed under the Apache-2.0 license

//! Common types and constants for the I2C driver modules.
//!
//! This module provides the bus configuration, addressing and error
//! definitions used across the transaction driver implementation.

use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource, SevenBitAddress, TenBitAddress};
use fugit::{HertzU32, MicrosDurationU32};

/// Interrupt mask bit for bus events (start sent, address sent, byte transferred).
pub const I2C_INTR_EVENT: u32 = 1 << 0;
/// Interrupt mask bit for bus errors (NACK, arbitration loss, bus error).
pub const I2C_INTR_ERROR: u32 = 1 << 1;

/// SMBus `tTIMEOUT`: the longest a target may hold SCL low.
pub const DEFAULT_CLOCK_STRETCH_TIMEOUT_US: u32 = 25_000;
pub const DEFAULT_SERVICE_PERIOD_US: u32 = 1_000;
/// Roughly one bit time at 100 kHz.
pub const DEFAULT_POLL_INTERVAL_US: u32 = 10;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum I2cSpeed {
    Standard = 100_000,
    Fast = 400_000,
    FastPlus = 1_000_000,
}

impl I2cSpeed {
    #[must_use]
    pub fn frequency(self) -> HertzU32 {
        HertzU32::from_raw(self as u32)
    }
}

/// How much work one call to `service()` performs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ServiceMode {
    /// One hardware primitive per call. Suited to interrupt handlers.
    Incremental,
    /// Drive the in-flight transaction until it completes, sleeping one
    /// `poll_interval` whenever the hardware is not ready. Suited to polled
    /// builds without bus interrupts.
    RunToCompletion,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TimingConfig {
    pub manual_scl_high: u8,
    pub manual_scl_low: u8,
    pub manual_sda_hold: u8,
    pub clk_src: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct I2cConfig {
    pub speed: I2cSpeed,
    pub timing_config: TimingConfig,
    pub service_mode: ServiceMode,
    pub interrupt_driven: bool,
    pub clock_stretch_timeout: MicrosDurationU32,
    /// Interval between incremental `service()` calls.
    pub service_period: MicrosDurationU32,
    /// Sleep between polls of a blocking wait.
    pub poll_interval: MicrosDurationU32,
}

impl I2cConfig {
    /// Time one "not ready" poll stands for: a service period when
    /// `service()` returns between polls, a poll interval when it blocks.
    #[must_use]
    pub fn stall_period(&self) -> MicrosDurationU32 {
        match self.service_mode {
            ServiceMode::Incremental => self.service_period,
            ServiceMode::RunToCompletion => self.poll_interval,
        }
    }

    /// Number of consecutive "not ready" polls tolerated while waiting on
    /// the hardware before the wait is declared a clock-stretch timeout.
    #[must_use]
    pub fn stall_budget(&self) -> u32 {
        budget(self.clock_stretch_timeout, self.stall_period())
    }

    /// Stall budget for callers that sleep `poll_interval` per poll.
    #[must_use]
    pub fn blocking_stall_budget(&self) -> u32 {
        budget(self.clock_stretch_timeout, self.poll_interval)
    }
}

fn budget(timeout: MicrosDurationU32, period: MicrosDurationU32) -> u32 {
    timeout.ticks().div_ceil(period.ticks().max(1)).max(1)
}

impl Default for I2cConfig {
    fn default() -> Self {
        I2cConfigBuilder::new().build()
    }
}

pub struct I2cConfigBuilder {
    speed: I2cSpeed,
    timing_config: Option<TimingConfig>,
    service_mode: ServiceMode,
    interrupt_driven: bool,
    clock_stretch_timeout: MicrosDurationU32,
    service_period: MicrosDurationU32,
    poll_interval: MicrosDurationU32,
}

impl Default for I2cConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            speed: I2cSpeed::Standard,
            timing_config: None,
            service_mode: ServiceMode::Incremental,
            interrupt_driven: false,
            clock_stretch_timeout: MicrosDurationU32::from_ticks(
                DEFAULT_CLOCK_STRETCH_TIMEOUT_US,
            ),
            service_period: MicrosDurationU32::from_ticks(DEFAULT_SERVICE_PERIOD_US),
            poll_interval: MicrosDurationU32::from_ticks(DEFAULT_POLL_INTERVAL_US),
        }
    }
    #[must_use]
    pub fn speed(mut self, speed: I2cSpeed) -> Self {
        self.speed = speed;
        self
    }
    #[must_use]
    pub fn timing_config(mut self, config: TimingConfig) -> Self {
        self.timing_config = Some(config);
        self
    }
    #[must_use]
    pub fn service_mode(mut self, mode: ServiceMode) -> Self {
        self.service_mode = mode;
        self
    }
    #[must_use]
    pub fn interrupt_driven(mut self, enabled: bool) -> Self {
        self.interrupt_driven = enabled;
        self
    }
    #[must_use]
    pub fn clock_stretch_timeout(mut self, timeout: MicrosDurationU32) -> Self {
        self.clock_stretch_timeout = timeout;
        self
    }
    #[must_use]
    pub fn service_period(mut self, period: MicrosDurationU32) -> Self {
        self.service_period = period;
        self
    }
    #[must_use]
    pub fn poll_interval(mut self, interval: MicrosDurationU32) -> Self {
        self.poll_interval = interval;
        self
    }
    #[must_use]
    pub fn build(self) -> I2cConfig {
        I2cConfig {
            speed: self.speed,
            timing_config: self.timing_config.unwrap_or_default(),
            service_mode: self.service_mode,
            interrupt_driven: self.interrupt_driven,
            clock_stretch_timeout: self.clock_stretch_timeout,
            service_period: self.service_period,
            poll_interval: self.poll_interval,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AddressKind {
    SevenBit,
    TenBit,
}

/// A validated 7- or 10-bit target address.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct I2cAddress {
    raw: u16,
    kind: AddressKind,
}

impl I2cAddress {
    /// General call address, used as the placeholder in fresh descriptors.
    pub const GENERAL_CALL: Self = Self {
        raw: 0,
        kind: AddressKind::SevenBit,
    };

    /// # Errors
    /// Returns `I2cError::InvalidAddress` if `address` does not fit in 7 bits.
    pub const fn seven_bit(address: SevenBitAddress) -> Result<Self, I2cError> {
        if address > 0x7F {
            return Err(I2cError::InvalidAddress);
        }
        Ok(Self {
            raw: address as u16,
            kind: AddressKind::SevenBit,
        })
    }

    /// # Errors
    /// Returns `I2cError::InvalidAddress` if `address` does not fit in 10 bits.
    pub const fn ten_bit(address: TenBitAddress) -> Result<Self, I2cError> {
        if address > 0x3FF {
            return Err(I2cError::InvalidAddress);
        }
        Ok(Self {
            raw: address,
            kind: AddressKind::TenBit,
        })
    }

    #[must_use]
    pub const fn raw(self) -> u16 {
        self.raw
    }

    #[must_use]
    pub const fn kind(self) -> AddressKind {
        self.kind
    }
}

/// Value of the R/W bit sent with the address.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    Write = 0,
    Read = 1,
}

/// Errors reported synchronously by the driver API.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum I2cError {
    /// The transaction queue has no free slot.
    QueueFull,
    /// The descriptor's operation code is not Write, Read or WriteRead.
    InvalidOp,
    /// A buffer length exceeds its compile-time bound.
    InvalidLength,
    /// The address does not fit the requested addressing mode.
    InvalidAddress,
    /// The driver was used before `init`.
    NotInitialized,
    /// `init` was called twice.
    AlreadyInitialized,
    /// The hardware collaborator failed during initialization.
    HardwareFault,
    /// The handle does not name a live descriptor.
    InvalidHandle,
    /// The descriptor is not in a state that allows the operation.
    InvalidState,
    /// Every descriptor slot is allocated.
    PoolExhausted,
    /// Transactions are still queued or in flight.
    Busy,
}

impl core::fmt::Display for I2cError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            I2cError::QueueFull => "transaction queue full",
            I2cError::InvalidOp => "invalid operation",
            I2cError::InvalidLength => "buffer length exceeds bound",
            I2cError::InvalidAddress => "invalid address",
            I2cError::NotInitialized => "driver not initialized",
            I2cError::AlreadyInitialized => "driver already initialized",
            I2cError::HardwareFault => "hardware fault",
            I2cError::InvalidHandle => "invalid transaction handle",
            I2cError::InvalidState => "transaction in wrong state",
            I2cError::PoolExhausted => "transaction pool exhausted",
            I2cError::Busy => "bus busy",
        };
        f.write_str(msg)
    }
}

/// Why a transaction failed on the bus.
///
/// Recorded in the descriptor rather than returned, and also used as the
/// error type of the blocking `I2cController`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BusFault {
    AddressNack,
    DataNack,
    ArbitrationLoss,
    ClockStretchTimeout,
    Bus,
    Overrun,
    Other,
}

impl BusFault {
    #[must_use]
    pub fn from_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address) => BusFault::AddressNack,
            ErrorKind::NoAcknowledge(_) => BusFault::DataNack,
            ErrorKind::ArbitrationLoss => BusFault::ArbitrationLoss,
            ErrorKind::Bus => BusFault::Bus,
            ErrorKind::Overrun => BusFault::Overrun,
            _ => BusFault::Other,
        }
    }

    #[must_use]
    pub fn is_nack(self) -> bool {
        matches!(self, BusFault::AddressNack | BusFault::DataNack)
    }
}

impl embedded_hal::i2c::Error for BusFault {
    fn kind(&self) -> ErrorKind {
        match self {
            BusFault::AddressNack => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
            BusFault::DataNack => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data),
            BusFault::ArbitrationLoss => ErrorKind::ArbitrationLoss,
            BusFault::Bus => ErrorKind::Bus,
            BusFault::Overrun => ErrorKind::Overrun,
            BusFault::ClockStretchTimeout | BusFault::Other => ErrorKind::Other,
        }
    }
}
