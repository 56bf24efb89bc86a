// Licensed under the Apache-2.0 license

//! Simulated I2C controller for host tests.
//!
//! Targets are register files with an auto-incrementing pointer: the first
//! byte of a write leg selects the register, further bytes are stored, and
//! reads return consecutive registers. Every primitive is recorded in
//! `events` so tests can check the exact bus sequence.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

use crate::i2c::common::{Direction, I2cAddress, I2cConfig, I2cSpeed, TimingConfig};
use crate::i2c::traits::{I2cBusPrimitives, I2cHardwareCore};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SimError(pub ErrorKind);

impl embedded_hal::i2c::Error for SimError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BusEvent {
    Start,
    Address(I2cAddress, Direction),
    Write(u8),
    Read(u8, bool),
    Stop,
    Abort,
}

pub struct SimDevice {
    pub address: u16,
    pub registers: [u8; 256],
    pub pointer: u8,
    /// Refuse the address phase of read legs.
    pub nack_read_address: bool,
    /// NACK every data byte after this many have been accepted.
    pub nack_after: Option<usize>,
    pub accepted: usize,
    expect_pointer: bool,
}

impl SimDevice {
    fn new(address: u16) -> Self {
        Self {
            address,
            registers: [0; 256],
            pointer: 0,
            nack_read_address: false,
            nack_after: None,
            accepted: 0,
            expect_pointer: false,
        }
    }
}

pub struct SimulatedBus {
    pub events: Vec<BusEvent>,
    pub devices: Vec<SimDevice>,
    /// `WouldBlock` results returned before each primitive completes.
    pub latency: u32,
    /// Every primitive blocks forever.
    pub hold_clock: bool,
    pub lose_arbitration: bool,
    pub fail_init: bool,
    pub fail_recovery: bool,
    pub recoveries: u32,
    pub interrupts: u32,
    pub enabled: bool,
    pub timing: Option<I2cSpeed>,
    stalled: u32,
    current: Option<usize>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            devices: Vec::new(),
            latency: 0,
            hold_clock: false,
            lose_arbitration: false,
            fail_init: false,
            fail_recovery: false,
            recoveries: 0,
            interrupts: 0,
            enabled: false,
            timing: None,
            stalled: 0,
            current: None,
        }
    }

    pub fn add_device(&mut self, address: u16) -> &mut SimDevice {
        self.devices.push(SimDevice::new(address));
        self.devices.last_mut().unwrap()
    }

    pub fn device_mut(&mut self, address: u16) -> &mut SimDevice {
        self.devices
            .iter_mut()
            .find(|d| d.address == address)
            .unwrap()
    }

    pub fn load_registers(&mut self, address: u16, first: u8, values: &[u8]) {
        let device = self.device_mut(address);
        for (offset, value) in values.iter().enumerate() {
            device.registers[usize::from(first) + offset] = *value;
        }
    }

    pub fn register(&self, address: u16, register: u8) -> u8 {
        let device = self.devices.iter().find(|d| d.address == address).unwrap();
        device.registers[usize::from(register)]
    }

    pub fn count(&self, event: BusEvent) -> usize {
        self.events.iter().filter(|e| **e == event).count()
    }

    fn stall(&mut self) -> bool {
        if self.hold_clock {
            return true;
        }
        if self.stalled < self.latency {
            self.stalled += 1;
            return true;
        }
        self.stalled = 0;
        false
    }

    fn nack(source: NoAcknowledgeSource) -> nb::Error<SimError> {
        nb::Error::Other(SimError(ErrorKind::NoAcknowledge(source)))
    }
}

impl I2cHardwareCore for SimulatedBus {
    type Error = SimError;

    fn init(&mut self, _config: &mut I2cConfig) -> Result<(), Self::Error> {
        if self.fail_init {
            return Err(SimError(ErrorKind::Bus));
        }
        self.enabled = true;
        Ok(())
    }

    fn configure_timing(
        &mut self,
        speed: I2cSpeed,
        _timing: &TimingConfig,
    ) -> Result<u32, Self::Error> {
        self.timing = Some(speed);
        Ok(speed as u32)
    }

    fn enable_interrupts(&mut self, mask: u32) {
        self.interrupts |= mask;
    }

    fn clear_interrupts(&mut self, mask: u32) {
        self.interrupts &= !mask;
    }

    fn recover_bus(&mut self) -> Result<(), Self::Error> {
        self.recoveries += 1;
        self.current = None;
        if self.fail_recovery {
            return Err(SimError(ErrorKind::Bus));
        }
        Ok(())
    }

    fn disable(&mut self) {
        self.enabled = false;
    }
}

impl I2cBusPrimitives for SimulatedBus {
    fn start(&mut self) -> nb::Result<(), Self::Error> {
        if self.stall() {
            return Err(nb::Error::WouldBlock);
        }
        if self.lose_arbitration {
            return Err(nb::Error::Other(SimError(ErrorKind::ArbitrationLoss)));
        }
        self.events.push(BusEvent::Start);
        Ok(())
    }

    fn send_address(
        &mut self,
        address: I2cAddress,
        direction: Direction,
    ) -> nb::Result<(), Self::Error> {
        if self.stall() {
            return Err(nb::Error::WouldBlock);
        }
        self.events.push(BusEvent::Address(address, direction));
        let Some(index) = self.devices.iter().position(|d| d.address == address.raw()) else {
            return Err(Self::nack(NoAcknowledgeSource::Address));
        };
        let device = &mut self.devices[index];
        if direction == Direction::Read && device.nack_read_address {
            return Err(Self::nack(NoAcknowledgeSource::Address));
        }
        device.expect_pointer = direction == Direction::Write;
        self.current = Some(index);
        Ok(())
    }

    fn write_byte(&mut self, byte: u8) -> nb::Result<(), Self::Error> {
        if self.stall() {
            return Err(nb::Error::WouldBlock);
        }
        self.events.push(BusEvent::Write(byte));
        let Some(index) = self.current else {
            return Err(nb::Error::Other(SimError(ErrorKind::Bus)));
        };
        let device = &mut self.devices[index];
        if device.nack_after.is_some_and(|limit| device.accepted >= limit) {
            return Err(Self::nack(NoAcknowledgeSource::Data));
        }
        if device.expect_pointer {
            device.pointer = byte;
            device.expect_pointer = false;
        } else {
            device.registers[usize::from(device.pointer)] = byte;
            device.pointer = device.pointer.wrapping_add(1);
        }
        device.accepted += 1;
        Ok(())
    }

    fn read_byte(&mut self, ack: bool) -> nb::Result<u8, Self::Error> {
        if self.stall() {
            return Err(nb::Error::WouldBlock);
        }
        let Some(index) = self.current else {
            return Err(nb::Error::Other(SimError(ErrorKind::Bus)));
        };
        let device = &mut self.devices[index];
        let byte = device.registers[usize::from(device.pointer)];
        device.pointer = device.pointer.wrapping_add(1);
        self.events.push(BusEvent::Read(byte, ack));
        Ok(byte)
    }

    fn stop(&mut self) -> nb::Result<(), Self::Error> {
        if self.stall() {
            return Err(nb::Error::WouldBlock);
        }
        self.events.push(BusEvent::Stop);
        self.current = None;
        Ok(())
    }

    fn abort(&mut self) {
        self.events.push(BusEvent::Abort);
        self.current = None;
        self.stalled = 0;
    }
}

/// Delay that only adds up the time it was asked to sleep.
#[derive(Default)]
pub struct CountingDelay {
    pub total_ns: u64,
}

impl DelayNs for CountingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += u64::from(ns);
    }
}

/// Log sink collecting everything written into a string.
#[derive(Default)]
pub struct LogSink {
    pub text: String,
}

impl embedded_io::ErrorType for LogSink {
    type Error = core::convert::Infallible;
}

impl embedded_io::Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.text.push_str(core::str::from_utf8(buf).unwrap());
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
