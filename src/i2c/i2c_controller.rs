// Licensed under the Apache-2.0 license

//! Blocking embedded-hal `I2c` front end.
//!
//! For code that wants to own the bus directly (board bring-up, simple
//! sensor drivers) instead of going through the transaction queue. It
//! shares the phase sequencing with `I2cDriver`, and sleeps one
//! `poll_interval` between polls whenever the hardware is not ready, so the
//! clock-stretch timeout is measured in wall-clock time.

use crate::common::{Logger, NoOpLogger};
use crate::i2c::common::{BusFault, Direction, I2cAddress, I2cConfig, I2cError};
use crate::i2c::sequencer::{LegBuffer, LegPlan, Sequencer, Step};
use crate::i2c::traits::I2cBusPrimitives;
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{Operation, SevenBitAddress, TenBitAddress};

pub struct I2cController<H: I2cBusPrimitives, D: DelayNs, L: Logger = NoOpLogger> {
    hardware: H,
    delay: D,
    config: I2cConfig,
    logger: L,
    sequencer: Sequencer,
}

impl<H: I2cBusPrimitives, D: DelayNs, L: Logger> I2cController<H, D, L> {
    /// Initialize the hardware and take ownership of it.
    ///
    /// # Errors
    /// `HardwareFault` if the controller rejects the configuration.
    pub fn new(
        mut hardware: H,
        delay: D,
        mut config: I2cConfig,
        mut logger: L,
    ) -> Result<Self, I2cError> {
        if let Err(e) = hardware.init(&mut config) {
            logger.error(format_args!("i2c: controller init failed: {e:?}"));
            return Err(I2cError::HardwareFault);
        }
        if let Err(e) = hardware.configure_timing(config.speed, &config.timing_config) {
            logger.error(format_args!("i2c: timing setup failed: {e:?}"));
            hardware.disable();
            return Err(I2cError::HardwareFault);
        }
        let budget = config.blocking_stall_budget();
        Ok(Self {
            hardware,
            delay,
            config,
            logger,
            sequencer: Sequencer::new(budget),
        })
    }

    #[must_use]
    pub fn config(&self) -> &I2cConfig {
        &self.config
    }

    /// Disable the peripheral and hand back its parts.
    pub fn free(mut self) -> (H, D, L) {
        self.hardware.disable();
        (self.hardware, self.delay, self.logger)
    }

    fn run(
        &mut self,
        address: I2cAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), BusFault> {
        self.sequencer.reset(self.config.blocking_stall_budget());
        let period_us = self.config.poll_interval.ticks();
        let mut previous: Option<Direction> = None;
        let mut ops = operations.iter_mut().peekable();

        while let Some(op) = ops.next() {
            let next = ops.peek();
            let next_is_read = matches!(next, Some(Operation::Read(_)));
            let is_last = next.is_none();
            let (direction, mut buffer) = match op {
                Operation::Write(bytes) => (Direction::Write, LegBuffer::Tx(*bytes)),
                Operation::Read(bytes) => (Direction::Read, LegBuffer::Rx(&mut **bytes)),
            };
            // Adjacent operations in the same direction share one address phase.
            let plan = LegPlan {
                fresh: previous != Some(direction),
                nack_last: direction == Direction::Read && !next_is_read,
                stop_after: is_last,
            };
            previous = Some(direction);

            self.sequencer.begin(&plan);
            loop {
                match self
                    .sequencer
                    .step(&mut self.hardware, address, &plan, &mut buffer)
                {
                    Step::Pending => {}
                    Step::Stalled => self.delay.delay_us(period_us),
                    Step::LegComplete | Step::Finished(Ok(())) => break,
                    Step::Finished(Err(fault)) => {
                        self.logger.warn(format_args!(
                            "i2c: transfer to {:#04x} failed: {:?}",
                            address.raw(),
                            fault
                        ));
                        if matches!(fault, BusFault::ClockStretchTimeout | BusFault::Bus) {
                            if let Err(e) = self.hardware.recover_bus() {
                                self.logger
                                    .warn(format_args!("i2c: bus recovery failed: {e:?}"));
                            }
                        }
                        return Err(fault);
                    }
                }
            }
        }
        Ok(())
    }
}

impl<H: I2cBusPrimitives, D: DelayNs, L: Logger> embedded_hal::i2c::ErrorType
    for I2cController<H, D, L>
{
    type Error = BusFault;
}

impl<H: I2cBusPrimitives, D: DelayNs, L: Logger> embedded_hal::i2c::I2c<SevenBitAddress>
    for I2cController<H, D, L>
{
    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let address = I2cAddress::seven_bit(address).map_err(|_| BusFault::Other)?;
        self.run(address, operations)
    }
}

impl<H: I2cBusPrimitives, D: DelayNs, L: Logger> embedded_hal::i2c::I2c<TenBitAddress>
    for I2cController<H, D, L>
{
    fn transaction(
        &mut self,
        address: TenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let address = I2cAddress::ten_bit(address).map_err(|_| BusFault::Other)?;
        self.run(address, operations)
    }
}
