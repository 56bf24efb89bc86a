// Licensed under the Apache-2.0 license

//! Bus-phase sequencing shared by the queued driver and the blocking
//! controller.
//!
//! A transfer is split into legs: one direction, one address phase, a run of
//! data bytes and optionally a stop. `Sequencer::step` issues at most one
//! hardware primitive per call, so the caller decides whether to return
//! between primitives (interrupt servicing) or spin until the leg finishes.
//!
//! ```text
//! Start -> Address -> Data{0..len} -> Stop
//!   ^                      |
//!   +-- next leg (fresh) --+  (no stop: repeated start)
//! ```

use embedded_hal::i2c::Error as _;

use crate::i2c::common::{BusFault, Direction, I2cAddress};
use crate::i2c::traits::I2cBusPrimitives;

/// How one leg is framed on the wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct LegPlan {
    /// Begin with a (repeated) start and address phase.
    pub fresh: bool,
    /// NACK the final byte of a read leg.
    pub nack_last: bool,
    /// Release the bus with a stop once the data phase is done.
    pub stop_after: bool,
}

pub(crate) enum LegBuffer<'a> {
    Tx(&'a [u8]),
    Rx(&'a mut [u8]),
}

impl LegBuffer<'_> {
    fn direction(&self) -> Direction {
        match self {
            LegBuffer::Tx(_) => Direction::Write,
            LegBuffer::Rx(_) => Direction::Read,
        }
    }

    fn len(&self) -> usize {
        match self {
            LegBuffer::Tx(bytes) => bytes.len(),
            LegBuffer::Rx(bytes) => bytes.len(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    Start,
    Address,
    Data { position: usize },
    Stop,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Step {
    /// A primitive completed; more are needed for this leg.
    Pending,
    /// The hardware was not ready. Counted against the stall budget.
    Stalled,
    /// Data phase done and no stop requested; the bus is still owned.
    LegComplete,
    /// The transfer is over. On error the hardware has already been aborted.
    Finished(Result<(), BusFault>),
}

pub(crate) struct Sequencer {
    phase: Phase,
    stalls: u32,
    budget: u32,
    transmitted: usize,
    received: usize,
}

impl Sequencer {
    pub(crate) const fn new(budget: u32) -> Self {
        Self {
            phase: Phase::Start,
            stalls: 0,
            budget,
            transmitted: 0,
            received: 0,
        }
    }

    /// Forget any previous transfer.
    pub(crate) fn reset(&mut self, budget: u32) {
        *self = Self::new(budget);
    }

    pub(crate) fn begin(&mut self, plan: &LegPlan) {
        self.phase = if plan.fresh {
            Phase::Start
        } else {
            Phase::Data { position: 0 }
        };
        self.stalls = 0;
    }

    /// Bytes acknowledged by the target so far.
    pub(crate) fn transmitted(&self) -> usize {
        self.transmitted
    }

    pub(crate) fn received(&self) -> usize {
        self.received
    }

    /// Advance the current leg by at most one hardware primitive.
    pub(crate) fn step<H: I2cBusPrimitives>(
        &mut self,
        hw: &mut H,
        address: I2cAddress,
        plan: &LegPlan,
        buffer: &mut LegBuffer<'_>,
    ) -> Step {
        match self.advance(hw, address, plan, buffer) {
            Ok(step) => step,
            Err(fault) => {
                hw.abort();
                self.phase = Phase::Start;
                Step::Finished(Err(fault))
            }
        }
    }

    fn advance<H: I2cBusPrimitives>(
        &mut self,
        hw: &mut H,
        address: I2cAddress,
        plan: &LegPlan,
        buffer: &mut LegBuffer<'_>,
    ) -> Result<Step, BusFault> {
        match self.phase {
            Phase::Start => {
                if self.poll(hw.start())?.is_none() {
                    return Ok(Step::Stalled);
                }
                self.phase = Phase::Address;
                Ok(Step::Pending)
            }
            Phase::Address => {
                let len = buffer.len();
                if self.poll(hw.send_address(address, buffer.direction()))?.is_none() {
                    return Ok(Step::Stalled);
                }
                Ok(self.data_advanced(plan, 0, len))
            }
            Phase::Data { position } => {
                let len = buffer.len();
                if position >= len {
                    return Ok(self.data_advanced(plan, position, len));
                }
                let done = match buffer {
                    LegBuffer::Tx(bytes) => {
                        let byte = bytes.get(position).copied().unwrap_or_default();
                        let sent = self.poll(hw.write_byte(byte))?.is_some();
                        if sent {
                            self.transmitted += 1;
                        }
                        sent
                    }
                    LegBuffer::Rx(bytes) => {
                        let ack = !(plan.nack_last && position + 1 == len);
                        match self.poll(hw.read_byte(ack))? {
                            Some(byte) => {
                                if let Some(slot) = bytes.get_mut(position) {
                                    *slot = byte;
                                }
                                self.received += 1;
                                true
                            }
                            None => false,
                        }
                    }
                };
                if !done {
                    return Ok(Step::Stalled);
                }
                Ok(self.data_advanced(plan, position + 1, len))
            }
            Phase::Stop => {
                if self.poll(hw.stop())?.is_none() {
                    return Ok(Step::Stalled);
                }
                self.phase = Phase::Start;
                Ok(Step::Finished(Ok(())))
            }
        }
    }

    fn data_advanced(&mut self, plan: &LegPlan, position: usize, len: usize) -> Step {
        if position < len {
            self.phase = Phase::Data { position };
            Step::Pending
        } else if plan.stop_after {
            self.phase = Phase::Stop;
            Step::Pending
        } else {
            self.phase = Phase::Start;
            Step::LegComplete
        }
    }

    /// Fold one primitive result into the stall accounting.
    ///
    /// `Ok(None)` means "not yet"; too many of those in a row become a
    /// clock-stretch timeout.
    fn poll<T, E: embedded_hal::i2c::Error>(
        &mut self,
        result: nb::Result<T, E>,
    ) -> Result<Option<T>, BusFault> {
        match result {
            Ok(value) => {
                self.stalls = 0;
                Ok(Some(value))
            }
            Err(nb::Error::WouldBlock) => {
                self.stalls = self.stalls.saturating_add(1);
                if self.stalls > self.budget {
                    Err(BusFault::ClockStretchTimeout)
                } else {
                    Ok(None)
                }
            }
            Err(nb::Error::Other(e)) => Err(BusFault::from_kind(e.kind())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::mock::{BusEvent, SimulatedBus};

    const WRITE_LEG: LegPlan = LegPlan {
        fresh: true,
        nack_last: false,
        stop_after: true,
    };

    const READ_LEG: LegPlan = LegPlan {
        fresh: true,
        nack_last: true,
        stop_after: true,
    };

    fn addr(raw: u8) -> I2cAddress {
        I2cAddress::seven_bit(raw).unwrap()
    }

    fn run_leg(
        seq: &mut Sequencer,
        bus: &mut SimulatedBus,
        address: I2cAddress,
        plan: &LegPlan,
        mut buffer: LegBuffer<'_>,
    ) -> (Step, usize) {
        seq.begin(plan);
        let mut calls = 0;
        loop {
            calls += 1;
            let step = seq.step(bus, address, plan, &mut buffer);
            if !matches!(step, Step::Pending | Step::Stalled) {
                return (step, calls);
            }
        }
    }

    #[test]
    fn test_write_leg_one_primitive_per_step() {
        let mut bus = SimulatedBus::new();
        bus.add_device(0x50);
        let mut seq = Sequencer::new(4);

        let (step, calls) = run_leg(
            &mut seq,
            &mut bus,
            addr(0x50),
            &WRITE_LEG,
            LegBuffer::Tx(&[0xAA, 0x01]),
        );

        assert_eq!(step, Step::Finished(Ok(())));
        // start, address, two bytes, stop
        assert_eq!(calls, 5);
        assert_eq!(seq.transmitted(), 2);
        assert_eq!(
            bus.events,
            vec![
                BusEvent::Start,
                BusEvent::Address(addr(0x50), Direction::Write),
                BusEvent::Write(0xAA),
                BusEvent::Write(0x01),
                BusEvent::Stop,
            ]
        );
    }

    #[test]
    fn test_read_leg_nacks_only_last_byte() {
        let mut bus = SimulatedBus::new();
        bus.add_device(0x68);
        bus.load_registers(0x68, 0, &[0x11, 0x22, 0x33]);
        let mut seq = Sequencer::new(4);
        let mut rx = [0u8; 3];

        let (step, _) = run_leg(
            &mut seq,
            &mut bus,
            addr(0x68),
            &READ_LEG,
            LegBuffer::Rx(&mut rx),
        );

        assert_eq!(step, Step::Finished(Ok(())));
        assert_eq!(rx, [0x11, 0x22, 0x33]);
        assert_eq!(seq.received(), 3);
        assert!(bus.events.contains(&BusEvent::Read(0x22, true)));
        assert!(bus.events.contains(&BusEvent::Read(0x33, false)));
    }

    #[test]
    fn test_leg_without_stop_keeps_bus() {
        let mut bus = SimulatedBus::new();
        bus.add_device(0x68);
        let mut seq = Sequencer::new(4);
        let plan = LegPlan {
            fresh: true,
            nack_last: false,
            stop_after: false,
        };

        let (step, _) = run_leg(
            &mut seq,
            &mut bus,
            addr(0x68),
            &plan,
            LegBuffer::Tx(&[0x00]),
        );

        assert_eq!(step, Step::LegComplete);
        assert!(!bus.events.contains(&BusEvent::Stop));
    }

    #[test]
    fn test_address_nack_aborts() {
        let mut bus = SimulatedBus::new();
        let mut seq = Sequencer::new(4);

        let (step, _) = run_leg(
            &mut seq,
            &mut bus,
            addr(0x33),
            &WRITE_LEG,
            LegBuffer::Tx(&[1]),
        );

        assert_eq!(step, Step::Finished(Err(BusFault::AddressNack)));
        assert_eq!(bus.events.last(), Some(&BusEvent::Abort));
        assert_eq!(seq.transmitted(), 0);
    }

    #[test]
    fn test_stall_budget_exhaustion() {
        let mut bus = SimulatedBus::new();
        bus.add_device(0x50);
        bus.hold_clock = true;
        let mut seq = Sequencer::new(3);

        let (step, calls) = run_leg(
            &mut seq,
            &mut bus,
            addr(0x50),
            &WRITE_LEG,
            LegBuffer::Tx(&[1]),
        );

        assert_eq!(step, Step::Finished(Err(BusFault::ClockStretchTimeout)));
        // Three tolerated stalls, the fourth trips the budget.
        assert_eq!(calls, 4);
    }

    #[test]
    fn test_latency_within_budget_succeeds() {
        let mut bus = SimulatedBus::new();
        bus.add_device(0x50);
        bus.latency = 2;
        let mut seq = Sequencer::new(2);

        let (step, calls) = run_leg(
            &mut seq,
            &mut bus,
            addr(0x50),
            &WRITE_LEG,
            LegBuffer::Tx(&[1]),
        );

        assert_eq!(step, Step::Finished(Ok(())));
        // Four primitives, each preceded by two stalls.
        assert_eq!(calls, 12);
    }

    #[test]
    fn test_maximum_budget_counts_without_overflow() {
        let mut bus = SimulatedBus::new();
        bus.add_device(0x50);
        bus.hold_clock = true;
        let mut seq = Sequencer::new(u32::MAX);
        seq.begin(&WRITE_LEG);
        seq.stalls = u32::MAX - 1;
        let mut buffer = LegBuffer::Tx(&[1]);

        assert_eq!(
            seq.step(&mut bus, addr(0x50), &WRITE_LEG, &mut buffer),
            Step::Stalled
        );
        assert_eq!(seq.stalls, u32::MAX);
        // Saturates at the budget instead of wrapping back to zero.
        assert_eq!(
            seq.step(&mut bus, addr(0x50), &WRITE_LEG, &mut buffer),
            Step::Stalled
        );
        assert_eq!(seq.stalls, u32::MAX);
    }

    #[test]
    fn test_zero_length_read_is_address_probe() {
        let mut bus = SimulatedBus::new();
        bus.add_device(0x20);
        let mut seq = Sequencer::new(1);
        let mut rx = [0u8; 0];

        let (step, _) = run_leg(
            &mut seq,
            &mut bus,
            addr(0x20),
            &READ_LEG,
            LegBuffer::Rx(&mut rx),
        );

        assert_eq!(step, Step::Finished(Ok(())));
        assert_eq!(
            bus.events,
            vec![
                BusEvent::Start,
                BusEvent::Address(addr(0x20), Direction::Read),
                BusEvent::Stop,
            ]
        );
    }
}
