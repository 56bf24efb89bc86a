// Licensed under the Apache-2.0 license

//! Queued, non-blocking I2C transaction driver.
//!
//! `I2cDriver` is the single owned context for one bus. The application
//! allocates descriptors from the driver's pool, fills them in and submits
//! them; `service()` is then called from a periodic loop or from the bus
//! interrupt handler and advances the oldest transaction through the bus
//! phases.
//!
//! ```text
//! allocate -> prepare -> submit ──> [queue] ──> service ... service
//!                                                  │
//!     transaction(h).result() <── Completed <──────┘
//! ```
//!
//! When submitting and servicing happen in different contexts (main loop
//! and bus interrupt), `split()` hands out a `Submitter` and a `Servicer`.
//! They share only the queue and the descriptor slots, each guarded by its
//! own short critical section; the hardware, logger and statistics belong
//! to the `Servicer` alone.
//!
//! At most one transaction is `Processing` at any time. Bus faults are
//! recorded in the descriptor and counted in `I2cStats`; they never stop the
//! servicer, which moves on to the next queued transaction. There is no
//! automatic retry: the owner inspects the result and resubmits if it wants.

use crate::common::{Logger, NoOpLogger};
use crate::i2c::common::{
    BusFault, Direction, I2cConfig, I2cError, ServiceMode, I2C_INTR_ERROR, I2C_INTR_EVENT,
};
use crate::i2c::pool::TransactionPool;
use crate::i2c::queue::{TransactionQueue, I2C_TRANSACTION_QUEUE_SIZE};
use crate::i2c::sequencer::{LegBuffer, LegPlan, Sequencer, Step};
use crate::i2c::traits::I2cBusPrimitives;
use crate::i2c::transaction::{Operation, Transaction, TxnHandle, TxnResult, TxnState};
use embedded_hal::delay::DelayNs;
use fugit::HertzU32;

/// Default number of descriptors owned by a driver.
pub const I2C_TRANSACTION_POOL_SIZE: usize = 10;

/// Called once per transaction as it reaches `Completed`.
pub type CompletionCallback = fn(TxnHandle, TxnResult);

/// What a call to `service()` did.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ServiceStatus {
    /// Nothing queued, nothing in flight.
    Idle,
    /// The transaction is still on the bus.
    Busy(TxnHandle),
    /// The transaction reached `Completed` during this call.
    Completed(TxnHandle),
}

/// Error counters, plus totals of completed transactions.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct I2cStats {
    /// NACKs while transmitting (address or data).
    pub tx_errors: u32,
    /// NACKs while addressing a target for reading.
    pub rx_errors: u32,
    /// Timeouts, bus errors and overruns.
    pub bus_errors: u32,
    pub arbitration_lost_count: u32,
    pub completed: u32,
    pub failed: u32,
}

#[derive(Copy, Clone, Debug)]
struct ActiveTransaction {
    handle: TxnHandle,
    operation: Operation,
    leg: usize,
    direction: Direction,
    plan: LegPlan,
}

/// Framing of leg `leg` of `operation`, or `None` past the last leg.
fn leg_plan(operation: Operation, leg: usize) -> Option<(Direction, LegPlan)> {
    let write = |stop_after| {
        (
            Direction::Write,
            LegPlan {
                fresh: true,
                nack_last: false,
                stop_after,
            },
        )
    };
    let read = (
        Direction::Read,
        LegPlan {
            fresh: true,
            nack_last: true,
            stop_after: true,
        },
    );
    match (operation, leg) {
        (Operation::Write, 0) => Some(write(true)),
        (Operation::Read, 0) => Some(read),
        (Operation::WriteRead, 0) => Some(write(false)),
        (Operation::WriteRead, 1) => Some(read),
        _ => None,
    }
}

/// State touched only by whoever services the bus.
struct BusContext<H, D, L> {
    hardware: H,
    delay: D,
    logger: L,
    config: Option<I2cConfig>,
    bus_hz: u32,
    sequencer: Sequencer,
    active: Option<ActiveTransaction>,
    stats: I2cStats,
    on_complete: Option<CompletionCallback>,
}

pub struct I2cDriver<
    H: I2cBusPrimitives,
    D: DelayNs,
    L: Logger = NoOpLogger,
    const QUEUE: usize = { I2C_TRANSACTION_QUEUE_SIZE },
    const POOL: usize = { I2C_TRANSACTION_POOL_SIZE },
> {
    queue: TransactionQueue<QUEUE>,
    pool: TransactionPool<POOL>,
    bus: BusContext<H, D, L>,
}

impl<H: I2cBusPrimitives, D: DelayNs, L: Logger, const QUEUE: usize, const POOL: usize>
    I2cDriver<H, D, L, QUEUE, POOL>
{
    /// Take ownership of the controller. Nothing touches the hardware until
    /// `init`.
    ///
    /// `delay` is only used by `ServiceMode::RunToCompletion`, which sleeps
    /// one `poll_interval` whenever the hardware is not ready.
    pub fn new(hardware: H, delay: D, logger: L) -> Self {
        Self {
            queue: TransactionQueue::new(),
            pool: TransactionPool::new(),
            bus: BusContext {
                hardware,
                delay,
                logger,
                config: None,
                bus_hz: 0,
                sequencer: Sequencer::new(1),
                active: None,
                stats: I2cStats::default(),
                on_complete: None,
            },
        }
    }

    /// Bring up the controller and make the driver ready for `submit`.
    ///
    /// Pins and clocks must already be configured. When
    /// `config.interrupt_driven` is set, event and error interrupts are
    /// enabled and `service()` is expected to be called from the handler.
    /// A target holding SCL low raises no interrupt, so a periodic timer
    /// must also call `service()` every `service_period` while a
    /// transaction is in flight for the clock-stretch timeout to elapse.
    ///
    /// # Errors
    /// `AlreadyInitialized` on a second call, `HardwareFault` if the
    /// controller rejects the configuration.
    pub fn init(&mut self, mut config: I2cConfig) -> Result<(), I2cError> {
        let bus = &mut self.bus;
        if bus.config.is_some() {
            return Err(I2cError::AlreadyInitialized);
        }
        if let Err(e) = bus.hardware.init(&mut config) {
            bus.logger
                .error(format_args!("i2c: controller init failed: {e:?}"));
            return Err(I2cError::HardwareFault);
        }
        let bus_hz = match bus
            .hardware
            .configure_timing(config.speed, &config.timing_config)
        {
            Ok(hz) => hz,
            Err(e) => {
                bus.logger
                    .error(format_args!("i2c: timing setup failed: {e:?}"));
                bus.hardware.disable();
                return Err(I2cError::HardwareFault);
            }
        };
        if config.interrupt_driven {
            bus.hardware
                .enable_interrupts(I2C_INTR_EVENT | I2C_INTR_ERROR);
        }

        self.queue.clear();
        bus.sequencer.reset(config.stall_budget());
        bus.bus_hz = bus_hz;
        bus.config = Some(config);
        bus.logger.info(format_args!(
            "i2c: ready at {} Hz, {:?} service, stall budget {}",
            bus_hz,
            config.service_mode,
            config.stall_budget()
        ));
        Ok(())
    }

    /// Shut the controller down. Descriptors stay allocated.
    ///
    /// # Errors
    /// `NotInitialized`, or `Busy` while transactions are queued or in flight.
    pub fn deinit(&mut self) -> Result<(), I2cError> {
        self.ensure_initialized()?;
        if !self.is_idle() {
            return Err(I2cError::Busy);
        }
        let bus = &mut self.bus;
        bus.hardware
            .clear_interrupts(I2C_INTR_EVENT | I2C_INTR_ERROR);
        bus.hardware.disable();
        bus.config = None;
        bus.bus_hz = 0;
        bus.logger.info(format_args!("i2c: controller disabled"));
        Ok(())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.bus.config.is_some()
    }

    #[must_use]
    pub fn config(&self) -> Option<&I2cConfig> {
        self.bus.config.as_ref()
    }

    /// Bus clock reported by the controller at `init`.
    #[must_use]
    pub fn bus_frequency(&self) -> Option<HertzU32> {
        self.bus
            .config
            .map(|_| HertzU32::from_raw(self.bus.bus_hz))
    }

    /// # Errors
    /// `PoolExhausted` when every descriptor is in use.
    pub fn allocate(&mut self) -> Result<TxnHandle, I2cError> {
        self.pool.allocate()
    }

    /// Read access to a descriptor in any state.
    ///
    /// # Errors
    /// `InvalidHandle` for stale or unknown handles.
    pub fn transaction(&mut self, handle: TxnHandle) -> Result<&Transaction, I2cError> {
        self.pool.get(handle)
    }

    /// Write access to a descriptor that the driver is not using.
    ///
    /// # Errors
    /// `InvalidHandle`, or `InvalidState` while the descriptor is queued or
    /// being processed.
    pub fn transaction_mut(&mut self, handle: TxnHandle) -> Result<&mut Transaction, I2cError> {
        let txn = self.pool.get_mut(handle)?;
        if txn.is_owned_by_driver() {
            return Err(I2cError::InvalidState);
        }
        Ok(txn)
    }

    /// # Errors
    /// `InvalidHandle`, or `InvalidState` while queued or processing.
    pub fn release(&mut self, handle: TxnHandle) -> Result<(), I2cError> {
        self.pool.release(handle)
    }

    /// Validate a `Created` descriptor and append it to the queue.
    ///
    /// Rejection leaves the descriptor and queue untouched. A completed
    /// descriptor must be `reset()` before it can be submitted again.
    ///
    /// # Errors
    /// `NotInitialized`, `InvalidHandle`, `InvalidState`, `InvalidOp`,
    /// `InvalidLength` or `QueueFull`.
    pub fn submit(&mut self, handle: TxnHandle) -> Result<(), I2cError> {
        self.ensure_initialized()?;
        Submitter {
            queue: &self.queue,
            pool: &self.pool,
        }
        .submit(handle)
    }

    /// Advance the bus state machine.
    ///
    /// In `ServiceMode::Incremental` at most one hardware primitive is
    /// issued per call; in `RunToCompletion` the in-flight transaction is
    /// driven until it completes. Either way every hardware wait is bounded
    /// by the stall budget.
    ///
    /// # Errors
    /// `NotInitialized` before `init`.
    pub fn service(&mut self) -> Result<ServiceStatus, I2cError> {
        let config = *self.ensure_initialized()?;
        Ok(self.bus.service(&config, &self.queue, &self.pool))
    }

    /// Split into a submitting half and a servicing half that can live in
    /// different execution contexts.
    ///
    /// # Errors
    /// `NotInitialized` before `init`.
    pub fn split(
        &mut self,
    ) -> Result<(Submitter<'_, QUEUE, POOL>, Servicer<'_, H, D, L, QUEUE, POOL>), I2cError> {
        let config = *self.ensure_initialized()?;
        let submitter = Submitter {
            queue: &self.queue,
            pool: &self.pool,
        };
        let servicer = Servicer {
            bus: &mut self.bus,
            config,
            queue: &self.queue,
            pool: &self.pool,
        };
        Ok((submitter, servicer))
    }

    pub fn set_completion_callback(&mut self, callback: Option<CompletionCallback>) {
        self.bus.on_complete = callback;
    }

    #[must_use]
    pub fn stats(&self) -> I2cStats {
        self.bus.stats
    }

    pub fn reset_stats(&mut self) {
        self.bus.stats = I2cStats::default();
    }

    /// Transactions waiting in the queue, not counting the one in flight.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// The transaction currently on the bus.
    #[must_use]
    pub fn in_flight(&self) -> Option<TxnHandle> {
        self.bus.active.map(|active| active.handle)
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.bus.active.is_none() && self.queue.is_empty()
    }

    #[must_use]
    pub fn hardware(&self) -> &H {
        &self.bus.hardware
    }

    /// Direct controller access between transactions.
    ///
    /// # Errors
    /// `Busy` while a transaction is on the bus.
    pub fn hardware_mut(&mut self) -> Result<&mut H, I2cError> {
        if self.bus.active.is_some() {
            return Err(I2cError::Busy);
        }
        Ok(&mut self.bus.hardware)
    }

    /// Give back the controller, the delay and the logger.
    pub fn free(self) -> (H, D, L) {
        (self.bus.hardware, self.bus.delay, self.bus.logger)
    }

    fn ensure_initialized(&self) -> Result<&I2cConfig, I2cError> {
        self.bus.config.as_ref().ok_or(I2cError::NotInitialized)
    }
}

/// Producer half of a split driver.
///
/// Every method takes `&self` and holds a critical section only for the
/// slot or queue update it performs.
#[derive(Copy, Clone)]
pub struct Submitter<'a, const QUEUE: usize, const POOL: usize> {
    queue: &'a TransactionQueue<QUEUE>,
    pool: &'a TransactionPool<POOL>,
}

impl<const QUEUE: usize, const POOL: usize> Submitter<'_, QUEUE, POOL> {
    /// # Errors
    /// `PoolExhausted` when every descriptor is in use.
    pub fn allocate(&self) -> Result<TxnHandle, I2cError> {
        self.pool.allocate()
    }

    /// # Errors
    /// `InvalidHandle`, or `InvalidState` while queued or processing.
    pub fn release(&self, handle: TxnHandle) -> Result<(), I2cError> {
        self.pool.release(handle)
    }

    /// Inspect a descriptor in any state.
    ///
    /// # Errors
    /// `InvalidHandle` for stale or unknown handles.
    pub fn transaction<R>(
        &self,
        handle: TxnHandle,
        f: impl FnOnce(&Transaction) -> R,
    ) -> Result<R, I2cError> {
        self.pool.with(handle, f)
    }

    /// Edit a descriptor the servicer is not using.
    ///
    /// # Errors
    /// `InvalidHandle`, or `InvalidState` while queued or processing.
    pub fn transaction_mut<R>(
        &self,
        handle: TxnHandle,
        f: impl FnOnce(&mut Transaction) -> R,
    ) -> Result<R, I2cError> {
        self.pool.with_mut(handle, |txn| {
            if txn.is_owned_by_driver() {
                return Err(I2cError::InvalidState);
            }
            Ok(f(txn))
        })?
    }

    /// Validate a `Created` descriptor and append it to the queue.
    ///
    /// # Errors
    /// `InvalidHandle`, `InvalidState`, `InvalidOp`, `InvalidLength` or
    /// `QueueFull`; the descriptor and queue are unchanged on error.
    pub fn submit(&self, handle: TxnHandle) -> Result<(), I2cError> {
        // Queued must be visible before the servicer can dequeue the handle.
        self.pool.with_mut(handle, |txn| {
            if txn.state() != TxnState::Created {
                return Err(I2cError::InvalidState);
            }
            txn.validate()?;
            self.queue.enqueue(handle)?;
            txn.mark_queued();
            Ok(())
        })?
    }

    /// Transactions waiting in the queue.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

/// Consumer half of a split driver, for the bus interrupt or poll loop.
pub struct Servicer<
    'a,
    H: I2cBusPrimitives,
    D: DelayNs,
    L: Logger,
    const QUEUE: usize,
    const POOL: usize,
> {
    bus: &'a mut BusContext<H, D, L>,
    config: I2cConfig,
    queue: &'a TransactionQueue<QUEUE>,
    pool: &'a TransactionPool<POOL>,
}

impl<H: I2cBusPrimitives, D: DelayNs, L: Logger, const QUEUE: usize, const POOL: usize>
    Servicer<'_, H, D, L, QUEUE, POOL>
{
    /// Same as `I2cDriver::service`.
    pub fn service(&mut self) -> ServiceStatus {
        self.bus.service(&self.config, self.queue, self.pool)
    }

    #[must_use]
    pub fn in_flight(&self) -> Option<TxnHandle> {
        self.bus.active.map(|active| active.handle)
    }

    #[must_use]
    pub fn stats(&self) -> I2cStats {
        self.bus.stats
    }
}

impl<H: I2cBusPrimitives, D: DelayNs, L: Logger> BusContext<H, D, L> {
    fn service<const QUEUE: usize, const POOL: usize>(
        &mut self,
        config: &I2cConfig,
        queue: &TransactionQueue<QUEUE>,
        pool: &TransactionPool<POOL>,
    ) -> ServiceStatus {
        let next = match self.active {
            Some(active) => Some(active),
            None => self.start_next(config, queue, pool),
        };
        let Some(mut active) = next else {
            return ServiceStatus::Idle;
        };

        loop {
            match self.step(pool, &active) {
                Step::Pending => {}
                Step::Stalled => {
                    if config.service_mode == ServiceMode::RunToCompletion {
                        self.delay.delay_us(config.poll_interval.ticks());
                    }
                }
                Step::LegComplete => {
                    active.leg += 1;
                    match leg_plan(active.operation, active.leg) {
                        Some((direction, plan)) => {
                            active.direction = direction;
                            active.plan = plan;
                            self.sequencer.begin(&plan);
                        }
                        None => {
                            // Final legs always end with a stop.
                            self.hardware.abort();
                            self.finish(pool, &active, Err(BusFault::Other));
                            return ServiceStatus::Completed(active.handle);
                        }
                    }
                }
                Step::Finished(outcome) => {
                    self.finish(pool, &active, outcome);
                    return ServiceStatus::Completed(active.handle);
                }
            }
            if config.service_mode == ServiceMode::Incremental {
                self.active = Some(active);
                return ServiceStatus::Busy(active.handle);
            }
        }
    }

    fn start_next<const QUEUE: usize, const POOL: usize>(
        &mut self,
        config: &I2cConfig,
        queue: &TransactionQueue<QUEUE>,
        pool: &TransactionPool<POOL>,
    ) -> Option<ActiveTransaction> {
        while let Some(handle) = queue.try_dequeue() {
            let started = pool.with_mut(handle, |txn| {
                txn.mark_processing();
                let planned = txn.operation().ok().and_then(|operation| {
                    leg_plan(operation, 0).map(|(direction, plan)| ActiveTransaction {
                        handle,
                        operation,
                        leg: 0,
                        direction,
                        plan,
                    })
                });
                if planned.is_none() {
                    // Operation codes are checked at submit and frozen while queued.
                    txn.complete(Err(BusFault::Other), 0, 0);
                }
                (txn.address().raw(), planned)
            });
            let Ok((address, Some(active))) = started else {
                continue;
            };
            self.sequencer.reset(config.stall_budget());
            self.sequencer.begin(&active.plan);
            self.active = Some(active);
            self.logger.debug(format_args!(
                "i2c: txn {} start, {:?} to {:#04x}",
                handle.index(),
                active.operation,
                address
            ));
            return Some(active);
        }
        None
    }

    /// One primitive, issued while the descriptor's slot is held.
    fn step<const POOL: usize>(
        &mut self,
        pool: &TransactionPool<POOL>,
        active: &ActiveTransaction,
    ) -> Step {
        let hardware = &mut self.hardware;
        let sequencer = &mut self.sequencer;
        let stepped = pool.with_mut(active.handle, |txn| {
            let address = txn.address();
            let mut buffer = match active.direction {
                Direction::Write => LegBuffer::Tx(txn.tx_window()),
                Direction::Read => LegBuffer::Rx(txn.rx_window_mut()),
            };
            sequencer.step(hardware, address, &active.plan, &mut buffer)
        });
        match stepped {
            Ok(step) => step,
            Err(_) => {
                self.hardware.abort();
                Step::Finished(Err(BusFault::Other))
            }
        }
    }

    fn finish<const POOL: usize>(
        &mut self,
        pool: &TransactionPool<POOL>,
        active: &ActiveTransaction,
        outcome: Result<(), BusFault>,
    ) {
        self.active = None;
        let handle = active.handle;
        let transmitted = self.sequencer.transmitted();
        let received = self.sequencer.received();
        let address = pool
            .with_mut(handle, |txn| {
                txn.complete(outcome, transmitted, received);
                txn.address().raw()
            })
            .unwrap_or(0);

        let result = match outcome {
            Ok(()) => {
                self.stats.completed = self.stats.completed.wrapping_add(1);
                self.logger.debug(format_args!(
                    "i2c: txn {} to {:#04x} done, {} sent, {} received",
                    handle.index(),
                    address,
                    transmitted,
                    received
                ));
                TxnResult::Success
            }
            Err(fault) => {
                self.record_fault(fault, active.direction);
                self.logger.warn(format_args!(
                    "i2c: txn {} to {:#04x} failed: {:?} after {} sent, {} received",
                    handle.index(),
                    address,
                    fault,
                    transmitted,
                    received
                ));
                if matches!(fault, BusFault::ClockStretchTimeout | BusFault::Bus) {
                    if let Err(e) = self.hardware.recover_bus() {
                        self.logger
                            .warn(format_args!("i2c: bus recovery failed: {e:?}"));
                    }
                }
                TxnResult::Fail
            }
        };

        if let Some(callback) = self.on_complete {
            callback(handle, result);
        }
    }

    fn record_fault(&mut self, fault: BusFault, direction: Direction) {
        let stats = &mut self.stats;
        stats.failed = stats.failed.wrapping_add(1);
        let counter = match (fault, direction) {
            (BusFault::AddressNack | BusFault::DataNack, Direction::Write) => {
                &mut stats.tx_errors
            }
            (BusFault::AddressNack | BusFault::DataNack, Direction::Read) => {
                &mut stats.rx_errors
            }
            (BusFault::ArbitrationLoss, _) => &mut stats.arbitration_lost_count,
            _ => &mut stats.bus_errors,
        };
        *counter = counter.wrapping_add(1);
    }
}
