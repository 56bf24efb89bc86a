// Licensed under the Apache-2.0 license

//! Transaction descriptors.
//!
//! A `Transaction` is the record of one bus operation: the request filled in
//! by the application (address, operation, transmit data, receive length)
//! and the outcome filled in by the servicer (state, result, byte counts,
//! received data). Request fields are frozen from `submit` until the
//! descriptor reaches `Completed`.

use crate::i2c::common::{BusFault, Direction, I2cAddress, I2cError};

/// Upper bound on the bytes one transaction may transmit.
pub const TX_MESSAGE_MAX_LENGTH: usize = 1024;
/// Upper bound on the bytes one transaction may receive.
pub const RX_MESSAGE_MAX_LENGTH: usize = 1024;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    Write = 0,
    Read = 1,
    WriteRead = 2,
}

impl Operation {
    /// Direction of the first bus leg.
    #[must_use]
    pub fn first_direction(self) -> Direction {
        match self {
            Operation::Write | Operation::WriteRead => Direction::Write,
            Operation::Read => Direction::Read,
        }
    }

    #[must_use]
    pub fn has_read_leg(self) -> bool {
        matches!(self, Operation::Read | Operation::WriteRead)
    }
}

impl TryFrom<u8> for Operation {
    type Error = I2cError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Operation::Write),
            1 => Ok(Operation::Read),
            2 => Ok(Operation::WriteRead),
            _ => Err(I2cError::InvalidOp),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TxnState {
    Created,
    Queued,
    Processing,
    Completed,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TxnResult {
    None,
    Success,
    Fail,
}

/// Index of a descriptor slot plus the slot generation it was issued for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TxnHandle {
    index: usize,
    generation: u32,
}

impl TxnHandle {
    pub(crate) const fn new(index: usize, generation: u32) -> Self {
        Self { index, generation }
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.index
    }

    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

#[derive(Clone, Debug)]
pub struct Transaction {
    address: I2cAddress,
    op_code: u8,
    tx_data: [u8; TX_MESSAGE_MAX_LENGTH],
    tx_len: usize,
    rx_data: [u8; RX_MESSAGE_MAX_LENGTH],
    rx_len: usize,

    state: TxnState,
    result: TxnResult,
    fault: Option<BusFault>,
    bytes_transmitted: usize,
    bytes_received: usize,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    /// An empty zero-length write to the general call address.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            address: I2cAddress::GENERAL_CALL,
            op_code: Operation::Write as u8,
            tx_data: [0; TX_MESSAGE_MAX_LENGTH],
            tx_len: 0,
            rx_data: [0; RX_MESSAGE_MAX_LENGTH],
            rx_len: 0,
            state: TxnState::Created,
            result: TxnResult::None,
            fault: None,
            bytes_transmitted: 0,
            bytes_received: 0,
        }
    }

    /// Start a new lifecycle: back to `Created` with the outcome cleared and
    /// the receive buffer zeroed. Request fields are kept so the same
    /// request can be resubmitted.
    pub fn reset(&mut self) {
        self.state = TxnState::Created;
        self.result = TxnResult::None;
        self.fault = None;
        self.bytes_transmitted = 0;
        self.bytes_received = 0;
        self.rx_data.fill(0);
    }

    /// # Errors
    /// `InvalidLength` if `data` is longer than `TX_MESSAGE_MAX_LENGTH`.
    pub fn prepare_write(&mut self, address: I2cAddress, data: &[u8]) -> Result<(), I2cError> {
        self.prepare(address, Operation::Write, data, 0)
    }

    /// # Errors
    /// `InvalidLength` if `len` exceeds `RX_MESSAGE_MAX_LENGTH`.
    pub fn prepare_read(&mut self, address: I2cAddress, len: usize) -> Result<(), I2cError> {
        self.prepare(address, Operation::Read, &[], len)
    }

    /// # Errors
    /// `InvalidLength` if either buffer bound is exceeded.
    pub fn prepare_write_read(
        &mut self,
        address: I2cAddress,
        data: &[u8],
        len: usize,
    ) -> Result<(), I2cError> {
        self.prepare(address, Operation::WriteRead, data, len)
    }

    fn prepare(
        &mut self,
        address: I2cAddress,
        operation: Operation,
        data: &[u8],
        rx_len: usize,
    ) -> Result<(), I2cError> {
        if rx_len > RX_MESSAGE_MAX_LENGTH {
            return Err(I2cError::InvalidLength);
        }
        let dest = self
            .tx_data
            .get_mut(..data.len())
            .ok_or(I2cError::InvalidLength)?;
        dest.copy_from_slice(data);
        self.reset();
        self.address = address;
        self.op_code = operation as u8;
        self.tx_len = data.len();
        self.rx_len = rx_len;
        Ok(())
    }

    pub fn set_address(&mut self, address: I2cAddress) {
        self.address = address;
    }

    pub fn set_operation(&mut self, operation: Operation) {
        self.op_code = operation as u8;
    }

    /// Store a raw operation code, e.g. one decoded from a host command.
    /// Out-of-range codes are rejected by `submit`.
    pub fn set_operation_code(&mut self, code: u8) {
        self.op_code = code;
    }

    /// The whole transmit buffer; only the first `tx_len` bytes are sent.
    pub fn tx_buffer_mut(&mut self) -> &mut [u8] {
        &mut self.tx_data
    }

    /// Lengths are checked against their bounds by `submit`.
    pub fn set_tx_len(&mut self, len: usize) {
        self.tx_len = len;
    }

    pub fn set_rx_len(&mut self, len: usize) {
        self.rx_len = len;
    }

    #[must_use]
    pub fn address(&self) -> I2cAddress {
        self.address
    }

    #[must_use]
    pub fn operation_code(&self) -> u8 {
        self.op_code
    }

    /// # Errors
    /// `InvalidOp` if the stored code is outside the operation set.
    pub fn operation(&self) -> Result<Operation, I2cError> {
        Operation::try_from(self.op_code)
    }

    #[must_use]
    pub fn tx_len(&self) -> usize {
        self.tx_len
    }

    #[must_use]
    pub fn rx_len(&self) -> usize {
        self.rx_len
    }

    /// Bytes that will be (or were) transmitted.
    #[must_use]
    pub fn tx_data(&self) -> &[u8] {
        self.tx_data.get(..self.tx_len).unwrap_or_default()
    }

    /// Bytes actually received. Valid once `Completed`.
    #[must_use]
    pub fn rx_data(&self) -> &[u8] {
        self.rx_data.get(..self.bytes_received).unwrap_or_default()
    }

    /// The whole receive buffer, including bytes beyond `bytes_received`.
    #[must_use]
    pub fn rx_buffer(&self) -> &[u8] {
        &self.rx_data
    }

    #[must_use]
    pub fn state(&self) -> TxnState {
        self.state
    }

    #[must_use]
    pub fn result(&self) -> TxnResult {
        self.result
    }

    /// Failure classification when `result()` is `Fail`.
    #[must_use]
    pub fn fault(&self) -> Option<BusFault> {
        self.fault
    }

    #[must_use]
    pub fn bytes_transmitted(&self) -> usize {
        self.bytes_transmitted
    }

    #[must_use]
    pub fn bytes_received(&self) -> usize {
        self.bytes_received
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state == TxnState::Completed
    }

    /// Queued or processing: only the servicer may touch it.
    pub(crate) fn is_owned_by_driver(&self) -> bool {
        matches!(self.state, TxnState::Queued | TxnState::Processing)
    }

    /// Admission check performed by `submit`.
    ///
    /// # Errors
    /// `InvalidOp` for an out-of-range operation code, `InvalidLength` if
    /// either length exceeds its bound.
    pub fn validate(&self) -> Result<Operation, I2cError> {
        let operation = self.operation()?;
        if self.tx_len > TX_MESSAGE_MAX_LENGTH || self.rx_len > RX_MESSAGE_MAX_LENGTH {
            return Err(I2cError::InvalidLength);
        }
        Ok(operation)
    }

    pub(crate) fn mark_queued(&mut self) {
        self.state = TxnState::Queued;
    }

    pub(crate) fn mark_processing(&mut self) {
        self.state = TxnState::Processing;
        self.result = TxnResult::None;
        self.fault = None;
        self.bytes_transmitted = 0;
        self.bytes_received = 0;
    }

    pub(crate) fn complete(
        &mut self,
        outcome: Result<(), BusFault>,
        transmitted: usize,
        received: usize,
    ) {
        self.bytes_transmitted = transmitted;
        self.bytes_received = received;
        match outcome {
            Ok(()) => {
                self.result = TxnResult::Success;
                self.fault = None;
            }
            Err(fault) => {
                self.result = TxnResult::Fail;
                self.fault = Some(fault);
            }
        }
        self.state = TxnState::Completed;
    }

    /// Send window for the servicer.
    pub(crate) fn tx_window(&self) -> &[u8] {
        self.tx_data()
    }

    /// Receive window for the servicer: the first `rx_len` bytes.
    pub(crate) fn rx_window_mut(&mut self) -> &mut [u8] {
        self.rx_data.get_mut(..self.rx_len).unwrap_or_default()
    }
}
