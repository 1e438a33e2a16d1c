//! Bus abstraction for the QMC5883L.
//!
//! The driver only needs register-oriented reads and writes: a register
//! pointer write followed by a read returns that register's contents, and
//! multi-byte reads auto-increment the pointer.

use embedded_hal::i2c::I2c;

use crate::types::Qmc5883lError;

/// Error wrapper for bus interfaces.
#[derive(Debug, Clone)]
pub enum InterfaceError<E> {
    /// I2C communication error
    I2c(E),
    /// Parameter outside what the transport supports
    InvalidParameter,
}

/// Register-oriented access to the sensor.
pub trait Interface {
    /// Error produced by the underlying transport.
    type Error;

    /// Writes bytes starting at a register address.
    fn write_reg(&mut self, reg: u8, data: &[u8]) -> Result<(), Self::Error>;

    /// Reads bytes starting at a register address.
    fn read_reg(&mut self, reg: u8, data: &mut [u8]) -> Result<(), Self::Error>;
}

/// [`Interface`] implementation over an `embedded-hal` I2C bus.
pub struct I2cInterface<I2C> {
    i2c: I2C,
    addr: u8,
}

impl<I2C, E> I2cInterface<I2C>
where
    I2C: I2c<Error = E>,
{
    /// Creates a new I2C interface for the given 7-bit address.
    pub fn new(i2c: I2C, addr: u8) -> Self {
        Self { i2c, addr }
    }

    /// Consumes the interface and returns the underlying I2C bus.
    pub fn release(self) -> I2C {
        self.i2c
    }
}

impl<I2C, E> Interface for I2cInterface<I2C>
where
    I2C: I2c<Error = E>,
{
    type Error = InterfaceError<E>;

    fn write_reg(&mut self, reg: u8, data: &[u8]) -> Result<(), Self::Error> {
        // Register writes on this part are at most one byte of payload.
        let mut buffer = [0u8; 4];
        if data.len() > buffer.len() - 1 {
            return Err(InterfaceError::InvalidParameter);
        }
        buffer[0] = reg;
        buffer[1..=data.len()].copy_from_slice(data);

        self.i2c
            .write(self.addr, &buffer[..data.len() + 1])
            .map_err(InterfaceError::I2c)
    }

    fn read_reg(&mut self, reg: u8, data: &mut [u8]) -> Result<(), Self::Error> {
        self.i2c
            .write_read(self.addr, &[reg], data)
            .map_err(InterfaceError::I2c)
    }
}

impl<E> From<InterfaceError<E>> for Qmc5883lError {
    fn from(_error: InterfaceError<E>) -> Self {
        Qmc5883lError::Interface
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted register bus shared between a driver under test and the
    //! assertions in the test body.

    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::Interface;
    use crate::register;
    use crate::types::Qmc5883lError;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct RegWrite {
        pub reg: u8,
        pub value: u8,
    }

    #[derive(Default)]
    struct MockState {
        writes: Vec<RegWrite>,
        statuses: VecDeque<u8>,
        axes: VecDeque<[[u8; 2]; 3]>,
        current: [[u8; 2]; 3],
        fail_reads: bool,
    }

    #[derive(Clone, Default)]
    pub(crate) struct MockBus(Arc<Mutex<MockState>>);

    #[derive(Debug)]
    pub(crate) struct MockError;

    impl MockBus {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_status(&self, bits: u8) {
            self.0.lock().unwrap().statuses.push_back(bits);
        }

        /// Queues one sample, given per-axis values.
        pub fn push_axes(&self, x: i16, y: i16, z: i16) {
            self.push_axes_raw([x.to_le_bytes(), y.to_le_bytes(), z.to_le_bytes()]);
        }

        /// Queues one sample, given the raw register byte pairs.
        pub fn push_axes_raw(&self, axes: [[u8; 2]; 3]) {
            self.0.lock().unwrap().axes.push_back(axes);
        }

        pub fn writes(&self) -> Vec<RegWrite> {
            self.0.lock().unwrap().writes.clone()
        }

        pub fn clear_writes(&self) {
            self.0.lock().unwrap().writes.clear();
        }

        pub fn fail_reads(&self) {
            self.0.lock().unwrap().fail_reads = true;
        }
    }

    impl Interface for MockBus {
        type Error = MockError;

        fn write_reg(&mut self, reg: u8, data: &[u8]) -> Result<(), MockError> {
            let mut state = self.0.lock().unwrap();
            for (offset, byte) in data.iter().enumerate() {
                state.writes.push(RegWrite {
                    reg: reg + offset as u8,
                    value: *byte,
                });
            }
            Ok(())
        }

        fn read_reg(&mut self, reg: u8, data: &mut [u8]) -> Result<(), MockError> {
            let mut state = self.0.lock().unwrap();
            if state.fail_reads {
                return Err(MockError);
            }
            match reg {
                register::STATUS => data[0] = state.statuses.pop_front().unwrap_or(0),
                register::X_LSB => {
                    // A new sample is latched when the X pair is addressed.
                    if let Some(axes) = state.axes.pop_front() {
                        state.current = axes;
                    }
                    data.copy_from_slice(&state.current[0]);
                }
                register::Y_LSB => data.copy_from_slice(&state.current[1]),
                register::Z_LSB => data.copy_from_slice(&state.current[2]),
                register::CHIP_ID => data[0] = 0xFF,
                _ => data.fill(0),
            }
            Ok(())
        }
    }

    impl From<MockError> for Qmc5883lError {
        fn from(_error: MockError) -> Self {
            Qmc5883lError::Interface
        }
    }
}
