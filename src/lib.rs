//! Driver and self-calibration engine for the QST QMC5883L 3-axis
//! magnetometer.
//!
//! The driver talks to the sensor over a register-oriented I2C bus and
//! exposes the wake/standby state machine plus raw field vectors. A
//! [`Broadcaster`] polls the driver from a background thread and fans
//! readings out to subscribers, and the [`calibration`] module fits an
//! ellipsoid to a batch of readings to remove hard- and soft-iron
//! distortion.

use embedded_hal::i2c::I2c;

pub mod broadcaster;
pub mod calibration;
pub mod compass;
pub mod config;
pub mod device;
pub mod interface;
pub mod register;
pub mod types;

pub use broadcaster::{Broadcaster, Subscriber, Subscription};
pub use calibration::Calibration;
pub use config::{InterruptPin, Oversampling, OutputRate, PointerRollOver, Qmc5883lConfig, Range};
pub use device::{Qmc5883l, DEFAULT_I2C_ADDRESS};
pub use types::{Qmc5883lError, Status};

use crate::interface::I2cInterface;

/// Creates a QMC5883L driver over an I2C bus and wakes the sensor into
/// continuous measurement.
pub fn new_i2c_device<I, E>(
    i2c: I,
    address: u8,
    config: Qmc5883lConfig,
) -> Result<Qmc5883l<I2cInterface<I>>, Qmc5883lError>
where
    I: I2c<Error = E>,
{
    let interface = I2cInterface::new(i2c, address);
    Qmc5883l::new(interface, config)
}
