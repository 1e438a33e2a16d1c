//! QMC5883L driver: power state machine, status and raw vector reads.

use nalgebra::Vector3;

use crate::config::{OutputRate, Qmc5883lConfig};
use crate::interface::Interface;
use crate::register::{self, mode};
use crate::types::{Qmc5883lError, Status};

/// Default 7-bit I2C address of the QMC5883L.
pub const DEFAULT_I2C_ADDRESS: u8 = 0x0D;

/// Driver for the QMC5883L 3-axis magnetometer.
///
/// The driver owns the bus interface exclusively. It is either `Active`
/// (continuous measurement) or `Standby`; transitions happen through
/// [`Qmc5883l::wake`] and [`Qmc5883l::standby`] only.
pub struct Qmc5883l<I> {
    interface: I,
    config: Qmc5883lConfig,
    active: bool,
}

impl<I, E> Qmc5883l<I>
where
    I: Interface<Error = E>,
    Qmc5883lError: From<E>,
{
    /// Creates the driver and wakes the sensor into continuous measurement.
    pub fn new(interface: I, config: Qmc5883lConfig) -> Result<Self, Qmc5883lError> {
        let mut device = Self {
            interface,
            config,
            active: false,
        };
        device.wake()?;
        Ok(device)
    }

    /// Soft-resets and reconfigures the sensor, entering continuous
    /// measurement.
    ///
    /// The write order is fixed: the reset must precede reconfiguration.
    pub fn wake(&mut self) -> Result<(), Qmc5883lError> {
        self.interface
            .write_reg(register::CONTROL_2, &[register::SOFT_RESET])?;
        self.interface.write_reg(
            register::SET_RESET_PERIOD,
            &[register::SET_RESET_PERIOD_RECOMMENDED],
        )?;
        self.interface
            .write_reg(register::CONTROL_2, &[self.config.control2_bits()])?;
        self.interface
            .write_reg(register::CONTROL_1, &[self.config.control1_bits()])?;
        self.active = true;
        Ok(())
    }

    /// Stops measurement. Safe to call repeatedly.
    pub fn standby(&mut self) -> Result<(), Qmc5883lError> {
        self.interface
            .write_reg(register::CONTROL_1, &[mode::STANDBY])?;
        self.active = false;
        Ok(())
    }

    /// Whether the sensor is in continuous measurement mode.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The configuration fixed at construction.
    pub fn config(&self) -> &Qmc5883lConfig {
        &self.config
    }

    /// The configured output data rate.
    pub fn output_rate(&self) -> OutputRate {
        self.config.output_rate
    }

    /// Reads the axis registers and decodes each little-endian i16 pair.
    ///
    /// Values are raw counts; callers apply any physical-unit scaling.
    /// Callable in any state, but in standby the registers hold stale
    /// values.
    pub fn read_vector(&mut self) -> Result<Vector3<f32>, Qmc5883lError> {
        let x = self.read_axis(register::X_LSB)?;
        let y = self.read_axis(register::Y_LSB)?;
        let z = self.read_axis(register::Z_LSB)?;
        Ok(Vector3::new(x as f32, y as f32, z as f32))
    }

    fn read_axis(&mut self, reg: u8) -> Result<i16, Qmc5883lError> {
        let mut raw = [0u8; 2];
        self.interface.read_reg(reg, &mut raw)?;
        Ok(i16::from_le_bytes(raw))
    }

    /// Reads the status register as a flag set.
    pub fn status(&mut self) -> Result<Status, Qmc5883lError> {
        let mut raw = [0u8; 1];
        self.interface.read_reg(register::STATUS, &mut raw)?;
        Ok(Status::from_bits(raw[0]))
    }

    /// Reads the chip identification register (0xFF on this part).
    pub fn chip_id(&mut self) -> Result<u8, Qmc5883lError> {
        let mut raw = [0u8; 1];
        self.interface.read_reg(register::CHIP_ID, &mut raw)?;
        Ok(raw[0])
    }

    /// Puts the sensor into standby and hands the bus interface back.
    ///
    /// The standby write is best-effort; a failing bus cannot block the
    /// release of the transport handle.
    pub fn release(mut self) -> I {
        let _ = self.standby();
        self.interface
    }
}
