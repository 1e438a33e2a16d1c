//! Register map for the QMC5883L.
//!
//! The sensor has a single register bank; each axis output is a pair of
//! registers holding a little-endian signed 16-bit value.

/// X axis output, LSB address.
pub const X_LSB: u8 = 0x00;
/// Y axis output, LSB address.
pub const Y_LSB: u8 = 0x02;
/// Z axis output, LSB address.
pub const Z_LSB: u8 = 0x04;
/// Status register (DRDY / OVL / DOR flags).
pub const STATUS: u8 = 0x06;
/// Temperature output, LSB address.
pub const T_LSB: u8 = 0x07;
/// Mode, range, output rate and oversampling.
pub const CONTROL_1: u8 = 0x09;
/// Soft reset, pointer roll-over and interrupt pin.
pub const CONTROL_2: u8 = 0x0A;
/// SET/RESET period register.
pub const SET_RESET_PERIOD: u8 = 0x0B;
/// Chip identification register.
pub const CHIP_ID: u8 = 0x0D;

/// Mode bits for CONTROL_1.
pub mod mode {
    /// Standby: measurement stopped, outputs hold their last value.
    pub const STANDBY: u8 = 0b0000_0000;
    /// Continuous measurement at the configured output rate.
    pub const CONTINUOUS: u8 = 0b0000_0001;
}

/// Soft reset bit, written to CONTROL_2.
pub const SOFT_RESET: u8 = 0b1000_0000;

/// SET/RESET period value recommended by the datasheet, written during
/// wake-up.
pub const SET_RESET_PERIOD_RECOMMENDED: u8 = 0x01;
