//! Operating configuration for the QMC5883L control registers.
//!
//! Each enum maps to a fixed bit pattern written during wake-up; the
//! configuration is immutable after driver construction.

use std::time::Duration;

use crate::register::mode;

/// Measurement range (full scale).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Range {
    /// ±2 Gauss
    Gauss2 = 0b0000_0000,
    /// ±8 Gauss
    Gauss8 = 0b0001_0000,
}

/// Output data rate in continuous mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputRate {
    /// 10 Hz
    Rate10 = 0b0000_0000,
    /// 50 Hz
    Rate50 = 0b0000_0100,
    /// 100 Hz
    Rate100 = 0b0000_1000,
    /// 200 Hz
    Rate200 = 0b0000_1100,
}

impl OutputRate {
    /// Poll interval matching the configured rate.
    pub fn interval(self) -> Duration {
        match self {
            OutputRate::Rate10 => Duration::from_millis(100),
            OutputRate::Rate50 => Duration::from_millis(20),
            OutputRate::Rate100 => Duration::from_millis(10),
            OutputRate::Rate200 => Duration::from_millis(5),
        }
    }
}

/// Oversampling factor (bandwidth of the internal digital filter).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Oversampling {
    /// 512 samples
    Oversampling512 = 0b0000_0000,
    /// 256 samples
    Oversampling256 = 0b0100_0000,
    /// 128 samples
    Oversampling128 = 0b1000_0000,
    /// 64 samples
    Oversampling64 = 0b1100_0000,
}

/// DRDY interrupt pin control. The enable bit is active low.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptPin {
    Enabled = 0b0000_0000,
    Disabled = 0b0000_0001,
}

/// Pointer roll-over: auto-wrap of the register pointer over the output
/// registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerRollOver {
    Enabled = 0b0100_0000,
    Disabled = 0b0000_0000,
}

/// Full operating configuration, fixed at driver construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Qmc5883lConfig {
    pub range: Range,
    pub output_rate: OutputRate,
    pub oversampling: Oversampling,
    pub interrupt_pin: InterruptPin,
    pub pointer_roll_over: PointerRollOver,
}

impl Default for Qmc5883lConfig {
    fn default() -> Self {
        Self {
            range: Range::Gauss2,
            output_rate: OutputRate::Rate10,
            oversampling: Oversampling::Oversampling512,
            interrupt_pin: InterruptPin::Disabled,
            pointer_roll_over: PointerRollOver::Disabled,
        }
    }
}

impl Qmc5883lConfig {
    /// CONTROL_1 pattern for continuous measurement.
    pub(crate) fn control1_bits(&self) -> u8 {
        mode::CONTINUOUS | self.range as u8 | self.output_rate as u8 | self.oversampling as u8
    }

    /// CONTROL_2 pattern (roll-over and interrupt pin).
    pub(crate) fn control2_bits(&self) -> u8 {
        self.pointer_roll_over as u8 | self.interrupt_pin as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_bits_combine_mode_range_rate_and_oversampling() {
        let config = Qmc5883lConfig {
            range: Range::Gauss8,
            output_rate: OutputRate::Rate200,
            oversampling: Oversampling::Oversampling64,
            interrupt_pin: InterruptPin::Disabled,
            pointer_roll_over: PointerRollOver::Enabled,
        };
        assert_eq!(config.control1_bits(), 0b1101_1101);
        assert_eq!(config.control2_bits(), 0b0100_0001);
    }

    #[test]
    fn default_config_matches_datasheet_reset_choices() {
        let config = Qmc5883lConfig::default();
        assert_eq!(config.control1_bits(), 0b0000_0001);
        assert_eq!(config.control2_bits(), 0b0000_0001);
        assert_eq!(config.output_rate.interval(), Duration::from_millis(100));
    }
}
