//! Status flags and the crate error type.

use core::fmt;

/// Contents of the status register, read once per poll.
///
/// The three flags are independent: Data Ready gates emission, Data Skip
/// marks a stale sample to discard, Overflow marks a saturated measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status(u8);

impl Status {
    /// A new measurement is available in the output registers.
    pub const DATA_READY: u8 = 0b0000_0001;
    /// The measurement saturated the configured range.
    pub const OVERFLOW: u8 = 0b0000_0010;
    /// The output registers were overwritten before being read out.
    pub const DATA_SKIP: u8 = 0b0000_0100;

    pub fn from_bits(bits: u8) -> Self {
        Status(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn data_ready(self) -> bool {
        self.0 & Self::DATA_READY != 0
    }

    pub fn overflow(self) -> bool {
        self.0 & Self::OVERFLOW != 0
    }

    pub fn data_skip(self) -> bool {
        self.0 & Self::DATA_SKIP != 0
    }
}

/// Errors produced by the driver, the broadcaster and the calibration
/// engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qmc5883lError {
    /// Bus transport read or write failure.
    Interface,
    /// The sensor reported a saturated measurement.
    Overflow,
    /// The background polling task terminated unexpectedly.
    TaskFailed,
    /// Fewer samples than the ellipsoid fit needs.
    InsufficientSamples,
    /// The samples do not span a usable 3-D ellipsoid.
    DegenerateSamples,
}

impl fmt::Display for Qmc5883lError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Qmc5883lError::Interface => write!(f, "bus transport failure"),
            Qmc5883lError::Overflow => write!(f, "magnetometer range overflow"),
            Qmc5883lError::TaskFailed => write!(f, "polling task terminated unexpectedly"),
            Qmc5883lError::InsufficientSamples => {
                write!(f, "not enough samples for an ellipsoid fit")
            }
            Qmc5883lError::DegenerateSamples => {
                write!(f, "samples do not span a 3-D ellipsoid")
            }
        }
    }
}

impl std::error::Error for Qmc5883lError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_flags_are_independent() {
        let status = Status::from_bits(Status::DATA_READY | Status::DATA_SKIP);
        assert!(status.data_ready());
        assert!(status.data_skip());
        assert!(!status.overflow());
        assert_eq!(Status::default().bits(), 0);
    }
}
