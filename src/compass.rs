//! Compass heading helpers.
//!
//! Pure projections of a (preferably corrected) field vector onto a
//! bearing in degrees; no sensor state involved.

use nalgebra::Vector3;

/// Magnetic bearing of the X/Y projection of `v`, in degrees in [0, 360).
pub fn heading(v: &Vector3<f32>) -> f32 {
    let mut degrees = v.y.atan2(v.x).to_degrees();
    if degrees < 0.0 {
        degrees += 360.0;
    }
    degrees
}

/// Heading computation with a fixed magnetic declination offset.
#[derive(Debug, Clone, Copy)]
pub struct Compass {
    declination_deg: f32,
}

impl Compass {
    pub fn new(declination_deg: f32) -> Self {
        Self { declination_deg }
    }

    /// True-north bearing in degrees in [0, 360).
    pub fn heading(&self, v: &Vector3<f32>) -> f32 {
        let mut degrees = v.y.atan2(v.x).to_degrees() + self.declination_deg;
        while degrees < 0.0 {
            degrees += 360.0;
        }
        while degrees >= 360.0 {
            degrees -= 360.0;
        }
        degrees
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn cardinal_headings() {
        assert_relative_eq!(heading(&Vector3::new(1.0, 0.0, 0.0)), 0.0);
        assert_relative_eq!(heading(&Vector3::new(0.0, 1.0, 0.0)), 90.0);
        assert_relative_eq!(heading(&Vector3::new(-1.0, 0.0, 0.0)), 180.0);
        assert_relative_eq!(heading(&Vector3::new(0.0, -1.0, 0.0)), 270.0);
    }

    #[test]
    fn negative_angles_wrap_into_range() {
        assert_relative_eq!(heading(&Vector3::new(1.0, -1.0, 0.0)), 315.0);
    }

    #[test]
    fn declination_offsets_and_wraps() {
        let east = Vector3::new(0.0, 1.0, 0.0);
        assert_relative_eq!(Compass::new(10.0).heading(&east), 100.0);
        assert_relative_eq!(Compass::new(-100.0).heading(&east), 350.0);
        assert_relative_eq!(Compass::new(280.0).heading(&east), 10.0);
    }
}
