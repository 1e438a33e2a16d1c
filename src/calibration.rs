//! Hard- and soft-iron self-calibration.
//!
//! Collects raw readings from the broadcaster for a caller-bounded window,
//! fits an ellipsoid to the point cloud by constrained least squares
//! (Li & Griffiths, "Least squares ellipsoid specific fitting", 2004) and
//! derives the affine correction that maps readings back onto a sphere of
//! the local field magnitude.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use nalgebra::{Complex, DMatrix, Matrix3, Matrix6, Vector3, Vector6};

use crate::broadcaster::{Broadcaster, Subscriber};
use crate::interface::Interface;
use crate::types::Qmc5883lError;

/// Number of samples below which the fit is refused.
const MIN_SAMPLES: usize = 10;

/// Poll interval for the cancellation flag. A cancellation may be
/// observed up to one interval after it is signalled.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Relative eigenvalue imaginary part above which an eigenvalue is not
/// considered real.
const REAL_EIGENVALUE_TOLERANCE: f64 = 1e-9;

/// Affine correction for hard- and soft-iron distortion.
///
/// `correction * (raw - offset)` lies on a sphere whose radius is the
/// field strength the calibration was run against. The caller owns the
/// result; nothing is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    /// Hard-iron offset `b` (the ellipsoid center), in raw counts.
    pub offset: Vector3<f32>,
    /// Soft-iron correction `A⁻¹`.
    pub correction: Matrix3<f32>,
}

impl Calibration {
    /// Pass-through calibration: zero offset, identity correction.
    pub fn identity() -> Self {
        Self {
            offset: Vector3::zeros(),
            correction: Matrix3::identity(),
        }
    }

    /// Applies the correction to a raw reading.
    pub fn correct(&self, raw: Vector3<f32>) -> Vector3<f32> {
        self.correction * (raw - self.offset)
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::identity()
    }
}

/// Accumulates every emitted vector for one calibration run.
#[derive(Default)]
struct Collector {
    samples: Mutex<Vec<Vector3<f32>>>,
    failure: Mutex<Option<Qmc5883lError>>,
}

impl Subscriber for Collector {
    fn on_reading(&self, reading: Vector3<f32>) {
        self.samples.lock().unwrap().push(reading);
    }

    fn on_error(&self, error: Qmc5883lError) {
        *self.failure.lock().unwrap() = Some(error);
    }
}

/// Collects readings until `cancel` is set, then fits the correction.
///
/// The sensor should be rotated through as many orientations as possible
/// during the window; every emission is kept, with no downsampling or
/// outlier rejection. `field_strength_g` is the local magnetic field
/// magnitude in Gauss and becomes the radius of the corrected sphere.
///
/// If the broadcaster reports an overflow or transport failure during
/// collection, that error is returned instead of a fit of the partial
/// data.
pub fn run<I, E>(
    broadcaster: &Broadcaster<I>,
    cancel: &AtomicBool,
    field_strength_g: f32,
) -> Result<Calibration, Qmc5883lError>
where
    I: Interface<Error = E> + Send + 'static,
    E: Send + 'static,
    Qmc5883lError: From<E>,
{
    let collector = Arc::new(Collector::default());
    let subscription = broadcaster.subscribe(collector.clone());
    while !cancel.load(Ordering::Relaxed) {
        if collector.failure.lock().unwrap().is_some() {
            break;
        }
        thread::sleep(CANCEL_POLL_INTERVAL);
    }
    drop(subscription);

    if let Some(error) = collector.failure.lock().unwrap().take() {
        return Err(error);
    }
    let samples = std::mem::take(&mut *collector.samples.lock().unwrap());
    log::debug!("calibration collected {} samples", samples.len());
    fit(&samples, field_strength_g)
}

/// Fits the correction transform to a batch of raw samples.
///
/// Sample noise can push intermediate quantities slightly negative, so the
/// matrix square root and the radius scale are evaluated in ℂ and the real
/// part of the final product is kept; a non-negligible imaginary residue
/// is logged. Degenerate sample sets (too few points, or points that do
/// not span a 3-D volume) are reported as errors, never as NaN results.
pub fn fit(samples: &[Vector3<f32>], field_strength_g: f32) -> Result<Calibration, Qmc5883lError> {
    if samples.len() < MIN_SAMPLES {
        return Err(Qmc5883lError::InsufficientSamples);
    }
    if !spans_three_dimensions(samples) {
        return Err(Qmc5883lError::DegenerateSamples);
    }

    let (m, n, d) = ellipsoid_fit(samples)?;

    let m_inv = m.try_inverse().ok_or(Qmc5883lError::DegenerateSamples)?;
    let offset = -(m_inv * n);

    // √M through the symmetric eigen-decomposition: M = T·Λ·Tᵗ with T
    // orthogonal, so √M = T·√Λ·Tᵗ with the roots taken in ℂ.
    let eigen = m.symmetric_eigen();
    let t = eigen.eigenvectors;
    let mut sqrt_m = Matrix3::<Complex<f64>>::zeros();
    for k in 0..3 {
        let root = Complex::new(eigen.eigenvalues[k], 0.0).sqrt();
        for i in 0..3 {
            for j in 0..3 {
                sqrt_m[(i, j)] += root * t[(i, k)] * t[(j, k)];
            }
        }
    }

    let radicand = n.dot(&(m_inv * n)) - d;
    if !radicand.is_finite() || radicand.abs() < f64::EPSILON {
        return Err(Qmc5883lError::DegenerateSamples);
    }
    let scale = Complex::new(field_strength_g as f64, 0.0) / Complex::new(radicand, 0.0).sqrt();
    let correction_c = sqrt_m * scale;

    let residue = correction_c.iter().map(|c| c.im.abs()).fold(0.0, f64::max);
    let magnitude = correction_c.iter().map(|c| c.re.abs()).fold(0.0, f64::max);
    if residue > 1e-6 * magnitude.max(1.0) {
        log::debug!("discarding imaginary residue {residue:.3e} from the correction matrix");
    }

    let calibration = Calibration {
        offset: Vector3::new(offset.x as f32, offset.y as f32, offset.z as f32),
        correction: Matrix3::from_fn(|i, j| correction_c[(i, j)].re as f32),
    };
    log::info!(
        "calibration: b = [{:.3}, {:.3}, {:.3}]",
        calibration.offset.x,
        calibration.offset.y,
        calibration.offset.z
    );
    Ok(calibration)
}

/// Whether the sample cloud spans a genuine 3-D volume.
///
/// Collinear or coplanar clouds make the normal equations singular in ways
/// that plain inversion does not always detect, so the span is checked up
/// front on the sample covariance.
fn spans_three_dimensions(samples: &[Vector3<f32>]) -> bool {
    let inv_count = 1.0 / samples.len() as f64;
    let mut mean = Vector3::<f64>::zeros();
    for sample in samples {
        mean += sample.cast::<f64>();
    }
    mean *= inv_count;

    let mut covariance = Matrix3::<f64>::zeros();
    for sample in samples {
        let centered = sample.cast::<f64>() - mean;
        covariance += centered * centered.transpose();
    }
    covariance *= inv_count;

    let eigenvalues = covariance.symmetric_eigen().eigenvalues;
    let largest = eigenvalues.iter().fold(0.0f64, |acc, &v| acc.max(v));
    largest > 0.0 && eigenvalues.iter().all(|&v| v > 1e-9 * largest)
}

/// Estimates the ellipsoid parameters `(M, n, d)` of the quadric
/// `xᵗMx + 2nᵗx + d = 0` from a point cloud.
fn ellipsoid_fit(
    samples: &[Vector3<f32>],
) -> Result<(Matrix3<f64>, Vector3<f64>, f64), Qmc5883lError> {
    // Design matrix: one column per sample, rows are the quadric terms
    // x², y², z², 2yz, 2xz, 2xy, 2x, 2y, 2z, 1.
    let design = DMatrix::<f64>::from_fn(10, samples.len(), |row, col| {
        let x = samples[col].x as f64;
        let y = samples[col].y as f64;
        let z = samples[col].z as f64;
        match row {
            0 => x * x,
            1 => y * y,
            2 => z * z,
            3 => 2.0 * y * z,
            4 => 2.0 * x * z,
            5 => 2.0 * x * y,
            6 => 2.0 * x,
            7 => 2.0 * y,
            8 => 2.0 * z,
            _ => 1.0,
        }
    });

    let gram = &design * design.transpose();
    let s11 = gram.fixed_view::<6, 6>(0, 0).into_owned();
    let s12 = gram.fixed_view::<6, 4>(0, 6).into_owned();
    let s22 = gram.fixed_view::<4, 4>(6, 6).into_owned();

    let s22_inv = s22.try_inverse().ok_or(Qmc5883lError::DegenerateSamples)?;

    // Fixed constraint matrix encoding v₁ᵗCv₁ = 1, which restricts the
    // solution to ellipsoids.
    #[rustfmt::skip]
    let constraint = Matrix6::new(
        -1.0,  1.0,  1.0,  0.0,  0.0,  0.0,
         1.0, -1.0,  1.0,  0.0,  0.0,  0.0,
         1.0,  1.0, -1.0,  0.0,  0.0,  0.0,
         0.0,  0.0,  0.0, -4.0,  0.0,  0.0,
         0.0,  0.0,  0.0,  0.0, -4.0,  0.0,
         0.0,  0.0,  0.0,  0.0,  0.0, -4.0,
    );
    let constraint_inv = constraint
        .try_inverse()
        .ok_or(Qmc5883lError::DegenerateSamples)?;

    let reduced = constraint_inv * (s11 - s12 * s22_inv * s12.transpose());
    let v1 = dominant_eigenvector(&reduced)?;
    let v2 = -(s22_inv * s12.transpose() * v1);

    // v1 = (a, b, c, d, e, f) for ax² + by² + cz² + 2dyz + 2exz + 2fxy,
    // matching the design-matrix row order above.
    let m = Matrix3::new(
        v1[0], v1[5], v1[4],
        v1[5], v1[1], v1[3],
        v1[4], v1[3], v1[2],
    );
    let n = Vector3::new(v2[0], v2[1], v2[2]);
    Ok((m, n, v2[3]))
}

/// Eigenvector of the largest real eigenvalue of a general 6×6 matrix.
///
/// nalgebra only exposes eigenvalues for non-symmetric real matrices, so
/// the eigenvector is recovered as the null direction of `E − λI` via SVD.
/// The sign is normalized so the first component is non-negative.
fn dominant_eigenvector(e: &Matrix6<f64>) -> Result<Vector6<f64>, Qmc5883lError> {
    let eigenvalues = e.complex_eigenvalues();
    let mut lambda: Option<f64> = None;
    for ev in eigenvalues.iter() {
        if !ev.re.is_finite() || !ev.im.is_finite() {
            return Err(Qmc5883lError::DegenerateSamples);
        }
        if ev.im.abs() <= REAL_EIGENVALUE_TOLERANCE * (1.0 + ev.re.abs()) {
            lambda = Some(match lambda {
                Some(current) => current.max(ev.re),
                None => ev.re,
            });
        }
    }
    let lambda = lambda.ok_or(Qmc5883lError::DegenerateSamples)?;

    let shifted = e - Matrix6::identity() * lambda;
    let svd = shifted.svd(false, true);
    let v_t = svd.v_t.ok_or(Qmc5883lError::DegenerateSamples)?;
    let mut null_index = 0;
    for i in 1..6 {
        if svd.singular_values[i] < svd.singular_values[null_index] {
            null_index = i;
        }
    }

    let mut v1: Vector6<f64> = v_t.row(null_index).transpose();
    if v1[0] < 0.0 {
        v1 = -v1;
    }
    Ok(v1)
}
