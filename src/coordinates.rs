//! The tracking frame is a cyclic relabeling of the detector frame: tracking $`(x, y, z)`$ is
//! detector $`(z, x, y)`$, so the beam axis is tracking $`x`$ and the magnetic field (detector
//! $`y`$) is tracking $`z`$.
use nalgebra::{Matrix3, Vector3};

/// The permutation taking tracking-frame vectors to the detector frame.
fn tracking_to_detector() -> Matrix3<f64> {
    Matrix3::new(
        0.0, 1.0, 0.0, //
        0.0, 0.0, 1.0, //
        1.0, 0.0, 0.0,
    )
}

/// Convert a tracking-frame vector to the detector frame.
pub fn to_detector(v: &Vector3<f64>) -> Vector3<f64> {
    Vector3::new(v.y, v.z, v.x)
}

/// Convert a detector-frame vector to the tracking frame.
pub fn to_tracking(v: &Vector3<f64>) -> Vector3<f64> {
    Vector3::new(v.z, v.x, v.y)
}

/// Convert a tracking-frame covariance matrix to the detector frame.
pub fn covariance_to_detector(covariance: &Matrix3<f64>) -> Matrix3<f64> {
    let p = tracking_to_detector();
    p * covariance * p.transpose()
}

/// Convert a detector-frame covariance matrix to the tracking frame.
pub fn covariance_to_tracking(covariance: &Matrix3<f64>) -> Matrix3<f64> {
    let p = tracking_to_detector();
    p.transpose() * covariance * p
}
