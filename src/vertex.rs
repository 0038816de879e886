use nalgebra::{Matrix3, Vector3};

use crate::{
    coordinates::{covariance_to_detector, to_detector},
    utils::{enums::Constraint, pack_lower},
};

/// A track after the vertex fit: its direction and curvature at the vertex.
#[derive(Clone, Debug, PartialEq)]
pub struct FittedParticle {
    parameters: Vector3<f64>,
    momentum: Vector3<f64>,
    momentum_covariance: Matrix3<f64>,
}

impl FittedParticle {
    pub(crate) fn new(
        parameters: Vector3<f64>,
        momentum: Vector3<f64>,
        momentum_covariance: Matrix3<f64>,
    ) -> Self {
        Self {
            parameters,
            momentum,
            momentum_covariance,
        }
    }

    /// The fitted $`(\theta, \phi, \omega)`$ at the vertex.
    pub fn parameters(&self) -> &Vector3<f64> {
        &self.parameters
    }
    pub fn theta(&self) -> f64 {
        self.parameters.x
    }
    pub fn phi(&self) -> f64 {
        self.parameters.y
    }
    pub fn omega(&self) -> f64 {
        self.parameters.z
    }
    /// The momentum at the vertex in the tracking frame. Every component is NaN for a track
    /// without curvature.
    pub fn momentum(&self) -> &Vector3<f64> {
        &self.momentum
    }
    pub fn momentum_covariance(&self) -> &Matrix3<f64> {
        &self.momentum_covariance
    }
}

/// The result of a vertex fit.
///
/// The position is expressed in the tracking frame relative to the reference point the input
/// tracks were defined about.
#[derive(Clone, Debug)]
pub struct Vertex {
    position: Vector3<f64>,
    covariance: Matrix3<f64>,
    chi2: f64,
    ndf: usize,
    constraint: Constraint,
    particles: Vec<FittedParticle>,
    invariant_mass: Option<f64>,
    invariant_mass_error: Option<f64>,
}

impl Vertex {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        position: Vector3<f64>,
        covariance: Matrix3<f64>,
        chi2: f64,
        ndf: usize,
        constraint: Constraint,
        particles: Vec<FittedParticle>,
        invariant_mass: Option<f64>,
        invariant_mass_error: Option<f64>,
    ) -> Self {
        Self {
            position,
            covariance,
            chi2,
            ndf,
            constraint,
            particles,
            invariant_mass,
            invariant_mass_error,
        }
    }

    /// Fitted position relative to the tracks' reference point (tracking frame, mm).
    pub fn position(&self) -> &Vector3<f64> {
        &self.position
    }
    pub fn covariance(&self) -> &Matrix3<f64> {
        &self.covariance
    }
    /// The six independent covariance entries `xx, yx, yy, zx, zy, zz`.
    pub fn covariance_packed(&self) -> Vec<f64> {
        pack_lower(&self.covariance)
    }
    /// The square roots of the diagonal of the covariance.
    pub fn position_errors(&self) -> Vector3<f64> {
        self.covariance.diagonal().map(f64::sqrt)
    }
    pub fn chi2(&self) -> f64 {
        self.chi2
    }
    pub fn ndf(&self) -> usize {
        self.ndf
    }
    pub fn constraint(&self) -> Constraint {
        self.constraint
    }
    /// The tracks' momenta at the vertex, in input order.
    pub fn particles(&self) -> &[FittedParticle] {
        &self.particles
    }
    /// The sum of the fitted momenta.
    pub fn total_momentum(&self) -> Vector3<f64> {
        self.particles.iter().map(FittedParticle::momentum).sum()
    }
    /// The invariant mass of the fitted particles, if the tracks are curved and the mass is
    /// physical.
    pub fn invariant_mass(&self) -> Option<f64> {
        self.invariant_mass
    }
    pub fn invariant_mass_error(&self) -> Option<f64> {
        self.invariant_mass_error
    }

    /// Translate the vertex position by `offset`.
    ///
    /// This is the only way a [`Vertex`] changes after a fit. It is used to express a vertex fitted
    /// about one reference point relative to another.
    pub fn shift_position(&mut self, offset: &Vector3<f64>) {
        self.position += offset;
    }

    pub fn position_detector(&self) -> Vector3<f64> {
        to_detector(&self.position)
    }
    pub fn covariance_detector(&self) -> Matrix3<f64> {
        covariance_to_detector(&self.covariance)
    }
    /// The fitted momentum of particle `index` in the detector frame.
    pub fn momentum_detector(&self, index: usize) -> Option<Vector3<f64>> {
        self.particles.get(index).map(|p| to_detector(p.momentum()))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn test_vertex() -> Vertex {
        let particle = FittedParticle::new(
            Vector3::new(1.5, 0.02, 1e-4),
            Vector3::new(1.0, 0.02, 0.07),
            Matrix3::identity() * 1e-4,
        );
        Vertex::new(
            Vector3::new(5.0, 0.1, -0.2),
            Matrix3::new(4.0, 0.1, 0.2, 0.1, 0.01, 0.0, 0.2, 0.0, 0.0025),
            1.2,
            1,
            Constraint::Unconstrained,
            vec![particle.clone(), particle],
            Some(0.05),
            Some(0.002),
        )
    }

    #[test]
    fn test_shift_position() {
        let mut vertex = test_vertex();
        let covariance = *vertex.covariance();
        vertex.shift_position(&Vector3::new(1.0, -0.1, 0.2));
        assert_relative_eq!(vertex.position(), &Vector3::new(6.0, 0.0, 0.0), epsilon = 1e-15);
        assert_eq!(vertex.covariance(), &covariance);
        assert_relative_eq!(vertex.chi2(), 1.2);
    }

    #[test]
    fn test_packed_covariance_and_errors() {
        let vertex = test_vertex();
        assert_eq!(vertex.covariance_packed(), vec![4.0, 0.1, 0.01, 0.2, 0.0, 0.0025]);
        assert_relative_eq!(vertex.position_errors(), Vector3::new(2.0, 0.1, 0.05));
    }

    #[test]
    fn test_detector_frame() {
        let vertex = test_vertex();
        assert_relative_eq!(vertex.position_detector(), Vector3::new(0.1, -0.2, 5.0));
        assert_relative_eq!(vertex.covariance_detector()[(2, 2)], 4.0);
        assert_relative_eq!(
            vertex.momentum_detector(1).unwrap(),
            Vector3::new(0.02, 0.07, 1.0)
        );
        assert!(vertex.momentum_detector(2).is_none());
        assert_relative_eq!(vertex.total_momentum(), Vector3::new(2.0, 0.04, 0.14));
    }
}
