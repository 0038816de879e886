use std::f64::consts::FRAC_PI_2;

use nalgebra::{Matrix5, Vector3, Vector5};

use crate::{
    propagation::shift_state,
    utils::{pack_lower, unpack_symmetric, vector_from_slice},
    VertexError, VertexResult, FIELD_CONVERSION,
};

/// Index of the signed transverse impact parameter $`d_0`$ in a [`TrackState`].
pub const D0: usize = 0;
/// Index of the azimuthal direction $`\phi_0`$ at the point of closest approach.
pub const PHI0: usize = 1;
/// Index of the signed curvature $`\omega`$ (inverse radius, positive when turning
/// counter-clockwise).
pub const OMEGA: usize = 2;
/// Index of the longitudinal impact parameter $`z_0`$.
pub const Z0: usize = 3;
/// Index of the dip $`\tan\lambda`$.
pub const TAN_LAMBDA: usize = 4;

/// Helix parameters of a track about a reference point, with their covariance.
///
/// The point of closest approach in the bend plane is
/// ```math
/// \vec{r}_{\text{PCA}} = \vec{r}_{\text{ref}} + d_0 (-\sin\phi_0, \cos\phi_0)
/// ```
/// and along the track $`z(s) = z_{\text{ref}} + z_0 + s\tan\lambda`$, where $`s`$ is the
/// transverse path length measured from the point of closest approach.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackState {
    parameters: Vector5<f64>,
    reference_point: Vector3<f64>,
    covariance: Matrix5<f64>,
}

impl TrackState {
    /// Create a state from raw slices.
    ///
    /// The `covariance` may be given as the 15 values of its lower triangle (row by row) or as
    /// all 25 values of the matrix.
    pub fn new(
        parameters: &[f64],
        reference_point: &[f64],
        covariance: &[f64],
    ) -> VertexResult<Self> {
        Self::from_parts(
            vector_from_slice(parameters, "track parameters")?,
            vector_from_slice(reference_point, "reference point")?,
            unpack_symmetric(covariance)?,
        )
    }

    /// Create a state from its components.
    pub fn from_parts(
        parameters: Vector5<f64>,
        reference_point: Vector3<f64>,
        covariance: Matrix5<f64>,
    ) -> VertexResult<Self> {
        if parameters.iter().any(|p| !p.is_finite())
            || reference_point.iter().any(|r| !r.is_finite())
            || covariance.iter().any(|c| !c.is_finite())
        {
            return Err(VertexError::InvalidArgument(
                "track state contains non-finite values".to_string(),
            ));
        }
        Ok(Self {
            parameters,
            reference_point,
            covariance,
        })
    }

    /// A state referenced at `point` for a track passing through it in the direction `phi`.
    pub fn through_point(
        point: &Vector3<f64>,
        phi: f64,
        omega: f64,
        tan_lambda: f64,
        covariance: Matrix5<f64>,
    ) -> VertexResult<Self> {
        Self::from_parts(
            Vector5::new(0.0, phi, omega, 0.0, tan_lambda),
            *point,
            covariance,
        )
    }

    pub fn parameters(&self) -> &Vector5<f64> {
        &self.parameters
    }
    pub fn reference_point(&self) -> &Vector3<f64> {
        &self.reference_point
    }
    pub fn covariance(&self) -> &Matrix5<f64> {
        &self.covariance
    }
    /// The 15 independent covariance entries, lower triangle row by row.
    pub fn covariance_packed(&self) -> Vec<f64> {
        pack_lower(&self.covariance)
    }

    pub fn d0(&self) -> f64 {
        self.parameters[D0]
    }
    pub fn phi0(&self) -> f64 {
        self.parameters[PHI0]
    }
    pub fn omega(&self) -> f64 {
        self.parameters[OMEGA]
    }
    pub fn z0(&self) -> f64 {
        self.parameters[Z0]
    }
    pub fn tan_lambda(&self) -> f64 {
        self.parameters[TAN_LAMBDA]
    }

    /// The point of closest approach to the reference point.
    pub fn point_of_closest_approach(&self) -> Vector3<f64> {
        let (sin_phi, cos_phi) = self.phi0().sin_cos();
        self.reference_point + Vector3::new(-self.d0() * sin_phi, self.d0() * cos_phi, self.z0())
    }

    /// The momentum at the point of closest approach in a field of `b_field` Tesla.
    ///
    /// Straight tracks ($`\omega = 0`$) have an infinite momentum.
    pub fn momentum(&self, b_field: f64) -> Vector3<f64> {
        let pt = (FIELD_CONVERSION * b_field / self.omega()).abs();
        let (sin_phi, cos_phi) = self.phi0().sin_cos();
        Vector3::new(pt * cos_phi, pt * sin_phi, pt * self.tan_lambda())
    }

    /// The sign of the charge (`+1.0`, `-1.0`, or `0.0` when the track does not bend).
    ///
    /// Positive particles turn clockwise when the field points along $`+z`$.
    pub fn charge(&self, b_field: f64) -> f64 {
        let bend = self.omega() * b_field;
        if bend == 0.0 {
            0.0
        } else {
            -bend.signum()
        }
    }
}

/// A fitted track: one or more [`TrackState`]s (the first one at the interaction point) and the
/// quality of the track fit.
#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    pub states: Vec<TrackState>,
    pub chi2: f64,
    pub ndf: usize,
}

impl Track {
    pub fn new(states: Vec<TrackState>, chi2: f64, ndf: usize) -> Self {
        Self { states, chi2, ndf }
    }

    /// The state used for vertexing.
    pub fn first_state(&self) -> VertexResult<&TrackState> {
        self.states
            .first()
            .ok_or_else(|| VertexError::InvalidArgument("track has no states".to_string()))
    }
}

/// The representation of a track used inside the vertex fit.
///
/// The parameters are $`(\epsilon, z_0, \theta, \phi_0, \omega)`$ with $`\epsilon = d_0`$ and
/// $`\theta = \pi/2 - \arctan(\tan\lambda)`$ the polar angle from the field axis. The covariance is
/// transformed with the Jacobian of this change of variables.
#[derive(Clone, Debug)]
pub struct BilliorTrack {
    parameters: Vector5<f64>,
    covariance: Matrix5<f64>,
    chi2: f64,
    ndf: usize,
    state: TrackState,
}

impl BilliorTrack {
    pub const EPSILON: usize = 0;
    pub const Z0: usize = 1;
    pub const THETA: usize = 2;
    pub const PHI: usize = 3;
    pub const OMEGA: usize = 4;

    /// Adapt the first state of a [`Track`], keeping the track-fit quality.
    pub fn from_track(track: &Track) -> VertexResult<Self> {
        Ok(Self::from_state(track.first_state()?, track.chi2, track.ndf))
    }

    /// Adapt a single [`TrackState`]; pass zeros for `chi2` and `ndf` when they are unknown.
    pub fn from_state(state: &TrackState, chi2: f64, ndf: usize) -> Self {
        let tan_lambda = state.tan_lambda();
        let parameters = Vector5::new(
            state.d0(),
            state.z0(),
            FRAC_PI_2 - tan_lambda.atan(),
            state.phi0(),
            state.omega(),
        );
        let mut jacobian = Matrix5::zeros();
        jacobian[(Self::EPSILON, D0)] = 1.0;
        jacobian[(Self::Z0, Z0)] = 1.0;
        jacobian[(Self::THETA, TAN_LAMBDA)] = -1.0 / (1.0 + tan_lambda.powi(2));
        jacobian[(Self::PHI, PHI0)] = 1.0;
        jacobian[(Self::OMEGA, OMEGA)] = 1.0;
        Self {
            parameters,
            covariance: jacobian * state.covariance() * jacobian.transpose(),
            chi2,
            ndf,
            state: state.clone(),
        }
    }

    /// Re-express this track about `new_reference`.
    ///
    /// The track-fit $`\chi^2`$ and degrees of freedom do not carry over and are set to zero.
    pub fn shifted_to(&self, new_reference: &Vector3<f64>) -> VertexResult<Self> {
        Ok(Self::from_state(&shift_state(&self.state, new_reference)?, 0.0, 0))
    }

    pub fn parameters(&self) -> &Vector5<f64> {
        &self.parameters
    }
    pub fn covariance(&self) -> &Matrix5<f64> {
        &self.covariance
    }
    pub fn reference_point(&self) -> &Vector3<f64> {
        self.state.reference_point()
    }
    pub fn chi2(&self) -> f64 {
        self.chi2
    }
    pub fn ndf(&self) -> usize {
        self.ndf
    }
    /// The state this track was adapted from.
    pub fn state(&self) -> &TrackState {
        &self.state
    }

    pub fn epsilon(&self) -> f64 {
        self.parameters[Self::EPSILON]
    }
    pub fn z0(&self) -> f64 {
        self.parameters[Self::Z0]
    }
    pub fn theta(&self) -> f64 {
        self.parameters[Self::THETA]
    }
    pub fn phi0(&self) -> f64 {
        self.parameters[Self::PHI]
    }
    pub fn omega(&self) -> f64 {
        self.parameters[Self::OMEGA]
    }
}

impl TryFrom<&Track> for BilliorTrack {
    type Error = VertexError;

    fn try_from(track: &Track) -> Result<Self, Self::Error> {
        Self::from_track(track)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use approx::assert_relative_eq;

    use super::*;

    /// A diagonal covariance with realistic silicon-tracker resolutions.
    pub(crate) fn test_covariance() -> Matrix5<f64> {
        Matrix5::from_diagonal(&Vector5::new(
            0.1_f64.powi(2),
            1e-3_f64.powi(2),
            1e-6_f64.powi(2),
            0.1_f64.powi(2),
            1e-3_f64.powi(2),
        ))
    }

    pub(crate) fn test_state() -> TrackState {
        let mut covariance = test_covariance();
        covariance[(D0, PHI0)] = 2e-5;
        covariance[(PHI0, D0)] = 2e-5;
        covariance[(Z0, TAN_LAMBDA)] = -3e-5;
        covariance[(TAN_LAMBDA, Z0)] = -3e-5;
        TrackState::from_parts(
            Vector5::new(0.3, 0.05, 2e-4, -0.2, 0.03),
            Vector3::zeros(),
            covariance,
        )
        .unwrap()
    }

    #[test]
    fn test_state_from_slices() {
        let packed: Vec<f64> = (1..=15).map(f64::from).collect();
        let state = TrackState::new(&[0.1, 0.2, 0.3, 0.4, 0.5], &[0.0; 3], &packed).unwrap();
        assert_relative_eq!(state.covariance()[(1, 0)], 2.0);
        assert_relative_eq!(state.covariance()[(0, 1)], 2.0);
        assert_relative_eq!(state.covariance()[(4, 4)], 15.0);
        assert_eq!(state.covariance_packed(), packed);
        assert_relative_eq!(state.tan_lambda(), 0.5);
    }

    #[test]
    fn test_invalid_state() {
        assert!(matches!(
            TrackState::new(&[0.0; 4], &[0.0; 3], &[0.0; 15]),
            Err(VertexError::InvalidArgument(_))
        ));
        assert!(TrackState::new(&[0.0; 5], &[0.0; 2], &[0.0; 15]).is_err());
        assert!(TrackState::new(&[0.0; 5], &[0.0; 3], &[0.0; 16]).is_err());
        assert!(TrackState::new(&[f64::NAN, 0.0, 0.0, 0.0, 0.0], &[0.0; 3], &[0.0; 15]).is_err());
        assert!(Track::new(vec![], 0.0, 0).first_state().is_err());
    }

    #[test]
    fn test_billior_conversion() {
        let state = test_state();
        let track = BilliorTrack::from_state(&state, 12.0, 7);
        assert_relative_eq!(track.epsilon(), 0.3);
        assert_relative_eq!(track.z0(), -0.2);
        assert_relative_eq!(track.theta(), FRAC_PI_2 - 0.03_f64.atan());
        assert_relative_eq!(track.phi0(), 0.05);
        assert_relative_eq!(track.omega(), 2e-4);
        assert_relative_eq!(track.chi2(), 12.0);
        assert_eq!(track.ndf(), 7);
        let dtheta = -1.0 / (1.0 + 0.03_f64.powi(2));
        let cov = track.covariance();
        assert_relative_eq!(cov[(0, 0)], 0.01, max_relative = 1e-12);
        assert_relative_eq!(cov[(0, 3)], 2e-5);
        assert_relative_eq!(cov[(2, 2)], 1e-6 * dtheta.powi(2), max_relative = 1e-12);
        assert_relative_eq!(cov[(1, 2)], -3e-5 * dtheta, max_relative = 1e-12);
        assert_relative_eq!(cov[(4, 4)], 1e-12, max_relative = 1e-12);
    }

    #[test]
    fn test_billior_from_track() {
        let track = Track::new(vec![test_state()], 3.5, 5);
        let billior = BilliorTrack::try_from(&track).unwrap();
        assert_relative_eq!(billior.chi2(), 3.5);
        assert_eq!(billior.state(), &test_state());
    }

    #[test]
    fn test_momentum_and_charge() {
        let state = TrackState::from_parts(
            Vector5::new(0.0, 0.0, 1e-4, 0.0, 0.5),
            Vector3::zeros(),
            test_covariance(),
        )
        .unwrap();
        let p = state.momentum(1.0);
        assert_relative_eq!(p.x, FIELD_CONVERSION / 1e-4);
        assert_relative_eq!(p.y, 0.0);
        assert_relative_eq!(p.z, 0.5 * FIELD_CONVERSION / 1e-4);
        assert_relative_eq!(state.charge(1.0), -1.0);
        assert_relative_eq!(state.charge(-1.0), 1.0);
        assert_relative_eq!(state.charge(0.0), 0.0);
    }
}
