//! The Billior vertex fit.
//!
//! Each track $`i`$ is described by its measured parameters
//! $`p_i = (\epsilon, z_0, \theta, \phi_0, \omega)`$ about a common reference point. Near a trial
//! vertex $`\vec{v}_0`$ the measurement model $`p = F(\vec{v}, q)`$, where
//! $`q = (\theta, \phi, \omega)`$ are the direction and curvature *at the vertex*, is linearized as
//! ```math
//! p_i \approx A_i \vec{v} + B_i q_i + c_i,
//! ```
//! and the $`\chi^2 = \sum_i (p_i - c_i - A_i\vec{v} - B_i q_i)^T G_i (\ldots)`$ with
//! $`G_i = C_i^{-1}`$ is minimized in closed form (P. Billior, S. Qian, NIM A311 (1992) 139).
//! With $`D_i = A_i^T G_i B_i`$ and $`E_i = B_i^T G_i B_i`$ the vertex covariance is
//! ```math
//! C_v = \left(\sum_i A_i^T G_i A_i - D_i E_i^{-1} D_i^T\right)^{-1}.
//! ```
//! Constraints are folded into the full fitted state $`(\vec{v}, q_1, \ldots, q_n)`$ afterwards as
//! progressive measurement updates.
use log::{debug, trace};
use nalgebra::{DMatrix, DVector, Matrix3, Matrix5, Matrix5x3, Vector3, Vector5};

use crate::{
    propagation::{arc, shift_parameters},
    track::{BilliorTrack, PHI0},
    utils::{
        enums::Constraint,
        vectors::{FourMomentum, ThreeMomentum},
    },
    vertex::{FittedParticle, Vertex},
    VertexError, VertexResult, ELECTRON_MASS, FIELD_CONVERSION,
};

/// Smallest reciprocal condition number of the vertex normal matrix accepted as solvable.
pub const DEGENERACY_LIMIT: f64 = 1e-12;

/// Largest distance (mm) between reference points which are considered common.
pub const REFERENCE_TOLERANCE: f64 = 1e-6;

/// The position and size of the beam at the target, in the tracking frame.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BeamSpot {
    /// Absolute position (mm).
    pub position: Vector3<f64>,
    /// Gaussian widths along each axis (mm); the first is the extent along the beam.
    pub size: Vector3<f64>,
}

impl Default for BeamSpot {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            size: Vector3::new(0.001, 0.01, 0.01),
        }
    }
}

impl BeamSpot {
    /// A beam spot at `position` with widths `size`, both in mm. Every width must be positive.
    pub fn new(position: Vector3<f64>, size: Vector3<f64>) -> VertexResult<Self> {
        if size.iter().any(|s| !(*s > 0.0 && s.is_finite())) {
            return Err(VertexError::InvalidArgument(format!(
                "beam spot sizes must be positive, got {:?}",
                size.as_slice()
            )));
        }
        if position.iter().any(|p| !p.is_finite()) {
            return Err(VertexError::InvalidArgument(
                "beam spot position must be finite".to_string(),
            ));
        }
        Ok(Self { position, size })
    }
}

/// A linearized vertex fitter for two or more tracks.
///
/// The fitter holds only configuration; every call to [`BilliorVertexer::fit_vertex`] is
/// independent.
#[derive(Clone, Debug)]
pub struct BilliorVertexer {
    b_field: f64,
    constraint: Constraint,
    beam_spot: BeamSpot,
    initial_vertex: Vector3<f64>,
    mass_hypothesis: f64,
}

impl BilliorVertexer {
    /// Create an unconstrained fitter for a field of `b_field` Tesla along the tracking $`z`$ axis.
    pub fn new(b_field: f64) -> Self {
        Self {
            b_field,
            constraint: Constraint::Unconstrained,
            beam_spot: BeamSpot::default(),
            initial_vertex: Vector3::zeros(),
            mass_hypothesis: ELECTRON_MASS,
        }
    }

    /// Apply `constraint` in every fit.
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = constraint;
        self
    }

    /// The beam spot used by the beam-spot, target and point-back constraints.
    pub fn with_beam_spot(mut self, beam_spot: BeamSpot) -> Self {
        self.beam_spot = beam_spot;
        self
    }

    /// Linearize about `initial_vertex` (relative to the tracks' reference point) instead of the
    /// reference point itself.
    pub fn with_initial_vertex(mut self, initial_vertex: Vector3<f64>) -> Self {
        self.initial_vertex = initial_vertex;
        self
    }

    /// The mass (GeV) assigned to every track when computing the invariant mass.
    pub fn with_mass_hypothesis(mut self, mass: f64) -> Self {
        self.mass_hypothesis = mass;
        self
    }

    /// Field strength (T).
    pub fn b_field(&self) -> f64 {
        self.b_field
    }
    /// The constraint applied in every fit.
    pub fn constraint(&self) -> Constraint {
        self.constraint
    }
    /// The beam spot in absolute coordinates.
    pub fn beam_spot(&self) -> &BeamSpot {
        &self.beam_spot
    }
    /// The first-pass linearization point, relative to the tracks' reference point.
    pub fn initial_vertex(&self) -> &Vector3<f64> {
        &self.initial_vertex
    }
    /// Mass (GeV) assigned to each track.
    pub fn mass_hypothesis(&self) -> f64 {
        self.mass_hypothesis
    }

    /// Fit a common vertex to `tracks`.
    ///
    /// All tracks must share a reference point; the returned position is relative to it.
    ///
    /// # Errors
    ///
    /// [`VertexError::InvalidArgument`] for fewer than two tracks, tracks with different reference
    /// points or covariances which are not positive definite, and [`VertexError::DegenerateFit`]
    /// when the tracks do not determine a vertex (for instance, when they are collinear).
    pub fn fit_vertex(&self, tracks: &[BilliorTrack]) -> VertexResult<Vertex> {
        if tracks.len() < 2 {
            return Err(VertexError::InvalidArgument(format!(
                "a vertex fit needs at least two tracks, got {}",
                tracks.len()
            )));
        }
        let reference = tracks[0].reference_point();
        if tracks
            .iter()
            .any(|t| (t.reference_point() - reference).norm() > REFERENCE_TOLERANCE)
        {
            return Err(VertexError::InvalidArgument(
                "all tracks must be defined about the same reference point".to_string(),
            ));
        }
        let linearized = tracks
            .iter()
            .map(|track| LinearizedTrack::new(track, &self.initial_vertex))
            .collect::<VertexResult<Vec<_>>>()?;

        let mut information = Matrix3::zeros();
        let mut rhs = Vector3::zeros();
        for track in &linearized {
            let at_g = track.a.transpose() * track.weight;
            let bt_g = track.b.transpose() * track.weight;
            let d_e_inv = track.d * track.e_inv;
            information += at_g * track.a - d_e_inv * track.d.transpose();
            rhs += (at_g - d_e_inv * bt_g) * track.p;
        }
        let vertex_covariance = invert_information(&information)?;
        let position = vertex_covariance * rhs;

        let n = linearized.len();
        let mut state = FitState::new(n);
        state.set_position(&position);
        for (i, track) in linearized.iter().enumerate() {
            let q = track.e_inv
                * (track.b.transpose() * track.weight * track.p - track.d.transpose() * position);
            let residual = track.p - track.a * position - track.b * q;
            state.chi2 += (residual.transpose() * track.weight * residual)[(0, 0)];
            state.set_momentum_parameters(i, &q);
            trace!(
                "track {}: measured {:?}, fitted (theta, phi, omega) = {:?}",
                i,
                tracks[i].parameters().as_slice(),
                q.as_slice()
            );
        }
        state.set_block(0, 0, &vertex_covariance);
        for (j, track_j) in linearized.iter().enumerate() {
            let cross = -vertex_covariance * track_j.d * track_j.e_inv;
            state.set_block(0, j + 1, &cross);
            state.set_block(j + 1, 0, &cross.transpose());
            for (i, track_i) in linearized.iter().enumerate() {
                let mut block = track_i.e_inv
                    * track_i.d.transpose()
                    * vertex_covariance
                    * track_j.d
                    * track_j.e_inv;
                if i == j {
                    block += track_i.e_inv;
                }
                state.set_block(i + 1, j + 1, &block);
            }
        }

        self.apply_constraint(&mut state, reference)?;
        let vertex = self.build_vertex(&state)?;
        debug!(
            "{} vertex at {:?} (relative to {:?}), chi2 = {:.3} / {}",
            self.constraint,
            vertex.position().as_slice(),
            reference.as_slice(),
            vertex.chi2(),
            vertex.ndf()
        );
        Ok(vertex)
    }

    fn apply_constraint(
        &self,
        state: &mut FitState,
        reference: &Vector3<f64>,
    ) -> VertexResult<()> {
        let beam = self.beam_spot.position - reference;
        let size = self.beam_spot.size;
        let dimension = state.parameters.len();
        match self.constraint {
            Constraint::Unconstrained => Ok(()),
            Constraint::BeamSpot => {
                let mut h = DMatrix::zeros(2, dimension);
                h[(0, 1)] = 1.0;
                h[(1, 2)] = 1.0;
                let position = state.position();
                let residual =
                    DVector::from_column_slice(&[beam.y - position.y, beam.z - position.z]);
                let noise = DMatrix::from_diagonal(&DVector::from_column_slice(&[
                    size.y.powi(2),
                    size.z.powi(2),
                ]));
                state.update(&residual, &h, &noise)
            }
            Constraint::Target => {
                let mut h = DMatrix::zeros(3, dimension);
                for k in 0..3 {
                    h[(k, k)] = 1.0;
                }
                let residual = beam - state.position();
                let residual = DVector::from_column_slice(residual.as_slice());
                let noise = DMatrix::from_diagonal(&DVector::from_iterator(
                    3,
                    size.iter().map(|s| s.powi(2)),
                ));
                state.update(&residual, &h, &noise)
            }
            Constraint::PointBack => {
                let position = state.position();
                let mut total = Vector3::zeros();
                let mut jacobians = Vec::with_capacity(state.n_tracks());
                for i in 0..state.n_tracks() {
                    let q = state.momentum_parameters(i);
                    total += momentum(&q, self.b_field);
                    jacobians.push(momentum_jacobian(&q, self.b_field));
                }
                if !(total.x.abs() > f64::EPSILON && total.iter().all(|p| p.is_finite())) {
                    return Err(VertexError::DegenerateFit(
                        "point-back constraint needs a finite momentum along the beam".to_string(),
                    ));
                }
                let length = position.x - beam.x;
                let (py_px, pz_px) = (total.y / total.x, total.z / total.x);
                let projected = Vector3::new(
                    0.0,
                    position.y - py_px * length,
                    position.z - pz_px * length,
                );
                // d(projected y, z) / d(total momentum)
                let dh_dp = nalgebra::Matrix2x3::new(
                    py_px * length / total.x,
                    -length / total.x,
                    0.0,
                    pz_px * length / total.x,
                    0.0,
                    -length / total.x,
                );
                let mut h = DMatrix::zeros(2, dimension);
                h[(0, 0)] = -py_px;
                h[(0, 1)] = 1.0;
                h[(1, 0)] = -pz_px;
                h[(1, 2)] = 1.0;
                for (i, jacobian) in jacobians.iter().enumerate() {
                    let block = dh_dp * jacobian;
                    h.view_mut((0, 3 * (i + 1)), (2, 3)).copy_from(&block);
                }
                let residual =
                    DVector::from_column_slice(&[beam.y - projected.y, beam.z - projected.z]);
                let noise = DMatrix::from_diagonal(&DVector::from_column_slice(&[
                    size.y.powi(2),
                    size.z.powi(2),
                ]));
                state.update(&residual, &h, &noise)
            }
        }
    }

    fn build_vertex(&self, state: &FitState) -> VertexResult<Vertex> {
        let n = state.n_tracks();
        let mut parameters = Vec::with_capacity(n);
        let mut momenta = Vec::with_capacity(n);
        let mut jacobians = Vec::with_capacity(n);
        for i in 0..n {
            let q = state.momentum_parameters(i);
            momenta.push(momentum(&q, self.b_field));
            jacobians.push(momentum_jacobian(&q, self.b_field));
            parameters.push(q);
        }
        let particles = (0..n)
            .map(|i| {
                let covariance =
                    jacobians[i] * state.block(i + 1, i + 1) * jacobians[i].transpose();
                FittedParticle::new(parameters[i], momenta[i], covariance)
            })
            .collect();
        let (invariant_mass, invariant_mass_error) =
            match invariant_mass(&momenta, self.mass_hypothesis) {
                Some((mass, gradients)) => {
                    let mut variance = 0.0;
                    for i in 0..n {
                        for j in 0..n {
                            let covariance =
                                jacobians[i] * state.block(i + 1, j + 1) * jacobians[j].transpose();
                            variance +=
                                (gradients[i].transpose() * covariance * gradients[j])[(0, 0)];
                        }
                    }
                    (Some(mass), Some(variance.max(0.0).sqrt()))
                }
                None => (None, None),
            };
        Ok(Vertex::new(
            state.position(),
            state.block(0, 0),
            state.chi2,
            2 * n - 3 + self.constraint.dimension(),
            self.constraint,
            particles,
            invariant_mass,
            invariant_mass_error,
        ))
    }
}

/// One track's contribution to the normal equations.
struct LinearizedTrack {
    a: Matrix5x3<f64>,
    b: Matrix5x3<f64>,
    /// Measured parameters less the constant term of the linearization.
    p: Vector5<f64>,
    weight: Matrix5<f64>,
    d: Matrix3<f64>,
    e_inv: Matrix3<f64>,
}

impl LinearizedTrack {
    fn new(track: &BilliorTrack, v0: &Vector3<f64>) -> VertexResult<Self> {
        let phi = shift_parameters(track.state(), &(track.reference_point() + v0))?[PHI0];
        let q0 = Vector3::new(track.theta(), phi, track.omega());
        let (model, a, b) = helix_model(v0, &q0)?;
        let offset = model - a * v0 - b * q0;

        let weight = track
            .covariance()
            .cholesky()
            .map(|c| c.inverse())
            .ok_or_else(|| {
                VertexError::InvalidArgument(
                    "track covariance is not positive definite".to_string(),
                )
            })?;
        let d = a.transpose() * weight * b;
        let e = b.transpose() * weight * b;
        let e_inv = e.cholesky().map(|c| c.inverse()).ok_or_else(|| {
            VertexError::DegenerateFit(
                "track direction is not determined by its covariance".to_string(),
            )
        })?;
        Ok(Self {
            a,
            b,
            p: track.parameters() - offset,
            weight,
            d,
            e_inv,
        })
    }
}

/// The parameters $`(\epsilon, z_0, \theta, \phi_0, \omega)`$ about the origin of a helix which
/// passes through `v` with direction and curvature `q` there, together with
/// $`A = \partial F / \partial\vec{v}`$ and $`B = \partial F / \partial q`$.
fn helix_model(
    v: &Vector3<f64>,
    q: &Vector3<f64>,
) -> VertexResult<(Vector5<f64>, Matrix5x3<f64>, Matrix5x3<f64>)> {
    let (theta, phi, omega) = (q.x, q.y, q.z);
    let cot_theta = 1.0 / theta.tan();
    let (sin_phi, cos_phi) = phi.sin_cos();
    // the vertex along and across the track direction
    let u = v.x * cos_phi + v.y * sin_phi;
    let w = -v.x * sin_phi + v.y * cos_phi;
    let x = 1.0 + omega * w;
    let y = omega * u;
    let q2 = x.powi(2) + y.powi(2);
    if q2 < f64::EPSILON {
        return Err(VertexError::NumericInstability(
            "trial vertex lies at the center of a helix".to_string(),
        ));
    }
    let root = q2.sqrt();
    let h = root + 1.0;
    let d2 = u.powi(2) + w.powi(2);
    let g = omega * d2 + 2.0 * w;
    let epsilon = g / h;
    let de_du = (2.0 * omega * u * h - g * omega * y / root) / h.powi(2);
    let de_dw = ((2.0 * omega * w + 2.0) * h - g * omega * x / root) / h.powi(2);
    let de_domega = (d2 * h - g * (x * w + y * u) / root) / h.powi(2);

    // turning angle and path length from the point of closest approach to the vertex
    let (alpha, length, dlength_domega) = arc(omega, u, -w);
    let (dalpha_du, dalpha_dw, dalpha_domega) = (omega * x / q2, -omega * y / q2, u / q2);
    let (dlength_du, dlength_dw) = (x / q2, -y / q2);

    let model = Vector5::new(epsilon, v.z - cot_theta * length, theta, phi - alpha, omega);
    #[rustfmt::skip]
    let a = Matrix5x3::new(
        de_du * cos_phi - de_dw * sin_phi, de_du * sin_phi + de_dw * cos_phi, 0.0,
        -cot_theta * (dlength_du * cos_phi - dlength_dw * sin_phi),
        -cot_theta * (dlength_du * sin_phi + dlength_dw * cos_phi),
        1.0,
        0.0, 0.0, 0.0,
        -(dalpha_du * cos_phi - dalpha_dw * sin_phi),
        -(dalpha_du * sin_phi + dalpha_dw * cos_phi),
        0.0,
        0.0, 0.0, 0.0,
    );
    #[rustfmt::skip]
    let b = Matrix5x3::new(
        0.0, de_du * w - de_dw * u, de_domega,
        length * (1.0 + cot_theta.powi(2)),
        -cot_theta * (dlength_du * w - dlength_dw * u),
        -cot_theta * dlength_domega,
        1.0, 0.0, 0.0,
        0.0, 1.0 - (dalpha_du * w - dalpha_dw * u), -dalpha_domega,
        0.0, 0.0, 1.0,
    );
    Ok((model, a, b))
}

/// Invert the vertex normal matrix, rejecting it when it is (nearly) singular.
fn invert_information(information: &Matrix3<f64>) -> VertexResult<Matrix3<f64>> {
    let eigenvalues = information.symmetric_eigenvalues();
    let (min, max) = (eigenvalues.min(), eigenvalues.max());
    let rcond = min / max;
    if !(max > 0.0 && rcond >= DEGENERACY_LIMIT) {
        return Err(VertexError::DegenerateFit(format!(
            "vertex normal matrix is singular (reciprocal condition number {:.3e})",
            rcond
        )));
    }
    information
        .cholesky()
        .map(|c| c.inverse())
        .ok_or_else(|| {
            VertexError::DegenerateFit("vertex normal matrix is not positive definite".to_string())
        })
}

/// The fitted state $`(\vec{v}, q_1, \ldots, q_n)`$ with its full covariance.
struct FitState {
    parameters: DVector<f64>,
    covariance: DMatrix<f64>,
    chi2: f64,
}

impl FitState {
    fn new(n_tracks: usize) -> Self {
        let dimension = 3 * (n_tracks + 1);
        Self {
            parameters: DVector::zeros(dimension),
            covariance: DMatrix::zeros(dimension, dimension),
            chi2: 0.0,
        }
    }

    fn n_tracks(&self) -> usize {
        self.parameters.len() / 3 - 1
    }

    fn position(&self) -> Vector3<f64> {
        self.parameters.fixed_rows::<3>(0).into_owned()
    }

    fn set_position(&mut self, position: &Vector3<f64>) {
        self.parameters.fixed_rows_mut::<3>(0).copy_from(position);
    }

    fn momentum_parameters(&self, track: usize) -> Vector3<f64> {
        self.parameters.fixed_rows::<3>(3 * (track + 1)).into_owned()
    }

    fn set_momentum_parameters(&mut self, track: usize, q: &Vector3<f64>) {
        self.parameters.fixed_rows_mut::<3>(3 * (track + 1)).copy_from(q);
    }

    /// The 3x3 covariance block between state entries `i` and `j` (0 is the vertex).
    fn block(&self, i: usize, j: usize) -> Matrix3<f64> {
        self.covariance.fixed_view::<3, 3>(3 * i, 3 * j).into_owned()
    }

    fn set_block(&mut self, i: usize, j: usize, block: &Matrix3<f64>) {
        self.covariance.fixed_view_mut::<3, 3>(3 * i, 3 * j).copy_from(block);
    }

    /// Add a measurement `m = h(x) + noise` with `residual = m - h(x)` and Jacobian `h`.
    fn update(
        &mut self,
        residual: &DVector<f64>,
        h: &DMatrix<f64>,
        noise: &DMatrix<f64>,
    ) -> VertexResult<()> {
        let ch_t = &self.covariance * h.transpose();
        let innovation = h * &ch_t + noise;
        let innovation_inv = innovation.cholesky().map(|c| c.inverse()).ok_or_else(|| {
            VertexError::DegenerateFit("constraint covariance is not positive definite".to_string())
        })?;
        let gain = &ch_t * &innovation_inv;
        self.parameters += &gain * residual;
        self.covariance -= &gain * ch_t.transpose();
        self.covariance = (&self.covariance + self.covariance.transpose()) * 0.5;
        self.chi2 += residual.dot(&(&innovation_inv * residual));
        Ok(())
    }
}

/// The momentum for fitted $`(\theta, \phi, \omega)`$ in a field of `b_field` Tesla.
pub fn momentum(q: &Vector3<f64>, b_field: f64) -> Vector3<f64> {
    let (theta, phi, omega) = (q.x, q.y, q.z);
    let pt = (FIELD_CONVERSION * b_field / omega).abs();
    if !pt.is_finite() {
        return Vector3::repeat(f64::NAN);
    }
    Vector3::new(pt * phi.cos(), pt * phi.sin(), pt / theta.tan())
}

/// The Jacobian $`\partial\vec{p} / \partial(\theta, \phi, \omega)`$ of [`momentum`].
pub fn momentum_jacobian(q: &Vector3<f64>, b_field: f64) -> Matrix3<f64> {
    let (theta, phi, omega) = (q.x, q.y, q.z);
    let pt = (FIELD_CONVERSION * b_field / omega).abs();
    if !pt.is_finite() {
        return Matrix3::repeat(f64::NAN);
    }
    let (sin_phi, cos_phi) = phi.sin_cos();
    let cot_theta = 1.0 / theta.tan();
    #[rustfmt::skip]
    let jacobian = Matrix3::new(
        0.0,                        -pt * sin_phi, -pt * cos_phi / omega,
        0.0,                        pt * cos_phi,  -pt * sin_phi / omega,
        -pt / theta.sin().powi(2),  0.0,           -pt * cot_theta / omega,
    );
    jacobian
}

/// The invariant mass of `momenta` under a common `mass` hypothesis, with its gradient with respect
/// to each momentum, or [`None`] if it is undefined.
fn invariant_mass(momenta: &[Vector3<f64>], mass: f64) -> Option<(f64, Vec<Vector3<f64>>)> {
    if momenta.iter().any(|p| p.iter().any(|c| !c.is_finite())) {
        return None;
    }
    let total = momenta
        .iter()
        .map(|p| p.with_mass(mass))
        .sum::<nalgebra::Vector4<f64>>();
    let invariant = total.m()?;
    let gradients = momenta
        .iter()
        .map(|p| (p * (total.e() / p.energy(mass)) - total.momentum()) / invariant)
        .collect();
    Some((invariant, gradients))
}
