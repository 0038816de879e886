//! Moving a helix to a new reference point.
//!
//! The helix itself does not change: $`\omega`$ and $`\tan\lambda`$ are invariant, while
//! $`d_0`$, $`\phi_0`$ and $`z_0`$ are re-measured about the new point. With the shift
//! $`\vec{\delta} = \vec{r}' - \vec{r}`$ decomposed along the track direction and its left
//! normal at the old point of closest approach,
//! ```math
//! T = \delta_x\cos\phi_0 + \delta_y\sin\phi_0, \quad N = -\delta_x\sin\phi_0 + \delta_y\cos\phi_0,
//! ```
//! and the curvature about the old reference point $`\kappa = \omega / (1 + \omega d_0)`$, the new
//! parameters are
//! ```math
//! \begin{aligned}
//! \phi_0' &= \phi_0 + \operatorname{atan2}(\kappa T, 1 - \kappa N) \\
//! d_0' &= d_0 + \frac{\kappa(T^2 + N^2) - 2N}{\sqrt{(1 - \kappa N)^2 + \kappa^2 T^2} + 1} \\
//! z_0' &= z_0 + s\tan\lambda - \delta_z
//! \end{aligned}
//! ```
//! where $`s = (\phi_0' - \phi_0)/\omega`$ is the transverse path length between the two points of
//! closest approach. None of these divide by the curvature, so straight tracks are handled
//! without special cases; $`s`$ is evaluated from a power series in $`\kappa`$ when the turning
//! angle is small.
use nalgebra::{Matrix5, Vector3, Vector5};

use crate::{
    track::{TrackState, D0, OMEGA, PHI0, TAN_LAMBDA, Z0},
    VertexError, VertexResult,
};

/// Turning angle (radians) below which the path length is computed from its power series.
pub const STRAIGHT_LINE_LIMIT: f64 = 1e-4;

/// The turning angle $`\Delta\phi`$, transverse path length $`F = \Delta\phi / \kappa`$ and
/// $`\partial F / \partial\kappa`$ along a circle of curvature `kappa` which starts in the
/// direction of $`+T`$ and is displaced by $`(T, N)`$ along and across that direction.
///
/// The caller must ensure $`(1 - \kappa N)^2 + (\kappa T)^2 > 0`$.
pub(crate) fn arc(kappa: f64, t: f64, n: f64) -> (f64, f64, f64) {
    let x = 1.0 - kappa * n;
    let y = kappa * t;
    let dphi = y.atan2(x);
    if kappa.abs() * t.hypot(n) < STRAIGHT_LINE_LIMIT {
        let a1 = t * n;
        let a2 = t * n.powi(2) - t.powi(3) / 3.0;
        let a3 = t * n.powi(3) - t.powi(3) * n;
        (
            dphi,
            t + kappa * (a1 + kappa * (a2 + kappa * a3)),
            a1 + kappa * (2.0 * a2 + 3.0 * kappa * a3),
        )
    } else {
        let f = dphi / kappa;
        (dphi, f, (t / (x.powi(2) + y.powi(2)) - f) / kappa)
    }
}

/// Intermediate quantities shared by the parameter shift and its Jacobian.
struct ShiftGeometry {
    t: f64,
    n: f64,
    d2: f64,
    dz: f64,
    one_plus: f64,
    kappa: f64,
    x: f64,
    q: f64,
    root_q: f64,
    dphi: f64,
    /// $`F(\kappa) = \Delta\phi / \kappa`$
    f: f64,
    /// $`\partial F / \partial\kappa`$
    f_prime: f64,
}

impl ShiftGeometry {
    fn new(state: &TrackState, new_reference: &Vector3<f64>) -> VertexResult<Self> {
        let delta = new_reference - state.reference_point();
        let (sin_phi, cos_phi) = state.phi0().sin_cos();
        let t = delta.x * cos_phi + delta.y * sin_phi;
        let n = -delta.x * sin_phi + delta.y * cos_phi;
        let d2 = delta.x.powi(2) + delta.y.powi(2);
        let one_plus = 1.0 + state.omega() * state.d0();
        if one_plus.abs() < f64::EPSILON {
            return Err(VertexError::NumericInstability(
                "reference point lies at the center of the helix".to_string(),
            ));
        }
        let kappa = state.omega() / one_plus;
        let x = 1.0 - kappa * n;
        let y = kappa * t;
        let q = x.powi(2) + y.powi(2);
        if q < f64::EPSILON {
            return Err(VertexError::NumericInstability(
                "new reference point lies at the center of the helix".to_string(),
            ));
        }
        let (dphi, f, f_prime) = arc(kappa, t, n);
        Ok(Self {
            t,
            n,
            d2,
            dz: delta.z,
            one_plus,
            kappa,
            x,
            q,
            root_q: q.sqrt(),
            dphi,
            f,
            f_prime,
        })
    }

    fn path_length(&self) -> f64 {
        self.f / self.one_plus
    }

    fn parameters(&self, state: &TrackState) -> Vector5<f64> {
        let mut parameters = *state.parameters();
        parameters[PHI0] += self.dphi;
        parameters[D0] += (self.kappa * self.d2 - 2.0 * self.n) / (self.root_q + 1.0);
        parameters[Z0] += self.path_length() * state.tan_lambda() - self.dz;
        parameters
    }

    fn jacobian(&self, state: &TrackState) -> Matrix5<f64> {
        let (t, n, d2, kappa, q) = (self.t, self.n, self.d2, self.kappa, self.q);
        let dkappa_dd0 = -kappa.powi(2);
        let dkappa_domega = 1.0 / self.one_plus.powi(2);
        let mut jacobian = Matrix5::identity();

        let dphi_dkappa = t / q;
        jacobian[(PHI0, D0)] = dphi_dkappa * dkappa_dd0;
        jacobian[(PHI0, PHI0)] = self.x / q;
        jacobian[(PHI0, OMEGA)] = dphi_dkappa * dkappa_domega;

        let g = kappa * d2 - 2.0 * n;
        let h = self.root_q + 1.0;
        let dg_dkappa = (d2 * h - g * (kappa * d2 - n) / self.root_q) / h.powi(2);
        let dg_dphi = t * (2.0 * h - g * kappa / self.root_q) / h.powi(2);
        jacobian[(D0, D0)] = 1.0 + dg_dkappa * dkappa_dd0;
        jacobian[(D0, PHI0)] = dg_dphi;
        jacobian[(D0, OMEGA)] = dg_dkappa * dkappa_domega;

        let ds_dd0 = -state.omega() * self.f / self.one_plus.powi(2)
            + self.f_prime * dkappa_dd0 / self.one_plus;
        let ds_dphi = (n - kappa * d2) / q / self.one_plus;
        let ds_domega = -state.d0() * self.f / self.one_plus.powi(2)
            + self.f_prime * dkappa_domega / self.one_plus;
        let tan_lambda = state.tan_lambda();
        jacobian[(Z0, D0)] = tan_lambda * ds_dd0;
        jacobian[(Z0, PHI0)] = tan_lambda * ds_dphi;
        jacobian[(Z0, OMEGA)] = tan_lambda * ds_domega;
        jacobian[(Z0, TAN_LAMBDA)] = self.path_length();
        jacobian
    }
}

/// The helix parameters of `state` re-expressed about `new_reference`.
pub fn shift_parameters(
    state: &TrackState,
    new_reference: &Vector3<f64>,
) -> VertexResult<Vector5<f64>> {
    Ok(ShiftGeometry::new(state, new_reference)?.parameters(state))
}

/// The Jacobian $`\partial p' / \partial p`$ of [`shift_parameters`] with respect to the original
/// parameters.
pub fn shift_jacobian(
    state: &TrackState,
    new_reference: &Vector3<f64>,
) -> VertexResult<Matrix5<f64>> {
    Ok(ShiftGeometry::new(state, new_reference)?.jacobian(state))
}

/// Re-express a [`TrackState`] about `new_reference`, propagating the covariance as
/// $`J C J^{T}`$.
pub fn shift_state(state: &TrackState, new_reference: &Vector3<f64>) -> VertexResult<TrackState> {
    let geometry = ShiftGeometry::new(state, new_reference)?;
    let parameters = geometry.parameters(state);
    let jacobian = geometry.jacobian(state);
    let covariance = jacobian * state.covariance() * jacobian.transpose();
    TrackState::from_parts(parameters, *new_reference, (covariance + covariance.transpose()) * 0.5)
        .map_err(|_| {
            VertexError::NumericInstability(format!(
                "shifting track to {:?} produced non-finite parameters",
                new_reference.as_slice()
            ))
        })
}
