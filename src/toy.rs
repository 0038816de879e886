use nalgebra::{Matrix5, Vector3, Vector5};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::{
    propagation::shift_state,
    track::{Track, TrackState},
    VertexError, VertexResult, FIELD_CONVERSION,
};

/// A generated electron-positron pair together with the true vertex and helix parameters.
#[derive(Clone, Debug)]
pub struct ToyV0 {
    /// The true vertex, relative to the generator's reference point (tracking frame).
    pub vertex: Vector3<f64>,
    /// The smeared electron track.
    pub electron: Track,
    /// The smeared positron track.
    pub positron: Track,
    /// The unsmeared states of the electron and positron at the reference point.
    pub truth: [TrackState; 2],
}

/// Generates smeared electron-positron pairs which originate from a known vertex.
///
/// Each daughter gets a momentum drawn uniformly from `momentum_range`, leaves the vertex in
/// opposite halves of the detector (one with positive and one with negative dip) and bends
/// according to its charge. Its helix parameters are then expressed about the reference point and
/// smeared by a Gaussian with the generator's track covariance.
#[derive(Clone, Debug)]
pub struct ToyV0Generator {
    b_field: f64,
    reference_point: Vector3<f64>,
    covariance: Matrix5<f64>,
    cholesky_l: Matrix5<f64>,
    momentum_range: (f64, f64),
    rng: ChaCha8Rng,
}

impl ToyV0Generator {
    /// Create a generator for a field of `b_field` Tesla.
    ///
    /// Fails if `covariance` is not positive definite.
    pub fn new(b_field: f64, covariance: Matrix5<f64>, seed: u64) -> VertexResult<Self> {
        if b_field == 0.0 || !b_field.is_finite() {
            return Err(VertexError::InvalidArgument(format!(
                "toy tracks need a non-zero field, got {}",
                b_field
            )));
        }
        let cholesky_l = covariance
            .cholesky()
            .ok_or_else(|| {
                VertexError::InvalidArgument("toy covariance is not positive definite".to_string())
            })?
            .l();
        Ok(Self {
            b_field,
            reference_point: Vector3::zeros(),
            covariance,
            cholesky_l,
            momentum_range: (0.4, 1.6),
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    /// Express the generated tracks about `reference_point` instead of the origin.
    pub fn with_reference_point(mut self, reference_point: Vector3<f64>) -> Self {
        self.reference_point = reference_point;
        self
    }

    /// Draw daughter momenta (GeV) uniformly from `momentum_range`.
    ///
    /// # Panics
    ///
    /// Panics if the range is empty or not strictly positive.
    pub fn with_momentum_range(mut self, momentum_range: (f64, f64)) -> Self {
        assert!(
            momentum_range.0 > 0.0 && momentum_range.1 > momentum_range.0,
            "The momentum range must be positive and non-empty!"
        );
        self.momentum_range = momentum_range;
        self
    }

    /// The point the generated tracks are expressed about.
    pub fn reference_point(&self) -> &Vector3<f64> {
        &self.reference_point
    }
    /// The covariance used to smear and to label every generated track.
    pub fn covariance(&self) -> &Matrix5<f64> {
        &self.covariance
    }

    /// Generate a pair originating from `vertex` (relative to the reference point).
    pub fn generate(&mut self, vertex: &Vector3<f64>) -> VertexResult<ToyV0> {
        let opening = self.rng.gen_range(0.02..0.06);
        let dip = self.rng.gen_range(0.015..0.04);
        let top_is_electron = self.rng.gen_bool(0.5);
        let (electron_dip, positron_dip) = if top_is_electron {
            (dip, -dip)
        } else {
            (-dip, dip)
        };
        let electron_truth = self.true_state(vertex, opening, electron_dip, -1.0)?;
        let positron_truth = self.true_state(vertex, -opening, positron_dip, 1.0)?;
        let electron = self.smear(&electron_truth)?;
        let positron = self.smear(&positron_truth)?;
        Ok(ToyV0 {
            vertex: *vertex,
            electron,
            positron,
            truth: [electron_truth, positron_truth],
        })
    }

    fn true_state(
        &mut self,
        vertex: &Vector3<f64>,
        phi: f64,
        tan_lambda: f64,
        charge: f64,
    ) -> VertexResult<TrackState> {
        let (low, high) = self.momentum_range;
        let p = self.rng.gen_range(low..high);
        let pt = p / tan_lambda.hypot(1.0);
        // the charge is -sign(omega * B)
        let omega = -charge * FIELD_CONVERSION * self.b_field / pt;
        let at_vertex = TrackState::through_point(
            &(self.reference_point + vertex),
            phi,
            omega,
            tan_lambda,
            self.covariance,
        )?;
        let at_reference = shift_state(&at_vertex, &self.reference_point)?;
        TrackState::from_parts(
            *at_reference.parameters(),
            self.reference_point,
            self.covariance,
        )
    }

    fn smear(&mut self, truth: &TrackState) -> VertexResult<Track> {
        let noise: Vector5<f64> = Vector5::from_fn(|_, _| StandardNormal.sample(&mut self.rng));
        let parameters = truth.parameters() + self.cholesky_l * noise;
        let state = TrackState::from_parts(parameters, self.reference_point, self.covariance)?;
        Ok(Track::new(vec![state], noise.norm_squared(), 5))
    }
}
