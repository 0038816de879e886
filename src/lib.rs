//! # hps-vertex
//!
//! `hps-vertex` fits a common vertex to pairs of charged tracks using the linearized Billior
//! least-squares method, and re-linearizes the fit about its own result by re-expressing each
//! track's helix parameters at the first-pass vertex.
//!
//! # Conventions
//!
//! All geometry is expressed in the *tracking* frame: $`x`$ points along the beam, the bend
//! plane is $`x`$-$`y`$ and the magnetic field points along $`z`$. Lengths are in millimeters,
//! momenta in GeV and fields in Tesla. The [`coordinates`] module converts to and from the
//! detector frame (where $`z`$ is the beam axis).
//!
//! A track is described by a [`TrackState`](track::TrackState): the five helix parameters
//! $`(d_0, \phi_0, \omega, z_0, \tan\lambda)`$ defined about a reference point, together with
//! their covariance.
//!
//! # Example
//!
//! ```ignore
//! use hps_vertex::prelude::*;
//!
//! let vertexer = BilliorVertexer::new(0.52).with_constraint(Constraint::BeamSpot);
//! let vertex = fit_track_pair(&vertexer, &electron, &positron)?;
//! let z_error = vertex.covariance_detector()[(2, 2)].sqrt();
//! println!("z = {} +/- {}", vertex.position_detector().z, z_error);
//! ```
#![warn(clippy::perf, clippy::style)]
#![allow(clippy::excessive_precision)]

use thiserror::Error;

/// Analysis drivers which select V0 candidates and histogram their vertices.
pub mod analysis;
/// YAML configuration of the vertexer.
pub mod config;
/// Conversions between the tracking frame and the detector frame.
pub mod coordinates;
/// Named histograms and profiles which can be filled during an analysis.
pub mod histograms;
/// Re-expression of helix parameters about a new reference point.
pub mod propagation;
/// The two-pass (re-linearized) vertex fit and batch fitting of track pairs.
pub mod relinearize;
/// Generation of smeared toy V0 decays with known vertices.
pub mod toy;
/// Track parameter containers and the fitter-internal track representation.
pub mod track;
/// Useful utility functions and enumerations.
pub mod utils;
/// The result of a vertex fit.
pub mod vertex;
/// The Billior vertex fitter.
pub mod vertexer;

pub use crate::relinearize::{fit_pairs, fit_relinearized, fit_track_pair};
pub use crate::track::{BilliorTrack, Track, TrackState};
pub use crate::utils::enums::{Constraint, Side};
pub use crate::vertex::{FittedParticle, Vertex};
pub use crate::vertexer::{BeamSpot, BilliorVertexer};

/// Conversion factor between magnetic field times radius of curvature and transverse momentum,
/// in GeV / (T mm).
pub const FIELD_CONVERSION: f64 = 2.99792458e-4;

/// The mass of the electron in GeV.
pub const ELECTRON_MASS: f64 = 0.000510998950;

/// Common imports for fitting vertices.
pub mod prelude {
    pub use crate::relinearize::{fit_pairs, fit_relinearized, fit_track_pair};
    pub use crate::track::{BilliorTrack, Track, TrackState};
    pub use crate::utils::enums::{Constraint, Side};
    pub use crate::vertex::{FittedParticle, Vertex};
    pub use crate::vertexer::{BeamSpot, BilliorVertexer};
    pub use crate::{VertexError, VertexResult};
}

/// A [`Result`] type alias for [`VertexError`]s.
pub type VertexResult<T> = Result<T, VertexError>;

/// The error type used by all `hps-vertex` methods
#[derive(Error, Debug)]
pub enum VertexError {
    /// An alias for [`std::io::Error`].
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
    /// An alias for [`serde_yaml::Error`].
    #[error("YAML Error: {0}")]
    YamlError(#[from] serde_yaml::Error),
    /// An alias for [`shellexpand::LookupError`].
    #[error("Failed to expand path: {0}")]
    LookupError(#[from] shellexpand::LookupError<std::env::VarError>),
    /// A malformed input: wrong sizes, an empty track, tracks with different reference points or a
    /// covariance matrix which cannot be inverted.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// The normal equations (or a constraint system) of a fit are singular or too poorly
    /// conditioned to be solved, for instance when two tracks are collinear.
    #[error("Degenerate fit: {0}")]
    DegenerateFit(String),
    /// A geometric computation which is undefined for the given input, such as shifting a helix
    /// to a reference point at its own center.
    #[error("Numeric instability: {0}")]
    NumericInstability(String),
    /// An error which occurs when the user tries to parse an invalid string of text, typically
    /// into an enum variant.
    #[error("Failed to parse string: \"{name}\" does not correspond to a valid \"{object}\"!")]
    ParseError {
        /// The string which was parsed
        name: String,
        /// The name of the object it failed to parse into
        object: String,
    },
}
