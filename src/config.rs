use std::path::PathBuf;

use nalgebra::Vector3;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    utils::enums::Constraint,
    vertexer::{BeamSpot, BilliorVertexer},
    VertexError, VertexResult, ELECTRON_MASS,
};

fn expand_path(file_path: &str) -> VertexResult<PathBuf> {
    Ok(PathBuf::from(&*shellexpand::full(file_path)?))
}

/// Read a YAML document from `file_path` (which may contain `~` or environment variables).
pub fn read_yaml<T: DeserializeOwned>(file_path: &str) -> VertexResult<T> {
    let path = expand_path(file_path)?;
    if !path.exists() {
        return Err(VertexError::InvalidArgument(format!(
            "configuration file {} does not exist",
            path.display()
        )));
    }
    let yaml_str = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str::<T>(&yaml_str)?)
}

/// Write `value` as a YAML document to `file_path`.
pub fn write_yaml<T: Serialize>(value: &T, file_path: &str) -> VertexResult<()> {
    let path = expand_path(file_path)?;
    std::fs::write(path, serde_yaml::to_string(value)?)?;
    Ok(())
}

/// Settings for a [`BilliorVertexer`], serializable to YAML.
///
/// Every field is optional in the file; missing fields take their [`Default`] values. Positions
/// and sizes are in the tracking frame (mm).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VertexerConfig {
    /// Field strength along the tracking $`z`$ axis (T).
    pub b_field: f64,
    pub constraint: Constraint,
    pub beam_position: [f64; 3],
    pub beam_size: [f64; 3],
    /// Linearization point relative to the tracks' reference point.
    pub initial_vertex: [f64; 3],
    /// Mass (GeV) assigned to each track for the invariant mass.
    pub mass_hypothesis: f64,
}

impl Default for VertexerConfig {
    fn default() -> Self {
        let beam_spot = BeamSpot::default();
        Self {
            b_field: 0.52,
            constraint: Constraint::Unconstrained,
            beam_position: beam_spot.position.into(),
            beam_size: beam_spot.size.into(),
            initial_vertex: [0.0; 3],
            mass_hypothesis: ELECTRON_MASS,
        }
    }
}

impl VertexerConfig {
    /// Read the configuration from a YAML file.
    pub fn read_config_file(file_path: &str) -> VertexResult<Self> {
        read_yaml(file_path)
    }

    /// Build the [`BilliorVertexer`] described by this configuration.
    ///
    /// Fails with [`VertexError::InvalidArgument`] for a non-finite field, a non-positive beam size
    /// or a negative mass hypothesis.
    pub fn build(&self) -> VertexResult<BilliorVertexer> {
        if !self.b_field.is_finite() {
            return Err(VertexError::InvalidArgument(format!(
                "magnetic field must be finite, got {}",
                self.b_field
            )));
        }
        if !(self.mass_hypothesis >= 0.0 && self.mass_hypothesis.is_finite()) {
            return Err(VertexError::InvalidArgument(format!(
                "mass hypothesis must be non-negative, got {}",
                self.mass_hypothesis
            )));
        }
        let beam_spot = BeamSpot::new(
            Vector3::from(self.beam_position),
            Vector3::from(self.beam_size),
        )?;
        Ok(BilliorVertexer::new(self.b_field)
            .with_constraint(self.constraint)
            .with_beam_spot(beam_spot)
            .with_initial_vertex(Vector3::from(self.initial_vertex))
            .with_mass_hypothesis(self.mass_hypothesis))
    }
}
