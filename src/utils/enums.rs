use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::VertexError;

/// Optional constraints which can be added to a vertex fit.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Constraint {
    /// The vertex is determined by the tracks alone.
    #[default]
    Unconstrained,
    /// The transverse ($`y`$, $`z`$ in the tracking frame) vertex position is pulled toward the
    /// beam spot, weighted by the beam-spot widths.
    BeamSpot,
    /// All three vertex coordinates are pulled toward the target position, weighted by the
    /// beam-spot widths (the first width being the target thickness).
    Target,
    /// The summed momentum of the tracks, extended from the vertex, must pass through the beam spot
    /// in the transverse plane at the beam-spot $`x`$.
    PointBack,
}

impl Constraint {
    /// Whether fits with this constraint are repeated about the first-pass vertex.
    ///
    /// Target-constrained fits pin the vertex to the target and are done in a single pass.
    pub fn is_relinearized(&self) -> bool {
        !matches!(self, Constraint::Target)
    }

    /// The number of independent measurements this constraint adds to a fit.
    pub fn dimension(&self) -> usize {
        match self {
            Constraint::Unconstrained => 0,
            Constraint::BeamSpot | Constraint::PointBack => 2,
            Constraint::Target => 3,
        }
    }
}

impl Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constraint::Unconstrained => write!(f, "Unconstrained"),
            Constraint::BeamSpot => write!(f, "Beam Spot"),
            Constraint::Target => write!(f, "Target"),
            Constraint::PointBack => write!(f, "Point Back"),
        }
    }
}

impl FromStr for Constraint {
    type Err = VertexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unconstrained" | "none" | "free" => Ok(Self::Unconstrained),
            "beamspot" | "beam spot" | "beam-spot" | "bsc" => Ok(Self::BeamSpot),
            "target" | "tc" => Ok(Self::Target),
            "pointback" | "point back" | "point-back" => Ok(Self::PointBack),
            _ => Err(VertexError::ParseError {
                name: s.to_string(),
                object: "Constraint".to_string(),
            }),
        }
    }
}

/// The half of the silicon tracker a particle was detected in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    /// The half above the beam plane.
    Top,
    /// The half below the beam plane.
    Bottom,
}

impl Side {
    /// Assign a side from a vertical (detector $`y`$) position.
    pub fn from_y(y: f64) -> Self {
        if y > 0.0 {
            Side::Top
        } else {
            Side::Bottom
        }
    }
}

impl Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Top => write!(f, "top"),
            Side::Bottom => write!(f, "bottom"),
        }
    }
}

impl FromStr for Side {
    type Err = VertexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_ref() {
            "top" | "t" | "up" => Ok(Self::Top),
            "bottom" | "bot" | "b" | "down" => Ok(Self::Bottom),
            _ => Err(VertexError::ParseError {
                name: s.to_string(),
                object: "Side".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_displays() {
        assert_eq!(format!("{}", Constraint::Unconstrained), "Unconstrained");
        assert_eq!(format!("{}", Constraint::BeamSpot), "Beam Spot");
        assert_eq!(format!("{}", Constraint::Target), "Target");
        assert_eq!(format!("{}", Constraint::PointBack), "Point Back");
        assert_eq!(format!("{}", Side::Top), "top");
        assert_eq!(format!("{}", Side::Bottom), "bottom");
    }

    #[test]
    fn enum_from_str() {
        assert_eq!(
            "beam spot".parse::<Constraint>().unwrap(),
            Constraint::BeamSpot
        );
        assert_eq!("TARGET".parse::<Constraint>().unwrap(), Constraint::Target);
        assert_eq!(
            "point-back".parse::<Constraint>().unwrap(),
            Constraint::PointBack
        );
        assert_eq!("bot".parse::<Side>().unwrap(), Side::Bottom);
        assert!(matches!(
            "sideways".parse::<Side>(),
            Err(VertexError::ParseError { .. })
        ));
        assert!("vertex".parse::<Constraint>().is_err());
    }

    #[test]
    fn relinearized_constraints() {
        assert!(Constraint::Unconstrained.is_relinearized());
        assert!(Constraint::BeamSpot.is_relinearized());
        assert!(Constraint::PointBack.is_relinearized());
        assert!(!Constraint::Target.is_relinearized());
        assert_eq!(Constraint::Target.dimension(), 3);
    }
}
