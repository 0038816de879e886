//! A single Billior fit is only exact at the point it is linearized about, which is the tracks'
//! reference point. For vertices displaced from it (a few centimeters downstream of the target,
//! say) the first fit is biased by the curvature of the tracks. Re-expressing every track about
//! the first-pass vertex and fitting again removes that bias: the second fit only has to find a
//! small residual displacement.
use log::debug;
use nalgebra::Vector3;
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::{
    track::{BilliorTrack, Track},
    vertex::Vertex,
    vertexer::BilliorVertexer,
    VertexResult,
};

/// Fit a vertex, repeating the fit about the first-pass vertex when the constraint calls for it.
///
/// For [`Constraint::Target`](crate::Constraint::Target) a single pass is done. Otherwise the
/// tracks are fitted once (giving $`\vec{V}_1`$), re-expressed about
/// $`\vec{r}_{\text{ref}} + \vec{V}_1`$ and fitted again (giving $`\vec{V}_2`$). The result carries
/// the covariance, $`\chi^2`$ and momenta of the second pass and the position
/// $`\vec{V}_1 + \vec{V}_2`$, relative to the tracks' original reference point.
pub fn fit_relinearized(
    vertexer: &BilliorVertexer,
    tracks: &[BilliorTrack],
) -> VertexResult<Vertex> {
    let first = vertexer.fit_vertex(tracks)?;
    if !vertexer.constraint().is_relinearized() {
        return Ok(first);
    }
    let reference = match tracks.first() {
        Some(track) => track.reference_point() + first.position(),
        None => return Ok(first),
    };
    let shifted = tracks
        .iter()
        .map(|track| track.shifted_to(&reference))
        .collect::<VertexResult<Vec<_>>>()?;
    let mut second = vertexer
        .clone()
        .with_initial_vertex(Vector3::zeros())
        .fit_vertex(&shifted)?;
    debug!(
        "re-linearized about {:?}, residual shift {:?}",
        reference.as_slice(),
        second.position().as_slice()
    );
    second.shift_position(first.position());
    Ok(second)
}

/// Fit the vertex of two [`Track`]s with [`fit_relinearized`].
pub fn fit_track_pair(
    vertexer: &BilliorVertexer,
    first: &Track,
    second: &Track,
) -> VertexResult<Vertex> {
    let tracks = [
        BilliorTrack::from_track(first)?,
        BilliorTrack::from_track(second)?,
    ];
    fit_relinearized(vertexer, &tracks)
}

/// Fit many independent track pairs with [`fit_relinearized`].
///
/// The results are in the same order as `pairs`. With the `rayon` feature the pairs are fitted in
/// parallel.
pub fn fit_pairs(
    vertexer: &BilliorVertexer,
    pairs: &[(BilliorTrack, BilliorTrack)],
) -> Vec<VertexResult<Vertex>> {
    #[cfg(feature = "rayon")]
    return pairs
        .par_iter()
        .map(|(a, b)| fit_relinearized(vertexer, &[a.clone(), b.clone()]))
        .collect();
    #[cfg(not(feature = "rayon"))]
    return pairs
        .iter()
        .map(|(a, b)| fit_relinearized(vertexer, &[a.clone(), b.clone()]))
        .collect();
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{
        track::{tests::test_covariance, TrackState},
        utils::enums::Constraint,
        vertexer::{
            tests::{point_back_miss, track_through, v0_pair, B_FIELD},
            BeamSpot,
        },
        VertexError,
    };

    #[test]
    fn test_displaced_vertex_along_beam() {
        // crossing 50 mm downstream of the target (detector z)
        let vertex = Vector3::new(50.0, 0.0, 0.0);
        let tracks = [
            track_through(&vertex, 0.04, 5e-5, 0.02),
            track_through(&vertex, -0.045, -5e-5, -0.015),
        ];
        let vertexer = BilliorVertexer::new(B_FIELD);
        let fitted = fit_relinearized(&vertexer, &tracks).unwrap();
        let z = fitted.position_detector().z;
        assert!((49.9..=50.1).contains(&z), "z = {}", z);
        let single = vertexer.fit_vertex(&tracks).unwrap();
        assert!((fitted.position() - vertex).norm() < (single.position() - vertex).norm());
    }

    #[test]
    fn test_straight_tracks_crossing_downstream() {
        // one track along the beam through the origin, the other crossing it 50 mm downstream
        let crossing = Vector3::new(50.0, 0.0, 0.0);
        let tracks = [
            track_through(&Vector3::zeros(), 0.0, 0.0, 0.0),
            track_through(&crossing, 0.05, 0.0, 0.02),
        ];
        let fitted = fit_relinearized(&BilliorVertexer::new(B_FIELD), &tracks).unwrap();
        let detector = fitted.position_detector();
        assert_relative_eq!(detector.z, 50.0, epsilon = 1e-6);
        assert_relative_eq!(detector.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(detector.y, 0.0, epsilon = 1e-6);
        assert!(fitted.invariant_mass().is_none());
    }

    #[test]
    fn test_point_back_constraint_relinearized() {
        // a displaced V0 whose momentum misses the beam spot at the origin
        let vertex = Vector3::new(40.0, 0.5, 0.3);
        let tracks = v0_pair(&vertex, 1e-4);
        let free = fit_relinearized(&BilliorVertexer::new(B_FIELD), &tracks).unwrap();
        let vertexer = BilliorVertexer::new(B_FIELD).with_constraint(Constraint::PointBack);
        let pointed = fit_relinearized(&vertexer, &tracks).unwrap();
        assert!((pointed.position().x - vertex.x).abs() < 0.05, "x = {}", pointed.position().x);
        let beam = Vector3::zeros();
        assert!(point_back_miss(&pointed, &beam) < point_back_miss(&free, &beam));
        assert_eq!(pointed.constraint(), Constraint::PointBack);
        assert_eq!(pointed.ndf(), 3);
    }

    #[test]
    fn test_noise_free_relinearized_fit() {
        let vertex = Vector3::new(35.0, 0.8, -0.5);
        let tracks = v0_pair(&vertex, 1e-4);
        let fitted = fit_relinearized(&BilliorVertexer::new(B_FIELD), &tracks).unwrap();
        assert_relative_eq!(fitted.position(), &vertex, epsilon = 1e-2);
        assert_eq!(fitted.ndf(), 1);
        assert!(fitted.chi2() < 1e-4);
    }

    #[test]
    fn test_origin_is_fixed_point() {
        let tracks = v0_pair(&Vector3::zeros(), 1.5e-4);
        let fitted = fit_relinearized(&BilliorVertexer::new(B_FIELD), &tracks).unwrap();
        assert_relative_eq!(fitted.position(), &Vector3::zeros(), epsilon = 1e-9);
    }

    #[test]
    fn test_result_is_relative_to_original_reference() {
        let reference = Vector3::new(-4.3, 0.1, 0.0);
        let vertex = Vector3::new(10.0, 0.3, 0.2);
        let point = reference + vertex;
        let tracks = [(0.04, 1e-4, 0.03), (-0.05, -1e-4, -0.025)].map(|(phi, omega, tan_lambda)| {
            let state =
                TrackState::through_point(&point, phi, omega, tan_lambda, test_covariance())
                    .unwrap();
            BilliorTrack::from_state(&state, 0.0, 0)
                .shifted_to(&reference)
                .unwrap()
        });
        let fitted = fit_relinearized(&BilliorVertexer::new(B_FIELD), &tracks).unwrap();
        assert_relative_eq!(fitted.position(), &vertex, epsilon = 1e-3);
    }

    #[test]
    fn test_target_constraint_is_single_pass() {
        let tracks = v0_pair(&Vector3::new(5.0, 0.02, 0.0), 1e-4);
        let beam_spot = BeamSpot::new(Vector3::zeros(), Vector3::new(0.01, 0.01, 0.01)).unwrap();
        let vertexer = BilliorVertexer::new(B_FIELD)
            .with_constraint(Constraint::Target)
            .with_beam_spot(beam_spot);
        let single = vertexer.fit_vertex(&tracks).unwrap();
        let composed = fit_relinearized(&vertexer, &tracks).unwrap();
        assert_eq!(single.position(), composed.position());
        assert_eq!(single.chi2(), composed.chi2());
    }

    #[test]
    fn test_beam_spot_constraint_relinearized() {
        let tracks = v0_pair(&Vector3::new(0.5, 0.05, 0.0), 1e-4);
        let vertexer = BilliorVertexer::new(B_FIELD).with_constraint(Constraint::BeamSpot);
        let free = fit_relinearized(&BilliorVertexer::new(B_FIELD), &tracks).unwrap();
        let constrained = fit_relinearized(&vertexer, &tracks).unwrap();
        assert!(constrained.position().y.abs() < free.position().y.abs());
        assert_eq!(constrained.constraint(), Constraint::BeamSpot);
    }

    #[test]
    fn test_track_pair_and_batch() {
        let vertex = Vector3::new(20.0, 0.0, 0.1);
        let [a, b] = v0_pair(&vertex, 1e-4);
        let vertexer = BilliorVertexer::new(B_FIELD);
        let as_track = |t: &BilliorTrack| Track::new(vec![t.state().clone()], 10.0, 7);
        let paired = fit_track_pair(&vertexer, &as_track(&a), &as_track(&b)).unwrap();
        let batch = fit_pairs(&vertexer, &[(a.clone(), b.clone()), (a.clone(), a)]);
        assert_eq!(batch.len(), 2);
        let first = batch[0].as_ref().unwrap();
        assert_eq!(first.position(), paired.position());
        assert!(matches!(batch[1], Err(VertexError::DegenerateFit(_))));
        assert!(fit_track_pair(&vertexer, &Track::new(vec![], 0.0, 0), &as_track(&b)).is_err());
    }
}
