use std::collections::VecDeque;

use log::{debug, info, warn};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::{
    config::{read_yaml, VertexerConfig},
    coordinates::to_detector,
    histograms::HistogramSink,
    relinearize::fit_track_pair,
    track::Track,
    utils::enums::Side,
    vertex::Vertex,
    vertexer::BilliorVertexer,
    VertexResult,
};

/// PDG code of the electron.
pub const ELECTRON_PDG: i32 = 11;
/// PDG code of the positron.
pub const POSITRON_PDG: i32 = -11;

/// A particle reconstructed from a track and a calorimeter cluster.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconstructedParticle {
    /// PDG code from the particle identification.
    pub pdg: i32,
    /// The matched track, if any.
    pub track: Option<Track>,
    /// Position of the matched cluster in the detector frame (mm).
    pub cluster_position: Option<Vector3<f64>>,
    /// Time of the seed hit of the matched cluster (ns).
    pub cluster_time: f64,
    /// The number of tracker hits on the track.
    pub n_hits: usize,
}

impl ReconstructedParticle {
    /// The magnitude of the track momentum (GeV), or [`None`] without a track.
    pub fn momentum(&self, b_field: f64) -> Option<f64> {
        let state = self.track.as_ref()?.first_state().ok()?;
        Some(state.momentum(b_field).norm())
    }
}

/// A pair of oppositely charged particles from a common vertex.
#[derive(Clone, Debug, PartialEq)]
pub struct V0Candidate {
    /// The two daughters, in no particular charge order.
    pub daughters: [ReconstructedParticle; 2],
}

/// The V0 candidates reconstructed in one event.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AnalysisEvent {
    /// The run the event belongs to.
    pub run_number: u32,
    /// Every V0 candidate in the event.
    pub candidates: Vec<V0Candidate>,
}

/// Selection settings for [`V0Alignment`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Beam energy (GeV).
    pub beam_energy: f64,
    /// Daughters above this fraction of the beam energy are rejected (full-energy electrons).
    pub max_momentum_fraction: f64,
    /// The exact number of hits required on each track.
    pub required_hits: usize,
    /// Largest accepted difference between the daughters' cluster times (ns).
    pub max_cluster_time_difference: f64,
    /// Settings for the vertex fit.
    pub vertexer: VertexerConfig,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            beam_energy: 1.056,
            max_momentum_fraction: 0.85,
            required_hits: 6,
            max_cluster_time_difference: 2.0,
            vertexer: VertexerConfig::default(),
        }
    }
}

impl AlignmentConfig {
    /// Read the configuration from a YAML file.
    pub fn read_config_file(file_path: &str) -> VertexResult<Self> {
        read_yaml(file_path)
    }
}

/// Counters accumulated by [`V0Alignment`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct AlignmentSummary {
    /// Events processed.
    pub events: usize,
    /// Candidates which passed the selection and were vertexed.
    pub selected: usize,
    /// Vertex fits which failed, either for candidates or same-side pairs.
    pub failed_fits: usize,
    /// Same-side pairs vertexed.
    pub side_pairs: usize,
}

/// Selects clean V0 candidates, vertexes them and histograms quantities sensitive to the relative
/// alignment of the two tracker halves.
///
/// Besides the candidates themselves, electrons and positrons reconstructed in the same half are
/// kept across events and paired, so that vertices made only of top (or only of bottom) tracks can
/// be compared.
#[derive(Clone, Debug)]
pub struct V0Alignment {
    config: AlignmentConfig,
    vertexer: BilliorVertexer,
    top_electrons: VecDeque<Track>,
    top_positrons: VecDeque<Track>,
    bottom_electrons: VecDeque<Track>,
    bottom_positrons: VecDeque<Track>,
    summary: AlignmentSummary,
}

impl V0Alignment {
    /// Create the analysis, building its vertexer from `config.vertexer`.
    pub fn new(config: AlignmentConfig) -> VertexResult<Self> {
        let vertexer = config.vertexer.build()?;
        Ok(Self {
            config,
            vertexer,
            top_electrons: VecDeque::new(),
            top_positrons: VecDeque::new(),
            bottom_electrons: VecDeque::new(),
            bottom_positrons: VecDeque::new(),
            summary: AlignmentSummary::default(),
        })
    }

    /// The configuration the analysis was created with.
    pub fn config(&self) -> &AlignmentConfig {
        &self.config
    }
    /// The vertexer built from the configuration.
    pub fn vertexer(&self) -> &BilliorVertexer {
        &self.vertexer
    }
    /// The counters accumulated so far.
    pub fn summary(&self) -> AlignmentSummary {
        self.summary
    }

    /// Process one event, filling `sink`. Returns the number of candidates which passed the
    /// selection and were vertexed.
    pub fn process_event(&mut self, event: &AnalysisEvent, sink: &mut HistogramSink) -> usize {
        self.summary.events += 1;
        if event.candidates.len() != 1 {
            debug!(
                "run {}: skipping event with {} candidates",
                event.run_number,
                event.candidates.len()
            );
            return 0;
        }
        let mut selected = 0;
        for candidate in &event.candidates {
            let Some((electron, positron)) = self.select(candidate) else {
                continue;
            };
            let (Some(electron_track), Some(positron_track)) = (&electron.track, &positron.track)
            else {
                continue;
            };
            let vertex = match fit_track_pair(&self.vertexer, electron_track, positron_track) {
                Ok(vertex) => vertex,
                Err(e) => {
                    warn!("run {}: skipping candidate, vertex fit failed: {}", event.run_number, e);
                    self.summary.failed_fits += 1;
                    continue;
                }
            };
            selected += 1;
            fill_vertex(sink, "", &vertex, (-3.0, 3.0), (-2.0, 2.0));
            let b_field = self.vertexer.b_field();
            for (particle, name, hist) in [
                (electron, "electron", "electron momentum"),
                (positron, "positron", "positron momentum"),
            ] {
                if let Some(p) = particle.momentum(b_field) {
                    sink.histogram_1d(hist, 100, (0.0, 1.0)).fill(p);
                }
                let (Some(track), Some(cluster)) = (&particle.track, &particle.cluster_position)
                else {
                    continue;
                };
                let side = Side::from_y(cluster.y);
                plot_particle(sink, &format!("{} {}", side, name), track, b_field);
                let queue = match (side, particle.pdg == ELECTRON_PDG) {
                    (Side::Top, true) => &mut self.top_electrons,
                    (Side::Top, false) => &mut self.top_positrons,
                    (Side::Bottom, true) => &mut self.bottom_electrons,
                    (Side::Bottom, false) => &mut self.bottom_positrons,
                };
                queue.push_back(track.clone());
            }
        }
        self.summary.selected += selected;
        self.vertex_same_side(sink);
        selected
    }

    /// Log the selection counters.
    pub fn finish(&self) {
        info!(
            "V0 alignment: {} events, {} candidates selected, {} failed fits, {} same-side pairs",
            self.summary.events,
            self.summary.selected,
            self.summary.failed_fits,
            self.summary.side_pairs
        );
        info!(
            "unpaired tracks: {} top e-, {} top e+, {} bottom e-, {} bottom e+",
            self.top_electrons.len(),
            self.top_positrons.len(),
            self.bottom_electrons.len(),
            self.bottom_positrons.len()
        );
    }

    /// The daughters as `(electron, positron)` if the candidate passes the selection.
    fn select<'a>(
        &self,
        candidate: &'a V0Candidate,
    ) -> Option<(&'a ReconstructedParticle, &'a ReconstructedParticle)> {
        let [first, second] = &candidate.daughters;
        let b_field = self.vertexer.b_field();
        let max_momentum = self.config.max_momentum_fraction * self.config.beam_energy;
        for daughter in [first, second] {
            let p = daughter.momentum(b_field)?;
            if p > max_momentum {
                debug!(
                    "rejecting candidate: daughter momentum {} GeV above {} GeV",
                    p, max_momentum
                );
                return None;
            }
            if daughter.n_hits != self.config.required_hits {
                debug!("rejecting candidate: track with {} hits", daughter.n_hits);
                return None;
            }
            if daughter.cluster_position.is_none() {
                debug!("rejecting candidate: daughter without a cluster");
                return None;
            }
        }
        let delta_t = first.cluster_time - second.cluster_time;
        if delta_t.abs() > self.config.max_cluster_time_difference {
            debug!("rejecting candidate: cluster time difference {} ns", delta_t);
            return None;
        }
        let electron = if first.pdg == ELECTRON_PDG { first } else { second };
        let positron = if second.pdg == POSITRON_PDG { second } else { first };
        Some((electron, positron))
    }

    fn vertex_same_side(&mut self, sink: &mut HistogramSink) {
        for side in [Side::Top, Side::Bottom] {
            let (electrons, positrons) = match side {
                Side::Top => (&mut self.top_electrons, &mut self.top_positrons),
                Side::Bottom => (&mut self.bottom_electrons, &mut self.bottom_positrons),
            };
            let n = electrons.len().min(positrons.len());
            let pairs: Vec<(Track, Track)> =
                electrons.drain(..n).zip(positrons.drain(..n)).collect();
            for (electron, positron) in pairs {
                self.summary.side_pairs += 1;
                match fit_track_pair(&self.vertexer, &electron, &positron) {
                    Ok(vertex) => fill_vertex(
                        sink,
                        &format!("{} ", side),
                        &vertex,
                        (-10.0, 10.0),
                        (-10.0, 10.0),
                    ),
                    Err(e) => {
                        warn!("skipping {} electron-positron pair, vertex fit failed: {}", side, e);
                        self.summary.failed_fits += 1;
                    }
                }
            }
        }
    }
}

fn fill_vertex(
    sink: &mut HistogramSink,
    prefix: &str,
    vertex: &Vertex,
    x_range: (f64, f64),
    y_range: (f64, f64),
) {
    let position = vertex.position_detector();
    let hist = format!("{}vertex x position", prefix);
    sink.histogram_1d(&hist, 100, x_range).fill(position.x);
    let hist = format!("{}vertex y position", prefix);
    sink.histogram_1d(&hist, 100, y_range).fill(position.y);
    let hist = format!("{}vertex z position", prefix);
    sink.histogram_1d(&hist, 200, (-50.0, 50.0)).fill(position.z);
    if prefix.is_empty() {
        let range = (-2.0, 2.0);
        let scatter = sink.histogram_2d("vertex x vs y position", 100, range, 100, range);
        scatter.fill(position.x, position.y);
    }
}

fn plot_particle(sink: &mut HistogramSink, name: &str, track: &Track, b_field: f64) {
    let Ok(state) = track.first_state() else {
        return;
    };
    let momentum = to_detector(&state.momentum(b_field));
    let p = momentum.norm();
    let z0 = state.z0();
    let theta_y = (momentum.y / p).asin().abs();
    let (z0_range, theta_range) = ((-1.5, 1.5), (0.015, 0.065));
    let hist = format!("{} z0", name);
    sink.histogram_1d(&hist, 100, z0_range).fill(z0);
    let hist = format!("{} thetaY", name);
    sink.histogram_1d(&hist, 100, theta_range).fill(theta_y);
    let hist = format!("{} track thetaY vs z0 profile", name);
    sink.profile_1d(&hist, 50, (0.02, 0.04)).fill(theta_y, z0);
    let hist = format!("{} track thetaY vs z0", name);
    let scatter = sink.histogram_2d(&hist, 100, theta_range, 100, z0_range);
    scatter.fill(theta_y, z0);
    let hist = format!("{} track momentum", name);
    sink.histogram_1d(&hist, 100, (0.0, 1.0)).fill(p);
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{
        toy::ToyV0Generator,
        track::{tests::test_covariance, TrackState, TAN_LAMBDA, Z0},
    };

    fn particle(pdg: i32, track: Track, time: f64) -> ReconstructedParticle {
        let tan_lambda = track.states[0].tan_lambda();
        ReconstructedParticle {
            pdg,
            track: Some(track),
            cluster_position: Some(Vector3::new(100.0, 500.0 * tan_lambda, 1400.0)),
            cluster_time: time,
            n_hits: 6,
        }
    }

    /// An event with one noise-free candidate from `vertex` (tracking frame).
    fn event(generator: &mut ToyV0Generator, vertex: &Vector3<f64>) -> AnalysisEvent {
        let v0 = generator.generate(vertex).unwrap();
        let [electron, positron] = v0.truth.map(|state| Track::new(vec![state], 0.0, 7));
        AnalysisEvent {
            run_number: 5772,
            candidates: vec![V0Candidate {
                daughters: [
                    particle(ELECTRON_PDG, electron, 40.0),
                    particle(POSITRON_PDG, positron, 41.0),
                ],
            }],
        }
    }

    fn generator(seed: u64) -> ToyV0Generator {
        ToyV0Generator::new(0.52, test_covariance(), seed)
            .unwrap()
            .with_momentum_range((0.3, 0.8))
    }

    #[test]
    fn test_selected_candidate_is_histogrammed() {
        let mut analysis = V0Alignment::new(AlignmentConfig::default()).unwrap();
        let mut sink = HistogramSink::new();
        let vertex = Vector3::new(-4.0, 0.2, -0.1);
        let n = analysis.process_event(&event(&mut generator(1), &vertex), &mut sink);
        assert_eq!(n, 1);
        let z = sink.get_1d("vertex z position").unwrap();
        assert_eq!(z.entries(), 1);
        assert_relative_eq!(z.mean(), -4.0, epsilon = 1e-2);
        assert_relative_eq!(sink.get_1d("vertex x position").unwrap().mean(), 0.2, epsilon = 1e-2);
        assert_eq!(sink.get_1d("electron momentum").unwrap().entries(), 1);
        assert_eq!(sink.get_2d("vertex x vs y position").unwrap().entries(), 1);
        let electron_side = sink
            .names()
            .into_iter()
            .filter(|name| name.ends_with("electron z0"))
            .count();
        assert_eq!(electron_side, 1);
        assert_eq!(analysis.summary().selected, 1);
    }

    #[test]
    fn test_selection_cuts() {
        let config = AlignmentConfig::default();
        let mut analysis = V0Alignment::new(config.clone()).unwrap();
        let mut sink = HistogramSink::new();
        let mut generator = generator(2);
        let vertex = Vector3::zeros();

        let mut two = event(&mut generator, &vertex);
        two.candidates.push(two.candidates[0].clone());
        assert_eq!(analysis.process_event(&two, &mut sink), 0);

        let mut hits = event(&mut generator, &vertex);
        hits.candidates[0].daughters[0].n_hits = 5;
        assert_eq!(analysis.process_event(&hits, &mut sink), 0);

        let mut timing = event(&mut generator, &vertex);
        timing.candidates[0].daughters[1].cluster_time = 43.5;
        assert_eq!(analysis.process_event(&timing, &mut sink), 0);

        let mut cluster = event(&mut generator, &vertex);
        cluster.candidates[0].daughters[1].cluster_position = None;
        assert_eq!(analysis.process_event(&cluster, &mut sink), 0);

        let mut fast = ToyV0Generator::new(0.52, test_covariance(), 3)
            .unwrap()
            .with_momentum_range((0.95, 1.0));
        assert_eq!(analysis.process_event(&event(&mut fast, &vertex), &mut sink), 0);

        assert!(sink.get_1d("vertex z position").is_none());
        assert_eq!(analysis.summary().events, 5);
        assert_eq!(analysis.summary().selected, 0);
    }

    #[test]
    fn test_failed_fit_is_skipped() {
        let mut analysis = V0Alignment::new(AlignmentConfig::default()).unwrap();
        let mut sink = HistogramSink::new();
        let mut event = event(&mut generator(4), &Vector3::new(3.0, 0.0, 0.0));
        let electron = event.candidates[0].daughters[0].clone();
        event.candidates[0].daughters[1] = ReconstructedParticle {
            pdg: POSITRON_PDG,
            ..electron
        };
        assert_eq!(analysis.process_event(&event, &mut sink), 0);
        assert_eq!(analysis.summary().failed_fits, 1);
        assert!(sink.get_1d("vertex z position").is_none());
    }

    /// The same event reflected through the bend plane.
    fn mirrored(event: &AnalysisEvent) -> AnalysisEvent {
        let mut mirrored = event.clone();
        for daughter in &mut mirrored.candidates[0].daughters {
            if let Some(track) = &mut daughter.track {
                let state = &track.states[0];
                let mut parameters = *state.parameters();
                parameters[Z0] = -parameters[Z0];
                parameters[TAN_LAMBDA] = -parameters[TAN_LAMBDA];
                let reflected = TrackState::from_parts(
                    parameters,
                    *state.reference_point(),
                    *state.covariance(),
                )
                .unwrap();
                track.states[0] = reflected;
            }
            if let Some(cluster) = &mut daughter.cluster_position {
                cluster.y = -cluster.y;
            }
        }
        mirrored
    }

    #[test]
    fn test_same_side_pairs() {
        let mut analysis = V0Alignment::new(AlignmentConfig::default()).unwrap();
        let mut sink = HistogramSink::new();
        // in the beam plane, so the reflected tracks come from the same vertex
        let vertex = Vector3::new(2.0, 0.1, 0.0);
        let first = event(&mut generator(5), &vertex);
        analysis.process_event(&first, &mut sink);
        assert_eq!(analysis.summary().side_pairs, 0);
        analysis.process_event(&mirrored(&first), &mut sink);
        let summary = analysis.summary();
        assert_eq!(summary.selected, 2);
        assert_eq!(summary.side_pairs, 2);
        assert_eq!(summary.failed_fits, 0);
        for side in ["top", "bottom"] {
            let z = sink.get_1d(&format!("{} vertex z position", side)).unwrap();
            assert_eq!(z.entries(), 1);
            assert_relative_eq!(z.mean(), 2.0, epsilon = 1e-2);
            let x = sink.get_1d(&format!("{} vertex x position", side)).unwrap();
            assert_relative_eq!(x.mean(), 0.1, epsilon = 1e-2);
        }
        analysis.finish();
    }

    #[test]
    fn test_config_defaults() {
        let config: AlignmentConfig = serde_yaml::from_str("beam_energy: 2.306\n").unwrap();
        assert_relative_eq!(config.beam_energy, 2.306);
        assert_eq!(config.required_hits, 6);
        assert_relative_eq!(config.vertexer.b_field, 0.52);
    }
}
