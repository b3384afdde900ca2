use backbeat_shared::project::{EffectSpec, InstrumentSpec, Project};
use backbeat_shared::steps::StepPattern;
use uuid::Uuid;

use crate::schedule::Schedule;

/// Loop bounds in absolute seconds. Construction validates the shape, so
/// consumers never see an inverted region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopRegion {
    pub start_seconds: f64,
    pub end_seconds: f64,
}

impl LoopRegion {
    pub fn new(start_seconds: f64, end_seconds: f64) -> Option<Self> {
        if start_seconds >= 0.0 && end_seconds > start_seconds {
            Some(Self { start_seconds, end_seconds })
        } else {
            None
        }
    }

    pub fn contains(&self, seconds: f64) -> bool {
        seconds >= self.start_seconds && seconds < self.end_seconds
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentSetup {
    pub id: Uuid,
    pub spec: InstrumentSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectSetup {
    pub id: Uuid,
    pub wet: f32,
    pub spec: EffectSpec,
}

/// One mixer strip: a timeline track, or a live step pattern playing
/// through its own implicit strip.
#[derive(Debug, Clone, PartialEq)]
pub struct StripSetup {
    pub id: Uuid,
    pub name: String,
    pub volume: f32,
    pub pan: f32,
    pub muted: bool,
    pub instrument: Option<InstrumentSetup>,
    pub effects: Vec<EffectSetup>,
}

/// Everything a backend needs to build voices and effect instances. Sent
/// whole on every rebuild; the backend diffs it against what it has,
/// creating and disposing as needed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RackSetup {
    pub strips: Vec<StripSetup>,
    pub master_gain: f32,
}

impl RackSetup {
    pub fn from_project(project: &Project, step_patterns: &[StepPattern]) -> Self {
        let mut strips = Vec::with_capacity(project.tracks.len() + step_patterns.len());

        for track in &project.tracks {
            let instrument = track
                .instrument
                .and_then(|id| project.instrument(id))
                .map(|i| InstrumentSetup { id: i.id, spec: i.spec.clone() });
            let effects = track
                .effects
                .iter()
                .filter_map(|id| project.effect(*id))
                .map(|e| EffectSetup { id: e.id, wet: e.wet, spec: e.spec.clone() })
                .collect();
            strips.push(StripSetup {
                id: track.id,
                name: track.name.clone(),
                volume: track.volume,
                pan: track.pan,
                muted: track.muted,
                instrument,
                effects,
            });
        }

        for pattern in step_patterns.iter().filter(|p| p.enabled) {
            let Some(instrument) = project.instrument(pattern.instrument) else {
                continue;
            };
            strips.push(StripSetup {
                id: pattern.id,
                name: pattern.name.clone(),
                volume: 0.8,
                pan: 0.0,
                muted: false,
                instrument: Some(InstrumentSetup {
                    id: instrument.id,
                    spec: instrument.spec.clone(),
                }),
                effects: Vec::new(),
            });
        }

        Self { strips, master_gain: project.master_volume }
    }
}

/// The capability seam between musical scheduling and audio production.
/// The transport talks only to this trait; a realtime device, an offline
/// worker and a test double are interchangeable behind it.
pub trait AudioBackend {
    /// Playback clock in absolute seconds.
    fn now(&self) -> f64;
    fn is_running(&self) -> bool;

    fn start(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
    fn seek(&mut self, seconds: f64);
    fn set_loop(&mut self, region: Option<LoopRegion>);

    /// Atomically replaces every pending event.
    fn submit(&mut self, schedule: Schedule);
    fn clear(&mut self);

    fn sync_rack(&mut self, setup: RackSetup);
    fn set_master_gain(&mut self, gain: f32);
    fn set_strip_mix(&mut self, strip: Uuid, volume: f32, pan: f32, muted: bool);
}
