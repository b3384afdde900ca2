use std::sync::Arc;

use arc_swap::ArcSwap;
use backbeat_shared::project::Project;
use backbeat_shared::steps::StepPattern;
use log::{debug, info};
use uuid::Uuid;

use crate::assets::SamplePool;
use crate::backend::{AudioBackend, LoopRegion, RackSetup};
use crate::schedule::{Schedule, compile};
use crate::steps;
use crate::timebase::{TempoMap, bar_beat};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Playing,
    Paused,
}

/// The playback state machine. Each transport owns its backend, its
/// project snapshot and its compiled schedule outright, so several can
/// coexist (one per test, one per render job) without shared state.
pub struct Transport<B: AudioBackend> {
    backend: B,
    pool: Arc<ArcSwap<SamplePool>>,
    project: Project,
    step_patterns: Vec<StepPattern>,
    map: TempoMap,
    schedule: Schedule,
    state: TransportState,
    loop_region: Option<LoopRegion>,
}

impl<B: AudioBackend> Transport<B> {
    /// `pool` is the same snapshot handle the backend reads, so compile
    /// passes and the audio path agree on which samples exist.
    pub fn new(backend: B, pool: Arc<ArcSwap<SamplePool>>) -> Self {
        let project = Project::default();
        let map = TempoMap::fixed(project.bpm);
        Self {
            backend,
            pool,
            project,
            step_patterns: Vec::new(),
            map,
            schedule: Schedule::default(),
            state: TransportState::Stopped,
            loop_region: None,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn step_patterns(&self) -> &[StepPattern] {
        &self.step_patterns
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn loop_region(&self) -> Option<LoopRegion> {
        self.loop_region
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Takes a fresh snapshot of the document and rebuilds. While playing
    /// the new schedule replaces the old one atomically; while stopped it
    /// is only cached for the next play.
    pub fn set_project(&mut self, project: &Project, step_patterns: &[StepPattern]) {
        self.project = project.clone();
        self.step_patterns = step_patterns.to_vec();
        self.rebuild();
    }

    /// Recompiles from the current snapshot. Clear-then-resubmit: the
    /// backend swaps the whole event set, never patches it.
    pub fn rebuild(&mut self) {
        self.map = TempoMap::from_lane(self.project.bpm, self.project.tempo_lane());
        let min_end = self.loop_region.map_or(0.0, |r| r.end_seconds);
        self.schedule = compile(
            &self.project,
            &self.step_patterns,
            &self.map,
            &self.pool.load(),
            min_end,
        );
        debug!(
            "[Transport] Rebuilt schedule: {} events, horizon {:.3}s",
            self.schedule.len(),
            self.schedule.end_seconds
        );
        if self.state != TransportState::Stopped {
            self.push_to_backend();
        }
    }

    fn push_to_backend(&mut self) {
        self.backend
            .sync_rack(RackSetup::from_project(&self.project, &self.step_patterns));
        self.backend.submit(self.schedule.clone());
    }

    pub fn play(&mut self) {
        match self.state {
            TransportState::Playing => {}
            TransportState::Paused => {
                // Resume exactly where we froze; the schedule is intact.
                self.backend.start();
                self.state = TransportState::Playing;
            }
            TransportState::Stopped => {
                self.rebuild();
                self.push_to_backend();
                self.backend.set_loop(self.loop_region);
                self.backend.start();
                self.state = TransportState::Playing;
                info!("[Transport] Playing ({} events)", self.schedule.len());
            }
        }
    }

    pub fn pause(&mut self) {
        if self.state == TransportState::Playing {
            self.backend.pause();
            self.state = TransportState::Paused;
        }
    }

    pub fn stop(&mut self) {
        if self.state != TransportState::Stopped {
            self.backend.stop();
            self.state = TransportState::Stopped;
            info!("[Transport] Stopped");
        }
    }

    pub fn position_seconds(&self) -> f64 {
        self.backend.now()
    }

    pub fn position_beats(&self) -> f64 {
        self.map.beat_at_seconds(self.backend.now())
    }

    /// 1-based bar plus the beat inside it, for position displays.
    pub fn current_bar_beat(&self) -> (u32, f64) {
        bar_beat(self.position_beats(), self.project.time_signature)
    }

    /// Moves the playhead. While playing this resubmits the schedule so
    /// everything after the new position fires at the right offset.
    pub fn set_position(&mut self, seconds: f64) {
        let seconds = seconds.max(0.0);
        self.backend.seek(seconds);
        if self.state == TransportState::Playing {
            self.rebuild();
        }
    }

    pub fn set_position_beats(&mut self, beats: f64) {
        self.set_position(self.map.seconds_at_beat(beats));
    }

    pub fn set_loop(&mut self, region: Option<LoopRegion>) {
        self.loop_region = region;
        self.backend.set_loop(region);
        // The horizon has to cover the loop end.
        if self.state != TransportState::Stopped {
            self.rebuild();
        }
    }

    pub fn set_loop_beats(&mut self, start_beat: f64, end_beat: f64) -> bool {
        let region = LoopRegion::new(
            self.map.seconds_at_beat(start_beat),
            self.map.seconds_at_beat(end_beat),
        );
        if region.is_none() {
            return false;
        }
        self.set_loop(region);
        true
    }

    /// Changes the base tempo, holding the current musical position. The
    /// already-compiled events are replaced; sounding notes keep ringing
    /// under their own envelopes and do not shift.
    pub fn set_bpm(&mut self, bpm: f64) {
        let beat = self.position_beats();
        self.project.set_bpm(bpm);
        self.rebuild();
        if self.state != TransportState::Stopped {
            self.backend.seek(self.map.seconds_at_beat(beat));
        }
    }

    /// Publishes a decoded sample and rebuilds so clips waiting on it get
    /// scheduled.
    pub fn install_sample(&mut self, id: Uuid, data: Vec<f32>, sample_rate: u32) {
        let mut next = SamplePool::clone(&self.pool.load());
        next.insert_decoded(id, data, sample_rate);
        self.pool.store(Arc::new(next));
        self.rebuild();
    }

    /// Grid highlight for a step pattern, derived from the clock.
    pub fn playing_step(&self, pattern: Uuid) -> Option<usize> {
        let pattern = self.step_patterns.iter().find(|p| p.id == pattern)?;
        let bpm = self.map.bpm_at_beat(self.position_beats());
        Some(steps::playing_step(self.backend.now(), bpm, pattern.steps))
    }
}
