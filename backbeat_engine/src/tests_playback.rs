use std::sync::Arc;

use arc_swap::ArcSwap;
use backbeat_shared::project::{
    Adsr, Clip, ClipSource, Instrument, InstrumentSpec, MidiNote, OscShape, Pattern, Project,
    Track,
};
use backbeat_shared::steps::StepPattern;
use uuid::Uuid;

use crate::assets::SamplePool;
use crate::backend::{AudioBackend, LoopRegion, RackSetup};
use crate::events::EventKind;
use crate::schedule::Schedule;
use crate::transport::{Transport, TransportState};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Start,
    Pause,
    Stop,
    Seek(f64),
    SetLoop(Option<LoopRegion>),
    Submit(usize),
    Clear,
    SyncRack(usize),
}

/// Stand-in backend with a hand-cranked clock, so transport behavior is
/// testable without opening an audio device.
#[derive(Default)]
struct MockBackend {
    clock: f64,
    running: bool,
    calls: Vec<Call>,
    last_schedule: Option<Schedule>,
    last_rack: Option<RackSetup>,
    loop_region: Option<LoopRegion>,
}

impl MockBackend {
    fn advance(&mut self, seconds: f64) {
        if self.running {
            self.clock += seconds;
        }
    }

    fn submit_count(&self) -> usize {
        self.calls.iter().filter(|c| matches!(c, Call::Submit(_))).count()
    }
}

impl AudioBackend for MockBackend {
    fn now(&self) -> f64 {
        self.clock
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn start(&mut self) {
        self.running = true;
        self.calls.push(Call::Start);
    }

    fn pause(&mut self) {
        self.running = false;
        self.calls.push(Call::Pause);
    }

    fn stop(&mut self) {
        self.running = false;
        self.clock = 0.0;
        self.calls.push(Call::Stop);
    }

    fn seek(&mut self, seconds: f64) {
        self.clock = seconds;
        self.calls.push(Call::Seek(seconds));
    }

    fn set_loop(&mut self, region: Option<LoopRegion>) {
        self.loop_region = region;
        self.calls.push(Call::SetLoop(region));
    }

    fn submit(&mut self, schedule: Schedule) {
        self.calls.push(Call::Submit(schedule.len()));
        self.last_schedule = Some(schedule);
    }

    fn clear(&mut self) {
        self.last_schedule = None;
        self.calls.push(Call::Clear);
    }

    fn sync_rack(&mut self, setup: RackSetup) {
        self.calls.push(Call::SyncRack(setup.strips.len()));
        self.last_rack = Some(setup);
    }

    fn set_master_gain(&mut self, _gain: f32) {}

    fn set_strip_mix(&mut self, _strip: Uuid, _volume: f32, _pan: f32, _muted: bool) {}
}

fn fresh_transport() -> Transport<MockBackend> {
    let pool = Arc::new(ArcSwap::from_pointee(SamplePool::new()));
    Transport::new(MockBackend::default(), pool)
}

/// One synth track, one 4-beat pattern with notes at beats 0 and 2, tiled
/// across an 8-beat clip. At the default 120 BPM that is note-ons at
/// 0.0s, 1.0s, 2.0s and 3.0s.
fn demo_project() -> Project {
    let mut project = Project::new("session");
    let instrument = project.add_instrument(Instrument::new(
        "lead",
        InstrumentSpec::synth(OscShape::Sine, Adsr::default()),
    ));
    let mut pattern = Pattern::new("riff", 4.0);
    pattern.add_note(MidiNote::new(60, 0.0, 1.0, 100));
    pattern.add_note(MidiNote::new(64, 2.0, 1.0, 100));
    let pattern_id = project.add_pattern(pattern);

    let mut track = Track::new("melody");
    track.instrument = Some(instrument);
    let track_id = project.add_track(track);
    project
        .track_mut(track_id)
        .unwrap()
        .add_clip(Clip::new(ClipSource::Pattern { pattern: pattern_id }, 0.0, 8.0));
    project
}

#[test]
fn play_compiles_syncs_and_starts() {
    let mut transport = fresh_transport();
    transport.set_project(&demo_project(), &[]);
    assert_eq!(transport.state(), TransportState::Stopped);
    assert_eq!(transport.backend().submit_count(), 0);

    transport.play();

    assert_eq!(transport.state(), TransportState::Playing);
    let backend = transport.backend();
    assert!(backend.running);
    // 2 notes x 2 tiles x on/off.
    let schedule = backend.last_schedule.as_ref().unwrap();
    assert_eq!(schedule.len(), 8);
    assert_eq!(backend.last_rack.as_ref().unwrap().strips.len(), 1);
    // Rack and events must be in place before the clock starts.
    let start_at = backend.calls.iter().position(|c| *c == Call::Start).unwrap();
    assert!(backend.calls[..start_at].iter().any(|c| matches!(c, Call::SyncRack(_))));
    assert!(backend.calls[..start_at].iter().any(|c| matches!(c, Call::Submit(_))));
    println!("[Test] Play submitted {} events", schedule.len());
}

#[test]
fn pause_freezes_position_and_resume_does_not_recompile() {
    let mut transport = fresh_transport();
    transport.set_project(&demo_project(), &[]);
    transport.play();
    transport.backend_mut().advance(1.5);

    transport.pause();
    assert_eq!(transport.state(), TransportState::Paused);
    assert_eq!(transport.position_seconds(), 1.5);

    // The clock must not move while paused.
    transport.backend_mut().advance(1.0);
    assert_eq!(transport.position_seconds(), 1.5);

    transport.play();
    assert_eq!(transport.state(), TransportState::Playing);
    assert_eq!(transport.position_seconds(), 1.5);
    // Resume reuses the schedule from the first play.
    assert_eq!(transport.backend().submit_count(), 1);
}

#[test]
fn stop_rewinds_to_origin() {
    let mut transport = fresh_transport();
    transport.set_project(&demo_project(), &[]);
    transport.play();
    transport.backend_mut().advance(2.5);
    assert!(transport.position_seconds() > 0.0);

    transport.stop();
    assert_eq!(transport.state(), TransportState::Stopped);
    assert_eq!(transport.position_seconds(), 0.0);

    // Stop then play starts a fresh pass from zero.
    transport.play();
    assert_eq!(transport.backend().submit_count(), 2);
    assert_eq!(transport.position_seconds(), 0.0);
}

#[test]
fn stopping_twice_is_inert() {
    let mut transport = fresh_transport();
    transport.set_project(&demo_project(), &[]);
    transport.stop();
    assert!(transport.backend().calls.is_empty());
    transport.pause();
    assert_eq!(transport.state(), TransportState::Stopped);
}

#[test]
fn seek_while_playing_resubmits_the_schedule() {
    let mut transport = fresh_transport();
    transport.set_project(&demo_project(), &[]);
    transport.play();
    assert_eq!(transport.backend().submit_count(), 1);

    transport.set_position(2.0);
    assert_eq!(transport.position_seconds(), 2.0);
    assert!(transport.backend().calls.contains(&Call::Seek(2.0)));
    assert_eq!(transport.backend().submit_count(), 2);
}

#[test]
fn seek_while_stopped_only_moves_the_playhead() {
    let mut transport = fresh_transport();
    transport.set_project(&demo_project(), &[]);
    transport.set_position_beats(4.0);
    // 4 beats at 120 BPM.
    assert_eq!(transport.position_seconds(), 2.0);
    assert_eq!(transport.backend().submit_count(), 0);
}

#[test]
fn edits_while_playing_swap_in_a_new_schedule() {
    let mut transport = fresh_transport();
    let mut project = demo_project();
    transport.set_project(&project, &[]);
    transport.play();
    assert_eq!(transport.backend().last_schedule.as_ref().unwrap().len(), 8);

    let pattern_id = project.patterns[0].id;
    project
        .pattern_mut(pattern_id)
        .unwrap()
        .add_note(MidiNote::new(67, 3.0, 0.5, 90));
    transport.set_project(&project, &[]);

    assert_eq!(transport.backend().submit_count(), 2);
    assert_eq!(transport.backend().last_schedule.as_ref().unwrap().len(), 12);
}

#[test]
fn tempo_change_holds_the_musical_position() {
    let mut transport = fresh_transport();
    transport.set_project(&demo_project(), &[]);
    transport.play();
    // 2.0s at 120 BPM puts the playhead on beat 4.
    transport.backend_mut().advance(2.0);
    assert_eq!(transport.position_beats(), 4.0);

    transport.set_bpm(60.0);

    // Same beat, twice the seconds.
    assert_eq!(transport.position_beats(), 4.0);
    assert_eq!(transport.position_seconds(), 4.0);
    // The note on beat 2 now fires at 2.0s instead of 1.0s.
    let schedule = transport.backend().last_schedule.as_ref().unwrap();
    let on_64 = schedule
        .events
        .iter()
        .find(|e| matches!(e.kind, EventKind::NoteOn { pitch: 64, .. }))
        .unwrap();
    assert_eq!(on_64.time_seconds, 2.0);
    println!("[Test] Tempo change kept beat {}", transport.position_beats());
}

#[test]
fn bar_beat_display_follows_the_clock() {
    let mut transport = fresh_transport();
    transport.set_project(&demo_project(), &[]);
    transport.play();
    transport.backend_mut().advance(2.5);
    // Beat 5 in 4/4 is bar 2, beat 1.
    assert_eq!(transport.current_bar_beat(), (2, 1.0));
}

#[test]
fn loop_region_is_validated_and_extends_the_horizon() {
    let mut transport = fresh_transport();
    transport.set_project(&demo_project(), &[]);
    assert!(!transport.set_loop_beats(8.0, 8.0));
    assert!(transport.set_loop_beats(0.0, 16.0));

    transport.play();
    // Content ends at 4.0s but the loop runs to beat 16 = 8.0s.
    assert!(transport.schedule().end_seconds >= 8.0);
    let region = transport.backend().loop_region.unwrap();
    assert_eq!(region.start_seconds, 0.0);
    assert_eq!(region.end_seconds, 8.0);
}

#[test]
fn clearing_the_loop_while_playing_rebuilds() {
    let mut transport = fresh_transport();
    transport.set_project(&demo_project(), &[]);
    assert!(transport.set_loop_beats(0.0, 4.0));
    transport.play();
    let submits = transport.backend().submit_count();

    transport.set_loop(None);
    assert!(transport.backend().loop_region.is_none());
    assert_eq!(transport.backend().submit_count(), submits + 1);
}

#[test]
fn installing_a_sample_schedules_the_waiting_clip() {
    let mut transport = fresh_transport();
    let sample_id = Uuid::new_v4();
    let mut project = Project::new("sampled");
    let track_id = project.add_track(Track::new("chops"));
    project
        .track_mut(track_id)
        .unwrap()
        .add_clip(Clip::new(ClipSource::Sample { sample: sample_id }, 0.0, 4.0));

    // Undecoded sample: the clip compiles to nothing.
    transport.set_project(&project, &[]);
    assert_eq!(transport.schedule().len(), 0);

    transport.install_sample(sample_id, vec![0.1; 4410], 44_100);
    assert_eq!(transport.schedule().len(), 1);
    assert!(matches!(
        transport.schedule().events[0].kind,
        EventKind::SampleStart { sample, .. } if sample == sample_id
    ));
    println!("[Test] Sample install produced {} event(s)", transport.schedule().len());
}

#[test]
fn step_grid_highlight_tracks_the_clock() {
    let mut transport = fresh_transport();
    let mut project = Project::new("live");
    let instrument = project.add_instrument(Instrument::new(
        "kick",
        InstrumentSpec::synth(OscShape::Sine, Adsr::default()),
    ));
    let mut pattern = StepPattern::new("four on the floor", instrument, 16);
    pattern.add_row(36);
    pattern.toggle(0, 0);
    let pattern_id = pattern.id;
    transport.set_project(&project, &[pattern]);

    transport.play();
    assert_eq!(transport.playing_step(pattern_id), Some(0));
    // 0.26s at 120 BPM is inside the third 16th (each lasts 0.125s).
    transport.backend_mut().advance(0.26);
    assert_eq!(transport.playing_step(pattern_id), Some(2));
    assert_eq!(transport.playing_step(Uuid::new_v4()), None);
}
