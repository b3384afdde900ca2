use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::automation::{AutomationLane, AutomationTarget};
use crate::error::ProjectError;

/// Musical time signature. `beats_per_bar` is expressed in quarter notes,
/// so 6/8 yields 3.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u8,
    pub denominator: u8,
}

impl TimeSignature {
    pub fn new(numerator: u8, denominator: u8) -> Self {
        Self {
            numerator: numerator.max(1),
            denominator: if denominator.is_power_of_two() { denominator } else { 4 },
        }
    }

    pub fn beats_per_bar(&self) -> f64 {
        self.numerator as f64 * 4.0 / self.denominator as f64
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self { numerator: 4, denominator: 4 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OscShape {
    Sine,
    Triangle,
    Square,
    Sawtooth,
}

/// Envelope times in seconds, sustain as a level in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Adsr {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl Adsr {
    pub fn new(attack: f32, decay: f32, sustain: f32, release: f32) -> Self {
        Self {
            attack: attack.max(0.0),
            decay: decay.max(0.0),
            sustain: sustain.clamp(0.0, 1.0),
            release: release.max(0.0),
        }
    }
}

impl Default for Adsr {
    fn default() -> Self {
        Self { attack: 0.005, decay: 0.08, sustain: 0.7, release: 0.15 }
    }
}

/// What an instrument actually is. Parameters are validated when the
/// variant is constructed, so consumers can trust the ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InstrumentSpec {
    Synth { shape: OscShape, envelope: Adsr },
    Sampler { sample: Uuid, root_pitch: u8 },
}

impl InstrumentSpec {
    pub fn synth(shape: OscShape, envelope: Adsr) -> Self {
        Self::Synth { shape, envelope }
    }

    pub fn sampler(sample: Uuid, root_pitch: u8) -> Self {
        Self::Sampler { sample, root_pitch: root_pitch.min(127) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub id: Uuid,
    pub name: String,
    pub spec: InstrumentSpec,
}

impl Instrument {
    pub fn new(name: &str, spec: InstrumentSpec) -> Self {
        Self { id: Uuid::new_v4(), name: name.to_string(), spec }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EffectSpec {
    Delay { time_seconds: f32, feedback: f32 },
    Distortion { drive: f32 },
    Lowpass { cutoff_hz: f32 },
}

impl EffectSpec {
    pub fn delay(time_seconds: f32, feedback: f32) -> Self {
        Self::Delay {
            time_seconds: time_seconds.clamp(0.001, 4.0),
            feedback: feedback.clamp(0.0, 0.95),
        }
    }

    pub fn distortion(drive: f32) -> Self {
        Self::Distortion { drive: drive.clamp(1.0, 50.0) }
    }

    pub fn lowpass(cutoff_hz: f32) -> Self {
        Self::Lowpass { cutoff_hz: cutoff_hz.clamp(20.0, 20_000.0) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Effect {
    pub id: Uuid,
    pub name: String,
    /// Dry/wet mix in [0, 1].
    pub wet: f32,
    pub spec: EffectSpec,
}

impl Effect {
    pub fn new(name: &str, spec: EffectSpec) -> Self {
        Self { id: Uuid::new_v4(), name: name.to_string(), wet: 0.5, spec }
    }

    pub fn set_wet(&mut self, wet: f32) {
        self.wet = wet.clamp(0.0, 1.0);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiNote {
    pub id: Uuid,
    /// MIDI note number, 0..=127.
    pub pitch: u8,
    /// Onset in beats, relative to the pattern start.
    pub start_beat: f64,
    pub length_beats: f64,
    /// 1..=127. Zero would be a note-off on the wire, so it is excluded.
    pub velocity: u8,
}

impl MidiNote {
    pub fn new(pitch: u8, start_beat: f64, length_beats: f64, velocity: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            pitch: pitch.min(127),
            start_beat: start_beat.max(0.0),
            length_beats: length_beats.max(0.0),
            velocity: velocity.clamp(1, 127),
        }
    }

    pub fn end_beat(&self) -> f64 {
        self.start_beat + self.length_beats
    }
}

/// A loopable container of notes, placed on the timeline through clips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: Uuid,
    pub name: String,
    pub color: [u8; 3],
    pub length_beats: f64,
    pub notes: Vec<MidiNote>,
}

impl Pattern {
    pub fn new(name: &str, length_beats: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            color: [100, 100, 100],
            length_beats: length_beats.max(0.25),
            notes: Vec::new(),
        }
    }

    pub fn add_note(&mut self, note: MidiNote) -> Uuid {
        let id = note.id;
        self.notes.push(note);
        id
    }

    pub fn remove_note(&mut self, id: Uuid) -> bool {
        let before = self.notes.len();
        self.notes.retain(|n| n.id != id);
        self.notes.len() != before
    }
}

impl Default for Pattern {
    fn default() -> Self {
        Self::new("New Pattern", 4.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClipSource {
    Pattern { pattern: Uuid },
    Sample { sample: Uuid },
}

/// A placement of content on a track's timeline. `offset_beats` trims the
/// head of the content; content shorter than the clip tiles to fill it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: Uuid,
    pub source: ClipSource,
    pub start_beat: f64,
    pub length_beats: f64,
    pub offset_beats: f64,
}

impl Clip {
    pub fn new(source: ClipSource, start_beat: f64, length_beats: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            start_beat: start_beat.max(0.0),
            length_beats: length_beats.max(0.0),
            offset_beats: 0.0,
        }
    }

    pub fn end_beat(&self) -> f64 {
        self.start_beat + self.length_beats
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: Uuid,
    pub name: String,
    pub volume: f32,
    pub pan: f32,
    pub muted: bool,
    pub solo: bool,
    pub instrument: Option<Uuid>,
    /// Ordered effect chain, ids into `Project::effects`.
    pub effects: Vec<Uuid>,
    /// Kept sorted by `start_beat`.
    pub clips: Vec<Clip>,
}

impl Track {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            volume: 0.8,
            pan: 0.0,
            muted: false,
            solo: false,
            instrument: None,
            effects: Vec::new(),
            clips: Vec::new(),
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    pub fn set_pan(&mut self, pan: f32) {
        self.pan = pan.clamp(-1.0, 1.0);
    }

    pub fn add_clip(&mut self, clip: Clip) -> Uuid {
        let id = clip.id;
        let at = self
            .clips
            .partition_point(|c| c.start_beat <= clip.start_beat);
        self.clips.insert(at, clip);
        id
    }

    pub fn remove_clip(&mut self, id: Uuid) -> bool {
        let before = self.clips.len();
        self.clips.retain(|c| c.id != id);
        self.clips.len() != before
    }

    /// Last occupied beat on this track's timeline.
    pub fn end_beat(&self) -> f64 {
        self.clips.iter().map(Clip::end_beat).fold(0.0, f64::max)
    }
}

impl Default for Track {
    fn default() -> Self {
        Self::new("New Track")
    }
}

/// The whole editable document. Everything the engine schedules from is
/// reachable from here; consumers treat a borrowed `Project` as an
/// immutable snapshot and rebuild after edits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub bpm: f64,
    pub time_signature: TimeSignature,
    pub master_volume: f32,
    pub tracks: Vec<Track>,
    pub patterns: Vec<Pattern>,
    pub instruments: Vec<Instrument>,
    pub effects: Vec<Effect>,
    pub automation: Vec<AutomationLane>,
}

impl Project {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            bpm: 120.0,
            time_signature: TimeSignature::default(),
            master_volume: 0.8,
            tracks: Vec::new(),
            patterns: Vec::new(),
            instruments: Vec::new(),
            effects: Vec::new(),
            automation: Vec::new(),
        }
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.bpm = bpm.clamp(20.0, 999.0);
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.master_volume = volume.clamp(0.0, 1.0);
    }

    pub fn track(&self, id: Uuid) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn track_mut(&mut self, id: Uuid) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.id == id)
    }

    pub fn pattern(&self, id: Uuid) -> Option<&Pattern> {
        self.patterns.iter().find(|p| p.id == id)
    }

    pub fn pattern_mut(&mut self, id: Uuid) -> Option<&mut Pattern> {
        self.patterns.iter_mut().find(|p| p.id == id)
    }

    pub fn instrument(&self, id: Uuid) -> Option<&Instrument> {
        self.instruments.iter().find(|i| i.id == id)
    }

    pub fn effect(&self, id: Uuid) -> Option<&Effect> {
        self.effects.iter().find(|e| e.id == id)
    }

    pub fn effect_mut(&mut self, id: Uuid) -> Option<&mut Effect> {
        self.effects.iter_mut().find(|e| e.id == id)
    }

    pub fn lane(&self, id: Uuid) -> Option<&AutomationLane> {
        self.automation.iter().find(|l| l.id == id)
    }

    pub fn lane_mut(&mut self, id: Uuid) -> Option<&mut AutomationLane> {
        self.automation.iter_mut().find(|l| l.id == id)
    }

    pub fn add_track(&mut self, track: Track) -> Uuid {
        let id = track.id;
        self.tracks.push(track);
        id
    }

    /// Removes a track together with its clips and any lanes targeting it.
    pub fn remove_track(&mut self, id: Uuid) -> bool {
        let before = self.tracks.len();
        self.tracks.retain(|t| t.id != id);
        if self.tracks.len() == before {
            return false;
        }
        self.automation.retain(|l| l.target.track() != Some(id));
        true
    }

    pub fn add_pattern(&mut self, pattern: Pattern) -> Uuid {
        let id = pattern.id;
        self.patterns.push(pattern);
        id
    }

    /// Removes a pattern and every clip that referenced it.
    pub fn remove_pattern(&mut self, id: Uuid) -> bool {
        let before = self.patterns.len();
        self.patterns.retain(|p| p.id != id);
        if self.patterns.len() == before {
            return false;
        }
        for track in &mut self.tracks {
            track
                .clips
                .retain(|c| c.source != ClipSource::Pattern { pattern: id });
        }
        true
    }

    pub fn add_instrument(&mut self, instrument: Instrument) -> Uuid {
        let id = instrument.id;
        self.instruments.push(instrument);
        id
    }

    /// Removes an instrument and clears track bindings to it.
    pub fn remove_instrument(&mut self, id: Uuid) -> bool {
        let before = self.instruments.len();
        self.instruments.retain(|i| i.id != id);
        if self.instruments.len() == before {
            return false;
        }
        for track in &mut self.tracks {
            if track.instrument == Some(id) {
                track.instrument = None;
            }
        }
        true
    }

    pub fn add_effect(&mut self, effect: Effect) -> Uuid {
        let id = effect.id;
        self.effects.push(effect);
        id
    }

    /// Removes an effect from the rack, from every track chain, and drops
    /// lanes automating it.
    pub fn remove_effect(&mut self, id: Uuid) -> bool {
        let before = self.effects.len();
        self.effects.retain(|e| e.id != id);
        if self.effects.len() == before {
            return false;
        }
        for track in &mut self.tracks {
            track.effects.retain(|e| *e != id);
        }
        self.automation.retain(|l| l.target.effect() != Some(id));
        true
    }

    /// Places a pattern clip, validating both ends of the reference first.
    pub fn place_pattern(
        &mut self,
        track: Uuid,
        pattern: Uuid,
        start_beat: f64,
        length_beats: f64,
    ) -> Result<Uuid, ProjectError> {
        if self.pattern(pattern).is_none() {
            return Err(ProjectError::UnknownPattern(pattern));
        }
        let track = self.track_mut(track).ok_or(ProjectError::UnknownTrack(track))?;
        Ok(track.add_clip(Clip::new(ClipSource::Pattern { pattern }, start_beat, length_beats)))
    }

    /// Places a sample clip. Sample decoding lives outside the document,
    /// so only the track end of the reference is checked.
    pub fn place_sample(
        &mut self,
        track: Uuid,
        sample: Uuid,
        start_beat: f64,
        length_beats: f64,
    ) -> Result<Uuid, ProjectError> {
        let track = self.track_mut(track).ok_or(ProjectError::UnknownTrack(track))?;
        Ok(track.add_clip(Clip::new(ClipSource::Sample { sample }, start_beat, length_beats)))
    }

    pub fn bind_instrument(&mut self, track: Uuid, instrument: Uuid) -> Result<(), ProjectError> {
        if self.instrument(instrument).is_none() {
            return Err(ProjectError::UnknownInstrument(instrument));
        }
        let track = self.track_mut(track).ok_or(ProjectError::UnknownTrack(track))?;
        track.instrument = Some(instrument);
        Ok(())
    }

    /// Appends an effect to a track's chain.
    pub fn chain_effect(&mut self, track: Uuid, effect: Uuid) -> Result<(), ProjectError> {
        if self.effect(effect).is_none() {
            return Err(ProjectError::UnknownEffect(effect));
        }
        let track = self.track_mut(track).ok_or(ProjectError::UnknownTrack(track))?;
        track.effects.push(effect);
        Ok(())
    }

    pub fn add_lane(&mut self, lane: AutomationLane) -> Uuid {
        let id = lane.id;
        self.automation.push(lane);
        id
    }

    pub fn remove_lane(&mut self, id: Uuid) -> bool {
        let before = self.automation.len();
        self.automation.retain(|l| l.id != id);
        self.automation.len() != before
    }

    /// The tempo lane, if one exists and is enabled.
    pub fn tempo_lane(&self) -> Option<&AutomationLane> {
        self.automation
            .iter()
            .find(|l| l.enabled && l.target == AutomationTarget::Tempo)
    }

    pub fn any_solo(&self) -> bool {
        self.tracks.iter().any(|t| t.solo)
    }

    /// Solo on any track narrows playback to solo tracks; otherwise only
    /// mute matters.
    pub fn is_track_audible(&self, track: &Track) -> bool {
        if self.any_solo() { track.solo } else { !track.muted }
    }

    /// Last occupied beat across all tracks.
    pub fn end_beat(&self) -> f64 {
        self.tracks.iter().map(Track::end_beat).fold(0.0, f64::max)
    }
}

impl Default for Project {
    fn default() -> Self {
        Self::new("New Project")
    }
}
