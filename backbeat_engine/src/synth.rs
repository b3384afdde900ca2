use std::sync::Arc;

use backbeat_shared::project::{Adsr, EffectSpec, InstrumentSpec, OscShape};
use log::debug;
use uuid::Uuid;

use crate::assets::{SampleBuffer, SamplePool};
use crate::backend::{InstrumentSetup, RackSetup, StripSetup};
use crate::events::{EventKind, ParamTarget, ScheduledEvent};

pub const MAX_VOICES: usize = 16;

/// Headroom per voice so a full chord does not clip the strip.
const VOICE_GAIN: f32 = 0.25;

/// Pre-sized scratch; blocks larger than this grow the buffers once.
const DEFAULT_BLOCK: usize = 4096;

pub fn midi_to_hz(pitch: u8) -> f32 {
    440.0 * 2.0f32.powf((pitch as f32 - 69.0) / 12.0)
}

fn osc_sample(shape: OscShape, phase: f32) -> f32 {
    match shape {
        OscShape::Sine => (phase * std::f32::consts::TAU).sin(),
        OscShape::Triangle => 4.0 * (phase - 0.5).abs() - 1.0,
        OscShape::Square => {
            if phase < 0.5 {
                1.0
            } else {
                -1.0
            }
        }
        OscShape::Sawtooth => 2.0 * phase - 1.0,
    }
}

/// A note source driven by sample-accurate on/off calls. `frame_offset`
/// counts from the start of the next rendered block.
pub trait VoiceSource: Send {
    fn note_on(&mut self, pitch: u8, velocity: f32, frame_offset: usize);
    fn note_off(&mut self, pitch: u8, frame_offset: usize);
    fn release_all(&mut self);
    /// Adds into a mono buffer.
    fn render(&mut self, out: &mut [f32]);
    fn active_voices(&self) -> usize;
}

#[derive(Clone, Copy, PartialEq)]
enum EnvStage {
    Attack,
    Decay,
    Sustain,
    Release,
    Done,
}

struct SynthVoice {
    pitch: u8,
    velocity: f32,
    phase: f32,
    phase_inc: f32,
    stage: EnvStage,
    level: f32,
    release_step: f32,
    /// Frames until the onset actually sounds.
    delay: usize,
    /// Frames until a scheduled release kicks in.
    release_in: Option<usize>,
    age: u64,
}

impl SynthVoice {
    fn quiet() -> Self {
        Self {
            pitch: 0,
            velocity: 0.0,
            phase: 0.0,
            phase_inc: 0.0,
            stage: EnvStage::Done,
            level: 0.0,
            release_step: 0.0,
            delay: 0,
            release_in: None,
            age: 0,
        }
    }
}

/// Polyphonic oscillator bank with a per-voice ADSR. Voices are a fixed
/// pool; past the limit the oldest voice is stolen.
pub struct SynthBank {
    shape: OscShape,
    adsr: Adsr,
    sample_rate: f32,
    voices: Vec<SynthVoice>,
    clock: u64,
}

impl SynthBank {
    pub fn new(shape: OscShape, adsr: Adsr, sample_rate: f32) -> Self {
        Self {
            shape,
            adsr,
            sample_rate,
            voices: (0..MAX_VOICES).map(|_| SynthVoice::quiet()).collect(),
            clock: 0,
        }
    }

    fn alloc(&mut self) -> &mut SynthVoice {
        if let Some(i) = self.voices.iter().position(|v| v.stage == EnvStage::Done) {
            return &mut self.voices[i];
        }
        // Steal the oldest.
        let i = self
            .voices
            .iter()
            .enumerate()
            .min_by_key(|(_, v)| v.age)
            .map(|(i, _)| i)
            .unwrap_or(0);
        &mut self.voices[i]
    }
}

impl VoiceSource for SynthBank {
    fn note_on(&mut self, pitch: u8, velocity: f32, frame_offset: usize) {
        self.clock += 1;
        let clock = self.clock;
        let phase_inc = midi_to_hz(pitch) / self.sample_rate;
        let voice = self.alloc();
        *voice = SynthVoice {
            pitch,
            velocity: velocity.clamp(0.0, 1.0),
            phase: 0.0,
            phase_inc,
            stage: EnvStage::Attack,
            level: 0.0,
            release_step: 0.0,
            delay: frame_offset,
            release_in: None,
            age: clock,
        };
    }

    fn note_off(&mut self, pitch: u8, frame_offset: usize) {
        // Release the longest-sounding unreleased voice of this pitch so
        // overlapping repeats pair up first-on/first-off.
        if let Some(voice) = self
            .voices
            .iter_mut()
            .filter(|v| {
                v.pitch == pitch
                    && v.release_in.is_none()
                    && !matches!(v.stage, EnvStage::Release | EnvStage::Done)
            })
            .min_by_key(|v| v.age)
        {
            voice.release_in = Some(frame_offset);
        }
    }

    fn release_all(&mut self) {
        for voice in &mut self.voices {
            if !matches!(voice.stage, EnvStage::Done) {
                voice.release_in = Some(0);
            }
        }
    }

    fn render(&mut self, out: &mut [f32]) {
        let attack_step = 1.0 / (self.adsr.attack.max(1e-4) * self.sample_rate);
        let decay_step = (1.0 - self.adsr.sustain) / (self.adsr.decay.max(1e-4) * self.sample_rate);
        let release_frames = self.adsr.release.max(1e-4) * self.sample_rate;

        for voice in &mut self.voices {
            if voice.stage == EnvStage::Done {
                continue;
            }
            for sample in out.iter_mut() {
                // The release offset counts from the block start, not the
                // onset, so it must tick ahead of the delay gate.
                match voice.release_in {
                    Some(0) => {
                        voice.stage = EnvStage::Release;
                        voice.release_step = voice.level / release_frames;
                        voice.release_in = None;
                    }
                    Some(ref mut n) => *n -= 1,
                    None => {}
                }
                if voice.delay > 0 {
                    voice.delay -= 1;
                    continue;
                }
                match voice.stage {
                    EnvStage::Attack => {
                        voice.level += attack_step;
                        if voice.level >= 1.0 {
                            voice.level = 1.0;
                            voice.stage = EnvStage::Decay;
                        }
                    }
                    EnvStage::Decay => {
                        voice.level -= decay_step;
                        if voice.level <= self.adsr.sustain {
                            voice.level = self.adsr.sustain;
                            voice.stage = EnvStage::Sustain;
                        }
                    }
                    EnvStage::Sustain => {}
                    EnvStage::Release => {
                        voice.level -= voice.release_step;
                        if voice.level <= 0.0 {
                            voice.level = 0.0;
                            voice.stage = EnvStage::Done;
                            break;
                        }
                    }
                    EnvStage::Done => break,
                }
                *sample +=
                    osc_sample(self.shape, voice.phase) * voice.level * voice.velocity * VOICE_GAIN;
                voice.phase = (voice.phase + voice.phase_inc) % 1.0;
            }
        }
    }

    fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.stage != EnvStage::Done).count()
    }
}

struct SampleVoice {
    pos: f64,
    step: f64,
    velocity: f32,
    pitch: u8,
    fade: f32,
    fade_step: f32,
    delay: usize,
    release_in: Option<usize>,
    done: bool,
    age: u64,
}

/// Pitched playback of one pooled buffer; the root pitch plays at the
/// source rate and other pitches resample linearly around it.
pub struct SamplerBank {
    buffer: Arc<SampleBuffer>,
    root_pitch: u8,
    sample_rate: f32,
    voices: Vec<SampleVoice>,
    clock: u64,
}

impl SamplerBank {
    pub fn new(buffer: Arc<SampleBuffer>, root_pitch: u8, sample_rate: f32) -> Self {
        Self { buffer, root_pitch, sample_rate, voices: Vec::with_capacity(MAX_VOICES), clock: 0 }
    }
}

impl VoiceSource for SamplerBank {
    fn note_on(&mut self, pitch: u8, velocity: f32, frame_offset: usize) {
        self.clock += 1;
        let ratio = midi_to_hz(pitch) as f64 / midi_to_hz(self.root_pitch) as f64;
        let step = ratio * self.buffer.sample_rate as f64 / self.sample_rate as f64;
        let voice = SampleVoice {
            pos: 0.0,
            step,
            velocity: velocity.clamp(0.0, 1.0),
            pitch,
            fade: 1.0,
            // 5 ms release ramp keeps cut-offs click-free.
            fade_step: 1.0 / (0.005 * self.sample_rate),
            delay: frame_offset,
            release_in: None,
            done: false,
            age: self.clock,
        };
        if self.voices.len() < MAX_VOICES {
            self.voices.push(voice);
        } else if let Some(slot) = self.voices.iter_mut().min_by_key(|v| v.age) {
            *slot = voice;
        }
    }

    fn note_off(&mut self, pitch: u8, frame_offset: usize) {
        if let Some(voice) = self
            .voices
            .iter_mut()
            .filter(|v| v.pitch == pitch && v.release_in.is_none() && !v.done)
            .min_by_key(|v| v.age)
        {
            voice.release_in = Some(frame_offset);
        }
    }

    fn release_all(&mut self) {
        for voice in &mut self.voices {
            if !voice.done {
                voice.release_in = Some(0);
            }
        }
    }

    fn render(&mut self, out: &mut [f32]) {
        let data = &self.buffer.data;
        for voice in &mut self.voices {
            if voice.done {
                continue;
            }
            let mut releasing = false;
            for sample in out.iter_mut() {
                match voice.release_in {
                    Some(0) => {
                        releasing = true;
                        voice.release_in = None;
                    }
                    Some(ref mut n) => *n -= 1,
                    None => {}
                }
                if voice.delay > 0 {
                    voice.delay -= 1;
                    continue;
                }
                if releasing || voice.fade < 1.0 {
                    releasing = true;
                    voice.fade -= voice.fade_step;
                    if voice.fade <= 0.0 {
                        voice.done = true;
                        break;
                    }
                }
                let base = voice.pos as usize;
                if base + 1 >= data.len() {
                    voice.done = true;
                    break;
                }
                let frac = (voice.pos - base as f64) as f32;
                let value = data[base] * (1.0 - frac) + data[base + 1] * frac;
                *sample += value * voice.velocity * voice.fade * VOICE_GAIN * 2.0;
                voice.pos += voice.step;
            }
        }
        self.voices.retain(|v| !v.done);
    }

    fn active_voices(&self) -> usize {
        self.voices.len()
    }
}

/// Direct playback of a pooled buffer for sample clips: no pitching, a
/// head trim in source seconds and a hard stop at the clip length.
struct ClipVoice {
    buffer: Arc<SampleBuffer>,
    pos: f64,
    step: f64,
    remaining: usize,
    delay: usize,
    done: bool,
}

impl ClipVoice {
    fn new(
        buffer: Arc<SampleBuffer>,
        offset_seconds: f64,
        duration_seconds: f64,
        sample_rate: f32,
        frame_offset: usize,
    ) -> Self {
        let pos = offset_seconds.max(0.0) * buffer.sample_rate as f64;
        let step = buffer.sample_rate as f64 / sample_rate as f64;
        Self {
            buffer,
            pos,
            step,
            remaining: (duration_seconds.max(0.0) * sample_rate as f64) as usize,
            delay: frame_offset,
            done: false,
        }
    }

    fn render(&mut self, out: &mut [f32]) {
        let data = &self.buffer.data;
        for sample in out.iter_mut() {
            if self.done {
                return;
            }
            if self.delay > 0 {
                self.delay -= 1;
                continue;
            }
            if self.remaining == 0 {
                self.done = true;
                return;
            }
            let base = self.pos as usize;
            if base + 1 >= data.len() {
                self.done = true;
                return;
            }
            let frac = (self.pos - base as f64) as f32;
            *sample += data[base] * (1.0 - frac) + data[base + 1] * frac;
            self.pos += self.step;
            self.remaining -= 1;
        }
    }
}

enum EffectKind {
    Delay { line: Vec<f32>, write: usize, delay_samples: usize, feedback: f32 },
    Distortion { drive: f32 },
    Lowpass { state: f32, coeff: f32 },
}

/// One effect instance in a strip's chain, mixing `wet` of the processed
/// signal against the dry input. The spec it was built from sticks around
/// so a resync can tell an unchanged unit from an edited one.
pub struct EffectUnit {
    pub id: Uuid,
    pub wet: f32,
    spec: EffectSpec,
    kind: EffectKind,
}

impl EffectUnit {
    pub fn from_setup(id: Uuid, wet: f32, spec: &EffectSpec, sample_rate: f32) -> Self {
        let kind = match spec {
            EffectSpec::Delay { time_seconds, feedback } => {
                let delay_samples = ((*time_seconds * sample_rate) as usize).max(1);
                EffectKind::Delay {
                    line: vec![0.0; delay_samples + 1],
                    write: 0,
                    delay_samples,
                    feedback: *feedback,
                }
            }
            EffectSpec::Distortion { drive } => EffectKind::Distortion { drive: *drive },
            EffectSpec::Lowpass { cutoff_hz } => EffectKind::Lowpass {
                state: 0.0,
                coeff: 1.0
                    - (-std::f32::consts::TAU * cutoff_hz / sample_rate.max(1.0)).exp(),
            },
        };
        Self { id, wet: wet.clamp(0.0, 1.0), spec: spec.clone(), kind }
    }

    pub fn set_wet(&mut self, wet: f32) {
        self.wet = wet.clamp(0.0, 1.0);
    }

    pub fn process(&mut self, buffer: &mut [f32]) {
        let wet = self.wet;
        let dry = 1.0 - wet;
        match &mut self.kind {
            EffectKind::Delay { line, write, delay_samples, feedback } => {
                let len = line.len();
                for sample in buffer.iter_mut() {
                    let x = *sample;
                    let read = (*write + len - *delay_samples) % len;
                    let delayed = line[read];
                    line[*write] = x + delayed * *feedback;
                    *write = (*write + 1) % len;
                    *sample = x * dry + delayed * wet;
                }
            }
            EffectKind::Distortion { drive } => {
                for sample in buffer.iter_mut() {
                    let x = *sample;
                    *sample = x * dry + (x * *drive).tanh() * wet;
                }
            }
            EffectKind::Lowpass { state, coeff } => {
                for sample in buffer.iter_mut() {
                    let x = *sample;
                    *state += *coeff * (x - *state);
                    *sample = x * dry + *state * wet;
                }
            }
        }
    }
}

/// One mixer strip: an optional voice bank, clip players, an effect chain
/// and the volume/pan/mute stage, rendering into its own stereo buffer so
/// strips can be processed independently.
pub struct Strip {
    pub id: Uuid,
    pub name: String,
    volume: f32,
    pan: f32,
    muted: bool,
    instrument_setup: Option<InstrumentSetup>,
    instrument: Option<Box<dyn VoiceSource>>,
    effects: Vec<EffectUnit>,
    clips: Vec<ClipVoice>,
    mono: Vec<f32>,
    stereo: Vec<f32>,
}

impl Strip {
    fn from_setup(setup: &StripSetup, sample_rate: f32, pool: &SamplePool) -> Self {
        let mut strip = Self {
            id: setup.id,
            name: setup.name.clone(),
            volume: setup.volume,
            pan: setup.pan,
            muted: setup.muted,
            instrument_setup: None,
            instrument: None,
            effects: Vec::new(),
            clips: Vec::new(),
            mono: vec![0.0; DEFAULT_BLOCK],
            stereo: vec![0.0; DEFAULT_BLOCK * 2],
        };
        strip.apply_setup(setup, sample_rate, pool);
        strip
    }

    fn build_instrument(
        setup: &StripSetup,
        sample_rate: f32,
        pool: &SamplePool,
    ) -> Option<Box<dyn VoiceSource>> {
        let instrument = setup.instrument.as_ref()?;
        match &instrument.spec {
            InstrumentSpec::Synth { shape, envelope } => {
                Some(Box::new(SynthBank::new(*shape, *envelope, sample_rate)))
            }
            InstrumentSpec::Sampler { sample, root_pitch } => match pool.get(*sample) {
                Some(buffer) => {
                    Some(Box::new(SamplerBank::new(buffer.clone(), *root_pitch, sample_rate)))
                }
                None => {
                    debug!("[Rack] Sampler {} waits for sample {}", instrument.id, sample);
                    None
                }
            },
        }
    }

    fn apply_setup(&mut self, setup: &StripSetup, sample_rate: f32, pool: &SamplePool) {
        self.name = setup.name.clone();
        self.volume = setup.volume;
        self.pan = setup.pan;
        self.muted = setup.muted;

        // An edited spec under the same id counts as a new instrument.
        let missing_sampler = setup.instrument.is_some() && self.instrument.is_none();
        if setup.instrument != self.instrument_setup || missing_sampler {
            self.instrument = Self::build_instrument(setup, sample_rate, pool);
            self.instrument_setup = setup.instrument.clone();
        }

        // Rebuild the chain in setup order, carrying over unchanged units
        // so delay lines and filter state survive a rebuild. An edited
        // spec rebuilds its unit from scratch.
        let mut old: Vec<EffectUnit> = std::mem::take(&mut self.effects);
        for effect in &setup.effects {
            match old.iter().position(|e| e.id == effect.id && e.spec == effect.spec) {
                Some(i) => {
                    let mut unit = old.swap_remove(i);
                    unit.set_wet(effect.wet);
                    self.effects.push(unit);
                }
                None => {
                    self.effects.push(EffectUnit::from_setup(
                        effect.id,
                        effect.wet,
                        &effect.spec,
                        sample_rate,
                    ));
                }
            }
        }
    }

    pub fn set_mix(&mut self, volume: f32, pan: f32, muted: bool) {
        self.volume = volume.clamp(0.0, 1.0);
        self.pan = pan.clamp(-1.0, 1.0);
        self.muted = muted;
    }

    fn set_param(&mut self, target: ParamTarget, value: f32) {
        match target {
            ParamTarget::Volume => self.volume = value.clamp(0.0, 1.0),
            ParamTarget::Pan => self.pan = value.clamp(-1.0, 1.0),
            ParamTarget::Mute => self.muted = value >= 0.5,
            ParamTarget::EffectWet(id) => {
                if let Some(effect) = self.effects.iter_mut().find(|e| e.id == id) {
                    effect.set_wet(value);
                }
            }
        }
    }

    pub fn release_all(&mut self) {
        if let Some(instrument) = &mut self.instrument {
            instrument.release_all();
        }
        self.clips.clear();
    }

    /// Renders `frames` into the strip's stereo buffer.
    pub fn process(&mut self, frames: usize) {
        if self.mono.len() < frames {
            self.mono.resize(frames, 0.0);
            self.stereo.resize(frames * 2, 0.0);
        }
        let mono = &mut self.mono[..frames];
        mono.fill(0.0);

        if let Some(instrument) = &mut self.instrument {
            instrument.render(mono);
        }
        for clip in &mut self.clips {
            clip.render(mono);
        }
        self.clips.retain(|c| !c.done);
        for effect in &mut self.effects {
            effect.process(mono);
        }

        let gain = if self.muted { 0.0 } else { self.volume };
        let l_gain = gain * if self.pan > 0.0 { 1.0 - self.pan } else { 1.0 };
        let r_gain = gain * if self.pan < 0.0 { 1.0 + self.pan } else { 1.0 };
        let stereo = &mut self.stereo[..frames * 2];
        for (i, &s) in self.mono[..frames].iter().enumerate() {
            stereo[i * 2] = s * l_gain;
            stereo[i * 2 + 1] = s * r_gain;
        }
    }

    pub fn stereo(&self, frames: usize) -> &[f32] {
        &self.stereo[..frames * 2]
    }

    pub fn active_voices(&self) -> usize {
        self.instrument.as_ref().map_or(0, |i| i.active_voices()) + self.clips.len()
    }
}

/// All strips plus the master stage. Both the realtime callback and the
/// offline renderer drive one of these with the same event vocabulary.
pub struct Rack {
    sample_rate: f32,
    strips: Vec<Strip>,
    master_gain: f32,
}

impl Rack {
    pub fn new(sample_rate: f32) -> Self {
        Self { sample_rate, strips: Vec::new(), master_gain: 0.8 }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Diffs the rack against a setup snapshot: new strips are created,
    /// surviving strips updated in place, vanished strips disposed after
    /// releasing their voices.
    pub fn sync(&mut self, setup: &RackSetup, pool: &SamplePool) {
        self.master_gain = setup.master_gain.clamp(0.0, 1.0);
        self.strips.retain_mut(|strip| {
            if setup.strips.iter().any(|s| s.id == strip.id) {
                true
            } else {
                strip.release_all();
                false
            }
        });
        for strip_setup in &setup.strips {
            match self.strips.iter_mut().find(|s| s.id == strip_setup.id) {
                Some(strip) => strip.apply_setup(strip_setup, self.sample_rate, pool),
                None => {
                    self.strips.push(Strip::from_setup(strip_setup, self.sample_rate, pool));
                }
            }
        }
    }

    pub fn set_master_gain(&mut self, gain: f32) {
        self.master_gain = gain.clamp(0.0, 1.0);
    }

    pub fn set_strip_mix(&mut self, strip: Uuid, volume: f32, pan: f32, muted: bool) {
        if let Some(strip) = self.strips.iter_mut().find(|s| s.id == strip) {
            strip.set_mix(volume, pan, muted);
        }
    }

    /// Routes one event to its strip at a frame offset within the next
    /// block. Unknown strips and samples are ignored.
    pub fn dispatch(&mut self, event: &ScheduledEvent, frame_offset: usize, pool: &SamplePool) {
        let sample_rate = self.sample_rate;
        let Some(strip) = self.strips.iter_mut().find(|s| s.id == event.track) else {
            return;
        };
        match &event.kind {
            EventKind::NoteOn { pitch, velocity, .. } => {
                if let Some(instrument) = &mut strip.instrument {
                    instrument.note_on(*pitch, *velocity, frame_offset);
                }
            }
            EventKind::NoteOff { pitch, .. } => {
                if let Some(instrument) = &mut strip.instrument {
                    instrument.note_off(*pitch, frame_offset);
                }
            }
            EventKind::SampleStart { sample, offset_seconds, duration_seconds } => {
                if let Some(buffer) = pool.get(*sample) {
                    strip.clips.push(ClipVoice::new(
                        buffer.clone(),
                        *offset_seconds,
                        *duration_seconds,
                        sample_rate,
                        frame_offset,
                    ));
                }
            }
            EventKind::ParamSet { target, value } => strip.set_param(*target, *value),
        }
    }

    pub fn release_all(&mut self) {
        for strip in &mut self.strips {
            strip.release_all();
        }
    }

    pub fn strips(&self) -> &[Strip] {
        &self.strips
    }

    pub fn strips_mut(&mut self) -> &mut [Strip] {
        &mut self.strips
    }

    /// Serial render path used by the realtime callback.
    pub fn process_block(&mut self, frames: usize) {
        for strip in &mut self.strips {
            strip.process(frames);
        }
    }

    /// Sums the strips' last rendered block into an interleaved stereo
    /// buffer and applies the master gain. Adds on top of what is there.
    pub fn mix_into(&self, out: &mut [f32]) {
        let frames = out.len() / 2;
        for strip in &self.strips {
            let stereo = strip.stereo(frames);
            for (o, s) in out.iter_mut().zip(stereo.iter()) {
                *o += s * self.master_gain;
            }
        }
    }

    pub fn active_voices(&self) -> usize {
        self.strips.iter().map(Strip::active_voices).sum()
    }
}
