//! Standard MIDI File export: format 1, one conductor track plus one
//! track per pattern, so the arrangement drops into any DAW.

use std::path::Path;

use anyhow::Context;
use backbeat_shared::project::{Pattern, Project};
use log::info;
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};

pub const TICKS_PER_QUARTER: u16 = 96;

/// Note event at an absolute tick, before delta encoding. `order` breaks
/// same-tick ties: note-offs (0) must precede note-ons (1) so retriggered
/// pitches release cleanly.
struct AbsoluteMidiEvent<'a> {
    tick: u64,
    order: u8,
    kind: TrackEventKind<'a>,
}

fn beat_to_tick(beat: f64) -> u64 {
    (beat.max(0.0) * TICKS_PER_QUARTER as f64).round() as u64
}

fn build_conductor_track(project: &Project) -> Vec<TrackEvent<'_>> {
    let bpm = project.bpm.max(1.0);
    let micros_per_quarter = (60_000_000.0 / bpm).round() as u32;
    let signature = project.time_signature;

    vec![
        TrackEvent {
            delta: u28::from(0_u32),
            kind: TrackEventKind::Meta(MetaMessage::TrackName(project.name.as_bytes())),
        },
        TrackEvent {
            delta: u28::from(0_u32),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::from(micros_per_quarter))),
        },
        TrackEvent {
            delta: u28::from(0_u32),
            kind: TrackEventKind::Meta(MetaMessage::TimeSignature(
                signature.numerator,
                signature.denominator.trailing_zeros() as u8,
                24,
                8,
            )),
        },
        TrackEvent {
            delta: u28::from(0_u32),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        },
    ]
}

fn build_pattern_track(pattern: &Pattern) -> Vec<TrackEvent<'_>> {
    let mut absolute_events = Vec::with_capacity(pattern.notes.len() * 2);
    for note in &pattern.notes {
        if note.length_beats <= 0.0 {
            continue;
        }
        let pitch = note.pitch.min(127);
        let velocity = note.velocity.clamp(1, 127);
        absolute_events.push(AbsoluteMidiEvent {
            tick: beat_to_tick(note.start_beat),
            order: 1,
            kind: TrackEventKind::Midi {
                channel: u4::from(0),
                message: MidiMessage::NoteOn { key: u7::from(pitch), vel: u7::from(velocity) },
            },
        });
        absolute_events.push(AbsoluteMidiEvent {
            tick: beat_to_tick(note.end_beat()),
            order: 0,
            kind: TrackEventKind::Midi {
                channel: u4::from(0),
                message: MidiMessage::NoteOff { key: u7::from(pitch), vel: u7::from(0) },
            },
        });
    }
    absolute_events.sort_by_key(|event| (event.tick, event.order));

    let mut track_events = Vec::with_capacity(absolute_events.len() + 2);
    track_events.push(TrackEvent {
        delta: u28::from(0_u32),
        kind: TrackEventKind::Meta(MetaMessage::TrackName(pattern.name.as_bytes())),
    });

    let mut previous_tick = 0_u64;
    for event in absolute_events {
        let delta = event.tick.saturating_sub(previous_tick).min(u64::from(u32::MAX)) as u32;
        track_events.push(TrackEvent { delta: u28::from(delta), kind: event.kind });
        previous_tick = event.tick;
    }

    track_events.push(TrackEvent {
        delta: u28::from(0_u32),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    track_events
}

/// Builds the whole file in memory. Patterns travel at their own local
/// ticks (beat 0 = tick 0), one per track; placement on the timeline is a
/// playback concern and stays out of the export.
pub fn project_to_smf(project: &Project) -> Smf<'_> {
    let mut tracks = Vec::with_capacity(project.patterns.len() + 1);
    tracks.push(build_conductor_track(project));
    for pattern in &project.patterns {
        tracks.push(build_pattern_track(pattern));
    }

    Smf {
        header: Header {
            format: Format::Parallel,
            timing: Timing::Metrical(u15::from(TICKS_PER_QUARTER)),
        },
        tracks,
    }
}

pub fn midi_bytes(project: &Project) -> Result<Vec<u8>, anyhow::Error> {
    let mut bytes = Vec::new();
    project_to_smf(project)
        .write_std(&mut bytes)
        .context("failed to encode midi bytes")?;
    Ok(bytes)
}

pub fn write_midi_file(project: &Project, path: &Path) -> Result<(), anyhow::Error> {
    project_to_smf(project)
        .save(path)
        .with_context(|| format!("failed to write midi file {}", path.display()))?;
    info!(
        "[Export] Wrote MIDI file {} ({} pattern tracks)",
        path.display(),
        project.patterns.len()
    );
    Ok(())
}
