use std::cmp::Ordering;

use uuid::Uuid;

/// Track-scoped parameter a ParamSet event writes. The owning track rides
/// on the event itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamTarget {
    Volume,
    Pan,
    Mute,
    EffectWet(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventKind {
    NoteOn {
        instrument: Uuid,
        pitch: u8,
        /// Normalized from the stored 1..=127 velocity.
        velocity: f32,
    },
    NoteOff {
        instrument: Uuid,
        pitch: u8,
    },
    SampleStart {
        sample: Uuid,
        /// Head trim into the source buffer, in source seconds.
        offset_seconds: f64,
        /// Playback stops here even if the buffer is longer.
        duration_seconds: f64,
    },
    ParamSet {
        target: ParamTarget,
        value: f32,
    },
}

impl EventKind {
    /// Tie-break rank at equal times. Releases must run before anything
    /// else so a re-triggered pitch never loses its note-off, and
    /// parameter writes land before the onsets they shape.
    fn rank(&self) -> u8 {
        match self {
            EventKind::NoteOff { .. } => 0,
            EventKind::ParamSet { .. } => 1,
            EventKind::NoteOn { .. } => 2,
            EventKind::SampleStart { .. } => 3,
        }
    }
}

/// One dispatchable moment on the absolute (from-origin) timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledEvent {
    pub time_seconds: f64,
    pub track: Uuid,
    pub kind: EventKind,
}

impl ScheduledEvent {
    pub fn chronological(a: &Self, b: &Self) -> Ordering {
        a.time_seconds
            .total_cmp(&b.time_seconds)
            .then_with(|| a.kind.rank().cmp(&b.kind.rank()))
    }
}
