use crossbeam_channel::Sender;
use uuid::Uuid;

use crate::backend::{LoopRegion, RackSetup};
use crate::schedule::Schedule;

/// Control messages into the realtime audio thread. Drained with
/// `try_recv` at the top of every callback, so nothing here may block.
#[derive(Debug)]
pub enum BackendCommand {
    Start,
    Pause,
    /// Halt, clear the schedule and rewind to zero.
    Stop,
    Seek(f64),
    SetLoop(Option<LoopRegion>),
    /// Atomically replaces all pending events.
    ReplaceSchedule(Schedule),
    ClearSchedule,
    /// Replaces the strip/instrument/effect layout.
    SyncRack(RackSetup),
    SetMasterGain(f32),
    SetStripMix {
        strip: Uuid,
        volume: f32,
        pan: f32,
        muted: bool,
    },
    /// Host polling round-trip: the audio thread answers on the sender.
    QueryActiveVoices(Sender<usize>),
}
