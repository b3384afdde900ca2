pub mod timebase;
pub mod events;
pub mod automation;
pub mod steps;
pub mod assets;
pub mod schedule;
pub mod synth;
pub mod backend;
pub mod commands;
pub mod engine; // RealtimeBackend lives here
pub mod transport;
pub mod render;
pub mod export;
pub mod midi;
pub mod project_io;

// Re-exports
pub use backend::{AudioBackend, LoopRegion};
pub use commands::BackendCommand;
pub use engine::RealtimeBackend;
pub use transport::{Transport, TransportState};

#[cfg(test)]
mod tests_playback;
