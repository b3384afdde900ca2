pub mod automation;
pub mod error;
pub mod project;
pub mod steps;

pub use automation::{AutomationLane, AutomationPoint, AutomationTarget, CurveType};
pub use error::ProjectError;
pub use project::{
    Adsr, Clip, ClipSource, Effect, EffectSpec, Instrument, InstrumentSpec, MidiNote, OscShape,
    Pattern, Project, TimeSignature, Track,
};
pub use steps::{StepCell, StepPattern, StepRow};

/// Format version written into saved project files.
/// Loaders accept any file with the same major version.
pub const PROJECT_FORMAT_VERSION: &str = "1.0.0";
