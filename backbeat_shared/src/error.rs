use thiserror::Error;

/// Errors surfaced by document-level operations.
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("unknown track {0}")]
    UnknownTrack(uuid::Uuid),
    #[error("unknown pattern {0}")]
    UnknownPattern(uuid::Uuid),
    #[error("unknown instrument {0}")]
    UnknownInstrument(uuid::Uuid),
    #[error("unknown effect {0}")]
    UnknownEffect(uuid::Uuid),
    #[error("unsupported project format version {found} (expected major {expected})")]
    VersionMismatch { found: String, expected: String },
    #[error("malformed project document: {0}")]
    Malformed(String),
}
