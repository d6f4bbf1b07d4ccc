use thiserror::Error;

/// Semantic validation failure at the HTTP boundary, carrying every issue
/// found so the 400 response can list them all.
#[derive(Debug, Error)]
#[error("validation failed: {}", issues.join("; "))]
pub struct ValidationError {
    pub issues: Vec<String>,
}

/// Failures in shared plumbing that is not owned by a more specific crate.
#[derive(Debug, Error)]
pub enum PulseError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}
