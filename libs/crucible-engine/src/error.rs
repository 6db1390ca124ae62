use crucible_common::types::{Language, UnsupportedLanguage};
use thiserror::Error;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Failure taxonomy for the sandbox engine.
///
/// Only `UnsupportedLanguage` and `InvalidRequest` ever reach callers as
/// rejected calls; everything container-side is recovered by the executor
/// and folded into the returned `ExecutionResult` so downstream consumers
/// always have something to render.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    UnsupportedLanguage(#[from] UnsupportedLanguage),

    /// Persistent-mode provisioning problem, not a code problem. The
    /// message tells the operator how to fix it.
    #[error(
        "persistent container '{name}' for {language} does not exist; \
         provision it with: docker run -d --name {name} --network none {image} sleep infinity"
    )]
    ContainerMissing {
        name: String,
        language: Language,
        image: String,
    },

    #[error("execution exceeded the {limit_ms} ms wall-clock budget")]
    Timeout { limit_ms: u64 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("docker api error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed handshake or framing on the hijacked exec stream.
    #[error("exec stream protocol error: {0}")]
    Protocol(String),
}
