use thiserror::Error;

pub use ops_model::ParseError;

/// SSH dial or auth failure. Fatal: the invocation cannot proceed without
/// the transport.
#[derive(Debug, Error)]
#[error("{host}: {cause}")]
pub struct ConnectError {
    pub host: String,
    pub cause: String,
}

impl ConnectError {
    pub fn new(host: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            cause: cause.into(),
        }
    }
}

/// Non-zero exit, PTY request failure, session start failure, or I/O copy
/// failure. Fatal iff `fail-fast`.
#[derive(Debug, Error)]
#[error("{host}: {cause}")]
pub struct RunError {
    pub host: String,
    pub cause: String,
}

impl RunError {
    pub fn new(host: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            cause: cause.into(),
        }
    }
}

/// Top-level error union for `main`'s exit-code mapping. `ParseError` gets
/// the `PARSE ERROR:` stderr prefix (spec §6); the others print verbatim.
#[derive(Debug, Error)]
pub enum OpsError {
    #[error("PARSE ERROR: {0}")]
    Parse(#[from] ParseError),
    #[error("{0}")]
    Manifest(#[from] ops_model::ManifestError),
    #[error("{0}")]
    Connect(#[from] ConnectError),
    #[error("{0}")]
    Run(#[from] RunError),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}
