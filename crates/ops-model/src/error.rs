use thiserror::Error;

/// A task name did not resolve, a dependency cycle was found, a transfer
/// directive failed validation, or `command`/`transfer` were both (or
/// neither) set on a task. Fatal to the whole invocation and reported before
/// any side effects.
#[derive(Debug, Error)]
#[error("{target}: {cause}")]
pub struct ParseError {
    pub target: String,
    pub cause: String,
}

impl ParseError {
    pub fn new(target: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            cause: cause.into(),
        }
    }
}

/// Errors raised while loading and validating an `Opsfile.yml`.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("reading manifest: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing manifest: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("task {0:?}: command and transfer are mutually exclusive")]
    BothCommandAndTransfer(String),
    #[error("task {0:?}: must set either command or transfer")]
    NeitherCommandNorTransfer(String),
    #[error("invalid transfer directive {0:?}: expected \"SRC -> DEST\"")]
    InvalidTransfer(String),
    #[error(transparent)]
    Task(#[from] ParseError),
}
