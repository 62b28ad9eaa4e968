use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Language not supported: {0}")]
    UnsupportedLanguage(String),

    #[error("Execution capacity exhausted, retry later")]
    LoadShed,

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Command template error: {0}")]
    Render(String),

    #[error("Toolchain unavailable: {0}")]
    ToolchainUnavailable(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Usage store error: {0}")]
    Usage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors raised before any execution resource is committed.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::InvalidRequest(_) | Error::UnsupportedLanguage(_))
    }
}
