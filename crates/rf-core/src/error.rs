/// Shared, internal `?`-propagation error used across all reactorflow crates.
///
/// Distinct from [`crate::envelope::ErrorCode`]: that enum is a wire-visible
/// contract value carried inside flow-error envelopes and trajectory steps,
/// while `Error` is a convenience type for constructors, validation helpers,
/// and state-store adapters.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
