use stratum_core::CoreError;

/// Errors produced by extension point operations.
#[derive(Debug, thiserror::Error)]
pub enum PointError {
    #[error("no contributors registered under key '{key}' for extension point '{point}'")]
    UnknownKey { point: String, key: String },

    #[error("extension point '{point}' is keyed and cannot be instantiated without a family key")]
    KeyRequired { point: String },

    #[error("extension point '{point}' is not keyed")]
    NotKeyed { point: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Core(#[from] CoreError),
}

pub type Result<T> = std::result::Result<T, PointError>;
