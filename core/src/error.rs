/// Errors produced by the composition engine.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("extension point '{0}' already declared")]
    DuplicateRoot(String),

    #[error("unknown extension point '{0}'")]
    UnknownRoot(String),

    #[error("extension point '{point}' is not keyed: {detail}")]
    NotKeyed { point: String, detail: String },

    #[error("contributor '{contributor}' belongs to extension point '{expected}', not '{actual}'")]
    PointMismatch {
        contributor: String,
        expected: String,
        actual: String,
    },

    #[error("composite '{composite}' has no member '{member}'")]
    MemberNotFound { composite: String, member: String },

    #[error("member '{member}' is defined by both '{first}' and '{second}'")]
    Conflict {
        member: String,
        first: String,
        second: String,
    },

    #[error("{0}")]
    Invocation(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
