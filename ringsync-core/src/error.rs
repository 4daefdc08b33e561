use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid schema: {0}")]
    SchemaInvalid(String),

    #[error("invalid target specifier: {0}")]
    InvalidTarget(String),

    #[error("stack not ready: {0}")]
    StackNotReady(String),

    #[error("editable store not ready: {0}")]
    StoreNotReady(String),

    #[error("secret not found: {0}")]
    SecretNotFound(String),

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("source cycle: {0}")]
    SourceCycle(String),

    #[error("lock unavailable: {0}")]
    LockUnavailable(String),

    #[error("ring unreachable: {0}")]
    RingUnreachable(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("convergence incomplete: {0}")]
    Unconverged(String),
}

impl Error {
    /// Conditions that resolve themselves once upstream state settles.
    /// Callers should retry on the next trigger instead of reporting a fault.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::StackNotReady(_) | Self::StoreNotReady(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Provider(format!("malformed JSON: {err}"))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("malformed TOML: {err}"))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::LockUnavailable(err.to_string())
    }
}
