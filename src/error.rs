use thiserror::Error;

/// Failures raised by a storage backend.
///
/// These never reach the content response: the engine degrades a failed read
/// to a miss and a failed write/delete/clear to a logged no-op.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {message}")]
    Database { message: String },
    #[error("remote store error: {message}")]
    Remote { message: String },
    #[error("backend unavailable: {message}")]
    Unavailable { message: String },
}

impl BackendError {
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for BackendError {
    fn from(err: sqlx::Error) -> Self {
        Self::database(err.to_string())
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        Self::remote(err.to_string())
    }
}

/// Failures loading or normalizing the settings snapshot.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl SettingsError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for SettingsError {
    fn from(err: config::ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}
