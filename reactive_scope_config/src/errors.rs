use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ConfigError {
    #[error("environment variable {name} has an invalid value: {value:?}")]
    InvalidEnvValue { name: String, value: String },
    #[error("environment variable {0} is not valid unicode")]
    EnvError(String),
    #[error("Config Error: {0}")]
    ConfigError(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        Self::ConfigError(e.to_string())
    }
}
