use std::error::Error;
use std::fmt;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Clone)]
pub enum ProviderError {
    InvalidConfig(String),
    Encode(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            ProviderError::Encode(msg) => write!(f, "request encoding failed: {msg}"),
        }
    }
}

impl Error for ProviderError {}
