//! Engine error types

use crate::session::ClientId;
use thiserror::Error;

/// Errors surfaced by the checking engine
#[derive(Error, Debug)]
pub enum CheckerError {
    #[error("a session is already active for client {0}")]
    SessionActive(ClientId),

    #[error("no valid proxies found")]
    NoValidProxies,

    #[error("too many proxies: found {found}, max {max}")]
    TooManyProxies { found: usize, max: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CheckerError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        CheckerError::InvalidConfig(message.into())
    }
}
