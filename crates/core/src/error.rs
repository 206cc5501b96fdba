use std::io;

use thiserror::Error;

/// Error raised anywhere in the tracker or the peer. Each variant carries
/// the human-readable reason that ends up behind an `Error: ` prefix on the
/// wire or in the shell.
#[derive(Error, Debug)]
pub enum SwarmError {
    /// Socket-level failure: connect, bind, short read, malformed frame.
    #[error("{0}")]
    Transport(String),

    /// Bad credentials, invalid/expired token, unauthorized admin action.
    #[error("{0}")]
    Auth(String),

    /// Malformed command, wrong arity, unknown resource, membership errors.
    #[error("{0}")]
    Validation(String),

    /// A fetched piece failed verification or an index is out of range.
    #[error("{0}")]
    Consistency(String),

    /// An `Error:` response relayed from the tracker or a seeder.
    #[error("{0}")]
    Remote(String),

    /// Local file or directory failure.
    #[error("{0}")]
    Io(#[from] io::Error),
}

pub type SwarmResult<T> = Result<T, SwarmError>;

impl SwarmError {
    pub fn transport(msg: impl Into<String>) -> Self {
        SwarmError::Transport(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        SwarmError::Auth(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        SwarmError::Validation(msg.into())
    }

    pub fn consistency(msg: impl Into<String>) -> Self {
        SwarmError::Consistency(msg.into())
    }
}
