use crate::resp::{RespError, RespValue};

#[derive(Debug, thiserror::Error)]
pub enum RedlineError {
    #[error("connection pool exhausted ({max_open} connections in use)")]
    PoolExhausted { max_open: usize },

    #[error("connection closed by server")]
    ConnectionClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] RespError),

    /// An error reply (`-...`) sent by the server.
    #[error("{0}")]
    Server(String),

    #[error("transaction aborted: a watched key was modified")]
    TxAborted,

    #[error("unexpected reply: {0:?}")]
    UnexpectedReply(RespValue),

    #[error("unsupported pubsub message kind '{0}'")]
    UnsupportedMessage(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl RedlineError {
    /// Whether the connection that produced this error can no longer be
    /// trusted to sit at a frame boundary.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            RedlineError::ConnectionClosed | RedlineError::Io(_) | RedlineError::Protocol(_)
        )
    }
}

pub type RedlineResult<T> = Result<T, RedlineError>;
