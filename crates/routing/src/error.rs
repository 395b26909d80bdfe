use switchyard_protocol::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no node bound for channel {0}")]
    NodeNotFound(String),

    #[error("no node serving agent {0}")]
    AgentNotFound(String),

    #[error("missing peerId for {0} scope")]
    MissingPeerId(&'static str),
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::NodeNotFound(_) => ErrorCode::NodeNotFound,
            Error::AgentNotFound(_) => ErrorCode::AgentNotFound,
            Error::MissingPeerId(_) => ErrorCode::MissingPeerId,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
