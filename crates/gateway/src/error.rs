use switchyard_common::FromMessage;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Auth(#[from] switchyard_auth::AuthError),

    #[error(transparent)]
    Routing(#[from] switchyard_routing::Error),

    #[error("node {0} is already registered")]
    AlreadyRegistered(String),

    #[error("node {0} not found")]
    NodeNotFound(String),
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

switchyard_common::impl_context!();
