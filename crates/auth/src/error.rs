use switchyard_protocol::{ErrorCode, close_codes};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing credentials")]
    Missing,

    #[error("invalid credentials: {0}")]
    Invalid(String),

    #[error("credentials expired")]
    Expired,

    #[error("credential not allowed in {0} mode")]
    ModeDisallowed(&'static str),

    #[error("public key mismatch for pinned node")]
    KeyMismatch,

    #[error("unknown key and TOFU disabled")]
    TofuDisabled,

    #[error("device key store full")]
    StoreFull,
}

impl AuthError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AuthError::Missing => ErrorCode::TokenMissing,
            AuthError::Invalid(_) => ErrorCode::TokenInvalid,
            AuthError::Expired => ErrorCode::TokenExpired,
            AuthError::ModeDisallowed(_) | AuthError::StoreFull => ErrorCode::Forbidden,
            AuthError::KeyMismatch => ErrorCode::KeyMismatch,
            AuthError::TofuDisabled => ErrorCode::TofuDisabled,
        }
    }

    /// WebSocket close code for this failure: 4401 for authentication
    /// failures, 4403 for policy refusals.
    pub fn close_code(&self) -> u16 {
        match self.code().status() {
            401 => close_codes::AUTH_INVALID,
            _ => close_codes::AUTH_FORBIDDEN,
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
