//! Connection authentication.
//!
//! Two credential families, selected by [`AuthMode`]: a shared secret
//! (`legacy`) and an EdDSA JWT signed with a per-node Ed25519 key
//! (`ed25519`), with `dual` accepting either. Public keys are pinned on
//! first use when TOFU is enabled.

mod error;
mod keystore;
mod verifier;

pub use {
    error::{AuthError, Result},
    keystore::DeviceKeyStore,
    verifier::{AuthMode, AuthVerifier, Credentials, HandshakeAuth},
};
