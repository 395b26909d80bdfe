//! Credential verification for node registration.

use std::{
    collections::HashSet,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    base64::Engine,
    jsonwebtoken::{Algorithm, DecodingKey, Validation, errors::ErrorKind},
    serde::{Deserialize, Serialize},
    tracing::warn,
};

use crate::{
    error::{AuthError, Result},
    keystore::DeviceKeyStore,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Shared secret only.
    #[default]
    Legacy,
    /// EdDSA JWT only.
    Ed25519,
    /// Either; legacy tokens log a one-shot deprecation warning per node.
    Dual,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::Legacy => "legacy",
            AuthMode::Ed25519 => "ed25519",
            AuthMode::Dual => "dual",
        }
    }
}

/// Credentials presented in a `node.register` frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct Credentials<'a> {
    pub token: Option<&'a str>,
    pub signature: Option<&'a str>,
    pub public_key: Option<&'a str>,
}

/// Outcome of handshake-time (HTTP header) authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeAuth {
    /// The bearer token satisfied auth; the register frame may omit
    /// credentials.
    Granted,
    /// Credential inspection is deferred to the first `node.register` frame.
    Deferred,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: u64,
    iat: u64,
}

pub struct AuthVerifier {
    mode: AuthMode,
    shared_secret: Option<String>,
    keys: DeviceKeyStore,
    jwt_max_age: Duration,
    /// Node ids already warned about legacy-token use in dual mode.
    warned_legacy: HashSet<String>,
}

impl AuthVerifier {
    pub fn new(
        mode: AuthMode,
        shared_secret: Option<String>,
        keys: DeviceKeyStore,
        jwt_max_age: Duration,
    ) -> Self {
        Self {
            mode,
            shared_secret,
            keys,
            jwt_max_age,
            warned_legacy: HashSet::new(),
        }
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    pub fn keys(&self) -> &DeviceKeyStore {
        &self.keys
    }

    pub fn keys_mut(&mut self) -> &mut DeviceKeyStore {
        &mut self.keys
    }

    /// Handshake-time check of the `Authorization: Bearer` token.
    ///
    /// Legacy mode requires a valid token at the handshake. Dual mode
    /// validates a token when one is presented and otherwise defers to the
    /// register frame. Ed25519 mode always defers.
    pub fn verify_handshake(&self, bearer: Option<&str>) -> Result<HandshakeAuth> {
        match self.mode {
            AuthMode::Ed25519 => Ok(HandshakeAuth::Deferred),
            AuthMode::Legacy => match bearer {
                Some(token) => {
                    self.check_shared_secret(token)?;
                    Ok(HandshakeAuth::Granted)
                },
                None => Err(AuthError::Missing),
            },
            AuthMode::Dual => match bearer {
                Some(token) => {
                    self.check_shared_secret(token)?;
                    Ok(HandshakeAuth::Granted)
                },
                None => Ok(HandshakeAuth::Deferred),
            },
        }
    }

    /// Verify the credentials carried by a `node.register` frame.
    pub fn verify_register(&mut self, node_id: &str, creds: Credentials<'_>) -> Result<()> {
        match self.mode {
            AuthMode::Legacy => {
                if creds.signature.is_some() {
                    return Err(AuthError::ModeDisallowed("legacy"));
                }
                let token = creds.token.ok_or(AuthError::Missing)?;
                self.check_shared_secret(token)
            },
            AuthMode::Ed25519 => {
                if creds.token.is_some() && creds.signature.is_none() {
                    return Err(AuthError::ModeDisallowed("ed25519"));
                }
                self.verify_jwt(node_id, creds)
            },
            AuthMode::Dual => {
                if let Some(token) = creds.token {
                    self.check_shared_secret(token)?;
                    if self.warned_legacy.insert(node_id.to_string()) {
                        warn!(node_id, "legacy shared-secret auth is deprecated; switch to ed25519");
                    }
                    return Ok(());
                }
                self.verify_jwt(node_id, creds)
            },
        }
    }

    fn check_shared_secret(&self, token: &str) -> Result<()> {
        let Some(secret) = self.shared_secret.as_deref() else {
            return Err(AuthError::Invalid("no shared secret configured".into()));
        };
        if constant_time_eq(token.as_bytes(), secret.as_bytes()) {
            Ok(())
        } else {
            Err(AuthError::Invalid("token mismatch".into()))
        }
    }

    fn verify_jwt(&mut self, node_id: &str, creds: Credentials<'_>) -> Result<()> {
        let (Some(signature), Some(public_key)) = (creds.signature, creds.public_key) else {
            return Err(AuthError::Missing);
        };

        // A known node's advertised key must match its pin before any
        // signature work, so a valid token under a fresh key still fails.
        if let Some(pinned) = self.keys.key_for(node_id)
            && pinned != public_key
        {
            return Err(AuthError::KeyMismatch);
        }

        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(public_key)
            .map_err(|e| AuthError::Invalid(format!("bad public key encoding: {e}")))?;
        let decoding_key = DecodingKey::from_ed_der(&key_bytes);

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub", "iat"]);

        let data = jsonwebtoken::decode::<Claims>(signature, &decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            })?;

        if data.claims.sub != node_id {
            return Err(AuthError::Invalid("sub does not match nodeId".into()));
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let age = now.saturating_sub(data.claims.iat);
        if age > self.jwt_max_age.as_secs() {
            return Err(AuthError::Expired);
        }

        // Only a proven key gets pinned (TOFU) or refreshed.
        self.keys.observe(node_id, public_key)?;

        Ok(())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
