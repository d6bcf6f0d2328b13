//! JWT viewer authentication.
//!
//! A session token names a role, the tenant it is scoped to (`aud`) and a
//! subject. Verification failures of any kind are `Auth`; scope or role
//! mismatches discovered afterwards are `Forbidden`.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rankport_core::config::AuthConfig;
use rankport_core::error::{RankportError, Result};
use rankport_core::types::{ADMIN_TENANT_NAME, PlayerDetail, Role, Viewer};
use serde::{Deserialize, Serialize};

use crate::store::ScoreStore;

/// JWT claims.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    pub sub: String,
    pub aud: Audience,
    pub role: String,
    pub exp: u64,
}

/// `aud` may be a single string or an array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn single(&self) -> Option<&str> {
        match self {
            Audience::One(aud) => Some(aud),
            Audience::Many(list) if list.len() == 1 => Some(&list[0]),
            Audience::Many(_) => None,
        }
    }
}

/// Turns session tokens into [`Viewer`]s.
pub struct ViewerAuthority {
    key: DecodingKey,
    algorithm: Algorithm,
}

impl ViewerAuthority {
    /// Verify RS256 tokens against a PEM-encoded public key.
    pub fn from_rsa_pem(pem: &[u8]) -> Result<Self> {
        let key = DecodingKey::from_rsa_pem(pem)
            .map_err(|e| RankportError::internal(format!("Load JWT public key: {e}")))?;
        Ok(Self { key, algorithm: Algorithm::RS256 })
    }

    /// Verify HS256 tokens against a shared secret.
    pub fn from_secret(secret: &str) -> Self {
        Self { key: DecodingKey::from_secret(secret.as_bytes()), algorithm: Algorithm::HS256 }
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        if let Some(path) = &config.jwt_public_key_path {
            let pem = std::fs::read(path)
                .map_err(|e| RankportError::internal(format!("Read JWT key file {path}: {e}")))?;
            return Self::from_rsa_pem(&pem);
        }
        match &config.jwt_secret {
            Some(secret) if !secret.is_empty() => Ok(Self::from_secret(secret)),
            _ => Err(RankportError::validation(
                "auth: set jwt_public_key_path or jwt_secret",
            )),
        }
    }

    /// Validate a session token and decode the viewer it describes.
    pub fn authorize(&self, token: Option<&str>) -> Result<Viewer> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RankportError::auth("missing session token"))?;

        let mut validation = Validation::new(self.algorithm);
        // `aud` is checked below against the reserved admin scope, not a fixed value.
        validation.validate_aud = false;

        let claims = decode::<Claims>(token, &self.key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                let reason = match e.kind() {
                    ErrorKind::ExpiredSignature => "token expired",
                    ErrorKind::InvalidSignature => "token signed with an unrecognized key",
                    ErrorKind::InvalidAlgorithm => "token uses an unexpected algorithm",
                    _ => "malformed token",
                };
                tracing::warn!("rejected session token: {e}");
                RankportError::auth(reason)
            })?;

        if claims.sub.is_empty() {
            return Err(RankportError::auth("token has no subject"));
        }
        let role: Role = claims.role.parse()?;
        let scope = claims.aud.single()
            .ok_or_else(|| RankportError::auth("token must carry exactly one audience"))?;

        match (role, scope == ADMIN_TENANT_NAME) {
            (Role::Admin, false) => return Err(RankportError::auth("admin token outside the admin scope")),
            (Role::Organizer | Role::Player, true) => {
                return Err(RankportError::auth("tenant token scoped to the admin tenant"));
            }
            _ => {}
        }

        Ok(Viewer { role, tenant_scope: scope.to_string(), subject: claims.sub })
    }

    /// Gate a tenant-scoped read on the requesting player's standing.
    ///
    /// Player viewers must exist in the partition and not be disqualified;
    /// organizers and admins pass through with `None`.
    pub fn authorize_player_read(&self, viewer: &Viewer, store: &ScoreStore) -> Result<Option<PlayerDetail>> {
        if viewer.role != Role::Player {
            return Ok(None);
        }
        let player_id = viewer.player_id()?;
        let player = match store.get_player(player_id) {
            Ok(p) => p,
            Err(RankportError::NotFound(_)) => {
                return Err(RankportError::auth(format!("player {player_id} is not registered")));
            }
            Err(e) => return Err(e),
        };
        if player.is_disqualified {
            return Err(RankportError::forbidden(format!("player {player_id} is disqualified")));
        }
        Ok(Some(player.detail()))
    }
}

/// Issue an HS256 session token. Used by the CLI and tests; production tokens
/// come from the external identity provider.
pub fn create_token(role: Role, tenant: &str, subject: &str, ttl_secs: i64, secret: &str) -> Result<String> {
    let exp = chrono::Utc::now().timestamp().saturating_add(ttl_secs).max(0) as u64;
    let claims = Claims {
        iss: Some("rankport".into()),
        sub: subject.into(),
        aud: Audience::One(tenant.into()),
        role: role.to_string(),
        exp,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| RankportError::internal(format!("Token creation failed: {e}")))
}
