//! Domain identifiers, the viewer model and API payloads.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RankportError, Result};

pub type TenantId = u64;
pub type PlayerId = u64;
pub type CompetitionId = u64;

/// Reserved tenant scope carried by admin credentials.
pub const ADMIN_TENANT_NAME: &str = "admin";

/// Who is calling. Closed set, checked once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Organizer,
    Player,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Organizer => "organizer",
            Role::Player => "player",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RankportError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "admin" => Ok(Role::Admin),
            "organizer" => Ok(Role::Organizer),
            "player" => Ok(Role::Player),
            other => Err(RankportError::auth(format!("unknown role: {other}"))),
        }
    }
}

/// An authorized caller: role, the tenant its credential is scoped to, and subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub role: Role,
    pub tenant_scope: String,
    pub subject: String,
}

impl Viewer {
    /// Fails `Forbidden` unless the credential is scoped to `tenant_name`.
    pub fn require_tenant(&self, tenant_name: &str) -> Result<()> {
        if self.tenant_scope == tenant_name {
            Ok(())
        } else {
            Err(RankportError::forbidden(format!(
                "credential for tenant '{}' used against '{tenant_name}'",
                self.tenant_scope
            )))
        }
    }

    /// Fails `Forbidden` unless the viewer has one of `allowed`.
    pub fn require_role(&self, allowed: &[Role]) -> Result<()> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(RankportError::forbidden(format!("role {} is not permitted", self.role)))
        }
    }

    /// The subject as a player id, for player credentials.
    pub fn player_id(&self) -> Result<PlayerId> {
        self.subject
            .parse()
            .map_err(|_| RankportError::auth(format!("subject '{}' is not a player id", self.subject)))
    }
}

// ── API payloads ────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantDetail {
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerDetail {
    pub id: PlayerId,
    pub display_name: String,
    pub is_disqualified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompetitionDetail {
    pub id: CompetitionId,
    pub title: String,
    pub is_finished: bool,
}

/// One row of a submitted score sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRow {
    pub player_name: String,
    pub score: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerScoreDetail {
    pub competition_title: String,
    pub score: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingReport {
    pub competition_id: CompetitionId,
    pub competition_title: String,
    pub player_count: i64,
    pub billing_yen: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompetitionRank {
    pub rank: i64,
    pub score: i64,
    pub player_id: PlayerId,
    pub player_display_name: String,
}

/// A tenant with its total billing, for the admin listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantWithBilling {
    pub id: TenantId,
    pub name: String,
    pub display_name: String,
    pub billing: i64,
}
