//! Who is calling, and on which tenant's host.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::{COOKIE, HOST};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use rankport_core::error::{RankportError, Result};
use rankport_core::types::{ADMIN_TENANT_NAME, Role, Viewer};
use rankport_platform::{Platform, TenantPartition};

use crate::response::ApiError;
use crate::server::AppState;

/// Which surface a request's `Host` header addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostScope {
    Admin,
    Tenant(String),
}

impl HostScope {
    /// Map `host` to the admin surface or a tenant subdomain.
    pub fn from_host(host: &str, admin_hostname: &str, base_hostname: &str) -> Result<Self> {
        let host = strip_port(host).to_ascii_lowercase();
        if host == admin_hostname {
            return Ok(Self::Admin);
        }
        match host.strip_suffix(base_hostname) {
            Some(name) if !name.is_empty() && !name.contains('.') => Ok(Self::Tenant(name.to_string())),
            _ => Err(RankportError::not_found(format!("no tenant is served on host '{host}'"))),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Admin => ADMIN_TENANT_NAME,
            Self::Tenant(name) => name,
        }
    }
}

fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

/// Session cookie value from a `Cookie` header.
pub fn session_cookie(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, value)| value.to_string())
}

/// Request credentials plus host scope, extracted before the handler runs.
#[derive(Debug, Clone)]
pub struct Caller {
    pub token: Option<String>,
    pub scope: HostScope,
}

impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> std::result::Result<Self, ApiError> {
        let host = parts.headers.get(HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| parts.uri.host())
            .ok_or_else(|| RankportError::validation("missing Host header"))?;
        let scope = HostScope::from_host(host, &state.server.admin_hostname, &state.server.base_hostname)?;
        let token = session_cookie(&parts.headers, &state.cookie_name);
        Ok(Self { token, scope })
    }
}

impl Caller {
    /// Authenticate an admin on the admin host.
    pub fn admin(&self, platform: &Platform) -> Result<Viewer> {
        let viewer = platform.authority().authorize(self.token.as_deref())?;
        viewer.require_role(&[Role::Admin])?;
        viewer.require_tenant(self.scope.name())?;
        Ok(viewer)
    }

    /// Authenticate a tenant user holding one of `roles` and open their partition.
    ///
    /// Players must also be registered and in good standing.
    pub fn tenant(&self, platform: &Platform, roles: &[Role]) -> Result<(Viewer, Arc<TenantPartition>)> {
        let viewer = platform.authority().authorize(self.token.as_deref())?;
        viewer.require_role(roles)?;
        viewer.require_tenant(self.scope.name())?;
        let partition = platform.directory().resolve(self.scope.name())?;
        platform.authority().authorize_player_read(&viewer, partition.store())?;
        Ok((viewer, partition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use rankport_core::types::{CompetitionId, CompetitionRank, PlayerId};
    use rankport_platform::ViewerAuthority;
    use rankport_platform::auth::create_token;

    const ADMIN: &str = "admin.t.rankport.dev";
    const BASE: &str = ".t.rankport.dev";

    #[test]
    fn test_host_scope() {
        assert_eq!(HostScope::from_host(ADMIN, ADMIN, BASE).unwrap(), HostScope::Admin);
        assert_eq!(HostScope::from_host("admin.t.rankport.dev:3000", ADMIN, BASE).unwrap(), HostScope::Admin);
        assert_eq!(
            HostScope::from_host("Kaifu.t.rankport.dev", ADMIN, BASE).unwrap(),
            HostScope::Tenant("kaifu".into())
        );
        for bad in ["t.rankport.dev", ".t.rankport.dev", "a.b.t.rankport.dev", "example.com"] {
            assert!(matches!(HostScope::from_host(bad, ADMIN, BASE), Err(RankportError::NotFound(_))), "{bad}");
        }
    }

    #[test]
    fn test_session_cookie() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark; rankport_session=abc.def.ghi"));
        assert_eq!(session_cookie(&headers, "rankport_session").as_deref(), Some("abc.def.ghi"));
        assert_eq!(session_cookie(&headers, "other"), None);
        assert_eq!(session_cookie(&HeaderMap::new(), "rankport_session"), None);
    }

    const SECRET: &str = "caller-test-secret";

    fn player_caller(player_id: PlayerId) -> Caller {
        let token = create_token(Role::Player, "kaifu", &player_id.to_string(), 3600, SECRET).unwrap();
        Caller { token: Some(token), scope: HostScope::Tenant("kaifu".into()) }
    }

    fn open_ranking(platform: &Platform, caller: &Caller, competition_id: CompetitionId) -> Result<Vec<CompetitionRank>> {
        let (viewer, partition) = caller.tenant(platform, &[Role::Player])?;
        platform.ranking().rank(&partition, competition_id, Some(viewer.player_id()?), 0)
    }

    #[test]
    fn test_disqualified_player_cannot_rank() {
        let platform = Platform::in_memory(ViewerAuthority::from_secret(SECRET)).unwrap();
        platform.directory().provision("kaifu", "Kaifu").unwrap();
        let partition = platform.directory().resolve("kaifu").unwrap();
        let store = partition.store();
        let players = store.add_players(&["cheater".to_string(), "honest".to_string()]).unwrap();
        let competition = store.add_competition("Cup").unwrap();
        store.disqualify(players[0].id).unwrap();

        let denied = open_ranking(&platform, &player_caller(players[0].id), competition.id);
        assert!(matches!(denied, Err(RankportError::Forbidden(_))), "{denied:?}");
        assert!(open_ranking(&platform, &player_caller(players[1].id), competition.id).is_ok());

        let visitors = platform.visits().visitors(partition.id(), competition.id).unwrap();
        assert!(!visitors.contains_key(&players[0].id));
        assert!(visitors.contains_key(&players[1].id));
    }
}
