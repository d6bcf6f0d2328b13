//! API route handlers for the gateway.
//!
//! Each handler authenticates through [`Caller`] and runs its engine work on the
//! blocking pool, since storage is synchronous SQLite.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::rejection::FormRejection;
use axum::extract::{Path, Query, State};
use axum::{Form, Json};
use rankport_core::error::{RankportError, Result};
use rankport_core::types::{ADMIN_TENANT_NAME, Role, TenantDetail, TenantWithBilling};
use rankport_platform::Platform;
use rankport_platform::sheet::parse_score_sheet;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::caller::{Caller, HostScope};
use crate::response::{ApiError, ApiResponse, ApiResult};
use crate::server::AppState;

type Reply = ApiResult<Json<ApiResponse>>;

/// Run engine work off the async runtime.
async fn run<T, F>(state: &Arc<AppState>, work: F) -> ApiResult<T>
where
    F: FnOnce(&Platform) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let platform = Arc::clone(&state.platform);
    tokio::task::spawn_blocking(move || work(&platform))
        .await
        .map_err(|e| ApiError(RankportError::internal(format!("engine task failed: {e}"))))?
        .map_err(ApiError)
}

/// Body of an admin tenant creation.
#[derive(Debug, Deserialize)]
pub struct TenantAddForm {
    pub name: String,
    pub display_name: String,
}

/// Body of an organizer competition creation.
#[derive(Debug, Deserialize)]
pub struct CompetitionAddForm {
    pub title: String,
}

/// A decoded form, checked only once the caller is authenticated.
type FormBody<T> = std::result::Result<Form<T>, FormRejection>;

fn form_body<T>(form: FormBody<T>) -> std::result::Result<T, String> {
    form.map(|Form(body)| body).map_err(|e| e.body_text())
}

fn bad_form(reason: String) -> RankportError {
    RankportError::validation(format!("malformed form body: {reason}"))
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "rankport-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Session introspection. Never fails because of a missing or bad cookie.
pub async fn me(State(state): State<Arc<AppState>>, caller: Caller) -> Reply {
    let data = run(&state, move |platform| {
        let tenant = match &caller.scope {
            HostScope::Admin => TenantDetail {
                name: ADMIN_TENANT_NAME.into(),
                display_name: ADMIN_TENANT_NAME.into(),
            },
            HostScope::Tenant(name) => platform.center().find_tenant_by_name(name)?
                .ok_or_else(|| RankportError::not_found(format!("tenant '{name}'")))?
                .detail(),
        };

        let viewer = match platform.authority().authorize(caller.token.as_deref()) {
            Ok(v) if v.tenant_scope == caller.scope.name() => v,
            _ => return Ok(json!({ "tenant": tenant, "me": null, "role": "none", "logged_in": false })),
        };

        let me = if viewer.role == Role::Player {
            let partition = platform.directory().resolve(caller.scope.name())?;
            match viewer.player_id().and_then(|id| partition.store().get_player(id)) {
                Ok(player) => Some(player.detail()),
                Err(RankportError::Auth(_) | RankportError::NotFound(_)) => {
                    return Ok(json!({ "tenant": tenant, "me": null, "role": "none", "logged_in": false }));
                }
                Err(e) => return Err(e),
            }
        } else {
            None
        };
        Ok(json!({ "tenant": tenant, "me": me, "role": viewer.role, "logged_in": true }))
    }).await?;
    Ok(ApiResponse::ok(data))
}

// ── Admin ────────────────────────────────────

pub async fn admin_add_tenant(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    form: FormBody<TenantAddForm>,
) -> Reply {
    let form = form_body(form);
    let data = run(&state, move |platform| {
        caller.admin(platform)?;
        let form = form.map_err(bad_form)?;
        let tenant = platform.directory().provision(&form.name, &form.display_name)?;
        let created = TenantWithBilling {
            id: tenant.id,
            name: tenant.name,
            display_name: tenant.display_name,
            billing: 0,
        };
        Ok(json!({ "tenant": created }))
    }).await?;
    Ok(ApiResponse::ok(data))
}

pub async fn admin_tenants_billing(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Query(params): Query<HashMap<String, String>>,
) -> Reply {
    let data = run(&state, move |platform| {
        caller.admin(platform)?;
        let before = params.get("before").map(String::as_str).filter(|s| !s.is_empty());
        let tenants = platform.billing().tenant_totals(platform.directory(), before)?;
        Ok(json!({ "tenants": tenants }))
    }).await?;
    Ok(ApiResponse::ok(data))
}

// ── Organizer ────────────────────────────────────

pub async fn organizer_players(State(state): State<Arc<AppState>>, caller: Caller) -> Reply {
    let data = run(&state, move |platform| {
        let (_, partition) = caller.tenant(platform, &[Role::Organizer])?;
        let players: Vec<_> = partition.store().list_players()?.iter().map(|p| p.detail()).collect();
        Ok(json!({ "players": players }))
    }).await?;
    Ok(ApiResponse::ok(data))
}

pub async fn organizer_add_players(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    form: FormBody<Vec<(String, String)>>,
) -> Reply {
    let form = form_body(form);
    let data = run(&state, move |platform| {
        let (_, partition) = caller.tenant(platform, &[Role::Organizer])?;
        let names: Vec<String> = form.map_err(bad_form)?
            .into_iter()
            .filter(|(key, _)| key == "display_name")
            .map(|(_, name)| name)
            .collect();
        let players = partition.store().add_players(&names)?;
        tracing::info!("tenant '{}' added {} players", partition.name(), players.len());
        Ok(json!({ "players": players }))
    }).await?;
    Ok(ApiResponse::ok(data))
}

pub async fn organizer_disqualify(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(player_id): Path<String>,
) -> Reply {
    let data = run(&state, move |platform| {
        let (_, partition) = caller.tenant(platform, &[Role::Organizer])?;
        let player = partition.store().disqualify(parse_id(&player_id, "player")?)?;
        Ok(json!({ "player": player }))
    }).await?;
    Ok(ApiResponse::ok(data))
}

pub async fn organizer_add_competition(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    form: FormBody<CompetitionAddForm>,
) -> Reply {
    let form = form_body(form);
    let data = run(&state, move |platform| {
        let (_, partition) = caller.tenant(platform, &[Role::Organizer])?;
        let form = form.map_err(bad_form)?;
        let competition = partition.store().add_competition(&form.title)?;
        Ok(json!({ "competition": competition.detail() }))
    }).await?;
    Ok(ApiResponse::ok(data))
}

pub async fn organizer_finish_competition(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(competition_id): Path<String>,
) -> Reply {
    run(&state, move |platform| {
        let (_, partition) = caller.tenant(platform, &[Role::Organizer])?;
        let competition = partition.store().finish_competition(parse_id(&competition_id, "competition")?)?;
        tracing::info!("tenant '{}' finished competition {}", partition.name(), competition.id);
        Ok(())
    }).await?;
    Ok(ApiResponse::done())
}

pub async fn organizer_submit_scores(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(competition_id): Path<String>,
    body: String,
) -> Reply {
    let data = run(&state, move |platform| {
        let (_, partition) = caller.tenant(platform, &[Role::Organizer])?;
        let competition_id = parse_id(&competition_id, "competition")?;
        let rows = parse_score_sheet(&body)?;
        let stored = partition.store().replace_scores(competition_id, &rows)?;
        Ok(json!({ "rows": stored }))
    }).await?;
    Ok(ApiResponse::ok(data))
}

pub async fn organizer_billing(State(state): State<Arc<AppState>>, caller: Caller) -> Reply {
    let data = run(&state, move |platform| {
        let (_, partition) = caller.tenant(platform, &[Role::Organizer])?;
        let reports = platform.billing().tenant_report(&partition)?;
        Ok(json!({ "reports": reports }))
    }).await?;
    Ok(ApiResponse::ok(data))
}

pub async fn organizer_competitions(State(state): State<Arc<AppState>>, caller: Caller) -> Reply {
    competitions_for(state, caller, Role::Organizer).await
}

// ── Player ────────────────────────────────────

pub async fn player_detail(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(player_id): Path<String>,
) -> Reply {
    let data = run(&state, move |platform| {
        let (_, partition) = caller.tenant(platform, &[Role::Player])?;
        let player_id = parse_id(&player_id, "player")?;
        let player = partition.store().get_player(player_id)?;
        let scores = partition.store().player_scores(player_id)?;
        Ok(json!({ "player": player.detail(), "scores": scores }))
    }).await?;
    Ok(ApiResponse::ok(data))
}

pub async fn player_ranking(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(competition_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Reply {
    let data = run(&state, move |platform| {
        let (viewer, partition) = caller.tenant(platform, &[Role::Player])?;
        let competition_id = parse_id(&competition_id, "competition")?;
        let rank_after = match params.get("rank_after").map(String::as_str) {
            None | Some("") => 0,
            Some(raw) => raw.parse::<usize>()
                .map_err(|_| RankportError::validation(format!("invalid rank_after: {raw:?}")))?,
        };
        let ranks = platform.ranking().rank(&partition, competition_id, Some(viewer.player_id()?), rank_after)?;
        let competition = partition.store().get_competition(competition_id)?;
        Ok(json!({ "competition": competition.detail(), "ranks": ranks }))
    }).await?;
    Ok(ApiResponse::ok(data))
}

pub async fn player_competitions(State(state): State<Arc<AppState>>, caller: Caller) -> Reply {
    competitions_for(state, caller, Role::Player).await
}

async fn competitions_for(state: Arc<AppState>, caller: Caller, role: Role) -> Reply {
    let data = run(&state, move |platform| {
        let (_, partition) = caller.tenant(platform, &[role])?;
        let mut competitions: Vec<_> = partition.store().list_competitions()?;
        competitions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let competitions: Vec<_> = competitions.iter().map(|c| c.detail()).collect();
        Ok(json!({ "competitions": competitions }))
    }).await?;
    Ok(ApiResponse::ok(data))
}

/// Path ids that don't parse can't name anything.
fn parse_id(raw: &str, what: &str) -> Result<u64> {
    raw.parse::<u64>()
        .map_err(|_| RankportError::not_found(format!("{what} {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("42", "player").unwrap(), 42);
        assert!(matches!(parse_id("abc", "player"), Err(RankportError::NotFound(_))));
    }
}
