//! HTTP admin API over the membership stores.

use crate::auth::{Hs256Verifier, TokenVerifier};
use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    routing::{get, put},
    Json, Router,
};
use membership_hub_core::{
    Account, AccountRef, BackendGroup, GroupRef, HubConfig, MembershipStore, MembershipType,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Authenticated caller, extracted from request headers.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub user_id: String,
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;
        // With a verifier configured only signed tokens identify the caller.
        if let Some(verifier) = &state.verifier {
            let token = headers
                .get("Authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .ok_or(StatusCode::UNAUTHORIZED)?;
            return match verifier.verify(token).await {
                Some(claims) => Ok(Self {
                    user_id: claims.sub,
                }),
                None => Err(StatusCode::UNAUTHORIZED),
            };
        }
        headers
            .get("X-User-Id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|user_id| Self {
                user_id: user_id.to_string(),
            })
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: MembershipStore,
    pub verifier: Option<Arc<dyn TokenVerifier>>,
    /// Users of this group may manage every group.
    pub admin_group: String,
}

impl AppState {
    pub fn new(store: MembershipStore, config: &HubConfig) -> Self {
        let verifier = config
            .jwt_secret
            .as_deref()
            .map(|secret| Arc::new(Hs256Verifier::new(secret)) as Arc<dyn TokenVerifier>);
        Self {
            store,
            verifier,
            admin_group: config.admin_group.clone(),
        }
    }
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    pattern: String,
    limit: Option<u32>,
    offset: Option<u32>,
}

#[derive(Deserialize)]
struct RoleParams {
    #[serde(default = "default_role")]
    role: MembershipType,
}

fn default_role() -> MembershipType {
    MembershipType::User
}

#[derive(Serialize)]
struct CountResponse {
    count: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/groups/{gid}/members", get(list_members))
        .route("/groups/{gid}/members/count", get(count_members))
        .route("/groups/{gid}/admins", get(list_admins))
        .route(
            "/groups/{gid}/members/{uid}",
            put(add_member).delete(remove_member),
        )
        .route("/accounts/{uid}/groups", get(account_groups))
        .route("/admins", get(all_admins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn internal(err: membership_hub_core::Error) -> StatusCode {
    tracing::error!(error = %err, "membership store failure");
    StatusCode::INTERNAL_SERVER_ERROR
}

fn require_group(state: &AppState, gid: &str) -> Result<BackendGroup, StatusCode> {
    state
        .store
        .groups()
        .get_group(gid)
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)
}

fn require_account(state: &AppState, uid: &str) -> Result<Account, StatusCode> {
    state
        .store
        .accounts()
        .get_by_uid(uid)
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)
}

/// Callers may change a group when they administer it or belong to the
/// super-admin group.
fn can_manage(state: &AppState, caller: &AuthContext, gid: &str) -> Result<bool, StatusCode> {
    let store = &state.store;
    if store
        .is_group_admin(&caller.user_id, gid)
        .map_err(internal)?
    {
        return Ok(true);
    }
    store
        .is_group_user(&caller.user_id, &state.admin_group)
        .map_err(internal)
}

/// Run store calls on the blocking pool; SQLite queries hold the
/// connection lock for their whole duration.
async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, StatusCode>
where
    F: FnOnce(AppState) -> Result<T, StatusCode> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(state))
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "store task failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
}

async fn list_members(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(gid): Path<String>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Account>>, StatusCode> {
    let members = blocking(&state, move |state| {
        let group = require_group(&state, &gid)?;
        state
            .store
            .search(
                &GroupRef::from(&group),
                &params.pattern,
                params.limit,
                params.offset,
            )
            .map_err(internal)
    })
    .await?;
    Ok(Json(members))
}

async fn count_members(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(gid): Path<String>,
    Query(params): Query<SearchParams>,
) -> Result<Json<CountResponse>, StatusCode> {
    let count = blocking(&state, move |state| {
        let group = require_group(&state, &gid)?;
        state
            .store
            .count_members_aggregate(
                &GroupRef::from(&group),
                &params.pattern,
                params.limit,
                params.offset,
            )
            .map_err(internal)
    })
    .await?;
    Ok(Json(CountResponse { count }))
}

async fn list_admins(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(gid): Path<String>,
) -> Result<Json<Vec<Account>>, StatusCode> {
    let admins = blocking(&state, move |state| {
        let group = require_group(&state, &gid)?;
        state
            .store
            .accounts_for_group(Some(&GroupRef::from(&group)), MembershipType::Admin)
            .map_err(internal)
    })
    .await?;
    Ok(Json(admins))
}

async fn add_member(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((gid, uid)): Path<(String, String)>,
    Query(params): Query<RoleParams>,
) -> Result<StatusCode, StatusCode> {
    let role = params.role;
    blocking(&state, move |state| {
        let group = require_group(&state, &gid)?;
        let account = require_account(&state, &uid)?;
        if !can_manage(&state, &auth, &gid)? {
            return Err(StatusCode::FORBIDDEN);
        }
        let added = state
            .store
            .add_membership(account.id, group.id, role)
            .map_err(internal)?;
        if !added {
            return Err(StatusCode::CONFLICT);
        }
        tracing::info!(caller = %auth.user_id, %gid, %uid, %role, "membership granted");
        Ok(StatusCode::CREATED)
    })
    .await
}

async fn remove_member(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((gid, uid)): Path<(String, String)>,
    Query(params): Query<RoleParams>,
) -> Result<StatusCode, StatusCode> {
    let role = params.role;
    blocking(&state, move |state| {
        let group = require_group(&state, &gid)?;
        let account = require_account(&state, &uid)?;
        if !can_manage(&state, &auth, &gid)? {
            return Err(StatusCode::FORBIDDEN);
        }
        state
            .store
            .remove_role(&AccountRef::from(&account), &GroupRef::from(&group), role)
            .map_err(internal)?;
        tracing::info!(caller = %auth.user_id, %gid, %uid, %role, "membership revoked");
        Ok(StatusCode::NO_CONTENT)
    })
    .await
}

async fn account_groups(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(uid): Path<String>,
    Query(params): Query<RoleParams>,
) -> Result<Json<Vec<BackendGroup>>, StatusCode> {
    let groups = blocking(&state, move |state| {
        let account = require_account(&state, &uid)?;
        state
            .store
            .groups_for_account(&AccountRef::from(&account), params.role)
            .map_err(internal)
    })
    .await?;
    Ok(Json(groups))
}

async fn all_admins(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<Vec<Account>>, StatusCode> {
    let admins = blocking(&state, |state| state.store.admin_accounts().map_err(internal)).await?;
    Ok(Json(admins))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{self, Body},
        http::Request,
    };
    use jsonwebtoken::{encode, EncodingKey, Header};
    use membership_hub_core::{Database, MembershipConfig, NewAccount, NewBackendGroup};
    use serde_json::json;
    use tower::util::ServiceExt;

    /// `root` administers everything through the `admin` group, `carol`
    /// administers `staff`, `alice` and `bob` are plain accounts.
    fn seeded(config: &HubConfig) -> Router {
        let store = MembershipStore::open(Database::open_in_memory().unwrap(), MembershipConfig::default());
        let mut ids = std::collections::HashMap::new();
        for (uid, name) in [
            ("root", "Root"),
            ("carol", "Carol"),
            ("alice", "Alice Adams"),
            ("bob", "Bob Brown"),
        ] {
            let account = store
                .accounts()
                .insert(NewAccount::new(uid, "Database", format!("/home/{uid}")).display_name(name))
                .unwrap();
            ids.insert(uid, account.id);
        }
        let admin = store.groups().insert(NewBackendGroup::new("admin", "Database")).unwrap();
        let staff = store.groups().insert(NewBackendGroup::new("staff", "Database")).unwrap();
        store.add_group_user(ids["root"], admin.id).unwrap();
        store.add_group_admin(ids["carol"], staff.id).unwrap();
        store.add_group_user(ids["alice"], staff.id).unwrap();
        router(AppState::new(store, config))
    }

    fn request(method: &str, uri: &str, user: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("X-User-Id", user);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let body = body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_needs_no_identity() {
        let app = seeded(&HubConfig::default());
        let resp = app.oneshot(request("GET", "/health", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_identity_is_unauthorized() {
        let app = seeded(&HubConfig::default());
        let resp = app
            .oneshot(request("GET", "/groups/staff/members", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn membership_lifecycle() {
        let app = seeded(&HubConfig::default());

        let resp = app
            .clone()
            .oneshot(request("PUT", "/groups/staff/members/bob", Some("carol")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = app
            .clone()
            .oneshot(request("PUT", "/groups/staff/members/bob", Some("carol")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = app
            .clone()
            .oneshot(request("GET", "/groups/staff/members", Some("alice")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v = json_body(resp).await;
        let uids: Vec<_> = v
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["user_id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(uids, vec!["alice", "bob"]);

        let resp = app
            .clone()
            .oneshot(request("GET", "/groups/staff/members/count?pattern=brown", Some("alice")))
            .await
            .unwrap();
        assert_eq!(json_body(resp).await, json!({ "count": 1 }));

        let resp = app
            .clone()
            .oneshot(request("DELETE", "/groups/staff/members/bob", Some("root")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = app
            .oneshot(request("GET", "/accounts/bob/groups", Some("bob")))
            .await
            .unwrap();
        assert_eq!(json_body(resp).await, json!([]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_requests_are_served_off_the_workers() {
        let app = seeded(&HubConfig::default());
        let mut tasks = Vec::new();
        for i in 0..32 {
            let app = app.clone();
            tasks.push(tokio::spawn(async move {
                let uri = if i % 2 == 0 {
                    "/groups/staff/members"
                } else {
                    "/groups/staff/members/count"
                };
                app.oneshot(request("GET", uri, Some("alice")))
                    .await
                    .unwrap()
                    .status()
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn plain_members_cannot_manage() {
        let app = seeded(&HubConfig::default());
        let resp = app
            .oneshot(request("PUT", "/groups/staff/members/bob?role=admin", Some("alice")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unknown_entities_are_not_found() {
        let app = seeded(&HubConfig::default());
        for (method, uri) in [
            ("GET", "/groups/nope/members"),
            ("GET", "/groups/nope/admins"),
            ("PUT", "/groups/staff/members/nobody"),
            ("GET", "/accounts/nobody/groups"),
        ] {
            let resp = app
                .clone()
                .oneshot(request(method, uri, Some("root")))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{method} {uri}");
        }
    }

    #[tokio::test]
    async fn admin_listings() {
        let app = seeded(&HubConfig::default());
        let resp = app
            .clone()
            .oneshot(request("GET", "/groups/staff/admins", Some("root")))
            .await
            .unwrap();
        let v = json_body(resp).await;
        assert_eq!(v[0]["user_id"], "carol");

        let resp = app
            .clone()
            .oneshot(request("GET", "/accounts/carol/groups?role=admin", Some("carol")))
            .await
            .unwrap();
        let v = json_body(resp).await;
        assert_eq!(v[0]["group_id"], "staff");

        let resp = app
            .oneshot(request("GET", "/admins", Some("root")))
            .await
            .unwrap();
        assert_eq!(json_body(resp).await.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bearer_tokens_replace_the_header_when_configured() {
        let config = HubConfig {
            jwt_secret: Some("secret".into()),
            ..HubConfig::default()
        };
        let app = seeded(&config);

        // header identity is ignored
        let resp = app
            .clone()
            .oneshot(request("PUT", "/groups/staff/members/bob", Some("root")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let token = encode(
            &Header::default(),
            &json!({ "sub": "root" }),
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        let req = Request::builder()
            .method("PUT")
            .uri("/groups/staff/members/bob")
            .header("Authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
    }
}
