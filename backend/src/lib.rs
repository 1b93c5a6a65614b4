use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use draw_core::{exclusion_key, ExclusionError, ExclusionSet, Pairing, ParticipantId};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

mod config;
mod draw;

pub use config::{Config, ConfigError, DEFAULT_MIN_PARTICIPANTS};
pub use draw::{perform_draw, DrawError, DrawOutcome};

#[derive(Clone)]
pub struct AppState {
    groups: Arc<RwLock<HashMap<String, GroupRecord>>>,
    config: Arc<Config>,
    /// Held across snapshot-then-write so snapshots land on disk in order.
    persist_lock: Arc<Mutex<()>>,
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("could not read snapshot {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("snapshot {} is corrupt, refusing to overwrite it: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            groups: Arc::new(RwLock::new(HashMap::new())),
            config: Arc::new(config),
            persist_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Like [`AppState::new`], but first loads the snapshot at
    /// `config.persist_path` if one exists.
    ///
    /// An unreadable snapshot is an error rather than an empty start, since the
    /// next write would replace it.
    pub async fn load(config: Config) -> Result<Self, StateError> {
        let state = Self::new(config);
        let Some(path) = state.config.persist_path.clone() else {
            return Ok(state);
        };
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(state),
            Err(source) => return Err(StateError::Read { path, source }),
        };
        let saved: HashMap<String, GroupRecord> = match serde_json::from_slice(&bytes) {
            Ok(saved) => saved,
            Err(source) => return Err(StateError::Corrupt { path, source }),
        };
        info!(path = %path.display(), groups = saved.len(), "loaded snapshot");
        *state.groups.write().await = saved;
        Ok(state)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    async fn persist(&self) {
        let Some(path) = &self.config.persist_path else {
            return;
        };
        let _guard = self.persist_lock.lock().await;
        let snapshot = {
            let groups = self.groups.read().await;
            groups.clone()
        };
        let json = match serde_json::to_vec_pretty(&snapshot) {
            Ok(json) => json,
            Err(err) => {
                error!(%err, "could not serialize snapshot");
                return;
            }
        };
        // Write beside the target and rename over it, so a crash never leaves
        // a half-written snapshot behind.
        let staging = staging_path(path);
        if let Err(err) = tokio::fs::write(&staging, json).await {
            error!(path = %staging.display(), %err, "persist error");
            return;
        }
        if let Err(err) = tokio::fs::rename(&staging, path).await {
            error!(path = %path.display(), %err, "persist error");
        }
    }
}

fn staging_path(path: &FsPath) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: String,
    pub name: String,
    pub organizer_token: String,
    pub participants: Vec<ParticipantRecord>,
    /// Directed `"giver-receiver"` keys; only `true` entries are in force.
    #[serde(default)]
    pub exclusions: BTreeMap<String, bool>,
    #[serde(default)]
    pub pairing: Option<Pairing<ParticipantId>>,
    #[serde(default)]
    pub drawn: bool,
    #[serde(default)]
    pub drawn_at: Option<u64>,
}

impl GroupRecord {
    pub fn participant_ids(&self) -> Vec<ParticipantId> {
        self.participants.iter().map(|p| p.id.clone()).collect()
    }

    pub fn active_exclusion_keys(&self) -> impl Iterator<Item = &String> {
        active_keys(&self.exclusions)
    }

    fn exclusion_set(&self) -> Result<ExclusionSet<ParticipantId>, ExclusionError> {
        ExclusionSet::from_keys(self.active_exclusion_keys(), &self.participant_ids())
    }

    fn participant(&self, id: &str) -> Option<&ParticipantRecord> {
        self.participants.iter().find(|p| p.id == id)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub id: ParticipantId,
    pub name: String,
    pub joined_at: u64,
}

fn active_keys(exclusions: &BTreeMap<String, bool>) -> impl Iterator<Item = &String> {
    exclusions
        .iter()
        .filter(|(_, in_force)| **in_force)
        .map(|(key, _)| key)
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/group", post(create_group))
        .route("/group/:id", get(get_group))
        .route("/group/:id/join", post(join_group))
        .route(
            "/group/:id/exclusion",
            post(add_exclusion).delete(remove_exclusion),
        )
        .route("/group/:id/draw", post(draw_group))
        .route("/group/:id/assignment/:participant_id", get(get_assignment))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn organizer_authorized(
    headers: &HeaderMap,
    group: &GroupRecord,
) -> Result<(), (StatusCode, &'static str)> {
    let Some(token) = headers.get("x-organizer-token").and_then(|v| v.to_str().ok()) else {
        return Err((StatusCode::UNAUTHORIZED, "organizer token required"));
    };
    if token != group.organizer_token {
        return Err((StatusCode::UNAUTHORIZED, "invalid organizer token"));
    }
    Ok(())
}

#[derive(Deserialize)]
struct CreateGroupRequest {
    name: String,
}

#[derive(Serialize)]
struct CreateGroupResponse {
    group_id: String,
    organizer_token: String,
}

#[derive(Deserialize)]
struct JoinRequest {
    name: String,
}

#[derive(Serialize)]
struct JoinResponse {
    participant_id: ParticipantId,
}

#[derive(Deserialize)]
struct ExclusionRequest {
    giver: ParticipantId,
    receiver: ParticipantId,
    #[serde(default)]
    mutual: bool,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq, PartialOrd, Ord)]
struct ExclusionView {
    giver: ParticipantId,
    receiver: ParticipantId,
}

#[derive(Serialize)]
struct ExclusionsResponse {
    exclusions: Vec<ExclusionView>,
}

#[derive(Deserialize)]
struct DrawParams {
    seed: Option<u64>,
}

#[derive(Serialize)]
struct AssignmentResponse {
    giver: ParticipantId,
    receiver: ParticipantId,
    receiver_name: String,
}

/// What anyone may see of a group. Never includes the pairing.
#[derive(Clone, Debug, Serialize)]
struct GroupView {
    id: String,
    name: String,
    participants: Vec<ParticipantRecord>,
    exclusions: Vec<ExclusionView>,
    drawn: bool,
    drawn_at: Option<u64>,
}

fn exclusion_views(set: &ExclusionSet<ParticipantId>) -> Vec<ExclusionView> {
    let mut views: Vec<ExclusionView> = set
        .pairs()
        .map(|(giver, receiver)| ExclusionView {
            giver: giver.clone(),
            receiver: receiver.clone(),
        })
        .collect();
    views.sort();
    views
}

fn to_view(group: &GroupRecord) -> Result<GroupView, ExclusionError> {
    Ok(GroupView {
        id: group.id.clone(),
        name: group.name.clone(),
        participants: group.participants.clone(),
        exclusions: exclusion_views(&group.exclusion_set()?),
        drawn: group.drawn,
        drawn_at: group.drawn_at,
    })
}

async fn create_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateGroupRequest>,
) -> impl IntoResponse {
    let provided = headers
        .get("x-admin-password")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if provided != state.config.admin_password {
        return (StatusCode::UNAUTHORIZED, "invalid admin password").into_response();
    }

    let name = payload.name.trim();
    if name.is_empty() {
        return (StatusCode::BAD_REQUEST, "name required").into_response();
    }

    let group_id = Uuid::new_v4().to_string();
    let organizer_token = Uuid::new_v4().to_string();
    let record = GroupRecord {
        id: group_id.clone(),
        name: name.to_string(),
        organizer_token: organizer_token.clone(),
        participants: Vec::new(),
        exclusions: BTreeMap::new(),
        pairing: None,
        drawn: false,
        drawn_at: None,
    };

    state.groups.write().await.insert(group_id.clone(), record);
    info!(group_id = %group_id, "group created");
    state.persist().await;

    (
        StatusCode::CREATED,
        Json(CreateGroupResponse {
            group_id,
            organizer_token,
        }),
    )
        .into_response()
}

async fn get_group(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> impl IntoResponse {
    let groups = state.groups.read().await;
    let Some(group) = groups.get(&group_id) else {
        return (StatusCode::NOT_FOUND, "group not found").into_response();
    };

    match to_view(group) {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(err) => {
            error!(group_id = %group_id, %err, "group has unreadable exclusions");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

async fn join_group(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    Json(payload): Json<JoinRequest>,
) -> impl IntoResponse {
    let name = payload.name.trim();
    if name.is_empty() {
        return (StatusCode::BAD_REQUEST, "name required").into_response();
    }

    let mut groups = state.groups.write().await;
    let group = match groups.get_mut(&group_id) {
        Some(group) => group,
        None => return (StatusCode::NOT_FOUND, "group not found").into_response(),
    };

    if group.drawn {
        return (StatusCode::CONFLICT, "group already drawn").into_response();
    }

    if group.participants.iter().any(|p| p.name == name) {
        return (StatusCode::CONFLICT, "name taken").into_response();
    }

    let participant_id = Uuid::new_v4().to_string();
    group.participants.push(ParticipantRecord {
        id: participant_id.clone(),
        name: name.to_string(),
        joined_at: now_millis(),
    });

    drop(groups);
    state.persist().await;

    (StatusCode::OK, Json(JoinResponse { participant_id })).into_response()
}

async fn add_exclusion(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<ExclusionRequest>,
) -> impl IntoResponse {
    update_exclusions(&state, &group_id, &headers, payload, true).await
}

async fn remove_exclusion(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<ExclusionRequest>,
) -> impl IntoResponse {
    update_exclusions(&state, &group_id, &headers, payload, false).await
}

async fn update_exclusions(
    state: &AppState,
    group_id: &str,
    headers: &HeaderMap,
    payload: ExclusionRequest,
    in_force: bool,
) -> axum::response::Response {
    let mut groups = state.groups.write().await;
    let group = match groups.get_mut(group_id) {
        Some(group) => group,
        None => return (StatusCode::NOT_FOUND, "group not found").into_response(),
    };

    if let Err(rejection) = organizer_authorized(headers, group) {
        return rejection.into_response();
    }

    if group.drawn {
        return (StatusCode::CONFLICT, "group already drawn").into_response();
    }

    if payload.giver == payload.receiver {
        return (StatusCode::BAD_REQUEST, "giver and receiver must differ").into_response();
    }

    let known = |id: &str| group.participant(id).is_some();
    if !known(&payload.giver) || !known(&payload.receiver) {
        return (StatusCode::NOT_FOUND, "participant not found").into_response();
    }

    let mut keys = vec![exclusion_key(&payload.giver, &payload.receiver)];
    if payload.mutual {
        keys.push(exclusion_key(&payload.receiver, &payload.giver));
    }
    let mut updated = group.exclusions.clone();
    for key in keys {
        if in_force {
            updated.insert(key, true);
        } else {
            updated.remove(&key);
        }
    }

    // Keys that do not parse back are never stored.
    let participants = group.participant_ids();
    let exclusions = match ExclusionSet::from_keys(active_keys(&updated), &participants) {
        Ok(set) => exclusion_views(&set),
        Err(err) => {
            error!(group_id, %err, "exclusion key does not parse back");
            return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
        }
    };
    group.exclusions = updated;

    drop(groups);
    state.persist().await;

    (StatusCode::OK, Json(ExclusionsResponse { exclusions })).into_response()
}

async fn draw_group(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    headers: HeaderMap,
    Query(params): Query<DrawParams>,
) -> impl IntoResponse {
    {
        let groups = state.groups.read().await;
        let Some(group) = groups.get(&group_id) else {
            return DrawError::GroupNotFound.into_response();
        };
        if let Err(rejection) = organizer_authorized(&headers, group) {
            return rejection.into_response();
        }
    }

    match perform_draw(&state, &group_id, params.seed).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn get_assignment(
    State(state): State<AppState>,
    Path((group_id, participant_id)): Path<(String, String)>,
) -> impl IntoResponse {
    let groups = state.groups.read().await;
    let Some(group) = groups.get(&group_id) else {
        return (StatusCode::NOT_FOUND, "group not found").into_response();
    };

    if group.participant(&participant_id).is_none() {
        return (StatusCode::NOT_FOUND, "participant not found").into_response();
    }

    let Some(receiver) = group
        .pairing
        .as_ref()
        .and_then(|pairing| pairing.receiver_for(&participant_id))
    else {
        return (StatusCode::CONFLICT, "group not drawn yet").into_response();
    };

    let receiver_name = group
        .participant(receiver)
        .map(|p| p.name.clone())
        .unwrap_or_default();

    (
        StatusCode::OK,
        Json(AssignmentResponse {
            giver: participant_id.clone(),
            receiver: receiver.clone(),
            receiver_name,
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use draw_core::Solver;
    use http_body_util::BodyExt;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use serde_json::json;
    use tower::ServiceExt;

    const ADMIN: (&str, &str) = ("x-admin-password", "changeme");

    async fn json_body(res: axum::response::Response) -> serde_json::Value {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn test_app() -> (Router, AppState) {
        let state = AppState::default();
        (app(state.clone()), state)
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        headers: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        app.clone().oneshot(builder.body(body).unwrap()).await.unwrap()
    }

    /// Returns `(group_id, organizer_token)`.
    async fn create(app: &Router) -> (String, String) {
        let body = Some(json!({ "name": "office" }));
        let res = send(app, Method::POST, "/group", &[ADMIN], body).await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let body = json_body(res).await;
        (
            body["group_id"].as_str().unwrap().to_string(),
            body["organizer_token"].as_str().unwrap().to_string(),
        )
    }

    async fn join(app: &Router, group_id: &str, name: &str) -> String {
        let res = send(
            app,
            Method::POST,
            &format!("/group/{group_id}/join"),
            &[],
            Some(json!({ "name": name })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        json_body(res).await["participant_id"].as_str().unwrap().to_string()
    }

    async fn exclude(
        app: &Router,
        method: Method,
        group_id: &str,
        token: &str,
        giver: &str,
        receiver: &str,
        mutual: bool,
    ) -> axum::response::Response {
        send(
            app,
            method,
            &format!("/group/{group_id}/exclusion"),
            &[("x-organizer-token", token)],
            Some(json!({ "giver": giver, "receiver": receiver, "mutual": mutual })),
        )
        .await
    }

    async fn draw(
        app: &Router,
        group_id: &str,
        token: &str,
        query: &str,
    ) -> axum::response::Response {
        send(
            app,
            Method::POST,
            &format!("/group/{group_id}/draw{query}"),
            &[("x-organizer-token", token)],
            None,
        )
        .await
    }

    async fn group_with(app: &Router, names: &[&str]) -> (String, String, Vec<String>) {
        let (group_id, token) = create(app).await;
        let mut ids = Vec::new();
        for name in names {
            ids.push(join(app, &group_id, name).await);
        }
        (group_id, token, ids)
    }

    #[tokio::test]
    async fn create_group_requires_admin_password() {
        let (app, _) = test_app();
        let res = send(&app, Method::POST, "/group", &[], Some(json!({ "name": "office" }))).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = send(
            &app,
            Method::POST,
            "/group",
            &[("x-admin-password", "wrong")],
            Some(json!({ "name": "office" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let (group_id, token) = create(&app).await;
        assert!(!group_id.is_empty());
        assert!(!token.is_empty());
    }

    #[tokio::test]
    async fn join_rejects_duplicates_and_unknown_groups() {
        let (app, _) = test_app();
        let (group_id, _) = create(&app).await;
        join(&app, &group_id, "alice").await;

        let res = send(
            &app,
            Method::POST,
            &format!("/group/{group_id}/join"),
            &[],
            Some(json!({ "name": "alice" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::CONFLICT);

        let res = send(
            &app,
            Method::POST,
            &format!("/group/{group_id}/join"),
            &[],
            Some(json!({ "name": "   " })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = send(
            &app,
            Method::POST,
            "/group/unknown/join",
            &[],
            Some(json!({ "name": "bob" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = send(&app, Method::GET, &format!("/group/{group_id}"), &[], None).await;
        let view = json_body(res).await;
        assert_eq!(view["participants"].as_array().unwrap().len(), 1);
        assert_eq!(view["participants"][0]["name"], "alice");
        assert_eq!(view["drawn"], false);
    }

    #[tokio::test]
    async fn exclusions_are_validated_and_listed() {
        let (app, _) = test_app();
        let (group_id, token, ids) = group_with(&app, &["alice", "bob", "carol"]).await;
        let (alice, bob, carol) = (&ids[0], &ids[1], &ids[2]);

        let res = exclude(&app, Method::POST, &group_id, "nope", alice, bob, false).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = exclude(&app, Method::POST, &group_id, &token, alice, alice, false).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = exclude(&app, Method::POST, &group_id, &token, alice, "mallory", false).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = exclude(&app, Method::POST, &group_id, &token, alice, bob, true).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["exclusions"].as_array().unwrap().len(), 2);

        let res = exclude(&app, Method::POST, &group_id, &token, carol, alice, false).await;
        assert_eq!(json_body(res).await["exclusions"].as_array().unwrap().len(), 3);

        let res = exclude(&app, Method::DELETE, &group_id, &token, bob, alice, false).await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = send(&app, Method::GET, &format!("/group/{group_id}"), &[], None).await;
        let view = json_body(res).await;
        let mut pairs: Vec<(String, String)> = view["exclusions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| {
                (
                    e["giver"].as_str().unwrap().to_string(),
                    e["receiver"].as_str().unwrap().to_string(),
                )
            })
            .collect();
        pairs.sort();
        let mut expected = vec![(alice.clone(), bob.clone()), (carol.clone(), alice.clone())];
        expected.sort();
        assert_eq!(pairs, expected);
    }

    #[tokio::test]
    async fn draw_requires_organizer_and_enough_participants() {
        let (app, _) = test_app();
        let (group_id, token, _) = group_with(&app, &["alice", "bob"]).await;

        let res = send(&app, Method::POST, &format!("/group/{group_id}/draw"), &[], None).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = draw(&app, &group_id, &token, "").await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = draw(&app, "unknown", &token, "").await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn seeded_draw_is_reproducible_and_one_shot() {
        let (app, state) = test_app();
        let (group_id, token, ids) = group_with(&app, &["alice", "bob", "carol", "dave"]).await;
        exclude(&app, Method::POST, &group_id, &token, &ids[0], &ids[1], true).await;

        let res = draw(&app, &group_id, &token, "?seed=42").await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["participants"], 4);

        {
            let groups = state.groups.read().await;
            let group = groups.get(&group_id).unwrap();
            assert!(group.drawn);
            assert!(group.drawn_at.is_some());

            let participants = group.participant_ids();
            let exclusions =
                ExclusionSet::from_keys(group.active_exclusion_keys(), &participants).unwrap();
            let pairing = group.pairing.as_ref().unwrap();
            pairing.verify(&participants, &exclusions).unwrap();

            let expected = Solver::new(state.config().solver)
                .solve(&participants, &exclusions, &mut ChaCha8Rng::seed_from_u64(42))
                .unwrap();
            assert_eq!(pairing, &expected);
        }

        let res = draw(&app, &group_id, &token, "?seed=7").await;
        assert_eq!(res.status(), StatusCode::CONFLICT);

        let res = send(
            &app,
            Method::POST,
            &format!("/group/{group_id}/join"),
            &[],
            Some(json!({ "name": "erin" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::CONFLICT);

        let res = exclude(&app, Method::POST, &group_id, &token, &ids[2], &ids[3], false).await;
        assert_eq!(res.status(), StatusCode::CONFLICT);

        let res = send(&app, Method::GET, &format!("/group/{group_id}"), &[], None).await;
        let view = json_body(res).await;
        assert_eq!(view["drawn"], true);
        assert!(view.get("pairing").is_none());
    }

    #[tokio::test]
    async fn assignment_lookup_names_the_receiver() {
        let (app, _) = test_app();
        let (group_id, token, ids) = group_with(&app, &["alice", "bob", "carol"]).await;

        let uri = format!("/group/{group_id}/assignment/{}", ids[0]);
        let res = send(&app, Method::GET, &uri, &[], None).await;
        assert_eq!(res.status(), StatusCode::CONFLICT);

        exclude(&app, Method::POST, &group_id, &token, &ids[0], &ids[1], false).await;
        assert_eq!(draw(&app, &group_id, &token, "").await.status(), StatusCode::OK);

        // alice cannot give to bob, so with three people she gives to carol.
        let res = send(&app, Method::GET, &uri, &[], None).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["giver"].as_str().unwrap(), ids[0]);
        assert_eq!(body["receiver"].as_str().unwrap(), ids[2]);
        assert_eq!(body["receiver_name"], "carol");

        let res = send(
            &app,
            Method::GET,
            &format!("/group/{group_id}/assignment/stranger"),
            &[],
            None,
        )
        .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn infeasible_draw_leaves_group_untouched() {
        let (app, state) = test_app();
        let (group_id, token, ids) = group_with(&app, &["alice", "bob", "carol"]).await;
        exclude(&app, Method::POST, &group_id, &token, &ids[0], &ids[1], false).await;
        exclude(&app, Method::POST, &group_id, &token, &ids[0], &ids[2], false).await;

        let res = draw(&app, &group_id, &token, "?seed=1").await;
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

        {
            let groups = state.groups.read().await;
            let group = groups.get(&group_id).unwrap();
            assert!(!group.drawn);
            assert!(group.pairing.is_none());
            assert!(group.drawn_at.is_none());
            assert_eq!(group.participants.len(), 3);
            assert_eq!(group.active_exclusion_keys().count(), 2);
        }

        let res = exclude(&app, Method::DELETE, &group_id, &token, &ids[0], &ids[2], false).await;
        assert_eq!(res.status(), StatusCode::OK);
        let res = draw(&app, &group_id, &token, "?seed=1").await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn concurrent_draws_have_one_winner() {
        let (app, state) = test_app();
        let names = ["alice", "bob", "carol", "dave", "erin"];
        let (group_id, token, _) = group_with(&app, &names).await;

        let (first, second) = tokio::join!(
            draw(&app, &group_id, &token, "?seed=1"),
            draw(&app, &group_id, &token, "?seed=2"),
        );
        let mut statuses = vec![first.status(), second.status()];
        statuses.sort();
        assert_eq!(statuses, vec![StatusCode::OK, StatusCode::CONFLICT]);

        let groups = state.groups.read().await;
        assert!(groups.get(&group_id).unwrap().pairing.is_some());
    }

    #[tokio::test]
    async fn perform_draw_reports_error_kinds() {
        let state = AppState::default();
        assert!(matches!(
            perform_draw(&state, "missing", None).await,
            Err(DrawError::GroupNotFound)
        ));

        let app = app(state.clone());
        let (group_id, _, _) = group_with(&app, &["alice", "bob"]).await;
        let err = perform_draw(&state, &group_id, None).await.unwrap_err();
        assert!(matches!(
            err,
            DrawError::InsufficientParticipants {
                required: 3,
                found: 2
            }
        ));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn persistence_writes_and_loads_groups() {
        let path = std::env::temp_dir().join(format!("secret_santa_{}.json", Uuid::new_v4()));
        let config = Config {
            persist_path: Some(path.clone()),
            ..Config::default()
        };
        let state = AppState::load(config.clone()).await.unwrap();
        let app = app(state.clone());

        let (group_id, token, ids) = group_with(&app, &["alice", "bob", "carol"]).await;
        exclude(&app, Method::POST, &group_id, &token, &ids[1], &ids[2], false).await;
        assert_eq!(draw(&app, &group_id, &token, "?seed=3").await.status(), StatusCode::OK);
        assert!(tokio::fs::metadata(&path).await.is_ok());

        let raw: serde_json::Value =
            serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        let stored = &raw[&group_id];
        assert_eq!(stored["exclusions"][format!("{}-{}", ids[1], ids[2])], true);
        assert_eq!(stored["pairing"].as_object().unwrap().len(), 3);

        let loaded = AppState::load(config).await.unwrap();
        let groups = loaded.groups.read().await;
        let group = groups.get(&group_id).unwrap();
        assert!(group.drawn);
        assert_eq!(group.pairing, state.groups.read().await.get(&group_id).unwrap().pairing);
        assert!(tokio::fs::metadata(staging_path(&path)).await.is_err());

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_refused_and_kept() {
        let path = std::env::temp_dir().join(format!("secret_santa_{}.json", Uuid::new_v4()));
        tokio::fs::write(&path, br#"{"important": trunc"#).await.unwrap();
        let config = Config {
            persist_path: Some(path.clone()),
            ..Config::default()
        };

        let err = AppState::load(config).await.err().unwrap();
        assert!(matches!(err, StateError::Corrupt { .. }));
        assert_eq!(
            tokio::fs::read(&path).await.unwrap(),
            br#"{"important": trunc"#.to_vec()
        );

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn snapshot_tracks_memory_under_concurrent_writes() {
        let path = std::env::temp_dir().join(format!("secret_santa_{}.json", Uuid::new_v4()));
        let config = Config {
            persist_path: Some(path.clone()),
            ..Config::default()
        };
        let state = AppState::load(config.clone()).await.unwrap();
        let app = app(state.clone());
        let (group_id, token, _) = group_with(&app, &["alice", "bob", "carol"]).await;

        // Joins racing the draw may land before it (200) or after it (409).
        let join_uri = format!("/group/{group_id}/join");
        let (_, _, _, drawn) = tokio::join!(
            send(&app, Method::POST, &join_uri, &[], Some(json!({ "name": "dave" }))),
            send(&app, Method::POST, &join_uri, &[], Some(json!({ "name": "erin" }))),
            send(&app, Method::POST, &join_uri, &[], Some(json!({ "name": "frank" }))),
            draw(&app, &group_id, &token, "?seed=5"),
        );

        let loaded = AppState::load(config).await.unwrap();
        let on_disk = loaded.groups.read().await.get(&group_id).cloned().unwrap();
        let in_memory = state.groups.read().await.get(&group_id).cloned().unwrap();
        assert_eq!(on_disk.drawn, drawn.status() == StatusCode::OK);
        assert_eq!(on_disk.drawn, in_memory.drawn);
        assert_eq!(on_disk.pairing, in_memory.pairing);
        assert_eq!(on_disk.participants.len(), in_memory.participants.len());

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn unparseable_exclusion_is_not_stored() {
        let state = AppState::default();
        let participants = ["a", "b-c", "a-b", "c"]
            .into_iter()
            .map(|id| ParticipantRecord {
                id: id.to_string(),
                name: id.to_string(),
                joined_at: 0,
            })
            .collect();
        state.groups.write().await.insert(
            "g".to_string(),
            GroupRecord {
                id: "g".to_string(),
                name: "odd ids".to_string(),
                organizer_token: "t".to_string(),
                participants,
                exclusions: BTreeMap::new(),
                pairing: None,
                drawn: false,
                drawn_at: None,
            },
        );
        let app = app(state.clone());

        // "a-b-c" splits both as (a, b-c) and as (a-b, c).
        let res = exclude(&app, Method::POST, "g", "t", "a", "b-c", false).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(state.groups.read().await["g"].exclusions.is_empty());

        let res = send(&app, Method::GET, "/group/g", &[], None).await;
        assert_eq!(res.status(), StatusCode::OK);
    }
}
