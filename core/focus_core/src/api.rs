use crate::activity::{
    complete_activity, prune_expired, start_activity, stop_activity, LifecycleError,
};
use crate::category::find_category;
use crate::decision::{decide, navigation_target, Decision};
use crate::domain::resolve_domain;
use crate::model::{
    ActiveActivity, Activity, TaskFolder, TaskHistoryEntry, UsageLedger, KEY_ACTIVE_ACTIVITIES,
    KEY_ACTIVITIES, KEY_TASK_FOLDERS, KEY_TASK_HISTORY, KEY_TRACKER_DATA, KNOWN_RECORD_KEYS,
};
use crate::store::{
    check_record_shape, get_record, get_record_json, get_record_strict, load_tracking_status,
    put_record, set_tracking_pause, set_tracking_resume, tracking_is_paused, Store,
};
use crate::tabs::{ActiveTab, TabBridge};
use crate::tick::{local_today, now_ms};
use crate::usage::{count_suppressed, credit_seconds, day_summary, history_summary};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub tabs: Arc<TabBridge>,
    pub blocked_page: Arc<str>,
}

#[derive(Serialize)]
struct OkResponse<T: Serialize> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

#[derive(Serialize)]
struct ErrResponse {
    ok: bool,
    error: &'static str,
}

fn ok<T: Serialize>(data: Option<T>) -> Response {
    Json(OkResponse { ok: true, data }).into_response()
}

fn fail(status: StatusCode, error: &'static str) -> Response {
    (status, Json(ErrResponse { ok: false, error })).into_response()
}

fn db_error(op: &str, err: rusqlite::Error) -> Response {
    error!("{op} failed: {err}");
    fail(StatusCode::INTERNAL_SERVER_ERROR, "db_error")
}

fn lifecycle_error(err: LifecycleError) -> Response {
    fail(StatusCode::CONFLICT, err.code())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .route("/tab", post(post_tab).options(options_ok))
        .route("/navigation", get(get_navigation))
        .route(
            "/records/:key",
            get(get_record_handler).put(put_record_handler).options(options_ok),
        )
        .route("/decision", get(get_decision))
        .route("/activities/active", get(get_active_activities))
        .route("/activities/:id/start", post(post_activity_start).options(options_ok))
        .route("/activities/:id/stop", post(post_activity_stop).options(options_ok))
        .route(
            "/activities/:id/complete",
            post(post_activity_complete).options(options_ok),
        )
        .route("/tracking/status", get(get_tracking_status))
        .route("/tracking/pause", post(post_tracking_pause).options(options_ok))
        .route("/tracking/resume", post(post_tracking_resume).options(options_ok))
        .route("/stats/day", get(get_stats_day))
        .route("/history", get(get_history))
        .with_state(state)
        .layer(cors)
}

async fn options_ok() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Serialize)]
struct HealthInfo {
    service: &'static str,
    version: &'static str,
}

async fn health() -> Response {
    ok(Some(HealthInfo {
        service: "focus_core",
        version: env!("CARGO_PKG_VERSION"),
    }))
}

async fn post_tab(State(state): State<AppState>, Json(tab): Json<ActiveTab>) -> Response {
    state.tabs.report(tab).await;
    ok::<Value>(None)
}

async fn get_navigation(State(state): State<AppState>) -> Response {
    ok(state.tabs.take_navigation().await)
}

async fn get_record_handler(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    if !KNOWN_RECORD_KEYS.contains(&key.as_str()) {
        return fail(StatusCode::NOT_FOUND, "unknown_record");
    }
    let conn = state.store.conn().lock().await;
    match get_record_json(&conn, &key) {
        Ok(v) => ok(v),
        Err(err) => db_error("get_record_json", err),
    }
}

async fn put_record_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(value): Json<Value>,
) -> Response {
    if !KNOWN_RECORD_KEYS.contains(&key.as_str()) {
        return fail(StatusCode::NOT_FOUND, "unknown_record");
    }
    if check_record_shape(&key, &value).is_err() {
        return fail(StatusCode::BAD_REQUEST, "invalid_json");
    }
    let conn = state.store.conn().lock().await;
    match put_record(&conn, &key, &value) {
        Ok(()) => ok::<Value>(None),
        Err(err) => db_error("put_record", err),
    }
}

#[derive(Deserialize)]
struct DecisionQuery {
    url: String,
}

#[derive(Serialize)]
struct DecisionPreview {
    domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    category_id: Option<String>,
    decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    navigate_to: Option<String>,
    would_count: bool,
}

/// Dry run of one tick for `url`: nothing is counted, pruned, or navigated.
async fn get_decision(State(state): State<AppState>, Query(q): Query<DecisionQuery>) -> Response {
    let Some(domain) = resolve_domain(&q.url) else {
        return fail(StatusCode::BAD_REQUEST, "invalid_url");
    };
    let snap = match state.store.snapshot().await {
        Ok(v) => v,
        Err(err) => return db_error("snapshot", err),
    };
    let now = now_ms();
    let active = prune_expired(snap.active, now).active;
    let paused = snap.tracking.paused && snap.tracking.paused_until.map_or(true, |u| u > now);

    let category = find_category(&snap.categories, &domain);
    let decision = decide(&domain, &q.url, category, &active, &state.blocked_page);
    let navigate_to = navigation_target(&decision, &q.url, &state.blocked_page).map(str::to_string);

    ok(Some(DecisionPreview {
        category_id: category.map(|c| c.id.clone()),
        would_count: !count_suppressed(&q.url, &active, paused),
        domain,
        decision,
        navigate_to,
    }))
}

async fn get_active_activities(State(state): State<AppState>) -> Response {
    let conn = state.store.conn().lock().await;
    match get_record::<Vec<ActiveActivity>>(&conn, KEY_ACTIVE_ACTIVITIES) {
        Ok(v) => ok(Some(prune_expired(v.unwrap_or_default(), now_ms()).active)),
        Err(err) => db_error("get_record", err),
    }
}

async fn post_activity_start(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let now = now_ms();
    let conn = state.store.conn().lock().await;

    let templates: Vec<Activity> = match get_record(&conn, KEY_ACTIVITIES) {
        Ok(v) => v.unwrap_or_default(),
        Err(err) => return db_error("get_record", err),
    };
    let Some(template) = templates.iter().find(|a| a.id == id) else {
        return fail(StatusCode::NOT_FOUND, "not_found");
    };
    let stored: Vec<ActiveActivity> = match get_record_strict(&conn, KEY_ACTIVE_ACTIVITIES) {
        Ok(v) => v.unwrap_or_default(),
        Err(err) => return db_error("get_record", err),
    };

    // Drop expired copies first so a finished run does not count as "already active".
    let mut active = prune_expired(stored, now).active;
    let started = match start_activity(&mut active, template, now) {
        Ok(v) => v,
        Err(err) => return lifecycle_error(err),
    };
    if let Err(err) = put_record(&conn, KEY_ACTIVE_ACTIVITIES, &active) {
        return db_error("put_record", err);
    }
    info!("activity {} started", started.id());
    ok(Some(started))
}

async fn post_activity_stop(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let conn = state.store.conn().lock().await;
    let mut active: Vec<ActiveActivity> = match get_record_strict(&conn, KEY_ACTIVE_ACTIVITIES) {
        Ok(v) => v.unwrap_or_default(),
        Err(err) => return db_error("get_record", err),
    };
    let stopped = match stop_activity(&mut active, &id) {
        Ok(v) => v,
        Err(err) => return lifecycle_error(err),
    };
    if let Err(err) = put_record(&conn, KEY_ACTIVE_ACTIVITIES, &active) {
        return db_error("put_record", err);
    }
    info!("activity {} stopped", stopped.id());
    ok(Some(stopped))
}

async fn post_activity_complete(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let now = now_ms();
    let today = local_today();
    let conn = state.store.conn().lock().await;

    let loaded = (|| -> rusqlite::Result<_> {
        let active: Vec<ActiveActivity> =
            get_record_strict(&conn, KEY_ACTIVE_ACTIVITIES)?.unwrap_or_default();
        let history: Vec<TaskHistoryEntry> =
            get_record_strict(&conn, KEY_TASK_HISTORY)?.unwrap_or_default();
        let folders: Vec<TaskFolder> = get_record(&conn, KEY_TASK_FOLDERS)?.unwrap_or_default();
        let ledger: UsageLedger = get_record_strict(&conn, KEY_TRACKER_DATA)?.unwrap_or_default();
        Ok((active, history, folders, ledger))
    })();
    let (mut active, mut history, folders, mut ledger) = match loaded {
        Ok(v) => v,
        Err(err) => return db_error("get_record", err),
    };

    let done = match complete_activity(&mut active, &id, now, &today, &folders) {
        Ok(v) => v,
        Err(err) => return lifecycle_error(err),
    };
    credit_seconds(&mut ledger, &today, &done.entry.name, done.elapsed_seconds);
    history.push(done.entry.clone());

    let saved = put_record(&conn, KEY_ACTIVE_ACTIVITIES, &active)
        .and_then(|_| put_record(&conn, KEY_TRACKER_DATA, &ledger))
        .and_then(|_| put_record(&conn, KEY_TASK_HISTORY, &history));
    if let Err(err) = saved {
        return db_error("put_record", err);
    }
    info!("activity {id} completed after {}s", done.elapsed_seconds);
    ok(Some(done.entry))
}

async fn get_tracking_status(State(state): State<AppState>) -> Response {
    let conn = state.store.conn().lock().await;
    if let Err(err) = tracking_is_paused(&conn, now_ms()) {
        error!("tracking_is_paused failed: {err}");
    }
    match load_tracking_status(&conn) {
        Ok(status) => ok(Some(status)),
        Err(err) => db_error("load_tracking_status", err),
    }
}

#[derive(Deserialize, Default)]
struct PauseRequest {
    #[serde(default)]
    minutes: Option<i64>,
}

async fn post_tracking_pause(
    State(state): State<AppState>,
    body: Option<Json<PauseRequest>>,
) -> Response {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let paused_until = match req.minutes {
        Some(m) if m <= 0 => return fail(StatusCode::BAD_REQUEST, "invalid_minutes"),
        Some(m) => Some(now_ms().saturating_add(m.saturating_mul(60_000))),
        None => None,
    };

    let conn = state.store.conn().lock().await;
    if let Err(err) = set_tracking_pause(&conn, paused_until) {
        return db_error("set_tracking_pause", err);
    }
    info!("tracking paused");
    match load_tracking_status(&conn) {
        Ok(status) => ok(Some(status)),
        Err(err) => db_error("load_tracking_status", err),
    }
}

async fn post_tracking_resume(State(state): State<AppState>) -> Response {
    let conn = state.store.conn().lock().await;
    if let Err(err) = set_tracking_resume(&conn) {
        return db_error("set_tracking_resume", err);
    }
    info!("tracking resumed");
    match load_tracking_status(&conn) {
        Ok(status) => ok(Some(status)),
        Err(err) => db_error("load_tracking_status", err),
    }
}

#[derive(Deserialize)]
struct DateQuery {
    /// YYYY-MM-DD
    date: Option<String>,
}

fn parse_date(date: Option<String>) -> Result<Option<String>, Response> {
    match date {
        Some(d) if chrono::NaiveDate::parse_from_str(&d, "%Y-%m-%d").is_err() => {
            Err(fail(StatusCode::BAD_REQUEST, "invalid_date"))
        }
        other => Ok(other),
    }
}

async fn get_stats_day(State(state): State<AppState>, Query(q): Query<DateQuery>) -> Response {
    let date = match parse_date(q.date) {
        Ok(d) => d.unwrap_or_else(local_today),
        Err(resp) => return resp,
    };
    let conn = state.store.conn().lock().await;
    match get_record::<UsageLedger>(&conn, KEY_TRACKER_DATA) {
        Ok(ledger) => ok(Some(day_summary(&ledger.unwrap_or_default(), &date))),
        Err(err) => db_error("get_record", err),
    }
}

async fn get_history(State(state): State<AppState>, Query(q): Query<DateQuery>) -> Response {
    let date = match parse_date(q.date) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let conn = state.store.conn().lock().await;
    match get_record::<Vec<TaskHistoryEntry>>(&conn, KEY_TASK_HISTORY) {
        Ok(history) => ok(Some(history_summary(
            &history.unwrap_or_default(),
            date.as_deref(),
        ))),
        Err(err) => db_error("get_record", err),
    }
}
