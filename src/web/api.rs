//! REST API 和事件流处理函数

use super::AppState;
use crate::error::MonitorError;
use crate::health::{ProbeResult, SchedulingState, Target, TargetId};
use crate::history::HistoryStats;
use crate::hub::Topic;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
};
use futures::{stream, Stream};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// 事件流中的事件名称
pub const STATUS_EVENT: &str = "target:status";

/// API错误，序列化为 `{"error": "..."}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        let status = match &err {
            MonitorError::TargetNotFound { .. } => StatusCode::NOT_FOUND,
            MonitorError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            _ => {
                error!("API请求处理失败: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: &self.message,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// 目标及其最近状态
#[derive(Debug, Serialize, Deserialize)]
pub struct TargetView {
    #[serde(flatten)]
    pub target: Target,
    pub scheduling: SchedulingState,
    pub latest: Option<ProbeResult>,
}

/// 推送给观察者的消息
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: TargetId,
    pub status: ProbeResult,
}

impl StatusMessage {
    pub fn new(result: ProbeResult) -> Self {
        Self {
            kind: STATUS_EVENT.to_string(),
            id: result.target_id,
            status: result,
        }
    }
}

/// 存活检查响应
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: i64,
    pub running: bool,
    pub targets: usize,
    pub subscribers: usize,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    limit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    target: Option<String>,
}

fn parse_id(raw: &str) -> ApiResult<TargetId> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("无效的目标ID: {}", raw)))
}

fn parse_limit(query: &LimitQuery) -> ApiResult<Option<usize>> {
    query
        .limit
        .as_deref()
        .map(|raw| {
            raw.parse()
                .map_err(|_| ApiError::bad_request(format!("无效的limit参数: {}", raw)))
        })
        .transpose()
}

async fn target_view(state: &AppState, target: Target) -> ApiResult<TargetView> {
    let id = target.id;
    Ok(TargetView {
        target,
        scheduling: state.monitor.scheduling_state(id).await?,
        latest: state.monitor.latest(id).await?,
    })
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let uptime = chrono::Utc::now() - state.started_at;
    Ok(Json(HealthResponse {
        status: "ok",
        version: crate::VERSION,
        uptime_seconds: uptime.num_seconds(),
        running: state.monitor.is_running().await,
        targets: state.monitor.targets().await?.len(),
        subscribers: state.monitor.hub().subscriber_count().await,
    }))
}

/// GET /api/v1/targets
pub async fn list_targets(State(state): State<AppState>) -> ApiResult<Json<Vec<TargetView>>> {
    let mut views = Vec::new();
    for target in state.monitor.targets().await? {
        views.push(target_view(&state, target).await?);
    }
    Ok(Json(views))
}

/// GET /api/v1/targets/{id}
pub async fn get_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<TargetView>> {
    let target = state.monitor.target(parse_id(&id)?).await?;
    Ok(Json(target_view(&state, target).await?))
}

/// GET /api/v1/targets/{id}/history?limit=N
pub async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Vec<ProbeResult>>> {
    let id = parse_id(&id)?;
    let limit = parse_limit(&query)?;
    Ok(Json(state.monitor.history(id, limit).await?))
}

/// GET /api/v1/targets/{id}/stats?limit=N
pub async fn get_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<HistoryStats>> {
    let id = parse_id(&id)?;
    let limit = parse_limit(&query)?;
    Ok(Json(state.monitor.stats(id, limit).await?))
}

/// POST /api/v1/targets/{id}/check
///
/// 检测在后台执行，结果通过事件流和历史获取
pub async fn trigger_check(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    state.monitor.request_check(id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "id": id, "queued": true })),
    ))
}

/// GET /api/v1/events[?target=id]
pub async fn events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    let topic = match query.target.as_deref() {
        Some(raw) => Topic::Target(parse_id(raw)?),
        None => Topic::All,
    };

    let subscription = state.monitor.subscribe(topic).await?;
    debug!(subscription = %subscription.id(), "事件流已连接");

    // 客户端断开时流被丢弃，订阅随之失效
    let stream = stream::unfold(subscription, |mut subscription| async move {
        let result = subscription.recv().await?;
        let event = Event::default()
            .event(STATUS_EVENT)
            .json_data(StatusMessage::new(result));
        Some((event, subscription))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
