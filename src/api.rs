//! HTTP surface: channel and video CRUD, sync triggers and scraper debug
//! endpoints. Handlers stay thin; everything with behaviour lives in
//! [`SyncEngine`].

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::error::{ScrapeError, SyncError};
use crate::feed::ParsedFeed;
use crate::models::{Category, Channel, SortType, Video, sort_videos};
use crate::scrape::{ChannelInfo, VideoMetadata};
use crate::sync::{ChannelOutcome, SyncEngine};

/// Path segment that addresses every channel at once.
const ALL_CHANNELS: &str = "all";

#[derive(Clone)]
pub struct AppState {
    engine: SyncEngine,
}

impl AppState {
    pub fn new(engine: SyncEngine) -> Self {
        Self { engine }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/videos", get(list_videos))
        .route("/videos/{id}", axum::routing::delete(delete_video))
        .route("/videos/{id}/watch-later", post(add_to_watch_later))
        .route("/channels", get(list_channels).post(subscribe_by_url))
        .route(
            "/channels/{id}",
            get(get_channel)
                .post(subscribe)
                .put(sync_channel)
                .delete(unsubscribe),
        )
        .route("/api/{category}/{channel_id}/{sort}", get(query_videos))
        .route("/debug/video/{id}", get(debug_video))
        .route("/debug/channel/{url}", get(debug_channel))
        .route("/debug/feed/{channel_id}", get(debug_feed))
        .fallback(endpoint_not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        let message = err.to_string();
        match err {
            SyncError::AlreadySubscribed(_) | SyncError::AlreadyInWatchLater(_) => {
                Self::conflict(message)
            }
            SyncError::ChannelUnavailable { .. } | SyncError::VideoUnavailable { .. } => {
                Self::bad_request(message)
            }
            SyncError::Fetch(_) | SyncError::Feed(_) => Self::bad_gateway(message),
            SyncError::Storage(_) => {
                error!(error = %message, "request failed on storage");
                Self::internal(message)
            }
        }
    }
}

impl From<ScrapeError> for ApiError {
    fn from(err: ScrapeError) -> Self {
        Self::bad_gateway(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let body = serde_json::json!({ "error": self.message });
        (self.status, headers, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Renders Unix seconds as `YYYY-MM-DD HH:MM:SSZ` in UTC.
fn format_timestamp(seconds: i64) -> String {
    DateTime::from_timestamp(seconds, 0)
        .map(|time| time.format("%Y-%m-%d %H:%M:%SZ").to_string())
        .unwrap_or_default()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoResponse {
    pub id: String,
    pub uploader_id: String,
    pub uploader_name: String,
    pub title: String,
    pub time_published: String,
    pub time_added: String,
    pub category: &'static str,
    pub length_seconds: i64,
    pub url: String,
    pub thumbnail_url: String,
}

impl From<&Video> for VideoResponse {
    fn from(video: &Video) -> Self {
        Self {
            id: video.video_id.clone(),
            uploader_id: video.channel_id.clone(),
            uploader_name: video.uploader_name.clone(),
            title: video.title.clone(),
            time_published: format_timestamp(video.time_published),
            time_added: format_timestamp(video.time_added),
            category: video.category.as_str(),
            length_seconds: video.length_seconds,
            url: video.url(),
            thumbnail_url: video.thumbnail_url(),
        }
    }
}

fn video_responses(videos: &[Video]) -> Vec<VideoResponse> {
    videos.iter().map(VideoResponse::from).collect()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelResponse {
    pub channel_id: String,
    pub name: String,
    pub last_modified: i64,
    pub videos: Vec<VideoResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncOutcomeResponse {
    channel_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_videos: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    watermark: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<ChannelOutcome> for SyncOutcomeResponse {
    fn from(outcome: ChannelOutcome) -> Self {
        match outcome.result {
            Ok(report) => Self {
                channel_id: outcome.channel_id,
                new_videos: Some(report.new_videos),
                watermark: Some(report.watermark),
                error: None,
            },
            Err(err) => Self {
                channel_id: outcome.channel_id,
                new_videos: None,
                watermark: None,
                error: Some(err.to_string()),
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct CategoryQuery {
    category: Option<String>,
}

impl CategoryQuery {
    fn category(&self) -> ApiResult<Category> {
        match self.category.as_deref() {
            None => Ok(Category::Subscription),
            Some(value) => Category::from_path(value)
                .ok_or_else(|| ApiError::bad_request(format!("unknown category {value:?}"))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubscribeRequest {
    url: String,
}

async fn endpoint_not_found() -> ApiError {
    ApiError::not_found("endpoint not found")
}

async fn list_videos(
    State(state): State<AppState>,
    Query(query): Query<CategoryQuery>,
) -> ApiResult<Json<Vec<VideoResponse>>> {
    let category = query.category()?;
    let videos = state
        .engine
        .store()
        .get_videos_by_category(category)
        .await
        .map_err(SyncError::from)?;
    Ok(Json(video_responses(&videos)))
}

async fn channel_response(
    state: &AppState,
    channel: Channel,
    category: Category,
) -> ApiResult<ChannelResponse> {
    let videos = state
        .engine
        .store()
        .get_channel_videos(&channel.channel_id, category)
        .await
        .map_err(SyncError::from)?;
    Ok(ChannelResponse {
        channel_id: channel.channel_id,
        name: channel.name,
        last_modified: channel.last_modified,
        videos: video_responses(&videos),
    })
}

async fn list_channels(
    State(state): State<AppState>,
    Query(query): Query<CategoryQuery>,
) -> ApiResult<Json<Vec<ChannelResponse>>> {
    let category = query.category()?;
    let channels = state
        .engine
        .store()
        .get_all_channels()
        .await
        .map_err(SyncError::from)?;
    let mut responses = Vec::with_capacity(channels.len());
    for channel in channels {
        responses.push(channel_response(&state, channel, category).await?);
    }
    Ok(Json(responses))
}

async fn get_channel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<CategoryQuery>,
) -> ApiResult<Json<ChannelResponse>> {
    let category = query.category()?;
    let channel = state
        .engine
        .store()
        .get_channel(&id)
        .await
        .map_err(SyncError::from)?
        .ok_or_else(|| ApiError::not_found(format!("channel {id} not found")))?;
    Ok(Json(channel_response(&state, channel, category).await?))
}

/// `/api/{category}/{channel_id}/{sort}`; `channel_id` may be `all`.
async fn query_videos(
    State(state): State<AppState>,
    Path((category, channel_id, sort)): Path<(String, String, String)>,
) -> ApiResult<Json<Vec<VideoResponse>>> {
    let category = Category::from_path(&category)
        .ok_or_else(|| ApiError::not_found(format!("unknown category {category:?}")))?;
    let sort = SortType::from_path(&sort)
        .ok_or_else(|| ApiError::not_found(format!("unknown sort type {sort:?}")))?;

    let store = state.engine.store();
    let mut videos = if channel_id == ALL_CHANNELS {
        store.get_videos_by_category(category).await
    } else {
        if store
            .get_channel(&channel_id)
            .await
            .map_err(SyncError::from)?
            .is_none()
        {
            return Err(ApiError::not_found(format!("channel {channel_id} not found")));
        }
        store.get_channel_videos(&channel_id, category).await
    }
    .map_err(SyncError::from)?;

    sort_videos(&mut videos, sort);
    Ok(Json(video_responses(&videos)))
}

async fn subscribe(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Channel>)> {
    let channel = state.engine.subscribe(&id).await?;
    Ok((StatusCode::CREATED, Json(channel)))
}

async fn subscribe_by_url(
    State(state): State<AppState>,
    Json(request): Json<SubscribeRequest>,
) -> ApiResult<(StatusCode, Json<Channel>)> {
    let url = request.url.trim();
    if url.is_empty() {
        return Err(ApiError::bad_request("url must not be empty"));
    }
    let channel = state.engine.subscribe_by_url(url).await?;
    Ok((StatusCode::CREATED, Json(channel)))
}

async fn unsubscribe(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    if state.engine.unsubscribe(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("channel {id} not found")))
    }
}

async fn sync_channel(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    if id == ALL_CHANNELS {
        let outcomes: Vec<SyncOutcomeResponse> = state
            .engine
            .sync_all()
            .await?
            .into_iter()
            .map(SyncOutcomeResponse::from)
            .collect();
        return Ok(Json(outcomes).into_response());
    }

    match state.engine.sync_channel(&id).await? {
        Some(report) => Ok(Json(report).into_response()),
        None => Err(ApiError::not_found(format!("channel {id} not found"))),
    }
}

async fn delete_video(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    if state.engine.delete_video(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("video {id} not found")))
    }
}

async fn add_to_watch_later(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<VideoResponse>)> {
    let video = state.engine.add_to_watch_later(&id).await?;
    Ok((StatusCode::CREATED, Json(VideoResponse::from(&video))))
}

async fn debug_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<VideoMetadata>> {
    Ok(Json(state.engine.scrape_video(&id).await?))
}

/// `url` arrives percent-encoded in a single path segment.
async fn debug_channel(
    State(state): State<AppState>,
    Path(url): Path<String>,
) -> ApiResult<Json<ChannelInfo>> {
    Ok(Json(state.engine.scrape_channel(&url).await?))
}

async fn debug_feed(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> ApiResult<Json<ParsedFeed>> {
    Ok(Json(state.engine.fetch_feed(&channel_id).await?))
}
