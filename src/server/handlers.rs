//! Route handlers: decode, call the store or channel, encode.

use axum::{extract::State, http::StatusCode, Json};

use super::error::AppResult;
use super::AppState;
use crate::protocol::{
    GlobRequest, GlobResponse, Health, HeartbeatsResponse, KeyRequest, PingRequest, PingResponse,
    PrefixRequest, ReadAllResponse, SendSignalRequest, WriteRequest, PROTOCOL_VERSION,
};
use crate::record::RecordStore;

type Body<T> = Result<Json<T>, axum::extract::rejection::JsonRejection>;

pub(super) async fn append(
    State(state): State<AppState>,
    body: Body<WriteRequest>,
) -> AppResult<StatusCode> {
    let Json(req) = body?;
    state.store.append(&req.prefix, &req.key, &req.payload).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn overwrite(
    State(state): State<AppState>,
    body: Body<WriteRequest>,
) -> AppResult<StatusCode> {
    let Json(req) = body?;
    state.store.overwrite(&req.prefix, &req.key, &req.payload).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn read_all(
    State(state): State<AppState>,
    body: Body<KeyRequest>,
) -> AppResult<Json<ReadAllResponse>> {
    let Json(req) = body?;
    let entries = state.store.read_all(&req.prefix, &req.key).await?;
    Ok(Json(ReadAllResponse { entries }))
}

pub(super) async fn remove(
    State(state): State<AppState>,
    body: Body<KeyRequest>,
) -> AppResult<StatusCode> {
    let Json(req) = body?;
    state.store.remove(&req.prefix, &req.key).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn glob(
    State(state): State<AppState>,
    body: Body<GlobRequest>,
) -> AppResult<Json<GlobResponse>> {
    let Json(req) = body?;
    let keys = state
        .store
        .glob(&req.prefix, &req.pattern, &req.working_dir)
        .await?;
    Ok(Json(GlobResponse { keys }))
}

pub(super) async fn send_signal(
    State(state): State<AppState>,
    body: Body<SendSignalRequest>,
) -> AppResult<StatusCode> {
    let Json(req) = body?;
    state
        .signals
        .send_signal(&req.prefix, &req.signal, req.payload)?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn ping(
    State(state): State<AppState>,
    body: Body<PingRequest>,
) -> AppResult<Json<PingResponse>> {
    let Json(req) = body?;
    let signals = state.signals.ping(&req.prefix, &req.key, req.interval)?;
    Ok(Json(PingResponse { signals }))
}

pub(super) async fn heartbeats(
    State(state): State<AppState>,
    body: Body<PrefixRequest>,
) -> AppResult<Json<HeartbeatsResponse>> {
    let Json(req) = body?;
    let heartbeats = state.signals.heartbeats(&req.prefix)?;
    Ok(Json(HeartbeatsResponse { heartbeats }))
}

pub(super) async fn healthcheck() -> Json<Health> {
    Json(Health {
        status: "ok".to_string(),
        protocol: PROTOCOL_VERSION,
    })
}
