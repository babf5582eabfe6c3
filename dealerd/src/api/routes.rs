use std::net::{IpAddr, SocketAddr};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use shared::protocol::{
    PATH_ALIAS, PATH_COMPLETE, PATH_IMPORT, PATH_INSERT, PATH_SERVERS, PATH_SERVERS_HASH, PATH_WORK,
};
use shared::types::{
    AddressFamily, AliasUpdateReq, CompletionOutcome, GetWorkReq, ImportReq, ImportResp,
    InsertServicesReq, InsertServicesResp, ServerList, ServiceData, TableType, WorkDoneReq,
    WorkGrant,
};
use crate::store::error::StoreError;
use crate::store::model::{Credentials, NewRecord};
use crate::store::NewImport;
use crate::store_manager::{ServiceBatch, StoreHandle, WorkRequest};

#[derive(Clone)]
pub struct AppState {
    pub store: StoreHandle,
    pub list_rx: watch::Receiver<ServerList>,
    pub hash_rx: watch::Receiver<String>,
    /// Used when a worker doesn't say how often it wants to re-check
    pub monitor_frequency: i64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct AliasUpdateResp {
    pub alias_id: u64,
    pub changed: usize,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Failure of a request, rendered as a status code and a JSON message.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn forbidden(peer: &SocketAddr) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: format!("{} may not modify the dealer", peer.ip()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        let status = match e.downcast_ref::<StoreError>() {
            Some(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Some(StoreError::DuplicateKey { .. }) => StatusCode::CONFLICT,
            Some(err) if err.is_validation() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {:#}", e);
        } else {
            tracing::warn!("Request rejected: {:#}", e);
        }
        Self {
            status,
            message: format!("{:#}", e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let mutating = Router::new()
        .route(PATH_WORK, post(get_work))
        .route(PATH_COMPLETE, post(complete_work))
        .route(PATH_INSERT, post(insert_services))
        .route(PATH_IMPORT, post(insert_import))
        .route(PATH_ALIAS, post(update_alias))
        .layer(middleware::from_fn(local_only));

    Router::new()
        .route(PATH_SERVERS, get(get_servers))
        .route(PATH_SERVERS_HASH, get(get_hash))
        .merge(mutating)
        .with_state(state)
}

/// Whether `ip` is on this host or a private network.
pub fn is_local_peer(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private(),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return v4.is_loopback() || v4.is_private();
            }
            // fc00::/7 unique local
            v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00
        }
    }
}

async fn local_only(
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    if !is_local_peer(&peer.ip()) {
        tracing::warn!("Refused {} {} from {}", request.method(), request.uri().path(), peer);
        return ApiError::forbidden(&peer).into_response();
    }
    next.run(request).await
}

fn now_or(current_time: Option<i64>) -> i64 {
    current_time.unwrap_or_else(|| Utc::now().timestamp())
}

async fn get_work(
    State(state): State<AppState>,
    Json(req): Json<GetWorkReq>,
) -> Result<Json<Option<WorkGrant>>, ApiError> {
    let request = WorkRequest {
        afs: req.af.map(|af| vec![af]).unwrap_or_else(|| AddressFamily::ALL.to_vec()),
        tables: req.table.map(|t| vec![t]).unwrap_or_else(|| TableType::ALL.to_vec()),
        now: now_or(req.current_time),
        monitor_frequency: req.monitor_frequency.unwrap_or(state.monitor_frequency),
    };
    Ok(Json(state.store.allocate(request).await?))
}

async fn complete_work(
    State(state): State<AppState>,
    Json(req): Json<WorkDoneReq>,
) -> Result<Json<Vec<CompletionOutcome>>, ApiError> {
    let outcomes = state.store.complete(req.statuses, now_or(None)).await?;
    Ok(Json(outcomes))
}

fn service_record(data: ServiceData) -> NewRecord {
    NewRecord {
        kind: data.kind,
        af: data.af,
        proto: Some(data.proto),
        ip: data.ip,
        port: data.port,
        credentials: Credentials::from_parts(data.user, data.password),
        alias_id: data.alias_id,
    }
}

async fn insert_services(
    State(state): State<AppState>,
    Json(req): Json<InsertServicesReq>,
) -> Result<Json<InsertServicesResp>, ApiError> {
    let groups = req
        .groups
        .into_iter()
        .filter_map(|group| {
            let af = group.first()?.af;
            Some((af, group.into_iter().map(service_record).collect()))
        })
        .collect();
    let batch = ServiceBatch {
        groups,
        import_status: req.status_id,
        now: now_or(req.current_time),
    };
    let group_ids = state.store.insert_services(batch).await?;
    Ok(Json(InsertServicesResp { group_ids }))
}

async fn insert_import(
    State(state): State<AppState>,
    Json(req): Json<ImportReq>,
) -> Result<Json<ImportResp>, ApiError> {
    let import = NewImport {
        record: NewRecord {
            kind: req.kind,
            af: req.af,
            proto: req.proto,
            ip: req.ip,
            port: req.port,
            credentials: Credentials::from_parts(req.user, req.password),
            alias_id: None,
        },
        fqn: req.fqn,
    };
    let record = state.store.insert_import(import, now_or(req.current_time)).await?;
    let group_id = record
        .group_id
        .ok_or_else(|| anyhow::anyhow!("import {} was not queued", record.id))?;
    Ok(Json(ImportResp {
        id: record.id,
        status_id: record.status_id,
        group_id,
        alias_id: record.alias_id,
    }))
}

async fn update_alias(
    State(state): State<AppState>,
    Json(req): Json<AliasUpdateReq>,
) -> Result<Json<AliasUpdateResp>, ApiError> {
    let changed = state
        .store
        .resolve_alias(req.alias_id, req.ip, now_or(req.current_time))
        .await?;
    Ok(Json(AliasUpdateResp {
        alias_id: req.alias_id,
        changed,
    }))
}

async fn get_servers(State(state): State<AppState>) -> Json<ServerList> {
    Json(state.list_rx.borrow().clone())
}

async fn get_hash(State(state): State<AppState>) -> String {
    state.hash_rx.borrow().clone()
}
