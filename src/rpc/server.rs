//! Axum server for the replication and cluster RPC.

use super::messages::*;
use crate::cluster::WalManager;
use crate::error::{Result, TidelogError};
use crate::shutdown::{BackgroundTask, ShutdownCoordinator};
use crate::types::{Replica, RouteTable};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state for Axum handlers.
#[derive(Clone)]
struct ServerState {
    manager: Arc<WalManager>,
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Builds the RPC router over a manager.
pub fn router(manager: Arc<WalManager>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Log replication
        .route("/replication/fetch", post(handle_fetch))
        .route("/replication/write", post(handle_write))
        .route("/replication/replica", post(handle_replica))
        // Repair
        .route("/replication/buckets", post(handle_bucket_fetch))
        .route("/replication/buckets/list", post(handle_bucket_list))
        // Coordination
        .route("/cluster/route", post(handle_route))
        .route("/cluster/isr", post(handle_isr))
        .route("/cluster/table", get(handle_table))
        .with_state(ServerState { manager })
}

/// Binds `addr` and serves until `shutdown` fires.
pub async fn bind(
    manager: Arc<WalManager>,
    addr: &str,
    shutdown: ShutdownCoordinator,
) -> Result<(BackgroundTask, SocketAddr)> {
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        TidelogError::Network(format!("Failed to bind {}: {}", addr, e))
    })?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "Replication RPC listening");

    let app = router(manager);
    let task = BackgroundTask::spawn_with("rpc-server", shutdown, move |shutdown| async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait_for_shutdown().await })
            .await;
        match result {
            Ok(()) => info!(addr = %local_addr, "Replication RPC stopped"),
            Err(e) => error!(addr = %local_addr, error = %e, "Replication RPC failed"),
        }
    });
    Ok((task, local_addr))
}

// Handlers

async fn health_check() -> &'static str {
    "OK"
}

async fn handle_fetch(
    State(state): State<ServerState>,
    Json(request): Json<FetchRequest>,
) -> (StatusCode, Json<FetchResponse>) {
    let Some(wal) = state.manager.local_wal(request.route_key) else {
        return (
            StatusCode::NOT_FOUND,
            Json(FetchResponse::error(
                NOT_FOUND,
                format!("no log for route {}", request.route_key),
                request.from_offset,
            )),
        );
    };

    match wal.read(
        request.follower_key,
        request.from_offset,
        request.max_bytes,
        request.committed_only,
    ) {
        Ok(read) => {
            debug!(
                route_key = request.route_key,
                follower = request.follower_key,
                from = request.from_offset,
                next = read.next_offset,
                "Served fetch"
            );
            (
                StatusCode::OK,
                Json(FetchResponse {
                    response_code: OK,
                    data: read.data,
                    next_offset: read.next_offset,
                    commit_offset: read.commit_offset,
                    error_message: None,
                }),
            )
        }
        Err(e) => {
            let code = e.response_code();
            (
                status(code),
                Json(FetchResponse::error(code, e.to_string(), request.from_offset)),
            )
        }
    }
}

async fn handle_write(
    State(state): State<ServerState>,
    Json(request): Json<WriteRequest>,
) -> (StatusCode, Json<WriteResponse>) {
    let result = state
        .manager
        .write_local(request.route_key, &request.data, request.fsync);

    match result {
        Ok(offset) => (
            StatusCode::OK,
            Json(WriteResponse {
                response_code: OK,
                offset: Some(offset),
                error_message: None,
            }),
        ),
        Err(e) => {
            let code = match e {
                TidelogError::NotLocal { .. } => BAD_REQUEST,
                ref other => other.response_code(),
            };
            (
                status(code),
                Json(WriteResponse {
                    response_code: code,
                    offset: None,
                    error_message: Some(e.to_string()),
                }),
            )
        }
    }
}

async fn handle_replica(
    State(state): State<ServerState>,
    Json(replica): Json<Replica>,
) -> (StatusCode, Json<GenericResponse>) {
    match state.manager.apply_replica(replica).await {
        Ok(()) => (StatusCode::OK, Json(GenericResponse::ok())),
        Err(e) => {
            warn!(error = %e, "Failed to apply pushed replica");
            let code = e.response_code();
            (status(code), Json(GenericResponse::error(code, e.to_string())))
        }
    }
}

async fn handle_bucket_fetch(
    State(state): State<ServerState>,
    Json(request): Json<BucketFetchRequest>,
) -> (StatusCode, Json<BucketFetchResponse>) {
    let not_found = |message: String| {
        (
            StatusCode::NOT_FOUND,
            Json(BucketFetchResponse {
                response_code: NOT_FOUND,
                data: None,
                count: 0,
                fp: false,
                error_message: Some(message),
            }),
        )
    };

    let Some(source) = state.manager.bucket_source() else {
        return not_found("no bucket source attached".to_string());
    };

    match source.fetch_bucket(&request) {
        Ok(Some(bucket)) => (
            StatusCode::OK,
            Json(BucketFetchResponse {
                response_code: OK,
                data: Some(bucket.data),
                count: bucket.count,
                fp: bucket.fp,
                error_message: None,
            }),
        ),
        Ok(None) => not_found(format!(
            "no bucket {} at {} for {}.{}",
            request.index, request.block_timestamp, request.db, request.measurement
        )),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(BucketFetchResponse {
                response_code: INTERNAL_ERROR,
                data: None,
                count: 0,
                fp: false,
                error_message: Some(e.to_string()),
            }),
        ),
    }
}

async fn handle_bucket_list(
    State(state): State<ServerState>,
    Json(request): Json<BucketListRequest>,
) -> (StatusCode, Json<BucketListResponse>) {
    let Some(source) = state.manager.bucket_source() else {
        return (
            StatusCode::NOT_FOUND,
            Json(BucketListResponse {
                response_code: NOT_FOUND,
                entries: Vec::new(),
                error_message: Some("no bucket source attached".to_string()),
            }),
        );
    };

    match source.list_offsets(&request.db, &request.measurement) {
        Ok(entries) => (
            StatusCode::OK,
            Json(BucketListResponse {
                response_code: OK,
                entries,
                error_message: None,
            }),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(BucketListResponse {
                response_code: INTERNAL_ERROR,
                entries: Vec::new(),
                error_message: Some(e.to_string()),
            }),
        ),
    }
}

async fn handle_route(
    State(state): State<ServerState>,
    Json(request): Json<RouteRequest>,
) -> (StatusCode, Json<RouteResponse>) {
    match state
        .manager
        .add_routable_key(request.route_key, request.replication_factor)
        .await
    {
        Ok(replicas) => (
            StatusCode::OK,
            Json(RouteResponse {
                response_code: OK,
                leader_id: replicas.first().map(|r| r.leader_node_key),
                replicas,
                error_message: None,
            }),
        ),
        Err(e) => {
            warn!(route_key = request.route_key, error = %e, "Route request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RouteResponse {
                    response_code: INTERNAL_ERROR,
                    leader_id: None,
                    replicas: Vec::new(),
                    error_message: Some(e.to_string()),
                }),
            )
        }
    }
}

async fn handle_isr(
    State(state): State<ServerState>,
    Json(request): Json<IsrUpdateRequest>,
) -> (StatusCode, Json<GenericResponse>) {
    match state
        .manager
        .update_replica_isr(request.route_key, &request.statuses)
        .await
    {
        Ok(()) => (StatusCode::OK, Json(GenericResponse::ok())),
        Err(e) => {
            let code = match e {
                TidelogError::NotCoordinator { .. } => INTERNAL_ERROR,
                ref other => other.response_code(),
            };
            (status(code), Json(GenericResponse::error(code, e.to_string())))
        }
    }
}

async fn handle_table(State(state): State<ServerState>) -> Json<RouteTable> {
    Json(state.manager.route_table())
}
