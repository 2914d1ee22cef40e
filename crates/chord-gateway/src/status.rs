//! HTTP status surface for shard health.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};

use crate::client::GatewayClient;
use crate::shard::ShardSnapshot;

/// Router exposing `GET /shards`: per-shard latency and activity,
/// ordered by shard ID. Mount it on whatever listener the host runs.
pub fn status_router(client: Arc<GatewayClient>) -> Router {
    Router::new()
        .route("/shards", get(list_shards))
        .with_state(client)
}

async fn list_shards(State(client): State<Arc<GatewayClient>>) -> Json<Vec<ShardSnapshot>> {
    Json(client.snapshots())
}
