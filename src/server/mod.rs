//! Read-only query endpoint over the detection store.

use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::core::types::Detection;
use crate::pipeline::store::DetectionStore;

/// Wire shape of `GET /detected-wallets`. The outer field name is part
/// of the endpoint contract and must stay `detectedWallets`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DetectedWalletsResponse {
    detected_wallets: Vec<Detection>,
}

#[derive(Clone)]
struct AppState {
    store: Arc<DetectionStore>,
}

pub fn router(store: Arc<DetectionStore>) -> Router {
    Router::new()
        .route("/detected-wallets", get(detected_wallets))
        .with_state(AppState { store })
}

#[instrument(skip(state))]
async fn detected_wallets(State(state): State<AppState>) -> Json<DetectedWalletsResponse> {
    let detected_wallets = state.store.snapshot().await;
    Json(DetectedWalletsResponse { detected_wallets })
}

/// Binds and serves the query endpoint until the process exits.
pub async fn serve(listen_addr: &str, store: Arc<DetectionStore>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("Failed to bind query endpoint on {listen_addr}"))?;

    info!(addr = %listen_addr, "🚀 Query endpoint listening");

    axum::serve(listener, router(store))
        .await
        .context("Query endpoint server failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn response_preserves_wire_field_names() {
        let store = Arc::new(DetectionStore::new());
        store
            .append(Detection {
                wallet: "fresh-wallet".to_string(),
                signature: "sig-0".to_string(),
                sol_balance: 0.05,
                timestamp: Utc::now(),
            })
            .await;

        let response = DetectedWalletsResponse {
            detected_wallets: store.snapshot().await,
        };
        let value = serde_json::to_value(&response).unwrap();

        let list = value["detectedWallets"].as_array().unwrap();
        assert_eq!(list.len(), 1);
        let record = list[0].as_object().unwrap();
        assert_eq!(record["wallet"], "fresh-wallet");
        assert_eq!(record["signature"], "sig-0");
        assert_eq!(record["solBalance"].as_f64().unwrap(), 0.05);
        assert!(record.contains_key("timestamp"));
    }

    #[tokio::test]
    async fn empty_store_serializes_to_empty_list() {
        let store = Arc::new(DetectionStore::new());
        let response = DetectedWalletsResponse {
            detected_wallets: store.snapshot().await,
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["detectedWallets"].as_array().unwrap().len(), 0);
    }
}
