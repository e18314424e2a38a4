use tokio::sync::RwLock;
use tracing::info;

use crate::core::types::Detection;

/// Append-only, in-memory list of confirmed detections.
///
/// The store only grows for the life of the process; `snapshot` hands
/// out an owned copy so readers can never mutate it. Append order is
/// pipeline completion order.
#[derive(Debug, Default)]
pub struct DetectionStore {
    detections: RwLock<Vec<Detection>>,
}

impl DetectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, detection: Detection) {
        info!(
            wallet = %detection.wallet,
            signature = %detection.signature,
            sol_balance = detection.sol_balance,
            "🚨 New wallet detected"
        );
        self.detections.write().await.push(detection);
    }

    /// Returns the full ordered detection list as of this call.
    pub async fn snapshot(&self) -> Vec<Detection> {
        self.detections.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.detections.read().await.len()
    }
}
