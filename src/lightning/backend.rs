use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parsed reply of a `dev-splice` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevSpliceResponse {
    pub txid: Option<String>,
    pub psbt: Option<String>,
    pub tx: Option<String>,
    pub dryrun: Vec<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// The node answered and refused the request. `payload` is whatever the
    /// node sent back, string or JSON of any shape.
    #[error("node rejected request: {payload}")]
    Rejected { status: Option<u16>, payload: Value },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode response: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn rejected(payload: impl Into<Value>) -> Self {
        Self::Rejected {
            status: None,
            payload: payload.into(),
        }
    }

    /// Raw error payload as handed to the error classifier.
    pub fn payload(&self) -> Value {
        match self {
            Self::Rejected { payload, .. } => payload.clone(),
            other => Value::String(other.to_string()),
        }
    }
}

#[async_trait]
pub trait SpliceBackend: Send + Sync {
    async fn dev_splice(
        &self,
        script: &str,
        dry_run: bool,
        force_feerate: bool,
    ) -> Result<DevSpliceResponse, BackendError>;
}
