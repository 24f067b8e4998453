use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Semaphore;

use splice_orchestrator::lightning::backend::{BackendError, DevSpliceResponse, SpliceBackend};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpliceCall {
    pub script: String,
    pub dry_run: bool,
    pub force_feerate: bool,
}

/// Replays queued replies in order and records every call. When built with
/// [`ScriptedBackend::gated`], each call waits for a permit before replying.
#[derive(Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<DevSpliceResponse, BackendError>>>,
    calls: Mutex<Vec<SpliceCall>>,
    gate: Option<Arc<Semaphore>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn push_ok(&self, resp: DevSpliceResponse) -> &Self {
        self.replies.lock().push_back(Ok(resp));
        self
    }

    pub fn push_err(&self, err: BackendError) -> &Self {
        self.replies.lock().push_back(Err(err));
        self
    }

    pub fn calls(&self) -> Vec<SpliceCall> {
        self.calls.lock().clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpliceBackend for ScriptedBackend {
    async fn dev_splice(
        &self,
        script: &str,
        dry_run: bool,
        force_feerate: bool,
    ) -> Result<DevSpliceResponse, BackendError> {
        self.calls.lock().push(SpliceCall {
            script: script.to_string(),
            dry_run,
            force_feerate,
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .expect("gate semaphore closed")
                .forget();
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::rejected(json!("no scripted reply left"))))
    }
}
