use std::str::FromStr as _;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::SpliceConfig;
use crate::lightning::backend::SpliceBackend;
use crate::splice::amount::balance_after_splice_out;
use crate::splice::classify::{ClassifiedError, classify_backend_error};
use crate::splice::error::SpliceError;
use crate::splice::events::SpliceEvent;
use crate::splice::fee::extract_fee;
use crate::splice::registry::OperationRegistry;
use crate::splice::script::{build_splice_in, build_splice_out, build_splice_rebalance};
use crate::splice::{
    ExecuteSpliceRequest, SpliceDryrunResult, SpliceExecutionResult, SpliceInRequest,
    SpliceOperation, SpliceOperationType, SpliceOutRequest, SpliceRebalanceRequest, SpliceStatus,
};

const INTERRUPTED_MESSAGE: &str =
    "Splice was interrupted before the node replied. Check the channel before retrying.";

#[derive(Debug, Default)]
struct TransientState {
    in_flight: usize,
    last_error: Option<String>,
    current_dryrun: Option<SpliceDryrunResult>,
}

struct Inner {
    cfg: SpliceConfig,
    backend: Arc<dyn SpliceBackend>,
    registry: OperationRegistry,
    transient: Mutex<TransientState>,
    /// Bumped by `reset`. Work started under an older generation must not
    /// write into the cleared state.
    generation: RwLock<u64>,
    events: broadcast::Sender<SpliceEvent>,
}

/// Drives splices from dry-run through broadcast to confirmation.
#[derive(Clone)]
pub struct SpliceOrchestrator {
    inner: Arc<Inner>,
}

struct InFlight<'a>(&'a Mutex<TransientState>);

impl<'a> InFlight<'a> {
    fn begin(state: &'a Mutex<TransientState>) -> Self {
        let mut guard = state.lock();
        guard.in_flight += 1;
        guard.last_error = None;
        Self(state)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut guard = self.0.lock();
        guard.in_flight = guard.in_flight.saturating_sub(1);
    }
}

impl SpliceOrchestrator {
    pub fn new(cfg: SpliceConfig, backend: Arc<dyn SpliceBackend>) -> Self {
        let (events, _) = broadcast::channel(cfg.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                cfg,
                backend,
                registry: OperationRegistry::new(),
                transient: Mutex::new(TransientState::default()),
                generation: RwLock::new(0),
                events,
            }),
        }
    }

    pub fn config(&self) -> &SpliceConfig {
        &self.inner.cfg
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpliceEvent> {
        self.inner.events.subscribe()
    }

    pub async fn initiate_splice_out(
        &self,
        request: &SpliceOutRequest,
    ) -> Result<SpliceDryrunResult, SpliceError> {
        request.validate()?;
        let script = build_splice_out(request);
        self.dry_run(&[request.channel_id.as_str()], script, request.force_feerate)
            .await
    }

    pub async fn initiate_splice_in(
        &self,
        request: &SpliceInRequest,
    ) -> Result<SpliceDryrunResult, SpliceError> {
        request.validate()?;
        let script = build_splice_in(request);
        self.dry_run(&[request.channel_id.as_str()], script, request.force_feerate)
            .await
    }

    pub async fn initiate_rebalance(
        &self,
        request: &SpliceRebalanceRequest,
    ) -> Result<SpliceDryrunResult, SpliceError> {
        request.validate()?;
        let script = build_splice_rebalance(request);
        self.dry_run(
            &[request.from_channel_id.as_str(), request.to_channel_id.as_str()],
            script,
            request.force_feerate,
        )
        .await
    }

    async fn dry_run(
        &self,
        channel_ids: &[&str],
        script: String,
        force_feerate: bool,
    ) -> Result<SpliceDryrunResult, SpliceError> {
        let mut ordered = channel_ids.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        let result = self.dry_run_locked(&ordered, script, force_feerate).await;
        for channel_id in &ordered {
            self.inner.registry.release_channel(channel_id);
        }
        result
    }

    /// `ordered` must be sorted so concurrent multi-channel callers lock in
    /// the same order.
    async fn dry_run_locked(
        &self,
        ordered: &[&str],
        script: String,
        force_feerate: bool,
    ) -> Result<SpliceDryrunResult, SpliceError> {
        let mut _guards = Vec::with_capacity(ordered.len());
        for channel_id in ordered {
            _guards.push(self.inner.registry.lock_channel(channel_id).await);
        }
        if let Some(busy) = ordered.iter().find(|c| self.is_channel_splicing(c)) {
            return Err(SpliceError::ChannelBusy(busy.to_string()));
        }

        let _in_flight = InFlight::begin(&self.inner.transient);
        let generation = self.generation();
        tracing::info!(%script, force_feerate, "splice dry-run");

        match self
            .inner
            .backend
            .dev_splice(&script, true, force_feerate)
            .await
        {
            Ok(resp) => {
                let fee = extract_fee(&resp.dryrun, self.inner.cfg.fallback_fee_sats);
                let result = SpliceDryrunResult {
                    txid: resp.txid.unwrap_or_default(),
                    psbt: resp.psbt,
                    tx: resp.tx,
                    fee,
                    transcript: resp.dryrun,
                    script,
                };
                tracing::info!(txid = %result.txid, fee, "splice dry-run ok");
                self.if_current(generation, || {
                    self.inner.transient.lock().current_dryrun = Some(result.clone());
                });
                Ok(result)
            }
            Err(err) => {
                let classified = classify_backend_error(&err, self.inner.cfg.verbatim_min_len);
                tracing::warn!(error = %err, kind = ?classified.kind, "splice dry-run failed");
                self.if_current(generation, || self.record_error(&classified));
                Err(classified.into())
            }
        }
    }

    /// Broadcasts an approved splice. The node call runs to completion even if
    /// the returned future is dropped, and always leaves a CONFIRMING or
    /// FAILED record behind.
    pub async fn execute_splice(
        &self,
        request: ExecuteSpliceRequest,
    ) -> Result<SpliceExecutionResult, SpliceError> {
        request.validate()?;

        let channel_id = request.channel_id.clone();
        let this = self.clone();
        let joined = tokio::spawn(async move { this.run_execute(request).await }).await;
        self.inner.registry.release_channel(&channel_id);
        match joined {
            Ok(result) => result,
            Err(join_err) => {
                tracing::error!(%channel_id, error = %join_err, "splice execution task aborted");
                let classified = ClassifiedError::generic(Some(join_err.to_string()));
                let failed = self.inner.registry.update(&channel_id, |op| {
                    if op.status == SpliceStatus::Executing {
                        op.status = SpliceStatus::Failed;
                        op.error = Some(classified.message.clone());
                        true
                    } else {
                        false
                    }
                });
                if failed == Some(true) {
                    self.emit(SpliceEvent::StatusChanged {
                        channel_id,
                        status: SpliceStatus::Failed,
                    });
                }
                self.record_error(&classified);
                Err(classified.into())
            }
        }
    }

    async fn run_execute(
        &self,
        request: ExecuteSpliceRequest,
    ) -> Result<SpliceExecutionResult, SpliceError> {
        let _guard = self.inner.registry.lock_channel(&request.channel_id).await;
        if self.is_channel_splicing(&request.channel_id) {
            return Err(SpliceError::ChannelBusy(request.channel_id));
        }

        let _in_flight = InFlight::begin(&self.inner.transient);
        let generation = self.generation();

        let mut op = SpliceOperation {
            operation_id: Uuid::new_v4(),
            channel_id: request.channel_id.clone(),
            txid: None,
            kind: request.kind,
            status: SpliceStatus::Executing,
            amount: request.amount.clone(),
            destination: request.destination.clone(),
            fee: request.fee,
            script: request.script.clone(),
            started_at: Utc::now(),
            confirmations: 0,
            error: None,
            previous_local_balance: request.previous_local_balance.clone(),
        };
        self.if_current(generation, || self.store(op.clone()));

        tracing::info!(
            channel_id = %op.channel_id,
            operation_id = %op.operation_id,
            script = %op.script,
            "executing splice"
        );

        match self
            .inner
            .backend
            .dev_splice(&request.script, false, request.force_feerate)
            .await
        {
            Ok(resp) => {
                let txid = resp.txid.filter(|t| !t.is_empty());
                match &txid {
                    Some(t) if bitcoin::Txid::from_str(t).is_err() => {
                        tracing::warn!(channel_id = %op.channel_id, txid = %t, "node returned malformed txid");
                    }
                    None => {
                        tracing::warn!(channel_id = %op.channel_id, "node returned no txid for executed splice");
                    }
                    _ => {}
                }

                op.txid = txid.clone();
                op.status = SpliceStatus::Confirming;
                let kept = self.if_current(generation, || {
                    self.store(op.clone());
                    self.inner.transient.lock().current_dryrun = None;
                });
                if kept.is_none() {
                    tracing::warn!(
                        channel_id = %op.channel_id,
                        txid = op.txid.as_deref().unwrap_or(""),
                        "splice broadcast after reset, record dropped"
                    );
                }

                tracing::info!(
                    channel_id = %op.channel_id,
                    txid = op.txid.as_deref().unwrap_or(""),
                    "splice broadcast"
                );

                Ok(SpliceExecutionResult {
                    txid: txid.unwrap_or_default(),
                    psbt: resp.psbt,
                    tx: resp.tx,
                    script: request.script,
                })
            }
            Err(err) => {
                let classified = classify_backend_error(&err, self.inner.cfg.verbatim_min_len);
                tracing::warn!(
                    channel_id = %op.channel_id,
                    error = %err,
                    kind = ?classified.kind,
                    "splice execution failed"
                );

                op.status = SpliceStatus::Failed;
                op.error = Some(classified.message.clone());
                self.if_current(generation, || {
                    self.store(op);
                    self.record_error(&classified);
                });
                Err(classified.into())
            }
        }
    }

    /// Applies a confirmation count from the chain watcher. Counts never go
    /// down, and records without a broadcast transaction are left alone.
    pub fn update_confirmations(&self, channel_id: &str, confirmations: u32) -> Option<SpliceStatus> {
        let (status, changed_status, changed_confs) =
            self.inner.registry.update(channel_id, |op| {
                if !matches!(op.status, SpliceStatus::Confirming | SpliceStatus::Completed) {
                    return (op.status, false, false);
                }
                let before = op.status;
                let changed_confs = confirmations > op.confirmations;
                op.confirmations = op.confirmations.max(confirmations);
                if op.confirmations >= 1 && op.status == SpliceStatus::Confirming {
                    op.status = SpliceStatus::Completed;
                }
                (op.status, op.status != before, changed_confs)
            })?;

        if changed_confs {
            self.emit(SpliceEvent::ConfirmationsUpdated {
                channel_id: channel_id.to_string(),
                confirmations,
            });
        }
        if changed_status {
            tracing::info!(%channel_id, confirmations, "splice confirmed");
            self.emit(SpliceEvent::StatusChanged {
                channel_id: channel_id.to_string(),
                status,
            });
        }
        Some(status)
    }

    /// Marks the splice completed regardless of observed confirmations.
    /// FAILED records stay failed.
    pub fn complete_splice(&self, channel_id: &str) -> bool {
        let Some((changed, completed)) = self.inner.registry.update(channel_id, |op| {
            let changed = !op.status.is_terminal();
            if changed {
                op.status = SpliceStatus::Completed;
            }
            (changed, op.status == SpliceStatus::Completed)
        }) else {
            return false;
        };

        if changed {
            self.emit(SpliceEvent::StatusChanged {
                channel_id: channel_id.to_string(),
                status: SpliceStatus::Completed,
            });
        }
        completed
    }

    pub fn clear_splice(&self, channel_id: &str) -> Option<SpliceOperation> {
        let removed = self.inner.registry.remove(channel_id)?;
        self.emit(SpliceEvent::Cleared {
            channel_id: channel_id.to_string(),
        });
        Some(removed)
    }

    /// Drops a FAILED record and hands back the balance it snapshotted.
    pub fn revert_failed_splice(&self, channel_id: &str) -> Option<String> {
        let removed = self
            .inner
            .registry
            .remove_if(channel_id, |op| op.status == SpliceStatus::Failed)?;
        tracing::info!(%channel_id, "reverted failed splice");
        self.emit(SpliceEvent::Cleared {
            channel_id: channel_id.to_string(),
        });
        Some(removed.previous_local_balance)
    }

    pub fn is_channel_splicing(&self, channel_id: &str) -> bool {
        self.inner
            .registry
            .get(channel_id)
            .is_some_and(|op| op.status.is_in_flight())
    }

    /// Local balance the channel will settle at once an in-flight splice-out
    /// confirms. Splice-ins are not reported.
    pub fn get_pending_balance(&self, channel_id: &str) -> Option<String> {
        let op = self.inner.registry.get(channel_id)?;
        if !op.status.is_in_flight() || op.kind != SpliceOperationType::Out {
            return None;
        }
        balance_after_splice_out(&op.previous_local_balance, &op.amount, op.fee)
    }

    pub fn get_splice_operation(&self, channel_id: &str) -> Option<SpliceOperation> {
        self.inner.registry.get(channel_id)
    }

    pub fn operations(&self) -> Vec<SpliceOperation> {
        self.inner.registry.snapshot()
    }

    /// Seeds the registry with previously persisted records. A record still
    /// marked EXECUTING lost its outcome with the process that wrote it and is
    /// restored as FAILED. Channels that already have a record are skipped.
    pub fn restore(&self, operations: impl IntoIterator<Item = SpliceOperation>) -> usize {
        let mut restored = 0;
        for mut op in operations {
            if self.inner.registry.get(&op.channel_id).is_some() {
                continue;
            }
            if matches!(op.status, SpliceStatus::Executing | SpliceStatus::Pending) {
                tracing::warn!(channel_id = %op.channel_id, "restoring interrupted splice as failed");
                op.status = SpliceStatus::Failed;
                op.error = Some(INTERRUPTED_MESSAGE.to_string());
            }
            self.inner.registry.set(op);
            restored += 1;
        }
        restored
    }

    /// Clears every record and the transient state. Executions still waiting
    /// on the node finish but leave nothing behind.
    pub fn reset(&self) {
        {
            let mut generation = self.inner.generation.write();
            *generation += 1;
            self.inner.registry.clear();
            *self.inner.transient.lock() = TransientState::default();
        }
        self.emit(SpliceEvent::Reset);
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.transient.lock().last_error.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.transient.lock().in_flight > 0
    }

    pub fn current_dryrun(&self) -> Option<SpliceDryrunResult> {
        self.inner.transient.lock().current_dryrun.clone()
    }

    /// Discards the pending quote and any error shown with it.
    pub fn dismiss_dryrun(&self) {
        let mut state = self.inner.transient.lock();
        state.current_dryrun = None;
        state.last_error = None;
    }

    fn generation(&self) -> u64 {
        *self.inner.generation.read()
    }

    /// Runs `f` unless `reset` happened since `generation` was taken. Holds
    /// off a concurrent reset while `f` runs.
    fn if_current<R>(&self, generation: u64, f: impl FnOnce() -> R) -> Option<R> {
        let current = self.inner.generation.read();
        (*current == generation).then(f)
    }

    fn store(&self, op: SpliceOperation) {
        let event = SpliceEvent::StatusChanged {
            channel_id: op.channel_id.clone(),
            status: op.status,
        };
        self.inner.registry.set(op);
        self.emit(event);
    }

    fn record_error(&self, err: &ClassifiedError) {
        self.inner.transient.lock().last_error = Some(err.message.clone());
    }

    fn emit(&self, event: SpliceEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}
