use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use clap::{Parser as _, Subcommand};
use serde_json::json;
use splice_orchestrator::config::{DEFAULT_FALLBACK_FEE_SATS, SpliceConfig};
use splice_orchestrator::lightning::backend::{BackendError, DevSpliceResponse, SpliceBackend};
use splice_orchestrator::lightning::cln::ClnRestClient;
use splice_orchestrator::splice::script::{
    build_splice_in, build_splice_out, build_splice_rebalance,
};
use splice_orchestrator::splice::service::SpliceOrchestrator;
use splice_orchestrator::splice::store::SqliteSpliceStore;
use splice_orchestrator::splice::{
    ExecuteSpliceRequest, SpliceDryrunResult, SpliceInRequest, SpliceOperationType,
    SpliceOutRequest, SpliceRebalanceRequest, WALLET_DESTINATION,
};

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, env = "CLN_REST_URL")]
    cln_rest_url: Option<String>,

    #[arg(long, env = "CLN_RUNE", hide_env_values = true)]
    rune: Option<String>,

    #[arg(long, default_value_t = false)]
    accept_invalid_certs: bool,

    #[arg(long, env = "SPLICE_STORE_PATH", default_value = "splice-journal.sqlite3")]
    store_path: PathBuf,

    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    #[arg(long, default_value_t = DEFAULT_FALLBACK_FEE_SATS)]
    fallback_fee_sats: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Render a splice script without contacting the node.
    Script {
        #[command(subcommand)]
        kind: ScriptKind,
    },
    Out {
        #[arg(long)]
        channel_id: String,

        #[arg(long)]
        amount: String,

        #[arg(long)]
        previous_local_balance: String,

        #[arg(long, default_value = WALLET_DESTINATION)]
        destination: String,

        #[arg(long)]
        fee_rate: Option<f64>,

        #[arg(long, default_value_t = false)]
        force_feerate: bool,

        /// Broadcast after a successful dry-run.
        #[arg(long, default_value_t = false)]
        execute: bool,
    },
    In {
        #[arg(long)]
        channel_id: String,

        #[arg(long)]
        amount: String,

        #[arg(long)]
        previous_local_balance: String,

        #[arg(long)]
        fee_rate: Option<f64>,

        #[arg(long, default_value_t = false)]
        force_feerate: bool,

        #[arg(long, default_value_t = false)]
        execute: bool,
    },
    Rebalance {
        #[arg(long)]
        from_channel_id: String,

        #[arg(long)]
        to_channel_id: String,

        #[arg(long)]
        amount: String,

        #[arg(long)]
        fee_rate: Option<f64>,

        #[arg(long, default_value_t = false)]
        force_feerate: bool,
    },
    Status {
        #[arg(long)]
        channel_id: Option<String>,
    },
    Confirm {
        #[arg(long)]
        channel_id: String,

        #[arg(long)]
        confirmations: u32,
    },
    Complete {
        #[arg(long)]
        channel_id: String,
    },
    Clear {
        #[arg(long)]
        channel_id: String,
    },
    Revert {
        #[arg(long)]
        channel_id: String,
    },
}

#[derive(Debug, Subcommand)]
enum ScriptKind {
    Out {
        #[arg(long)]
        channel_id: String,

        #[arg(long)]
        amount: String,

        #[arg(long)]
        fee_rate: Option<f64>,
    },
    In {
        #[arg(long)]
        channel_id: String,

        #[arg(long)]
        amount: String,

        #[arg(long)]
        fee_rate: Option<f64>,
    },
    Rebalance {
        #[arg(long)]
        from_channel_id: String,

        #[arg(long)]
        to_channel_id: String,

        #[arg(long)]
        amount: String,

        #[arg(long)]
        fee_rate: Option<f64>,
    },
}

struct UnconfiguredBackend;

#[async_trait]
impl SpliceBackend for UnconfiguredBackend {
    async fn dev_splice(
        &self,
        _script: &str,
        _dry_run: bool,
        _force_feerate: bool,
    ) -> Result<DevSpliceResponse, BackendError> {
        Err(BackendError::Transport(
            "no node configured: pass --cln-rest-url and --rune".to_string(),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    splice_orchestrator::logging::init().ok();
    let args = Args::parse();

    if let Command::Script { kind } = &args.command {
        println!("{}", serde_json::to_string_pretty(&render_script(kind)?)?);
        return Ok(());
    }

    let cfg = SpliceConfig {
        fallback_fee_sats: args.fallback_fee_sats,
        request_timeout: Duration::from_secs(args.timeout_secs),
        ..SpliceConfig::default()
    };

    let backend: Arc<dyn SpliceBackend> = match (&args.cln_rest_url, &args.rune) {
        (Some(url), Some(rune)) => Arc::new(
            ClnRestClient::new(
                url,
                rune.clone(),
                cfg.request_timeout,
                args.accept_invalid_certs,
            )
            .context("create CLN REST client")?,
        ),
        _ => Arc::new(UnconfiguredBackend),
    };

    let mut store = SqliteSpliceStore::open(args.store_path).context("open splice store")?;
    let orchestrator = SpliceOrchestrator::new(cfg, backend);
    let restored = orchestrator.restore(store.list_operations().context("load splice journal")?);
    tracing::debug!(restored, path = %store.path().display(), "splice journal loaded");

    let touched = touched_channel(&args.command);
    let outcome = run(&orchestrator, args.command).await;

    if let Some(channel_id) = touched {
        store
            .sync_channel(
                &channel_id,
                orchestrator.get_splice_operation(&channel_id).as_ref(),
            )
            .context("persist splice journal")?;
    }

    let out = outcome?;
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

/// Channel whose journal row the command may change. Dry-runs and status
/// queries leave the journal untouched.
fn touched_channel(command: &Command) -> Option<String> {
    match command {
        Command::Out {
            channel_id,
            execute: true,
            ..
        }
        | Command::In {
            channel_id,
            execute: true,
            ..
        }
        | Command::Confirm { channel_id, .. }
        | Command::Complete { channel_id }
        | Command::Clear { channel_id }
        | Command::Revert { channel_id } => Some(channel_id.clone()),
        Command::Out { .. }
        | Command::In { .. }
        | Command::Rebalance { .. }
        | Command::Status { .. }
        | Command::Script { .. } => None,
    }
}

fn render_script(kind: &ScriptKind) -> Result<serde_json::Value> {
    let script = match kind {
        ScriptKind::Out {
            channel_id,
            amount,
            fee_rate,
        } => {
            let mut req = SpliceOutRequest::new(channel_id, amount);
            req.fee_rate = *fee_rate;
            req.validate()?;
            build_splice_out(&req)
        }
        ScriptKind::In {
            channel_id,
            amount,
            fee_rate,
        } => {
            let mut req = SpliceInRequest::new(channel_id, amount);
            req.fee_rate = *fee_rate;
            req.validate()?;
            build_splice_in(&req)
        }
        ScriptKind::Rebalance {
            from_channel_id,
            to_channel_id,
            amount,
            fee_rate,
        } => {
            let mut req = SpliceRebalanceRequest::new(from_channel_id, to_channel_id, amount);
            req.fee_rate = *fee_rate;
            req.validate()?;
            build_splice_rebalance(&req)
        }
    };
    Ok(json!({ "script": script }))
}

async fn run(orchestrator: &SpliceOrchestrator, command: Command) -> Result<serde_json::Value> {
    let out = match command {
        Command::Script { kind } => render_script(&kind)?,
        Command::Out {
            channel_id,
            amount,
            previous_local_balance,
            destination,
            fee_rate,
            force_feerate,
            execute,
        } => {
            let mut req = SpliceOutRequest::new(&channel_id, &amount)
                .with_destination(&destination)
                .with_force_feerate(force_feerate);
            req.fee_rate = fee_rate;

            let dryrun = orchestrator
                .initiate_splice_out(&req)
                .await
                .context("splice-out dry-run")?;

            let execute_req = execute.then(|| ExecuteSpliceRequest {
                channel_id,
                kind: SpliceOperationType::Out,
                script: dryrun.script.clone(),
                previous_local_balance,
                amount,
                destination: Some(destination),
                fee: dryrun.fee,
                force_feerate,
            });
            finish(orchestrator, dryrun, execute_req).await?
        }
        Command::In {
            channel_id,
            amount,
            previous_local_balance,
            fee_rate,
            force_feerate,
            execute,
        } => {
            let mut req =
                SpliceInRequest::new(&channel_id, &amount).with_force_feerate(force_feerate);
            req.fee_rate = fee_rate;

            let dryrun = orchestrator
                .initiate_splice_in(&req)
                .await
                .context("splice-in dry-run")?;

            let execute_req = execute.then(|| ExecuteSpliceRequest {
                channel_id,
                kind: SpliceOperationType::In,
                script: dryrun.script.clone(),
                previous_local_balance,
                amount,
                destination: None,
                fee: dryrun.fee,
                force_feerate,
            });
            finish(orchestrator, dryrun, execute_req).await?
        }
        Command::Rebalance {
            from_channel_id,
            to_channel_id,
            amount,
            fee_rate,
            force_feerate,
        } => {
            let mut req = SpliceRebalanceRequest::new(from_channel_id, to_channel_id, amount)
                .with_force_feerate(force_feerate);
            req.fee_rate = fee_rate;

            let dryrun = orchestrator
                .initiate_rebalance(&req)
                .await
                .context("rebalance dry-run")?;
            json!({ "dryrun": dryrun })
        }
        Command::Status { channel_id } => match channel_id {
            Some(channel_id) => status_json(orchestrator, &channel_id),
            None => json!({
                "operations": orchestrator
                    .operations()
                    .iter()
                    .map(|op| status_json(orchestrator, &op.channel_id))
                    .collect::<Vec<_>>(),
            }),
        },
        Command::Confirm {
            channel_id,
            confirmations,
        } => {
            let status = orchestrator.update_confirmations(&channel_id, confirmations);
            json!({ "channel_id": channel_id, "status": status })
        }
        Command::Complete { channel_id } => {
            let completed = orchestrator.complete_splice(&channel_id);
            json!({ "channel_id": channel_id, "completed": completed })
        }
        Command::Clear { channel_id } => {
            let cleared = orchestrator.clear_splice(&channel_id);
            json!({ "channel_id": channel_id, "cleared": cleared.is_some() })
        }
        Command::Revert { channel_id } => {
            let previous_local_balance = orchestrator.revert_failed_splice(&channel_id);
            json!({
              "channel_id": channel_id,
              "previous_local_balance": previous_local_balance,
            })
        }
    };
    Ok(out)
}

async fn finish(
    orchestrator: &SpliceOrchestrator,
    dryrun: SpliceDryrunResult,
    execute: Option<ExecuteSpliceRequest>,
) -> Result<serde_json::Value> {
    let Some(request) = execute else {
        return Ok(json!({ "dryrun": dryrun }));
    };

    let channel_id = request.channel_id.clone();
    let execution = orchestrator
        .execute_splice(request)
        .await
        .with_context(|| format!("execute splice on {channel_id}"))?;

    Ok(json!({
      "dryrun": dryrun,
      "execution": execution,
      "operation": orchestrator.get_splice_operation(&channel_id),
    }))
}

fn status_json(orchestrator: &SpliceOrchestrator, channel_id: &str) -> serde_json::Value {
    json!({
      "channel_id": channel_id,
      "splicing": orchestrator.is_channel_splicing(channel_id),
      "pending_balance": orchestrator.get_pending_balance(channel_id),
      "operation": orchestrator.get_splice_operation(channel_id),
    })
}
