use chrono::Utc;
use uuid::Uuid;

use splice_orchestrator::lightning::backend::DevSpliceResponse;
use splice_orchestrator::splice::{
    ExecuteSpliceRequest, SpliceOperation, SpliceOperationType, SpliceStatus,
};

pub const TXID: &str = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";

pub fn dryrun_reply(fee_line: Option<&str>) -> DevSpliceResponse {
    let mut dryrun = vec![
        "splice_init: channel c1".to_string(),
        "inputs: 1, outputs: 2".to_string(),
    ];
    if let Some(line) = fee_line {
        dryrun.push(line.to_string());
    }
    DevSpliceResponse {
        txid: Some(TXID.to_string()),
        psbt: Some("cHNidP8BAA==".to_string()),
        tx: None,
        dryrun,
    }
}

pub fn broadcast_reply() -> DevSpliceResponse {
    DevSpliceResponse {
        txid: Some(TXID.to_string()),
        psbt: None,
        tx: Some("020000000001".to_string()),
        dryrun: Vec::new(),
    }
}

pub fn execute_out(channel_id: &str) -> ExecuteSpliceRequest {
    ExecuteSpliceRequest {
        channel_id: channel_id.to_string(),
        kind: SpliceOperationType::Out,
        script: format!("{channel_id} -> 1000sat+fee@500"),
        previous_local_balance: "10000".to_string(),
        amount: "1000".to_string(),
        destination: Some("wallet".to_string()),
        fee: 250,
        force_feerate: false,
    }
}

pub fn operation(channel_id: &str, status: SpliceStatus) -> SpliceOperation {
    SpliceOperation {
        operation_id: Uuid::new_v4(),
        channel_id: channel_id.to_string(),
        txid: (status != SpliceStatus::Failed).then(|| TXID.to_string()),
        kind: SpliceOperationType::Out,
        status,
        amount: "1000".to_string(),
        destination: Some("wallet".to_string()),
        fee: 250,
        script: format!("{channel_id} -> 1000sat+fee"),
        started_at: Utc::now(),
        confirmations: 0,
        error: (status == SpliceStatus::Failed).then(|| "Operation failed".to_string()),
        previous_local_balance: "10000".to_string(),
    }
}
