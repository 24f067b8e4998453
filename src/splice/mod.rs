pub mod amount;
pub mod classify;
pub mod error;
pub mod events;
pub mod fee;
pub mod registry;
pub mod script;
pub mod service;
pub mod store;

use std::str::FromStr as _;

use bitcoin::Address;
use bitcoin::address::NetworkUnchecked;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use self::error::SpliceError;

/// Destination meaning "the node's own on-chain wallet".
pub const WALLET_DESTINATION: &str = "wallet";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpliceOperationType {
    #[default]
    Out,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpliceStatus {
    Pending,
    Executing,
    Confirming,
    Completed,
    Failed,
}

impl SpliceStatus {
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Executing | Self::Confirming)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpliceOperation {
    pub operation_id: Uuid,
    pub channel_id: String,
    pub txid: Option<String>,
    pub kind: SpliceOperationType,
    pub status: SpliceStatus,
    pub amount: String,
    pub destination: Option<String>,
    pub fee: u64,
    pub script: String,
    pub started_at: DateTime<Utc>,
    pub confirmations: u32,
    pub error: Option<String>,
    pub previous_local_balance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpliceOutRequest {
    pub channel_id: String,
    pub amount: String,
    pub destination: Option<String>,
    pub fee_rate: Option<f64>,
    pub force_feerate: bool,
}

impl SpliceOutRequest {
    pub fn new(channel_id: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            amount: amount.into(),
            destination: None,
            fee_rate: None,
            force_feerate: false,
        }
    }

    pub fn with_fee_rate(mut self, sats_per_vbyte: f64) -> Self {
        self.fee_rate = Some(sats_per_vbyte);
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_force_feerate(mut self, force: bool) -> Self {
        self.force_feerate = force;
        self
    }

    pub fn validate(&self) -> Result<(), SpliceError> {
        validate_channel_id(&self.channel_id)?;
        validate_amount(&self.amount)?;
        validate_fee_rate(self.fee_rate)?;
        if let Some(destination) = &self.destination {
            validate_destination(destination)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpliceInRequest {
    pub channel_id: String,
    pub amount: String,
    pub fee_rate: Option<f64>,
    pub force_feerate: bool,
}

impl SpliceInRequest {
    pub fn new(channel_id: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            amount: amount.into(),
            fee_rate: None,
            force_feerate: false,
        }
    }

    pub fn with_fee_rate(mut self, sats_per_vbyte: f64) -> Self {
        self.fee_rate = Some(sats_per_vbyte);
        self
    }

    pub fn with_force_feerate(mut self, force: bool) -> Self {
        self.force_feerate = force;
        self
    }

    pub fn validate(&self) -> Result<(), SpliceError> {
        validate_channel_id(&self.channel_id)?;
        validate_amount(&self.amount)?;
        validate_fee_rate(self.fee_rate)
    }
}

/// Moves `amount` from one channel into another in a single splice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpliceRebalanceRequest {
    pub from_channel_id: String,
    pub to_channel_id: String,
    pub amount: String,
    pub fee_rate: Option<f64>,
    pub force_feerate: bool,
}

impl SpliceRebalanceRequest {
    pub fn new(
        from_channel_id: impl Into<String>,
        to_channel_id: impl Into<String>,
        amount: impl Into<String>,
    ) -> Self {
        Self {
            from_channel_id: from_channel_id.into(),
            to_channel_id: to_channel_id.into(),
            amount: amount.into(),
            fee_rate: None,
            force_feerate: false,
        }
    }

    pub fn with_fee_rate(mut self, sats_per_vbyte: f64) -> Self {
        self.fee_rate = Some(sats_per_vbyte);
        self
    }

    pub fn with_force_feerate(mut self, force: bool) -> Self {
        self.force_feerate = force;
        self
    }

    pub fn validate(&self) -> Result<(), SpliceError> {
        validate_channel_id(&self.from_channel_id)?;
        validate_channel_id(&self.to_channel_id)?;
        if self.from_channel_id == self.to_channel_id {
            return Err(SpliceError::InvalidRequest(
                "rebalance source and target must differ".to_string(),
            ));
        }
        validate_amount(&self.amount)?;
        validate_fee_rate(self.fee_rate)
    }
}

/// Everything `execute_splice` needs to broadcast an approved dry-run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSpliceRequest {
    pub channel_id: String,
    #[serde(default)]
    pub kind: SpliceOperationType,
    pub script: String,
    pub previous_local_balance: String,
    pub amount: String,
    pub destination: Option<String>,
    pub fee: u64,
    pub force_feerate: bool,
}

impl ExecuteSpliceRequest {
    pub fn validate(&self) -> Result<(), SpliceError> {
        validate_channel_id(&self.channel_id)?;
        validate_amount(&self.amount)?;
        if self.script.trim().is_empty() {
            return Err(SpliceError::InvalidRequest("script is required".to_string()));
        }
        if amount::parse_sats(&self.previous_local_balance).is_none() {
            return Err(SpliceError::InvalidRequest(format!(
                "invalid previous_local_balance: {:?}",
                self.previous_local_balance
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpliceDryrunResult {
    pub txid: String,
    pub psbt: Option<String>,
    pub tx: Option<String>,
    pub fee: u64,
    pub transcript: Vec<String>,
    pub script: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpliceExecutionResult {
    pub txid: String,
    pub psbt: Option<String>,
    pub tx: Option<String>,
    pub script: String,
}

fn validate_channel_id(channel_id: &str) -> Result<(), SpliceError> {
    if channel_id.trim().is_empty() {
        return Err(SpliceError::InvalidRequest(
            "channel_id is required".to_string(),
        ));
    }
    if channel_id.contains(char::is_whitespace) || channel_id.contains(';') {
        return Err(SpliceError::InvalidRequest(format!(
            "invalid channel_id: {channel_id:?}"
        )));
    }
    Ok(())
}

fn validate_amount(amount: &str) -> Result<(), SpliceError> {
    match amount::parse_sats(amount) {
        Some(sats) if sats > 0 => Ok(()),
        _ => Err(SpliceError::InvalidRequest(format!(
            "amount must be a positive number of sats: {amount:?}"
        ))),
    }
}

fn validate_fee_rate(fee_rate: Option<f64>) -> Result<(), SpliceError> {
    match fee_rate {
        Some(rate) if !rate.is_finite() || rate <= 0.0 => Err(SpliceError::InvalidRequest(
            format!("fee rate must be a positive number of sat/vB: {rate}"),
        )),
        _ => Ok(()),
    }
}

fn validate_destination(destination: &str) -> Result<(), SpliceError> {
    if destination == WALLET_DESTINATION {
        return Ok(());
    }
    Address::<NetworkUnchecked>::from_str(destination)
        .map(|_| ())
        .map_err(|e| SpliceError::InvalidRequest(format!("invalid destination address: {e}")))
}
