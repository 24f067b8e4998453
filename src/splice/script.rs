//! Renders splice intents into the node's splice script language.
//!
//! ```text
//! <channel> -> <amount>sat+fee[@<sat/kw>]
//! wallet -> <amount>sat; <amount>sat-fee[@<sat/kw>] -> <channel>
//! ```

use super::fee::convert_fee_rate;
use super::{SpliceInRequest, SpliceOutRequest, SpliceRebalanceRequest};

const WALLET_POOL: &str = "wallet";

pub fn build_splice_out(request: &SpliceOutRequest) -> String {
    format!(
        "{} -> {}sat+fee{}",
        request.channel_id,
        request.amount,
        fee_annotation(request.fee_rate)
    )
}

pub fn build_splice_in(request: &SpliceInRequest) -> String {
    transfer(
        WALLET_POOL,
        &request.channel_id,
        &request.amount,
        request.fee_rate,
    )
}

pub fn build_splice_rebalance(request: &SpliceRebalanceRequest) -> String {
    transfer(
        &request.from_channel_id,
        &request.to_channel_id,
        &request.amount,
        request.fee_rate,
    )
}

fn transfer(from: &str, to: &str, amount: &str, fee_rate: Option<f64>) -> String {
    format!(
        "{from} -> {amount}sat; {amount}sat-fee{} -> {to}",
        fee_annotation(fee_rate)
    )
}

fn fee_annotation(fee_rate: Option<f64>) -> String {
    fee_rate
        .map(|rate| format!("@{}", convert_fee_rate(rate)))
        .unwrap_or_default()
}
