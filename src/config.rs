use std::time::Duration;

/// Fee reported for a dry-run whose transcript carries no `fee: N sat` line.
// TODO: replace with a real estimate from the node's feerates once dry-run
// transcripts are confirmed to always include the fee line.
pub const DEFAULT_FALLBACK_FEE_SATS: u64 = 250;

/// Unwrapped backend messages at or below this many characters are reported
/// as a generic failure instead of verbatim.
pub const DEFAULT_VERBATIM_MIN_LEN: usize = 10;

#[derive(Debug, Clone)]
pub struct SpliceConfig {
    pub fallback_fee_sats: u64,
    pub verbatim_min_len: usize,
    pub event_capacity: usize,
    pub request_timeout: Duration,
}

impl Default for SpliceConfig {
    fn default() -> Self {
        Self {
            fallback_fee_sats: DEFAULT_FALLBACK_FEE_SATS,
            verbatim_min_len: DEFAULT_VERBATIM_MIN_LEN,
            event_capacity: 64,
            request_timeout: Duration::from_secs(30),
        }
    }
}
