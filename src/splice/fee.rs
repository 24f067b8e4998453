use std::sync::LazyLock;

use regex::Regex;

/// 1 vbyte is 4 weight units, so 1 sat/vB is 1000 / 4 sat per kiloweight.
const SAT_PER_KW_PER_SAT_PER_VB: f64 = 250.0;

static TRANSCRIPT_FEE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)fee[:\s]+(\d+)\s*sat").expect("transcript fee pattern is valid")
});

/// Converts sat/vB into the node's sat/kw unit, rounding half away from zero.
pub fn convert_fee_rate(sats_per_vbyte: f64) -> u64 {
    (sats_per_vbyte * SAT_PER_KW_PER_SAT_PER_VB).round() as u64
}

/// Fee of a dry-run: the first `fee: N sat` line of the transcript, or
/// `fallback` when no line matches.
pub fn extract_fee<S: AsRef<str>>(transcript: &[S], fallback: u64) -> u64 {
    transcript
        .iter()
        .find_map(|line| {
            TRANSCRIPT_FEE
                .captures(line.as_ref())
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse().ok())
        })
        .unwrap_or(fallback)
}
