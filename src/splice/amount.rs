//! Integer arithmetic on sat amounts carried as decimal strings.

/// Parses a signed decimal sat amount. Rejects empty strings, a leading `+`,
/// fractional parts and anything that does not fit in an `i128`.
pub fn parse_sats(s: &str) -> Option<i128> {
    let digits = s.strip_prefix('-').unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// `previous - amount - fee`, or `None` when an input does not parse or the
/// arithmetic overflows.
pub fn balance_after_splice_out(previous: &str, amount: &str, fee: u64) -> Option<String> {
    let previous = parse_sats(previous)?;
    let amount = parse_sats(amount)?;
    previous
        .checked_sub(amount)?
        .checked_sub(i128::from(fee))
        .map(|balance| balance.to_string())
}
