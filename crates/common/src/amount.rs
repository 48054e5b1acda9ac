//! Exact stroop arithmetic.
//!
//! All ledger amounts are i64 stroops (1 XLM = 10_000_000 stroops). The API
//! accepts decimal XLM strings and converts without ever touching floats,
//! so 350 XLM at a 15% penalty refunds exactly 297.5 XLM.

use crate::{Error, Result};

/// Stroops per XLM
pub const STROOPS_PER_XLM: i64 = 10_000_000;

const XLM_DECIMALS: u32 = 7;

/// Parse a decimal XLM string ("50", "297.50") into stroops.
pub fn parse_xlm(s: &str) -> Result<i64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::Validation("amount must not be empty".to_string()));
    }
    let (sign, s) = match s.strip_prefix('-') {
        Some(rest) => (-1i64, rest),
        None => (1i64, s),
    };

    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(Error::Validation(format!("invalid amount: {s}")));
    }
    if frac.len() > XLM_DECIMALS as usize {
        return Err(Error::Validation(format!(
            "amount has more than {XLM_DECIMALS} decimal places: {s}"
        )));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::Validation(format!("invalid amount: {s}")));
    }

    let whole: i64 = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .map_err(|_| Error::Validation(format!("invalid amount: {s}")))?
    };
    let mut frac_stroops: i64 = if frac.is_empty() {
        0
    } else {
        frac.parse()
            .map_err(|_| Error::Validation(format!("invalid amount: {s}")))?
    };
    frac_stroops *= 10_i64.pow(XLM_DECIMALS - frac.len() as u32);

    whole
        .checked_mul(STROOPS_PER_XLM)
        .and_then(|w| w.checked_add(frac_stroops))
        .and_then(|v| v.checked_mul(sign))
        .ok_or_else(|| Error::Validation(format!("amount out of range: {s}")))
}

/// Format stroops as a decimal XLM string with trailing zeros trimmed.
pub fn format_xlm(stroops: i64) -> String {
    let sign = if stroops < 0 { "-" } else { "" };
    let abs = stroops.unsigned_abs();
    let whole = abs / STROOPS_PER_XLM as u64;
    let frac = abs % STROOPS_PER_XLM as u64;
    if frac == 0 {
        return format!("{sign}{whole}");
    }
    let frac = format!("{frac:07}");
    format!("{sign}{whole}.{}", frac.trim_end_matches('0'))
}

/// Penalty for an early withdrawal, in stroops. Integer division truncates
/// toward zero, matching the on-chain contract.
pub fn penalty_for(amount: i64, penalty_percent: u32) -> i64 {
    ((amount as i128 * penalty_percent as i128) / 100) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_whole_and_fraction() {
        assert_eq!(parse_xlm("1").unwrap(), STROOPS_PER_XLM);
        assert_eq!(parse_xlm("50.00").unwrap(), 50 * STROOPS_PER_XLM);
        assert_eq!(parse_xlm("297.5").unwrap(), 2_975_000_000);
        assert_eq!(parse_xlm("0.0000001").unwrap(), 1);
        assert_eq!(parse_xlm(".5").unwrap(), 5_000_000);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_xlm("").is_err());
        assert!(parse_xlm("abc").is_err());
        assert!(parse_xlm("1.00000001").is_err());
        assert!(parse_xlm("1.2.3").is_err());
    }

    #[test]
    fn test_format_roundtrip() {
        assert_eq!(format_xlm(50 * STROOPS_PER_XLM), "50");
        assert_eq!(format_xlm(2_975_000_000), "297.5");
        assert_eq!(format_xlm(1), "0.0000001");
        assert_eq!(format_xlm(0), "0");
    }

    #[test]
    fn test_penalty_fifteen_percent() {
        // 350 XLM at 15% -> 52.5 XLM penalty, 297.5 XLM refund
        let amount = parse_xlm("350").unwrap();
        let penalty = penalty_for(amount, 15);
        assert_eq!(format_xlm(penalty), "52.5");
        assert_eq!(format_xlm(amount - penalty), "297.5");
    }

    #[test]
    fn test_penalty_truncates() {
        assert_eq!(penalty_for(10, 15), 1);
        assert_eq!(penalty_for(0, 15), 0);
    }
}
