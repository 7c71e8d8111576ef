//! String formatting utilities.
//!
//! Helpers for printing hashes, hex strings and native-token amounts in
//! operator-facing output.

use alloy_primitives::U256;

/// Number of decimals of the native token.
const ETHER_DECIMALS: usize = 18;

/// Shortens a hash or identifier for log lines.
///
/// Keeps the first 10 characters (the `0x` prefix plus 8 hex digits) and
/// appends "..". Shorter input is returned unchanged.
pub fn truncate_id(id: &str) -> String {
	match id.char_indices().nth(10) {
		Some((cut, _)) => format!("{}..", &id[..cut]),
		None => id.to_string(),
	}
}

/// Adds a "0x" prefix to a hex string that lacks one.
pub fn with_0x_prefix(hex_str: &str) -> String {
	if hex_str.starts_with("0x") || hex_str.starts_with("0X") {
		hex_str.to_string()
	} else {
		format!("0x{}", hex_str)
	}
}

/// Strips a leading "0x" or "0X" from a hex string.
pub fn without_0x_prefix(hex_str: &str) -> &str {
	hex_str
		.strip_prefix("0x")
		.or_else(|| hex_str.strip_prefix("0X"))
		.unwrap_or(hex_str)
}

/// Formats a wei amount as ether with trailing zeros removed.
///
/// `1500000000000000000` becomes `"1.5"`, whole amounts keep one decimal
/// place (`"10000.0"`) the way operators expect balances to read.
pub fn format_ether(wei: U256) -> String {
	let digits = wei.to_string();
	let (whole, fraction) = if digits.len() > ETHER_DECIMALS {
		let split = digits.len() - ETHER_DECIMALS;
		(digits[..split].to_string(), digits[split..].to_string())
	} else {
		("0".to_string(), format!("{:0>width$}", digits, width = ETHER_DECIMALS))
	};

	let fraction = fraction.trim_end_matches('0');
	if fraction.is_empty() {
		format!("{}.0", whole)
	} else {
		format!("{}.{}", whole, fraction)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_truncate_id() {
		assert_eq!(truncate_id("0x1234"), "0x1234");
		assert_eq!(truncate_id("0x12345678"), "0x12345678");
		assert_eq!(
			truncate_id("0x9fe46736679d2d9a65f0992f2272de9f3c7fa6e0"),
			"0x9fe46736.."
		);
	}

	#[test]
	fn test_prefix_helpers() {
		assert_eq!(with_0x_prefix("abcd"), "0xabcd");
		assert_eq!(with_0x_prefix("0Xabcd"), "0Xabcd");
		assert_eq!(without_0x_prefix("0xabcd"), "abcd");
		assert_eq!(without_0x_prefix("abcd"), "abcd");
	}

	#[test]
	fn test_format_ether() {
		let one_ether = U256::from(10u64).pow(U256::from(18u64));
		assert_eq!(format_ether(one_ether), "1.0");
		assert_eq!(format_ether(one_ether * U256::from(10_000u64)), "10000.0");
		assert_eq!(format_ether(U256::from(1_500_000_000_000_000_000u64)), "1.5");
		assert_eq!(format_ether(U256::from(21_000u64)), "0.000000000000021");
		assert_eq!(format_ether(U256::ZERO), "0.0");
	}
}
