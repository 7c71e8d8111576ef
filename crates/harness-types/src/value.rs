//! Typed on-chain values.
//!
//! Values flow from plan arguments into contract calls, out of decoded events
//! into plan variables, and into the verifier. Numbers are kept as 256-bit
//! integers end to end so large on-chain quantities never lose precision.

use crate::utils::without_0x_prefix;
use alloy_primitives::{Address, Bytes, I256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when parsing text into a typed value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValueError {
	#[error("cannot read '{raw}' as {kind}: {reason}")]
	Invalid {
		kind: ValueKind,
		raw: String,
		reason: String,
	},
}

/// The type of a [`Value`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
	Uint,
	Int,
	Address,
	Bool,
	String,
	Bytes,
}

impl fmt::Display for ValueKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			ValueKind::Uint => "unsigned integer",
			ValueKind::Int => "signed integer",
			ValueKind::Address => "address",
			ValueKind::Bool => "boolean",
			ValueKind::String => "string",
			ValueKind::Bytes => "bytes",
		};
		f.write_str(name)
	}
}

/// A typed value as read from or written to the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
	Uint(U256),
	Int(I256),
	Address(Address),
	Bool(bool),
	String(String),
	Bytes(Bytes),
}

impl Value {
	pub fn kind(&self) -> ValueKind {
		match self {
			Value::Uint(_) => ValueKind::Uint,
			Value::Int(_) => ValueKind::Int,
			Value::Address(_) => ValueKind::Address,
			Value::Bool(_) => ValueKind::Bool,
			Value::String(_) => ValueKind::String,
			Value::Bytes(_) => ValueKind::Bytes,
		}
	}

	/// Parses `raw` as a value of the given kind.
	///
	/// Integers accept decimal or `0x` hex, addresses accept any letter case,
	/// bytes accept hex with or without prefix.
	pub fn parse_as(kind: ValueKind, raw: &str) -> Result<Value, ValueError> {
		let raw = raw.trim();
		let invalid = |reason: String| ValueError::Invalid {
			kind,
			raw: raw.to_string(),
			reason,
		};

		match kind {
			ValueKind::Uint => U256::from_str(raw)
				.map(Value::Uint)
				.map_err(|e| invalid(e.to_string())),
			ValueKind::Int => parse_i256(raw).map(Value::Int).map_err(invalid),
			ValueKind::Address => Address::from_str(raw)
				.map(Value::Address)
				.map_err(|e| invalid(e.to_string())),
			ValueKind::Bool => match raw {
				"true" => Ok(Value::Bool(true)),
				"false" => Ok(Value::Bool(false)),
				_ => Err(invalid("expected 'true' or 'false'".to_string())),
			},
			ValueKind::String => Ok(Value::String(raw.to_string())),
			ValueKind::Bytes => hex::decode(without_0x_prefix(raw))
				.map(|b| Value::Bytes(Bytes::from(b)))
				.map_err(|e| invalid(e.to_string())),
		}
	}

	/// Re-reads this value as another kind, going through its text form.
	pub fn coerce(&self, kind: ValueKind) -> Result<Value, ValueError> {
		if self.kind() == kind {
			return Ok(self.clone());
		}
		Value::parse_as(kind, &self.to_abi_text())
	}

	/// Text form accepted by ABI coercion: decimal numbers, lowercase addresses.
	pub fn to_abi_text(&self) -> String {
		match self {
			Value::Address(address) => format!("{:#x}", address),
			other => other.to_string(),
		}
	}

	pub fn as_u256(&self) -> Option<U256> {
		match self {
			Value::Uint(v) => Some(*v),
			Value::Int(v) if !v.is_negative() => Some(v.into_raw()),
			_ => None,
		}
	}

	pub fn as_address(&self) -> Option<Address> {
		match self {
			Value::Address(a) => Some(*a),
			_ => None,
		}
	}
}

fn parse_i256(raw: &str) -> Result<I256, String> {
	let (negative, digits) = match raw.strip_prefix('-') {
		Some(rest) => (true, rest),
		None => (false, raw),
	};
	let magnitude = if digits.starts_with("0x") || digits.starts_with("0X") {
		I256::from_hex_str(digits).map_err(|e| e.to_string())?
	} else {
		I256::from_dec_str(digits).map_err(|e| e.to_string())?
	};
	Ok(if negative { -magnitude } else { magnitude })
}

impl fmt::Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Value::Uint(v) => write!(f, "{}", v),
			Value::Int(v) => write!(f, "{}", v),
			Value::Address(a) => write!(f, "{}", a),
			Value::Bool(b) => write!(f, "{}", b),
			Value::String(s) => f.write_str(s),
			Value::Bytes(b) => write!(f, "{}", b),
		}
	}
}

impl From<u64> for Value {
	fn from(v: u64) -> Self {
		Value::Uint(U256::from(v))
	}
}

impl From<U256> for Value {
	fn from(v: U256) -> Self {
		Value::Uint(v)
	}
}

impl From<Address> for Value {
	fn from(a: Address) -> Self {
		Value::Address(a)
	}
}

impl From<bool> for Value {
	fn from(b: bool) -> Self {
		Value::Bool(b)
	}
}

impl From<&str> for Value {
	fn from(s: &str) -> Self {
		Value::String(s.to_string())
	}
}

impl From<String> for Value {
	fn from(s: String) -> Self {
		Value::String(s)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_large_uint_exactly() {
		let two_pow_200 = U256::from(1u8) << 200usize;
		let parsed = Value::parse_as(ValueKind::Uint, &two_pow_200.to_string()).unwrap();
		assert_eq!(parsed, Value::Uint(two_pow_200));

		let hex = format!("{:#x}", two_pow_200);
		let parsed_hex = Value::parse_as(ValueKind::Uint, &hex).unwrap();
		assert_eq!(parsed_hex, Value::Uint(two_pow_200));
	}

	#[test]
	fn test_address_parsing_ignores_case() {
		let lower = Value::parse_as(
			ValueKind::Address,
			"0x5fbdb2315678afecb367f032d93f642f64180aa3",
		)
		.unwrap();
		let upper = Value::parse_as(
			ValueKind::Address,
			"0x5FBDB2315678AFECB367F032D93F642F64180AA3",
		)
		.unwrap();
		assert_eq!(lower, upper);
	}

	#[test]
	fn test_negative_int() {
		let parsed = Value::parse_as(ValueKind::Int, "-42").unwrap();
		assert_eq!(parsed, Value::Int(I256::try_from(-42i64).unwrap()));
	}

	#[test]
	fn test_invalid_input_reports_kind() {
		let err = Value::parse_as(ValueKind::Bool, "yes").unwrap_err();
		assert!(err.to_string().contains("boolean"));
	}

	#[test]
	fn test_coerce_string_to_uint() {
		let value = Value::from("1000");
		assert_eq!(value.coerce(ValueKind::Uint).unwrap(), Value::from(1000u64));
	}
}
