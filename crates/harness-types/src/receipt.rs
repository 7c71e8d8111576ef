//! Transaction handle and receipt types.
//!
//! A handle is what the chain client returns right after submission; it
//! resolves to exactly one [`Receipt`] or to a failure once the transaction is
//! mined or rejected.

use crate::{utils::with_0x_prefix, Value};
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Blockchain transaction hash, stored as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionHash(pub Vec<u8>);

impl fmt::Display for TransactionHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&with_0x_prefix(&hex::encode(&self.0)))
	}
}

/// What kind of transaction a step submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
	/// Contract creation.
	Deploy,
	/// State-changing contract call.
	Call,
	/// Plain native-token transfer.
	Transfer,
}

impl fmt::Display for TxKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TxKind::Deploy => f.write_str("deploy"),
			TxKind::Call => f.write_str("call"),
			TxKind::Transfer => f.write_str("transfer"),
		}
	}
}

/// Opaque reference to a submitted, not yet confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionHandle {
	pub hash: TransactionHash,
	pub kind: TxKind,
}

/// One named field of a decoded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventField {
	pub name: String,
	pub value: Value,
}

/// An event emitted during execution and recorded in the receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
	/// Event name, or [`EventRecord::UNKNOWN_TAG`] when the log could not be decoded.
	pub tag: String,
	/// Address of the contract that emitted the event.
	pub address: Address,
	/// Decoded fields in declaration order.
	pub fields: Vec<EventField>,
}

impl EventRecord {
	pub const UNKNOWN_TAG: &'static str = "unknown";

	pub fn new(tag: impl Into<String>, address: Address) -> Self {
		Self {
			tag: tag.into(),
			address,
			fields: Vec::new(),
		}
	}

	pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
		self.fields.push(EventField {
			name: name.into(),
			value: value.into(),
		});
		self
	}

	/// Looks up a field by name.
	pub fn field(&self, name: &str) -> Option<&Value> {
		self.fields
			.iter()
			.find(|field| field.name == name)
			.map(|field| &field.value)
	}
}

/// Confirmed outcome of a mined transaction. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
	/// The hash of the transaction.
	pub hash: TransactionHash,
	/// The block number where the transaction was included.
	pub block_number: u64,
	/// Gas consumed by the transaction.
	pub gas_used: u64,
	/// Whether the transaction executed successfully.
	pub success: bool,
	/// Address of the created contract, for deployments.
	pub contract_address: Option<Address>,
	/// Emitted events in log order.
	pub events: Vec<EventRecord>,
}

impl Receipt {
	/// Returns the first event carrying the given tag.
	pub fn first_event(&self, tag: &str) -> Option<&EventRecord> {
		self.events.iter().find(|event| event.tag == tag)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_hash_display_is_prefixed_hex() {
		let hash = TransactionHash(vec![0xab, 0xcd, 0x01]);
		assert_eq!(hash.to_string(), "0xabcd01");
	}

	#[test]
	fn test_first_event_picks_receipt_order() {
		let receipt = Receipt {
			hash: TransactionHash(vec![1]),
			block_number: 3,
			gas_used: 21_000,
			success: true,
			contract_address: None,
			events: vec![
				EventRecord::new("Approval", Address::ZERO).with_field("value", 9u64),
				EventRecord::new("Transfer", Address::ZERO).with_field("tokenId", 1u64),
				EventRecord::new("Transfer", Address::ZERO).with_field("tokenId", 2u64),
			],
		};

		let event = receipt.first_event("Transfer").unwrap();
		assert_eq!(event.field("tokenId"), Some(&Value::from(1u64)));
		assert!(receipt.first_event("Mint").is_none());
	}
}
