//! Account types.
//!
//! Accounts are enumerated once from the chain client when a run starts and are
//! never mutated afterwards.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

/// An account the harness can send transactions from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
	/// Position of the account in the client's enumeration.
	pub index: usize,
	/// The 20-byte account address.
	pub address: Address,
	/// Whether the node holds a signing capability for this account.
	pub can_sign: bool,
}

impl Account {
	pub fn new(index: usize, address: Address, can_sign: bool) -> Self {
		Self {
			index,
			address,
			can_sign,
		}
	}
}
