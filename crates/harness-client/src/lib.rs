//! Chain client module for the transaction harness.
//!
//! This module is the only place the harness talks to a chain. It defines the
//! [`ChainClient`] boundary the executor drives and ships two implementations:
//! an alloy-based JSON-RPC client for real nodes and a deterministic in-process
//! chain for dry runs and tests.

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use harness_types::{Account, ImplementationRegistry, Receipt, TransactionHandle, Value};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod evm {
		pub mod alloy;
		pub mod artifacts;
	}
	pub mod simulated;
}

/// Errors that can occur while talking to a chain.
#[derive(Debug, Error)]
pub enum ClientError {
	/// The node refused the transaction or the request.
	#[error("Rejected: {0}")]
	Rejected(String),
	/// Transport or node failure.
	#[error("Network error: {0}")]
	Network(String),
	/// No artifact or ABI is known for the named contract.
	#[error("Unknown contract: {0}")]
	UnknownContract(String),
	/// Arguments could not be encoded for the call.
	#[error("Encoding error: {0}")]
	Encoding(String),
	/// A response could not be decoded.
	#[error("Decoding error: {0}")]
	Decoding(String),
	/// Invalid implementation settings.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// A contract a call or read is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTarget {
	pub address: Address,
	/// Artifact name whose ABI describes the contract.
	pub contract: String,
}

impl CallTarget {
	pub fn new(address: Address, contract: impl Into<String>) -> Self {
		Self {
			address,
			contract: contract.into(),
		}
	}
}

/// Interface to a chain node.
///
/// Every method is a single request; nothing is retried. Submission methods
/// return as soon as the node accepts the transaction, and
/// [`ChainClient::await_receipt`] resolves the handle to its receipt.
#[async_trait]
pub trait ChainClient: Send + Sync {
	/// Accounts the node can send from, in its own order.
	async fn list_accounts(&self) -> Result<Vec<Account>, ClientError>;

	/// Native balance in wei.
	async fn get_balance(&self, address: Address) -> Result<U256, ClientError>;

	async fn chain_id(&self) -> Result<u64, ClientError>;

	async fn block_number(&self) -> Result<u64, ClientError>;

	/// Submits a contract creation built from the named artifact.
	async fn deploy(
		&self,
		contract: &str,
		args: &[Value],
		sender: Address,
	) -> Result<TransactionHandle, ClientError>;

	/// Submits a state-changing call.
	async fn call(
		&self,
		target: &CallTarget,
		method: &str,
		args: &[Value],
		sender: Address,
		value: U256,
	) -> Result<TransactionHandle, ClientError>;

	/// Submits a plain value transfer.
	async fn send_value(
		&self,
		from: Address,
		to: Address,
		amount: U256,
	) -> Result<TransactionHandle, ClientError>;

	/// Evaluates a read-only call against the latest state.
	async fn read(
		&self,
		target: &CallTarget,
		method: &str,
		args: &[Value],
	) -> Result<Vec<Value>, ClientError>;

	/// Waits until the transaction is mined and returns its receipt.
	///
	/// A mined transaction with a failed status is still returned as a
	/// receipt with `success == false`.
	async fn await_receipt(&self, handle: &TransactionHandle) -> Result<Receipt, ClientError>;
}

/// Type alias for chain client factory functions.
pub type ClientFactory = fn(&toml::Value) -> Result<Box<dyn ChainClient>, ClientError>;

/// Registry trait for chain client implementations.
pub trait ClientRegistry: ImplementationRegistry<Factory = ClientFactory> {}

/// Get all registered chain client implementations.
///
/// Returns (kind, factory) pairs; the configured network `kind` selects one.
pub fn get_all_implementations() -> Vec<(&'static str, ClientFactory)> {
	use implementations::{evm::alloy, simulated};

	vec![
		(alloy::Registry::NAME, alloy::Registry::factory()),
		(simulated::Registry::NAME, simulated::Registry::factory()),
	]
}

/// Builds the client for a network `kind` from its settings.
pub fn create_client(
	kind: &str,
	config: &toml::Value,
) -> Result<Box<dyn ChainClient>, ClientError> {
	let factory = get_all_implementations()
		.into_iter()
		.find_map(|(name, factory)| (name == kind).then_some(factory))
		.ok_or_else(|| {
			ClientError::Configuration(format!("Unknown network kind '{}'", kind))
		})?;
	factory(config)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_registered_kinds() {
		let kinds: Vec<_> = get_all_implementations()
			.into_iter()
			.map(|(name, _)| name)
			.collect();
		assert_eq!(kinds, vec!["evm_alloy", "simulated"]);
	}

	#[tokio::test]
	async fn test_create_client_by_kind() {
		let config = toml::Value::Table(toml::Table::new());
		let client = create_client("simulated", &config).unwrap();
		assert!(!client.list_accounts().await.unwrap().is_empty());

		assert!(matches!(
			create_client("solana", &config),
			Err(ClientError::Configuration(_))
		));
	}
}
