//! JSON-RPC chain client built on alloy.
//!
//! Transactions are sent with `eth_sendTransaction` from accounts the node
//! manages, so no key material ever reaches the harness. Contract calls are
//! encoded from artifact ABIs and receipt logs are decoded against every
//! loaded artifact.

use super::artifacts::{decode_output, encode_args, ArtifactStore};
use crate::{CallTarget, ChainClient, ClientError};
use alloy_dyn_abi::JsonAbiExt;
use alloy_network::TransactionBuilder;
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_provider::{Provider, RootProvider};
use alloy_rpc_types::TransactionRequest;
use alloy_transport::TransportError;
use alloy_transport_http::Http;
use async_trait::async_trait;
use harness_types::{
	truncate_id, Account, ConfigSchema, Field, FieldType, Receipt, Schema, TransactionHandle,
	TransactionHash, TxKind, ValidationError, Value,
};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_ARTIFACTS_DIR: &str = "artifacts";
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_MIN_CONFIRMATIONS: u64 = 1;

/// Alloy-based EVM chain client.
pub struct AlloyClient {
	provider: RootProvider<Http<reqwest::Client>>,
	artifacts: ArtifactStore,
	poll_interval: Duration,
	/// Blocks, counting the inclusion block, before a receipt is returned.
	min_confirmations: u64,
}

impl AlloyClient {
	pub fn new(
		rpc_url: &str,
		artifacts: ArtifactStore,
		poll_interval: Duration,
		min_confirmations: u64,
	) -> Result<Self, ClientError> {
		let url = rpc_url
			.parse()
			.map_err(|e| {
				ClientError::Configuration(format!("Invalid RPC URL {}: {}", rpc_url, e))
			})?;

		Ok(Self {
			provider: RootProvider::new_http(url),
			artifacts,
			poll_interval,
			min_confirmations,
		})
	}

	async fn submit(
		&self,
		request: TransactionRequest,
		kind: TxKind,
	) -> Result<TransactionHandle, ClientError> {
		let pending = self
			.provider
			.send_transaction(request)
			.await
			.map_err(submission_error)?;

		let hash = TransactionHash(pending.tx_hash().0.to_vec());
		tracing::info!(
			tx_hash = %truncate_id(&hash.to_string()),
			kind = %kind,
			"Submitted transaction"
		);
		Ok(TransactionHandle { hash, kind })
	}

	fn to_receipt(&self, receipt: alloy_rpc_types::TransactionReceipt) -> Receipt {
		let events = receipt
			.inner
			.logs()
			.iter()
			.map(|log| self.artifacts.decode_log(log.inner.address, &log.inner.data))
			.collect();

		Receipt {
			hash: TransactionHash(receipt.transaction_hash.0.to_vec()),
			block_number: receipt.block_number.unwrap_or(0),
			gas_used: u64::try_from(receipt.gas_used).unwrap_or(u64::MAX),
			success: receipt.status(),
			contract_address: receipt.contract_address,
			events,
		}
	}
}

/// Node-side refusals arrive as JSON-RPC error responses; everything else is transport.
fn submission_error(err: TransportError) -> ClientError {
	if err.as_error_resp().is_some() {
		ClientError::Rejected(err.to_string())
	} else {
		ClientError::Network(err.to_string())
	}
}

fn network_error(context: &str) -> impl Fn(TransportError) -> ClientError + '_ {
	move |err| ClientError::Network(format!("{}: {}", context, err))
}

#[async_trait]
impl ChainClient for AlloyClient {
	async fn list_accounts(&self) -> Result<Vec<Account>, ClientError> {
		let addresses = self
			.provider
			.get_accounts()
			.await
			.map_err(network_error("Failed to list accounts"))?;

		Ok(addresses
			.into_iter()
			.enumerate()
			.map(|(index, address)| Account::new(index, address, true))
			.collect())
	}

	async fn get_balance(&self, address: Address) -> Result<U256, ClientError> {
		self.provider
			.get_balance(address)
			.await
			.map_err(network_error("Failed to get balance"))
	}

	async fn chain_id(&self) -> Result<u64, ClientError> {
		self.provider
			.get_chain_id()
			.await
			.map_err(network_error("Failed to get chain id"))
	}

	async fn block_number(&self) -> Result<u64, ClientError> {
		self.provider
			.get_block_number()
			.await
			.map_err(network_error("Failed to get block number"))
	}

	async fn deploy(
		&self,
		contract: &str,
		args: &[Value],
		sender: Address,
	) -> Result<TransactionHandle, ClientError> {
		let artifact = self.artifacts.get(contract)?;
		if artifact.bytecode.is_empty() {
			return Err(ClientError::Encoding(format!(
				"{} has no creation bytecode",
				contract
			)));
		}

		let mut code = artifact.bytecode.to_vec();
		match artifact.abi.constructor() {
			Some(constructor) => {
				let values = encode_args(&constructor.inputs, args)?;
				let encoded = constructor
					.abi_encode_input(&values)
					.map_err(|e| ClientError::Encoding(e.to_string()))?;
				code.extend_from_slice(&encoded);
			},
			None if !args.is_empty() => {
				return Err(ClientError::Encoding(format!(
					"{} has no constructor but {} argument(s) were given",
					contract,
					args.len()
				)))
			},
			None => {},
		}

		let request = TransactionRequest::default()
			.with_from(sender)
			.with_deploy_code(Bytes::from(code));
		self.submit(request, TxKind::Deploy).await
	}

	async fn call(
		&self,
		target: &CallTarget,
		method: &str,
		args: &[Value],
		sender: Address,
		value: U256,
	) -> Result<TransactionHandle, ClientError> {
		let function = self
			.artifacts
			.function(&target.contract, method, args.len())?;
		let values = encode_args(&function.inputs, args)?;
		let input = function
			.abi_encode_input(&values)
			.map_err(|e| ClientError::Encoding(e.to_string()))?;

		let request = TransactionRequest::default()
			.with_from(sender)
			.with_to(target.address)
			.with_input(Bytes::from(input))
			.with_value(value);
		self.submit(request, TxKind::Call).await
	}

	async fn send_value(
		&self,
		from: Address,
		to: Address,
		amount: U256,
	) -> Result<TransactionHandle, ClientError> {
		let request = TransactionRequest::default()
			.with_from(from)
			.with_to(to)
			.with_value(amount);
		self.submit(request, TxKind::Transfer).await
	}

	async fn read(
		&self,
		target: &CallTarget,
		method: &str,
		args: &[Value],
	) -> Result<Vec<Value>, ClientError> {
		let function = self
			.artifacts
			.function(&target.contract, method, args.len())?;
		let values = encode_args(&function.inputs, args)?;
		let input = function
			.abi_encode_input(&values)
			.map_err(|e| ClientError::Encoding(e.to_string()))?;

		let request = TransactionRequest::default()
			.with_to(target.address)
			.with_input(Bytes::from(input));
		let output = self
			.provider
			.call(&request)
			.await
			.map_err(submission_error)?;

		decode_output(function, &output).map_err(|e| match e {
			ClientError::Decoding(msg) => {
				ClientError::Decoding(format!("{}.{}", target.contract, msg))
			},
			other => other,
		})
	}

	async fn await_receipt(&self, handle: &TransactionHandle) -> Result<Receipt, ClientError> {
		let tx_hash = B256::try_from(handle.hash.0.as_slice())
			.map_err(|e| ClientError::Decoding(format!("Invalid transaction hash: {}", e)))?;
		let short_hash = truncate_id(&handle.hash.to_string());

		loop {
			let receipt = match self
				.provider
				.get_transaction_receipt(tx_hash)
				.await
				.map_err(network_error("Failed to get receipt"))?
			{
				Some(receipt) => receipt,
				None => {
					tracing::debug!(tx_hash = %short_hash, "Receipt not available yet");
					tokio::time::sleep(self.poll_interval).await;
					continue;
				},
			};

			let tx_block = receipt.block_number.unwrap_or(0);
			let current_block = self.block_number().await?;
			let confirmations = current_block.saturating_sub(tx_block) + 1;
			if confirmations >= self.min_confirmations {
				return Ok(self.to_receipt(receipt));
			}

			tracing::debug!(
				tx_hash = %short_hash,
				"Waiting for {} more confirmations...",
				self.min_confirmations - confirmations
			);
			tokio::time::sleep(self.poll_interval).await;
		}
	}
}

/// Configuration schema for the alloy client.
pub struct AlloyClientSchema;

impl AlloyClientSchema {
	pub fn validate_config(config: &toml::Value) -> Result<(), ValidationError> {
		Self.validate(config)
	}
}

impl ConfigSchema for AlloyClientSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("rpc_url", FieldType::Url)],
			vec![
				Field::new("artifacts_dir", FieldType::String),
				Field::new(
					"poll_interval_ms",
					FieldType::Integer {
						min: Some(1),
						max: Some(60_000),
					},
				),
				Field::new(
					"min_confirmations",
					FieldType::Integer {
						min: Some(1),
						max: Some(64),
					},
				),
			],
		);
		schema.validate(config)
	}
}

/// Factory function to create an alloy client from a network section.
///
/// Settings:
/// - `rpc_url` (required): HTTP endpoint of the node
/// - `artifacts_dir` (optional, default `artifacts`): compiled contract JSON
/// - `poll_interval_ms` (optional, default 500): receipt polling interval
/// - `min_confirmations` (optional, default 1): blocks including the inclusion block
pub fn create_alloy_client(config: &toml::Value) -> Result<Box<dyn ChainClient>, ClientError> {
	AlloyClientSchema::validate_config(config)
		.map_err(|e| ClientError::Configuration(format!("Invalid configuration: {}", e)))?;

	let rpc_url = config
		.get("rpc_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| ClientError::Configuration("rpc_url is required".to_string()))?;
	let artifacts_dir = PathBuf::from(
		config
			.get("artifacts_dir")
			.and_then(|v| v.as_str())
			.unwrap_or(DEFAULT_ARTIFACTS_DIR),
	);
	let poll_interval_ms = config
		.get("poll_interval_ms")
		.and_then(|v| v.as_integer())
		.map(|v| v as u64)
		.unwrap_or(DEFAULT_POLL_INTERVAL_MS);
	let min_confirmations = config
		.get("min_confirmations")
		.and_then(|v| v.as_integer())
		.map(|v| v as u64)
		.unwrap_or(DEFAULT_MIN_CONFIRMATIONS);

	// Account and network commands work without a build, so a missing
	// directory only disables deploys and calls.
	let artifacts = if artifacts_dir.is_dir() {
		ArtifactStore::load_dir(&artifacts_dir)?
	} else {
		tracing::warn!(dir = %artifacts_dir.display(), "Artifacts directory not found");
		ArtifactStore::new()
	};

	let client = AlloyClient::new(
		rpc_url,
		artifacts,
		Duration::from_millis(poll_interval_ms),
		min_confirmations,
	)?;
	Ok(Box::new(client))
}

/// Registry for the alloy JSON-RPC implementation.
pub struct Registry;

impl harness_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "evm_alloy";
	type Factory = crate::ClientFactory;

	fn factory() -> Self::Factory {
		create_alloy_client
	}
}

impl crate::ClientRegistry for Registry {}
