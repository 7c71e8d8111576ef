//! Deterministic in-process chain.
//!
//! Every submitted transaction is executed immediately and mined into its own
//! block. Accounts are derived from their index and funded at start. Contract
//! behaviour comes from the models in [`contracts`]. Tests can inject node
//! rejections and withhold receipts to exercise failure paths.

pub mod contracts;

use crate::{CallTarget, ChainClient, ClientError};
use alloy_primitives::{keccak256, Address, U256};
use async_trait::async_trait;
use contracts::{ContractModel, Revert};
use harness_types::{
	truncate_id, Account, ConfigSchema, EventRecord, Field, FieldType, Receipt, Schema,
	TransactionHandle, TransactionHash, TxKind, ValidationError, Value,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const DEFAULT_ACCOUNTS: usize = 10;
const DEFAULT_BALANCE_ETHER: u64 = 10_000;
const DEFAULT_CHAIN_ID: u64 = 31337;

/// Gas charged per transaction kind.
const DEPLOY_GAS: u64 = 500_000;
const CALL_GAS: u64 = 60_000;
const TRANSFER_GAS: u64 = 21_000;
/// Gas price in wei (1 gwei).
const GAS_PRICE: u64 = 1_000_000_000;

fn ether(amount: u64) -> U256 {
	U256::from(amount) * U256::from(10u64).pow(U256::from(18u64))
}

/// Settings for a simulated chain.
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
	pub accounts: usize,
	pub balance: U256,
	pub chain_id: u64,
	/// Delay before a receipt is returned.
	pub confirmation_delay: Duration,
}

impl Default for SimulatedConfig {
	fn default() -> Self {
		Self {
			accounts: DEFAULT_ACCOUNTS,
			balance: ether(DEFAULT_BALANCE_ETHER),
			chain_id: DEFAULT_CHAIN_ID,
			confirmation_delay: Duration::ZERO,
		}
	}
}

#[derive(Debug, Default)]
struct ChainState {
	accounts: Vec<Address>,
	balances: HashMap<Address, U256>,
	nonces: HashMap<Address, u64>,
	contracts: HashMap<Address, ContractModel>,
	receipts: HashMap<TransactionHash, Receipt>,
	block_number: u64,
	submitted: usize,
	reject_next: Option<String>,
	withhold_receipts: bool,
}

impl ChainState {
	fn next_nonce(&mut self, sender: Address) -> u64 {
		let nonce = self.nonces.entry(sender).or_default();
		let current = *nonce;
		*nonce += 1;
		current
	}

	/// Common admission checks a node performs before accepting a transaction.
	fn admit(&mut self, sender: Address, value: U256, gas: u64) -> Result<(), ClientError> {
		if let Some(reason) = self.reject_next.take() {
			return Err(ClientError::Rejected(reason));
		}
		if !self.accounts.contains(&sender) {
			return Err(ClientError::Rejected(format!(
				"unknown account {}",
				sender
			)));
		}
		let cost = value + U256::from(gas) * U256::from(GAS_PRICE);
		let balance = self.balances.get(&sender).copied().unwrap_or_default();
		if balance < cost {
			return Err(ClientError::Rejected(format!(
				"insufficient funds for gas * price + value: have {} want {}",
				balance, cost
			)));
		}
		Ok(())
	}

	/// Charges gas, mines a block and stores the receipt.
	fn mine(
		&mut self,
		sender: Address,
		kind: TxKind,
		gas_used: u64,
		outcome: Result<(Option<Address>, Vec<EventRecord>), Revert>,
	) -> TransactionHandle {
		let nonce = self.next_nonce(sender);
		self.block_number += 1;
		self.submitted += 1;

		let fee = U256::from(gas_used) * U256::from(GAS_PRICE);
		if let Some(balance) = self.balances.get_mut(&sender) {
			*balance = balance.saturating_sub(fee);
		}

		let mut preimage = sender.to_vec();
		preimage.extend_from_slice(&nonce.to_be_bytes());
		preimage.extend_from_slice(&self.block_number.to_be_bytes());
		let hash = TransactionHash(keccak256(&preimage).to_vec());

		let (success, contract_address, events) = match outcome {
			Ok((contract_address, events)) => (true, contract_address, events),
			Err(Revert(reason)) => {
				tracing::debug!(
					tx_hash = %truncate_id(&hash.to_string()),
					%reason,
					"Simulated revert"
				);
				(false, None, Vec::new())
			},
		};

		self.receipts.insert(
			hash.clone(),
			Receipt {
				hash: hash.clone(),
				block_number: self.block_number,
				gas_used,
				success,
				contract_address,
				events,
			},
		);
		TransactionHandle { hash, kind }
	}

	fn contract(&self, address: Address) -> Result<&ContractModel, ClientError> {
		self.contracts
			.get(&address)
			.ok_or_else(|| ClientError::UnknownContract(format!("no contract at {}", address)))
	}
}

/// In-process chain implementing [`ChainClient`].
#[derive(Clone)]
pub struct SimulatedChain {
	state: Arc<Mutex<ChainState>>,
	chain_id: u64,
	confirmation_delay: Duration,
}

impl SimulatedChain {
	pub fn new(config: SimulatedConfig) -> Self {
		let accounts: Vec<Address> = (0..config.accounts)
			.map(|index| {
				let seed = keccak256(format!("harness-account-{}", index));
				Address::from_word(seed)
			})
			.collect();
		let balances = accounts.iter().map(|a| (*a, config.balance)).collect();

		Self {
			state: Arc::new(Mutex::new(ChainState {
				accounts,
				balances,
				..Default::default()
			})),
			chain_id: config.chain_id,
			confirmation_delay: config.confirmation_delay,
		}
	}

	/// Makes the next submission fail with `reason`, as a node rejection.
	pub async fn reject_next_submission(&self, reason: impl Into<String>) {
		self.state.lock().await.reject_next = Some(reason.into());
	}

	/// While set, [`ChainClient::await_receipt`] never resolves.
	pub async fn withhold_receipts(&self, withhold: bool) {
		self.state.lock().await.withhold_receipts = withhold;
	}

	/// Number of transactions accepted so far.
	pub async fn submitted_count(&self) -> usize {
		self.state.lock().await.submitted
	}
}

impl Default for SimulatedChain {
	fn default() -> Self {
		Self::new(SimulatedConfig::default())
	}
}

#[async_trait]
impl ChainClient for SimulatedChain {
	async fn list_accounts(&self) -> Result<Vec<Account>, ClientError> {
		let state = self.state.lock().await;
		Ok(state
			.accounts
			.iter()
			.enumerate()
			.map(|(index, address)| Account::new(index, *address, true))
			.collect())
	}

	async fn get_balance(&self, address: Address) -> Result<U256, ClientError> {
		let state = self.state.lock().await;
		Ok(state.balances.get(&address).copied().unwrap_or_default())
	}

	async fn chain_id(&self) -> Result<u64, ClientError> {
		Ok(self.chain_id)
	}

	async fn block_number(&self) -> Result<u64, ClientError> {
		Ok(self.state.lock().await.block_number)
	}

	async fn deploy(
		&self,
		contract: &str,
		args: &[Value],
		sender: Address,
	) -> Result<TransactionHandle, ClientError> {
		let mut state = self.state.lock().await;
		let model = ContractModel::deploy(contract, sender, args)?;
		state.admit(sender, U256::ZERO, DEPLOY_GAS)?;

		let nonce = state.nonces.get(&sender).copied().unwrap_or_default();
		let address = sender.create(nonce);
		state.contracts.insert(address, model);

		let outcome = Ok((Some(address), Vec::new()));
		let handle = state.mine(sender, TxKind::Deploy, DEPLOY_GAS, outcome);
		tracing::info!(
			tx_hash = %truncate_id(&handle.hash.to_string()),
			contract,
			"Submitted transaction"
		);
		Ok(handle)
	}

	async fn call(
		&self,
		target: &CallTarget,
		method: &str,
		args: &[Value],
		sender: Address,
		value: U256,
	) -> Result<TransactionHandle, ClientError> {
		let mut state = self.state.lock().await;
		state.contract(target.address)?.check_call(method, args)?;
		state.admit(sender, value, CALL_GAS)?;

		let outcome = if value.is_zero() {
			let model = state
				.contracts
				.get_mut(&target.address)
				.ok_or_else(|| ClientError::UnknownContract(target.contract.clone()))?;
			model.execute(target.address, sender, method, args)?
		} else {
			Err(Revert("function is not payable".to_string()))
		};

		let handle = state.mine(
			sender,
			TxKind::Call,
			CALL_GAS,
			outcome.map(|events| (None, events)),
		);
		tracing::info!(
			tx_hash = %truncate_id(&handle.hash.to_string()),
			method,
			"Submitted transaction"
		);
		Ok(handle)
	}

	async fn send_value(
		&self,
		from: Address,
		to: Address,
		amount: U256,
	) -> Result<TransactionHandle, ClientError> {
		let mut state = self.state.lock().await;
		state.admit(from, amount, TRANSFER_GAS)?;

		if let Some(balance) = state.balances.get_mut(&from) {
			*balance -= amount;
		}
		*state.balances.entry(to).or_default() += amount;

		let handle = state.mine(from, TxKind::Transfer, TRANSFER_GAS, Ok((None, Vec::new())));
		tracing::info!(tx_hash = %truncate_id(&handle.hash.to_string()), "Submitted transaction");
		Ok(handle)
	}

	async fn read(
		&self,
		target: &CallTarget,
		method: &str,
		args: &[Value],
	) -> Result<Vec<Value>, ClientError> {
		let state = self.state.lock().await;
		state.contract(target.address)?.read(method, args)
	}

	async fn await_receipt(&self, handle: &TransactionHandle) -> Result<Receipt, ClientError> {
		let (receipt, withhold) = {
			let state = self.state.lock().await;
			(state.receipts.get(&handle.hash).cloned(), state.withhold_receipts)
		};
		let receipt = receipt.ok_or_else(|| {
			ClientError::Network(format!("unknown transaction {}", handle.hash))
		})?;

		if withhold {
			std::future::pending::<()>().await;
		}
		if !self.confirmation_delay.is_zero() {
			tokio::time::sleep(self.confirmation_delay).await;
		}
		Ok(receipt)
	}
}

/// Configuration schema for the simulated chain.
pub struct SimulatedChainSchema;

impl ConfigSchema for SimulatedChainSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![
				Field::new(
					"accounts",
					FieldType::Integer {
						min: Some(1),
						max: Some(1000),
					},
				),
				Field::new(
					"balance_ether",
					FieldType::Integer {
						min: Some(0),
						max: None,
					},
				),
				Field::new(
					"chain_id",
					FieldType::Integer {
						min: Some(1),
						max: None,
					},
				),
				Field::new(
					"confirmation_delay_ms",
					FieldType::Integer {
						min: Some(0),
						max: Some(600_000),
					},
				),
			],
		);
		schema.validate(config)
	}
}

/// Factory function to create a simulated chain from a network section.
///
/// Settings (all optional): `accounts` (default 10), `balance_ether` (default
/// 10000), `chain_id` (default 31337), `confirmation_delay_ms` (default 0).
pub fn create_simulated_chain(config: &toml::Value) -> Result<Box<dyn ChainClient>, ClientError> {
	SimulatedChainSchema
		.validate(config)
		.map_err(|e| ClientError::Configuration(format!("Invalid configuration: {}", e)))?;

	let int = |key: &str| config.get(key).and_then(|v| v.as_integer()).map(|v| v as u64);
	let defaults = SimulatedConfig::default();
	let settings = SimulatedConfig {
		accounts: int("accounts").map(|v| v as usize).unwrap_or(defaults.accounts),
		balance: int("balance_ether").map(ether).unwrap_or(defaults.balance),
		chain_id: int("chain_id").unwrap_or(defaults.chain_id),
		confirmation_delay: int("confirmation_delay_ms")
			.map(Duration::from_millis)
			.unwrap_or(defaults.confirmation_delay),
	};

	Ok(Box::new(SimulatedChain::new(settings)))
}

/// Registry for the simulated chain implementation.
pub struct Registry;

impl harness_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "simulated";
	type Factory = crate::ClientFactory;

	fn factory() -> Self::Factory {
		create_simulated_chain
	}
}

impl crate::ClientRegistry for Registry {}
