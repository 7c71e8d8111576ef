//! Plan execution.
//!
//! Drives a validated plan through the chain client one step at a time:
//! resolve arguments, submit, wait for the receipt, extract variables and
//! verify expectations. A step that cannot complete ends the run; failed
//! assertions only end it when configured to.

use crate::extractor::extract;
use crate::scope::{ContractRef, Scope};
use crate::validation::{validate_plan, PlanValidationError};
use crate::verifier::{verify, Observation, VerificationContext};
use alloy_primitives::{Address, U256};
use chrono::Utc;
use harness_client::{CallTarget, ChainClient, ClientError};
use harness_types::{
	truncate_id, Account, ActionPlan, ActionStep, Argument, AssertionResult, Binding, Comparison,
	Expectation, QuerySpec, Receipt, RunReport, StepAction, StepFailure, StepReport, Subject,
	TransactionHandle, Value, ValueKind, Verdict,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
	/// How long to wait for a receipt before the step fails.
	pub confirmation_timeout: Duration,
	/// Stop the run at the first step with a failed assertion.
	pub halt_on_assertion_failure: bool,
}

impl Default for ExecutorOptions {
	fn default() -> Self {
		Self {
			confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
			halt_on_assertion_failure: false,
		}
	}
}

/// Shared flag checked between steps. Setting it stops the run before the
/// next step is submitted.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
	pub fn cancel(&self) {
		self.0.store(true, Ordering::SeqCst);
	}

	pub fn is_cancelled(&self) -> bool {
		self.0.load(Ordering::SeqCst)
	}
}

/// A step's transaction with every argument resolved.
enum Submission {
	Deploy {
		contract: String,
		args: Vec<Value>,
	},
	Call {
		target: CallTarget,
		method: String,
		args: Vec<Value>,
		value: U256,
	},
	Transfer {
		to: Address,
		amount: U256,
	},
}

pub struct Executor {
	client: Arc<dyn ChainClient>,
	accounts: Vec<Account>,
	options: ExecutorOptions,
	cancellation: CancellationFlag,
}

impl Executor {
	pub fn new(
		client: Arc<dyn ChainClient>,
		accounts: Vec<Account>,
		options: ExecutorOptions,
	) -> Self {
		Self {
			client,
			accounts,
			options,
			cancellation: CancellationFlag::default(),
		}
	}

	/// Creates an executor using the accounts the client reports.
	pub async fn connect(
		client: Arc<dyn ChainClient>,
		options: ExecutorOptions,
	) -> Result<Self, ClientError> {
		let accounts = client.list_accounts().await?;
		tracing::debug!(accounts = accounts.len(), "Fetched accounts");
		Ok(Self::new(client, accounts, options))
	}

	pub fn with_cancellation(mut self, cancellation: CancellationFlag) -> Self {
		self.cancellation = cancellation;
		self
	}

	pub fn cancellation(&self) -> CancellationFlag {
		self.cancellation.clone()
	}

	pub fn accounts(&self) -> &[Account] {
		&self.accounts
	}

	/// Runs a plan to completion, first failure or cancellation.
	///
	/// An invalid plan is rejected before the client is used at all.
	pub async fn run(&self, plan: &ActionPlan) -> Result<RunReport, PlanValidationError> {
		validate_plan(plan, self.accounts.len())?;

		let started_at = Utc::now();
		let mut scope = Scope::new(self.accounts.clone());
		for decl in &plan.contracts {
			scope.declare_contract(
				decl.alias.clone(),
				ContractRef {
					address: decl.address,
					contract: decl.contract.clone(),
				},
			);
		}

		tracing::info!(plan = %plan.name, steps = plan.steps.len(), "Starting plan");

		let mut steps = Vec::with_capacity(plan.steps.len());
		let mut verdict = Verdict::Pass;
		for (index, step) in plan.steps.iter().enumerate() {
			if self.cancellation.is_cancelled() {
				tracing::warn!(step = index + 1, "Run cancelled before step");
				verdict = Verdict::Cancelled;
				break;
			}

			let report = self.execute_step(index, step, &mut scope).await;
			let terminal = report.failure.is_some();
			let assertions_held = report.assertions.iter().all(|a| a.passed);
			steps.push(report);

			if terminal {
				verdict = Verdict::Fail;
				break;
			}
			if !assertions_held {
				verdict = Verdict::Fail;
				if self.options.halt_on_assertion_failure {
					tracing::warn!(step = index + 1, "Halting after failed assertion");
					break;
				}
			}
		}

		tracing::info!(plan = %plan.name, %verdict, executed = steps.len(), "Plan finished");

		Ok(RunReport {
			plan: plan.name.clone(),
			steps,
			verdict,
			started_at,
			finished_at: Utc::now(),
		})
	}

	#[instrument(skip_all, fields(step = index + 1, label = %step.display_label()))]
	async fn execute_step(&self, index: usize, step: &ActionStep, scope: &mut Scope) -> StepReport {
		let mut report = StepReport::new(index, step.display_label(), step.kind());
		if let Err(failure) = self.try_step(step, scope, &mut report).await {
			tracing::warn!(error = %failure, "Step failed");
			report.failure = Some(failure);
		}
		report
	}

	async fn try_step(
		&self,
		step: &ActionStep,
		scope: &mut Scope,
		report: &mut StepReport,
	) -> Result<(), StepFailure> {
		let sender = scope
			.account(step.from)
			.map(|account| account.address)
			.ok_or_else(|| argument_failure(format!("no account with index {}", step.from)))?;
		let submission = prepare(&step.action, scope).map_err(argument_failure)?;

		let mut baselines = Vec::with_capacity(step.expect.len());
		for expectation in &step.expect {
			baselines.push(match expectation.comparison {
				Comparison::Delta => self.observe(expectation, scope).await,
				Comparison::Equals => None,
			});
		}

		let handle = self
			.submit(&submission, sender)
			.await
			.map_err(|e| StepFailure::Submission {
				message: e.to_string(),
			})?;
		let tx_hash = handle.hash.to_string();
		report.tx_hash = Some(tx_hash.clone());

		let receipt = self.confirm(&handle).await?;
		report.block_number = Some(receipt.block_number);
		report.gas_used = Some(receipt.gas_used);
		report.contract_address = receipt.contract_address;

		if !receipt.success {
			return Err(StepFailure::ExecutionRevert { tx_hash });
		}
		tracing::info!(
			tx_hash = %truncate_id(&tx_hash),
			block = receipt.block_number,
			gas_used = receipt.gas_used,
			"Confirmed"
		);

		if let (Submission::Deploy { contract, .. }, Some(alias)) = (&submission, &step.id) {
			let address = receipt.contract_address.ok_or_else(|| StepFailure::Submission {
				message: format!("deployment {} produced no contract address", tx_hash),
			})?;
			scope.declare_contract(
				alias.clone(),
				ContractRef {
					address,
					contract: contract.clone(),
				},
			);
			report.bindings.push(Binding {
				name: alias.clone(),
				value: Value::Address(address),
			});
		}

		for binding in extract(&receipt, &step.extract)? {
			tracing::debug!(name = %binding.name, value = %binding.value, "Bound variable");
			scope.bind(binding.name.clone(), binding.value.clone());
			report.bindings.push(binding);
		}

		report.assertions = self.check(step, scope, &receipt, baselines).await;
		for failed in report.assertions.iter().filter(|a| !a.passed) {
			tracing::warn!(
				assertion = %failed.description,
				expected = %failed.expected,
				observed = %failed.observed,
				"Assertion failed"
			);
		}
		Ok(())
	}

	async fn submit(
		&self,
		submission: &Submission,
		sender: Address,
	) -> Result<TransactionHandle, ClientError> {
		match submission {
			Submission::Deploy { contract, args } => {
				self.client.deploy(contract, args, sender).await
			},
			Submission::Call {
				target,
				method,
				args,
				value,
			} => self.client.call(target, method, args, sender, *value).await,
			Submission::Transfer { to, amount } => {
				self.client.send_value(sender, *to, *amount).await
			},
		}
	}

	/// Waits for the receipt within the configured confirmation window.
	async fn confirm(&self, handle: &TransactionHandle) -> Result<Receipt, StepFailure> {
		let timeout = self.options.confirmation_timeout;
		match tokio::time::timeout(timeout, self.client.await_receipt(handle)).await {
			Ok(Ok(receipt)) => Ok(receipt),
			Ok(Err(e)) => Err(StepFailure::Submission {
				message: e.to_string(),
			}),
			Err(_) => Err(StepFailure::ConfirmationTimeout {
				seconds: timeout.as_secs(),
			}),
		}
	}

	async fn check(
		&self,
		step: &ActionStep,
		scope: &Scope,
		receipt: &Receipt,
		baselines: Vec<Option<Result<Value, String>>>,
	) -> Vec<AssertionResult> {
		let mut observations = Vec::with_capacity(step.expect.len());
		for (expectation, before) in step.expect.iter().zip(baselines) {
			observations.push(Observation {
				before,
				after: self.observe(expectation, scope).await,
			});
		}
		verify(
			&VerificationContext {
				receipt,
				scope,
				observations: &observations,
			},
			&step.expect,
		)
	}

	/// Reads the current value of a balance or query subject.
	async fn observe(
		&self,
		expectation: &Expectation,
		scope: &Scope,
	) -> Option<Result<Value, String>> {
		match &expectation.subject {
			Subject::Field(_) => None,
			Subject::Balance(address) => Some(self.read_balance(address, scope).await),
			Subject::Query(query) => Some(self.read_query(query, scope).await),
		}
	}

	async fn read_balance(&self, address: &Argument, scope: &Scope) -> Result<Value, String> {
		let address = resolve_address(address, scope)?;
		self.client
			.get_balance(address)
			.await
			.map(Value::Uint)
			.map_err(|e| e.to_string())
	}

	async fn read_query(&self, query: &QuerySpec, scope: &Scope) -> Result<Value, String> {
		let target = scope.target(&query.target, query.contract.as_deref())?;
		let args = scope.resolve_all(&query.args)?;
		let mut values = self
			.client
			.read(&target, &query.method, &args)
			.await
			.map_err(|e| e.to_string())?;
		if values.is_empty() {
			return Err(format!("{}.{} returned no values", target.contract, query.method));
		}
		Ok(values.swap_remove(0))
	}
}

fn argument_failure(message: String) -> StepFailure {
	StepFailure::Argument { message }
}

/// Resolves a step's action against the current scope.
fn prepare(action: &StepAction, scope: &Scope) -> Result<Submission, String> {
	Ok(match action {
		StepAction::Deploy { contract, args } => Submission::Deploy {
			contract: contract.clone(),
			args: scope.resolve_all(args)?,
		},
		StepAction::Call {
			target,
			method,
			args,
			value,
			contract,
		} => Submission::Call {
			target: scope.target(target, contract.as_deref())?,
			method: method.clone(),
			args: scope.resolve_all(args)?,
			value: match value {
				Some(value) => resolve_amount(value, scope)?,
				None => U256::ZERO,
			},
		},
		StepAction::Transfer { to, amount } => Submission::Transfer {
			to: resolve_address(to, scope)?,
			amount: resolve_amount(amount, scope)?,
		},
	})
}

fn resolve_address(argument: &Argument, scope: &Scope) -> Result<Address, String> {
	scope
		.resolve(argument)?
		.coerce(ValueKind::Address)
		.map_err(|e| e.to_string())?
		.as_address()
		.ok_or_else(|| format!("{} is not an address", argument))
}

fn resolve_amount(argument: &Argument, scope: &Scope) -> Result<U256, String> {
	scope
		.resolve(argument)?
		.coerce(ValueKind::Uint)
		.map_err(|e| e.to_string())?
		.as_u256()
		.ok_or_else(|| format!("{} is not an amount", argument))
}
