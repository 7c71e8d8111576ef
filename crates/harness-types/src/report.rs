//! Run and step report types.

use crate::{TxKind, Value};
use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a step terminated the plan.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepFailure {
	/// The client rejected the transaction before it was mined.
	#[error("Submission failed: {message}")]
	Submission { message: String },
	/// No receipt arrived within the configured window.
	#[error("No receipt after {seconds}s")]
	ConfirmationTimeout { seconds: u64 },
	/// The transaction was mined with a failed status.
	#[error("Transaction {tx_hash} reverted")]
	ExecutionRevert { tx_hash: String },
	/// The receipt carries no event with the required tag.
	#[error("Expected event '{event}' not found in receipt")]
	MissingExpectedEvent { event: String },
	/// The event was found but lacks the named field.
	#[error("Event '{event}' has no field '{field}'")]
	MissingEventField { event: String, field: String },
	/// An argument could not be resolved or converted at run time.
	#[error("Argument error: {message}")]
	Argument { message: String },
}

/// Result of checking one expectation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionResult {
	pub description: String,
	pub expected: String,
	pub observed: String,
	pub passed: bool,
}

/// A variable bound by an extraction rule or a deploy alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
	pub name: String,
	pub value: Value,
}

/// Outcome of one executed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
	/// Zero-based position of the step in the plan.
	pub index: usize,
	pub label: String,
	pub kind: TxKind,
	pub tx_hash: Option<String>,
	pub block_number: Option<u64>,
	pub gas_used: Option<u64>,
	pub contract_address: Option<Address>,
	#[serde(default)]
	pub bindings: Vec<Binding>,
	#[serde(default)]
	pub assertions: Vec<AssertionResult>,
	/// Set when this step terminated the plan.
	pub failure: Option<StepFailure>,
}

impl StepReport {
	pub fn new(index: usize, label: impl Into<String>, kind: TxKind) -> Self {
		Self {
			index,
			label: label.into(),
			kind,
			tx_hash: None,
			block_number: None,
			gas_used: None,
			contract_address: None,
			bindings: Vec::new(),
			assertions: Vec::new(),
			failure: None,
		}
	}

	/// True when the step completed and every assertion held.
	pub fn passed(&self) -> bool {
		self.failure.is_none() && self.assertions.iter().all(|a| a.passed)
	}
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
	Pass,
	Fail,
	Cancelled,
}

impl fmt::Display for Verdict {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Verdict::Pass => f.write_str("PASS"),
			Verdict::Fail => f.write_str("FAIL"),
			Verdict::Cancelled => f.write_str("CANCELLED"),
		}
	}
}

/// Full result of executing a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
	pub plan: String,
	pub steps: Vec<StepReport>,
	pub verdict: Verdict,
	pub started_at: DateTime<Utc>,
	pub finished_at: DateTime<Utc>,
}

impl RunReport {
	pub fn is_pass(&self) -> bool {
		self.verdict == Verdict::Pass
	}

	/// All assertion results across steps, in step order.
	pub fn assertions(&self) -> impl Iterator<Item = &AssertionResult> {
		self.steps.iter().flat_map(|step| step.assertions.iter())
	}

	pub fn failed_assertions(&self) -> usize {
		self.assertions().filter(|a| !a.passed).count()
	}

	/// The step that terminated the run, if any.
	pub fn terminal_failure(&self) -> Option<(&StepReport, &StepFailure)> {
		self.steps
			.iter()
			.find_map(|step| step.failure.as_ref().map(|failure| (step, failure)))
	}
}
