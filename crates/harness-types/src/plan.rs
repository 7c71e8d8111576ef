//! Action plan types.
//!
//! A plan is the declarative description of a run: an ordered list of steps
//! (deploy, call, transfer), the values each step extracts from its receipt,
//! and the expectations checked once the step is confirmed. Plans are plain
//! values handed to the executor; nothing about a run lives in global state.
//!
//! Plans are usually written in TOML:
//!
//! ```toml
//! name = "nft-smoke"
//!
//! [[steps]]
//! kind = "deploy"
//! id = "nft"
//! contract = "AccessNFT"
//!
//! [[steps]]
//! kind = "call"
//! target = "nft"
//! method = "mint"
//! args = ["${accounts.1}", "ipfs://x"]
//! extract = [{ event = "Transfer", field = "tokenId", bind = "mintedTokenId" }]
//! expect = [{ field = "mintedTokenId", equals = 1 }]
//! ```

use crate::{TxKind, Value};
use alloy_primitives::Address;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Matches one `${...}` reference.
static REFERENCE_PATTERN: Lazy<Regex> = Lazy::new(|| {
	Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_.\-]*)\}").expect("reference pattern is valid")
});

/// Receipt metadata paths an expectation can observe.
pub const RECEIPT_FIELDS: [&str; 5] = [
	"receipt.hash",
	"receipt.block_number",
	"receipt.gas_used",
	"receipt.status",
	"receipt.contract_address",
];

/// Errors that can occur while reading a plan document.
#[derive(Debug, Error)]
pub enum PlanParseError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Plan error: {0}")]
	Parse(String),
}

impl From<toml::de::Error> for PlanParseError {
	fn from(err: toml::de::Error) -> Self {
		PlanParseError::Parse(err.message().to_string())
	}
}

/// A named reference inside a plan argument, written `${...}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
	/// `${accounts.N}`: the address of account N.
	Account(usize),
	/// `${alias.address}`: the address of a deployed or declared contract.
	ContractAddress(String),
	/// `${name}`: a contract alias or a variable bound by an extraction rule.
	Name(String),
}

impl Reference {
	/// Parses the text between `${` and `}`.
	pub fn parse(inner: &str) -> Reference {
		if let Some(index) = inner.strip_prefix("accounts.") {
			if let Ok(index) = index.parse::<usize>() {
				return Reference::Account(index);
			}
		}
		if let Some(alias) = inner.strip_suffix(".address") {
			return Reference::ContractAddress(alias.to_string());
		}
		Reference::Name(inner.to_string())
	}
}

impl fmt::Display for Reference {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Reference::Account(index) => write!(f, "${{accounts.{}}}", index),
			Reference::ContractAddress(alias) => write!(f, "${{{}.address}}", alias),
			Reference::Name(name) => write!(f, "${{{}}}", name),
		}
	}
}

/// A step argument or expected value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
	/// A value written directly in the plan.
	Literal(Value),
	/// A string consisting of exactly one reference; resolves to the typed value.
	Reference(Reference),
	/// A string with embedded references; resolves to interpolated text.
	Template(String),
}

impl Argument {
	/// Classifies plan text as a literal, a single reference or a template.
	pub fn from_text(text: &str) -> Argument {
		if let Some(caps) = REFERENCE_PATTERN.captures(text) {
			let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
			if whole == text {
				return Argument::Reference(Reference::parse(&caps[1]));
			}
			return Argument::Template(text.to_string());
		}
		Argument::Literal(Value::String(text.to_string()))
	}

	/// All references this argument depends on, in textual order.
	pub fn references(&self) -> Vec<Reference> {
		match self {
			Argument::Literal(_) => Vec::new(),
			Argument::Reference(reference) => vec![reference.clone()],
			Argument::Template(text) => template_references(text),
		}
	}
}

/// Lists the references embedded in a template string.
pub fn template_references(text: &str) -> Vec<Reference> {
	REFERENCE_PATTERN
		.captures_iter(text)
		.map(|caps| Reference::parse(&caps[1]))
		.collect()
}

/// Replaces every `${...}` in `text` using `lookup`.
///
/// Stops at the first reference `lookup` cannot resolve and returns it.
pub fn interpolate<F>(text: &str, mut lookup: F) -> Result<String, Reference>
where
	F: FnMut(&Reference) -> Option<String>,
{
	let mut result = String::with_capacity(text.len());
	let mut last = 0;
	for caps in REFERENCE_PATTERN.captures_iter(text) {
		let Some(whole) = caps.get(0) else {
			continue;
		};
		let reference = Reference::parse(&caps[1]);
		let replacement = lookup(&reference).ok_or(reference)?;
		result.push_str(&text[last..whole.start()]);
		result.push_str(&replacement);
		last = whole.end();
	}
	result.push_str(&text[last..]);
	Ok(result)
}

impl fmt::Display for Argument {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Argument::Literal(Value::String(s)) => write!(f, "\"{}\"", s),
			Argument::Literal(value) => write!(f, "{}", value),
			Argument::Reference(reference) => write!(f, "{}", reference),
			Argument::Template(text) => write!(f, "\"{}\"", text),
		}
	}
}

impl From<Value> for Argument {
	fn from(value: Value) -> Self {
		Argument::Literal(value)
	}
}

impl From<&str> for Argument {
	fn from(text: &str) -> Self {
		Argument::from_text(text)
	}
}

impl From<u64> for Argument {
	fn from(value: u64) -> Self {
		Argument::Literal(Value::from(value))
	}
}

impl From<Address> for Argument {
	fn from(address: Address) -> Self {
		Argument::Literal(Value::Address(address))
	}
}

impl<'de> Deserialize<'de> for Argument {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		struct ArgumentVisitor;

		impl<'de> Visitor<'de> for ArgumentVisitor {
			type Value = Argument;

			fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str("a string, an integer or a boolean")
			}

			fn visit_bool<E: de::Error>(self, v: bool) -> Result<Argument, E> {
				Ok(Argument::Literal(Value::Bool(v)))
			}

			fn visit_i64<E: de::Error>(self, v: i64) -> Result<Argument, E> {
				if v >= 0 {
					Ok(Argument::from(v as u64))
				} else {
					Value::parse_as(crate::ValueKind::Int, &v.to_string())
						.map(Argument::Literal)
						.map_err(E::custom)
				}
			}

			fn visit_u64<E: de::Error>(self, v: u64) -> Result<Argument, E> {
				Ok(Argument::from(v))
			}

			fn visit_str<E: de::Error>(self, v: &str) -> Result<Argument, E> {
				Ok(Argument::from_text(v))
			}
		}

		deserializer.deserialize_any(ArgumentVisitor)
	}
}

/// Where a call is sent: a plan alias or a literal address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetRef {
	Alias(String),
	Address(Address),
}

impl TargetRef {
	pub fn parse(target: &str) -> TargetRef {
		match Address::from_str(target) {
			Ok(address) if target.starts_with("0x") => TargetRef::Address(address),
			_ => TargetRef::Alias(target.to_string()),
		}
	}
}

/// A contract that already exists on chain and is supplied to the plan by address.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ContractDecl {
	/// Plan-scoped name used as a call target and in `${alias}` references.
	pub alias: String,
	/// The deployed address.
	pub address: Address,
	/// Artifact name providing the ABI.
	pub contract: String,
}

/// The transaction a step submits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
	/// Create a contract from a compiled artifact.
	Deploy {
		contract: String,
		#[serde(default)]
		args: Vec<Argument>,
	},
	/// Send a state-changing call to a contract.
	Call {
		target: String,
		method: String,
		#[serde(default)]
		args: Vec<Argument>,
		/// Native value attached to the call, in wei.
		#[serde(default)]
		value: Option<Argument>,
		/// Artifact name, required when `target` is a literal address.
		#[serde(default)]
		contract: Option<String>,
	},
	/// Send native value between accounts.
	Transfer { to: Argument, amount: Argument },
}

/// Names a value to pull from a receipt's events and bind to a plan variable.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExtractionRule {
	/// Event tag to look for.
	pub event: String,
	/// Field of the event to read.
	pub field: String,
	/// Variable name the value is bound to.
	pub bind: String,
}

impl ExtractionRule {
	pub fn new(
		event: impl Into<String>,
		field: impl Into<String>,
		bind: impl Into<String>,
	) -> Self {
		Self {
			event: event.into(),
			field: field.into(),
			bind: bind.into(),
		}
	}
}

/// A read-only contract call used as an expectation subject.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QuerySpec {
	pub target: String,
	pub method: String,
	#[serde(default)]
	pub args: Vec<Argument>,
	#[serde(default)]
	pub contract: Option<String>,
}

/// What an expectation observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
	/// A receipt metadata path (see [`RECEIPT_FIELDS`]) or a bound variable.
	Field(String),
	/// Native balance of an address, read after the step.
	Balance(Argument),
	/// First return value of a read-only call, evaluated after the step.
	Query(QuerySpec),
}

impl fmt::Display for Subject {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Subject::Field(path) => f.write_str(path),
			Subject::Balance(address) => write!(f, "balance({})", address),
			Subject::Query(query) => {
				let args = query
					.args
					.iter()
					.map(|a| a.to_string())
					.collect::<Vec<_>>()
					.join(", ");
				write!(f, "{}.{}({})", query.target, query.method, args)
			},
		}
	}
}

/// How the observed value is compared with the expected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
	/// Observed value equals the expected value.
	Equals,
	/// Observed value minus its pre-step value equals the expected value.
	Delta,
}

/// A post-condition checked after a step is confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawExpectation")]
pub struct Expectation {
	pub subject: Subject,
	pub comparison: Comparison,
	pub expected: Argument,
	pub description: Option<String>,
}

impl Expectation {
	pub fn field_equals(path: impl Into<String>, expected: impl Into<Argument>) -> Self {
		Self {
			subject: Subject::Field(path.into()),
			comparison: Comparison::Equals,
			expected: expected.into(),
			description: None,
		}
	}

	pub fn balance_delta(address: impl Into<Argument>, delta: impl Into<Argument>) -> Self {
		Self {
			subject: Subject::Balance(address.into()),
			comparison: Comparison::Delta,
			expected: delta.into(),
			description: None,
		}
	}

	pub fn query_equals(
		target: impl Into<String>,
		method: impl Into<String>,
		args: Vec<Argument>,
		expected: impl Into<Argument>,
	) -> Self {
		Self {
			subject: Subject::Query(QuerySpec {
				target: target.into(),
				method: method.into(),
				args,
				contract: None,
			}),
			comparison: Comparison::Equals,
			expected: expected.into(),
			description: None,
		}
	}

	pub fn with_description(mut self, description: impl Into<String>) -> Self {
		self.description = Some(description.into());
		self
	}

	/// Human-readable description, generated when the plan gives none.
	pub fn describe(&self) -> String {
		if let Some(description) = &self.description {
			return description.clone();
		}
		match self.comparison {
			Comparison::Equals => format!("{} == {}", self.subject, self.expected),
			Comparison::Delta => format!("{} changed by {}", self.subject, self.expected),
		}
	}
}

/// Plan-file shape of an expectation before its one-of fields are checked.
#[derive(Debug, Deserialize)]
struct RawExpectation {
	#[serde(default)]
	field: Option<String>,
	#[serde(default)]
	balance: Option<Argument>,
	#[serde(default)]
	query: Option<QuerySpec>,
	#[serde(default)]
	equals: Option<Argument>,
	#[serde(default)]
	delta: Option<Argument>,
	#[serde(default)]
	description: Option<String>,
}

impl TryFrom<RawExpectation> for Expectation {
	type Error = String;

	fn try_from(raw: RawExpectation) -> Result<Self, Self::Error> {
		let subject = match (raw.field, raw.balance, raw.query) {
			(Some(field), None, None) => Subject::Field(field),
			(None, Some(address), None) => Subject::Balance(address),
			(None, None, Some(query)) => Subject::Query(query),
			_ => {
				return Err(
					"expectation needs exactly one of 'field', 'balance' or 'query'".to_string(),
				)
			},
		};
		let (comparison, expected) = match (raw.equals, raw.delta) {
			(Some(expected), None) => (Comparison::Equals, expected),
			(None, Some(expected)) => (Comparison::Delta, expected),
			_ => return Err("expectation needs exactly one of 'equals' or 'delta'".to_string()),
		};
		Ok(Self {
			subject,
			comparison,
			expected,
			description: raw.description,
		})
	}
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActionStep {
	/// Alias for the step; a deploy step's alias names the created contract.
	#[serde(default)]
	pub id: Option<String>,
	/// Free-form label for reports.
	#[serde(default)]
	pub label: Option<String>,
	/// Index of the sending account.
	#[serde(default)]
	pub from: usize,
	#[serde(flatten)]
	pub action: StepAction,
	#[serde(default)]
	pub extract: Vec<ExtractionRule>,
	#[serde(default)]
	pub expect: Vec<Expectation>,
}

impl ActionStep {
	fn with_action(action: StepAction) -> Self {
		Self {
			id: None,
			label: None,
			from: 0,
			action,
			extract: Vec::new(),
			expect: Vec::new(),
		}
	}

	pub fn deploy(id: impl Into<String>, contract: impl Into<String>) -> Self {
		let mut step = Self::with_action(StepAction::Deploy {
			contract: contract.into(),
			args: Vec::new(),
		});
		step.id = Some(id.into());
		step
	}

	pub fn call(target: impl Into<String>, method: impl Into<String>, args: Vec<Argument>) -> Self {
		Self::with_action(StepAction::Call {
			target: target.into(),
			method: method.into(),
			args,
			value: None,
			contract: None,
		})
	}

	pub fn transfer(to: impl Into<Argument>, amount: impl Into<Argument>) -> Self {
		Self::with_action(StepAction::Transfer {
			to: to.into(),
			amount: amount.into(),
		})
	}

	/// Sets constructor arguments on a deploy step.
	pub fn with_args(mut self, new_args: Vec<Argument>) -> Self {
		if let StepAction::Deploy { args, .. } = &mut self.action {
			*args = new_args;
		}
		self
	}

	pub fn from_account(mut self, index: usize) -> Self {
		self.from = index;
		self
	}

	pub fn labeled(mut self, label: impl Into<String>) -> Self {
		self.label = Some(label.into());
		self
	}

	pub fn extracting(mut self, rule: ExtractionRule) -> Self {
		self.extract.push(rule);
		self
	}

	pub fn expecting(mut self, expectation: Expectation) -> Self {
		self.expect.push(expectation);
		self
	}

	pub fn kind(&self) -> TxKind {
		match self.action {
			StepAction::Deploy { .. } => TxKind::Deploy,
			StepAction::Call { .. } => TxKind::Call,
			StepAction::Transfer { .. } => TxKind::Transfer,
		}
	}

	/// Label used in reports: the explicit label, else a summary of the action.
	pub fn display_label(&self) -> String {
		if let Some(label) = &self.label {
			return label.clone();
		}
		match &self.action {
			StepAction::Deploy { contract, .. } => format!("deploy {}", contract),
			StepAction::Call { target, method, .. } => format!("{}.{}", target, method),
			StepAction::Transfer { to, amount } => format!("transfer {} to {}", amount, to),
		}
	}
}

/// An ordered list of steps plus the pre-existing contracts they may use.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActionPlan {
	pub name: String,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub contracts: Vec<ContractDecl>,
	#[serde(default)]
	pub steps: Vec<ActionStep>,
}

impl ActionPlan {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			description: None,
			contracts: Vec::new(),
			steps: Vec::new(),
		}
	}

	pub fn with_contract(mut self, contract: ContractDecl) -> Self {
		self.contracts.push(contract);
		self
	}

	pub fn with_step(mut self, step: ActionStep) -> Self {
		self.steps.push(step);
		self
	}

	/// Reads a plan from a TOML file.
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PlanParseError> {
		let content = std::fs::read_to_string(path)?;
		content.parse()
	}
}

impl FromStr for ActionPlan {
	type Err = PlanParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(toml::from_str(s)?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_reference_parsing() {
		assert_eq!(Reference::parse("accounts.2"), Reference::Account(2));
		assert_eq!(
			Reference::parse("nft.address"),
			Reference::ContractAddress("nft".to_string())
		);
		assert_eq!(
			Reference::parse("mintedTokenId"),
			Reference::Name("mintedTokenId".to_string())
		);
		assert_eq!(
			Reference::parse("accounts.x"),
			Reference::Name("accounts.x".to_string())
		);
	}

	#[test]
	fn test_argument_classification() {
		assert_eq!(
			Argument::from_text("${accounts.1}"),
			Argument::Reference(Reference::Account(1))
		);
		assert_eq!(
			Argument::from_text("ipfs://x"),
			Argument::Literal(Value::from("ipfs://x"))
		);
		let template = Argument::from_text("ipfs://${cid}/meta.json");
		assert_eq!(template.references(), vec![Reference::Name("cid".to_string())]);
	}

	#[test]
	fn test_interpolate() {
		let text = interpolate("token-${id}-of-${owner}", |reference| match reference {
			Reference::Name(name) if name == "id" => Some("7".to_string()),
			Reference::Name(name) if name == "owner" => Some("alice".to_string()),
			_ => None,
		})
		.unwrap();
		assert_eq!(text, "token-7-of-alice");

		let missing = interpolate("${nope}", |_| None).unwrap_err();
		assert_eq!(missing, Reference::Name("nope".to_string()));
	}

	#[test]
	fn test_parse_plan_document() {
		let plan: ActionPlan = r#"
name = "nft-smoke"

[[contracts]]
alias = "usdc"
address = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"
contract = "IERC20"

[[steps]]
kind = "deploy"
id = "nft"
contract = "AccessNFT"

[[steps]]
kind = "call"
target = "nft"
method = "mint"
args = ["${accounts.1}", "ipfs://x"]
extract = [{ event = "Transfer", field = "tokenId", bind = "mintedTokenId" }]

[[steps.expect]]
field = "mintedTokenId"
equals = 1

[[steps.expect]]
query = { target = "nft", method = "ownerOf", args = ["${mintedTokenId}"] }
equals = "${accounts.1}"

[[steps]]
kind = "transfer"
from = 0
to = "${accounts.2}"
amount = "1000000000000000000"
expect = [{ balance = "${accounts.2}", delta = "1000000000000000000" }]
"#
		.parse()
		.unwrap();

		assert_eq!(plan.name, "nft-smoke");
		assert_eq!(plan.contracts.len(), 1);
		assert_eq!(plan.steps.len(), 3);
		assert_eq!(plan.steps[0].kind(), TxKind::Deploy);
		assert_eq!(plan.steps[0].id.as_deref(), Some("nft"));

		let mint = &plan.steps[1];
		assert_eq!(mint.extract[0].bind, "mintedTokenId");
		assert_eq!(mint.expect.len(), 2);
		assert_eq!(mint.expect[0].expected, Argument::from(1u64));
		assert!(matches!(mint.expect[1].subject, Subject::Query(_)));

		let transfer = &plan.steps[2];
		assert_eq!(transfer.kind(), TxKind::Transfer);
		assert_eq!(transfer.expect[0].comparison, Comparison::Delta);
	}

	#[test]
	fn test_expectation_requires_one_subject() {
		let result: Result<ActionPlan, _> = r#"
name = "bad"

[[steps]]
kind = "deploy"
contract = "SimpleStorage"
expect = [{ field = "receipt.status", balance = "${accounts.0}", equals = true }]
"#
		.parse();

		let err = result.unwrap_err();
		assert!(err.to_string().contains("exactly one of"));
	}

	#[test]
	fn test_target_ref() {
		assert_eq!(TargetRef::parse("nft"), TargetRef::Alias("nft".to_string()));
		assert!(matches!(
			TargetRef::parse("0x5fbdb2315678afecb367f032d93f642f64180aa3"),
			TargetRef::Address(_)
		));
	}
}
