//! Names visible to a running plan.
//!
//! The scope grows as the plan runs: declared contracts are present from the
//! start, deploy aliases appear once their step is confirmed and extraction
//! rules add variables. Arguments are resolved against it right before a step
//! is submitted.

use alloy_primitives::Address;
use harness_client::CallTarget;
use harness_types::{interpolate, Account, Argument, Reference, TargetRef, Value};
use std::collections::HashMap;

/// Address and artifact of a contract known to the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractRef {
	pub address: Address,
	pub contract: String,
}

#[derive(Debug, Clone, Default)]
pub struct Scope {
	accounts: Vec<Account>,
	contracts: HashMap<String, ContractRef>,
	variables: HashMap<String, Value>,
}

impl Scope {
	pub fn new(accounts: Vec<Account>) -> Self {
		Self {
			accounts,
			..Default::default()
		}
	}

	pub fn declare_contract(&mut self, alias: impl Into<String>, contract: ContractRef) {
		self.contracts.insert(alias.into(), contract);
	}

	pub fn bind(&mut self, name: impl Into<String>, value: Value) {
		self.variables.insert(name.into(), value);
	}

	pub fn account(&self, index: usize) -> Option<&Account> {
		self.accounts.get(index)
	}

	pub fn variable(&self, name: &str) -> Option<&Value> {
		self.variables.get(name)
	}

	pub fn contract(&self, alias: &str) -> Option<&ContractRef> {
		self.contracts.get(alias)
	}

	/// Value a reference stands for.
	pub fn lookup(&self, reference: &Reference) -> Result<Value, String> {
		match reference {
			Reference::Account(index) => self
				.account(*index)
				.map(|account| Value::Address(account.address))
				.ok_or_else(|| format!("no account with index {}", index)),
			Reference::ContractAddress(alias) => self
				.contract(alias)
				.map(|c| Value::Address(c.address))
				.ok_or_else(|| format!("unknown contract '{}'", alias)),
			Reference::Name(name) => self
				.variable(name)
				.cloned()
				.or_else(|| self.contract(name).map(|c| Value::Address(c.address)))
				.ok_or_else(|| format!("unbound reference {}", reference)),
		}
	}

	/// Resolves an argument to a value. Templates become interpolated strings.
	pub fn resolve(&self, argument: &Argument) -> Result<Value, String> {
		match argument {
			Argument::Literal(value) => Ok(value.clone()),
			Argument::Reference(reference) => self.lookup(reference),
			Argument::Template(text) => {
				interpolate(text, |reference| {
					self.lookup(reference).ok().map(|value| value.to_string())
				})
				.map(Value::String)
				.map_err(|reference| format!("unbound reference {}", reference))
			},
		}
	}

	pub fn resolve_all(&self, arguments: &[Argument]) -> Result<Vec<Value>, String> {
		arguments.iter().map(|argument| self.resolve(argument)).collect()
	}

	/// Contract a call or query is sent to.
	///
	/// Aliases carry their own artifact name; a literal address needs one
	/// supplied as `contract`, which also overrides an alias's artifact.
	pub fn target(&self, target: &str, contract: Option<&str>) -> Result<CallTarget, String> {
		match TargetRef::parse(target) {
			TargetRef::Alias(alias) => {
				let known = self
					.contract(&alias)
					.ok_or_else(|| format!("unknown contract '{}'", alias))?;
				Ok(CallTarget::new(
					known.address,
					contract.unwrap_or(&known.contract),
				))
			},
			TargetRef::Address(address) => contract
				.map(|contract| CallTarget::new(address, contract))
				.ok_or_else(|| format!("call to {} needs a contract artifact name", address)),
		}
	}
}
