//! Pre-flight plan validation.
//!
//! Runs before any step is submitted and touches no network. All problems
//! are collected so one run of `check` reports every mistake in the plan.

use harness_types::{
	ActionPlan, ActionStep, Argument, Comparison, Expectation, Reference, StepAction, Subject,
	TargetRef, RECEIPT_FIELDS,
};
use std::collections::HashSet;
use thiserror::Error;

/// A plan that cannot run as written.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid plan '{plan}': {}", .problems.join("; "))]
pub struct PlanValidationError {
	pub plan: String,
	pub problems: Vec<String>,
}

/// Names defined so far while walking the plan in order.
struct Definitions {
	accounts: usize,
	contracts: HashSet<String>,
	variables: HashSet<String>,
}

impl Definitions {
	fn check_reference(&self, reference: &Reference) -> Option<String> {
		match reference {
			Reference::Account(index) if *index >= self.accounts => Some(format!(
				"{} is out of range ({} accounts available)",
				reference, self.accounts
			)),
			Reference::ContractAddress(alias) if !self.contracts.contains(alias) => Some(format!(
				"{} refers to a contract not deployed by an earlier step or declared in contracts",
				reference
			)),
			Reference::Name(name)
				if !self.variables.contains(name) && !self.contracts.contains(name) =>
			{
				Some(format!(
					"{} is not bound by an earlier extraction rule",
					reference
				))
			},
			_ => None,
		}
	}

	fn check_argument(&self, argument: &Argument, problems: &mut Vec<String>, at: &str) {
		for reference in argument.references() {
			if let Some(problem) = self.check_reference(&reference) {
				problems.push(format!("{}: {}", at, problem));
			}
		}
	}

	fn check_target(
		&self,
		target: &str,
		contract: Option<&String>,
		problems: &mut Vec<String>,
		at: &str,
	) {
		match TargetRef::parse(target) {
			TargetRef::Alias(alias) if !self.contracts.contains(&alias) => problems.push(format!(
				"{}: target '{}' is not a contract deployed by an earlier step or declared in contracts",
				at, alias
			)),
			TargetRef::Address(address) if contract.is_none() => problems.push(format!(
				"{}: target {} is a literal address and needs a contract artifact name",
				at, address
			)),
			_ => {},
		}
	}
}

/// Checks a plan statically against the number of available accounts.
pub fn validate_plan(plan: &ActionPlan, accounts: usize) -> Result<(), PlanValidationError> {
	let mut problems = Vec::new();
	let mut definitions = Definitions {
		accounts,
		contracts: HashSet::new(),
		variables: HashSet::new(),
	};
	let mut names = HashSet::new();

	for decl in &plan.contracts {
		if decl.contract.is_empty() {
			problems.push(format!("contract '{}': artifact name is empty", decl.alias));
		}
		check_alias(&decl.alias, &mut names, &mut problems, "contracts");
		definitions.contracts.insert(decl.alias.clone());
	}

	for (index, step) in plan.steps.iter().enumerate() {
		let at = format!("step {} ({})", index + 1, step.display_label());
		validate_step(step, &at, &mut definitions, &mut names, &mut problems);
	}

	if problems.is_empty() {
		Ok(())
	} else {
		Err(PlanValidationError {
			plan: plan.name.clone(),
			problems,
		})
	}
}

fn check_alias(alias: &str, names: &mut HashSet<String>, problems: &mut Vec<String>, at: &str) {
	if alias.is_empty() || alias == "accounts" || alias.contains(['.', '$', '{', '}']) {
		problems.push(format!("{}: '{}' cannot be used as a name", at, alias));
	} else if !names.insert(alias.to_string()) {
		problems.push(format!("{}: name '{}' is defined twice", at, alias));
	}
}

fn validate_step(
	step: &ActionStep,
	at: &str,
	definitions: &mut Definitions,
	names: &mut HashSet<String>,
	problems: &mut Vec<String>,
) {
	if step.from >= definitions.accounts {
		problems.push(format!(
			"{}: sender account {} is out of range ({} accounts available)",
			at, step.from, definitions.accounts
		));
	}

	match &step.action {
		StepAction::Deploy { contract, args } => {
			if contract.is_empty() {
				problems.push(format!("{}: contract name is empty", at));
			}
			for arg in args {
				definitions.check_argument(arg, problems, at);
			}
		},
		StepAction::Call {
			target,
			method,
			args,
			value,
			contract,
		} => {
			if method.is_empty() {
				problems.push(format!("{}: method name is empty", at));
			}
			definitions.check_target(target, contract.as_ref(), problems, at);
			for arg in args.iter().chain(value) {
				definitions.check_argument(arg, problems, at);
			}
		},
		StepAction::Transfer { to, amount } => {
			definitions.check_argument(to, problems, at);
			definitions.check_argument(amount, problems, at);
		},
	}

	if let Some(id) = &step.id {
		check_alias(id, names, problems, at);
		if matches!(step.action, StepAction::Deploy { .. }) {
			definitions.contracts.insert(id.clone());
		}
	}

	for rule in &step.extract {
		if rule.event.is_empty() || rule.field.is_empty() {
			problems.push(format!("{}: extraction rule needs an event and a field", at));
		}
		check_alias(&rule.bind, names, problems, at);
		definitions.variables.insert(rule.bind.clone());
	}

	// Expectations see this step's own deploy alias and bindings.
	for expectation in &step.expect {
		validate_expectation(expectation, at, definitions, problems);
	}
}

fn validate_expectation(
	expectation: &Expectation,
	at: &str,
	definitions: &Definitions,
	problems: &mut Vec<String>,
) {
	let at = format!("{}, expectation '{}'", at, expectation.describe());
	match &expectation.subject {
		Subject::Field(path) => {
			if path.starts_with("receipt.") {
				if !RECEIPT_FIELDS.contains(&path.as_str()) {
					problems.push(format!(
						"{}: unknown receipt field '{}' (known: {})",
						at,
						path,
						RECEIPT_FIELDS.join(", ")
					));
				}
			} else if !definitions.variables.contains(path) {
				problems.push(format!(
					"{}: '{}' is not bound by an extraction rule",
					at, path
				));
			}
			if expectation.comparison == Comparison::Delta {
				problems.push(format!(
					"{}: delta comparison needs a balance or query subject",
					at
				));
			}
		},
		Subject::Balance(address) => definitions.check_argument(address, problems, &at),
		Subject::Query(query) => {
			if query.method.is_empty() {
				problems.push(format!("{}: query method name is empty", at));
			}
			definitions.check_target(&query.target, query.contract.as_ref(), problems, &at);
			for arg in &query.args {
				definitions.check_argument(arg, problems, &at);
			}
		},
	}
	definitions.check_argument(&expectation.expected, problems, &at);
}

#[cfg(test)]
mod tests {
	use super::*;
	use harness_types::{ContractDecl, Expectation, ExtractionRule};

	fn mint_plan() -> ActionPlan {
		ActionPlan::new("mint")
			.with_step(ActionStep::deploy("nft", "AccessNFT"))
			.with_step(
				ActionStep::call(
					"nft",
					"mint",
					vec![Argument::from("${accounts.1}"), Argument::from("ipfs://x")],
				)
				.extracting(ExtractionRule::new("Transfer", "tokenId", "mintedTokenId"))
				.expecting(Expectation::field_equals("mintedTokenId", 1u64))
				.expecting(Expectation::query_equals(
					"nft",
					"ownerOf",
					vec![Argument::from("${mintedTokenId}")],
					"${accounts.1}",
				)),
			)
	}

	#[test]
	fn test_valid_plan() {
		assert!(validate_plan(&mint_plan(), 2).is_ok());
		assert!(validate_plan(&ActionPlan::new("empty"), 0).is_ok());
	}

	#[test]
	fn test_call_to_undeployed_contract() {
		let plan = ActionPlan::new("bad").with_step(ActionStep::call("token", "mint", vec![]));
		let err = validate_plan(&plan, 2).unwrap_err();
		assert_eq!(err.problems.len(), 1);
		assert!(err.problems[0].contains("target 'token'"));
	}

	#[test]
	fn test_reference_before_binding() {
		let plan = ActionPlan::new("order")
			.with_step(ActionStep::deploy("nft", "AccessNFT"))
			.with_step(ActionStep::call(
				"nft",
				"tokenURI",
				vec![Argument::from("${mintedTokenId}")],
			))
			.with_step(
				ActionStep::call("nft", "mint", vec![Argument::from("${accounts.1}")])
					.extracting(ExtractionRule::new("Transfer", "tokenId", "mintedTokenId")),
			);
		let err = validate_plan(&plan, 2).unwrap_err();
		assert_eq!(err.problems.len(), 1);
		assert!(err.problems[0].starts_with("step 2"));
		assert!(err.problems[0].contains("${mintedTokenId}"));
	}

	#[test]
	fn test_collects_every_problem() {
		let plan = ActionPlan::new("many")
			.with_contract(ContractDecl {
				alias: "usdc".to_string(),
				address: Default::default(),
				contract: "IERC20".to_string(),
			})
			.with_step(ActionStep::deploy("usdc", "AccessNFT").from_account(4))
			.with_step(
				ActionStep::transfer("${accounts.9}", 1u64)
					.expecting(Expectation::field_equals("receipt.nonce", 1u64))
					.expecting(Expectation {
						comparison: Comparison::Delta,
						..Expectation::field_equals("receipt.gas_used", 1u64)
					}),
			);
		let err = validate_plan(&plan, 2).unwrap_err();
		let text = err.to_string();
		assert_eq!(err.problems.len(), 5, "{}", text);
		assert!(text.contains("sender account 4"));
		assert!(text.contains("defined twice"));
		assert!(text.contains("${accounts.9}"));
		assert!(text.contains("receipt.nonce"));
		assert!(text.contains("delta comparison"));
	}

	#[test]
	fn test_literal_address_needs_artifact() {
		let literal = "0x5fbdb2315678afecb367f032d93f642f64180aa3";
		let plan = ActionPlan::new("literal").with_step(ActionStep::call(literal, "get", vec![]));
		assert!(validate_plan(&plan, 1).is_err());

		let mut step = ActionStep::call(literal, "get", vec![]);
		if let StepAction::Call { contract, .. } = &mut step.action {
			*contract = Some("SimpleStorage".to_string());
		}
		assert!(validate_plan(&ActionPlan::new("literal").with_step(step), 1).is_ok());
	}
}
