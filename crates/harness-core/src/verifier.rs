//! Expectation checking.
//!
//! The verifier does no I/O. The executor reads balances and query results
//! before and after a step and hands them over as [`Observation`]s; receipt
//! fields and bound variables are read here directly.

use crate::scope::Scope;
use alloy_primitives::{Bytes, I256};
use harness_types::{
	AssertionResult, Comparison, Expectation, Receipt, Subject, Value, ValueKind,
};

/// Post-state readings for one expectation, gathered by the executor.
///
/// `before` is only taken for delta comparisons. Field subjects need no
/// readings and leave both empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
	pub before: Option<Result<Value, String>>,
	pub after: Option<Result<Value, String>>,
}

/// Everything the verifier needs to evaluate a step's expectations.
pub struct VerificationContext<'a> {
	pub receipt: &'a Receipt,
	pub scope: &'a Scope,
	/// One entry per expectation, in the same order.
	pub observations: &'a [Observation],
}

/// Evaluates every expectation. A failing expectation never prevents the
/// remaining ones from being checked.
pub fn verify(
	context: &VerificationContext<'_>,
	expectations: &[Expectation],
) -> Vec<AssertionResult> {
	expectations
		.iter()
		.enumerate()
		.map(|(index, expectation)| {
			let observation = context.observations.get(index);
			evaluate(context, expectation, observation)
		})
		.collect()
}

fn evaluate(
	context: &VerificationContext<'_>,
	expectation: &Expectation,
	observation: Option<&Observation>,
) -> AssertionResult {
	let description = expectation.describe();
	let expected = context.scope.resolve(&expectation.expected);
	let observed = observe(context, expectation, observation);

	let expected_text = match &expected {
		Ok(value) => value.to_string(),
		Err(_) => expectation.expected.to_string(),
	};

	let (observed_text, passed) = match (observed, expected) {
		(Err(err), _) => (err, false),
		(Ok(observed), Err(err)) => (
			format!("{} (expected value unavailable: {})", observed, err),
			false,
		),
		(Ok(observed), Ok(expected)) => match matches(&observed, &expected) {
			Ok(passed) => (observed.to_string(), passed),
			Err(err) => (format!("{} ({})", observed, err), false),
		},
	};

	AssertionResult {
		description,
		expected: expected_text,
		observed: observed_text,
		passed,
	}
}

fn observe(
	context: &VerificationContext<'_>,
	expectation: &Expectation,
	observation: Option<&Observation>,
) -> Result<Value, String> {
	if let Subject::Field(path) = &expectation.subject {
		if expectation.comparison == Comparison::Delta {
			return Err(format!("no baseline for '{}'", path));
		}
		return read_field(context, path);
	}

	let reading = |slot: Option<&Result<Value, String>>, when: &str| {
		slot.cloned().unwrap_or_else(|| {
			Err(format!(
				"{} was not observed {} the step",
				expectation.subject, when
			))
		})
	};
	let after = reading(observation.and_then(|o| o.after.as_ref()), "after")?;
	match expectation.comparison {
		Comparison::Equals => Ok(after),
		Comparison::Delta => {
			let before = reading(observation.and_then(|o| o.before.as_ref()), "before")?;
			difference(&before, &after)
		},
	}
}

/// Reads a receipt metadata path or a bound variable.
fn read_field(context: &VerificationContext<'_>, path: &str) -> Result<Value, String> {
	let receipt = context.receipt;
	match path {
		"receipt.hash" => Ok(Value::Bytes(Bytes::from(receipt.hash.0.clone()))),
		"receipt.block_number" => Ok(Value::from(receipt.block_number)),
		"receipt.gas_used" => Ok(Value::from(receipt.gas_used)),
		"receipt.status" => Ok(Value::Bool(receipt.success)),
		"receipt.contract_address" => receipt
			.contract_address
			.map(Value::Address)
			.ok_or_else(|| "receipt has no contract address".to_string()),
		name => context
			.scope
			.variable(name)
			.cloned()
			.ok_or_else(|| format!("'{}' is not bound", name)),
	}
}

/// `after - before`. Unsigned results stay unsigned; a decrease becomes a
/// negative signed value.
fn difference(before: &Value, after: &Value) -> Result<Value, String> {
	match (before, after) {
		(Value::Uint(before), Value::Uint(after)) => {
			if after >= before {
				Ok(Value::Uint(*after - *before))
			} else {
				I256::try_from(*before - *after)
					.map(|decrease| Value::Int(-decrease))
					.map_err(|_| format!("decrease from {} to {} overflows int256", before, after))
			}
		},
		(Value::Int(before), Value::Int(after)) => after
			.checked_sub(*before)
			.map(Value::Int)
			.ok_or_else(|| format!("difference of {} and {} overflows int256", after, before)),
		(before, after) => Err(format!(
			"cannot take the difference of {} and {}",
			before.kind(),
			after.kind()
		)),
	}
}

/// Compares after coercing `expected` to the observed value's type.
fn matches(observed: &Value, expected: &Value) -> Result<bool, String> {
	match expected.coerce(observed.kind()) {
		Ok(expected) => Ok(&expected == observed),
		// A valid number of the other signedness can never be equal.
		Err(err) => match observed.kind() {
			ValueKind::Uint if expected.coerce(ValueKind::Int).is_ok() => Ok(false),
			ValueKind::Int if expected.coerce(ValueKind::Uint).is_ok() => Ok(false),
			_ => Err(err.to_string()),
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy_primitives::{Address, U256};
	use harness_types::{Account, Argument, TransactionHash};
	use std::str::FromStr;

	fn receipt() -> Receipt {
		Receipt {
			hash: TransactionHash(vec![0xab; 32]),
			block_number: 12,
			gas_used: 60_000,
			success: true,
			contract_address: None,
			events: Vec::new(),
		}
	}

	fn scope() -> Scope {
		let mut scope = Scope::new(vec![
			Account::new(0, Address::repeat_byte(0xa0), true),
			Account::new(1, Address::repeat_byte(0xa1), true),
		]);
		scope.bind("mintedTokenId", Value::from(1u64));
		scope
	}

	fn run(expectations: &[Expectation], observations: &[Observation]) -> Vec<AssertionResult> {
		let receipt = receipt();
		let scope = scope();
		verify(
			&VerificationContext {
				receipt: &receipt,
				scope: &scope,
				observations,
			},
			expectations,
		)
	}

	fn after(value: Value) -> Observation {
		Observation {
			before: None,
			after: Some(Ok(value)),
		}
	}

	#[test]
	fn test_variable_and_receipt_fields() {
		let results = run(
			&[
				Expectation::field_equals("mintedTokenId", 1u64),
				Expectation::field_equals("receipt.status", Argument::from(Value::Bool(true))),
				Expectation::field_equals("receipt.block_number", "0xc"),
				Expectation::field_equals(
					"receipt.hash",
					format!("0x{}", "AB".repeat(32)).as_str(),
				),
			],
			&[],
		);
		assert!(results.iter().all(|r| r.passed), "{:?}", results);
	}

	#[test]
	fn test_mismatch_reports_both_values() {
		let results = run(&[Expectation::field_equals("mintedTokenId", 2u64)], &[]);
		assert!(!results[0].passed);
		assert_eq!(results[0].expected, "2");
		assert_eq!(results[0].observed, "1");
	}

	#[test]
	fn test_no_short_circuit() {
		let results = run(
			&[
				Expectation::field_equals("mintedTokenId", 5u64),
				Expectation::field_equals(
					"receipt.contract_address",
					"0x0000000000000000000000000000000000000001",
				),
				Expectation::field_equals("mintedTokenId", 1u64),
			],
			&[],
		);
		assert_eq!(results.len(), 3);
		assert!(!results[0].passed);
		assert!(!results[1].passed);
		assert_eq!(results[1].observed, "receipt has no contract address");
		assert!(results[2].passed);
	}

	#[test]
	fn test_large_integers_compare_exactly() {
		let big = U256::from(1u64) << 200usize;
		let expectation = Expectation::query_equals(
			"vault",
			"total",
			vec![],
			"1606938044258990275541962092341162602522202993782792835301376",
		);
		let results = run(&[expectation.clone()], &[after(Value::Uint(big))]);
		assert!(results[0].passed, "{:?}", results);

		let results = run(&[expectation], &[after(Value::Uint(big + U256::from(1u64)))]);
		assert!(!results[0].passed);
	}

	#[test]
	fn test_address_comparison_ignores_case() {
		let observed = Address::from_str("0x5FbDB2315678afecb367f032d93F642f64180aa3").unwrap();
		let results = run(
			&[
				Expectation::query_equals(
					"nft",
					"owner",
					vec![],
					"0x5fbdb2315678afecb367f032d93f642f64180aa3",
				),
				Expectation::query_equals(
					"nft",
					"ownerOf",
					vec![Argument::from(1u64)],
					"${accounts.1}",
				),
			],
			&[after(Value::Address(observed)), after(Value::Address(Address::repeat_byte(0xa1)))],
		);
		assert!(results.iter().all(|r| r.passed), "{:?}", results);
	}

	#[test]
	fn test_balance_delta() {
		let before = U256::from(10_000u64);
		let increase = Observation {
			before: Some(Ok(Value::Uint(before))),
			after: Some(Ok(Value::Uint(before + U256::from(250u64)))),
		};
		let decrease = Observation {
			before: Some(Ok(Value::Uint(before))),
			after: Some(Ok(Value::Uint(before - U256::from(250u64)))),
		};
		let results = run(
			&[
				Expectation::balance_delta("${accounts.1}", 250u64),
				Expectation::balance_delta(
					"${accounts.0}",
					Argument::from(Value::Int(I256::from_dec_str("-250").unwrap())),
				),
				Expectation::balance_delta("${accounts.0}", 250u64),
			],
			&[increase, decrease.clone(), decrease],
		);
		assert!(results[0].passed, "{:?}", results[0]);
		assert!(results[1].passed, "{:?}", results[1]);
		assert!(!results[2].passed);
		assert_eq!(results[2].observed, "-250");
	}

	#[test]
	fn test_unobserved_subject_fails() {
		let failed = Observation {
			before: None,
			after: Some(Err("Rejected: execution reverted".to_string())),
		};
		let results = run(
			&[
				Expectation::query_equals(
					"nft",
					"ownerOf",
					vec![Argument::from(9u64)],
					"${accounts.1}",
				),
				Expectation::query_equals("nft", "nextTokenId", vec![], 2u64),
			],
			&[failed],
		);
		assert!(!results[0].passed);
		assert_eq!(results[0].observed, "Rejected: execution reverted");
		assert!(!results[1].passed);
		assert!(results[1].observed.contains("was not observed"));
	}

	#[test]
	fn test_uncoercible_expected_value() {
		let results = run(&[Expectation::field_equals("receipt.status", "maybe")], &[]);
		assert!(!results[0].passed);
		assert!(results[0].observed.starts_with("true ("));
	}
}
