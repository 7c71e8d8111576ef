//! Receipt extraction.
//!
//! Pulls named fields out of a receipt's decoded events and turns them into
//! plan variables. When several events share a tag the first one in log order
//! is used.

use harness_types::{Binding, ExtractionRule, Receipt, StepFailure};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
	#[error("Expected event '{event}' not found in receipt")]
	MissingExpectedEvent { event: String },
	#[error("Event '{event}' has no field '{field}'")]
	MissingEventField { event: String, field: String },
}

impl From<ExtractionError> for StepFailure {
	fn from(err: ExtractionError) -> Self {
		match err {
			ExtractionError::MissingExpectedEvent { event } => {
				StepFailure::MissingExpectedEvent { event }
			},
			ExtractionError::MissingEventField { event, field } => {
				StepFailure::MissingEventField { event, field }
			},
		}
	}
}

/// Applies every rule to the receipt, in order. Stops at the first rule that
/// cannot be satisfied.
pub fn extract(
	receipt: &Receipt,
	rules: &[ExtractionRule],
) -> Result<Vec<Binding>, ExtractionError> {
	rules
		.iter()
		.map(|rule| {
			let event = receipt.first_event(&rule.event).ok_or_else(|| {
				ExtractionError::MissingExpectedEvent {
					event: rule.event.clone(),
				}
			})?;
			let value = event
				.field(&rule.field)
				.ok_or_else(|| ExtractionError::MissingEventField {
					event: rule.event.clone(),
					field: rule.field.clone(),
				})?;
			Ok(Binding {
				name: rule.bind.clone(),
				value: value.clone(),
			})
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use harness_types::{Address, EventRecord, TransactionHash, Value};

	fn receipt(events: Vec<EventRecord>) -> Receipt {
		Receipt {
			hash: TransactionHash(vec![0x11; 32]),
			block_number: 3,
			gas_used: 60_000,
			success: true,
			contract_address: None,
			events,
		}
	}

	fn transfer(token_id: u64) -> EventRecord {
		EventRecord::new("Transfer", Address::repeat_byte(0xcc))
			.with_field("from", Address::ZERO)
			.with_field("to", Address::repeat_byte(0xa1))
			.with_field("tokenId", token_id)
	}

	#[test]
	fn test_first_matching_event_wins() {
		let receipt = receipt(vec![
			EventRecord::new(EventRecord::UNKNOWN_TAG, Address::ZERO),
			transfer(1),
			transfer(2),
		]);
		let bindings = extract(
			&receipt,
			&[ExtractionRule::new("Transfer", "tokenId", "mintedTokenId")],
		)
		.unwrap();
		assert_eq!(
			bindings,
			vec![Binding {
				name: "mintedTokenId".to_string(),
				value: Value::from(1u64),
			}]
		);
	}

	#[test]
	fn test_missing_event() {
		let err = extract(
			&receipt(vec![]),
			&[ExtractionRule::new("Transfer", "tokenId", "id")],
		)
		.unwrap_err();
		assert_eq!(
			StepFailure::from(err),
			StepFailure::MissingExpectedEvent {
				event: "Transfer".to_string()
			}
		);
	}

	#[test]
	fn test_missing_field() {
		let err = extract(
			&receipt(vec![transfer(1)]),
			&[
				ExtractionRule::new("Transfer", "to", "recipient"),
				ExtractionRule::new("Transfer", "value", "amount"),
			],
		)
		.unwrap_err();
		assert_eq!(
			err,
			ExtractionError::MissingEventField {
				event: "Transfer".to_string(),
				field: "value".to_string()
			}
		);
	}

	#[test]
	fn test_no_rules_binds_nothing() {
		assert!(extract(&receipt(vec![transfer(1)]), &[]).unwrap().is_empty());
	}
}
