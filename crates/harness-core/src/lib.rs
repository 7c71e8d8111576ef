//! Core engine of the transaction harness.
//!
//! Validates action plans, then drives them through a [`harness_client::ChainClient`]:
//! submitting each step, waiting for its receipt, binding values extracted from
//! events and checking the step's expectations. The result is a
//! [`harness_types::RunReport`] the caller renders and maps to an exit status.

pub mod executor;
pub mod extractor;
pub mod scope;
pub mod validation;
pub mod verifier;

pub use executor::{CancellationFlag, Executor, ExecutorOptions};
pub use extractor::{extract, ExtractionError};
pub use scope::{ContractRef, Scope};
pub use validation::{validate_plan, PlanValidationError};
pub use verifier::{verify, Observation, VerificationContext};
