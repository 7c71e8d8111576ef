//! Common types module for the transaction harness.
//!
//! This module defines the data model shared by every harness crate: accounts,
//! typed on-chain values, action plans, receipts and run reports. Keeping them in
//! one crate lets the client, the executor and the command-line front end agree
//! on a single representation.

/// Account types supplied by the chain client.
pub mod account;
/// Action plan types: steps, arguments, extraction rules and expectations.
pub mod plan;
/// Transaction handles, receipts and decoded events.
pub mod receipt;
/// Registry trait for named client implementations.
pub mod registry;
/// Per-step outcomes and the final run report.
pub mod report;
/// Utility functions for formatting hashes, addresses and amounts.
pub mod utils;
/// Configuration validation types for network sections.
pub mod validation;
/// Typed on-chain values.
pub mod value;

pub use account::*;
pub use plan::*;
pub use receipt::*;
pub use registry::ImplementationRegistry;
pub use report::*;
pub use utils::{format_ether, truncate_id, with_0x_prefix, without_0x_prefix};
pub use validation::*;
pub use value::*;

pub use alloy_primitives::{Address, I256, U256};
