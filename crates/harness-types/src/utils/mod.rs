//! Utility functions for display formatting.

pub mod formatting;

pub use formatting::{format_ether, truncate_id, with_0x_prefix, without_0x_prefix};
