//! Registry trait for self-registering client implementations.

/// Base trait for implementation registries.
///
/// Each chain client implementation provides a `Registry` struct implementing
/// this trait, so the configured network `kind` can be mapped to a factory
/// without the binary knowing every implementation by hand.
pub trait ImplementationRegistry {
	/// The name used for `kind` in a network section, e.g. `"evm_alloy"`.
	const NAME: &'static str;

	/// The factory function type this implementation provides.
	type Factory;

	/// Returns the factory that builds the implementation from configuration.
	fn factory() -> Self::Factory;
}
