//! Configuration module for the transaction harness.
//!
//! Loads the harness settings and the set of named networks a plan can run
//! against. Each network names a client implementation via `kind`; every other
//! key in the network table belongs to that implementation and is validated by
//! it when the client is built.
//!
//! ## Modular Configuration Support
//!
//! Configurations can be split into multiple files:
//! - Use `include = ["networks.toml"]` to pull in other config files
//! - Each top-level section must be unique across all files (no duplicates allowed)

mod loader;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Configuration error: {0}")]
	Parse(String),
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep the message only; the default rendering dumps the whole input.
		ConfigError::Parse(err.message().to_string())
	}
}

/// Top-level harness configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	#[serde(default)]
	pub harness: HarnessConfig,
	/// Named networks, e.g. `[networks.localhost]`.
	pub networks: BTreeMap<String, NetworkConfig>,
}

/// Settings that apply to every run.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HarnessConfig {
	/// Network used when none is selected on the command line.
	#[serde(default)]
	pub default_network: Option<String>,
	/// How long to wait for a receipt before failing the step.
	#[serde(default = "default_confirmation_timeout_seconds")]
	pub confirmation_timeout_seconds: u64,
	/// Stop the plan at the first failed assertion.
	#[serde(default)]
	pub halt_on_assertion_failure: bool,
}

impl Default for HarnessConfig {
	fn default() -> Self {
		Self {
			default_network: None,
			confirmation_timeout_seconds: default_confirmation_timeout_seconds(),
			halt_on_assertion_failure: false,
		}
	}
}

fn default_confirmation_timeout_seconds() -> u64 {
	120
}

/// One network section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
	/// Client implementation name, e.g. `evm_alloy` or `simulated`.
	pub kind: String,
	/// Implementation-specific keys.
	#[serde(flatten)]
	pub settings: toml::Table,
}

impl NetworkConfig {
	/// Implementation settings as a TOML table value.
	pub fn settings_value(&self) -> toml::Value {
		toml::Value::Table(self.settings.clone())
	}
}

/// Resolves environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of the environment variable and
/// supports defaults written `${VAR_NAME:-default}`. Only upper-case names are
/// matched, so plan-style references such as `${accounts.1}` pass through.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = String::with_capacity(input.len());
	let mut last = 0;
	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let value = match std::env::var(var_name.as_str()) {
			Ok(v) => v,
			Err(_) => match cap.get(2) {
				Some(default) => default.as_str().to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name.as_str()
					)))
				},
			},
		};
		result.push_str(&input[last..full_match.start()]);
		result.push_str(&value);
		last = full_match.end();
	}
	result.push_str(&input[last..]);

	Ok(result)
}

impl Config {
	/// Loads configuration from a file, following `include` directives.
	pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = loader::ConfigLoader::new(base_dir);
		let file_name = path
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path.display())))?;
		loader.load_config(file_name).await
	}

	/// Picks the network to run against.
	///
	/// An explicit name wins, then `harness.default_network`, then the only
	/// configured network if there is exactly one.
	pub fn select_network(
		&self,
		requested: Option<&str>,
	) -> Result<(&str, &NetworkConfig), ConfigError> {
		let name = match requested.or(self.harness.default_network.as_deref()) {
			Some(name) => name,
			None if self.networks.len() == 1 => self
				.networks
				.keys()
				.next()
				.map(String::as_str)
				.unwrap_or_default(),
			None => {
				return Err(ConfigError::Validation(format!(
					"Several networks configured ({}); select one with --network or harness.default_network",
					self.networks.keys().cloned().collect::<Vec<_>>().join(", ")
				)))
			},
		};

		self.networks
			.get_key_value(name)
			.map(|(name, network)| (name.as_str(), network))
			.ok_or_else(|| ConfigError::Validation(format!("Unknown network '{}'", name)))
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.networks.is_empty() {
			return Err(ConfigError::Validation(
				"At least one network must be configured".into(),
			));
		}

		for (name, network) in &self.networks {
			if network.kind.is_empty() {
				return Err(ConfigError::Validation(format!(
					"Network '{}' must set kind",
					name
				)));
			}
		}

		if let Some(default) = &self.harness.default_network {
			if !self.networks.contains_key(default) {
				return Err(ConfigError::Validation(format!(
					"Default network '{}' not found in networks",
					default
				)));
			}
		}

		if self.harness.confirmation_timeout_seconds == 0 {
			return Err(ConfigError::Validation(
				"confirmation_timeout_seconds must be greater than 0".into(),
			));
		}
		if self.harness.confirmation_timeout_seconds > 86400 {
			return Err(ConfigError::Validation(
				"confirmation_timeout_seconds cannot exceed 86400 (24 hours)".into(),
			));
		}

		Ok(())
	}
}

/// Parses a TOML string, resolving environment variables and validating the result.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_env_var_resolution() {
		std::env::set_var("HARNESS_TEST_HOST", "localhost");
		std::env::set_var("HARNESS_TEST_PORT", "8545");

		let input = "rpc_url = \"http://${HARNESS_TEST_HOST}:${HARNESS_TEST_PORT}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "rpc_url = \"http://localhost:8545\"");

		std::env::remove_var("HARNESS_TEST_HOST");
		std::env::remove_var("HARNESS_TEST_PORT");
	}

	#[test]
	fn test_env_var_with_default() {
		let input = "value = \"${HARNESS_MISSING_VAR:-fallback}\"";
		assert_eq!(resolve_env_vars(input).unwrap(), "value = \"fallback\"");
	}

	#[test]
	fn test_missing_env_var_error() {
		let result = resolve_env_vars("value = \"${HARNESS_MISSING_VAR}\"");
		assert!(result.unwrap_err().to_string().contains("HARNESS_MISSING_VAR"));
	}

	#[test]
	fn test_lowercase_references_untouched() {
		let input = "args = [\"${accounts.1}\"]";
		assert_eq!(resolve_env_vars(input).unwrap(), input);
	}

	#[test]
	fn test_parse_config_with_defaults() {
		std::env::set_var("HARNESS_TEST_RPC", "http://127.0.0.1:8545");

		let config: Config = r#"
[networks.localhost]
kind = "evm_alloy"
rpc_url = "${HARNESS_TEST_RPC}"
poll_interval_ms = 250
"#
		.parse()
		.unwrap();

		assert_eq!(config.harness.confirmation_timeout_seconds, 120);
		assert!(!config.harness.halt_on_assertion_failure);
		let network = &config.networks["localhost"];
		assert_eq!(network.kind, "evm_alloy");
		assert_eq!(
			network.settings.get("rpc_url").and_then(|v| v.as_str()),
			Some("http://127.0.0.1:8545")
		);
		assert!(network.settings.get("kind").is_none());

		std::env::remove_var("HARNESS_TEST_RPC");
	}

	#[test]
	fn test_unknown_default_network_rejected() {
		let result: Result<Config, _> = r#"
[harness]
default_network = "mainnet"

[networks.localhost]
kind = "simulated"
"#
		.parse();
		assert!(result.unwrap_err().to_string().contains("mainnet"));
	}

	#[test]
	fn test_zero_timeout_rejected() {
		let result: Result<Config, _> = r#"
[harness]
confirmation_timeout_seconds = 0

[networks.dev]
kind = "simulated"
"#
		.parse();
		assert!(result.is_err());
	}

	#[test]
	fn test_select_network() {
		let config: Config = r#"
[harness]
default_network = "dev"

[networks.dev]
kind = "simulated"

[networks.localhost]
kind = "evm_alloy"
rpc_url = "http://127.0.0.1:8545"
"#
		.parse()
		.unwrap();

		assert_eq!(config.select_network(None).unwrap().0, "dev");
		assert_eq!(config.select_network(Some("localhost")).unwrap().1.kind, "evm_alloy");
		assert!(config.select_network(Some("sepolia")).is_err());

		let single: Config = "[networks.only]\nkind = \"simulated\"".parse().unwrap();
		assert_eq!(single.select_network(None).unwrap().0, "only");
	}
}
