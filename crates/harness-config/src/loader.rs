//! Loading of configuration files split across several documents.
//!
//! The main file may list other files under `include`. Included files are
//! merged section by section; a top-level section defined twice, or a file
//! included twice, is an error.

use crate::{resolve_env_vars, Config, ConfigError};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

pub struct ConfigLoader {
	/// Base path for resolving relative includes.
	base_path: PathBuf,
	/// Canonical paths already read, for circular include detection.
	loaded_files: HashSet<PathBuf>,
	/// Which file each top-level section came from.
	section_sources: HashMap<String, PathBuf>,
}

impl ConfigLoader {
	pub fn new(base_path: impl AsRef<Path>) -> Self {
		Self {
			base_path: base_path.as_ref().to_path_buf(),
			loaded_files: HashSet::new(),
			section_sources: HashMap::new(),
		}
	}

	/// Loads a configuration file and all its includes.
	pub async fn load_config(
		&mut self,
		config_path: impl AsRef<Path>,
	) -> Result<Config, ConfigError> {
		let config_path = self.resolve_path(config_path)?;
		let main_content = self.load_file(&config_path)?;
		let mut main_toml: toml::Value = toml::from_str(&main_content)?;

		let includes = extract_includes(&main_toml)?;
		if includes.is_empty() {
			return main_content.parse();
		}

		if let Some(table) = main_toml.as_table_mut() {
			table.remove("include");
			for key in table.keys() {
				self.section_sources.insert(key.clone(), config_path.clone());
			}
		}

		for include in includes {
			let include_path = self.resolve_path(&include)?;
			let content = self.load_file(&include_path)?;
			let include_toml: toml::Value = toml::from_str(&content)?;
			if include_toml.get("include").is_some() {
				return Err(ConfigError::Validation(format!(
					"Nested include in {} is not supported",
					include_path.display()
				)));
			}
			self.merge(&mut main_toml, include_toml, &include_path)?;
			tracing::debug!(file = %include_path.display(), "Included configuration file");
		}

		let combined = toml::to_string(&main_toml).map_err(|e| {
			ConfigError::Parse(format!("Failed to serialize combined config: {}", e))
		})?;
		combined.parse()
	}

	/// Reads a file once and resolves environment variables in it.
	fn load_file(&mut self, path: &Path) -> Result<String, ConfigError> {
		let canonical = path.canonicalize().map_err(|e| {
			ConfigError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("Cannot resolve path {}: {}", path.display(), e),
			))
		})?;

		if !self.loaded_files.insert(canonical.clone()) {
			return Err(ConfigError::Validation(format!(
				"Circular include detected: {} was already loaded",
				canonical.display()
			)));
		}

		let content = std::fs::read_to_string(path)?;
		resolve_env_vars(&content)
	}

	/// Moves the sections of `include` into `main`, rejecting duplicates.
	///
	/// `networks` is the one section that may be spread over several files,
	/// as long as each network name appears only once.
	fn merge(
		&mut self,
		main: &mut toml::Value,
		include: toml::Value,
		source: &Path,
	) -> Result<(), ConfigError> {
		let (Some(main_table), toml::Value::Table(include_table)) = (main.as_table_mut(), include)
		else {
			return Err(ConfigError::Validation(format!(
				"{} is not a TOML table",
				source.display()
			)));
		};

		for (key, value) in include_table {
			if key == "networks" {
				self.merge_networks(main_table, value, source)?;
				continue;
			}
			if let Some(existing) = self.section_sources.get(&key) {
				return Err(ConfigError::Validation(format!(
					"Duplicate section '{}' found in {} and {}. \
					Each top-level section must be unique across all configuration files.",
					key,
					existing.display(),
					source.display()
				)));
			}
			self.section_sources.insert(key.clone(), source.to_path_buf());
			main_table.insert(key, value);
		}
		Ok(())
	}

	fn merge_networks(
		&mut self,
		main_table: &mut toml::Table,
		networks: toml::Value,
		source: &Path,
	) -> Result<(), ConfigError> {
		let toml::Value::Table(networks) = networks else {
			return Err(ConfigError::Validation(format!(
				"'networks' in {} must be a table",
				source.display()
			)));
		};

		let target = main_table
			.entry("networks")
			.or_insert_with(|| toml::Value::Table(toml::Table::new()));
		let Some(target) = target.as_table_mut() else {
			return Err(ConfigError::Validation("'networks' must be a table".into()));
		};

		for (name, network) in networks {
			let section = format!("networks.{}", name);
			if target.contains_key(&name) {
				let existing = self
					.section_sources
					.get(&section)
					.or_else(|| self.section_sources.get("networks"))
					.map(|p| p.display().to_string())
					.unwrap_or_default();
				return Err(ConfigError::Validation(format!(
					"Duplicate section '{}' found in {} and {}",
					section,
					existing,
					source.display()
				)));
			}
			self.section_sources.insert(section, source.to_path_buf());
			target.insert(name, network);
		}
		Ok(())
	}

	fn resolve_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, ConfigError> {
		let path = path.as_ref();
		let resolved = if path.is_absolute() {
			path.to_path_buf()
		} else {
			self.base_path.join(path)
		};

		if !resolved.exists() {
			return Err(ConfigError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("Configuration file not found: {}", resolved.display()),
			)));
		}
		Ok(resolved)
	}
}

/// Reads the `include` directive: a string or an array of strings.
fn extract_includes(toml: &toml::Value) -> Result<Vec<PathBuf>, ConfigError> {
	match toml.get("include") {
		None => Ok(Vec::new()),
		Some(toml::Value::String(path)) => Ok(vec![PathBuf::from(path)]),
		Some(toml::Value::Array(items)) => items
			.iter()
			.map(|item| {
				item.as_str().map(PathBuf::from).ok_or_else(|| {
					ConfigError::Validation("Include array must contain only strings".into())
				})
			})
			.collect(),
		Some(_) => Err(ConfigError::Validation(
			"Include must be a string or array of strings".into(),
		)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	#[tokio::test]
	async fn test_single_file_config() {
		let temp_dir = TempDir::new().unwrap();
		fs::write(
			temp_dir.path().join("harness.toml"),
			r#"
[harness]
confirmation_timeout_seconds = 30

[networks.dev]
kind = "simulated"
"#,
		)
		.unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let config = loader.load_config("harness.toml").await.unwrap();
		assert_eq!(config.harness.confirmation_timeout_seconds, 30);
		assert_eq!(config.networks["dev"].kind, "simulated");
	}

	#[tokio::test]
	async fn test_config_with_includes() {
		let temp_dir = TempDir::new().unwrap();
		fs::write(
			temp_dir.path().join("main.toml"),
			r#"
include = ["local.toml", "remote.toml"]

[harness]
default_network = "localhost"

[networks.dev]
kind = "simulated"
"#,
		)
		.unwrap();
		fs::write(
			temp_dir.path().join("local.toml"),
			r#"
[networks.localhost]
kind = "evm_alloy"
rpc_url = "http://127.0.0.1:8545"
"#,
		)
		.unwrap();
		fs::write(
			temp_dir.path().join("remote.toml"),
			r#"
[networks.sepolia]
kind = "evm_alloy"
rpc_url = "${HARNESS_LOADER_RPC:-https://rpc.sepolia.org}"
"#,
		)
		.unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let config = loader.load_config("main.toml").await.unwrap();

		assert_eq!(config.networks.len(), 3);
		assert_eq!(config.harness.default_network.as_deref(), Some("localhost"));
		assert_eq!(
			config.networks["sepolia"]
				.settings
				.get("rpc_url")
				.and_then(|v| v.as_str()),
			Some("https://rpc.sepolia.org")
		);
	}

	#[tokio::test]
	async fn test_duplicate_section_error() {
		let temp_dir = TempDir::new().unwrap();
		fs::write(
			temp_dir.path().join("main.toml"),
			r#"
include = ["duplicate.toml"]

[harness]
confirmation_timeout_seconds = 10

[networks.dev]
kind = "simulated"
"#,
		)
		.unwrap();
		fs::write(
			temp_dir.path().join("duplicate.toml"),
			"[harness]\nconfirmation_timeout_seconds = 20\n",
		)
		.unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let error = loader.load_config("main.toml").await.unwrap_err();
		assert!(error.to_string().contains("Duplicate section 'harness'"));
	}

	#[tokio::test]
	async fn test_duplicate_network_error() {
		let temp_dir = TempDir::new().unwrap();
		fs::write(
			temp_dir.path().join("main.toml"),
			"include = [\"more.toml\"]\n[networks.dev]\nkind = \"simulated\"\n",
		)
		.unwrap();
		fs::write(
			temp_dir.path().join("more.toml"),
			"[networks.dev]\nkind = \"evm_alloy\"\n",
		)
		.unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let error = loader.load_config("main.toml").await.unwrap_err();
		assert!(error.to_string().contains("networks.dev"));
	}

	#[tokio::test]
	async fn test_self_include_detection() {
		let temp_dir = TempDir::new().unwrap();
		fs::write(
			temp_dir.path().join("self.toml"),
			"include = [\"self.toml\"]\n[networks.dev]\nkind = \"simulated\"\n",
		)
		.unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let error = loader.load_config("self.toml").await.unwrap_err();
		assert!(error.to_string().contains("already loaded"));
	}
}
