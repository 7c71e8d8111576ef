//! Main entry point for the transaction harness.
//!
//! Loads the configuration, connects to the selected network and either runs
//! an action plan, checks one without sending anything, or prints account and
//! network information. The process exit status reflects the run verdict.

use clap::{Parser, Subcommand};
use harness_client::{create_client, ChainClient, ClientError};
use harness_config::{Config, ConfigError};
use harness_core::{validate_plan, CancellationFlag, Executor, ExecutorOptions, PlanValidationError};
use harness_types::{format_ether, ActionPlan, PlanParseError};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

mod report;

use report::{render, ReportFormat};

/// Command-line arguments for the harness.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "harness.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,

	/// Network to use instead of harness.default_network
	#[arg(short, long, env = "HARNESS_NETWORK")]
	network: Option<String>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Execute an action plan and print its report
	Run {
		plan: PathBuf,
		#[arg(short, long, value_enum, default_value = "text")]
		format: ReportFormat,
	},
	/// Validate an action plan without sending transactions
	Check { plan: PathBuf },
	/// List accounts and their balances
	Accounts,
	/// Print chain id and latest block
	Network,
}

#[derive(Debug, Error)]
enum HarnessError {
	#[error("Configuration error: {0}")]
	Config(#[from] ConfigError),
	#[error("Client error: {0}")]
	Client(#[from] ClientError),
	#[error("Plan error: {0}")]
	Plan(#[from] PlanParseError),
	#[error("{0}")]
	InvalidPlan(#[from] PlanValidationError),
	#[error("Failed to render report: {0}")]
	Render(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
	fmt()
		.with_env_filter(env_filter)
		.with_writer(std::io::stderr)
		.with_target(true)
		.init();

	match execute(args).await {
		Ok(true) => ExitCode::SUCCESS,
		Ok(false) => ExitCode::FAILURE,
		Err(e) => {
			tracing::error!(error = %e, "Harness failed");
			eprintln!("error: {}", e);
			ExitCode::FAILURE
		},
	}
}

/// Runs the selected command. Returns whether it succeeded.
async fn execute(args: Args) -> Result<bool, HarnessError> {
	let config = Config::from_file(&args.config).await?;
	let (name, network) = config.select_network(args.network.as_deref())?;
	tracing::info!(network = %name, kind = %network.kind, "Loaded configuration");

	let client: Arc<dyn ChainClient> =
		Arc::from(create_client(&network.kind, &network.settings_value())?);

	match args.command {
		Command::Run { plan, format } => {
			let (output, passed) = run_plan(&config, client, &plan, format).await?;
			print!("{}", output);
			Ok(passed)
		},
		Command::Check { plan } => {
			let plan = ActionPlan::from_file(&plan)?;
			let accounts = client.list_accounts().await?;
			validate_plan(&plan, accounts.len())?;
			println!(
				"Plan '{}' is valid: {} step(s), {} account(s) available",
				plan.name,
				plan.steps.len(),
				accounts.len()
			);
			Ok(true)
		},
		Command::Accounts => {
			print!("{}", list_accounts(client.as_ref()).await?);
			Ok(true)
		},
		Command::Network => {
			let chain_id = client.chain_id().await?;
			let block = client.block_number().await?;
			println!("Network {} ({}): chain id {}, block {}", name, network.kind, chain_id, block);
			Ok(true)
		},
	}
}

fn executor_options(config: &Config) -> ExecutorOptions {
	ExecutorOptions {
		confirmation_timeout: Duration::from_secs(config.harness.confirmation_timeout_seconds),
		halt_on_assertion_failure: config.harness.halt_on_assertion_failure,
	}
}

/// Executes a plan file and renders its report.
async fn run_plan(
	config: &Config,
	client: Arc<dyn ChainClient>,
	plan: &Path,
	format: ReportFormat,
) -> Result<(String, bool), HarnessError> {
	let plan = ActionPlan::from_file(plan)?;
	let cancellation = CancellationFlag::default();
	let executor = Executor::connect(client, executor_options(config))
		.await?
		.with_cancellation(cancellation.clone());

	let interrupt = tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			tracing::warn!("Interrupt received, stopping before the next step");
			cancellation.cancel();
		}
	});

	let result = executor.run(&plan).await;
	interrupt.abort();

	let report = result?;
	Ok((render(&report, format)?, report.is_pass()))
}

async fn list_accounts(client: &dyn ChainClient) -> Result<String, ClientError> {
	let mut out = String::new();
	for account in client.list_accounts().await? {
		let balance = client.get_balance(account.address).await?;
		out.push_str(&format!(
			"{:>3}  {}  {} ETH\n",
			account.index,
			account.address,
			format_ether(balance)
		));
	}
	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	const CONFIG: &str = r#"
[harness]
default_network = "dev"
confirmation_timeout_seconds = 30

[networks.dev]
kind = "simulated"
accounts = 3
"#;

	const PLAN: &str = r#"
name = "mint-smoke"

[[steps]]
kind = "deploy"
id = "nft"
contract = "AccessNFT"

[[steps]]
kind = "call"
target = "nft"
method = "mint"
args = ["${accounts.1}", "ipfs://x"]

[[steps.extract]]
event = "Transfer"
field = "tokenId"
bind = "mintedTokenId"

[[steps.expect]]
field = "mintedTokenId"
equals = 1

[[steps.expect]]
query = { target = "nft", method = "ownerOf", args = ["${mintedTokenId}"] }
equals = "${accounts.1}"
"#;

	async fn setup(plan: &str) -> (TempDir, Config, Arc<dyn ChainClient>) {
		let dir = TempDir::new().unwrap();
		fs::write(dir.path().join("harness.toml"), CONFIG).unwrap();
		fs::write(dir.path().join("plan.toml"), plan).unwrap();

		let config = Config::from_file(dir.path().join("harness.toml")).await.unwrap();
		let (_, network) = config.select_network(None).unwrap();
		let client = Arc::from(create_client(&network.kind, &network.settings_value()).unwrap());
		(dir, config, client)
	}

	#[test]
	fn test_parse_arguments() {
		let args = Args::try_parse_from([
			"harness", "--network", "dev", "run", "plan.toml", "-f", "json",
		])
		.unwrap();
		assert_eq!(args.config, PathBuf::from("harness.toml"));
		assert_eq!(args.network.as_deref(), Some("dev"));
		assert!(matches!(
			args.command,
			Command::Run { format: ReportFormat::Json, .. }
		));

		assert!(Args::try_parse_from(["harness", "run"]).is_err());
	}

	#[tokio::test]
	async fn test_run_plan_from_files() {
		let (dir, config, client) = setup(PLAN).await;
		assert_eq!(executor_options(&config).confirmation_timeout, Duration::from_secs(30));

		let plan = dir.path().join("plan.toml");
		let (output, passed) = run_plan(&config, client, &plan, ReportFormat::Text)
			.await
			.unwrap();
		assert!(passed, "{}", output);
		assert!(output.contains("mintedTokenId = 1"));
		assert!(output.contains("Verdict: PASS"));
	}

	#[tokio::test]
	async fn test_wrong_expectation_fails_run() {
		let (dir, config, client) = setup(&PLAN.replace("equals = 1", "equals = 2")).await;
		let plan = dir.path().join("plan.toml");
		let (output, passed) = run_plan(&config, client, &plan, ReportFormat::Json)
			.await
			.unwrap();
		assert!(!passed);
		assert!(output.contains("\"verdict\": \"fail\""));
	}

	#[tokio::test]
	async fn test_invalid_plan_is_an_error() {
		let plan = PLAN.replace("target = \"nft\"\nmethod", "target = \"token\"\nmethod");
		let (dir, config, client) = setup(&plan).await;
		let err = run_plan(&config, client, &dir.path().join("plan.toml"), ReportFormat::Text)
			.await
			.unwrap_err();
		assert!(matches!(err, HarnessError::InvalidPlan(_)));
	}

	#[tokio::test]
	async fn test_list_accounts() {
		let (_dir, _config, client) = setup(PLAN).await;
		let listing = list_accounts(client.as_ref()).await.unwrap();
		assert_eq!(listing.lines().count(), 3);
		assert!(listing.lines().all(|line| line.ends_with("10000.0 ETH")));
	}
}
