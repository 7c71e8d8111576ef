//! Report rendering for the command line.

use harness_types::{truncate_id, RunReport, StepReport};

/// Output format for `harness run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
	Text,
	Json,
}

pub fn render(report: &RunReport, format: ReportFormat) -> Result<String, serde_json::Error> {
	match format {
		ReportFormat::Text => Ok(render_text(report)),
		ReportFormat::Json => serde_json::to_string_pretty(report),
	}
}

/// Human-readable report, one block per executed step.
pub fn render_text(report: &RunReport) -> String {
	let mut out = format!("Plan: {}\n", report.plan);

	for step in &report.steps {
		out.push_str(&render_step(step));
	}

	let assertions = report.assertions().count();
	let elapsed = report.finished_at - report.started_at;
	out.push_str(&format!(
		"Verdict: {} ({} step(s) executed, {} assertion(s), {} failed, {}ms)\n",
		report.verdict,
		report.steps.len(),
		assertions,
		report.failed_assertions(),
		elapsed.num_milliseconds()
	));
	out
}

fn render_step(step: &StepReport) -> String {
	let status = match (&step.failure, step.passed()) {
		(Some(_), _) => "FAILED",
		(None, true) => "ok",
		(None, false) => "assertions failed",
	};
	let mut lines = vec![format!(
		"  [{}] {} ({}): {}",
		step.index + 1,
		step.label,
		step.kind,
		status
	)];

	if let Some(tx_hash) = &step.tx_hash {
		let mut line = format!("      tx {}", truncate_id(tx_hash));
		if let Some(block) = step.block_number {
			line.push_str(&format!(" block {}", block));
		}
		if let Some(gas) = step.gas_used {
			line.push_str(&format!(" gas {}", gas));
		}
		lines.push(line);
	}
	if let Some(address) = step.contract_address {
		lines.push(format!("      contract {}", address));
	}
	for binding in &step.bindings {
		lines.push(format!("      {} = {}", binding.name, binding.value));
	}
	for assertion in &step.assertions {
		if assertion.passed {
			lines.push(format!("      PASS {}", assertion.description));
		} else {
			lines.push(format!(
				"      FAIL {} (expected {}, observed {})",
				assertion.description, assertion.expected, assertion.observed
			));
		}
	}
	if let Some(failure) = &step.failure {
		lines.push(format!("      error: {}", failure));
	}

	let mut out = lines.join("\n");
	out.push('\n');
	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::{TimeZone, Utc};
	use harness_types::{AssertionResult, StepFailure, TxKind, Verdict};

	fn report() -> RunReport {
		let mut deploy = StepReport::new(0, "deploy AccessNFT", TxKind::Deploy);
		deploy.tx_hash = Some(format!("0x{}", "ab".repeat(32)));
		deploy.block_number = Some(1);
		deploy.gas_used = Some(500_000);

		let mut mint = StepReport::new(1, "nft.mint", TxKind::Call);
		mint.assertions.push(AssertionResult {
			description: "mintedTokenId == 2".to_string(),
			expected: "2".to_string(),
			observed: "1".to_string(),
			passed: false,
		});

		let mut transfer = StepReport::new(2, "send", TxKind::Transfer);
		transfer.failure = Some(StepFailure::ConfirmationTimeout { seconds: 120 });

		let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
		RunReport {
			plan: "smoke".to_string(),
			steps: vec![deploy, mint, transfer],
			verdict: Verdict::Fail,
			started_at: at,
			finished_at: at + chrono::Duration::milliseconds(1500),
		}
	}

	#[test]
	fn test_text_report() {
		let text = render_text(&report());
		assert!(text.starts_with("Plan: smoke\n"));
		assert!(text.contains("[1] deploy AccessNFT (deploy): ok"));
		assert!(text.contains("tx 0xabababab.. block 1 gas 500000"));
		assert!(text.contains("[2] nft.mint (call): assertions failed"));
		assert!(text.contains("FAIL mintedTokenId == 2 (expected 2, observed 1)"));
		assert!(text.contains("error: No receipt after 120s"));
		assert!(text.ends_with(
			"Verdict: FAIL (3 step(s) executed, 1 assertion(s), 1 failed, 1500ms)\n"
		));
	}

	#[test]
	fn test_step_lines() {
		let mut step = StepReport::new(0, "deploy AccessNFT", TxKind::Deploy);
		assert_eq!(render_step(&step), "  [1] deploy AccessNFT (deploy): ok\n");

		step.tx_hash = Some(format!("0x{}", "cd".repeat(32)));
		step.failure = Some(StepFailure::ConfirmationTimeout { seconds: 5 });
		let text = render_step(&step);
		assert_eq!(text.lines().count(), 3);
		assert!(text.contains("\n      tx 0xcdcdcdcd..\n"));
		assert!(text.ends_with("error: No receipt after 5s\n"));
	}

	#[test]
	fn test_json_report() {
		let json = render(&report(), ReportFormat::Json).unwrap();
		let value: serde_json::Value = serde_json::from_str(&json).unwrap();
		assert_eq!(value["verdict"], "fail");
		assert_eq!(value["steps"][2]["failure"]["type"], "confirmation_timeout");
		assert_eq!(value["steps"][1]["assertions"][0]["observed"], "1");
	}
}
