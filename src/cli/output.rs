//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ConfigHasher, ValidationResult};
use crate::planner::{Classification, DeploymentPlan, Phase, SessionResult, SessionState};
use crate::state::{DeploymentState, LockInfo, SessionRecord};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan step row for table display.
#[derive(Tabled)]
struct PlanStepRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Phase")]
    phase: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Step")]
    label: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "On failure")]
    on_failure: String,
}

/// Step outcome row for table display.
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Phase")]
    phase: String,
    #[tabled(rename = "Step")]
    label: String,
    #[tabled(rename = "Code")]
    code: i32,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "Time")]
    time: String,
}

/// History row for table display.
#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "When")]
    when: String,
    #[tabled(rename = "Type")]
    deployment_type: String,
    #[tabled(rename = "Mode")]
    mode: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Exit")]
    exit_code: i32,
    #[tabled(rename = "Catalog")]
    catalog: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a deployment plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &DeploymentPlan) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    fn format_plan_text(plan: &DeploymentPlan) -> String {
        let mut output = String::new();

        let _ = writeln!(
            output,
            "\n{} {} plan ({} mode)",
            "▶".cyan(),
            plan.request.deployment_type,
            plan.request.deploy_mode
        );
        if !plan.catalog_hash.is_empty() {
            let _ = writeln!(
                output,
                "   Catalog hash: {}",
                ConfigHasher::short_hash(&plan.catalog_hash)
            );
        }
        output.push('\n');

        let rows: Vec<PlanStepRow> = Phase::ALL
            .into_iter()
            .flat_map(|phase| plan.phase(phase).iter().map(move |s| (phase, s)))
            .enumerate()
            .map(|(i, (phase, planned))| PlanStepRow {
                index: i + 1,
                phase: phase.to_string(),
                kind: planned.step.kind().to_string(),
                label: Self::truncate(&planned.label, 32),
                target: Self::truncate(&planned.step.target(), 40),
                on_failure: format!("{:?}", planned.on_failure).to_lowercase(),
            })
            .collect();

        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        if plan.is_empty() {
            let _ = writeln!(
                output,
                "\n{} No package operations for this request.",
                "⚠".yellow()
            );
        }

        let _ = writeln!(
            output,
            "\nPlan: {} pre, {} main, {} post steps",
            plan.phase(Phase::Pre).len(),
            plan.phase(Phase::Main).len().to_string().green(),
            plan.phase(Phase::Post).len()
        );

        output
    }

    /// Formats a session result for display.
    #[must_use]
    pub fn format_result(&self, result: &SessionResult) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_default(),
            OutputFormat::Text => Self::format_result_text(result),
        }
    }

    fn format_result_text(result: &SessionResult) -> String {
        let mut output = String::new();

        let rows: Vec<OutcomeRow> = result
            .phase_outcomes
            .iter()
            .flat_map(|(phase, outcomes)| outcomes.iter().map(move |o| (*phase, o)))
            .map(|(phase, o)| OutcomeRow {
                phase: phase.to_string(),
                label: Self::truncate(&o.label, 32),
                code: o.code,
                result: Self::format_classification(o.classification),
                time: format!("{} ms", o.duration_ms),
            })
            .collect();

        if !rows.is_empty() {
            output.push('\n');
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let headline = match result.state {
            SessionState::Completed => format!("{} Session completed", "✓".green()),
            SessionState::Deferred => format!("{} Session deferred", "⚠".yellow()),
            _ => format!("{} Session aborted", "✗".red()),
        };
        let _ = writeln!(output, "\n{headline} (exit code {})", result.final_exit_code);

        if let Some(step) = &result.failed_step {
            let _ = writeln!(output, "   Failed step: {step}");
        }
        if let Some(fault) = &result.engine_fault {
            let _ = writeln!(output, "   Engine fault: {fault}");
        }
        if result.reboot_required {
            let _ = writeln!(output, "   {} A reboot is required.", "⚠".yellow());
        }

        output
    }

    /// Formats session history.
    #[must_use]
    pub fn format_history(&self, state: &DeploymentState, limit: usize) -> String {
        let records = state.recent(limit);
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&HistoryJson {
                app: &state.app,
                deferrals_used: state.deferrals_used,
                sessions: records,
            })
            .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = format!(
                    "\n{} {} ({} deferrals used)\n\n",
                    "▶".cyan(),
                    state.app,
                    state.deferrals_used
                );

                if records.is_empty() {
                    output.push_str("   No sessions recorded.\n");
                    return output;
                }

                let rows: Vec<HistoryRow> = records.into_iter().map(Self::history_row).collect();
                output.push_str(&Table::new(rows).to_string());
                output.push('\n');
                output
            }
        }
    }

    fn history_row(record: &SessionRecord) -> HistoryRow {
        HistoryRow {
            when: record.timestamp.format("%Y-%m-%d %H:%M").to_string(),
            deployment_type: record.deployment_type.to_string(),
            mode: record.deploy_mode.to_string(),
            version: record.app_version.clone(),
            state: Self::format_state(record.final_state),
            exit_code: record.exit_code,
            catalog: ConfigHasher::short_hash(&record.catalog_hash).to_string(),
        }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                "valid": result.is_valid(),
                "errors": result.errors,
                "warnings": if show_warnings { result.warnings.clone() } else { Vec::new() },
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Catalog is valid\n", "✓".green())
                } else {
                    format!("{} Catalog is invalid\n", "✗".red())
                };
                for error in &result.errors {
                    let _ = writeln!(output, "   - {error}");
                }
                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats lock information.
    #[must_use]
    pub fn format_lock(&self, lock: &LockInfo) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(lock).unwrap_or_default(),
            OutputFormat::Text => format!(
                "Session lock held by {} since {} (expires in {}s)",
                lock.holder,
                lock.acquired_at.format("%Y-%m-%d %H:%M:%S"),
                lock.remaining_secs()
            ),
        }
    }

    /// Formats a plain message.
    #[must_use]
    pub fn format_message(&self, status: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&serde_json::json!({ "status": status, "message": message }))
                    .unwrap_or_default()
            }
            OutputFormat::Text => match status {
                "success" => format!("{} {message}", "✓".green()),
                "error" => format!("{} {message}", "✗".red()),
                _ => format!("{} {message}", "⚠".yellow()),
            },
        }
    }

    fn format_classification(classification: Classification) -> String {
        match classification {
            Classification::Success => "success".green().to_string(),
            Classification::SuccessRebootRequired => "success, reboot".green().to_string(),
            Classification::SoftFailure => "soft failure".yellow().to_string(),
            Classification::HardFailure => "hard failure".red().to_string(),
        }
    }

    fn format_state(state: SessionState) -> String {
        match state {
            SessionState::Completed => "completed".green().to_string(),
            SessionState::Deferred => "deferred".yellow().to_string(),
            SessionState::Aborted => "aborted".red().to_string(),
            other => other.to_string().dimmed().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{head}...")
        }
    }
}

#[derive(serde::Serialize)]
struct HistoryJson<'a> {
    app: &'a str,
    deferrals_used: u32,
    sessions: Vec<&'a SessionRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PackageAction, PackageEntry, SessionConfig};
    use crate::planner::{DeploymentRequest, build_plan};

    fn plan() -> DeploymentPlan {
        let catalog = vec![PackageEntry {
            product_key: String::from("{AAAA-0001}"),
            action: PackageAction::Install,
            display_name: String::from("Acme Reader"),
            enabled: true,
            installer: None,
            transform: None,
            patches: vec![],
            detect_path: None,
            failure_code: None,
            continue_on_error: false,
        }];
        build_plan(&catalog, &SessionConfig::default(), &DeploymentRequest::default()).unwrap()
    }

    #[test]
    fn test_plan_text_lists_steps() {
        colored::control::set_override(false);
        let text = OutputFormatter::new(OutputFormat::Text).format_plan(&plan());
        assert!(text.contains("Acme Reader"));
        assert!(text.contains("1 main"));
    }

    #[test]
    fn test_plan_json_is_parseable() {
        let json = OutputFormatter::new(OutputFormat::Json).format_plan(&plan());
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["phases"].as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn test_result_json_carries_exit_code() {
        let mut result = SessionResult::new();
        result.state = SessionState::Deferred;
        result.final_exit_code = 60012;
        let json = OutputFormatter::new(OutputFormat::Json).format_result(&result);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["final_exit_code"], 60012);
        assert_eq!(value["state"], "deferred");
    }

    #[test]
    fn test_empty_history() {
        colored::control::set_override(false);
        let state = DeploymentState::new("acme");
        let text = OutputFormatter::new(OutputFormat::Text).format_history(&state, 5);
        assert!(text.contains("No sessions recorded"));
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("ééééééééééé", 6), "ééé...");
    }
}
