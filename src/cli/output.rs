//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::orchestrator::BuildReport;
use crate::planner::{Action, BuildPlan};
use crate::state::{RevStatus, RevisionRecord};
use crate::topology::{Node, TAINT_CHECKSUM, TreeFormatter, short_checksum};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Record row for table display.
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Checksum")]
    checksum: String,
    #[tabled(rename = "External ID")]
    external_id: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a build plan for display.
    ///
    /// Unchanged nodes are listed only when `all` is set.
    #[must_use]
    pub fn format_plan(&self, plan: &BuildPlan, all: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan, all),
        }
    }

    fn format_plan_text(plan: &BuildPlan, all: bool) -> String {
        if plan.is_noop() && !all {
            return format!(
                "{} No changes required - {} is up to date.\n",
                "✓".green(),
                plan.environment
            );
        }

        let mut output = String::new();
        let _ = write!(output, "\nBuild Plan for {}\n\n", plan.environment);

        let rows: Vec<PlanActionRow> = plan
            .actions
            .iter()
            .filter(|a| all || a.action.is_change())
            .enumerate()
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_action(a.action),
                node: a.id.clone(),
                kind: a.kind.to_string(),
                reason: Self::truncate(&a.reason, 40),
            })
            .collect();

        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to rebuild, {} to destroy, {} unchanged\n",
            plan.count(Action::Create).to_string().green(),
            plan.count(Action::Touch).to_string().yellow(),
            plan.count(Action::Rebuild).to_string().yellow(),
            plan.count(Action::Delete).to_string().red(),
            plan.count(Action::Noop)
        );

        output
    }

    /// Formats the result of a build pass.
    #[must_use]
    pub fn format_report(&self, report: &BuildReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                let status = if report.cancelled {
                    format!("{} Build of {} cancelled", "⚠".yellow(), report.environment)
                } else if report.exit_success() {
                    format!("{} Build of {} successful", "✓".green(), report.environment)
                } else {
                    format!("{} Build of {} failed", "✗".red(), report.environment)
                };

                let mut output = format!("{status}\n\n");
                let _ = writeln!(output, "   Created: {}", report.counts.created);
                let _ = writeln!(output, "   Updated: {}", report.counts.touched);
                let _ = writeln!(output, "   Rebuilt: {}", report.counts.rebuilt);
                let _ = writeln!(output, "   Deleted: {}", report.counts.deleted);
                let _ = writeln!(output, "   Unchanged: {}", report.counts.unchanged);
                if let Some(ms) = report.duration_ms() {
                    let _ = writeln!(output, "   Duration: {ms}ms");
                }

                let failures = report.failures();
                if !failures.is_empty() {
                    let _ = write!(output, "\n{} Failed ({}):\n", "✗".red(), failures.len());
                    for failure in failures {
                        let reason = failure.reason.as_deref().unwrap_or("unknown");
                        let _ = writeln!(output, "   - {}: {reason}", failure.id);
                    }
                }

                let skips = report.skips();
                if !skips.is_empty() {
                    let _ = write!(output, "\n{} Skipped ({}):\n", "⚠".yellow(), skips.len());
                    for skip in skips {
                        let reason = skip.reason.as_deref().unwrap_or("unknown");
                        let _ = writeln!(output, "   - {}: {}", skip.id, reason.dimmed());
                    }
                }

                output
            }
        }
    }

    /// Formats the records of a build root.
    #[must_use]
    pub fn format_records(&self, records: &[RevisionRecord]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(records).unwrap_or_default(),
            OutputFormat::Text => {
                if records.is_empty() {
                    return String::from("   Nothing has been built yet.\n");
                }

                let rows: Vec<RecordRow> = records
                    .iter()
                    .map(|r| RecordRow {
                        node: r.id.clone(),
                        kind: r.kind.to_string(),
                        status: Self::format_status(r.status),
                        checksum: Self::format_checksum(r.checksum),
                        external_id: Self::truncate(&r.external_id, 32),
                        updated: r.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                    })
                    .collect();

                let mut output = Table::new(rows).to_string();
                output.push('\n');

                let active = records.iter().filter(|r| r.is_active()).count();
                let failed = records
                    .iter()
                    .filter(|r| r.status == RevStatus::Failed)
                    .count();
                let _ = write!(
                    output,
                    "\n{} records: {} active, {} failed, {} other\n",
                    records.len(),
                    active.to_string().green(),
                    failed.to_string().red(),
                    records.len() - active - failed
                );
                output
            }
        }
    }

    /// Formats a single record.
    #[must_use]
    pub fn format_record(&self, record: &RevisionRecord) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(record).unwrap_or_default(),
            OutputFormat::Text => record.to_string(),
        }
    }

    /// Formats the topology tree.
    #[must_use]
    pub fn format_tree(&self, tree: &Node, formatter: &TreeFormatter) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(tree).unwrap_or_default(),
            OutputFormat::Text => formatter.format(tree),
        }
    }

    /// Formats an action with color.
    fn format_action(action: Action) -> String {
        match action {
            Action::Create => "+create".green().to_string(),
            Action::Touch => "~touch".yellow().to_string(),
            Action::Rebuild => "!rebuild".yellow().to_string(),
            Action::Delete => "-delete".red().to_string(),
            Action::Noop => "none".dimmed().to_string(),
        }
    }

    /// Formats a record status with color.
    fn format_status(status: RevStatus) -> String {
        let text = status.to_string();
        match status {
            RevStatus::Active => text.green().to_string(),
            RevStatus::Failed => text.red().to_string(),
            RevStatus::Stale | RevStatus::Planned => text.yellow().to_string(),
            RevStatus::Unknown => text.dimmed().to_string(),
        }
    }

    fn format_checksum(checksum: u64) -> String {
        if checksum == TAINT_CHECKSUM {
            String::from("tainted")
        } else {
            short_checksum(checksum)
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::PlannedAction;
    use crate::topology::NodeKind;

    fn plan() -> BuildPlan {
        let mut plan = BuildPlan::new("regionals");
        for (id, action) in [("teams/0", Action::Noop), ("users/ops", Action::Create)] {
            plan.actions.push(PlannedAction {
                id: id.to_string(),
                kind: NodeKind::User,
                action,
                reason: String::from("test"),
                checksum: Some(1),
                stored_checksum: None,
            });
        }
        plan
    }

    #[test]
    fn test_plan_text_hides_unchanged() {
        colored::control::set_override(false);
        let text = OutputFormatter::new(OutputFormat::Text).format_plan(&plan(), false);
        assert!(text.contains("users/ops"));
        assert!(!text.contains("teams/0"));
        assert!(text.contains("1 to create"));
    }

    #[test]
    fn test_plan_json() {
        let json = OutputFormatter::new(OutputFormat::Json).format_plan(&plan(), false);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["actions"][1]["action"], "CREATE");
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("ééééééééééé", 6), "ééé...");
    }

    #[test]
    fn test_tainted_checksum() {
        assert_eq!(OutputFormatter::format_checksum(TAINT_CHECKSUM), "tainted");
        assert_eq!(OutputFormatter::format_checksum(255), "00000000000000ff");
    }
}
