//! Terminal output formatting for guardrail commands.
//! Uses comfy-table for tabular output and colored for
//! severity-aware terminal styling.

use colored::Colorize;
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Table};

use guardrail_core::commands::lint::LintSeverity;
use guardrail_core::{AgentResult, FileCheck, LintReport, RlsAuditReport};

/// Print the hazard report of each checked file.
pub fn print_check_report(checks: &[FileCheck]) {
    for check in checks {
        let report = &check.report;
        if report.is_clean() {
            println!("{} {}", "✓".green().bold(), check.file);
            continue;
        }

        let marker = if report.passed() {
            "!".yellow().bold()
        } else {
            "✗".red().bold()
        };
        println!(
            "{} {} ({} error(s), {} warning(s))",
            marker,
            check.file.bold(),
            report.errors.len(),
            report.warnings.len()
        );

        for e in &report.errors {
            print_finding(
                format!("[{}]", e.code).red().bold().to_string(),
                e.line,
                &e.message,
                e.suggestion.as_deref(),
            );
        }
        for w in &report.warnings {
            print_finding(
                format!("[{}]", w.code).yellow().bold().to_string(),
                w.line,
                &w.message,
                w.suggestion.as_deref(),
            );
        }
    }
}

fn print_finding(label: String, line: Option<usize>, message: &str, suggestion: Option<&str>) {
    let line_info = line.map(|l| format!("line {}: ", l)).unwrap_or_default();
    println!("  {} {}{}", label, line_info, message);
    if let Some(suggestion) = suggestion {
        println!("    {} {}", "→".dimmed(), suggestion.dimmed());
    }
}

/// Print lint results grouped by file.
pub fn print_lint_report(report: &LintReport) {
    if report.issues.is_empty() {
        println!(
            "{}",
            format!("Checked {} file(s). No issues found.", report.files_checked)
                .green()
                .bold()
        );
        return;
    }

    println!(
        "{}",
        format!(
            "Checked {} file(s): {} error(s), {} warning(s)",
            report.files_checked, report.error_count, report.warning_count
        )
        .bold()
    );
    println!();

    for issue in &report.issues {
        let severity = match issue.severity {
            LintSeverity::Error => format!("[{}]", issue.rule_id).red().bold().to_string(),
            LintSeverity::Warning => format!("[{}]", issue.rule_id).yellow().bold().to_string(),
        };

        let line_info = issue.line.map(|l| format!(":{}", l)).unwrap_or_default();

        println!(
            "  {} {}{} {}",
            severity, issue.script, line_info, issue.message
        );

        if let Some(ref suggestion) = issue.suggestion {
            println!("    {} {}", "→".dimmed(), suggestion.dimmed());
        }
    }
}

/// Print the RLS audit as a table of tables needing attention.
pub fn print_rls_audit(report: &RlsAuditReport) {
    if report.gaps.is_empty() && report.warnings.is_empty() {
        println!(
            "{}",
            format!(
                "All {} table(s) have row level security and at least one policy.",
                report.total_tables
            )
            .green()
            .bold()
        );
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Table"),
            Cell::new("RLS"),
            Cell::new("Policies"),
            Cell::new("Issue"),
        ]);

    for status in &report.gaps {
        table.add_row(vec![
            Cell::new(&status.table),
            Cell::new("off").fg(Color::Red),
            Cell::new(status.policy_count),
            Cell::new(status.issue.as_deref().unwrap_or_default()),
        ]);
    }
    for status in &report.warnings {
        table.add_row(vec![
            Cell::new(&status.table),
            Cell::new("on").fg(Color::Green),
            Cell::new(status.policy_count).fg(Color::Yellow),
            Cell::new(status.issue.as_deref().unwrap_or_default()),
        ]);
    }

    println!("{table}");
    println!();
    for line in &report.summary {
        println!("  {}", line);
    }
}

/// Print one line per agent result.
pub fn print_agent_results(results: &[AgentResult]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Agent"),
            Cell::new("Result"),
            Cell::new("Elapsed"),
            Cell::new("Detail"),
        ]);

    for result in results {
        let (status, detail) = if result.success {
            (Cell::new("ok").fg(Color::Green), String::new())
        } else if result.timed_out {
            (
                Cell::new("timeout").fg(Color::Yellow),
                result.error.clone().unwrap_or_default(),
            )
        } else {
            (
                Cell::new("failed").fg(Color::Red),
                result.error.clone().unwrap_or_default(),
            )
        };
        table.add_row(vec![
            Cell::new(result.agent_type),
            status,
            Cell::new(format!("{}ms", result.elapsed_ms)),
            Cell::new(detail),
        ]);
    }

    println!("{table}");
}
