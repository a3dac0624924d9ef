use docflow_admission::{ExecutionStatusRecord, SweepReport, UsageReport};
use docflow_common::OrgLimit;

pub fn render_usage(report: &UsageReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n=== Usage for org {} ===\n\n", report.org_id));
    out.push_str(&format!(
        "  {:<10} {:>8} {:>8} {:>8}\n",
        "Scope", "Running", "Limit", "Used"
    ));
    out.push_str(&format!(
        "  {:<10} {:>8} {:>8} {:>7.1}%\n",
        "org", report.org_count, report.org_limit, report.org_percent
    ));
    out.push_str(&format!(
        "  {:<10} {:>8} {:>8} {:>7.1}%\n",
        "global", report.global_count, report.global_limit, report.global_percent
    ));
    let source = if report.custom_limit {
        "custom"
    } else {
        "system default"
    };
    out.push_str(&format!("\n  Org limit source: {}\n", source));
    if let Some(banner) = report.level.banner() {
        out.push_str(&format!("\n  ⚠ {}\n", banner));
    }
    out
}

pub fn render_limits(limits: &[OrgLimit]) -> String {
    if limits.is_empty() {
        return "No custom limits configured.\n".to_string();
    }
    let mut out = format!("\n{:<30} {:>8} {:<25}\n", "Org ID", "Limit", "Modified");
    out.push_str(&format!("{:-<65}\n", ""));
    for row in limits {
        out.push_str(&format!(
            "{:<30} {:>8} {:<25}\n",
            row.org_id,
            row.concurrent_request_limit,
            row.modified_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    out
}

pub fn render_status(record: &ExecutionStatusRecord) -> String {
    let progress = record
        .progress()
        .map(|p| format!("{:.1}%", p))
        .unwrap_or_else(|| "N/A".to_string());
    format!(
        "\n=== Execution {} ===\n\n  \
         Workflow:  {}\n  \
         Status:    {}\n  \
         Files:     {} completed, {} failed, {} total\n  \
         Progress:  {}\n  \
         Created:   {}\n  \
         Updated:   {}\n",
        record.execution_id,
        record.workflow_id,
        record.status,
        record.completed_files,
        record.failed_files,
        record.total_files,
        progress,
        record.created_at.to_rfc3339(),
        record.updated_at.to_rfc3339(),
    )
}

pub fn render_sweep(report: &SweepReport) -> String {
    format!(
        "✓ Swept {} org slot set(s), reclaimed {} stale slot(s)\n",
        report.org_sets, report.reclaimed
    )
}
