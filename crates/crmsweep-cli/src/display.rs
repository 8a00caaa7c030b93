//! Human-readable summaries printed to stderr; payloads go to stdout.

use crmsweep_core::{ExtractionReport, GroupStatus, MergePlan, PlanHash};
use crmsweep_dedupe::ApplyOutcome;
use crmsweep_store::ArtifactRef;

const MAX_LISTED_GROUPS: usize = 20;

// ── Extraction ──

pub fn print_extraction(report: &ExtractionReport, elapsed_secs: f64) {
    eprintln!();
    eprintln!("Extraction");
    eprintln!("  {:<20} {:?}", "status", report.status());
    eprintln!("  {:<20} {}", "records", report.len());
    eprintln!("  {:<20} {}", "windows", report.window_count);
    eprintln!("  {:<20} {}", "max depth reached", yes_no(report.max_depth_reached));
    if report.record_limit_reached {
        eprintln!("  {:<20} yes", "record limit reached");
    }
    eprintln!("  {:<20} {elapsed_secs:.1}s", "elapsed");
    eprintln!("  {:<20} {}", "fingerprint", report.fingerprint);

    if !report.incomplete_ranges.is_empty() {
        eprintln!();
        eprintln!("Incomplete ranges (re-run these narrower or later)");
        for ir in &report.incomplete_ranges {
            eprintln!("  {ir}");
        }
    }
    eprintln!();
}

pub fn print_artifact(artifact: &ArtifactRef) {
    eprintln!("Artifact");
    eprintln!("  {:<20} {}", "path", artifact.path.display());
    eprintln!("  {:<20} {}", "size", format_bytes(artifact.size_bytes));
    eprintln!("  {:<20} {}", "mime", artifact.mime);
    eprintln!("  {:<20} {}", "rows", artifact.row_count);
    if !artifact.columns.is_empty() {
        eprintln!("  {:<20} {}", "columns", artifact.columns.join(", "));
    }
}

// ── Dedupe ──

pub fn print_plan(plan: &MergePlan, plan_hash: &PlanHash) {
    eprintln!("Merge plan");
    eprintln!("  {:<20} {}", "groups", plan.groups.len());
    eprintln!("  {:<20} {}", "merges", plan.total_merges());
    eprintln!("  {:<20} {}", "generated at", plan.generated_at.to_rfc3339());
    eprintln!("  {:<20} {plan_hash}", "plan hash");

    if plan.groups.is_empty() {
        return;
    }
    eprintln!();
    for group in plan.groups.iter().take(MAX_LISTED_GROUPS) {
        let fields: Vec<&str> = group.matched_fields.iter().map(String::as_str).collect();
        eprintln!(
            "  {:<7} keep {:<14} merge {:<30} on {}",
            group.confidence,
            group.primary,
            group.secondaries().join(","),
            fields.join(", ")
        );
    }
    if plan.groups.len() > MAX_LISTED_GROUPS {
        eprintln!("  ... and {} more", plan.groups.len() - MAX_LISTED_GROUPS);
    }
}

pub fn print_apply(outcome: &ApplyOutcome) {
    match outcome {
        ApplyOutcome::DryRun { plan, plan_hash } => {
            print_plan(plan, plan_hash);
            eprintln!();
            eprintln!("  Dry run: nothing was changed.");
            eprintln!("  Re-run with --approve --plan-hash {plan_hash} to merge.");
        }
        ApplyOutcome::Apply {
            plan_hash, result, ..
        } => {
            eprintln!("Apply");
            eprintln!("  {:<20} {plan_hash}", "plan hash");
            eprintln!("  {:<20} {}", "merged", result.merged());
            eprintln!("  {:<20} {}", "skipped", result.skipped());
            eprintln!("  {:<20} {}", "failed", result.failed());
            let problems = result
                .group_outcomes
                .iter()
                .filter(|o| o.status != GroupStatus::Merged);
            for o in problems {
                eprintln!(
                    "  {:?} {}: {}",
                    o.status,
                    o.group.primary,
                    o.error.as_deref().unwrap_or("")
                );
            }
        }
    }
}

fn yes_no(b: bool) -> &'static str {
    if b { "yes" } else { "no" }
}

fn format_bytes(n: u64) -> String {
    const KIB: f64 = 1024.0;
    let n = n as f64;
    if n < KIB {
        format!("{n} B")
    } else if n < KIB * KIB {
        format!("{:.1} KiB", n / KIB)
    } else {
        format!("{:.1} MiB", n / (KIB * KIB))
    }
}
