//! Command pipelines: pull, dedupe plan, dedupe apply.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use crmsweep_core::{DateRange, ExtractionReport, PlanHash};
use crmsweep_dedupe::{ApplyController, ApplyRequest, DuplicateDetector, MatchRules, build_plan};
use crmsweep_extract::{
    CancellationToken, ExtractConfig, ExtractRequest, ExtractionEngine, RetryPolicy,
};
use crmsweep_remote::HttpCrmClient;
use crmsweep_store::{ArtifactStore, Payload, load_plan, save_plan};

use crate::{ApplyArgs, ExtractArgs, GlobalArgs, PlanArgs, PullArgs, display};

impl GlobalArgs {
    fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    fn extract_config(&self) -> ExtractConfig {
        ExtractConfig {
            workers: self.workers,
            call_timeout: self.call_timeout(),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                ..Default::default()
            },
            rate_per_sec: self.rate,
            burst: (self.rate.ceil() as u32).max(1),
            ..Default::default()
        }
    }

    fn client(&self, object_type: &str, properties: &[String]) -> anyhow::Result<HttpCrmClient> {
        let token = self
            .token
            .as_deref()
            .context("no API token: pass --token or set CRMSWEEP_TOKEN")?;
        let client = HttpCrmClient::new(&self.base_url, token, object_type, self.call_timeout())
            .context("configuring CRM client")?;
        Ok(client.with_properties(properties.to_vec()))
    }
}

/// Extract the requested range, printing a summary as it finishes.
async fn extract(
    global: &GlobalArgs,
    args: &ExtractArgs,
    cancel: &CancellationToken,
) -> anyhow::Result<ExtractionReport> {
    let start = Instant::now();
    let range = DateRange::new(args.since, args.until).context("invalid --since/--until")?;
    let client = global.client(&args.object_type, &args.properties)?;
    let engine = ExtractionEngine::new(Arc::new(client), global.extract_config())?;

    let request = ExtractRequest::new(&args.object_type, range)
        .with_filters(args.filters.clone())
        .with_sort_property(&args.sort_property)
        .with_max_records((args.limit > 0).then_some(args.limit))
        .with_auto_window(!args.no_auto_window);

    eprintln!("  Extracting {} over {range}...", args.object_type);
    let report = engine
        .extract(&request, cancel)
        .await
        .with_context(|| format!("extracting {}", args.object_type))?;

    display::print_extraction(&report, start.elapsed().as_secs_f64());
    Ok(report)
}

pub async fn run_pull(
    global: &GlobalArgs,
    args: &PullArgs,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let report = extract(global, &args.extract, cancel).await?;

    let mut store = ArtifactStore::new(&global.artifact_dir).with_keep_files(global.keep_files);
    let columns = (!args.extract.properties.is_empty()).then_some(args.extract.properties.as_slice());
    let payload = store
        .emit_records(&report, columns, args.format, args.out.as_deref())
        .context("emitting records")?;
    print_payload(&payload, args.out.is_some() || global.keep_files)
}

/// Inline payloads go to stdout. Artifacts are described on stderr, and
/// streamed to stdout too unless the file outlives the run.
fn print_payload(payload: &Payload, file_persists: bool) -> anyhow::Result<()> {
    match payload {
        Payload::Inline { content, .. } => println!("{content}"),
        Payload::Artifact(artifact) => {
            display::print_artifact(artifact);
            // Run directories vanish with the store; stream the file before that happens.
            if !file_persists {
                let content = std::fs::read_to_string(&artifact.path)
                    .with_context(|| format!("reading {}", artifact.path.display()))?;
                print!("{content}");
            }
        }
    }
    Ok(())
}

pub async fn run_plan(
    global: &GlobalArgs,
    args: &PlanArgs,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let report = extract(global, &args.extract, cancel).await?;
    if !report.is_complete() {
        eprintln!(
            "  Warning: plan built from a {:?} extraction; records in the ranges above were not considered",
            report.status()
        );
    }

    let rules = MatchRules::new(&args.identity_field)
        .with_secondary(args.secondary.iter().cloned())
        .with_strong_threshold(args.strong_threshold)
        .with_max_bucket_size(args.max_bucket_size);
    let detector = DuplicateDetector::new(rules, args.keep).context("invalid match rules")?;
    let groups = detector.detect(report.records.values());
    let (plan, plan_hash) = build_plan(groups, &report.fingerprint)?;

    save_plan(&args.out, &args.extract.object_type, &plan, &plan_hash)
        .with_context(|| format!("saving plan to {}", args.out.display()))?;
    display::print_plan(&plan, &plan_hash);
    eprintln!("\n  Plan saved to {}", args.out.display());
    eprintln!(
        "  To apply: crmsweep dedupe apply --plan-file {} --approve --plan-hash {plan_hash}",
        args.out.display()
    );
    Ok(())
}

pub async fn run_apply(global: &GlobalArgs, args: &ApplyArgs) -> anyhow::Result<()> {
    let file = load_plan(&args.plan_file)
        .with_context(|| format!("loading {}", args.plan_file.display()))?;
    let client = global.client(&file.object_type, &[])?;
    let controller = ApplyController::new(Arc::new(client)).with_call_timeout(global.call_timeout());

    let mut request = ApplyRequest::from_plan(&file.plan);
    if args.approve {
        request.approve = true;
        request.plan_hash_claim = args.plan_hash.clone().map(PlanHash::from);
    }

    let outcome = controller.apply(request).await?;
    if outcome.plan_hash() != &file.plan_hash {
        eprintln!(
            "  Note: plan file records hash {}, but its contents hash to {}",
            file.plan_hash,
            outcome.plan_hash()
        );
    }
    display::print_apply(&outcome);

    let mut store = ArtifactStore::new(&global.artifact_dir).with_keep_files(global.keep_files);
    let payload = store
        .emit_json("apply-outcome", &outcome, outcome.plan().groups.len(), args.out.as_deref())
        .context("emitting apply outcome")?;
    print_payload(&payload, args.out.is_some() || global.keep_files)
}
