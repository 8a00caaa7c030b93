//! Windowed extraction: split the requested range, page every leaf on a
//! bounded worker pool, and merge the results into one keyed record set.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use crmsweep_core::{
    DateRange, ExtractionReport, Filter, IncompleteRange, IncompleteReason, Record,
    SearchCapability, WindowResult, sha256_tagged,
};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::retry::retry_with_backoff;
use crate::{
    CallError, ExtractConfig, ExtractError, Leaf, RangeProbe, RangeQueryClient, RateGate,
    RetryPolicy, SplitOutcome, WindowQuery, WindowSplitter,
};

/// What to extract.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractRequest {
    /// Caller's label for the record source, e.g. the object type.
    pub scope: String,
    pub range: DateRange,
    pub filters: Vec<Filter>,
    /// Timestamp property used for windowing; must be sortable and present.
    pub sort_property: Option<String>,
    /// Stop once this many records are fetched. `None` fetches everything.
    pub max_records: Option<u64>,
    /// Split the range until every window fits under the ceiling. When off,
    /// the whole range is one query and only its first `ceiling` records come back.
    pub auto_window: bool,
}

#[derive(Serialize)]
struct CanonicalRequest<'a> {
    scope: &'a str,
    range: &'a DateRange,
    filters: &'a [Filter],
    sort_property: Option<&'a str>,
    max_records: Option<u64>,
    auto_window: bool,
}

impl ExtractRequest {
    pub fn new(scope: impl Into<String>, range: DateRange) -> Self {
        Self {
            scope: scope.into(),
            range,
            filters: Vec::new(),
            sort_property: None,
            max_records: None,
            auto_window: true,
        }
    }

    pub fn with_filters(mut self, filters: Vec<Filter>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_sort_property(mut self, property: impl Into<String>) -> Self {
        self.sort_property = Some(property.into());
        self
    }

    pub fn with_max_records(mut self, limit: Option<u64>) -> Self {
        self.max_records = limit;
        self
    }

    pub fn with_auto_window(mut self, enabled: bool) -> Self {
        self.auto_window = enabled;
        self
    }

    /// Stable digest identifying this request.
    pub fn fingerprint(&self) -> String {
        let canonical = CanonicalRequest {
            scope: &self.scope,
            range: &self.range,
            filters: &self.filters,
            sort_property: self.sort_property.as_deref(),
            max_records: self.max_records,
            auto_window: self.auto_window,
        };
        // Serialising plain structs of strings cannot fail.
        let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
        sha256_tagged(&bytes)
    }
}

/// Orchestrates the splitter and the range query client.
///
/// Reentrant: each [`extract`](Self::extract) call owns its own state; only
/// the rate gate is shared between concurrent calls.
pub struct ExtractionEngine {
    client: Arc<RangeQueryClient>,
    config: ExtractConfig,
}

impl ExtractionEngine {
    pub fn new(
        capability: Arc<dyn SearchCapability>,
        config: ExtractConfig,
    ) -> Result<Self, ExtractError> {
        config.validate()?;
        let gate = Arc::new(RateGate::new(config.rate_per_sec, config.burst));
        let client = Arc::new(RangeQueryClient::new(
            capability,
            gate,
            config.call_timeout,
            config.page_size,
        ));
        Ok(Self { client, config })
    }

    /// Extract every record in `request.range`.
    ///
    /// Transient failures degrade single windows to `incomplete_ranges`; an
    /// authentication failure aborts everything. Cancelling `cancel` returns
    /// whatever was fetched so far with `cancelled` set.
    pub async fn extract(
        &self,
        request: &ExtractRequest,
        cancel: &CancellationToken,
    ) -> Result<ExtractionReport, ExtractError> {
        let sort_property = request
            .sort_property
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                ExtractError::NoSortableTimestamp(request.sort_property.clone().unwrap_or_default())
            })?;

        let start = Instant::now();
        let query = Arc::new(WindowQuery {
            filters: request.filters.clone(),
            sort_property: sort_property.to_string(),
        });
        // Child token: a fatal leaf stops its siblings without touching the caller's token.
        let token = cancel.child_token();

        info!(
            scope = %request.scope,
            range = %request.range,
            max_records = ?request.max_records,
            auto_window = request.auto_window,
            "starting extraction"
        );
        let split = if request.auto_window {
            let probe = ClientProbe {
                client: &self.client,
                query: &query,
                retry: self.config.retry,
                cancel: &token,
            };
            let split = WindowSplitter::from_config(&self.config)
                .split(request.range, &probe, &token)
                .await?;
            info!(
                leaves = split.leaves.len(),
                pruned = split.pruned,
                probes = split.probes,
                "window split complete"
            );
            split
        } else {
            SplitOutcome {
                leaves: vec![Leaf {
                    range: request.range,
                    depth: 0,
                    total_matched: None,
                    incomplete: None,
                }],
                ..Default::default()
            }
        };
        let budget = request.max_records.map(|limit| Arc::new(AtomicU64::new(limit)));

        let mut incomplete: Vec<IncompleteRange> = split
            .leaves
            .iter()
            .filter(|leaf| !leaf.is_fetchable())
            .filter_map(Leaf::to_incomplete_range)
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let mut workers = JoinSet::new();
        for leaf in split.leaves.iter().filter(|leaf| leaf.is_fetchable()).cloned() {
            let client = Arc::clone(&self.client);
            let query = Arc::clone(&query);
            let semaphore = Arc::clone(&semaphore);
            let token = token.clone();
            let budget = budget.clone();
            let limits = LeafLimits {
                ceiling: self.config.ceiling,
                retry: self.config.retry,
            };
            workers.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                match permit {
                    Some(_permit) => {
                        fetch_leaf(&client, &query, leaf, limits, budget.as_deref(), &token).await
                    }
                    None => Ok(LeafFetch::not_started(leaf)),
                }
            });
        }

        let mut records: HashMap<String, Record> = HashMap::new();
        let mut fetched = 0usize;
        let mut record_limit_reached = false;
        while let Some(joined) = workers.join_next().await {
            let leaf_fetch = match joined {
                Ok(Ok(leaf_fetch)) => leaf_fetch,
                Ok(Err(fatal)) => {
                    token.cancel();
                    workers.abort_all();
                    return Err(fatal);
                }
                Err(join_err) => {
                    token.cancel();
                    workers.abort_all();
                    return Err(ExtractError::Worker(join_err.to_string()));
                }
            };

            fetched += leaf_fetch.window.records.len();
            record_limit_reached |= leaf_fetch.limited;
            if let Some(ir) = leaf_fetch.incomplete {
                incomplete.push(ir);
            }
            for record in leaf_fetch.window.records {
                records.insert(record.key.clone(), record);
            }
        }

        incomplete.sort_by_key(|ir| ir.range.start());
        let report = ExtractionReport {
            records: records.into_iter().collect(),
            window_count: split.leaves.len(),
            max_depth_reached: split.max_depth_reached,
            incomplete_ranges: incomplete,
            cancelled: cancel.is_cancelled(),
            record_limit_reached,
            fingerprint: request.fingerprint(),
        };
        info!(
            records = report.len(),
            fetched,
            windows = report.window_count,
            incomplete = report.incomplete_ranges.len(),
            cancelled = report.cancelled,
            record_limit_reached,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "extraction finished"
        );
        Ok(report)
    }
}

struct ClientProbe<'a> {
    client: &'a RangeQueryClient,
    query: &'a WindowQuery,
    retry: RetryPolicy,
    cancel: &'a CancellationToken,
}

#[async_trait]
impl<'a> RangeProbe for ClientProbe<'a> {
    async fn probe(&self, range: DateRange) -> Result<u64, CallError> {
        let client = self.client;
        let query = self.query;
        retry_with_backoff(&self.retry, self.cancel, move || client.probe(query, range)).await
    }
}

struct LeafFetch {
    window: WindowResult,
    incomplete: Option<IncompleteRange>,
    /// Stopped early because the shared record budget ran out.
    limited: bool,
}

#[derive(Clone, Copy)]
struct LeafLimits {
    ceiling: u64,
    retry: RetryPolicy,
}

/// Take up to `wanted` records from the shared budget; returns how many were granted.
fn reserve(budget: &AtomicU64, wanted: u64) -> u64 {
    let mut granted = 0;
    let _ = budget.fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| {
        granted = left.min(wanted);
        Some(left - granted)
    });
    granted
}

impl LeafFetch {
    fn not_started(leaf: Leaf) -> Self {
        let mut ir = leaf.to_incomplete_range().unwrap_or(IncompleteRange {
            range: leaf.range,
            reason: IncompleteReason::Cancelled,
            total_matched: leaf.total_matched,
            detail: String::new(),
        });
        ir.reason = IncompleteReason::Cancelled;
        ir.detail = "cancelled before fetch".into();
        Self {
            window: WindowResult {
                range: leaf.range,
                records: Vec::new(),
                total_matched: leaf.total_matched.unwrap_or(0),
                truncated: false,
            },
            incomplete: Some(ir),
            limited: false,
        }
    }
}

/// Page through one leaf in cursor order.
///
/// Stops at the last page, once `ceiling` records are in hand (the search
/// API will not page further), or when the shared record budget runs out.
/// Over-ceiling leaves keep their original incomplete marker; a fetch failure
/// or cancellation replaces it.
async fn fetch_leaf(
    client: &RangeQueryClient,
    query: &WindowQuery,
    leaf: Leaf,
    limits: LeafLimits,
    budget: Option<&AtomicU64>,
    cancel: &CancellationToken,
) -> Result<LeafFetch, ExtractError> {
    let LeafLimits { ceiling, retry } = limits;
    let range = leaf.range;
    let mut records = Vec::new();
    let mut total = leaf.total_matched.unwrap_or(0);
    let mut cursor: Option<String> = None;
    let mut incomplete = leaf.to_incomplete_range();
    let mut limited = false;

    loop {
        if budget.is_some_and(|b| b.load(Ordering::Acquire) == 0) {
            limited = true;
            break;
        }
        let next = cursor.take();
        let page = retry_with_backoff(&retry, cancel, move || client.page(query, range, next.clone())).await;
        match page {
            Ok(mut page) => {
                total = page.total_matched;
                let empty = page.records.is_empty();
                if let Some(budget) = budget {
                    let wanted = page.records.len() as u64;
                    let granted = reserve(budget, wanted);
                    if granted < wanted {
                        page.records.truncate(granted as usize);
                        limited = true;
                    }
                }
                records.extend(page.records);
                cursor = page.next_cursor;
                if limited || cursor.is_none() || empty || records.len() as u64 >= ceiling {
                    break;
                }
            }
            Err(CallError::Fatal(err)) => {
                return Err(ExtractError::AuthFailure {
                    range,
                    message: err.to_string(),
                });
            }
            Err(CallError::Cancelled) => {
                incomplete = Some(IncompleteRange {
                    range,
                    reason: IncompleteReason::Cancelled,
                    total_matched: Some(total),
                    detail: format!("cancelled after {} records", records.len()),
                });
                break;
            }
            Err(err @ CallError::Failed { .. }) => {
                warn!(%range, fetched = records.len(), error = %err, "leaf fetch gave up");
                incomplete = Some(IncompleteRange {
                    range,
                    reason: IncompleteReason::FetchFailed,
                    total_matched: Some(total),
                    detail: format!("{err}; {} of {total} records fetched", records.len()),
                });
                break;
            }
        }
    }

    if total > ceiling && incomplete.is_none() {
        warn!(%range, total, ceiling, "single query over ceiling, later records unreachable");
        incomplete = Some(IncompleteRange {
            range,
            reason: IncompleteReason::OverCeilingUnsplit,
            total_matched: Some(total),
            detail: format!("{} of {total} records fetched", records.len()),
        });
    }

    Ok(LeafFetch {
        window: WindowResult {
            range,
            records,
            total_matched: total,
            truncated: total > ceiling,
        },
        incomplete,
        limited,
    })
}
