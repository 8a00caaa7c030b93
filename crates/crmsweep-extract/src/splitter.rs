//! Recursive date-range bisection until every window fits under the ceiling.
//!
//! The search API refuses to page past `ceiling` results for one query, so a
//! window that matches more must be cut in half until each half fits. The
//! recursion runs on an explicit work stack of pending `(range, depth)` tasks.
//!
//! # Stopping rules
//!
//! For each range taken off the stack, after probing its match count:
//!
//! 1. `total == 0` → pruned, no leaf
//! 2. `total <= ceiling` → complete leaf
//! 3. `depth == max_depth` → incomplete leaf (over ceiling at max depth)
//! 4. `width < min_window` → incomplete leaf (over ceiling, too narrow to split)
//! 5. otherwise bisect and push both halves at `depth + 1`
//!
//! Rule 4 means a range already narrower than `min_window` is never split,
//! whatever its count. Such leaves are reported, never silently dropped.

use async_trait::async_trait;
use chrono::TimeDelta;
use crmsweep_core::{DateRange, IncompleteRange, IncompleteReason};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{CallError, ExtractConfig, ExtractError};

/// Source of match counts for a window.
#[async_trait]
pub trait RangeProbe: Send + Sync {
    async fn probe(&self, range: DateRange) -> Result<u64, CallError>;
}

/// A window accepted by the splitter.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub range: DateRange,
    pub depth: u32,
    /// `None` when the probe never succeeded.
    pub total_matched: Option<u64>,
    pub incomplete: Option<(IncompleteReason, String)>,
}

impl Leaf {
    fn complete(range: DateRange, depth: u32, total: u64) -> Self {
        Self {
            range,
            depth,
            total_matched: Some(total),
            incomplete: None,
        }
    }

    fn incomplete(
        range: DateRange,
        depth: u32,
        total: Option<u64>,
        reason: IncompleteReason,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            range,
            depth,
            total_matched: total,
            incomplete: Some((reason, detail.into())),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.incomplete.is_none()
    }

    /// Whether the engine should page through this leaf at all.
    ///
    /// Over-ceiling leaves still yield their first `ceiling` records; leaves
    /// without a successful probe are skipped.
    pub fn is_fetchable(&self) -> bool {
        match &self.incomplete {
            None => true,
            Some((reason, _)) => matches!(
                reason,
                IncompleteReason::OverCeilingAtMaxDepth
                    | IncompleteReason::OverCeilingBelowMinWindow
            ),
        }
    }

    pub fn to_incomplete_range(&self) -> Option<IncompleteRange> {
        let (reason, detail) = self.incomplete.as_ref()?;
        Some(IncompleteRange {
            range: self.range,
            reason: *reason,
            total_matched: self.total_matched,
            detail: detail.clone(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SplitOutcome {
    /// Sorted by start; disjoint.
    pub leaves: Vec<Leaf>,
    /// Ranges dropped because they matched nothing.
    pub pruned: usize,
    pub probes: usize,
    pub max_depth_reached: bool,
}

#[derive(Debug, Clone)]
pub struct WindowSplitter {
    ceiling: u64,
    max_depth: u32,
    min_window: TimeDelta,
}

impl WindowSplitter {
    pub fn new(ceiling: u64, max_depth: u32, min_window: TimeDelta) -> Self {
        Self {
            ceiling,
            max_depth,
            min_window,
        }
    }

    pub fn from_config(config: &ExtractConfig) -> Self {
        Self::new(config.ceiling, config.max_depth, config.min_window)
    }

    /// Partition `root` into leaves.
    ///
    /// Fails only on a fatal probe error, which names the range being probed.
    pub async fn split(
        &self,
        root: DateRange,
        probe: &dyn RangeProbe,
        cancel: &CancellationToken,
    ) -> Result<SplitOutcome, ExtractError> {
        let mut outcome = SplitOutcome::default();
        let mut stack = vec![(root, 0u32)];

        while let Some((range, depth)) = stack.pop() {
            if cancel.is_cancelled() {
                outcome.leaves.push(Leaf::incomplete(
                    range,
                    depth,
                    None,
                    IncompleteReason::Cancelled,
                    "cancelled before probe",
                ));
                continue;
            }

            outcome.probes += 1;
            let total = match probe.probe(range).await {
                Ok(total) => total,
                Err(CallError::Fatal(err)) => {
                    return Err(ExtractError::AuthFailure {
                        range,
                        message: err.to_string(),
                    });
                }
                Err(CallError::Cancelled) => {
                    outcome.leaves.push(Leaf::incomplete(
                        range,
                        depth,
                        None,
                        IncompleteReason::Cancelled,
                        "cancelled during probe",
                    ));
                    continue;
                }
                Err(err @ CallError::Failed { .. }) => {
                    warn!(%range, error = %err, "window probe failed");
                    outcome.leaves.push(Leaf::incomplete(
                        range,
                        depth,
                        None,
                        IncompleteReason::ProbeFailed,
                        err.to_string(),
                    ));
                    continue;
                }
            };

            if total == 0 {
                outcome.pruned += 1;
                continue;
            }
            if total <= self.ceiling {
                debug!(%range, depth, total, "accepted window");
                outcome.leaves.push(Leaf::complete(range, depth, total));
                continue;
            }
            if depth >= self.max_depth {
                outcome.max_depth_reached = true;
                warn!(%range, depth, total, "window over ceiling at max depth");
                outcome.leaves.push(Leaf::incomplete(
                    range,
                    depth,
                    Some(total),
                    IncompleteReason::OverCeilingAtMaxDepth,
                    format!("{total} matches exceed ceiling {} at depth {depth}", self.ceiling),
                ));
                continue;
            }

            let halves = if range.width() < self.min_window {
                None
            } else {
                range.bisect()
            };
            match halves {
                Some((earlier, later)) => {
                    debug!(%range, depth, total, "splitting window");
                    stack.push((later, depth + 1));
                    stack.push((earlier, depth + 1));
                }
                None => {
                    warn!(%range, total, "window over ceiling but narrower than min window");
                    outcome.leaves.push(Leaf::incomplete(
                        range,
                        depth,
                        Some(total),
                        IncompleteReason::OverCeilingBelowMinWindow,
                        format!(
                            "{total} matches exceed ceiling {} in a window narrower than {} days",
                            self.ceiling,
                            self.min_window.num_days()
                        ),
                    ));
                }
            }
        }

        outcome.leaves.sort_by_key(|leaf| leaf.range.start());
        Ok(outcome)
    }
}
