//! Single bounded search calls against one date window.

use std::sync::Arc;
use std::time::Duration;

use crmsweep_core::{
    CapabilityError, DateRange, Filter, SearchCapability, SearchPage, SearchRequest,
    SortDirection,
};
use tracing::debug;

use crate::RateGate;

/// The part of a search that stays fixed while the window moves.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowQuery {
    pub filters: Vec<Filter>,
    pub sort_property: String,
}

/// Issues rate-gated, time-limited search calls.
///
/// Cheap to share between workers via `Arc`; the gate inside is the only
/// shared state.
pub struct RangeQueryClient {
    capability: Arc<dyn SearchCapability>,
    gate: Arc<RateGate>,
    call_timeout: Duration,
    page_size: u32,
}

impl RangeQueryClient {
    pub fn new(
        capability: Arc<dyn SearchCapability>,
        gate: Arc<RateGate>,
        call_timeout: Duration,
        page_size: u32,
    ) -> Self {
        Self {
            capability,
            gate,
            call_timeout,
            page_size,
        }
    }

    /// Total match count for `range`, fetched with a one-record page.
    pub async fn probe(&self, query: &WindowQuery, range: DateRange) -> Result<u64, CapabilityError> {
        let page = self.call(self.request(query, range, None, 1)).await?;
        debug!(%range, total = page.total_matched, "probed window");
        Ok(page.total_matched)
    }

    /// Fetch one page of `range` in ascending sort order.
    pub async fn page(
        &self,
        query: &WindowQuery,
        range: DateRange,
        cursor: Option<String>,
    ) -> Result<SearchPage, CapabilityError> {
        let page = self
            .call(self.request(query, range, cursor, self.page_size))
            .await?;
        debug!(%range, count = page.records.len(), more = page.next_cursor.is_some(), "fetched page");
        Ok(page)
    }

    fn request(
        &self,
        query: &WindowQuery,
        range: DateRange,
        cursor: Option<String>,
        limit: u32,
    ) -> SearchRequest {
        SearchRequest {
            filters: query.filters.clone(),
            range,
            sort_property: query.sort_property.clone(),
            direction: SortDirection::Ascending,
            cursor,
            limit,
        }
    }

    async fn call(&self, request: SearchRequest) -> Result<SearchPage, CapabilityError> {
        self.gate.acquire().await;
        match tokio::time::timeout(self.call_timeout, self.capability.search(&request)).await {
            Ok(result) => result,
            Err(_) => Err(CapabilityError::Timeout(self.call_timeout)),
        }
    }
}
