//! JSON shapes of the CRM v3 object search and merge endpoints.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use crmsweep_core::{
    CapabilityError, FilterOp, Record, SearchPage, SearchRequest, SortDirection,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchBody<'a> {
    pub filter_groups: Vec<FilterGroup<'a>>,
    pub sorts: Vec<Sort<'a>>,
    #[serde(skip_serializing_if = "no_properties")]
    pub properties: &'a [String],
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<&'a str>,
}

fn no_properties(properties: &&[String]) -> bool {
    properties.is_empty()
}

#[derive(Debug, Serialize)]
pub struct FilterGroup<'a> {
    pub filters: Vec<WireFilter<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFilter<'a> {
    pub property_name: &'a str,
    pub operator: FilterOp,
    pub value: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sort<'a> {
    pub property_name: &'a str,
    pub direction: SortDirection,
}

/// Build the search body for one windowed request.
///
/// The window becomes `sort_property >= start AND sort_property < end`, in
/// epoch milliseconds, ANDed with the caller's filters.
pub fn search_body<'a>(req: &'a SearchRequest, properties: &'a [String]) -> SearchBody<'a> {
    let mut filters = vec![
        WireFilter {
            property_name: &req.sort_property,
            operator: FilterOp::Gte,
            value: req.range.start().timestamp_millis().to_string(),
        },
        WireFilter {
            property_name: &req.sort_property,
            operator: FilterOp::Lt,
            value: req.range.end().timestamp_millis().to_string(),
        },
    ];
    filters.extend(req.filters.iter().map(|f| WireFilter {
        property_name: &f.property,
        operator: f.operator,
        value: f.value.clone(),
    }));
    SearchBody {
        filter_groups: vec![FilterGroup { filters }],
        sorts: vec![Sort {
            property_name: &req.sort_property,
            direction: req.direction,
        }],
        properties,
        limit: req.limit,
        after: req.cursor.as_deref(),
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub total: u64,
    #[serde(default)]
    pub results: Vec<ObjectResult>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectResult {
    pub id: String,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Paging {
    pub next: Option<NextPage>,
}

#[derive(Debug, Deserialize)]
pub struct NextPage {
    pub after: String,
}

impl SearchResponse {
    /// Convert to a [`SearchPage`], reading each record's timestamp from `sort_property`.
    ///
    /// Objects with no usable timestamp cannot be placed in a window; they are
    /// dropped with a warning rather than failing the page.
    pub fn into_page(self, sort_property: &str) -> SearchPage {
        let records = self
            .results
            .into_iter()
            .filter_map(|obj| {
                let ts = obj
                    .properties
                    .get(sort_property)
                    .and_then(parse_timestamp)
                    .or_else(|| obj.created_at.as_deref().and_then(parse_rfc3339));
                let Some(ts) = ts else {
                    warn!(id = %obj.id, sort_property, "object has no usable timestamp, skipped");
                    return None;
                };
                Some(Record {
                    key: obj.id,
                    sort_timestamp: ts,
                    fields: obj.properties,
                })
            })
            .collect();
        SearchPage {
            records,
            total_matched: self.total,
            next_cursor: self.paging.and_then(|p| p.next).map(|n| n.after),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeBody<'a> {
    pub primary_object_id: &'a str,
    pub object_id_to_merge: &'a str,
}

/// Timestamps arrive as RFC 3339 strings or epoch milliseconds.
pub fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => parse_rfc3339(s).or_else(|| parse_millis(s.parse().ok()?)),
        serde_json::Value::Number(n) => parse_millis(n.as_i64()?),
        _ => None,
    }
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Map a non-success HTTP status to a capability error.
///
/// `keys` are the object ids the request referred to, reported on 404.
pub fn classify_status(
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
    keys: &[String],
) -> CapabilityError {
    let body = body.trim();
    match status {
        401 | 403 => CapabilityError::Auth(format!("{status}: {body}")),
        404 => CapabilityError::NotFound {
            keys: keys.to_vec(),
        },
        429 => CapabilityError::RateLimited { retry_after },
        500..=599 => CapabilityError::Transient(format!("{status}: {body}")),
        _ => CapabilityError::Rejected(format!("{status}: {body}")),
    }
}
