//! Inline-or-file payloads.
//!
//! Small payloads travel inline in the command output. Anything larger than
//! `max_inline_bytes` is written to disk and only a reference is returned:
//! either to the caller's path or to a run directory under the artifact root.
//! Run directories are removed when the store is dropped unless `keep_files`
//! is set.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crmsweep_core::{ExtractionReport, Record};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::info;

use crate::{StoreError, csv};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
}

impl OutputFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            _ => Err(StoreError::UnknownFormat(s.to_string())),
        }
    }
}

/// Reference to a payload written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub mime: String,
    pub row_count: usize,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Inline {
        mime: String,
        row_count: usize,
        content: String,
    },
    Artifact(ArtifactRef),
}

impl Payload {
    pub fn row_count(&self) -> usize {
        match self {
            Self::Inline { row_count, .. } => *row_count,
            Self::Artifact(artifact) => artifact.row_count,
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline { .. })
    }
}

pub struct ArtifactStore {
    root: PathBuf,
    max_inline_bytes: usize,
    keep_files: bool,
    run_dir: Option<TempDir>,
}

impl ArtifactStore {
    pub const DEFAULT_MAX_INLINE_BYTES: usize = 64 * 1024;

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_inline_bytes: Self::DEFAULT_MAX_INLINE_BYTES,
            keep_files: false,
            run_dir: None,
        }
    }

    pub fn with_max_inline_bytes(mut self, bytes: usize) -> Self {
        self.max_inline_bytes = bytes;
        self
    }

    pub fn with_keep_files(mut self, keep: bool) -> Self {
        self.keep_files = keep;
        self
    }

    /// This store's run directory, created on first use.
    pub fn run_dir(&mut self) -> Result<&Path, StoreError> {
        let dir = match self.run_dir.take() {
            Some(dir) => dir,
            None => {
                fs::create_dir_all(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
                let dir = tempfile::Builder::new()
                    .prefix("run-")
                    .keep(self.keep_files)
                    .tempdir_in(&self.root)
                    .map_err(|e| StoreError::io(&self.root, e))?;
                info!(path = %dir.path().display(), keep = self.keep_files, "created run directory");
                dir
            }
        };
        Ok(self.run_dir.insert(dir).path())
    }

    /// Emit the report's records, keeping only `columns` when given.
    ///
    /// Every row carries `key` and `sort_timestamp`; field columns default to
    /// the union of fields across all records.
    pub fn emit_records(
        &mut self,
        report: &ExtractionReport,
        columns: Option<&[String]>,
        format: OutputFormat,
        out: Option<&Path>,
    ) -> Result<Payload, StoreError> {
        let columns = match columns {
            Some(cols) => cols.to_vec(),
            None => report.columns(),
        };
        let records: Vec<&Record> = report.records.values().collect();
        let content = match format {
            OutputFormat::Json => records_json(&records, &columns)?,
            OutputFormat::Csv => records_csv(&records, &columns),
        };
        self.emit(
            "records",
            content,
            format,
            records.len(),
            columns,
            out,
        )
    }

    /// Emit any serialisable value as JSON.
    pub fn emit_json<T: Serialize>(
        &mut self,
        name: &str,
        value: &T,
        row_count: usize,
        out: Option<&Path>,
    ) -> Result<Payload, StoreError> {
        let content = serde_json::to_string_pretty(value)?;
        self.emit(name, content, OutputFormat::Json, row_count, Vec::new(), out)
    }

    fn emit(
        &mut self,
        name: &str,
        content: String,
        format: OutputFormat,
        row_count: usize,
        columns: Vec<String>,
        out: Option<&Path>,
    ) -> Result<Payload, StoreError> {
        if content.len() <= self.max_inline_bytes {
            return Ok(Payload::Inline {
                mime: format.mime().to_string(),
                row_count,
                content,
            });
        }

        let path = match out {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
                }
                path.to_path_buf()
            }
            None => self
                .run_dir()?
                .join(format!("{name}.{}", format.extension())),
        };
        fs::write(&path, content.as_bytes()).map_err(|e| StoreError::io(&path, e))?;
        info!(path = %path.display(), bytes = content.len(), rows = row_count, "wrote artifact");

        Ok(Payload::Artifact(ArtifactRef {
            path,
            size_bytes: content.len() as u64,
            mime: format.mime().to_string(),
            row_count,
            columns,
        }))
    }
}

#[derive(Serialize)]
struct ProjectedRecord<'a> {
    key: &'a str,
    sort_timestamp: String,
    fields: serde_json::Map<String, serde_json::Value>,
}

fn records_json(records: &[&Record], columns: &[String]) -> Result<String, StoreError> {
    let rows: Vec<ProjectedRecord<'_>> = records
        .iter()
        .map(|r| ProjectedRecord {
            key: &r.key,
            sort_timestamp: r.sort_timestamp.to_rfc3339(),
            fields: columns
                .iter()
                .filter_map(|c| Some((c.clone(), r.fields.get(c)?.clone())))
                .collect(),
        })
        .collect();
    Ok(serde_json::to_string_pretty(&rows)?)
}

fn records_csv(records: &[&Record], columns: &[String]) -> String {
    let mut out = String::new();
    let header = ["key", "sort_timestamp"]
        .into_iter()
        .chain(columns.iter().map(String::as_str));
    csv::write_row(&mut out, header);
    for r in records {
        let ts = r.sort_timestamp.to_rfc3339();
        let values: Vec<String> = columns
            .iter()
            .map(|c| match r.fields.get(c) {
                None | Some(serde_json::Value::Null) => String::new(),
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            })
            .collect();
        let row = [r.key.as_str(), ts.as_str()]
            .into_iter()
            .chain(values.iter().map(String::as_str));
        csv::write_row(&mut out, row);
    }
    out
}
