//! Program-year partitioned time-series index for district data points.
//!
//! Layout under the configured root:
//!
//! ```text
//! {root}/{district_id}/{YYYY-YYYY}.json
//! {root}/{district_id}/index-metadata.json
//! ```
//!
//! Every write is a whole-file read-modify-write finished by an atomic
//! temp-file rename. There is no cross-call locking: callers must serialize
//! writes per (district, program year).

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use dstats_core::{
    parse_date, program_years_in_range, IndexMetadata, ProgramYear, ProgramYearIndexFile,
    TimeSeriesDataPoint,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub const CRATE_NAME: &str = "dstats-index";

pub const METADATA_FILE_NAME: &str = "index-metadata.json";

static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid date regex"));

static PARTITION_FILE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4}-\d{4})\.json$").expect("valid partition regex"));

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid district id {0:?}: expected non-empty ASCII alphanumeric")]
    InvalidDistrictId(String),
    #[error("invalid date {0:?}: expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt index file {}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("encoding index file {}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("path {} resolves outside the index root", path.display())]
    PathRejected { path: PathBuf },
    #[error("atomically writing {}", path.display())]
    AtomicWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type IndexResult<T> = Result<T, IndexError>;

#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub root_dir: PathBuf,
    pub pretty_json: bool,
}

impl IndexConfig {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            pretty_json: true,
        }
    }

    pub fn from_env() -> Self {
        Self {
            root_dir: std::env::var("DSTATS_TIME_SERIES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./cache/time-series")),
            pretty_json: std::env::var("DSTATS_PRETTY_JSON")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(true),
        }
    }
}

/// Notable things the writer did, handed to an [`IndexLogger`].
#[derive(Debug, Clone, PartialEq)]
pub enum IndexEvent {
    DataPointWritten {
        district_id: String,
        program_year: String,
        date: String,
        total_data_points: u32,
    },
    MetadataUpdated {
        district_id: String,
        program_years: usize,
        total_data_points: u32,
    },
    /// A resolved path fell outside the root. Reads report it as absent,
    /// writes fail with [`IndexError::PathRejected`].
    PathRejected { path: PathBuf },
    TempCleanupFailed { path: PathBuf, error: String },
}

pub trait IndexLogger: Send + Sync {
    fn log(&self, event: &IndexEvent);
}

#[derive(Debug, Default)]
pub struct NoopIndexLogger;

impl IndexLogger for NoopIndexLogger {
    fn log(&self, _event: &IndexEvent) {}
}

/// Forwards events to `tracing` with structured fields.
#[derive(Debug, Default)]
pub struct TracingIndexLogger;

impl IndexLogger for TracingIndexLogger {
    fn log(&self, event: &IndexEvent) {
        match event {
            IndexEvent::DataPointWritten {
                district_id,
                program_year,
                date,
                total_data_points,
            } => tracing::info!(
                district_id = %district_id,
                program_year = %program_year,
                date = %date,
                total_data_points,
                "data point written"
            ),
            IndexEvent::MetadataUpdated {
                district_id,
                program_years,
                total_data_points,
            } => tracing::info!(
                district_id = %district_id,
                program_years,
                total_data_points,
                "index metadata updated"
            ),
            IndexEvent::PathRejected { path } => {
                tracing::warn!(path = %path.display(), "path escapes index root")
            }
            IndexEvent::TempCleanupFailed { path, error } => {
                tracing::warn!(path = %path.display(), error = %error, "failed to remove temp file")
            }
        }
    }
}

pub fn validate_district_id(district_id: &str) -> IndexResult<()> {
    if district_id.is_empty() || !district_id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(IndexError::InvalidDistrictId(district_id.to_string()));
    }
    Ok(())
}

/// Program year of a `YYYY-MM-DD` date; July onwards starts the next cycle.
pub fn program_year_for_date(date: &str) -> IndexResult<ProgramYear> {
    if !DATE_RE.is_match(date) {
        return Err(IndexError::InvalidDate(date.to_string()));
    }
    ProgramYear::for_date_str(date).map_err(|_| IndexError::InvalidDate(date.to_string()))
}

/// Every program-year label overlapping the inclusive range.
pub fn program_years_between(start: &str, end: &str) -> IndexResult<Vec<ProgramYear>> {
    let start = strict_date(start)?;
    let end = strict_date(end)?;
    Ok(program_years_in_range(start, end))
}

fn strict_date(date: &str) -> IndexResult<chrono::NaiveDate> {
    if !DATE_RE.is_match(date) {
        return Err(IndexError::InvalidDate(date.to_string()));
    }
    parse_date(date).map_err(|_| IndexError::InvalidDate(date.to_string()))
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn io_error(context: String) -> impl FnOnce(std::io::Error) -> IndexError {
    move |source| IndexError::Io { context, source }
}

pub struct TimeSeriesIndexWriter {
    root: PathBuf,
    pretty_json: bool,
    logger: Arc<dyn IndexLogger>,
}

impl TimeSeriesIndexWriter {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            root: config.root_dir,
            pretty_json: config.pretty_json,
            logger: Arc::new(NoopIndexLogger),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn IndexLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn district_dir(&self, district_id: &str) -> PathBuf {
        self.root.join(district_id)
    }

    pub fn partition_path(&self, district_id: &str, program_year: ProgramYear) -> PathBuf {
        self.district_dir(district_id)
            .join(format!("{program_year}.json"))
    }

    pub fn metadata_path(&self, district_id: &str) -> PathBuf {
        self.district_dir(district_id).join(METADATA_FILE_NAME)
    }

    /// Upsert `point` into its program-year partition and rewrite the file.
    #[tracing::instrument(level = "debug", skip(self, point), fields(date = %point.date))]
    pub async fn write_data_point(
        &self,
        district_id: &str,
        point: TimeSeriesDataPoint,
    ) -> IndexResult<ProgramYearIndexFile> {
        validate_district_id(district_id)?;
        let program_year = program_year_for_date(&point.date)?;

        let dir = self.district_dir(district_id);
        fs::create_dir_all(&dir)
            .await
            .map_err(io_error(format!("creating district directory {}", dir.display())))?;
        self.ensure_within_root(&dir).await?;

        let now = Utc::now();
        let mut index = self
            .read_program_year_index(district_id, program_year)
            .await?
            .unwrap_or_else(|| ProgramYearIndexFile::empty(district_id, program_year, now));

        let date = point.date.clone();
        index.upsert(point);
        index.last_updated = now;

        let path = self.partition_path(district_id, program_year);
        self.write_json_atomic(&path, &index).await?;

        self.logger.log(&IndexEvent::DataPointWritten {
            district_id: district_id.to_string(),
            program_year: index.program_year.clone(),
            date,
            total_data_points: index.summary.total_data_points,
        });
        Ok(index)
    }

    /// Rebuild `index-metadata.json` from the partition files on disk.
    ///
    /// A district with no directory yet gets empty metadata and nothing is
    /// written, so an unknown id leaves no trace under the root.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn update_metadata(&self, district_id: &str) -> IndexResult<IndexMetadata> {
        validate_district_id(district_id)?;

        let dir = self.district_dir(district_id);
        let exists = fs::try_exists(&dir)
            .await
            .map_err(io_error(format!("checking district directory {}", dir.display())))?;
        if !exists {
            return Ok(IndexMetadata {
                district_id: district_id.to_string(),
                last_updated: Utc::now(),
                available_program_years: Vec::new(),
                total_data_points: 0,
            });
        }
        self.ensure_within_root(&dir).await?;

        let mut program_years = Vec::new();
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(io_error(format!("listing {}", dir.display())))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(io_error(format!("listing {}", dir.display())))?
        {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name == METADATA_FILE_NAME {
                continue;
            }
            let Some(label) = PARTITION_FILE_RE.captures(name).and_then(|c| c.get(1)) else {
                continue;
            };
            if let Ok(program_year) = label.as_str().parse::<ProgramYear>() {
                program_years.push(program_year);
            }
        }
        program_years.sort();

        let mut available_program_years = Vec::with_capacity(program_years.len());
        let mut total_data_points = 0u32;
        for program_year in program_years {
            if let Some(index) = self.read_program_year_index(district_id, program_year).await? {
                total_data_points += index.data_points.len() as u32;
                available_program_years.push(program_year.to_string());
            }
        }

        let metadata = IndexMetadata {
            district_id: district_id.to_string(),
            last_updated: Utc::now(),
            available_program_years,
            total_data_points,
        };
        self.write_json_atomic(&self.metadata_path(district_id), &metadata)
            .await?;

        self.logger.log(&IndexEvent::MetadataUpdated {
            district_id: district_id.to_string(),
            program_years: metadata.available_program_years.len(),
            total_data_points,
        });
        Ok(metadata)
    }

    /// `None` when the partition does not exist or resolves outside the root.
    pub async fn read_program_year_index(
        &self,
        district_id: &str,
        program_year: ProgramYear,
    ) -> IndexResult<Option<ProgramYearIndexFile>> {
        self.read_json(&self.partition_path(district_id, program_year))
            .await
    }

    pub async fn read_metadata(&self, district_id: &str) -> IndexResult<Option<IndexMetadata>> {
        self.read_json(&self.metadata_path(district_id)).await
    }

    /// Points dated within `[start, end]` across every overlapping partition.
    pub async fn read_data_points_in_range(
        &self,
        district_id: &str,
        start: &str,
        end: &str,
    ) -> IndexResult<Vec<TimeSeriesDataPoint>> {
        let mut points = Vec::new();
        for program_year in program_years_between(start, end)? {
            if let Some(index) = self.read_program_year_index(district_id, program_year).await? {
                points.extend(
                    index
                        .data_points
                        .into_iter()
                        .filter(|p| p.date.as_str() >= start && p.date.as_str() <= end),
                );
            }
        }
        points.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(points)
    }

    async fn resolve_within_root(&self, path: &Path) -> Option<PathBuf> {
        let root = lexical_normalize(&std::path::absolute(&self.root).ok()?);
        let candidate = lexical_normalize(&std::path::absolute(path).ok()?);
        if !candidate.starts_with(&root) {
            return None;
        }

        // Symlinks inside the root must not point back out of it.
        match (
            fs::canonicalize(&root).await,
            fs::canonicalize(&candidate).await,
        ) {
            (Ok(real_root), Ok(real)) if !real.starts_with(&real_root) => None,
            _ => Some(candidate),
        }
    }

    async fn ensure_within_root(&self, path: &Path) -> IndexResult<()> {
        if self.resolve_within_root(path).await.is_some() {
            return Ok(());
        }
        self.logger.log(&IndexEvent::PathRejected {
            path: path.to_path_buf(),
        });
        Err(IndexError::PathRejected {
            path: path.to_path_buf(),
        })
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> IndexResult<Option<T>> {
        let Some(resolved) = self.resolve_within_root(path).await else {
            self.logger.log(&IndexEvent::PathRejected {
                path: path.to_path_buf(),
            });
            return Ok(None);
        };

        match fs::read(&resolved).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| IndexError::Corrupt {
                    path: resolved,
                    source,
                }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(IndexError::Io {
                context: format!("reading {}", resolved.display()),
                source: err,
            }),
        }
    }

    /// Write to a sibling temp file, then rename over `path`.
    async fn write_json_atomic<T: Serialize>(&self, path: &Path, value: &T) -> IndexResult<()> {
        let encoded = if self.pretty_json {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        };
        let bytes = encoded.map_err(|source| IndexError::Encode {
            path: path.to_path_buf(),
            source,
        })?;

        let (Some(parent), Some(file_name)) = (path.parent(), path.file_name()) else {
            return Err(IndexError::AtomicWrite {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "index path has no parent directory",
                ),
            });
        };
        self.ensure_within_root(parent).await?;
        self.ensure_within_root(path).await?;
        let temp_path = parent.join(format!(
            ".{}.{}.tmp",
            file_name.to_string_lossy(),
            Uuid::new_v4()
        ));

        let result: std::io::Result<()> = async {
            let mut file = fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&temp_path)
                .await?;
            file.write_all(&bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, path).await
        }
        .await;

        if let Err(source) = result {
            if let Err(cleanup) = fs::remove_file(&temp_path).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    self.logger.log(&IndexEvent::TempCleanupFailed {
                        path: temp_path.clone(),
                        error: cleanup.to_string(),
                    });
                }
            }
            return Err(IndexError::AtomicWrite {
                path: path.to_path_buf(),
                source,
            });
        }
        Ok(())
    }
}
