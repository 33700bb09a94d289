//! Core domain model for district statistics: raw club rows, time-series
//! data points, program-year index files, and cross-district rankings.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const CRATE_NAME: &str = "dstats-core";

/// Calendar date format used for every persisted date string.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Ordered list of historical column names for one logical field.
pub type FieldAliases = &'static [&'static str];

/// Column name catalogue, in lookup priority order.
pub mod fields {
    use super::FieldAliases;

    pub const MEMBERSHIP: FieldAliases = &["Active Members", "Active Membership", "Membership"];
    pub const MEMBERSHIP_BASE: FieldAliases = &["Mem. Base", "Membership Base", "Base"];
    pub const GOALS_MET: FieldAliases = &["Goals Met"];
    pub const OCTOBER_RENEWALS: FieldAliases = &["Oct. Ren.", "Oct. Ren", "October Renewals"];
    pub const APRIL_RENEWALS: FieldAliases = &["Apr. Ren.", "Apr. Ren", "April Renewals"];
    pub const NEW_MEMBERS: FieldAliases = &["New Members", "New"];
    pub const DISTINGUISHED_STATUS: FieldAliases =
        &["Club Distinguished Status", "Club Status", "Distinguished Status"];
    pub const PLAN_SUBMITTED: FieldAliases = &["CSP", "Club Success Plan", "CSP Submitted"];
}

/// Loosely-typed club record. Values may be strings, numbers or null, and the
/// same logical field may appear under any of its historical aliases.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClubRow(pub BTreeMap<String, JsonValue>);

impl ClubRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    /// First alias carrying a non-null value.
    pub fn lookup(&self, aliases: FieldAliases) -> Option<&JsonValue> {
        aliases
            .iter()
            .filter_map(|key| self.0.get(*key))
            .find(|value| !value.is_null())
    }

    pub fn int_field(&self, aliases: FieldAliases) -> i64 {
        safe_parse_int(self.lookup(aliases))
    }

    /// Trimmed textual form of the first present alias.
    pub fn text_field(&self, aliases: FieldAliases) -> Option<String> {
        self.lookup(aliases).and_then(text_value)
    }
}

/// Lenient integer parse used for every numeric club column.
///
/// Missing, null and blank values are 0. Numbers truncate toward zero.
/// Strings are trimmed and read as an optional sign followed by the leading
/// run of digits, so `"12 members"` is 12 and `"abc"` is 0. Oversized digit
/// runs saturate instead of collapsing to 0.
pub fn safe_parse_int(value: Option<&JsonValue>) -> i64 {
    match value {
        None | Some(JsonValue::Null) => 0,
        Some(JsonValue::Number(n)) => match n.as_i64() {
            Some(i) => i,
            None => n
                .as_f64()
                .filter(|f| f.is_finite())
                .map(|f| f.trunc() as i64)
                .unwrap_or(0),
        },
        Some(JsonValue::String(s)) => parse_leading_int(s),
        Some(_) => 0,
    }
}

fn parse_leading_int(raw: &str) -> i64 {
    let s = raw.trim();
    let (sign, digits) = match s.as_bytes().first() {
        Some(b'-') => (-1, &s[1..]),
        Some(b'+') => (1, &s[1..]),
        _ => (1, s),
    };
    let magnitude = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, d| {
            acc.saturating_mul(10).saturating_add(i64::from(d - b'0'))
        });
    sign * magnitude
}

fn text_value(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Raw rows for one district on one as-of date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistrictStatisticsInput {
    pub district_id: String,
    pub as_of_date: String,
    #[serde(default)]
    pub membership_total: Option<i64>,
    #[serde(default)]
    pub club_rows: Vec<ClubRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClubHealthCounts {
    pub total: u32,
    pub thriving: u32,
    pub vulnerable: u32,
    pub intervention_required: u32,
}

/// One dated aggregate for a district.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesDataPoint {
    pub date: String,
    pub snapshot_id: String,
    pub membership: i64,
    pub payments: i64,
    pub dcp_goals: i64,
    pub distinguished_total: u32,
    pub club_counts: ClubHealthCounts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramYearSummary {
    pub total_data_points: u32,
    pub membership_start: i64,
    pub membership_end: i64,
    pub membership_peak: i64,
    pub membership_low: i64,
}

impl ProgramYearSummary {
    /// Roll-up over points already sorted by date. All zero when empty.
    pub fn from_points(points: &[TimeSeriesDataPoint]) -> Self {
        let (Some(first), Some(last)) = (points.first(), points.last()) else {
            return Self::default();
        };
        let memberships = points.iter().map(|p| p.membership);
        Self {
            total_data_points: points.len() as u32,
            membership_start: first.membership,
            membership_end: last.membership,
            membership_peak: memberships.clone().max().unwrap_or_default(),
            membership_low: memberships.min().unwrap_or_default(),
        }
    }
}

/// One program-year partition of a district's time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramYearIndexFile {
    pub district_id: String,
    pub program_year: String,
    pub start_date: String,
    pub end_date: String,
    pub last_updated: DateTime<Utc>,
    pub data_points: Vec<TimeSeriesDataPoint>,
    pub summary: ProgramYearSummary,
}

impl ProgramYearIndexFile {
    pub fn empty(district_id: &str, program_year: ProgramYear, now: DateTime<Utc>) -> Self {
        Self {
            district_id: district_id.to_string(),
            program_year: program_year.to_string(),
            start_date: program_year.start_date().format(DATE_FORMAT).to_string(),
            end_date: program_year.end_date().format(DATE_FORMAT).to_string(),
            last_updated: now,
            data_points: Vec::new(),
            summary: ProgramYearSummary::default(),
        }
    }

    /// Replace the point with the same date or append, keeping dates sorted and unique.
    pub fn upsert(&mut self, point: TimeSeriesDataPoint) {
        match self.data_points.iter_mut().find(|p| p.date == point.date) {
            Some(existing) => *existing = point,
            None => self.data_points.push(point),
        }
        self.data_points.sort_by(|a, b| a.date.cmp(&b.date));
        self.summary = ProgramYearSummary::from_points(&self.data_points);
    }
}

/// Per-district roll-up across all program-year partitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMetadata {
    pub district_id: String,
    pub last_updated: DateTime<Utc>,
    pub available_program_years: Vec<String>,
    pub total_data_points: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProgramYearError {
    #[error("invalid date {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("invalid program year label {0:?}, expected YYYY-YYYY")]
    InvalidLabel(String),
}

/// July 1 to June 30 reporting cycle, identified by the year it starts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgramYear {
    pub start_year: i32,
}

impl ProgramYear {
    pub fn new(start_year: i32) -> Self {
        Self { start_year }
    }

    pub fn for_date(date: NaiveDate) -> Self {
        if date.month() >= 7 {
            Self::new(date.year())
        } else {
            Self::new(date.year() - 1)
        }
    }

    pub fn for_date_str(date: &str) -> Result<Self, ProgramYearError> {
        parse_date(date).map(Self::for_date)
    }

    pub fn start_date(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.start_year, 7, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn end_date(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.start_year + 1, 6, 30).unwrap_or(NaiveDate::MAX)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start_date() && date <= self.end_date()
    }

    pub fn next(&self) -> Self {
        Self::new(self.start_year + 1)
    }
}

impl fmt::Display for ProgramYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start_year, self.start_year + 1)
    }
}

impl FromStr for ProgramYear {
    type Err = ProgramYearError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProgramYearError::InvalidLabel(s.to_string());
        let (start, end) = s.split_once('-').ok_or_else(invalid)?;
        if start.len() != 4 || end.len() != 4 {
            return Err(invalid());
        }
        let start: i32 = start.parse().map_err(|_| invalid())?;
        let end: i32 = end.parse().map_err(|_| invalid())?;
        if end != start + 1 {
            return Err(invalid());
        }
        Ok(Self::new(start))
    }
}

pub fn parse_date(date: &str) -> Result<NaiveDate, ProgramYearError> {
    NaiveDate::parse_from_str(date, DATE_FORMAT)
        .map_err(|_| ProgramYearError::InvalidDate(date.to_string()))
}

/// Every program year overlapping the inclusive range. Empty when `start > end`.
pub fn program_years_in_range(start: NaiveDate, end: NaiveDate) -> Vec<ProgramYear> {
    if start > end {
        return Vec::new();
    }
    let last = ProgramYear::for_date(end);
    let mut years = Vec::new();
    let mut current = ProgramYear::for_date(start);
    while current <= last {
        years.push(current);
        current = current.next();
    }
    years
}

/// One district's entry in a cross-district rankings snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingRow {
    pub district_id: String,
    #[serde(default)]
    pub district_name: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub club_growth_percent: f64,
    #[serde(default)]
    pub payment_growth_percent: f64,
    #[serde(default)]
    pub distinguished_percent: f64,
    #[serde(default)]
    pub clubs_rank: Option<u32>,
    #[serde(default)]
    pub payments_rank: Option<u32>,
    #[serde(default)]
    pub distinguished_rank: Option<u32>,
    #[serde(default)]
    pub aggregate_score: Option<f64>,
    #[serde(default)]
    pub overall_rank: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    #[serde(default)]
    pub snapshot_id: String,
    #[serde(default)]
    pub calculated_at: Option<String>,
    #[serde(default)]
    pub total_districts: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingsSnapshot {
    #[serde(default)]
    pub metadata: SnapshotMetadata,
    #[serde(default)]
    pub rankings: Vec<RankingRow>,
}

impl RankingsSnapshot {
    pub fn total_districts(&self) -> u32 {
        self.metadata
            .total_districts
            .unwrap_or(self.rankings.len() as u32)
    }

    pub fn find(&self, district_id: &str) -> Option<&RankingRow> {
        self.rankings.iter().find(|row| row.district_id == district_id)
    }
}

/// Ranking position of one district on one metric.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRankings {
    pub world_rank: Option<u32>,
    pub world_percentile: Option<f64>,
    pub region_rank: Option<u32>,
    pub total_districts: Option<u32>,
    pub total_in_region: Option<u32>,
    pub region: Option<String>,
}
