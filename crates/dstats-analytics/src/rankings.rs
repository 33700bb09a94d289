//! World percentile and regional competition rank per metric.
//!
//! World ranks arrive precomputed on each snapshot row; only the percentile
//! and the in-region rank are derived here. Nothing in this module fails:
//! missing districts and unusable regions degrade to `None` / zero.

use dstats_core::{MetricRankings, RankingRow, RankingsSnapshot};
use serde::{Deserialize, Serialize};

/// Region label treated the same as a missing region.
pub const UNKNOWN_REGION: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RankingMetric {
    ClubGrowth,
    PaymentGrowth,
    DistinguishedPercent,
}

impl RankingMetric {
    pub const ALL: [RankingMetric; 3] = [
        RankingMetric::ClubGrowth,
        RankingMetric::PaymentGrowth,
        RankingMetric::DistinguishedPercent,
    ];

    pub fn value(&self, row: &RankingRow) -> f64 {
        match self {
            RankingMetric::ClubGrowth => row.club_growth_percent,
            RankingMetric::PaymentGrowth => row.payment_growth_percent,
            RankingMetric::DistinguishedPercent => row.distinguished_percent,
        }
    }

    pub fn world_rank(&self, row: &RankingRow) -> Option<u32> {
        match self {
            RankingMetric::ClubGrowth => row.clubs_rank,
            RankingMetric::PaymentGrowth => row.payments_rank,
            RankingMetric::DistinguishedPercent => row.distinguished_rank,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionRank {
    pub region_rank: Option<u32>,
    pub total_in_region: u32,
    pub region: Option<String>,
}

/// All three metric rankings for one district, ready for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistrictRankings {
    pub district_id: String,
    pub snapshot_id: String,
    pub region: Option<String>,
    pub club_growth: MetricRankings,
    pub payment_growth: MetricRankings,
    pub distinguished_percent: MetricRankings,
    pub overall_rank: Option<u32>,
}

/// Share of districts ranked below `world_rank`, rounded to one decimal.
///
/// `None` when there is no rank or fewer than two districts to compare.
pub fn percentile(world_rank: Option<u32>, total_districts: u32) -> Option<f64> {
    let rank = world_rank?;
    if total_districts <= 1 {
        return None;
    }
    let total = f64::from(total_districts);
    let raw = ((total - f64::from(rank)) / total) * 100.0;
    Some((raw * 10.0).round() / 10.0)
}

fn usable_region(region: Option<&str>) -> Option<&str> {
    region
        .map(str::trim)
        .filter(|r| !r.is_empty() && *r != UNKNOWN_REGION)
}

/// Standard competition ranking: `(value, rank)` per distinct value, highest first.
fn competition_ranks(mut values: Vec<f64>) -> Vec<(f64, u32)> {
    values.sort_by(|a, b| b.total_cmp(a));

    let mut groups: Vec<(f64, u32)> = Vec::new();
    for value in values {
        match groups.last_mut() {
            Some((group_value, size)) if *group_value == value => *size += 1,
            _ => groups.push((value, 1)),
        }
    }

    let mut ahead = 0u32;
    groups
        .into_iter()
        .map(|(value, size)| {
            let rank = ahead + 1;
            ahead += size;
            (value, rank)
        })
        .collect()
}

pub fn region_rank(
    district_id: &str,
    metric: RankingMetric,
    snapshot: &RankingsSnapshot,
) -> RegionRank {
    let Some(target) = snapshot.find(district_id) else {
        return RegionRank::default();
    };
    let Some(region) = usable_region(target.region.as_deref()) else {
        return RegionRank::default();
    };

    let in_region: Vec<f64> = snapshot
        .rankings
        .iter()
        .filter(|row| usable_region(row.region.as_deref()) == Some(region))
        .map(|row| metric.value(row))
        .collect();
    let total_in_region = in_region.len() as u32;

    let target_value = metric.value(target);
    let rank = competition_ranks(in_region)
        .into_iter()
        .find(|(value, _)| *value == target_value)
        .map(|(_, rank)| rank);

    RegionRank {
        region_rank: rank,
        total_in_region,
        region: Some(region.to_string()),
    }
}

pub fn metric_rankings(
    district_id: &str,
    metric: RankingMetric,
    snapshot: &RankingsSnapshot,
) -> MetricRankings {
    let Some(row) = snapshot.find(district_id) else {
        return MetricRankings::default();
    };

    let total_districts = snapshot.total_districts();
    let world_rank = metric.world_rank(row);
    let region = region_rank(district_id, metric, snapshot);

    MetricRankings {
        world_rank,
        world_percentile: percentile(world_rank, total_districts),
        region_rank: region.region_rank,
        total_districts: Some(total_districts),
        total_in_region: Some(region.total_in_region),
        region: region.region,
    }
}

pub fn district_rankings(district_id: &str, snapshot: &RankingsSnapshot) -> DistrictRankings {
    let row = snapshot.find(district_id);
    DistrictRankings {
        district_id: district_id.to_string(),
        snapshot_id: snapshot.metadata.snapshot_id.clone(),
        region: row
            .and_then(|r| usable_region(r.region.as_deref()))
            .map(str::to_string),
        club_growth: metric_rankings(district_id, RankingMetric::ClubGrowth, snapshot),
        payment_growth: metric_rankings(district_id, RankingMetric::PaymentGrowth, snapshot),
        distinguished_percent: metric_rankings(
            district_id,
            RankingMetric::DistinguishedPercent,
            snapshot,
        ),
        overall_rank: row.and_then(|r| r.overall_rank),
    }
}
