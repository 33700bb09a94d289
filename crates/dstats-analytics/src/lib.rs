//! Pure analytics over district statistics: peer rankings from a
//! cross-district snapshot and dated aggregates from raw club rows.

pub mod builder;
pub mod rankings;

pub use builder::{BuilderThresholds, ClubHealth, ClubSnapshot, DataPointBuilder};
pub use rankings::{
    district_rankings, metric_rankings, percentile, region_rank, DistrictRankings, RankingMetric,
    RegionRank,
};

pub const CRATE_NAME: &str = "dstats-analytics";
