//! Turns one district's raw club rows into a dated [`TimeSeriesDataPoint`].

use dstats_core::{
    fields, ClubHealthCounts, ClubRow, DistrictStatisticsInput, TimeSeriesDataPoint,
};
use serde::{Deserialize, Serialize};

/// Plan-submitted values meaning the plan was not submitted.
const PLAN_NOT_SUBMITTED: &[&str] = &["no", "false", "0", "not submitted", "n"];

/// Status values meaning no recognition tier.
const NO_STATUS: &[&str] = &["none", "n/a"];

/// Recognition tier keywords, matched as lowercase substrings.
const TIER_KEYWORDS: &[&str] = &["smedley", "president", "select", "distinguished"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClubHealth {
    Thriving,
    Vulnerable,
    InterventionRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuilderThresholds {
    /// Clubs below this membership without growth need intervention.
    pub intervention_membership: i64,
    /// Membership considered healthy on its own.
    pub healthy_membership: i64,
    /// Net growth over the base that counts as healthy.
    pub net_growth_target: i64,
    /// Goals needed for the numeric distinguished fallback.
    pub distinguished_goals: i64,
}

impl Default for BuilderThresholds {
    fn default() -> Self {
        Self {
            intervention_membership: 12,
            healthy_membership: 20,
            net_growth_target: 3,
            distinguished_goals: 5,
        }
    }
}

/// Parsed per-club figures shared by the health and distinguished checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClubSnapshot {
    pub membership: i64,
    pub membership_base: i64,
    pub net_growth: i64,
    pub goals_met: i64,
    pub distinguished: bool,
    pub health: ClubHealth,
}

#[derive(Debug, Clone, Default)]
pub struct DataPointBuilder {
    thresholds: BuilderThresholds,
}

impl DataPointBuilder {
    pub fn new(thresholds: BuilderThresholds) -> Self {
        Self { thresholds }
    }

    pub fn build(&self, snapshot_id: &str, input: &DistrictStatisticsInput) -> TimeSeriesDataPoint {
        let rows = &input.club_rows;
        TimeSeriesDataPoint {
            date: input.as_of_date.clone(),
            snapshot_id: snapshot_id.to_string(),
            membership: self.total_membership(input),
            payments: self.total_payments(rows),
            dcp_goals: self.total_dcp_goals(rows),
            distinguished_total: self.distinguished_total(rows),
            club_counts: self.health_counts(rows),
        }
    }

    /// Explicit district total when supplied, otherwise the sum over clubs.
    pub fn total_membership(&self, input: &DistrictStatisticsInput) -> i64 {
        input.membership_total.unwrap_or_else(|| {
            input
                .club_rows
                .iter()
                .map(|row| row.int_field(fields::MEMBERSHIP))
                .sum()
        })
    }

    /// October renewals + April renewals + new members.
    pub fn total_payments(&self, rows: &[ClubRow]) -> i64 {
        rows.iter()
            .map(|row| {
                row.int_field(fields::OCTOBER_RENEWALS)
                    + row.int_field(fields::APRIL_RENEWALS)
                    + row.int_field(fields::NEW_MEMBERS)
            })
            .sum()
    }

    pub fn total_dcp_goals(&self, rows: &[ClubRow]) -> i64 {
        rows.iter().map(|row| row.int_field(fields::GOALS_MET)).sum()
    }

    pub fn distinguished_total(&self, rows: &[ClubRow]) -> u32 {
        rows.iter().filter(|row| self.is_distinguished(row)).count() as u32
    }

    pub fn health_counts(&self, rows: &[ClubRow]) -> ClubHealthCounts {
        let mut counts = ClubHealthCounts {
            total: rows.len() as u32,
            ..Default::default()
        };
        for row in rows {
            match self.club_snapshot(row).health {
                ClubHealth::Thriving => counts.thriving += 1,
                ClubHealth::Vulnerable => counts.vulnerable += 1,
                ClubHealth::InterventionRequired => counts.intervention_required += 1,
            }
        }
        counts
    }

    pub fn club_snapshot(&self, row: &ClubRow) -> ClubSnapshot {
        let membership = row.int_field(fields::MEMBERSHIP);
        let membership_base = row.int_field(fields::MEMBERSHIP_BASE);
        let net_growth = membership - membership_base;
        let goals_met = row.int_field(fields::GOALS_MET);
        ClubSnapshot {
            membership,
            membership_base,
            net_growth,
            goals_met,
            distinguished: self.is_distinguished(row),
            health: self.classify_health(membership, net_growth, goals_met),
        }
    }

    /// Checked in order: unsubmitted plan, recognised status text, then the
    /// goals + membership fallback. A missing plan field counts as submitted.
    pub fn is_distinguished(&self, row: &ClubRow) -> bool {
        if let Some(plan) = row.text_field(fields::PLAN_SUBMITTED) {
            if PLAN_NOT_SUBMITTED.contains(&plan.to_lowercase().as_str()) {
                return false;
            }
        }

        if let Some(status) = row.text_field(fields::DISTINGUISHED_STATUS) {
            let status = status.to_lowercase();
            if !status.is_empty()
                && !NO_STATUS.contains(&status.as_str())
                && TIER_KEYWORDS.iter().any(|tier| status.contains(tier))
            {
                return true;
            }
        }

        let membership = row.int_field(fields::MEMBERSHIP);
        let net_growth = membership - row.int_field(fields::MEMBERSHIP_BASE);
        row.int_field(fields::GOALS_MET) >= self.thresholds.distinguished_goals
            && self.meets_membership_bar(membership, net_growth)
    }

    pub fn classify_health(&self, membership: i64, net_growth: i64, goals_met: i64) -> ClubHealth {
        let t = &self.thresholds;
        if membership < t.intervention_membership && net_growth < t.net_growth_target {
            ClubHealth::InterventionRequired
        } else if self.meets_membership_bar(membership, net_growth) && goals_met > 0 {
            ClubHealth::Thriving
        } else {
            ClubHealth::Vulnerable
        }
    }

    fn meets_membership_bar(&self, membership: i64, net_growth: i64) -> bool {
        membership >= self.thresholds.healthy_membership
            || net_growth >= self.thresholds.net_growth_target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value as JsonValue};

    fn club(membership: i64, base: i64, goals: i64) -> ClubRow {
        ClubRow::new()
            .with("Active Members", membership)
            .with("Mem. Base", base)
            .with("Goals Met", goals)
    }

    fn input(rows: Vec<ClubRow>) -> DistrictStatisticsInput {
        DistrictStatisticsInput {
            district_id: "101".into(),
            as_of_date: "2024-01-15".into(),
            membership_total: None,
            club_rows: rows,
        }
    }

    #[test]
    fn growing_club_without_plan_field_is_distinguished_and_thriving() {
        let builder = DataPointBuilder::default();
        let snapshot = builder.club_snapshot(&club(25, 20, 6));
        assert_eq!(snapshot.net_growth, 5);
        assert!(snapshot.distinguished);
        assert_eq!(snapshot.health, ClubHealth::Thriving);
    }

    #[test]
    fn empty_club_list_builds_zeroed_point() {
        let point = DataPointBuilder::default().build("snap-1", &input(vec![]));
        assert_eq!(point.date, "2024-01-15");
        assert_eq!(point.snapshot_id, "snap-1");
        assert_eq!(point.membership, 0);
        assert_eq!(point.payments, 0);
        assert_eq!(point.dcp_goals, 0);
        assert_eq!(point.distinguished_total, 0);
        assert_eq!(point.club_counts, ClubHealthCounts::default());
    }

    #[test]
    fn unsubmitted_plan_blocks_distinguished_status() {
        let builder = DataPointBuilder::default();
        for value in [json!("No"), json!(" n "), json!(false), json!(0), json!("Not Submitted")] {
            let row = club(30, 20, 9)
                .with("Club Distinguished Status", "President's Distinguished")
                .with("CSP", value.clone());
            assert!(!builder.is_distinguished(&row), "plan value {value}");
        }

        let submitted = club(30, 20, 9).with("CSP", "Yes");
        assert!(builder.is_distinguished(&submitted));
    }

    #[test]
    fn status_text_wins_over_numeric_fallback() {
        let builder = DataPointBuilder::default();
        let row = club(8, 10, 0).with("Club Distinguished Status", "Select Distinguished");
        assert!(builder.is_distinguished(&row));

        let smedley = club(8, 10, 0).with("Club Status", "SMEDLEY");
        assert!(builder.is_distinguished(&smedley));

        for status in ["none", "N/A", "", "Pending"] {
            let row = club(8, 10, 0).with("Club Distinguished Status", status);
            assert!(!builder.is_distinguished(&row), "status {status:?}");
        }
    }

    #[test]
    fn numeric_fallback_needs_goals_and_membership_or_growth() {
        let builder = DataPointBuilder::default();
        assert!(builder.is_distinguished(&club(20, 20, 5)));
        assert!(builder.is_distinguished(&club(15, 12, 5)));
        assert!(!builder.is_distinguished(&club(19, 18, 5)));
        assert!(!builder.is_distinguished(&club(30, 20, 4)));
    }

    #[test]
    fn health_follows_priority_order() {
        let builder = DataPointBuilder::default();
        assert_eq!(builder.classify_health(11, 2, 10), ClubHealth::InterventionRequired);
        assert_eq!(builder.classify_health(11, 3, 1), ClubHealth::Thriving);
        assert_eq!(builder.classify_health(11, 3, 0), ClubHealth::Vulnerable);
        assert_eq!(builder.classify_health(20, -4, 1), ClubHealth::Thriving);
        assert_eq!(builder.classify_health(15, 0, 3), ClubHealth::Vulnerable);
    }

    #[test]
    fn health_counts_partition_every_club() {
        let builder = DataPointBuilder::default();
        let rows: Vec<ClubRow> = (0..60)
            .map(|i| club(i % 31, (i * 7) % 25, i % 6))
            .chain([ClubRow::new(), ClubRow::new().with("Active Members", "junk")])
            .collect();
        let counts = builder.health_counts(&rows);
        assert_eq!(counts.total, 62);
        assert_eq!(
            counts.thriving + counts.vulnerable + counts.intervention_required,
            counts.total
        );
    }

    #[test]
    fn totals_read_historical_aliases() {
        let rows = vec![
            ClubRow::new()
                .with("Active Members", "22")
                .with("Oct. Ren.", 10)
                .with("Apr. Ren.", 8)
                .with("New Members", 4)
                .with("Goals Met", "6"),
            ClubRow::new()
                .with("Active Membership", 14)
                .with("Oct. Ren", "5")
                .with("Apr. Ren", JsonValue::Null)
                .with("New", 2)
                .with("Goals Met", 1),
        ];
        let point = DataPointBuilder::default().build("s", &input(rows));
        assert_eq!(point.membership, 36);
        assert_eq!(point.payments, 29);
        assert_eq!(point.dcp_goals, 7);
        assert_eq!(point.club_counts.total, 2);
    }

    #[test]
    fn explicit_membership_total_overrides_club_sum() {
        let mut district = input(vec![club(25, 20, 6), club(10, 10, 0)]);
        district.membership_total = Some(4000);
        let point = DataPointBuilder::default().build("s", &district);
        assert_eq!(point.membership, 4000);
        assert_eq!(point.distinguished_total, 1);
        assert_eq!(point.club_counts.thriving, 1);
        assert_eq!(point.club_counts.intervention_required, 1);
    }

    #[test]
    fn data_point_round_trips_through_json() {
        let point = DataPointBuilder::default().build("s", &input(vec![club(25, 20, 6)]));
        let text = serde_json::to_string(&point).expect("serialize");
        let back: TimeSeriesDataPoint = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(back, point);
    }
}
