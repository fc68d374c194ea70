//! Spending analytics.
//!
//! Pure, deterministic transforms from an access-filtered list of request
//! records into chart-ready summaries. No I/O: callers fetch rows under the
//! caller's read scope (see `authz`) and hand them in. All date bucketing is
//! done in UTC; a missing amount counts as zero so sums never propagate NaN.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use utoipa::ToSchema;

/// The slice of a payment request the analytics transforms consume. Group ids
/// are already resolved to names; absent fields stay absent rather than being
/// defaulted so each transform can pick its own placeholder bucket.
#[derive(Debug, Clone)]
pub struct RequestFacts {
    pub timestamp: DateTime<Utc>,
    pub amount: Option<f64>,
    pub status: Option<String>,
    pub group_name: Option<String>,
    pub payment_timeframe: Option<String>,
    pub budget_line: Option<String>,
    pub email_address: Option<String>,
}

/// An allocated figure from an annual budget sheet, matched against request
/// budget lines by exact label.
#[derive(Debug, Clone)]
pub struct BudgetFigure {
    pub label: String,
    pub allocated: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct MonthlyPoint {
    /// "YYYY-MM"
    pub month: String,
    pub total: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct StatusSlice {
    pub status: String,
    pub value: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct GroupSlice {
    pub group: String,
    pub value: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TimeframePoint {
    pub timeframe: String,
    pub average_amount: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct BudgetLineSlice {
    pub name: String,
    pub value: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DayOfWeekPoint {
    pub day: String,
    pub count: u64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TopRequester {
    pub email: String,
    pub count: u64,
    pub total_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct BudgetComparisonRow {
    pub name: String,
    pub actual_spent: f64,
    pub allocated: f64,
    /// Percent of the allocated figure spent; zero when nothing is allocated.
    pub utilization_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SeasonSlice {
    pub season: String,
    pub count: u64,
    pub total_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TimelinePoint {
    pub date: DateTime<Utc>,
    pub amount: f64,
    pub cumulative_total: f64,
}

/// Everything the analytics dashboard renders, in one payload.
#[derive(Debug, Serialize, ToSchema)]
pub struct Dashboard {
    pub monthly: Vec<MonthlyPoint>,
    pub statuses: Vec<StatusSlice>,
    pub groups: Vec<GroupSlice>,
    pub timeframes: Vec<TimeframePoint>,
    pub budget_lines: Vec<BudgetLineSlice>,
    pub days_of_week: Vec<DayOfWeekPoint>,
    pub top_requesters: Vec<TopRequester>,
    pub budget_comparison: Vec<BudgetComparisonRow>,
    pub seasons: Vec<SeasonSlice>,
    pub timeline: Vec<TimelinePoint>,
}

pub fn build_dashboard(requests: &[RequestFacts], figures: &[BudgetFigure]) -> Dashboard {
    Dashboard {
        monthly: monthly_data(requests),
        statuses: status_data(requests),
        groups: group_data(requests),
        timeframes: timeframe_data(requests),
        budget_lines: budget_line_data(requests),
        days_of_week: day_of_week_data(requests),
        top_requesters: top_requesters(requests),
        budget_comparison: budget_comparison(requests, figures),
        seasons: seasonal_analysis(requests),
        timeline: budget_timeline(requests),
    }
}

fn amount_of(record: &RequestFacts) -> f64 {
    record.amount.unwrap_or(0.0)
}

/// Totals per calendar month, ascending by "YYYY-MM".
pub fn monthly_data(requests: &[RequestFacts]) -> Vec<MonthlyPoint> {
    let mut buckets: BTreeMap<String, (f64, u64)> = BTreeMap::new();
    for record in requests {
        let key = record.timestamp.format("%Y-%m").to_string();
        let entry = buckets.entry(key).or_insert((0.0, 0));
        entry.0 += amount_of(record);
        entry.1 += 1;
    }

    buckets
        .into_iter()
        .map(|(month, (total, count))| MonthlyPoint { month, total, count })
        .collect()
}

/// Totals per status; a missing status is its own bucket.
pub fn status_data(requests: &[RequestFacts]) -> Vec<StatusSlice> {
    let mut buckets: BTreeMap<String, (f64, u64)> = BTreeMap::new();
    for record in requests {
        let key = record.status.clone().unwrap_or_else(|| "Unknown".to_string());
        let entry = buckets.entry(key).or_insert((0.0, 0));
        entry.0 += amount_of(record);
        entry.1 += 1;
    }

    buckets
        .into_iter()
        .map(|(status, (value, count))| StatusSlice { status, value, count })
        .collect()
}

/// Totals per group, largest spend first.
pub fn group_data(requests: &[RequestFacts]) -> Vec<GroupSlice> {
    let mut buckets: BTreeMap<String, (f64, u64)> = BTreeMap::new();
    for record in requests {
        let key = record.group_name.clone().unwrap_or_else(|| "Unassigned".to_string());
        let entry = buckets.entry(key).or_insert((0.0, 0));
        entry.0 += amount_of(record);
        entry.1 += 1;
    }

    let mut slices: Vec<GroupSlice> = buckets
        .into_iter()
        .map(|(group, (value, count))| GroupSlice { group, value, count })
        .collect();
    // descending by value; name breaks ties so output is byte-stable
    slices.sort_by(|a, b| b.value.total_cmp(&a.value).then_with(|| a.group.cmp(&b.group)));
    slices
}

/// Mean request size per payment timeframe, over positive amounts only.
pub fn timeframe_data(requests: &[RequestFacts]) -> Vec<TimeframePoint> {
    let mut buckets: BTreeMap<String, (f64, u64)> = BTreeMap::new();
    for record in requests {
        let amount = amount_of(record);
        if amount <= 0.0 {
            continue;
        }
        let Some(timeframe) = record.payment_timeframe.clone() else {
            continue;
        };
        let entry = buckets.entry(timeframe).or_insert((0.0, 0));
        entry.0 += amount;
        entry.1 += 1;
    }

    buckets
        .into_iter()
        .map(|(timeframe, (sum, count))| TimeframePoint {
            timeframe,
            average_amount: sum / count as f64,
            count,
        })
        .collect()
}

/// Totals per budget line, largest spend first.
pub fn budget_line_data(requests: &[RequestFacts]) -> Vec<BudgetLineSlice> {
    let mut buckets: BTreeMap<String, (f64, u64)> = BTreeMap::new();
    for record in requests {
        let key = record.budget_line.clone().unwrap_or_else(|| "Unspecified".to_string());
        let entry = buckets.entry(key).or_insert((0.0, 0));
        entry.0 += amount_of(record);
        entry.1 += 1;
    }

    let mut slices: Vec<BudgetLineSlice> = buckets
        .into_iter()
        .map(|(name, (value, count))| BudgetLineSlice { name, value, count })
        .collect();
    slices.sort_by(|a, b| b.value.total_cmp(&a.value).then_with(|| a.name.cmp(&b.name)));
    slices
}

const WEEKDAYS: [&str; 7] = [
    "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday",
];

/// Counts and totals per weekday (UTC), Monday first.
pub fn day_of_week_data(requests: &[RequestFacts]) -> Vec<DayOfWeekPoint> {
    let mut buckets: [(u64, f64); 7] = [(0, 0.0); 7];
    for record in requests {
        let idx = record.timestamp.weekday().num_days_from_monday() as usize;
        buckets[idx].0 += 1;
        buckets[idx].1 += amount_of(record);
    }

    WEEKDAYS
        .iter()
        .zip(buckets)
        .filter(|(_, (count, _))| *count > 0)
        .map(|(day, (count, value))| DayOfWeekPoint {
            day: (*day).to_string(),
            count,
            value,
        })
        .collect()
}

/// The ten most frequent requesters by submission count.
pub fn top_requesters(requests: &[RequestFacts]) -> Vec<TopRequester> {
    let mut buckets: BTreeMap<String, (u64, f64)> = BTreeMap::new();
    for record in requests {
        let key = record.email_address.clone().unwrap_or_else(|| "Unknown".to_string());
        let entry = buckets.entry(key).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += amount_of(record);
    }

    let mut requesters: Vec<TopRequester> = buckets
        .into_iter()
        .map(|(email, (count, total_amount))| TopRequester { email, count, total_amount })
        .collect();
    requesters.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.email.cmp(&b.email)));
    requesters.truncate(10);
    requesters
}

/// Spend per budget line against the allocated figure for the same label.
pub fn budget_comparison(
    requests: &[RequestFacts],
    figures: &[BudgetFigure],
) -> Vec<BudgetComparisonRow> {
    let mut buckets: BTreeMap<String, f64> = BTreeMap::new();
    for record in requests {
        let key = record.budget_line.clone().unwrap_or_else(|| "Unspecified".to_string());
        *buckets.entry(key).or_insert(0.0) += amount_of(record);
    }

    let mut rows: Vec<BudgetComparisonRow> = buckets
        .into_iter()
        .map(|(name, actual_spent)| {
            let allocated = figures
                .iter()
                .find(|f| f.label == name)
                .map(|f| f.allocated)
                .unwrap_or(0.0);
            let utilization_rate = if allocated > 0.0 {
                actual_spent / allocated * 100.0
            } else {
                0.0
            };
            BudgetComparisonRow { name, actual_spent, allocated, utilization_rate }
        })
        .collect();
    rows.sort_by(|a, b| {
        b.utilization_rate
            .total_cmp(&a.utilization_rate)
            .then_with(|| a.name.cmp(&b.name))
    });
    rows
}

const SEASONS: [&str; 3] = ["Fall", "Winter", "Spring/Summer"];

fn season_of(timestamp: &DateTime<Utc>) -> &'static str {
    match timestamp.month() {
        9..=12 => "Fall",
        1..=4 => "Winter",
        _ => "Spring/Summer",
    }
}

/// Academic-year seasons: Fall is Sep-Dec, Winter is Jan-Apr, the rest is the
/// Spring/Summer term.
pub fn seasonal_analysis(requests: &[RequestFacts]) -> Vec<SeasonSlice> {
    let mut buckets: BTreeMap<&'static str, (u64, f64)> = BTreeMap::new();
    for record in requests {
        let entry = buckets.entry(season_of(&record.timestamp)).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += amount_of(record);
    }

    SEASONS
        .iter()
        .filter_map(|season| {
            buckets.get(season).map(|(count, total_amount)| SeasonSlice {
                season: (*season).to_string(),
                count: *count,
                total_amount: *total_amount,
            })
        })
        .collect()
}

/// Cumulative spend over time. Input is sorted by timestamp internally; ties
/// keep their arrival order.
pub fn budget_timeline(requests: &[RequestFacts]) -> Vec<TimelinePoint> {
    let mut ordered: Vec<&RequestFacts> = requests.iter().collect();
    ordered.sort_by_key(|r| r.timestamp);

    let mut cumulative = 0.0;
    ordered
        .into_iter()
        .map(|record| {
            let amount = amount_of(record);
            cumulative += amount;
            TimelinePoint {
                date: record.timestamp,
                amount,
                cumulative_total: cumulative,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(timestamp: &str, amount: f64) -> RequestFacts {
        RequestFacts {
            timestamp: DateTime::parse_from_rfc3339(&format!("{timestamp}T12:00:00Z"))
                .unwrap()
                .with_timezone(&Utc),
            amount: Some(amount),
            status: None,
            group_name: None,
            payment_timeframe: None,
            budget_line: None,
            email_address: None,
        }
    }

    #[test]
    fn monthly_groups_by_calendar_month() {
        let records = vec![
            record("2023-01-15", 100.0),
            record("2023-01-20", 50.0),
            record("2023-02-01", 30.0),
        ];

        let monthly = monthly_data(&records);
        assert_eq!(
            monthly,
            vec![
                MonthlyPoint { month: "2023-01".into(), total: 150.0, count: 2 },
                MonthlyPoint { month: "2023-02".into(), total: 30.0, count: 1 },
            ]
        );
    }

    #[test]
    fn transforms_are_deterministic_and_order_insensitive() {
        let mut records = vec![
            record("2023-03-01", 10.0),
            record("2023-01-15", 100.0),
            record("2023-01-20", 50.0),
        ];
        let forward = monthly_data(&records);
        records.reverse();
        let reversed = monthly_data(&records);
        assert_eq!(forward, reversed);
        assert_eq!(forward, monthly_data(&records));
    }

    #[test]
    fn missing_amount_counts_as_zero() {
        let mut r = record("2023-01-15", 0.0);
        r.amount = None;
        let records = vec![r, record("2023-01-20", 25.0)];

        let monthly = monthly_data(&records);
        assert_eq!(monthly.len(), 1);
        assert_eq!(monthly[0].total, 25.0);
        assert_eq!(monthly[0].count, 2);
    }

    #[test]
    fn missing_status_is_its_own_bucket() {
        let mut with_status = record("2023-01-15", 40.0);
        with_status.status = Some("Approved".into());
        let records = vec![with_status, record("2023-01-20", 10.0)];

        let statuses = status_data(&records);
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().any(|s| s.status == "Approved" && s.value == 40.0));
        assert!(statuses.iter().any(|s| s.status == "Unknown" && s.value == 10.0 && s.count == 1));
    }

    #[test]
    fn groups_sort_descending_by_value() {
        let mut a = record("2023-01-01", 10.0);
        a.group_name = Some("Chess".into());
        let mut b = record("2023-01-02", 90.0);
        b.group_name = Some("Robotics".into());
        let unassigned = record("2023-01-03", 5.0);

        let groups = group_data(&[a, b, unassigned]);
        assert_eq!(groups[0].group, "Robotics");
        assert_eq!(groups[1].group, "Chess");
        assert_eq!(groups[2].group, "Unassigned");
    }

    #[test]
    fn timeframe_averages_skip_zero_and_missing() {
        let mut a = record("2023-01-01", 30.0);
        a.payment_timeframe = Some("Within 1 month".into());
        let mut b = record("2023-01-02", 60.0);
        b.payment_timeframe = Some("Within 1 month".into());
        let mut zero = record("2023-01-03", 0.0);
        zero.payment_timeframe = Some("Within 1 month".into());
        let no_timeframe = record("2023-01-04", 99.0);

        let timeframes = timeframe_data(&[a, b, zero, no_timeframe]);
        assert_eq!(timeframes.len(), 1);
        assert_eq!(timeframes[0].count, 2);
        assert_eq!(timeframes[0].average_amount, 45.0);
    }

    #[test]
    fn top_requesters_order_by_count_top_ten() {
        let mut records = Vec::new();
        for (email, count) in [("five@x.ca", 5), ("two@x.ca", 2), ("eight@x.ca", 8)] {
            for _ in 0..count {
                let mut r = record("2023-01-01", 10.0);
                r.email_address = Some(email.to_string());
                records.push(r);
            }
        }

        let top = top_requesters(&records);
        assert_eq!(top[0].email, "eight@x.ca");
        assert_eq!(top[1].email, "five@x.ca");
        assert_eq!(top[2].email, "two@x.ca");
        assert_eq!(top[0].count, 8);

        // a long tail still truncates at ten
        for i in 0..15 {
            let mut r = record("2023-01-01", 1.0);
            r.email_address = Some(format!("tail{i}@x.ca"));
            records.push(r);
        }
        assert_eq!(top_requesters(&records).len(), 10);
    }

    #[test]
    fn utilization_is_zero_without_allocation() {
        let mut a = record("2023-01-01", 50.0);
        a.budget_line = Some("Events".into());
        let mut b = record("2023-01-02", 10.0);
        b.budget_line = Some("Travel".into());

        let figures = vec![BudgetFigure { label: "Events".into(), allocated: 200.0 }];
        let rows = budget_comparison(&[a, b], &figures);

        let events = rows.iter().find(|r| r.name == "Events").unwrap();
        assert_eq!(events.utilization_rate, 25.0);
        assert_eq!(events.allocated, 200.0);

        let travel = rows.iter().find(|r| r.name == "Travel").unwrap();
        assert_eq!(travel.utilization_rate, 0.0);

        // Events (25%) sorts ahead of Travel (0%)
        assert_eq!(rows[0].name, "Events");
    }

    #[test]
    fn seasons_bucket_by_academic_term() {
        let records = vec![
            record("2023-09-10", 10.0), // Fall
            record("2023-12-31", 10.0), // Fall
            record("2023-01-05", 20.0), // Winter
            record("2023-04-30", 20.0), // Winter
            record("2023-06-15", 30.0), // Spring/Summer
        ];

        let seasons = seasonal_analysis(&records);
        assert_eq!(seasons.len(), 3);
        assert_eq!(seasons[0].season, "Fall");
        assert_eq!(seasons[0].count, 2);
        assert_eq!(seasons[1].season, "Winter");
        assert_eq!(seasons[1].total_amount, 40.0);
        assert_eq!(seasons[2].season, "Spring/Summer");
    }

    #[test]
    fn timeline_accumulates_in_timestamp_order() {
        let records = vec![
            record("2023-02-01", 30.0),
            record("2023-01-15", 100.0),
            record("2023-01-20", 50.0),
        ];

        let timeline = budget_timeline(&records);
        assert_eq!(timeline.len(), 3);
        assert_eq!(timeline[0].amount, 100.0);
        assert_eq!(timeline[0].cumulative_total, 100.0);
        assert_eq!(timeline[1].cumulative_total, 150.0);
        assert_eq!(timeline[2].cumulative_total, 180.0);
    }

    #[test]
    fn day_of_week_starts_monday() {
        // 2023-01-16 is a Monday, 2023-01-15 a Sunday
        let records = vec![record("2023-01-16", 10.0), record("2023-01-15", 5.0)];
        let days = day_of_week_data(&records);
        assert_eq!(days[0].day, "Monday");
        assert_eq!(days[1].day, "Sunday");
    }
}
