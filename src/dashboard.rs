//! Dashboard aggregation.
//!
//! Everything here is a pure function of already-scoped inventory rows, the
//! viewer's role, the viewer's timezone and the current date, so the views
//! can be tested without a database or a browser.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::structs::{InventoryRecord, PpeCategory};

pub const SELECT_CATEGORY_MESSAGE: &str =
    "Please use the drop-down selector to choose a type of PPE.";
const DAY_FORMAT: &str = "%a, %Y-%m-%d";
const ITEMS_AXIS: &str = "Number of Items";
const DAYS_AXIS: &str = "Number of Days";

/// How the viewer relates to the organization tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewer {
    /// Not yet onboarded; sees only their own submissions.
    Unaffiliated,
    Provider,
    Aggregator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    CurrentInventory,
    ProjectedDailyUse,
}

impl Metric {
    fn value(&self, row: &InventoryRecord) -> Option<i64> {
        match self {
            Metric::CurrentInventory => Some(row.number),
            Metric::ProjectedDailyUse => row.projected_daily_use,
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Line,
    Bar,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ChartPoint {
    pub label: String,
    pub value: i64,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Chart {
    pub kind: ChartKind,
    pub y_axis_title: &'static str,
    pub points: Vec<ChartPoint>,
}

impl Chart {
    fn empty(kind: ChartKind, y_axis_title: &'static str) -> Self {
        Chart {
            kind,
            y_axis_title,
            points: Vec::new(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub organization: String,
    pub category: &'static str,
    pub attribute: String,
    pub size: String,
    pub quantity: i64,
    pub daily_use: Option<i64>,
    pub projected_daily_use: Option<i64>,
    pub projected_run_out: Option<NaiveDate>,
    pub date_submitted: NaiveDate,
    pub comments: String,
    pub flagged: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct OrgSelector {
    pub visible: bool,
    pub options: Vec<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DashboardView {
    pub message: Option<&'static str>,
    pub org_selector: OrgSelector,
    pub table: Vec<TableRow>,
    pub current_inventory: Chart,
    pub projected_daily_use: Chart,
    pub days_remaining: Chart,
}

/// True when projected use exceeds current daily use by more than half.
/// Missing values and a zero daily use are never flagged.
pub fn is_anomalous(daily_use: Option<i64>, projected_daily_use: Option<i64>) -> bool {
    match (daily_use, projected_daily_use) {
        (Some(daily), Some(projected)) if daily != 0 => {
            (projected - daily) as f64 / daily as f64 > 0.5
        }
        _ => false,
    }
}

fn local_day(timestamp: DateTime<Utc>, tz: Tz) -> NaiveDate {
    timestamp.with_timezone(&tz).date_naive()
}

/// Signed whole days from `today` until `run_out`; a missing date is 0.
pub fn days_until(run_out: Option<NaiveDate>, today: NaiveDate) -> i64 {
    run_out.map_or(0, |date| (date - today).num_days())
}

/// Raw rows newest first.
pub fn table_rows(rows: &[InventoryRecord], tz: Tz) -> Vec<TableRow> {
    let mut sorted: Vec<&InventoryRecord> = rows.iter().collect();
    sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
    sorted
        .into_iter()
        .map(|r| TableRow {
            organization: r.organization_name.clone(),
            category: r.item_type.label(),
            attribute: r.item_attribute.clone(),
            size: r.size.clone(),
            quantity: r.number,
            daily_use: r.daily_use,
            projected_daily_use: r.projected_daily_use,
            projected_run_out: r.projected_run_out,
            date_submitted: local_day(r.timestamp, tz),
            comments: r.comments.clone(),
            flagged: is_anomalous(r.daily_use, r.projected_daily_use),
        })
        .collect()
}

/// Per local day, the sum of `metric`. A day appears once any row falls on
/// it, even if every value on that day is missing. Sums saturate.
pub fn provider_daily_totals(
    rows: &[InventoryRecord],
    metric: Metric,
    tz: Tz,
) -> Vec<(NaiveDate, i64)> {
    let mut days: BTreeMap<NaiveDate, i64> = BTreeMap::new();
    for row in rows {
        let total = days.entry(local_day(row.timestamp, tz)).or_insert(0);
        if let Some(value) = metric.value(row) {
            *total = total.saturating_add(value);
        }
    }
    days.into_iter().collect()
}

/// Per local day, the latest projected run-out date seen.
pub fn provider_daily_run_out(
    rows: &[InventoryRecord],
    tz: Tz,
) -> Vec<(NaiveDate, Option<NaiveDate>)> {
    let mut days: BTreeMap<NaiveDate, Option<NaiveDate>> = BTreeMap::new();
    for row in rows {
        let latest = days.entry(local_day(row.timestamp, tz)).or_insert(None);
        *latest = (*latest).max(row.projected_run_out);
    }
    days.into_iter().collect()
}

/// A provider's most recent submission day.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestSnapshot<'a> {
    pub organization_name: &'a str,
    pub latest: DateTime<Utc>,
    /// The provider's rows on the local day of `latest`.
    pub rows: Vec<&'a InventoryRecord>,
}

/// One snapshot per organization present in `rows`, ordered by name.
pub fn latest_snapshots(rows: &[InventoryRecord], tz: Tz) -> Vec<LatestSnapshot<'_>> {
    let mut latest: BTreeMap<i64, &InventoryRecord> = BTreeMap::new();
    for row in rows {
        latest
            .entry(row.organization_id)
            .and_modify(|current| {
                if row.timestamp > current.timestamp {
                    *current = row;
                }
            })
            .or_insert(row);
    }

    let mut snapshots: Vec<LatestSnapshot<'_>> = latest
        .into_values()
        .map(|newest| {
            let day = local_day(newest.timestamp, tz);
            LatestSnapshot {
                organization_name: &newest.organization_name,
                latest: newest.timestamp,
                rows: rows
                    .iter()
                    .filter(|r| {
                        r.organization_id == newest.organization_id
                            && local_day(r.timestamp, tz) == day
                    })
                    .collect(),
            }
        })
        .collect();
    snapshots.sort_by(|a, b| a.organization_name.cmp(b.organization_name));
    snapshots
}

fn snapshot_label(snapshot: &LatestSnapshot<'_>, tz: Tz) -> String {
    format!(
        "{}<br>{}",
        snapshot.organization_name,
        snapshot.latest.with_timezone(&tz).format(DAY_FORMAT)
    )
}

pub fn count_chart(viewer: Viewer, rows: &[InventoryRecord], metric: Metric, tz: Tz) -> Chart {
    match viewer {
        Viewer::Unaffiliated => Chart::empty(ChartKind::Line, ITEMS_AXIS),
        Viewer::Provider => Chart {
            kind: ChartKind::Line,
            y_axis_title: ITEMS_AXIS,
            points: provider_daily_totals(rows, metric, tz)
                .into_iter()
                .map(|(day, value)| ChartPoint {
                    label: day.format(DAY_FORMAT).to_string(),
                    value,
                })
                .collect(),
        },
        Viewer::Aggregator => Chart {
            kind: ChartKind::Bar,
            y_axis_title: ITEMS_AXIS,
            points: latest_snapshots(rows, tz)
                .iter()
                .map(|snapshot| ChartPoint {
                    label: snapshot_label(snapshot, tz),
                    value: snapshot
                        .rows
                        .iter()
                        .filter_map(|r| metric.value(r))
                        .fold(0, i64::saturating_add),
                })
                .collect(),
        },
    }
}

pub fn days_remaining_chart(
    viewer: Viewer,
    rows: &[InventoryRecord],
    tz: Tz,
    today: NaiveDate,
) -> Chart {
    match viewer {
        Viewer::Unaffiliated => Chart::empty(ChartKind::Line, DAYS_AXIS),
        Viewer::Provider => Chart {
            kind: ChartKind::Line,
            y_axis_title: DAYS_AXIS,
            points: provider_daily_run_out(rows, tz)
                .into_iter()
                .map(|(day, run_out)| ChartPoint {
                    label: day.format(DAY_FORMAT).to_string(),
                    value: days_until(run_out, today),
                })
                .collect(),
        },
        Viewer::Aggregator => Chart {
            kind: ChartKind::Bar,
            y_axis_title: DAYS_AXIS,
            points: latest_snapshots(rows, tz)
                .iter()
                .map(|snapshot| ChartPoint {
                    label: snapshot_label(snapshot, tz),
                    value: days_until(
                        snapshot.rows.iter().filter_map(|r| r.projected_run_out).max(),
                        today,
                    ),
                })
                .collect(),
        },
    }
}

/// Builds every dashboard view from rows already scoped to the viewer and
/// the selected category.
pub fn build(
    viewer: Viewer,
    category: Option<PpeCategory>,
    rows: &[InventoryRecord],
    provider_names: Vec<String>,
    tz: Tz,
    today: NaiveDate,
) -> DashboardView {
    let org_selector = OrgSelector {
        visible: viewer == Viewer::Aggregator,
        options: if viewer == Viewer::Aggregator {
            provider_names
        } else {
            Vec::new()
        },
    };

    let rows: &[InventoryRecord] = match category {
        Some(category) => {
            debug_assert!(rows.iter().all(|r| r.item_type == category));
            rows
        }
        None => &[],
    };

    DashboardView {
        message: category.is_none().then_some(SELECT_CATEGORY_MESSAGE),
        org_selector,
        table: table_rows(rows, tz),
        current_inventory: count_chart(viewer, rows, Metric::CurrentInventory, tz),
        projected_daily_use: count_chart(viewer, rows, Metric::ProjectedDailyUse, tz),
        days_remaining: days_remaining_chart(viewer, rows, tz, today),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(id: i64, org: (i64, &str), at: DateTime<Utc>, number: i64) -> InventoryRecord {
        InventoryRecord {
            id,
            organization_id: org.0,
            organization_name: org.1.to_string(),
            user_id: 1,
            ppe_type_id: 1,
            item_type: PpeCategory::Gloves,
            item_attribute: "Nitrile".into(),
            size: "Large".into(),
            number,
            item_number: String::new(),
            daily_use: None,
            projected_daily_use: None,
            projected_run_out: None,
            comments: String::new(),
            timestamp: at,
        }
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    const P: (i64, &str) = (10, "Mercy Hospital");
    const P1: (i64, &str) = (11, "Alpha Clinic");
    const P2: (i64, &str) = (12, "Beta Clinic");

    #[test]
    fn test_provider_sums_same_local_day() {
        let rows = vec![row(1, P, at(2024, 1, 1, 9), 5), row(2, P, at(2024, 1, 1, 15), 3)];
        let totals = provider_daily_totals(&rows, Metric::CurrentInventory, Tz::UTC);
        assert_eq!(totals, vec![(day(2024, 1, 1), 8)]);

        let chart = count_chart(Viewer::Provider, &rows, Metric::CurrentInventory, Tz::UTC);
        assert_eq!(chart.kind, ChartKind::Line);
        assert_eq!(
            chart.points,
            vec![ChartPoint {
                label: "Mon, 2024-01-01".into(),
                value: 8
            }]
        );
    }

    #[test]
    fn test_provider_days_follow_viewer_timezone() {
        // 03:00 UTC on Jan 2 is still Jan 1 in New York.
        let rows = vec![row(1, P, at(2024, 1, 1, 20), 5), row(2, P, at(2024, 1, 2, 3), 3)];
        let ny = chrono_tz::America::New_York;
        assert_eq!(
            provider_daily_totals(&rows, Metric::CurrentInventory, ny),
            vec![(day(2024, 1, 1), 8)]
        );
        assert_eq!(
            provider_daily_totals(&rows, Metric::CurrentInventory, Tz::UTC),
            vec![(day(2024, 1, 1), 5), (day(2024, 1, 2), 3)]
        );
    }

    #[test]
    fn test_missing_values_add_nothing() {
        let mut a = row(1, P, at(2024, 1, 1, 9), 5);
        a.projected_daily_use = Some(4);
        let b = row(2, P, at(2024, 1, 1, 10), 3);
        let c = row(3, P, at(2024, 1, 2, 10), 3);
        let totals = provider_daily_totals(&[a, b, c], Metric::ProjectedDailyUse, Tz::UTC);
        assert_eq!(totals, vec![(day(2024, 1, 1), 4), (day(2024, 1, 2), 0)]);
    }

    #[test]
    fn test_aggregator_bars_use_each_providers_latest_day() {
        let rows = vec![
            row(1, P1, at(2024, 1, 1, 8), 100),
            row(2, P1, at(2024, 1, 2, 8), 4),
            row(3, P1, at(2024, 1, 2, 12), 6),
            row(4, P2, at(2024, 1, 1, 9), 7),
        ];
        let chart = count_chart(Viewer::Aggregator, &rows, Metric::CurrentInventory, Tz::UTC);
        assert_eq!(chart.kind, ChartKind::Bar);
        assert_eq!(
            chart.points,
            vec![
                ChartPoint {
                    label: "Alpha Clinic<br>Tue, 2024-01-02".into(),
                    value: 10
                },
                ChartPoint {
                    label: "Beta Clinic<br>Mon, 2024-01-01".into(),
                    value: 7
                },
            ]
        );
    }

    #[test]
    fn test_aggregator_latest_day_follows_viewer_timezone() {
        // Both rows fall on Mon, Jan 1 in New York; in UTC only the later one is latest.
        let rows = vec![row(1, P1, at(2024, 1, 1, 20), 5), row(2, P1, at(2024, 1, 2, 3), 3)];
        let ny = chrono_tz::America::New_York;

        let snapshots = latest_snapshots(&rows, ny);
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].rows.len(), 2);

        let chart = count_chart(Viewer::Aggregator, &rows, Metric::CurrentInventory, ny);
        assert_eq!(
            chart.points,
            vec![ChartPoint {
                label: "Alpha Clinic<br>Mon, 2024-01-01".into(),
                value: 8
            }]
        );

        let chart = count_chart(Viewer::Aggregator, &rows, Metric::CurrentInventory, Tz::UTC);
        assert_eq!(
            chart.points,
            vec![ChartPoint {
                label: "Alpha Clinic<br>Tue, 2024-01-02".into(),
                value: 3
            }]
        );
    }

    #[test]
    fn test_sums_saturate_instead_of_overflowing() {
        let rows = vec![
            row(1, P1, at(2024, 1, 1, 9), i64::MAX - 1),
            row(2, P1, at(2024, 1, 1, 10), i64::MAX - 1),
        ];
        assert_eq!(
            provider_daily_totals(&rows, Metric::CurrentInventory, Tz::UTC),
            vec![(day(2024, 1, 1), i64::MAX)]
        );
        let chart = count_chart(Viewer::Aggregator, &rows, Metric::CurrentInventory, Tz::UTC);
        assert_eq!(chart.points[0].value, i64::MAX);
    }

    #[test]
    fn test_aggregator_without_data_renders_empty_chart() {
        let chart = count_chart(Viewer::Aggregator, &[], Metric::CurrentInventory, Tz::UTC);
        assert!(chart.points.is_empty());
        let chart = days_remaining_chart(Viewer::Aggregator, &[], Tz::UTC, day(2024, 1, 1));
        assert!(chart.points.is_empty());
    }

    #[test]
    fn test_days_remaining_provider_keeps_max_date() {
        let mut a = row(1, P, at(2024, 1, 1, 9), 5);
        a.projected_run_out = Some(day(2024, 1, 11));
        let mut b = row(2, P, at(2024, 1, 1, 10), 5);
        b.projected_run_out = Some(day(2024, 1, 6));
        let c = row(3, P, at(2024, 1, 2, 10), 5);

        let chart = days_remaining_chart(Viewer::Provider, &[a, b, c], Tz::UTC, day(2024, 1, 1));
        let values: Vec<i64> = chart.points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![10, 0]);
        assert_eq!(chart.y_axis_title, "Number of Days");
    }

    #[test]
    fn test_days_remaining_aggregator_uses_latest_day_rows() {
        let mut old = row(1, P1, at(2024, 1, 1, 9), 5);
        old.projected_run_out = Some(day(2024, 3, 1));
        let mut new = row(2, P1, at(2024, 1, 5, 9), 5);
        new.projected_run_out = Some(day(2024, 1, 3));

        let chart =
            days_remaining_chart(Viewer::Aggregator, &[old, new], Tz::UTC, day(2024, 1, 5));
        assert_eq!(chart.points.len(), 1);
        assert_eq!(chart.points[0].value, -2);
    }

    #[test]
    fn test_anomaly_flag() {
        assert!(is_anomalous(Some(10), Some(16)));
        assert!(!is_anomalous(Some(10), Some(15)));
        assert!(!is_anomalous(Some(0), Some(5)));
        assert!(!is_anomalous(None, Some(5)));
        assert!(!is_anomalous(Some(5), None));
    }

    #[test]
    fn test_table_is_newest_first_and_flags_rows() {
        let mut old = row(1, P, at(2024, 1, 1, 9), 5);
        old.daily_use = Some(0);
        old.projected_daily_use = Some(5);
        let mut new = row(2, P, at(2024, 1, 3, 9), 7);
        new.daily_use = Some(2);
        new.projected_daily_use = Some(4);

        let table = table_rows(&[old, new], Tz::UTC);
        assert_eq!(table[0].quantity, 7);
        assert!(table[0].flagged);
        assert!(!table[1].flagged);
        assert_eq!(table[1].category, "Gloves");
    }

    #[test]
    fn test_build_without_category_shows_message() {
        let view = build(
            Viewer::Aggregator,
            None,
            &[],
            vec!["Alpha Clinic".into()],
            Tz::UTC,
            day(2024, 1, 1),
        );
        assert_eq!(view.message, Some(SELECT_CATEGORY_MESSAGE));
        assert!(view.table.is_empty());
        assert!(view.org_selector.visible);
        assert_eq!(view.org_selector.options, vec!["Alpha Clinic".to_string()]);
    }

    #[test]
    fn test_org_selector_hidden_for_providers_and_unaffiliated() {
        for viewer in [Viewer::Provider, Viewer::Unaffiliated] {
            let view = build(
                viewer,
                Some(PpeCategory::Gloves),
                &[],
                vec!["ignored".into()],
                Tz::UTC,
                day(2024, 1, 1),
            );
            assert!(!view.org_selector.visible);
            assert!(view.org_selector.options.is_empty());
            assert_eq!(view.message, None);
        }
    }

    #[test]
    fn test_unaffiliated_sees_table_but_no_charts() {
        let rows = vec![row(1, P, at(2024, 1, 1, 9), 5)];
        let view = build(
            Viewer::Unaffiliated,
            Some(PpeCategory::Gloves),
            &rows,
            Vec::new(),
            Tz::UTC,
            day(2024, 1, 1),
        );
        assert_eq!(view.table.len(), 1);
        assert!(view.current_inventory.points.is_empty());
    }
}
