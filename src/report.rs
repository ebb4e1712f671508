//! Read-side aggregation over the task set.
//!
//! Everything here is a pure function of the tasks it is handed: no mutation,
//! no clocks, no store access. Day bucketing is anchored to the *viewer's*
//! local midnight (the caller passes its UTC offset), so a log entry written
//! at 23:59 never drifts into the next day's bucket on an exported report.

use crate::board::{Category, Status, Tariff, Task, User};
use chrono::{Datelike, FixedOffset, NaiveDate, TimeZone, Weekday};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Daily SKU norm per person; the KPI target is business days × this.
pub const DAILY_SKU_NORM: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportTarget {
    All,
    User(Uuid),
}

impl ReportTarget {
    fn matches(self, user_id: Uuid) -> bool {
        match self {
            ReportTarget::All => true,
            ReportTarget::User(id) => id == user_id,
        }
    }
}

/// Closed calendar range, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |d| *d <= self.end)
    }
}

/// The local calendar day a timestamp falls in, for the given viewer offset.
fn local_date(ts_ms: i64, tz: FixedOffset) -> Option<NaiveDate> {
    tz.timestamp_millis_opt(ts_ms).single().map(|dt| dt.date_naive())
}

/// Seconds attributed to one log entry: total task time divided evenly across
/// its units. An accepted approximation: time is not tracked per unit.
/// Negative counts (barcode undo) attribute negative time, keeping day sums
/// honest.
pub fn attributed_seconds(task: &Task, count: i64) -> i64 {
    if task.time_spent_seconds == 0 {
        return 0;
    }
    let per_sku = task.time_spent_seconds as f64 / task.sku_quantity.max(1) as f64;
    (per_sku * count as f64).round() as i64
}

// ── Day buckets ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySlice {
    pub category: Category,
    pub tariff: Option<Tariff>,
    pub sku: i64,
    pub time_spent_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayBucket {
    pub date: NaiveDate,
    pub total_sku: i64,
    pub slices: Vec<CategorySlice>,
}

/// Scan every task's ledger for entries by the target user inside the range
/// and group them by local calendar day. Buckets come back newest-first;
/// slices within a bucket keep first-seen (category, tariff) order.
pub fn day_buckets(
    tasks: &[Task],
    target: ReportTarget,
    range: DateRange,
    tz: FixedOffset,
) -> Vec<DayBucket> {
    let mut by_date: BTreeMap<NaiveDate, DayBucket> = BTreeMap::new();

    for task in tasks {
        for log in &task.sku_history {
            if !target.matches(log.user_id) {
                continue;
            }
            let Some(date) = local_date(log.timestamp_ms, tz) else {
                continue;
            };
            if !range.contains(date) {
                continue;
            }

            let bucket = by_date.entry(date).or_insert_with(|| DayBucket {
                date,
                total_sku: 0,
                slices: Vec::new(),
            });
            bucket.total_sku += log.count;

            let time = attributed_seconds(task, log.count);
            match bucket
                .slices
                .iter_mut()
                .find(|s| s.category == task.category && s.tariff == task.tariff)
            {
                Some(slice) => {
                    slice.sku += log.count;
                    slice.time_spent_seconds += time;
                }
                None => bucket.slices.push(CategorySlice {
                    category: task.category,
                    tariff: task.tariff,
                    sku: log.count,
                    time_spent_seconds: time,
                }),
            }
        }
    }

    by_date.into_values().rev().collect()
}

// ── Category totals ───────────────────────────────────────────

pub fn category_totals(buckets: &[DayBucket]) -> BTreeMap<Category, i64> {
    let mut totals = BTreeMap::new();
    for bucket in buckets {
        for slice in &bucket.slices {
            *totals.entry(slice.category).or_insert(0) += slice.sku;
        }
    }
    totals
}

/// Share of the grand total per category, for proportion bars.
/// Zero-safe: an empty or net-zero period yields 0.0 shares.
pub fn category_shares(totals: &BTreeMap<Category, i64>) -> Vec<(Category, f64)> {
    let grand: i64 = totals.values().sum();
    totals
        .iter()
        .map(|(&cat, &sku)| {
            let share = if grand > 0 {
                sku as f64 / grand as f64
            } else {
                0.0
            };
            (cat, share)
        })
        .collect()
}

// ── KPI ────────────────────────────────────────────────────────

/// Weekdays (Mon–Fri) inside the range.
pub fn business_days(range: DateRange) -> i64 {
    range
        .days()
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .count() as i64
}

pub fn kpi_target(range: DateRange) -> i64 {
    business_days(range) * DAILY_SKU_NORM
}

/// Progress toward the target in percent, capped at 100.
/// A zero target (weekend-only range) is 0, never a division error.
pub fn kpi_progress(total_sku: i64, target_sku: i64) -> f64 {
    if target_sku <= 0 {
        return 0.0;
    }
    (total_sku as f64 / target_sku as f64 * 100.0).min(100.0)
}

/// Done tasks assigned to the target whose completion lands in the range.
pub fn closed_task_count(
    tasks: &[Task],
    target: ReportTarget,
    range: DateRange,
    tz: FixedOffset,
) -> usize {
    tasks
        .iter()
        .filter(|t| t.status == Status::Done)
        .filter(|t| match target {
            ReportTarget::All => true,
            ReportTarget::User(id) => t.is_assignee(id),
        })
        .filter(|t| {
            t.completed_at_ms
                .and_then(|ts| local_date(ts, tz))
                .is_some_and(|d| range.contains(d))
        })
        .count()
}

// ── Flat registry ─────────────────────────────────────────────

/// One row per ledger entry: the all-users registry export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryRow {
    pub date: NaiveDate,
    pub user_name: String,
    pub task_title: String,
    pub category: Category,
    pub tariff: Option<Tariff>,
    pub is_first_party: bool,
    pub sku_count: i64,
    pub time_seconds: i64,
}

pub fn registry_rows(
    tasks: &[Task],
    users: &[User],
    target: ReportTarget,
    range: DateRange,
    tz: FixedOffset,
) -> Vec<RegistryRow> {
    let mut rows = Vec::new();
    for task in tasks {
        for log in &task.sku_history {
            if !target.matches(log.user_id) {
                continue;
            }
            let Some(date) = local_date(log.timestamp_ms, tz) else {
                continue;
            };
            if !range.contains(date) {
                continue;
            }

            let user_name = users
                .iter()
                .find(|u| u.id == log.user_id)
                .map(|u| u.display_name.clone())
                .unwrap_or_else(|| "Unknown".to_string());

            rows.push(RegistryRow {
                date,
                user_name,
                task_title: task.title.clone(),
                category: task.category,
                tariff: task.tariff,
                is_first_party: task.is_first_party,
                sku_count: log.count,
                time_seconds: attributed_seconds(task, log.count),
            });
        }
    }
    rows.sort_by(|a, b| b.date.cmp(&a.date));
    rows
}

// ── Rendering ─────────────────────────────────────────────────

pub fn category_label(category: Category, tariff: Option<Tariff>) -> String {
    let base = match category {
        Category::Photo => "Photo",
        Category::Retouch => "Retouch",
        Category::Infographic => "Infographic",
        Category::Project => "Project",
    };
    match tariff {
        Some(Tariff::Lite) => format!("{base} (Lite)"),
        Some(Tariff::Standard) => format!("{base} (Standard)"),
        Some(Tariff::Premium) => format!("{base} (Premium)"),
        None => base.to_string(),
    }
}

pub fn format_time(seconds: i64) -> String {
    let sign = if seconds < 0 { "-" } else { "" };
    let s = seconds.abs();
    let h = s / 3600;
    let m = (s % 3600) / 60;
    if h > 0 {
        format!("{sign}{h}h {m}m")
    } else {
        format!("{sign}{m}m")
    }
}

fn csv_field(raw: &str) -> String {
    if raw.contains(',') || raw.contains('"') || raw.contains('\n') {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

/// The spreadsheet surface: UTF-8 BOM so spreadsheet apps pick up the
/// encoding, one row per ledger entry.
pub fn registry_csv(rows: &[RegistryRow]) -> String {
    let mut out = String::from("\u{feff}Date,User,Task,Category,Tariff,1P,SKU,Time\n");
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{}\n",
            row.date,
            csv_field(&row.user_name),
            csv_field(&row.task_title),
            category_label(row.category, None),
            row.tariff
                .map(|t| format!("{t:?}"))
                .unwrap_or_else(|| "-".to_string()),
            if row.is_first_party { "Yes" } else { "No" },
            row.sku_count,
            format_time(row.time_seconds),
        ));
    }
    out
}

/// The per-user breakdown as printable text: header, period, total, one line
/// per day with its category slices.
pub fn user_report_text(user_name: &str, range: DateRange, buckets: &[DayBucket]) -> String {
    let total: i64 = buckets.iter().map(|b| b.total_sku).sum();
    let mut out = format!(
        "Report: {user_name}\nPeriod: {} - {}\nTotal SKU: {total}\n\n",
        range.start, range.end
    );
    for bucket in buckets {
        let detail = bucket
            .slices
            .iter()
            .map(|s| format!("{}: {}", category_label(s.category, s.tariff), s.sku))
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!("{}  {:>5}  {}\n", bucket.date, bucket.total_sku, detail));
    }
    out
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::SkuLog;

    fn tz_east(hours: i32) -> FixedOffset {
        FixedOffset::east_opt(hours * 3600).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn task_with_logs(
        category: Category,
        tariff: Option<Tariff>,
        quantity: u32,
        time_spent: i64,
        logs: Vec<SkuLog>,
    ) -> Task {
        let creator = Uuid::new_v4();
        Task {
            id: Uuid::new_v4(),
            title: "Batch".into(),
            description: String::new(),
            status: Status::Partial,
            category,
            tariff,
            is_first_party: false,
            sku_quantity: quantity,
            completed_sku: logs.iter().map(|l| l.count).sum::<i64>().max(0),
            sku_history: logs,
            product_id: None,
            barcodes: Vec::new(),
            completed_barcodes: Vec::new(),
            source_link: None,
            result_link: None,
            assignee_ids: vec![creator],
            creator_id: creator,
            deadline: date(2026, 3, 31),
            time_spent_seconds: time_spent,
            last_tracking_start_ms: None,
            completed_at_ms: None,
            created_at_ms: 0,
            comments: Vec::new(),
        }
    }

    fn at_local(tz: FixedOffset, y: i32, m: u32, d: u32, hh: u32, mm: u32) -> i64 {
        tz.with_ymd_and_hms(y, m, d, hh, mm, 0)
            .single()
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn bucketing_splits_at_local_midnight() {
        // 23:59 and next-day 00:01 local must land in different buckets,
        // whatever the UTC offset.
        for tz in [tz_east(5), tz_east(-11), tz_east(0), tz_east(14)] {
            let user = Uuid::new_v4();
            let task = task_with_logs(
                Category::Photo,
                None,
                10,
                0,
                vec![
                    SkuLog {
                        timestamp_ms: at_local(tz, 2026, 3, 2, 23, 59),
                        count: 3,
                        user_id: user,
                    },
                    SkuLog {
                        timestamp_ms: at_local(tz, 2026, 3, 3, 0, 1),
                        count: 4,
                        user_id: user,
                    },
                ],
            );
            let range = DateRange {
                start: date(2026, 3, 1),
                end: date(2026, 3, 31),
            };
            let buckets = day_buckets(&[task], ReportTarget::User(user), range, tz);
            assert_eq!(buckets.len(), 2, "offset {tz:?}");
            // Newest first.
            assert_eq!(buckets[0].date, date(2026, 3, 3));
            assert_eq!(buckets[0].total_sku, 4);
            assert_eq!(buckets[1].date, date(2026, 3, 2));
            assert_eq!(buckets[1].total_sku, 3);
        }
    }

    #[test]
    fn buckets_filter_by_user_and_range() {
        let tz = tz_east(0);
        let target = Uuid::new_v4();
        let other = Uuid::new_v4();
        let task = task_with_logs(
            Category::Retouch,
            None,
            10,
            0,
            vec![
                SkuLog {
                    timestamp_ms: at_local(tz, 2026, 3, 2, 12, 0),
                    count: 5,
                    user_id: target,
                },
                SkuLog {
                    timestamp_ms: at_local(tz, 2026, 3, 2, 13, 0),
                    count: 7,
                    user_id: other,
                },
                SkuLog {
                    timestamp_ms: at_local(tz, 2026, 4, 2, 12, 0),
                    count: 9,
                    user_id: target,
                },
            ],
        );
        let range = DateRange {
            start: date(2026, 3, 1),
            end: date(2026, 3, 31),
        };

        let buckets = day_buckets(&[task.clone()], ReportTarget::User(target), range, tz);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].total_sku, 5);

        // All-users view picks up both March entries.
        let all = day_buckets(&[task], ReportTarget::All, range, tz);
        assert_eq!(all[0].total_sku, 12);
    }

    #[test]
    fn slices_group_by_category_and_tariff() {
        let tz = tz_east(3);
        let user = Uuid::new_v4();
        let ts = at_local(tz, 2026, 3, 2, 10, 0);
        let mk_log = |count| SkuLog {
            timestamp_ms: ts,
            count,
            user_id: user,
        };
        let photo = task_with_logs(Category::Photo, None, 10, 0, vec![mk_log(2), mk_log(3)]);
        let info = task_with_logs(
            Category::Infographic,
            Some(Tariff::Lite),
            10,
            0,
            vec![mk_log(1)],
        );
        let range = DateRange {
            start: date(2026, 3, 2),
            end: date(2026, 3, 2),
        };

        let buckets = day_buckets(&[photo, info], ReportTarget::User(user), range, tz);
        assert_eq!(buckets.len(), 1);
        let bucket = &buckets[0];
        assert_eq!(bucket.total_sku, 6);
        assert_eq!(bucket.slices.len(), 2);
        assert_eq!(bucket.slices[0].category, Category::Photo);
        assert_eq!(bucket.slices[0].sku, 5);
        assert_eq!(bucket.slices[1].tariff, Some(Tariff::Lite));

        let totals = category_totals(&buckets);
        assert_eq!(totals[&Category::Photo], 5);
        assert_eq!(totals[&Category::Infographic], 1);

        let shares = category_shares(&totals);
        let photo_share = shares
            .iter()
            .find(|(c, _)| *c == Category::Photo)
            .unwrap()
            .1;
        assert!((photo_share - 5.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn time_attribution_is_proportional() {
        let user = Uuid::new_v4();
        let task = task_with_logs(
            Category::Photo,
            None,
            12,
            3600,
            vec![SkuLog {
                timestamp_ms: 0,
                count: 6,
                user_id: user,
            }],
        );
        assert_eq!(attributed_seconds(&task, 6), 1800);
        assert_eq!(attributed_seconds(&task, -1), -300);

        // Untracked tasks attribute nothing.
        let idle = task_with_logs(Category::Photo, None, 12, 0, Vec::new());
        assert_eq!(attributed_seconds(&idle, 6), 0);
    }

    #[test]
    fn kpi_target_counts_business_days() {
        // 2026-03-02 is a Monday; two full weeks → 10 business days.
        let range = DateRange {
            start: date(2026, 3, 2),
            end: date(2026, 3, 15),
        };
        assert_eq!(business_days(range), 10);
        assert_eq!(kpi_target(range), 500);
        assert!((kpi_progress(250, 500) - 50.0).abs() < 1e-9);
        assert!((kpi_progress(9999, 500) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn kpi_progress_is_zero_safe() {
        // Saturday + Sunday only: zero business days, zero target.
        let range = DateRange {
            start: date(2026, 3, 7),
            end: date(2026, 3, 8),
        };
        assert_eq!(kpi_target(range), 0);
        assert_eq!(kpi_progress(40, kpi_target(range)), 0.0);
    }

    #[test]
    fn closed_count_respects_assignee_and_range() {
        let tz = tz_east(0);
        let user = Uuid::new_v4();
        let mut done = task_with_logs(Category::Photo, None, 1, 0, Vec::new());
        done.status = Status::Done;
        done.assignee_ids = vec![user];
        done.completed_at_ms = Some(at_local(tz, 2026, 3, 5, 18, 0));

        let mut outside = done.clone();
        outside.id = Uuid::new_v4();
        outside.completed_at_ms = Some(at_local(tz, 2026, 4, 5, 18, 0));

        let mut open = done.clone();
        open.id = Uuid::new_v4();
        open.status = Status::Partial;

        let tasks = vec![done, outside, open];
        let range = DateRange {
            start: date(2026, 3, 1),
            end: date(2026, 3, 31),
        };
        assert_eq!(closed_task_count(&tasks, ReportTarget::User(user), range, tz), 1);
        assert_eq!(
            closed_task_count(&tasks, ReportTarget::User(Uuid::new_v4()), range, tz),
            0
        );
    }

    #[test]
    fn registry_rows_flatten_and_sort() {
        let tz = tz_east(0);
        let worker = User {
            id: Uuid::new_v4(),
            login: "ph1".into(),
            display_name: "Marat".into(),
            role: crate::board::Role::Photographer,
            password_hash: String::new(),
            is_admin: false,
            bio: None,
            profile_comments: Vec::new(),
            online_since_ms: None,
            last_active_ms: None,
        };
        let task = task_with_logs(
            Category::Photo,
            None,
            10,
            600,
            vec![
                SkuLog {
                    timestamp_ms: at_local(tz, 2026, 3, 2, 9, 0),
                    count: 4,
                    user_id: worker.id,
                },
                SkuLog {
                    timestamp_ms: at_local(tz, 2026, 3, 4, 9, 0),
                    count: 6,
                    user_id: worker.id,
                },
            ],
        );
        let range = DateRange {
            start: date(2026, 3, 1),
            end: date(2026, 3, 31),
        };

        let rows = registry_rows(
            &[task],
            std::slice::from_ref(&worker),
            ReportTarget::All,
            range,
            tz,
        );
        assert_eq!(rows.len(), 2);
        // Newest first, names resolved, time proportional.
        assert_eq!(rows[0].date, date(2026, 3, 4));
        assert_eq!(rows[0].user_name, "Marat");
        assert_eq!(rows[0].sku_count, 6);
        assert_eq!(rows[0].time_seconds, 360);

        let csv = registry_csv(&rows);
        assert!(csv.starts_with('\u{feff}'));
        assert!(csv.contains("Date,User,Task,Category,Tariff,1P,SKU,Time"));
        assert!(csv.contains("2026-03-04,Marat,Batch,Photo,-,No,6,6m"));
    }

    #[test]
    fn user_report_text_carries_the_breakdown() {
        let tz = tz_east(0);
        let user = Uuid::new_v4();
        let task = task_with_logs(
            Category::Infographic,
            Some(Tariff::Premium),
            5,
            0,
            vec![SkuLog {
                timestamp_ms: at_local(tz, 2026, 3, 2, 9, 0),
                count: 5,
                user_id: user,
            }],
        );
        let range = DateRange {
            start: date(2026, 3, 1),
            end: date(2026, 3, 31),
        };
        let buckets = day_buckets(&[task], ReportTarget::User(user), range, tz);
        let text = user_report_text("Ana", range, &buckets);
        assert!(text.contains("Report: Ana"));
        assert!(text.contains("Total SKU: 5"));
        assert!(text.contains("Infographic (Premium): 5"));
    }
}
