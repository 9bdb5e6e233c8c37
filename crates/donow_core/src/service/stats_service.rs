//! Per-user item statistics.
//!
//! Weeks start on Monday; all boundaries are computed in UTC.

use crate::model::item::{Item, ItemType};
use crate::repo::item_repo::{ItemListQuery, ItemRepository};
use crate::service::item_service::ServiceResult;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use log::info;
use serde::Serialize;

/// Counters for one owner at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemStats {
    pub task_total: usize,
    pub task_completed: usize,
    pub event_total: usize,
    /// Events between the start of this week and `generated_at`.
    pub event_this_week: usize,
    /// Events from the start of this month onwards.
    pub event_this_month: usize,
    pub item_total: usize,
    pub item_completed: usize,
    /// Unix epoch milliseconds.
    pub generated_at: i64,
}

pub struct StatsService<R: ItemRepository> {
    repo: R,
}

impl<R: ItemRepository> StatsService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Computes statistics over every item owned by `owner_id`.
    pub fn stats_for(&self, owner_id: &str, now: DateTime<Utc>) -> ServiceResult<ItemStats> {
        let items = self.repo.list_items(&ItemListQuery {
            owner_id: Some(owner_id.to_string()),
            ..ItemListQuery::default()
        })?;
        let stats = compute_stats(&items, now);
        info!(
            "event=stats module=stats_service status=ok items={} tasks={} events={}",
            stats.item_total, stats.task_total, stats.event_total
        );
        Ok(stats)
    }
}

/// Pure aggregation over already loaded items.
pub fn compute_stats(items: &[Item], now: DateTime<Utc>) -> ItemStats {
    let now_ms = now.timestamp_millis();
    let week_start = start_of_week(now);
    let month_start = start_of_month(now);

    let tasks = items.iter().filter(|item| item.kind == ItemType::Task);
    let events: Vec<&Item> = items
        .iter()
        .filter(|item| item.kind == ItemType::Event)
        .collect();

    ItemStats {
        task_total: tasks.clone().count(),
        task_completed: tasks.filter(|item| item.is_completed).count(),
        event_total: events.len(),
        event_this_week: events
            .iter()
            .filter_map(|item| item.event_time)
            .filter(|time| (week_start..=now_ms).contains(time))
            .count(),
        event_this_month: events
            .iter()
            .filter_map(|item| item.event_time)
            .filter(|time| *time >= month_start)
            .count(),
        item_total: items.len(),
        item_completed: items.iter().filter(|item| item.is_completed).count(),
        generated_at: now_ms,
    }
}

fn start_of_week(now: DateTime<Utc>) -> i64 {
    let date = now.date_naive();
    let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
    midnight_ms(monday)
}

fn start_of_month(now: DateTime<Utc>) -> i64 {
    let date = now.date_naive();
    let first = NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date);
    midnight_ms(first)
}

fn midnight_ms(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc().timestamp_millis())
        .unwrap_or_default()
}
