use crate::model::{ActiveActivity, TaskHistoryEntry, UsageLedger, DEFAULT_TASK_COLOR};
use serde::Serialize;
use std::collections::BTreeMap;

/// Ledger entries that never show up in stats.
const HIDDEN_SITES: &[&str] = &["newtab"];

/// Counting stops while tracking is paused, and for any URL that hits an
/// exception of any running activity, whatever its category.
pub fn count_suppressed(url: &str, activities: &[ActiveActivity], paused: bool) -> bool {
    paused || activities.iter().any(|a| a.exception_matches(url))
}

/// Adds one second to `ledger[date][domain]`, creating the entry at zero first.
pub fn record_second(ledger: &mut UsageLedger, date: &str, domain: &str) -> i64 {
    let seconds = ledger
        .entry(date.to_string())
        .or_default()
        .entry(domain.to_string())
        .or_insert(0);
    *seconds += 1;
    *seconds
}

pub fn credit_seconds(ledger: &mut UsageLedger, date: &str, name: &str, seconds: i64) {
    *ledger
        .entry(date.to_string())
        .or_default()
        .entry(name.to_string())
        .or_insert(0) += seconds.max(0);
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SiteUsage {
    pub site: String,
    pub seconds: i64,
    pub percent: f64,
    pub clock: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DaySummary {
    pub date: String,
    pub total_seconds: i64,
    pub sites: Vec<SiteUsage>,
}

pub fn day_summary(ledger: &UsageLedger, date: &str) -> DaySummary {
    let mut entries: Vec<(String, i64)> = ledger
        .get(date)
        .map(|day| {
            day.iter()
                .filter(|(site, _)| !HIDDEN_SITES.contains(&site.as_str()))
                .map(|(site, secs)| (site.clone(), *secs))
                .collect()
        })
        .unwrap_or_default();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let total_seconds: i64 = entries.iter().map(|(_, s)| *s).sum();
    let sites = entries
        .into_iter()
        .map(|(site, seconds)| SiteUsage {
            percent: percent_of(seconds, total_seconds),
            clock: fmt_clock(seconds),
            site,
            seconds,
        })
        .collect();

    DaySummary {
        date: date.to_string(),
        total_seconds,
        sites,
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TaskShare {
    pub name: String,
    pub seconds: i64,
    pub color: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HistorySummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    pub tasks_completed: usize,
    pub total_seconds: i64,
    pub distribution: Vec<TaskShare>,
}

/// Completed-task totals for one day, or for all time when `date` is `None`.
pub fn history_summary(history: &[TaskHistoryEntry], date: Option<&str>) -> HistorySummary {
    let tasks: Vec<&TaskHistoryEntry> = history
        .iter()
        .filter(|t| date.map_or(true, |d| t.date == d))
        .collect();

    let mut by_name: BTreeMap<&str, TaskShare> = BTreeMap::new();
    let mut total_seconds = 0;
    for t in &tasks {
        let secs = ((t.end_time - t.start_time) / 1000).max(0);
        total_seconds += secs;
        by_name
            .entry(t.name.as_str())
            .or_insert_with(|| TaskShare {
                name: t.name.clone(),
                seconds: 0,
                color: t
                    .color
                    .clone()
                    .unwrap_or_else(|| DEFAULT_TASK_COLOR.to_string()),
            })
            .seconds += secs;
    }

    let mut distribution: Vec<TaskShare> = by_name.into_values().collect();
    distribution.sort_by(|a, b| b.seconds.cmp(&a.seconds).then_with(|| a.name.cmp(&b.name)));

    HistorySummary {
        date: date.map(str::to_string),
        tasks_completed: tasks.len(),
        total_seconds,
        distribution,
    }
}

fn percent_of(part: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    (part as f64 * 10_000.0 / total as f64).round() / 100.0
}

/// `00h 00m 00s`
pub fn fmt_clock(seconds: i64) -> String {
    let s = seconds.max(0);
    format!("{:02}h {:02}m {:02}s", s / 3600, (s % 3600) / 60, s % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Activity;

    fn with_exceptions(ex: &[&str]) -> ActiveActivity {
        ActiveActivity {
            template: Activity {
                id: "a".to_string(),
                exceptions: ex.iter().map(|s| s.to_string()).collect(),
                ..Activity::default()
            },
            start_time: 0,
            end_time: None,
        }
    }

    #[test]
    fn exception_of_any_activity_suppresses_counting() {
        let acts = vec![with_exceptions(&[]), with_exceptions(&["/allowed"])];
        assert!(count_suppressed("https://news.example.com/allowed/page", &acts, false));
        assert!(!count_suppressed("https://news.example.com/other", &acts, false));
        assert!(count_suppressed("https://news.example.com/other", &acts, true));
        assert!(!count_suppressed("https://news.example.com/allowed", &[], false));
    }

    #[test]
    fn record_second_adds_exactly_one() {
        let mut ledger = UsageLedger::new();
        assert_eq!(record_second(&mut ledger, "2026-10-17", "github.com"), 1);
        assert_eq!(record_second(&mut ledger, "2026-10-17", "github.com"), 2);
        assert_eq!(record_second(&mut ledger, "2026-10-18", "github.com"), 1);
        assert_eq!(ledger["2026-10-17"]["github.com"], 2);
    }

    #[test]
    fn day_summary_sorts_and_hides_newtab() {
        let mut ledger = UsageLedger::new();
        let day = ledger.entry("2026-10-17".to_string()).or_default();
        day.insert("newtab".to_string(), 500);
        day.insert("a.com".to_string(), 100);
        day.insert("b.com".to_string(), 300);

        let s = day_summary(&ledger, "2026-10-17");
        assert_eq!(s.total_seconds, 400);
        assert_eq!(s.sites.len(), 2);
        assert_eq!(s.sites[0].site, "b.com");
        assert_eq!(s.sites[0].percent, 75.0);
        assert_eq!(s.sites[1].percent, 25.0);
        assert_eq!(s.sites[0].clock, "00h 05m 00s");

        assert_eq!(day_summary(&ledger, "2026-01-01").sites.len(), 0);
    }

    #[test]
    fn history_summary_filters_by_date() {
        let entry = |name: &str, date: &str, secs: i64| TaskHistoryEntry {
            name: name.to_string(),
            start_time: 0,
            end_time: secs * 1000,
            date: date.to_string(),
            color: None,
        };
        let history = vec![
            entry("Write", "2026-10-16", 600),
            entry("Write", "2026-10-17", 1200),
            entry("Read", "2026-10-17", 300),
        ];

        let day = history_summary(&history, Some("2026-10-17"));
        assert_eq!(day.tasks_completed, 2);
        assert_eq!(day.total_seconds, 1500);
        assert_eq!(day.distribution[0].name, "Write");
        assert_eq!(day.distribution[0].color, DEFAULT_TASK_COLOR);

        let all = history_summary(&history, None);
        assert_eq!(all.tasks_completed, 3);
        assert_eq!(all.distribution[0].seconds, 1800);
    }

    #[test]
    fn fmt_clock_pads() {
        assert_eq!(fmt_clock(0), "00h 00m 00s");
        assert_eq!(fmt_clock(3661), "01h 01m 01s");
    }
}
