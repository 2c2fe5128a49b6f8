use crate::model::{
    ActiveActivity, Activity, TaskFolder, TaskHistoryEntry, DEFAULT_TASK_COLOR,
};
use std::fmt;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pruned {
    pub active: Vec<ActiveActivity>,
    pub expired: Vec<ActiveActivity>,
}

impl Pruned {
    pub fn changed(&self) -> bool {
        !self.expired.is_empty()
    }
}

/// Drops activities whose `endTime` has passed. An activity is still live on
/// the exact millisecond of its `endTime`.
pub fn prune_expired(activities: Vec<ActiveActivity>, now_ms: i64) -> Pruned {
    let (active, expired): (Vec<_>, Vec<_>) = activities
        .into_iter()
        .partition(|a| a.end_time.map_or(true, |end| end >= now_ms));
    Pruned { active, expired }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleError {
    AlreadyActive(String),
    NotActive(String),
}

impl LifecycleError {
    pub fn code(&self) -> &'static str {
        match self {
            LifecycleError::AlreadyActive(_) => "already_active",
            LifecycleError::NotActive(_) => "not_active",
        }
    }
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleError::AlreadyActive(id) => write!(f, "activity {id} is already active"),
            LifecycleError::NotActive(id) => write!(f, "activity {id} is not active"),
        }
    }
}

impl std::error::Error for LifecycleError {}

pub fn start_activity(
    active: &mut Vec<ActiveActivity>,
    template: &Activity,
    now_ms: i64,
) -> Result<ActiveActivity, LifecycleError> {
    if active.iter().any(|a| a.id() == template.id) {
        return Err(LifecycleError::AlreadyActive(template.id.clone()));
    }
    let started = ActiveActivity::from_template(template, now_ms);
    active.push(started.clone());
    Ok(started)
}

pub fn stop_activity(
    active: &mut Vec<ActiveActivity>,
    id: &str,
) -> Result<ActiveActivity, LifecycleError> {
    let idx = active
        .iter()
        .position(|a| a.id() == id)
        .ok_or_else(|| LifecycleError::NotActive(id.to_string()))?;
    Ok(active.remove(idx))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub entry: TaskHistoryEntry,
    pub elapsed_seconds: i64,
}

/// Removes the activity and builds its history entry. The caller credits
/// `elapsed_seconds` to today's ledger under the activity name.
pub fn complete_activity(
    active: &mut Vec<ActiveActivity>,
    id: &str,
    now_ms: i64,
    today: &str,
    folders: &[TaskFolder],
) -> Result<Completion, LifecycleError> {
    let task = stop_activity(active, id)?;
    let elapsed_seconds = (now_ms.saturating_sub(task.start_time) / 1000).max(0);

    let color = task
        .template
        .folder_id
        .as_deref()
        .and_then(|fid| folders.iter().find(|f| f.id == fid))
        .and_then(|f| f.color.clone())
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TASK_COLOR.to_string());

    Ok(Completion {
        entry: TaskHistoryEntry {
            name: task.template.name,
            start_time: task.start_time,
            end_time: now_ms,
            date: today.to_string(),
            color: Some(color),
        },
        elapsed_seconds,
    })
}

/// Folds a legacy single `currentActivity` record into the list form.
/// Returns true when the list changed.
pub fn migrate_legacy_current(
    legacy: Option<ActiveActivity>,
    active: &mut Vec<ActiveActivity>,
) -> bool {
    match legacy {
        Some(current) if !active.iter().any(|a| a.id() == current.id()) => {
            active.push(current);
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(id: &str, start: i64, end: Option<i64>) -> ActiveActivity {
        ActiveActivity {
            template: Activity {
                id: id.to_string(),
                name: format!("task {id}"),
                ..Activity::default()
            },
            start_time: start,
            end_time: end,
        }
    }

    #[test]
    fn prune_removes_only_past_end_times() {
        let now = 10_000;
        let list = vec![
            running("open", 0, None),
            running("edge", 0, Some(now)),
            running("gone", 0, Some(now - 1)),
            running("later", 0, Some(now + 5_000)),
        ];
        let pruned = prune_expired(list, now);
        assert!(pruned.changed());
        let ids: Vec<_> = pruned.active.iter().map(|a| a.id()).collect();
        assert_eq!(ids, vec!["open", "edge", "later"]);
        assert_eq!(pruned.expired.len(), 1);
        assert_eq!(pruned.expired[0].id(), "gone");
    }

    #[test]
    fn prune_is_idempotent_at_fixed_time() {
        let now = 50_000;
        let list = vec![
            running("a", 0, Some(now - 1)),
            running("b", 0, None),
            running("c", 0, Some(now + 1)),
        ];
        let once = prune_expired(list, now);
        let twice = prune_expired(once.active.clone(), now);
        assert_eq!(once.active, twice.active);
        assert!(!twice.changed());
    }

    #[test]
    fn start_rejects_duplicates() {
        let template = Activity {
            id: "focus".to_string(),
            duration: Some(25),
            ..Activity::default()
        };
        let mut active = Vec::new();
        let started = start_activity(&mut active, &template, 1_000).unwrap();
        assert_eq!(started.end_time, Some(1_000 + 25 * 60_000));
        assert_eq!(
            start_activity(&mut active, &template, 2_000),
            Err(LifecycleError::AlreadyActive("focus".to_string()))
        );
        assert_eq!(active.len(), 1);
    }

    #[test]
    fn stop_unknown_is_not_active() {
        let mut active = vec![running("a", 0, None)];
        assert_eq!(
            stop_activity(&mut active, "b").unwrap_err().code(),
            "not_active"
        );
        assert_eq!(stop_activity(&mut active, "a").unwrap().id(), "a");
        assert!(active.is_empty());
    }

    #[test]
    fn complete_uses_folder_color_and_elapsed_seconds() {
        let mut a = running("a", 1_000, None);
        a.template.folder_id = Some("f1".to_string());
        let mut active = vec![a, running("b", 0, None)];
        let folders = vec![TaskFolder {
            id: "f1".to_string(),
            name: "Study".to_string(),
            color: Some("#ff0000".to_string()),
        }];

        let done = complete_activity(&mut active, "a", 62_500, "2026-10-17", &folders).unwrap();
        assert_eq!(done.elapsed_seconds, 61);
        assert_eq!(done.entry.name, "task a");
        assert_eq!(done.entry.start_time, 1_000);
        assert_eq!(done.entry.end_time, 62_500);
        assert_eq!(done.entry.date, "2026-10-17");
        assert_eq!(done.entry.color.as_deref(), Some("#ff0000"));
        assert_eq!(active.len(), 1);

        let done = complete_activity(&mut active, "b", 1_000, "2026-10-17", &folders).unwrap();
        assert_eq!(done.entry.color.as_deref(), Some(DEFAULT_TASK_COLOR));
    }

    #[test]
    fn legacy_current_activity_is_folded_once() {
        let mut active = vec![running("a", 0, None)];
        assert!(!migrate_legacy_current(Some(running("a", 0, None)), &mut active));
        assert!(migrate_legacy_current(Some(running("b", 0, None)), &mut active));
        assert!(!migrate_legacy_current(None, &mut active));
        assert_eq!(active.len(), 2);
    }
}
