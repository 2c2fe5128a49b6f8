use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const KEY_TRACKER_DATA: &str = "trackerData";
pub const KEY_COLLECTIONS: &str = "collections";
pub const KEY_ACTIVITIES: &str = "activities";
pub const KEY_ACTIVE_ACTIVITIES: &str = "activeActivities";
pub const KEY_TRACKING_PAUSED: &str = "trackingPaused";
pub const KEY_TRACKING_PAUSED_UNTIL: &str = "trackingPausedUntil";
pub const KEY_TASK_HISTORY: &str = "taskHistory";
pub const KEY_TASK_FOLDERS: &str = "taskFolders";
/// Single-activity record written by older builds; migrated into `activeActivities` on startup.
pub const KEY_LEGACY_CURRENT_ACTIVITY: &str = "currentActivity";

/// Keys the presentation layer may read and write through `/records/:key`.
pub const KNOWN_RECORD_KEYS: &[&str] = &[
    KEY_TRACKER_DATA,
    KEY_COLLECTIONS,
    KEY_ACTIVITIES,
    KEY_ACTIVE_ACTIVITIES,
    KEY_TRACKING_PAUSED,
    KEY_TRACKING_PAUSED_UNTIL,
    KEY_TASK_HISTORY,
    KEY_TASK_FOLDERS,
];

pub const DEFAULT_TASK_COLOR: &str = "#3b82f6";

/// date (YYYY-MM-DD, local) -> domain -> seconds
pub type UsageLedger = BTreeMap<String, BTreeMap<String, i64>>;

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Category {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub items: Vec<String>,
    #[serde(rename = "isBlocked", default)]
    pub is_blocked: bool,
    #[serde(default, alias = "colorHint", skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Activity {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Minutes. Unset (or zero) means the activity runs until stopped.
    #[serde(default, alias = "durationMinutes")]
    pub duration: Option<i64>,
    #[serde(rename = "redirectUrl", default)]
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub exceptions: Vec<String>,
    #[serde(rename = "blockedCategoryIds", default)]
    pub blocked_category_ids: Vec<String>,
    #[serde(rename = "folderId", default)]
    pub folder_id: Option<String>,
}

impl Activity {
    pub fn duration_ms(&self) -> Option<i64> {
        self.duration
            .filter(|m| *m > 0)
            .map(|m| m.saturating_mul(60_000))
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ActiveActivity {
    #[serde(flatten)]
    pub template: Activity,
    #[serde(rename = "startTime")]
    pub start_time: i64,
    #[serde(rename = "endTime", default)]
    pub end_time: Option<i64>,
}

impl ActiveActivity {
    pub fn from_template(template: &Activity, now_ms: i64) -> Self {
        ActiveActivity {
            end_time: template.duration_ms().map(|d| now_ms.saturating_add(d)),
            template: template.clone(),
            start_time: now_ms,
        }
    }

    pub fn id(&self) -> &str {
        &self.template.id
    }

    pub fn blocks_category(&self, category_id: &str) -> bool {
        self.template
            .blocked_category_ids
            .iter()
            .any(|id| id == category_id)
    }

    /// Blank patterns are ignored: `"".contains` would match every URL.
    pub fn exception_matches(&self, url: &str) -> bool {
        self.template
            .exceptions
            .iter()
            .map(|e| e.trim())
            .any(|e| !e.is_empty() && url.contains(e))
    }

    pub fn redirect_url(&self) -> Option<&str> {
        self.template
            .redirect_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct TaskHistoryEntry {
    pub name: String,
    #[serde(rename = "startTime")]
    pub start_time: i64,
    #[serde(rename = "endTime")]
    pub end_time: i64,
    pub date: String,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct TaskFolder {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}
