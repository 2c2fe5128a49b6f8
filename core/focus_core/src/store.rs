use crate::activity::{migrate_legacy_current, prune_expired};
use crate::model::{
    ActiveActivity, Activity, Category, TaskFolder, TaskHistoryEntry, UsageLedger,
    KEY_ACTIVE_ACTIVITIES, KEY_ACTIVITIES, KEY_COLLECTIONS, KEY_LEGACY_CURRENT_ACTIVITY,
    KEY_TASK_FOLDERS, KEY_TASK_HISTORY, KEY_TRACKER_DATA, KEY_TRACKING_PAUSED,
    KEY_TRACKING_PAUSED_UNTIL,
};
use crate::usage::record_second;
use rusqlite::{types::Type, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::{info, warn};

pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS records (
  key TEXT PRIMARY KEY,
  value_json TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
"#,
    )?;
    Ok(())
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

fn decode_failure(err: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(err))
}

fn read_raw(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT value_json FROM records WHERE key = ?1", [key], |row| {
        row.get(0)
    })
    .optional()
}

pub fn get_record_json(conn: &Connection, key: &str) -> rusqlite::Result<Option<Value>> {
    let raw = read_raw(conn, key)?;
    Ok(raw.and_then(|s| match serde_json::from_str::<Value>(&s) {
        Ok(v) => Some(v),
        Err(err) => {
            warn!("record {key} is not valid json, ignoring: {err}");
            None
        }
    }))
}

/// Typed read. A missing, `null`, or malformed record reads as `None`.
pub fn get_record<T: DeserializeOwned>(
    conn: &Connection,
    key: &str,
) -> rusqlite::Result<Option<T>> {
    let Some(value) = get_record_json(conn, key)? else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }
    match serde_json::from_value::<T>(value) {
        Ok(v) => Ok(Some(v)),
        Err(err) => {
            warn!("record {key} has an unexpected shape, ignoring: {err}");
            Ok(None)
        }
    }
}

/// Typed read for records that are read, modified and written back.
/// A malformed record is an error, so it is never replaced by a default.
pub fn get_record_strict<T: DeserializeOwned>(
    conn: &Connection,
    key: &str,
) -> rusqlite::Result<Option<T>> {
    let Some(raw) = read_raw(conn, key)? else {
        return Ok(None);
    };
    let value: Value = serde_json::from_str(&raw).map_err(decode_failure)?;
    if value.is_null() {
        return Ok(None);
    }
    serde_json::from_value(value).map(Some).map_err(decode_failure)
}

pub fn put_record<T: Serialize + ?Sized>(
    conn: &Connection,
    key: &str,
    value: &T,
) -> rusqlite::Result<()> {
    let json = serde_json::to_string(value)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        r#"
INSERT INTO records (key, value_json, updated_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(key) DO UPDATE SET
  value_json=excluded.value_json,
  updated_at=excluded.updated_at
        "#,
        (key, json, now_rfc3339()),
    )?;
    Ok(())
}

pub fn delete_record(conn: &Connection, key: &str) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM records WHERE key = ?1", [key])
}

/// Checks that `value` has the shape the core expects for `key`.
pub fn check_record_shape(key: &str, value: &Value) -> Result<(), serde_json::Error> {
    let v = value.clone();
    if v.is_null() {
        return Ok(());
    }
    match key {
        KEY_TRACKER_DATA => serde_json::from_value::<UsageLedger>(v).map(|_| ()),
        KEY_COLLECTIONS => serde_json::from_value::<Vec<Category>>(v).map(|_| ()),
        KEY_ACTIVITIES => serde_json::from_value::<Vec<Activity>>(v).map(|_| ()),
        KEY_ACTIVE_ACTIVITIES => serde_json::from_value::<Vec<ActiveActivity>>(v).map(|_| ()),
        KEY_TRACKING_PAUSED => serde_json::from_value::<bool>(v).map(|_| ()),
        KEY_TRACKING_PAUSED_UNTIL => serde_json::from_value::<Option<i64>>(v).map(|_| ()),
        KEY_TASK_HISTORY => serde_json::from_value::<Vec<TaskHistoryEntry>>(v).map(|_| ()),
        KEY_TASK_FOLDERS => serde_json::from_value::<Vec<TaskFolder>>(v).map(|_| ()),
        _ => Ok(()),
    }
}

/// Moves a legacy `currentActivity` record into `activeActivities`.
pub fn migrate_legacy_records(conn: &Connection) -> rusqlite::Result<bool> {
    let legacy: Option<ActiveActivity> = get_record(conn, KEY_LEGACY_CURRENT_ACTIVITY)?;
    let had_legacy_key = get_record_json(conn, KEY_LEGACY_CURRENT_ACTIVITY)?.is_some();
    if !had_legacy_key {
        return Ok(false);
    }

    let mut active: Vec<ActiveActivity> =
        get_record(conn, KEY_ACTIVE_ACTIVITIES)?.unwrap_or_default();
    let changed = migrate_legacy_current(legacy, &mut active);
    if changed {
        put_record(conn, KEY_ACTIVE_ACTIVITIES, &active)?;
        info!("migrated legacy currentActivity into activeActivities");
    }
    delete_record(conn, KEY_LEGACY_CURRENT_ACTIVITY)?;
    Ok(changed)
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TrackingStatus {
    pub paused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_until: Option<i64>,
}

pub fn load_tracking_status(conn: &Connection) -> rusqlite::Result<TrackingStatus> {
    Ok(TrackingStatus {
        paused: get_record(conn, KEY_TRACKING_PAUSED)?.unwrap_or(false),
        paused_until: get_record(conn, KEY_TRACKING_PAUSED_UNTIL)?,
    })
}

pub fn set_tracking_pause(conn: &Connection, paused_until: Option<i64>) -> rusqlite::Result<()> {
    put_record(conn, KEY_TRACKING_PAUSED, &true)?;
    put_record(conn, KEY_TRACKING_PAUSED_UNTIL, &paused_until)?;
    Ok(())
}

pub fn set_tracking_resume(conn: &Connection) -> rusqlite::Result<()> {
    put_record(conn, KEY_TRACKING_PAUSED, &false)?;
    put_record(conn, KEY_TRACKING_PAUSED_UNTIL, &Option::<i64>::None)?;
    Ok(())
}

/// Resolves the pause flag at `now_ms`, auto-resuming a timed pause that has run out.
pub fn tracking_is_paused(conn: &Connection, now_ms: i64) -> rusqlite::Result<bool> {
    let status = load_tracking_status(conn)?;
    if !status.paused {
        return Ok(false);
    }
    if let Some(until) = status.paused_until {
        if until <= now_ms {
            set_tracking_resume(conn)?;
            return Ok(false);
        }
    }
    Ok(true)
}

/// The records one tick decides from. The ledger is not part of it: a
/// counted second is added to a fresh read in [`Store::commit_tick`].
#[derive(Clone, Debug, Default)]
pub struct RecordSnapshot {
    pub categories: Vec<Category>,
    pub active: Vec<ActiveActivity>,
    pub tracking: TrackingStatus,
}

/// What [`Store::commit_tick`] wrote.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickCommit {
    pub expired_ids: Vec<String>,
    /// Seconds on the counted site for the day, after this tick.
    pub seconds_today: Option<i64>,
}

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn new(conn: Connection) -> Self {
        Store {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn conn(&self) -> &Arc<Mutex<Connection>> {
        &self.conn
    }

    /// Reads each key under its own lock, so a writer may commit between
    /// reads and the snapshot can be torn across keys. A malformed
    /// `activeActivities` record is an error.
    pub async fn snapshot(&self) -> rusqlite::Result<RecordSnapshot> {
        let categories: Vec<Category> = {
            let conn = self.conn.lock().await;
            get_record(&conn, KEY_COLLECTIONS)?.unwrap_or_default()
        };
        let active: Vec<ActiveActivity> = {
            let conn = self.conn.lock().await;
            get_record_strict(&conn, KEY_ACTIVE_ACTIVITIES)?.unwrap_or_default()
        };
        let tracking = {
            let conn = self.conn.lock().await;
            load_tracking_status(&conn)?
        };
        Ok(RecordSnapshot {
            categories,
            active,
            tracking,
        })
    }

    /// Writes one tick's effects in a single transaction: drops activities
    /// ended before `now_ms`, then adds one second to `count` (`(day, site)`).
    /// Both keys are re-read under the lock, so activities started or credits
    /// made since the snapshot survive.
    pub async fn commit_tick(
        &self,
        now_ms: i64,
        count: Option<(&str, &str)>,
    ) -> rusqlite::Result<TickCommit> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let stored: Vec<ActiveActivity> =
            get_record_strict(&tx, KEY_ACTIVE_ACTIVITIES)?.unwrap_or_default();
        let pruned = prune_expired(stored, now_ms);
        if pruned.changed() {
            put_record(&tx, KEY_ACTIVE_ACTIVITIES, &pruned.active)?;
        }

        let seconds_today = match count {
            Some((day, site)) => {
                let mut ledger: UsageLedger =
                    get_record_strict(&tx, KEY_TRACKER_DATA)?.unwrap_or_default();
                let total = record_second(&mut ledger, day, site);
                put_record(&tx, KEY_TRACKER_DATA, &ledger)?;
                Some(total)
            }
            None => None,
        };

        tx.commit()?;
        Ok(TickCommit {
            expired_ids: pruned.expired.iter().map(|a| a.id().to_string()).collect(),
            seconds_today,
        })
    }

    pub async fn resume_tracking(&self) -> rusqlite::Result<()> {
        let conn = self.conn.lock().await;
        set_tracking_resume(&conn)
    }
}
