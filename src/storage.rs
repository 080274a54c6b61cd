//! Persistent store boundary.
//!
//! The store owns custom sounds, settings snapshots and alert/intrusion history.
//! The kernel treats every write as bookkeeping: callers log failures and keep
//! running.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::policy::{Alert, PolicySettings};
use crate::security::{IntrusionFrame, SecuritySettings};
use crate::sound::{CustomSound, SoundTrigger};

pub trait MonitorStore: Send {
    fn save_custom_sound(&mut self, sound: &CustomSound) -> Result<()>;

    fn delete_custom_sound(&mut self, id: &str) -> Result<bool>;

    fn list_custom_sounds(&mut self) -> Result<Vec<CustomSound>>;

    /// Enabled sounds bound to `trigger`.
    fn custom_sounds_for_trigger(&mut self, trigger: SoundTrigger) -> Result<Vec<CustomSound>>;

    fn record_sound_play(&mut self, sound_id: &str, at_ms: u64) -> Result<()>;

    fn append_alert(&mut self, alert: &Alert) -> Result<()>;

    fn acknowledge_alert(&mut self, id: &str) -> Result<bool>;

    /// Newest first.
    fn recent_alerts(&mut self, limit: usize) -> Result<Vec<Alert>>;

    fn append_intrusion(&mut self, frame: &IntrusionFrame) -> Result<()>;

    /// Replace a stored frame (acknowledged, exported, notes).
    fn update_intrusion(&mut self, frame: &IntrusionFrame) -> Result<()>;

    /// Newest first.
    fn recent_intrusions(&mut self, limit: usize) -> Result<Vec<IntrusionFrame>>;

    fn save_policy_settings(&mut self, stream_id: &str, settings: &PolicySettings) -> Result<()>;

    fn load_policy_settings(&mut self, stream_id: &str) -> Result<Option<PolicySettings>>;

    fn save_security_settings(&mut self, settings: &SecuritySettings) -> Result<()>;

    fn load_security_settings(&mut self) -> Result<Option<SecuritySettings>>;

    /// Delete alerts and intrusion frames older than `retention`. Returns rows removed.
    fn enforce_retention(&mut self, retention: Duration, now_ms: u64) -> Result<usize>;
}

pub type SharedStore = Arc<Mutex<dyn MonitorStore>>;

const SECURITY_SETTINGS_KEY: &str = "security";

fn policy_key(stream_id: &str) -> String {
    format!("policy:{}", stream_id)
}

fn to_i64(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("{} exceeds i64 range", what))
}

fn retention_cutoff(retention: Duration, now_ms: u64) -> u64 {
    now_ms.saturating_sub(retention.as_millis().min(u64::MAX as u128) as u64)
}

fn matching_trigger(mut sounds: Vec<CustomSound>, trigger: SoundTrigger) -> Vec<CustomSound> {
    sounds.retain(|s| s.enabled && s.plays_on(trigger));
    sounds
}

// ----------------------------------------------------------------------------
// SQLite
// ----------------------------------------------------------------------------

pub struct SqliteMonitorStore {
    conn: Connection,
}

impl SqliteMonitorStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open monitor db at {}", db_path))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS custom_sounds (
              id TEXT PRIMARY KEY,
              meta_json TEXT NOT NULL,
              payload BLOB NOT NULL,
              enabled INTEGER NOT NULL,
              play_count INTEGER NOT NULL DEFAULT 0,
              last_played_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS alerts (
              id TEXT PRIMARY KEY,
              stream_id TEXT NOT NULL,
              created_at INTEGER NOT NULL,
              severity TEXT NOT NULL,
              acknowledged INTEGER NOT NULL,
              payload_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS intrusions (
              id TEXT PRIMARY KEY,
              created_at INTEGER NOT NULL,
              payload_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS settings (
              key TEXT PRIMARY KEY,
              payload_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_alerts_created ON alerts(created_at);
            CREATE INDEX IF NOT EXISTS idx_intrusions_created ON intrusions(created_at);
            "#,
        )?;
        Ok(())
    }

    fn load_sounds(&self, enabled_only: bool) -> Result<Vec<CustomSound>> {
        let sql = if enabled_only {
            "SELECT meta_json, payload, play_count, last_played_at FROM custom_sounds WHERE enabled = 1"
        } else {
            "SELECT meta_json, payload, play_count, last_played_at FROM custom_sounds"
        };
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let meta: String = row.get(0)?;
            let mut sound: CustomSound = serde_json::from_str(&meta)?;
            sound.payload = row.get(1)?;
            let play_count: i64 = row.get(2)?;
            let last_played: Option<i64> = row.get(3)?;
            sound.play_count = play_count.max(0) as u64;
            sound.last_played_at_ms = last_played.map(|t| t.max(0) as u64);
            out.push(sound);
        }
        Ok(out)
    }

    fn save_setting(&mut self, key: &str, payload_json: String) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO settings(key, payload_json) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET payload_json = excluded.payload_json
            "#,
            params![key, payload_json],
        )?;
        Ok(())
    }

    fn load_setting(&self, key: &str) -> Result<Option<String>> {
        let payload = self
            .conn
            .query_row(
                "SELECT payload_json FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload)
    }

    fn read_payloads(&self, sql: &str, limit: usize) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params![limit.min(i64::MAX as usize) as i64])?;
        let mut payloads = Vec::new();
        while let Some(row) = rows.next()? {
            payloads.push(row.get(0)?);
        }
        Ok(payloads)
    }
}

impl MonitorStore for SqliteMonitorStore {
    fn save_custom_sound(&mut self, sound: &CustomSound) -> Result<()> {
        let meta_json = serde_json::to_string(sound)?;
        let last_played = sound
            .last_played_at_ms
            .map(|t| to_i64(t, "last_played_at"))
            .transpose()?;
        self.conn.execute(
            r#"
            INSERT INTO custom_sounds(id, meta_json, payload, enabled, play_count, last_played_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
              meta_json = excluded.meta_json,
              payload = excluded.payload,
              enabled = excluded.enabled
            "#,
            params![
                sound.id,
                meta_json,
                sound.payload,
                sound.enabled,
                to_i64(sound.play_count, "play_count")?,
                last_played
            ],
        )?;
        Ok(())
    }

    fn delete_custom_sound(&mut self, id: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM custom_sounds WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    fn list_custom_sounds(&mut self) -> Result<Vec<CustomSound>> {
        self.load_sounds(false)
    }

    fn custom_sounds_for_trigger(&mut self, trigger: SoundTrigger) -> Result<Vec<CustomSound>> {
        Ok(matching_trigger(self.load_sounds(true)?, trigger))
    }

    fn record_sound_play(&mut self, sound_id: &str, at_ms: u64) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE custom_sounds SET play_count = play_count + 1, last_played_at = ?2 WHERE id = ?1",
            params![sound_id, to_i64(at_ms, "play time")?],
        )?;
        if updated == 0 {
            return Err(anyhow!("custom sound {} not found", sound_id));
        }
        Ok(())
    }

    fn append_alert(&mut self, alert: &Alert) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO alerts(id, stream_id, created_at, severity, acknowledged, payload_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                alert.id,
                alert.stream_id,
                to_i64(alert.created_at_ms, "alert time")?,
                alert.severity.as_str(),
                alert.acknowledged,
                serde_json::to_string(alert)?
            ],
        )?;
        Ok(())
    }

    fn acknowledge_alert(&mut self, id: &str) -> Result<bool> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload_json FROM alerts WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(payload) = payload else {
            return Ok(false);
        };
        let mut alert: Alert = serde_json::from_str(&payload)?;
        alert.acknowledged = true;
        self.conn.execute(
            "UPDATE alerts SET acknowledged = 1, payload_json = ?2 WHERE id = ?1",
            params![id, serde_json::to_string(&alert)?],
        )?;
        Ok(true)
    }

    fn recent_alerts(&mut self, limit: usize) -> Result<Vec<Alert>> {
        self.read_payloads(
            "SELECT payload_json FROM alerts ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            limit,
        )?
        .iter()
        .map(|p| serde_json::from_str(p).map_err(Into::into))
        .collect()
    }

    fn append_intrusion(&mut self, frame: &IntrusionFrame) -> Result<()> {
        self.conn.execute(
            "INSERT INTO intrusions(id, created_at, payload_json) VALUES (?1, ?2, ?3)",
            params![
                frame.id,
                to_i64(frame.timestamp_ms, "intrusion time")?,
                serde_json::to_string(frame)?
            ],
        )?;
        Ok(())
    }

    fn update_intrusion(&mut self, frame: &IntrusionFrame) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE intrusions SET payload_json = ?2 WHERE id = ?1",
            params![frame.id, serde_json::to_string(frame)?],
        )?;
        if updated == 0 {
            return Err(anyhow!("intrusion frame {} not found", frame.id));
        }
        Ok(())
    }

    fn recent_intrusions(&mut self, limit: usize) -> Result<Vec<IntrusionFrame>> {
        self.read_payloads(
            "SELECT payload_json FROM intrusions ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            limit,
        )?
        .iter()
        .map(|p| serde_json::from_str(p).map_err(Into::into))
        .collect()
    }

    fn save_policy_settings(&mut self, stream_id: &str, settings: &PolicySettings) -> Result<()> {
        self.save_setting(&policy_key(stream_id), serde_json::to_string(settings)?)
    }

    fn load_policy_settings(&mut self, stream_id: &str) -> Result<Option<PolicySettings>> {
        match self.load_setting(&policy_key(stream_id))? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn save_security_settings(&mut self, settings: &SecuritySettings) -> Result<()> {
        self.save_setting(SECURITY_SETTINGS_KEY, serde_json::to_string(settings)?)
    }

    fn load_security_settings(&mut self) -> Result<Option<SecuritySettings>> {
        match self.load_setting(SECURITY_SETTINGS_KEY)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn enforce_retention(&mut self, retention: Duration, now_ms: u64) -> Result<usize> {
        let cutoff = to_i64(retention_cutoff(retention, now_ms), "retention cutoff")?;
        let alerts = self
            .conn
            .execute("DELETE FROM alerts WHERE created_at < ?1", params![cutoff])?;
        let intrusions = self
            .conn
            .execute("DELETE FROM intrusions WHERE created_at < ?1", params![cutoff])?;
        Ok(alerts + intrusions)
    }
}

// ----------------------------------------------------------------------------
// In-memory
// ----------------------------------------------------------------------------

/// Store for tests and ephemeral runs. `failing()` rejects every write.
#[derive(Clone, Debug, Default)]
pub struct InMemoryMonitorStore {
    sounds: Vec<CustomSound>,
    alerts: Vec<Alert>,
    intrusions: Vec<IntrusionFrame>,
    settings: HashMap<String, String>,
    fail_writes: bool,
}

impl InMemoryMonitorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes {
            return Err(anyhow!("store is read-only"));
        }
        Ok(())
    }
}

impl MonitorStore for InMemoryMonitorStore {
    fn save_custom_sound(&mut self, sound: &CustomSound) -> Result<()> {
        self.check_write()?;
        match self.sounds.iter_mut().find(|s| s.id == sound.id) {
            Some(existing) => *existing = sound.clone(),
            None => self.sounds.push(sound.clone()),
        }
        Ok(())
    }

    fn delete_custom_sound(&mut self, id: &str) -> Result<bool> {
        self.check_write()?;
        let before = self.sounds.len();
        self.sounds.retain(|s| s.id != id);
        Ok(self.sounds.len() != before)
    }

    fn list_custom_sounds(&mut self) -> Result<Vec<CustomSound>> {
        Ok(self.sounds.clone())
    }

    fn custom_sounds_for_trigger(&mut self, trigger: SoundTrigger) -> Result<Vec<CustomSound>> {
        Ok(matching_trigger(self.sounds.clone(), trigger))
    }

    fn record_sound_play(&mut self, sound_id: &str, at_ms: u64) -> Result<()> {
        self.check_write()?;
        let sound = self
            .sounds
            .iter_mut()
            .find(|s| s.id == sound_id)
            .ok_or_else(|| anyhow!("custom sound {} not found", sound_id))?;
        sound.play_count += 1;
        sound.last_played_at_ms = Some(at_ms);
        Ok(())
    }

    fn append_alert(&mut self, alert: &Alert) -> Result<()> {
        self.check_write()?;
        self.alerts.push(alert.clone());
        Ok(())
    }

    fn acknowledge_alert(&mut self, id: &str) -> Result<bool> {
        self.check_write()?;
        match self.alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.acknowledged = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn recent_alerts(&mut self, limit: usize) -> Result<Vec<Alert>> {
        Ok(self.alerts.iter().rev().take(limit).cloned().collect())
    }

    fn append_intrusion(&mut self, frame: &IntrusionFrame) -> Result<()> {
        self.check_write()?;
        self.intrusions.push(frame.clone());
        Ok(())
    }

    fn update_intrusion(&mut self, frame: &IntrusionFrame) -> Result<()> {
        self.check_write()?;
        let existing = self
            .intrusions
            .iter_mut()
            .find(|f| f.id == frame.id)
            .ok_or_else(|| anyhow!("intrusion frame {} not found", frame.id))?;
        *existing = frame.clone();
        Ok(())
    }

    fn recent_intrusions(&mut self, limit: usize) -> Result<Vec<IntrusionFrame>> {
        Ok(self.intrusions.iter().rev().take(limit).cloned().collect())
    }

    fn save_policy_settings(&mut self, stream_id: &str, settings: &PolicySettings) -> Result<()> {
        self.check_write()?;
        self.settings
            .insert(policy_key(stream_id), serde_json::to_string(settings)?);
        Ok(())
    }

    fn load_policy_settings(&mut self, stream_id: &str) -> Result<Option<PolicySettings>> {
        match self.settings.get(&policy_key(stream_id)) {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    fn save_security_settings(&mut self, settings: &SecuritySettings) -> Result<()> {
        self.check_write()?;
        self.settings
            .insert(SECURITY_SETTINGS_KEY.to_string(), serde_json::to_string(settings)?);
        Ok(())
    }

    fn load_security_settings(&mut self) -> Result<Option<SecuritySettings>> {
        match self.settings.get(SECURITY_SETTINGS_KEY) {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    fn enforce_retention(&mut self, retention: Duration, now_ms: u64) -> Result<usize> {
        self.check_write()?;
        let cutoff = retention_cutoff(retention, now_ms);
        let before = self.alerts.len() + self.intrusions.len();
        self.alerts.retain(|a| a.created_at_ms >= cutoff);
        self.intrusions.retain(|f| f.timestamp_ms >= cutoff);
        Ok(before - self.alerts.len() - self.intrusions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::AlertKind;
    use crate::{Scenario, Severity};
    use tempfile::tempdir;

    fn stores() -> Result<(tempfile::TempDir, Vec<Box<dyn MonitorStore>>)> {
        let dir = tempdir()?;
        let path = dir.path().join("monitor.db");
        let path = path.to_str().ok_or_else(|| anyhow!("non-utf8 temp path"))?;
        let sqlite = SqliteMonitorStore::open(path)?;
        Ok((
            dir,
            vec![Box::new(sqlite), Box::new(InMemoryMonitorStore::new())],
        ))
    }

    #[test]
    fn custom_sounds_filter_by_trigger_and_enabled() -> Result<()> {
        let (_dir, stores) = stores()?;
        for mut store in stores {
            let pet = CustomSound::new("whistle", vec![9, 9], &[SoundTrigger::PetDetected]);
            let mut off = CustomSound::new("off", vec![1], &[SoundTrigger::PetDetected]);
            off.enabled = false;
            let person = CustomSound::new("doorbell", vec![2], &[SoundTrigger::PersonDetected]);
            for s in [&pet, &off, &person] {
                store.save_custom_sound(s)?;
            }

            let found = store.custom_sounds_for_trigger(SoundTrigger::PetDetected)?;
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].id, pet.id);
            assert_eq!(found[0].payload, vec![9, 9]);
            assert_eq!(store.list_custom_sounds()?.len(), 3);

            store.record_sound_play(&pet.id, 1_234)?;
            let found = store.custom_sounds_for_trigger(SoundTrigger::PetDetected)?;
            assert_eq!(found[0].play_count, 1);
            assert_eq!(found[0].last_played_at_ms, Some(1_234));

            assert!(store.delete_custom_sound(&person.id)?);
            assert!(!store.delete_custom_sound(&person.id)?);
            assert!(store.record_sound_play("missing", 1).is_err());
        }
        Ok(())
    }

    #[test]
    fn alerts_round_trip_and_retention() -> Result<()> {
        let (_dir, stores) = stores()?;
        for mut store in stores {
            let old = Alert::new("cam", AlertKind::Motion, Severity::Low, "old", 1_000);
            let new = Alert::new("cam", AlertKind::Person, Severity::High, "new", 90_000);
            store.append_alert(&old)?;
            store.append_alert(&new)?;

            assert!(store.acknowledge_alert(&new.id)?);
            assert!(!store.acknowledge_alert("nope")?);
            let recent = store.recent_alerts(10)?;
            assert_eq!(recent[0].id, new.id);
            assert!(recent[0].acknowledged);

            let removed = store.enforce_retention(Duration::from_secs(60), 100_000)?;
            assert_eq!(removed, 1);
            assert_eq!(store.recent_alerts(10)?.len(), 1);
        }
        Ok(())
    }

    #[test]
    fn settings_snapshots_per_stream() -> Result<()> {
        let (_dir, stores) = stores()?;
        for mut store in stores {
            assert!(store.load_policy_settings("nursery")?.is_none());
            let settings = PolicySettings::for_scenario(Scenario::Baby);
            store.save_policy_settings("nursery", &settings)?;
            store.save_policy_settings("nursery", &settings)?;
            assert_eq!(store.load_policy_settings("nursery")?, Some(settings));

            let security = SecuritySettings::default();
            store.save_security_settings(&security)?;
            assert_eq!(store.load_security_settings()?, Some(security));
        }
        Ok(())
    }

    #[test]
    fn failing_store_rejects_writes() {
        let mut store = InMemoryMonitorStore::failing();
        let alert = Alert::new("cam", AlertKind::Motion, Severity::Low, "x", 0);
        assert!(store.append_alert(&alert).is_err());
    }
}
