//! Canonical session record files with atomic writes and an index mirror.
//!
//! Layout under the sessions directory, for each session `S`:
//! - `<sanitize(S)>.json` -- canonical record v2
//! - `<sanitize(S)>.lock` -- sidecar lock
//! - `<sanitize(S)>.jsonl` / `<sanitize(S)>.full.jsonl` -- append-only logs
//!
//! plus `.drost-sessions-index.json` (own lock), `.drost-sessions-corrupt/`
//! and `.drost-sessions-archive/`.
//!
//! Writes go to a temp sibling and `rename` over the target, so a crash at
//! any point leaves either the previous or the new record on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use drost_domain::config::HistoryBudget;
use drost_domain::session::{LegacySessionV1, SessionOrigin, SessionRecord, SESSION_RECORD_VERSION};
use drost_domain::{Error, Result};

use crate::budget::{apply_budget, TrimReport};
use crate::fs_lock::{FileLock, LockOptions};
use crate::session_key::sanitize_session_id;

pub const INDEX_FILE: &str = ".drost-sessions-index.json";
pub const INDEX_LOCK_FILE: &str = ".drost-sessions-index.lock";
pub const CORRUPT_DIR: &str = ".drost-sessions-corrupt";
pub const ARCHIVE_DIR: &str = ".drost-sessions-archive";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Index
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Light per-session fields mirrored into the index file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_provider_id: Option<String>,
    pub history_count: usize,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<SessionOrigin>,
}

impl IndexEntry {
    fn from_record(record: &SessionRecord) -> Self {
        Self {
            active_provider_id: record.active_provider_id.clone(),
            history_count: record.history.len(),
            revision: record.revision,
            created_at: record.metadata.created_at,
            last_activity_at: record.metadata.last_activity_at,
            title: record.metadata.title.clone(),
            origin: record.metadata.origin.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SessionIndex {
    #[serde(default)]
    sessions: BTreeMap<String, IndexEntry>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Load / save results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Diagnostic attached when a record had to be quarantined.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadDiagnostic {
    /// `corrupt_json` or `invalid_shape`.
    pub code: &'static str,
    pub quarantined_path: PathBuf,
}

/// Outcome of a load: a record, nothing, or a quarantine diagnostic.
#[derive(Debug)]
pub struct LoadResult {
    pub record: Option<SessionRecord>,
    pub diagnostic: Option<LoadDiagnostic>,
}

/// Outcome of a save.
#[derive(Debug, Clone, Copy)]
pub struct SaveReport {
    pub revision: u64,
    pub trim: TrimReport,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// File-backed session store. One instance per gateway process; the process
/// exclusively owns every file under `dir` while running.
pub struct SessionFileStore {
    dir: PathBuf,
    lock_opts: LockOptions,
    budget: HistoryBudget,
}

impl SessionFileStore {
    /// Open (and create) the store directories.
    ///
    /// Directory creation failure here is the one fatal startup error the
    /// store can produce.
    pub fn open(dir: &Path, lock_opts: LockOptions, budget: HistoryBudget) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        std::fs::create_dir_all(dir.join(CORRUPT_DIR))?;
        std::fs::create_dir_all(dir.join(ARCHIVE_DIR))?;

        let store = Self {
            dir: dir.to_path_buf(),
            lock_opts,
            budget,
        };

        tracing::info!(path = %dir.display(), "session store ready");
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // ── Paths ──────────────────────────────────────────────────────

    fn record_path(&self, session_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", sanitize_session_id(session_id)))
    }

    fn lock_path(&self, session_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.lock", sanitize_session_id(session_id)))
    }

    // ── Load ───────────────────────────────────────────────────────

    /// Load a session record.
    ///
    /// Missing file → `record: None`, no diagnostic. A file that fails to
    /// parse or validate is moved to quarantine, dropped from the index,
    /// and reported via the diagnostic -- never an error.
    pub fn load(&self, session_id: &str) -> Result<LoadResult> {
        let path = self.record_path(session_id);
        if !path.exists() {
            return Ok(LoadResult {
                record: None,
                diagnostic: None,
            });
        }

        let raw = std::fs::read_to_string(&path)?;

        let value: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "corrupt session record");
                let quarantined = self.quarantine(session_id, &path)?;
                return Ok(LoadResult {
                    record: None,
                    diagnostic: Some(LoadDiagnostic {
                        code: "corrupt_json",
                        quarantined_path: quarantined,
                    }),
                });
            }
        };

        let version = value.get("version").and_then(|v| v.as_u64()).unwrap_or(1);
        let parsed: std::result::Result<SessionRecord, serde_json::Error> =
            if version >= SESSION_RECORD_VERSION as u64 {
                serde_json::from_value(value)
            } else {
                // Legacy v1: accepted read-only, upgraded on the next save.
                serde_json::from_value::<LegacySessionV1>(value).map(LegacySessionV1::upgrade)
            };

        match parsed {
            Ok(record) => Ok(LoadResult {
                record: Some(record),
                diagnostic: None,
            }),
            Err(e) => {
                tracing::warn!(session_id, error = %e, "session record has invalid shape");
                let quarantined = self.quarantine(session_id, &path)?;
                Ok(LoadResult {
                    record: None,
                    diagnostic: Some(LoadDiagnostic {
                        code: "invalid_shape",
                        quarantined_path: quarantined,
                    }),
                })
            }
        }
    }

    // ── Save ───────────────────────────────────────────────────────

    /// Persist a record: lock, trim to budget, bump revision, write the
    /// temp sibling, rename into place, mirror into the index.
    pub fn save(&self, record: &mut SessionRecord) -> Result<SaveReport> {
        let _lock = FileLock::acquire(&self.lock_path(&record.session_id), &self.lock_opts)?;

        let trim = apply_budget(&mut record.history, &self.budget);
        record.version = SESSION_RECORD_VERSION;
        // Strictly increasing even when two writers saved from the same
        // base: never go below what is already on disk.
        let on_disk = self.disk_revision(&record.session_id);
        record.revision = record.revision.max(on_disk) + 1;
        record.updated_at = Utc::now();

        let path = self.record_path(&record.session_id);
        write_atomic(&path, &serde_json::to_string_pretty(&record)?)?;

        let entry = IndexEntry::from_record(record);
        let id = record.session_id.clone();
        self.update_index(|index| {
            index.sessions.insert(id, entry);
        })?;

        if trim.trimmed {
            tracing::info!(
                session_id = %record.session_id,
                dropped_messages = trim.dropped_messages,
                dropped_characters = trim.dropped_characters,
                "history budget trimmed session"
            );
        }

        Ok(SaveReport {
            revision: record.revision,
            trim,
        })
    }

    // ── Lifecycle operations ───────────────────────────────────────

    /// Delete a session record and its index entry. Returns whether a
    /// record existed.
    pub fn delete(&self, session_id: &str) -> Result<bool> {
        let _lock = FileLock::acquire(&self.lock_path(session_id), &self.lock_opts)?;
        let path = self.record_path(session_id);
        let existed = path.exists();
        if existed {
            std::fs::remove_file(&path)?;
        }
        let id = session_id.to_owned();
        self.update_index(|index| {
            index.sessions.remove(&id);
        })?;
        Ok(existed)
    }

    /// Rename a session. Both locks are acquired in path-sorted order so
    /// two concurrent renames cannot deadlock.
    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return Ok(());
        }

        let from_lock_path = self.lock_path(from);
        let to_lock_path = self.lock_path(to);
        let mut lock_order = [&from_lock_path, &to_lock_path];
        lock_order.sort();
        let _first = FileLock::acquire(lock_order[0], &self.lock_opts)?;
        let _second = FileLock::acquire(lock_order[1], &self.lock_opts)?;

        let from_path = self.record_path(from);
        let to_path = self.record_path(to);

        if !from_path.exists() {
            return Err(Error::UnknownSession(from.to_owned()));
        }
        if to_path.exists() {
            return Err(Error::Conflict(format!(
                "session '{to}' already exists"
            )));
        }

        // The record carries its own id; rewrite it under the new name.
        let raw = std::fs::read_to_string(&from_path)?;
        let mut record: SessionRecord = serde_json::from_str(&raw)
            .map_err(|e| Error::Corrupt(format!("rename source '{from}': {e}")))?;
        record.session_id = to.to_owned();
        record.revision += 1;
        record.updated_at = Utc::now();

        write_atomic(&to_path, &serde_json::to_string_pretty(&record)?)?;
        std::fs::remove_file(&from_path)?;

        // Carry the append-only logs along.
        for suffix in [".jsonl", ".full.jsonl"] {
            let src = self
                .dir
                .join(format!("{}{suffix}", sanitize_session_id(from)));
            if src.exists() {
                let dst = self
                    .dir
                    .join(format!("{}{suffix}", sanitize_session_id(to)));
                let _ = std::fs::rename(&src, &dst);
            }
        }

        let entry = IndexEntry::from_record(&record);
        let (old_id, new_id) = (from.to_owned(), to.to_owned());
        self.update_index(|index| {
            index.sessions.remove(&old_id);
            index.sessions.insert(new_id, entry);
        })?;

        Ok(())
    }

    /// Move a record to the archive directory and drop its index entry.
    /// Transcript logs stay in place.
    pub fn archive(&self, session_id: &str) -> Result<PathBuf> {
        let _lock = FileLock::acquire(&self.lock_path(session_id), &self.lock_opts)?;
        let path = self.record_path(session_id);
        if !path.exists() {
            return Err(Error::UnknownSession(session_id.to_owned()));
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.json", sanitize_session_id(session_id)));
        let target = self.dir.join(ARCHIVE_DIR).join(file_name);
        std::fs::rename(&path, &target)?;

        let id = session_id.to_owned();
        self.update_index(|index| {
            index.sessions.remove(&id);
        })?;

        Ok(target)
    }

    /// Export the canonical record.
    pub fn export(&self, session_id: &str) -> Result<SessionRecord> {
        match self.load(session_id)? {
            LoadResult {
                record: Some(record),
                ..
            } => Ok(record),
            _ => Err(Error::UnknownSession(session_id.to_owned())),
        }
    }

    /// Import a canonical record. Refuses to replace an existing session
    /// unless `overwrite` is set.
    pub fn import(&self, record: &SessionRecord, overwrite: bool) -> Result<()> {
        let _lock = FileLock::acquire(&self.lock_path(&record.session_id), &self.lock_opts)?;
        let path = self.record_path(&record.session_id);
        if path.exists() && !overwrite {
            return Err(Error::Conflict(format!(
                "session '{}' already exists",
                record.session_id
            )));
        }

        let mut imported = record.clone();
        imported.version = SESSION_RECORD_VERSION;
        write_atomic(&path, &serde_json::to_string_pretty(&imported)?)?;

        let entry = IndexEntry::from_record(&imported);
        let id = imported.session_id.clone();
        self.update_index(|index| {
            index.sessions.insert(id, entry);
        })?;
        Ok(())
    }

    /// All indexed sessions, id-sorted.
    pub fn list(&self) -> Result<Vec<(String, IndexEntry)>> {
        let index = self.read_index();
        Ok(index.sessions.into_iter().collect())
    }

    /// Whether the index lists a session.
    pub fn contains(&self, session_id: &str) -> bool {
        self.read_index().sessions.contains_key(session_id)
    }

    // ── Internals ──────────────────────────────────────────────────

    fn disk_revision(&self, session_id: &str) -> u64 {
        let Ok(raw) = std::fs::read_to_string(self.record_path(session_id)) else {
            return 0;
        };
        serde_json::from_str::<serde_json::Value>(&raw)
            .ok()
            .and_then(|v| v.get("revision").and_then(|r| r.as_u64()))
            .unwrap_or(0)
    }

    fn quarantine(&self, session_id: &str, path: &Path) -> Result<PathBuf> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let target = self.dir.join(CORRUPT_DIR).join(format!(
            "{}.{stamp}.json",
            sanitize_session_id(session_id)
        ));
        std::fs::rename(path, &target)?;

        let id = session_id.to_owned();
        self.update_index(|index| {
            index.sessions.remove(&id);
        })?;

        tracing::warn!(
            session_id,
            quarantined = %target.display(),
            "session record quarantined"
        );
        Ok(target)
    }

    fn read_index(&self) -> SessionIndex {
        let path = self.dir.join(INDEX_FILE);
        let Ok(raw) = std::fs::read_to_string(&path) else {
            return SessionIndex::default();
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "session index unreadable, rebuilding empty");
            SessionIndex::default()
        })
    }

    fn update_index(&self, mutate: impl FnOnce(&mut SessionIndex)) -> Result<()> {
        let _lock = FileLock::acquire(&self.dir.join(INDEX_LOCK_FILE), &self.lock_opts)?;
        let mut index = self.read_index();
        mutate(&mut index);
        write_atomic(
            &self.dir.join(INDEX_FILE),
            &serde_json::to_string_pretty(&index)?,
        )
    }
}

/// Write `content` to a temp sibling and rename it over `path`.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let tmp_name = format!(
        ".{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        uuid::Uuid::new_v4().as_simple()
    );
    let tmp_path = path.with_file_name(tmp_name);

    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        Error::Io(e)
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use drost_domain::message::ChatMessage;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> SessionFileStore {
        SessionFileStore::open(dir.path(), LockOptions::default(), HistoryBudget::default())
            .unwrap()
    }

    #[test]
    fn save_load_roundtrip_bumps_revision() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut record = SessionRecord::new("s1", Some("openai".into()));
        record.history.push(ChatMessage::user("hello"));
        let report = store.save(&mut record).unwrap();
        assert_eq!(report.revision, 1);

        let loaded = store.load("s1").unwrap().record.unwrap();
        assert_eq!(loaded.revision, 1);
        assert_eq!(loaded.history.len(), 1);
        assert_eq!(loaded.active_provider_id.as_deref(), Some("openai"));

        store.save(&mut record).unwrap();
        assert_eq!(store.load("s1").unwrap().record.unwrap().revision, 2);
    }

    #[test]
    fn corrupt_record_quarantined() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut record = SessionRecord::new("bad", None);
        store.save(&mut record).unwrap();
        assert!(store.contains("bad"));

        std::fs::write(dir.path().join("bad.json"), "{not-json").unwrap();

        let result = store.load("bad").unwrap();
        assert!(result.record.is_none());
        let diag = result.diagnostic.unwrap();
        assert_eq!(diag.code, "corrupt_json");
        assert!(diag
            .quarantined_path
            .starts_with(dir.path().join(CORRUPT_DIR)));
        assert!(diag.quarantined_path.exists());
        assert!(!store.contains("bad"));
    }

    #[test]
    fn invalid_shape_quarantined() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        std::fs::write(
            dir.path().join("odd.json"),
            r#"{"version": 2, "sessionId": 42}"#,
        )
        .unwrap();

        let result = store.load("odd").unwrap();
        assert!(result.record.is_none());
        assert_eq!(result.diagnostic.unwrap().code, "invalid_shape");
    }

    #[test]
    fn legacy_v1_record_loads() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        std::fs::write(
            dir.path().join("old.json"),
            r#"{"sessionId": "old", "provider": "p1",
                "messages": [{"role": "user", "content": "hi"}]}"#,
        )
        .unwrap();

        let record = store.load("old").unwrap().record.unwrap();
        assert_eq!(record.version, SESSION_RECORD_VERSION);
        assert_eq!(record.history.len(), 1);
        assert_eq!(record.active_provider_id.as_deref(), Some("p1"));
    }

    #[test]
    fn rename_moves_record_and_index() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut record = SessionRecord::new("alpha", None);
        store.save(&mut record).unwrap();

        store.rename("alpha", "beta").unwrap();
        assert!(!store.contains("alpha"));
        assert!(store.contains("beta"));
        let renamed = store.load("beta").unwrap().record.unwrap();
        assert_eq!(renamed.session_id, "beta");
    }

    #[test]
    fn rename_onto_existing_conflicts() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut a = SessionRecord::new("a", None);
        let mut b = SessionRecord::new("b", None);
        store.save(&mut a).unwrap();
        store.save(&mut b).unwrap();

        let err = store.rename("a", "b").unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn import_respects_overwrite_guard() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut record = SessionRecord::new("imp", None);
        store.save(&mut record).unwrap();

        let incoming = SessionRecord::new("imp", Some("other".into()));
        let err = store.import(&incoming, false).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        store.import(&incoming, true).unwrap();
        let loaded = store.load("imp").unwrap().record.unwrap();
        assert_eq!(loaded.active_provider_id.as_deref(), Some("other"));
    }

    #[test]
    fn export_import_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut record = SessionRecord::new("exp", Some("p".into()));
        record.history.push(ChatMessage::user("content"));
        store.save(&mut record).unwrap();

        let exported = store.export("exp").unwrap();
        store.delete("exp").unwrap();
        store.import(&exported, false).unwrap();

        let back = store.export("exp").unwrap();
        assert_eq!(back.history.len(), 1);
        assert_eq!(back.revision, exported.revision);
    }

    #[test]
    fn archive_moves_record_keeps_transcripts() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut record = SessionRecord::new("arch", None);
        store.save(&mut record).unwrap();
        let transcript = dir.path().join("arch.jsonl");
        std::fs::write(&transcript, "{}\n").unwrap();

        let target = store.archive("arch").unwrap();
        assert!(target.exists());
        assert!(!dir.path().join("arch.json").exists());
        assert!(transcript.exists());
        assert!(!store.contains("arch"));
    }

    #[test]
    fn budget_applied_on_save() {
        let dir = TempDir::new().unwrap();
        let store = SessionFileStore::open(
            dir.path(),
            LockOptions::default(),
            HistoryBudget {
                max_messages: Some(2),
                max_chars: None,
                preserve_system: true,
            },
        )
        .unwrap();

        let mut record = SessionRecord::new("trim", None);
        for i in 0..5 {
            record.history.push(ChatMessage::user(format!("m{i}")));
        }
        let report = store.save(&mut record).unwrap();
        assert!(report.trim.trimmed);
        assert_eq!(record.history.len(), 2);
    }

    #[test]
    fn delete_missing_session_is_false() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(!store.delete("ghost").unwrap());
    }

    #[test]
    fn list_reflects_index() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut a = SessionRecord::new("one", None);
        let mut b = SessionRecord::new("two", Some("p".into()));
        store.save(&mut a).unwrap();
        store.save(&mut b).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        let two = listed.iter().find(|(id, _)| id == "two").unwrap();
        assert_eq!(two.1.active_provider_id.as_deref(), Some("p"));
    }
}
