//! SQLite-backed audit sink.
//!
//! Stores every event in `<data_dir>/audit.db`. The database is created
//! on first use with owner-only permissions.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use super::{AuditEvent, AuditLevel, AuditSink};
use crate::errors::{KeywardError, Result};

/// A stored audit row.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub actor: String,
    pub message: String,
    pub secret_id: Option<i64>,
    pub revision_id: Option<i64>,
    pub request_id: Option<i64>,
    pub group_name: Option<String>,
    pub user_name: Option<String>,
}

/// SQLite audit log.
pub struct SqliteAuditLog {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteAuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteAuditLog").finish_non_exhaustive()
    }
}

fn to_i64(id: u64) -> i64 {
    i64::try_from(id).unwrap_or(i64::MAX)
}

impl SqliteAuditLog {
    /// Open (or create) the audit database at `<data_dir>/audit.db`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let db_path = Self::db_path(data_dir);
        let conn = Connection::open(&db_path)
            .map_err(|e| KeywardError::AuditError(format!("open {}: {e}", db_path.display())))?;
        // Another keyward process may be opening the log at the same moment.
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| KeywardError::AuditError(e.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(&db_path, perms);
        }

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS audit_log (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp   TEXT NOT NULL,
                level       TEXT NOT NULL,
                actor       TEXT NOT NULL,
                message     TEXT NOT NULL,
                secret_id   INTEGER,
                revision_id INTEGER,
                request_id  INTEGER,
                group_name  TEXT,
                user_name   TEXT
            );",
        )
        .map_err(|e| KeywardError::AuditError(format!("create table: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Path of the audit database inside `data_dir`.
    pub fn db_path(data_dir: &Path) -> PathBuf {
        data_dir.join("audit.db")
    }

    /// Most recent entries first, optionally only those at or after `since`.
    pub fn query(&self, limit: usize, since: Option<DateTime<Utc>>) -> Result<Vec<AuditEntry>> {
        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let since_str = since.map_or_else(String::new, |ts| ts.to_rfc3339());

        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn
            .prepare(
                "SELECT id, timestamp, level, actor, message,
                        secret_id, revision_id, request_id, group_name, user_name
                 FROM audit_log
                 WHERE ?1 = '' OR timestamp >= ?1
                 ORDER BY id DESC
                 LIMIT ?2",
            )
            .map_err(|e| KeywardError::AuditError(format!("query prepare: {e}")))?;

        let rows = stmt
            .query_map(rusqlite::params![since_str, limit_i64], |row| {
                let ts_str: String = row.get(1)?;
                let timestamp = DateTime::parse_from_rfc3339(&ts_str)
                    .map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc));

                Ok(AuditEntry {
                    id: row.get(0)?,
                    timestamp,
                    level: row.get(2)?,
                    actor: row.get(3)?,
                    message: row.get(4)?,
                    secret_id: row.get(5)?,
                    revision_id: row.get(6)?,
                    request_id: row.get(7)?,
                    group_name: row.get(8)?,
                    user_name: row.get(9)?,
                })
            })
            .map_err(|e| KeywardError::AuditError(format!("query exec: {e}")))?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(|e| KeywardError::AuditError(format!("row parse: {e}")))?);
        }
        Ok(entries)
    }
}

impl AuditSink for SqliteAuditLog {
    fn log(&self, event: &AuditEvent) -> Result<()> {
        let subject = &event.subject;
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT INTO audit_log
                (timestamp, level, actor, message, secret_id, revision_id, request_id, group_name, user_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                event.timestamp.to_rfc3339(),
                event.level.as_str(),
                event.actor.as_str(),
                event.message,
                subject.secret.map(|id| to_i64(id.0)),
                subject.revision.map(|id| to_i64(id.0)),
                subject.request.map(|id| to_i64(id.0)),
                subject.group.as_ref().map(|g| g.as_str().to_string()),
                subject.user.as_ref().map(|u| u.as_str().to_string()),
            ],
        )
        .map_err(|e| KeywardError::AuditError(format!("insert: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{GroupId, UserId};
    use crate::vault::{RevisionId, SecretId};
    use tempfile::TempDir;

    #[test]
    fn open_creates_database() {
        let dir = TempDir::new().unwrap();
        SqliteAuditLog::open(dir.path()).unwrap();
        assert!(dir.path().join("audit.db").exists());
    }

    #[test]
    fn log_and_query_roundtrip() {
        let dir = TempDir::new().unwrap();
        let audit = SqliteAuditLog::open(dir.path()).unwrap();
        let alice = UserId::new("alice");

        audit
            .log(
                &AuditEvent::info(&alice, "alice set a new value")
                    .secret(SecretId(1))
                    .revision(RevisionId(2)),
            )
            .unwrap();
        audit
            .log(
                &AuditEvent::info(&alice, "alice shared 'db' with ops")
                    .secret(SecretId(1))
                    .group(&GroupId::new("ops")),
            )
            .unwrap();
        audit
            .log(&AuditEvent::warning(&alice, "override"))
            .unwrap();

        let entries = audit.query(10, None).unwrap();
        assert_eq!(entries.len(), 3);

        // Most recent first.
        assert_eq!(entries[0].level, "warning");
        assert_eq!(entries[1].group_name.as_deref(), Some("ops"));
        assert_eq!(entries[2].revision_id, Some(2));
        assert_eq!(entries[2].secret_id, Some(1));
        assert_eq!(AuditLevel::parse(&entries[0].level), Some(AuditLevel::Warning));
    }

    #[test]
    fn query_with_limit_and_since() {
        let dir = TempDir::new().unwrap();
        let audit = SqliteAuditLog::open(dir.path()).unwrap();
        let bob = UserId::new("bob");

        for i in 0..5 {
            audit.log(&AuditEvent::info(&bob, format!("event {i}"))).unwrap();
        }

        assert_eq!(audit.query(3, None).unwrap().len(), 3);

        let past = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(audit.query(10, Some(past)).unwrap().len(), 5);

        let future = Utc::now() + chrono::Duration::hours(1);
        assert!(audit.query(10, Some(future)).unwrap().is_empty());
    }

    #[test]
    fn open_fails_on_bad_path() {
        let result = SqliteAuditLog::open(Path::new("/nonexistent/path/that/does/not/exist"));
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[test]
    fn audit_db_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let _audit = SqliteAuditLog::open(dir.path()).unwrap();

        let perms = std::fs::metadata(dir.path().join("audit.db"))
            .unwrap()
            .permissions();
        assert_eq!(perms.mode() & 0o777, 0o600);
    }
}
