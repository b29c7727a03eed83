//! Schema migrations for the workflow store.
//!
//! The SQLite `user_version` pragma records the last applied migration.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

/// Ordered; versions start at 1 and never change once released.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "workflows and update logs",
        sql: r#"
        CREATE TABLE IF NOT EXISTS workflows (
            id               TEXT PRIMARY KEY,
            name             TEXT    NOT NULL,
            description      TEXT,
            nodes            TEXT    NOT NULL DEFAULT '[]',
            edges            TEXT    NOT NULL DEFAULT '[]',
            metadata         TEXT    NOT NULL DEFAULT '{}',
            version          INTEGER NOT NULL DEFAULT 1 CHECK (version >= 1),
            owner_id         TEXT    NOT NULL,
            is_public        INTEGER NOT NULL DEFAULT 0,
            share_token      TEXT UNIQUE,
            created_at       TEXT    NOT NULL,
            updated_at       TEXT    NOT NULL,
            last_modified_by TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_workflows_updated_at ON workflows (updated_at);

        CREATE TABLE IF NOT EXISTS workflow_update_logs (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            workflow_id  TEXT    NOT NULL REFERENCES workflows (id) ON DELETE CASCADE,
            username     TEXT    NOT NULL,
            version      INTEGER NOT NULL,
            created_at   TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_update_logs_workflow ON workflow_update_logs (workflow_id);
        "#,
    },
    Migration {
        version: 2,
        name: "user accounts",
        sql: r#"
        CREATE TABLE IF NOT EXISTS users (
            username       TEXT PRIMARY KEY,
            password_hash  TEXT    NOT NULL,
            is_admin       INTEGER NOT NULL DEFAULT 0,
            created_at     TEXT    NOT NULL
        );
        "#,
    },
];

/// Apply every migration newer than the stored `user_version`, each in its
/// own transaction together with the version bump.
///
/// A database written by a newer build (higher `user_version` than any
/// known migration) is refused rather than silently used.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let stored = schema_version(conn)?;
    let latest = MIGRATIONS.last().map_or(0, |m| m.version);
    if stored > latest {
        return Err(DatabaseError::MigrationFailed {
            version: stored,
            detail: format!("database schema is newer than this build (knows up to {})", latest),
        });
    }

    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > stored).collect();
    if pending.is_empty() {
        debug!(version = stored, "schema up to date");
        return Ok(());
    }

    for migration in pending {
        info!(version = migration.version, name = migration.name, "applying migration");
        let failed = |e: rusqlite::Error| DatabaseError::MigrationFailed {
            version: migration.version,
            detail: e.to_string(),
        };
        let tx = conn.unchecked_transaction().map_err(failed)?;
        tx.execute_batch(migration.sql).map_err(failed)?;
        tx.pragma_update(None, "user_version", migration.version)
            .map_err(failed)?;
        tx.commit().map_err(failed)?;
    }
    Ok(())
}

fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rerun_is_a_no_op() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 2);

        for table in ["workflows", "workflow_update_logs", "users"] {
            let found: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(found, 1, "missing table {}", table);
        }
    }

    #[test]
    fn test_partial_upgrade_applies_only_newer() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIGRATIONS[0].sql).unwrap();
        conn.pragma_update(None, "user_version", 1u32).unwrap();

        run_migrations(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 2);
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", 99u32).unwrap();
        assert!(matches!(
            run_migrations(&conn),
            Err(DatabaseError::MigrationFailed { version: 99, .. })
        ));
    }

    #[test]
    fn test_version_must_be_positive() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let result = conn.execute(
            "INSERT INTO workflows (id, name, version, owner_id, created_at, updated_at)
             VALUES ('w', 'n', 0, 'o', 't', 't')",
            [],
        );
        assert!(result.is_err());
    }
}
