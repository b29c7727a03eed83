//! Typed query helpers for every table in the FlowSync database.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use super::Database;
use crate::errors::DatabaseError;
use crate::models::{NewWorkflow, UpdateLog, User, WorkflowDocument, WorkflowUpdate};

/// bcrypt work factor for stored passwords.
#[cfg(not(test))]
const PASSWORD_HASH_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const PASSWORD_HASH_COST: u32 = 4;

// ---------------------------------------------------------------------------
// Raw rows
// ---------------------------------------------------------------------------

/// A row from the `workflows` table before JSON columns are decoded.
#[derive(Debug, Clone)]
struct WorkflowRow {
    id: String,
    name: String,
    description: Option<String>,
    nodes: String,
    edges: String,
    metadata: String,
    version: i64,
    owner_id: String,
    is_public: bool,
    share_token: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_modified_by: Option<String>,
}

impl WorkflowRow {
    fn into_document(self, update_logs: Vec<UpdateLog>) -> Result<WorkflowDocument, DatabaseError> {
        Ok(WorkflowDocument {
            id: self.id,
            name: self.name,
            description: self.description,
            nodes: serde_json::from_str(&self.nodes)?,
            edges: serde_json::from_str(&self.edges)?,
            metadata: serde_json::from_str(&self.metadata)?,
            version: self.version,
            owner_id: self.owner_id,
            is_public: self.is_public,
            share_token: self.share_token,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_modified_by: self.last_modified_by,
            update_logs,
        })
    }
}

const WORKFLOW_COLUMNS: &str = "id, name, description, nodes, edges, metadata, version, owner_id,
     is_public, share_token, created_at, updated_at, last_modified_by";

fn map_workflow_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkflowRow> {
    Ok(WorkflowRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        nodes: row.get(3)?,
        edges: row.get(4)?,
        metadata: row.get(5)?,
        version: row.get(6)?,
        owner_id: row.get(7)?,
        is_public: row.get(8)?,
        share_token: row.get(9)?,
        created_at: parse_timestamp(row, 10)?,
        updated_at: parse_timestamp(row, 11)?,
        last_modified_by: row.get(12)?,
    })
}

fn parse_timestamp(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn workflow_not_found(id: &str) -> DatabaseError {
    DatabaseError::NotFound {
        entity: "workflow".into(),
        id: id.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Connection-level helpers (usable inside transactions)
// ---------------------------------------------------------------------------

fn read_update_logs(conn: &Connection, workflow_id: &str) -> Result<Vec<UpdateLog>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT username, created_at, version FROM workflow_update_logs
         WHERE workflow_id = ?1 ORDER BY id ASC",
    )?;
    let logs = stmt
        .query_map(params![workflow_id], |row| {
            Ok(UpdateLog {
                username: row.get(0)?,
                timestamp: parse_timestamp(row, 1)?,
                version: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(logs)
}

fn read_workflow(conn: &Connection, id: &str) -> Result<Option<WorkflowDocument>, DatabaseError> {
    let sql = format!("SELECT {} FROM workflows WHERE id = ?1", WORKFLOW_COLUMNS);
    let row = conn
        .query_row(&sql, params![id], map_workflow_row)
        .optional()?;
    match row {
        Some(row) => {
            let logs = read_update_logs(conn, id)?;
            Ok(Some(row.into_document(logs)?))
        }
        None => Ok(None),
    }
}

fn insert_update_log(
    conn: &Connection,
    workflow_id: &str,
    username: &str,
    version: i64,
    at: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO workflow_update_logs (workflow_id, username, version, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![workflow_id, username, version, at],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- workflows ----------------------------------------------------------

    /// Insert a new workflow at version 1, owned by `owner`.
    pub fn insert_workflow(
        &self,
        new: &NewWorkflow,
        owner: &str,
    ) -> Result<WorkflowDocument, DatabaseError> {
        new.validate()?;

        let id = Uuid::new_v4().simple().to_string();
        let now = Utc::now().to_rfc3339();
        let nodes = serde_json::to_string(&new.nodes)?;
        let edges = serde_json::to_string(&new.edges)?;
        let metadata = serde_json::to_string(&new.metadata)?;
        let description = new.description.as_deref().filter(|d| !d.is_empty());

        let doc = self.transaction(|conn| {
            conn.execute(
                "INSERT INTO workflows (id, name, description, nodes, edges, metadata, version,
                     owner_id, is_public, created_at, updated_at, last_modified_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, 0, ?8, ?8, ?7)",
                params![id, new.name, description, nodes, edges, metadata, owner, now],
            )?;
            insert_update_log(conn, &id, owner, 1, &now)?;
            read_workflow(conn, &id)?.ok_or_else(|| workflow_not_found(&id))
        })?;

        info!(id = %doc.id, owner, "created workflow");
        Ok(doc)
    }

    /// Fetch a workflow by id, failing with `NotFound` if it does not exist.
    pub fn get_workflow_entry(&self, id: &str) -> Result<WorkflowDocument, DatabaseError> {
        self.get_workflow(id)?.ok_or_else(|| workflow_not_found(id))
    }

    /// Fetch a workflow by id.
    pub fn get_workflow(&self, id: &str) -> Result<Option<WorkflowDocument>, DatabaseError> {
        let conn = self.conn();
        read_workflow(&conn, id)
    }

    /// List workflows, most recently updated first.
    pub fn list_workflows(
        &self,
        skip: u32,
        limit: u32,
    ) -> Result<Vec<WorkflowDocument>, DatabaseError> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM workflows ORDER BY updated_at DESC, id ASC LIMIT ?1 OFFSET ?2",
            WORKFLOW_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![limit, skip], map_workflow_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|row| {
                let logs = read_update_logs(&conn, &row.id)?;
                row.into_document(logs)
            })
            .collect()
    }

    /// Count all workflows.
    pub fn count_workflows(&self) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM workflows", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Apply `update` if `update.known_version` is still the stored version.
    ///
    /// On success the version is incremented by exactly one, `last_modified_by`
    /// is set to `username` and an update-log entry is written. On a stale
    /// version nothing is written and `VersionConflict` carries the stored
    /// version and last modifier. An update with no fields changes nothing.
    pub fn update_workflow(
        &self,
        id: &str,
        update: &WorkflowUpdate,
        username: &str,
    ) -> Result<WorkflowDocument, DatabaseError> {
        let doc = self.transaction(|conn| {
            let current = read_workflow(conn, id)?.ok_or_else(|| workflow_not_found(id))?;

            if current.version != update.known_version {
                return Err(DatabaseError::VersionConflict {
                    id: id.to_string(),
                    current_version: current.version,
                    your_version: update.known_version,
                    last_modified_by: current.last_modified_by,
                });
            }
            if update.is_empty() {
                return Ok(current);
            }

            let mut merged = current.clone();
            update.apply_to(&mut merged);
            merged.validate()?;

            let now = Utc::now().to_rfc3339();
            let changed = conn.execute(
                "UPDATE workflows
                 SET name = ?1, description = ?2, nodes = ?3, edges = ?4, metadata = ?5,
                     version = version + 1, updated_at = ?6, last_modified_by = ?7
                 WHERE id = ?8 AND version = ?9",
                params![
                    merged.name,
                    merged.description,
                    serde_json::to_string(&merged.nodes)?,
                    serde_json::to_string(&merged.edges)?,
                    serde_json::to_string(&merged.metadata)?,
                    now,
                    username,
                    id,
                    update.known_version,
                ],
            )?;
            if changed == 0 {
                // Lost the race against a writer on another connection.
                let stored = read_workflow(conn, id)?.ok_or_else(|| workflow_not_found(id))?;
                return Err(DatabaseError::VersionConflict {
                    id: id.to_string(),
                    current_version: stored.version,
                    your_version: update.known_version,
                    last_modified_by: stored.last_modified_by,
                });
            }

            insert_update_log(conn, id, username, update.known_version + 1, &now)?;
            read_workflow(conn, id)?.ok_or_else(|| workflow_not_found(id))
        })?;

        debug!(id, version = doc.version, username, "updated workflow");
        Ok(doc)
    }

    /// Delete a workflow and its update log. Returns `false` if it did not exist.
    pub fn delete_workflow(&self, id: &str) -> Result<bool, DatabaseError> {
        let deleted = self.transaction(|conn| {
            conn.execute(
                "DELETE FROM workflow_update_logs WHERE workflow_id = ?1",
                params![id],
            )?;
            let changed = conn.execute("DELETE FROM workflows WHERE id = ?1", params![id])?;
            Ok(changed > 0)
        })?;
        if deleted {
            info!(id, "deleted workflow");
        }
        Ok(deleted)
    }

    /// Make a workflow public and give it a share token (reusing an existing
    /// one). Sharing does not change the version.
    pub fn share_workflow(&self, id: &str) -> Result<WorkflowDocument, DatabaseError> {
        self.transaction(|conn| {
            let current = read_workflow(conn, id)?.ok_or_else(|| workflow_not_found(id))?;
            let token = current
                .share_token
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
            conn.execute(
                "UPDATE workflows SET is_public = 1, share_token = ?1 WHERE id = ?2",
                params![token, id],
            )?;
            read_workflow(conn, id)?.ok_or_else(|| workflow_not_found(id))
        })
    }

    /// Look up a public workflow by its share token.
    pub fn get_workflow_by_share_token(
        &self,
        token: &str,
    ) -> Result<Option<WorkflowDocument>, DatabaseError> {
        let conn = self.conn();
        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM workflows WHERE share_token = ?1 AND is_public = 1",
                params![token],
                |row| row.get(0),
            )
            .optional()?;
        match id {
            Some(id) => read_workflow(&conn, &id),
            None => Ok(None),
        }
    }

    /// Save history of a workflow, oldest first.
    pub fn list_update_logs(&self, workflow_id: &str) -> Result<Vec<UpdateLog>, DatabaseError> {
        let conn = self.conn();
        read_update_logs(&conn, workflow_id)
    }

    // -- users --------------------------------------------------------------

    /// Create a user with a bcrypt-hashed password.
    pub fn create_user(
        &self,
        username: &str,
        password: &str,
        is_admin: bool,
    ) -> Result<User, DatabaseError> {
        if self.get_user(username)?.is_some() {
            return Err(DatabaseError::AlreadyExists {
                entity: "user".into(),
                id: username.to_string(),
            });
        }

        let hash = bcrypt::hash(password, PASSWORD_HASH_COST)?;
        let now = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO users (username, password_hash, is_admin, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![username, hash, is_admin, now.to_rfc3339()],
        )?;
        info!(username, is_admin, "created user");
        Ok(User {
            username: username.to_string(),
            is_admin,
            created_at: now,
        })
    }

    /// Replace a user's password.
    pub fn set_user_password(&self, username: &str, password: &str) -> Result<(), DatabaseError> {
        let hash = bcrypt::hash(password, PASSWORD_HASH_COST)?;
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE users SET password_hash = ?1 WHERE username = ?2",
            params![hash, username],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "user".into(),
                id: username.to_string(),
            });
        }
        debug!(username, "password updated");
        Ok(())
    }

    pub fn get_user(&self, username: &str) -> Result<Option<User>, DatabaseError> {
        let conn = self.conn();
        let user = conn
            .query_row(
                "SELECT username, is_admin, created_at FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok(User {
                        username: row.get(0)?,
                        is_admin: row.get(1)?,
                        created_at: parse_timestamp(row, 2)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    /// Check a username/password pair. Returns the user on success.
    pub fn verify_user(&self, username: &str, password: &str) -> Result<Option<User>, DatabaseError> {
        let hash: Option<String> = {
            let conn = self.conn();
            conn.query_row(
                "SELECT password_hash FROM users WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()?
        };
        let Some(hash) = hash else {
            return Ok(None);
        };
        if !bcrypt::verify(password, &hash)? {
            return Ok(None);
        }
        self.get_user(username)
    }

    pub fn list_users(&self) -> Result<Vec<User>, DatabaseError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT username, is_admin, created_at FROM users ORDER BY username")?;
        let users = stmt
            .query_map([], |row| {
                Ok(User {
                    username: row.get(0)?,
                    is_admin: row.get(1)?,
                    created_at: parse_timestamp(row, 2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn count_users(&self) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count)
    }
}
