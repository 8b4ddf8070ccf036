//! `SQLite` storage implementation.
//!
//! All mutations run through [`SqliteStorage::mutate`], which wraps the
//! closure in an immediate transaction and flushes the collected events and
//! dirty markers inside the same transaction. Import helpers that must
//! participate in a caller-owned transaction are associated functions taking
//! a `&Connection` (a `Transaction` derefs to one).

use crate::error::{Result, TangleError};
use crate::model::{Dependency, DependencyType, Event, EventType, Issue, Priority, Status};
use crate::storage::schema::apply_schema;
use crate::util::time::parse_timestamp;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
}

/// Context for a mutation operation, tracking side effects.
pub struct MutationContext {
    pub op_name: String,
    pub actor: String,
    pub events: Vec<Event>,
    pub dirty_ids: HashSet<String>,
}

impl MutationContext {
    #[must_use]
    pub fn new(op_name: &str, actor: &str) -> Self {
        Self {
            op_name: op_name.to_string(),
            actor: actor.to_string(),
            events: Vec::new(),
            dirty_ids: HashSet::new(),
        }
    }

    pub fn record_event(&mut self, event_type: EventType, issue_id: &str, details: Option<String>) {
        self.events.push(Event {
            id: 0, // DB assigns the rowid
            issue_id: issue_id.to_string(),
            event_type,
            actor: self.actor.clone(),
            old_value: None,
            new_value: None,
            comment: details,
            created_at: Utc::now(),
        });
    }

    /// Record a field change event with old and new values.
    pub fn record_field_change(
        &mut self,
        event_type: EventType,
        issue_id: &str,
        old_value: Option<String>,
        new_value: Option<String>,
        comment: Option<String>,
    ) {
        self.events.push(Event {
            id: 0,
            issue_id: issue_id.to_string(),
            event_type,
            actor: self.actor.clone(),
            old_value,
            new_value,
            comment,
            created_at: Utc::now(),
        });
    }

    pub fn mark_dirty(&mut self, issue_id: &str) {
        self.dirty_ids.insert(issue_id.to_string());
    }
}

/// Filters for listing issues.
#[derive(Debug, Clone, Default)]
pub struct ListFilters {
    pub status: Option<Status>,
    pub issue_type: Option<crate::model::IssueType>,
    pub assignee: Option<String>,
    pub include_tombstones: bool,
    pub limit: Option<usize>,
}

/// Partial update for an issue. `None` means "leave unchanged"; the inner
/// `Option` on clearable fields distinguishes "set" from "clear".
#[derive(Debug, Clone, Default)]
pub struct IssueUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub design: Option<Option<String>>,
    pub acceptance_criteria: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub issue_type: Option<crate::model::IssueType>,
    pub assignee: Option<Option<String>>,
    pub owner: Option<Option<String>>,
    pub external_ref: Option<Option<String>>,
    pub close_reason: Option<Option<String>>,
    pub closed_at: Option<Option<DateTime<Utc>>>,
    pub deleted_at: Option<Option<DateTime<Utc>>>,
}

impl IssueUpdate {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.design.is_none()
            && self.acceptance_criteria.is_none()
            && self.notes.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.issue_type.is_none()
            && self.assignee.is_none()
            && self.owner.is_none()
            && self.external_ref.is_none()
            && self.close_reason.is_none()
            && self.closed_at.is_none()
            && self.deleted_at.is_none()
    }
}

const ISSUE_COLUMNS: &str = "id, content_hash, title, description, design, acceptance_criteria, notes, \
     status, priority, issue_type, assignee, owner, created_at, created_by, \
     updated_at, closed_at, close_reason, external_ref, deleted_at";

impl SqliteStorage {
    /// Open a new connection to the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema
    /// application fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a new connection with an optional busy timeout (ms).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema
    /// application fails.
    pub fn open_with_timeout(path: &Path, lock_timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;
        if let Some(timeout) = lock_timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        }
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Borrow the underlying connection for read-only helpers.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Execute a mutation inside an immediate transaction.
    ///
    /// The closure performs its writes against the transaction and records
    /// events and dirty IDs on the context; those are flushed in the same
    /// transaction, so a mutation and its audit trail commit atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails. The transaction is rolled back
    /// on error.
    pub fn mutate<F, R>(&mut self, op: &str, actor: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let mut ctx = MutationContext::new(op, actor);

        let result = f(&tx, &mut ctx)?;

        for event in ctx.events {
            tx.execute(
                "INSERT INTO events (issue_id, event_type, actor, old_value, new_value, comment, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    event.issue_id,
                    event.event_type.as_str(),
                    event.actor,
                    event.old_value,
                    event.new_value,
                    event.comment,
                    event.created_at.to_rfc3339()
                ],
            )?;
        }

        for id in ctx.dirty_ids {
            tx.execute(
                "INSERT OR REPLACE INTO dirty_issues (issue_id, marked_at) VALUES (?, ?)",
                rusqlite::params![id, Utc::now().to_rfc3339()],
            )?;
        }

        tx.commit()?;

        Ok(result)
    }

    /// Create a new issue, including its labels.
    ///
    /// # Errors
    ///
    /// Returns an error if the issue cannot be inserted (e.g. ID collision).
    pub fn create_issue(&mut self, issue: &Issue, actor: &str) -> Result<()> {
        let content_hash = issue.compute_content_hash();
        self.mutate("create_issue", actor, |tx, ctx| {
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO issues (
                    id, content_hash, title, description, design, acceptance_criteria, notes,
                    status, priority, issue_type, assignee, owner, created_at, created_by,
                    updated_at, closed_at, close_reason, external_ref, deleted_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    issue.id,
                    content_hash,
                    issue.title,
                    issue.description,
                    issue.design,
                    issue.acceptance_criteria,
                    issue.notes,
                    issue.status.as_str(),
                    issue.priority.0,
                    issue.issue_type.as_str(),
                    issue.assignee,
                    issue.owner,
                    issue.created_at.to_rfc3339(),
                    issue.created_by,
                    issue.updated_at.to_rfc3339(),
                    issue.closed_at.map(|dt| dt.to_rfc3339()),
                    issue.close_reason,
                    issue.external_ref,
                    issue.deleted_at.map(|dt| dt.to_rfc3339()),
                ],
            )?;
            if inserted == 0 {
                return Err(TangleError::IdCollision {
                    id: issue.id.clone(),
                });
            }

            for label in &issue.labels {
                tx.execute(
                    "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?, ?)",
                    rusqlite::params![issue.id, label],
                )?;
            }

            ctx.record_event(EventType::Created, &issue.id, Some(issue.title.clone()));
            ctx.mark_dirty(&issue.id);
            Ok(())
        })
    }

    /// Apply a partial update to an issue.
    ///
    /// Recomputes the content hash, bumps `updated_at`, records field-change
    /// events, and marks the issue dirty.
    ///
    /// # Errors
    ///
    /// Returns `IssueNotFound` if the issue doesn't exist.
    #[allow(clippy::too_many_lines)]
    pub fn update_issue(&mut self, id: &str, updates: &IssueUpdate, actor: &str) -> Result<Issue> {
        let mut issue = self
            .get_issue(id)?
            .ok_or_else(|| TangleError::IssueNotFound { id: id.to_string() })?;

        if updates.is_empty() {
            return Ok(issue);
        }

        // Relations feed the content hash
        issue.labels = self.get_labels(id)?;
        issue.dependencies = Self::get_dependencies_full(&self.conn, id)?;

        self.mutate("update_issue", actor, |tx, ctx| {
            let mut set_clauses: Vec<String> = vec![];
            let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

            let mut add_update = |field: &str, val: Box<dyn rusqlite::ToSql>| {
                set_clauses.push(format!("{field} = ?"));
                params.push(val);
            };

            if let Some(ref title) = updates.title {
                let old_title = issue.title.clone();
                issue.title.clone_from(title);
                add_update("title", Box::new(title.clone()));
                ctx.record_field_change(
                    EventType::Updated,
                    id,
                    Some(old_title),
                    Some(title.clone()),
                    Some("Title changed".to_string()),
                );
            }

            if let Some(ref val) = updates.description {
                issue.description.clone_from(val);
                add_update("description", Box::new(val.clone()));
            }
            if let Some(ref val) = updates.design {
                issue.design.clone_from(val);
                add_update("design", Box::new(val.clone()));
            }
            if let Some(ref val) = updates.acceptance_criteria {
                issue.acceptance_criteria.clone_from(val);
                add_update("acceptance_criteria", Box::new(val.clone()));
            }
            if let Some(ref val) = updates.notes {
                issue.notes.clone_from(val);
                add_update("notes", Box::new(val.clone()));
            }

            if let Some(status) = updates.status {
                let old_status = issue.status.as_str().to_string();
                issue.status = status;
                add_update("status", Box::new(status.as_str().to_string()));
                if old_status != status.as_str() {
                    ctx.record_field_change(
                        EventType::StatusChanged,
                        id,
                        Some(old_status),
                        Some(status.as_str().to_string()),
                        None,
                    );
                }
            }

            if let Some(priority) = updates.priority {
                let old_priority = issue.priority.0;
                issue.priority = priority;
                add_update("priority", Box::new(priority.0));
                if priority.0 != old_priority {
                    ctx.record_field_change(
                        EventType::PriorityChanged,
                        id,
                        Some(old_priority.to_string()),
                        Some(priority.0.to_string()),
                        None,
                    );
                }
            }

            if let Some(issue_type) = updates.issue_type {
                issue.issue_type = issue_type;
                add_update("issue_type", Box::new(issue_type.as_str().to_string()));
            }

            if let Some(ref val) = updates.assignee {
                issue.assignee.clone_from(val);
                add_update("assignee", Box::new(val.clone()));
            }
            if let Some(ref val) = updates.owner {
                issue.owner.clone_from(val);
                add_update("owner", Box::new(val.clone()));
            }
            if let Some(ref val) = updates.external_ref {
                issue.external_ref.clone_from(val);
                add_update("external_ref", Box::new(val.clone()));
            }
            if let Some(ref val) = updates.close_reason {
                issue.close_reason.clone_from(val);
                add_update("close_reason", Box::new(val.clone()));
            }
            if let Some(val) = updates.closed_at {
                issue.closed_at = val;
                add_update("closed_at", Box::new(val.map(|d| d.to_rfc3339())));
            }
            if let Some(val) = updates.deleted_at {
                issue.deleted_at = val;
                add_update("deleted_at", Box::new(val.map(|d| d.to_rfc3339())));
            }

            // Always bump updated_at and refresh the content hash
            set_clauses.push("updated_at = ?".to_string());
            params.push(Box::new(Utc::now().to_rfc3339()));
            set_clauses.push("content_hash = ?".to_string());
            params.push(Box::new(issue.compute_content_hash()));

            let sql = format!("UPDATE issues SET {} WHERE id = ?", set_clauses.join(", "));
            params.push(Box::new(id.to_string()));

            let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(AsRef::as_ref).collect();
            tx.execute(&sql, params_refs.as_slice())?;

            ctx.mark_dirty(id);
            Ok(())
        })?;

        self.get_issue(id)?
            .ok_or_else(|| TangleError::IssueNotFound { id: id.to_string() })
    }

    /// Delete an issue by turning it into a tombstone.
    ///
    /// # Errors
    ///
    /// Returns an error if the issue doesn't exist or the update fails.
    pub fn delete_issue(&mut self, id: &str, actor: &str, reason: Option<&str>) -> Result<Issue> {
        self.get_issue(id)?
            .ok_or_else(|| TangleError::IssueNotFound { id: id.to_string() })?;

        let now = Utc::now();
        self.mutate("delete_issue", actor, |tx, ctx| {
            tx.execute(
                "UPDATE issues SET status = 'tombstone', deleted_at = ?, updated_at = ? WHERE id = ?",
                rusqlite::params![now.to_rfc3339(), now.to_rfc3339(), id],
            )?;
            ctx.record_event(EventType::Deleted, id, reason.map(str::to_string));
            ctx.mark_dirty(id);
            Ok(())
        })?;

        self.get_issue(id)?
            .ok_or_else(|| TangleError::IssueNotFound { id: id.to_string() })
    }

    /// Get an issue by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_issue(&self, id: &str) -> Result<Option<Issue>> {
        Self::get_issue_in_tx(&self.conn, id)
    }

    /// Get an issue by ID using a caller-owned connection/transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_issue_in_tx(conn: &Connection, id: &str) -> Result<Option<Issue>> {
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?");
        let mut stmt = conn.prepare(&sql)?;
        let result = stmt.query_row([id], issue_from_row);
        match result {
            Ok(issue) => Ok(Some(issue)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List issues with optional filters, tombstones excluded by default.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn list_issues(&self, filters: &ListFilters) -> Result<Vec<Issue>> {
        let mut sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE 1=1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

        if let Some(status) = filters.status {
            sql.push_str(" AND status = ?");
            params.push(Box::new(status.as_str().to_string()));
        } else if !filters.include_tombstones {
            sql.push_str(" AND status != 'tombstone'");
        }
        if let Some(issue_type) = filters.issue_type {
            sql.push_str(" AND issue_type = ?");
            params.push(Box::new(issue_type.as_str().to_string()));
        }
        if let Some(ref assignee) = filters.assignee {
            sql.push_str(" AND assignee = ?");
            params.push(Box::new(assignee.clone()));
        }

        sql.push_str(" ORDER BY priority ASC, created_at ASC");
        if let Some(limit) = filters.limit {
            use std::fmt::Write as _;
            let _ = write!(sql, " LIMIT {limit}");
        }

        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(AsRef::as_ref).collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let issues = stmt
            .query_map(params_refs.as_slice(), issue_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(issues)
    }

    /// Check whether an issue ID exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn id_exists(&self, id: &str) -> Result<bool> {
        let exists = self
            .conn
            .query_row("SELECT 1 FROM issues WHERE id = ?", [id], |_| Ok(true))
            .optional()?
            .unwrap_or(false);
        Ok(exists)
    }

    /// Count all issues, tombstones included.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn count_issues(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM issues", [], |row| row.get(0))?;
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        Ok(count as usize)
    }

    /// All issue IDs, tombstones included.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_all_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT id FROM issues ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    // === Dependencies ===

    /// Add a dependency edge.
    ///
    /// # Errors
    ///
    /// Returns `SelfDependency`, `DependencyNotFound`, or
    /// `DuplicateDependency` on validation failure.
    pub fn add_dependency(
        &mut self,
        issue_id: &str,
        depends_on_id: &str,
        dep_type: DependencyType,
        actor: &str,
    ) -> Result<()> {
        if issue_id == depends_on_id {
            return Err(TangleError::SelfDependency {
                id: issue_id.to_string(),
            });
        }
        if !self.id_exists(issue_id)? {
            return Err(TangleError::IssueNotFound {
                id: issue_id.to_string(),
            });
        }
        if !self.id_exists(depends_on_id)? {
            return Err(TangleError::DependencyNotFound {
                id: depends_on_id.to_string(),
            });
        }

        self.mutate("add_dependency", actor, |tx, ctx| {
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO dependencies (issue_id, depends_on_id, type, created_at)
                 VALUES (?, ?, ?, ?)",
                rusqlite::params![
                    issue_id,
                    depends_on_id,
                    dep_type.as_str(),
                    Utc::now().to_rfc3339()
                ],
            )?;
            if inserted == 0 {
                return Err(TangleError::DuplicateDependency {
                    from: issue_id.to_string(),
                    to: depends_on_id.to_string(),
                });
            }
            ctx.record_field_change(
                EventType::DependencyAdded,
                issue_id,
                None,
                Some(format!("{depends_on_id} ({})", dep_type.as_str())),
                None,
            );
            ctx.mark_dirty(issue_id);
            Ok(())
        })
    }

    /// Remove a dependency edge. Returns whether an edge was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn remove_dependency(
        &mut self,
        issue_id: &str,
        depends_on_id: &str,
        actor: &str,
    ) -> Result<bool> {
        self.mutate("remove_dependency", actor, |tx, ctx| {
            let removed = tx.execute(
                "DELETE FROM dependencies WHERE issue_id = ? AND depends_on_id = ?",
                rusqlite::params![issue_id, depends_on_id],
            )?;
            if removed > 0 {
                ctx.record_field_change(
                    EventType::DependencyRemoved,
                    issue_id,
                    Some(depends_on_id.to_string()),
                    None,
                    None,
                );
                ctx.mark_dirty(issue_id);
            }
            Ok(removed > 0)
        })
    }

    /// Get dependencies as full `Dependency` structs, ordered by target.
    ///
    /// Associated function so import code can call it mid-transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_dependencies_full(conn: &Connection, issue_id: &str) -> Result<Vec<Dependency>> {
        let mut stmt = conn.prepare(
            "SELECT issue_id, depends_on_id, type, created_at, metadata
             FROM dependencies WHERE issue_id = ? ORDER BY depends_on_id",
        )?;

        let deps = stmt
            .query_map([issue_id], |row| {
                let created_at_str: String = row.get(3)?;
                Ok(Dependency {
                    issue_id: row.get(0)?,
                    depends_on_id: row.get(1)?,
                    dep_type: row
                        .get::<_, String>(2)?
                        .parse()
                        .unwrap_or(DependencyType::Blocks),
                    created_at: parse_datetime(&created_at_str),
                    metadata: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(deps)
    }

    // === Labels ===

    /// Get labels for an issue, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_labels(&self, issue_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT label FROM labels WHERE issue_id = ? ORDER BY label")?;
        let labels = stmt
            .query_map([issue_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(labels)
    }

    /// Replace the labels of an issue.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set_labels(&mut self, issue_id: &str, labels: &[String], actor: &str) -> Result<()> {
        if !self.id_exists(issue_id)? {
            return Err(TangleError::IssueNotFound {
                id: issue_id.to_string(),
            });
        }
        self.mutate("set_labels", actor, |tx, ctx| {
            tx.execute("DELETE FROM labels WHERE issue_id = ?", [issue_id])?;
            for label in labels {
                tx.execute(
                    "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?, ?)",
                    rusqlite::params![issue_id, label],
                )?;
            }
            ctx.mark_dirty(issue_id);
            Ok(())
        })
    }

    // === Export support ===

    /// Get an issue with labels and dependencies populated.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_issue_for_export(&self, id: &str) -> Result<Option<Issue>> {
        let Some(mut issue) = self.get_issue(id)? else {
            return Ok(None);
        };
        issue.labels = self.get_labels(id)?;
        issue.dependencies = Self::get_dependencies_full(&self.conn, id)?;
        Ok(Some(issue))
    }

    /// All issues with relations populated, ordered by ID for deterministic
    /// export output.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_all_issues_for_export(&self) -> Result<Vec<Issue>> {
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut issues = stmt
            .query_map([], issue_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut labels_by_issue = self.get_all_labels()?;
        for issue in &mut issues {
            if let Some(labels) = labels_by_issue.remove(&issue.id) {
                issue.labels = labels;
            }
            issue.dependencies = Self::get_dependencies_full(&self.conn, &issue.id)?;
        }
        Ok(issues)
    }

    fn get_all_labels(&self) -> Result<HashMap<String, Vec<String>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT issue_id, label FROM labels ORDER BY issue_id, label")?;
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (issue_id, label) = row?;
            map.entry(issue_id).or_default().push(label);
        }
        Ok(map)
    }

    // === Import support (collision lookups) ===

    /// Find an issue by external reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn find_by_external_ref(&self, external_ref: &str) -> Result<Option<Issue>> {
        Self::find_by_external_ref_in_tx(&self.conn, external_ref)
    }

    /// Find an issue by external reference using a caller-owned connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn find_by_external_ref_in_tx(
        conn: &Connection,
        external_ref: &str,
    ) -> Result<Option<Issue>> {
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE external_ref = ?");
        let result = conn.query_row(&sql, [external_ref], issue_from_row);
        match result {
            Ok(issue) => Ok(Some(issue)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(TangleError::Database(e)),
        }
    }

    /// Find an issue by content hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn find_by_content_hash(&self, content_hash: &str) -> Result<Option<Issue>> {
        Self::find_by_content_hash_in_tx(&self.conn, content_hash)
    }

    /// Find an issue by content hash using a caller-owned connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn find_by_content_hash_in_tx(
        conn: &Connection,
        content_hash: &str,
    ) -> Result<Option<Issue>> {
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE content_hash = ?");
        let result = conn.query_row(&sql, [content_hash], issue_from_row);
        match result {
            Ok(issue) => Ok(Some(issue)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(TangleError::Database(e)),
        }
    }

    /// Check if an issue is a tombstone. Missing issues are not tombstones.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn is_tombstone(&self, id: &str) -> Result<bool> {
        Self::is_tombstone_in_tx(&self.conn, id)
    }

    /// Tombstone check using a caller-owned connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn is_tombstone_in_tx(conn: &Connection, id: &str) -> Result<bool> {
        let result: rusqlite::Result<String> =
            conn.query_row("SELECT status FROM issues WHERE id = ?", [id], |row| {
                row.get(0)
            });
        match result {
            Ok(status) => Ok(status == "tombstone"),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(TangleError::Database(e)),
        }
    }

    /// Upsert an issue (create or update) inside an import transaction.
    ///
    /// Does NOT touch dirty tracking or events; the import loop owns those.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn upsert_issue_in_tx(conn: &Connection, issue: &Issue) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO issues (
                id, content_hash, title, description, design, acceptance_criteria, notes,
                status, priority, issue_type, assignee, owner, created_at, created_by,
                updated_at, closed_at, close_reason, external_ref, deleted_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                issue.id,
                issue.content_hash,
                issue.title,
                issue.description,
                issue.design,
                issue.acceptance_criteria,
                issue.notes,
                issue.status.as_str(),
                issue.priority.0,
                issue.issue_type.as_str(),
                issue.assignee,
                issue.owner,
                issue.created_at.to_rfc3339(),
                issue.created_by,
                issue.updated_at.to_rfc3339(),
                issue.closed_at.map(|dt| dt.to_rfc3339()),
                issue.close_reason,
                issue.external_ref,
                issue.deleted_at.map(|dt| dt.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Replace the labels of an issue inside an import transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn sync_labels_in_tx(conn: &Connection, issue_id: &str, labels: &[String]) -> Result<()> {
        conn.execute("DELETE FROM labels WHERE issue_id = ?", [issue_id])?;
        for label in labels {
            conn.execute(
                "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?, ?)",
                rusqlite::params![issue_id, label],
            )?;
        }
        Ok(())
    }

    /// Replace the outgoing dependency edges of an issue inside an import
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn sync_dependencies_in_tx(
        conn: &Connection,
        issue_id: &str,
        dependencies: &[Dependency],
    ) -> Result<()> {
        conn.execute("DELETE FROM dependencies WHERE issue_id = ?", [issue_id])?;
        for dep in dependencies {
            conn.execute(
                "INSERT OR IGNORE INTO dependencies (issue_id, depends_on_id, type, created_at, metadata)
                 VALUES (?, ?, ?, ?, ?)",
                rusqlite::params![
                    issue_id,
                    dep.depends_on_id,
                    dep.dep_type.as_str(),
                    dep.created_at.to_rfc3339(),
                    dep.metadata,
                ],
            )?;
        }
        Ok(())
    }

    /// Check whether an issue ID exists, inside an import transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn id_exists_in_tx(conn: &Connection, id: &str) -> Result<bool> {
        let exists = conn
            .query_row("SELECT 1 FROM issues WHERE id = ?", [id], |_| Ok(true))
            .optional()?
            .unwrap_or(false);
        Ok(exists)
    }

    // === Metadata / config ===

    /// Get a metadata value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM metadata WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Set a metadata value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set_metadata(&mut self, key: &str, value: &str) -> Result<()> {
        Self::set_metadata_in_tx(&self.conn, key, value)
    }

    /// Set a metadata value using a caller-owned connection/transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set_metadata_in_tx(conn: &Connection, key: &str, value: &str) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
            [key, value],
        )?;
        Ok(())
    }

    /// Get a config value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM config WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Set a config value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set_config(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO config (key, value) VALUES (?, ?)",
            [key, value],
        )?;
        Ok(())
    }

    // === Dirty tracking / export hashes ===

    /// IDs of issues changed since the last export.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_dirty_issue_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT issue_id FROM dirty_issues ORDER BY issue_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Clear dirty flags for the given issue IDs.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear_dirty_flags(&mut self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("DELETE FROM dirty_issues WHERE issue_id IN ({placeholders})");
        let params: Vec<&dyn rusqlite::ToSql> =
            ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
        let deleted = self.conn.execute(&sql, params.as_slice())?;
        Ok(deleted)
    }

    /// Clear all dirty flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear_all_dirty_flags(&mut self) -> Result<usize> {
        let deleted = self.conn.execute("DELETE FROM dirty_issues", [])?;
        Ok(deleted)
    }

    /// Content hash recorded at the last export of an issue.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_export_hash(&self, issue_id: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT content_hash FROM export_hashes WHERE issue_id = ?",
                [issue_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Record export-time content hashes for a batch of issues.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set_export_hashes(&mut self, exports: &[(String, String)]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        Self::set_export_hashes_in_tx(&tx, exports)?;
        tx.commit()?;
        Ok(exports.len())
    }

    /// Record export hashes using a caller-owned connection/transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set_export_hashes_in_tx(conn: &Connection, exports: &[(String, String)]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        for (issue_id, content_hash) in exports {
            conn.execute(
                "INSERT OR REPLACE INTO export_hashes (issue_id, content_hash, exported_at)
                 VALUES (?, ?, ?)",
                rusqlite::params![issue_id, content_hash, now],
            )?;
        }
        Ok(())
    }

    /// Drop all recorded export hashes.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear_all_export_hashes(&mut self) -> Result<usize> {
        let count = self.conn.execute("DELETE FROM export_hashes", [])?;
        Ok(count)
    }

    /// Drop all export hashes using a caller-owned connection/transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear_all_export_hashes_in_tx(conn: &Connection) -> Result<usize> {
        let count = conn.execute("DELETE FROM export_hashes", [])?;
        Ok(count)
    }
}

fn issue_from_row(row: &rusqlite::Row) -> rusqlite::Result<Issue> {
    Ok(Issue {
        id: row.get(0)?,
        content_hash: row.get::<_, Option<String>>(1)?,
        title: row.get(2)?,
        description: row.get::<_, Option<String>>(3)?,
        design: row.get::<_, Option<String>>(4)?,
        acceptance_criteria: row.get::<_, Option<String>>(5)?,
        notes: row.get::<_, Option<String>>(6)?,
        status: row
            .get::<_, String>(7)?
            .parse()
            .unwrap_or(Status::Open),
        priority: Priority(row.get::<_, i32>(8)?),
        issue_type: row
            .get::<_, String>(9)?
            .parse()
            .unwrap_or_default(),
        assignee: row.get::<_, Option<String>>(10)?,
        owner: row.get::<_, Option<String>>(11)?,
        created_at: parse_datetime(&row.get::<_, String>(12)?),
        created_by: row.get::<_, Option<String>>(13)?,
        updated_at: parse_datetime(&row.get::<_, String>(14)?),
        closed_at: row
            .get::<_, Option<String>>(15)?
            .as_deref()
            .map(parse_datetime),
        close_reason: row.get::<_, Option<String>>(16)?,
        external_ref: row.get::<_, Option<String>>(17)?,
        deleted_at: row
            .get::<_, Option<String>>(18)?
            .as_deref()
            .map(parse_datetime),
        labels: vec![],       // Loaded separately if needed
        dependencies: vec![], // Loaded separately if needed
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    parse_timestamp(s).unwrap_or_else(Utc::now)
}
