use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codes::CodeProbe;
use crate::config::StoreConfig;
use crate::error::PostingError;
use crate::models::{
    HighlightAllocation, JobPosting, NewPosting, Plan, Posting, PostingStatus, QUOTA_STATUSES_SQL,
};

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let path = config.ensure_parent_dir()?;
        Self::open_at(&path, config.busy_timeout())
            .with_context(|| format!("Failed to open database at {}", path.display()))
    }

    pub fn open_at(path: &Path, busy_timeout: Duration) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        Self::configure(&conn, busy_timeout)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn, Duration::from_secs(5))?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    fn configure(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
        // The busy timeout is the lock-wait bound for competing writers.
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(())
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn init(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS plans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                highlight_quota INTEGER,
                active INTEGER NOT NULL DEFAULT 1 CHECK (active IN (0, 1)),
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS plan_locks (
                plan_id INTEGER PRIMARY KEY REFERENCES plans(id),
                generation INTEGER NOT NULL DEFAULT 0,
                locked_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS postings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                code TEXT NOT NULL UNIQUE CHECK (length(code) = 6),
                owner_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'draft' CHECK (status IN (
                    'draft', 'under_review', 'published', 'unpublished', 'paused', 'expired', 'closed'
                )),
                highlight_requested INTEGER NOT NULL DEFAULT 0 CHECK (highlight_requested IN (0, 1)),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Every code ever issued. Rows are never removed, so codes are not reused
            -- after a posting is deleted.
            CREATE TABLE IF NOT EXISTS issued_codes (
                code TEXT PRIMARY KEY,
                issued_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS highlight_allocations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                posting_id INTEGER NOT NULL UNIQUE REFERENCES postings(id),
                plan_id INTEGER NOT NULL REFERENCES plans(id),
                active INTEGER NOT NULL DEFAULT 0 CHECK (active IN (0, 1)),
                activated_at TEXT NOT NULL,
                deactivated_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_plans_owner ON plans(owner_id, active);
            CREATE INDEX IF NOT EXISTS idx_postings_owner ON postings(owner_id);
            CREATE INDEX IF NOT EXISTS idx_allocations_plan ON highlight_allocations(plan_id, active);
            "#,
        )
    }

    pub fn ensure_initialized(&self) -> Result<(), PostingError> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='postings'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(PostingError::Uninitialized);
        }
        Ok(())
    }

    /// Opens a write transaction that takes SQLite's write lock up front, so competing
    /// writers queue on the busy timeout instead of failing at commit.
    pub fn write_transaction(&mut self) -> rusqlite::Result<Transaction<'_>> {
        self.conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
    }

    // --- Plan operations ---

    pub fn add_plan(&self, owner_id: i64, name: &str, highlight_quota: Option<i64>) -> rusqlite::Result<i64> {
        self.conn.execute(
            "INSERT INTO plans (owner_id, name, highlight_quota, active, created_at)
             VALUES (?1, ?2, ?3, 1, ?4)",
            params![owner_id, name, highlight_quota, Utc::now()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Marks a plan as no longer active. Existing allocations keep pointing at it.
    pub fn end_plan(&self, plan_id: i64) -> rusqlite::Result<bool> {
        let changed = self.conn.execute(
            "UPDATE plans SET active = 0 WHERE id = ?1 AND active = 1",
            [plan_id],
        )?;
        Ok(changed > 0)
    }
}

impl CodeProbe for Connection {
    fn code_exists(&self, code: &str) -> Result<bool, PostingError> {
        let exists: bool = self.query_row(
            "SELECT EXISTS(SELECT 1 FROM issued_codes WHERE code = ?1)",
            [code],
            |row| row.get(0),
        )?;
        Ok(exists)
    }
}

// --- Plan queries ---

pub fn get_plan(conn: &Connection, plan_id: i64) -> rusqlite::Result<Option<Plan>> {
    conn.query_row(
        "SELECT id, owner_id, name, highlight_quota, active, created_at FROM plans WHERE id = ?1",
        [plan_id],
        row_to_plan,
    )
    .optional()
}

/// The owner's most recently created plan that is still active.
pub fn find_active_plan_for_owner(conn: &Connection, owner_id: i64) -> rusqlite::Result<Option<Plan>> {
    conn.query_row(
        "SELECT id, owner_id, name, highlight_quota, active, created_at FROM plans
         WHERE owner_id = ?1 AND active = 1
         ORDER BY created_at DESC, id DESC
         LIMIT 1",
        [owner_id],
        row_to_plan,
    )
    .optional()
}

/// Writes the plan's lock row. Inside a transaction this serializes every other
/// transaction that locks the same plan until commit or rollback.
pub fn lock_plan(conn: &Connection, plan_id: i64) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO plan_locks (plan_id, generation, locked_at) VALUES (?1, 1, ?2)
         ON CONFLICT(plan_id) DO UPDATE SET
             generation = generation + 1,
             locked_at = excluded.locked_at",
        params![plan_id, Utc::now()],
    )?;
    Ok(())
}

pub fn count_active_allocations(
    conn: &Connection,
    plan_id: i64,
    exclude_posting_id: Option<i64>,
) -> rusqlite::Result<i64> {
    let sql = format!(
        "SELECT COUNT(*) FROM highlight_allocations a
         JOIN postings p ON p.id = a.posting_id
         WHERE a.plan_id = ?1
           AND a.active = 1
           AND p.status IN {QUOTA_STATUSES_SQL}
           AND (?2 IS NULL OR a.posting_id != ?2)"
    );
    conn.query_row(&sql, params![plan_id, exclude_posting_id], |row| row.get(0))
}

fn row_to_plan(row: &rusqlite::Row) -> rusqlite::Result<Plan> {
    Ok(Plan {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        highlight_quota: row.get(3)?,
        active: row.get(4)?,
        created_at: row.get(5)?,
    })
}

// --- Posting operations ---

/// Records the code as issued. A uniqueness violation means another writer claimed it
/// after our probe.
pub fn issue_code(conn: &Connection, code: &str, now: DateTime<Utc>) -> Result<(), PostingError> {
    match conn.execute(
        "INSERT INTO issued_codes (code, issued_at) VALUES (?1, ?2)",
        params![code, now],
    ) {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(PostingError::CodeCollision(code.to_string())),
        Err(e) => Err(e.into()),
    }
}

pub fn insert_posting(
    conn: &Connection,
    code: &str,
    input: &NewPosting,
    now: DateTime<Utc>,
) -> Result<i64, PostingError> {
    let result = conn.execute(
        "INSERT INTO postings (code, owner_id, title, status, highlight_requested, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![code, input.owner_id, input.title, input.status, input.highlight, now],
    );
    match result {
        Ok(_) => Ok(conn.last_insert_rowid()),
        Err(e) if is_unique_violation(&e) => Err(PostingError::CodeCollision(code.to_string())),
        Err(e) => Err(e.into()),
    }
}

pub fn update_posting(conn: &Connection, posting: &JobPosting) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE postings
         SET owner_id = ?2, title = ?3, status = ?4, highlight_requested = ?5, updated_at = ?6
         WHERE id = ?1",
        params![
            posting.id,
            posting.owner_id,
            posting.title,
            posting.status,
            posting.highlight_requested,
            posting.updated_at
        ],
    )?;
    Ok(())
}

pub fn get_posting(conn: &Connection, posting_id: i64) -> rusqlite::Result<Option<JobPosting>> {
    conn.query_row(
        "SELECT id, code, owner_id, title, status, highlight_requested, created_at, updated_at
         FROM postings WHERE id = ?1",
        [posting_id],
        row_to_posting,
    )
    .optional()
}

/// Loads the posting together with its allocation.
pub fn load_posting(conn: &Connection, posting_id: i64) -> Result<Posting, PostingError> {
    let posting = get_posting(conn, posting_id)?.ok_or(PostingError::NotFound(posting_id))?;
    let allocation = get_allocation(conn, posting_id)?;
    Ok(Posting { posting, allocation })
}

fn row_to_posting(row: &rusqlite::Row) -> rusqlite::Result<JobPosting> {
    Ok(JobPosting {
        id: row.get(0)?,
        code: row.get(1)?,
        owner_id: row.get(2)?,
        title: row.get(3)?,
        status: row.get::<_, PostingStatus>(4)?,
        highlight_requested: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

// --- Allocation operations ---

pub fn get_allocation(conn: &Connection, posting_id: i64) -> rusqlite::Result<Option<HighlightAllocation>> {
    conn.query_row(
        "SELECT id, posting_id, plan_id, active, activated_at, deactivated_at
         FROM highlight_allocations WHERE posting_id = ?1",
        [posting_id],
        row_to_allocation,
    )
    .optional()
}

/// Creates the allocation on first activation, or reactivates the existing record in place.
pub fn upsert_active_allocation(
    conn: &Connection,
    posting_id: i64,
    plan_id: i64,
    now: DateTime<Utc>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO highlight_allocations (posting_id, plan_id, active, activated_at, deactivated_at)
         VALUES (?1, ?2, 1, ?3, NULL)
         ON CONFLICT(posting_id) DO UPDATE SET
             plan_id = excluded.plan_id,
             active = 1,
             activated_at = excluded.activated_at,
             deactivated_at = NULL",
        params![posting_id, plan_id, now],
    )?;
    Ok(())
}

pub fn repoint_allocation(conn: &Connection, posting_id: i64, plan_id: i64) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE highlight_allocations SET plan_id = ?2 WHERE posting_id = ?1",
        params![posting_id, plan_id],
    )?;
    Ok(())
}

/// Returns whether an active allocation was actually switched off.
pub fn deactivate_allocation(
    conn: &Connection,
    posting_id: i64,
    now: DateTime<Utc>,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE highlight_allocations SET active = 0, deactivated_at = ?2
         WHERE posting_id = ?1 AND active = 1",
        params![posting_id, now],
    )?;
    Ok(changed > 0)
}

fn row_to_allocation(row: &rusqlite::Row) -> rusqlite::Result<HighlightAllocation> {
    Ok(HighlightAllocation {
        id: row.get(0)?,
        posting_id: row.get(1)?,
        plan_id: row.get(2)?,
        active: row.get(3)?,
        activated_at: row.get(4)?,
        deactivated_at: row.get(5)?,
    })
}

fn is_unique_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}
