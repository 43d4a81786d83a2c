//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! The tracker and engine call store methods; they never execute SQL directly.

use crate::{
    error::EngineResult,
    event::EventLogEntry,
    types::{RunId, TimeWindow},
};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};

mod aggregate;
mod opportunity;

pub struct OpportunityStore {
    conn: Connection,
}

/// A recorded analysis run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRow {
    pub run_seq: i64,
    pub run_id: RunId,
    pub run_date: NaiveDate,
    pub window: TimeWindow,
    pub version: String,
    /// Highest status-change id when the run was recorded.
    pub status_change_mark: i64,
}

const RUN_COLUMNS: &str =
    "run_seq, run_id, run_date, window_start, window_end, version, status_change_mark";

fn run_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<RunRow> {
    Ok(RunRow {
        run_seq: r.get(0)?,
        run_id: r.get(1)?,
        run_date: r.get(2)?,
        window: TimeWindow::new(r.get(3)?, r.get(4)?),
        version: r.get(5)?,
        status_change_mark: r.get(6)?,
    })
}

impl OpportunityStore {
    pub fn open(path: &str) -> EngineResult<Self> {
        let conn = Connection::open(path)?;
        // WAL mode only for real files (:memory: ignores it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> EngineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_opportunity.sql"))?;
        Ok(())
    }

    /// Run `f` inside one transaction, rolling back if it fails.
    /// Joins the enclosing transaction when one is already open.
    pub fn in_transaction<T>(&self, f: impl FnOnce() -> EngineResult<T>) -> EngineResult<T> {
        if !self.conn.is_autocommit() {
            return f();
        }
        let tx = self.conn.unchecked_transaction()?;
        let out = f()?;
        tx.commit()?;
        Ok(out)
    }

    // ── Run ────────────────────────────────────────────────────

    pub fn insert_run(
        &self,
        run_id: &str,
        run_date: NaiveDate,
        window: TimeWindow,
        version: &str,
    ) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO analysis_run (run_id, run_date, window_start, window_end, version,
                                       status_change_mark)
             VALUES (?1, ?2, ?3, ?4, ?5, (SELECT COALESCE(MAX(id), 0) FROM status_change))",
            params![run_id, run_date, window.start, window.end, version],
        )?;
        Ok(())
    }

    pub fn save_run_diagnostics(&self, run_id: &str, diagnostics_json: &str) -> EngineResult<()> {
        self.conn.execute(
            "UPDATE analysis_run SET diagnostics_json = ?1 WHERE run_id = ?2",
            params![diagnostics_json, run_id],
        )?;
        Ok(())
    }

    pub fn run_diagnostics(&self, run_id: &str) -> EngineResult<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT diagnostics_json FROM analysis_run WHERE run_id = ?1",
                params![run_id],
                |r| r.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten())
    }

    pub fn run(&self, run_id: &str) -> EngineResult<Option<RunRow>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM analysis_run WHERE run_id = ?1"),
                params![run_id],
                run_row,
            )
            .optional()?)
    }

    pub fn latest_run(&self) -> EngineResult<Option<RunRow>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM analysis_run ORDER BY run_seq DESC LIMIT 1"),
                [],
                run_row,
            )
            .optional()?)
    }

    /// The run recorded immediately before `run_seq`.
    pub fn run_before(&self, run_seq: i64) -> EngineResult<Option<RunRow>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {RUN_COLUMNS} FROM analysis_run
                     WHERE run_seq < ?1 ORDER BY run_seq DESC LIMIT 1"
                ),
                params![run_seq],
                run_row,
            )
            .optional()?)
    }

    pub fn run_count(&self) -> EngineResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM analysis_run", [], |r| r.get(0))?)
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (run_id, stage, event_type, payload)
             VALUES (?1, ?2, ?3, ?4)",
            params![entry.run_id, entry.stage, entry.event_type, entry.payload],
        )?;
        Ok(())
    }

    pub fn events_for_run(&self, run_id: &str) -> EngineResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, stage, event_type, payload
             FROM event_log WHERE run_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    run_id: row.get(1)?,
                    stage: row.get(2)?,
                    event_type: row.get(3)?,
                    payload: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
