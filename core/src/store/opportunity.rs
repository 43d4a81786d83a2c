//! Opportunity, score history and status-change queries.

use super::OpportunityStore;
use crate::{
    error::EngineResult,
    scoring::ScoreCard,
    tracker::{parse_status, OpportunityRow, RunScore, StatusChange},
};
use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};

const OPPORTUNITY_COLUMNS: &str =
    "product_id, product_name, chemical_id, category, status, first_seen, last_updated";

fn opportunity_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<OpportunityRow> {
    Ok(OpportunityRow {
        product_id: r.get(0)?,
        product_name: r.get(1)?,
        chemical_id: r.get(2)?,
        category: r.get(3)?,
        status: r.get(4)?,
        first_seen: r.get(5)?,
        last_updated: r.get(6)?,
    })
}

/// Raw history row; sub-scores are validated when the card is rebuilt.
struct ScoreRow {
    run_id: String,
    run_date: NaiveDate,
    scores: [u8; 4],
}

impl ScoreRow {
    fn into_run_score(self) -> EngineResult<RunScore> {
        let [v, val, g, f] = self.scores;
        Ok(RunScore {
            run_id: self.run_id,
            run_date: self.run_date,
            card: ScoreCard::new(v, val, g, f)?,
        })
    }
}

fn score_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ScoreRow> {
    Ok(ScoreRow {
        run_id: r.get(0)?,
        run_date: r.get(1)?,
        scores: [r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?],
    })
}

impl OpportunityStore {
    // ── Opportunity ───────────────────────────────────────────────

    pub fn insert_opportunity(&self, row: &OpportunityRow) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO opportunity (product_id, product_name, chemical_id, category,
                                      status, first_seen, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.product_id,
                row.product_name,
                row.chemical_id,
                row.category,
                row.status,
                row.first_seen,
                row.last_updated,
            ],
        )?;
        Ok(())
    }

    pub fn get_opportunity_row(&self, product_id: &str) -> EngineResult<Option<OpportunityRow>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {OPPORTUNITY_COLUMNS} FROM opportunity WHERE product_id = ?1"),
                params![product_id],
                opportunity_row,
            )
            .optional()?)
    }

    pub fn list_opportunity_rows(&self) -> EngineResult<Vec<OpportunityRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {OPPORTUNITY_COLUMNS} FROM opportunity ORDER BY product_id"
        ))?;
        let rows = stmt
            .query_map([], opportunity_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn touch_opportunity(&self, product_id: &str, on: NaiveDate) -> EngineResult<()> {
        self.conn.execute(
            "UPDATE opportunity SET last_updated = ?1 WHERE product_id = ?2",
            params![on, product_id],
        )?;
        Ok(())
    }

    pub fn update_status(&self, product_id: &str, status: &str, on: NaiveDate) -> EngineResult<()> {
        self.conn.execute(
            "UPDATE opportunity SET status = ?1, last_updated = ?2 WHERE product_id = ?3",
            params![status, on, product_id],
        )?;
        Ok(())
    }

    pub fn opportunity_count(&self) -> EngineResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM opportunity", [], |r| r.get(0))?)
    }

    // ── Score history (append-only) ───────────────────────────────

    pub fn append_scorecard(
        &self,
        product_id: &str,
        run_id: &str,
        run_date: NaiveDate,
        card: &ScoreCard,
    ) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO scorecard_history (product_id, run_id, run_date, volume_score,
                value_score, growth_score, strategic_fit_score, composite_score, tier)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                product_id,
                run_id,
                run_date,
                card.volume_score(),
                card.value_score(),
                card.growth_score(),
                card.strategic_fit_score(),
                card.composite_score(),
                card.tier().as_str(),
            ],
        )?;
        Ok(())
    }

    /// Every card for `product_id`, oldest first.
    pub fn scorecards_for(&self, product_id: &str) -> EngineResult<Vec<RunScore>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, run_date, volume_score, value_score, growth_score, strategic_fit_score
             FROM scorecard_history WHERE product_id = ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![product_id], score_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(ScoreRow::into_run_score).collect()
    }

    pub fn latest_scorecard(&self, product_id: &str) -> EngineResult<Option<RunScore>> {
        self.conn
            .query_row(
                "SELECT run_id, run_date, volume_score, value_score, growth_score, strategic_fit_score
                 FROM scorecard_history WHERE product_id = ?1
                 ORDER BY id DESC LIMIT 1",
                params![product_id],
                score_row,
            )
            .optional()?
            .map(ScoreRow::into_run_score)
            .transpose()
    }

    pub fn scorecard_count(&self) -> EngineResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM scorecard_history", [], |r| r.get(0))?)
    }

    // ── Status-change audit log ───────────────────────────────────

    pub fn insert_status_change(
        &self,
        product_id: &str,
        from: &str,
        to: &str,
        on: NaiveDate,
        note: Option<&str>,
    ) -> EngineResult<i64> {
        self.conn.execute(
            "INSERT INTO status_change (product_id, from_status, to_status, changed_on, note)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![product_id, from, to, on, note],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Audit entries with id greater than `mark`, oldest first.
    pub fn status_changes_after(&self, mark: i64) -> EngineResult<Vec<StatusChange>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, product_id, from_status, to_status, changed_on, note
             FROM status_change WHERE id > ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![mark], |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, NaiveDate>(4)?,
                    r.get::<_, Option<String>>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(id, product_id, from, to, changed_on, note)| {
                Ok(StatusChange {
                    id,
                    product_id,
                    from: parse_status(&from)?,
                    to: parse_status(&to)?,
                    changed_on,
                    note,
                })
            })
            .collect()
    }
}
