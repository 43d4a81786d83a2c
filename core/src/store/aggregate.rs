//! Per-run product aggregates: the prior-run source for growth.

use super::OpportunityStore;
use crate::{aggregator::ProductAggregate, error::EngineResult, types::ProductId};
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;

impl OpportunityStore {
    pub fn insert_aggregate(
        &self,
        run_id: &str,
        aggregate: &ProductAggregate,
        scored: bool,
    ) -> EngineResult<()> {
        let payload = serde_json::to_string(aggregate)?;
        self.conn.execute(
            "INSERT INTO product_aggregate (run_id, product_id, scored, payload)
             VALUES (?1, ?2, ?3, ?4)",
            params![run_id, aggregate.product_id, scored as i32, payload],
        )?;
        Ok(())
    }

    pub fn aggregate(&self, run_id: &str, product_id: &str) -> EngineResult<Option<ProductAggregate>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM product_aggregate WHERE run_id = ?1 AND product_id = ?2",
                params![run_id, product_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(payload.map(|p| serde_json::from_str(&p)).transpose()?)
    }

    /// All aggregates recorded by `run_id`, scored or not.
    pub fn aggregates_for_run(&self, run_id: &str) -> EngineResult<HashMap<ProductId, ProductAggregate>> {
        let mut stmt = self.conn.prepare(
            "SELECT payload FROM product_aggregate WHERE run_id = ?1 ORDER BY product_id",
        )?;
        let payloads = stmt
            .query_map(params![run_id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut out = HashMap::with_capacity(payloads.len());
        for p in payloads {
            let agg: ProductAggregate = serde_json::from_str(&p)?;
            out.insert(agg.product_id.clone(), agg);
        }
        Ok(out)
    }
}
