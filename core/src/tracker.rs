//! Opportunity tracker: one opportunity per product identity, followed
//! across analysis runs.
//!
//! Lifecycle:
//!   New → UnderReview → {Actioned, Monitoring}
//!   any non-terminal status → Archived
//!
//! Archival is a status, never a deletion. Score history is append-only:
//! each run adds one card per scored product and never rewrites earlier ones.
//! Every accepted transition is written to the status-change audit log.

use crate::{
    aggregator::ProductAggregate,
    classifier::Tier,
    error::{EngineError, EngineResult},
    event::RunEvent,
    scoring::{ScoreCard, ScoredAggregate},
    store::{OpportunityStore, RunRow},
    types::{ProductId, RunId},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Data structs ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityStatus {
    New,
    UnderReview,
    Actioned,
    Monitoring,
    Archived,
}

impl OpportunityStatus {
    pub const ALL: [OpportunityStatus; 5] = [
        OpportunityStatus::New,
        OpportunityStatus::UnderReview,
        OpportunityStatus::Actioned,
        OpportunityStatus::Monitoring,
        OpportunityStatus::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New         => "new",
            Self::UnderReview => "under_review",
            Self::Actioned    => "actioned",
            Self::Monitoring  => "monitoring",
            Self::Archived    => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|st| st.as_str() == s)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Archived)
    }

    pub fn can_transition_to(&self, to: OpportunityStatus) -> bool {
        use OpportunityStatus::*;
        match (self, to) {
            (New, UnderReview) => true,
            (UnderReview, Actioned) | (UnderReview, Monitoring) => true,
            (from, Archived) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for OpportunityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row from the `opportunity` table.
#[derive(Debug, Clone, PartialEq)]
pub struct OpportunityRow {
    pub product_id: ProductId,
    pub product_name: String,
    pub chemical_id: Option<String>,
    pub category: String,
    pub status: String,
    pub first_seen: NaiveDate,
    pub last_updated: NaiveDate,
}

/// One score card as produced by one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunScore {
    pub run_id: RunId,
    pub run_date: NaiveDate,
    pub card: ScoreCard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub product_id: ProductId,
    pub product_name: String,
    pub chemical_id: Option<String>,
    pub category: String,
    pub status: OpportunityStatus,
    pub current: RunScore,
    /// Earlier cards, oldest first.
    pub history: Vec<RunScore>,
    pub first_seen: NaiveDate,
    pub last_updated: NaiveDate,
}

impl Opportunity {
    pub fn tier(&self) -> Tier {
        self.current.card.tier()
    }

    pub fn composite_score(&self) -> f64 {
        self.current.card.composite_score()
    }

    pub fn previous(&self) -> Option<&RunScore> {
        self.history.last()
    }

    /// Every card in run order, current last.
    pub fn all_scores(&self) -> impl Iterator<Item = &RunScore> {
        self.history.iter().chain(std::iter::once(&self.current))
    }
}

/// An accepted status transition from the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub id: i64,
    pub product_id: ProductId,
    pub from: OpportunityStatus,
    pub to: OpportunityStatus,
    pub changed_on: NaiveDate,
    pub note: Option<String>,
}

/// An opportunity whose composite moved materially since its previous card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mover {
    pub product_id: ProductId,
    pub product_name: String,
    pub previous_composite: f64,
    pub current_composite: f64,
    pub delta: f64,
    pub previous_tier: Tier,
    pub current_tier: Tier,
}

impl Mover {
    pub fn tier_changed(&self) -> bool {
        self.previous_tier != self.current_tier
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordSummary {
    pub created: usize,
    pub updated: usize,
}

// ── Tracker ──────────────────────────────────────────────────────────────────

pub struct OpportunityTracker<'s> {
    store: &'s OpportunityStore,
}

impl<'s> OpportunityTracker<'s> {
    pub fn new(store: &'s OpportunityStore) -> Self {
        Self { store }
    }

    /// Record one run's scored aggregates. Creates unseen opportunities and
    /// appends a card to known ones. `run_id` must already be recorded.
    /// Returns the summary and one event per opportunity touched.
    pub fn record_run(
        &self,
        run_id: &str,
        run_date: NaiveDate,
        scored: &[ScoredAggregate],
    ) -> EngineResult<(RecordSummary, Vec<RunEvent>)> {
        self.store.in_transaction(|| {
            let mut summary = RecordSummary::default();
            let mut events = Vec::with_capacity(scored.len());

            for s in scored {
                let agg = &s.aggregate;
                self.store.insert_aggregate(run_id, agg, true)?;

                match self.store.get_opportunity_row(&agg.product_id)? {
                    None => {
                        self.store.insert_opportunity(&OpportunityRow {
                            product_id: agg.product_id.clone(),
                            product_name: agg.product_name.clone(),
                            chemical_id: agg.chemical_id.clone(),
                            category: agg.category.clone(),
                            status: OpportunityStatus::New.as_str().into(),
                            first_seen: run_date,
                            last_updated: run_date,
                        })?;
                        self.store.append_scorecard(&agg.product_id, run_id, run_date, &s.card)?;
                        summary.created += 1;
                        log::debug!("track: new opportunity {} ({})", agg.product_id, s.card.tier());
                        events.push(RunEvent::OpportunityCreated {
                            product_id: agg.product_id.clone(),
                            composite_score: s.card.composite_score(),
                            tier: s.card.tier(),
                        });
                    }
                    Some(_) => {
                        let previous = self.store.latest_scorecard(&agg.product_id)?;
                        self.store.append_scorecard(&agg.product_id, run_id, run_date, &s.card)?;
                        self.store.touch_opportunity(&agg.product_id, run_date)?;
                        summary.updated += 1;
                        if let Some(prev) = previous {
                            events.push(RunEvent::OpportunityRescored {
                                product_id: agg.product_id.clone(),
                                previous_composite: prev.card.composite_score(),
                                composite_score: s.card.composite_score(),
                                previous_tier: prev.card.tier(),
                                tier: s.card.tier(),
                            });
                        }
                    }
                }
            }

            log::info!(
                "track: run {run_id} created {} and updated {} opportunities",
                summary.created,
                summary.updated
            );
            Ok((summary, events))
        })
    }

    /// Move an opportunity to `to`, recording the change in the audit log.
    /// Rejected transitions leave status and history untouched.
    pub fn transition_status(
        &self,
        product_id: &str,
        to: OpportunityStatus,
        on: NaiveDate,
        note: Option<&str>,
    ) -> EngineResult<StatusChange> {
        self.store.in_transaction(|| {
            let row = self
                .store
                .get_opportunity_row(product_id)?
                .ok_or_else(|| EngineError::OpportunityNotFound {
                    product_id: product_id.to_string(),
                })?;
            let from = parse_status(&row.status)?;
            if !from.can_transition_to(to) {
                log::warn!("track: rejected transition {product_id} {from} -> {to}");
                return Err(EngineError::InvalidTransition {
                    product_id: product_id.to_string(),
                    from,
                    to,
                });
            }
            self.store.update_status(product_id, to.as_str(), on)?;
            let id = self.store.insert_status_change(product_id, from.as_str(), to.as_str(), on, note)?;
            log::info!("track: {product_id} {from} -> {to}");
            Ok(StatusChange {
                id,
                product_id: product_id.to_string(),
                from,
                to,
                changed_on: on,
                note: note.map(str::to_string),
            })
        })
    }

    pub fn get(&self, product_id: &str) -> EngineResult<Option<Opportunity>> {
        match self.store.get_opportunity_row(product_id)? {
            Some(row) => self.assemble(row).map(Some),
            None => Ok(None),
        }
    }

    /// Every opportunity, ordered by product identity.
    pub fn all(&self) -> EngineResult<Vec<Opportunity>> {
        self.store
            .list_opportunity_rows()?
            .into_iter()
            .map(|row| self.assemble(row))
            .collect()
    }

    /// Opportunities whose current card is in `tier`, best composite first.
    pub fn list_by_tier(&self, tier: Tier) -> EngineResult<Vec<Opportunity>> {
        let mut out: Vec<Opportunity> = self.all()?.into_iter().filter(|o| o.tier() == tier).collect();
        sort_by_composite(&mut out);
        Ok(out)
    }

    pub fn list_by_status(&self, status: OpportunityStatus) -> EngineResult<Vec<Opportunity>> {
        let mut out: Vec<Opportunity> =
            self.all()?.into_iter().filter(|o| o.status == status).collect();
        sort_by_composite(&mut out);
        Ok(out)
    }

    /// Opportunities scored in the latest run whose composite changed by
    /// more than `threshold` against their previous card. Largest move first.
    pub fn movers(&self, threshold: f64) -> EngineResult<Vec<Mover>> {
        let Some(latest) = self.store.latest_run()? else {
            return Ok(Vec::new());
        };
        let mut out: Vec<Mover> = self
            .all()?
            .into_iter()
            .filter(|o| o.current.run_id == latest.run_id)
            .filter_map(|o| {
                let prev = o.previous()?;
                let delta = o.composite_score() - prev.card.composite_score();
                (delta.abs() > threshold).then(|| Mover {
                    product_id: o.product_id.clone(),
                    product_name: o.product_name.clone(),
                    previous_composite: prev.card.composite_score(),
                    current_composite: o.composite_score(),
                    delta,
                    previous_tier: prev.card.tier(),
                    current_tier: o.tier(),
                })
            })
            .collect();
        out.sort_by(|a, b| {
            b.delta
                .abs()
                .total_cmp(&a.delta.abs())
                .then_with(|| a.product_id.cmp(&b.product_id))
        });
        Ok(out)
    }

    /// Status changes accepted after `run` was recorded.
    pub fn status_changes_since(&self, run: Option<&RunRow>) -> EngineResult<Vec<StatusChange>> {
        let mark = run.map(|r| r.status_change_mark).unwrap_or(0);
        self.store.status_changes_after(mark)
    }

    /// The aggregate behind an opportunity's current card.
    pub fn current_aggregate(&self, opportunity: &Opportunity) -> EngineResult<Option<ProductAggregate>> {
        self.store.aggregate(&opportunity.current.run_id, &opportunity.product_id)
    }

    fn assemble(&self, row: OpportunityRow) -> EngineResult<Opportunity> {
        let mut history = self.store.scorecards_for(&row.product_id)?;
        let current = history.pop().ok_or_else(|| {
            EngineError::Other(anyhow::anyhow!("opportunity {} has no score history", row.product_id))
        })?;
        Ok(Opportunity {
            status: parse_status(&row.status)?,
            product_id: row.product_id,
            product_name: row.product_name,
            chemical_id: row.chemical_id,
            category: row.category,
            current,
            history,
            first_seen: row.first_seen,
            last_updated: row.last_updated,
        })
    }
}

pub(crate) fn parse_status(s: &str) -> EngineResult<OpportunityStatus> {
    OpportunityStatus::parse(s)
        .ok_or_else(|| EngineError::Other(anyhow::anyhow!("unknown opportunity status '{s}'")))
}

fn sort_by_composite(out: &mut [Opportunity]) {
    out.sort_by(|a, b| {
        b.composite_score()
            .total_cmp(&a.composite_score())
            .then_with(|| a.product_id.cmp(&b.product_id))
    });
}

#[cfg(test)]
mod tests {
    use super::OpportunityStatus::*;
    use super::*;

    #[test]
    fn allowed_edges() {
        assert!(New.can_transition_to(UnderReview));
        assert!(UnderReview.can_transition_to(Actioned));
        assert!(UnderReview.can_transition_to(Monitoring));
        for s in [New, UnderReview, Actioned, Monitoring] {
            assert!(s.can_transition_to(Archived), "{s} -> archived");
        }
    }

    #[test]
    fn rejected_edges() {
        assert!(!Archived.can_transition_to(New));
        assert!(!Archived.can_transition_to(Archived));
        assert!(!New.can_transition_to(Actioned));
        assert!(!New.can_transition_to(Monitoring));
        assert!(!Actioned.can_transition_to(UnderReview));
        assert!(!Monitoring.can_transition_to(Actioned));
        assert!(!New.can_transition_to(New));
    }

    #[test]
    fn status_names_round_trip() {
        for s in OpportunityStatus::ALL {
            assert_eq!(OpportunityStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(OpportunityStatus::parse("closed"), None);
    }
}
