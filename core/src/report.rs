//! Report builder: tracked opportunities into the two summary shapes.
//!
//! Pure: no store access, no clock. The same inputs always give the
//! same report. Narrative sections are placeholders filled externally.

use crate::{
    aggregator::ProductAggregate,
    classifier::Tier,
    diagnostics::RunDiagnostics,
    store::RunRow,
    tracker::{Mover, Opportunity, OpportunityStatus, StatusChange},
    types::{ProductId, RunId, TimeWindow},
};
use chrono::NaiveDate;
use serde::Serialize;

// ── Selection ────────────────────────────────────────────────────────────────

/// Which opportunities a report covers. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub tiers: Vec<Tier>,
    pub statuses: Vec<OpportunityStatus>,
}

impl Selection {
    /// High/Medium tier, New/UnderReview status.
    pub fn actionable() -> Self {
        Self {
            tiers: vec![Tier::HighPriority, Tier::MediumPriority],
            statuses: vec![OpportunityStatus::New, OpportunityStatus::UnderReview],
        }
    }

    pub fn matches(&self, o: &Opportunity) -> bool {
        (self.tiers.is_empty() || self.tiers.contains(&o.tier()))
            && (self.statuses.is_empty() || self.statuses.contains(&o.status))
    }

    pub fn apply<'a>(&self, opportunities: &'a [Opportunity]) -> Vec<&'a Opportunity> {
        opportunities.iter().filter(|o| self.matches(o)).collect()
    }
}

// ── Product opportunity summary ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FitLabel {
    High,
    Medium,
    Low,
}

impl FitLabel {
    pub fn from_score(score: u8) -> Self {
        match score {
            s if s >= 4 => FitLabel::High,
            s if s >= 2 => FitLabel::Medium,
            _ => FitLabel::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FitLabel::High => "High",
            FitLabel::Medium => "Medium",
            FitLabel::Low => "Low",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImporterLine {
    pub rank: usize,
    pub name: String,
    pub volume: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OriginLine {
    pub rank: usize,
    pub country: String,
    pub volume: f64,
    pub share_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductOpportunitySummary {
    pub product_id: ProductId,
    pub product_name: String,
    pub chemical_id: Option<String>,
    pub category: String,
    pub status: OpportunityStatus,
    pub tier: Tier,
    pub composite_score: f64,
    pub window: TimeWindow,
    pub total_volume: f64,
    pub total_value: f64,
    pub currency: String,
    pub average_unit_price: Option<f64>,
    /// None when there is no baseline.
    pub yoy_growth: Option<f64>,
    pub top_importers: Vec<ImporterLine>,
    pub top_origins: Vec<OriginLine>,
    pub strategic_fit: FitLabel,
    pub strategic_fit_score: u8,
    /// Free text supplied by the analyst; never generated here.
    pub recommended_action: Option<String>,
}

pub fn product_summary(
    opportunity: &Opportunity,
    aggregate: &ProductAggregate,
    top_n: usize,
    currency: &str,
) -> ProductOpportunitySummary {
    let card = &opportunity.current.card;
    let top_importers = aggregate
        .importers
        .iter()
        .take(top_n)
        .enumerate()
        .map(|(i, p)| ImporterLine { rank: i + 1, name: p.name.clone(), volume: p.volume, value: p.value })
        .collect();
    let top_origins = aggregate
        .origins
        .iter()
        .take(top_n)
        .enumerate()
        .map(|(i, p)| OriginLine {
            rank: i + 1,
            country: p.name.clone(),
            volume: p.volume,
            share_pct: if aggregate.total_volume > 0.0 {
                p.volume / aggregate.total_volume * 100.0
            } else {
                0.0
            },
        })
        .collect();

    ProductOpportunitySummary {
        product_id: opportunity.product_id.clone(),
        product_name: opportunity.product_name.clone(),
        chemical_id: opportunity.chemical_id.clone(),
        category: opportunity.category.clone(),
        status: opportunity.status,
        tier: card.tier(),
        composite_score: card.composite_score(),
        window: aggregate.window,
        total_volume: aggregate.total_volume,
        total_value: aggregate.total_value,
        currency: currency.to_string(),
        average_unit_price: aggregate.average_unit_price,
        yoy_growth: aggregate.growth.rate(),
        top_importers,
        top_origins,
        strategic_fit: FitLabel::from_score(card.strategic_fit_score()),
        strategic_fit_score: card.strategic_fit_score(),
        recommended_action: None,
    }
}

// ── Weekly analysis report ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpportunityLine {
    pub product_id: ProductId,
    pub product_name: String,
    pub status: OpportunityStatus,
    pub composite_score: f64,
    pub previous_composite: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierSection {
    pub tier: Tier,
    pub opportunities: Vec<OpportunityLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NarrativeSection {
    pub key: &'static str,
    pub title: &'static str,
    pub content: Option<String>,
}

/// The narrative placeholders every weekly report carries.
pub const NARRATIVE_SECTIONS: [(&str, &str); 3] = [
    ("trends", "Market Trends"),
    ("competitor_insights", "Competitor Insights"),
    ("recommendations", "Recommendations"),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticsSummary {
    pub records_in: usize,
    pub rejected: usize,
    pub duplicates_removed: usize,
    pub insufficient_volume: usize,
    pub non_finite: usize,
    pub missing_reference: usize,
}

impl From<&RunDiagnostics> for DiagnosticsSummary {
    fn from(d: &RunDiagnostics) -> Self {
        Self {
            records_in: d.records_in,
            rejected: d.rejected_count(),
            duplicates_removed: d.duplicates_removed,
            insufficient_volume: d.insufficient_volume.len(),
            non_finite: d.non_finite.len(),
            missing_reference: d.missing_reference.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyAnalysisReport {
    pub run_id: RunId,
    pub run_date: NaiveDate,
    pub window: TimeWindow,
    /// Highest tier first; every tier present even when empty.
    pub tiers: Vec<TierSection>,
    pub movers: Vec<Mover>,
    pub status_changes: Vec<StatusChange>,
    pub diagnostics: Option<DiagnosticsSummary>,
    pub narrative: Vec<NarrativeSection>,
}

impl WeeklyAnalysisReport {
    pub fn section(&self, tier: Tier) -> &[OpportunityLine] {
        self.tiers
            .iter()
            .find(|s| s.tier == tier)
            .map(|s| s.opportunities.as_slice())
            .unwrap_or(&[])
    }
}

pub fn weekly_report(
    run: &RunRow,
    opportunities: &[&Opportunity],
    movers: &[Mover],
    status_changes: &[StatusChange],
    diagnostics: Option<&RunDiagnostics>,
) -> WeeklyAnalysisReport {
    let tiers = Tier::ALL
        .into_iter()
        .map(|tier| {
            let mut lines: Vec<OpportunityLine> = opportunities
                .iter()
                .filter(|o| o.tier() == tier)
                .map(|o| OpportunityLine {
                    product_id: o.product_id.clone(),
                    product_name: o.product_name.clone(),
                    status: o.status,
                    composite_score: o.composite_score(),
                    previous_composite: o.previous().map(|p| p.card.composite_score()),
                })
                .collect();
            lines.sort_by(|a, b| {
                b.composite_score
                    .total_cmp(&a.composite_score)
                    .then_with(|| a.product_id.cmp(&b.product_id))
            });
            TierSection { tier, opportunities: lines }
        })
        .collect();

    WeeklyAnalysisReport {
        run_id: run.run_id.clone(),
        run_date: run.run_date,
        window: run.window,
        tiers,
        movers: movers.to_vec(),
        status_changes: status_changes.to_vec(),
        diagnostics: diagnostics.map(DiagnosticsSummary::from),
        narrative: NARRATIVE_SECTIONS
            .iter()
            .map(|&(key, title)| NarrativeSection { key, title, content: None })
            .collect(),
    }
}

// ── Markdown ─────────────────────────────────────────────────────────────────

pub fn render_weekly_markdown(report: &WeeklyAnalysisReport) -> String {
    let mut out = format!(
        "# Weekly Opportunity Analysis\n\n\
Run: `{}` ({})\n\n\
Window: {} to {}\n",
        report.run_id, report.run_date, report.window.start, report.window.end
    );

    for section in &report.tiers {
        out.push_str(&format!("\n## {}\n\n", section.tier.label()));
        if section.opportunities.is_empty() {
            out.push_str("(none)\n");
            continue;
        }
        out.push_str("| Product | Status | Composite | Previous |\n");
        out.push_str("|---------|--------|-----------|----------|\n");
        for line in &section.opportunities {
            let previous = line
                .previous_composite
                .map(|p| format!("{p:.2}"))
                .unwrap_or_else(|| "-".into());
            out.push_str(&format!(
                "| {} | {} | {:.2} | {} |\n",
                line.product_name, line.status, line.composite_score, previous
            ));
        }
    }

    if !report.movers.is_empty() {
        out.push_str("\n## Movers\n\n");
        for m in &report.movers {
            let tier_note = if m.tier_changed() {
                format!(" ({} -> {})", m.previous_tier.label(), m.current_tier.label())
            } else {
                String::new()
            };
            out.push_str(&format!(
                "- {}: {:.2} -> {:.2} ({:+.2}){tier_note}\n",
                m.product_name, m.previous_composite, m.current_composite, m.delta
            ));
        }
    }

    if !report.status_changes.is_empty() {
        out.push_str("\n## Status Changes\n\n");
        for c in &report.status_changes {
            out.push_str(&format!("- {} {}: {} -> {}\n", c.changed_on, c.product_id, c.from, c.to));
        }
    }

    if let Some(d) = &report.diagnostics {
        out.push_str(&format!(
            "\n## Data Quality\n\n\
- Records in: {}\n\
- Rejected: {}\n\
- Duplicates removed: {}\n\
- Insufficient volume: {}\n\
- Overflowed totals: {}\n\
- Missing reference data: {}\n",
            d.records_in,
            d.rejected,
            d.duplicates_removed,
            d.insufficient_volume,
            d.non_finite,
            d.missing_reference
        ));
    }

    for n in &report.narrative {
        out.push_str(&format!("\n## {}\n\n", n.title));
        out.push_str(n.content.as_deref().unwrap_or("_To be completed._"));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aggregator::{Growth, PartyShare},
        scoring::ScoreCard,
        tracker::RunScore,
    };

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn opportunity(id: &str, scores: [u8; 4], status: OpportunityStatus) -> Opportunity {
        let [v, val, g, f] = scores;
        Opportunity {
            product_id: id.into(),
            product_name: id.to_uppercase(),
            chemical_id: None,
            category: "api_intermediate".into(),
            status,
            current: RunScore {
                run_id: "r2".into(),
                run_date: d(10),
                card: ScoreCard::new(v, val, g, f).unwrap(),
            },
            history: vec![],
            first_seen: d(10),
            last_updated: d(10),
        }
    }

    fn aggregate() -> ProductAggregate {
        let party = |name: &str, volume: f64| PartyShare { name: name.into(), volume, value: volume * 2.0 };
        ProductAggregate {
            product_id: "x".into(),
            product_name: "X".into(),
            chemical_id: Some("1-2-3".into()),
            category: "api_intermediate".into(),
            therapeutic_area: None,
            window: TimeWindow::ending_on(d(10), 7),
            record_count: 3,
            total_volume: 200.0,
            total_value: 400.0,
            average_unit_price: Some(2.0),
            importers: vec![party("a", 100.0), party("b", 60.0), party("c", 40.0)],
            origins: vec![party("CN", 150.0), party("IN", 50.0)],
            prior_volume: Some(160.0),
            prior_value: None,
            growth: Growth::Rate(0.25),
        }
    }

    fn run() -> RunRow {
        RunRow {
            run_seq: 2,
            run_id: "r2".into(),
            run_date: d(10),
            window: TimeWindow::ending_on(d(10), 7),
            version: "test".into(),
            status_change_mark: 0,
        }
    }

    #[test]
    fn fit_labels_follow_thresholds() {
        assert_eq!(FitLabel::from_score(5), FitLabel::High);
        assert_eq!(FitLabel::from_score(4), FitLabel::High);
        assert_eq!(FitLabel::from_score(3), FitLabel::Medium);
        assert_eq!(FitLabel::from_score(2), FitLabel::Medium);
        assert_eq!(FitLabel::from_score(1), FitLabel::Low);
    }

    #[test]
    fn summary_ranks_top_n_with_origin_shares() {
        let o = opportunity("x", [5, 5, 4, 4], OpportunityStatus::New);
        let s = product_summary(&o, &aggregate(), 2, "USD");
        assert_eq!(s.top_importers.len(), 2);
        assert_eq!(s.top_importers[0].name, "a");
        assert_eq!(s.top_importers[1].rank, 2);
        assert_eq!(s.top_origins[0].country, "CN");
        assert!((s.top_origins[0].share_pct - 75.0).abs() < 1e-9);
        assert_eq!(s.yoy_growth, Some(0.25));
        assert_eq!(s.strategic_fit, FitLabel::High);
        assert_eq!(s.tier, Tier::HighPriority);
        assert!(s.recommended_action.is_none());
    }

    #[test]
    fn actionable_selection_filters_tier_and_status() {
        let all = vec![
            opportunity("a", [5, 5, 5, 5], OpportunityStatus::New),
            opportunity("b", [3, 3, 3, 3], OpportunityStatus::UnderReview),
            opportunity("c", [5, 5, 5, 5], OpportunityStatus::Archived),
            opportunity("d", [1, 1, 1, 1], OpportunityStatus::New),
        ];
        let picked: Vec<&str> = Selection::actionable()
            .apply(&all)
            .iter()
            .map(|o| o.product_id.as_str())
            .collect();
        assert_eq!(picked, vec!["a", "b"]);
        assert_eq!(Selection::default().apply(&all).len(), 4);
    }

    #[test]
    fn weekly_report_has_every_tier_and_placeholders() {
        let a = opportunity("a", [5, 5, 5, 5], OpportunityStatus::New);
        let b = opportunity("b", [4, 4, 4, 4], OpportunityStatus::New);
        let c = opportunity("c", [1, 1, 1, 1], OpportunityStatus::New);
        let report = weekly_report(&run(), &[&b, &c, &a], &[], &[], None);
        assert_eq!(report.tiers.len(), 4);
        assert_eq!(report.tiers[0].tier, Tier::HighPriority);
        let high: Vec<&str> = report
            .section(Tier::HighPriority)
            .iter()
            .map(|l| l.product_id.as_str())
            .collect();
        assert_eq!(high, vec!["a", "b"]);
        assert!(report.section(Tier::MediumPriority).is_empty());
        assert_eq!(report.section(Tier::LowPriority).len(), 1);
        assert_eq!(report.narrative.len(), 3);
        assert!(report.narrative.iter().all(|n| n.content.is_none()));
    }

    #[test]
    fn weekly_report_is_deterministic() {
        let a = opportunity("a", [5, 5, 5, 5], OpportunityStatus::New);
        let b = opportunity("b", [5, 5, 5, 5], OpportunityStatus::New);
        let one = weekly_report(&run(), &[&a, &b], &[], &[], None);
        let two = weekly_report(&run(), &[&b, &a], &[], &[], None);
        assert_eq!(one, two);
        assert_eq!(render_weekly_markdown(&one), render_weekly_markdown(&two));
    }

    #[test]
    fn markdown_lists_sections() {
        let a = opportunity("a", [5, 5, 5, 5], OpportunityStatus::New);
        let md = render_weekly_markdown(&weekly_report(
            &run(),
            &[&a],
            &[],
            &[],
            Some(&RunDiagnostics::new(10)),
        ));
        assert!(md.contains("## High Priority"));
        assert!(md.contains("| A | new | 5.00 | - |"));
        assert!(md.contains("## Data Quality"));
        assert!(md.contains("## Competitor Insights"));
    }
}
