//! Hierarchy-aware precedence scoring (§4.6).
//!
//! Combines authority tier, evidence level, and domain-specific recency
//! decay into a single score in `[0, 1]`. Pure and deterministic: the same
//! chunk and current year always produce the same score, which the
//! property tests below lean on.

use crate::models::Chunk;
use crate::types::{AuthorityTier, EvidenceLevel};

fn authority_weight(tier: AuthorityTier) -> f64 {
    match tier {
        AuthorityTier::A1 => 1.00,
        AuthorityTier::A2 => 0.85,
        AuthorityTier::A3 => 0.70,
        AuthorityTier::A4 => 0.10,
    }
}

fn evidence_weight(level: EvidenceLevel) -> f64 {
    match level {
        EvidenceLevel::H1 => 1.00,
        EvidenceLevel::H2 => 0.75,
        EvidenceLevel::H3 => 0.50,
        EvidenceLevel::H4 => 0.25,
    }
}

fn half_life_years(domain: &str) -> f64 {
    match domain {
        "coding_billing" => 3.0,
        "technology_navigation" => 4.0,
        "ablation" => 5.0,
        _ => 6.0,
    }
}

/// Recency score via exponential decay, `0.5^(age / half_life)`. A chunk
/// with no known publication year (`year == 0`) is treated as if it were
/// 10 years old, per §4.6 step 3 — neither rewarded as fresh nor punished
/// as maximally stale.
fn recency_score(year: i32, current_year: i32, domain: &str) -> f64 {
    let age_years = if year <= 0 {
        10.0
    } else {
        (current_year - year).max(0) as f64
    };
    let half_life = half_life_years(domain);
    0.5_f64.powf(age_years / half_life)
}

/// Combines authority, evidence, and recency into the final precedence
/// score per §4.6's tier-specific blend weights.
///
/// The A1 recency floor (per the resolved Open Question, §9) applies only
/// to the recency *component* before blending, not to the final score —
/// an A1 flagship reference is never treated as stale from age alone, but
/// a weak evidence grade still drags its final score down.
pub fn precedence(chunk: &Chunk, current_year: i32, a1_recency_floor: f64) -> f64 {
    let authority = authority_weight(chunk.authority_tier);
    let evidence = evidence_weight(chunk.evidence_level);
    let mut recency = recency_score(chunk.year, current_year, chunk.primary_domain());

    if chunk.authority_tier == AuthorityTier::A1 {
        recency = recency.max(a1_recency_floor);
    }

    let (w_auth, w_evid, w_rec) = match chunk.authority_tier {
        AuthorityTier::A1 => (0.7, 0.1, 0.2),
        AuthorityTier::A2 | AuthorityTier::A3 => (0.6, 0.15, 0.25),
        AuthorityTier::A4 => (0.4, 0.3, 0.3),
    };

    (w_auth * authority + w_evid * evidence + w_rec * recency).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DocType, SectionType};
    use proptest::prelude::*;

    fn make_chunk(tier: AuthorityTier, level: EvidenceLevel, year: i32, domain: &str) -> Chunk {
        Chunk {
            chunk_id: "c1".to_string(),
            doc_id: "d1".to_string(),
            text: "placeholder clinical text".to_string(),
            section_title: String::new(),
            section_type: SectionType::General,
            authority_tier: tier,
            evidence_level: level,
            year,
            doc_type: DocType::JournalArticle,
            domain: vec![domain.to_string()],
            authors: vec![],
            journal: String::new(),
            volume: String::new(),
            issue: String::new(),
            pages: String::new(),
            doi: String::new(),
            pmid: String::new(),
            has_table: false,
            has_contraindication: false,
            has_dose_setting: false,
            cpt_codes: vec![],
            aliases: vec![],
        }
    }

    #[test]
    fn a1_recency_floor_only_affects_recency_component() {
        let old_a1 = make_chunk(AuthorityTier::A1, EvidenceLevel::H4, 1990, "other");
        let score = precedence(&old_a1, 2026, 0.70);
        // authority 1.0*0.7 + recency(floor 0.7)*0.2 + evidence 0.25*0.1 = 0.865
        assert!((score - 0.865).abs() < 1e-9);
    }

    #[test]
    fn unknown_year_never_outscores_known_recent_year_at_same_tier() {
        let unknown = make_chunk(AuthorityTier::A3, EvidenceLevel::H2, 0, "other");
        let known_recent = make_chunk(AuthorityTier::A3, EvidenceLevel::H2, 2025, "other");
        assert!(precedence(&unknown, 2026, 0.70) < precedence(&known_recent, 2026, 0.70));
    }

    proptest! {
        #[test]
        fn precedence_is_always_bounded(
            tier_idx in 0..4u8,
            level_idx in 0..4u8,
            year in 1950..2026i32,
            current_year in 2000..2030i32,
        ) {
            let tier = [AuthorityTier::A1, AuthorityTier::A2, AuthorityTier::A3, AuthorityTier::A4][tier_idx as usize];
            let level = [EvidenceLevel::H1, EvidenceLevel::H2, EvidenceLevel::H3, EvidenceLevel::H4][level_idx as usize];
            let chunk = make_chunk(tier, level, year, "other");
            let score = precedence(&chunk, current_year, 0.70);
            prop_assert!(score >= 0.0 && score <= 1.0);
        }

        #[test]
        fn higher_authority_never_scores_lower_all_else_equal(
            level_idx in 0..4u8,
            year in 1950..2026i32,
        ) {
            let level = [EvidenceLevel::H1, EvidenceLevel::H2, EvidenceLevel::H3, EvidenceLevel::H4][level_idx as usize];
            let a1 = make_chunk(AuthorityTier::A1, level, year, "other");
            let a4 = make_chunk(AuthorityTier::A4, level, year, "other");
            prop_assert!(precedence(&a1, 2026, 0.70) >= precedence(&a4, 2026, 0.70));
        }

        #[test]
        fn more_recent_never_scores_lower_all_else_equal(
            tier_idx in 0..4u8,
            base_year in 1960..2010i32,
        ) {
            let tier = [AuthorityTier::A1, AuthorityTier::A2, AuthorityTier::A3, AuthorityTier::A4][tier_idx as usize];
            let older = make_chunk(tier, EvidenceLevel::H2, base_year, "other");
            let newer = make_chunk(tier, EvidenceLevel::H2, base_year + 10, "other");
            prop_assert!(precedence(&newer, 2026, 0.70) >= precedence(&older, 2026, 0.70));
        }
    }
}
