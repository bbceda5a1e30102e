//! Emergency and safety-flag regex sets shared by the Hybrid Retriever
//! (§4.7 step 1) and the Query Orchestrator's `classify` step (§4.8).
//!
//! Kept as a single module so both call sites detect emergencies and
//! safety flags identically — §8 invariant 10 requires any query matching
//! an emergency pattern to route to `is_emergency = true` regardless of
//! which component asked first.

use std::sync::OnceLock;

use regex::Regex;

/// The fixed list of clinical patterns that short-circuit classification
/// into the emergency path (§4.7 step 1, §GLOSSARY "Emergency regex set").
fn emergency_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)massive hemoptysis",
            r"(?i)tension pneumothorax",
            r"(?i)airway obstruction",
            r"(?i)complete airway occlusion",
            r"(?i)foreign body aspiration",
            r"(?i)cardiac arrest",
            r"(?i)respiratory arrest",
            r"(?i)acute hypoxemic respiratory failure",
            r"(?i)unstable (airway|patient)",
            r"(?i)exsanguinat",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static emergency pattern is valid"))
        .collect()
    })
}

pub fn is_emergency(text: &str) -> bool {
    emergency_patterns().iter().any(|re| re.is_match(text))
}

/// Multi-label safety flag regex map (§4.8 `classify`).
fn safety_flag_patterns() -> &'static Vec<(&'static str, Regex)> {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            ("dosage", Regex::new(r"(?i)\b(dose|dosage|mg|mcg|titrat)\b").unwrap()),
            ("pediatric", Regex::new(r"(?i)\b(pediatric|child|infant|neonat)\b").unwrap()),
            ("pregnancy", Regex::new(r"(?i)\b(pregnan|gestation|trimester)\b").unwrap()),
            ("contraindication", Regex::new(r"(?i)contraindicat").unwrap()),
            ("allergy", Regex::new(r"(?i)\b(allerg|anaphyla)\b").unwrap()),
            ("emergency", Regex::new(r"(?i)\b(emergency|urgent|stat\b)\b").unwrap()),
        ]
    })
}

/// Returns every safety-flag label whose pattern matches `text`.
pub fn safety_flags(text: &str) -> Vec<String> {
    safety_flag_patterns()
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(label, _)| label.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn massive_hemoptysis_is_an_emergency() {
        assert!(is_emergency("massive hemoptysis >300 ml, unstable"));
    }

    #[test]
    fn routine_query_is_not_an_emergency() {
        assert!(!is_emergency("cpt code for diagnostic bronchoscopy"));
    }

    #[test]
    fn contraindication_query_sets_the_safety_flag() {
        let flags = safety_flags("contraindications for bronchoscopy");
        assert!(flags.contains(&"contraindication".to_string()));
    }

    #[test]
    fn multiple_flags_can_fire_at_once() {
        let flags = safety_flags("pediatric dosage contraindications for sedation");
        assert!(flags.contains(&"pediatric".to_string()));
        assert!(flags.contains(&"dosage".to_string()));
        assert!(flags.contains(&"contraindication".to_string()));
    }
}
