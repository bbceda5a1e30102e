//! Centralized enumerations for the retrieval domain model.
//!
//! Every string-typed field that flows in from the ingestion contract
//! (§6 of the specification) is parsed into one of these closed types at
//! load time. Unknown values fall back to the lowest rank in the
//! enumeration rather than failing the load — see each `FromStr` impl.

use std::fmt;
use std::str::FromStr;

/// Editorial authority tier. `A1` is a flagship comprehensive reference,
/// `A4` is a standalone journal article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AuthorityTier {
    A1,
    A2,
    A3,
    A4,
}

impl FromStr for AuthorityTier {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "A1" => Self::A1,
            "A2" => Self::A2,
            "A3" => Self::A3,
            _ => Self::A4,
        })
    }
}

impl fmt::Display for AuthorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::A1 => "A1",
            Self::A2 => "A2",
            Self::A3 => "A3",
            Self::A4 => "A4",
        };
        write!(f, "{s}")
    }
}

/// Evidence hierarchy level, from guideline/systematic review (`H1`) to
/// case series/expert opinion (`H4`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum EvidenceLevel {
    H1,
    H2,
    H3,
    H4,
}

impl FromStr for EvidenceLevel {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "H1" => Self::H1,
            "H2" => Self::H2,
            "H4" => Self::H4,
            // A guideline lacking explicit grading defaults to a conservative H3
            // rather than the lowest rank — see DESIGN.md open question.
            _ => Self::H3,
        })
    }
}

impl fmt::Display for EvidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::H1 => "H1",
            Self::H2 => "H2",
            Self::H3 => "H3",
            Self::H4 => "H4",
        };
        write!(f, "{s}")
    }
}

/// Document type, used to drive the citation policy allowlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Guideline,
    SystematicReview,
    Rct,
    Cohort,
    CaseSeries,
    NarrativeReview,
    BookChapter,
    CodingUpdate,
    JournalArticle,
}

impl FromStr for DocType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "guideline" => Self::Guideline,
            "systematic_review" => Self::SystematicReview,
            "rct" => Self::Rct,
            "cohort" => Self::Cohort,
            "case_series" => Self::CaseSeries,
            "narrative_review" => Self::NarrativeReview,
            "book_chapter" => Self::BookChapter,
            "coding_update" => Self::CodingUpdate,
            "journal_article" => Self::JournalArticle,
            // Unknown doc types fall back to the most conservative
            // (citation-excludable) class.
            _ => Self::BookChapter,
        })
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Guideline => "guideline",
            Self::SystematicReview => "systematic_review",
            Self::Rct => "rct",
            Self::Cohort => "cohort",
            Self::CaseSeries => "case_series",
            Self::NarrativeReview => "narrative_review",
            Self::BookChapter => "book_chapter",
            Self::CodingUpdate => "coding_update",
            Self::JournalArticle => "journal_article",
        };
        write!(f, "{s}")
    }
}

/// Section classification within a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    Abstract,
    ProcedureSteps,
    Complications,
    Coding,
    Ablation,
    Blvr,
    Contraindications,
    DoseParameters,
    Eligibility,
    TableRow,
    TableFull,
    General,
}

impl FromStr for SectionType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "abstract" => Self::Abstract,
            "procedure_steps" => Self::ProcedureSteps,
            "complications" => Self::Complications,
            "coding" => Self::Coding,
            "ablation" => Self::Ablation,
            "blvr" => Self::Blvr,
            "contraindications" => Self::Contraindications,
            "dose_parameters" => Self::DoseParameters,
            "eligibility" => Self::Eligibility,
            "table_row" => Self::TableRow,
            "table_full" => Self::TableFull,
            _ => Self::General,
        })
    }
}

impl fmt::Display for SectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Abstract => "abstract",
            Self::ProcedureSteps => "procedure_steps",
            Self::Complications => "complications",
            Self::Coding => "coding",
            Self::Ablation => "ablation",
            Self::Blvr => "blvr",
            Self::Contraindications => "contraindications",
            Self::DoseParameters => "dose_parameters",
            Self::Eligibility => "eligibility",
            Self::TableRow => "table_row",
            Self::TableFull => "table_full",
            Self::General => "general",
        };
        write!(f, "{s}")
    }
}

/// Classification of an incoming query, in the precedence order used by
/// [`crate::orchestrator::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Emergency,
    Coding,
    Procedure,
    Safety,
    Clinical,
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Emergency => "emergency",
            Self::Coding => "coding",
            Self::Procedure => "procedure",
            Self::Safety => "safety",
            Self::Clinical => "clinical",
        };
        write!(f, "{s}")
    }
}

/// A domain tag used for recency half-life lookup (§3 precedence weights).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    CodingBilling,
    TechnologyNavigation,
    Ablation,
    Other,
}

impl FromStr for Domain {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "coding_billing" => Self::CodingBilling,
            "technology_navigation" => Self::TechnologyNavigation,
            "ablation" => Self::Ablation,
            _ => Self::Other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_authority_falls_back_to_a4() {
        assert_eq!(AuthorityTier::from_str("bogus").unwrap(), AuthorityTier::A4);
    }

    #[test]
    fn unknown_evidence_falls_back_to_h3() {
        assert_eq!(EvidenceLevel::from_str("bogus").unwrap(), EvidenceLevel::H3);
    }

    #[test]
    fn doc_type_roundtrips_through_display() {
        for dt in [
            DocType::Guideline,
            DocType::SystematicReview,
            DocType::Rct,
            DocType::Cohort,
            DocType::CaseSeries,
            DocType::NarrativeReview,
            DocType::BookChapter,
            DocType::CodingUpdate,
            DocType::JournalArticle,
        ] {
            let parsed = DocType::from_str(&dt.to_string()).unwrap();
            assert_eq!(parsed, dt);
        }
    }

    #[test]
    fn section_type_unknown_falls_back_to_general() {
        assert_eq!(SectionType::from_str("who-knows").unwrap(), SectionType::General);
    }
}
