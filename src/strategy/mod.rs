//! Extraction strategy selection
//!
//! Picks how a page's content should be extracted, based on how well each
//! method has historically performed for the institution. The selector is a
//! pure function over its inputs; all history lives in the metrics store.

use serde::{Deserialize, Serialize};

/// Accuracy at or above which an institution-specific model is trusted
const CUSTOM_MODEL_FLOOR: f64 = 0.75;

/// Accuracy at or above which pattern extraction is combined with a
/// model-assisted pass
const HYBRID_FLOOR: f64 = 0.5;

/// How a page's content gets extracted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// Pattern-based extraction only
    Regex,
    /// Model-assisted extraction
    Llm,
    /// Pattern extraction cross-checked by a model pass
    Hybrid,
    /// Institution-specific trained model
    CustomModel,
}

impl ExtractionStrategy {
    /// Converts the strategy to its database string
    pub fn to_db_string(&self) -> &'static str {
        match self {
            ExtractionStrategy::Regex => "regex",
            ExtractionStrategy::Llm => "llm",
            ExtractionStrategy::Hybrid => "hybrid",
            ExtractionStrategy::CustomModel => "custom_model",
        }
    }

    /// Parses a strategy from its database string
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "regex" => Some(ExtractionStrategy::Regex),
            "llm" => Some(ExtractionStrategy::Llm),
            "hybrid" => Some(ExtractionStrategy::Hybrid),
            "custom_model" => Some(ExtractionStrategy::CustomModel),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// How much the selected strategy's output should be trusted downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::High => "high",
        }
    }
}

/// Result of strategy selection, with the reasons that led to it
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub strategy: ExtractionStrategy,
    pub confidence: ConfidenceLevel,
    /// Human-readable reasons, logged alongside the choice
    pub rationale: Vec<String>,
}

/// Selects the extraction strategy for a page
///
/// The decision ladder, top match wins:
///
/// 1. Historical accuracy ≥ 0.75 → [`ExtractionStrategy::CustomModel`], high
///    confidence
/// 2. Historical accuracy in [0.5, 0.75) → [`ExtractionStrategy::Hybrid`],
///    medium confidence
/// 3. URL looks like a requirements/eligibility page →
///    [`ExtractionStrategy::Llm`], medium confidence (these pages carry dense
///    prose that patterns handle poorly)
/// 4. Otherwise → [`ExtractionStrategy::Regex`], low confidence
///
/// # Arguments
///
/// * `url` - The page URL
/// * `historical_accuracy` - Moving accuracy of past extractions for this
///   institution, if any history exists
pub fn select(url: &str, historical_accuracy: Option<f64>) -> Selection {
    if let Some(accuracy) = historical_accuracy {
        if accuracy >= CUSTOM_MODEL_FLOOR {
            return Selection {
                strategy: ExtractionStrategy::CustomModel,
                confidence: ConfidenceLevel::High,
                rationale: vec![format!(
                    "historical accuracy {:.2} at or above {:.2}",
                    accuracy, CUSTOM_MODEL_FLOOR
                )],
            };
        }
        if accuracy >= HYBRID_FLOOR {
            return Selection {
                strategy: ExtractionStrategy::Hybrid,
                confidence: ConfidenceLevel::Medium,
                rationale: vec![format!(
                    "historical accuracy {:.2} in [{:.2}, {:.2})",
                    accuracy, HYBRID_FLOOR, CUSTOM_MODEL_FLOOR
                )],
            };
        }
    }

    if looks_like_requirements_page(url) {
        let mut rationale = vec!["url suggests a requirements page".to_string()];
        if let Some(accuracy) = historical_accuracy {
            rationale.push(format!("historical accuracy {:.2} below {:.2}", accuracy, HYBRID_FLOOR));
        }
        return Selection {
            strategy: ExtractionStrategy::Llm,
            confidence: ConfidenceLevel::Medium,
            rationale,
        };
    }

    let rationale = match historical_accuracy {
        Some(accuracy) => vec![format!(
            "historical accuracy {:.2} below {:.2}, no requirements signal in url",
            accuracy, HYBRID_FLOOR
        )],
        None => vec!["no extraction history for this institution".to_string()],
    };
    Selection {
        strategy: ExtractionStrategy::Regex,
        confidence: ConfidenceLevel::Low,
        rationale,
    }
}

fn looks_like_requirements_page(url: &str) -> bool {
    let lower = url.to_lowercase();
    [
        "requirement",
        "voraussetzung",
        "eligibility",
        "teilnahmebedingung",
        "richtlinie",
        "guideline",
        "criteria",
        "kriterien",
    ]
    .iter()
    .any(|k| lower.contains(k))
}
