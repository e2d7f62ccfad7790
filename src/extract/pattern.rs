//! Pattern-based extraction backend
//!
//! Pulls program metadata out of HTML with compiled regexes and category
//! keyword tables. This is the default [`Extractor`]; model-backed
//! implementations can replace it behind the same trait.

use std::collections::BTreeMap;

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::extract::types::{ExtractedFields, Extraction, Extractor};
use crate::strategy::ExtractionStrategy;

/// Requirement categories and the keywords that route a sentence into them
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "eligibility",
        &["antragsberechtigt", "eligible", "eligibility", "voraussetzung", "teilnahmeberechtigt", "zielgruppe"],
    ),
    (
        "documents",
        &["unterlagen", "dokument", "nachweis", "formular", "einreichung", "document", "application form"],
    ),
    (
        "financial",
        &["finanzierung", "eigenmittel", "budget", "kosten", "funding rate", "förderquote", "förderhöhe"],
    ),
    (
        "timeline",
        &["frist", "deadline", "laufzeit", "zeitraum", "duration", "einreichfrist"],
    ),
    (
        "geographic",
        &["standort", "sitz", "region", "bundesland", "österreich", "austria", "located"],
    ),
    (
        "technical",
        &["technisch", "technical", "innovation", "forschung", "entwicklung", "prototyp"],
    ),
    (
        "legal",
        &["rechtsform", "legal", "gmbh", "unternehmen", "registriert", "firmenbuch"],
    ),
    (
        "team",
        &["team", "mitarbeiter", "gründer", "founder", "personal"],
    ),
    (
        "co_financing",
        &["kofinanzierung", "co-financing", "eigenanteil", "eigenleistung"],
    ),
    (
        "consortium",
        &["konsortium", "consortium", "partner", "kooperation"],
    ),
];

/// Cues that mark a sentence as a requirement rather than marketing copy
const REQUIREMENT_CUES: &[&str] = &[
    "muss", "müssen", "must", "required", "erforderlich", "mindestens", "at least",
    "benötigt", "verpflichtend", "notwendig", "nachzuweisen", "nur ", "only ",
];

/// Keywords that make a title read like funding-program content
const TITLE_PROGRAM_KEYWORDS: &[&str] = &[
    "förderung", "foerderung", "funding", "grant", "programm", "program", "kredit",
    "darlehen", "zuschuss", "ausschreibung", "call",
];

/// Signal count at which extraction confidence saturates at 1.0
const CONFIDENCE_SATURATION: f64 = 20.0;

/// Regex-driven [`Extractor`] with no external dependencies at runtime
pub struct PatternExtractor {
    amount_near: Regex,
    amount_currency: Regex,
    open_deadline: Regex,
    deadline: Regex,
    email: Regex,
    phone: Regex,
    sentence_split: Regex,
}

impl PatternExtractor {
    pub fn new() -> Self {
        // The patterns are static; compilation cannot fail.
        Self {
            amount_near: Regex::new(
                r"(?i)(?:bis zu|maximal|förderbetrag|förderhöhe|fördersumme|up to|max\.?)\s*:?\s*€?\s*(\d{1,3}(?:[.,]\d{3})*(?:,\d{2})?)",
            )
            .unwrap(),
            amount_currency: Regex::new(
                r"(?i)€\s*(\d{1,3}(?:[.,]\d{3})*(?:,\d{2})?)|(\d{1,3}(?:[.,]\d{3})*(?:,\d{2})?)\s*(?:€|eur\b|euro)",
            )
            .unwrap(),
            open_deadline: Regex::new(
                r"(?i)\b(?:laufend|rolling|ongoing|bis auf weiteres|keine frist|kontinuierlich|no deadline)\b",
            )
            .unwrap(),
            deadline: Regex::new(
                r"(?i)(?:deadline|frist|einreichfrist|bewerbungsfrist|einreichschluss|bis|until)\s*:?\s*(\d{1,2})[./\-\s]+(\d{1,2})[./\-\s]+(\d{2,4})",
            )
            .unwrap(),
            email: Regex::new(r"[\w.+-]+@[\w-]+(?:\.[\w-]+)+").unwrap(),
            phone: Regex::new(r"(?:\+\d{1,3}|0)[\d\s/().-]{6,16}\d").unwrap(),
            sentence_split: Regex::new(r"[.!?]\s+|\n+").unwrap(),
        }
    }

    fn extract_fields(&self, html: &str) -> (ExtractedFields, f64, bool) {
        let document = Html::parse_document(html);
        let title = select_text(&document, "title").or_else(|| select_text(&document, "h1"));
        let description = select_meta(&document, "meta[name=\"description\"]")
            .or_else(|| select_meta(&document, "meta[property=\"og:description\"]"));
        let text = document.root_element().text().collect::<Vec<_>>().join(" ");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");

        if text.trim().is_empty() {
            return (ExtractedFields::default(), 0.0, true);
        }

        let amounts = self.extract_amounts(&text);
        let (funding_amount_min, funding_amount_max) = match (
            amounts.iter().cloned().fold(f64::INFINITY, f64::min),
            amounts.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        ) {
            (min, max) if !amounts.is_empty() => (Some(min), Some(max)),
            _ => (None, None),
        };
        let currency = if !amounts.is_empty() { Some("EUR".to_string()) } else { None };

        let open_deadline = self.open_deadline.is_match(&text);
        let deadline = if open_deadline {
            None
        } else {
            self.deadline.captures(&text).and_then(|c| {
                let day: u32 = c[1].parse().ok()?;
                let month: u32 = c[2].parse().ok()?;
                let year: i32 = c[3].parse().ok()?;
                let year = if year < 100 { year + 2000 } else { year };
                if day == 0 || day > 31 || month == 0 || month > 12 {
                    return None;
                }
                Some(format!("{:02}.{:02}.{}", day, month, year))
            })
        };

        let contact_email = self.email.find(&text).map(|m| m.as_str().to_string());
        let contact_phone = self.phone.find(&text).map(|m| m.as_str().trim().to_string());

        let categorized_requirements = self.categorize_requirements(&text);

        let fields = ExtractedFields {
            title: title.clone(),
            description,
            categorized_requirements,
            funding_amount_min,
            funding_amount_max,
            currency,
            deadline: deadline.clone(),
            open_deadline,
            contact_email: contact_email.clone(),
            contact_phone: contact_phone.clone(),
        };

        let confidence = self.score(&fields);
        (fields, confidence, false)
    }

    fn extract_amounts(&self, text: &str) -> Vec<f64> {
        let mut amounts = Vec::new();
        for caps in self.amount_near.captures_iter(text) {
            if let Some(value) = caps.get(1).and_then(|m| parse_amount(m.as_str())) {
                amounts.push(value);
            }
        }
        for caps in self.amount_currency.captures_iter(text) {
            let raw = caps.get(1).or_else(|| caps.get(2));
            if let Some(value) = raw.and_then(|m| parse_amount(m.as_str())) {
                amounts.push(value);
            }
        }
        amounts
    }

    fn categorize_requirements(&self, text: &str) -> BTreeMap<String, Vec<String>> {
        let mut result: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for sentence in self.sentence_split.split(text) {
            let sentence = sentence.trim();
            if sentence.len() < 20 || sentence.len() > 300 {
                continue;
            }
            let lower = sentence.to_lowercase();
            if !REQUIREMENT_CUES.iter().any(|cue| lower.contains(cue)) {
                continue;
            }
            for (category, keywords) in CATEGORY_KEYWORDS {
                if keywords.iter().any(|k| lower.contains(k)) {
                    let items = result.entry(category.to_string()).or_default();
                    // A few per category is plenty; more is usually boilerplate
                    if items.len() < 5 && !items.iter().any(|i| i == sentence) {
                        items.push(sentence.to_string());
                    }
                }
            }
        }
        result
    }

    /// Scores how much program signal the extraction carries
    ///
    /// Each requirement sentence counts one signal; funding amounts, a
    /// deadline, contacts, and a program-flavored title add weighted signals.
    /// Confidence saturates at 20 signals, matching how extraction accuracy
    /// has been measured historically.
    fn score(&self, fields: &ExtractedFields) -> f64 {
        let requirement_count: usize = fields
            .categorized_requirements
            .values()
            .map(|v| v.len())
            .sum();

        let mut signals = requirement_count as f64;
        if fields.funding_amount_max.is_some() {
            signals += 3.0;
        }
        if fields.deadline.is_some() || fields.open_deadline {
            signals += 2.0;
        }
        if fields.contact_email.is_some() {
            signals += 1.0;
        }
        if fields.contact_phone.is_some() {
            signals += 1.0;
        }
        if let Some(title) = &fields.title {
            let lower = title.to_lowercase();
            if TITLE_PROGRAM_KEYWORDS.iter().any(|k| lower.contains(k)) {
                signals += 2.0;
            }
        }

        (signals / CONFIDENCE_SATURATION).min(1.0)
    }
}

impl Default for PatternExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for PatternExtractor {
    fn extract(&self, _url: &Url, html: &str, _strategy: ExtractionStrategy) -> Extraction {
        let (fields, confidence, unparseable) = self.extract_fields(html);
        Extraction {
            fields,
            confidence,
            unparseable,
        }
    }
}

fn select_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn select_meta(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Parses a German- or English-formatted amount string
///
/// Rejects values that are almost certainly not funding amounts: years in
/// the 1990-2035 range and anything under 100.
fn parse_amount(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let normalized = match (raw.rfind(','), raw.rfind('.')) {
        // Both separators: the later one is the decimal point
        (Some(comma), Some(point)) if comma > point => {
            raw.replace('.', "").replace(',', ".")
        }
        (Some(_), Some(_)) => raw.replace(',', ""),
        // A lone separator followed by exactly three digits groups thousands
        (Some(comma), None) if raw.len() - comma - 1 == 3 => raw.replace(',', ""),
        (Some(_), None) => raw.replace(',', "."),
        (None, Some(point)) if raw.len() - point - 1 == 3 => raw.replace('.', ""),
        _ => raw.to_string(),
    };
    let value: f64 = normalized.parse().ok()?;

    if (1990.0..=2035.0).contains(&value) {
        return None;
    }
    if value < 100.0 {
        return None;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(html: &str) -> Extraction {
        let extractor = PatternExtractor::new();
        let url = Url::parse("https://x.at/foerderung/test").unwrap();
        extractor.extract(&url, html, ExtractionStrategy::Regex)
    }

    const PROGRAM_PAGE: &str = r#"<html>
        <head>
            <title>Basisprogramm Förderung</title>
            <meta name="description" content="Förderung für innovative Projekte">
        </head>
        <body>
            <h1>Basisprogramm</h1>
            <p>Förderhöhe: bis zu € 500.000 pro Projekt.</p>
            <p>Einreichfrist: 31.03.2027</p>
            <p>Antragsberechtigt sind Unternehmen, die mindestens zwei Jahre bestehen.</p>
            <p>Folgende Unterlagen müssen eingereicht werden: Businessplan und Nachweis der Eigenmittel.</p>
            <p>Kontakt: foerderung@x.at, +43 1 234 5678</p>
        </body>
    </html>"#;

    #[test]
    fn test_extracts_title_and_description() {
        let extraction = extract(PROGRAM_PAGE);
        assert_eq!(extraction.fields.title.as_deref(), Some("Basisprogramm Förderung"));
        assert_eq!(
            extraction.fields.description.as_deref(),
            Some("Förderung für innovative Projekte")
        );
    }

    #[test]
    fn test_extracts_funding_amount() {
        let extraction = extract(PROGRAM_PAGE);
        assert_eq!(extraction.fields.funding_amount_max, Some(500_000.0));
        assert_eq!(extraction.fields.currency.as_deref(), Some("EUR"));
    }

    #[test]
    fn test_extracts_deadline() {
        let extraction = extract(PROGRAM_PAGE);
        assert_eq!(extraction.fields.deadline.as_deref(), Some("31.03.2027"));
        assert!(!extraction.fields.open_deadline);
    }

    #[test]
    fn test_open_deadline_wins_over_dates() {
        let extraction = extract(
            "<html><body><p>Einreichung laufend möglich, Programm seit 01.01.2020.</p></body></html>",
        );
        assert!(extraction.fields.open_deadline);
        assert_eq!(extraction.fields.deadline, None);
    }

    #[test]
    fn test_extracts_contacts() {
        let extraction = extract(PROGRAM_PAGE);
        assert_eq!(extraction.fields.contact_email.as_deref(), Some("foerderung@x.at"));
        assert!(extraction.fields.contact_phone.is_some());
    }

    #[test]
    fn test_categorizes_requirements() {
        let extraction = extract(PROGRAM_PAGE);
        let reqs = &extraction.fields.categorized_requirements;
        assert!(reqs.contains_key("eligibility"));
        assert!(reqs.contains_key("documents"));
    }

    #[test]
    fn test_program_page_clears_default_threshold() {
        let extraction = extract(PROGRAM_PAGE);
        assert!(extraction.confidence >= 0.35, "confidence was {}", extraction.confidence);
        assert!(!extraction.unparseable);
    }

    #[test]
    fn test_plain_page_scores_low() {
        let extraction = extract(
            "<html><head><title>Unser Team</title></head><body><p>Wir stellen uns vor.</p></body></html>",
        );
        assert!(extraction.confidence < 0.35);
    }

    #[test]
    fn test_empty_document_is_unparseable() {
        let extraction = extract("");
        assert!(extraction.unparseable);
        assert_eq!(extraction.confidence, 0.0);
    }

    #[test]
    fn test_amount_parser_rejects_years_and_noise() {
        assert_eq!(parse_amount("2026"), None);
        assert_eq!(parse_amount("42"), None);
        assert_eq!(parse_amount("100.000"), Some(100_000.0));
        assert_eq!(parse_amount("100,000.50"), Some(100_000.5));
        assert_eq!(parse_amount("500.000,00"), Some(500_000.0));
    }
}
