//! Entity Extractor
//!
//! Recognizes companies, sectors, regions, buying signals, metrics and
//! reference phrases ("them", "that company") in free text.
//! Pure and deterministic: text that matches nothing yields no entities.

use crate::models::{EntityType, ExtractedEntity, Span};
use lazy_static::lazy_static;
use regex::Regex;

/// Gazetteer entries: (case-insensitive pattern, normalized value)
const SECTORS: &[(&str, &str)] = &[
    ("fintech|financial technology", "fintech"),
    ("banking|banks", "banking"),
    ("payments?", "payments"),
    ("healthtech|health tech", "healthtech"),
    ("healthcare|health care", "healthcare"),
    ("saas|software", "saas"),
    ("e-?commerce", "ecommerce"),
    ("logistics|supply chain", "logistics"),
    ("real estate|proptech", "real-estate"),
    ("insurtech|insurance", "insurance"),
    ("edtech|education", "edtech"),
    ("retail", "retail"),
    ("hospitality|hotels", "hospitality"),
    ("energy|oil and gas", "energy"),
    ("telecom(?:munications)?", "telecom"),
    ("crypto|web3|blockchain", "crypto"),
    ("manufacturing", "manufacturing"),
    ("construction", "construction"),
];

const REGIONS: &[(&str, &str)] = &[
    ("dubai", "Dubai"),
    ("abu dhabi", "Abu Dhabi"),
    ("sharjah", "Sharjah"),
    ("uae|united arab emirates", "UAE"),
    ("ksa|saudi arabia|saudi", "Saudi Arabia"),
    ("riyadh", "Riyadh"),
    ("jeddah", "Jeddah"),
    ("qatar", "Qatar"),
    ("doha", "Doha"),
    ("bahrain", "Bahrain"),
    ("kuwait", "Kuwait"),
    ("oman", "Oman"),
    ("egypt", "Egypt"),
    ("cairo", "Cairo"),
    ("gcc|gulf", "GCC"),
    ("mena|middle east", "MENA"),
    ("india", "India"),
    ("uk|united kingdom", "UK"),
    ("london", "London"),
    ("singapore", "Singapore"),
    ("usa|united states", "USA"),
    ("europe", "Europe"),
];

/// Buying-signal vocabulary, normalized to discovery signal keys
const SIGNALS: &[(&str, &str)] = &[
    ("hiring(?: expansion| spree)?|recruiting|headcount growth", "hiring-expansion"),
    ("funding(?: rounds?)?|raised|series [a-e]|seed round", "funding-round"),
    ("new offices?|office openings?|opened an office|opening an office", "office-opening"),
    ("market entry|entering the market|expanding into|expansion", "market-entry"),
    ("new subsidiary|subsidiar(?:y|ies)(?: creation)?", "subsidiary-creation"),
    ("new (?:ceo|cfo|cto)|leadership changes?|executive hires?", "leadership-change"),
    ("acquisitions?|acquired|mergers?", "acquisition"),
    ("partnerships?|partnered", "partnership"),
    ("product launch(?:es)?|launched", "product-launch"),
];

const REFERENCES: &[(&str, &str)] = &[
    (
        "all of them|those companies|these companies|the companies|them|they|those|these",
        "plural",
    ),
    (
        "that company|this company|the company|that one|this one|that firm|its|it",
        "singular:company",
    ),
    (
        "that region|that market|that city|same region|same market",
        "singular:region",
    ),
    (
        "that sector|this sector|that industry|this industry|same sector|same industry",
        "singular:sector",
    ),
];

/// Capitalized words that start sentences or commands, never company names
const LEADING_STOPWORDS: &[&str] = &[
    "a", "an", "and", "about", "compare", "draft", "email", "find", "for", "get", "give",
    "how", "is", "list", "me", "on", "please", "profile", "rank", "score", "search", "show",
    "tell", "the", "then", "what", "who", "write",
];

lazy_static! {
    static ref SECTOR_PATTERNS: Vec<(Regex, &'static str)> = compile_gazetteer(SECTORS);
    static ref REGION_PATTERNS: Vec<(Regex, &'static str)> = compile_gazetteer(REGIONS);
    static ref SIGNAL_PATTERNS: Vec<(Regex, &'static str)> = compile_gazetteer(SIGNALS);
    static ref REFERENCE_PATTERNS: Vec<(Regex, &'static str)> = compile_gazetteer(REFERENCES);
    static ref COMPANY_SUFFIXED: Regex = Regex::new(
        r"\b((?:[A-Z][\w&'.-]*\s+){0,4}[A-Z][\w&'.-]*)\s+(Inc\.?|LLC|Ltd\.?|Limited|Group|Holdings|Bank|Technologies|Corp\.?|Corporation|PJSC|Labs|Capital|Ventures)\b"
    )
    .expect("company pattern");
    static ref COMPANY_QUOTED: Regex = Regex::new(r#""([^"\n]{2,60})""#).expect("quoted pattern");
    static ref METRIC_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)(?:\$|\busd\s?|\baed\s?)\d[\d,]*(?:\.\d+)?\s?(?:k|m|mn|b|bn|million|billion)?\b")
            .expect("money pattern"),
        Regex::new(r"\b\d+(?:\.\d+)?\s?%").expect("percent pattern"),
        Regex::new(r"(?i)\b\d[\d,]*\+?\s+(?:employees|staff|people)\b").expect("headcount pattern"),
        Regex::new(r"(?i)\btop\s+\d+\b").expect("top-n pattern"),
    ];
}

fn compile_gazetteer(entries: &[(&str, &'static str)]) -> Vec<(Regex, &'static str)> {
    entries
        .iter()
        .map(|(pattern, value)| {
            let regex = Regex::new(&format!(r"(?i)\b(?:{})\b", pattern))
                .expect("gazetteer patterns are static");
            (regex, *value)
        })
        .collect()
}

/// Plurality/target type of a reference entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Plural,
    Singular(EntityType),
}

impl ReferenceKind {
    pub fn of(entity: &ExtractedEntity) -> Option<Self> {
        if !entity.is_reference() {
            return None;
        }
        match entity.normalized_value.as_str() {
            "plural" => Some(ReferenceKind::Plural),
            other => other
                .strip_prefix("singular:")
                .and_then(EntityType::parse)
                .map(ReferenceKind::Singular),
        }
    }
}

/// Pattern-based entity extractor
#[derive(Debug, Clone, Default)]
pub struct EntityExtractor {
    known_companies: Vec<(Regex, String)>,
}

impl EntityExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extra company names to recognize regardless of casing or suffix.
    pub fn with_known_companies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            let trimmed = name.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Ok(regex) = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(trimmed))) {
                self.known_companies.push((regex, trimmed.to_string()));
            }
        }
        self
    }

    /// Extract entities sorted by span start, overlaps resolved.
    pub fn extract(&self, text: &str) -> Vec<ExtractedEntity> {
        let mut candidates = Vec::new();

        for (regex, name) in &self.known_companies {
            for m in regex.find_iter(text) {
                candidates.push(ExtractedEntity::new(
                    EntityType::Company,
                    Span::new(m.start(), m.end()),
                    name.clone(),
                    0.95,
                ));
            }
        }
        collect_suffixed_companies(text, &mut candidates);
        for caps in COMPANY_QUOTED.captures_iter(text) {
            if let Some(inner) = caps.get(1) {
                candidates.push(ExtractedEntity::new(
                    EntityType::Company,
                    Span::new(inner.start(), inner.end()),
                    collapse_whitespace(inner.as_str()),
                    0.7,
                ));
            }
        }

        collect_gazetteer(text, &SECTOR_PATTERNS, EntityType::Sector, 0.9, &mut candidates);
        collect_gazetteer(text, &REGION_PATTERNS, EntityType::Region, 0.9, &mut candidates);
        collect_gazetteer(text, &SIGNAL_PATTERNS, EntityType::Signal, 0.85, &mut candidates);

        for regex in METRIC_PATTERNS.iter() {
            for m in regex.find_iter(text) {
                candidates.push(ExtractedEntity::new(
                    EntityType::Metric,
                    Span::new(m.start(), m.end()),
                    collapse_whitespace(&m.as_str().to_lowercase()),
                    0.9,
                ));
            }
        }

        collect_gazetteer(
            text,
            &REFERENCE_PATTERNS,
            EntityType::Reference,
            0.8,
            &mut candidates,
        );

        resolve_overlaps(candidates)
    }
}

fn collect_gazetteer(
    text: &str,
    patterns: &[(Regex, &'static str)],
    entity_type: EntityType,
    confidence: f64,
    out: &mut Vec<ExtractedEntity>,
) {
    for (regex, value) in patterns {
        for m in regex.find_iter(text) {
            out.push(ExtractedEntity::new(
                entity_type,
                Span::new(m.start(), m.end()),
                *value,
                confidence,
            ));
        }
    }
}

fn collect_suffixed_companies(text: &str, out: &mut Vec<ExtractedEntity>) {
    for m in COMPANY_SUFFIXED.find_iter(text) {
        // Trim command words a sentence may start with ("Rank Careem Technologies").
        let mut start = m.start();
        for word in m.as_str().split_whitespace() {
            if LEADING_STOPWORDS.contains(&word.to_lowercase().as_str()) {
                start += text[start..].find(word).map(|i| i + word.len()).unwrap_or(0);
                start += text[start..].len() - text[start..].trim_start().len();
            } else {
                break;
            }
        }
        if start >= m.end() {
            continue;
        }
        let name = collapse_whitespace(&text[start..m.end()]);
        // A bare suffix ("Bank") is not a name.
        if !name.contains(' ') {
            continue;
        }
        out.push(ExtractedEntity::new(
            EntityType::Company,
            Span::new(start, m.end()),
            name,
            0.85,
        ));
    }
}

/// Longest match wins, then the more specific type.
fn resolve_overlaps(mut candidates: Vec<ExtractedEntity>) -> Vec<ExtractedEntity> {
    candidates.sort_by(|a, b| {
        b.span
            .len()
            .cmp(&a.span.len())
            .then(a.entity_type.cmp(&b.entity_type))
            .then(a.span.start.cmp(&b.span.start))
    });

    let mut accepted: Vec<ExtractedEntity> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if candidate.span.is_empty() {
            continue;
        }
        if accepted.iter().any(|e| e.span.overlaps(&candidate.span)) {
            continue;
        }
        accepted.push(candidate);
    }

    accepted.sort_by_key(|e| e.span.start);
    accepted
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
