//! Persona Engine
//!
//! Renders final answer text in a tone. Three passes run in a fixed order,
//! each seeing only the previous pass's output:
//! vocabulary → structure → formality.

pub mod profiles;

pub use profiles::ToneRegistry;

use crate::error::Result;
use crate::models::{FormalityLevel, StyleModifier, ToneProfile};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

const EXPANSIONS: &[(&str, &str)] = &[
    ("can't", "cannot"),
    ("won't", "will not"),
    ("don't", "do not"),
    ("doesn't", "does not"),
    ("didn't", "did not"),
    ("isn't", "is not"),
    ("aren't", "are not"),
    ("wasn't", "was not"),
    ("weren't", "were not"),
    ("hasn't", "has not"),
    ("haven't", "have not"),
    ("couldn't", "could not"),
    ("shouldn't", "should not"),
    ("wouldn't", "would not"),
    ("it's", "it is"),
    ("that's", "that is"),
    ("there's", "there is"),
    ("we're", "we are"),
    ("they're", "they are"),
    ("you're", "you are"),
    ("i'm", "I am"),
    ("we'll", "we will"),
    ("they'll", "they will"),
    ("it'll", "it will"),
    ("we've", "we have"),
    ("they've", "they have"),
    ("i've", "I have"),
];

const CONTRACTIONS: &[(&str, &str)] = &[
    ("cannot", "can't"),
    ("will not", "won't"),
    ("do not", "don't"),
    ("does not", "doesn't"),
    ("did not", "didn't"),
    ("is not", "isn't"),
    ("are not", "aren't"),
    ("has not", "hasn't"),
    ("have not", "haven't"),
    ("it is", "it's"),
    ("that is", "that's"),
    ("there is", "there's"),
    ("we are", "we're"),
    ("they are", "they're"),
    ("you are", "you're"),
];

const SOFTENERS: &[(&str, &str)] = &[
    ("definitely", "likely"),
    ("certainly", "likely"),
    ("absolutely", "very likely"),
    ("always", "usually"),
    ("never", "rarely"),
];

lazy_static! {
    static ref HORIZONTAL_SPACE: Regex = Regex::new(r"[ \t]+").expect("whitespace regex");
    static ref SPACE_BEFORE_PUNCT: Regex = Regex::new(r" ([,.;:!?])").expect("punctuation regex");
    static ref HEDGES: Regex = Regex::new(
        r"(?i)\b(?:i think|kind of|sort of|basically|perhaps|maybe|probably|possibly|somewhat)\s+"
    )
    .expect("hedge regex");
    static ref COMPOUND_JOINT: Regex =
        Regex::new(r"\s*;\s*|,\s+(?:and|but)\s+").expect("compound regex");
    static ref SCORE: Regex =
        Regex::new(r"\b(\d{1,3}(?:\.\d+)?)\s*/\s*100\b").expect("score regex");
    static ref EXPAND: Option<WordSwap> = WordSwap::from_pairs(EXPANSIONS.iter().copied()).expect("expansion table");
    static ref CONTRACT: Option<WordSwap> = WordSwap::from_pairs(CONTRACTIONS.iter().copied()).expect("contraction table");
    static ref SOFTEN: Option<WordSwap> = WordSwap::from_pairs(SOFTENERS.iter().copied()).expect("softener table");
}

const BOTTOM_LINE: &str = "Bottom line:";

/// Word-bounded, case-insensitive, single-pass replacement table.
/// Longer keys win over shorter keys that share a prefix.
struct WordSwap {
    pattern: Regex,
    table: HashMap<String, String>,
}

impl WordSwap {
    fn from_pairs<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> std::result::Result<Option<Self>, regex::Error> {
        let mut table: HashMap<String, String> = HashMap::new();
        for (from, to) in pairs {
            let key = from.trim().to_lowercase();
            if !key.is_empty() {
                table.entry(key).or_insert_with(|| to.to_string());
            }
        }
        if table.is_empty() {
            return Ok(None);
        }

        let mut keys: Vec<&String> = table.keys().collect();
        keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let alternation = keys
            .iter()
            .map(|k| regex::escape(k))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&format!(r"(?i)\b(?:{})\b", alternation))?;

        Ok(Some(Self { pattern, table }))
    }

    fn apply(&self, text: &str) -> String {
        self.pattern
            .replace_all(text, |caps: &Captures| {
                let found = &caps[0];
                match self.table.get(&found.to_lowercase()) {
                    Some(replacement) => match_case(found, replacement),
                    None => found.to_string(),
                }
            })
            .into_owned()
    }
}

trait ApplyOptional {
    fn apply_to(&self, text: &str) -> String;
}

impl ApplyOptional for Option<WordSwap> {
    fn apply_to(&self, text: &str) -> String {
        match self {
            Some(swap) => swap.apply(text),
            None => text.to_string(),
        }
    }
}

/// Carry the casing of `source` over to `replacement`.
fn match_case(source: &str, replacement: &str) -> String {
    let letters: Vec<char> = source.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() > 1 && letters.iter().all(|c| c.is_uppercase()) {
        return replacement.to_uppercase();
    }
    if source.chars().next().is_some_and(char::is_uppercase) {
        return capitalize(replacement);
    }
    replacement.to_string()
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Sentences of one line. A terminator only ends a sentence when followed by
/// whitespace or the end of the line, so "82.5/100" stays whole.
fn sentences(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().map_or(true, |n| n.is_whitespace()) {
            let sentence = current.trim();
            if !sentence.is_empty() {
                out.push(sentence.to_string());
            }
            current.clear();
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        out.push(rest.to_string());
    }
    out
}

fn map_lines(text: &str, f: impl Fn(&str) -> String) -> String {
    text.lines().map(f).collect::<Vec<_>>().join("\n")
}

// =============================
// Pass 1: vocabulary
// =============================

/// Literal replacement of whole words or phrases, keeping the casing of the
/// replaced text.
pub fn vocabulary(text: &str, replacements: &BTreeMap<String, String>) -> String {
    match WordSwap::from_pairs(replacements.iter().map(|(k, v)| (k.as_str(), v.as_str()))) {
        Ok(swap) => swap.apply_to(text),
        Err(e) => {
            warn!(error = %e, "Vocabulary table did not compile, leaving text unchanged");
            text.to_string()
        }
    }
}

// =============================
// Pass 2: structure
// =============================

/// Apply style modifiers in declared order.
pub fn structure(text: &str, modifiers: &[StyleModifier]) -> String {
    modifiers
        .iter()
        .fold(text.to_string(), |acc, modifier| match modifier {
            StyleModifier::Concise => concise(&acc),
            StyleModifier::Executive => executive(&acc),
            StyleModifier::Bulleted => bulleted(&acc),
        })
}

/// Split compound sentences at semicolons and ", and" / ", but".
fn concise(text: &str) -> String {
    map_lines(text, |line| {
        let parts: Vec<String> = COMPOUND_JOINT
            .split(line)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(capitalize)
            .collect();
        let last = parts.len().saturating_sub(1);
        parts
            .iter()
            .enumerate()
            .map(|(i, part)| {
                if i < last && !part.ends_with(['.', '!', '?']) {
                    format!("{}.", part)
                } else {
                    part.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    })
}

fn confidence_marker(score: f64) -> &'static str {
    if score >= 70.0 {
        "(high confidence)"
    } else if score >= 40.0 {
        "(moderate confidence)"
    } else {
        "(low confidence)"
    }
}

/// Lead with the bottom line and mark scored sentences with a confidence band.
fn executive(text: &str) -> String {
    let marked = map_lines(text, |line| {
        sentences(line)
            .into_iter()
            .map(|sentence| {
                let score = SCORE
                    .captures(&sentence)
                    .and_then(|caps| caps[1].parse::<f64>().ok());
                match score {
                    Some(score) if !sentence.contains(" confidence)") => {
                        let marker = confidence_marker(score);
                        match sentence.strip_suffix(['.', '!', '?']) {
                            Some(body) => {
                                let terminator = &sentence[body.len()..];
                                format!("{} {}{}", body, marker, terminator)
                            }
                            None => format!("{} {}", sentence, marker),
                        }
                    }
                    _ => sentence,
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    });

    if marked.trim_start().starts_with(BOTTOM_LINE) || marked.trim().is_empty() {
        marked
    } else {
        format!("{} {}", BOTTOM_LINE, marked.trim_start())
    }
}

/// One sentence per line.
fn bulleted(text: &str) -> String {
    text.lines()
        .flat_map(|line| {
            let line = line.trim();
            if let Some(item) = line.strip_prefix("- ") {
                vec![format!("- {}", item)]
            } else {
                sentences(line)
                    .into_iter()
                    .map(|s| format!("- {}", s))
                    .collect()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// =============================
// Pass 3: formality
// =============================

/// Collapse runs of spaces, trim lines, drop blank lines and stray space
/// before punctuation.
pub fn normalize_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| {
            let collapsed = HORIZONTAL_SPACE.replace_all(line.trim(), " ");
            SPACE_BEFORE_PUNCT.replace_all(&collapsed, "$1").into_owned()
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn formality(text: &str, level: FormalityLevel) -> String {
    match level {
        FormalityLevel::Neutral => normalize_whitespace(text),
        FormalityLevel::Formal => {
            let expanded = EXPAND.apply_to(text);
            let unhedged = HEDGES.replace_all(&expanded, "");
            let normalized = normalize_whitespace(&unhedged);
            map_lines(&normalized, |line| {
                let (bullet, body) = match line.strip_prefix("- ") {
                    Some(body) => ("- ", body),
                    None => ("", line),
                };
                let body = sentences(body)
                    .iter()
                    .map(|s| capitalize(s))
                    .collect::<Vec<_>>()
                    .join(" ");
                format!("{}{}", bullet, body)
            })
        }
        FormalityLevel::Casual => {
            let softened = SOFTEN.apply_to(&CONTRACT.apply_to(text));
            normalize_whitespace(&softened)
        }
    }
}

/// Applies tone profiles to rendered answers.
#[derive(Debug, Clone)]
pub struct PersonaEngine {
    tones: ToneRegistry,
    default_tone: String,
}

impl Default for PersonaEngine {
    fn default() -> Self {
        Self::new(ToneRegistry::with_builtins(), "neutral")
    }
}

impl PersonaEngine {
    pub fn new(tones: ToneRegistry, default_tone: impl Into<String>) -> Self {
        Self {
            tones,
            default_tone: default_tone.into(),
        }
    }

    pub fn tones(&self) -> &ToneRegistry {
        &self.tones
    }

    pub fn default_tone(&self) -> &str {
        &self.default_tone
    }

    /// formality(structure(vocabulary(text)))
    pub fn apply(&self, text: &str, profile: &ToneProfile) -> String {
        let text = vocabulary(text, &profile.vocabulary_replacements);
        let text = structure(&text, &profile.style_modifiers);
        formality(&text, profile.formality_level)
    }

    /// Render with a named tone, or the default tone when none is given.
    pub fn render(&self, text: &str, tone: Option<&str>) -> Result<String> {
        let name = tone.unwrap_or(&self.default_tone);
        let profile = self.tones.get(name)?;
        debug!(tone = %profile.name, "Applying tone profile");
        Ok(self.apply(text, profile))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_vocabulary_is_word_bounded_and_case_preserving() {
        let table = vocab(&[("pick", "recommendation"), ("companies", "accounts")]);
        let out = vocabulary("Pick the best companies. PICK now. Picky buyers.", &table);
        assert_eq!(out, "Recommendation the best accounts. RECOMMENDATION now. Picky buyers.");
    }

    #[test]
    fn test_vocabulary_prefers_longest_key() {
        let table = vocab(&[("top", "best"), ("top pick", "leading candidate")]);
        assert_eq!(
            vocabulary("The top pick is Careem, top marks.", &table),
            "The leading candidate is Careem, best marks."
        );
    }

    #[test]
    fn test_vocabulary_single_pass() {
        let table = vocab(&[("a", "b"), ("b", "c")]);
        assert_eq!(vocabulary("a b", &table), "b c");
    }

    #[test]
    fn test_concise_splits_compound_sentences() {
        let out = structure(
            "Ranked 3 companies; top pick Careem scored 82.5/100, but Tabby is close.",
            &[StyleModifier::Concise],
        );
        assert_eq!(
            out,
            "Ranked 3 companies. Top pick Careem scored 82.5/100. Tabby is close."
        );
    }

    #[test]
    fn test_executive_adds_bottom_line_and_markers() {
        let out = structure(
            "Ranked 2 companies. Careem scored 82.5/100. Tabby scored 35/100.",
            &[StyleModifier::Executive],
        );
        assert_eq!(
            out,
            "Bottom line: Ranked 2 companies. Careem scored 82.5/100 (high confidence). \
             Tabby scored 35/100 (low confidence)."
        );
        // idempotent on already-marked text
        assert_eq!(structure(&out, &[StyleModifier::Executive]), out);
    }

    #[test]
    fn test_executive_ignores_longer_ratios() {
        let out = structure("Tabby booked 2500/100 units.", &[StyleModifier::Executive]);
        assert_eq!(out, "Bottom line: Tabby booked 2500/100 units.");
        let out = structure("Sarwa scored 40/1000.", &[StyleModifier::Executive]);
        assert_eq!(out, "Bottom line: Sarwa scored 40/1000.");
    }

    #[test]
    fn test_bulleted_one_sentence_per_line() {
        let out = structure("First point. Second point!\nThird", &[StyleModifier::Bulleted]);
        assert_eq!(out, "- First point.\n- Second point!\n- Third");
    }

    #[test]
    fn test_modifiers_run_in_declared_order() {
        let text = "Careem leads; Tabby follows.";
        let concise_then_bullets =
            structure(text, &[StyleModifier::Concise, StyleModifier::Bulleted]);
        assert_eq!(concise_then_bullets, "- Careem leads.\n- Tabby follows.");

        let bullets_then_concise =
            structure(text, &[StyleModifier::Bulleted, StyleModifier::Concise]);
        assert_eq!(bullets_then_concise, "- Careem leads. Tabby follows.");
    }

    #[test]
    fn test_formal_expands_and_removes_hedges() {
        let out = formality(
            "It's probably the best fit. We can't   reach them  .",
            FormalityLevel::Formal,
        );
        assert_eq!(out, "It is the best fit. We cannot reach them.");

        assert_eq!(
            formality("maybe Careem is ready.", FormalityLevel::Formal),
            "Careem is ready."
        );
    }

    #[test]
    fn test_casual_contracts_and_softens() {
        let out = formality(
            "It is definitely a match. They do not respond.",
            FormalityLevel::Casual,
        );
        assert_eq!(out, "It's likely a match. They don't respond.");
    }

    #[test]
    fn test_neutral_tone_is_identity_up_to_whitespace() {
        let engine = PersonaEngine::default();
        let profile = ToneProfile::neutral("plain");
        let text = "Ranked 3 companies; top pick Careem scored 82.5/100.";

        assert_eq!(engine.apply(text, &profile), text);
        assert_eq!(
            engine.apply("  Ranked   3 companies .\n\n next ", &profile),
            "Ranked 3 companies.\nnext"
        );

        let once = engine.apply("a  b\n\nc", &profile);
        assert_eq!(engine.apply(&once, &profile), once);
    }

    #[test]
    fn test_render_uses_named_or_default_tone() {
        let engine = PersonaEngine::default();
        let text = "Careem scored 82.5/100, and Tabby scored 35/100.";

        assert_eq!(engine.render(text, None).unwrap(), text);

        let executive = engine.render(text, Some("executive")).unwrap();
        assert!(executive.starts_with("Bottom line:"));
        assert!(executive.contains("(high confidence)"));

        assert!(engine.render(text, Some("pirate")).is_err());
    }
}
