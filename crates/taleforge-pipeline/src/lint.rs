//! Deterministic style and continuity lint on draft text.
//!
//! No model call is involved: the same text always yields the same
//! findings. The tribunal shows them to every critic and the rewrite is
//! asked to fix them, so a draft's weak spots are named concretely even
//! when a critic misses them.
//!
//! # Checks
//!
//! - Filter phrases ("she felt", "he noticed") that distance the reader.
//! - Generic verbs used often enough to flatten the prose.
//! - Stock clichés.
//! - Content words repeated many times.
//! - Sentence openings stuck on He/She/I.
//! - Characters the bible marks dead or missing who show up in the scene.

use std::collections::BTreeMap;

use serde::Serialize;
use taleforge_types::{CharacterEntry, CharacterStatus};

/// Phrases that filter perception through a character instead of showing it.
const FILTER_PHRASES: [&str; 12] = [
    "he saw",
    "she saw",
    "he felt",
    "she felt",
    "he noticed",
    "she noticed",
    "he realized",
    "she realized",
    "he thought",
    "she thought",
    "he wondered",
    "she wondered",
];

/// Verbs that say little on their own.
const GENERIC_VERBS: [&str; 6] = ["got", "went", "looked", "walked", "turned", "started"];

/// A generic verb is only reported from this many uses.
const GENERIC_VERB_MIN: usize = 3;

const CLICHES: [&str; 11] = [
    "heart racing",
    "heart was racing",
    "breath caught",
    "breath hitched",
    "dead silence",
    "let out a breath",
    "time stood still",
    "eyes widened",
    "for what felt like",
    "the air was thick",
    "like a punch",
];

/// Shortest word considered for repetition.
const REPEAT_MIN_CHARS: usize = 4;

/// Uses at which a word counts as repeated.
const REPEAT_MIN_COUNT: usize = 10;

/// Most repeated words reported.
const REPEAT_TOP: usize = 12;

/// Function words long enough to pass the length filter.
const REPEAT_IGNORED: [&str; 20] = [
    "that", "with", "from", "this", "have", "were", "they", "them", "their", "there", "what",
    "when", "into", "then", "than", "your", "been", "would", "could", "where",
];

/// Sentences opening with He/She/I before rhythm is flagged.
const RHYTHM_MIN_STARTS: usize = 10;

/// What a finding is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LintKind {
    /// Filter phrase.
    FilterWord,
    /// Overused generic verb.
    GenericVerb,
    /// Stock cliché.
    Cliche,
    /// Word repeated many times.
    Repetition,
    /// Monotonous sentence openings.
    Rhythm,
    /// Character behaves against the bible.
    CharacterDrift,
}

/// One concrete problem in a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintFinding {
    /// Check that produced the finding.
    pub kind: LintKind,
    /// Phrase, word, or character name the finding is about.
    pub subject: String,
    /// Occurrences in the draft.
    pub count: usize,
    /// Instruction as shown to critics and the rewrite.
    pub note: String,
}

/// Every finding for one draft, in check order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LintReport {
    /// Findings, grouped by [`LintKind`].
    pub findings: Vec<LintFinding>,
}

impl LintReport {
    /// Whether the draft came back clean.
    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    /// Findings of one kind.
    pub fn of_kind(&self, kind: LintKind) -> impl Iterator<Item = &LintFinding> {
        self.findings.iter().filter(move |f| f.kind == kind)
    }

    fn push(&mut self, kind: LintKind, subject: &str, count: usize, note: String) {
        self.findings.push(LintFinding {
            kind,
            subject: subject.to_owned(),
            count,
            note,
        });
    }
}

/// Lint `text` against the style checks and the character `roster`.
pub fn lint_draft(text: &str, roster: &[CharacterEntry]) -> LintReport {
    let tokens = tokenize(text);
    let lower: Vec<String> = tokens.iter().map(|t| t.to_lowercase()).collect();
    let mut report = LintReport::default();

    for phrase in FILTER_PHRASES {
        let count = count_phrase(&lower, phrase);
        if count > 0 {
            report.push(
                LintKind::FilterWord,
                phrase,
                count,
                format!("\"{phrase}\" x{count}: show the perception directly"),
            );
        }
    }

    for verb in GENERIC_VERBS {
        let count = count_phrase(&lower, verb);
        if count >= GENERIC_VERB_MIN {
            report.push(
                LintKind::GenericVerb,
                verb,
                count,
                format!("\"{verb}\" x{count}: use a precise physical verb"),
            );
        }
    }

    for cliche in CLICHES {
        let count = count_phrase(&lower, cliche);
        if count > 0 {
            report.push(
                LintKind::Cliche,
                cliche,
                count,
                format!("cliché \"{cliche}\": replace with concrete sensory detail"),
            );
        }
    }

    for (word, count) in repeated_words(&lower, roster) {
        report.push(
            LintKind::Repetition,
            &word,
            count,
            format!("\"{word}\" appears {count} times: vary or cut"),
        );
    }

    let starts = monotone_openings(text);
    if starts >= RHYTHM_MIN_STARTS {
        report.push(
            LintKind::Rhythm,
            "He/She/I",
            starts,
            format!("{starts} sentences open with He/She/I: vary the openings"),
        );
    }

    for entry in roster.iter().filter(|e| e.status != CharacterStatus::Alive) {
        let count = count_name(&tokens, &entry.name);
        if count == 0 {
            continue;
        }
        let note = if entry.status == CharacterStatus::Dead {
            format!("{} is dead in the character bible but appears in the scene", entry.name)
        } else {
            format!("{}'s fate is unknown; their return must be shown, not assumed", entry.name)
        };
        report.push(LintKind::CharacterDrift, &entry.name, count, note);
    }

    report
}

/// Words of `text`, apostrophes kept, case preserved.
fn tokenize(text: &str) -> Vec<&str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '\u{2019}'))
        .map(|w| w.trim_matches(|c: char| c == '\'' || c == '\u{2019}'))
        .filter(|w| !w.is_empty())
        .collect()
}

/// Occurrences of a space-separated lowercase `phrase` in `words`.
fn count_phrase(words: &[String], phrase: &str) -> usize {
    let needle: Vec<&str> = phrase.split_whitespace().collect();
    if needle.is_empty() {
        return 0;
    }
    words
        .windows(needle.len())
        .filter(|window| window.iter().map(String::as_str).eq(needle.iter().copied()))
        .count()
}

/// Occurrences of a character name, matched case-sensitively on whole
/// words. A possessive `'s` still counts.
fn count_name(tokens: &[&str], name: &str) -> usize {
    let needle = tokenize(name);
    if needle.is_empty() {
        return 0;
    }
    tokens
        .windows(needle.len())
        .filter(|window| {
            window
                .iter()
                .map(|t| without_possessive(t))
                .eq(needle.iter().copied())
        })
        .count()
}

fn without_possessive(word: &str) -> &str {
    word.strip_suffix("'s")
        .or_else(|| word.strip_suffix("\u{2019}s"))
        .unwrap_or(word)
}

/// Most repeated content words, highest count first.
fn repeated_words(words: &[String], roster: &[CharacterEntry]) -> Vec<(String, usize)> {
    let names: Vec<String> = roster
        .iter()
        .flat_map(|entry| tokenize(&entry.name))
        .map(str::to_lowercase)
        .collect();
    let mut freq: BTreeMap<&str, usize> = BTreeMap::new();
    for word in words {
        if word.chars().count() < REPEAT_MIN_CHARS
            || REPEAT_IGNORED.contains(&word.as_str())
            || names.contains(word)
        {
            continue;
        }
        let count = freq.entry(word.as_str()).or_insert(0);
        *count = count.saturating_add(1);
    }
    let mut repeats: Vec<(String, usize)> = freq
        .into_iter()
        .filter(|(_, count)| *count >= REPEAT_MIN_COUNT)
        .map(|(word, count)| (word.to_owned(), count))
        .collect();
    repeats.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    repeats.truncate(REPEAT_TOP);
    repeats
}

/// Sentences whose first word is He, She, or I.
fn monotone_openings(text: &str) -> usize {
    text.split(['.', '!', '?', '\n'])
        .filter_map(|sentence| {
            sentence
                .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '"' | '\u{201c}' | '\u{201d}'))
                .split_whitespace()
                .next()
        })
        .filter(|first| matches!(first.trim_end_matches([',', ';', ':']), "He" | "She" | "I"))
        .count()
}
