//! Draft text cleanup.
//!
//! Writer models leak reasoning blocks, stray wrapper tags, and chatty
//! preambles ("Here is the revised scene:") into their output, and
//! sometimes repeat whole paragraphs. [`sanitize_draft`] removes all of it
//! and returns only prose; an empty result means the draft is unusable.

use std::collections::HashSet;

use taleforge_gateway::strip_think_blocks;

/// Wrapper tags removed wherever they appear.
const STRAY_TAGS: [&str; 10] = [
    "<write>",
    "</write>",
    "<output>",
    "</output>",
    "<response>",
    "</response>",
    "<scene>",
    "</scene>",
    "<plan>",
    "</plan>",
];

/// Lowercased line prefixes that mark meta-commentary rather than prose.
const META_PREFIXES: [&str; 17] = [
    "here is",
    "here's the",
    "in this scene",
    "in this revised scene",
    "the revised scene",
    "the revised version",
    "i've revised",
    "i've aimed",
    "i've tried",
    "let me",
    "i will ",
    "i need to",
    "okay,",
    "alright,",
    "note:",
    "notes:",
    "each revision builds",
];

/// Lowercased fragments that only appear when a prompt leaks into the output.
const LEAK_MARKERS: [&str; 5] = [
    "[word count",
    "word count:",
    "tribunal scores",
    "update_state",
    "prose_score",
];

/// Strip reasoning, wrapper tags, meta lines, and duplicate paragraphs.
pub fn sanitize_draft(raw: &str) -> String {
    let mut text = strip_think_blocks(raw);
    for tag in STRAY_TAGS {
        text = text.replace(tag, "");
    }

    let kept: Vec<&str> = text
        .lines()
        .filter(|line| !is_meta_line(line))
        .collect();

    let mut seen = HashSet::new();
    let mut paragraphs = Vec::new();
    let joined = kept.join("\n");
    for paragraph in joined.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        let key: String = paragraph
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        if seen.insert(key) {
            paragraphs.push(paragraph);
        }
    }
    paragraphs.join("\n\n")
}

fn is_meta_line(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed == "---" || trimmed == "***" {
        return true;
    }
    let lower = trimmed.to_lowercase();
    META_PREFIXES.iter().any(|prefix| lower.starts_with(prefix))
        || LEAK_MARKERS.iter().any(|marker| lower.contains(marker))
}
