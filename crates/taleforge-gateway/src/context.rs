//! Context-window safety.
//!
//! Local models silently truncate prompts that overflow `num_ctx`, usually
//! dropping the system message and the task instructions first. The
//! gateway trims the middle of the user message instead, keeping the
//! opening (story state) and the ending (the actual instruction).

use crate::provider::Prompt;

/// Tokens held back for the model's own overhead on top of `max_tokens`.
const RESERVE_TOKENS: u32 = 512;

/// Marker inserted where text was cut.
const CUT_MARKER: &str = "\n\n[... material omitted to fit the context window ...]\n\n";

/// Rough token estimate: 3.5 characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().saturating_mul(10) / 35
}

/// Trim `prompt.user` so system + user + completion fit in `context_tokens`.
///
/// The system message is never cut. Returns the prompt unchanged when it
/// already fits.
pub fn fit_prompt(prompt: &Prompt, context_tokens: u32, max_tokens: u32) -> Prompt {
    let budget = usize::try_from(
        context_tokens
            .saturating_sub(max_tokens)
            .saturating_sub(RESERVE_TOKENS),
    )
    .unwrap_or(usize::MAX);
    let system_tokens = estimate_tokens(&prompt.system);
    let user_tokens = estimate_tokens(&prompt.user);

    if system_tokens.saturating_add(user_tokens) <= budget {
        return prompt.clone();
    }

    let user_budget_chars = budget.saturating_sub(system_tokens).saturating_mul(35) / 10;
    tracing::warn!(
        user_tokens,
        system_tokens,
        budget,
        "prompt exceeds context window, trimming middle of user message"
    );
    Prompt {
        system: prompt.system.clone(),
        user: truncate_middle(&prompt.user, user_budget_chars),
    }
}

/// Keep the first 60% and last 40% of `max_chars`, joined by a marker.
pub fn truncate_middle(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_owned();
    }
    let head_len = max_chars.saturating_mul(3) / 5;
    let tail_len = max_chars.saturating_sub(head_len);
    let head: String = text.chars().take(head_len).collect();
    let tail: String = text.chars().skip(total.saturating_sub(tail_len)).collect();
    format!("{head}{CUT_MARKER}{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_prompt_untouched() {
        let prompt = Prompt::new("system", "short user message");
        assert_eq!(fit_prompt(&prompt, 8192, 1024), prompt);
    }

    #[test]
    fn oversized_prompt_keeps_both_ends() {
        let user = format!("HEAD{}TAIL", "x".repeat(20_000));
        let prompt = Prompt::new("keep me", user);
        let fitted = fit_prompt(&prompt, 2048, 512);
        assert_eq!(fitted.system, "keep me");
        assert!(fitted.user.starts_with("HEAD"));
        assert!(fitted.user.ends_with("TAIL"));
        assert!(fitted.user.contains("omitted"));
        assert!(fitted.user.len() < prompt.user.len());
    }

    #[test]
    fn truncate_middle_is_char_safe() {
        let text = "é".repeat(100);
        let cut = truncate_middle(&text, 10);
        assert!(cut.starts_with("éééééé"));
        assert!(cut.ends_with("éééé"));
    }

    #[test]
    fn estimate_is_roughly_chars_over_three_and_a_half() {
        assert_eq!(estimate_tokens(&"a".repeat(35)), 10);
        assert_eq!(estimate_tokens(""), 0);
    }
}
