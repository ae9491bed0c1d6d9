//! Whitespace normalization for extracted text

use regex::Regex;
use std::sync::LazyLock;

static NBSP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"&nbsp;|\u{00A0}").unwrap());
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" {2,}").unwrap());
static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Normalize text produced by the recursive text walk
///
/// Non-breaking spaces become plain spaces and runs of spaces collapse, tabs
/// widen to two spaces, more than one blank line collapses to one, and the
/// result is trimmed.
pub fn normalize_text(text: &str) -> String {
    let text = NBSP.replace_all(text, " ");
    let text = SPACES.replace_all(&text, " ");
    let text = text.replace('\t', "  ");
    let text = BLANK_LINES.replace_all(&text, "\n\n");
    text.trim().to_string()
}
