//! Filler-word removal for raw model transcripts.

use std::sync::LazyLock;

use regex::Regex;

/// Standalone English fillers (with elongations) and common Japanese
/// fillers, each optionally followed by a comma or 読点.
static FILLERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:\b(?:u+m+|u+h+|e+r+m+|h+m+)\b|えーと|えっと|あのー|そのー|うーん|えー|あー)[,、]?",
    )
    .unwrap()
});

static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]{2,}").unwrap());

/// Remove filler tokens, collapse runs of spaces and trim each line.
/// Everything else is left as the model produced it.
pub fn strip_fillers(text: &str) -> String {
    let stripped = FILLERS.replace_all(text, "");
    stripped
        .lines()
        .map(|line| SPACES.replace_all(line, " ").trim().to_string())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
