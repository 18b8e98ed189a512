//! Assembled transcripts.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::JobId;

/// The finalized transcript of a job. One per job, overwritten on re-finalize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Transcript {
    pub job_id: JobId,
    pub text: String,
    pub finalized_at: DateTime<Utc>,
}

/// Join chunk texts in index order.
///
/// Parts may arrive in any order; they are sorted by index, joined with a
/// newline and the result is trimmed.
pub fn assemble_transcript<'a, I>(parts: I) -> String
where
    I: IntoIterator<Item = (u32, &'a str)>,
{
    let mut parts: Vec<(u32, &str)> = parts.into_iter().collect();
    parts.sort_by_key(|(index, _)| *index);

    parts
        .into_iter()
        .map(|(_, text)| text)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_in_index_order() {
        let text = assemble_transcript([(2, "c"), (0, "a"), (1, "b")]);
        assert_eq!(text, "a\nb\nc");
    }

    #[test]
    fn test_assemble_trims() {
        let text = assemble_transcript([(0, "  hello"), (1, "world \n")]);
        assert_eq!(text, "hello\nworld");
    }

    #[test]
    fn test_assemble_empty() {
        assert_eq!(assemble_transcript(std::iter::empty()), "");
    }
}
