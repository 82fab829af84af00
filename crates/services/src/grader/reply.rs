use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use lesson_core::model::Criteria;

use crate::error::GraderError;

/// Structured verdict returned by the grader.
#[derive(Debug, Clone, PartialEq)]
pub struct GraderResult {
    pub score: f64,
    /// Raw decision string; may be English or Spanish.
    pub decision: String,
    pub criteria: Criteria,
    pub feedback: String,
    pub corrections: Option<String>,
    pub tips: String,
}

#[derive(Deserialize)]
struct RawReply {
    score: f64,
    decision: String,
    feedback: String,
    #[serde(default)]
    criteria: BTreeMap<String, Value>,
    #[serde(default)]
    corrections: Option<String>,
    #[serde(default)]
    tips: Option<String>,
}

/// Remove a surrounding Markdown code fence (```json or ```), if present.
#[must_use]
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Parse and validate the grader's reply text.
///
/// `score` must be a number and `decision`/`feedback` strings; non-numeric
/// criteria are dropped.
///
/// # Errors
///
/// Returns `GraderError::Malformed` if the text is not JSON or misses a
/// required field.
pub fn parse_reply(raw: &str) -> Result<GraderResult, GraderError> {
    let body = strip_code_fence(raw);
    let reply: RawReply = serde_json::from_str(body).map_err(|e| {
        tracing::error!(raw, error = %e, "failed to parse grader reply");
        GraderError::Malformed(e.to_string())
    })?;

    let criteria = reply
        .criteria
        .into_iter()
        .filter_map(|(name, value)| value.as_f64().map(|score| (name, score)))
        .collect();

    Ok(GraderResult {
        score: reply.score,
        decision: reply.decision,
        criteria,
        feedback: reply.feedback,
        corrections: reply.corrections.filter(|c| !c.trim().is_empty()),
        tips: reply.tips.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str = r#"{
        "score": 8.5,
        "decision": "Correcto",
        "criteria": {
            "semanticRelevance": 9,
            "grammaticalCorrectness": 8,
            "vocabularyAppropriate": 8.5,
            "pronunciation": "n/a"
        },
        "feedback": "Great job",
        "corrections": null,
        "tips": "Try a longer sentence"
    }"#;

    #[test]
    fn strips_json_fence() {
        let fenced = format!("```json\n{REPLY}\n```");
        assert_eq!(strip_code_fence(&fenced), REPLY.trim());
    }

    #[test]
    fn strips_bare_fence() {
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn parses_full_reply() {
        let result = parse_reply(&format!("```json\n{REPLY}\n```")).unwrap();
        assert_eq!(result.score, 8.5);
        assert_eq!(result.decision, "Correcto");
        assert_eq!(result.criteria.len(), 3);
        assert_eq!(result.criteria["grammaticalCorrectness"], 8.0);
        assert_eq!(result.corrections, None);
        assert_eq!(result.tips, "Try a longer sentence");
    }

    #[test]
    fn rejects_missing_required_fields() {
        let err = parse_reply(r#"{"score": 3, "decision": "partial"}"#).unwrap_err();
        assert!(matches!(err, GraderError::Malformed(_)));

        let err = parse_reply(r#"{"score": "high", "decision": "partial", "feedback": "ok"}"#)
            .unwrap_err();
        assert!(matches!(err, GraderError::Malformed(_)));
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(
            parse_reply("Sorry, I cannot help with that."),
            Err(GraderError::Malformed(_))
        ));
    }
}
