//! Interpreting one chunk's model output.
//!
//! Two shapes are accepted: the aggregate object
//! `{fake_percentage, fake_examples, key_patterns, explanation}` and an array
//! of per-review `{id, score}` verdicts, where a score of 70 or more counts
//! the review as inauthentic.

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use revtrust_core::{FakeExample, ReviewRecord};

use crate::aggregate::ChunkResult;
use crate::error::AnalysisError;
use crate::json_recovery::{recover_json, recover_json_with};

pub const FAKE_SCORE_THRESHOLD: f64 = 70.0;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AggregateVerdict {
    fake_percentage: Option<Value>,
    fake_examples: Vec<Value>,
    key_patterns: Vec<Value>,
    explanation: Option<String>,
}

/// Parses the model's answer for `reviews`.
///
/// # Errors
///
/// Returns [`AnalysisError::InvalidResponse`] when neither shape can be
/// recovered from `raw`.
pub fn parse_chunk_response(raw: &str, reviews: &[ReviewRecord]) -> Result<ChunkResult, AnalysisError> {
    if let Some((result, tier)) = recover_json_with(raw, |value| from_value(value, reviews)) {
        tracing::trace!(?tier, "chunk response recovered");
        return Ok(result);
    }
    let recovered = recover_json(raw);

    // Truncated aggregate object: salvage the percentage and any complete
    // example fragments.
    if let Some(pct) = regex_percentage(raw) {
        tracing::debug!(fake_percentage = pct, "salvaged fake_percentage from partial output");
        let fake_examples = match &recovered {
            Some(Value::Array(items)) => items.iter().filter_map(example_from_value).collect(),
            _ => Vec::new(),
        };
        return Ok(ChunkResult {
            review_count: reviews.len(),
            fake_percentage: pct,
            fake_examples,
            key_patterns: Vec::new(),
            explanation: String::new(),
        });
    }

    Err(AnalysisError::InvalidResponse {
        reason: match recovered {
            Some(_) => "JSON has neither fake_percentage nor per-review scores".to_string(),
            None => "no JSON found in response".to_string(),
        },
    })
}

fn from_value(value: &Value, reviews: &[ReviewRecord]) -> Option<ChunkResult> {
    match value {
        Value::Object(map) if map.contains_key("fake_percentage") => {
            let verdict: AggregateVerdict = serde_json::from_value(value.clone()).ok()?;
            let pct = verdict.fake_percentage.as_ref().and_then(number_from_value)?;
            Some(ChunkResult {
                review_count: reviews.len(),
                fake_percentage: pct.clamp(0.0, 100.0),
                fake_examples: verdict
                    .fake_examples
                    .iter()
                    .filter_map(example_from_value)
                    .collect(),
                key_patterns: verdict.key_patterns,
                explanation: verdict.explanation.unwrap_or_default(),
            })
        }
        Value::Object(map) => ["reviews", "scores", "results"]
            .iter()
            .find_map(|field| map.get(*field))
            .and_then(|inner| from_per_review(inner, reviews)),
        Value::Array(_) => from_per_review(value, reviews),
        _ => None,
    }
}

fn from_per_review(value: &Value, reviews: &[ReviewRecord]) -> Option<ChunkResult> {
    let items = value.as_array()?;
    let scored: Vec<(Option<&str>, f64)> = items
        .iter()
        .filter_map(|item| {
            let score = item.get("score").and_then(number_from_value)?;
            Some((item.get("id").and_then(Value::as_str), score.clamp(0.0, 100.0)))
        })
        .collect();
    if scored.is_empty() {
        return None;
    }

    let flagged: Vec<&(Option<&str>, f64)> = scored
        .iter()
        .filter(|(_, score)| *score >= FAKE_SCORE_THRESHOLD)
        .collect();
    #[allow(clippy::cast_precision_loss)]
    let fake_percentage = flagged.len() as f64 * 100.0 / scored.len() as f64;

    let fake_examples = flagged
        .iter()
        .filter_map(|(id, score)| {
            let review = reviews.iter().find(|r| Some(r.id.as_str()) == *id)?;
            Some(FakeExample {
                text: review.body_text().chars().take(200).collect(),
                reason: format!("scored {score:.0}/100 for likely inauthenticity"),
            })
        })
        .collect();

    Some(ChunkResult {
        review_count: reviews.len(),
        fake_percentage,
        fake_examples,
        key_patterns: Vec::new(),
        explanation: format!(
            "{} of {} reviews scored at or above {FAKE_SCORE_THRESHOLD:.0}.",
            flagged.len(),
            scored.len()
        ),
    })
}

fn example_from_value(value: &Value) -> Option<FakeExample> {
    match value {
        Value::Object(map) => {
            let text = map
                .get("text")
                .or_else(|| map.get("review"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let reason = map.get("reason").and_then(Value::as_str).unwrap_or_default();
            (!text.is_empty() || !reason.is_empty()).then(|| FakeExample {
                text: text.to_string(),
                reason: reason.to_string(),
            })
        }
        Value::String(text) if !text.is_empty() => Some(FakeExample {
            text: text.clone(),
            reason: String::new(),
        }),
        _ => None,
    }
}

/// Accepts `42`, `42.5`, `"42"` and `"42%"`.
fn number_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
}

fn regex_percentage(raw: &str) -> Option<f64> {
    let re = Regex::new(r#""fake_percentage"\s*:\s*"?(\d+(?:\.\d+)?)"#)
        .expect("valid fake percentage regex");
    re.captures(raw)?
        .get(1)?
        .as_str()
        .parse::<f64>()
        .ok()
        .map(|pct| pct.clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reviews(n: usize) -> Vec<ReviewRecord> {
        (0..n)
            .map(|i| {
                let mut r = ReviewRecord::new(Some(5), Some(format!("review text {i}")));
                r.id = format!("R{i}");
                r
            })
            .collect()
    }

    #[test]
    fn parses_aggregate_object() {
        let raw = r#"```json
{"fake_percentage": "35%", "fake_examples": [{"text": "Amazing!!!", "reason": "generic"}],
 "key_patterns": ["generic praise"], "explanation": "Generic praise dominates."}
```"#;
        let result = parse_chunk_response(raw, &reviews(10)).unwrap();
        assert_eq!(result.review_count, 10);
        assert!((result.fake_percentage - 35.0).abs() < f64::EPSILON);
        assert_eq!(result.fake_examples.len(), 1);
        assert_eq!(result.key_patterns.len(), 1);
        assert_eq!(result.explanation, "Generic praise dominates.");
    }

    #[test]
    fn bracketed_prose_does_not_shadow_the_verdict() {
        let raw = r#"I reviewed all [4] reviews. {"fake_percentage": 40, "fake_examples": [{"text": "Best ever!!", "reason": "superlatives"}], "key_patterns": ["generic praise"], "explanation": "Generic praise dominates."}"#;
        let result = parse_chunk_response(raw, &reviews(4)).unwrap();
        assert!((result.fake_percentage - 40.0).abs() < f64::EPSILON);
        assert_eq!(result.fake_examples.len(), 1);
        assert_eq!(result.key_patterns.len(), 1);
        assert_eq!(result.explanation, "Generic praise dominates.");
    }

    #[test]
    fn clamps_out_of_range_percentage() {
        let result = parse_chunk_response(r#"{"fake_percentage": 140}"#, &reviews(2)).unwrap();
        assert!((result.fake_percentage - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn per_review_scores_count_at_threshold() {
        let raw = r#"[{"id": "R0", "score": 70}, {"id": "R1", "score": 69.9},
                      {"id": "R2", "score": 95}, {"id": "R3", "score": 5}]"#;
        let result = parse_chunk_response(raw, &reviews(4)).unwrap();
        assert!((result.fake_percentage - 50.0).abs() < f64::EPSILON);
        assert_eq!(result.fake_examples.len(), 2);
        assert_eq!(result.fake_examples[0].text, "review text 0");
    }

    #[test]
    fn per_review_scores_inside_wrapper_object() {
        let raw = r#"{"reviews": [{"id": "R0", "score": 90}, {"id": "R1", "score": 10}]}"#;
        let result = parse_chunk_response(raw, &reviews(2)).unwrap();
        assert!((result.fake_percentage - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn truncated_aggregate_salvages_percentage() {
        let raw = r#"{"fake_percentage": 22.5, "fake_examples": [{"text": "Nice", "reason": "vague"}, {"text": "Gre"#;
        let result = parse_chunk_response(raw, &reviews(5)).unwrap();
        assert!((result.fake_percentage - 22.5).abs() < f64::EPSILON);
        assert_eq!(result.fake_examples.len(), 1);
    }

    #[test]
    fn prose_without_json_is_invalid() {
        let err = parse_chunk_response("I cannot help with that.", &reviews(3)).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidResponse { .. }));
        assert_eq!(err.kind(), "data_shape");
    }

    #[test]
    fn json_without_known_fields_is_invalid() {
        let err = parse_chunk_response(r#"{"verdict": "mostly fine"}"#, &reviews(3)).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidResponse { .. }));
    }
}
