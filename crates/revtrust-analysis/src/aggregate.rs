//! Folding per-chunk verdicts into one estimate, plus grading helpers.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use revtrust_core::{Confidence, FakeExample, ReviewRecord};

use crate::stats::CorpusStats;

pub const MAX_EXAMPLES: usize = 3;
pub const MAX_PATTERNS: usize = 5;

/// One chunk's verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkResult {
    /// Reviews in the chunk; the weight of this verdict.
    pub review_count: usize,
    pub fake_percentage: f64,
    pub fake_examples: Vec<FakeExample>,
    pub key_patterns: Vec<serde_json::Value>,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub fake_percentage: f64,
    pub std_dev: f64,
    pub confidence: Confidence,
    pub fake_examples: Vec<FakeExample>,
    pub key_patterns: Vec<serde_json::Value>,
    pub explanation: String,
}

/// Review-count-weighted mean with a consistency-derived confidence.
///
/// `chunks` must be non-empty; an empty slice yields a 0% estimate.
#[must_use]
pub fn aggregate_chunks(chunks: &[ChunkResult], stats: &CorpusStats) -> Aggregate {
    let fake_percentage = weighted_mean(chunks);
    let std_dev = population_std_dev(
        &chunks
            .iter()
            .map(|c| c.fake_percentage)
            .collect::<Vec<_>>(),
    );
    let confidence = Confidence::from_std_dev(std_dev);

    let mut seen_examples = HashSet::new();
    let fake_examples: Vec<FakeExample> = chunks
        .iter()
        .flat_map(|c| c.fake_examples.iter())
        .filter(|e| seen_examples.insert(example_key(e)))
        .take(MAX_EXAMPLES)
        .cloned()
        .collect();

    let mut seen_patterns = HashSet::new();
    let key_patterns: Vec<serde_json::Value> = chunks
        .iter()
        .flat_map(|c| c.key_patterns.iter())
        .filter(|p| seen_patterns.insert(p.to_string()))
        .take(MAX_PATTERNS)
        .cloned()
        .collect();

    let explanation = synthesize_explanation(chunks, stats, fake_percentage, confidence);

    Aggregate {
        fake_percentage,
        std_dev,
        confidence,
        fake_examples,
        key_patterns,
        explanation,
    }
}

#[allow(clippy::cast_precision_loss)]
fn weighted_mean(chunks: &[ChunkResult]) -> f64 {
    let total: usize = chunks.iter().map(|c| c.review_count).sum();
    if total == 0 {
        return 0.0;
    }
    let weighted: f64 = chunks
        .iter()
        .map(|c| c.fake_percentage * c.review_count as f64)
        .sum();
    weighted / total as f64
}

#[allow(clippy::cast_precision_loss)]
fn population_std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

/// Examples collapse on their text; text-less examples collapse on the reason.
fn example_key(example: &FakeExample) -> String {
    let text = example.text.trim().to_lowercase();
    if text.is_empty() {
        format!("reason:{}", example.reason.trim().to_lowercase())
    } else {
        text
    }
}

fn consistency_label(confidence: Confidence) -> &'static str {
    match confidence {
        Confidence::High => "consistent",
        Confidence::Medium => "moderately consistent",
        Confidence::Low => "inconsistent",
    }
}

/// Concepts recognized in chunk explanations, each with its trigger words.
const CONCEPTS: &[(&str, &[&str])] = &[
    ("ratings", &["rating", "5-star", "five-star", "star"]),
    ("verification", &["verified", "unverified"]),
    ("incentives", &["vine", "free product", "incentiv", "discount"]),
    ("language", &["generic", "repetitive", "template", "vague", "similar wording", "phrasing"]),
    ("timing", &["same day", "burst", "cluster", "timing", "short period"]),
    ("length", &["short", "brief", "length"]),
];

fn concepts_in(text: &str) -> HashSet<&'static str> {
    let lower = text.to_lowercase();
    CONCEPTS
        .iter()
        .filter(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(name, _)| *name)
        .collect()
}

/// First sentence from any chunk explanation that raises a concept the
/// headline pattern does not already cover.
fn extra_insight(chunks: &[ChunkResult], headline: &str) -> Option<String> {
    let covered = concepts_in(headline);
    chunks
        .iter()
        .flat_map(|c| c.explanation.split_inclusive(['.', '!', '?']))
        .map(str::trim)
        .filter(|s| s.len() > 10)
        .find(|sentence| {
            let found = concepts_in(sentence);
            !found.is_empty() && found.is_disjoint(&covered)
        })
        .map(str::to_string)
}

fn synthesize_explanation(
    chunks: &[ChunkResult],
    stats: &CorpusStats,
    fake_percentage: f64,
    confidence: Confidence,
) -> String {
    let total: usize = chunks.iter().map(|c| c.review_count).sum();
    let chunk_word = if chunks.len() == 1 { "chunk" } else { "chunks" };
    let mut out = format!(
        "Analyzed {total} reviews in {} {chunk_word}. An estimated {fake_percentage:.1}% appear inauthentic, with {} results across chunks.",
        chunks.len(),
        consistency_label(confidence),
    );

    let headline = stats.flags.first().map_or("", String::as_str);
    if headline.is_empty() {
        out.push_str(" No red flags in the overall review pattern.");
    } else {
        out.push_str(" Most significant pattern: ");
        out.push_str(headline);
        out.push('.');
    }

    if let Some(insight) = extra_insight(chunks, headline) {
        out.push(' ');
        out.push_str(&insight);
        if !insight.ends_with(['.', '!', '?']) {
            out.push('.');
        }
    }
    out
}

/// Plain and adjusted average rating of the rated reviews.
///
/// The adjusted figure drops `round(n × fake% / 100)` reviews from the 5★
/// bucket (never more than it holds) before re-averaging. Both values are
/// rounded to two decimals. `(None, None)` when nothing is rated.
#[must_use]
pub fn adjusted_rating(reviews: &[ReviewRecord], fake_percentage: f64) -> (Option<f64>, Option<f64>) {
    let ratings: Vec<u8> = reviews
        .iter()
        .filter_map(|r| r.rating)
        .filter(|r| (1..=5).contains(r))
        .collect();
    if ratings.is_empty() {
        return (None, None);
    }

    let sum: u32 = ratings.iter().map(|r| u32::from(*r)).sum();
    let count = ratings.len();
    let five_stars = ratings.iter().filter(|r| **r == 5).count();

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let remove = ((count as f64 * fake_percentage.clamp(0.0, 100.0) / 100.0).round() as usize)
        .min(five_stars);

    #[allow(clippy::cast_precision_loss)]
    let marketplace = round2(f64::from(sum) / count as f64);
    let remaining = count - remove;
    let adjusted = (remaining > 0).then(|| {
        #[allow(clippy::cast_possible_truncation)]
        let adjusted_sum = sum - 5 * remove as u32;
        #[allow(clippy::cast_precision_loss)]
        let avg = f64::from(adjusted_sum) / remaining as f64;
        round2(avg)
    });
    (Some(marketplace), adjusted)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(count: usize, pct: f64) -> ChunkResult {
        ChunkResult {
            review_count: count,
            fake_percentage: pct,
            fake_examples: Vec::new(),
            key_patterns: Vec::new(),
            explanation: String::new(),
        }
    }

    fn example(text: &str, reason: &str) -> FakeExample {
        FakeExample {
            text: text.to_string(),
            reason: reason.to_string(),
        }
    }

    fn no_flags() -> CorpusStats {
        CorpusStats::compute(&[])
    }

    #[test]
    fn equal_weights_average_exactly() {
        let agg = aggregate_chunks(&[chunk(10, 0.0), chunk(10, 100.0)], &no_flags());
        assert!((agg.fake_percentage - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn weights_follow_review_counts() {
        let agg = aggregate_chunks(&[chunk(25, 20.0), chunk(5, 80.0)], &no_flags());
        assert!((agg.fake_percentage - 30.0).abs() < 1e-9);
    }

    #[test]
    fn identical_chunks_are_high_confidence() {
        let agg = aggregate_chunks(
            &[chunk(10, 50.0), chunk(10, 50.0), chunk(10, 50.0)],
            &no_flags(),
        );
        assert!(agg.std_dev.abs() < f64::EPSILON);
        assert_eq!(agg.confidence, Confidence::High);
    }

    #[test]
    fn spread_chunks_are_low_confidence() {
        let agg = aggregate_chunks(
            &[chunk(10, 10.0), chunk(10, 50.0), chunk(10, 90.0)],
            &no_flags(),
        );
        assert!((agg.std_dev - 32.659_863).abs() < 1e-4);
        assert_eq!(agg.confidence, Confidence::Low);
    }

    #[test]
    fn moderate_spread_is_medium_confidence() {
        let agg = aggregate_chunks(&[chunk(10, 20.0), chunk(10, 50.0)], &no_flags());
        assert_eq!(agg.confidence, Confidence::Medium);
    }

    #[test]
    fn examples_and_patterns_are_deduped_and_capped() {
        let mut a = chunk(10, 30.0);
        a.fake_examples = vec![
            example("Best product ever!!!", "generic praise"),
            example("Five stars", "too short"),
        ];
        a.key_patterns = vec![json!("generic praise"), json!({"type": "burst"})];
        let mut b = chunk(10, 40.0);
        b.fake_examples = vec![
            example("best product ever!!!", "duplicate"),
            example("Arrived fast, works", "timing"),
            example("Love it", "short"),
        ];
        b.key_patterns = vec![
            json!("generic praise"),
            json!({"type": "burst"}),
            json!("a"),
            json!("b"),
            json!("c"),
            json!("d"),
        ];

        let agg = aggregate_chunks(&[a, b], &no_flags());
        assert_eq!(agg.fake_examples.len(), MAX_EXAMPLES);
        assert_eq!(agg.fake_examples[0].text, "Best product ever!!!");
        assert_eq!(agg.fake_examples[2].text, "Arrived fast, works");
        assert_eq!(agg.key_patterns.len(), MAX_PATTERNS);
        assert_eq!(agg.key_patterns[1], json!({"type": "burst"}));
        assert_eq!(agg.key_patterns[2], json!("a"));
    }

    #[test]
    fn explanation_names_totals_and_headline_pattern() {
        let reviews: Vec<ReviewRecord> = (0..10)
            .map(|_| ReviewRecord::new(Some(5), Some("Great!".to_string())))
            .collect();
        let stats = CorpusStats::compute(&reviews);
        let mut c = chunk(10, 70.0);
        c.explanation = "Most reviews are 5-star. Several reviewers use near-identical generic phrasing. Unverified accounts dominate.".to_string();

        let agg = aggregate_chunks(&[c], &stats);
        assert!(agg.explanation.starts_with("Analyzed 10 reviews in 1 chunk."));
        assert!(agg.explanation.contains("70.0%"));
        assert!(agg.explanation.contains("consistent results"));
        assert!(agg.explanation.contains("Most significant pattern: 100% of ratings are 5-star"));
        // The 5-star sentence repeats the headline; the phrasing one does not.
        assert!(agg.explanation.ends_with("Several reviewers use near-identical generic phrasing."));
    }

    #[test]
    fn explanation_without_flags_says_so() {
        let agg = aggregate_chunks(&[chunk(4, 0.0)], &no_flags());
        assert!(agg.explanation.contains("No red flags"));
    }

    #[test]
    fn adjusted_rating_removes_five_stars() {
        let mut reviews: Vec<ReviewRecord> = (0..8)
            .map(|_| ReviewRecord::new(Some(5), Some("x".into())))
            .collect();
        reviews.push(ReviewRecord::new(Some(1), Some("x".into())));
        reviews.push(ReviewRecord::new(Some(2), Some("x".into())));

        let (marketplace, adjusted) = adjusted_rating(&reviews, 50.0);
        assert_eq!(marketplace, Some(4.3));
        // 5 of the 8 five-star reviews go: (15 + 3) / 5
        assert_eq!(adjusted, Some(3.6));
    }

    #[test]
    fn adjusted_rating_caps_removal_at_five_star_bucket() {
        let reviews = vec![
            ReviewRecord::new(Some(5), Some("x".into())),
            ReviewRecord::new(Some(3), Some("x".into())),
            ReviewRecord::new(Some(3), Some("x".into())),
        ];
        let (_, adjusted) = adjusted_rating(&reviews, 100.0);
        assert_eq!(adjusted, Some(3.0));
        assert_eq!(adjusted_rating(&[], 10.0), (None, None));
    }
}
