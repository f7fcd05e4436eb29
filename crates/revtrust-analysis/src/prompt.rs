//! Prompt text for chunk scoring.

use std::fmt::Write as _;

use revtrust_core::ReviewRecord;

use crate::chunking::ChunkContext;

const MAX_REVIEW_CHARS: usize = 1_200;

pub const SYSTEM_PROMPT: &str = "You are an expert at detecting inauthentic e-commerce reviews. \
You judge each batch of reviews against statistics describing the product's entire review corpus, \
so a pattern that looks harmless in one batch can still be suspicious globally. \
Signals include generic or templated praise, lopsided rating distributions, unverified purchases, \
incentivized reviews, reviews that do not describe the product, and bursts of similar wording. \
Respond with JSON only, no prose, in this shape: \
{\"fake_percentage\": <0-100 number, share of THIS batch likely inauthentic>, \
\"fake_examples\": [{\"text\": \"<short quote>\", \"reason\": \"<why>\"}], \
\"key_patterns\": [\"<pattern>\"], \
\"explanation\": \"<two or three sentences>\"}";

/// Truncates `s` to at most `max_bytes` bytes at a character boundary.
fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    &s[..end]
}

/// User prompt for one chunk: corpus statistics, chunk position, then the reviews.
#[must_use]
pub fn chunk_prompt(reviews: &[ReviewRecord], ctx: &ChunkContext) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "CORPUS STATISTICS (all reviews of this product)");
    let _ = writeln!(out, "{}", ctx.stats.describe());
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "BATCH {} OF {} ({} reviews)",
        ctx.index + 1,
        ctx.total_chunks,
        reviews.len()
    );

    for (i, review) in reviews.iter().enumerate() {
        let rating = review
            .rating
            .map_or_else(|| "?".to_string(), |r| r.to_string());
        let mut tags = Vec::new();
        if review.verified_purchase {
            tags.push("verified");
        }
        if review.incentivized {
            tags.push("incentivized");
        }
        let _ = writeln!(out);
        let _ = write!(out, "[{}] id={} rating={rating}/5", i + 1, review.id);
        if !tags.is_empty() {
            let _ = write!(out, " ({})", tags.join(", "));
        }
        if let Some(date) = review.posted_date {
            let _ = write!(out, " date={date}");
        }
        let _ = writeln!(out);
        if let Some(title) = review.title.as_deref().filter(|t| !t.is_empty()) {
            let _ = writeln!(out, "Title: {title}");
        }
        let _ = writeln!(
            out,
            "Text: {}",
            truncate_to_char_boundary(review.body_text(), MAX_REVIEW_CHARS)
        );
    }
    out
}
