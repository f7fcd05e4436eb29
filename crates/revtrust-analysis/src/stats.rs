//! Corpus-wide descriptive statistics computed once before chunking.

use serde::Serialize;

use revtrust_core::ReviewRecord;

const FIVE_STAR_FLAG_PCT: f64 = 85.0;
const VERIFIED_FLAG_PCT: f64 = 30.0;
const SHORT_TEXT_FLAG_CHARS: f64 = 50.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorpusStats {
    pub total: usize,
    /// Count per star, index 0 = 1★.
    pub rating_distribution: [usize; 5],
    pub five_star_pct: f64,
    pub verified_pct: f64,
    pub incentivized_pct: f64,
    pub avg_text_length: f64,
    /// Suspicion patterns, most significant first.
    pub flags: Vec<String>,
}

impl CorpusStats {
    /// Single pass over `reviews`; no I/O.
    #[must_use]
    pub fn compute(reviews: &[ReviewRecord]) -> Self {
        let mut rating_distribution = [0usize; 5];
        let mut rated = 0usize;
        let mut verified = 0usize;
        let mut incentivized = 0usize;
        let mut text_chars = 0usize;

        for review in reviews {
            if let Some(rating) = review.rating.filter(|r| (1..=5).contains(r)) {
                rating_distribution[usize::from(rating - 1)] += 1;
                rated += 1;
            }
            if review.verified_purchase {
                verified += 1;
            }
            if review.incentivized {
                incentivized += 1;
            }
            text_chars += review.body_text().chars().count();
        }

        let total = reviews.len();
        let five_star_pct = percent(rating_distribution[4], rated);
        let verified_pct = percent(verified, total);
        let incentivized_pct = percent(incentivized, total);
        #[allow(clippy::cast_precision_loss)]
        let avg_text_length = if total == 0 {
            0.0
        } else {
            text_chars as f64 / total as f64
        };

        let mut flags = Vec::new();
        if total > 0 {
            if five_star_pct > FIVE_STAR_FLAG_PCT {
                flags.push(format!(
                    "{five_star_pct:.0}% of ratings are 5-star, an unusually lopsided distribution"
                ));
            }
            if verified_pct < VERIFIED_FLAG_PCT {
                flags.push(format!(
                    "only {verified_pct:.0}% of reviews are from verified purchases"
                ));
            }
            if avg_text_length < SHORT_TEXT_FLAG_CHARS {
                flags.push(format!(
                    "reviews average {avg_text_length:.0} characters, suggesting low-effort text"
                ));
            }
        }

        Self {
            total,
            rating_distribution,
            five_star_pct,
            verified_pct,
            incentivized_pct,
            avg_text_length,
            flags,
        }
    }

    /// Multi-line block embedded in every chunk prompt.
    #[must_use]
    pub fn describe(&self) -> String {
        let [one, two, three, four, five] = self.rating_distribution;
        let mut out = format!(
            "Total reviews: {}\nRating distribution: 5★ {five}, 4★ {four}, 3★ {three}, 2★ {two}, 1★ {one}\n\
             5-star share: {:.1}%\nVerified purchases: {:.1}%\nIncentivized program reviews: {:.1}%\n\
             Average review length: {:.0} characters",
            self.total,
            self.five_star_pct,
            self.verified_pct,
            self.incentivized_pct,
            self.avg_text_length,
        );
        if self.flags.is_empty() {
            out.push_str("\nSuspicious patterns: none detected");
        } else {
            out.push_str("\nSuspicious patterns:");
            for flag in &self.flags {
                out.push_str("\n- ");
                out.push_str(flag);
            }
        }
        out
    }
}

#[allow(clippy::cast_precision_loss)]
fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review(rating: u8, verified: bool, body: &str) -> ReviewRecord {
        let mut r = ReviewRecord::new(Some(rating), Some(body.to_string()));
        r.verified_purchase = verified;
        r
    }

    #[test]
    fn computes_distribution_and_shares() {
        let reviews = vec![
            review(5, true, "a".repeat(100).as_str()),
            review(5, true, "b".repeat(100).as_str()),
            review(4, false, "c".repeat(100).as_str()),
            review(1, true, "d".repeat(100).as_str()),
        ];
        let stats = CorpusStats::compute(&reviews);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.rating_distribution, [1, 0, 0, 1, 2]);
        assert!((stats.five_star_pct - 50.0).abs() < 1e-9);
        assert!((stats.verified_pct - 75.0).abs() < 1e-9);
        assert!((stats.avg_text_length - 100.0).abs() < 1e-9);
        assert!(stats.flags.is_empty());
    }

    #[test]
    fn flags_lopsided_unverified_short_corpus() {
        let reviews: Vec<ReviewRecord> = (0..10).map(|_| review(5, false, "Great!")).collect();
        let stats = CorpusStats::compute(&reviews);
        assert_eq!(stats.flags.len(), 3);
        assert!(stats.flags[0].contains("5-star"));
        assert!(stats.describe().contains("Suspicious patterns:\n- 100% of ratings"));
    }

    #[test]
    fn empty_corpus_has_no_flags() {
        let stats = CorpusStats::compute(&[]);
        assert_eq!(stats.total, 0);
        assert!(stats.flags.is_empty());
    }
}
