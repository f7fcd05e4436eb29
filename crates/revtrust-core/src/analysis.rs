//! Analysis lifecycle status, letter grades and confidence labels.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle of a `ProductAnalysisState`.
///
/// Forward-only along `Pending → Fetched → PendingAnalysis → Processing →
/// Analyzed → Completed`. `Failed` is reachable from every state before
/// `Completed` and may be retried. `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Pending,
    Fetched,
    PendingAnalysis,
    Processing,
    Analyzed,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub const ALL: [AnalysisStatus; 7] = [
        AnalysisStatus::Pending,
        AnalysisStatus::Fetched,
        AnalysisStatus::PendingAnalysis,
        AnalysisStatus::Processing,
        AnalysisStatus::Analyzed,
        AnalysisStatus::Completed,
        AnalysisStatus::Failed,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Fetched => "fetched",
            AnalysisStatus::PendingAnalysis => "pending_analysis",
            AnalysisStatus::Processing => "processing",
            AnalysisStatus::Analyzed => "analyzed",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
        }
    }

    fn rank(self) -> Option<u8> {
        match self {
            AnalysisStatus::Pending => Some(0),
            AnalysisStatus::Fetched => Some(1),
            AnalysisStatus::PendingAnalysis => Some(2),
            AnalysisStatus::Processing => Some(3),
            AnalysisStatus::Analyzed => Some(4),
            AnalysisStatus::Completed => Some(5),
            AnalysisStatus::Failed => None,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == AnalysisStatus::Completed
    }

    /// Statuses a runner may take into `processing`. Excludes `processing`
    /// itself so a record is claimed by exactly one runner.
    pub const CLAIMABLE: [AnalysisStatus; 2] =
        [AnalysisStatus::Fetched, AnalysisStatus::PendingAnalysis];

    #[must_use]
    pub fn is_claimable(self) -> bool {
        Self::CLAIMABLE.contains(&self)
    }

    /// Whether a write moving a record from `self` to `next` is allowed.
    #[must_use]
    pub fn can_transition_to(self, next: AnalysisStatus) -> bool {
        match (self, next) {
            (AnalysisStatus::Completed, _) => false,
            (_, AnalysisStatus::Failed) => true,
            (AnalysisStatus::Failed, target) => target != AnalysisStatus::Completed,
            (current, target) => match (current.rank(), target.rank()) {
                (Some(from), Some(to)) => to >= from,
                _ => false,
            },
        }
    }

    /// Every status a record may be in for a write to `next` to succeed.
    #[must_use]
    pub fn allowed_sources(next: AnalysisStatus) -> Vec<AnalysisStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }

    /// Collapses internal states into what the presentation layer shows.
    #[must_use]
    pub fn public(self) -> PublicStatus {
        match self {
            AnalysisStatus::Completed => PublicStatus::Completed,
            AnalysisStatus::Failed => PublicStatus::Failed,
            _ => PublicStatus::Processing,
        }
    }
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown analysis status '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublicStatus {
    Processing,
    Completed,
    Failed,
}

/// Letter grade for review trustworthiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
    /// Reserved for products without any scorable review.
    U,
}

impl Grade {
    /// Maps a fake percentage onto a grade: ≤8 A, ≤20 B, ≤40 C, ≤65 D, else F.
    #[must_use]
    pub fn from_fake_percentage(fake_percentage: f64) -> Grade {
        if fake_percentage <= 8.0 {
            Grade::A
        } else if fake_percentage <= 20.0 {
            Grade::B
        } else if fake_percentage <= 40.0 {
            Grade::C
        } else if fake_percentage <= 65.0 {
            Grade::D
        } else {
            Grade::F
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
            Grade::U => "U",
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Grade {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(Grade::A),
            "B" => Ok(Grade::B),
            "C" => Ok(Grade::C),
            "D" => Ok(Grade::D),
            "F" => Ok(Grade::F),
            "U" => Ok(Grade::U),
            other => Err(format!("unknown grade '{other}'")),
        }
    }
}

/// How consistent the per-chunk estimates were.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// `< 10` → high, `< 20` → medium, otherwise low.
    #[must_use]
    pub fn from_std_dev(std_dev: f64) -> Confidence {
        if std_dev < 10.0 {
            Confidence::High
        } else if std_dev < 20.0 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Confidence::High),
            "medium" => Ok(Confidence::Medium),
            "low" => Ok(Confidence::Low),
            other => Err(format!("unknown confidence '{other}'")),
        }
    }
}

/// One review the model singled out as likely inauthentic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FakeExample {
    pub text: String,
    pub reason: String,
}

/// Final, persisted outcome of one product analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    /// `None` only for [`Grade::U`].
    pub fake_percentage: Option<f64>,
    pub grade: Grade,
    pub confidence: Option<Confidence>,
    pub explanation: String,
    /// Plain average of the scorable reviews' star ratings.
    pub marketplace_rating: Option<f64>,
    pub adjusted_rating: Option<f64>,
    pub fake_examples: Vec<FakeExample>,
    pub key_patterns: Vec<serde_json::Value>,
}

impl AnalysisSummary {
    /// Summary for a product with no scorable reviews.
    #[must_use]
    pub fn unanalyzable(explanation: impl Into<String>) -> Self {
        Self {
            fake_percentage: None,
            grade: Grade::U,
            confidence: None,
            explanation: explanation.into(),
            marketplace_rating: None,
            adjusted_rating: None,
            fake_examples: Vec::new(),
            key_patterns: Vec::new(),
        }
    }
}
