use std::fmt;

use chrono::Duration;
use serde::Serialize;

/// Alert severity, `P0` being the most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    P0,
    P1,
    P2,
    P3,
}

/// `(severity, minimum failures, window minutes)`, tightest first.
pub(crate) const RATE_THRESHOLDS: [(Severity, usize, i64); 4] = [
    (Severity::P0, 10, 5),
    (Severity::P1, 5, 10),
    (Severity::P2, 3, 15),
    (Severity::P3, 1, 60),
];

impl Severity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::P0 => "P0",
            Severity::P1 => "P1",
            Severity::P2 => "P2",
            Severity::P3 => "P3",
        }
    }

    /// Lowers severity by `steps`, never below `P3`.
    #[must_use]
    pub fn downgrade(self, steps: u8) -> Severity {
        let level = (self.level() + steps).min(3);
        match level {
            0 => Severity::P0,
            1 => Severity::P1,
            2 => Severity::P2,
            _ => Severity::P3,
        }
    }

    /// Minimum gap between two identical alerts at this severity.
    #[must_use]
    pub fn throttle_window(self) -> Duration {
        match self {
            Severity::P0 => Duration::minutes(5),
            Severity::P1 => Duration::minutes(15),
            Severity::P2 => Duration::minutes(60),
            Severity::P3 => Duration::minutes(240),
        }
    }

    fn level(self) -> u8 {
        match self {
            Severity::P0 => 0,
            Severity::P1 => 1,
            Severity::P2 => 2,
            Severity::P3 => 3,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
