/// Where a unit of work is running.
///
/// Passed down the call chain so code that could start background work knows
/// whether it is already inside some. Anything running on the background
/// worker sets `in_background`, and must not enqueue further background work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    pub in_background: bool,
}

impl ExecutionContext {
    /// Context for a caller-facing request.
    #[must_use]
    pub fn foreground() -> Self {
        Self {
            in_background: false,
        }
    }

    /// Context for work already running on a background task.
    #[must_use]
    pub fn background() -> Self {
        Self {
            in_background: true,
        }
    }
}
