//! Node lifecycle state.

/// Node operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Node is constructed but background tasks are not running.
    Starting,
    /// Scheduler and sweepers are running; conversions are served.
    Running,
    /// Stop was requested; background tasks are winding down.
    ShuttingDown,
    /// Node is stopped.
    Stopped,
}

impl NodeState {
    /// Check if the node is serving conversions.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, NodeState::Running)
    }

    /// Check if the node is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeState::Stopped)
    }
}
