//! Poll loop state machine.

/// State of the execution loop for one key on the active agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollState {
    /// Registered but not yet scheduled.
    Idle,
    /// Waiting for the next run.
    Scheduled,
    /// The poller is executing.
    Running,
    /// A run asked for another one after a delay.
    Rescheduled,
    /// The last run produced a final result.
    Completed,
    /// The poller reported an error.
    Failed,
}

impl PollState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: PollState) -> bool {
        use PollState::*;

        matches!(
            (self, target),
            (Idle, Scheduled)
                | (Scheduled, Running)
                | (Running, Rescheduled)
                | (Running, Completed)
                | (Running, Failed)
                | (Rescheduled, Scheduled)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Move to `target`, refusing transitions the loop never makes.
    pub fn advance(&mut self, target: PollState) -> Result<(), String> {
        if !self.can_transition_to(target) {
            return Err(format!("Cannot transition from {} to {}", self, target));
        }
        *self = target;
        Ok(())
    }
}

impl std::fmt::Display for PollState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Rescheduled => "rescheduled",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}
