/// Where the session loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    WaitingForInput,
    DispatchingCommand,
    ProcessingContent,
    Terminated,
}

/// How one content turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Backend returned success
    Completed,
    /// Backend reported failure itself
    Failed,
    /// Backend raised an error or panicked
    Faulted(String),
    /// User cancelled before the backend finished
    Cancelled,
}

impl TurnOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TurnOutcome::Completed)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionStats {
    pub turns: u64,
    pub completed: u64,
    pub failed: u64,
    pub faulted: u64,
    pub cancelled: u64,
}

impl SessionStats {
    pub fn record(&mut self, outcome: &TurnOutcome) {
        self.turns += 1;
        match outcome {
            TurnOutcome::Completed => self.completed += 1,
            TurnOutcome::Failed => self.failed += 1,
            TurnOutcome::Faulted(_) => self.faulted += 1,
            TurnOutcome::Cancelled => self.cancelled += 1,
        }
    }
}
