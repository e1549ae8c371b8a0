use serde::Serialize;
use uuid::Uuid;

/// Where the current (or last) generation request is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPhase {
    #[default]
    Idle,
    Augmenting,
    AwaitingSessionReady,
    Prefilling,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl GenerationPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GenerationPhase::Completed | GenerationPhase::Cancelled | GenerationPhase::Failed
        )
    }
}

/// Flags the UI renders for one model's chat
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChatStatus {
    pub phase: GenerationPhase,
    pub in_progress: bool,
    /// True until the first token arrives
    pub preparing: bool,
    pub resetting: bool,
    /// Agent message currently receiving tokens
    pub streaming: Option<Uuid>,
}
