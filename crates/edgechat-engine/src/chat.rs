use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use edgechat_core::{ChatMessage, ConversationState};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::status::{ChatStatus, GenerationPhase};

/// Per-model conversation, status and generation bookkeeping.
///
/// Every conversation write goes through `update`, which runs under the
/// watch channel's lock and wakes subscribers only when something changed.
pub(crate) struct ModelChat {
    conversation: watch::Sender<ConversationState>,
    status: watch::Sender<ChatStatus>,
    /// Held for the whole of a generation so the session has one user
    pub generation: tokio::sync::Mutex<()>,
    /// Parent of every request admitted since the last stop
    epoch: Mutex<CancellationToken>,
    recovery_attempts: Mutex<HashMap<Uuid, u32>>,
}

impl ModelChat {
    pub fn new() -> Self {
        let (conversation, _) = watch::channel(ConversationState::new());
        let (status, _) = watch::channel(ChatStatus::default());
        Self {
            conversation,
            status,
            generation: tokio::sync::Mutex::new(()),
            epoch: Mutex::new(CancellationToken::new()),
            recovery_attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut ConversationState) -> bool) -> bool {
        self.conversation.send_if_modified(f)
    }

    pub fn append(&self, message: impl Into<ChatMessage>) {
        let message = message.into();
        self.update(|c| {
            c.append(message);
            true
        });
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.conversation.borrow().messages().to_vec()
    }

    pub fn subscribe_messages(&self) -> watch::Receiver<ConversationState> {
        self.conversation.subscribe()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ChatStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> ChatStatus {
        self.status.borrow().clone()
    }

    pub fn set_status(&self, f: impl FnOnce(&mut ChatStatus)) {
        self.status.send_if_modified(|s| {
            let before = s.clone();
            f(s);
            *s != before
        });
    }

    pub fn set_phase(&self, phase: GenerationPhase) {
        self.set_status(|s| s.phase = phase);
    }

    /// Settle the flags for a generation that is over. A failed generation
    /// keeps `streaming` pointing at its partial reply for recovery.
    pub fn finish(&self, phase: GenerationPhase) {
        self.set_status(|s| {
            s.phase = phase;
            s.in_progress = false;
            s.preparing = false;
            if phase != GenerationPhase::Failed {
                s.streaming = None;
            }
        });
    }

    /// Token for a request entering now, running or still queued on the
    /// generation lock. The next `cancel_active` cancels it.
    pub fn admit(&self) -> CancellationToken {
        match self.epoch.lock() {
            Ok(epoch) => epoch.child_token(),
            Err(_) => {
                warn!("Epoch token poisoned");
                CancellationToken::new()
            }
        }
    }

    /// Cancel every admitted request and start a new epoch
    pub fn cancel_active(&self) {
        match self.epoch.lock() {
            Ok(mut epoch) => {
                epoch.cancel();
                *epoch = CancellationToken::new();
            }
            Err(_) => warn!("Epoch token poisoned"),
        }
    }

    /// Count one more recovery of `message` and return the new total
    pub fn note_recovery(&self, message: Uuid) -> u32 {
        let Ok(mut attempts) = self.recovery_attempts.lock() else {
            return u32::MAX;
        };
        let count = attempts.entry(message).or_insert(0);
        *count += 1;
        *count
    }

    pub fn clear_recovery(&self, message: Uuid) {
        if let Ok(mut attempts) = self.recovery_attempts.lock() {
            attempts.remove(&message);
        }
    }
}

/// Raises `resetting` for as long as it lives
pub(crate) struct ResettingGuard {
    chat: Arc<ModelChat>,
}

impl ResettingGuard {
    pub fn new(chat: Arc<ModelChat>) -> Self {
        chat.set_status(|s| s.resetting = true);
        Self { chat }
    }
}

impl Drop for ResettingGuard {
    fn drop(&mut self) {
        self.chat.set_status(|s| s.resetting = false);
    }
}
