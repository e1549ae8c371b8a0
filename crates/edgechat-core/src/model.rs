use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::InferenceSession;

pub const CONFIG_ACCELERATOR: &str = "accelerator";

type SessionSlot = Option<Arc<dyn InferenceSession>>;

/// A catalog entry whose session is attached once initialization finishes
pub struct Model {
    pub name: String,
    pub config: HashMap<String, String>,
    session: watch::Sender<SessionSlot>,
}

impl Model {
    pub fn new(name: impl Into<String>) -> Self {
        let (session, _) = watch::channel(None);
        Self {
            name: name.into(),
            config: HashMap::new(),
            session,
        }
    }

    pub fn with_config(mut self, key: &str, value: impl Into<String>) -> Self {
        self.config.insert(key.to_string(), value.into());
        self
    }

    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }

    pub fn accelerator(&self) -> &str {
        self.config_value(CONFIG_ACCELERATOR).unwrap_or("")
    }

    pub fn session(&self) -> Option<Arc<dyn InferenceSession>> {
        self.session.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.session.borrow().is_some()
    }

    pub fn attach_session(&self, session: Arc<dyn InferenceSession>) {
        info!(model = %self.name, "Session attached");
        self.session.send_replace(Some(session));
    }

    pub fn detach_session(&self) -> Option<Arc<dyn InferenceSession>> {
        let previous = self.session.send_replace(None);
        if previous.is_some() {
            info!(model = %self.name, "Session detached");
        }
        previous
    }

    /// Resolves once a session is attached
    pub async fn wait_ready(&self) -> Arc<dyn InferenceSession> {
        let mut rx = self.session.subscribe();
        let ready = rx
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|slot| slot.clone());

        match ready {
            Some(session) => session,
            // The sender lives in `self`, so the channel cannot close here
            None => std::future::pending().await,
        }
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("ready", &self.is_ready())
            .finish()
    }
}
