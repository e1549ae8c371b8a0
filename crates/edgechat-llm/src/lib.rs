mod client;
mod initializer;
mod session;

pub use client::{OllamaClient, OllamaModel};
pub use initializer::OllamaInitializer;
pub use session::OllamaSession;
