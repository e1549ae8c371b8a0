mod chat;
mod controller;
mod recovery;
mod status;

#[cfg(test)]
mod testing;

pub use controller::{GenerationOutcome, GenerationReport, StreamingInferenceController};
pub use status::{ChatStatus, GenerationPhase};
