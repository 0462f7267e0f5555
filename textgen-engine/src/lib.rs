pub mod config;
pub mod decoder;
pub mod echo;
pub mod engine;
pub mod error;
pub mod handle;
pub mod stats;

#[cfg(test)]
pub(crate) mod testing;

pub use config::EngineConfig;
pub use echo::EchoEngine;
pub use engine::{GenerationEngine, GenerationRequest, SamplingParams};
pub use error::EngineError;
pub use handle::{FinishReason, GenerationEvent, GenerationHandle, GenerationOutput};
