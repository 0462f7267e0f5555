use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::{error::EngineError, handle::GenerationHandle};

/// Extra sampling parameters of a request, forwarded verbatim to the engine.
pub type SamplingParams = Map<String, Value>;

/// The sampling parameter key holding the requested beam width.
pub const BEAM_WIDTH_KEY: &str = "beam_width";

/// A single generation request, built from one HTTP call.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationRequest {
    /// The prompt to generate a continuation for
    pub prompt: String,
    /// Maximum number of tokens to generate
    pub max_new_tokens: u32,
    /// Whether the caller intends to consume fragments incrementally
    pub streaming: bool,
    /// Additional sampling parameters (temperature, top_p, beam_width, ...)
    pub sampling_params: SamplingParams,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, max_new_tokens: u32) -> Self {
        Self {
            prompt: prompt.into(),
            max_new_tokens,
            streaming: false,
            sampling_params: SamplingParams::new(),
        }
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_sampling_params(mut self, sampling_params: SamplingParams) -> Self {
        self.sampling_params = sampling_params;
        self
    }
}

/// A text generation backend.
///
/// Implementations are shared by every in-flight request and must accept
/// concurrent calls to [`GenerationEngine::generate_async`].
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    /// Starts generating for `request` and returns its handle right away.
    ///
    /// Content is produced in the background; awaiting or iterating the
    /// returned [`GenerationHandle`] is the only suspension point.
    fn generate_async(&self, request: GenerationRequest)
        -> Result<GenerationHandle, EngineError>;

    /// Returns the engine statistics as a serialized JSON document.
    async fn stats(&self) -> Result<String, EngineError>;

    /// The maximum beam width this engine instance was created with.
    fn max_beam_width(&self) -> usize;
}
