use std::{io, path::PathBuf};

use thiserror::Error;

/// Errors raised by a generation engine, either while loading it or while
/// serving a single generation request.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine configuration is missing or malformed
    #[error("Invalid engine configuration: {0}")]
    Config(String),

    /// A file required by the engine could not be read
    #[error("Failed to read `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The tokenizer could not be loaded, or failed to encode the prompt
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// The encoded prompt exceeds the engine's input budget
    #[error("Prompt has {num_tokens} tokens, but the engine accepts at most {max_input_len}")]
    PromptTooLong {
        num_tokens: usize,
        max_input_len: usize,
    },

    /// The requested beam width is not supported by this engine instance
    #[error("Invalid beam width `{requested}`, the engine supports at most {max_beam_width}")]
    InvalidBeamWidth {
        requested: String,
        max_beam_width: usize,
    },

    /// Token ids could not be turned back into text
    #[error("Failed to decode generated tokens: {0}")]
    Decode(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The generation stopped before the engine reported completion
    #[error("Generation for request {request_id} was aborted before completion")]
    Aborted { request_id: u64 },
}
