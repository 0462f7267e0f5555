use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Why a generation stopped producing tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    /// The engine reached a natural end of sequence
    Stop,
    /// The token budget was exhausted
    Length,
}

/// Events sent by an engine to the handle of one request.
#[derive(Debug)]
pub enum GenerationEvent {
    /// A newly generated piece of text
    Fragment(String),
    /// Generation completed, no further events follow
    Finished {
        prompt_tokens: usize,
        completion_tokens: usize,
        finish_reason: FinishReason,
    },
    /// Generation failed, no further events follow
    Failed(EngineError),
}

/// The result of a completed generation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationOutput {
    /// The full generated text, i.e. all fragments concatenated in order
    pub text: String,
    /// Number of tokens in the prompt
    pub prompt_tokens: usize,
    /// Number of generated tokens
    pub completion_tokens: usize,
    pub finish_reason: FinishReason,
}

/// The handle of one in-flight generation.
///
/// A handle supports two access modes: it is a [`Stream`] of text fragments,
/// in the order the engine produced them, and it can be consumed with
/// [`GenerationHandle::await_completion`] to wait for the full text.
///
/// Dropping the handle closes the underlying channel, which tells the engine
/// to stop producing for this request.
pub struct GenerationHandle {
    /// Engine-assigned identifier of the request
    request_id: u64,
    /// The events produced by the engine for this request
    events: Pin<Box<dyn Stream<Item = GenerationEvent> + Send>>,
    /// Text accumulated from the fragments received so far
    text: String,
    /// Set once the engine reports completion
    output: Option<GenerationOutput>,
    /// Whether the event stream reached a terminal state
    done: bool,
}

impl GenerationHandle {
    /// Creates a handle from any stream of engine events.
    pub fn new(
        request_id: u64,
        events: impl Stream<Item = GenerationEvent> + Send + 'static,
    ) -> Self {
        Self {
            request_id,
            events: Box::pin(events),
            text: String::new(),
            output: None,
            done: false,
        }
    }

    /// Creates a handle reading engine events from a `flume` channel.
    pub fn from_receiver(request_id: u64, receiver: flume::Receiver<GenerationEvent>) -> Self {
        Self::new(request_id, receiver.into_stream())
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// The text received so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether the engine already reported completion.
    pub fn is_finished(&self) -> bool {
        self.output.is_some()
    }

    /// Waits until the engine reports completion and returns the full output.
    ///
    /// Fragments not yet consumed through the [`Stream`] implementation are
    /// drained and accumulated.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the generation failed, or
    /// [`EngineError::Aborted`] if the engine went away without reporting
    /// completion.
    pub async fn await_completion(mut self) -> Result<GenerationOutput, EngineError> {
        while let Some(fragment) = self.next().await {
            fragment?;
        }
        self.output.take().ok_or(EngineError::Aborted {
            request_id: self.request_id,
        })
    }
}

impl Stream for GenerationHandle {
    type Item = Result<String, EngineError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.events.as_mut().poll_next(cx) {
            Poll::Ready(Some(GenerationEvent::Fragment(fragment))) => {
                this.text.push_str(&fragment);
                Poll::Ready(Some(Ok(fragment)))
            }
            Poll::Ready(Some(GenerationEvent::Finished {
                prompt_tokens,
                completion_tokens,
                finish_reason,
            })) => {
                this.done = true;
                this.output = Some(GenerationOutput {
                    text: this.text.clone(),
                    prompt_tokens,
                    completion_tokens,
                    finish_reason,
                });
                Poll::Ready(None)
            }
            Poll::Ready(Some(GenerationEvent::Failed(error))) => {
                this.done = true;
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(Some(Err(EngineError::Aborted {
                    request_id: this.request_id,
                })))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
