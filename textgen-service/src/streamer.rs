use std::{
    pin::Pin,
    task::{Context, Poll},
};

use axum::body::Bytes;
use futures::{Stream, StreamExt};
use textgen_engine::GenerationHandle;
use tracing::{error, info};

use crate::error::ServiceError;

/// The byte terminating every streamed frame
pub const FRAME_DELIMITER: u8 = b'\0';

/// Encodes a fragment as one frame: the JSON string followed by a NUL byte.
///
/// JSON escapes control characters inside strings, so the delimiter never
/// appears within the encoded fragment.
pub fn encode_frame(fragment: &str) -> Result<Bytes, serde_json::Error> {
    let mut frame = serde_json::to_vec(fragment)?;
    frame.push(FRAME_DELIMITER);
    Ok(Bytes::from(frame))
}

/// Represents the various states of a streaming process
#[derive(Debug, PartialEq, Eq)]
pub enum StreamStatus {
    /// Stream has not started
    NotStarted,
    /// Stream is actively receiving data
    Started,
    /// Stream has completed successfully
    Completed,
    /// Stream failed with an error
    Failed(String),
}

/// A structure streaming the fragments of one generation as NUL-terminated
/// JSON frames.
///
/// The streamer owns the generation handle: when the client goes away the
/// response body, and with it the streamer and the handle, is dropped and the
/// engine stops producing.
pub struct Streamer {
    /// The handle of the in-flight generation
    handle: GenerationHandle,
    /// Current status of the stream
    status: StreamStatus,
    /// The endpoint for the request
    endpoint: String,
    /// The number of frames sent so far
    num_frames: usize,
}

impl Streamer {
    pub fn new(handle: GenerationHandle, endpoint: impl Into<String>) -> Self {
        Self {
            handle,
            status: StreamStatus::NotStarted,
            endpoint: endpoint.into(),
            num_frames: 0,
        }
    }

    pub fn status(&self) -> &StreamStatus {
        &self.status
    }
}

impl Stream for Streamer {
    type Item = Result<Bytes, ServiceError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if matches!(this.status, StreamStatus::Completed | StreamStatus::Failed(_)) {
            return Poll::Ready(None);
        }

        match this.handle.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(fragment))) => {
                this.status = StreamStatus::Started;
                match encode_frame(&fragment) {
                    Ok(frame) => {
                        this.num_frames += 1;
                        Poll::Ready(Some(Ok(frame)))
                    }
                    Err(e) => {
                        this.status = StreamStatus::Failed(e.to_string());
                        Poll::Ready(Some(Err(ServiceError::InternalError {
                            message: format!("Failed to encode fragment: {e}"),
                            endpoint: this.endpoint.clone(),
                        })))
                    }
                }
            }
            Poll::Ready(Some(Err(e))) => {
                error!(
                    target = "textgen-service",
                    event = "stream_failed",
                    endpoint = this.endpoint,
                    request_id = this.handle.request_id(),
                    num_frames = this.num_frames,
                    error = %e,
                    "Generation failed while streaming"
                );
                this.status = StreamStatus::Failed(e.to_string());
                Poll::Ready(Some(Err(ServiceError::ModelError {
                    source: e,
                    endpoint: this.endpoint.clone(),
                })))
            }
            Poll::Ready(None) => {
                this.status = StreamStatus::Completed;
                info!(
                    target = "textgen-service",
                    event = "stream_completed",
                    endpoint = this.endpoint,
                    request_id = this.handle.request_id(),
                    num_frames = this.num_frames,
                );
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        if matches!(self.status, StreamStatus::NotStarted | StreamStatus::Started) {
            info!(
                target = "textgen-service",
                event = "client_disconnected",
                endpoint = self.endpoint,
                request_id = self.handle.request_id(),
                num_frames = self.num_frames,
                "Stream dropped before completion"
            );
        }
    }
}
