use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Request and token counters of an engine, updated concurrently by every
/// generation task.
#[derive(Debug, Default)]
pub struct EngineStats {
    active_requests: AtomicU64,
    completed_requests: AtomicU64,
    cancelled_requests: AtomicU64,
    failed_requests: AtomicU64,
    prompt_tokens: AtomicU64,
    generated_tokens: AtomicU64,
}

/// A point-in-time copy of [`EngineStats`], as served by the stats endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EngineStatsSnapshot {
    pub model_name: String,
    pub max_beam_width: usize,
    pub active_requests: u64,
    pub completed_requests: u64,
    pub cancelled_requests: u64,
    pub failed_requests: u64,
    pub prompt_tokens: u64,
    pub generated_tokens: u64,
    /// RFC 3339 time at which the snapshot was taken
    pub timestamp: String,
}

impl EngineStats {
    pub fn request_started(&self, prompt_tokens: usize) {
        self.active_requests.fetch_add(1, Ordering::Relaxed);
        self.prompt_tokens
            .fetch_add(prompt_tokens as u64, Ordering::Relaxed);
    }

    pub fn token_generated(&self) {
        self.generated_tokens.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_completed(&self) {
        self.active_requests.fetch_sub(1, Ordering::Relaxed);
        self.completed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_cancelled(&self) {
        self.active_requests.fetch_sub(1, Ordering::Relaxed);
        self.cancelled_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a request that failed after it was started.
    pub fn request_failed(&self) {
        self.active_requests.fetch_sub(1, Ordering::Relaxed);
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a request rejected before generation started.
    pub fn request_rejected(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, model_name: &str, max_beam_width: usize) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            model_name: model_name.to_string(),
            max_beam_width,
            active_requests: self.active_requests.load(Ordering::Relaxed),
            completed_requests: self.completed_requests.load(Ordering::Relaxed),
            cancelled_requests: self.cancelled_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            generated_tokens: self.generated_tokens.load(Ordering::Relaxed),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
