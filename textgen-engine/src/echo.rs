use std::{
    collections::HashSet,
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use flume::Sender;
use tokenizers::Tokenizer;
use tracing::{debug, error, info, info_span, instrument, Instrument};

use crate::{
    config::{resolve_file, EngineConfig, TOKENIZER_FILE},
    decoder::IncrementalDecoder,
    engine::{GenerationEngine, GenerationRequest, SamplingParams, BEAM_WIDTH_KEY},
    error::EngineError,
    handle::{FinishReason, GenerationEvent, GenerationHandle},
    stats::EngineStats,
};

/// A generation engine that replays the prompt as its output.
///
/// The prompt is tokenized with the engine's tokenizer and its non-special
/// tokens are emitted back one at a time, up to the request's
/// `max_new_tokens`. It exercises the full engine contract (background
/// production, bounded per-request channels, incremental detokenization,
/// cancellation and statistics) without running a model.
pub struct EchoEngine {
    config: EngineConfig,
    tokenizer: Arc<Tokenizer>,
    /// Ids of the tokenizer's special added tokens, never echoed
    special_token_ids: HashSet<u32>,
    max_beam_width: usize,
    stats: Arc<EngineStats>,
    next_request_id: AtomicU64,
}

impl EchoEngine {
    /// Loads an engine from an engine directory (or `config.json` file) and
    /// a tokenizer directory (or `tokenizer.json` file).
    ///
    /// # Errors
    ///
    /// Returns an error if `max_beam_width` is zero, or if either the engine
    /// configuration or the tokenizer cannot be loaded.
    #[instrument(
        level = "info",
        skip_all,
        fields(
            engine_path = %engine_path.as_ref().display(),
            tokenizer_path = %tokenizer_path.as_ref().display(),
        )
    )]
    pub fn load<P: AsRef<Path>>(
        engine_path: P,
        tokenizer_path: P,
        max_beam_width: usize,
    ) -> Result<Self, EngineError> {
        if max_beam_width == 0 {
            return Err(EngineError::Config(
                "`max_beam_width` must be greater than zero".to_string(),
            ));
        }
        let config = EngineConfig::from_engine_path(engine_path)?;
        let tokenizer_file = resolve_file(tokenizer_path.as_ref(), TOKENIZER_FILE);
        let tokenizer = Tokenizer::from_file(&tokenizer_file).map_err(|e| {
            EngineError::Tokenizer(format!(
                "failed to load `{}`: {e}",
                tokenizer_file.display()
            ))
        })?;

        info!(
            target = "textgen-engine",
            event = "engine_loaded",
            model_name = %config.model_name,
            max_input_len = config.max_input_len,
            max_output_len = config.max_output_len,
            max_beam_width,
            "Loaded echo engine"
        );
        Ok(Self::new(config, tokenizer, max_beam_width))
    }

    pub fn new(config: EngineConfig, tokenizer: Tokenizer, max_beam_width: usize) -> Self {
        let special_token_ids = tokenizer
            .get_added_tokens_decoder()
            .into_iter()
            .filter(|(_, token)| token.special)
            .map(|(id, _)| id)
            .collect();
        Self {
            config,
            tokenizer: Arc::new(tokenizer),
            special_token_ids,
            max_beam_width,
            stats: Arc::new(EngineStats::default()),
            next_request_id: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Tokenizes and validates a request, returning the tokens to replay.
    fn prepare(&self, request: &GenerationRequest) -> Result<PreparedRequest, EngineError> {
        validate_beam_width(&request.sampling_params, self.max_beam_width)?;

        let encoding = self
            .tokenizer
            .encode(request.prompt.as_str(), true)
            .map_err(|e| EngineError::Tokenizer(e.to_string()))?;
        let prompt_tokens = encoding.len();
        if prompt_tokens > self.config.max_input_len {
            return Err(EngineError::PromptTooLong {
                num_tokens: prompt_tokens,
                max_input_len: self.config.max_input_len,
            });
        }

        let budget = (request.max_new_tokens as usize).min(self.config.max_output_len);
        let mut tokens: Vec<u32> = encoding
            .get_ids()
            .iter()
            .zip(encoding.get_special_tokens_mask())
            .filter(|(id, is_special)| {
                **is_special == 0 && !self.special_token_ids.contains(*id)
            })
            .map(|(id, _)| *id)
            .collect();
        let finish_reason = if tokens.len() > budget {
            tokens.truncate(budget);
            FinishReason::Length
        } else {
            FinishReason::Stop
        };

        Ok(PreparedRequest {
            tokens,
            prompt_tokens,
            finish_reason,
        })
    }
}

#[async_trait]
impl GenerationEngine for EchoEngine {
    fn generate_async(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationHandle, EngineError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let prepared = self.prepare(&request).inspect_err(|e| {
            self.stats.request_rejected();
            error!(
                target = "textgen-engine",
                event = "request_rejected",
                request_id,
                error = %e,
                "Rejected generation request"
            );
        })?;

        let (sender, receiver) = flume::bounded(self.config.channel_capacity);
        self.stats.request_started(prepared.prompt_tokens);
        let task = EchoTask {
            request_id,
            tokenizer: self.tokenizer.clone(),
            prepared,
            token_interval: Duration::from_millis(self.config.token_interval_ms),
            sender,
            stats: self.stats.clone(),
        };
        let span = info_span!(
            "echo_generation",
            request_id,
            max_new_tokens = request.max_new_tokens,
            streaming = request.streaming
        );
        tokio::spawn(task.run().instrument(span));

        Ok(GenerationHandle::from_receiver(request_id, receiver))
    }

    async fn stats(&self) -> Result<String, EngineError> {
        let snapshot = self
            .stats
            .snapshot(&self.config.model_name, self.max_beam_width);
        Ok(serde_json::to_string(&snapshot)?)
    }

    fn max_beam_width(&self) -> usize {
        self.max_beam_width
    }
}

/// Checks the optional `beam_width` sampling parameter against the
/// engine's maximum beam width.
fn validate_beam_width(
    sampling_params: &SamplingParams,
    max_beam_width: usize,
) -> Result<(), EngineError> {
    let Some(value) = sampling_params.get(BEAM_WIDTH_KEY) else {
        return Ok(());
    };
    match value.as_u64() {
        Some(beam_width) if beam_width >= 1 && beam_width as usize <= max_beam_width => Ok(()),
        _ => Err(EngineError::InvalidBeamWidth {
            requested: value.to_string(),
            max_beam_width,
        }),
    }
}

struct PreparedRequest {
    /// Tokens to emit, already capped to the request budget
    tokens: Vec<u32>,
    prompt_tokens: usize,
    finish_reason: FinishReason,
}

/// The background producer of one echo generation.
struct EchoTask {
    request_id: u64,
    tokenizer: Arc<Tokenizer>,
    prepared: PreparedRequest,
    token_interval: Duration,
    sender: Sender<GenerationEvent>,
    stats: Arc<EngineStats>,
}

impl EchoTask {
    async fn run(self) {
        let EchoTask {
            request_id,
            tokenizer,
            prepared,
            token_interval,
            sender,
            stats,
        } = self;
        let mut decoder = IncrementalDecoder::new(tokenizer);

        for token in prepared.tokens {
            if sender.is_disconnected() {
                Self::cancel(&stats, request_id);
                return;
            }
            if !token_interval.is_zero() {
                tokio::time::sleep(token_interval).await;
            }
            stats.token_generated();
            match decoder.next_token(token) {
                Ok(Some(fragment)) => {
                    if sender
                        .send_async(GenerationEvent::Fragment(fragment))
                        .await
                        .is_err()
                    {
                        Self::cancel(&stats, request_id);
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    Self::fail(&stats, &sender, request_id, e).await;
                    return;
                }
            }
        }

        match decoder.flush() {
            Ok(Some(rest)) => {
                if sender
                    .send_async(GenerationEvent::Fragment(rest))
                    .await
                    .is_err()
                {
                    Self::cancel(&stats, request_id);
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => {
                Self::fail(&stats, &sender, request_id, e).await;
                return;
            }
        }

        let finished = GenerationEvent::Finished {
            prompt_tokens: prepared.prompt_tokens,
            completion_tokens: decoder.num_tokens(),
            finish_reason: prepared.finish_reason,
        };
        if sender.send_async(finished).await.is_err() {
            Self::cancel(&stats, request_id);
            return;
        }
        stats.request_completed();
        debug!(
            target = "textgen-engine",
            event = "generation_completed",
            request_id,
            completion_tokens = decoder.num_tokens(),
        );
    }

    fn cancel(stats: &EngineStats, request_id: u64) {
        stats.request_cancelled();
        debug!(
            target = "textgen-engine",
            event = "generation_cancelled",
            request_id,
            "Generation handle dropped, stopping"
        );
    }

    async fn fail(
        stats: &EngineStats,
        sender: &Sender<GenerationEvent>,
        request_id: u64,
        error: EngineError,
    ) {
        stats.request_failed();
        error!(
            target = "textgen-engine",
            event = "generation_failed",
            request_id,
            error = %error,
        );
        let _ = sender.send_async(GenerationEvent::Failed(error)).await;
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use serde_json::{json, Value};

    use super::*;
    use crate::{
        config::ENGINE_CONFIG_FILE,
        testing::{word_level_tokenizer, WORD_LEVEL_TOKENIZER_JSON},
    };

    fn echo_engine(config: EngineConfig) -> EchoEngine {
        EchoEngine::new(config, word_level_tokenizer(), 2)
    }

    async fn stats_json(engine: &EchoEngine) -> Value {
        serde_json::from_str(&engine.stats().await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_echoes_prompt_without_special_tokens() {
        let engine = echo_engine(EngineConfig::default());
        let handle = engine
            .generate_async(GenerationRequest::new("<s> hello world", 16))
            .unwrap();

        let output = handle.await_completion().await.unwrap();
        assert_eq!(output.text, "hello world");
        assert_eq!(output.prompt_tokens, 3);
        assert_eq!(output.completion_tokens, 2);
        assert_eq!(output.finish_reason, FinishReason::Stop);
    }

    #[tokio::test]
    async fn test_max_new_tokens_truncates_output() {
        let engine = echo_engine(EngineConfig::default());
        let handle = engine
            .generate_async(GenerationRequest::new("the quick brown fox", 2))
            .unwrap();

        let output = handle.await_completion().await.unwrap();
        assert_eq!(output.text, "the quick");
        assert_eq!(output.completion_tokens, 2);
        assert_eq!(output.finish_reason, FinishReason::Length);
    }

    #[tokio::test]
    async fn test_max_output_len_caps_budget() {
        let engine = echo_engine(EngineConfig {
            max_output_len: 1,
            ..EngineConfig::default()
        });
        let handle = engine
            .generate_async(GenerationRequest::new("hello world", 100))
            .unwrap();

        let output = handle.await_completion().await.unwrap();
        assert_eq!(output.text, "hello");
        assert_eq!(output.finish_reason, FinishReason::Length);
    }

    #[tokio::test]
    async fn test_streaming_fragments_match_completion_text() {
        let engine = echo_engine(EngineConfig::default());
        let mut handle = engine
            .generate_async(
                GenerationRequest::new("the quick brown fox jumps", 16).with_streaming(true),
            )
            .unwrap();

        let mut fragments = Vec::new();
        while let Some(fragment) = handle.next().await {
            fragments.push(fragment.unwrap());
        }
        assert_eq!(fragments, vec!["the", " quick", " brown", " fox", " jumps"]);
        assert!(handle.is_finished());
        assert_eq!(handle.text(), "the quick brown fox jumps");
    }

    #[tokio::test]
    async fn test_beam_width_above_maximum_is_rejected() {
        let engine = echo_engine(EngineConfig::default());
        let mut params = SamplingParams::new();
        params.insert(BEAM_WIDTH_KEY.to_string(), json!(3));

        let result = engine
            .generate_async(GenerationRequest::new("hello", 4).with_sampling_params(params));
        assert!(matches!(
            result,
            Err(EngineError::InvalidBeamWidth {
                max_beam_width: 2,
                ..
            })
        ));
        assert_eq!(stats_json(&engine).await["failed_requests"], 1);
    }

    #[tokio::test]
    async fn test_unknown_sampling_params_pass_through() {
        let engine = echo_engine(EngineConfig::default());
        let mut params = SamplingParams::new();
        params.insert("temperature".to_string(), json!(0.7));
        params.insert(BEAM_WIDTH_KEY.to_string(), json!(2));

        let handle = engine
            .generate_async(GenerationRequest::new("hello", 4).with_sampling_params(params))
            .unwrap();
        assert_eq!(handle.await_completion().await.unwrap().text, "hello");
    }

    #[tokio::test]
    async fn test_prompt_too_long_is_rejected() {
        let engine = echo_engine(EngineConfig {
            max_input_len: 2,
            ..EngineConfig::default()
        });

        let result = engine.generate_async(GenerationRequest::new("the quick brown", 4));
        assert!(matches!(
            result,
            Err(EngineError::PromptTooLong {
                num_tokens: 3,
                max_input_len: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_stats_after_completion() {
        let engine = echo_engine(EngineConfig::default());
        let handle = engine
            .generate_async(GenerationRequest::new("hello world", 8))
            .unwrap();
        handle.await_completion().await.unwrap();

        let stats = stats_json(&engine).await;
        assert_eq!(stats["model_name"], "default");
        assert_eq!(stats["max_beam_width"], 2);
        assert_eq!(stats["completed_requests"], 1);
        assert_eq!(stats["active_requests"], 0);
        assert_eq!(stats["prompt_tokens"], 2);
        assert_eq!(stats["generated_tokens"], 2);
        assert!(stats["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_dropping_handle_cancels_generation() {
        let engine = echo_engine(EngineConfig {
            token_interval_ms: 20,
            channel_capacity: 1,
            ..EngineConfig::default()
        });
        let mut handle = engine
            .generate_async(GenerationRequest::new("the quick brown fox jumps", 16))
            .unwrap();
        assert_eq!(handle.next().await.unwrap().unwrap(), "the");
        drop(handle);

        let mut cancelled = false;
        for _ in 0..100 {
            let stats = stats_json(&engine).await;
            if stats["active_requests"] == 0 {
                cancelled = stats["cancelled_requests"] == 1;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(cancelled);
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_isolated() {
        let engine = Arc::new(echo_engine(EngineConfig::default()));
        let first = engine
            .generate_async(GenerationRequest::new("hello world", 8))
            .unwrap();
        let second = engine
            .generate_async(GenerationRequest::new("the quick brown fox", 8))
            .unwrap();
        assert_ne!(first.request_id(), second.request_id());

        let (first, second) = tokio::join!(first.await_completion(), second.await_completion());
        assert_eq!(first.unwrap().text, "hello world");
        assert_eq!(second.unwrap().text, "the quick brown fox");
    }

    #[test]
    fn test_load_from_directories() {
        let engine_dir = tempfile::tempdir().unwrap();
        let tokenizer_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            engine_dir.path().join(ENGINE_CONFIG_FILE),
            r#"{"model_name": "echo-test"}"#,
        )
        .unwrap();
        std::fs::write(
            tokenizer_dir.path().join(TOKENIZER_FILE),
            WORD_LEVEL_TOKENIZER_JSON,
        )
        .unwrap();

        let engine = EchoEngine::load(engine_dir.path(), tokenizer_dir.path(), 1).unwrap();
        assert_eq!(engine.config().model_name, "echo-test");
        assert_eq!(engine.max_beam_width(), 1);
    }

    #[test]
    fn test_load_rejects_zero_beam_width() {
        let dir = tempfile::tempdir().unwrap();
        let result = EchoEngine::load(dir.path(), dir.path(), 0);
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_load_fails_without_tokenizer() {
        let engine_dir = tempfile::tempdir().unwrap();
        let tokenizer_dir = tempfile::tempdir().unwrap();
        std::fs::write(engine_dir.path().join(ENGINE_CONFIG_FILE), "{}").unwrap();

        let result = EchoEngine::load(engine_dir.path(), tokenizer_dir.path(), 1);
        assert!(matches!(result, Err(EngineError::Tokenizer(_))));
    }
}
