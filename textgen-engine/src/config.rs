use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::EngineError;

/// The file name of the engine configuration, inside an engine directory.
pub const ENGINE_CONFIG_FILE: &str = "config.json";

/// The file name of a Hugging Face tokenizer, inside a tokenizer directory.
pub const TOKENIZER_FILE: &str = "tokenizer.json";

const DEFAULT_MODEL_NAME: &str = "default";
const DEFAULT_MAX_INPUT_LEN: usize = 4_096;
const DEFAULT_MAX_OUTPUT_LEN: usize = 4_096;
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Configuration of a built engine, as stored in its `config.json`.
///
/// Every field is optional in the file, missing values fall back to the
/// defaults below.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Name of the model the engine was built from, used for logging and stats
    pub model_name: String,

    /// Maximum number of prompt tokens accepted by the engine
    pub max_input_len: usize,

    /// Maximum number of tokens generated for a single request, regardless
    /// of the requested `max_new_tokens`
    pub max_output_len: usize,

    /// Pause, in milliseconds, between two consecutive generated tokens
    pub token_interval_ms: u64,

    /// Size of the bounded channel carrying fragments from the engine to a
    /// request handler
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL_NAME.to_string(),
            max_input_len: DEFAULT_MAX_INPUT_LEN,
            max_output_len: DEFAULT_MAX_OUTPUT_LEN,
            token_interval_ms: 0,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Loads the engine configuration from an engine path.
    ///
    /// The path is either the configuration file itself, or a directory
    /// containing a `config.json` file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, cannot be parsed, or
    /// contains values the engine cannot run with (zero-sized budgets or
    /// channel capacity).
    pub fn from_engine_path<P: AsRef<Path>>(engine_path: P) -> Result<Self, EngineError> {
        let path = resolve_file(engine_path.as_ref(), ENGINE_CONFIG_FILE);
        let contents = std::fs::read_to_string(&path).map_err(|source| EngineError::Io {
            path: path.clone(),
            source,
        })?;
        let config: Self = serde_json::from_str(&contents).map_err(|e| {
            EngineError::Config(format!("failed to parse `{}`: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.max_input_len == 0 {
            return Err(EngineError::Config(
                "`max_input_len` must be greater than zero".to_string(),
            ));
        }
        if self.max_output_len == 0 {
            return Err(EngineError::Config(
                "`max_output_len` must be greater than zero".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(EngineError::Config(
                "`channel_capacity` must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Resolves `path` to a file: directories are joined with `file_name`,
/// anything else is returned as is.
pub fn resolve_file(path: &Path, file_name: &str) -> PathBuf {
    if path.is_dir() {
        path.join(file_name)
    } else {
        path.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(ENGINE_CONFIG_FILE),
            r#"{"model_name": "llama-2-7b", "token_interval_ms": 5}"#,
        )
        .unwrap();

        let config = EngineConfig::from_engine_path(dir.path()).unwrap();
        assert_eq!(config.model_name, "llama-2-7b");
        assert_eq!(config.token_interval_ms, 5);
        assert_eq!(config.max_input_len, DEFAULT_MAX_INPUT_LEN);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_engine_path_can_point_to_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("engine.json");
        std::fs::write(&file, "{}").unwrap();

        let config = EngineConfig::from_engine_path(&file).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = EngineConfig::from_engine_path(dir.path());
        assert!(matches!(result, Err(EngineError::Io { .. })));
    }

    #[test]
    fn test_zero_channel_capacity_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(ENGINE_CONFIG_FILE),
            r#"{"channel_capacity": 0}"#,
        )
        .unwrap();

        let result = EngineConfig::from_engine_path(dir.path());
        assert!(matches!(result, Err(EngineError::Config(_))));
    }
}
