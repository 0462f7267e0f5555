use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, ConfigError, Environment, File, Map};
use serde::{Deserialize, Serialize};

/// Section of the configuration file holding the service settings
const CONFIG_SECTION: &str = "textgen_service";
/// Prefix of the environment variables overriding the service settings
const ENV_PREFIX: &str = "TEXTGEN_SERVICE";

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_MAX_BEAM_WIDTH: u64 = 1;
const DEFAULT_LOG_DIRECTORY: &str = "./logs";
const DEFAULT_KEEP_ALIVE_TIMEOUT_SECS: u64 = 5;

/// Configuration for the text generation service.
///
/// Values are layered, each source overriding the previous one: built-in
/// defaults, an optional configuration file (section `textgen_service`),
/// `TEXTGEN_SERVICE__<FIELD>` environment variables and finally the command
/// line overrides.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextgenServiceConfig {
    /// Path to the engine directory, or to its `config.json`
    pub engine_path: PathBuf,

    /// Path to the tokenizer directory, or to its `tokenizer.json`
    pub tokenizer_path: PathBuf,

    /// Host the HTTP server binds to
    pub host: String,

    /// Port the HTTP server listens on
    pub port: u16,

    /// Maximum beam width the engine accepts, must be at least one
    pub max_beam_width: usize,

    /// Directory receiving the rotated log files
    pub log_directory: PathBuf,

    /// Seconds an idle keep-alive connection may wait for its next request
    pub keep_alive_timeout_secs: u64,
}

/// Values given on the command line, taking precedence over every other source.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub engine_path: Option<PathBuf>,
    pub tokenizer_path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub max_beam_width: Option<usize>,
    pub keep_alive_timeout_secs: Option<u64>,
}

impl TextgenServiceConfig {
    /// Builds the configuration from every source.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be read or parsed, or
    /// if a required field (`engine_path`, `tokenizer_path`) is missing once
    /// all the sources are merged.
    pub fn load(
        config_path: Option<&Path>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        Self::load_with_env(config_path, overrides, None)
    }

    /// Same as [`Self::load`], reading environment variables from `env`
    /// instead of the process environment when it is set.
    fn load_with_env(
        config_path: Option<&Path>,
        overrides: ConfigOverrides,
        env: Option<Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default(section_key("host"), DEFAULT_HOST)?
            .set_default(section_key("port"), i64::from(DEFAULT_PORT))?
            .set_default(section_key("max_beam_width"), DEFAULT_MAX_BEAM_WIDTH)?
            .set_default(section_key("log_directory"), DEFAULT_LOG_DIRECTORY)?
            .set_default(
                section_key("keep_alive_timeout_secs"),
                DEFAULT_KEEP_ALIVE_TIMEOUT_SECS,
            )?;

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .keep_prefix(true)
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .set_override_option(
                section_key("engine_path"),
                overrides.engine_path.map(path_to_string),
            )?
            .set_override_option(
                section_key("tokenizer_path"),
                overrides.tokenizer_path.map(path_to_string),
            )?
            .set_override_option(section_key("host"), overrides.host)?
            .set_override_option(section_key("port"), overrides.port.map(i64::from))?
            .set_override_option(
                section_key("max_beam_width"),
                overrides.max_beam_width.map(|width| width as u64),
            )?
            .set_override_option(
                section_key("keep_alive_timeout_secs"),
                overrides.keep_alive_timeout_secs,
            )?
            .build()?;

        config.get::<Self>(CONFIG_SECTION)
    }

    /// Returns the `host:port` address the server binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns how long an idle keep-alive connection is kept open
    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_secs(self.keep_alive_timeout_secs)
    }
}

fn section_key(field: &str) -> String {
    format!("{CONFIG_SECTION}.{field}")
}

fn path_to_string(path: PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn required_overrides() -> ConfigOverrides {
        ConfigOverrides {
            engine_path: Some(PathBuf::from("/models/engine")),
            tokenizer_path: Some(PathBuf::from("/models/tokenizer")),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_apply() {
        let config =
            TextgenServiceConfig::load_with_env(None, required_overrides(), Some(Map::new()))
                .unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8000);
        assert_eq!(config.max_beam_width, 1);
        assert_eq!(config.log_directory, PathBuf::from("./logs"));
        assert_eq!(config.engine_path, PathBuf::from("/models/engine"));
        assert_eq!(config.bind_address(), "127.0.0.1:8000");
        assert_eq!(config.keep_alive_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_missing_required_paths() {
        let result = TextgenServiceConfig::load_with_env(
            None,
            ConfigOverrides::default(),
            Some(Map::new()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_file_values() {
        let file = write_config(
            r#"
            [textgen_service]
            engine_path = "/srv/engine"
            tokenizer_path = "/srv/tokenizer"
            host = "0.0.0.0"
            port = 9000
            max_beam_width = 4
            keep_alive_timeout_secs = 30
            "#,
        );
        let config = TextgenServiceConfig::load_with_env(
            Some(file.path()),
            ConfigOverrides::default(),
            Some(Map::new()),
        )
        .unwrap();
        assert_eq!(config.engine_path, PathBuf::from("/srv/engine"));
        assert_eq!(config.tokenizer_path, PathBuf::from("/srv/tokenizer"));
        assert_eq!(config.bind_address(), "0.0.0.0:9000");
        assert_eq!(config.max_beam_width, 4);
        assert_eq!(config.keep_alive_timeout(), Duration::from_secs(30));
        assert_eq!(config.log_directory, PathBuf::from("./logs"));
    }

    #[test]
    fn test_precedence() {
        let file = write_config(
            r#"
            [textgen_service]
            engine_path = "/srv/engine"
            tokenizer_path = "/srv/tokenizer"
            port = 9000
            max_beam_width = 4
            "#,
        );
        let env = Map::from([
            ("TEXTGEN_SERVICE__PORT".to_string(), "9100".to_string()),
            ("TEXTGEN_SERVICE__HOST".to_string(), "10.0.0.1".to_string()),
            (
                "TEXTGEN_SERVICE__KEEP_ALIVE_TIMEOUT_SECS".to_string(),
                "12".to_string(),
            ),
        ]);
        let overrides = ConfigOverrides {
            port: Some(9200),
            max_beam_width: Some(2),
            keep_alive_timeout_secs: Some(7),
            ..Default::default()
        };
        let config =
            TextgenServiceConfig::load_with_env(Some(file.path()), overrides, Some(env)).unwrap();
        assert_eq!(config.host, "10.0.0.1");
        assert_eq!(config.port, 9200);
        assert_eq!(config.max_beam_width, 2);
        assert_eq!(config.keep_alive_timeout(), Duration::from_secs(7));
        assert_eq!(config.engine_path, PathBuf::from("/srv/engine"));
    }

    #[test]
    fn test_missing_config_file() {
        let result = TextgenServiceConfig::load_with_env(
            Some(Path::new("/nonexistent/textgen.toml")),
            required_overrides(),
            Some(Map::new()),
        );
        assert!(result.is_err());
    }
}
