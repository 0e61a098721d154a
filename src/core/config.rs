use std::env;
use std::fmt::{self, Display};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SENTIMENT_CONFIG";
/// Config file picked up from the working directory when present
pub const DEFAULT_CONFIG_NAME: &str = "sentiment-predictor.toml";
/// Positional limit of BERT-family encoders
pub const MAX_SUPPORTED_TOKENS: usize = 512;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "warning", "error", "critical"];

/// Service settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Hugging Face repository of the classifier
    pub model_name: String,
    /// Repository used for `tokenizer.json` when the model repo ships none
    pub tokenizer_fallback: String,
    /// Inference device: `cpu`, `cuda[:N]` or `metal[:N]`
    pub device: String,
    /// Prefix of the prediction routes
    pub api_v1_prefix: String,
    /// Name reported by the health endpoints
    pub service_name: String,
    /// Bind address
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Log level
    pub log_level: String,
    /// Maximum number of texts accepted by one batch call
    pub max_batch_size: usize,
    /// Maximum number of tokens fed to the model per text
    pub max_text_length: usize,
    /// On-disk cache for downloaded model files
    pub cache_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_name: "ProsusAI/finbert".to_string(),
            tokenizer_fallback: "bert-base-uncased".to_string(),
            device: "cpu".to_string(),
            api_v1_prefix: "/api/v1".to_string(),
            service_name: "sentiment-predictor-service".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8096,
            log_level: "INFO".to_string(),
            max_batch_size: 100,
            max_text_length: MAX_SUPPORTED_TOKENS,
            cache_dir: PathBuf::from("/app/model_cache"),
        }
    }
}

/// Errors raised while loading settings
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading the config file.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Settings {
    /// Load settings from defaults, an optional TOML file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from_vars(path, env::vars())
    }

    /// Load settings with `vars` standing in for the process environment.
    ///
    /// Variable names match field names case-insensitively; `SENTIMENT_CONFIG`
    /// among them names the TOML file when `path` is `None`.
    pub fn load_from_vars<I>(path: Option<&Path>, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: Vec<(String, String)> = vars.into_iter().collect();
        let lookup = |key: &str| {
            vars.iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(key))
                .map(|(_, value)| value.clone())
        };

        let mut settings = match resolve_path(path, lookup(CONFIG_ENV_VAR)) {
            Some(resolved) => Self::from_file(&resolved)?,
            None => Self::default(),
        };
        settings.apply_overrides(lookup)?;

        settings.validate()?;
        Ok(settings)
    }

    /// Read settings from a TOML file; fields it omits keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|err| ConfigError::Io(format!("{}: {}", path.display(), err)))?;
        let settings: Self =
            toml::from_str(&content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(settings)
    }

    /// Apply overrides looked up by upper-case field name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("MODEL_NAME") {
            self.model_name = value;
        }
        if let Some(value) = lookup("TOKENIZER_FALLBACK") {
            self.tokenizer_fallback = value;
        }
        if let Some(value) = lookup("DEVICE") {
            self.device = value;
        }
        if let Some(value) = lookup("API_V1_PREFIX") {
            self.api_v1_prefix = value;
        }
        if let Some(value) = lookup("SERVICE_NAME") {
            self.service_name = value;
        }
        if let Some(value) = lookup("HOST") {
            self.host = value;
        }
        if let Some(value) = lookup("PORT") {
            self.port = parse_number("PORT", &value)?;
        }
        if let Some(value) = lookup("LOG_LEVEL") {
            self.log_level = value;
        }
        if let Some(value) = lookup("MAX_BATCH_SIZE") {
            self.max_batch_size = parse_number("MAX_BATCH_SIZE", &value)?;
        }
        if let Some(value) = lookup("MAX_TEXT_LENGTH") {
            self.max_text_length = parse_number("MAX_TEXT_LENGTH", &value)?;
        }
        if let Some(value) = lookup("CACHE_DIR") {
            self.cache_dir = PathBuf::from(value);
        }
        Ok(())
    }

    /// Check the settings for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("model_name", &self.model_name)?;
        require_non_empty("tokenizer_fallback", &self.tokenizer_fallback)?;
        require_non_empty("service_name", &self.service_name)?;
        require_non_empty("host", &self.host)?;
        if self.cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("cache_dir must be non-empty".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be non-zero".to_string()));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid("max_batch_size must be at least 1".to_string()));
        }
        if self.max_text_length == 0 || self.max_text_length > MAX_SUPPORTED_TOKENS {
            return Err(ConfigError::Invalid(format!(
                "max_text_length must be between 1 and {}",
                MAX_SUPPORTED_TOKENS
            )));
        }
        if !self.api_v1_prefix.starts_with('/') || self.api_v1_prefix.ends_with('/') {
            return Err(ConfigError::Invalid(format!(
                "api_v1_prefix must start with '/' and not end with '/': {}",
                self.api_v1_prefix
            )));
        }
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!("unknown log_level: {}", self.log_level)));
        }
        self.device_spec()?;
        Ok(())
    }

    /// Parsed inference device
    pub fn device_spec(&self) -> Result<DeviceSpec, ConfigError> {
        self.device.parse()
    }

    /// `log` filter matching the configured level
    pub fn log_filter(&self) -> log::LevelFilter {
        match self.log_level.to_ascii_lowercase().as_str() {
            "trace" => log::LevelFilter::Trace,
            "debug" => log::LevelFilter::Debug,
            "warn" | "warning" => log::LevelFilter::Warn,
            "error" | "critical" => log::LevelFilter::Error,
            _ => log::LevelFilter::Info,
        }
    }

    /// Socket address string for the HTTP server
    pub fn bind_address(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}

/// Inference device selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSpec {
    Cpu,
    Cuda(usize),
    Metal(usize),
}

impl FromStr for DeviceSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let (kind, ordinal) = match lowered.split_once(':') {
            Some((kind, ordinal)) => {
                let ordinal = ordinal.parse::<usize>().map_err(|_| {
                    ConfigError::Invalid(format!("invalid device ordinal in '{}'", s))
                })?;
                (kind.to_string(), ordinal)
            }
            None => (lowered.clone(), 0),
        };

        match kind.as_str() {
            "cpu" if ordinal == 0 => Ok(DeviceSpec::Cpu),
            "cuda" => Ok(DeviceSpec::Cuda(ordinal)),
            "metal" | "mps" => Ok(DeviceSpec::Metal(ordinal)),
            _ => Err(ConfigError::Invalid(format!("unsupported device: {}", s))),
        }
    }
}

impl Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSpec::Cpu => write!(f, "cpu"),
            DeviceSpec::Cuda(ordinal) => write!(f, "cuda:{}", ordinal),
            DeviceSpec::Metal(ordinal) => write!(f, "metal:{}", ordinal),
        }
    }
}

/// Explicit path, then `SENTIMENT_CONFIG`, then the default file if it exists.
fn resolve_path(path: Option<&Path>, env_path: Option<String>) -> Option<PathBuf> {
    if let Some(path) = path {
        return Some(path.to_path_buf());
    }
    if let Some(env_path) = env_path {
        if !env_path.trim().is_empty() {
            return Some(PathBuf::from(env_path));
        }
    }
    let default = PathBuf::from(DEFAULT_CONFIG_NAME);
    default.is_file().then_some(default)
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{} must be a number, got '{}'", name, value)))
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{} must be non-empty", field)));
    }
    Ok(())
}
