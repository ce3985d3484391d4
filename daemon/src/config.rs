use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const CONFIG_ENV: &str = "PARLEY_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Could not determine the user config directory")]
    NoConfigDir,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default = "Config::default")]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AudioConfig {
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u32,
    #[serde(default = "default_gain")]
    pub gain: f32,
    #[serde(default = "default_frame_queue_depth")]
    pub frame_queue_depth: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            frame_ms: default_frame_ms(),
            gain: default_gain(),
            frame_queue_depth: default_frame_queue_depth(),
        }
    }
}

fn default_device() -> String {
    "default".to_string()
}
fn default_sample_rate() -> u32 {
    16000
}
fn default_channels() -> u16 {
    1
}
fn default_frame_ms() -> u32 {
    500
}
fn default_gain() -> f32 {
    1.0
}
fn default_frame_queue_depth() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct VadConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_min_speech_duration")]
    pub min_speech_duration_ms: u32,
    #[serde(default = "default_min_silence_duration")]
    pub min_silence_duration_ms: u32,
    #[serde(default = "default_speech_pad")]
    pub speech_pad_ms: u32,
    /// RMS level that the energy classifier scores as exactly 0.5.
    #[serde(default = "default_energy_reference")]
    pub energy_reference: f32,
    #[serde(default = "default_max_utterance_duration")]
    pub max_utterance_duration_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            min_speech_duration_ms: default_min_speech_duration(),
            min_silence_duration_ms: default_min_silence_duration(),
            speech_pad_ms: default_speech_pad(),
            energy_reference: default_energy_reference(),
            max_utterance_duration_ms: default_max_utterance_duration(),
        }
    }
}

fn default_threshold() -> f32 {
    0.5
}
fn default_min_speech_duration() -> u32 {
    500
}
fn default_min_silence_duration() -> u32 {
    800
}
fn default_speech_pad() -> u32 {
    300
}
fn default_energy_reference() -> f32 {
    0.02
}
fn default_max_utterance_duration() -> u32 {
    50_000
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ConversationConfig {
    #[serde(default = "default_max_conversation_duration")]
    pub max_conversation_duration_s: u64,
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,
    #[serde(default = "default_output_queue_depth")]
    pub output_queue_depth: usize,
    #[serde(default)]
    pub subject_hint: Option<String>,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_conversation_duration_s: default_max_conversation_duration(),
            max_queue_depth: default_max_queue_depth(),
            output_queue_depth: default_output_queue_depth(),
            subject_hint: None,
        }
    }
}

fn default_max_conversation_duration() -> u64 {
    3600
}
fn default_max_queue_depth() -> usize {
    4
}
fn default_output_queue_depth() -> usize {
    16
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PipelineConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8765/process".to_string()
}
fn default_request_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PlaybackConfig {
    #[serde(default = "default_playback_enabled")]
    pub enabled: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            enabled: default_playback_enabled(),
        }
    }
}

fn default_playback_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RateLimitConfig {
    #[serde(default = "default_commands_per_second")]
    pub commands_per_second: u32,
    #[serde(default = "default_burst_capacity")]
    pub burst_capacity: u32,
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            commands_per_second: default_commands_per_second(),
            burst_capacity: default_burst_capacity(),
            enabled: default_rate_limit_enabled(),
        }
    }
}

fn default_commands_per_second() -> u32 {
    10
}
fn default_burst_capacity() -> u32 {
    20
}
fn default_rate_limit_enabled() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            vad: VadConfig::default(),
            conversation: ConversationConfig::default(),
            pipeline: PipelineConfig::default(),
            playback: PlaybackConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.vad.threshold) {
            return Err(invalid("vad.threshold", "must be between 0 and 1"));
        }
        if self.vad.energy_reference <= 0.0 || !self.vad.energy_reference.is_finite() {
            return Err(invalid("vad.energy_reference", "must be positive"));
        }
        if self.vad.max_utterance_duration_ms < self.vad.min_speech_duration_ms {
            return Err(invalid(
                "vad.max_utterance_duration_ms",
                "must not be shorter than min_speech_duration_ms",
            ));
        }
        if self.audio.sample_rate == 0 {
            return Err(invalid("audio.sample_rate", "must be non-zero"));
        }
        if self.audio.channels == 0 {
            return Err(invalid("audio.channels", "must be non-zero"));
        }
        if self.audio.frame_ms == 0 {
            return Err(invalid("audio.frame_ms", "must be non-zero"));
        }
        if self.audio.frame_queue_depth == 0 {
            return Err(invalid("audio.frame_queue_depth", "must be at least 1"));
        }
        if self.conversation.max_queue_depth == 0 {
            return Err(invalid("conversation.max_queue_depth", "must be at least 1"));
        }
        if self.conversation.output_queue_depth == 0 {
            return Err(invalid(
                "conversation.output_queue_depth",
                "must be at least 1",
            ));
        }
        if self.rate_limit.commands_per_second == 0 || self.rate_limit.burst_capacity == 0 {
            return Err(invalid("rate_limit", "rates must be non-zero"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

pub fn load_config() -> Result<Config, ConfigError> {
    let config_path = get_config_path()?;
    load_config_from(&config_path)
}

pub fn load_config_from(config_path: &Path) -> Result<Config, ConfigError> {
    if !config_path.exists() {
        tracing::info!("Config file not found at {:?}, using defaults", config_path);
        return Ok(Config::default());
    }

    tracing::info!("Loading config from {:?}", config_path);
    let config_str = std::fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
        path: config_path.to_path_buf(),
        source,
    })?;

    let config: Config = toml::from_str(&config_str)?;
    config.validate()?;

    tracing::info!("Config loaded successfully");
    Ok(config)
}

fn get_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }

    dirs::config_dir()
        .map(|dir| dir.join("parley").join("config.toml"))
        .ok_or(ConfigError::NoConfigDir)
}
