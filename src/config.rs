//! Application configuration.
//!
//! Loaded from a YAML file with `Config::load` — an explicitly constructed,
//! immutable value passed into the scheduler and its collaborators at
//! startup. Enum-valued fields (provider, language, level) accept
//! case-insensitive strings and reject unknown values at load time.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source_email: SourceMailConfig,
    pub llm: LlmConfig,
    pub language: LanguageConfig,
    pub target_email: TargetMailConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Source mailbox (IMAP) connection and fetch policy.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceMailConfig {
    pub address: String,
    pub app_password: SecretString,
    #[serde(default = "default_imap_server")]
    pub imap_server: String,
    #[serde(default = "default_imap_port")]
    pub imap_port: u16,
    /// Lookback window in days; 0 disables the `SINCE` predicate.
    #[serde(default = "default_fetch_days")]
    pub fetch_days: u32,
    #[serde(default = "default_true")]
    pub mark_as_read: bool,
}

/// LLM completion client settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: SecretString,
    /// Overrides the provider's default model when set.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

/// Target language and proficiency for translations.
#[derive(Debug, Clone, Deserialize)]
pub struct LanguageConfig {
    pub target: Language,
    pub level: LanguageLevel,
}

/// Destination relay (SMTP) connection and delivery policy.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetMailConfig {
    pub address: String,
    pub smtp_server: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_password: SecretString,
    #[serde(default = "default_sender_name")]
    pub sender_name: String,
    /// Extra attempts after the first failure, for transient errors only.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Flat pause between attempts, in seconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,
}

impl TargetMailConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay.max(0.0))
    }
}

/// Daily trigger settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Wall-clock trigger time, `"HH:MM"`.
    pub time: String,
    /// IANA zone name the trigger time is evaluated in.
    pub timezone: String,
    pub enabled: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            time: "12:00".to_string(),
            timezone: "UTC".to_string(),
            enabled: true,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter level; `RUST_LOG` overrides it.
    pub level: String,
    pub file: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: PathBuf::from("logs/lingopost.log"),
        }
    }
}

// ── Enumerated values ───────────────────────────────────────────────

/// Supported LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Claude,
    OpenAi,
    Perplexity,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::OpenAi => "openai",
            Self::Perplexity => "perplexity",
        }
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "openai" => Ok(Self::OpenAi),
            "perplexity" => Ok(Self::Perplexity),
            other => Err(format!(
                "unsupported provider \"{other}\" (expected claude, openai or perplexity)"
            )),
        }
    }
}

/// Supported target languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    English,
    German,
    Russian,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::English => "English",
            Self::German => "German",
            Self::Russian => "Russian",
        };
        f.write_str(name)
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "english" => Ok(Self::English),
            "german" => Ok(Self::German),
            "russian" => Ok(Self::Russian),
            other => Err(format!(
                "unsupported language \"{other}\" (expected english, german or russian)"
            )),
        }
    }
}

/// CEFR proficiency levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LanguageLevel {
    A1,
    A2,
    B1,
    B2,
    C1,
    C2,
}

impl fmt::Display for LanguageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::A1 => "A1",
            Self::A2 => "A2",
            Self::B1 => "B1",
            Self::B2 => "B2",
            Self::C1 => "C1",
            Self::C2 => "C2",
        };
        f.write_str(name)
    }
}

impl FromStr for LanguageLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "a1" => Ok(Self::A1),
            "a2" => Ok(Self::A2),
            "b1" => Ok(Self::B1),
            "b2" => Ok(Self::B2),
            "c1" => Ok(Self::C1),
            "c2" => Ok(Self::C2),
            other => Err(format!(
                "unsupported language level \"{other}\" (expected one of a1, a2, b1, b2, c1, c2)"
            )),
        }
    }
}

impl<'de> Deserialize<'de> for LlmProvider {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for Language {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for LanguageLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ── Loading and validation ──────────────────────────────────────────

impl Config {
    /// Load and validate configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let raw = std::fs::read_to_string(path)?;
        let config: Config =
            serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;

        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Cross-field checks that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_time_of_day(&self.schedule.time)?;

        self.schedule
            .timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| ConfigError::InvalidValue {
                key: "schedule.timezone".to_string(),
                message: format!("unknown IANA timezone \"{}\"", self.schedule.timezone),
            })?;

        if !self.target_email.retry_delay.is_finite() || self.target_email.retry_delay < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "target_email.retry_delay".to_string(),
                message: format!(
                    "expected a non-negative number of seconds, got {}",
                    self.target_email.retry_delay
                ),
            });
        }

        Ok(())
    }
}

/// Parse a `"HH:MM"` time-of-day string.
pub fn parse_time_of_day(s: &str) -> Result<(u32, u32), ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        key: "schedule.time".to_string(),
        message: format!("expected \"HH:MM\", got \"{s}\""),
    };

    let (hour, minute) = s.split_once(':').ok_or_else(invalid)?;
    let hour: u32 = hour.parse().map_err(|_| invalid())?;
    let minute: u32 = minute.parse().map_err(|_| invalid())?;
    if hour >= 24 || minute >= 60 {
        return Err(invalid());
    }
    Ok((hour, minute))
}

fn default_imap_server() -> String {
    "imap.gmail.com".to_string()
}

fn default_imap_port() -> u16 {
    993
}

fn default_fetch_days() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.7
}

fn default_sender_name() -> String {
    "Lingopost".to_string()
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    300.0
}
