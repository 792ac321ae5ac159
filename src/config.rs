use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Deserialize;

use crate::client::{DEFAULT_API_BASE, DEFAULT_MODEL};
use crate::error::{ChatError, Result};
use crate::rate_limit::RateLimitPolicy;

pub const DEFAULT_MAX_PROMPT_CHARS: usize = 500;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// 20 requests, then a 24 hour block
    Daily,
    /// 10 requests, then a 1 hour block
    Hourly,
}

impl Preset {
    pub fn policy(self) -> RateLimitPolicy {
        match self {
            Preset::Daily => RateLimitPolicy::daily(),
            Preset::Hourly => RateLimitPolicy::hourly(),
        }
    }
}

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "nekebot")]
#[command(about = "Terminal chat client for Gemini with a local request quota")]
pub struct Args {
    // API key for generateContent
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    // Model name
    #[arg(short, long)]
    pub model: Option<String>,

    // API base url
    #[arg(long)]
    pub api_base: Option<String>,

    // Request timeout in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    // Quota preset
    #[arg(long, value_enum)]
    pub preset: Option<Preset>,

    // Rate limit max requests per window
    #[arg(long)]
    pub max_requests: Option<u32>,

    // Rate limit window in seconds
    #[arg(long)]
    pub window_secs: Option<u64>,

    // Block duration in seconds once the quota is spent
    #[arg(long)]
    pub block_secs: Option<u64>,

    // Longest accepted prompt
    #[arg(long)]
    pub max_prompt_chars: Option<usize>,

    // Where counters and history are kept
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    // Keep everything in memory for this run
    #[arg(long, default_value_t = false)]
    pub ephemeral: bool,

    // Optional TOML config file
    #[arg(short, long, env = "NEKEBOT_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub api: ApiSection,
    pub rate_limit: RateLimitSection,
    pub chat: ChatSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub api_base: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub preset: Option<Preset>,
    pub max_requests: Option<u32>,
    pub window_secs: Option<u64>,
    pub block_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChatSection {
    pub data_dir: Option<PathBuf>,
    pub max_prompt_chars: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| ChatError::io(path, e))?;
        Self::parse(&content)
            .map_err(|e| ChatError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Settings after merging CLI flags over the config file over the preset.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: Option<String>,
    pub model: String,
    pub api_base: String,
    pub timeout: Duration,
    pub policy: RateLimitPolicy,
    pub max_prompt_chars: usize,
    /// `None` keeps counters and history in memory.
    pub data_dir: Option<PathBuf>,
}

impl Config {
    pub fn load(args: Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        let config = Self::resolve(args, file);
        config.validate()?;
        Ok(config)
    }

    pub fn resolve(args: Args, file: FileConfig) -> Self {
        let preset = args
            .preset
            .or(file.rate_limit.preset)
            .unwrap_or(Preset::Daily);
        let base = preset.policy();

        let policy = RateLimitPolicy {
            max_requests: args
                .max_requests
                .or(file.rate_limit.max_requests)
                .unwrap_or(base.max_requests),
            window: args
                .window_secs
                .or(file.rate_limit.window_secs)
                .map(Duration::from_secs)
                .unwrap_or(base.window),
            block: args
                .block_secs
                .or(file.rate_limit.block_secs)
                .map(Duration::from_secs)
                .unwrap_or(base.block),
        };

        let data_dir = if args.ephemeral {
            None
        } else {
            args.data_dir
                .or(file.chat.data_dir)
                .or_else(default_data_dir)
        };

        Self {
            api_key: args.api_key.or(file.api.api_key).filter(|k| !k.is_empty()),
            model: args
                .model
                .or(file.api.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_base: args
                .api_base
                .or(file.api.api_base)
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            timeout: Duration::from_secs(
                args.timeout
                    .or(file.api.timeout_secs)
                    .unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
            policy,
            max_prompt_chars: args
                .max_prompt_chars
                .or(file.chat.max_prompt_chars)
                .unwrap_or(DEFAULT_MAX_PROMPT_CHARS),
            data_dir,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.policy.validate()?;
        if self.model.trim().is_empty() {
            return Err(ChatError::Config("model must not be empty".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(ChatError::Config("timeout must be at least 1 second".to_string()));
        }
        if self.max_prompt_chars == 0 {
            return Err(ChatError::Config(
                "max_prompt_chars must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("nekebot"))
}
