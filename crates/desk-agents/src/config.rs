//! Pipeline runtime configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Environment variable overrides (`from_env()`, e.g. `DESK_MAX_DEBATE_ROUNDS`)
//! 2. Values from a TOML file (`from_toml_str()` / `from_file()`)
//! 3. Built-in defaults (`Default`)
//!
//! Orchestration knobs (timeouts, retries, fan-out) stay on the config;
//! per-run knobs (analysts, debate rounds, data mode) are copied into each
//! [`RunContext`] so concurrent runs can differ.

use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use desk_coordination::{AnalystKind, DataMode, RunContext, RunSettings};
use serde::{Deserialize, Serialize};

const DEFAULT_DEBATE_ROUNDS: u32 = 1;
const DEFAULT_RISK_ROUNDS: u32 = 1;
const DEFAULT_STAGE_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_JOIN_TIMEOUT_MS: u64 = 600_000;
const DEFAULT_RETRY_LIMIT: u32 = 2;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;
const DEFAULT_MEMORY_TOP_K: usize = 2;
const DEFAULT_LOOKBACK_DAYS: u32 = 7;
/// Upper bound on either debate; higher values are almost always typos.
const MAX_ROUNDS: u32 = 20;
/// Ten years of daily data is the widest analyst window.
const MAX_LOOKBACK_DAYS: u32 = 3_650;
/// Backoff doubling stops after this many retries.
const MAX_BACKOFF_DOUBLINGS: u32 = 6;

/// Environment-variable names for overrides.
const ENV_MAX_DEBATE_ROUNDS: &str = "DESK_MAX_DEBATE_ROUNDS";
const ENV_LEGACY_MAX_DEBATE_ROUNDS: &str = "MAX_DEBATE_ROUNDS";
const ENV_MAX_RISK_ROUNDS: &str = "DESK_MAX_RISK_ROUNDS";
const ENV_ANALYSTS: &str = "DESK_ANALYSTS";
const ENV_ONLINE_TOOLS: &str = "DESK_ONLINE_TOOLS";
const ENV_FAN_OUT: &str = "DESK_FAN_OUT";
const ENV_STAGE_TIMEOUT_MS: &str = "DESK_STAGE_TIMEOUT_MS";
const ENV_JOIN_TIMEOUT_MS: &str = "DESK_JOIN_TIMEOUT_MS";
const ENV_RETRY_LIMIT: &str = "DESK_RETRY_LIMIT";
const ENV_RETRY_BACKOFF_MS: &str = "DESK_RETRY_BACKOFF_MS";
const ENV_MEMORY_TOP_K: &str = "DESK_MEMORY_TOP_K";
const ENV_LOOKBACK_DAYS: &str = "DESK_LOOKBACK_DAYS";

/// How analyst stages are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanOutMode {
    /// All pending analysts run at once and join before the debate.
    #[default]
    Concurrent,
    /// Analysts run one after another in configured order.
    Sequential,
}

impl FromStr for FanOutMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "concurrent" | "parallel" => Ok(Self::Concurrent),
            "sequential" => Ok(Self::Sequential),
            other => Err(format!("unknown fan-out mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub analysts: Vec<AnalystKind>,
    pub max_debate_rounds: u32,
    pub max_risk_rounds: u32,
    pub data_mode: DataMode,
    pub fan_out: FanOutMode,
    /// Budget for one capability call.
    pub stage_timeout_ms: u64,
    /// Budget for the whole analyst fan-in, retries included.
    pub join_timeout_ms: u64,
    /// Retries after the first failed attempt of a stage.
    pub retry_limit: u32,
    /// Base of the exponential retry backoff.
    pub retry_backoff_ms: u64,
    /// Memories recalled per memory-aware stage.
    pub memory_top_k: usize,
    /// Days of history fetched for analyst stages.
    pub lookback_days: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            analysts: AnalystKind::ALL.to_vec(),
            max_debate_rounds: DEFAULT_DEBATE_ROUNDS,
            max_risk_rounds: DEFAULT_RISK_ROUNDS,
            data_mode: DataMode::Cached,
            fan_out: FanOutMode::Concurrent,
            stage_timeout_ms: DEFAULT_STAGE_TIMEOUT_MS,
            join_timeout_ms: DEFAULT_JOIN_TIMEOUT_MS,
            retry_limit: DEFAULT_RETRY_LIMIT,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            memory_top_k: DEFAULT_MEMORY_TOP_K,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
        }
    }
}

fn env_override<T: FromStr>(key: &str, current: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
                current
            }
        },
        Err(_) => current,
    }
}

/// Parse a comma-separated analyst list such as `market,news`.
pub fn parse_analysts(raw: &str) -> Result<Vec<AnalystKind>, String> {
    raw.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(AnalystKind::from_str)
        .collect()
}

impl PipelineConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply environment overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Self {
        self.max_debate_rounds = env_override(ENV_LEGACY_MAX_DEBATE_ROUNDS, self.max_debate_rounds);
        self.max_debate_rounds = env_override(ENV_MAX_DEBATE_ROUNDS, self.max_debate_rounds);
        self.max_risk_rounds = env_override(ENV_MAX_RISK_ROUNDS, self.max_risk_rounds);
        if let Ok(raw) = env::var(ENV_ANALYSTS) {
            match parse_analysts(&raw) {
                Ok(analysts) => self.analysts = analysts,
                Err(e) => tracing::warn!(key = ENV_ANALYSTS, error = %e, "ignoring analyst override"),
            }
        }
        if env_override(ENV_ONLINE_TOOLS, self.data_mode == DataMode::Live) {
            self.data_mode = DataMode::Live;
        } else {
            self.data_mode = DataMode::Cached;
        }
        self.fan_out = env_override(ENV_FAN_OUT, self.fan_out);
        self.stage_timeout_ms = env_override(ENV_STAGE_TIMEOUT_MS, self.stage_timeout_ms);
        self.join_timeout_ms = env_override(ENV_JOIN_TIMEOUT_MS, self.join_timeout_ms);
        self.retry_limit = env_override(ENV_RETRY_LIMIT, self.retry_limit);
        self.retry_backoff_ms = env_override(ENV_RETRY_BACKOFF_MS, self.retry_backoff_ms);
        self.memory_top_k = env_override(ENV_MEMORY_TOP_K, self.memory_top_k);
        self.lookback_days = env_override(ENV_LOOKBACK_DAYS, self.lookback_days);
        self
    }

    /// Parse and validate a TOML document. Missing keys take defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("failed to parse pipeline config")?;
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.run_settings().validate()?;
        if self.max_debate_rounds > MAX_ROUNDS {
            return Err(format!(
                "max_debate_rounds must be <= {MAX_ROUNDS}, got {}",
                self.max_debate_rounds
            ));
        }
        if self.max_risk_rounds > MAX_ROUNDS {
            return Err(format!(
                "max_risk_rounds must be <= {MAX_ROUNDS}, got {}",
                self.max_risk_rounds
            ));
        }
        if self.stage_timeout_ms == 0 {
            return Err("stage_timeout_ms must be > 0".to_string());
        }
        if self.join_timeout_ms < self.stage_timeout_ms {
            return Err(format!(
                "join_timeout_ms ({}) must be >= stage_timeout_ms ({})",
                self.join_timeout_ms, self.stage_timeout_ms
            ));
        }
        if self.memory_top_k == 0 {
            return Err("memory_top_k must be > 0".to_string());
        }
        if self.lookback_days > MAX_LOOKBACK_DAYS {
            return Err(format!(
                "lookback_days must be <= {MAX_LOOKBACK_DAYS}, got {}",
                self.lookback_days
            ));
        }
        Ok(())
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Delay before retry number `retry` (1-based): base, 2×base, 4×base, …
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let doublings = retry.saturating_sub(1).min(MAX_BACKOFF_DOUBLINGS);
        Duration::from_millis(self.retry_backoff_ms).saturating_mul(1 << doublings)
    }

    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            analysts: self.analysts.clone(),
            max_debate_rounds: self.max_debate_rounds,
            max_risk_rounds: self.max_risk_rounds,
            data_mode: self.data_mode,
        }
    }

    /// Fresh immutable context for one run.
    pub fn run_context(&self, subject: impl Into<String>, analysis_date: NaiveDate) -> RunContext {
        RunContext::new(subject, analysis_date, self.run_settings())
    }
}
