//! Runtime configuration.
//!
//! Everything the supervisor and server need is passed in explicitly through
//! [`Config`]; nothing is read from process-wide state after startup.
//!
//! Environment variables (all optional):
//! - `CODEX_LISTENER_HOST` / `CODEX_LISTENER_PORT` - bind address (loopback by default)
//! - `CODEX_LISTENER_MAX_CONCURRENT` - admission ceiling
//! - `CODEX_LISTENER_MAX_COMPLETED` - archive capacity
//! - `CODEX_LISTENER_HOME` - state directory holding `config.json`
//! - `CODEX_BIN` - worker executable
//! - `CODEX_SESSIONS_DIR` - worker session logs (empty disables enrichment)

use anyhow::Context;
use std::path::PathBuf;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 19823;
pub const DEFAULT_MAX_CONCURRENT: usize = 4;
pub const DEFAULT_MAX_COMPLETED: usize = 50;

/// How to launch the worker executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Executable name or path
    pub binary: String,
    /// Arguments placed before the `exec` subcommand (e.g. `npx codex`)
    pub launcher_args: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            binary: "codex".to_string(),
            launcher_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Maximum number of pending + running tasks
    pub max_concurrent: usize,
    /// Maximum number of finished tasks kept in history
    pub max_completed: usize,
    pub worker: WorkerConfig,
    /// Root of the worker's `YYYY/MM/DD/rollout-*.jsonl` session logs
    pub sessions_dir: Option<PathBuf>,
    /// Directory for `config.json` (notification channels)
    pub state_dir: PathBuf,
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

impl Default for Config {
    fn default() -> Self {
        let home = home_dir();
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_completed: DEFAULT_MAX_COMPLETED,
            worker: WorkerConfig::default(),
            sessions_dir: Some(home.join(".codex").join("sessions")),
            state_dir: home.join(".codex-listener"),
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string())
}

fn parse_env<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_var(key).filter(|v| !v.is_empty()) {
        Some(raw) => {
            let value = raw
                .parse::<T>()
                .with_context(|| format!("Invalid value for {}: {:?}", key, raw))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

impl Config {
    /// Defaults overridden by environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(host) = env_var("CODEX_LISTENER_HOST").filter(|v| !v.is_empty()) {
            config.host = host;
        }
        if let Some(port) = parse_env("CODEX_LISTENER_PORT")? {
            config.port = port;
        }
        if let Some(max) = parse_env("CODEX_LISTENER_MAX_CONCURRENT")? {
            config.max_concurrent = max;
        }
        if let Some(max) = parse_env("CODEX_LISTENER_MAX_COMPLETED")? {
            config.max_completed = max;
        }
        if let Some(dir) = env_var("CODEX_LISTENER_HOME").filter(|v| !v.is_empty()) {
            config.state_dir = PathBuf::from(dir);
        }
        if let Some(bin) = env_var("CODEX_BIN").filter(|v| !v.is_empty()) {
            config.worker.binary = bin;
        }
        if let Some(dir) = env_var("CODEX_SESSIONS_DIR") {
            config.sessions_dir = if dir.is_empty() {
                None
            } else {
                Some(PathBuf::from(dir))
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent == 0 {
            anyhow::bail!("max_concurrent must be at least 1");
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.state_dir.join("config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind_addr(), "127.0.0.1:19823");
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.max_completed, 50);
        assert_eq!(config.worker.binary, "codex");
        assert!(config.settings_path().ends_with(".codex-listener/config.json"));
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let config = Config {
            max_concurrent: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
