//! Configuration for the dap-debug MCP server
//!
//! Values come from an optional TOML file and are then overridden by whatever
//! command line flags were given.

use std::path::PathBuf;

use clap::Parser;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{DebugError, Result};

/// Line Delve prints once its DAP listener is up
pub const DEFAULT_READINESS_PATTERN: &str = "^DAP server listening at";

/// Command line arguments
#[derive(Parser, Debug, Default)]
#[command(name = "dap-debug")]
#[command(about = "MCP server for debugging Go programs through Delve's DAP server")]
#[command(version)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to dlv binary (defaults to searching PATH)
    #[arg(long, env = "DLV_PATH")]
    pub dlv_path: Option<PathBuf>,

    /// Default port for the DAP server
    #[arg(long)]
    pub port: Option<u16>,

    /// Timeout for a single DAP request in seconds
    #[arg(long)]
    pub request_timeout: Option<u64>,

    /// Time to wait for the adapter to report readiness in seconds
    #[arg(long)]
    pub readiness_timeout: Option<u64>,

    /// Bound on continue/step waits in seconds (unbounded when omitted)
    #[arg(long)]
    pub resume_timeout: Option<u64>,

    /// Default number of stack frames in a snapshot
    #[arg(long)]
    pub max_frames: Option<i64>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log file path (defaults to stderr)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Generate default configuration file
    #[arg(long)]
    pub generate_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub validate_config: bool,

    /// Show current configuration and exit
    #[arg(long)]
    pub show_config: bool,
}

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub adapter: AdapterConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file or create default
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            let content = std::fs::read_to_string(path)
                .map_err(|e| DebugError::InvalidConfig(format!("Failed to read config file: {}", e)))?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| DebugError::InvalidConfig(format!("Invalid TOML syntax: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Merge command line arguments into configuration
    pub fn merge_args(&mut self, args: &Args) {
        if let Some(path) = &args.dlv_path {
            self.adapter.dlv_path = Some(path.clone());
        }
        if let Some(port) = args.port {
            self.adapter.default_port = port;
        }
        if let Some(secs) = args.readiness_timeout {
            self.adapter.readiness_timeout_secs = secs;
        }
        if let Some(secs) = args.request_timeout {
            self.session.request_timeout_secs = secs;
        }
        if let Some(secs) = args.resume_timeout {
            self.session.resume_timeout_secs = Some(secs);
        }
        if let Some(frames) = args.max_frames {
            self.session.default_max_frames = frames;
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if let Some(file) = &args.log_file {
            self.logging.file = Some(file.clone());
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.adapter.default_port == 0 {
            return Err(DebugError::InvalidConfig("adapter.default_port must be > 0".to_string()));
        }
        if self.adapter.readiness_timeout_secs == 0 {
            return Err(DebugError::InvalidConfig("adapter.readiness_timeout_secs must be > 0".to_string()));
        }
        if self.adapter.connect_timeout_ms == 0 {
            return Err(DebugError::InvalidConfig("adapter.connect_timeout_ms must be > 0".to_string()));
        }
        Regex::new(&self.adapter.readiness_pattern).map_err(|e| {
            DebugError::InvalidConfig(format!("adapter.readiness_pattern is not a valid regex: {}", e))
        })?;
        if self.session.request_timeout_secs == 0 {
            return Err(DebugError::InvalidConfig("session.request_timeout_secs must be > 0".to_string()));
        }
        if self.session.resume_timeout_secs == Some(0) {
            return Err(DebugError::InvalidConfig("session.resume_timeout_secs must be > 0 when set".to_string()));
        }
        if self.session.default_max_frames <= 0 {
            return Err(DebugError::InvalidConfig("session.default_max_frames must be > 0".to_string()));
        }
        if self.session.default_disassemble_count <= 0 {
            return Err(DebugError::InvalidConfig("session.default_disassemble_count must be > 0".to_string()));
        }
        if self.session.eval_context.trim().is_empty() {
            return Err(DebugError::InvalidConfig("session.eval_context must not be empty".to_string()));
        }
        Ok(())
    }

    /// Generate TOML configuration string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| DebugError::InvalidConfig(format!("Failed to serialize config: {}", e)))
    }

    /// Find dlv binary path: config, then PATH
    pub fn find_dlv(&self) -> Result<PathBuf> {
        if let Some(path) = &self.adapter.dlv_path {
            if path.exists() {
                return Ok(path.clone());
            }
            return Err(DebugError::InvalidConfig(format!(
                "Configured dlv path does not exist: {}",
                path.display()
            )));
        }

        which("dlv").ok_or_else(|| {
            DebugError::InvalidConfig(
                "dlv not found. Install via: go install github.com/go-delve/delve/cmd/dlv@latest".to_string(),
            )
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AdapterConfig {
    pub dlv_path: Option<PathBuf>,
    pub default_port: u16,
    pub readiness_pattern: String,
    pub readiness_timeout_secs: u64,
    pub connect_timeout_ms: u64,
    /// Extra arguments appended after `dap --listen <addr>`
    pub extra_args: Vec<String>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            dlv_path: None,
            default_port: 9090,
            readiness_pattern: DEFAULT_READINESS_PATTERN.to_string(),
            readiness_timeout_secs: 10,
            connect_timeout_ms: 5000,
            extra_args: vec![],
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub request_timeout_secs: u64,
    pub resume_timeout_secs: Option<u64>,
    pub default_max_frames: i64,
    pub default_thread_id: i64,
    pub eval_context: String,
    pub default_disassemble_count: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            resume_timeout_secs: None,
            default_max_frames: 20,
            default_thread_id: 1,
            eval_context: "repl".to_string(),
            default_disassemble_count: 20,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Find an executable on PATH
fn which(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
