//! Configuration module for vcom-echo.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::responder::{EchoMode, LogFormat};

/// Command-line arguments for the virtual port
#[derive(Parser, Debug, Default)]
#[command(name = "vcom-echo")]
#[command(author = "vcom-echo authors")]
#[command(version = "0.1.0")]
#[command(about = "A pseudo-terminal backed virtual COM port that echoes what it receives", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Delay before each response, in milliseconds
    #[arg(short = 'd', long)]
    pub delay_ms: Option<u64>,

    /// Echo mode
    #[arg(short = 'm', long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Tag written before the payload in prefixed mode
    #[arg(short = 'p', long)]
    pub prefix: Option<String>,

    /// How received bytes are rendered in the log
    #[arg(short = 'f', long, value_enum)]
    pub log_format: Option<FormatArg>,

    /// Maximum number of bytes consumed by one read
    #[arg(short = 'b', long)]
    pub buffer_size: Option<usize>,

    /// Create a symlink at this path pointing to the slave device
    #[arg(long)]
    pub link: Option<PathBuf>,

    /// Keep the slave's default line discipline instead of raw mode
    #[arg(long)]
    pub no_raw: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Echo mode as named on the command line and in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModeArg {
    Raw,
    Prefixed,
}

/// Log format as named on the command line and in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FormatArg {
    Hex,
    Text,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub port: PortConfig,
    #[serde(default)]
    pub responder: ResponderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Pseudo-terminal related configuration
#[derive(Debug, Deserialize)]
pub struct PortConfig {
    /// Stable symlink to the slave device
    pub link: Option<PathBuf>,
    /// Put the slave in raw mode
    #[serde(default = "default_raw")]
    pub raw: bool,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            link: None,
            raw: default_raw(),
        }
    }
}

/// Echo responder configuration
#[derive(Debug, Deserialize)]
pub struct ResponderConfig {
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_mode")]
    pub mode: ModeArg,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_log_format")]
    pub log_format: FormatArg,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
            mode: default_mode(),
            prefix: default_prefix(),
            log_format: default_log_format(),
            buffer_size: default_buffer_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_raw() -> bool {
    true
}

fn default_delay_ms() -> u64 {
    100
}

fn default_mode() -> ModeArg {
    ModeArg::Raw
}

fn default_prefix() -> String {
    "Echo: ".to_string()
}

fn default_log_format() -> FormatArg {
    FormatArg::Hex
}

fn default_buffer_size() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub delay: Duration,
    pub mode: EchoMode,
    pub log_format: LogFormat,
    pub buffer_size: usize,
    pub link: Option<PathBuf>,
    pub raw: bool,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let responder = toml_config.responder;

        let prefix = cli.prefix.unwrap_or(responder.prefix);
        let mode = match cli.mode.unwrap_or(responder.mode) {
            ModeArg::Raw => EchoMode::Raw,
            ModeArg::Prefixed => EchoMode::Prefixed(prefix.into_bytes().into()),
        };
        let log_format = match cli.log_format.unwrap_or(responder.log_format) {
            FormatArg::Hex => LogFormat::Hex,
            FormatArg::Text => LogFormat::Text,
        };

        let buffer_size = cli.buffer_size.unwrap_or(responder.buffer_size);
        if buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be greater than 0"));
        }

        Ok(Config {
            delay: Duration::from_millis(cli.delay_ms.unwrap_or(responder.delay_ms)),
            mode,
            log_format,
            buffer_size,
            link: cli.link.or(toml_config.port.link),
            raw: !cli.no_raw && toml_config.port.raw,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli() -> CliArgs {
        CliArgs {
            log_level: "info".to_string(),
            ..CliArgs::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::merge(cli(), TomlConfig::default()).unwrap();
        assert_eq!(config.delay, Duration::from_millis(100));
        assert_eq!(config.mode, EchoMode::Raw);
        assert_eq!(config.log_format, LogFormat::Hex);
        assert_eq!(config.buffer_size, 1024);
        assert!(config.raw);
        assert!(config.link.is_none());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [port]
            link = "/tmp/vcom0"
            raw = false

            [responder]
            delay_ms = 1000
            mode = "prefixed"
            prefix = "Echo: "
            log_format = "text"
            buffer_size = 256

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.port.link, Some(PathBuf::from("/tmp/vcom0")));
        assert!(!config.port.raw);
        assert_eq!(config.responder.delay_ms, 1000);
        assert_eq!(config.responder.mode, ModeArg::Prefixed);
        assert_eq!(config.responder.log_format, FormatArg::Text);
        assert_eq!(config.responder.buffer_size, 256);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: TomlConfig = toml::from_str("[responder]\nmode = \"prefixed\"\n").unwrap();
        let config = Config::merge(cli(), config).unwrap();
        assert_eq!(config.mode, EchoMode::Prefixed("Echo: ".into()));
        assert_eq!(config.delay, Duration::from_millis(100));
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let result: Result<TomlConfig, _> = toml::from_str("[responder]\nmode = \"loud\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: TomlConfig = toml::from_str(
            r#"
            [responder]
            delay_ms = 1000
            mode = "raw"
            log_format = "text"

            [logging]
            level = "warn"
        "#,
        )
        .unwrap();

        let args = CliArgs {
            delay_ms: Some(5),
            mode: Some(ModeArg::Prefixed),
            prefix: Some("> ".to_string()),
            no_raw: true,
            log_level: "trace".to_string(),
            ..CliArgs::default()
        };

        let config = Config::merge(args, file).unwrap();
        assert_eq!(config.delay, Duration::from_millis(5));
        assert_eq!(config.mode, EchoMode::Prefixed("> ".into()));
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(!config.raw);
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_file_log_level_used_when_cli_default() {
        let file: TomlConfig = toml::from_str("[logging]\nlevel = \"warn\"\n").unwrap();
        let config = Config::merge(cli(), file).unwrap();
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_zero_buffer_size_rejected() {
        let args = CliArgs {
            buffer_size: Some(0),
            ..cli()
        };
        match Config::merge(args, TomlConfig::default()) {
            Err(ConfigError::Invalid(_)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_cli_parses_flags() {
        let args = CliArgs::try_parse_from([
            "vcom-echo",
            "-d",
            "250",
            "--mode",
            "prefixed",
            "--log-format",
            "text",
            "--link",
            "/tmp/vcom1",
            "--no-raw",
        ])
        .unwrap();
        assert_eq!(args.delay_ms, Some(250));
        assert_eq!(args.mode, Some(ModeArg::Prefixed));
        assert_eq!(args.log_format, Some(FormatArg::Text));
        assert_eq!(args.link, Some(PathBuf::from("/tmp/vcom1")));
        assert!(args.no_raw);
        assert_eq!(args.log_level, "info");
    }
}
