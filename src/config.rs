// Configuration parsing for gpio-shutdown
// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::defaults;
use crate::debug;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Missing key: {0}")]
    MissingKey(String),
    #[error("Parse error for {0}: {1}")]
    ParseError(String, String),
    #[error("Invalid value for {0}: {1}")]
    Invalid(String, String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Prefix for environment overrides, e.g. GPIO_SHUTDOWN_PIN=17
pub const ENV_PREFIX: &str = "GPIO_SHUTDOWN_";

/// Keys understood by `MonitorConfig::from_config`
pub const KEYS: &[&str] = &[
    "pin",
    "idle_level",
    "poll_interval",
    "hold_duration",
    "halt_command",
    "sysfs_root",
    "sysfs_base",
    "bias",
    "log_file",
    "log_max_size",
    "log_keep",
    "dry_run",
];

/// Raw key/value configuration holder
#[derive(Debug, Clone, Default)]
pub struct Config {
    values: HashMap<String, String>,
}

impl Config {
    /// Load the config file (if present) and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env(|key| env::var(key).ok());
        Ok(config)
    }

    /// Parse a config file; a missing file yields an empty config
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => {
                debug!("Load: {}", path.display());
                Ok(Self {
                    values: Self::parse_config(&content),
                })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn parse_config(content: &str) -> HashMap<String, String> {
        let mut config = HashMap::new();

        for line in content.lines() {
            let line = line.trim();

            // Skip comments and empty lines
            if line.starts_with('#') || !line.contains('=') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().trim_matches('"');
                config.insert(key.trim().to_lowercase(), value.to_string());
            }
        }

        config
    }

    /// Apply GPIO_SHUTDOWN_<KEY> overrides using the given lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for key in KEYS {
            let var = format!("{}{}", ENV_PREFIX, key.to_uppercase());
            if let Some(value) = lookup(&var) {
                debug!("Override from {}", var);
                self.values.insert(key.to_string(), value);
            }
        }
    }

    /// Set a value explicitly (command line overrides)
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Get a string value
    pub fn get(&self, key: &str) -> Result<&str> {
        self.values
            .get(key)
            .map(|s| s.as_str())
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()))
    }

    /// Get value as specific type
    pub fn get_as<T: std::str::FromStr>(&self, key: &str) -> Result<T>
    where
        T::Err: std::fmt::Display,
    {
        let value = self.get(key)?;
        value
            .parse()
            .map_err(|e: T::Err| ConfigError::ParseError(key.to_string(), e.to_string()))
    }

    /// Get boolean value (yes/y/1/true = true)
    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| matches!(v.to_lowercase().as_str(), "yes" | "y" | "1" | "true"))
            .unwrap_or(false)
    }

    /// Get optional value
    pub fn get_opt(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    /// Get typed value, falling back to `default` only when the key is absent
    fn get_or<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T>
    where
        T::Err: std::fmt::Display,
    {
        match self.get_as(key) {
            Err(ConfigError::MissingKey(_)) => Ok(default),
            other => other,
        }
    }

    fn get_duration_or(&self, key: &str, default: Duration) -> Result<Duration> {
        match self.get_opt(key) {
            Some(value) => parse_duration(value)
                .ok_or_else(|| ConfigError::ParseError(key.to_string(), value.to_string())),
            None => Ok(default),
        }
    }
}

/// Logical level of the line when the button is not actuated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleLevel {
    Low,
    High,
}

impl IdleLevel {
    /// Raw sysfs value for this level
    pub fn raw(self) -> u8 {
        match self {
            IdleLevel::Low => 0,
            IdleLevel::High => 1,
        }
    }
}

impl std::str::FromStr for IdleLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" | "1" | "up" => Ok(IdleLevel::High),
            "low" | "0" | "down" => Ok(IdleLevel::Low),
            other => Err(format!("expected high or low, got '{}'", other)),
        }
    }
}

impl fmt::Display for IdleLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IdleLevel::Low => "low",
            IdleLevel::High => "high",
        })
    }
}

/// How the pull resistor toward the idle level is configured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bias {
    /// First available of pinctrl, raspi-gpio
    Auto,
    Pinctrl,
    RaspiGpio,
    /// External resistor or device tree overlay
    None,
}

impl std::str::FromStr for Bias {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Bias::Auto),
            "pinctrl" => Ok(Bias::Pinctrl),
            "raspi-gpio" | "raspi_gpio" => Ok(Bias::RaspiGpio),
            "none" | "off" | "external" => Ok(Bias::None),
            other => Err(format!("unknown bias tool '{}'", other)),
        }
    }
}

impl fmt::Display for Bias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Bias::Auto => "auto",
            Bias::Pinctrl => "pinctrl",
            Bias::RaspiGpio => "raspi-gpio",
            Bias::None => "none",
        })
    }
}

/// Immutable pin and timing configuration, fixed at process launch
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub pin: u32,
    pub idle_level: IdleLevel,
    /// Sampling cadence; doubles as the debounce window
    pub poll_interval: Duration,
    pub hold_duration: Duration,
    pub halt_command: Vec<String>,
    pub sysfs_root: PathBuf,
    /// Kernel line number offset; detected from gpiochip labels when unset
    pub sysfs_base: Option<u32>,
    pub bias: Bias,
    pub log_file: PathBuf,
    pub log_max_size: u64,
    pub log_keep: u32,
    pub dry_run: bool,
}

impl MonitorConfig {
    pub fn from_config(config: &Config) -> Result<Self> {
        let idle_level = config
            .get_opt("idle_level")
            .unwrap_or(defaults::IDLE_LEVEL)
            .parse()
            .map_err(|e| ConfigError::Invalid("idle_level".to_string(), e))?;

        let bias = config
            .get_opt("bias")
            .unwrap_or(defaults::BIAS)
            .parse()
            .map_err(|e| ConfigError::Invalid("bias".to_string(), e))?;

        let poll_interval = config.get_duration_or(
            "poll_interval",
            Duration::from_millis(defaults::POLL_INTERVAL_MS),
        )?;
        let hold_duration = config.get_duration_or(
            "hold_duration",
            Duration::from_millis(defaults::HOLD_DURATION_MS),
        )?;

        let halt_command: Vec<String> = config
            .get_opt("halt_command")
            .unwrap_or(defaults::HALT_COMMAND)
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let sysfs_base = match config.get_opt("sysfs_base") {
            Some(v) if !v.is_empty() && v != "auto" => Some(config.get_as("sysfs_base")?),
            _ => None,
        };

        let log_max_size = match config.get_opt("log_max_size") {
            Some(v) => parse_size(v)
                .ok_or_else(|| ConfigError::ParseError("log_max_size".to_string(), v.to_string()))?,
            None => defaults::LOG_MAX_SIZE,
        };

        let monitor = Self {
            pin: config.get_or("pin", defaults::PIN)?,
            idle_level,
            poll_interval,
            hold_duration,
            halt_command,
            sysfs_root: PathBuf::from(config.get_opt("sysfs_root").unwrap_or(defaults::SYSFS_ROOT)),
            sysfs_base,
            bias,
            log_file: PathBuf::from(config.get_opt("log_file").unwrap_or(defaults::LOG_FILE)),
            log_max_size,
            log_keep: config.get_or("log_keep", defaults::LOG_KEEP)?,
            dry_run: config.get_bool("dry_run"),
        };
        monitor.validate()?;
        Ok(monitor)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "poll_interval".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        if self.hold_duration < self.poll_interval {
            return Err(ConfigError::Invalid(
                "hold_duration".to_string(),
                format!(
                    "{:?} is shorter than poll_interval {:?}",
                    self.hold_duration, self.poll_interval
                ),
            ));
        }
        if self.halt_command.is_empty() {
            return Err(ConfigError::Invalid(
                "halt_command".to_string(),
                "must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Key/value view used by the `config` subcommand
    pub fn config_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("pin", self.pin.to_string()),
            ("idle_level", self.idle_level.to_string()),
            ("poll_interval", format_duration(self.poll_interval)),
            ("hold_duration", format_duration(self.hold_duration)),
            ("halt_command", self.halt_command.join(" ")),
            ("sysfs_root", self.sysfs_root.display().to_string()),
            (
                "sysfs_base",
                self.sysfs_base
                    .map(|b| b.to_string())
                    .unwrap_or_else(|| "auto".to_string()),
            ),
            ("bias", self.bias.to_string()),
            ("log_file", self.log_file.display().to_string()),
            ("log_max_size", self.log_max_size.to_string()),
            ("log_keep", self.log_keep.to_string()),
            ("dry_run", if self.dry_run { "yes" } else { "no" }.to_string()),
        ]
    }
}

/// Parse a duration: bare numbers are seconds ("2", "2.5"), or suffixed "2s", "100ms"
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim().to_lowercase();

    let (num, scale) = if let Some(n) = s.strip_suffix("ms") {
        (n, 0.001)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1.0)
    } else {
        (s.as_str(), 1.0)
    };

    let value: f64 = num.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(value * scale).ok()
}

fn format_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

/// Parse size string like "512K", "1M" or plain bytes
fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let split = s.char_indices().last().map_or(0, |(i, _)| i);
    let (num, suffix) = s.split_at(split);

    let multiplier = match suffix.to_uppercase().as_str() {
        "K" => 1024u64,
        "M" => 1024 * 1024,
        "G" => 1024 * 1024 * 1024,
        _ => return s.parse().ok(),
    };

    num.parse::<u64>().ok()?.checked_mul(multiplier)
}
