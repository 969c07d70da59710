// Configuration management for the slotpost CLI
//
// Stored as JSON in:
// - Linux: ~/.config/slotpost/config.json
// - macOS: ~/Library/Application Support/slotpost/config.json
// - Windows: %APPDATA%\slotpost\config.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use slotpost_core::ContactPolicy;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Account directory (identity, contacts, mailbox)
    pub data_dir: Option<String>,

    /// Directory shared with the other accounts as the storage network
    pub network_dir: Option<String>,

    /// Seconds between driver cycles
    pub interval_secs: u64,

    /// Protocol timers and poll-ahead width
    pub policy: ContactPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            network_dir: None,
            interval_secs: 300,
            policy: ContactPolicy::default(),
        }
    }
}

impl Config {
    /// Default config file path (cross-platform)
    pub fn default_file() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("slotpost");
        Ok(dir.join("config.json"))
    }

    fn default_root() -> Result<PathBuf> {
        Ok(dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("slotpost"))
    }

    /// Load config from `path`, or create the default there
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(PathBuf::from(dir)),
            None => Ok(Self::default_root()?.join("account")),
        }
    }

    pub fn network_dir(&self) -> Result<PathBuf> {
        match &self.network_dir {
            Some(dir) => Ok(PathBuf::from(dir)),
            None => Ok(Self::default_root()?.join("network")),
        }
    }

    /// Set a config value
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let optional = |value: &str| {
            if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            }
        };
        match key {
            "data_dir" => self.data_dir = optional(value),
            "network_dir" => self.network_dir = optional(value),
            "interval_secs" => {
                let secs: u64 = value.parse().context("Invalid number of seconds")?;
                if secs == 0 {
                    anyhow::bail!("interval_secs must be at least 1");
                }
                self.interval_secs = secs;
            }
            "cts_wait_ms" => {
                self.policy.cts_wait_ms = value.parse().context("Invalid duration")?;
            }
            "retransmit_delay_ms" => {
                self.policy.retransmit_delay_ms = value.parse().context("Invalid duration")?;
            }
            "fail_delay_ms" => {
                self.policy.fail_delay_ms = value.parse().context("Invalid duration")?;
            }
            "poll_ahead" => {
                self.policy.poll_ahead = value.parse().context("Invalid number")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "data_dir" => self.data_dir.clone(),
            "network_dir" => self.network_dir.clone(),
            "interval_secs" => Some(self.interval_secs.to_string()),
            "cts_wait_ms" => Some(self.policy.cts_wait_ms.to_string()),
            "retransmit_delay_ms" => Some(self.policy.retransmit_delay_ms.to_string()),
            "fail_delay_ms" => Some(self.policy.fail_delay_ms.to_string()),
            "poll_ahead" => Some(self.policy.poll_ahead.to_string()),
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        let auto = |v: &Option<String>| v.clone().unwrap_or_else(|| "(auto)".to_string());
        vec![
            ("data_dir".to_string(), auto(&self.data_dir)),
            ("network_dir".to_string(), auto(&self.network_dir)),
            ("interval_secs".to_string(), self.interval_secs.to_string()),
            ("cts_wait_ms".to_string(), self.policy.cts_wait_ms.to_string()),
            ("retransmit_delay_ms".to_string(), self.policy.retransmit_delay_ms.to_string()),
            ("fail_delay_ms".to_string(), self.policy.fail_delay_ms.to_string()),
            ("poll_ahead".to_string(), self.policy.poll_ahead.to_string()),
        ]
    }
}
