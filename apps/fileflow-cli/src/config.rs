//! CLI configuration.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/fileflow/config.toml`
//! - Windows: `%APPDATA%/fileflow/config.toml`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use fileflow_protocol::CapabilityDescriptor;
use fileflow_session::SessionConfig;

/// Which capability tier this device advertises.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighSpeed {
    /// High speed on machines with at least [`AUTO_MIN_CPUS`] CPUs.
    #[default]
    Auto,
    On,
    Off,
}

/// CPUs needed before `auto` picks the high-speed tier.
const AUTO_MIN_CPUS: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where received files are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default)]
    pub high_speed: HighSpeed,

    #[serde(default)]
    pub session: SessionConfig,
}

fn default_output_dir() -> PathBuf {
    home_dir().join("Downloads").join("FileFlow")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            high_speed: HighSpeed::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    /// Loads `path`, or the default location when `None`.
    ///
    /// A missing default file is created; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = path {
            let content = std::fs::read_to_string(path)?;
            return Ok(toml::from_str(&content)?);
        }

        let path = config_path();
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Config::default();
            config.save_to(&path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// The descriptor to advertise, from `high_speed`.
    pub fn capabilities(&self) -> CapabilityDescriptor {
        let fast = match self.high_speed {
            HighSpeed::On => true,
            HighSpeed::Off => false,
            HighSpeed::Auto => std::thread::available_parallelism()
                .is_ok_and(|n| n.get() >= AUTO_MIN_CPUS),
        };
        if fast {
            CapabilityDescriptor::high_speed()
        } else {
            CapabilityDescriptor::standard()
        }
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("fileflow").join("config.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        home_dir().join(".config").join("fileflow").join("config.toml")
    }
}

fn home_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    let var = "USERPROFILE";
    #[cfg(not(target_os = "windows"))]
    let var = "HOME";
    std::env::var(var).map_or_else(|_| std::env::temp_dir(), PathBuf::from)
}
