//! Configuration management for annotation sync

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::annotations::Representation;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub sync: SyncConfig,
    pub plugins: PluginConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Documents exported concurrently
    pub workers: usize,
    /// Deadline for each connector call, in seconds
    pub io_timeout_secs: u64,
    /// Representation annotations are compared in when the two sides differ
    pub representation: Representation,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginConfig {
    /// Directories searched for plugin modules
    pub search_dirs: Vec<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            workers: 4,
            io_timeout_secs: 120,
            representation: Representation::default(),
        }
    }
}

impl SyncConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        PluginConfig {
            search_dirs: default_plugin_dirs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sync: SyncConfig::default(),
            plugins: PluginConfig::default(),
        }
    }
}

/// `<install dir>/plugins` and `~/.annotation_manager/plugins`
fn default_plugin_dirs() -> Vec<PathBuf> {
    let install_dir = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("plugins")));
    let user_dir = dirs::home_dir().map(|home| home.join(".annotation_manager").join("plugins"));

    install_dir.into_iter().chain(user_dir).collect()
}

impl Config {
    /// Read `ANNOTATION_SYNC_*` variables, falling back to defaults for
    /// anything unset or unparsable
    pub fn from_env() -> Self {
        let defaults = SyncConfig::default();

        let mut search_dirs = default_plugin_dirs();
        if let Ok(extra) = env::var("ANNOTATION_SYNC_PLUGIN_DIR") {
            search_dirs.extend(env::split_paths(&extra));
        }

        Config {
            sync: SyncConfig {
                workers: env::var("ANNOTATION_SYNC_WORKERS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .filter(|&w: &usize| w > 0)
                    .unwrap_or(defaults.workers),
                io_timeout_secs: env::var("ANNOTATION_SYNC_IO_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .filter(|&t: &u64| t > 0)
                    .unwrap_or(defaults.io_timeout_secs),
                representation: match env::var("ANNOTATION_SYNC_REPRESENTATION") {
                    Ok(value) => value.parse().unwrap_or_else(|e| {
                        tracing::warn!("{}, using {}", e, defaults.representation);
                        defaults.representation
                    }),
                    Err(_) => defaults.representation,
                },
            },
            plugins: PluginConfig { search_dirs },
        }
    }
}
