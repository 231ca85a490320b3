//! Configuration loader using figment.
//!
//! # Configuration Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Programmatic values passed to [`ConfigLoader::merge`]
//! 3. Config file (`belfry.toml` / `config.toml`, or an explicit [`ConfigLoader::file`])
//! 4. Environment variables (`BELFRY_*`)
//!
//! # Environment Variable Mapping
//!
//! Variables use the `BELFRY_` prefix with `__` as the nesting separator:
//!
//! - `BELFRY_CORE__NICK=bell` → `core.nick = "bell"`
//! - `BELFRY_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `BELFRY_RULES__PING__PRIORITY=high` → `rules.ping.priority = "high"`
//!
//! # Example
//!
//! ```rust,ignore
//! use belfry_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .file("./config/belfry.toml")
//!     .with_env()
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(feature = "toml-config")]
use figment::providers::{Format, Toml};
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::BelfryConfig;

/// File names searched for in each search path, in order.
#[cfg(feature = "toml-config")]
const CONFIG_FILE_NAMES: &[&str] = &["belfry.toml", "config.toml"];

/// Configuration loader with figment-based multi-source support.
pub struct ConfigLoader {
    figment: Figment,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    /// Specific config file to load (overrides search).
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    /// Adds a search path for configuration files.
    ///
    /// When no search path is given, the current directory and the user's
    /// `belfry` config directory are searched.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn with_current_dir(self) -> Self {
        if let Ok(cwd) = std::env::current_dir() {
            self.search_path(cwd)
        } else {
            self
        }
    }

    pub fn with_user_config_dir(self) -> Self {
        if let Some(config_dir) = dirs::config_dir() {
            self.search_path(config_dir.join("belfry"))
        } else {
            self
        }
    }

    /// Sets a specific configuration file to load.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Enables loading environment variables (default: true).
    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges configuration values programmatically, below files and env.
    pub fn merge(mut self, config: BelfryConfig) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(config));
        self
    }

    /// Loads and returns the configuration.
    pub fn load(self) -> ConfigResult<BelfryConfig> {
        let figment = self.build_figment()?;

        let config: BelfryConfig = figment.extract().map_err(|e| {
            ConfigError::ParseError(format!("Failed to extract configuration: {e}"))
        })?;

        debug!(
            nick = %config.core.nick,
            rules = config.rules.len(),
            jobs = config.jobs.len(),
            logging_level = %config.logging.level,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    fn build_figment(mut self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(BelfryConfig::default()));

        let user_figment = std::mem::take(&mut self.figment);
        figment = figment.merge(user_figment);

        if let Some(path) = self.config_file.take() {
            if path.exists() {
                info!(path = %path.display(), "Loading configuration file");
                figment = Self::merge_config_file(figment, &path)?;
            } else {
                return Err(ConfigError::FileNotFound(path));
            }
        } else {
            figment = self.load_config_files(figment);
        }

        if self.load_env {
            trace!("Loading environment variables with BELFRY_ prefix");
            figment = figment.merge(Env::prefixed("BELFRY_").split("__"));
        }

        Ok(figment)
    }

    /// Merges a single config file, dispatching on its extension.
    fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            _ => Err(ConfigError::ParseError(format!(
                "Unsupported or disabled configuration file format: .{ext}"
            ))),
        }
    }

    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if self.search_paths.is_empty() {
            let mut paths = Vec::new();
            if let Ok(cwd) = std::env::current_dir() {
                paths.push(cwd);
            }
            if let Some(config_dir) = dirs::config_dir() {
                paths.push(config_dir.join("belfry"));
            }
            paths
        } else {
            self.search_paths.clone()
        }
    }

    /// Merges the first config file found in the search paths.
    #[cfg(feature = "toml-config")]
    fn load_config_files(&self, figment: Figment) -> Figment {
        for search_path in self.resolve_search_paths() {
            for name in CONFIG_FILE_NAMES {
                let path = search_path.join(name);
                if path.exists() {
                    info!(path = %path.display(), "Loading configuration file");
                    return figment.merge(Toml::file(path));
                }
            }
        }
        warn!("No configuration file found, using defaults");
        figment
    }

    #[cfg(not(feature = "toml-config"))]
    fn load_config_files(&self, figment: Figment) -> Figment {
        debug!(
            paths = self.resolve_search_paths().len(),
            "No configuration file format enabled, using defaults"
        );
        figment
    }
}

/// Loads configuration from the default locations and the environment.
pub fn load_config() -> ConfigResult<BelfryConfig> {
    ConfigLoader::new().load()
}

/// Loads configuration from `path`, with environment overrides.
pub fn load_config_from_file(path: impl AsRef<Path>) -> ConfigResult<BelfryConfig> {
    ConfigLoader::new().file(path).load()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{LogLevel, RateLimitConfig};
    use belfry_framework::{ExecutionMode, Priority, RateLimitScope};
    use figment::Jail;

    #[test]
    fn test_defaults_without_files() {
        Jail::expect_with(|jail| {
            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config.core.nick, "Belfry");
            assert_eq!(config.logging.level, LogLevel::Info);
            Ok(())
        });
    }

    #[test]
    fn test_file_in_search_path() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "belfry.toml",
                r#"
                [core]
                nick = "bell"
                alias_nicks = ["bb"]

                [rules.ping]
                priority = "high"
                mode = "exclusive"
                rate_limits = [{ limit = 2, window_secs = 30, scope = "actor" }]

                [jobs.heartbeat]
                interval_secs = 15

                [plugins.greeter]
                greeting = "hey"
                "#,
            )?;

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.core.nick, "bell");
            assert_eq!(config.core.alias_nicks, vec!["bb".to_string()]);
            let ping = &config.rules["ping"];
            assert_eq!(ping.priority, Some(Priority::High));
            assert_eq!(ping.mode, Some(ExecutionMode::Exclusive));
            assert_eq!(
                ping.rate_limits,
                Some(vec![RateLimitConfig {
                    limit: 2,
                    window_secs: 30,
                    scope: RateLimitScope::Actor,
                }])
            );
            assert_eq!(config.jobs["heartbeat"].interval_secs, Some(15));
            assert_eq!(config.plugins["greeter"]["greeting"], "hey");
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("belfry.toml", "[core]\nnick = \"bell\"\n")?;
            jail.set_env("BELFRY_CORE__NICK", "clapper");
            jail.set_env("BELFRY_DISPATCH__DEFAULT_TIMEOUT_SECS", "5");

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.core.nick, "clapper");
            assert_eq!(config.dispatch.default_timeout_secs, 5);
            Ok(())
        });
    }

    #[test]
    fn test_merge_sits_below_file() {
        Jail::expect_with(|jail| {
            jail.create_file("belfry.toml", "[dispatch]\ntrigger_queue = 8\n")?;

            let mut base = BelfryConfig::default();
            base.core.nick = "merged".into();
            base.dispatch.trigger_queue = 64;

            let config = ConfigLoader::new()
                .merge(base)
                .search_path(jail.directory())
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.core.nick, "merged");
            assert_eq!(config.dispatch.trigger_queue, 8);
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file() {
        let result = ConfigLoader::new()
            .file("/definitely/not/here/belfry.toml")
            .without_env()
            .load();
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_unsupported_extension() {
        Jail::expect_with(|jail| {
            jail.create_file("belfry.ini", "nick = bell")?;
            let result = ConfigLoader::new()
                .file(jail.directory().join("belfry.ini"))
                .without_env()
                .load();
            assert!(matches!(result, Err(ConfigError::ParseError(_))));
            Ok(())
        });
    }
}
