//! Runtime error types.

use thiserror::Error;

use belfry_framework::{PluginError, RegistryError};

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A rule or job was rejected at registration.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Plugin already loaded: {0}")]
    PluginExists(String),

    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    /// The plugin's load hook or one of its registrations failed.
    #[error("Failed to load plugin '{plugin}': {reason}")]
    PluginLoad { plugin: String, reason: String },

    /// `run` was called while the trigger loop was already consumed.
    #[error("Runtime is already running")]
    AlreadyRunning,
}

impl From<PluginError> for RuntimeError {
    fn from(e: PluginError) -> Self {
        match e {
            PluginError::AlreadyLoaded(name) => Self::PluginExists(name),
            PluginError::NotLoaded(name) => Self::PluginNotFound(name),
            PluginError::LoadHook { plugin, reason } => Self::PluginLoad { plugin, reason },
            PluginError::Registration { plugin, source } => Self::PluginLoad {
                plugin,
                reason: source.to_string(),
            },
        }
    }
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_errors_map_to_runtime_errors() {
        let err = RuntimeError::from(PluginError::AlreadyLoaded("greeter".into()));
        assert!(matches!(err, RuntimeError::PluginExists(ref n) if n == "greeter"));

        let err = RuntimeError::from(PluginError::Registration {
            plugin: "greeter".into(),
            source: RegistryError::DuplicateName("hello".into()),
        });
        match err {
            RuntimeError::PluginLoad { plugin, reason } => {
                assert_eq!(plugin, "greeter");
                assert!(reason.contains("hello"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
