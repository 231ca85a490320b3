//! Error types for the Belfry framework.

use thiserror::Error;

pub use belfry_core::{ExtractError, ExtractResult, RegistryError, RegistryResult};

/// Errors raised by the plugin lifecycle.
#[derive(Debug, Error)]
pub enum PluginError {
    /// A plugin with this name is already loaded.
    #[error("plugin '{0}' is already loaded")]
    AlreadyLoaded(String),

    /// No plugin with this name is loaded.
    #[error("plugin '{0}' is not loaded")]
    NotLoaded(String),

    /// The plugin's `on_load` hook returned an error.
    #[error("plugin '{plugin}' failed to load: {reason}")]
    LoadHook {
        /// Plugin name.
        plugin: String,
        /// Error reported by the hook.
        reason: String,
    },

    /// One of the plugin's rules or jobs was rejected.
    #[error("plugin '{plugin}': {source}")]
    Registration {
        /// Plugin name.
        plugin: String,
        /// The rejected registration.
        #[source]
        source: RegistryError,
    },
}
