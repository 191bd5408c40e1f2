//! Node Configuration Module
//!
//! Provides per-node configuration loaded from TOML files: antenna feed
//! endpoints, wallet key material, the package-encryption master key, the
//! local database path, and the operator API surface.
//!
//! ## Loading Order
//!
//! 1. `AEROVAULT_CONFIG` environment variable (path to TOML file)
//! 2. `aerovault.toml` in the current working directory
//! 3. Built-in defaults (these fail boot validation — a real deployment
//!    must configure at least one antenna and the master key)
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! // In main():
//! config::init(AppConfig::load());
//!
//! // Anywhere in the codebase:
//! let url = &config::get().antennas[0].url;
//! ```

mod app_config;

pub use app_config::*;

use std::sync::OnceLock;

/// Global node configuration, initialized once at startup.
static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Initialize the global node configuration.
///
/// Must be called exactly once before any calls to `get()`.
pub fn init(config: AppConfig) {
    if APP_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once — ignoring");
    }
}

/// Get a reference to the global node configuration.
///
/// Panics if `init()` has not been called. This is by design — a missing
/// config is a fatal startup error, not a recoverable condition.
pub fn get() -> &'static AppConfig {
    APP_CONFIG
        .get()
        .expect("config::get() called before config::init() — this is a startup bug")
}

/// Check whether the config has been initialized.
///
/// Useful for tests and optional config paths.
pub fn is_initialized() -> bool {
    APP_CONFIG.get().is_some()
}
