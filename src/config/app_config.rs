//! Node configuration — antenna feeds, wallet, encryption, database, API.
//!
//! Every deployment-specific value lives here as an operator-tunable TOML
//! field. Validation is strict: an unusable antenna list, a malformed
//! master key, or a missing wallet file aborts boot.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Alias that reaches the host network namespace from inside a container.
const HOST_GATEWAY_ALIAS: &str = "host.docker.internal";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a receiver-node deployment.
///
/// Load with `AppConfig::load()` which searches:
/// 1. `$AEROVAULT_CONFIG` env var
/// 2. `./aerovault.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// ADS-B feed endpoints to poll. At least one enabled antenna is required.
    #[serde(default)]
    pub antennas: Vec<AntennaConfig>,

    /// Archive-network wallet settings
    #[serde(default)]
    pub wallet: WalletConfig,

    /// Package-encryption settings
    #[serde(default)]
    pub data: DataConfig,

    /// Local database settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Operator authentication (used by the out-of-scope dashboard surface;
    /// the secret is still generated here so restarts keep sessions valid)
    #[serde(default)]
    pub auth: AuthConfig,

    /// Operator HTTP surface
    #[serde(default)]
    pub api: ApiConfig,

    /// Node identity published at registration
    #[serde(default)]
    pub node: NodeConfig,

    /// Archive gateway and key-share service endpoints
    #[serde(default)]
    pub services: ServicesConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            antennas: Vec::new(),
            wallet: WalletConfig::default(),
            data: DataConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            api: ApiConfig::default(),
            node: NodeConfig::default(),
            services: ServicesConfig::default(),
        }
    }
}

/// A single ADS-B receiver feed endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntennaConfig {
    /// Operator-assigned identifier (used in logs and archive tags)
    pub id: String,
    /// Full URL of the aircraft JSON feed (readsb `aircraft.json` shape)
    pub url: String,
    /// Disabled antennas are kept in config but never polled
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Archive-network wallet settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Filename of the JWK wallet inside the `keys/` directory
    #[serde(default)]
    pub private_key_name: String,
    /// Public key identifier, derived from the filename stem when empty
    #[serde(default)]
    pub public_key: String,
}

/// Package-encryption settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataConfig {
    /// Master encryption key as 64 hex characters (32 bytes)
    #[serde(default)]
    pub encryption_key: String,
}

/// Local database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Filesystem path of the SQLite database
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Operator authentication settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Session-signing secret; auto-generated when missing
    #[serde(default)]
    pub secret: String,
}

/// Operator HTTP surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// When false, every HTTP request is answered with 404 by a global guard
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Bind address for the HTTP surface
    #[serde(default = "default_api_addr")]
    pub addr: String,
    /// Port advertised in the node descriptor
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: default_api_addr(),
            port: default_api_port(),
        }
    }
}

/// Node identity published at self-registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Beast-protocol port advertised in the node descriptor
    #[serde(default = "default_beast_port")]
    pub beast_port: u16,
    /// Node role advertised in the descriptor
    #[serde(default = "default_node_type")]
    pub node_type: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            beast_port: default_beast_port(),
            node_type: default_node_type(),
        }
    }
}

/// External service endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    /// Archive-network gateway base URL
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    /// Key-share microservice base URL
    #[serde(default = "default_keyshare_url")]
    pub keyshare_url: String,
    /// Public IP lookup endpoint used during self-registration
    #[serde(default = "default_ip_lookup_url")]
    pub ip_lookup_url: String,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            keyshare_url: default_keyshare_url(),
            ip_lookup_url: default_ip_lookup_url(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_db_path() -> String {
    "./data/aerovault.db".to_string()
}

fn default_api_addr() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_api_port() -> u16 {
    8090
}

fn default_beast_port() -> u16 {
    30005
}

fn default_node_type() -> String {
    "receiver".to_string()
}

fn default_gateway_url() -> String {
    "https://arweave.net".to_string()
}

fn default_keyshare_url() -> String {
    "http://127.0.0.1:3100".to_string()
}

fn default_ip_lookup_url() -> String {
    "https://api.ipify.org?format=json".to_string()
}

// ============================================================================
// Loading & Validation
// ============================================================================

impl AppConfig {
    /// Load configuration using the standard search order:
    /// 1. `$AEROVAULT_CONFIG` environment variable
    /// 2. `./aerovault.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("AEROVAULT_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded node config from AEROVAULT_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from AEROVAULT_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "AEROVAULT_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from("aerovault.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded node config from ./aerovault.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./aerovault.toml, using defaults");
                }
            }
        }

        info!("No aerovault.toml found — using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e.to_string()))?;
        let mut config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.apply_environment_fixups();
        Ok(config)
    }

    /// Validate fatal preconditions and fill in derived fields.
    ///
    /// Errors here abort boot. The auth secret is the one field that
    /// self-heals — it is generated when absent.
    pub fn validate(&mut self, keys_dir: &Path) -> Result<(), ConfigError> {
        if !self.antennas.iter().any(|a| a.enabled) {
            return Err(ConfigError::NoAntennas);
        }
        for antenna in &self.antennas {
            if antenna.id.trim().is_empty() || antenna.url.trim().is_empty() {
                return Err(ConfigError::InvalidAntenna(antenna.id.clone()));
            }
        }

        let key = self.data.encryption_key.trim();
        if key.len() != 64 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ConfigError::BadMasterKey);
        }

        if self.wallet.private_key_name.trim().is_empty() {
            return Err(ConfigError::MissingWallet("<unset>".to_string()));
        }
        let wallet_path = keys_dir.join(&self.wallet.private_key_name);
        if !wallet_path.exists() {
            return Err(ConfigError::MissingWallet(
                wallet_path.display().to_string(),
            ));
        }
        if self.wallet.public_key.is_empty() {
            self.wallet.public_key = Path::new(&self.wallet.private_key_name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(&self.wallet.private_key_name)
                .to_string();
        }

        if self.auth.secret.trim().is_empty() {
            self.auth.secret = generate_secret();
            info!("auth.secret missing — generated a new session secret");
        }

        Ok(())
    }

    /// Absolute path of the wallet JWK file under the given keys directory.
    pub fn wallet_path(&self, keys_dir: &Path) -> PathBuf {
        keys_dir.join(&self.wallet.private_key_name)
    }

    /// Decode the master encryption key.
    ///
    /// Call only after `validate()`; the hex shape is already checked there.
    pub fn master_key(&self) -> Result<[u8; 32], ConfigError> {
        let bytes =
            hex::decode(self.data.encryption_key.trim()).map_err(|_| ConfigError::BadMasterKey)?;
        let mut key = [0u8; 32];
        if bytes.len() != 32 {
            return Err(ConfigError::BadMasterKey);
        }
        key.copy_from_slice(&bytes);
        Ok(key)
    }

    /// Rewrite loopback service URLs to the host-gateway alias when running
    /// inside a container, where `localhost` is the container itself.
    fn apply_environment_fixups(&mut self) {
        if !running_in_container() {
            return;
        }
        for antenna in &mut self.antennas {
            antenna.url = rewrite_loopback(&antenna.url);
        }
        self.services.gateway_url = rewrite_loopback(&self.services.gateway_url);
        self.services.keyshare_url = rewrite_loopback(&self.services.keyshare_url);
    }
}

/// Replace a loopback host in a URL with the container host-gateway alias.
fn rewrite_loopback(url: &str) -> String {
    let mut rewritten = url.to_string();
    for loopback in ["localhost", "127.0.0.1", "[::1]", "::1"] {
        if rewritten.contains(loopback) {
            rewritten = rewritten.replace(loopback, HOST_GATEWAY_ALIAS);
            info!(from = %url, to = %rewritten, "Rewrote loopback URL for container environment");
            break;
        }
    }
    rewritten
}

/// Detect a container environment (`/.dockerenv` or the `container` env var).
fn running_in_container() -> bool {
    Path::new("/.dockerenv").exists() || std::env::var_os("container").is_some()
}

/// Generate a random 32-byte hex session secret.
fn generate_secret() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    Io(String, String),
    #[error("TOML parse error: {0}")]
    Parse(String),
    #[error("no enabled antenna configured — at least one is required")]
    NoAntennas,
    #[error("antenna '{0}' has an empty id or url")]
    InvalidAntenna(String),
    #[error("data.encryption_key must be exactly 64 hex characters")]
    BadMasterKey,
    #[error("wallet file not found: {0}")]
    MissingWallet(String),
}
