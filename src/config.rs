//! Configuration management

use std::{collections::HashMap, env, path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Policy store configuration
    pub rbac: RbacConfig,
    /// Sandbox filesystem configuration
    pub sandbox: SandboxConfig,
    /// Gadget runner configuration
    pub gadgets: GadgetConfig,
    /// Peer health monitoring configuration
    pub health_check: HealthCheckConfig,
    /// Peer (MCP server) descriptors
    pub peers: HashMap<String, PeerConfig>,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (GADGETD_ prefix)
        figment = figment.merge(Env::prefixed("GADGETD_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before env var expansion)
        config.load_env_files();

        // Expand ${VAR} in peer environment maps
        config.expand_env_vars();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_tilde(path_str);
            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in config values
    fn expand_env_vars(&mut self) {
        #[allow(clippy::unwrap_used)]
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();

        for peer in self.peers.values_mut() {
            for value in peer.environment.values_mut() {
                *value = Self::expand_string(&re, value);
            }
        }
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }

    /// Get enabled peers only
    pub fn enabled_peers(&self) -> impl Iterator<Item = (&String, &PeerConfig)> {
        self.peers.iter().filter(|(_, p)| p.enabled)
    }
}

/// Expand a leading `~` to the user's home directory
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.display().to_string(), 1);
        }
    }
    path.to_string()
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8815,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Token signing secret.
    /// Supports: literal value, `env:VAR_NAME`, or unset (a random secret is
    /// generated at startup and tokens do not survive restart).
    pub secret: Option<String>,
    /// Token issuer claim
    pub issuer: String,
    /// Token time-to-live
    #[serde(with = "humantime_serde")]
    pub token_ttl: Duration,
    /// User table: username -> credentials.
    /// When empty, well-known development defaults are seeded and a warning
    /// is logged on every startup.
    pub users: HashMap<String, UserConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: None,
            issuer: "gadgetd".to_string(),
            token_ttl: Duration::from_secs(24 * 60 * 60),
            users: HashMap::new(),
        }
    }
}

impl AuthConfig {
    /// Resolve the signing secret (expand `env:VAR`, generate when unset)
    #[must_use]
    pub fn resolve_secret(&self) -> String {
        match &self.secret {
            Some(secret) => {
                if let Some(var_name) = secret.strip_prefix("env:") {
                    env::var(var_name).unwrap_or_else(|_| secret.clone())
                } else {
                    secret.clone()
                }
            }
            None => {
                use rand::RngExt;
                tracing::warn!(
                    "No auth.secret configured - generated a random secret; \
                     issued tokens will not survive a restart"
                );
                let random_bytes: [u8; 32] = rand::rng().random();
                base64::Engine::encode(
                    &base64::engine::general_purpose::URL_SAFE_NO_PAD,
                    random_bytes,
                )
            }
        }
    }
}

/// A single configured user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    /// Password, either plaintext or `sha256:<hex-digest>`
    pub password: String,
    /// Display name shown in tokens and the UI
    #[serde(default)]
    pub display_name: String,
}

/// Policy store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RbacConfig {
    /// Path of the persistent policy store (JSON document)
    pub store_path: PathBuf,
}

impl Default for RbacConfig {
    fn default() -> Self {
        let store_path = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".gadgetd")
            .join("policy.json");
        Self { store_path }
    }
}

/// Sandbox filesystem configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Allowed base roots (absolute paths); operations must stay inside one
    pub base_roots: Vec<PathBuf>,
    /// Paths denied even inside a base root
    pub deny_list: Vec<PathBuf>,
    /// Allowed file extensions, lowercase, without dot. Empty means any.
    pub allowed_extensions: Vec<String>,
    /// Maximum file size in bytes. Zero means unbounded.
    pub max_file_size: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            base_roots: vec![PathBuf::from("/tmp")],
            deny_list: Vec::new(),
            allowed_extensions: vec![
                "txt", "md", "json", "yaml", "yml", "toml", "csv", "log", "xml", "html",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            max_file_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Gadget runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GadgetConfig {
    /// Path of the shared gadget launcher binary
    pub binary: PathBuf,
    /// Wall-clock timeout per execution
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Gadget names that additionally require the (system, manage) permission
    pub system_gadgets: Vec<String>,
}

impl Default for GadgetConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("gadget"),
            timeout: Duration::from_secs(30),
            system_gadgets: vec![
                "sysinfo".to_string(),
                "network-scanner".to_string(),
                "process".to_string(),
                "hardware".to_string(),
            ],
        }
    }
}

/// Peer health monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable the periodic health monitor
    pub enabled: bool,
    /// Scan interval
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Reconnect attempt bound per scan
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Peer (MCP server) descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Human-readable description
    pub description: String,
    /// Whether this peer may be connected at all
    pub enabled: bool,
    /// Connect at startup and on health-monitor reconnect
    pub auto_start: bool,
    /// Transport to reach the peer
    pub transport: PeerTransportConfig,
    /// Per-call timeout for requests to this peer
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Dial attempts before giving up on connect
    pub retry_count: u32,
    /// Delay between dial attempts
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    /// Environment variables for stdio peers (`${VAR}` expanded)
    pub environment: HashMap<String, String>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            description: String::new(),
            enabled: true,
            auto_start: false,
            transport: PeerTransportConfig::default(),
            timeout: Duration::from_secs(30),
            retry_count: 1,
            retry_delay: Duration::from_secs(1),
            environment: HashMap::new(),
        }
    }
}

/// Peer transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PeerTransportConfig {
    /// Child process speaking newline-delimited JSON on stdio
    Stdio {
        /// Command to execute (program followed by arguments)
        command: String,
        /// Working directory
        #[serde(default)]
        cwd: Option<String>,
    },
    /// TCP stream socket
    Tcp {
        /// Address to dial, e.g. `127.0.0.1:9200`
        address: String,
    },
    /// Unix domain stream socket
    Unix {
        /// Socket path
        path: String,
    },
}

impl Default for PeerTransportConfig {
    fn default() -> Self {
        Self::Stdio {
            command: String::new(),
            cwd: None,
        }
    }
}

impl PeerTransportConfig {
    /// Get transport type name
    #[must_use]
    pub fn transport_type(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Tcp { .. } => "tcp",
            Self::Unix { .. } => "unix",
        }
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Ok(secs) = s.parse::<u64>() {
            return Ok(Duration::from_secs(secs));
        }
        if let Some(ms) = s.strip_suffix("ms") {
            let v: u64 = ms.trim().parse().map_err(|e| format!("bad duration: {e}"))?;
            return Ok(Duration::from_millis(v));
        }
        if let Some(secs) = s.strip_suffix('s') {
            let v: u64 = secs
                .trim()
                .parse()
                .map_err(|e| format!("bad duration: {e}"))?;
            return Ok(Duration::from_secs(v));
        }
        if let Some(mins) = s.strip_suffix('m') {
            let v: u64 = mins
                .trim()
                .parse()
                .map_err(|e| format!("bad duration: {e}"))?;
            return Ok(Duration::from_secs(v * 60));
        }
        if let Some(hours) = s.strip_suffix('h') {
            let v: u64 = hours
                .trim()
                .parse()
                .map_err(|e| format!("bad duration: {e}"))?;
            return Ok(Duration::from_secs(v * 3600));
        }
        Err(format!("unrecognized duration: {s}"))
    }

}
