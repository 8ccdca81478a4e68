use std::{fs, path::PathBuf};

use crate::presence::PresencePolicy;
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::Parser;
use rand::RngCore;
use serde::Deserialize;

/// Command line options for the server.
#[derive(Parser, Debug, Default)]
#[command(name = "chathub", about = "Real-time messaging server")]
pub struct Cli {
    /// Full listen address, e.g. 0.0.0.0:8787. Wins over --port.
    #[arg(long)]
    pub bind: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    /// true for info-level logs, false for warnings only.
    #[arg(long)]
    pub logging: Option<bool>,
    /// TOML file; defaults to config/chathub.toml.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Directory holding the database and generated secrets.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

/// Effective settings after layering flags over env over the TOML file.
#[derive(Clone)]
pub struct Config {
    pub bind: String,
    /// Holds `chathub.db` and the generated token secret.
    pub data_dir: PathBuf,
    pub logging_enabled: bool,
    /// Token signing secret; generated and persisted when absent.
    pub jwt_secret: Option<String>,
    pub token_ttl_hours: i64,
    pub presence: PresencePolicy,
    pub history_default_limit: usize,
    pub history_max_limit: usize,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind", &self.bind)
            .field("data_dir", &self.data_dir)
            .field("logging_enabled", &self.logging_enabled)
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field("token_ttl_hours", &self.token_ttl_hours)
            .field("presence", &self.presence)
            .field("history_default_limit", &self.history_default_limit)
            .field("history_max_limit", &self.history_max_limit)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: format!("127.0.0.1:{}", default_port()),
            data_dir: default_data_dir(),
            logging_enabled: default_logging(),
            jwt_secret: None,
            token_ttl_hours: default_ttl_hours(),
            presence: PresencePolicy::default(),
            history_default_limit: default_history_limit(),
            history_max_limit: default_history_max(),
        }
    }
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    logging: FileLogging,
    #[serde(default)]
    auth: FileAuth,
    #[serde(default)]
    presence: FilePresence,
    #[serde(default)]
    history: FileHistory,
}

#[derive(Deserialize)]
struct FileServer {
    #[serde(default = "default_port")]
    port: u16,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

#[derive(Deserialize)]
struct FileAuth {
    #[serde(default)]
    jwt_secret: Option<String>,
    #[serde(default = "default_ttl_hours")]
    token_ttl_hours: i64,
}

#[derive(Deserialize, Default)]
struct FilePresence {
    #[serde(default)]
    policy: PresencePolicy,
}

#[derive(Deserialize)]
struct FileHistory {
    #[serde(default = "default_history_limit")]
    default_limit: usize,
    #[serde(default = "default_history_max")]
    max_limit: usize,
}

fn default_port() -> u16 {
    8787
}

fn default_logging() -> bool {
    true
}

fn default_ttl_hours() -> i64 {
    24
}

fn default_history_limit() -> usize {
    50
}

fn default_history_max() -> usize {
    200
}

impl Default for FileServer {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_logging(),
        }
    }
}

impl Default for FileAuth {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_ttl_hours: default_ttl_hours(),
        }
    }
}

impl Default for FileHistory {
    fn default() -> Self {
        Self {
            default_limit: default_history_limit(),
            max_limit: default_history_max(),
        }
    }
}

impl Config {
    /// Precedence per setting: CLI flag, then environment, then file, then default.
    /// A missing file is not an error; a malformed one is.
    pub fn load(cli: &Cli) -> Result<Self> {
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("CHATHUB_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/chathub.toml"));

        let file_cfg: FileConfig = match fs::read_to_string(&config_path) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("invalid config file {}", config_path.display()))?,
            Err(_) => FileConfig::default(),
        };
        let mut port = file_cfg.server.port;
        let mut logging = file_cfg.logging.enabled;
        let mut jwt_secret = file_cfg.auth.jwt_secret.filter(|s| !s.trim().is_empty());

        if let Some(p) = env_parsed::<u16>("CHATHUB_PORT") {
            port = p;
        }
        if let Some(l) = env_parsed::<bool>("CHATHUB_LOGGING") {
            logging = l;
        }
        if let Ok(s) = std::env::var("CHATHUB_JWT_SECRET") {
            if !s.trim().is_empty() {
                jwt_secret = Some(s);
            }
        }

        port = cli.port.unwrap_or(port);
        logging = cli.logging.unwrap_or(logging);

        if port < 1024 {
            anyhow::bail!("invalid_port");
        }
        if file_cfg.auth.token_ttl_hours <= 0 {
            anyhow::bail!("invalid_token_ttl");
        }
        let history_max_limit = file_cfg.history.max_limit.max(1);
        let history_default_limit = file_cfg.history.default_limit.clamp(1, history_max_limit);

        let bind = cli
            .bind
            .clone()
            .or_else(|| std::env::var("BIND").ok())
            .unwrap_or_else(|| format!("127.0.0.1:{port}"));

        let data_dir = cli
            .data_dir
            .clone()
            .or_else(|| std::env::var("DATA_DIR").ok().map(PathBuf::from))
            .unwrap_or_else(default_data_dir);

        Ok(Self {
            bind,
            data_dir,
            logging_enabled: logging,
            jwt_secret,
            token_ttl_hours: file_cfg.auth.token_ttl_hours,
            presence: file_cfg.presence.policy,
            history_default_limit,
            history_max_limit,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chathub.db")
    }

    /// Bytes of the token signing secret. Without a configured secret one is
    /// generated on first use and kept in `<data_dir>/jwt_secret`.
    pub fn signing_secret(&self) -> Result<Vec<u8>> {
        if let Some(s) = &self.jwt_secret {
            return Ok(s.as_bytes().to_vec());
        }
        let path = self.data_dir.join("jwt_secret");
        if let Ok(stored) = fs::read_to_string(&path) {
            let decoded = STANDARD
                .decode(stored.trim())
                .context("corrupt jwt_secret file")?;
            if !decoded.is_empty() {
                return Ok(decoded);
            }
        }
        let mut secret = vec![0u8; SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut secret);
        fs::create_dir_all(&self.data_dir).context("create data dir")?;
        fs::write(&path, STANDARD.encode(&secret)).context("persist jwt_secret")?;
        Ok(secret)
    }
}

const SECRET_LEN: usize = 32;

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

/// `$HOME/.local/share/chathub`, or `./chathub_data` without a home directory.
pub fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".local/share/chathub"))
        .unwrap_or_else(|| PathBuf::from("./chathub_data"))
}
