//! Configuration loading.
//!
//! The config file is TOML with one table per environment:
//!
//! ```toml
//! [development]
//! pub_endpoint = "tcp://127.0.0.1:19018"
//! sub_endpoint = "tcp://127.0.0.1:19019"
//! pidfile = "/tmp/nanomsg.pid"
//! maxprocs = 4
//! ```
//!
//! Every key falls back to its default on its own. A missing or unreadable
//! file is logged and the defaults are used; it never stops the daemon.

use config::{Config, ConfigError, File, FileFormat};
use serde::de::DeserializeOwned;
use sprelay_core::options::SocketOptions;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Environment variable selecting the config table.
pub const ENV_VAR: &str = "SPRELAY_ENV";
pub const DEFAULT_ENV: &str = "development";
pub const DEFAULT_CONFIG_PATH: &str = "./config.toml";
pub const DEFAULT_PUB_ENDPOINT: &str = "tcp://127.0.0.1:19018";
pub const DEFAULT_SUB_ENDPOINT: &str = "tcp://127.0.0.1:19019";
pub const DEFAULT_PIDFILE: &str = "/tmp/nanomsg.pid";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot load {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },
}

/// Resolved daemon settings. Built once at startup and passed down.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Environment (config table) the values came from
    pub env: String,
    pub pub_endpoint: String,
    pub sub_endpoint: String,
    pub pidfile: PathBuf,
    /// Parallelism hint, always >= 1
    pub maxprocs: usize,
    /// Transport tuning
    pub socket_options: SocketOptions,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env: DEFAULT_ENV.to_string(),
            pub_endpoint: DEFAULT_PUB_ENDPOINT.to_string(),
            sub_endpoint: DEFAULT_SUB_ENDPOINT.to_string(),
            pidfile: PathBuf::from(DEFAULT_PIDFILE),
            maxprocs: num_cpus::get().max(1),
            socket_options: SocketOptions::default(),
        }
    }
}

/// Environment name from `SPRELAY_ENV`, `development` when unset or empty.
pub fn environment_name() -> String {
    env::var(ENV_VAR)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_ENV.to_string())
}

/// Read and parse the config file.
pub fn read_config(path: &Path) -> Result<Config, SettingsError> {
    Config::builder()
        .add_source(File::from(path).format(FileFormat::Toml))
        .build()
        .map_err(|source| SettingsError::Load {
            path: path.to_path_buf(),
            source,
        })
}

impl Settings {
    /// Load settings for `env` from `path`.
    ///
    /// Never fails: a file that cannot be read leaves every key at its default.
    pub fn load(path: &Path, env: &str) -> Self {
        info!("Loading {} environment", env);
        info!("Loading the config file: {}", path.display());

        let settings = match read_config(path) {
            Ok(cfg) => Self::from_config(&cfg, env),
            Err(e) => {
                warn!("Got an unexpected error reading config: {}", e);
                Self {
                    env: env.to_string(),
                    ..Self::default()
                }
            }
        };

        settings.log_resolved();
        settings
    }

    /// Resolve every key of table `env` in an already parsed config.
    pub fn from_config(cfg: &Config, env: &str) -> Self {
        let defaults = Self::default();
        let mut opts = defaults.socket_options.clone();

        let pub_endpoint = non_empty(lookup::<String>(cfg, env, "pub_endpoint"))
            .unwrap_or(defaults.pub_endpoint);
        let sub_endpoint = non_empty(lookup::<String>(cfg, env, "sub_endpoint"))
            .unwrap_or(defaults.sub_endpoint);
        let pidfile = non_empty(lookup::<String>(cfg, env, "pidfile"))
            .map(PathBuf::from)
            .unwrap_or(defaults.pidfile);
        let maxprocs = resolve_maxprocs(lookup::<i64>(cfg, env, "maxprocs"));

        if let Some(hwm) = lookup::<i64>(cfg, env, "send_hwm") {
            opts = opts.with_send_hwm(clamp_count(hwm));
        }
        if let Some(hwm) = lookup::<i64>(cfg, env, "recv_hwm") {
            opts = opts.with_recv_hwm(clamp_count(hwm));
        }
        if let Some(max) = lookup::<i64>(cfg, env, "recv_max_size") {
            // 0 (or less) lifts the limit
            opts = opts.with_max_msg_size((max > 0).then(|| clamp_count(max)));
        }
        if let Some(ms) = lookup::<u64>(cfg, env, "handshake_timeout_ms") {
            opts = opts.with_handshake_timeout(Duration::from_millis(ms));
        }
        if let Some(size) = lookup::<i64>(cfg, env, "read_buffer_size") {
            opts = opts.with_read_buffer_size(clamp_count(size));
        }
        if let Some(nodelay) = lookup::<bool>(cfg, env, "tcp_nodelay") {
            opts = opts.with_tcp_nodelay(nodelay);
        }

        Self {
            env: env.to_string(),
            pub_endpoint,
            sub_endpoint,
            pidfile,
            maxprocs,
            socket_options: opts,
        }
    }

    fn log_resolved(&self) {
        info!("pub_endpoint {}", self.pub_endpoint);
        info!("sub_endpoint {}", self.sub_endpoint);
        info!("pidfile {}", self.pidfile.display());
        info!("maxprocs {}", self.maxprocs);
    }
}

/// `maxprocs`: absent -> processor count, below 1 -> 1.
pub fn resolve_maxprocs(raw: Option<i64>) -> usize {
    match raw {
        Some(n) => clamp_count(n),
        None => num_cpus::get().max(1),
    }
}

fn clamp_count(n: i64) -> usize {
    usize::try_from(n.max(1)).unwrap_or(usize::MAX)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Fetch `env.key`, treating a missing key as absent and a badly typed one
/// as absent with a warning.
fn lookup<T: DeserializeOwned>(cfg: &Config, env: &str, key: &str) -> Option<T> {
    let path = format!("{}.{}", env, key);
    match cfg.get::<T>(&path) {
        Ok(value) => Some(value),
        Err(ConfigError::NotFound(_)) => None,
        Err(e) => {
            warn!("Ignoring {}: {}", path, e);
            None
        }
    }
}
