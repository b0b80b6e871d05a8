use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use serde::Deserialize;

use crate::model::MAX_PAGE_SIZE;

/// Command line options for the server.
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct Cli {
    /// Override bind address (host:port).
    #[arg(long)]
    pub bind: Option<String>,
    /// Override server port.
    #[arg(long)]
    pub port: Option<u16>,
    /// Enable or disable logging (true/false).
    #[arg(long)]
    pub logging: Option<bool>,
    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Runtime configuration for the server resolved from file, env and CLI.
#[derive(Clone, Debug)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind: String,
    /// Directory holding the database file.
    pub data_dir: PathBuf,
    /// Whether verbose logging is enabled.
    pub logging_enabled: bool,
    /// Page size used when a listing request does not name one.
    pub page_size: u32,
    /// Lifetime of issued bearer tokens.
    pub token_ttl_hours: i64,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    logging: FileLogging,
    #[serde(default)]
    storage: FileStorage,
    #[serde(default)]
    api: FileApi,
    #[serde(default)]
    auth: FileAuth,
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

#[derive(Deserialize, Default)]
struct FileStorage {
    data_dir: Option<PathBuf>,
}

#[derive(Deserialize)]
struct FileApi {
    #[serde(default = "default_page_size")]
    page_size: u32,
}

#[derive(Deserialize)]
struct FileAuth {
    #[serde(default = "default_token_ttl_hours")]
    token_ttl_hours: i64,
}

fn default_port() -> u16 {
    8788
}

fn default_logging() -> bool {
    true
}

fn default_page_size() -> u32 {
    10
}

fn default_token_ttl_hours() -> i64 {
    24
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

impl Default for FileApi {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

impl Default for FileAuth {
    fn default() -> Self {
        Self {
            token_ttl_hours: default_token_ttl_hours(),
        }
    }
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        // config file path precedence: CLI -> ENV -> default
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("TWEETBOX_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/tweetbox.toml"));

        let file_cfg: FileConfig = match fs::read(&config_path) {
            Ok(bytes) => {
                let contents = String::from_utf8_lossy(&bytes);
                toml::from_str(&contents).context("invalid config file")?
            }
            Err(_) => FileConfig::default(),
        };
        let mut port = file_cfg.server.port;
        let mut logging = file_cfg.logging.enabled;
        let mut page_size = file_cfg.api.page_size;
        let token_ttl_hours = file_cfg.auth.token_ttl_hours;

        // environment overrides
        if let Ok(p) = std::env::var("TWEETBOX_PORT") {
            if let Ok(p) = p.parse::<u16>() {
                port = p;
            }
        }
        if let Ok(l) = std::env::var("TWEETBOX_LOGGING") {
            if let Ok(l) = l.parse::<bool>() {
                logging = l;
            }
        }
        if let Ok(s) = std::env::var("TWEETBOX_PAGE_SIZE") {
            if let Ok(s) = s.parse::<u32>() {
                page_size = s;
            }
        }

        // CLI overrides
        if let Some(p) = cli.port {
            port = p;
        }
        if let Some(l) = cli.logging {
            logging = l;
        }

        if !(1024..=65535).contains(&port) {
            anyhow::bail!("invalid_port");
        }
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            anyhow::bail!("invalid_page_size");
        }
        if token_ttl_hours <= 0 {
            anyhow::bail!("invalid_token_ttl");
        }

        // bind address precedence for host override
        let bind = if let Some(b) = &cli.bind {
            b.clone()
        } else if let Ok(b) = std::env::var("BIND") {
            b
        } else {
            format!("127.0.0.1:{}", port)
        };

        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .ok()
            .or(file_cfg.storage.data_dir)
            .unwrap_or_else(default_data_dir);

        Ok(Self {
            bind,
            data_dir,
            logging_enabled: logging,
            page_size,
            token_ttl_hours,
        })
    }

    /// Location of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("tweetbox.db")
    }
}

/// Determine the default data directory.
pub fn default_data_dir() -> PathBuf {
    match ProjectDirs::from("org", "tweetbox", "tweetbox") {
        Some(proj) => proj.data_dir().to_path_buf(),
        None => PathBuf::from("./tweetbox_data"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    fn clear_env() {
        for key in [
            "TWEETBOX_PORT",
            "TWEETBOX_LOGGING",
            "TWEETBOX_PAGE_SIZE",
            "TWEETBOX_CONFIG",
            "BIND",
            "DATA_DIR",
        ] {
            std::env::remove_var(key);
        }
    }

    fn load_from(contents: &str) -> Result<Config> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(&path, contents).unwrap();
        let cli = Cli {
            config: Some(path),
            ..Default::default()
        };
        Config::load(&cli)
    }

    #[test]
    #[serial]
    fn valid_config_parses() {
        clear_env();
        let cfg = load_from(
            "[server]\nport=5555\n[logging]\nenabled=false\n[api]\npage_size=25\n[auth]\ntoken_ttl_hours=2\n[storage]\ndata_dir=\"/tmp/tb\"\n",
        )
        .unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:5555");
        assert!(!cfg.logging_enabled);
        assert_eq!(cfg.page_size, 25);
        assert_eq!(cfg.token_ttl_hours, 2);
        assert_eq!(cfg.database_path(), PathBuf::from("/tmp/tb/tweetbox.db"));
    }

    #[test]
    #[serial]
    fn invalid_values_fail() {
        clear_env();
        assert!(load_from("[server]\nport=80\n").is_err());
        assert!(load_from("[api]\npage_size=0\n").is_err());
        assert!(load_from("[api]\npage_size=500\n").is_err());
        assert!(load_from("[auth]\ntoken_ttl_hours=0\n").is_err());
        assert!(load_from("not toml at all = =").is_err());
    }

    #[test]
    #[serial]
    fn missing_keys_defaults() {
        clear_env();
        let cfg = load_from("").unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:8788");
        assert!(cfg.logging_enabled);
        assert_eq!(cfg.page_size, 10);
        assert_eq!(cfg.token_ttl_hours, 24);
        assert!(cfg.data_dir.to_string_lossy().contains("tweetbox"));
    }

    #[test]
    #[serial]
    fn precedence_cli_env_file() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(&path, "[server]\nport=1111\n[api]\npage_size=20\n").unwrap();
        std::env::set_var("TWEETBOX_PORT", "2222");
        std::env::set_var("TWEETBOX_PAGE_SIZE", "30");
        let cli = Cli {
            config: Some(path),
            port: Some(3333),
            ..Default::default()
        };
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:3333");
        assert_eq!(cfg.page_size, 30);
        clear_env();
    }

    #[test]
    #[serial]
    fn env_data_dir_wins_over_file() {
        clear_env();
        std::env::set_var("DATA_DIR", "/tmp/from-env");
        let cfg = load_from("[storage]\ndata_dir=\"/tmp/from-file\"\n").unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/from-env"));
        clear_env();
    }

    #[test]
    #[serial]
    fn logging_toggle() {
        clear_env();
        let cfg = load_from("[logging]\nenabled=false\n").unwrap();
        assert!(!cfg.logging_enabled);
        std::env::set_var("TWEETBOX_LOGGING", "true");
        let cfg = load_from("[logging]\nenabled=false\n").unwrap();
        assert!(cfg.logging_enabled);
        clear_env();
    }
}
