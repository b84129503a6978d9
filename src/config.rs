use clap::{Args, Parser};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Settings for the REST server. Every flag can also come from the environment.
#[derive(Parser, Debug, Clone)]
#[command(name = "tracker-server", version, about = "Contract, bill and EPBG tracker API")]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "TRACKER_BIND", default_value = "127.0.0.1:3000")]
    pub bind: SocketAddr,

    /// Directory holding the tables, renewals and users
    #[arg(long, env = "TRACKER_DATA_DIR", default_value = "database")]
    pub data_dir: PathBuf,

    /// Session lifetime in hours
    #[arg(long, env = "TRACKER_SESSION_HOURS", default_value_t = 24)]
    pub session_hours: u64,

    /// Admin account created on first start when no users exist
    #[arg(long, env = "TRACKER_ADMIN_USER")]
    pub admin_user: Option<String>,

    #[arg(long, env = "TRACKER_ADMIN_PASSWORD", hide_env_values = true)]
    pub admin_password: Option<String>,
}

impl ServerConfig {
    pub fn session_lifetime(&self) -> Duration {
        Duration::from_secs(self.session_hours * 60 * 60)
    }

    pub fn tables_dir(&self) -> PathBuf {
        self.data_dir.join("tables")
    }

    pub fn users_file(&self) -> PathBuf {
        self.data_dir.join("users.json")
    }
}

/// Where the command-line tool reads and writes tables.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Directory of the local table store
    #[arg(long, env = "TRACKER_DATA_DIR", default_value = "database")]
    pub data_dir: PathBuf,

    /// Tracker API root (e.g. http://127.0.0.1:3000/api); tried before the local store
    #[arg(long, env = "TRACKER_API_URL")]
    pub api_url: Option<String>,
}

impl StoreArgs {
    pub fn tables_dir(&self) -> PathBuf {
        self.data_dir.join("tables")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults() {
        let config = ServerConfig::parse_from(["tracker-server"]);
        assert_eq!(config.bind.port(), 3000);
        assert_eq!(config.session_lifetime(), Duration::from_secs(24 * 3600));
        assert!(config.users_file().ends_with("users.json"));
    }

    #[test]
    fn flags_override() {
        let config = ServerConfig::parse_from([
            "tracker-server",
            "--bind",
            "0.0.0.0:8080",
            "--session-hours",
            "2",
            "--data-dir",
            "/tmp/tracker",
        ]);
        assert_eq!(config.bind.port(), 8080);
        assert_eq!(config.session_lifetime(), Duration::from_secs(7200));
        assert_eq!(config.tables_dir(), PathBuf::from("/tmp/tracker/tables"));
    }
}
