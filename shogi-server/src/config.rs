use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Server configuration, from command-line flags or `SHOGI_*` variables.
#[derive(Debug, Clone, Parser)]
#[command(name = "shogi-server", version, about = "CSA/x1 protocol shogi server")]
pub struct ServerConfig {
    /// Address to listen on.
    #[arg(long, env = "SHOGI_LISTEN_ADDR", default_value = "0.0.0.0:4081")]
    pub listen_addr: String,

    /// Seconds a new connection has to send its LOGIN line.
    #[arg(long, env = "SHOGI_LOGIN_TIMEOUT_SECS", default_value_t = 30)]
    pub login_timeout_secs: u64,

    /// Seconds to wait for a line before the read times out.
    #[arg(long, env = "SHOGI_READ_TIMEOUT_SECS", default_value_t = 60)]
    pub read_timeout_secs: u64,

    /// Read wait, in milliseconds, while deferred lines are pending.
    #[arg(long, env = "SHOGI_PENDING_POLL_MILLIS", default_value_t = 1000)]
    pub pending_poll_millis: u64,

    /// Seconds a single socket write may take before it is dropped.
    #[arg(long, env = "SHOGI_WRITE_TIMEOUT_SECS", default_value_t = 20)]
    pub write_timeout_secs: u64,

    /// Messages queued per connection before new ones are dropped.
    #[arg(long, env = "SHOGI_OUTBOX_CAPACITY", default_value_t = 4096)]
    pub outbox_capacity: usize,

    /// Byoyomi of the built-in relay engine, in seconds.
    #[arg(long, env = "SHOGI_MOVE_TIME_LIMIT_SECS", default_value_t = 60)]
    pub move_time_limit_secs: u64,

    /// TOML rating table to load at startup.
    #[arg(long, env = "SHOGI_RATINGS_FILE")]
    pub ratings_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:4081".to_string(),
            login_timeout_secs: 30,
            read_timeout_secs: 60,
            pending_poll_millis: 1000,
            write_timeout_secs: 20,
            outbox_capacity: 4096,
            move_time_limit_secs: 60,
            ratings_file: None,
        }
    }
}

impl ServerConfig {
    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn pending_poll(&self) -> Duration {
        Duration::from_millis(self.pending_poll_millis)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn move_time_limit(&self) -> Duration {
        Duration::from_secs(self.move_time_limit_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_defaults_match_default_impl() {
        let parsed = ServerConfig::parse_from(["shogi-server"]);
        let default = ServerConfig::default();
        assert_eq!(parsed.listen_addr, default.listen_addr);
        assert_eq!(parsed.read_timeout(), default.read_timeout());
        assert_eq!(parsed.pending_poll(), Duration::from_secs(1));
        assert_eq!(parsed.outbox_capacity, 4096);
        assert!(parsed.ratings_file.is_none());
    }

    #[test]
    fn flags_override_defaults() {
        let parsed = ServerConfig::parse_from([
            "shogi-server",
            "--listen-addr",
            "127.0.0.1:0",
            "--move-time-limit-secs",
            "10",
            "--ratings-file",
            "/tmp/ratings.toml",
        ]);
        assert_eq!(parsed.listen_addr, "127.0.0.1:0");
        assert_eq!(parsed.move_time_limit(), Duration::from_secs(10));
        assert_eq!(parsed.ratings_file, Some(PathBuf::from("/tmp/ratings.toml")));
    }
}
