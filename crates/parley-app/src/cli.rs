//! CLI argument definitions for the Parley binary.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

/// Parley: talk to your commands in plain language.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Session store: a SQLite file path, or ":memory:".
    #[arg(short = 'd', long = "db")]
    pub db: Option<String>,

    /// Conversation session to resume. A fresh id is generated when omitted.
    #[arg(short = 's', long = "session")]
    pub session: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Handle a single utterance, print the reply, and exit.
    #[arg(long = "once", value_name = "UTTERANCE")]
    pub once: Option<String>,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > PARLEY_CONFIG env var > platform default (~/.parley/config.toml).
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("PARLEY_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the session store backend.
    ///
    /// Priority: --db flag > PARLEY_DB env var > config file value.
    pub fn resolve_db(&self, config_backend: &str) -> String {
        if let Some(ref db) = self.db {
            return db.clone();
        }
        if let Ok(db) = std::env::var("PARLEY_DB") {
            if !db.is_empty() {
                return db;
            }
        }
        config_backend.to_string()
    }

    /// Resolve the tracing filter directive.
    ///
    /// Priority: --log-level flag > RUST_LOG env var > config file value.
    pub fn resolve_log_filter(&self, config_level: &str) -> String {
        if let Some(ref level) = self.log_level {
            return level.clone();
        }
        match std::env::var("RUST_LOG") {
            Ok(filter) if !filter.is_empty() => filter,
            _ => config_level.to_string(),
        }
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".parley").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".parley").join("config.toml");
    }
    PathBuf::from("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_take_priority() {
        let args = CliArgs::parse_from([
            "parley",
            "--config",
            "/tmp/parley.toml",
            "--db",
            ":memory:",
            "--log-level",
            "debug",
        ]);
        assert_eq!(args.resolve_config_path(), PathBuf::from("/tmp/parley.toml"));
        assert_eq!(args.resolve_db("~/.parley/parley.db"), ":memory:");
        assert_eq!(args.resolve_log_filter("info"), "debug");
    }

    #[test]
    fn test_once_and_session() {
        let args = CliArgs::parse_from(["parley", "-s", "kitchen", "--once", "add 2 and 3"]);
        assert_eq!(args.session.as_deref(), Some("kitchen"));
        assert_eq!(args.once.as_deref(), Some("add 2 and 3"));
        assert!(args.db.is_none());
    }
}
