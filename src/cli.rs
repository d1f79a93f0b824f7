//! Command-Line Interface (CLI) argument parsing.
//!
//! The flags parsed here are the last configuration layer: they are merged
//! over the TOML file and environment variables through `figment`.

use clap::Parser;
use figment::{
    value::{Dict, Map, Tag, Value},
    Error, Metadata, Profile, Provider,
};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Streams live incident events to authenticated WebSocket clients.
#[derive(Parser, Debug, Default, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address to accept WebSocket connections on.
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<SocketAddr>,

    /// Maximum number of incidents in a list/subscribe snapshot.
    #[arg(long, value_name = "COUNT")]
    pub snapshot_limit: Option<usize>,

    /// UTC offset used for users without their own, e.g. +02:00.
    #[arg(long, value_name = "OFFSET", allow_hyphen_values = true)]
    pub site_timezone: Option<String>,

    /// Log filter directive, e.g. `info` or `incidentcast=debug`.
    #[arg(long, value_name = "FILTER")]
    pub log_level: Option<String>,
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut server = Dict::new();
        if let Some(listen) = self.listen {
            server.insert("listen_address".into(), Value::from(listen.to_string()));
        }

        let mut sessions = Dict::new();
        if let Some(limit) = self.snapshot_limit {
            sessions.insert("snapshot_limit".into(), Value::from(limit));
        }

        let mut time = Dict::new();
        if let Some(offset) = &self.site_timezone {
            time.insert("site_timezone".into(), Value::from(offset.clone()));
        }

        let mut dict = Dict::new();
        for (section, values) in [("server", server), ("sessions", sessions), ("time", time)] {
            if !values.is_empty() {
                dict.insert(section.into(), Value::Dict(Tag::Default, values));
            }
        }
        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
