use std::path::PathBuf;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_FILTER: &str = "info,sqlx=warn";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_SESSION_FILE: &str = ".incident-tracker-session.json";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub session_file: PathBuf,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set to the school's Postgres instance")?;
        Self::from_parts(
            database_url,
            std::env::var("INCIDENT_TRACKER_MAX_CONNECTIONS").ok(),
            std::env::var("INCIDENT_TRACKER_SESSION_FILE").ok(),
        )
    }

    fn from_parts(
        database_url: String,
        max_connections: Option<String>,
        session_file: Option<String>,
    ) -> anyhow::Result<Self> {
        let max_connections = match max_connections {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("INCIDENT_TRACKER_MAX_CONNECTIONS is not a number: {raw}"))?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        Ok(Self {
            database_url,
            max_connections,
            session_file: PathBuf::from(
                session_file.unwrap_or_else(|| DEFAULT_SESSION_FILE.to_string()),
            ),
        })
    }
}

pub fn init_logging() {
    let filter = EnvFilter::try_from_env("INCIDENT_TRACKER_LOG")
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
