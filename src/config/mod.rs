//! Application configuration management

use std::env;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,

    /// SQLite database path
    pub database_path: String,

    /// Library root for series destinations
    pub series_root: String,

    /// Library root for movie destinations
    pub movies_root: String,

    /// Transmission RPC endpoint, e.g. https://host:443
    pub transmission_url: String,

    /// Optional RPC credentials
    pub transmission_username: Option<String>,
    pub transmission_password: Option<String>,

    /// Pending finalize jobs before completion requests get refused
    pub finalize_queue_capacity: usize,

    /// Concurrent background copies
    pub finalize_max_concurrent: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .context("Invalid PORT")?,

            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "./data/stagehand.db".to_string()),

            series_root: env::var("SERIES_ROOT").context("SERIES_ROOT is required")?,

            movies_root: env::var("MOVIES_ROOT").context("MOVIES_ROOT is required")?,

            transmission_url: env::var("TRANSMISSION_URL")
                .context("TRANSMISSION_URL is required")?,

            transmission_username: env::var("TRANSMISSION_USERNAME").ok(),

            transmission_password: env::var("TRANSMISSION_PASSWORD").ok(),

            finalize_queue_capacity: env::var("FINALIZE_QUEUE_CAPACITY")
                .unwrap_or_else(|_| "16".to_string())
                .parse()
                .unwrap_or(16),

            finalize_max_concurrent: env::var("FINALIZE_MAX_CONCURRENT")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .unwrap_or(2),
        })
    }
}
