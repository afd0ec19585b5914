use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_CORE_TABLES, DEFAULT_MAX_ATTEMPTS, DEFAULT_RATE_WINDOW_MS, DEFAULT_SYSTEM_TABLES,
    LOCK_TIMEOUT_MS, VENDOR_RETRY_ATTEMPTS, VENDOR_RETRY_BASE_DELAY_MS, VENDOR_SESSION_TTL_HOURS,
};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    /// Postgres connection string; the in-memory store is used when absent
    pub database_url: Option<String>,
    pub allowed_origins: Vec<String>,
    pub environment: String,
    pub admin_secret_key: String,
    pub gp51_base_url: String,
    pub gp51_retry_attempts: u32,
    pub gp51_retry_base_delay_ms: u64,
    pub gp51_session_ttl_hours: i64,
    /// Zero disables the periodic sync task
    pub sync_interval_secs: u64,
    pub lock_timeout_secs: u64,
    pub rate_limit_max_attempts: u32,
    pub rate_limit_window_secs: u64,
    pub backup_core_tables: Vec<String>,
    pub backup_system_tables: Vec<String>,
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, String> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| format!("Invalid {}", name)),
        Err(_) => Ok(default),
    }
}

fn list_var(name: &str, default: &[&str]) -> Vec<String> {
    match env::var(name) {
        Ok(raw) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, String> {
        // Load .env file if it exists (development)
        dotenvy::dotenv().ok();

        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let server_port = parse_var("SERVER_PORT", 8080)?;

        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());

        let allowed_origins = list_var("ALLOWED_ORIGINS", &["http://localhost:5173"]);

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let admin_secret_key = env::var("ADMIN_SECRET_KEY")
            .map_err(|_| "ADMIN_SECRET_KEY must be set for admin endpoints")?;

        let gp51_base_url = env::var("GP51_BASE_URL")
            .unwrap_or_else(|_| "https://www.gps51.com/webapi".to_string());

        Ok(Config {
            server_host,
            server_port,
            database_url,
            allowed_origins,
            environment,
            admin_secret_key,
            gp51_base_url,
            gp51_retry_attempts: parse_var("GP51_RETRY_ATTEMPTS", VENDOR_RETRY_ATTEMPTS)?,
            gp51_retry_base_delay_ms: parse_var(
                "GP51_RETRY_BASE_DELAY_MS",
                VENDOR_RETRY_BASE_DELAY_MS,
            )?,
            gp51_session_ttl_hours: parse_var("GP51_SESSION_TTL_HOURS", VENDOR_SESSION_TTL_HOURS)?,
            sync_interval_secs: parse_var("SYNC_INTERVAL_SECS", 0)?,
            lock_timeout_secs: parse_var("LOCK_TIMEOUT_SECS", (LOCK_TIMEOUT_MS / 1000) as u64)?,
            rate_limit_max_attempts: parse_var("RATE_LIMIT_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
            rate_limit_window_secs: parse_var(
                "RATE_LIMIT_WINDOW_SECS",
                (DEFAULT_RATE_WINDOW_MS / 1000) as u64,
            )?,
            backup_core_tables: list_var("BACKUP_CORE_TABLES", DEFAULT_CORE_TABLES),
            backup_system_tables: list_var("BACKUP_SYSTEM_TABLES", DEFAULT_SYSTEM_TABLES),
        })
    }

    /// Get server address as string
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn rate_limit_window_ms(&self) -> i64 {
        (self.rate_limit_window_secs * 1000) as i64
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.gp51_retry_base_delay_ms)
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.gp51_session_ttl_hours)
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
