//! Configuration management for the Relay engine
//!
//! Handles server configuration, database location, and upload storage
//! location. All three are overridable via environment variables per the
//! external-interfaces contract.

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database and upload-storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the embedded SQL database file
    pub db_path: String,
    /// Directory for uploaded file blobs, named by opaque stored names
    pub upload_dir: String,
}

impl Default for Config {
    /// Default configuration with env-var overrides for container deployment
    fn default() -> Self {
        let db_path =
            std::env::var("DB_PATH").unwrap_or_else(|_| "./relay.db".to_string());
        let upload_dir = std::env::var("UPLOAD_DIR").unwrap_or_else(|_| {
            let sibling = std::path::Path::new(&db_path)
                .parent()
                .unwrap_or_else(|| std::path::Path::new("."))
                .join("relay-uploads");
            sibling.to_string_lossy().into_owned()
        });

        Self {
            server: ServerConfig {
                host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .unwrap_or(8080),
            },
            database: DatabaseConfig { db_path, upload_dir },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_upload_dir_is_sibling_of_db_path() {
        std::env::remove_var("UPLOAD_DIR");
        std::env::set_var("DB_PATH", "/data/relay.db");
        let cfg = Config::default();
        assert_eq!(cfg.database.upload_dir, "/data/relay-uploads");
        std::env::remove_var("DB_PATH");
    }
}
