use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    pub db: DbConfig,
    #[serde(default = "default_hosts_file")]
    pub hosts_file: String,
    #[serde(default = "default_services_file")]
    pub services_file: String,
}

fn default_http_port() -> u16 {
    8080
}

fn default_hosts_file() -> String {
    "config/hosts.json".to_string()
}

fn default_services_file() -> String {
    "config/services.json".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default = "default_pool_maxconnections")]
    pub pool_maxconnections: u32,
}

fn default_db_port() -> u16 {
    3306
}

fn default_pool_maxconnections() -> u32 {
    5
}

impl DbConfig {
    pub fn connection_url(&self) -> Result<String> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        let host = self.host.as_deref().context("db.host is required")?;
        let user = self.user.as_deref().context("db.user is required")?;
        let password = self.password.as_deref().unwrap_or("");
        let database = self.database.as_deref().context("db.database is required")?;
        Ok(format!(
            "mysql://{user}:{password}@{host}:{port}/{database}",
            port = self.port
        ))
    }

    pub fn pool_options(&self) -> gnm_storage::PoolOptions {
        gnm_storage::PoolOptions {
            max_connections: self.pool_maxconnections,
            ..Default::default()
        }
    }
}

impl ApiConfig {
    pub fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("config file not found: {path}"))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse config file: {path}"))
    }
}
