use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::hash::HashAlgorithm;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub mail: MailConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            hash_algorithm: HashAlgorithm::default(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct MailConfig {
    #[serde(default = "default_from")]
    pub from: String,
    #[serde(default = "default_spool_dir")]
    pub spool_dir: PathBuf,
    #[serde(default = "default_product_name")]
    pub product_name: String,
    #[serde(default = "default_attachment_prefix")]
    pub attachment_prefix: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from: default_from(),
            spool_dir: default_spool_dir(),
            product_name: default_product_name(),
            attachment_prefix: default_attachment_prefix(),
        }
    }
}

fn default_from() -> String {
    "csv-vault@localhost".to_string()
}
fn default_spool_dir() -> PathBuf {
    PathBuf::from("./data/outbox")
}
fn default_product_name() -> String {
    "CSV Vault".to_string()
}
fn default_attachment_prefix() -> String {
    "csv_vault".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.db.path.as_os_str().is_empty() {
        anyhow::bail!("db.path must not be empty");
    }

    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    if config.ingest.max_upload_bytes == 0 {
        anyhow::bail!("ingest.max_upload_bytes must be > 0");
    }

    if !config.mail.from.contains('@') {
        anyhow::bail!(
            "mail.from must be an email address, got '{}'",
            config.mail.from
        );
    }

    if config.mail.attachment_prefix.trim().is_empty() {
        anyhow::bail!("mail.attachment_prefix must not be empty");
    }

    Ok(config)
}
