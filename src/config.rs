use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use anyhow::Result;

use crate::error::GateError;

pub const DEFAULT_CONFIG_FILE: &str = "querygate.json";
pub const DEFAULT_ROWS_BATCH: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mysql_port: u16,
    pub bind_address: String,
    /// Maximum number of rows pushed to the client per result batch.
    pub rows_batch_size: usize,
    pub server_version: String,
    /// Directory whose `*.csv` files are registered as tables at startup.
    pub data_dir: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mysql_port: 3306,
            bind_address: "0.0.0.0".to_string(),
            rows_batch_size: DEFAULT_ROWS_BATCH,
            server_version: "5.7.99-querygate".to_string(),
            data_dir: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        // Fall back to defaults when there is no config file
        let mut config = match fs::read_to_string(path.as_ref()) {
            Ok(content) => serde_json::from_str::<Config>(&content)?,
            Err(_) => Config::default(),
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("QG_MYSQL_PORT") {
            if let Ok(port_num) = port.parse::<u16>() {
                self.mysql_port = port_num;
            }
        }

        if let Ok(addr) = std::env::var("QG_BIND_ADDRESS") {
            if !addr.trim().is_empty() {
                self.bind_address = addr.trim().to_string();
            }
        }

        if let Ok(batch) = std::env::var("QG_ROWS_BATCH") {
            if let Ok(size) = batch.parse::<usize>() {
                self.rows_batch_size = size;
            }
        }

        if let Ok(dir) = std::env::var("QG_DATA_DIR") {
            self.data_dir = Some(dir);
        }
    }

    pub fn validate(&self) -> std::result::Result<(), GateError> {
        if self.rows_batch_size == 0 {
            return Err(GateError::Config(
                "rows_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.mysql_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_use_batches_of_one_hundred() {
        let config = Config::default();
        assert_eq!(config.rows_batch_size, 100);
        assert_eq!(config.listen_addr(), "0.0.0.0:3306");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let config = Config {
            rows_batch_size: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(GateError::Config(_))));
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "mysql_port": 4406, "data_dir": "/tmp/tables" }}"#).unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.data_dir.as_deref(), Some("/tmp/tables"));
        assert_eq!(config.server_version, "5.7.99-querygate");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        assert!(Config::load_from(file.path()).is_err());
    }
}
