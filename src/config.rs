use std::path::Path;

use serde::Deserialize;

use crate::logger::LoggerFormat;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub control: ControlConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InputConfig {
    #[serde(default)]
    pub sources: Vec<InputSource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub address: String,

    // fs, whip
    #[serde(default)]
    pub video_file: Option<String>,
    #[serde(default)]
    pub audio_file: Option<String>,

    // janus
    #[serde(default)]
    pub channel_id: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub sources: Vec<OutputSource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub address: String,

    /// Public base URL subscribers should be pointed at; defaults to
    /// `http://{address}`.
    #[serde(default)]
    pub server: Option<String>,

    #[serde(default)]
    pub https: bool,
    #[serde(default)]
    pub https_hostname: Option<String>,
    #[serde(default)]
    pub https_cert: Option<String>,
    #[serde(default)]
    pub https_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(rename = "type", default = "default_backend")]
    pub kind: String,

    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            kind: default_backend(),
            endpoint: None,
            client_id: None,
            client_secret: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(rename = "type", default = "default_backend")]
    pub kind: String,

    // rt orchestrator
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub whep_endpoint: Option<String>,

    // ftl orchestrator
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub region_code: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            kind: default_backend(),
            endpoint: None,
            key: None,
            whep_endpoint: None,
            address: None,
            region_code: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    /// Override of `service.type` / `orchestrator.type`.
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub orchestrator: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LoggerFormat,

    #[serde(default)]
    pub http_address: Option<String>,
    #[serde(default = "default_http_server_type")]
    pub http_server_type: String,
    #[serde(default)]
    pub https_hostname: Option<String>,
    #[serde(default)]
    pub https_cert: Option<String>,
    #[serde(default)]
    pub https_key: Option<String>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        ControlConfig {
            service: None,
            orchestrator: None,
            log_level: default_log_level(),
            log_format: LoggerFormat::default(),
            http_address: None,
            http_server_type: default_http_server_type(),
            https_hostname: None,
            https_cert: None,
            https_key: None,
        }
    }
}

fn default_backend() -> String {
    "dummy".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_http_server_type() -> String {
    "http".to_string()
}

impl Config {
    pub fn read(path: &Path) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_document_parses() {
        let config: Config = toml::from_str(
            r#"
            [[input.sources]]
            type = "ftl"
            address = "0.0.0.0:8084"

            [[output.sources]]
            type = "whep"
            address = "0.0.0.0:8091"
            server = "http://localhost:8091"

            [service]
            type = "dummy"

            [orchestrator]
            type = "dummy"

            [control]
            log_level = "debug"
            http_address = "0.0.0.0:8091"
            "#,
        )
        .unwrap();

        assert_eq!(config.input.sources.len(), 1);
        assert_eq!(config.input.sources[0].kind, "ftl");
        assert_eq!(config.output.sources[0].server.as_deref(), Some("http://localhost:8091"));
        assert_eq!(config.control.log_level, "debug");
        assert_eq!(config.control.http_server_type, "http");
    }

    #[test]
    fn empty_document_gets_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.input.sources.is_empty());
        assert_eq!(config.service.kind, "dummy");
        assert_eq!(config.orchestrator.kind, "dummy");
        assert_eq!(config.control.log_level, "info");
    }
}
