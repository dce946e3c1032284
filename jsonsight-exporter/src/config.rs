//! Configuration for the JSON exporter.

use std::path::Path;

use indexmap::IndexMap;
use jsonsight_common::LoggingConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::descriptor::{BuildError, build_descriptors};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] jsonsight_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Module {module:?}: {source}")]
    Module {
        module: String,
        #[source]
        source: BuildError,
    },
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Address to listen on (default: "0.0.0.0:7979").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for the exporter's own metrics (default: "/metrics").
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Probe modules, selected with the `module` query parameter.
    #[serde(default)]
    pub modules: IndexMap<String, ModuleConfig>,
}

fn default_listen() -> String {
    "0.0.0.0:7979".to_string()
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            metrics_path: default_metrics_path(),
            logging: LoggingConfig::default(),
            modules: IndexMap::new(),
        }
    }
}

/// One probe module: how to fetch the target and which metrics to extract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Extra request headers.
    #[serde(default)]
    pub headers: IndexMap<String, String>,

    #[serde(default)]
    pub http_client: HttpClientConfig,

    /// Request body. When set, the probe is sent as a POST.
    #[serde(default)]
    pub body: Option<BodyConfig>,

    /// Accepted response status codes (empty = any 2xx).
    #[serde(default)]
    pub valid_status_codes: Vec<u16>,

    #[serde(default)]
    pub metrics: Vec<MetricConfig>,
}

/// HTTP client settings for a module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// Request timeout in seconds (default: 10).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub basic_auth: Option<BasicAuth>,

    #[serde(default)]
    pub bearer_token: Option<String>,

    /// Accept invalid TLS certificates.
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            basic_auth: None,
            bearer_token: None,
            insecure_skip_verify: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyConfig {
    pub content: String,

    /// Replace `{{ .param }}` placeholders with probe query parameters.
    #[serde(default)]
    pub templatize: bool,
}

/// Declarative metric definition.
///
/// `type`, `value_type` and `engine` stay strings here; the descriptor
/// builder parses them so an unknown value names the offending metric.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricConfig {
    pub name: String,

    #[serde(default)]
    pub path: String,

    /// "value" (default) or "object".
    #[serde(default, rename = "type")]
    pub scrape_type: Option<String>,

    #[serde(default)]
    pub help: Option<String>,

    #[serde(default)]
    pub labels: IndexMap<String, String>,

    /// Sub-values of an object scrape, one metric per entry.
    #[serde(default)]
    pub values: Option<IndexMap<String, String>>,

    /// "gauge", "counter" or "untyped" (default).
    #[serde(default, alias = "valuetype")]
    pub value_type: Option<String>,

    /// "jsonpath" (default) or "cel".
    #[serde(default)]
    pub engine: Option<String>,

    /// Value path -> extracted value -> replacement.
    #[serde(default, alias = "valueconverter")]
    pub value_converter: IndexMap<String, IndexMap<String, String>>,

    #[serde(default, alias = "epochTimestamp")]
    pub epoch_timestamp: Option<String>,

    #[serde(default)]
    pub transformations: Vec<TransformationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformationConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub query: String,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: ExporterConfig = jsonsight_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = jsonsight_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Every module's descriptors are built once here so that a bad metric
    /// definition is rejected at startup rather than on the first probe.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.listen
            )));
        }

        if !self.metrics_path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if matches!(self.metrics_path.as_str(), "/" | "/probe" | "/health") {
            return Err(ConfigError::Validation(format!(
                "Metrics path {} is reserved",
                self.metrics_path
            )));
        }

        if self.modules.is_empty() {
            return Err(ConfigError::Validation(
                "At least one module must be configured".to_string(),
            ));
        }

        for (name, module) in &self.modules {
            module.validate(name)?;
        }

        Ok(())
    }

    pub fn module(&self, name: &str) -> Option<&ModuleConfig> {
        self.modules.get(name)
    }
}

impl ModuleConfig {
    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.http_client.timeout_secs == 0 {
            return Err(ConfigError::Validation(format!(
                "Module {:?}: timeout_secs must be > 0",
                name
            )));
        }

        if self.http_client.basic_auth.is_some() && self.http_client.bearer_token.is_some() {
            return Err(ConfigError::Validation(format!(
                "Module {:?}: basic_auth and bearer_token are mutually exclusive",
                name
            )));
        }

        if let Some(code) = self
            .valid_status_codes
            .iter()
            .find(|c| !(100..=599).contains(*c))
        {
            return Err(ConfigError::Validation(format!(
                "Module {:?}: invalid status code {}",
                name, code
            )));
        }

        build_descriptors(self).map_err(|source| ConfigError::Module {
            module: name.to_string(),
            source,
        })?;

        Ok(())
    }
}
