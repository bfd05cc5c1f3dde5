use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use thiserror::Error;
use url::Url;

use crate::{
    http::client::{self, FetchError, HttpSettings, StatusPolicy},
    model::InstrumentType,
};

// Settings compiled into the binary; user files are merged over these.
const DEFAULT_CONFIG: &str = include_str!("../config/default.yaml");

// Placeholder substituted with the symbol in URL templates.
const SYMBOL_PLACEHOLDER: &str = "{symbol}";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed configuration in {origin}: {message}")]
    Malformed { origin: String, message: String },
    #[error("Configuration in {0} is not a mapping")]
    NotAMapping(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Settings for the provider: headers, URL templates and status policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub header: BTreeMap<String, String>,
    pub uri: UriConfig,
    #[serde(default)]
    pub policy: StatusPolicy,
    #[serde(default)]
    pub http: HttpSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UriConfig {
    pub base: String,
    #[serde(rename = "type")]
    pub templates: UriTemplates,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UriTemplates {
    pub index: String,
    pub stock: String,
}

impl Configuration {
    /// Loads the built-in defaults, deep-merging the user file at `path` over them.
    pub fn load(path: Option<&Path>) -> Result<Configuration> {
        let mut document = parse_document(DEFAULT_CONFIG, "built-in defaults")?;

        if let Some(path) = path {
            let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let user = parse_document(&text, &path.display().to_string())?;
            log::debug!("merging user configuration from {}", path.display());
            document = merge(document, user);
        }

        Configuration::from_value(document)
    }

    /// Built-in defaults with no user overrides.
    pub fn defaults() -> Result<Configuration> {
        Configuration::load(None)
    }

    /// Deserializes and validates an already merged document.
    pub fn from_value(document: Value) -> Result<Configuration> {
        let config: Configuration = serde_yaml::from_value(document)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        Url::parse(&self.uri.base)
            .map_err(|e| ConfigError::Invalid(format!("uri.base {:?}: {}", self.uri.base, e)))?;

        for (name, template) in [
            ("uri.type.index", &self.uri.templates.index),
            ("uri.type.stock", &self.uri.templates.stock),
        ] {
            if !template.contains(SYMBOL_PLACEHOLDER) {
                return Err(ConfigError::Invalid(format!(
                    "{} must contain {}",
                    name, SYMBOL_PLACEHOLDER
                )));
            }
        }

        client::header_map(&self.header).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    pub fn template(&self, instrument: InstrumentType) -> &str {
        match instrument {
            InstrumentType::Index => &self.uri.templates.index,
            InstrumentType::Stock => &self.uri.templates.stock,
        }
    }

    /// The provider landing page, requested first to obtain session cookies.
    pub fn landing_url(&self) -> std::result::Result<Url, FetchError> {
        Url::parse(&self.uri.base).map_err(|e| FetchError::InvalidUrl(e.to_string()))
    }

    /// Option chain URL for `symbol`, with the symbol upper-cased and percent-encoded.
    pub fn chain_url(
        &self,
        instrument: InstrumentType,
        symbol: &str,
    ) -> std::result::Result<Url, FetchError> {
        let symbol = symbol.trim().to_uppercase();
        let encoded: String = url::form_urlencoded::byte_serialize(symbol.as_bytes()).collect();
        let path = self.template(instrument).replace(SYMBOL_PLACEHOLDER, &encoded);
        let raw = format!("{}{}", self.uri.base.trim_end_matches('/'), path);
        Url::parse(&raw).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", raw, e)))
    }
}

fn parse_document(text: &str, origin: &str) -> Result<Value> {
    let value: Value = serde_yaml::from_str(text).map_err(|e| ConfigError::Malformed {
        origin: origin.to_string(),
        message: e.to_string(),
    })?;
    match value {
        Value::Mapping(_) => Ok(value),
        _ => Err(ConfigError::NotAMapping(origin.to_string())),
    }
}

/// Deep-merges `overlay` over `base`.
///
/// Mappings merge key by key, recursively; any other overlay value replaces
/// the base value outright.
pub fn merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => {
                        let current = std::mem::replace(existing, Value::Null);
                        *existing = merge(current, value);
                    }
                    None => {
                        base.insert(key, value);
                    }
                }
            }
            Value::Mapping(base)
        }
        (_, overlay) => overlay,
    }
}
